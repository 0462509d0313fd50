//! Client configuration.
//!
//! A [`Configuration`] is built in code (or partially from the environment)
//! and validated once when the client is constructed. An invalid
//! configuration does not fail construction: the client logs the problem and
//! turns every entry point into a no-op.

use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use thiserror::Error;

use crate::types::{Event, Namespace};

/// Default batch size for queue submission.
pub const DEFAULT_BATCH_SIZE: usize = 50;

/// Candidates listed per wanted batch slot, to absorb lock contention.
const DEFAULT_OVERFETCH_FACTOR: usize = 5;

/// Default maximum age of a queued item (2 days).
const DEFAULT_MAX_QUEUE_AGE_SECS: u64 = 2 * 24 * 60 * 60;

/// Default number of delivery attempts before an item is discarded.
const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// Default age after which a lock is considered abandoned (60 minutes).
const DEFAULT_MAX_LOCK_AGE_SECS: u64 = 60 * 60;

/// Default dedup window.
const DEFAULT_DEDUP_WINDOW_SECS: u64 = 60;

/// Default number of recently forwarded hashes remembered by the deduplicator.
const DEFAULT_DEDUP_CAPACITY: usize = 50;

const DEFAULT_QUEUE_MIN_INTERVAL_SECS: u64 = 1;
const DEFAULT_QUEUE_POLL_INTERVAL_SECS: u64 = 10;
const DEFAULT_SETTINGS_IDLE_INTERVAL_SECS: u64 = 2 * 60;
const DEFAULT_SUBMISSION_TIMEOUT_SECS: u64 = 30;
const DEFAULT_SHUTDOWN_TIMEOUT_SECS: u64 = 5;
const DEFAULT_HEARTBEAT_INTERVAL_SECS: u64 = 30;

const DEFAULT_SERVER_URL: &str = "https://collector.invalid";

/// Placeholder key shipped in sample configuration files.
const PLACEHOLDER_API_KEY: &str = "API_KEY_HERE";

const MIN_API_KEY_LEN: usize = 10;

/// Errors detected by [`Configuration::validate`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("no API key configured")]
    MissingApiKey,

    #[error("API key is malformed: {0}")]
    InvalidApiKey(&'static str),

    #[error("invalid value for {field}: {reason}")]
    InvalidValue {
        field: &'static str,
        reason: &'static str,
    },
}

/// Caller supplied predicate; returning `true` excludes the event.
pub type ExclusionFn = Arc<dyn Fn(&Event) -> bool + Send + Sync>;

/// Configuration for a [`crate::client::TelemetryClient`].
#[derive(Clone)]
pub struct Configuration {
    pub api_key: Option<String>,

    /// Collector address. Opaque to the pipeline; handed to the submission client.
    pub server_url: String,

    /// Root directory for the durable queue. `None` keeps the queue in memory.
    pub storage_path: Option<PathBuf>,

    /// Master switch. A disabled client accepts and discards events.
    pub enabled: bool,

    pub batch_size: usize,
    pub batch_overfetch_factor: usize,
    pub max_queue_age: Duration,
    pub max_attempts: u32,
    pub max_lock_age: Duration,

    pub dedup_window: Duration,
    pub dedup_capacity: usize,

    /// Interval used on first use and right after an event is queued.
    pub queue_min_interval: Duration,
    /// Steady interval the queue loop backs off to while idle.
    pub queue_poll_interval: Duration,
    /// Quiet period after which server settings are refreshed.
    pub settings_idle_interval: Duration,

    pub submission_timeout: Duration,
    pub shutdown_timeout: Duration,
    pub heartbeat_interval: Duration,

    pub default_tags: BTreeSet<String>,
    pub default_data: BTreeMap<String, Value>,

    /// Settings known locally; server settings with the same key win.
    pub local_settings: BTreeMap<String, String>,

    pub exclusions: Vec<ExclusionFn>,
}

impl std::fmt::Debug for Configuration {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Configuration")
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .field("server_url", &self.server_url)
            .field("storage_path", &self.storage_path)
            .field("enabled", &self.enabled)
            .field("batch_size", &self.batch_size)
            .field("max_queue_age", &self.max_queue_age)
            .field("max_attempts", &self.max_attempts)
            .field("dedup_window", &self.dedup_window)
            .field("exclusions", &self.exclusions.len())
            .finish_non_exhaustive()
    }
}

impl Default for Configuration {
    fn default() -> Self {
        Self::new()
    }
}

impl Configuration {
    pub fn new() -> Self {
        Configuration {
            api_key: None,
            server_url: DEFAULT_SERVER_URL.to_string(),
            storage_path: None,
            enabled: true,
            batch_size: DEFAULT_BATCH_SIZE,
            batch_overfetch_factor: DEFAULT_OVERFETCH_FACTOR,
            max_queue_age: Duration::from_secs(DEFAULT_MAX_QUEUE_AGE_SECS),
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            max_lock_age: Duration::from_secs(DEFAULT_MAX_LOCK_AGE_SECS),
            dedup_window: Duration::from_secs(DEFAULT_DEDUP_WINDOW_SECS),
            dedup_capacity: DEFAULT_DEDUP_CAPACITY,
            queue_min_interval: Duration::from_secs(DEFAULT_QUEUE_MIN_INTERVAL_SECS),
            queue_poll_interval: Duration::from_secs(DEFAULT_QUEUE_POLL_INTERVAL_SECS),
            settings_idle_interval: Duration::from_secs(DEFAULT_SETTINGS_IDLE_INTERVAL_SECS),
            submission_timeout: Duration::from_secs(DEFAULT_SUBMISSION_TIMEOUT_SECS),
            shutdown_timeout: Duration::from_secs(DEFAULT_SHUTDOWN_TIMEOUT_SECS),
            heartbeat_interval: Duration::from_secs(DEFAULT_HEARTBEAT_INTERVAL_SECS),
            default_tags: BTreeSet::new(),
            default_data: BTreeMap::new(),
            local_settings: BTreeMap::new(),
            exclusions: Vec::new(),
        }
    }

    /// Reads the connection settings from the environment.
    ///
    /// Reads `TELEMETRY_API_KEY`, `TELEMETRY_SERVER_URL`,
    /// `TELEMETRY_STORAGE_PATH` and `TELEMETRY_BATCH_SIZE`. Unset or
    /// unparsable values keep their defaults.
    pub fn from_env() -> Self {
        let mut config = Self::new();
        config.api_key = std::env::var("TELEMETRY_API_KEY").ok();
        if let Ok(url) = std::env::var("TELEMETRY_SERVER_URL") {
            config.server_url = url;
        }
        config.storage_path = std::env::var("TELEMETRY_STORAGE_PATH")
            .ok()
            .map(PathBuf::from);
        if let Some(batch_size) = std::env::var("TELEMETRY_BATCH_SIZE")
            .ok()
            .and_then(|s| s.parse::<usize>().ok())
        {
            config.batch_size = batch_size;
        }
        config
    }

    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }

    pub fn with_server_url(mut self, url: impl Into<String>) -> Self {
        self.server_url = url.into();
        self
    }

    pub fn with_storage_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.storage_path = Some(path.into());
        self
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    pub fn with_dedup_window(mut self, window: Duration) -> Self {
        self.dedup_window = window;
        self
    }

    pub fn with_default_tag(mut self, tag: impl Into<String>) -> Self {
        self.default_tags.insert(tag.into());
        self
    }

    pub fn with_default_data(mut self, key: impl Into<String>, value: Value) -> Self {
        self.default_data.insert(key.into(), value);
        self
    }

    pub fn with_local_setting(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.local_settings.insert(key.into(), value.into());
        self
    }

    /// Adds a predicate that excludes matching events before they are queued.
    pub fn with_exclusion(mut self, exclusion: impl Fn(&Event) -> bool + Send + Sync + 'static) -> Self {
        self.exclusions.push(Arc::new(exclusion));
        self
    }

    /// Checks that the configuration can drive a working client.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let key = self.api_key.as_deref().map(str::trim).unwrap_or_default();
        if key.is_empty() {
            return Err(ConfigError::MissingApiKey);
        }
        if key.eq_ignore_ascii_case(PLACEHOLDER_API_KEY) {
            return Err(ConfigError::InvalidApiKey("placeholder key"));
        }
        if key.len() < MIN_API_KEY_LEN {
            return Err(ConfigError::InvalidApiKey("too short"));
        }
        if !key
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        {
            return Err(ConfigError::InvalidApiKey("unexpected characters"));
        }
        if self.batch_size == 0 {
            return Err(ConfigError::InvalidValue {
                field: "batch_size",
                reason: "must be at least 1",
            });
        }
        if self.max_attempts == 0 {
            return Err(ConfigError::InvalidValue {
                field: "max_attempts",
                reason: "must be at least 1",
            });
        }
        Ok(())
    }

    /// Storage namespace for this API key.
    ///
    /// Only meaningful for a configuration that passed [`validate`](Self::validate).
    pub fn queue_namespace(&self) -> Namespace {
        Namespace::from_api_key(self.api_key.as_deref().map(str::trim).unwrap_or_default())
    }

    /// Number of queue candidates to list for one batch.
    pub fn overfetch_limit(&self, batch_size: usize) -> usize {
        batch_size.saturating_mul(self.batch_overfetch_factor.max(1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const KEY: &str = "LhhP1C9gijpSKCslHHCvwdSIz298twx271n1l6xw";

    #[test]
    fn defaults_match_documented_values() {
        let config = Configuration::new();
        assert_eq!(config.batch_size, 50);
        assert_eq!(config.max_attempts, 3);
        assert_eq!(config.dedup_window, Duration::from_secs(60));
        assert_eq!(config.dedup_capacity, 50);
        assert_eq!(config.max_queue_age, Duration::from_secs(172_800));
        assert!(config.enabled);
    }

    #[test]
    fn missing_key_is_rejected() {
        assert_eq!(
            Configuration::new().validate(),
            Err(ConfigError::MissingApiKey)
        );
        assert_eq!(
            Configuration::new().with_api_key("   ").validate(),
            Err(ConfigError::MissingApiKey)
        );
    }

    #[test]
    fn malformed_keys_are_rejected() {
        for key in ["API_KEY_HERE", "short", "has spaces in the key", "slash/in/key/abc"] {
            let result = Configuration::new().with_api_key(key).validate();
            assert!(
                matches!(result, Err(ConfigError::InvalidApiKey(_))),
                "{key} should be rejected, got {result:?}"
            );
        }
    }

    #[test]
    fn zero_batch_size_is_rejected() {
        let result = Configuration::new()
            .with_api_key(KEY)
            .with_batch_size(0)
            .validate();
        assert!(matches!(
            result,
            Err(ConfigError::InvalidValue { field: "batch_size", .. })
        ));
    }

    #[test]
    fn valid_key_passes_and_derives_namespace() {
        let config = Configuration::new().with_api_key(KEY);
        assert_eq!(config.validate(), Ok(()));
        assert_eq!(config.queue_namespace().as_str(), "LhhP1C9g");
    }

    #[test]
    fn overfetch_limit_multiplies_batch() {
        let config = Configuration::new();
        assert_eq!(config.overfetch_limit(3), 15);
        assert_eq!(config.overfetch_limit(usize::MAX), usize::MAX);
    }

    #[test]
    fn debug_output_redacts_key() {
        let config = Configuration::new().with_api_key(KEY);
        let debug = format!("{config:?}");
        assert!(!debug.contains(KEY));
        assert!(debug.contains("<redacted>"));
    }
}
