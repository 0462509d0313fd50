//! Server-driven settings.
//!
//! The collector hands out a versioned key/value map that tunes client
//! behaviour (minimum log levels, disabled event types). The
//! [`SettingsManager`] keeps the current map in memory, persists it beside
//! the queue so a restart does not re-fetch it, and replaces it wholesale
//! when a newer version arrives: keys missing from the new map are dropped.
//!
//! Locally configured settings act as defaults underneath the server's.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use thiserror::Error;
use tracing::{debug, info, instrument, warn};

use crate::config::Configuration;
use crate::storage::{ObjectStorage, StorageError};
use crate::submission::SubmissionClient;
use crate::types::Namespace;

pub mod snapshot;
pub mod store;

pub use snapshot::SettingsSnapshot;

/// Errors that can occur while persisting or loading settings.
#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid settings version: {0}")]
    InvalidVersion(String),
}

/// Result type for settings operations.
pub type Result<T> = std::result::Result<T, SettingsError>;

/// Result of a settings sync.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncOutcome {
    /// A newer version was applied.
    Updated { version: u64 },
    /// The server had nothing newer.
    Unchanged,
    /// The server could not be asked, or refused.
    Failed,
}

/// Owner of the server settings for one namespace.
pub struct SettingsManager {
    storage: Arc<dyn ObjectStorage>,
    namespace: Namespace,
    local: BTreeMap<String, String>,
    /// Server settings as last applied.
    server: Mutex<SettingsSnapshot>,
    /// Local settings overlaid with server settings.
    effective: RwLock<Arc<SettingsSnapshot>>,
}

impl std::fmt::Debug for SettingsManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SettingsManager")
            .field("namespace", &self.namespace)
            .field("version", &self.version())
            .finish_non_exhaustive()
    }
}

impl SettingsManager {
    /// Creates a manager, loading whatever was persisted for `namespace`.
    pub fn load(
        storage: Arc<dyn ObjectStorage>,
        namespace: Namespace,
        local: BTreeMap<String, String>,
    ) -> Self {
        let server = store::load(storage.as_ref(), &namespace);
        debug!(namespace = %namespace, version = server.version, "Loaded server settings");
        let effective = Arc::new(overlay(&local, &server));
        SettingsManager {
            storage,
            namespace,
            local,
            server: Mutex::new(server),
            effective: RwLock::new(effective),
        }
    }

    /// The version of the server settings currently held.
    pub fn version(&self) -> u64 {
        self.server
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .version
    }

    /// Effective settings: local values overridden by server values.
    pub fn current(&self) -> Arc<SettingsSnapshot> {
        self.effective
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Whether the server reports a version newer than the one held.
    pub fn is_stale(&self, server_version: u64) -> bool {
        server_version > self.version()
    }

    /// Replaces the server settings if `version` is newer.
    ///
    /// The new map is persisted before it takes effect in memory. Returns
    /// `Ok(false)` when the version is not newer.
    pub fn apply(&self, version: u64, values: BTreeMap<String, String>) -> Result<bool> {
        let mut server = self.server.lock().unwrap_or_else(PoisonError::into_inner);
        if version <= server.version {
            return Ok(false);
        }

        let next = SettingsSnapshot::new(version, values);
        store::save(self.storage.as_ref(), &self.namespace, &next)?;

        let evicted = server
            .values
            .keys()
            .filter(|key| !next.values.contains_key(*key))
            .count();
        info!(
            from = server.version,
            to = version,
            keys = next.values.len(),
            evicted,
            "Updated server settings"
        );

        let effective = Arc::new(overlay(&self.local, &next));
        *server = next;
        *self.effective.write().unwrap_or_else(PoisonError::into_inner) = effective;
        Ok(true)
    }

    /// Asks the collector for settings newer than the held version.
    #[instrument(skip_all, fields(version = self.version()))]
    pub async fn sync<S: SubmissionClient>(&self, client: &S, config: &Configuration) -> SyncOutcome {
        let current = self.version();
        let response = client.get_settings(current, config).await;

        if !response.success {
            warn!(message = ?response.message, "Settings sync failed");
            return SyncOutcome::Failed;
        }
        let Some(values) = response.settings else {
            return SyncOutcome::Unchanged;
        };
        if response.version <= current {
            return SyncOutcome::Unchanged;
        }

        match self.apply(response.version, values) {
            Ok(true) => SyncOutcome::Updated {
                version: response.version,
            },
            Ok(false) => SyncOutcome::Unchanged,
            Err(e) => {
                warn!(error = %e, "Failed to persist server settings");
                SyncOutcome::Failed
            }
        }
    }
}

fn overlay(local: &BTreeMap<String, String>, server: &SettingsSnapshot) -> SettingsSnapshot {
    let mut values = local.clone();
    values.extend(server.values.iter().map(|(k, v)| (k.clone(), v.clone())));
    SettingsSnapshot::new(server.version, values)
}
