//! Versioned key/value settings and the lookups the pipeline makes on them.
//!
//! Two key families drive event filtering:
//!
//! - `@@log:<source-pattern>` = minimum log level for matching sources
//! - `@@<type>:<source-pattern>` = `false` disables events of that type
//!
//! Source patterns may contain `*` wildcards. When several patterns match,
//! the longest (most specific) one wins.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::storage::wildcard_match;
use crate::types::{EventType, LogLevel};

const SETTING_PREFIX: &str = "@@";
const LOG_TYPE: &str = "log";

/// A settings map with the version it was issued at.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SettingsSnapshot {
    pub version: u64,
    pub values: BTreeMap<String, String>,
}

impl SettingsSnapshot {
    pub fn new(version: u64, values: BTreeMap<String, String>) -> Self {
        SettingsSnapshot { version, values }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(String::as_str)
    }

    /// Parses a boolean setting. Unrecognised values read as `None`.
    pub fn get_bool(&self, key: &str) -> Option<bool> {
        parse_bool(self.get(key)?)
    }

    /// Minimum log level configured for `source`.
    ///
    /// `None` means no rule matches and every level is kept.
    pub fn minimum_log_level(&self, source: Option<&str>) -> Option<LogLevel> {
        self.most_specific(LOG_TYPE, source.unwrap_or_default())
            .and_then(|value| value.parse().ok())
    }

    /// Whether events of `kind` from `source` are enabled.
    ///
    /// Only an explicit `false` disables; unparsable values are ignored.
    pub fn type_enabled(&self, kind: EventType, source: Option<&str>) -> bool {
        if kind == EventType::Log {
            return true;
        }
        self.most_specific(kind.as_str(), source.unwrap_or_default())
            .and_then(parse_bool)
            .unwrap_or(true)
    }

    fn most_specific(&self, kind: &str, source: &str) -> Option<&str> {
        let prefix = format!("{SETTING_PREFIX}{kind}:");
        self.values
            .iter()
            .filter_map(|(key, value)| {
                let pattern = key.strip_prefix(&prefix)?;
                wildcard_match(pattern, source).then_some((pattern, value.as_str()))
            })
            .max_by(|(a, _), (b, _)| a.len().cmp(&b.len()).then_with(|| b.cmp(a)))
            .map(|(_, value)| value)
    }
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}
