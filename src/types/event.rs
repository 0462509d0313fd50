//! The telemetry event and its enum-like attributes.
//!
//! Events are plain values. They are mutated while the plugin pipeline runs
//! and are treated as immutable once handed to the queue.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::ids::ReferenceId;

/// Well-known keys in [`Event::data`].
pub mod keys {
    /// Log level of a log event (see [`super::LogLevel`]).
    pub const LEVEL: &str = "@level";
    /// User identity attached to the event.
    pub const USER: &str = "@user";
    /// Structured error payload written by the error plugin.
    pub const ERROR: &str = "@error";
    /// Session id for session markers.
    pub const SESSION: &str = "@ref:session";
    /// User supplied description of what happened.
    pub const USER_DESCRIPTION: &str = "@user_description";
}

/// The kind of telemetry event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EventType {
    Error,
    Log,
    FeatureUsage,
    SessionStart,
    SessionEnd,
    NotFound,
}

impl EventType {
    /// Returns the wire name, also used in `@@<type>:<source>` settings keys.
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::Error => "error",
            EventType::Log => "log",
            EventType::FeatureUsage => "feature-usage",
            EventType::SessionStart => "session-start",
            EventType::SessionEnd => "session-end",
            EventType::NotFound => "not-found",
        }
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Severity of a log event, ordered from least to most severe.
///
/// `Off` sorts above every real level, so a minimum level of `Off`
/// excludes everything.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
    Fatal,
    Off,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Trace => "trace",
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
            LogLevel::Fatal => "fatal",
            LogLevel::Off => "off",
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when a string is not a recognised log level.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown log level: {0}")]
pub struct UnknownLogLevel(pub String);

impl FromStr for LogLevel {
    type Err = UnknownLogLevel;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "trace" => Ok(LogLevel::Trace),
            "debug" => Ok(LogLevel::Debug),
            "info" | "information" => Ok(LogLevel::Info),
            "warn" | "warning" => Ok(LogLevel::Warn),
            "error" => Ok(LogLevel::Error),
            "fatal" | "critical" => Ok(LogLevel::Fatal),
            "off" | "none" | "false" => Ok(LogLevel::Off),
            _ => Err(UnknownLogLevel(s.to_string())),
        }
    }
}

/// One telemetry record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    #[serde(rename = "type")]
    pub kind: EventType,

    /// Free text origin, e.g. a logger name or a feature name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,

    pub date: DateTime<Utc>,

    /// Occurrence multiplier. `None` until the event has been merged.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub count: Option<u32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reference_id: Option<ReferenceId>,

    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub tags: BTreeSet<String>,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub data: BTreeMap<String, Value>,
}

impl Event {
    /// Creates an empty event of the given kind dated `date`.
    pub fn new(kind: EventType, date: DateTime<Utc>) -> Self {
        Event {
            kind,
            source: None,
            message: None,
            date,
            count: None,
            reference_id: None,
            tags: BTreeSet::new(),
            data: BTreeMap::new(),
        }
    }

    /// Returns the log level stored under `@level`, if any.
    pub fn level(&self) -> Option<LogLevel> {
        self.data
            .get(keys::LEVEL)
            .and_then(Value::as_str)
            .and_then(|s| s.parse().ok())
    }

    pub fn set_level(&mut self, level: LogLevel) {
        self.data
            .insert(keys::LEVEL.to_string(), Value::String(level.as_str().to_string()));
    }

    /// Returns the session id stored under `@ref:session`, if any.
    pub fn session_id(&self) -> Option<&str> {
        self.data.get(keys::SESSION).and_then(Value::as_str)
    }

    /// Effective occurrence count (an unmerged event counts once).
    pub fn occurrences(&self) -> u32 {
        self.count.unwrap_or(1)
    }
}
