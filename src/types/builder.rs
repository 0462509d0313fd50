//! Fluent construction of events.

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;

use super::event::{Event, EventType, LogLevel, keys};
use super::ids::ReferenceId;
use super::user::UserIdentity;

/// Builds an [`Event`] step by step.
///
/// ```
/// use telemetry_pipeline::types::{EventBuilder, LogLevel};
///
/// let event = EventBuilder::log("billing", "invoice retry scheduled")
///     .level(LogLevel::Warn)
///     .tag("billing")
///     .property("attempt", 3)
///     .build();
/// assert_eq!(event.level(), Some(LogLevel::Warn));
/// ```
#[derive(Debug, Clone)]
pub struct EventBuilder {
    event: Event,
}

impl EventBuilder {
    /// Starts an event of `kind` dated now.
    pub fn new(kind: EventType) -> Self {
        EventBuilder {
            event: Event::new(kind, Utc::now()),
        }
    }

    pub fn log(source: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(EventType::Log).source(source).message(message)
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::new(EventType::Error).message(message)
    }

    pub fn feature_usage(feature: impl Into<String>) -> Self {
        Self::new(EventType::FeatureUsage).source(feature)
    }

    pub fn not_found(resource: impl Into<String>) -> Self {
        Self::new(EventType::NotFound).source(resource)
    }

    pub fn session_start(session_id: &str) -> Self {
        Self::new(EventType::SessionStart).session(session_id)
    }

    pub fn session_end(session_id: &str) -> Self {
        Self::new(EventType::SessionEnd).session(session_id)
    }

    pub fn source(mut self, source: impl Into<String>) -> Self {
        self.event.source = Some(source.into());
        self
    }

    pub fn message(mut self, message: impl Into<String>) -> Self {
        self.event.message = Some(message.into());
        self
    }

    pub fn date(mut self, date: DateTime<Utc>) -> Self {
        self.event.date = date;
        self
    }

    pub fn level(mut self, level: LogLevel) -> Self {
        self.event.set_level(level);
        self
    }

    pub fn tag(mut self, tag: impl Into<String>) -> Self {
        self.event.tags.insert(tag.into());
        self
    }

    pub fn reference_id(mut self, id: impl Into<ReferenceId>) -> Self {
        self.event.reference_id = Some(id.into());
        self
    }

    /// Marks the event as already merged upstream.
    ///
    /// The deduplicator passes such events through untouched.
    pub fn count(mut self, count: u32) -> Self {
        self.event.count = Some(count);
        self
    }

    pub fn user_identity(mut self, user: UserIdentity) -> Self {
        if let Ok(value) = serde_json::to_value(user) {
            self.event.data.insert(keys::USER.to_string(), value);
        }
        self
    }

    /// Adds a structured property. Values that fail to serialize are skipped.
    pub fn property(mut self, key: impl Into<String>, value: impl Serialize) -> Self {
        match serde_json::to_value(value) {
            Ok(value) => {
                self.event.data.insert(key.into(), value);
            }
            Err(e) => {
                tracing::debug!(error = %e, "Skipping unserializable event property");
            }
        }
        self
    }

    fn session(mut self, session_id: &str) -> Self {
        self.event
            .data
            .insert(keys::SESSION.to_string(), Value::String(session_id.to_string()));
        self
    }

    pub fn build(self) -> Event {
        self.event
    }
}

impl From<&str> for EventBuilder {
    fn from(message: &str) -> Self {
        EventBuilder::new(EventType::Log).message(message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn log_builder_sets_fields() {
        let event = EventBuilder::log("app::db", "slow query")
            .level(LogLevel::Debug)
            .tag("db")
            .tag("perf")
            .property("millis", 1200)
            .build();

        assert_eq!(event.kind, EventType::Log);
        assert_eq!(event.source.as_deref(), Some("app::db"));
        assert_eq!(event.message.as_deref(), Some("slow query"));
        assert_eq!(event.level(), Some(LogLevel::Debug));
        assert_eq!(event.tags.len(), 2);
        assert_eq!(event.data["millis"], 1200);
        assert_eq!(event.count, None);
    }

    #[test]
    fn session_markers_carry_session_id() {
        let start = EventBuilder::session_start("s-1").build();
        let end = EventBuilder::session_end("s-1").build();
        assert_eq!(start.kind, EventType::SessionStart);
        assert_eq!(end.kind, EventType::SessionEnd);
        assert_eq!(start.session_id(), Some("s-1"));
        assert_eq!(end.session_id(), Some("s-1"));
    }

    #[test]
    fn user_identity_is_stored_under_well_known_key() {
        let event = EventBuilder::error("boom")
            .user_identity(UserIdentity::new("u-42").with_name("Ada"))
            .build();
        assert_eq!(event.data[keys::USER]["identity"], "u-42");
        assert_eq!(event.data[keys::USER]["name"], "Ada");
    }

    #[test]
    fn preset_count_is_kept() {
        let event = EventBuilder::error("boom").count(12).build();
        assert_eq!(event.count, Some(12));
    }
}
