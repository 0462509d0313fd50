//! Shared test utilities and arbitrary generators for property-based testing.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use proptest::prelude::*;

use crate::clock::ManualClock;
use crate::config::Configuration;
use crate::submission::{SettingsResponse, SubmissionClient, SubmissionResponse};
use crate::types::{Event, EventBuilder, EventType, LogLevel, ReferenceId, UserDescription};

/// A valid API key for tests.
pub const TEST_API_KEY: &str = "LhhP1C9gijpSKCslHHCvwdSIz298twx271n1l6xw";

/// A configuration that passes validation.
pub fn test_config() -> Configuration {
    Configuration::new().with_api_key(TEST_API_KEY)
}

pub fn manual_clock() -> Arc<ManualClock> {
    Arc::new(ManualClock::starting_now())
}

#[derive(Debug, Default)]
struct Recorded {
    submit_responses: VecDeque<SubmissionResponse>,
    submit_delay: Option<Duration>,
    batches: Vec<Vec<Event>>,
    settings_response: Option<SettingsResponse>,
    settings_requests: Vec<u64>,
    descriptions: Vec<(ReferenceId, UserDescription)>,
    heartbeats: Vec<(String, bool)>,
}

/// A submission client that records every call and replays scripted
/// responses.
///
/// Submissions answer with queued responses in order, then `202 Accepted`
/// once the script runs out. A submit delay makes every submission sleep
/// before it is recorded.
#[derive(Debug, Clone, Default)]
pub struct RecordingSubmissionClient {
    recorded: Arc<Mutex<Recorded>>,
}

impl RecordingSubmissionClient {
    pub fn new() -> Self {
        Self::default()
    }

    fn recorded(&self) -> std::sync::MutexGuard<'_, Recorded> {
        self.recorded.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn push_submit_response(&self, response: SubmissionResponse) {
        self.recorded().submit_responses.push_back(response);
    }

    pub fn set_submit_delay(&self, delay: Duration) {
        self.recorded().submit_delay = Some(delay);
    }

    pub fn set_settings_response(&self, response: SettingsResponse) {
        self.recorded().settings_response = Some(response);
    }

    pub fn batches(&self) -> Vec<Vec<Event>> {
        self.recorded().batches.clone()
    }

    pub fn submitted_events(&self) -> Vec<Event> {
        self.recorded().batches.iter().flatten().cloned().collect()
    }

    pub fn settings_requests(&self) -> Vec<u64> {
        self.recorded().settings_requests.clone()
    }

    pub fn descriptions(&self) -> Vec<(ReferenceId, UserDescription)> {
        self.recorded().descriptions.clone()
    }

    pub fn heartbeats(&self) -> Vec<(String, bool)> {
        self.recorded().heartbeats.clone()
    }
}

impl SubmissionClient for RecordingSubmissionClient {
    async fn submit(&self, events: &[Event], _config: &Configuration) -> SubmissionResponse {
        let delay = self.recorded().submit_delay;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        let mut recorded = self.recorded();
        recorded.batches.push(events.to_vec());
        recorded
            .submit_responses
            .pop_front()
            .unwrap_or_else(SubmissionResponse::accepted)
    }

    async fn get_settings(&self, version: u64, _config: &Configuration) -> SettingsResponse {
        let mut recorded = self.recorded();
        recorded.settings_requests.push(version);
        recorded
            .settings_response
            .clone()
            .unwrap_or_else(|| SettingsResponse::unchanged(version))
    }

    async fn post_user_description(
        &self,
        reference_id: &ReferenceId,
        description: &UserDescription,
        _config: &Configuration,
    ) -> SubmissionResponse {
        self.recorded()
            .descriptions
            .push((reference_id.clone(), description.clone()));
        SubmissionResponse::accepted()
    }

    async fn send_heartbeat(
        &self,
        session_id: &str,
        is_end: bool,
        _config: &Configuration,
    ) -> SubmissionResponse {
        self.recorded()
            .heartbeats
            .push((session_id.to_string(), is_end));
        SubmissionResponse::accepted()
    }
}

pub fn arb_log_level() -> impl Strategy<Value = LogLevel> {
    prop_oneof![
        Just(LogLevel::Trace),
        Just(LogLevel::Debug),
        Just(LogLevel::Info),
        Just(LogLevel::Warn),
        Just(LogLevel::Error),
        Just(LogLevel::Fatal),
    ]
}

pub fn arb_event_type() -> impl Strategy<Value = EventType> {
    prop_oneof![
        Just(EventType::Log),
        Just(EventType::Error),
        Just(EventType::FeatureUsage),
        Just(EventType::NotFound),
    ]
}

pub fn arb_event() -> impl Strategy<Value = Event> {
    (
        arb_event_type(),
        "[a-z][a-z0-9:_]{0,20}",
        "[a-zA-Z0-9 ]{0,60}",
        prop::collection::btree_set("[a-z]{1,8}", 0..3),
        prop::option::of(arb_log_level()),
    )
        .prop_map(|(kind, source, message, tags, level)| {
            let mut builder = EventBuilder::new(kind).source(source).message(message);
            for tag in tags {
                builder = builder.tag(tag);
            }
            if kind == EventType::Log
                && let Some(level) = level
            {
                builder = builder.level(level);
            }
            builder.build()
        })
}
