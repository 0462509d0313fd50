//! The abstract remote collector.
//!
//! The pipeline never speaks HTTP itself. Everything remote goes through a
//! [`SubmissionClient`]: posting a batch, fetching settings newer than a
//! version, posting a user description and sending session heartbeats.
//! Implementations own their transport and its timeout; the client still
//! wraps every call in `submission_timeout` so a hung transport cannot stall
//! a drain.
//!
//! Failures are values, not errors. A [`SubmissionResponse`] carries the
//! status (or its absence for transport failures) and [`outcome::classify`]
//! turns it into what the queue should do next.

use std::collections::BTreeMap;
use std::future::Future;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::config::Configuration;
use crate::types::{Event, ReferenceId, UserDescription};

pub mod backoff;
pub mod outcome;

pub use backoff::BackoffConfig;
pub use outcome::{SubmissionErrorKind, SubmissionOutcome, classify};

/// Result of one remote call.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmissionResponse {
    /// HTTP-like status code. `None` when no response arrived at all.
    pub status_code: Option<u16>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,

    /// Server requested delay before the next attempt.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry_after: Option<Duration>,

    /// Current server settings version, when the server reports it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub settings_version: Option<u64>,
}

impl SubmissionResponse {
    /// A 202 Accepted response.
    pub fn accepted() -> Self {
        Self::status(202)
    }

    pub fn status(code: u16) -> Self {
        SubmissionResponse {
            status_code: Some(code),
            ..Default::default()
        }
    }

    /// No response: connection refused, DNS failure, timeout.
    pub fn transport_error(message: impl Into<String>) -> Self {
        SubmissionResponse {
            status_code: None,
            message: Some(message.into()),
            ..Default::default()
        }
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    pub fn with_retry_after(mut self, retry_after: Duration) -> Self {
        self.retry_after = Some(retry_after);
        self
    }

    pub fn with_settings_version(mut self, version: u64) -> Self {
        self.settings_version = Some(version);
        self
    }

    pub fn is_success(&self) -> bool {
        self.status_code.is_some_and(|code| (200..300).contains(&code))
    }
}

/// Result of a settings fetch.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SettingsResponse {
    pub success: bool,

    /// The complete settings map at `version`. `None` when nothing changed.
    #[serde(default)]
    pub settings: Option<BTreeMap<String, String>>,

    pub version: u64,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl SettingsResponse {
    pub fn updated(version: u64, settings: BTreeMap<String, String>) -> Self {
        SettingsResponse {
            success: true,
            settings: Some(settings),
            version,
            message: None,
        }
    }

    /// The server has nothing newer than the requested version.
    pub fn unchanged(version: u64) -> Self {
        SettingsResponse {
            success: true,
            settings: None,
            version,
            message: None,
        }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        SettingsResponse {
            success: false,
            settings: None,
            version: 0,
            message: Some(message.into()),
        }
    }
}

/// Transport to the remote collector.
pub trait SubmissionClient: Send + Sync + 'static {
    /// Posts a batch of events.
    fn submit(
        &self,
        events: &[Event],
        config: &Configuration,
    ) -> impl Future<Output = SubmissionResponse> + Send;

    /// Fetches settings newer than `version`.
    fn get_settings(
        &self,
        version: u64,
        config: &Configuration,
    ) -> impl Future<Output = SettingsResponse> + Send;

    /// Attaches a user's description to a previously submitted event.
    fn post_user_description(
        &self,
        reference_id: &ReferenceId,
        description: &UserDescription,
        config: &Configuration,
    ) -> impl Future<Output = SubmissionResponse> + Send;

    /// Keeps a session alive, or closes it when `is_end` is set.
    fn send_heartbeat(
        &self,
        session_id: &str,
        is_end: bool,
        config: &Configuration,
    ) -> impl Future<Output = SubmissionResponse> + Send;
}
