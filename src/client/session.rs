//! Sessions and heartbeats.
//!
//! A session is bracketed by `session-start` and `session-end` events. While
//! it is open a heartbeat task tells the collector the session is still
//! alive every `heartbeat_interval`.

use std::sync::{Arc, PoisonError};
use std::time::Duration;

use tokio::runtime::Handle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::submission::SubmissionClient;
use crate::types::EventBuilder;

use super::{Inner, SubmitOutcome, TelemetryClient};

impl<S: SubmissionClient> TelemetryClient<S> {
    /// Opens a session: queues a `session-start` event and starts heartbeats.
    ///
    /// Starting a session that is already open restarts its heartbeat.
    pub fn start_session(&self, session_id: &str) -> SubmitOutcome {
        let outcome = self.submit(EventBuilder::session_start(session_id).build());
        if !self.inner.enabled {
            return outcome;
        }

        let token = self.inner.shutdown.child_token();
        let previous = self
            .inner
            .sessions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(session_id.to_string(), token.clone());
        if let Some(previous) = previous {
            previous.cancel();
        }

        match Handle::try_current() {
            Ok(handle) => {
                handle.spawn(heartbeat_loop(
                    self.inner.clone(),
                    session_id.to_string(),
                    token,
                ));
            }
            Err(_) => warn!(session_id, "No tokio runtime, heartbeats disabled"),
        }
        outcome
    }

    /// Closes a session: stops heartbeats, sends the closing heartbeat and
    /// queues a `session-end` event.
    pub async fn end_session(&self, session_id: &str) -> SubmitOutcome {
        let token = self
            .inner
            .sessions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(session_id);
        if let Some(token) = token {
            token.cancel();
        }

        if self.inner.enabled {
            self.inner.heartbeat(session_id, true).await;
        }
        self.submit(EventBuilder::session_end(session_id).build())
    }

    /// Ids of the sessions with a running heartbeat.
    pub fn open_sessions(&self) -> Vec<String> {
        let mut ids: Vec<String> = self
            .inner
            .sessions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect();
        ids.sort();
        ids
    }

    /// Stops every heartbeat without closing the sessions.
    pub(super) fn stop_all_sessions(&self) {
        let sessions = std::mem::take(
            &mut *self
                .inner
                .sessions
                .lock()
                .unwrap_or_else(PoisonError::into_inner),
        );
        for token in sessions.into_values() {
            token.cancel();
        }
    }
}

impl<S: SubmissionClient> Inner<S> {
    async fn heartbeat(&self, session_id: &str, is_end: bool) {
        let sent = tokio::time::timeout(
            self.config.submission_timeout,
            self.submission.send_heartbeat(session_id, is_end, &self.config),
        )
        .await;
        match sent {
            Ok(response) if response.is_success() => {}
            Ok(response) => {
                warn!(session_id, is_end, status = ?response.status_code, "Heartbeat rejected");
            }
            Err(_) => warn!(session_id, is_end, "Heartbeat timed out"),
        }
    }
}

async fn heartbeat_loop<S: SubmissionClient>(
    inner: Arc<Inner<S>>,
    session_id: String,
    token: CancellationToken,
) {
    let period = inner.config.heartbeat_interval.max(Duration::from_millis(1));
    let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = token.cancelled() => break,
            _ = ticker.tick() => inner.heartbeat(&session_id, false).await,
        }
    }
    debug!(session_id = %session_id, "Heartbeat stopped");
}
