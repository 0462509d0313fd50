//! Background loops and shutdown.
//!
//! [`TelemetryClient::start`] spawns three loops on the ambient runtime:
//!
//! - **queue**: drains immediately, then again `queue_min_interval` after
//!   each newly queued event. While nothing is queued the interval doubles
//!   up to `queue_poll_interval`.
//! - **dedup flush**: moves merged duplicates into the queue every
//!   `dedup_window`.
//! - **settings**: syncs immediately, then whenever `settings_idle_interval`
//!   passes without a newly queued event.
//!
//! All loops stop as soon as the client's shutdown token is cancelled,
//! abandoning an in-flight drain or sync.

use std::sync::{Arc, PoisonError};
use std::time::Duration;

use tokio::runtime::Handle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, instrument, warn};

use crate::submission::SubmissionClient;

use super::{DrainReport, Inner, TelemetryClient};

impl<S: SubmissionClient> TelemetryClient<S> {
    /// Starts the background loops.
    ///
    /// Does nothing when the client is disabled, when called outside a tokio
    /// runtime, or when the loops are already running.
    pub fn start(&self) {
        if !self.inner.enabled || self.inner.shutdown.is_cancelled() {
            return;
        }
        let Ok(handle) = Handle::try_current() else {
            warn!("No tokio runtime, background processing not started");
            return;
        };
        let mut tasks = self
            .inner
            .tasks
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if !tasks.is_empty() {
            return;
        }

        tasks.push(handle.spawn(queue_loop(self.inner.clone())));
        tasks.push(handle.spawn(dedup_flush_loop(self.inner.clone())));
        tasks.push(handle.spawn(settings_loop(self.inner.clone())));
        debug!("Background loops started");
    }

    /// Stops the client.
    ///
    /// Cancels the background loops and heartbeats, queues outstanding merged
    /// duplicates, disposes plugins, and makes one last delivery attempt.
    /// Waiting for the loops and the final delivery share one
    /// `shutdown_timeout` budget; loops still running when it expires are
    /// aborted. Events that could not be delivered stay in the queue for the
    /// next run, and items left locked are recovered once their lock goes
    /// stale.
    #[instrument(skip_all)]
    pub async fn shutdown(&self) -> DrainReport {
        let inner = &self.inner;
        inner.shutdown.cancel();
        let deadline = Instant::now() + inner.config.shutdown_timeout;

        let tasks = std::mem::take(&mut *inner.tasks.lock().unwrap_or_else(PoisonError::into_inner));
        for mut task in tasks {
            match tokio::time::timeout_at(deadline, &mut task).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) if e.is_panic() => warn!(error = %e, "Background loop panicked"),
                Ok(Err(_)) => {}
                Err(_) => {
                    task.abort();
                    warn!("Background loop did not stop in time, aborted");
                }
            }
        }

        inner.flush_merged();
        self.stop_all_sessions();
        inner.plugins.dispose_all();

        if !inner.enabled {
            return DrainReport::default();
        }
        match tokio::time::timeout_at(deadline, inner.process_queue()).await {
            Ok(report) => {
                info!(delivered = report.delivered, "Telemetry client stopped");
                report
            }
            Err(_) => {
                warn!("Final delivery timed out, events remain queued");
                DrainReport::default()
            }
        }
    }
}

/// Next queue interval after a drain: back to the minimum when something was
/// delivered, otherwise doubled up to the poll interval.
fn next_queue_interval(current: Duration, report: &DrainReport, min: Duration, max: Duration) -> Duration {
    if report.delivered > 0 {
        min
    } else {
        current.saturating_mul(2).clamp(min, max.max(min))
    }
}

#[instrument(skip_all)]
async fn queue_loop<S: SubmissionClient>(inner: Arc<Inner<S>>) {
    let min = inner.config.queue_min_interval;
    let max = inner.config.queue_poll_interval;
    let mut activity = inner.activity.subscribe();
    let mut interval = min;
    let mut deadline = Instant::now();

    loop {
        tokio::select! {
            _ = inner.shutdown.cancelled() => break,

            changed = activity.changed() => {
                if changed.is_err() {
                    break;
                }
                interval = min;
                deadline = deadline.min(Instant::now() + min);
            }

            _ = tokio::time::sleep_until(deadline) => {
                let report = tokio::select! {
                    _ = inner.shutdown.cancelled() => break,
                    report = inner.process_queue() => report,
                };
                interval = next_queue_interval(interval, &report, min, max);
                deadline = Instant::now() + interval;
            }
        }
    }
    debug!("Queue loop stopped");
}

#[instrument(skip_all)]
async fn dedup_flush_loop<S: SubmissionClient>(inner: Arc<Inner<S>>) {
    let window = inner.dedup.window().max(Duration::from_millis(1));
    let mut ticker = tokio::time::interval_at(Instant::now() + window, window);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = inner.shutdown.cancelled() => break,
            _ = ticker.tick() => {
                inner.flush_merged();
            }
        }
    }
    debug!("Dedup flush loop stopped");
}

#[instrument(skip_all)]
async fn settings_loop<S: SubmissionClient>(inner: Arc<Inner<S>>) {
    let idle = inner.config.settings_idle_interval;
    let mut activity = inner.activity.subscribe();
    let mut deadline = Instant::now();

    loop {
        tokio::select! {
            _ = inner.shutdown.cancelled() => break,

            changed = activity.changed() => {
                if changed.is_err() {
                    break;
                }
                deadline = Instant::now() + idle;
            }

            _ = tokio::time::sleep_until(deadline) => {
                tokio::select! {
                    _ = inner.shutdown.cancelled() => break,
                    _ = inner.sync_settings() => {}
                }
                deadline = Instant::now() + idle;
            }
        }
    }
    debug!("Settings loop stopped");
}
