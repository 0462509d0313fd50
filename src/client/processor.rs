//! Draining the queue against the collector.
//!
//! One drain cycle:
//!
//! 1. Skip if another drain is running or processing is suspended.
//! 2. Release stale locks and evict items past their age or attempt limits.
//! 3. Repeatedly take a batch, submit it, and act on the outcome until the
//!    queue is empty, a failure stops the cycle, or every item present at
//!    the start has been handled.
//!
//! | Outcome | Batch | Next |
//! |---|---|---|
//! | delivered | deleted | continue, reset backoff and batch size |
//! | payload too large | released (deleted if batch size is already 1) | continue with half the batch size |
//! | permanent | released | suspend for the permanent delay |
//! | transient | released | suspend with exponential backoff or `retry_after` |

use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{debug, error, info, instrument, warn};

use crate::clock::to_chrono;
use crate::queue::QueuedEvent;
use crate::submission::{
    BackoffConfig, SubmissionClient, SubmissionErrorKind, SubmissionOutcome, SubmissionResponse,
    classify,
};
use crate::types::Event;

use super::Inner;

/// Why a drain did not run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    Disabled,
    /// Another drain holds the processor.
    Busy,
    /// A previous failure paused processing.
    Suspended { until: DateTime<Utc> },
}

/// Summary of one drain cycle.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DrainReport {
    pub delivered: usize,
    /// Items dropped because they could never be delivered.
    pub discarded: usize,
    /// The failure that ended the cycle, if any.
    pub failure: Option<SubmissionErrorKind>,
    pub skipped: Option<SkipReason>,
}

impl DrainReport {
    fn skipped(reason: SkipReason) -> Self {
        DrainReport {
            skipped: Some(reason),
            ..Default::default()
        }
    }
}

/// Mutable drain state, guarded by the processor lock.
#[derive(Debug)]
pub(crate) struct ProcessorState {
    configured_batch_size: usize,
    batch_size: usize,
    consecutive_failures: u32,
    suspended_until: Option<DateTime<Utc>>,
    backoff: BackoffConfig,
}

impl ProcessorState {
    pub(crate) fn new(batch_size: usize, backoff: BackoffConfig) -> Self {
        let batch_size = batch_size.max(1);
        ProcessorState {
            configured_batch_size: batch_size,
            batch_size,
            consecutive_failures: 0,
            suspended_until: None,
            backoff,
        }
    }

    fn suspension(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.suspended_until.filter(|until| *until > now)
    }

    fn suspend(&mut self, now: DateTime<Utc>, delay: Duration) -> DateTime<Utc> {
        let until = now.checked_add_signed(to_chrono(delay)).unwrap_or(DateTime::<Utc>::MAX_UTC);
        self.suspended_until = Some(until);
        until
    }

    fn on_delivered(&mut self) {
        self.consecutive_failures = 0;
        self.suspended_until = None;
        self.batch_size = self.configured_batch_size;
    }

    fn on_transient(&mut self, now: DateTime<Utc>, retry_after: Option<Duration>) -> DateTime<Utc> {
        self.consecutive_failures = self.consecutive_failures.saturating_add(1);
        let delay =
            retry_after.unwrap_or_else(|| self.backoff.delay_for_failures(self.consecutive_failures));
        self.suspend(now, delay)
    }

    fn on_permanent(&mut self, now: DateTime<Utc>) -> DateTime<Utc> {
        self.suspend(now, self.backoff.permanent_delay)
    }

    /// Halves the batch size. Returns `false` when it is already 1.
    fn shrink_batch(&mut self) -> bool {
        if self.batch_size <= 1 {
            return false;
        }
        self.batch_size = (self.batch_size / 2).max(1);
        true
    }

    pub(crate) fn batch_size(&self) -> usize {
        self.batch_size
    }
}

impl<S: SubmissionClient> Inner<S> {
    /// Runs one drain cycle.
    #[instrument(skip_all, fields(namespace = %self.queue.namespace()))]
    pub(super) async fn process_queue(&self) -> DrainReport {
        if !self.enabled {
            return DrainReport::skipped(SkipReason::Disabled);
        }
        let Ok(mut state) = self.processor.try_lock() else {
            debug!("Drain already running");
            return DrainReport::skipped(SkipReason::Busy);
        };
        if let Some(until) = state.suspension(self.clock.now()) {
            debug!(%until, "Processing suspended");
            return DrainReport::skipped(SkipReason::Suspended { until });
        }

        self.housekeeping();

        let mut budget = match self.queue.pending_count() {
            Ok(0) => return DrainReport::default(),
            Ok(n) => n,
            Err(e) => {
                error!(error = %e, "Failed to inspect queue");
                return DrainReport::default();
            }
        };

        let mut report = DrainReport::default();
        while budget > 0 {
            let batch_size = state.batch_size();
            let batch = match self
                .queue
                .get_batch(batch_size, self.config.overfetch_limit(batch_size))
            {
                Ok(batch) if batch.is_empty() => break,
                Ok(batch) => batch,
                Err(e) => {
                    error!(error = %e, "Failed to read batch");
                    break;
                }
            };
            budget = budget.saturating_sub(batch.len());

            let response = self.submit_batch(&batch).await;
            self.check_settings_version(&response).await;

            match classify(&response) {
                SubmissionOutcome::Delivered => {
                    let deleted = self.queue.delete_batch(&batch);
                    report.delivered += deleted;
                    state.on_delivered();
                    debug!(delivered = deleted, "Batch delivered");
                }
                SubmissionOutcome::Failed(SubmissionErrorKind::PayloadTooLarge) => {
                    if state.shrink_batch() {
                        // Released items are retried in smaller batches this cycle.
                        budget += self.queue.release_batch(&batch);
                        info!(batch_size = state.batch_size(), "Payload too large, shrinking batch");
                    } else {
                        let discarded = self.queue.delete_batch(&batch);
                        report.discarded += discarded;
                        warn!(discarded, "Discarding event too large to deliver");
                    }
                }
                SubmissionOutcome::Failed(kind @ SubmissionErrorKind::Permanent) => {
                    self.queue.release_batch(&batch);
                    let until = state.on_permanent(self.clock.now());
                    error!(
                        status = ?response.status_code,
                        message = ?response.message,
                        %until,
                        "Collector rejected batch, suspending processing"
                    );
                    report.failure = Some(kind);
                    break;
                }
                SubmissionOutcome::Failed(kind @ SubmissionErrorKind::Transient) => {
                    self.queue.release_batch(&batch);
                    let until = state.on_transient(self.clock.now(), response.retry_after);
                    warn!(
                        status = ?response.status_code,
                        message = ?response.message,
                        %until,
                        "Batch delivery failed, backing off"
                    );
                    report.failure = Some(kind);
                    break;
                }
            }
        }

        if report.delivered > 0 {
            info!(delivered = report.delivered, "Drained queue");
        }
        report
    }

    async fn submit_batch(&self, batch: &[QueuedEvent]) -> SubmissionResponse {
        let events: Vec<Event> = batch.iter().map(|queued| queued.event.clone()).collect();
        match tokio::time::timeout(
            self.config.submission_timeout,
            self.submission.submit(&events, &self.config),
        )
        .await
        {
            Ok(response) => response,
            Err(_) => SubmissionResponse::transport_error("submission timed out"),
        }
    }

    fn housekeeping(&self) {
        if let Err(e) = self.queue.release_stale_locks(self.config.max_lock_age) {
            warn!(error = %e, "Failed to release stale locks");
        }
        if let Err(e) = self
            .queue
            .cleanup(self.config.max_queue_age, self.config.max_attempts)
        {
            warn!(error = %e, "Failed to clean up queue");
        }
    }
}
