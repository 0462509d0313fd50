//! Time-windowed event deduplication.
//!
//! Repeated events inside the window are collapsed into one merged event
//! carrying an occurrence count, so an error logged on every loop iteration
//! costs one delivery per window instead of one per iteration.
//!
//! # State
//!
//! - `recent`: bounded FIFO of `(hash, accepted_at)` for events forwarded
//!   recently. Oldest entries are evicted once the capacity is reached.
//! - `merged`: in-flight merged records keyed by hash, for events currently
//!   being suppressed.
//!
//! # Decision per event
//!
//! 1. `count` already set: pass through untouched (merged upstream).
//! 2. A merged record exists: add the event's occurrences to it, suppress.
//! 3. The hash was forwarded within the window: open a merged record, suppress.
//! 4. Otherwise: forward, and remember the hash.
//!
//! [`Deduplicator::flush`] drains every merged record into a single event
//! whose `count` is the accumulated total. The client calls it on a timer
//! every window length and once more at shutdown.
//!
//! Nothing here is persisted: suppression state resets on restart.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{debug, trace};

use crate::clock::{Clock, saturating_sub};
use crate::types::Event;

pub mod hash;

pub use hash::ContentHash;

/// Outcome of [`Deduplicator::check`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DedupDecision {
    /// Forward the event.
    Accepted,
    /// The event already carries a count and is forwarded unchanged.
    Passthrough,
    /// The event was folded into a merged record and must be dropped.
    Merged,
}

impl DedupDecision {
    pub fn is_suppressed(self) -> bool {
        matches!(self, DedupDecision::Merged)
    }
}

/// An in-flight aggregation of suppressed duplicates.
#[derive(Debug, Clone)]
pub struct MergedEvent {
    pub hash: ContentHash,
    pub count: u32,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
    /// Snapshot of the first suppressed occurrence.
    pub event: Event,
}

impl MergedEvent {
    /// The event to deliver in place of all suppressed occurrences.
    pub fn into_event(self) -> Event {
        let mut event = self.event;
        event.count = Some(self.count);
        event.date = self.last_seen;
        event
    }
}

#[derive(Debug, Default)]
struct DedupState {
    recent: VecDeque<(ContentHash, DateTime<Utc>)>,
    merged: HashMap<ContentHash, MergedEvent>,
}

/// The deduplication engine.
pub struct Deduplicator {
    clock: Arc<dyn Clock>,
    window: Duration,
    capacity: usize,
    state: Mutex<DedupState>,
}

impl std::fmt::Debug for Deduplicator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Deduplicator")
            .field("window", &self.window)
            .field("capacity", &self.capacity)
            .finish_non_exhaustive()
    }
}

impl Deduplicator {
    pub fn new(clock: Arc<dyn Clock>, window: Duration, capacity: usize) -> Self {
        Deduplicator {
            clock,
            window,
            capacity: capacity.max(1),
            state: Mutex::new(DedupState::default()),
        }
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    /// Decides whether `event` is forwarded or merged.
    pub fn check(&self, event: &Event) -> DedupDecision {
        if event.count.is_some() {
            return DedupDecision::Passthrough;
        }

        let hash = ContentHash::of(event);
        let now = self.clock.now();
        let window_start = saturating_sub(now, self.window);

        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);

        if let Some(record) = state.merged.get_mut(&hash) {
            record.count = record.count.saturating_add(event.occurrences());
            record.last_seen = record.last_seen.max(event.date);
            trace!(hash = %hash, count = record.count, "Merged duplicate event");
            return DedupDecision::Merged;
        }

        let seen_recently = state
            .recent
            .iter()
            .any(|(h, at)| *h == hash && *at >= window_start);
        if seen_recently {
            state.merged.insert(
                hash,
                MergedEvent {
                    hash,
                    count: event.occurrences(),
                    first_seen: event.date,
                    last_seen: event.date,
                    event: event.clone(),
                },
            );
            debug!(hash = %hash, "Suppressing duplicate event");
            return DedupDecision::Merged;
        }

        state.recent.push_back((hash, now));
        while state.recent.len() > self.capacity {
            state.recent.pop_front();
        }
        DedupDecision::Accepted
    }

    /// Removes and returns all merged records as deliverable events.
    pub fn flush(&self) -> Vec<Event> {
        let mut merged: Vec<MergedEvent> = {
            let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
            state.merged.drain().map(|(_, record)| record).collect()
        };

        if !merged.is_empty() {
            debug!(records = merged.len(), "Flushing merged events");
        }

        merged.sort_by_key(|record| record.first_seen);
        merged.into_iter().map(MergedEvent::into_event).collect()
    }

    /// Number of merged records awaiting flush.
    pub fn pending(&self) -> usize {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .merged
            .len()
    }

    /// Forgets recent hashes and merged records without flushing them.
    pub fn clear(&self) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        state.recent.clear();
        state.merged.clear();
    }
}
