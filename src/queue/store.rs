//! Single-item queue operations and housekeeping.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use crate::clock::{Clock, saturating_sub};
use crate::storage::{ItemInfo, ObjectStorage};
use crate::types::{Event, ItemId, Namespace};

use super::Result;
use super::item::{QueueItem, all_pattern, locked_pattern, pending_pattern};

/// The durable event queue for one namespace.
pub struct EventQueue {
    pub(super) storage: Arc<dyn ObjectStorage>,
    pub(super) namespace: Namespace,
    pub(super) clock: Arc<dyn Clock>,
    /// Serialises list, lock and read while a batch is assembled.
    pub(super) batch_lock: Mutex<()>,
}

impl std::fmt::Debug for EventQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventQueue")
            .field("namespace", &self.namespace)
            .finish_non_exhaustive()
    }
}

impl EventQueue {
    pub fn new(storage: Arc<dyn ObjectStorage>, namespace: Namespace, clock: Arc<dyn Clock>) -> Self {
        EventQueue {
            storage,
            namespace,
            clock,
            batch_lock: Mutex::new(()),
        }
    }

    pub fn namespace(&self) -> &Namespace {
        &self.namespace
    }

    /// Writes `event` as a new pending item with zero attempts.
    pub fn enqueue(&self, event: &Event) -> Result<QueueItem> {
        let item = QueueItem::new(ItemId::generate());
        let bytes = serde_json::to_vec(event)?;
        self.storage.save(&item.path(&self.namespace), &bytes)?;
        debug!(item = %item, "Queued event");
        Ok(item)
    }

    /// Locks a pending item.
    ///
    /// Returns the locked item, or `None` when the item is already locked or
    /// another consumer won the rename.
    pub fn lock(&self, item: &QueueItem) -> Result<Option<QueueItem>> {
        if item.locked {
            return Ok(None);
        }
        let locked = item.to_locked();
        self.transition(item, locked)
    }

    /// Records one more delivery attempt, keeping the lock state.
    ///
    /// Returns `None` when the item moved underneath us.
    pub fn increment_attempts(&self, item: &QueueItem) -> Result<Option<QueueItem>> {
        let next = item.to_next_attempt();
        self.transition(item, next)
    }

    /// Makes a locked item visible to consumers again.
    pub fn release(&self, item: &QueueItem) -> Result<Option<QueueItem>> {
        if !item.locked {
            return Ok(None);
        }
        let unlocked = item.to_unlocked();
        self.transition(item, unlocked)
    }

    /// Removes an item. Returns `false` if it was already gone.
    pub fn delete(&self, item: &QueueItem) -> Result<bool> {
        Ok(self.storage.delete(&item.path(&self.namespace))?)
    }

    /// Reads and deserializes an item's event.
    pub fn read(&self, item: &QueueItem) -> Result<Event> {
        let bytes = self.storage.read(&item.path(&self.namespace))?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    fn transition(&self, from: &QueueItem, to: QueueItem) -> Result<Option<QueueItem>> {
        let renamed = self
            .storage
            .rename(&from.path(&self.namespace), &to.path(&self.namespace))?;
        Ok(renamed.then_some(to))
    }

    /// Lists pending items, oldest first.
    ///
    /// Items created after `max_created` are skipped, which keeps a drain
    /// from chasing events queued while it runs.
    pub fn list_batch(
        &self,
        limit: usize,
        max_created: Option<DateTime<Utc>>,
    ) -> Result<Vec<QueueItem>> {
        let listed =
            self.storage
                .list(&pending_pattern(&self.namespace), Some(limit), max_created)?;
        Ok(parse_listing(listed).map(|(item, _)| item).collect())
    }

    /// Deletes items older than `max_age` or with at least `max_attempts`
    /// attempts, locked or not.
    ///
    /// Unrecognised objects in the queue directory (e.g. temp files left by a
    /// crash) are removed once they exceed `max_age`. Returns the number of
    /// objects deleted.
    pub fn cleanup(&self, max_age: Duration, max_attempts: u32) -> Result<usize> {
        let cutoff = saturating_sub(self.clock.now(), max_age);
        let mut removed = 0;

        for info in self.storage.list(&all_pattern(&self.namespace), None, None)? {
            let expired = info.created < cutoff;
            let exhausted = match QueueItem::parse(&info.path) {
                Ok(item) => item.attempts >= max_attempts,
                Err(_) => false,
            };
            if !expired && !exhausted {
                continue;
            }

            match self.storage.delete(&info.path) {
                Ok(true) => {
                    removed += 1;
                    debug!(item = %info.path, expired, exhausted, "Removed queue item");
                }
                Ok(false) => {}
                Err(e) => warn!(item = %info.path, error = %e, "Failed to remove queue item"),
            }
        }

        if removed > 0 {
            info!(removed, "Cleaned up queue");
        }
        Ok(removed)
    }

    /// Releases locks held longer than `max_lock_age`.
    ///
    /// A consumer that crashed mid-delivery never releases its items; this
    /// puts them back in circulation. Returns the number of items released.
    pub fn release_stale_locks(&self, max_lock_age: Duration) -> Result<usize> {
        let cutoff = saturating_sub(self.clock.now(), max_lock_age);
        let mut released = 0;

        for (item, info) in parse_listing(
            self.storage
                .list(&locked_pattern(&self.namespace), None, None)?,
        ) {
            if info.modified >= cutoff {
                continue;
            }
            match self.release(&item) {
                Ok(Some(_)) => {
                    released += 1;
                    info!(item = %item, locked_since = %info.modified, "Released stale lock");
                }
                Ok(None) => {}
                Err(e) => warn!(item = %item, error = %e, "Failed to release stale lock"),
            }
        }
        Ok(released)
    }

    /// Number of pending (unlocked) items.
    pub fn pending_count(&self) -> Result<usize> {
        Ok(self
            .storage
            .list(&pending_pattern(&self.namespace), None, None)?
            .len())
    }

    /// Number of locked items.
    pub fn locked_count(&self) -> Result<usize> {
        Ok(self
            .storage
            .list(&locked_pattern(&self.namespace), None, None)?
            .len())
    }
}

/// Pairs listing entries with their parsed item, skipping foreign objects.
fn parse_listing(listed: Vec<ItemInfo>) -> impl Iterator<Item = (QueueItem, ItemInfo)> {
    listed
        .into_iter()
        .filter_map(|info| match QueueItem::parse(&info.path) {
            Ok(item) => Some((item, info)),
            Err(e) => {
                debug!(error = %e, "Skipping unrecognised queue object");
                None
            }
        })
}
