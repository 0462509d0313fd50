//! Batch retrieval for delivery.
//!
//! A batch is assembled by listing more candidates than needed, then locking,
//! counting an attempt on, and reading each one until the batch is full.
//! Candidates lost to another consumer or with an unreadable payload are
//! skipped; the rest of the batch is unaffected.

use std::sync::PoisonError;

use tracing::{debug, warn};

use crate::types::Event;

use super::Result;
use super::item::QueueItem;
use super::store::EventQueue;

/// A locked queue item together with its event.
#[derive(Debug, Clone, PartialEq)]
pub struct QueuedEvent {
    pub item: QueueItem,
    pub event: Event,
}

impl EventQueue {
    /// Locks and reads up to `batch_size` pending events.
    ///
    /// At most `overfetch` candidates are listed. Every returned item is
    /// locked and has had its attempt counter incremented; the caller must
    /// either [`delete_batch`](Self::delete_batch) or
    /// [`release_batch`](Self::release_batch) it.
    ///
    /// The list, lock and read sequence is serialised within this process so
    /// two concurrent drains assemble disjoint batches without interleaving.
    pub fn get_batch(&self, batch_size: usize, overfetch: usize) -> Result<Vec<QueuedEvent>> {
        if batch_size == 0 {
            return Ok(Vec::new());
        }
        let _guard = self.batch_lock.lock().unwrap_or_else(PoisonError::into_inner);

        let candidates = self.list_batch(overfetch.max(batch_size), None)?;
        let mut batch = Vec::with_capacity(batch_size.min(candidates.len()));

        for candidate in candidates {
            if batch.len() >= batch_size {
                break;
            }

            let locked = match self.lock(&candidate) {
                Ok(Some(locked)) => locked,
                Ok(None) => {
                    debug!(item = %candidate, "Lost lock race, skipping");
                    continue;
                }
                Err(e) => {
                    warn!(item = %candidate, error = %e, "Failed to lock queue item");
                    continue;
                }
            };

            // Attempt bookkeeping is best effort; delivery goes ahead with the
            // item as it is if the rename fails.
            let item = match self.increment_attempts(&locked) {
                Ok(Some(next)) => next,
                Ok(None) => locked,
                Err(e) => {
                    warn!(item = %locked, error = %e, "Failed to record delivery attempt");
                    locked
                }
            };

            match self.read(&item) {
                Ok(event) => batch.push(QueuedEvent { item, event }),
                Err(e) => {
                    warn!(item = %item, error = %e, "Skipping unreadable queue item");
                    if let Err(e) = self.release(&item) {
                        warn!(item = %item, error = %e, "Failed to release unreadable item");
                    }
                }
            }
        }

        debug!(size = batch.len(), "Assembled batch");
        Ok(batch)
    }

    /// Deletes delivered items. Returns the number actually removed.
    pub fn delete_batch(&self, batch: &[QueuedEvent]) -> usize {
        batch
            .iter()
            .filter(|queued| match self.delete(&queued.item) {
                Ok(deleted) => deleted,
                Err(e) => {
                    warn!(item = %queued.item, error = %e, "Failed to delete delivered item");
                    false
                }
            })
            .count()
    }

    /// Releases items for a later attempt. Returns the number released.
    pub fn release_batch(&self, batch: &[QueuedEvent]) -> usize {
        batch
            .iter()
            .filter(|queued| match self.release(&queued.item) {
                Ok(released) => released.is_some(),
                Err(e) => {
                    warn!(item = %queued.item, error = %e, "Failed to release queue item");
                    false
                }
            })
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::storage::{FileStorage, InMemoryStorage, ObjectStorage};
    use crate::types::{EventBuilder, ItemId, Namespace};
    use chrono::Duration;
    use std::collections::HashSet;
    use std::sync::Arc;
    use tempfile::tempdir;

    fn memory_queue() -> (Arc<ManualClock>, Arc<InMemoryStorage>, EventQueue) {
        let clock = Arc::new(ManualClock::starting_now());
        let storage = Arc::new(InMemoryStorage::new(clock.clone()));
        let queue = EventQueue::new(storage.clone(), Namespace::new("ns"), clock.clone());
        (clock, storage, queue)
    }

    fn enqueue_n(queue: &EventQueue, clock: &ManualClock, n: usize) {
        for i in 0..n {
            queue
                .enqueue(&EventBuilder::log("test", format!("event {i}")).build())
                .unwrap();
            clock.advance(Duration::milliseconds(1));
        }
    }

    #[test]
    fn empty_queue_yields_empty_batch() {
        let (_clock, _storage, queue) = memory_queue();
        assert!(queue.get_batch(50, 250).unwrap().is_empty());
    }

    #[test]
    fn batch_roundtrip() {
        let (clock, _storage, queue) = memory_queue();
        enqueue_n(&queue, &clock, 5);

        let batch = queue.get_batch(3, 15).unwrap();
        assert_eq!(batch.len(), 3);
        assert!(batch.iter().all(|q| q.item.locked && q.item.attempts == 1));
        assert_eq!(queue.pending_count().unwrap(), 2);

        // Oldest first.
        let messages: Vec<_> = batch
            .iter()
            .map(|q| q.event.message.clone().unwrap())
            .collect();
        assert_eq!(messages, ["event 0", "event 1", "event 2"]);

        assert_eq!(queue.delete_batch(&batch), 3);
        assert_eq!(queue.locked_count().unwrap(), 0);

        let rest = queue.get_batch(3, 15).unwrap();
        assert_eq!(rest.len(), 2);
        assert_eq!(rest[0].event.message.as_deref(), Some("event 3"));
    }

    #[test]
    fn released_batch_keeps_attempts() {
        let (clock, _storage, queue) = memory_queue();
        enqueue_n(&queue, &clock, 2);

        let batch = queue.get_batch(10, 50).unwrap();
        assert_eq!(queue.release_batch(&batch), 2);

        let batch = queue.get_batch(10, 50).unwrap();
        assert!(batch.iter().all(|q| q.item.attempts == 2));
    }

    #[test]
    fn corrupt_items_are_skipped_and_left_in_place() {
        let (clock, storage, queue) = memory_queue();
        let corrupt = QueueItem::new(ItemId::new("corrupt"));
        storage
            .save(&corrupt.path(queue.namespace()), b"{ not json")
            .unwrap();
        clock.advance(Duration::milliseconds(1));
        enqueue_n(&queue, &clock, 2);

        let batch = queue.get_batch(10, 50).unwrap();
        assert_eq!(batch.len(), 2);
        assert!(batch.iter().all(|q| q.item.id != corrupt.id));

        // Still queued, one attempt recorded.
        assert!(storage.exists(&corrupt.to_next_attempt().path(queue.namespace())));
    }

    #[test]
    fn corrupt_items_are_eventually_cleaned_up() {
        let (_clock, storage, queue) = memory_queue();
        let corrupt = QueueItem::new(ItemId::new("corrupt"));
        storage
            .save(&corrupt.path(queue.namespace()), b"garbage")
            .unwrap();

        for _ in 0..3 {
            assert!(queue.get_batch(10, 50).unwrap().is_empty());
        }
        assert_eq!(queue.cleanup(std::time::Duration::from_secs(3600), 3).unwrap(), 1);
        assert!(storage.is_empty());
    }

    #[test]
    fn overfetch_bounds_candidates() {
        let (clock, _storage, queue) = memory_queue();
        enqueue_n(&queue, &clock, 10);

        // Overfetch below the batch size is raised to it.
        assert_eq!(queue.get_batch(4, 1).unwrap().len(), 4);
    }

    #[test]
    fn concurrent_drains_never_share_items() {
        let dir = tempdir().unwrap();
        let clock = Arc::new(ManualClock::starting_now());
        let storage = Arc::new(FileStorage::new(dir.path()).unwrap());
        let queue = EventQueue::new(storage, Namespace::new("ns"), clock.clone());
        enqueue_n(&queue, &clock, 40);

        let batches: Vec<Vec<QueuedEvent>> = std::thread::scope(|s| {
            let handles: Vec<_> = (0..4)
                .map(|_| s.spawn(|| queue.get_batch(10, 50).unwrap()))
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });

        let mut seen = HashSet::new();
        for queued in batches.iter().flatten() {
            assert!(seen.insert(queued.item.id.clone()), "item delivered twice");
        }
        assert_eq!(seen.len(), 40);
    }
}
