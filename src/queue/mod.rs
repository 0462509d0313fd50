//! Durable local queue for events awaiting delivery.
//!
//! Events are written as individual objects through an
//! [`ObjectStorage`](crate::storage::ObjectStorage) backend. Item state
//! (attempt count, lock) is encoded in the object name and changed only by
//! atomic renames:
//!
//! ```text
//! enqueue          -> <id>.0.json
//! lock             -> <id>.0.json.lock
//! increment        -> <id>.1.json.lock
//! release          -> <id>.1.json
//! delete           -> (gone)
//! ```
//!
//! # Crash Safety
//!
//! - A process that dies between lock and delete leaves a `.lock` item
//!   behind; [`EventQueue::release_stale_locks`] makes it visible again once
//!   the lock is older than the configured maximum.
//! - Items that keep failing are removed by [`EventQueue::cleanup`] once they
//!   exceed the maximum age or attempt count, so the queue cannot grow
//!   without bound while the collector is unreachable.
//! - Corrupt payloads are skipped, not deleted. They accumulate attempts
//!   like any other item and are eventually cleaned up.

use thiserror::Error;

use crate::storage::StorageError;

pub mod batch;
pub mod item;
pub mod store;

pub use batch::QueuedEvent;
pub use item::QueueItem;
pub use store::EventQueue;

/// Errors that can occur during queue operations.
#[derive(Debug, Error)]
pub enum QueueError {
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// The object name does not follow the `<id>.<attempts>.json[.lock]` layout.
    #[error("invalid queue item path: {0}")]
    InvalidItemPath(String),
}

/// Result type for queue operations.
pub type Result<T> = std::result::Result<T, QueueError>;
