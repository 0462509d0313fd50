//! Object storage backing the durable queue and the settings snapshot.
//!
//! The queue needs only a handful of primitives: save, read, an atomic
//! rename that refuses to overwrite, delete, and a listing with creation
//! times. Anything offering those (a directory, a map, an object store with
//! copy+delete) can carry the queue, because all item state is encoded in the
//! object path.
//!
//! # Paths
//!
//! Paths are `/`-separated and relative to the storage root, e.g.
//! `LhhP1C9g/q/0f3c...e1.0.json`. Empty segments, `.`/`..`, backslashes and
//! NUL bytes are rejected.
//!
//! # Patterns
//!
//! [`ObjectStorage::list`] takes a pattern whose last segment may contain `*`
//! wildcards (`LhhP1C9g/q/*.json.lock`). Wildcards never cross a `/`.

use std::io;

use chrono::{DateTime, Utc};
use thiserror::Error;

pub mod fs;
pub mod fsync;
pub mod memory;
pub mod retry;

pub use fs::FileStorage;
pub use memory::InMemoryStorage;

/// Errors that can occur during storage operations.
#[derive(Debug, Error)]
pub enum StorageError {
    /// IO error during file operations.
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// The path is empty, absolute, or contains unsafe segments.
    #[error("invalid storage path: {0}")]
    InvalidPath(String),

    /// The list pattern has wildcards outside its last segment.
    #[error("invalid list pattern: {0}")]
    InvalidPattern(String),

    /// The backend refuses to hold more objects.
    #[error("storage is full ({limit} objects)")]
    Full { limit: usize },

    /// The object does not exist.
    #[error("object not found: {0}")]
    NotFound(String),
}

/// Result type for storage operations.
pub type Result<T> = std::result::Result<T, StorageError>;

/// Listing entry for a stored object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ItemInfo {
    pub path: String,
    /// When the object was first saved.
    pub created: DateTime<Utc>,
    /// When the object last changed state (written or renamed).
    pub modified: DateTime<Utc>,
}

/// Minimal storage interface consumed by the queue and settings store.
///
/// Implementations must make [`rename`](ObjectStorage::rename) atomic and
/// non-overwriting: of several concurrent renames of the same source, at most
/// one may return `Ok(true)`.
pub trait ObjectStorage: Send + Sync {
    /// Writes `bytes` to `path`, replacing any existing object atomically.
    fn save(&self, path: &str, bytes: &[u8]) -> Result<()>;

    /// Reads the full contents of `path`.
    fn read(&self, path: &str) -> Result<Vec<u8>>;

    /// Moves `old` to `new`.
    ///
    /// Returns `Ok(false)` when `old` no longer exists or `new` already
    /// exists, i.e. when another caller won the race.
    fn rename(&self, old: &str, new: &str) -> Result<bool>;

    /// Deletes `path`. Returns `Ok(false)` when it did not exist.
    fn delete(&self, path: &str) -> Result<bool>;

    /// Lists objects matching `pattern`, oldest first (ties broken by path).
    ///
    /// Objects created after `max_created` are skipped; at most `limit`
    /// entries are returned.
    fn list(
        &self,
        pattern: &str,
        limit: Option<usize>,
        max_created: Option<DateTime<Utc>>,
    ) -> Result<Vec<ItemInfo>>;

    fn exists(&self, path: &str) -> bool;
}

/// Validates a storage path.
pub(crate) fn validate_path(path: &str) -> Result<()> {
    if path.is_empty() || path.starts_with('/') || path.contains('\\') || path.contains('\0') {
        return Err(StorageError::InvalidPath(path.to_string()));
    }
    if path
        .split('/')
        .any(|segment| segment.is_empty() || segment == "." || segment == "..")
    {
        return Err(StorageError::InvalidPath(path.to_string()));
    }
    Ok(())
}

/// Splits a pattern into its literal directory prefix and file name pattern.
pub(crate) fn split_pattern(pattern: &str) -> Result<(&str, &str)> {
    let (dir, name) = match pattern.rsplit_once('/') {
        Some((dir, name)) => (dir, name),
        None => ("", pattern),
    };
    if dir.contains('*') || name.is_empty() {
        return Err(StorageError::InvalidPattern(pattern.to_string()));
    }
    if !dir.is_empty() {
        validate_path(dir).map_err(|_| StorageError::InvalidPattern(pattern.to_string()))?;
    }
    Ok((dir, name))
}

/// Matches a single path segment against a `*` wildcard pattern.
pub(crate) fn wildcard_match(pattern: &str, name: &str) -> bool {
    let parts: Vec<&str> = pattern.split('*').collect();
    if parts.len() == 1 {
        return pattern == name;
    }

    let first = parts[0];
    let last = parts[parts.len() - 1];
    if !name.starts_with(first) || name.len() < first.len() + last.len() || !name.ends_with(last) {
        return false;
    }

    let mut rest = &name[first.len()..name.len() - last.len()];
    for middle in &parts[1..parts.len() - 1] {
        match rest.find(middle) {
            Some(pos) => rest = &rest[pos + middle.len()..],
            None => return false,
        }
    }
    true
}

/// Sorts listing entries oldest first and applies the filters shared by all
/// backends.
pub(crate) fn finish_listing(
    mut items: Vec<ItemInfo>,
    limit: Option<usize>,
    max_created: Option<DateTime<Utc>>,
) -> Vec<ItemInfo> {
    if let Some(max_created) = max_created {
        items.retain(|item| item.created <= max_created);
    }
    items.sort_by(|a, b| a.created.cmp(&b.created).then_with(|| a.path.cmp(&b.path)));
    if let Some(limit) = limit {
        items.truncate(limit);
    }
    items
}
