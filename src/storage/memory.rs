//! In-process object storage.
//!
//! Useful for tests and for hosts with no writable disk. Timestamps come from
//! the injected clock, so queue age and lock age can be driven by a
//! [`ManualClock`](crate::clock::ManualClock).

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, PoisonError};

use chrono::{DateTime, Utc};

use super::{
    ItemInfo, ObjectStorage, Result, StorageError, finish_listing, split_pattern, validate_path,
    wildcard_match,
};
use crate::clock::{Clock, SystemClock};

#[derive(Debug, Clone)]
struct StoredObject {
    bytes: Vec<u8>,
    created: DateTime<Utc>,
    modified: DateTime<Utc>,
}

/// Object storage held in a map.
pub struct InMemoryStorage {
    clock: Arc<dyn Clock>,
    max_objects: Option<usize>,
    objects: Mutex<BTreeMap<String, StoredObject>>,
}

impl InMemoryStorage {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        InMemoryStorage {
            clock,
            max_objects: None,
            objects: Mutex::new(BTreeMap::new()),
        }
    }

    /// Caps the number of stored objects; saves beyond the cap fail with
    /// [`StorageError::Full`].
    pub fn with_max_objects(mut self, max_objects: usize) -> Self {
        self.max_objects = Some(max_objects);
        self
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BTreeMap<String, StoredObject>> {
        self.objects.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for InMemoryStorage {
    fn default() -> Self {
        Self::new(Arc::new(SystemClock))
    }
}

impl std::fmt::Debug for InMemoryStorage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryStorage")
            .field("objects", &self.len())
            .field("max_objects", &self.max_objects)
            .finish()
    }
}

impl ObjectStorage for InMemoryStorage {
    fn save(&self, path: &str, bytes: &[u8]) -> Result<()> {
        validate_path(path)?;
        let now = self.clock.now();
        let mut objects = self.lock();

        if let Some(limit) = self.max_objects
            && objects.len() >= limit
            && !objects.contains_key(path)
        {
            return Err(StorageError::Full { limit });
        }

        objects.insert(
            path.to_string(),
            StoredObject {
                bytes: bytes.to_vec(),
                created: now,
                modified: now,
            },
        );
        Ok(())
    }

    fn read(&self, path: &str) -> Result<Vec<u8>> {
        validate_path(path)?;
        self.lock()
            .get(path)
            .map(|o| o.bytes.clone())
            .ok_or_else(|| StorageError::NotFound(path.to_string()))
    }

    fn rename(&self, old: &str, new: &str) -> Result<bool> {
        validate_path(old)?;
        validate_path(new)?;
        let now = self.clock.now();
        let mut objects = self.lock();

        if objects.contains_key(new) {
            return Ok(false);
        }
        let Some(mut object) = objects.remove(old) else {
            return Ok(false);
        };
        object.modified = now;
        objects.insert(new.to_string(), object);
        Ok(true)
    }

    fn delete(&self, path: &str) -> Result<bool> {
        validate_path(path)?;
        Ok(self.lock().remove(path).is_some())
    }

    fn list(
        &self,
        pattern: &str,
        limit: Option<usize>,
        max_created: Option<DateTime<Utc>>,
    ) -> Result<Vec<ItemInfo>> {
        let (dir, name_pattern) = split_pattern(pattern)?;
        let objects = self.lock();

        let items = objects
            .iter()
            .filter_map(|(path, object)| {
                let (item_dir, name) = path.rsplit_once('/').unwrap_or(("", path.as_str()));
                (item_dir == dir && wildcard_match(name_pattern, name)).then(|| ItemInfo {
                    path: path.clone(),
                    created: object.created,
                    modified: object.modified,
                })
            })
            .collect();

        Ok(finish_listing(items, limit, max_created))
    }

    fn exists(&self, path: &str) -> bool {
        self.lock().contains_key(path)
    }
}
