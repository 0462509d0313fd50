//! Persistence of server settings inside the queue namespace.
//!
//! ```text
//! <ns>/server-settings.json      - SettingsSnapshot (version + values)
//! <ns>/server-settings.version   - the version as a decimal line
//! ```
//!
//! # Crash Safety
//!
//! Both objects are written atomically by the storage backend. The snapshot
//! is written first and the version record second, so after a crash between
//! the two the record lags behind the snapshot. [`load`] takes the smaller
//! of the two versions, which at worst re-fetches settings already held.

use tracing::warn;

use crate::storage::{ObjectStorage, StorageError};
use crate::types::Namespace;

use super::snapshot::SettingsSnapshot;
use super::{Result, SettingsError};

const SNAPSHOT_OBJECT: &str = "server-settings.json";
const VERSION_OBJECT: &str = "server-settings.version";

pub fn snapshot_path(namespace: &Namespace) -> String {
    format!("{namespace}/{SNAPSHOT_OBJECT}")
}

pub fn version_path(namespace: &Namespace) -> String {
    format!("{namespace}/{VERSION_OBJECT}")
}

/// Reads the version record. Returns `Ok(0)` if it does not exist.
pub fn read_version(storage: &dyn ObjectStorage, namespace: &Namespace) -> Result<u64> {
    let bytes = match storage.read(&version_path(namespace)) {
        Ok(bytes) => bytes,
        Err(StorageError::NotFound(_)) => return Ok(0),
        Err(e) => return Err(e.into()),
    };
    let text = String::from_utf8_lossy(&bytes);
    let line = text.lines().next().unwrap_or_default().trim();
    if line.is_empty() {
        return Ok(0);
    }
    line.parse()
        .map_err(|_| SettingsError::InvalidVersion(line.to_string()))
}

pub fn write_version(storage: &dyn ObjectStorage, namespace: &Namespace, version: u64) -> Result<()> {
    storage.save(&version_path(namespace), format!("{version}\n").as_bytes())?;
    Ok(())
}

/// Reads the persisted snapshot, if any.
pub fn read_snapshot(
    storage: &dyn ObjectStorage,
    namespace: &Namespace,
) -> Result<Option<SettingsSnapshot>> {
    match storage.read(&snapshot_path(namespace)) {
        Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
        Err(StorageError::NotFound(_)) => Ok(None),
        Err(e) => Err(e.into()),
    }
}

/// Persists `snapshot`, then its version record.
pub fn save(storage: &dyn ObjectStorage, namespace: &Namespace, snapshot: &SettingsSnapshot) -> Result<()> {
    let bytes = serde_json::to_vec_pretty(snapshot)?;
    storage.save(&snapshot_path(namespace), &bytes)?;
    write_version(storage, namespace, snapshot.version)
}

/// Loads the persisted settings, falling back to an empty version-0 snapshot
/// when nothing usable is stored.
pub fn load(storage: &dyn ObjectStorage, namespace: &Namespace) -> SettingsSnapshot {
    let snapshot = match read_snapshot(storage, namespace) {
        Ok(Some(snapshot)) => snapshot,
        Ok(None) => return SettingsSnapshot::default(),
        Err(e) => {
            warn!(namespace = %namespace, error = %e, "Ignoring unreadable settings snapshot");
            return SettingsSnapshot::default();
        }
    };

    let recorded = read_version(storage, namespace).unwrap_or_else(|e| {
        warn!(namespace = %namespace, error = %e, "Ignoring unreadable settings version");
        0
    });

    SettingsSnapshot {
        version: recorded.min(snapshot.version),
        values: snapshot.values,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{FileStorage, InMemoryStorage};
    use std::collections::BTreeMap;
    use tempfile::tempdir;

    fn ns() -> Namespace {
        Namespace::new("LhhP1C9g")
    }

    fn snapshot(version: u64) -> SettingsSnapshot {
        let mut values = BTreeMap::new();
        values.insert("@@log:*".to_string(), "info".to_string());
        SettingsSnapshot::new(version, values)
    }

    #[test]
    fn missing_files_load_as_empty() {
        let storage = InMemoryStorage::default();
        assert_eq!(read_version(&storage, &ns()).unwrap(), 0);
        assert_eq!(load(&storage, &ns()), SettingsSnapshot::default());
    }

    #[test]
    fn save_then_load() {
        let dir = tempdir().unwrap();
        let storage = FileStorage::new(dir.path()).unwrap();
        save(&storage, &ns(), &snapshot(7)).unwrap();

        assert_eq!(read_version(&storage, &ns()).unwrap(), 7);
        assert_eq!(load(&storage, &ns()), snapshot(7));
    }

    #[test]
    fn lagging_version_record_wins() {
        let storage = InMemoryStorage::default();
        // Simulates a crash after the snapshot write but before the record.
        save(&storage, &ns(), &snapshot(3)).unwrap();
        storage
            .save(&snapshot_path(&ns()), &serde_json::to_vec(&snapshot(4)).unwrap())
            .unwrap();

        let loaded = load(&storage, &ns());
        assert_eq!(loaded.version, 3);
    }

    #[test]
    fn corrupt_snapshot_loads_as_empty() {
        let storage = InMemoryStorage::default();
        storage.save(&snapshot_path(&ns()), b"{oops").unwrap();
        write_version(&storage, &ns(), 9).unwrap();
        assert_eq!(load(&storage, &ns()), SettingsSnapshot::default());
    }

    #[test]
    fn invalid_version_record_is_error() {
        let storage = InMemoryStorage::default();
        storage.save(&version_path(&ns()), b"nine\n").unwrap();
        assert!(matches!(
            read_version(&storage, &ns()),
            Err(SettingsError::InvalidVersion(_))
        ));
    }
}
