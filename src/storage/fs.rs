//! Directory-backed object storage.
//!
//! Each object is a regular file under the storage root. Writes go through a
//! temp file plus rename, and directory entries are fsynced after every
//! create, rename and delete so that queue state survives a crash.
//!
//! ```text
//! <root>/
//!   LhhP1C9g/
//!     server-settings.json
//!     server-settings.version
//!     q/
//!       0f3c...e1.0.json         # pending, never attempted
//!       9a2d...77.1.json.lock    # locked, one attempt so far
//! ```

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::SystemTime;

use chrono::{DateTime, Utc};
use tracing::debug;

use super::fsync::{fsync_dir, write_atomic};
use super::retry::IoRetry;
use super::{
    ItemInfo, ObjectStorage, Result, StorageError, finish_listing, split_pattern, validate_path,
    wildcard_match,
};
use crate::clock::{Clock, SystemClock};

/// Object storage rooted at a directory.
pub struct FileStorage {
    root: PathBuf,
    clock: Arc<dyn Clock>,
    retry: IoRetry,
}

impl std::fmt::Debug for FileStorage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileStorage")
            .field("root", &self.root)
            .field("retry", &self.retry)
            .finish_non_exhaustive()
    }
}

impl FileStorage {
    /// Creates storage rooted at `root`, creating the directory if needed.
    pub fn new(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        Ok(FileStorage {
            root,
            clock: Arc::new(SystemClock),
            retry: IoRetry::DEFAULT,
        })
    }

    /// Uses `clock` to stamp modification times on renamed objects.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_retry(mut self, retry: IoRetry) -> Self {
        self.retry = retry;
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn resolve(&self, path: &str) -> Result<PathBuf> {
        validate_path(path)?;
        Ok(path.split('/').fold(self.root.clone(), |acc, seg| acc.join(seg)))
    }

    fn ensure_parent(&self, full: &Path) -> Result<()> {
        if let Some(parent) = full.parent() {
            fs::create_dir_all(parent)?;
        }
        Ok(())
    }

    /// Moves `old` to `new` unless `new` exists.
    ///
    /// Hard-linking fails atomically when the destination exists, so two
    /// workers racing for the same lock cannot both win. Filesystems without
    /// hard links fall back to check-then-rename.
    fn move_exclusive(&self, old: &Path, new: &Path) -> Result<bool> {
        match self.retry.run(|| fs::hard_link(old, new)) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => return Ok(false),
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(false),
            Err(e) if e.kind() == io::ErrorKind::Unsupported => {
                debug!(path = %old.display(), "Hard links unsupported, renaming");
                if new.exists() {
                    return Ok(false);
                }
                return match self.retry.run(|| fs::rename(old, new)) {
                    Ok(()) => Ok(true),
                    Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
                    Err(e) => Err(e.into()),
                };
            }
            Err(e) => return Err(e.into()),
        }

        match self.retry.run(|| fs::remove_file(old)) {
            Ok(()) => Ok(true),
            // Someone else moved the source away after we linked it.
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                let _ = fs::remove_file(new);
                Ok(false)
            }
            Err(e) => {
                let _ = fs::remove_file(new);
                Err(e.into())
            }
        }
    }

    /// Stamps the modification time so lock age is measured from the rename.
    fn touch(&self, full: &Path) {
        let now: SystemTime = self.clock.now().into();
        let result = fs::OpenOptions::new()
            .write(true)
            .open(full)
            .and_then(|file| file.set_modified(now));
        if let Err(e) = result {
            debug!(path = %full.display(), error = %e, "Failed to stamp modification time");
        }
    }
}

impl ObjectStorage for FileStorage {
    fn save(&self, path: &str, bytes: &[u8]) -> Result<()> {
        let full = self.resolve(path)?;
        self.ensure_parent(&full)?;

        let mut tmp_name = full.as_os_str().to_owned();
        tmp_name.push(format!(".tmp-{}", uuid::Uuid::new_v4().simple()));
        let tmp = PathBuf::from(tmp_name);

        self.retry.run(|| write_atomic(&full, &tmp, bytes))?;
        Ok(())
    }

    fn read(&self, path: &str) -> Result<Vec<u8>> {
        let full = self.resolve(path)?;
        self.retry.run(|| fs::read(&full)).map_err(|e| match e.kind() {
            io::ErrorKind::NotFound => StorageError::NotFound(path.to_string()),
            _ => StorageError::Io(e),
        })
    }

    fn rename(&self, old: &str, new: &str) -> Result<bool> {
        let old_full = self.resolve(old)?;
        let new_full = self.resolve(new)?;

        self.ensure_parent(&new_full)?;
        if !self.move_exclusive(&old_full, &new_full)? {
            return Ok(false);
        }

        self.touch(&new_full);

        if let Some(parent) = new_full.parent() {
            fsync_dir(parent)?;
        }
        if let Some(parent) = old_full.parent()
            && Some(parent) != new_full.parent()
        {
            fsync_dir(parent)?;
        }
        Ok(true)
    }

    fn delete(&self, path: &str) -> Result<bool> {
        let full = self.resolve(path)?;
        match self.retry.run(|| fs::remove_file(&full)) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(false),
            Err(e) => return Err(e.into()),
        }
        if let Some(parent) = full.parent() {
            fsync_dir(parent)?;
        }
        Ok(true)
    }

    fn list(
        &self,
        pattern: &str,
        limit: Option<usize>,
        max_created: Option<DateTime<Utc>>,
    ) -> Result<Vec<ItemInfo>> {
        let (dir, name_pattern) = split_pattern(pattern)?;
        let dir_full = if dir.is_empty() {
            self.root.clone()
        } else {
            self.resolve(dir)?
        };

        let entries = match fs::read_dir(&dir_full) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut items = Vec::new();
        for entry in entries {
            let entry = entry?;
            let Some(name) = entry.file_name().to_str().map(str::to_owned) else {
                continue;
            };
            if !wildcard_match(name_pattern, &name) {
                continue;
            }

            // Entries can vanish between read_dir and stat when another
            // worker deletes or renames them.
            let metadata = match entry.metadata() {
                Ok(m) => m,
                Err(e) if e.kind() == io::ErrorKind::NotFound => continue,
                Err(e) => return Err(e.into()),
            };
            if !metadata.is_file() {
                continue;
            }

            let modified: DateTime<Utc> = metadata.modified()?.into();
            let created: DateTime<Utc> = metadata.created().map(Into::into).unwrap_or(modified);

            let path = if dir.is_empty() {
                name
            } else {
                format!("{dir}/{name}")
            };
            items.push(ItemInfo {
                path,
                created,
                modified,
            });
        }

        Ok(finish_listing(items, limit, max_created))
    }

    fn exists(&self, path: &str) -> bool {
        self.resolve(path).map(|p| p.is_file()).unwrap_or(false)
    }
}
