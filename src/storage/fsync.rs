//! fsync helpers for the file backend.
//!
//! Creating, renaming or deleting a file changes its directory entry. The
//! file's own fsync does not make that change durable; the directory has to
//! be synced as well, or a power loss can bring a deleted queue item back or
//! revert a lock rename.

use std::fs::{File, OpenOptions};
use std::io;
use std::path::Path;

/// Syncs a file's contents and metadata to disk.
pub fn fsync_file(file: &File) -> io::Result<()> {
    file.sync_all()
}

/// Syncs a directory so that entry changes inside it survive a crash.
///
/// Directories cannot be opened for syncing on every platform; on those
/// the call is a no-op.
pub fn fsync_dir(dir_path: &Path) -> io::Result<()> {
    #[cfg(unix)]
    {
        let dir = OpenOptions::new().read(true).open(dir_path)?;
        dir.sync_all()
    }
    #[cfg(not(unix))]
    {
        let _ = dir_path;
        Ok(())
    }
}

/// Writes `bytes` to `path` by way of a temp file, so readers only ever see
/// the old or the new contents.
pub fn write_atomic(path: &Path, tmp_path: &Path, bytes: &[u8]) -> io::Result<()> {
    use std::io::Write;

    {
        let mut file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(tmp_path)?;
        file.write_all(bytes)?;
        fsync_file(&file)?;
    }

    if let Err(e) = std::fs::rename(tmp_path, path) {
        let _ = std::fs::remove_file(tmp_path);
        return Err(e);
    }

    if let Some(parent) = path.parent() {
        fsync_dir(parent)?;
    }
    Ok(())
}
