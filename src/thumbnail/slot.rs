//! Per-file advisory locking of cache entries.
//!
//! A [`CacheSlot`] is the destination file itself, opened without truncation
//! and held under an exclusive `flock`. The lock is per open file
//! description, so it serializes creation between threads of one process
//! and between processes sharing the cache directory alike. Dropping the
//! slot unlocks and closes the file on every exit path.

use fs4::fs_std::FileExt;
use std::fs::{File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};

#[derive(Debug)]
pub struct CacheSlot {
    file: File,
    path: PathBuf,
}

impl CacheSlot {
    /// Open or create `path` and block until its exclusive lock is ours.
    ///
    /// A freshly created file is empty, which marks the entry as not yet
    /// materialized.
    pub fn acquire(path: &Path) -> io::Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)?;
        file.lock_exclusive()?;
        Ok(Self {
            file,
            path: path.to_path_buf(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Current size of the entry. Sees writes made through other handles.
    pub fn len(&self) -> io::Result<u64> {
        Ok(self.file.metadata()?.len())
    }

    pub fn is_empty(&self) -> io::Result<bool> {
        Ok(self.len()? == 0)
    }

    /// Truncate back to the "not materialized" marker after a failed attempt.
    pub fn reset(&self) -> io::Result<()> {
        self.file.set_len(0)
    }
}

impl Drop for CacheSlot {
    fn drop(&mut self) {
        let _ = FileExt::unlock(&self.file);
    }
}
