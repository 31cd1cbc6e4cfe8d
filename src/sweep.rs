//! Periodic expiry.
//!
//! Two independent passes, meant to run from cron:
//!
//! - [`sweep_links`] (hourly) deletes link rows whose `expires <= now`.
//! - [`sweep_cache`] (daily) deletes cache files not modified within the
//!   retention period. Entries are content-addressed, so a deleted entry is
//!   simply regenerated on its next request.

use crate::store::{Store, StoreError};
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

/// Tally of one cache sweep.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CacheSweep {
    pub removed: usize,
    pub kept: usize,
    /// Files that could not be inspected or deleted.
    pub failed: Vec<PathBuf>,
}

/// Delete expired links in one transaction. Returns the number removed.
pub fn sweep_links(store: &Store, now: i64) -> Result<usize, StoreError> {
    let removed = store.delete_expired(now)?;
    info!(removed, now, "swept expired links");
    Ok(removed)
}

/// Delete regular files under `directory` last modified more than
/// `retention` before `now`.
///
/// Per-file failures are logged and counted; they never stop the sweep. A
/// missing directory is an empty sweep.
pub fn sweep_cache(directory: &Path, retention: Duration, now: SystemTime) -> CacheSweep {
    let mut sweep = CacheSweep::default();
    if !directory.exists() {
        return sweep;
    }
    let cutoff = now.checked_sub(retention).unwrap_or(SystemTime::UNIX_EPOCH);

    for entry in WalkDir::new(directory).min_depth(1) {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                warn!("cache sweep: {e}");
                sweep
                    .failed
                    .push(e.path().map(Path::to_path_buf).unwrap_or_default());
                continue;
            }
        };
        if !entry.file_type().is_file() {
            continue;
        }
        let modified = match entry.metadata().map_err(std::io::Error::from).and_then(|m| m.modified()) {
            Ok(modified) => modified,
            Err(e) => {
                warn!(path = %entry.path().display(), "cache sweep: {e}");
                sweep.failed.push(entry.path().to_path_buf());
                continue;
            }
        };
        if modified >= cutoff {
            sweep.kept += 1;
            continue;
        }
        match std::fs::remove_file(entry.path()) {
            Ok(()) => {
                debug!(path = %entry.path().display(), "removed stale thumbnail");
                sweep.removed += 1;
            }
            Err(e) => {
                warn!(path = %entry.path().display(), "cache sweep: {e}");
                sweep.failed.push(entry.path().to_path_buf());
            }
        }
    }

    info!(
        removed = sweep.removed,
        kept = sweep.kept,
        failed = sweep.failed.len(),
        "swept thumbnail cache"
    );
    sweep
}
