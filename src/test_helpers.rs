//! Shared test utilities for the archive-share test suite.
//!
//! Provides throwaway stores, a small id scheme whose limit is easy to hit,
//! and media source fixtures for the thumbnail cache.
//!
//! # Usage
//!
//! ```text
//! use crate::ids::allocate_ids;
//! use crate::test_helpers::*;
//!
//! let (_tmp, store) = temp_store();
//! let scheme = small_scheme();
//! let ids = allocate_ids(&store, &scheme, 3).unwrap();
//! ```

use std::path::{Path, PathBuf};
use tempfile::TempDir;

use crate::config::Config;
use crate::ids::IdScheme;
use crate::store::Store;
use crate::thumbnail::ThumbnailSettings;

// =========================================================================
// Store and ids
// =========================================================================

/// A fresh store in its own temp directory. Keep the `TempDir` alive.
pub fn temp_store() -> (TempDir, Store) {
    let tmp = TempDir::new().unwrap();
    let store = Store::open(tmp.path()).unwrap();
    (tmp, store)
}

/// Hex alphabet, 8 state bits (limit 256), 12 noise bits.
pub fn small_scheme() -> IdScheme {
    IdScheme::new(7, "0123456789abcdef", 8, 12).unwrap()
}

// =========================================================================
// Thumbnail fixtures
// =========================================================================

/// Stock thumbnail settings pointed at `cache_directory`.
pub fn thumbnail_settings(cache_directory: &Path) -> ThumbnailSettings {
    let mut settings = Config::default().thumbnail_settings();
    settings.cache_directory = cache_directory.to_path_buf();
    settings
}

/// Write a small placeholder media file and return its path.
pub fn write_source(dir: &Path, name: &str) -> PathBuf {
    let path = dir.join(name);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).unwrap();
    }
    std::fs::write(&path, b"not really media").unwrap();
    path
}
