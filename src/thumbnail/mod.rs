//! Content-addressed thumbnail cache.
//!
//! Thumbnails are derived from media files by external tools and stored in
//! one flat directory under a name computed from the request. Creating an
//! entry is expensive, so the cache guarantees that concurrent requests for
//! the same entry, from any thread or process sharing the directory, run the
//! conversion at most once.
//!
//! ## Entry lifecycle
//!
//! ```text
//! absent ──open/create──▶ empty (locked) ──convert ok──▶ non-empty (immutable)
//!                              │
//!                              └──convert failed──▶ empty (retried next time)
//! ```
//!
//! A zero-length file is never served: it is either being produced right
//! now by whoever holds its lock, or a previous attempt failed.
//!
//! ## Modules
//!
//! - **`key`**: Scale parsing and cache filename derivation
//! - **`slot`**: Exclusive advisory lock on one cache file
//! - **`permits`**: Process-local bound on concurrent conversions
//! - **`params`**: Plain-data requests passed to the media tools
//! - **`tools`**: The [`MediaTools`] contract and its ffmpeg implementation
//! - **`cache`**: [`ThumbnailCache`], the protocol tying it all together

mod cache;
pub mod key;
pub mod params;
pub mod permits;
pub mod slot;
pub mod tools;

pub use cache::ThumbnailCache;
pub use key::{Scale, cache_filename, parse_parameter};
pub use params::{FrameFormat, FrameRequest, FrameSequence};
pub use tools::{FfmpegTools, MediaTools, ToolError};

use crate::store::StoreError;
use std::collections::HashSet;
use std::path::PathBuf;
use thiserror::Error;

/// Immutable settings of a [`ThumbnailCache`].
#[derive(Debug, Clone, PartialEq)]
pub struct ThumbnailSettings {
    pub cache_directory: PathBuf,
    /// Mixed into every cache filename.
    pub salt: Vec<u8>,
    pub concurrent: usize,
    /// Edge length in pixels of a 1x thumbnail.
    pub size: u32,
    pub animated_framecount: u32,
    pub animated_framerate: f64,
    /// Lowercase extensions with a leading dot, e.g. `".jpg"`.
    pub image_extensions: HashSet<String>,
    /// Same form as `image_extensions`, e.g. `".mp4"`.
    pub video_extensions: HashSet<String>,
}

#[derive(Error, Debug)]
pub enum ThumbnailError {
    #[error("no animated variant for non-video {0}")]
    UnsupportedVariant(PathBuf),
    #[error("neither an image nor a video: {0}")]
    NotMedia(PathBuf),
    #[error("source is not a regular file: {0}")]
    SourceMissing(PathBuf),
    #[error("conversion failed: {0}")]
    ConversionFailed(String),
    #[error(transparent)]
    Tool(#[from] ToolError),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("malformed thumbnail request: {0}")]
    InvalidRequest(String),
    #[error("no live link with id {0}")]
    UnknownLink(String),
    #[error("unknown mount: {0}")]
    UnknownMount(String),
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Outcome of a thumbnail request. Failures degrade, they never propagate.
#[derive(Debug)]
pub enum Thumbnail {
    /// Name of a non-empty file in the cache directory.
    Ready(String),
    Unavailable(ThumbnailError),
}

impl Thumbnail {
    pub fn filename(&self) -> Option<&str> {
        match self {
            Self::Ready(name) => Some(name),
            Self::Unavailable(_) => None,
        }
    }

    pub fn is_ready(&self) -> bool {
        matches!(self, Self::Ready(_))
    }
}

impl From<Result<String, ThumbnailError>> for Thumbnail {
    fn from(result: Result<String, ThumbnailError>) -> Self {
        match result {
            Ok(name) => Self::Ready(name),
            Err(e) => Self::Unavailable(e),
        }
    }
}
