//! Parameter types for media tool calls.
//!
//! These describe *what* to produce; [`MediaTools`](super::MediaTools)
//! implementations decide *how*. Keeping them plain data lets the cache
//! manager be tested against a recording mock.

use std::path::{Path, PathBuf};

/// Output encoding of an extracted frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameFormat {
    /// Final static thumbnails.
    Jpeg,
    /// Intermediate frames of an animated preview.
    Png,
}

impl FrameFormat {
    pub fn codec(self) -> &'static str {
        match self {
            Self::Jpeg => "mjpeg",
            Self::Png => "png",
        }
    }
}

/// One frame grabbed from `source`, fitted inside an `edge`×`edge` box.
#[derive(Debug, Clone, PartialEq)]
pub struct FrameRequest {
    pub source: PathBuf,
    pub output: PathBuf,
    /// Seek position in seconds; `None` takes the first frame.
    pub offset: Option<f64>,
    pub edge: u32,
    pub format: FrameFormat,
}

/// Numbered PNG frames `frame0.png … frame{n-1}.png` in one directory.
#[derive(Debug, Clone, PartialEq)]
pub struct FrameSequence {
    pub directory: PathBuf,
    pub count: u32,
    pub framerate: f64,
}

impl FrameSequence {
    pub fn new(directory: &Path, count: u32, framerate: f64) -> Self {
        Self {
            directory: directory.to_path_buf(),
            count,
            framerate,
        }
    }

    pub fn frame_path(&self, index: u32) -> PathBuf {
        self.directory.join(format!("frame{index}.png"))
    }

    /// printf-style pattern understood by ffmpeg's image2 demuxer.
    pub fn pattern(&self) -> PathBuf {
        self.directory.join("frame%d.png")
    }

    /// Seek offsets for evenly spaced frames, each centred in its slice.
    pub fn offsets(&self, duration: f64) -> Vec<f64> {
        let slice = duration / f64::from(self.count);
        (0..self.count)
            .map(|i| (f64::from(i) + 0.5) * slice)
            .collect()
    }
}
