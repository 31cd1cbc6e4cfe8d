//! The thumbnail cache manager.
//!
//! [`ThumbnailCache::resolve`] is the single entry point. For one request it:
//!
//! 1. rejects animated requests for non-video sources, and any request for a
//!    source that is neither an image nor a video, before touching disk,
//! 2. derives the cache filename from the absolute source path,
//! 3. opens that file without truncating and takes its exclusive lock,
//! 4. converts only if the file is still empty once the lock is held,
//! 5. answers with the filename iff the file ended up non-empty.
//!
//! Concurrent requests for one entry queue on the file lock; all but the
//! first find a non-empty file and return immediately. Different entries
//! never contend except for conversion permits.

use super::params::{FrameFormat, FrameRequest, FrameSequence};
use super::permits::PermitPool;
use super::slot::CacheSlot;
use super::tools::{MediaTools, ToolError};
use super::{Scale, Thumbnail, ThumbnailError, ThumbnailSettings, key};
use crate::paths::dotted_extension;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

pub struct ThumbnailCache<T: MediaTools> {
    settings: ThumbnailSettings,
    tools: T,
    permits: PermitPool,
}

impl<T: MediaTools> ThumbnailCache<T> {
    /// Create the cache directory if needed.
    pub fn new(settings: ThumbnailSettings, tools: T) -> io::Result<Self> {
        fs::create_dir_all(&settings.cache_directory)?;
        let permits = PermitPool::new(settings.concurrent);
        Ok(Self {
            settings,
            tools,
            permits,
        })
    }

    pub fn settings(&self) -> &ThumbnailSettings {
        &self.settings
    }

    pub fn tools(&self) -> &T {
        &self.tools
    }

    pub fn directory(&self) -> &Path {
        &self.settings.cache_directory
    }

    /// Full path of a cache entry returned by [`resolve`](Self::resolve).
    pub fn entry_path(&self, filename: &str) -> PathBuf {
        self.settings.cache_directory.join(filename)
    }

    pub fn is_video(&self, source: &Path) -> bool {
        dotted_extension(source).is_some_and(|ext| self.settings.video_extensions.contains(&ext))
    }

    pub fn is_image(&self, source: &Path) -> bool {
        dotted_extension(source).is_some_and(|ext| self.settings.image_extensions.contains(&ext))
    }

    pub fn filename_for(&self, source: &Path, scale: Scale, animated: bool) -> String {
        key::cache_filename(&self.settings.salt, scale, animated, source)
    }

    /// Resolve a thumbnail, degrading every failure to
    /// [`Thumbnail::Unavailable`].
    pub fn resolve(&self, source: &Path, scale: Scale, animated: bool) -> Thumbnail {
        let result = self.try_resolve(source, scale, animated);
        if let Err(e) = &result {
            warn!(source = %source.display(), %scale, animated, "thumbnail unavailable: {e}");
        }
        result.into()
    }

    /// Same protocol as [`resolve`](Self::resolve), with the reason exposed.
    pub fn try_resolve(
        &self,
        source: &Path,
        scale: Scale,
        animated: bool,
    ) -> Result<String, ThumbnailError> {
        if animated && !self.is_video(source) {
            return Err(ThumbnailError::UnsupportedVariant(source.to_path_buf()));
        }
        if !self.is_video(source) && !self.is_image(source) {
            return Err(ThumbnailError::NotMedia(source.to_path_buf()));
        }
        if !source.is_file() {
            return Err(ThumbnailError::SourceMissing(source.to_path_buf()));
        }
        let source = std::path::absolute(source)?;
        let filename = self.filename_for(&source, scale, animated);
        let slot = CacheSlot::acquire(&self.entry_path(&filename))?;

        if slot.is_empty()? {
            let _permit = self.permits.acquire();
            let edge = self.settings.size.saturating_mul(scale.get());
            let rendered = if animated {
                self.render_animated(&source, edge, slot.path())
            } else {
                self.render_static(&source, edge, slot.path())
            };
            if let Err(e) = rendered {
                slot.reset()?;
                return Err(e);
            }
        } else {
            debug!(%filename, "thumbnail cache hit");
        }

        if slot.is_empty()? {
            return Err(ThumbnailError::ConversionFailed(format!(
                "no output for {}",
                source.display()
            )));
        }
        Ok(filename)
    }

    /// One JPEG frame; videos are sampled a third of the way in.
    fn render_static(&self, source: &Path, edge: u32, output: &Path) -> Result<(), ThumbnailError> {
        let offset = if self.is_video(source) {
            self.tools.probe(source)?.map(|duration| duration / 3.0)
        } else {
            None
        };
        self.tools.extract_frame(&FrameRequest {
            source: source.to_path_buf(),
            output: output.to_path_buf(),
            offset,
            edge,
            format: FrameFormat::Jpeg,
        })?;
        debug!(source = %source.display(), edge, "rendered static thumbnail");
        Ok(())
    }

    /// Evenly spaced frames merged into a palette-optimised GIF.
    fn render_animated(
        &self,
        source: &Path,
        edge: u32,
        output: &Path,
    ) -> Result<(), ThumbnailError> {
        let duration = self.tools.probe(source)?.ok_or_else(|| {
            ThumbnailError::ConversionFailed(format!("no duration for {}", source.display()))
        })?;

        // Removed on drop, whichever way this function returns.
        let workdir = tempfile::Builder::new()
            .prefix("archive-share-frames")
            .tempdir()?;
        let frames = FrameSequence::new(
            workdir.path(),
            self.settings.animated_framecount,
            self.settings.animated_framerate,
        );

        // One thread per frame, never a shared pool: this runs while the
        // permit and the entry lock are held.
        let results: Vec<Result<(), ToolError>> = std::thread::scope(|s| {
            let handles: Vec<_> = frames
                .offsets(duration)
                .into_iter()
                .enumerate()
                .map(|(index, offset)| {
                    let request = FrameRequest {
                        source: source.to_path_buf(),
                        output: frames.frame_path(index as u32),
                        offset: Some(offset),
                        edge,
                        format: FrameFormat::Png,
                    };
                    s.spawn(move || self.tools.extract_frame(&request))
                })
                .collect();
            handles
                .into_iter()
                .map(|handle| handle.join().unwrap_or_else(|_| Err(ToolError::Panicked)))
                .collect()
        });
        results.into_iter().collect::<Result<Vec<()>, ToolError>>()?;

        let palette = workdir.path().join("palette.png");
        self.tools.build_palette(&frames, &palette)?;
        self.tools.apply_palette(&frames, &palette, output)?;
        debug!(source = %source.display(), edge, frames = frames.count, "rendered animated thumbnail");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::{thumbnail_settings, write_source};
    use crate::thumbnail::tools::tests::{MockTools, RecordedOp};
    use std::time::Duration;
    use tempfile::TempDir;

    fn cache_with(tools: MockTools) -> (TempDir, ThumbnailCache<MockTools>) {
        let tmp = TempDir::new().unwrap();
        let cache = ThumbnailCache::new(thumbnail_settings(&tmp.path().join("cache")), tools).unwrap();
        (tmp, cache)
    }

    fn two() -> Scale {
        Scale::new(2).unwrap()
    }

    // =========================================================================
    // Static thumbnails
    // =========================================================================

    #[test]
    fn image_static_thumbnail_skips_probe() {
        let (tmp, cache) = cache_with(MockTools::new());
        let source = write_source(tmp.path(), "dawn.jpg");

        let name = cache.try_resolve(&source, two(), false).unwrap();

        assert!(name.ends_with(".jpg"));
        assert!(fs::metadata(cache.entry_path(&name)).unwrap().len() > 0);
        assert_eq!(
            cache.tools().get_operations(),
            vec![RecordedOp::ExtractFrame {
                output: cache.entry_path(&name).to_string_lossy().to_string(),
                offset: None,
                edge: 256,
                format: FrameFormat::Jpeg,
            }]
        );
    }

    #[test]
    fn video_static_thumbnail_seeks_a_third_in() {
        let (tmp, cache) = cache_with(MockTools::with_duration(Some(9.0)));
        let source = write_source(tmp.path(), "clip.mp4");

        cache.try_resolve(&source, Scale::ONE, false).unwrap();

        let ops = cache.tools().get_operations();
        assert!(matches!(ops[0], RecordedOp::Probe(_)));
        assert!(matches!(
            ops[1],
            RecordedOp::ExtractFrame { offset: Some(o), edge: 128, .. } if o == 3.0
        ));
    }

    #[test]
    fn video_without_duration_takes_first_frame() {
        let (tmp, cache) = cache_with(MockTools::with_duration(None));
        let source = write_source(tmp.path(), "clip.mkv");

        assert!(cache.resolve(&source, Scale::ONE, false).is_ready());
        assert!(matches!(
            cache.tools().get_operations()[1],
            RecordedOp::ExtractFrame { offset: None, .. }
        ));
    }

    #[test]
    fn second_request_is_a_pure_hit() {
        let (tmp, cache) = cache_with(MockTools::new());
        let source = write_source(tmp.path(), "dawn.jpg");

        let first = cache.try_resolve(&source, Scale::ONE, false).unwrap();
        let ops = cache.tools().get_operations().len();
        let second = cache.try_resolve(&source, Scale::ONE, false).unwrap();

        assert_eq!(first, second);
        assert_eq!(cache.tools().get_operations().len(), ops);
    }

    // =========================================================================
    // Animated thumbnails
    // =========================================================================

    #[test]
    fn animated_video_extracts_frames_then_palette() {
        let (tmp, cache) = cache_with(MockTools::with_duration(Some(10.0)));
        let source = write_source(tmp.path(), "clip.MP4");

        let name = cache.try_resolve(&source, Scale::ONE, true).unwrap();
        assert!(name.ends_with(".gif"));

        let ops = cache.tools().get_operations();
        let mut offsets: Vec<f64> = ops
            .iter()
            .filter_map(|op| match op {
                RecordedOp::ExtractFrame {
                    offset: Some(o),
                    format: FrameFormat::Png,
                    ..
                } => Some(*o),
                _ => None,
            })
            .collect();
        offsets.sort_by(f64::total_cmp);
        assert_eq!(offsets, vec![1.0, 3.0, 5.0, 7.0, 9.0]);

        let tail = &ops[ops.len() - 2..];
        assert_eq!(tail[0], RecordedOp::BuildPalette { count: 5 });
        assert!(matches!(tail[1], RecordedOp::ApplyPalette { .. }));
    }

    #[test]
    fn animated_frames_are_cleaned_up() {
        let (tmp, cache) = cache_with(MockTools::new());
        let source = write_source(tmp.path(), "clip.webm");

        cache.try_resolve(&source, Scale::ONE, true).unwrap();

        for op in cache.tools().get_operations() {
            if let RecordedOp::ExtractFrame { output, .. } = op {
                assert!(!Path::new(&output).exists(), "{output} left behind");
            }
        }
    }

    #[test]
    fn animated_request_for_image_invokes_nothing() {
        let (tmp, cache) = cache_with(MockTools::new());
        let source = write_source(tmp.path(), "dawn.jpg");

        let result = cache.resolve(&source, Scale::ONE, true);

        assert!(matches!(
            result,
            Thumbnail::Unavailable(ThumbnailError::UnsupportedVariant(_))
        ));
        assert!(cache.tools().get_operations().is_empty());
        assert_eq!(fs::read_dir(cache.directory()).unwrap().count(), 0);
    }

    #[test]
    fn animated_without_duration_fails_and_leaves_empty_marker() {
        let (tmp, cache) = cache_with(MockTools::with_duration(None));
        let source = write_source(tmp.path(), "clip.mp4");
        let name = cache.filename_for(&source, Scale::ONE, true);

        let result = cache.try_resolve(&source, Scale::ONE, true);

        assert!(matches!(result, Err(ThumbnailError::ConversionFailed(_))));
        assert_eq!(fs::metadata(cache.entry_path(&name)).unwrap().len(), 0);
        assert_eq!(cache.tools().conversions(), 0);
    }

    #[test]
    fn one_failed_frame_fails_the_whole_preview() {
        let tools = MockTools {
            duration: Some(10.0),
            fail_from_offset: Some(9.0),
            ..MockTools::default()
        };
        let (tmp, cache) = cache_with(tools);
        let source = write_source(tmp.path(), "clip.mp4");

        let result = cache.try_resolve(&source, Scale::ONE, true);

        assert!(matches!(result, Err(ThumbnailError::Tool(_))));
        let ops = cache.tools().get_operations();
        // every frame was attempted, nothing after
        assert_eq!(
            ops.iter()
                .filter(|op| matches!(op, RecordedOp::ExtractFrame { .. }))
                .count(),
            5
        );
        assert!(!ops.iter().any(|op| matches!(op, RecordedOp::BuildPalette { .. })));
    }

    // =========================================================================
    // Failure handling
    // =========================================================================

    #[test]
    fn missing_source_is_reported() {
        let (tmp, cache) = cache_with(MockTools::new());
        let result = cache.try_resolve(&tmp.path().join("gone.jpg"), Scale::ONE, false);
        assert!(matches!(result, Err(ThumbnailError::SourceMissing(_))));
        assert!(cache.tools().get_operations().is_empty());
    }

    #[test]
    fn directory_source_is_missing() {
        let (tmp, cache) = cache_with(MockTools::new());
        let dir = tmp.path().join("album.mp4");
        fs::create_dir(&dir).unwrap();
        let result = cache.try_resolve(&dir, Scale::ONE, false);
        assert!(matches!(result, Err(ThumbnailError::SourceMissing(_))));
    }

    #[test]
    fn non_media_source_invokes_nothing() {
        let (tmp, cache) = cache_with(MockTools::new());

        for name in ["notes.txt", "scan.pdf", "README"] {
            let source = write_source(tmp.path(), name);
            let result = cache.resolve(&source, Scale::ONE, false);
            assert!(
                matches!(result, Thumbnail::Unavailable(ThumbnailError::NotMedia(_))),
                "{name}"
            );
        }

        assert!(cache.tools().get_operations().is_empty());
        assert_eq!(fs::read_dir(cache.directory()).unwrap().count(), 0);
    }

    #[test]
    fn image_extensions_ignore_case() {
        let (tmp, cache) = cache_with(MockTools::new());
        let source = write_source(tmp.path(), "DAWN.JPG");
        assert!(cache.resolve(&source, Scale::ONE, false).is_ready());
    }

    #[test]
    fn silent_tool_is_conversion_failure() {
        let tools = MockTools {
            silent: true,
            ..MockTools::default()
        };
        let (tmp, cache) = cache_with(tools);
        let source = write_source(tmp.path(), "dawn.jpg");

        let result = cache.resolve(&source, Scale::ONE, false);
        assert!(matches!(
            result,
            Thumbnail::Unavailable(ThumbnailError::ConversionFailed(_))
        ));
        assert_eq!(result.filename(), None);
    }

    #[test]
    fn failed_marker_is_retried() {
        let tmp = TempDir::new().unwrap();
        let settings = thumbnail_settings(&tmp.path().join("cache"));
        let source = write_source(tmp.path(), "clip.mp4");

        let broken = ThumbnailCache::new(settings.clone(), MockTools::with_duration(None)).unwrap();
        assert!(!broken.resolve(&source, Scale::ONE, true).is_ready());

        let working = ThumbnailCache::new(settings, MockTools::new()).unwrap();
        let name = working.try_resolve(&source, Scale::ONE, true).unwrap();
        assert!(fs::metadata(working.entry_path(&name)).unwrap().len() > 0);
        assert!(working.tools().conversions() > 0);
    }

    // =========================================================================
    // Concurrency
    // =========================================================================

    #[test]
    fn concurrent_requests_convert_once() {
        let tools = MockTools {
            delay: Duration::from_millis(50),
            ..MockTools::default()
        };
        let (tmp, cache) = cache_with(tools);
        let source = write_source(tmp.path(), "dawn.jpg");

        let names: Vec<String> = std::thread::scope(|s| {
            let handles: Vec<_> = (0..8)
                .map(|_| s.spawn(|| cache.try_resolve(&source, Scale::ONE, false).unwrap()))
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });

        assert!(names.windows(2).all(|w| w[0] == w[1]));
        assert_eq!(cache.tools().conversions(), 1);
    }

    #[test]
    fn permits_bound_parallel_conversions() {
        let tools = MockTools {
            delay: Duration::from_millis(30),
            ..MockTools::default()
        };
        let tmp = TempDir::new().unwrap();
        let mut settings = thumbnail_settings(&tmp.path().join("cache"));
        settings.concurrent = 1;
        let cache = ThumbnailCache::new(settings, tools).unwrap();
        let sources: Vec<PathBuf> = (0..4)
            .map(|i| write_source(tmp.path(), &format!("img{i}.png")))
            .collect();

        std::thread::scope(|s| {
            for source in &sources {
                let cache = &cache;
                s.spawn(move || {
                    assert!(cache.resolve(source, Scale::ONE, false).is_ready());
                });
            }
        });

        assert_eq!(cache.tools().conversions(), 4);
        assert_eq!(cache.permits.available(), 1);
    }

    #[test]
    fn animated_batch_from_rayon_pool_completes() {
        use rayon::prelude::*;

        let tools = MockTools {
            duration: Some(10.0),
            delay: Duration::from_millis(5),
            ..MockTools::default()
        };
        let tmp = TempDir::new().unwrap();
        let mut settings = thumbnail_settings(&tmp.path().join("cache"));
        settings.concurrent = 1;
        let cache = ThumbnailCache::new(settings, tools).unwrap();
        let sources: Vec<PathBuf> = (0..16)
            .map(|i| write_source(tmp.path(), &format!("clip{i}.mp4")))
            .collect();
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(8)
            .build()
            .unwrap();

        let ready = pool.install(|| {
            sources
                .par_iter()
                .filter(|source| cache.resolve(source, Scale::ONE, true).is_ready())
                .count()
        });

        assert_eq!(ready, sources.len());
        assert_eq!(cache.permits.available(), 1);
    }
}
