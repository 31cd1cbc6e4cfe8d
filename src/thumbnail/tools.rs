//! External media tools.
//!
//! The [`MediaTools`] trait is the contract the cache manager relies on:
//! probe a duration, grab a scaled frame, build a palette from a frame
//! sequence, and apply it to produce an animated GIF. The production
//! implementation, [`FfmpegTools`], runs `ffprobe`/`ffmpeg` as child
//! processes, optionally under `nice`. Argument vectors are built by plain
//! methods so they can be checked without spawning anything.

use super::params::{FrameRequest, FrameSequence};
use serde::Deserialize;
use std::ffi::OsString;
use std::io;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ToolError {
    #[error("failed to start {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: io::Error,
    },
    #[error("{program} exited unsuccessfully (code {code:?})")]
    Failed { program: String, code: Option<i32> },
    #[error("unreadable ffprobe output: {0}")]
    Probe(#[from] serde_json::Error),
    #[error("empty command line")]
    EmptyCommand,
    #[error("frame worker panicked")]
    Panicked,
}

/// Media operations needed to derive thumbnails.
///
/// Implementations must be `Sync`: frames of one animated preview are
/// extracted in parallel.
pub trait MediaTools: Sync {
    /// Duration in seconds, or `None` if the container doesn't report one.
    fn probe(&self, source: &Path) -> Result<Option<f64>, ToolError>;

    /// Extract one scaled frame.
    fn extract_frame(&self, request: &FrameRequest) -> Result<(), ToolError>;

    /// Generate a shared colour palette for a frame sequence.
    fn build_palette(&self, frames: &FrameSequence, palette: &Path) -> Result<(), ToolError>;

    /// Encode a frame sequence into an animated GIF using `palette`.
    fn apply_palette(
        &self,
        frames: &FrameSequence,
        palette: &Path,
        output: &Path,
    ) -> Result<(), ToolError>;
}

/// `ffmpeg`/`ffprobe` backed tools.
#[derive(Debug, Clone, PartialEq)]
pub struct FfmpegTools {
    pub ffmpeg: PathBuf,
    pub ffprobe: PathBuf,
    pub nice: PathBuf,
    /// Passed as `nice -n <niceness>`; 0 runs the tools directly.
    pub niceness: i32,
}

impl FfmpegTools {
    fn command(&self, program: &Path) -> Vec<OsString> {
        let mut argv = Vec::new();
        if self.niceness != 0 {
            argv.push(self.nice.clone().into_os_string());
            argv.push("-n".into());
            argv.push(self.niceness.to_string().into());
        }
        argv.push(program.as_os_str().to_owned());
        argv
    }

    pub fn probe_args(&self, source: &Path) -> Vec<OsString> {
        let mut argv = self.command(&self.ffprobe);
        argv.extend(
            ["-v", "quiet", "-print_format", "json", "-show_format", "-i"]
                .map(OsString::from),
        );
        argv.push(source.as_os_str().to_owned());
        argv
    }

    pub fn frame_args(&self, request: &FrameRequest) -> Vec<OsString> {
        let mut argv = self.command(&self.ffmpeg);
        if let Some(offset) = request.offset {
            argv.push("-ss".into());
            argv.push(offset.to_string().into());
        }
        argv.push("-i".into());
        argv.push(request.source.as_os_str().to_owned());
        argv.push("-y".into());
        argv.push("-vf".into());
        argv.push(scale_filter(request.edge).into());
        argv.extend(["-vframes", "1", "-vcodec", request.format.codec(), "-an"].map(OsString::from));
        argv.push(request.output.as_os_str().to_owned());
        argv
    }

    fn sequence_input(&self, frames: &FrameSequence) -> Vec<OsString> {
        let mut argv = self.command(&self.ffmpeg);
        argv.extend(["-f", "image2", "-framerate"].map(OsString::from));
        argv.push(frames.framerate.to_string().into());
        argv.push("-i".into());
        argv.push(frames.pattern().into_os_string());
        argv
    }

    pub fn palette_args(&self, frames: &FrameSequence, palette: &Path) -> Vec<OsString> {
        let mut argv = self.sequence_input(frames);
        argv.extend(["-y", "-vf", "palettegen"].map(OsString::from));
        argv.push(palette.as_os_str().to_owned());
        argv
    }

    pub fn apply_args(&self, frames: &FrameSequence, palette: &Path, output: &Path) -> Vec<OsString> {
        let mut argv = self.sequence_input(frames);
        argv.push("-i".into());
        argv.push(palette.as_os_str().to_owned());
        argv.extend(["-y", "-lavfi", "paletteuse"].map(OsString::from));
        argv.push(output.as_os_str().to_owned());
        argv
    }
}

impl MediaTools for FfmpegTools {
    fn probe(&self, source: &Path) -> Result<Option<f64>, ToolError> {
        let argv = self.probe_args(source);
        let (program, args) = argv.split_first().ok_or(ToolError::EmptyCommand)?;
        let output = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .stderr(Stdio::null())
            .output()
            .map_err(|source| ToolError::Spawn {
                program: program.to_string_lossy().into_owned(),
                source,
            })?;
        if !output.status.success() {
            return Err(ToolError::Failed {
                program: program.to_string_lossy().into_owned(),
                code: output.status.code(),
            });
        }
        parse_probe_output(&output.stdout)
    }

    fn extract_frame(&self, request: &FrameRequest) -> Result<(), ToolError> {
        run(&self.frame_args(request))
    }

    fn build_palette(&self, frames: &FrameSequence, palette: &Path) -> Result<(), ToolError> {
        run(&self.palette_args(frames, palette))
    }

    fn apply_palette(
        &self,
        frames: &FrameSequence,
        palette: &Path,
        output: &Path,
    ) -> Result<(), ToolError> {
        run(&self.apply_args(frames, palette, output))
    }
}

/// Run a command with all standard streams on the null device.
fn run(argv: &[OsString]) -> Result<(), ToolError> {
    let (program, args) = argv.split_first().ok_or(ToolError::EmptyCommand)?;
    let status = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .map_err(|source| ToolError::Spawn {
            program: program.to_string_lossy().into_owned(),
            source,
        })?;
    if status.success() {
        Ok(())
    } else {
        Err(ToolError::Failed {
            program: program.to_string_lossy().into_owned(),
            code: status.code(),
        })
    }
}

/// Fit the frame inside an `edge`×`edge` box, keeping the aspect ratio.
pub fn scale_filter(edge: u32) -> String {
    format!("format=rgb24,scale=iw*min({edge}/iw\\,{edge}/ih):ih*min({edge}/iw\\,{edge}/ih)")
}

#[derive(Deserialize)]
struct ProbeReport {
    format: Option<ProbeFormat>,
}

#[derive(Deserialize)]
struct ProbeFormat {
    // ffprobe prints numbers as strings in its JSON writer
    duration: Option<String>,
}

/// Extract a usable duration from `ffprobe -print_format json -show_format`.
///
/// Missing, unparseable, zero, or non-finite durations are all `None`.
pub fn parse_probe_output(json: &[u8]) -> Result<Option<f64>, ToolError> {
    let report: ProbeReport = serde_json::from_slice(json)?;
    Ok(report
        .format
        .and_then(|f| f.duration)
        .and_then(|d| d.trim().parse::<f64>().ok())
        .filter(|d| d.is_finite() && *d > 0.0))
}

#[cfg(test)]
pub mod tests {
    use super::*;
    use crate::thumbnail::FrameFormat;
    use std::sync::Mutex;
    use std::time::Duration;

    /// Mock tools that record operations and write placeholder output.
    /// Uses Mutex (not RefCell) so it is Sync and can be shared across frame threads.
    #[derive(Debug)]
    pub struct MockTools {
        pub duration: Option<f64>,
        /// Fail every frame extraction whose offset is at least this.
        pub fail_from_offset: Option<f64>,
        /// Report success without writing anything.
        pub silent: bool,
        pub delay: Duration,
        pub operations: Mutex<Vec<RecordedOp>>,
    }

    #[derive(Debug, Clone, PartialEq)]
    pub enum RecordedOp {
        Probe(String),
        ExtractFrame {
            output: String,
            offset: Option<f64>,
            edge: u32,
            format: FrameFormat,
        },
        BuildPalette { count: u32 },
        ApplyPalette { output: String },
    }

    impl Default for MockTools {
        fn default() -> Self {
            Self {
                duration: Some(9.0),
                fail_from_offset: None,
                silent: false,
                delay: Duration::ZERO,
                operations: Mutex::new(Vec::new()),
            }
        }
    }

    impl MockTools {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn with_duration(duration: Option<f64>) -> Self {
            Self {
                duration,
                ..Self::default()
            }
        }

        pub fn get_operations(&self) -> Vec<RecordedOp> {
            self.operations.lock().unwrap().clone()
        }

        pub fn conversions(&self) -> usize {
            self.get_operations()
                .iter()
                .filter(|op| !matches!(op, RecordedOp::Probe(_)))
                .count()
        }

        fn record(&self, op: RecordedOp) {
            self.operations.lock().unwrap().push(op);
        }

        fn write(&self, path: &Path, bytes: &[u8]) -> Result<(), ToolError> {
            std::thread::sleep(self.delay);
            if !self.silent {
                std::fs::write(path, bytes).map_err(|source| ToolError::Spawn {
                    program: "mock".into(),
                    source,
                })?;
            }
            Ok(())
        }
    }

    impl MediaTools for MockTools {
        fn probe(&self, source: &Path) -> Result<Option<f64>, ToolError> {
            self.record(RecordedOp::Probe(source.to_string_lossy().to_string()));
            Ok(self.duration)
        }

        fn extract_frame(&self, request: &FrameRequest) -> Result<(), ToolError> {
            self.record(RecordedOp::ExtractFrame {
                output: request.output.to_string_lossy().to_string(),
                offset: request.offset,
                edge: request.edge,
                format: request.format,
            });
            let failing = match (self.fail_from_offset, request.offset) {
                (Some(limit), Some(offset)) => offset >= limit,
                _ => false,
            };
            if failing {
                return Err(ToolError::Failed {
                    program: "mock".into(),
                    code: Some(1),
                });
            }
            self.write(&request.output, b"frame")
        }

        fn build_palette(&self, frames: &FrameSequence, palette: &Path) -> Result<(), ToolError> {
            self.record(RecordedOp::BuildPalette {
                count: frames.count,
            });
            self.write(palette, b"palette")
        }

        fn apply_palette(
            &self,
            _frames: &FrameSequence,
            _palette: &Path,
            output: &Path,
        ) -> Result<(), ToolError> {
            self.record(RecordedOp::ApplyPalette {
                output: output.to_string_lossy().to_string(),
            });
            self.write(output, b"GIF89a")
        }
    }

    fn tools(niceness: i32) -> FfmpegTools {
        FfmpegTools {
            ffmpeg: "/usr/bin/ffmpeg".into(),
            ffprobe: "/usr/bin/ffprobe".into(),
            nice: "/usr/bin/nice".into(),
            niceness,
        }
    }

    fn strings(argv: Vec<OsString>) -> Vec<String> {
        argv.into_iter()
            .map(|a| a.to_string_lossy().into_owned())
            .collect()
    }

    #[test]
    fn probe_args_with_nice_prefix() {
        let argv = strings(tools(10).probe_args(Path::new("/m/clip.mp4")));
        assert_eq!(
            argv,
            [
                "/usr/bin/nice",
                "-n",
                "10",
                "/usr/bin/ffprobe",
                "-v",
                "quiet",
                "-print_format",
                "json",
                "-show_format",
                "-i",
                "/m/clip.mp4"
            ]
        );
    }

    #[test]
    fn zero_niceness_runs_directly() {
        let argv = strings(tools(0).probe_args(Path::new("/m/clip.mp4")));
        assert_eq!(argv[0], "/usr/bin/ffprobe");
    }

    #[test]
    fn static_frame_args_seek_before_input() {
        let filter = scale_filter(256);
        let argv = strings(tools(0).frame_args(&FrameRequest {
            source: "/m/clip.mp4".into(),
            output: "/c/x.jpg".into(),
            offset: Some(4.5),
            edge: 256,
            format: FrameFormat::Jpeg,
        }));
        assert_eq!(
            argv,
            [
                "/usr/bin/ffmpeg",
                "-ss",
                "4.5",
                "-i",
                "/m/clip.mp4",
                "-y",
                "-vf",
                filter.as_str(),
                "-vframes",
                "1",
                "-vcodec",
                "mjpeg",
                "-an",
                "/c/x.jpg"
            ]
        );
    }

    #[test]
    fn image_frame_args_skip_seek() {
        let argv = strings(tools(0).frame_args(&FrameRequest {
            source: "/m/a.png".into(),
            output: "/c/x.jpg".into(),
            offset: None,
            edge: 128,
            format: FrameFormat::Jpeg,
        }));
        assert!(!argv.contains(&"-ss".to_string()));
    }

    #[test]
    fn palette_and_apply_args_share_input() {
        let frames = FrameSequence::new(Path::new("/t"), 5, 2.0);
        let palette = strings(tools(0).palette_args(&frames, Path::new("/t/palette.png")));
        assert_eq!(
            palette,
            [
                "/usr/bin/ffmpeg",
                "-f",
                "image2",
                "-framerate",
                "2",
                "-i",
                "/t/frame%d.png",
                "-y",
                "-vf",
                "palettegen",
                "/t/palette.png"
            ]
        );
        let apply = strings(tools(0).apply_args(
            &frames,
            Path::new("/t/palette.png"),
            Path::new("/c/x.gif"),
        ));
        assert_eq!(&apply[..7], &palette[..7]);
        assert_eq!(
            &apply[7..],
            ["-i", "/t/palette.png", "-y", "-lavfi", "paletteuse", "/c/x.gif"]
        );
    }

    #[test]
    fn scale_filter_escapes_commas() {
        assert_eq!(
            scale_filter(128),
            "format=rgb24,scale=iw*min(128/iw\\,128/ih):ih*min(128/iw\\,128/ih)"
        );
    }

    #[test]
    fn parse_probe_duration() {
        let json = br#"{"format": {"filename": "a.mp4", "duration": "12.480000"}}"#;
        assert_eq!(parse_probe_output(json).unwrap(), Some(12.48));
    }

    #[test]
    fn parse_probe_missing_or_zero_duration() {
        assert_eq!(parse_probe_output(br#"{"format": {}}"#).unwrap(), None);
        assert_eq!(parse_probe_output(br#"{}"#).unwrap(), None);
        assert_eq!(
            parse_probe_output(br#"{"format": {"duration": "N/A"}}"#).unwrap(),
            None
        );
        assert_eq!(
            parse_probe_output(br#"{"format": {"duration": "0.000000"}}"#).unwrap(),
            None
        );
    }

    #[test]
    fn parse_probe_garbage_is_error() {
        assert!(matches!(
            parse_probe_output(b"not json"),
            Err(ToolError::Probe(_))
        ));
    }

    #[test]
    fn missing_binary_is_spawn_error() {
        let tools = FfmpegTools {
            ffmpeg: "/nonexistent/ffmpeg".into(),
            ffprobe: "/nonexistent/ffprobe".into(),
            nice: "/nonexistent/nice".into(),
            niceness: 0,
        };
        assert!(matches!(
            tools.probe(Path::new("/m/clip.mp4")),
            Err(ToolError::Spawn { .. })
        ));
    }

    #[test]
    fn mock_records_frames() {
        let mock = MockTools::new();
        let tmp = tempfile::TempDir::new().unwrap();
        let out = tmp.path().join("f.png");
        mock.extract_frame(&FrameRequest {
            source: "/m/clip.mp4".into(),
            output: out.clone(),
            offset: Some(1.0),
            edge: 128,
            format: FrameFormat::Png,
        })
        .unwrap();
        assert!(out.exists());
        assert!(matches!(
            &mock.get_operations()[0],
            RecordedOp::ExtractFrame { edge: 128, format: FrameFormat::Png, .. }
        ));
    }
}
