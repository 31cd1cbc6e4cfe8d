//! Server configuration.
//!
//! Handles loading, validating, and merging the `archive-share.toml` file.
//! User values are merged over the stock defaults, so a config file only
//! needs the keys it wants to change.
//!
//! ## Configuration Options
//!
//! ```toml
//! # All options are optional - defaults shown below
//!
//! [ids]
//! seed = 12345              # Seeds the alphabet/swizzle permutation. Never change
//! symbols = "0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz"
//! bits_state = 32           # Bits carrying the allocation counter
//! bits_noise = 31           # Random bits mixed into every id
//!
//! [store]
//! database_directory = "/var/db/archive-share"
//!
//! [links]
//! download_delay = 3600     # Seconds a freshly listed link stays valid
//!
//! [thumbnails]
//! cache_directory = "/var/cache/archive-share/thumbnail"
//! filename_salt = "archive-share"
//! concurrent = 2            # Conversions per server process
//! nice = 10                 # Niceness for ffmpeg/ffprobe (0 = don't renice)
//! size = 128                # Edge length at 1x, in pixels
//! animated_framecount = 5
//! animated_framerate = 2.0
//! expire_days = 30          # Cache files older than this are swept
//!
//! [media]
//! image_extensions = [".bmp", ".gif", ".jpe", ".jpg", ".jpeg", ".png"]
//! video_extensions = [".3gp", ".avi", ".mkv", ".mov", ".mp4", ".webm", ...]
//!
//! [tools]
//! ffmpeg = "/usr/bin/ffmpeg"
//! ffprobe = "/usr/bin/ffprobe"
//! nice = "/usr/bin/nice"
//!
//! [mounts]
//! example = "/mnt/other"    # Mount name -> exported root directory
//! ```
//!
//! Unknown keys are rejected to catch typos early.

use crate::ids::IdScheme;
use crate::thumbnail::{FfmpegTools, ThumbnailSettings};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// File name looked up next to the binary's working directory when no
/// `--config` is given.
pub const DEFAULT_CONFIG_FILE: &str = "archive-share.toml";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("TOML serialize error: {0}")]
    Serialize(#[from] toml::ser::Error),
    #[error("Config validation error: {0}")]
    Validation(String),
}

/// Top-level configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub ids: IdsConfig,
    pub store: StoreConfig,
    pub links: LinksConfig,
    pub thumbnails: ThumbnailsConfig,
    pub media: MediaConfig,
    pub tools: ToolsConfig,
    /// Exported directories, keyed by the mount name stored in link rows.
    pub mounts: BTreeMap<String, PathBuf>,
}

/// Parameters of the link id scheme.
///
/// Changing any of these after links were issued changes the meaning of the
/// stored counter, so treat them as fixed for the lifetime of a database.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct IdsConfig {
    pub seed: u64,
    pub symbols: String,
    pub bits_state: u32,
    pub bits_noise: u32,
}

impl Default for IdsConfig {
    fn default() -> Self {
        Self {
            seed: 12345,
            symbols: "0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz".into(),
            bits_state: 32,
            bits_noise: 31,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct StoreConfig {
    pub database_directory: PathBuf,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            database_directory: PathBuf::from("/var/db/archive-share"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LinksConfig {
    /// Seconds a freshly issued link stays valid.
    pub download_delay: i64,
}

impl Default for LinksConfig {
    fn default() -> Self {
        Self {
            download_delay: 3600,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ThumbnailsConfig {
    pub cache_directory: PathBuf,
    pub filename_salt: String,
    /// Maximum concurrent conversions in one process.
    pub concurrent: usize,
    /// Niceness passed to `nice -n`; 0 runs the tools directly.
    pub nice: i32,
    pub size: u32,
    pub animated_framecount: u32,
    pub animated_framerate: f64,
    pub expire_days: u64,
}

impl Default for ThumbnailsConfig {
    fn default() -> Self {
        Self {
            cache_directory: PathBuf::from("/var/cache/archive-share/thumbnail"),
            filename_salt: "archive-share".into(),
            concurrent: 2,
            nice: 10,
            size: 128,
            animated_framecount: 5,
            animated_framerate: 2.0,
            expire_days: 30,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct MediaConfig {
    pub image_extensions: Vec<String>,
    pub video_extensions: Vec<String>,
}

impl Default for MediaConfig {
    fn default() -> Self {
        let owned = |exts: &[&str]| exts.iter().map(|e| e.to_string()).collect();
        Self {
            image_extensions: owned(&[".bmp", ".gif", ".jpe", ".jpg", ".jpeg", ".png"]),
            video_extensions: owned(&[
                ".3gp", ".asf", ".avi", ".f4v", ".flv", ".m4v", ".mkv", ".mov", ".mpg", ".mpeg",
                ".mp4", ".mts", ".ts", ".webm", ".wmv",
            ]),
        }
    }
}

/// Locations of the external media tools.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ToolsConfig {
    pub ffmpeg: PathBuf,
    pub ffprobe: PathBuf,
    pub nice: PathBuf,
}

impl Default for ToolsConfig {
    fn default() -> Self {
        let prefix = if cfg!(any(target_os = "freebsd", target_os = "openbsd")) {
            "/usr/local/bin"
        } else {
            "/usr/bin"
        };
        Self {
            ffmpeg: Path::new(prefix).join("ffmpeg"),
            ffprobe: Path::new(prefix).join("ffprobe"),
            nice: PathBuf::from("/usr/bin/nice"),
        }
    }
}

impl Config {
    /// Validate config values are within acceptable ranges.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.id_scheme()
            .map_err(|e| ConfigError::Validation(format!("ids: {e}")))?;

        let t = &self.thumbnails;
        if t.concurrent == 0 {
            return Err(ConfigError::Validation(
                "thumbnails.concurrent must be at least 1".into(),
            ));
        }
        if t.size == 0 {
            return Err(ConfigError::Validation(
                "thumbnails.size must be non-zero".into(),
            ));
        }
        if t.animated_framecount == 0 {
            return Err(ConfigError::Validation(
                "thumbnails.animated_framecount must be at least 1".into(),
            ));
        }
        if !(t.animated_framerate.is_finite() && t.animated_framerate > 0.0) {
            return Err(ConfigError::Validation(
                "thumbnails.animated_framerate must be a positive number".into(),
            ));
        }
        if t.filename_salt.is_empty() {
            return Err(ConfigError::Validation(
                "thumbnails.filename_salt must not be empty".into(),
            ));
        }
        if self.links.download_delay <= 0 {
            return Err(ConfigError::Validation(
                "links.download_delay must be positive".into(),
            ));
        }
        for ext in self
            .media
            .image_extensions
            .iter()
            .chain(&self.media.video_extensions)
        {
            if !ext.starts_with('.') || ext.len() < 2 {
                return Err(ConfigError::Validation(format!(
                    "media extension {ext:?} must look like \".ext\""
                )));
            }
        }
        Ok(())
    }

    /// Lowercase extensions so lookups can compare directly.
    fn normalize(&mut self) {
        for ext in self
            .media
            .image_extensions
            .iter_mut()
            .chain(self.media.video_extensions.iter_mut())
        {
            *ext = ext.to_lowercase();
        }
    }

    /// Build the immutable id scheme from the `[ids]` section.
    pub fn id_scheme(&self) -> Result<IdScheme, crate::ids::SchemeError> {
        IdScheme::new(
            self.ids.seed,
            &self.ids.symbols,
            self.ids.bits_state,
            self.ids.bits_noise,
        )
    }

    /// Settings for [`ThumbnailCache`](crate::thumbnail::ThumbnailCache).
    pub fn thumbnail_settings(&self) -> ThumbnailSettings {
        let t = &self.thumbnails;
        ThumbnailSettings {
            cache_directory: t.cache_directory.clone(),
            salt: t.filename_salt.as_bytes().to_vec(),
            concurrent: t.concurrent,
            size: t.size,
            animated_framecount: t.animated_framecount,
            animated_framerate: t.animated_framerate,
            image_extensions: self.media.image_extensions.iter().cloned().collect(),
            video_extensions: self.media.video_extensions.iter().cloned().collect(),
        }
    }

    /// ffmpeg-backed media tools as configured under `[tools]`.
    pub fn ffmpeg_tools(&self) -> FfmpegTools {
        FfmpegTools {
            ffmpeg: self.tools.ffmpeg.clone(),
            ffprobe: self.tools.ffprobe.clone(),
            nice: self.tools.nice.clone(),
            niceness: self.thumbnails.nice,
        }
    }

    /// Age after which cache files are swept.
    pub fn cache_retention(&self) -> Duration {
        Duration::from_secs(self.thumbnails.expire_days.saturating_mul(24 * 60 * 60))
    }
}

// =============================================================================
// Config loading, merging, and validation
// =============================================================================

/// Returns the stock default config as a `toml::Value::Table`.
pub fn stock_defaults_value() -> Result<toml::Value, ConfigError> {
    Ok(toml::Value::try_from(Config::default())?)
}

/// Recursively merge `overlay` on top of `base`.
///
/// - Tables are merged key-by-key (overlay keys override base keys).
/// - Non-table values in overlay replace base values entirely.
/// - Keys in base that are not in overlay are preserved.
pub fn merge_toml(base: toml::Value, overlay: toml::Value) -> toml::Value {
    match (base, overlay) {
        (toml::Value::Table(mut base_table), toml::Value::Table(overlay_table)) => {
            for (key, overlay_val) in overlay_table {
                let merged = match base_table.remove(&key) {
                    Some(base_val) => merge_toml(base_val, overlay_val),
                    None => overlay_val,
                };
                base_table.insert(key, merged);
            }
            toml::Value::Table(base_table)
        }
        (_, overlay) => overlay,
    }
}

/// Merge an optional overlay onto the stock defaults, then deserialize,
/// normalize and validate.
pub fn resolve_config(overlay: Option<toml::Value>) -> Result<Config, ConfigError> {
    let base = stock_defaults_value()?;
    let merged = match overlay {
        Some(ov) => merge_toml(base, ov),
        None => base,
    };
    let mut config: Config = merged.try_into()?;
    config.normalize();
    config.validate()?;
    Ok(config)
}

/// Load config from a TOML file.
///
/// A missing file yields the stock defaults; a file that exists but is not
/// valid TOML, has unknown keys, or fails validation is an error.
pub fn load_config(path: &Path) -> Result<Config, ConfigError> {
    if !path.exists() {
        return resolve_config(None);
    }
    let content = fs::read_to_string(path)?;
    let value: toml::Value = toml::from_str(&content)?;
    resolve_config(Some(value))
}

/// Returns a fully-commented stock config file with all keys and explanations.
///
/// Used by the `gen-config` CLI command.
pub fn stock_config_toml() -> &'static str {
    r##"# archive-share configuration
# ==========================
# All settings are optional. Remove or comment out any you don't need.
# Values shown below are the defaults.
# Unknown keys will cause an error.

# ---------------------------------------------------------------------------
# Link ids
# ---------------------------------------------------------------------------
# The seed, symbols and bit widths fix how the internal counter maps onto
# public ids. Pick them once, before the first link is issued.
[ids]
seed = 12345
symbols = "0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz"
# Bits carrying the counter: at most 2^bits_state links can ever be issued.
bits_state = 32
# Random bits per id. bits_state + bits_noise must not exceed 63.
bits_noise = 31

[store]
# Holds state.sqlite. Every server process must point at the same directory.
database_directory = "/var/db/archive-share"

[links]
# Seconds a freshly listed link stays valid.
download_delay = 3600

[thumbnails]
# Flat directory of <hash>.jpg / <hash>.gif files.
cache_directory = "/var/cache/archive-share/thumbnail"
# Mixed into every cache file name. Changing it orphans the whole cache.
filename_salt = "archive-share"
# Maximum concurrent conversions per server process.
concurrent = 2
# Niceness for ffmpeg/ffprobe; 0 runs them at normal priority.
nice = 10
# Edge length at 1x, in pixels. 2x, 3x and 4x multiply it.
size = 128
# Frames sampled for animated video previews, and their playback rate.
animated_framecount = 5
animated_framerate = 2.0
# Cache files older than this many days are removed by `sweep --cache`.
expire_days = 30

[media]
image_extensions = [".bmp", ".gif", ".jpe", ".jpg", ".jpeg", ".png"]
video_extensions = [".3gp", ".asf", ".avi", ".f4v", ".flv", ".m4v", ".mkv", ".mov", ".mpg", ".mpeg", ".mp4", ".mts", ".ts", ".webm", ".wmv"]

[tools]
ffmpeg = "/usr/bin/ffmpeg"
ffprobe = "/usr/bin/ffprobe"
nice = "/usr/bin/nice"

# Exported directories: mount name = root path.
[mounts]
# example = "/mnt/other"
"##
}
