//! Cache file naming.
//!
//! The cache is **content-addressed** over the request, not the file
//! contents: the name is a digest of `(salt, scale, variant, source path)`.
//! Identical requests always map to the same file, and changing any input
//! maps to a different one, so an entry never has to be rewritten.
//!
//! ```text
//! sha256(salt \0 "@2x" \0 "static" \0 /abs/source/path)  →  base64url  →  "Qm9v….jpg"
//! ```

use crate::paths::path_to_bytes;
use base64::Engine as _;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use sha2::{Digest, Sha256};
use std::fmt;
use std::path::Path;

/// Pixel-density multiplier of a thumbnail, 1 through 4.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Scale(u32);

impl Scale {
    pub const ONE: Scale = Scale(1);
    pub const MAX: u32 = 4;

    pub fn new(value: u32) -> Option<Self> {
        (1..=Self::MAX).contains(&value).then_some(Self(value))
    }

    pub fn get(self) -> u32 {
        self.0
    }

    /// Parse the part after `@` in a thumbnail parameter.
    ///
    /// No suffix means 1x; only `2x`, `3x` and `4x` are accepted otherwise.
    pub fn from_suffix(suffix: Option<&str>) -> Option<Self> {
        match suffix {
            None => Some(Self::ONE),
            Some("2x") => Some(Self(2)),
            Some("3x") => Some(Self(3)),
            Some("4x") => Some(Self(4)),
            Some(_) => None,
        }
    }
}

impl Default for Scale {
    fn default() -> Self {
        Self::ONE
    }
}

impl fmt::Display for Scale {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "@{}x", self.0)
    }
}

/// Split a thumbnail parameter like `"k3Xa9@2x"` into id and scale.
///
/// Returns `None` for an unknown scale suffix. The id is not validated.
pub fn parse_parameter(parameter: &str) -> Option<(&str, Scale)> {
    let (id, suffix) = match parameter.split_once('@') {
        Some((id, suffix)) => (id, Some(suffix)),
        None => (parameter, None),
    };
    Scale::from_suffix(suffix).map(|scale| (id, scale))
}

/// Extension of the cache file for a variant.
pub fn variant_extension(animated: bool) -> &'static str {
    if animated { "gif" } else { "jpg" }
}

/// Name of the cache file for a request. `source` should be absolute.
pub fn cache_filename(salt: &[u8], scale: Scale, animated: bool, source: &Path) -> String {
    let mut hasher = Sha256::new();
    hasher.update(salt);
    hasher.update(b"\0");
    hasher.update(scale.to_string().as_bytes());
    hasher.update(b"\0");
    hasher.update(if animated {
        &b"animated"[..]
    } else {
        &b"static"[..]
    });
    hasher.update(b"\0");
    hasher.update(path_to_bytes(source));
    let hash = URL_SAFE_NO_PAD.encode(hasher.finalize());
    format!("{hash}.{}", variant_extension(animated))
}
