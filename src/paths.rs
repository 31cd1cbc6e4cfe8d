//! Byte-preserving path conversions.
//!
//! Exported directories routinely contain names that are not valid UTF-8
//! (old Windows shares, camera dumps). Both the store and the thumbnail cache
//! key need the exact bytes of a path, so they go through these helpers
//! instead of `to_string_lossy`.

use std::path::{Path, PathBuf};

/// Raw bytes of a path. Lossless on Unix.
#[cfg(unix)]
pub fn path_to_bytes(path: &Path) -> Vec<u8> {
    use std::os::unix::ffi::OsStrExt;
    path.as_os_str().as_bytes().to_vec()
}

#[cfg(not(unix))]
pub fn path_to_bytes(path: &Path) -> Vec<u8> {
    path.to_string_lossy().into_owned().into_bytes()
}

/// Rebuild a path from bytes produced by [`path_to_bytes`].
#[cfg(unix)]
pub fn path_from_bytes(bytes: Vec<u8>) -> PathBuf {
    use std::ffi::OsString;
    use std::os::unix::ffi::OsStringExt;
    PathBuf::from(OsString::from_vec(bytes))
}

#[cfg(not(unix))]
pub fn path_from_bytes(bytes: Vec<u8>) -> PathBuf {
    PathBuf::from(String::from_utf8_lossy(&bytes).into_owned())
}

/// Lowercased extension including the leading dot, e.g. `".mp4"`.
pub fn dotted_extension(path: &Path) -> Option<String> {
    path.extension()
        .map(|ext| format!(".{}", ext.to_string_lossy().to_lowercase()))
}
