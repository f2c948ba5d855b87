//! Content checksums and remote path helpers.

use sha2::{Digest, Sha256};

/// Create a stable content checksum (hex encoded SHA-256).
pub fn create_checksum(content: impl AsRef<[u8]>) -> String {
    hex::encode(Sha256::digest(content.as_ref()))
}

/// Get the last path segment. Works for `/` and `\` separators and for URLs.
pub fn get_filename(path: &str) -> &str {
    match path.rfind(['/', '\\']) {
        Some(idx) => &path[idx + 1..],
        None => path,
    }
}

/// Get the parent directory of a path, without trailing slash.
///
/// Returns `/` for top-level entries and for the root itself.
pub fn get_dirname(path: &str) -> String {
    let path = path.replace('\\', "/");
    let trimmed = path.trim_end_matches('/');

    let dirname = match trimmed.rfind('/') {
        Some(idx) => &trimmed[..idx],
        None => "",
    };

    if dirname.is_empty() {
        "/".to_string()
    } else {
        dirname.to_string()
    }
}
