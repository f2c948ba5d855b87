//! URL and path helpers for WebDAV requests and responses.

use percent_encoding::{percent_decode_str, utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use url::Url;

use cloudstorage_common::{Error, Result};

/// Characters `encodeURIComponent` leaves alone.
const COMPONENT: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'!')
    .remove(b'~')
    .remove(b'*')
    .remove(b'\'')
    .remove(b'(')
    .remove(b')');

/// Join URL or path segments with single slashes.
///
/// The leading slash of the first segment and the trailing slash of the last
/// segment are kept; redundant slashes at the boundaries are dropped.
pub fn join_paths(parts: &[&str]) -> String {
    let last = parts.len().saturating_sub(1);
    parts
        .iter()
        .enumerate()
        .map(|(i, part)| {
            let part = part.trim();
            if i == 0 {
                part.trim_end_matches('/')
            } else if i == last {
                part.trim_start_matches('/')
            } else {
                part.trim_matches('/')
            }
        })
        .collect::<Vec<_>>()
        .join("/")
}

/// Join a base URL and a path.
pub fn join_url(base_url: &str, path: &str) -> String {
    join_paths(&[base_url, path])
}

/// Percent-encode every segment of a path, keeping the separators.
pub fn encode_path(path: &str) -> String {
    path.split('/')
        .map(|segment| utf8_percent_encode(segment, COMPONENT).to_string())
        .collect::<Vec<_>>()
        .join("/")
}

/// Decode a percent-encoded path. Invalid UTF-8 is replaced.
pub fn decode_path(path: &str) -> String {
    percent_decode_str(path).decode_utf8_lossy().into_owned()
}

/// Ensure a leading slash and drop a single trailing slash (except for `/`).
pub fn normalise_path(path: &str) -> String {
    let mut normalised = if path.starts_with('/') {
        path.to_string()
    } else {
        format!("/{}", path)
    };
    if normalised.len() > 1 && normalised.ends_with('/') {
        normalised.pop();
    }
    normalised
}

/// Resolve `.` and `..` segments of an absolute path.
fn resolve_segments(path: &str) -> Vec<&str> {
    let mut segments: Vec<&str> = Vec::new();
    for segment in path.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                segments.pop();
            }
            other => segments.push(other),
        }
    }
    segments
}

/// Path of `to` relative to `from`, both treated as absolute paths.
pub fn relative_path(from: &str, to: &str) -> String {
    let from = resolve_segments(from);
    let to = resolve_segments(to);

    let common = from
        .iter()
        .zip(to.iter())
        .take_while(|(a, b)| a == b)
        .count();

    std::iter::repeat("..")
        .take(from.len() - common)
        .chain(to[common..].iter().copied())
        .collect::<Vec<_>>()
        .join("/")
}

/// Last segment of a path, ignoring trailing slashes.
pub fn basename(path: &str) -> &str {
    let trimmed = path.trim_end_matches('/');
    trimmed.rsplit('/').next().unwrap_or(trimmed)
}

/// Strip scheme and host from an `href`.
pub fn normalise_href(href: &str) -> &str {
    for scheme in ["http://", "https://"] {
        if let Some(rest) = href.strip_prefix(scheme) {
            return rest.find('/').map_or("", |i| &rest[i..]);
        }
    }
    href
}

/// Normalised path component of a URL.
///
/// # Errors
/// - `InvalidInput` if `url` is not an absolute URL
pub fn extract_url_path(url: &str) -> Result<String> {
    let parsed =
        Url::parse(url).map_err(|e| Error::InvalidInput(format!("Invalid URL {}: {}", url, e)))?;
    let path = match parsed.path() {
        "" => "/",
        path => path,
    };
    Ok(normalise_path(path))
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_join_url() {
        assert_eq!(
            join_url("https://host/webdav", "Documents/todo"),
            "https://host/webdav/Documents/todo"
        );
        assert_eq!(
            join_url("https://host/webdav/", "/Documents/todo"),
            "https://host/webdav/Documents/todo"
        );
        assert_eq!(
            join_url("https://host/webdav", "Documents/todo/"),
            "https://host/webdav/Documents/todo/"
        );
    }

    #[test]
    fn test_join_paths_middle_segments() {
        assert_eq!(join_paths(&["/a/", "/b/", "/c/"]), "/a/b/c/");
        assert_eq!(join_paths(&["/remote.php/webdav", "/"]), "/remote.php/webdav/");
        assert_eq!(join_paths(&["/", "/"]), "/");
    }

    #[test]
    fn test_encode_path() {
        assert_eq!(encode_path("/Documents/my todo.txt"), "/Documents/my%20todo.txt");
        assert_eq!(encode_path("/a&b/c#d.txt"), "/a%26b/c%23d.txt");
        assert_eq!(encode_path("/(x)!~*'.txt"), "/(x)!~*'.txt");
        assert_eq!(encode_path("/äöü.txt"), "/%C3%A4%C3%B6%C3%BC.txt");
    }

    #[test]
    fn test_decode_path() {
        assert_eq!(decode_path("/my%20todo.txt"), "/my todo.txt");
        assert_eq!(decode_path("/%C3%A4.txt"), "/ä.txt");
    }

    #[test]
    fn test_normalise_path() {
        assert_eq!(normalise_path("Documents"), "/Documents");
        assert_eq!(normalise_path("/Documents/"), "/Documents");
        assert_eq!(normalise_path("/"), "/");
        assert_eq!(normalise_path(""), "/");
    }

    #[test]
    fn test_relative_path() {
        assert_eq!(
            relative_path("/remote.php/webdav/", "/remote.php/webdav/Documents/todo.txt"),
            "Documents/todo.txt"
        );
        assert_eq!(relative_path("/remote.php/webdav/", "/remote.php/webdav/"), "");
        assert_eq!(relative_path("/a/b", "/a/c/d"), "../c/d");
        assert_eq!(relative_path("/a/./b/../b", "/a/b/x"), "x");
    }

    #[test]
    fn test_basename() {
        assert_eq!(basename("/Documents/todo.txt"), "todo.txt");
        assert_eq!(basename("/Documents/"), "Documents");
        assert_eq!(basename("todo.txt"), "todo.txt");
        assert_eq!(basename("/"), "");
    }

    #[test]
    fn test_normalise_href() {
        assert_eq!(
            normalise_href("https://cloud.example.com/remote.php/webdav/todo.txt"),
            "/remote.php/webdav/todo.txt"
        );
        assert_eq!(normalise_href("http://localhost:8080"), "");
        assert_eq!(normalise_href("/webdav/todo.txt"), "/webdav/todo.txt");
    }

    #[test]
    fn test_extract_url_path() {
        assert_eq!(
            extract_url_path("https://cloud.example.com/remote.php/webdav/").unwrap(),
            "/remote.php/webdav"
        );
        assert_eq!(extract_url_path("https://cloud.example.com").unwrap(), "/");
        assert!(extract_url_path("not a url").is_err());
    }

    proptest! {
        #[test]
        fn prop_join_url_ignores_boundary_slashes(
            segment in "[a-zA-Z0-9]{1,8}(/[a-zA-Z0-9]{1,8}){0,3}",
            base_slashes in 0usize..3,
            path_slashes in 0usize..3,
        ) {
            let base = format!("https://host/webdav{}", "/".repeat(base_slashes));
            let path = format!("{}{}", "/".repeat(path_slashes), segment);
            prop_assert_eq!(
                join_url(&base, &path),
                format!("https://host/webdav/{}", segment)
            );
        }
    }
}
