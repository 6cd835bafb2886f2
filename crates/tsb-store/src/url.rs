//! Segment URL to relative path mapping.
//!
//! The scheme and `://` are dropped; everything after is used verbatim as a
//! path relative to the active generation directory. Apart from the
//! rejections below, any byte value 1-255 is allowed in a path segment.

use std::ffi::OsStr;
use std::os::unix::ffi::OsStrExt;
use std::path::Path;
use thiserror::Error;

const SCHEME_SEPARATOR: &[u8] = b"://";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum UrlError {
    #[error("url is empty")]
    Empty,
    #[error("url contains an embedded NUL byte")]
    EmbeddedNul,
    #[error("no file name in url")]
    MissingFilename,
    #[error("directory begins with a path separator")]
    AbsolutePath,
    #[error("directory contains a doubled path separator")]
    DoubledSeparator,
    #[error("path escapes the store through '..'")]
    ParentTraversal,
}

/// Strip a leading `scheme://` and validate what is left.
///
/// Returns the relative path the segment is stored under inside a generation
/// directory.
pub fn segment_path(url: &[u8]) -> Result<&Path, UrlError> {
    if url.is_empty() {
        return Err(UrlError::Empty);
    }
    if url.contains(&0) {
        return Err(UrlError::EmbeddedNul);
    }

    let rest = match find(url, SCHEME_SEPARATOR) {
        Some(pos) => &url[pos + SCHEME_SEPARATOR.len()..],
        None => url,
    };

    let (dir, file) = match rest.iter().rposition(|&b| b == b'/') {
        Some(pos) => (&rest[..=pos], &rest[pos + 1..]),
        None => (&rest[..0], rest),
    };

    if dir.first() == Some(&b'/') {
        return Err(UrlError::AbsolutePath);
    }
    if find(dir, b"//").is_some() {
        return Err(UrlError::DoubledSeparator);
    }
    if dir.split(|&b| b == b'/').any(|segment| segment == b"..") {
        return Err(UrlError::ParentTraversal);
    }
    if file.is_empty() {
        return Err(UrlError::MissingFilename);
    }
    if file == b"." || file == b".." {
        return Err(UrlError::ParentTraversal);
    }

    Ok(Path::new(OsStr::from_bytes(rest)))
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}
