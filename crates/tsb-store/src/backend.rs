use crate::layout::FILE_MODE;
use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::os::unix::fs::{OpenOptionsExt, PermissionsExt};
use std::path::Path;

/// Filesystem operations whose failures drive store behavior.
///
/// Existence checks, directory creation and reads go straight to `std::fs`. Implementations must be usable from the API threads and the
/// flusher thread at the same time.
pub trait SegmentFs: Send + Sync {
    /// Total size in bytes of the filesystem holding `path`.
    fn total_space(&self, path: &Path) -> io::Result<u64>;

    /// Create or truncate `path`, make it read/write for everyone and write
    /// `data` in full. An error may leave a partial file behind.
    fn write_segment(&self, path: &Path, data: &[u8]) -> io::Result<()>;

    /// Remove one segment file.
    fn remove_segment(&self, path: &Path) -> io::Result<()>;

    /// Remove a directory tree, returning the number of entries removed.
    /// A directory that does not exist removes nothing and is not an error.
    fn remove_dir_all(&self, path: &Path) -> io::Result<u64>;
}

/// [`SegmentFs`] backed by the host filesystem.
#[derive(Debug, Default, Clone, Copy)]
pub struct HostFs;

impl SegmentFs for HostFs {
    fn total_space(&self, path: &Path) -> io::Result<u64> {
        fs2::total_space(path)
    }

    fn write_segment(&self, path: &Path, data: &[u8]) -> io::Result<()> {
        // `File` does no buffering of its own; each segment goes out as
        // one pre-assembled buffer.
        let mut file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .mode(FILE_MODE)
            .open(path)?;
        // The umask applies to `mode` above, so set the final mode explicitly.
        file.set_permissions(fs::Permissions::from_mode(FILE_MODE))?;
        file.write_all(data)
    }

    fn remove_segment(&self, path: &Path) -> io::Result<()> {
        fs::remove_file(path)
    }

    fn remove_dir_all(&self, path: &Path) -> io::Result<u64> {
        let count = match count_entries(path) {
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(e),
        };
        match fs::remove_dir_all(path) {
            Ok(()) => Ok(count),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(0),
            Err(e) => Err(e),
        }
    }
}

/// Number of entries in the tree rooted at `path`, `path` included.
fn count_entries(path: &Path) -> io::Result<u64> {
    let meta = fs::symlink_metadata(path)?;
    if !meta.is_dir() {
        return Ok(1);
    }
    let mut count = 1;
    for entry in fs::read_dir(path)? {
        let entry = entry?;
        count += match count_entries(&entry.path()) {
            Ok(n) => n,
            // Raced with another deletion; nothing left to count.
            Err(e) if e.kind() == io::ErrorKind::NotFound => 0,
            Err(e) => return Err(e),
        };
    }
    Ok(count)
}

/// Whether an I/O error means the device is out of space.
#[inline]
pub fn is_no_space(err: &io::Error) -> bool {
    err.raw_os_error() == Some(libc::ENOSPC)
}
