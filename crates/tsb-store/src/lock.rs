use crate::StoreError;
use fs2::FileExt;
use std::fs::File;
use std::path::{Path, PathBuf};

/// Exclusive advisory lock on a store location directory.
///
/// Held for the lifetime of a [`Store`](crate::Store). The lock belongs to the
/// open directory handle, so it is released on drop and also when the owning
/// process dies, however abruptly.
#[derive(Debug)]
pub struct LocationLock {
    dir: File,
    location: PathBuf,
}

impl LocationLock {
    /// Take the lock without blocking.
    ///
    /// Fails with [`StoreError::LocationLocked`] if another store instance,
    /// in this process or any other, already holds it. Not worth retrying.
    pub fn acquire(location: &Path) -> Result<Self, StoreError> {
        let dir = File::open(location).map_err(|source| StoreError::LockOpen {
            path: location.to_path_buf(),
            source,
        })?;

        dir.try_lock_exclusive()
            .map_err(|_| StoreError::LocationLocked(location.to_path_buf()))?;

        Ok(Self {
            dir,
            location: location.to_path_buf(),
        })
    }

    #[inline]
    pub fn location(&self) -> &Path {
        &self.location
    }
}

impl Drop for LocationLock {
    fn drop(&mut self) {
        let _ = self.dir.unlock();
    }
}
