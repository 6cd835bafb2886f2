//! A [`SegmentFs`] for tests that need the filesystem to misbehave.
//!
//! Writes and deletions still happen on the host; `MockFs` only decides when
//! they should fail, what capacity is reported, and when the flusher may
//! delete a generation.

use crate::backend::{HostFs, SegmentFs};
use std::io;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Condvar, Mutex, PoisonError};

/// Passed to the `fail_*` methods to make every subsequent call fail.
pub const ALWAYS: usize = usize::MAX;

#[derive(Debug)]
enum Capacity {
    Host,
    Fixed(u64),
    Unavailable,
}

#[derive(Debug)]
pub struct MockFs {
    host: HostFs,
    capacity: Capacity,
    no_space_writes: AtomicUsize,
    failing_writes: AtomicUsize,
    failing_removals: AtomicUsize,
    write_attempts: AtomicUsize,
    removed_dirs: AtomicUsize,
    deletions_open: Mutex<bool>,
    gate: Condvar,
}

impl Default for MockFs {
    fn default() -> Self {
        Self {
            host: HostFs,
            capacity: Capacity::Host,
            no_space_writes: AtomicUsize::new(0),
            failing_writes: AtomicUsize::new(0),
            failing_removals: AtomicUsize::new(0),
            write_attempts: AtomicUsize::new(0),
            removed_dirs: AtomicUsize::new(0),
            deletions_open: Mutex::new(true),
            gate: Condvar::new(),
        }
    }
}

impl MockFs {
    pub fn new() -> Self {
        Self::default()
    }

    /// Report `bytes` as the filesystem size instead of asking the host.
    #[must_use]
    pub fn with_capacity(mut self, bytes: u64) -> Self {
        self.capacity = Capacity::Fixed(bytes);
        self
    }

    /// Make the capacity query fail.
    #[must_use]
    pub fn with_capacity_unavailable(mut self) -> Self {
        self.capacity = Capacity::Unavailable;
        self
    }

    /// The next `count` writes store half of their data, then fail with ENOSPC.
    pub fn fail_writes_with_no_space(&self, count: usize) {
        self.no_space_writes.store(count, Ordering::SeqCst);
    }

    /// The next `count` writes store half of their data, then fail with EIO.
    pub fn fail_writes_with_io_error(&self, count: usize) {
        self.failing_writes.store(count, Ordering::SeqCst);
    }

    /// The next `count` segment removals fail with EACCES and leave the file.
    pub fn fail_removals(&self, count: usize) {
        self.failing_removals.store(count, Ordering::SeqCst);
    }

    pub fn write_attempts(&self) -> usize {
        self.write_attempts.load(Ordering::SeqCst)
    }

    /// Number of generation directories the flusher has removed.
    pub fn removed_dirs(&self) -> usize {
        self.removed_dirs.load(Ordering::SeqCst)
    }

    /// Block generation deletions until [`release_deletions`](Self::release_deletions).
    pub fn hold_deletions(&self) {
        *self
            .deletions_open
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = false;
    }

    pub fn release_deletions(&self) {
        *self
            .deletions_open
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = true;
        self.gate.notify_all();
    }

    fn wait_for_gate(&self) {
        let mut open = self
            .deletions_open
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        while !*open {
            open = self.gate.wait(open).unwrap_or_else(PoisonError::into_inner);
        }
    }
}

/// Consume one injected failure, if any are left.
fn take(counter: &AtomicUsize) -> bool {
    counter
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| match n {
            0 => None,
            ALWAYS => Some(ALWAYS),
            n => Some(n - 1),
        })
        .is_ok()
}

impl SegmentFs for MockFs {
    fn total_space(&self, path: &Path) -> io::Result<u64> {
        match self.capacity {
            Capacity::Host => self.host.total_space(path),
            Capacity::Fixed(bytes) => Ok(bytes),
            Capacity::Unavailable => Err(io::Error::other("capacity unavailable")),
        }
    }

    fn write_segment(&self, path: &Path, data: &[u8]) -> io::Result<()> {
        self.write_attempts.fetch_add(1, Ordering::SeqCst);

        let errno = if take(&self.failing_writes) {
            libc::EIO
        } else if take(&self.no_space_writes) {
            libc::ENOSPC
        } else {
            return self.host.write_segment(path, data);
        };
        self.host.write_segment(path, &data[..data.len() / 2])?;
        Err(io::Error::from_raw_os_error(errno))
    }

    fn remove_segment(&self, path: &Path) -> io::Result<()> {
        if take(&self.failing_removals) {
            return Err(io::Error::from_raw_os_error(libc::EACCES));
        }
        self.host.remove_segment(path)
    }

    fn remove_dir_all(&self, path: &Path) -> io::Result<u64> {
        self.wait_for_gate();
        let removed = self.host.remove_dir_all(path)?;
        self.removed_dirs.fetch_add(1, Ordering::SeqCst);
        Ok(removed)
    }
}
