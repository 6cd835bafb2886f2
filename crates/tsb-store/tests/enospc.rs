//! Disk-full behavior.
//!
//! The mock-backed tests hold the flusher's deletion of a generation to keep
//! the flush window open for as long as a test needs. The tmpfs tests mount a
//! tiny filesystem to trigger real ENOSPC conditions; they require root and
//! are ignored by default: `sudo -E cargo test --test enospc -- --ignored`

use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tsb_store::mock::ALWAYS;
use tsb_store::{Logger, MockFs, Status, Store, StoreConfig, BYTES_IN_MIB};

/// Releases held deletions on drop so a failing assertion cannot leave the
/// store's drop waiting on the flusher forever. Declare after the store.
struct ReleaseOnDrop(Arc<MockFs>);

impl Drop for ReleaseOnDrop {
    fn drop(&mut self) {
        self.0.release_deletions();
    }
}

fn open_store(dir: &Path, fs: &Arc<MockFs>) -> Store {
    let backend = Arc::clone(fs);
    Store::with_backend(&StoreConfig::new(dir, 0, u32::MAX), Logger::tracing_only(), backend)
        .unwrap()
}

fn wait_for_flusher(store: &Store) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while store.flush_generation() != store.active_generation() {
        assert!(Instant::now() < deadline, "flusher did not catch up");
        thread::sleep(Duration::from_millis(2));
    }
}

#[test]
fn no_space_during_flush_is_retried_until_it_clears() {
    let dir = tempfile::tempdir().unwrap();
    let fs = Arc::new(MockFs::new().with_capacity(BYTES_IN_MIB));
    fs.hold_deletions();
    let store = open_store(dir.path(), &fs);
    let _release = ReleaseOnDrop(Arc::clone(&fs));

    assert_ne!(store.flush_generation(), store.active_generation());
    fs.fail_writes_with_no_space(5);

    assert_eq!(store.write("h/a.ts", &[1; 1_000]), Status::Ok);
    assert_eq!(fs.write_attempts(), 6);
    assert_eq!(store.get_size("h/a.ts"), 1_000);
    assert_eq!(store.available(), BYTES_IN_MIB - 1_000);
}

#[test]
fn no_space_during_flush_times_out() {
    let dir = tempfile::tempdir().unwrap();
    let fs = Arc::new(MockFs::new().with_capacity(BYTES_IN_MIB));
    fs.hold_deletions();
    let store = open_store(dir.path(), &fs);
    let _release = ReleaseOnDrop(Arc::clone(&fs));

    fs.fail_writes_with_no_space(ALWAYS);
    let started = Instant::now();
    assert_eq!(store.write("h/a.ts", &[1; 1_000]), Status::NoSpace);

    assert!(started.elapsed() >= Duration::from_secs(5));
    assert!(fs.write_attempts() > 1);
    assert!(!dir.path().join("1/h/a.ts").exists(), "partial file left behind");
    assert_eq!(store.available(), BYTES_IN_MIB);
}

#[test]
fn no_space_outside_flush_is_reported_at_once() {
    let dir = tempfile::tempdir().unwrap();
    let fs = Arc::new(MockFs::new().with_capacity(BYTES_IN_MIB));
    let store = open_store(dir.path(), &fs);
    wait_for_flusher(&store);

    fs.fail_writes_with_no_space(1);
    assert_eq!(store.write("h/a.ts", &[1; 1_000]), Status::NoSpace);
    assert_eq!(fs.write_attempts(), 1);
    assert!(!dir.path().join("1/h/a.ts").exists(), "partial file left behind");
    assert_eq!(store.available(), BYTES_IN_MIB);

    assert_eq!(store.write("h/a.ts", &[1; 1_000]), Status::Ok);
}

#[test]
fn io_error_fails_without_retry_even_during_flush() {
    let dir = tempfile::tempdir().unwrap();
    let fs = Arc::new(MockFs::new().with_capacity(BYTES_IN_MIB));
    fs.hold_deletions();
    let store = open_store(dir.path(), &fs);
    let _release = ReleaseOnDrop(Arc::clone(&fs));

    fs.fail_writes_with_io_error(1);
    assert_eq!(store.write("h/a.ts", &[1; 1_000]), Status::Failed);
    assert_eq!(fs.write_attempts(), 1);
    assert!(!dir.path().join("1/h/a.ts").exists(), "partial file left behind");
    assert_eq!(store.get_size("h/a.ts"), 0);
    assert_eq!(store.available(), BYTES_IN_MIB);

    assert_eq!(store.write("h/a.ts", &[1; 1_000]), Status::Ok);
}

#[test]
fn flush_window_stays_open_until_deletion_finishes() {
    let dir = tempfile::tempdir().unwrap();
    let fs = Arc::new(MockFs::new().with_capacity(10_000));
    let store = open_store(dir.path(), &fs);
    wait_for_flusher(&store);
    assert_eq!(store.write("h/a.ts", &[1; 10_000]), Status::Ok);

    fs.hold_deletions();
    let release = ReleaseOnDrop(Arc::clone(&fs));
    store.flush();
    thread::sleep(Duration::from_millis(20));
    assert_eq!(store.flush_generation(), 1);
    assert_eq!(store.active_generation(), 2);
    assert!(dir.path().join("1/h/a.ts").exists());

    // Accounting already counts the old generation as gone.
    assert_eq!(store.write("h/b.ts", &[2; 10_000]), Status::Ok);

    drop(release);
    wait_for_flusher(&store);
    assert!(!dir.path().join("1").exists());
    assert_eq!(fs.removed_dirs(), 2);
}

/// Mount a tmpfs of the given size (in KB) at `path`.
/// Returns true if successful. Requires root.
fn mount_tiny_tmpfs(path: &Path, size_kb: u64) -> bool {
    std::fs::create_dir_all(path).unwrap();
    let status = Command::new("mount")
        .args(["-t", "tmpfs", "-o", &format!("size={size_kb}k"), "tmpfs"])
        .arg(path)
        .status();
    matches!(status, Ok(s) if s.success())
}

/// RAII guard that unmounts on drop.
struct TmpfsGuard {
    path: PathBuf,
}

impl TmpfsGuard {
    fn mount(path: &Path, size_kb: u64) -> Option<Self> {
        mount_tiny_tmpfs(path, size_kb).then(|| Self {
            path: path.to_path_buf(),
        })
    }
}

impl Drop for TmpfsGuard {
    fn drop(&mut self) {
        let _ = Command::new("umount").arg(&self.path).status();
    }
}

#[test]
#[ignore = "requires root for tmpfs mount"]
fn tmpfs_fills_up_without_partial_segments() {
    let base = tempfile::tempdir().unwrap();
    let mount_point = base.path().join("tiny");
    let _guard = TmpfsGuard::mount(&mount_point, 1024)
        .expect("failed to mount tmpfs, are you running as root?");
    let location = mount_point.join("tsb");

    let store = Store::new(&StoreConfig::new(&location, 0, 16), Logger::tracing_only()).unwrap();
    assert!(store.capacity() <= BYTES_IN_MIB);
    wait_for_flusher(&store);

    let segment = vec![0xABu8; 64 * 1024];
    let mut written = 0;
    for i in 0..64 {
        match store.write(format!("h/{i}.ts"), &segment) {
            Status::Ok => written += 1,
            Status::NoSpace => break,
            other => panic!("segment {i}: unexpected {other}"),
        }
    }
    assert!(written > 0, "nothing fit on the tmpfs");
    assert!(written < 64, "never ran out of space");

    for i in 0..written {
        assert_eq!(store.get_size(format!("h/{i}.ts")), segment.len() as u64);
    }
    assert_eq!(store.get_size(format!("h/{written}.ts")), 0);
}

#[test]
#[ignore = "requires root for tmpfs mount"]
fn tmpfs_refill_right_after_flush_succeeds() {
    let base = tempfile::tempdir().unwrap();
    let mount_point = base.path().join("tiny");
    let _guard = TmpfsGuard::mount(&mount_point, 1024)
        .expect("failed to mount tmpfs, are you running as root?");
    let location = mount_point.join("tsb");

    // Leave room for directory metadata so the accounting, not the disk,
    // is what fills up first.
    let store = Store::new(&StoreConfig::new(&location, 20, 16), Logger::tracing_only()).unwrap();
    let segment = vec![0xCDu8; 32 * 1024];

    for round in 0..3 {
        let mut i = 0;
        while store.write(format!("h/{round}/{i}.ts"), &segment) == Status::Ok {
            i += 1;
        }
        assert!(i > 0, "round {round} wrote nothing");
        store.flush();
    }
    wait_for_flusher(&store);
}
