use crate::backend::{is_no_space, SegmentFs};
use crate::layout::create_open_dirs;
use crate::log::{tsb_log, Logger};
use crate::space::SpaceAccountant;
use crate::Status;
use std::io;
use std::path::Path;
use std::thread;
use std::time::{Duration, Instant};

/// How long a write keeps retrying ENOSPC while a flush is still reclaiming
/// disk space.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub sleep: Duration,
    pub timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            sleep: Duration::from_millis(2),
            timeout: Duration::from_secs(5),
        }
    }
}

/// Writes one segment file. The caller holds the store mutex and passes in
/// the accounting state it protects.
pub struct SegmentWriter<'a> {
    pub fs: &'a dyn SegmentFs,
    pub logger: &'a Logger,
    pub policy: RetryPolicy,
}

impl SegmentWriter<'_> {
    /// `retry` is set when the write happens inside a flush window, where an
    /// ENOSPC can be caused by deletion lagging behind the accounting.
    pub fn write(
        &self,
        path: &Path,
        data: &[u8],
        space: &mut SpaceAccountant,
        retry: bool,
    ) -> Status {
        if path.exists() {
            tsb_log!(self.logger, Trace, "File already exists", "path" => path.display());
            return Status::AlreadyExists;
        }

        let size = data.len() as u64;
        if !space.fits(size) {
            // Routine: the client culls old segments and tries again.
            tsb_log!(self.logger, Trace, "Not enough space to write",
                "path" => path.display(), "file_size" => size,
                "available_space" => space.available());
            return Status::NoSpace;
        }

        if let Some(parent) = path.parent() {
            if let Err(e) = create_open_dirs(parent) {
                tsb_log!(self.logger, Error, "Failed to create directory",
                    "directory" => parent.display(), "error" => e);
                return Status::Failed;
            }
        }

        let status = self.write_with_retry(path, data, retry);
        if status.is_ok() {
            space.debit(size);
            tsb_log!(self.logger, Trace, "File written",
                "path" => path.display(), "file_size" => size,
                "available_space" => space.available());
        }
        status
    }

    fn write_with_retry(&self, path: &Path, data: &[u8], retry: bool) -> Status {
        let started = Instant::now();
        loop {
            let Err(err) = self.fs.write_segment(path, data) else {
                return Status::Ok;
            };

            // Never leave a partial file behind: a later read would return
            // truncated data and a later write would see "already exists".
            self.remove_partial(path);

            if !is_no_space(&err) {
                tsb_log!(self.logger, Error, "Failed to write to file",
                    "path" => path.display(), "size" => data.len(), "error" => err);
                return Status::Failed;
            }
            if !retry {
                tsb_log!(self.logger, Trace, "Not enough space to write",
                    "path" => path.display(), "size" => data.len());
                return Status::NoSpace;
            }
            if started.elapsed() >= self.policy.timeout {
                tsb_log!(self.logger, Error, "Not enough space to write - timed out",
                    "path" => path.display(),
                    "timeout_ms" => self.policy.timeout.as_millis());
                return Status::NoSpace;
            }

            tsb_log!(self.logger, Trace, "Not enough space to write - retrying",
                "sleep_ms" => self.policy.sleep.as_millis(), "size" => data.len());
            thread::sleep(self.policy.sleep);
        }
    }

    fn remove_partial(&self, path: &Path) {
        match self.fs.remove_segment(path) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => {
                tsb_log!(self.logger, Warn, "Error deleting file",
                    "path" => path.display(), "error" => e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::HostFs;
    use crate::mock::{MockFs, ALWAYS};
    use std::fs;

    fn quick() -> RetryPolicy {
        RetryPolicy {
            sleep: Duration::from_millis(1),
            timeout: Duration::from_millis(50),
        }
    }

    #[test]
    fn writes_and_debits() {
        let dir = tempfile::tempdir().unwrap();
        let logger = Logger::tracing_only();
        let writer = SegmentWriter {
            fs: &HostFs,
            logger: &logger,
            policy: quick(),
        };
        let mut space = SpaceAccountant::new(1000);
        let path = dir.path().join("1/host/a.ts");

        assert_eq!(writer.write(&path, &[1; 400], &mut space, false), Status::Ok);
        assert_eq!(space.available(), 600);
        assert_eq!(fs::read(&path).unwrap(), vec![1; 400]);
    }

    #[test]
    fn existing_file_is_reported_without_writing() {
        let dir = tempfile::tempdir().unwrap();
        let logger = Logger::tracing_only();
        let mock = MockFs::new();
        let writer = SegmentWriter {
            fs: &mock,
            logger: &logger,
            policy: quick(),
        };
        let mut space = SpaceAccountant::new(1000);
        let path = dir.path().join("a.ts");
        fs::write(&path, b"old").unwrap();

        assert_eq!(
            writer.write(&path, b"new", &mut space, false),
            Status::AlreadyExists
        );
        assert_eq!(mock.write_attempts(), 0);
        assert_eq!(space.available(), 1000);
    }

    #[test]
    fn accounting_rejects_before_any_io() {
        let dir = tempfile::tempdir().unwrap();
        let logger = Logger::tracing_only();
        let mock = MockFs::new();
        let writer = SegmentWriter {
            fs: &mock,
            logger: &logger,
            policy: quick(),
        };
        let mut space = SpaceAccountant::new(10);
        let path = dir.path().join("host/a.ts");

        assert_eq!(writer.write(&path, &[0; 11], &mut space, true), Status::NoSpace);
        assert_eq!(mock.write_attempts(), 0);
        assert!(!dir.path().join("host").exists());
    }

    #[test]
    fn no_space_outside_flush_window_is_not_retried() {
        let dir = tempfile::tempdir().unwrap();
        let logger = Logger::tracing_only();
        let mock = MockFs::new();
        mock.fail_writes_with_no_space(ALWAYS);
        let writer = SegmentWriter {
            fs: &mock,
            logger: &logger,
            policy: quick(),
        };
        let mut space = SpaceAccountant::new(1000);
        let path = dir.path().join("a.ts");

        assert_eq!(writer.write(&path, &[0; 100], &mut space, false), Status::NoSpace);
        assert_eq!(mock.write_attempts(), 1);
        assert!(!path.exists(), "partial file must be removed");
        assert_eq!(space.available(), 1000);
    }

    #[test]
    fn no_space_inside_flush_window_retries_until_success() {
        let dir = tempfile::tempdir().unwrap();
        let logger = Logger::tracing_only();
        let mock = MockFs::new();
        mock.fail_writes_with_no_space(3);
        let writer = SegmentWriter {
            fs: &mock,
            logger: &logger,
            policy: RetryPolicy {
                sleep: Duration::from_millis(1),
                timeout: Duration::from_secs(5),
            },
        };
        let mut space = SpaceAccountant::new(1000);
        let path = dir.path().join("a.ts");

        assert_eq!(writer.write(&path, &[9; 100], &mut space, true), Status::Ok);
        assert_eq!(mock.write_attempts(), 4);
        assert_eq!(fs::read(&path).unwrap(), vec![9; 100]);
        assert_eq!(space.available(), 900);
    }

    #[test]
    fn retry_gives_up_after_timeout() {
        let dir = tempfile::tempdir().unwrap();
        let logger = Logger::tracing_only();
        let mock = MockFs::new();
        mock.fail_writes_with_no_space(ALWAYS);
        let writer = SegmentWriter {
            fs: &mock,
            logger: &logger,
            policy: quick(),
        };
        let mut space = SpaceAccountant::new(1000);
        let path = dir.path().join("a.ts");

        let started = Instant::now();
        assert_eq!(writer.write(&path, &[0; 100], &mut space, true), Status::NoSpace);
        assert!(started.elapsed() >= quick().timeout);
        assert!(mock.write_attempts() > 1);
        assert!(!path.exists());
    }

    #[test]
    fn other_errors_fail_without_retry() {
        let dir = tempfile::tempdir().unwrap();
        let logger = Logger::tracing_only();
        let mock = MockFs::new();
        mock.fail_writes_with_io_error(1);
        let writer = SegmentWriter {
            fs: &mock,
            logger: &logger,
            policy: quick(),
        };
        let mut space = SpaceAccountant::new(1000);

        let path = dir.path().join("a.ts");

        assert_eq!(writer.write(&path, &[0; 10], &mut space, true), Status::Failed);
        assert_eq!(mock.write_attempts(), 1);
        assert!(!path.exists(), "partial file must be removed");
        assert_eq!(space.available(), 1000);
    }

    #[test]
    fn directory_creation_failure_fails() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("host"), b"not a dir").unwrap();
        let logger = Logger::tracing_only();
        let writer = SegmentWriter {
            fs: &HostFs,
            logger: &logger,
            policy: quick(),
        };
        let mut space = SpaceAccountant::new(1000);

        assert_eq!(
            writer.write(&dir.path().join("host/a.ts"), &[0; 10], &mut space, false),
            Status::Failed
        );
        assert_eq!(space.available(), 1000);
    }
}
