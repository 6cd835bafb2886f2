use crate::backend::{HostFs, SegmentFs};
use crate::config::StoreConfig;
use crate::flusher::{FlushContext, Flusher, Generations};
use crate::layout::{create_open_dirs, GenerationLayout};
use crate::lock::LocationLock;
use crate::log::{tsb_log, Logger};
use crate::space::{effective_capacity, SpaceAccountant};
use crate::url::segment_path;
use crate::writer::{RetryPolicy, SegmentWriter};
use crate::{Status, StoreError};
use std::fs::{self, File};
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Generation that receives stale data found at construction.
const PURGE_GENERATION: u32 = 0;
/// First generation new segments are written to.
const FIRST_ACTIVE_GENERATION: u32 = 1;

/// Time-shifted buffer segment store.
///
/// Thread-safe: `write`, `delete` and `flush` serialize on one mutex, while
/// `read` and `get_size` go straight to the filesystem since a segment file
/// is never modified once written.
///
/// Dropping the store deletes everything under its location and blocks until
/// that is done.
pub struct Store {
    layout: GenerationLayout,
    generations: Arc<Generations>,
    space: Mutex<SpaceAccountant>,
    fs: Arc<dyn SegmentFs>,
    logger: Logger,
    policy: RetryPolicy,
    flusher: Flusher,
    _lock: LocationLock,
}

impl std::fmt::Debug for Store {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Store")
            .field("location", &self.layout.root())
            .field("generations", &self.generations)
            .field("space", &*self.lock_space())
            .finish_non_exhaustive()
    }
}

impl Store {
    /// Create a store on the host filesystem.
    ///
    /// Stale data from an instance that did not shut down cleanly is moved
    /// aside and deleted in the background; writes can start immediately.
    pub fn new(config: &StoreConfig, logger: Logger) -> Result<Self, StoreError> {
        Self::with_backend(config, logger, Arc::new(HostFs))
    }

    pub fn with_backend(
        config: &StoreConfig,
        logger: Logger,
        fs: Arc<dyn SegmentFs>,
    ) -> Result<Self, StoreError> {
        let location = config.normalized_location();
        tsb_log!(logger, Trace, "Construct store",
            "location" => location.display(),
            "min_free_percentage" => config.min_free_percentage,
            "max_capacity" => config.max_capacity_bytes());

        if !location.is_absolute() {
            tsb_log!(logger, Error, "Location is not a valid absolute path",
                "location" => location.display());
            return Err(StoreError::RelativeLocation(location));
        }

        let layout = GenerationLayout::new(&location);
        let purge_dir = layout.generation_dir(PURGE_GENERATION);
        create_open_dirs(&purge_dir).inspect_err(|e| {
            tsb_log!(logger, Error, "Failed to create", "flush_dir" => purge_dir.display(),
                "error" => e);
        })?;

        let lock = LocationLock::acquire(&location).inspect_err(|e| {
            tsb_log!(logger, Warn, "Another store instance is using the configured location",
                "location" => location.display(), "error" => e);
        })?;

        if config.min_free_percentage > 100 {
            tsb_log!(logger, Error, "Invalid minimum free space",
                "percentage" => config.min_free_percentage);
            return Err(StoreError::InvalidMinFreePercentage(
                config.min_free_percentage,
            ));
        }

        let stale = layout.move_stale_entries(PURGE_GENERATION)?;
        for (path, e) in &stale.failed {
            tsb_log!(logger, Error, "Failed to move stale directory",
                "path" => path.display(), "error" => e);
        }
        if !stale.moved.is_empty() {
            tsb_log!(logger, Warn, "Stale data found at location",
                "num_entries" => stale.moved.len());
        }

        let fs_capacity = fs.total_space(&location).map_err(|source| {
            tsb_log!(logger, Error, "Error getting filesystem capacity",
                "location" => location.display(), "error" => source);
            StoreError::CapacityQuery {
                path: location.clone(),
                source,
            }
        })?;
        tsb_log!(logger, Trace, "Filesystem space", "capacity" => fs_capacity);

        let capacity = effective_capacity(
            fs_capacity,
            config.min_free_percentage,
            config.max_capacity_bytes(),
        );
        let generations = Arc::new(Generations::new(
            PURGE_GENERATION,
            FIRST_ACTIVE_GENERATION,
        ));

        let flusher = Flusher::spawn(FlushContext {
            layout: layout.clone(),
            generations: Arc::clone(&generations),
            fs: Arc::clone(&fs),
            logger: logger.clone(),
        })
        .map_err(StoreError::FlusherSpawn)?;
        flusher.wake();

        tsb_log!(logger, Mil, "Store constructed",
            "location" => location.display(),
            "available_space" => capacity,
            "active_dir_num" => generations.active());

        Ok(Self {
            layout,
            generations,
            space: Mutex::new(SpaceAccountant::new(capacity)),
            fs,
            logger,
            policy: RetryPolicy::default(),
            flusher,
            _lock: lock,
        })
    }

    /// Store `data` under `url`.
    ///
    /// Returns quickly with [`Status::NoSpace`] when the segment does not fit;
    /// the client is expected to delete its oldest segments and retry. While a
    /// flush is still reclaiming disk space the write may block for up to five
    /// seconds.
    pub fn write(&self, url: impl AsRef<[u8]>, data: &[u8]) -> Status {
        let url = url.as_ref();
        let mut space = self.lock_space();

        if data.is_empty() {
            tsb_log!(self.logger, Error, "Buffer is empty", "segment_url" => lossy(url));
            return Status::Failed;
        }
        let Some(path) = self.map_url(url) else {
            return Status::Failed;
        };

        let writer = SegmentWriter {
            fs: &*self.fs,
            logger: &self.logger,
            policy: self.policy,
        };
        writer.write(
            &path,
            data,
            &mut space,
            self.generations.in_flush_window(),
        )
    }

    /// Fill `buf` with the first `buf.len()` bytes of the segment at `url`.
    ///
    /// Use [`get_size`](Self::get_size) to size the buffer. Fails if the
    /// segment is shorter than the buffer or does not exist.
    pub fn read(&self, url: impl AsRef<[u8]>, buf: &mut [u8]) -> Status {
        let url = url.as_ref();
        let Some(path) = self.map_url(url) else {
            return Status::Failed;
        };
        if buf.is_empty() {
            tsb_log!(self.logger, Error, "Buffer is empty", "segment_url" => lossy(url));
            return Status::Failed;
        }

        let mut file = match File::open(&path) {
            Ok(f) => f,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                tsb_log!(self.logger, Warn, "File does not exist", "path" => path.display());
                return Status::Failed;
            }
            Err(e) => {
                tsb_log!(self.logger, Error, "Failed to open the file",
                    "path" => path.display(), "error" => e);
                return Status::Failed;
            }
        };

        match file.read_exact(buf) {
            Ok(()) => {
                tsb_log!(self.logger, Trace, "File read",
                    "path" => path.display(), "size" => buf.len());
                Status::Ok
            }
            Err(e) => {
                tsb_log!(self.logger, Error, "Failed to read file",
                    "path" => path.display(), "size" => buf.len(), "error" => e);
                Status::Failed
            }
        }
    }

    /// Size in bytes of the segment at `url`, or 0 if it is absent.
    pub fn get_size(&self, url: impl AsRef<[u8]>) -> u64 {
        let Some(path) = self.map_url(url.as_ref()) else {
            return 0;
        };
        match self.segment_len(&path) {
            Ok(Some(size)) => {
                tsb_log!(self.logger, Trace, "Got size",
                    "path" => path.display(), "segment_size" => size);
                size
            }
            Ok(None) => {
                tsb_log!(self.logger, Warn, "File does not exist", "path" => path.display());
                0
            }
            Err(e) => {
                tsb_log!(self.logger, Warn, "Error getting file size",
                    "path" => path.display(), "error" => e);
                0
            }
        }
    }

    /// Delete the segment at `url` and return its size to the available space.
    ///
    /// Deleting a segment that is already gone is not an error.
    pub fn delete(&self, url: impl AsRef<[u8]>) {
        let mut space = self.lock_space();
        let Some(path) = self.map_url(url.as_ref()) else {
            return;
        };

        let size = match self.segment_len(&path) {
            Ok(Some(size)) => size,
            Ok(None) => {
                // Probably deleted already.
                tsb_log!(self.logger, Trace, "File does not exist", "path" => path.display());
                return;
            }
            Err(e) => {
                tsb_log!(self.logger, Warn, "Error getting file size",
                    "path" => path.display(), "error" => e);
                return;
            }
        };

        match self.fs.remove_segment(&path) {
            Ok(()) => {
                space.credit(size);
                tsb_log!(self.logger, Trace, "Deleted file",
                    "path" => path.display(), "file_size" => size,
                    "available_space" => space.available());
            }
            Err(e) => {
                tsb_log!(self.logger, Warn, "Error deleting file",
                    "path" => path.display(), "error" => e);
            }
        }
    }

    /// Evict every stored segment.
    ///
    /// Takes effect immediately for accounting and for new writes; the old
    /// files are deleted in the background.
    pub fn flush(&self) {
        tsb_log!(self.logger, Trace, "Do flush");
        {
            let mut space = self.lock_space();
            let old_available = space.available();
            let old_active = self.generations.advance_active();
            space.reset();

            tsb_log!(self.logger, Mil, "Flush triggered",
                "old_active_dir_num" => old_active,
                "old_available_space" => old_available,
                "active_dir_num" => old_active + 1,
                "available_space" => space.available());
        }
        self.flusher.wake();
    }

    #[inline]
    pub fn location(&self) -> &Path {
        self.layout.root()
    }

    pub fn capacity(&self) -> u64 {
        self.lock_space().capacity()
    }

    pub fn available(&self) -> u64 {
        self.lock_space().available()
    }

    /// Generation new segments are written to.
    #[inline]
    pub fn active_generation(&self) -> u32 {
        self.generations.active()
    }

    /// Oldest generation not yet fully deleted. Equal to the active
    /// generation once the flusher has caught up.
    #[inline]
    pub fn flush_generation(&self) -> u32 {
        self.generations.flush()
    }

    fn map_url(&self, url: &[u8]) -> Option<PathBuf> {
        match segment_path(url) {
            Ok(relative) => Some(
                self.layout
                    .segment_file(self.generations.active(), relative),
            ),
            Err(e) => {
                tsb_log!(self.logger, Error, "Could not map URL to a file",
                    "segment_url" => lossy(url), "reason" => e);
                None
            }
        }
    }

    /// `Ok(None)` if nothing is there or it is not a regular file.
    fn segment_len(&self, path: &Path) -> io::Result<Option<u64>> {
        match fs::metadata(path) {
            Ok(meta) if meta.is_file() => Ok(Some(meta.len())),
            Ok(_) => Ok(None),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e),
        }
    }

    fn lock_space(&self) -> MutexGuard<'_, SpaceAccountant> {
        self.space.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Drop for Store {
    fn drop(&mut self) {
        tsb_log!(self.logger, Trace, "Destroy store");
        self.flusher.shutdown();
        tsb_log!(self.logger, Mil, "Store destroyed",
            "location" => self.layout.root().display());
    }
}

fn lossy(url: &[u8]) -> std::borrow::Cow<'_, str> {
    String::from_utf8_lossy(url)
}
