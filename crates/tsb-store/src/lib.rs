//! Local-disk segment store for time-shifted buffers.
//!
//! A [`Store`] owns one directory on the host. Segments are addressed by URL
//! and land in `location/<generation>/<path-from-url>`; a [`Store::flush`]
//! advances the active generation immediately and leaves the physical deletion
//! of older generations to a background flusher thread. Capacity is tracked in
//! memory from the filesystem size, the configured minimum free percentage and
//! the configured maximum.

pub mod backend;
pub mod config;
pub mod flusher;
pub mod layout;
pub mod lock;
pub mod log;
pub mod mock;
pub mod space;
pub mod store;
pub mod url;
pub mod writer;

pub use backend::{HostFs, SegmentFs};
pub use config::{StoreConfig, TsbConfigFile};
pub use layout::GenerationLayout;
pub use lock::LocationLock;
pub use log::{LogFunction, LogLevel, Logger};
pub use mock::MockFs;
pub use space::{effective_capacity, SpaceAccountant, BYTES_IN_MIB};
pub use store::Store;
pub use url::{segment_path, UrlError};

use serde::Serialize;
use std::path::PathBuf;
use thiserror::Error;

/// Outcome of a store operation.
#[must_use]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    Ok,
    /// Invalid argument, filesystem or other failure.
    Failed,
    /// Not enough space for the segment. Routine: cull older segments and retry.
    NoSpace,
    AlreadyExists,
}

impl Status {
    #[inline]
    pub fn is_ok(self) -> bool {
        self == Status::Ok
    }
}

impl std::fmt::Display for Status {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Status::Ok => write!(f, "ok"),
            Status::Failed => write!(f, "failed"),
            Status::NoSpace => write!(f, "no space"),
            Status::AlreadyExists => write!(f, "already exists"),
        }
    }
}

/// Configuration and construction errors. A store that fails to construct
/// leaves no background thread and no lock behind.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("location is not an absolute path: {0}")]
    RelativeLocation(PathBuf),
    #[error("failed to create directory {path}: {source}")]
    CreateDirectory {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to open location for locking {path}: {source}")]
    LockOpen {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("another store instance is using location {0}")]
    LocationLocked(PathBuf),
    #[error("invalid minimum free percentage: {0} (must be 0-100)")]
    InvalidMinFreePercentage(u32),
    #[error("failed to query filesystem capacity for {path}: {source}")]
    CapacityQuery {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to start flusher thread: {0}")]
    FlusherSpawn(std::io::Error),
    #[error("store I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("config parse error: {0}")]
    Toml(#[from] toml::de::Error),
}
