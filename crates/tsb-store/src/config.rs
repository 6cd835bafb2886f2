use crate::log::LogLevel;
use crate::space::BYTES_IN_MIB;
use crate::StoreError;
use serde::{Deserialize, Serialize};
use std::ffi::OsStr;
use std::os::unix::ffi::OsStrExt;
use std::path::{Path, PathBuf};

/// Store configuration. Fixed for the lifetime of a store instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Absolute path owned exclusively by one store instance. A trailing
    /// slash is accepted.
    pub location: PathBuf,
    /// Percentage of the filesystem to leave free, 0-100.
    #[serde(default)]
    pub min_free_percentage: u32,
    /// Upper bound on the store's capacity, in MiB.
    pub max_capacity_mib: u32,
}

/// On-disk form of the configuration used by the `tsb` tool.
///
/// ```toml
/// [store]
/// location = "/tmp/data/tsb"
/// min_free_percentage = 5
/// max_capacity_mib = 10240
///
/// [log]
/// level = "warn"
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TsbConfigFile {
    pub store: StoreConfig,
    #[serde(default)]
    pub log: LogSection,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogSection {
    #[serde(default = "default_log_level")]
    pub level: LogLevel,
}

impl Default for LogSection {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_log_level() -> LogLevel {
    LogLevel::Warn
}

impl StoreConfig {
    pub fn new(location: impl Into<PathBuf>, min_free_percentage: u32, max_capacity_mib: u32) -> Self {
        Self {
            location: location.into(),
            min_free_percentage,
            max_capacity_mib,
        }
    }

    /// Load the `[store]` table of a TOML config file.
    pub fn load(path: &Path) -> Result<Self, StoreError> {
        Ok(TsbConfigFile::load(path)?.store)
    }

    #[inline]
    pub fn max_capacity_bytes(&self) -> u64 {
        u64::from(self.max_capacity_mib) * BYTES_IN_MIB
    }

    /// The location with a single trailing slash removed.
    pub fn normalized_location(&self) -> PathBuf {
        match self.location.as_os_str().as_bytes().strip_suffix(b"/") {
            Some(trimmed) if !trimmed.is_empty() => PathBuf::from(OsStr::from_bytes(trimmed)),
            _ => self.location.clone(),
        }
    }

    /// Check what can be checked without touching the filesystem.
    pub fn validate(&self) -> Result<(), StoreError> {
        if !self.normalized_location().is_absolute() {
            return Err(StoreError::RelativeLocation(self.location.clone()));
        }
        if self.min_free_percentage > 100 {
            return Err(StoreError::InvalidMinFreePercentage(
                self.min_free_percentage,
            ));
        }
        Ok(())
    }
}

impl TsbConfigFile {
    pub fn load(path: &Path) -> Result<Self, StoreError> {
        let content = std::fs::read_to_string(path)?;
        Ok(toml::from_str(&content)?)
    }
}
