use crate::StoreError;
use std::fs;
use std::io;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

/// Mode for every directory the store creates. Another store instance,
/// possibly running as a different user, must be able to clean up after a
/// crash of this one.
pub const DIR_MODE: u32 = 0o777;
/// Mode for segment files: read/write for owner, group and others.
pub const FILE_MODE: u32 = 0o666;

/// Directory layout of a store location.
///
/// ```text
/// <root>/
///   0/            purge target at startup (stale data from a previous run)
///   1/            first active generation
///   <n>/<path-from-url>
/// ```
#[derive(Debug, Clone)]
pub struct GenerationLayout {
    root: PathBuf,
}

/// Outcome of moving stale entries into the startup purge generation.
#[derive(Debug, Default)]
pub struct StaleReport {
    pub moved: Vec<PathBuf>,
    pub failed: Vec<(PathBuf, io::Error)>,
}

impl GenerationLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    #[inline]
    pub fn root(&self) -> &Path {
        &self.root
    }

    #[inline]
    pub fn generation_dir(&self, generation: u32) -> PathBuf {
        self.root.join(generation.to_string())
    }

    #[inline]
    pub fn segment_file(&self, generation: u32, relative: &Path) -> PathBuf {
        self.generation_dir(generation).join(relative)
    }

    /// Move every entry directly under the root, other than the
    /// `into_generation` directory itself, into that directory.
    ///
    /// Failures are collected rather than returned; a stale entry that cannot
    /// be moved only costs disk space, it cannot corrupt the new generation.
    pub fn move_stale_entries(&self, into_generation: u32) -> Result<StaleReport, StoreError> {
        let target = self.generation_dir(into_generation);
        let mut report = StaleReport::default();

        for entry in fs::read_dir(&self.root)? {
            let entry = entry?;
            let path = entry.path();
            if path == target {
                continue;
            }
            let dest = target.join(entry.file_name());
            match fs::rename(&path, &dest) {
                Ok(()) => report.moved.push(path),
                Err(e) => report.failed.push((path, e)),
            }
        }

        Ok(report)
    }
}

/// Create `path` and all missing ancestors, setting [`DIR_MODE`] on every
/// directory this call creates. Existing directories keep their mode.
pub fn create_open_dirs(path: &Path) -> Result<(), StoreError> {
    let mut current = PathBuf::new();
    for component in path.components() {
        current.push(component);
        if current.is_dir() {
            continue;
        }
        match fs::create_dir(&current) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists && current.is_dir() => continue,
            Err(source) => {
                return Err(StoreError::CreateDirectory {
                    path: current,
                    source,
                })
            }
        }
        if let Err(source) = fs::set_permissions(&current, fs::Permissions::from_mode(DIR_MODE)) {
            return Err(StoreError::CreateDirectory {
                path: current,
                source,
            });
        }
    }
    Ok(())
}
