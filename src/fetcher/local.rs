//! Fetcher for install trees already present as a local directory.

use std::fs::{self, File};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use tracing::debug;

use super::{save_temp, validate_relative, Fetcher};
use crate::error::{FetchError, Result};
use crate::location::Location;
use crate::progress::ProgressSink;

pub struct LocalFetcher {
    location: Location,
    root: PathBuf,
    scratch_dir: PathBuf,
    progress: Box<dyn ProgressSink>,
}

impl LocalFetcher {
    pub fn new(
        location: Location,
        root: PathBuf,
        scratch_dir: &Path,
        progress: Box<dyn ProgressSink>,
    ) -> Self {
        Self {
            location,
            root,
            scratch_dir: scratch_dir.to_path_buf(),
            progress,
        }
    }
}

impl Fetcher for LocalFetcher {
    fn location(&self) -> &Location {
        &self.location
    }

    fn prepare(&mut self) -> Result<()> {
        if !self.root.is_dir() {
            return Err(FetchError::location(
                self.location.as_str(),
                format!("'{}' is not a directory", self.root.display()),
            ));
        }
        Ok(())
    }

    fn cleanup(&mut self) {}

    fn acquire_file(&mut self, rel: &str) -> Result<PathBuf> {
        copy_out(&self.root, rel, &self.scratch_dir, self.progress.as_mut())
    }

    fn has_path(&mut self, rel: &str) -> Result<bool> {
        Ok(path_exists(&self.root, rel))
    }
}

/// Whether `root/rel` exists as any kind of entry. Symlinks are not
/// followed, so a dangling link still counts.
pub(crate) fn path_exists(root: &Path, rel: &str) -> bool {
    match validate_relative(rel) {
        Ok(rel) => root.join(rel).symlink_metadata().is_ok(),
        Err(_) => false,
    }
}

/// Copy `root/rel` into a new temp file. Directories and missing entries are
/// reported as not found.
pub(crate) fn copy_out(
    root: &Path,
    rel: &str,
    scratch_dir: &Path,
    progress: &mut dyn ProgressSink,
) -> Result<PathBuf> {
    let rel = validate_relative(rel)?;
    let src = root.join(rel);

    let meta = match fs::metadata(&src) {
        Ok(meta) => meta,
        Err(e) if e.kind() == ErrorKind::NotFound => {
            return Err(FetchError::not_found(rel, "no such file"));
        }
        Err(e) => return Err(FetchError::not_found(rel, e.to_string())),
    };
    if meta.is_dir() {
        return Err(FetchError::not_found(rel, "is a directory"));
    }

    debug!(src = %src.display(), "copying from local tree");
    let mut file = File::open(&src).map_err(|e| FetchError::not_found(rel, e.to_string()))?;
    save_temp(&mut file, scratch_dir, rel, Some(meta.len()), progress)
}
