//! Transport abstraction over install trees.
//!
//! A [`Fetcher`] makes files of an install tree readable on this host no
//! matter how the tree is reached:
//!
//! - [`url::UrlFetcher`] - HTTP(S) through `ureq`, FTP through `curl`
//! - [`local::LocalFetcher`] - an unpacked local directory, or a mount point
//!   produced by [`mount::MountedFetcher`] for NFS, ISO and block sources
//!
//! Lifecycle: `prepare` → any number of `acquire_file` / `has_file` /
//! `has_path` → `cleanup`. Every retrieved file is copied into a fresh temp
//! file under the scratch directory, so results survive `cleanup` unmounting
//! the source.

pub mod local;
pub mod mount;
pub mod url;

use std::fs::{self, File};
use std::io::{Read, Write};
use std::path::{Component, Path, PathBuf};

use tracing::debug;

use crate::config::FetchConfig;
use crate::error::{FetchError, Result};
use crate::location::{Location, LocationKind};
use crate::progress::ProgressSink;

const COPY_CHUNK: usize = 64 * 1024;

pub trait Fetcher {
    fn location(&self) -> &Location;

    /// Make the tree reachable. May mount or probe the network.
    fn prepare(&mut self) -> Result<()>;

    /// Release whatever `prepare` set up. Best effort and idempotent; safe
    /// after a failed or partial `prepare`.
    fn cleanup(&mut self);

    /// Copy `rel` out of the tree into a new temp file owned by the caller.
    fn acquire_file(&mut self, rel: &str) -> Result<PathBuf>;

    /// Whether `rel` can be acquired. Leaves no temp file behind.
    ///
    /// Absence folds to `Ok(false)`; transient failures are returned so the
    /// caller can retry.
    fn has_file(&mut self, rel: &str) -> Result<bool> {
        match self.acquire_file(rel) {
            Ok(path) => {
                if let Err(e) = fs::remove_file(&path) {
                    debug!(path = %path.display(), error = %e, "failed to discard probe file");
                }
                Ok(true)
            }
            Err(e) if e.is_transient() => Err(e),
            Err(e) => {
                debug!(file = rel, error = %e, "probe miss");
                Ok(false)
            }
        }
    }

    /// Whether `rel` names anything in the tree, directories included.
    ///
    /// Marker checks use this; media lookups use [`Fetcher::has_file`].
    /// Transports that cannot tell a directory from a file fall back to
    /// `has_file`.
    fn has_path(&mut self, rel: &str) -> Result<bool> {
        self.has_file(rel)
    }
}

/// Build the fetcher matching the location's transport.
pub fn for_location(
    location: Location,
    scratch_dir: &Path,
    config: &FetchConfig,
    progress: Box<dyn ProgressSink>,
) -> Box<dyn Fetcher> {
    match location.kind().clone() {
        LocationKind::Http | LocationKind::Ftp => Box::new(url::UrlFetcher::new(
            location,
            scratch_dir,
            config,
            progress,
        )),
        LocationKind::Directory(root) => Box::new(local::LocalFetcher::new(
            location,
            root,
            scratch_dir,
            progress,
        )),
        LocationKind::Nfs { .. } | LocationKind::Iso(_) | LocationKind::BlockDevice(_) => {
            Box::new(mount::MountedFetcher::new(
                location,
                scratch_dir,
                config,
                progress,
            ))
        }
    }
}

/// Reject paths that could escape the tree root.
pub(crate) fn validate_relative(rel: &str) -> Result<&str> {
    let trimmed = rel.trim_start_matches('/');
    if trimmed.is_empty() {
        return Err(FetchError::not_found(rel, "empty path"));
    }
    let escapes = Path::new(trimmed)
        .components()
        .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir));
    if escapes {
        return Err(FetchError::not_found(rel, "path escapes the install tree"));
    }
    Ok(trimmed)
}

/// Create a persisted temp file in `scratch_dir` named after `rel`.
pub(crate) fn new_temp_file(scratch_dir: &Path, rel: &str) -> Result<(File, PathBuf)> {
    let base = Path::new(rel)
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("file");
    let named = tempfile::Builder::new()
        .prefix(&format!("{base}."))
        .tempfile_in(scratch_dir)?;
    let (file, path) = named.keep().map_err(|e| FetchError::Io(e.error))?;
    Ok((file, path))
}

/// Stream `reader` into a new temp file, reporting progress. The temp file
/// is removed if the copy fails part way.
pub(crate) fn save_temp(
    reader: &mut dyn Read,
    scratch_dir: &Path,
    rel: &str,
    total: Option<u64>,
    progress: &mut dyn ProgressSink,
) -> Result<PathBuf> {
    let (mut file, path) = new_temp_file(scratch_dir, rel)?;
    progress.start(rel, total);

    let copied = copy_with_progress(reader, &mut file, progress);
    progress.finish();

    match copied {
        Ok(_) => Ok(path),
        Err(e) => {
            let _ = fs::remove_file(&path);
            Err(e)
        }
    }
}

fn copy_with_progress(
    reader: &mut dyn Read,
    file: &mut File,
    progress: &mut dyn ProgressSink,
) -> Result<u64> {
    let mut buf = vec![0u8; COPY_CHUNK];
    let mut done: u64 = 0;
    loop {
        let n = reader.read(&mut buf)?;
        if n == 0 {
            break;
        }
        file.write_all(&buf[..n])?;
        done += n as u64;
        progress.update(done);
    }
    file.flush()?;
    Ok(done)
}
