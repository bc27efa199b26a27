//! Fetcher for sources that must be mounted first: NFS exports, loopback ISO
//! images and block devices.
//!
//! The mount point is a private directory under the scratch dir. Files are
//! copied out of it, so everything handed back stays valid after `cleanup`
//! unmounts.

use std::fs;
use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};

use super::local::{copy_out, path_exists};
use super::Fetcher;
use crate::config::FetchConfig;
use crate::error::{FetchError, Result};
use crate::location::{Location, LocationKind};
use crate::preflight::check_required_tools;
use crate::process::Cmd;
use crate::progress::ProgressSink;

pub struct MountedFetcher {
    location: Location,
    scratch_dir: PathBuf,
    config: FetchConfig,
    progress: Box<dyn ProgressSink>,
    mount_dir: Option<PathBuf>,
    mounted: bool,
}

impl MountedFetcher {
    pub fn new(
        location: Location,
        scratch_dir: &Path,
        config: &FetchConfig,
        progress: Box<dyn ProgressSink>,
    ) -> Self {
        Self {
            location,
            scratch_dir: scratch_dir.to_path_buf(),
            config: config.clone(),
            progress,
            mount_dir: None,
            mounted: false,
        }
    }

    /// Mount point, once `prepare` has created it.
    pub fn mount_dir(&self) -> Option<&Path> {
        self.mount_dir.as_deref()
    }

    fn mount_args(&self, target: &Path) -> Result<Vec<String>> {
        let (options, source) = match self.location.kind() {
            LocationKind::Nfs { export } => (self.config.nfs_options.clone(), export.clone()),
            LocationKind::Iso(path) => ("ro,loop".to_string(), path.display().to_string()),
            LocationKind::BlockDevice(path) => ("ro".to_string(), path.display().to_string()),
            _ => {
                return Err(FetchError::location(
                    self.location.as_str(),
                    "location does not need mounting",
                ))
            }
        };
        Ok(vec![
            "-o".to_string(),
            options,
            source,
            target.display().to_string(),
        ])
    }

    fn mount(&mut self) -> Result<()> {
        check_required_tools(&[
            (self.config.mount_program.as_str(), "util-linux"),
            (self.config.umount_program.as_str(), "util-linux"),
        ])
        .map_err(|e| FetchError::location(self.location.as_str(), e.to_string()))?;

        let dir = tempfile::Builder::new()
            .prefix("mnt.")
            .tempdir_in(&self.scratch_dir)?
            .keep();
        self.mount_dir = Some(dir.clone());

        let args = self.mount_args(&dir)?;
        info!(location = %self.location, mount_point = %dir.display(), "mounting install source");
        let result = Cmd::new(&self.config.mount_program)
            .args(&args)
            .allow_fail()
            .run()
            .map_err(|e| FetchError::location(self.location.as_str(), format!("{e:#}")))?;

        if !result.success() {
            return Err(FetchError::location(
                self.location.as_str(),
                format!(
                    "{} exited with {}: {}",
                    self.config.mount_program,
                    result.status,
                    result.stderr.trim()
                ),
            ));
        }
        self.mounted = true;
        Ok(())
    }

    fn mounted_root(&self) -> Result<PathBuf> {
        match (&self.mount_dir, self.mounted) {
            (Some(dir), true) => Ok(dir.clone()),
            _ => Err(FetchError::location(
                self.location.as_str(),
                "install source is not mounted",
            )),
        }
    }
}

impl Fetcher for MountedFetcher {
    fn location(&self) -> &Location {
        &self.location
    }

    fn prepare(&mut self) -> Result<()> {
        let mounted = self.mount();
        if mounted.is_err() {
            self.cleanup();
        }
        mounted
    }

    fn cleanup(&mut self) {
        if self.mounted {
            if let Some(dir) = &self.mount_dir {
                debug!(mount_point = %dir.display(), "unmounting install source");
                match Cmd::new(&self.config.umount_program)
                    .arg_path(dir)
                    .allow_fail()
                    .run()
                {
                    Ok(result) if result.success() => {}
                    Ok(result) => {
                        warn!(mount_point = %dir.display(), stderr = %result.stderr.trim(), "unmount failed")
                    }
                    Err(e) => warn!(mount_point = %dir.display(), error = %e, "unmount failed"),
                }
            }
            self.mounted = false;
        }

        if let Some(dir) = self.mount_dir.take() {
            // Non-recursive: a mount that refused to go away is left intact.
            if let Err(e) = fs::remove_dir(&dir) {
                warn!(mount_point = %dir.display(), error = %e, "failed to remove mount point");
            }
        }
    }

    fn acquire_file(&mut self, rel: &str) -> Result<PathBuf> {
        let root = self.mounted_root()?;
        copy_out(&root, rel, &self.scratch_dir, self.progress.as_mut())
    }

    fn has_path(&mut self, rel: &str) -> Result<bool> {
        let root = self.mounted_root()?;
        Ok(path_exists(&root, rel))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::progress::NoProgress;
    use tempfile::TempDir;

    fn fetcher(scratch: &Path, mount_program: &str) -> MountedFetcher {
        let config = FetchConfig {
            mount_program: mount_program.to_string(),
            umount_program: "true".to_string(),
            ..FetchConfig::default()
        };
        let location = Location::parse("nfs://server/exports/tree").unwrap();
        MountedFetcher::new(location, scratch, &config, Box::new(NoProgress))
    }

    #[test]
    fn failed_mount_is_location_error_and_leaves_no_mount_point() {
        let scratch = TempDir::new().unwrap();
        let mut fetcher = fetcher(scratch.path(), "false");

        let err = fetcher.prepare().unwrap_err();
        assert!(matches!(err, FetchError::Location { .. }));
        assert!(fetcher.mount_dir().is_none());
        assert_eq!(fs::read_dir(scratch.path()).unwrap().count(), 0);

        // Cleanup after a failed prepare is harmless.
        fetcher.cleanup();
    }

    #[test]
    fn missing_mount_program_is_location_error() {
        let scratch = TempDir::new().unwrap();
        let mut fetcher = fetcher(scratch.path(), "definitely_not_a_mount_tool_123");
        assert!(matches!(
            fetcher.prepare(),
            Err(FetchError::Location { .. })
        ));
        assert_eq!(fs::read_dir(scratch.path()).unwrap().count(), 0);
    }

    #[test]
    fn prepare_then_cleanup_removes_mount_point() {
        let scratch = TempDir::new().unwrap();
        let mut fetcher = fetcher(scratch.path(), "true");

        fetcher.prepare().unwrap();
        let dir = fetcher.mount_dir().unwrap().to_path_buf();
        assert!(dir.is_dir());
        assert!(dir.starts_with(scratch.path()));

        // The fake mount leaves the directory empty.
        assert!(fetcher.acquire_file("Fedora").unwrap_err().is_not_found());
        assert!(!fetcher.has_file("Fedora").unwrap());

        fetcher.cleanup();
        assert!(!dir.exists());
        fetcher.cleanup();
        assert_eq!(fs::read_dir(scratch.path()).unwrap().count(), 0);
    }

    #[test]
    fn directory_marker_under_mount_point_is_seen() {
        let scratch = TempDir::new().unwrap();
        let mut fetcher = fetcher(scratch.path(), "true");
        fetcher.prepare().unwrap();

        // Stand in for the mounted tree: Fedora ships its marker as a directory.
        let dir = fetcher.mount_dir().unwrap().to_path_buf();
        fs::create_dir_all(dir.join("Fedora/RPMS")).unwrap();

        assert!(fetcher.has_path("Fedora").unwrap());
        assert!(!fetcher.has_file("Fedora").unwrap());
        assert!(!fetcher.has_path("CentOS").unwrap());

        fs::remove_dir_all(dir.join("Fedora")).unwrap();
        fetcher.cleanup();
        assert!(matches!(
            fetcher.has_path("Fedora"),
            Err(FetchError::Location { .. })
        ));
        assert_eq!(fs::read_dir(scratch.path()).unwrap().count(), 0);
    }

    #[test]
    fn acquire_before_prepare_fails() {
        let scratch = TempDir::new().unwrap();
        let mut fetcher = fetcher(scratch.path(), "true");
        assert!(matches!(
            fetcher.acquire_file("Fedora"),
            Err(FetchError::Location { .. })
        ));
    }

    #[test]
    fn iso_mount_uses_loop_option() {
        let scratch = TempDir::new().unwrap();
        let iso = scratch.path().join("tree.iso");
        fs::write(&iso, b"CD001").unwrap();
        let location = Location::parse(iso.to_str().unwrap()).unwrap();
        let fetcher = MountedFetcher::new(
            location,
            scratch.path(),
            &FetchConfig::default(),
            Box::new(NoProgress),
        );
        let args = fetcher.mount_args(Path::new("/mnt/x")).unwrap();
        assert_eq!(args[0], "-o");
        assert_eq!(args[1], "ro,loop");
        assert_eq!(args[3], "/mnt/x");
    }
}
