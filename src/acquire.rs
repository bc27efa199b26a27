//! Entry points: fetch boot media for an install location.
//!
//! Both functions follow the same bracket: build the fetcher for the
//! location, prepare it, resolve a store, acquire, and always clean the
//! fetcher up afterwards through [`FetcherGuard`]. Returned files belong to
//! the caller.

use std::fs;
use std::path::PathBuf;

use tracing::{debug, info};

use crate::config::Config;
use crate::error::{FetchError, Result};
use crate::fetcher::{self, Fetcher};
use crate::location::Location;
use crate::progress::ProgressSink;
use crate::resolver::Resolver;
use crate::store::{BootIsoArtifact, DistroFamily, KernelArtifact, Store, StoreContext, VirtType};

/// What to fetch and from where.
#[derive(Debug, Clone)]
pub struct AcquireRequest {
    pub location: String,
    /// Where temp files and mount points are created. Use a distinct
    /// directory per concurrent call.
    pub scratch_dir: PathBuf,
    pub virt_type: VirtType,
    /// Only try this family instead of probing all of them.
    pub distro: Option<DistroFamily>,
    /// Guest architecture; defaults to `[host] arch` from the config.
    pub arch: Option<String>,
}

impl AcquireRequest {
    pub fn new(location: impl Into<String>, scratch_dir: impl Into<PathBuf>) -> Self {
        Self {
            location: location.into(),
            scratch_dir: scratch_dir.into(),
            virt_type: VirtType::default(),
            distro: None,
            arch: None,
        }
    }

    pub fn virt_type(mut self, virt_type: VirtType) -> Self {
        self.virt_type = virt_type;
        self
    }

    pub fn distro(mut self, distro: DistroFamily) -> Self {
        self.distro = Some(distro);
        self
    }

    pub fn arch(mut self, arch: impl Into<String>) -> Self {
        self.arch = Some(arch.into());
        self
    }
}

/// Owns a fetcher and runs its `cleanup` exactly once, on drop or on
/// [`FetcherGuard::finish`].
pub struct FetcherGuard {
    fetcher: Box<dyn Fetcher>,
    cleaned: bool,
}

impl FetcherGuard {
    pub fn new(fetcher: Box<dyn Fetcher>) -> Self {
        Self {
            fetcher,
            cleaned: false,
        }
    }

    /// Prepare the fetcher. Any failure is reported as an unusable location.
    pub fn prepare(&mut self) -> Result<()> {
        self.fetcher.prepare().map_err(|e| match e {
            FetchError::Location { .. } => e,
            other => FetchError::location(self.fetcher.location().as_str(), other.to_string()),
        })
    }

    pub fn fetcher(&mut self) -> &mut dyn Fetcher {
        self.fetcher.as_mut()
    }

    pub fn finish(mut self) {
        self.cleanup();
    }

    fn cleanup(&mut self) {
        if !self.cleaned {
            self.cleaned = true;
            debug!(location = %self.fetcher.location(), "cleaning up fetcher");
            self.fetcher.cleanup();
        }
    }
}

impl Drop for FetcherGuard {
    fn drop(&mut self) {
        self.cleanup();
    }
}

/// Fetch a kernel and initrd for `request.location`.
pub fn acquire_kernel(
    resolver: &Resolver,
    config: &Config,
    request: &AcquireRequest,
    progress: Box<dyn ProgressSink>,
) -> Result<KernelArtifact> {
    with_store(resolver, config, request, progress, |store, fetcher| {
        resolver
            .retry()
            .run("kernel", || store.acquire_kernel(fetcher))
    })
}

/// Fetch a bootable install ISO for `request.location`.
pub fn acquire_boot_disk(
    resolver: &Resolver,
    config: &Config,
    request: &AcquireRequest,
    progress: Box<dyn ProgressSink>,
) -> Result<BootIsoArtifact> {
    with_store(resolver, config, request, progress, |store, fetcher| {
        resolver
            .retry()
            .run("boot ISO", || store.acquire_boot_disk(fetcher))
    })
}

fn with_store<T>(
    resolver: &Resolver,
    config: &Config,
    request: &AcquireRequest,
    progress: Box<dyn ProgressSink>,
    acquire: impl FnOnce(&mut dyn Store, &mut dyn Fetcher) -> Result<T>,
) -> Result<T> {
    let location = Location::parse(&request.location)?;
    fs::create_dir_all(&request.scratch_dir).map_err(|e| {
        FetchError::Config(format!(
            "cannot create scratch dir {}: {e}",
            request.scratch_dir.display()
        ))
    })?;

    let arch = request
        .arch
        .clone()
        .unwrap_or_else(|| config.host.arch.clone());
    let ctx = StoreContext::new(arch, request.virt_type).with_synth(config.synth.clone());

    info!(
        location = %location,
        virt = %request.virt_type,
        arch = %ctx.arch,
        distro = ?request.distro.map(DistroFamily::name),
        "acquiring install media"
    );
    let mut guard = FetcherGuard::new(fetcher::for_location(
        location,
        &request.scratch_dir,
        &config.fetch,
        progress,
    ));
    guard.prepare()?;

    let mut store = resolver.resolve(guard.fetcher(), &ctx, request.distro)?;
    let result = acquire(store.as_mut(), guard.fetcher());
    guard.finish();
    result
}
