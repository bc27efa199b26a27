//! Install-media resolution for virtual machine provisioning.
//!
//! Given an install source (HTTP/FTP URL, NFS export, local ISO, block
//! device or directory), this crate makes the tree readable, works out which
//! distribution it belongs to, and copies out the kernel/initrd pair or boot
//! ISO needed to start an automated install.
//!
//! - **Fetchers** - one transport per location kind, behind [`fetcher::Fetcher`]
//! - **Stores** - one strategy per distribution family, behind [`store::Store`]
//! - **Resolver** - ordered store selection with bounded retry of transient errors
//! - **Legacy initrd synthesis** - for Suse trees that ship no Xen installer
//!
//! # Architecture
//!
//! ```text
//! acquire_kernel / acquire_boot_disk
//!     │
//!     ├── Location::parse ──> fetcher::for_location ──> prepare
//!     │
//!     ├── Resolver::resolve
//!     │       └── Fedora, RHEL, CentOS, SL, Suse, Debian, Ubuntu, Mandriva, Generic
//!     │               └── .treeinfo first, then marker files
//!     │
//!     ├── Store::acquire_kernel / acquire_boot_disk
//!     │
//!     └── cleanup (always, exactly once)
//! ```
//!
//! # Example
//!
//! ```rust,ignore
//! use distro_fetch::{acquire_kernel, AcquireRequest, Config, Resolver, VirtType};
//! use distro_fetch::progress::LogProgress;
//!
//! let config = Config::default();
//! let resolver = Resolver::from_config(&config);
//! let request = AcquireRequest::new("http://mirror.example.com/fedora/8/os", "/var/tmp/vm1")
//!     .virt_type(VirtType::Paravirt);
//! let media = acquire_kernel(&resolver, &config, &request, Box::new(LogProgress::default()))?;
//! println!("{} {} {}", media.kernel.display(), media.initrd.display(), media.cmdline);
//! ```

pub mod acquire;
pub mod arch;
pub mod config;
pub mod error;
pub mod fetcher;
pub mod location;
pub mod preflight;
pub mod process;
pub mod progress;
pub mod resolver;
pub mod retry;
pub mod store;
pub mod treeinfo;

#[cfg(test)]
mod testutil;

pub use acquire::{acquire_boot_disk, acquire_kernel, AcquireRequest, FetcherGuard};
pub use config::Config;
pub use error::{FetchError, Result};
pub use location::{Location, LocationKind};
pub use resolver::Resolver;
pub use retry::RetryPolicy;
pub use store::{BootIsoArtifact, DistroFamily, KernelArtifact, Store, StoreContext, VirtType};
