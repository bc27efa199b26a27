//! Distribution-family strategies.
//!
//! A [`Store`] answers two questions about a prepared install tree: is this
//! my family, and where are the boot media. Every store shares the same
//! resolution rules, implemented once in [`TreeProbe`]:
//!
//! 1. A `.treeinfo` descriptor, when present, is authoritative for paths.
//! 2. Otherwise each store walks its own ordered list of well-known layouts.
//!
//! Stores are cheap values built per resolution; the only state they carry
//! is the descriptor cache.

pub mod debian;
pub mod generic;
pub mod mandriva;
pub mod redhat;
pub mod suse;

use std::fmt;
use std::fs;
use std::path::PathBuf;
use std::str::FromStr;

use serde::Serialize;
use tracing::{debug, info};

use crate::config::SynthConfig;
use crate::error::{FetchError, Result};
use crate::fetcher::Fetcher;
use crate::treeinfo::{TreeInfoCache, KEY_BOOT_ISO};

/// Guest virtualization mode the media is requested for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum VirtType {
    #[default]
    Hvm,
    /// Xen paravirtualized guest.
    Paravirt,
}

impl fmt::Display for VirtType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VirtType::Hvm => write!(f, "hvm"),
            VirtType::Paravirt => write!(f, "xen"),
        }
    }
}

impl FromStr for VirtType {
    type Err = FetchError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "hvm" => Ok(VirtType::Hvm),
            "xen" | "pv" | "paravirt" => Ok(VirtType::Paravirt),
            other => Err(FetchError::Config(format!(
                "unknown virt type '{other}' (expected hvm or xen)"
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DistroFamily {
    Fedora,
    Rhel,
    CentOs,
    Scientific,
    Suse,
    Debian,
    Ubuntu,
    Mandriva,
    Generic,
}

impl DistroFamily {
    /// Probe order used when the caller does not supply one. Specific
    /// families come before [`DistroFamily::Generic`], which matches almost
    /// any Linux tree.
    pub const STANDARD_ORDER: [DistroFamily; 9] = [
        DistroFamily::Fedora,
        DistroFamily::Rhel,
        DistroFamily::CentOs,
        DistroFamily::Scientific,
        DistroFamily::Suse,
        DistroFamily::Debian,
        DistroFamily::Ubuntu,
        DistroFamily::Mandriva,
        DistroFamily::Generic,
    ];

    pub fn name(self) -> &'static str {
        match self {
            DistroFamily::Fedora => "fedora",
            DistroFamily::Rhel => "rhel",
            DistroFamily::CentOs => "centos",
            DistroFamily::Scientific => "scientific",
            DistroFamily::Suse => "suse",
            DistroFamily::Debian => "debian",
            DistroFamily::Ubuntu => "ubuntu",
            DistroFamily::Mandriva => "mandriva",
            DistroFamily::Generic => "generic",
        }
    }

    /// Kernel argument naming the install source for this family's installer.
    pub fn cmdline_directive(self) -> &'static str {
        match self {
            DistroFamily::Suse | DistroFamily::Debian | DistroFamily::Ubuntu => "install",
            _ => "method",
        }
    }

    /// Build a fresh store for this family.
    pub fn store(self, ctx: &StoreContext) -> Box<dyn Store> {
        match self {
            DistroFamily::Fedora
            | DistroFamily::Rhel
            | DistroFamily::CentOs
            | DistroFamily::Scientific => Box::new(redhat::RedHatStore::new(self, ctx.clone())),
            DistroFamily::Debian | DistroFamily::Ubuntu => {
                Box::new(debian::DebianStore::new(self, ctx.clone()))
            }
            DistroFamily::Suse => Box::new(suse::SuseStore::new(ctx.clone())),
            DistroFamily::Mandriva => Box::new(mandriva::MandrivaStore::new(ctx.clone())),
            DistroFamily::Generic => Box::new(generic::GenericStore::new(ctx.clone())),
        }
    }
}

impl fmt::Display for DistroFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for DistroFamily {
    type Err = FetchError;

    fn from_str(s: &str) -> Result<Self> {
        let family = match s.to_ascii_lowercase().as_str() {
            "fedora" => DistroFamily::Fedora,
            "rhel" | "redhat" => DistroFamily::Rhel,
            "centos" => DistroFamily::CentOs,
            "sl" | "scientific" => DistroFamily::Scientific,
            "suse" | "opensuse" | "sles" => DistroFamily::Suse,
            "debian" => DistroFamily::Debian,
            "ubuntu" => DistroFamily::Ubuntu,
            "mandriva" => DistroFamily::Mandriva,
            "generic" => DistroFamily::Generic,
            other => {
                return Err(FetchError::Config(format!(
                    "unknown distribution family '{other}'"
                )))
            }
        };
        Ok(family)
    }
}

/// Per-request inputs every store needs.
#[derive(Debug, Clone)]
pub struct StoreContext {
    /// Host architecture as reported by the host (`x86_64`, `i686`, ...).
    pub arch: String,
    pub virt_type: VirtType,
    /// Host tools for the Suse legacy initrd path.
    pub synth: SynthConfig,
}

impl StoreContext {
    pub fn new(arch: impl Into<String>, virt_type: VirtType) -> Self {
        Self {
            arch: arch.into(),
            virt_type,
            synth: SynthConfig::default(),
        }
    }

    pub fn with_synth(mut self, synth: SynthConfig) -> Self {
        self.synth = synth;
        self
    }
}

/// Kernel and initrd copied out of the tree. The caller owns both files.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct KernelArtifact {
    pub kernel: PathBuf,
    pub initrd: PathBuf,
    /// Extra kernel arguments pointing the installer at the tree. Empty for
    /// purely local sources.
    pub cmdline: String,
    pub family: DistroFamily,
}

/// Bootable install ISO copied out of the tree. The caller owns the file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BootIsoArtifact {
    pub iso: PathBuf,
    pub family: DistroFamily,
}

pub trait Store {
    fn family(&self) -> DistroFamily;

    /// Whether the tree belongs to this store's family.
    ///
    /// Absence of markers is `Ok(false)`. The only error returned is a
    /// transient transport failure, which the resolver may retry.
    fn is_valid_store(&mut self, fetcher: &mut dyn Fetcher) -> Result<bool>;

    fn acquire_kernel(&mut self, fetcher: &mut dyn Fetcher) -> Result<KernelArtifact>;

    fn acquire_boot_disk(&mut self, fetcher: &mut dyn Fetcher) -> Result<BootIsoArtifact>;
}

/// Descriptor lookups and path-candidate walking shared by all stores.
#[derive(Debug)]
pub(crate) struct TreeProbe {
    pub family: DistroFamily,
    pub ctx: StoreContext,
    pub treeinfo: TreeInfoCache,
}

impl TreeProbe {
    pub fn new(family: DistroFamily, ctx: StoreContext) -> Self {
        Self {
            family,
            ctx,
            treeinfo: TreeInfoCache::default(),
        }
    }

    pub fn virt(&self) -> VirtType {
        self.ctx.virt_type
    }

    /// Whether the descriptor exists and its family starts with one of `names`.
    pub fn treeinfo_names(&mut self, fetcher: &mut dyn Fetcher, names: &[&str]) -> Result<bool> {
        let matched = self
            .treeinfo
            .get(fetcher)?
            .is_some_and(|info| info.matches_family(names));
        if matched {
            debug!(family = %self.family, "matched by {}", crate::treeinfo::TREEINFO_FILE);
        }
        Ok(matched)
    }

    /// Whether any of `markers` exists. Markers may be files or directories.
    pub fn any_marker(&mut self, fetcher: &mut dyn Fetcher, markers: &[&str]) -> Result<bool> {
        for marker in markers {
            if fetcher.has_path(marker)? {
                debug!(family = %self.family, marker, "marker present");
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// Read a small text file out of the tree, `None` when it is absent.
    pub fn read_text(fetcher: &mut dyn Fetcher, rel: &str) -> Result<Option<String>> {
        let path = match fetcher.acquire_file(rel) {
            Ok(path) => path,
            Err(e) if e.is_transient() => return Err(e),
            Err(_) => return Ok(None),
        };
        let text = fs::read(&path).map(|b| String::from_utf8_lossy(&b).into_owned());
        let _ = fs::remove_file(&path);
        Ok(text.ok())
    }

    /// Kernel arguments for an installer booted from this tree.
    pub fn cmdline(&self, fetcher: &dyn Fetcher) -> String {
        let location = fetcher.location();
        if location.is_local() {
            String::new()
        } else {
            format!("{}={}", self.family.cmdline_directive(), location)
        }
    }

    fn unavailable(&self, media: &str) -> FetchError {
        FetchError::MediaUnavailable {
            family: self.family.to_string(),
            media: media.to_string(),
            virt: self.virt().to_string(),
        }
    }

    /// Kernel and initrd paths the descriptor declares for this request.
    pub fn declared_kernel(
        &mut self,
        fetcher: &mut dyn Fetcher,
    ) -> Result<(Option<String>, Option<String>)> {
        let virt = self.virt();
        Ok(self
            .treeinfo
            .get(fetcher)?
            .map(|info| info.kernel_paths(virt))
            .unwrap_or_default())
    }

    /// Acquire the kernel pair. A path the descriptor declares is always
    /// used; an undeclared one comes from the first candidate layout where
    /// it exists. With nothing declared, the first candidate whose kernel
    /// exists supplies both.
    pub fn fetch_kernel(
        &mut self,
        fetcher: &mut dyn Fetcher,
        candidates: &[(String, String)],
    ) -> Result<KernelArtifact> {
        let (kernel, initrd) = match self.declared_kernel(fetcher)? {
            (Some(kernel), Some(initrd)) => (kernel, initrd),
            (Some(kernel), None) => {
                let initrd = first_present(fetcher, candidates.iter().map(|c| &c.1))?
                    .ok_or_else(|| self.unavailable("initrd"))?;
                (kernel, initrd)
            }
            (None, Some(initrd)) => {
                let kernel = first_present(fetcher, candidates.iter().map(|c| &c.0))?
                    .ok_or_else(|| self.unavailable("kernel"))?;
                (kernel, initrd)
            }
            (None, None) => {
                let mut found = None;
                for (kernel, initrd) in candidates {
                    if fetcher.has_file(kernel)? {
                        found = Some((kernel.clone(), initrd.clone()));
                        break;
                    }
                }
                found.ok_or_else(|| self.unavailable("kernel"))?
            }
        };
        self.fetch_pair(fetcher, &kernel, &initrd)
    }

    /// Acquire an explicit kernel/initrd pair. A partially fetched pair is
    /// removed before the error is returned.
    pub fn fetch_pair(
        &self,
        fetcher: &mut dyn Fetcher,
        kernel_rel: &str,
        initrd_rel: &str,
    ) -> Result<KernelArtifact> {
        info!(family = %self.family, kernel = kernel_rel, initrd = initrd_rel, "fetching kernel");
        let kernel = fetcher
            .acquire_file(kernel_rel)
            .map_err(|e| self.media_error(e, "kernel"))?;
        let initrd = match fetcher.acquire_file(initrd_rel) {
            Ok(path) => path,
            Err(e) => {
                let _ = fs::remove_file(&kernel);
                return Err(self.media_error(e, "initrd"));
            }
        };
        Ok(KernelArtifact {
            kernel,
            initrd,
            cmdline: self.cmdline(fetcher),
            family: self.family,
        })
    }

    /// Acquire the boot ISO from the descriptor or the first existing
    /// candidate.
    pub fn fetch_boot_iso(
        &mut self,
        fetcher: &mut dyn Fetcher,
        candidates: &[String],
    ) -> Result<BootIsoArtifact> {
        let virt = self.virt();
        let declared = self
            .treeinfo
            .get(fetcher)?
            .and_then(|info| info.image_path(KEY_BOOT_ISO, virt));

        let rel = match declared {
            Some(rel) => rel,
            None => first_present(fetcher, candidates)?
                .ok_or_else(|| self.unavailable("boot ISO"))?,
        };

        info!(family = %self.family, iso = %rel, "fetching boot ISO");
        let iso = fetcher
            .acquire_file(&rel)
            .map_err(|e| self.media_error(e, "boot ISO"))?;
        Ok(BootIsoArtifact {
            iso,
            family: self.family,
        })
    }

    /// A path declared or probed but then missing means the tree is
    /// incomplete, not that the caller asked for a bad location.
    fn media_error(&self, e: FetchError, media: &str) -> FetchError {
        if e.is_not_found() {
            debug!(error = %e, "declared media missing");
            self.unavailable(media)
        } else {
            e
        }
    }
}

/// First of `paths` that exists as a file in the tree.
fn first_present<'a>(
    fetcher: &mut dyn Fetcher,
    paths: impl IntoIterator<Item = &'a String>,
) -> Result<Option<String>> {
    for path in paths {
        if fetcher.has_file(path)? {
            return Ok(Some(path.clone()));
        }
    }
    Ok(None)
}

/// `(kernel, initrd)` pair rooted at `dir`.
pub(crate) fn pair(dir: &str, kernel: &str, initrd: &str) -> (String, String) {
    (format!("{dir}/{kernel}"), format!("{dir}/{initrd}"))
}

#[cfg(test)]
pub(crate) mod test_support {
    use std::fs;
    use std::path::Path;

    use tempfile::TempDir;

    use crate::fetcher::local::LocalFetcher;
    use crate::fetcher::Fetcher;
    use crate::location::Location;
    use crate::progress::NoProgress;

    /// Local tree plus scratch dir, with helpers to populate files.
    pub struct Tree {
        pub root: TempDir,
        pub scratch: TempDir,
    }

    impl Tree {
        pub fn new() -> Self {
            Self {
                root: TempDir::new().unwrap(),
                scratch: TempDir::new().unwrap(),
            }
        }

        pub fn file(&self, rel: &str, contents: &str) -> &Self {
            let path = self.root.path().join(rel);
            fs::create_dir_all(path.parent().unwrap()).unwrap();
            fs::write(path, contents).unwrap();
            self
        }

        pub fn fetcher(&self) -> LocalFetcher {
            let mut fetcher = LocalFetcher::new(
                Location::parse(self.root.path().to_str().unwrap()).unwrap(),
                self.root.path().to_path_buf(),
                self.scratch.path(),
                Box::new(NoProgress),
            );
            fetcher.prepare().unwrap();
            fetcher
        }

        pub fn scratch_entries(&self) -> usize {
            fs::read_dir(self.scratch.path()).unwrap().count()
        }
    }

    pub fn read(path: &Path) -> String {
        fs::read_to_string(path).unwrap()
    }
}
