//! Debian and Ubuntu installer trees.
//!
//! Release mirrors keep the installer under `current/images`; daily builds
//! put it directly under `daily`. Either way a `MANIFEST` file at the
//! prefix names the installer flavour.

use tracing::debug;

use super::{BootIsoArtifact, DistroFamily, KernelArtifact, Store, StoreContext, TreeProbe, VirtType};
use crate::arch::debian_arch;
use crate::error::Result;
use crate::fetcher::Fetcher;

const PREFIXES: [&str; 2] = ["current/images", "daily"];

pub struct DebianStore {
    probe: TreeProbe,
    prefix: Option<&'static str>,
}

impl DebianStore {
    pub fn new(family: DistroFamily, ctx: StoreContext) -> Self {
        Self {
            probe: TreeProbe::new(family, ctx),
            prefix: None,
        }
    }

    fn distro(&self) -> &'static str {
        match self.probe.family {
            DistroFamily::Ubuntu => "ubuntu",
            _ => "debian",
        }
    }

    fn installer_tag(&self) -> String {
        format!("{}-installer", self.distro())
    }

    /// Locate the prefix whose manifest names this flavour's installer.
    fn detect(&mut self, fetcher: &mut dyn Fetcher) -> Result<Option<&'static str>> {
        if self.prefix.is_some() {
            return Ok(self.prefix);
        }
        let tag = self.installer_tag();
        for prefix in PREFIXES {
            let manifest = format!("{prefix}/MANIFEST");
            match TreeProbe::read_text(fetcher, &manifest)? {
                Some(text) if text.contains(&tag) => {
                    debug!(family = %self.probe.family, prefix, "installer manifest found");
                    self.prefix = Some(prefix);
                    break;
                }
                Some(_) => debug!(manifest = %manifest, "manifest names another installer"),
                None => {}
            }
        }
        Ok(self.prefix)
    }

    /// Prefix for media lookups; release layout when nothing was detected.
    fn media_prefix(&mut self, fetcher: &mut dyn Fetcher) -> Result<&'static str> {
        Ok(self.detect(fetcher)?.unwrap_or(PREFIXES[0]))
    }
}

impl Store for DebianStore {
    fn family(&self) -> DistroFamily {
        self.probe.family
    }

    fn is_valid_store(&mut self, fetcher: &mut dyn Fetcher) -> Result<bool> {
        let name = match self.probe.family {
            DistroFamily::Ubuntu => "Ubuntu",
            _ => "Debian",
        };
        if self.probe.treeinfo_names(fetcher, &[name])? {
            return Ok(true);
        }
        Ok(self.detect(fetcher)?.is_some())
    }

    fn acquire_kernel(&mut self, fetcher: &mut dyn Fetcher) -> Result<KernelArtifact> {
        let prefix = self.media_prefix(fetcher)?;
        let dir = match self.probe.virt() {
            VirtType::Paravirt => format!("{prefix}/netboot/xen"),
            VirtType::Hvm => format!(
                "{prefix}/netboot/{}/{}",
                self.installer_tag(),
                debian_arch(&self.probe.ctx.arch)
            ),
        };
        let kernel = match self.probe.virt() {
            VirtType::Paravirt => "vmlinuz",
            VirtType::Hvm => "linux",
        };
        let candidates = [(format!("{dir}/{kernel}"), format!("{dir}/initrd.gz"))];
        self.probe.fetch_kernel(fetcher, &candidates)
    }

    fn acquire_boot_disk(&mut self, fetcher: &mut dyn Fetcher) -> Result<BootIsoArtifact> {
        let prefix = self.media_prefix(fetcher)?;
        self.probe
            .fetch_boot_iso(fetcher, &[format!("{prefix}/netboot/mini.iso")])
    }
}
