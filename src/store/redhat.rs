//! Red Hat family trees: Fedora, RHEL, CentOS and Scientific Linux.
//!
//! All four share the anaconda layout (`images/pxeboot`, `images/xen`,
//! `images/boot.iso`) and differ only in how they are recognized.

use tracing::debug;

use super::{pair, BootIsoArtifact, DistroFamily, KernelArtifact, Store, StoreContext, TreeProbe, VirtType};
use crate::error::Result;
use crate::fetcher::Fetcher;

pub struct RedHatStore {
    probe: TreeProbe,
}

impl RedHatStore {
    pub fn new(family: DistroFamily, ctx: StoreContext) -> Self {
        Self {
            probe: TreeProbe::new(family, ctx),
        }
    }

    /// Family strings as they appear in `.treeinfo`.
    fn treeinfo_names(&self) -> &'static [&'static str] {
        match self.probe.family {
            DistroFamily::Fedora => &["Fedora"],
            DistroFamily::Rhel => &["Red Hat Enterprise Linux"],
            DistroFamily::CentOs => &["CentOS"],
            DistroFamily::Scientific => &["Scientific Linux"],
            _ => &[],
        }
    }

    /// Top-level entries that only this distribution ships.
    fn markers(&self) -> &'static [&'static str] {
        match self.probe.family {
            DistroFamily::Fedora => &["Fedora"],
            DistroFamily::Rhel => &["Server", "Client", "RedHat"],
            DistroFamily::CentOs => &["CentOS"],
            DistroFamily::Scientific => &["SL"],
            _ => &[],
        }
    }

    fn kernel_dir(&self) -> &'static str {
        match self.probe.virt() {
            VirtType::Hvm => "images/pxeboot",
            VirtType::Paravirt => "images/xen",
        }
    }
}

impl Store for RedHatStore {
    fn family(&self) -> DistroFamily {
        self.probe.family
    }

    fn is_valid_store(&mut self, fetcher: &mut dyn Fetcher) -> Result<bool> {
        let names = self.treeinfo_names();
        if self.probe.treeinfo_names(fetcher, names)? {
            return Ok(true);
        }
        let markers = self.markers();
        let found = self.probe.any_marker(fetcher, markers)?;
        if !found {
            debug!(family = %self.probe.family, "no family markers");
        }
        Ok(found)
    }

    fn acquire_kernel(&mut self, fetcher: &mut dyn Fetcher) -> Result<KernelArtifact> {
        let candidates = [pair(self.kernel_dir(), "vmlinuz", "initrd.img")];
        self.probe.fetch_kernel(fetcher, &candidates)
    }

    fn acquire_boot_disk(&mut self, fetcher: &mut dyn Fetcher) -> Result<BootIsoArtifact> {
        self.probe
            .fetch_boot_iso(fetcher, &["images/boot.iso".to_string()])
    }
}
