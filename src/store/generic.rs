//! Fallback store for trees no family store recognized.
//!
//! Matches any tree with a descriptor, or any tree where one of several
//! well-known kernel layouts exists. The layout found while probing is
//! reused for acquisition.

use tracing::debug;

use super::{pair, BootIsoArtifact, DistroFamily, KernelArtifact, Store, StoreContext, TreeProbe, VirtType};
use crate::arch::tree_arch;
use crate::error::Result;
use crate::fetcher::Fetcher;

pub struct GenericStore {
    probe: TreeProbe,
    found: Option<(String, String)>,
}

impl GenericStore {
    pub fn new(ctx: StoreContext) -> Self {
        Self {
            probe: TreeProbe::new(DistroFamily::Generic, ctx),
            found: None,
        }
    }

    fn kernel_candidates(&self) -> Vec<(String, String)> {
        let arch = tree_arch(&self.probe.ctx.arch);
        match self.probe.virt() {
            VirtType::Hvm => vec![
                pair("images/pxeboot", "vmlinuz", "initrd.img"),
                pair("isolinux", "vmlinuz", "initrd.img"),
                pair(&format!("boot/{arch}/loader"), "linux", "initrd"),
                pair("install/netboot", "vmlinuz", "initrd.gz"),
            ],
            VirtType::Paravirt => vec![
                pair("images/xen", "vmlinuz", "initrd.img"),
                (
                    format!("boot/{arch}/vmlinuz-xen"),
                    format!("boot/{arch}/initrd-xen"),
                ),
            ],
        }
    }

    fn iso_candidates(&self) -> Vec<String> {
        let arch = tree_arch(&self.probe.ctx.arch);
        vec![
            "images/boot.iso".to_string(),
            "boot/boot.iso".to_string(),
            format!("boot/{arch}/boot.iso"),
        ]
    }
}

impl Store for GenericStore {
    fn family(&self) -> DistroFamily {
        DistroFamily::Generic
    }

    fn is_valid_store(&mut self, fetcher: &mut dyn Fetcher) -> Result<bool> {
        if self.probe.treeinfo.get(fetcher)?.is_some() {
            return Ok(true);
        }
        for (kernel, initrd) in self.kernel_candidates() {
            if fetcher.has_file(&kernel)? && fetcher.has_file(&initrd)? {
                debug!(kernel = %kernel, "generic layout found");
                self.found = Some((kernel, initrd));
                return Ok(true);
            }
        }
        Ok(false)
    }

    fn acquire_kernel(&mut self, fetcher: &mut dyn Fetcher) -> Result<KernelArtifact> {
        let candidates = match &self.found {
            Some(found) => vec![found.clone()],
            None => self.kernel_candidates(),
        };
        self.probe.fetch_kernel(fetcher, &candidates)
    }

    fn acquire_boot_disk(&mut self, fetcher: &mut dyn Fetcher) -> Result<BootIsoArtifact> {
        let candidates = self.iso_candidates();
        self.probe.fetch_boot_iso(fetcher, &candidates)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::test_support::{read, Tree};

    #[test]
    fn suse_style_loader_layout_with_normalized_arch() {
        let tree = Tree::new();
        tree.file("boot/i386/loader/linux", "k")
            .file("boot/i386/loader/initrd", "i");
        let mut fetcher = tree.fetcher();
        let mut store = GenericStore::new(StoreContext::new("i686", VirtType::Hvm));

        assert!(store.is_valid_store(&mut fetcher).unwrap());
        let artifact = store.acquire_kernel(&mut fetcher).unwrap();
        assert_eq!(read(&artifact.kernel), "k");
        assert_eq!(artifact.family, DistroFamily::Generic);
    }

    #[test]
    fn kernel_without_initrd_does_not_match() {
        let tree = Tree::new();
        tree.file("isolinux/vmlinuz", "k");
        let mut fetcher = tree.fetcher();
        let mut store = GenericStore::new(StoreContext::new("x86_64", VirtType::Hvm));
        assert!(!store.is_valid_store(&mut fetcher).unwrap());
        assert_eq!(tree.scratch_entries(), 0);
    }

    #[test]
    fn boot_iso_under_arch_dir() {
        let tree = Tree::new();
        tree.file("boot/x86_64/boot.iso", "iso");
        let mut fetcher = tree.fetcher();
        let mut store = GenericStore::new(StoreContext::new("x86_64", VirtType::Hvm));
        assert_eq!(read(&store.acquire_boot_disk(&mut fetcher).unwrap().iso), "iso");
    }
}
