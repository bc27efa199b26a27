//! Suse and openSUSE trees.
//!
//! Recognized by `directory.yast`. Fully virtualized guests boot the
//! regular loader kernel. Xen guests use the `-xen` kernel shipped from
//! 10.3 on; older trees have none and get one synthesized from packages
//! (see [`initrd`]).

pub mod initrd;
pub mod listing;

use tracing::info;

use super::{pair, BootIsoArtifact, DistroFamily, KernelArtifact, Store, StoreContext, TreeProbe, VirtType};
use crate::arch::tree_arch;
use crate::error::Result;
use crate::fetcher::Fetcher;

const MARKER: &str = "directory.yast";

pub struct SuseStore {
    probe: TreeProbe,
}

impl SuseStore {
    pub fn new(ctx: StoreContext) -> Self {
        Self {
            probe: TreeProbe::new(DistroFamily::Suse, ctx),
        }
    }

    fn boot_dir(&self) -> String {
        format!("boot/{}", tree_arch(&self.probe.ctx.arch))
    }

    fn paravirt_kernel(&mut self, fetcher: &mut dyn Fetcher) -> Result<KernelArtifact> {
        let dir = self.boot_dir();
        let shipped = pair(&dir, "vmlinuz-xen", "initrd-xen");
        let declared = self.probe.declared_kernel(fetcher)?;
        if declared != (None, None) || fetcher.has_file(&shipped.0)? {
            return self.probe.fetch_kernel(fetcher, &[shipped]);
        }

        info!("tree predates Xen installer kernels; synthesizing one");
        let built = initrd::synthesize(fetcher, &self.probe.ctx.arch, &self.probe.ctx.synth)?;
        Ok(KernelArtifact {
            kernel: built.kernel,
            initrd: built.initrd,
            cmdline: self.probe.cmdline(fetcher),
            family: DistroFamily::Suse,
        })
    }
}

impl Store for SuseStore {
    fn family(&self) -> DistroFamily {
        DistroFamily::Suse
    }

    fn is_valid_store(&mut self, fetcher: &mut dyn Fetcher) -> Result<bool> {
        if self.probe.treeinfo_names(fetcher, &["SUSE", "openSUSE"])? {
            return Ok(true);
        }
        self.probe.any_marker(fetcher, &[MARKER])
    }

    fn acquire_kernel(&mut self, fetcher: &mut dyn Fetcher) -> Result<KernelArtifact> {
        match self.probe.virt() {
            VirtType::Paravirt => self.paravirt_kernel(fetcher),
            VirtType::Hvm => {
                let dir = format!("{}/loader", self.boot_dir());
                let candidates = [(format!("{dir}/linux"), format!("{dir}/initrd"))];
                self.probe.fetch_kernel(fetcher, &candidates)
            }
        }
    }

    fn acquire_boot_disk(&mut self, fetcher: &mut dyn Fetcher) -> Result<BootIsoArtifact> {
        self.probe
            .fetch_boot_iso(fetcher, &["boot/boot.iso".to_string()])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    use super::initrd::test_support::LegacyTree;
    use crate::config::{FetchConfig, SynthConfig};
    use crate::error::FetchError;
    use crate::fetcher::url::UrlFetcher;
    use crate::location::Location;
    use crate::progress::NoProgress;
    use crate::store::test_support::{read, Tree};
    use crate::testutil::TestServer;

    fn store(arch: &str, virt: VirtType) -> SuseStore {
        SuseStore::new(StoreContext::new(arch, virt))
    }

    #[test]
    fn directory_yast_marks_the_tree() {
        let tree = Tree::new();
        tree.file(MARKER, "boot\nsuse\n");
        let mut fetcher = tree.fetcher();
        assert!(store("x86_64", VirtType::Hvm).is_valid_store(&mut fetcher).unwrap());
    }

    #[test]
    fn hvm_kernel_from_loader_dir() {
        let tree = Tree::new();
        tree.file(MARKER, "")
            .file("boot/i386/loader/linux", "k")
            .file("boot/i386/loader/initrd", "i");
        let mut fetcher = tree.fetcher();
        let artifact = store("i586", VirtType::Hvm).acquire_kernel(&mut fetcher).unwrap();
        assert_eq!(read(&artifact.kernel), "k");
        assert_eq!(artifact.cmdline, "");
    }

    #[test]
    fn shipped_xen_kernel_is_preferred() {
        let tree = Tree::new();
        tree.file(MARKER, "")
            .file("boot/x86_64/vmlinuz-xen", "xk")
            .file("boot/x86_64/initrd-xen", "xi");
        let mut fetcher = tree.fetcher();
        let artifact = store("x86_64", VirtType::Paravirt)
            .acquire_kernel(&mut fetcher)
            .unwrap();
        assert_eq!(read(&artifact.kernel), "xk");
        assert_eq!(read(&artifact.initrd), "xi");
    }

    #[test]
    fn descriptor_kernel_alone_still_wins() {
        let tree = Tree::new();
        tree.file(
            ".treeinfo",
            "[general]\nfamily = openSUSE\n\n[images-xen]\nkernel = boot/x86_64/xen/linux\n",
        )
        .file("boot/x86_64/xen/linux", "declared")
        .file("boot/x86_64/vmlinuz-xen", "xk")
        .file("boot/x86_64/initrd-xen", "xi");
        let mut fetcher = tree.fetcher();
        let artifact = store("x86_64", VirtType::Paravirt)
            .acquire_kernel(&mut fetcher)
            .unwrap();
        assert_eq!(read(&artifact.kernel), "declared");
        assert_eq!(read(&artifact.initrd), "xi");
    }

    #[test]
    fn old_tree_without_listing_fails_synthesis() {
        let tree = Tree::new();
        tree.file(MARKER, "");
        let mut fetcher = tree.fetcher();
        let ctx = StoreContext::new("x86_64", VirtType::Paravirt).with_synth(SynthConfig {
            rpm2cpio_program: "true".to_string(),
            cpio_program: "true".to_string(),
            depmod_program: "true".to_string(),
            ..SynthConfig::default()
        });
        let err = SuseStore::new(ctx).acquire_kernel(&mut fetcher).unwrap_err();
        assert!(matches!(err, FetchError::Synthesis(_)));
        assert_eq!(tree.scratch_entries(), 0);
    }

    #[test]
    fn old_http_tree_gets_synthesized_kernel_and_install_cmdline() {
        let legacy = LegacyTree::new();
        let server = TestServer::start();
        server.serve("/tree/", 200, b"index");
        for (rel, data) in &legacy.files {
            server.serve(&format!("/tree/{rel}"), 200, data);
        }
        let scratch = TempDir::new().unwrap();
        let location = server.url("tree");
        let mut fetcher = UrlFetcher::new(
            Location::parse(&location).unwrap(),
            scratch.path(),
            &FetchConfig::default(),
            Box::new(NoProgress),
        );
        fetcher.prepare().unwrap();

        let ctx = StoreContext::new("x86_64", VirtType::Paravirt).with_synth(legacy.synth_config());
        let mut store = SuseStore::new(ctx);
        assert!(store.is_valid_store(&mut fetcher).unwrap());
        let artifact = store.acquire_kernel(&mut fetcher).unwrap();

        assert_eq!(read(&artifact.kernel), "kernel-image");
        assert!(artifact.initrd.starts_with(scratch.path()));
        assert_eq!(artifact.cmdline, format!("install={location}"));
        assert_eq!(artifact.family, DistroFamily::Suse);
        assert_eq!(std::fs::read_dir(scratch.path()).unwrap().count(), 2);
    }
}
