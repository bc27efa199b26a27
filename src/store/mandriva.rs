//! Mandriva trees.
//!
//! Recognized by a `VERSION` file whose first line names the vendor. Only
//! fully virtualized guests are supported; there is no Xen kernel.

use super::{BootIsoArtifact, DistroFamily, KernelArtifact, Store, StoreContext, TreeProbe, VirtType};
use crate::error::{FetchError, Result};
use crate::fetcher::Fetcher;

const VERSION_FILE: &str = "VERSION";
const VENDOR: &str = "Mandriva";

pub struct MandrivaStore {
    probe: TreeProbe,
}

impl MandrivaStore {
    pub fn new(ctx: StoreContext) -> Self {
        Self {
            probe: TreeProbe::new(DistroFamily::Mandriva, ctx),
        }
    }
}

impl Store for MandrivaStore {
    fn family(&self) -> DistroFamily {
        DistroFamily::Mandriva
    }

    fn is_valid_store(&mut self, fetcher: &mut dyn Fetcher) -> Result<bool> {
        if self.probe.treeinfo_names(fetcher, &[VENDOR])? {
            return Ok(true);
        }
        let first_line = TreeProbe::read_text(fetcher, VERSION_FILE)?
            .and_then(|text| text.lines().next().map(str::to_string));
        Ok(first_line.is_some_and(|line| line.starts_with(VENDOR)))
    }

    fn acquire_kernel(&mut self, fetcher: &mut dyn Fetcher) -> Result<KernelArtifact> {
        if self.probe.virt() == VirtType::Paravirt {
            return Err(FetchError::MediaUnavailable {
                family: DistroFamily::Mandriva.to_string(),
                media: "kernel".to_string(),
                virt: VirtType::Paravirt.to_string(),
            });
        }
        let candidates = [(
            "isolinux/alt0/vmlinuz".to_string(),
            "isolinux/alt0/all.rdz".to_string(),
        )];
        self.probe.fetch_kernel(fetcher, &candidates)
    }

    fn acquire_boot_disk(&mut self, fetcher: &mut dyn Fetcher) -> Result<BootIsoArtifact> {
        self.probe
            .fetch_boot_iso(fetcher, &["install/images/boot.iso".to_string()])
    }
}
