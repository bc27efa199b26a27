//! `.treeinfo` descriptor handling.
//!
//! The descriptor is an INI file shipped at the root of newer install trees:
//!
//! ```ini
//! [general]
//! family = Fedora
//! version = 8
//! arch = x86_64
//!
//! [images-x86_64]
//! kernel = images/pxeboot/vmlinuz
//! initrd = images/pxeboot/initrd.img
//! boot.iso = images/boot.iso
//!
//! [images-xen]
//! kernel = images/xen/vmlinuz
//! initrd = images/xen/initrd.img
//! ```
//!
//! When present it is authoritative. When absent or unparseable, stores fall
//! back to their marker-file heuristics.

use std::fmt;
use std::fs;

use tini::Ini;
use tracing::{debug, warn};

use crate::error::Result;
use crate::fetcher::Fetcher;
use crate::store::VirtType;

pub const TREEINFO_FILE: &str = ".treeinfo";

/// Logical media names looked up in `images-*` sections.
pub const KEY_KERNEL: &str = "kernel";
pub const KEY_INITRD: &str = "initrd";
pub const KEY_BOOT_ISO: &str = "boot.iso";

pub struct TreeInfo {
    ini: Ini,
}

impl fmt::Debug for TreeInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TreeInfo")
            .field("family", &self.family())
            .field("arch", &self.arch())
            .field("version", &self.version())
            .finish()
    }
}

impl TreeInfo {
    pub fn parse(text: &str) -> Option<Self> {
        match Ini::from_string(text) {
            Ok(ini) => Some(Self { ini }),
            Err(e) => {
                warn!(error = %e, "unparseable {TREEINFO_FILE}; ignoring it");
                None
            }
        }
    }

    fn general(&self, key: &str) -> Option<String> {
        self.ini
            .get::<String>("general", key)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    }

    pub fn family(&self) -> Option<String> {
        self.general("family")
    }

    pub fn arch(&self) -> Option<String> {
        self.general("arch")
    }

    pub fn version(&self) -> Option<String> {
        self.general("version")
    }

    pub fn variant(&self) -> Option<String> {
        self.general("variant")
    }

    /// Whether the declared family starts with any of `names`.
    pub fn matches_family(&self, names: &[&str]) -> bool {
        self.family()
            .is_some_and(|family| names.iter().any(|n| family.starts_with(n)))
    }

    /// Sections consulted for a request, most specific first.
    fn image_sections(&self, virt: VirtType) -> Vec<String> {
        match virt {
            VirtType::Paravirt => vec!["images-xen".to_string()],
            VirtType::Hvm => {
                let mut sections = Vec::new();
                if let Some(arch) = self.arch() {
                    sections.push(format!("images-{arch}"));
                }
                sections.push("images-hvm".to_string());
                sections
            }
        }
    }

    /// Relative path of a logical media `key` for the requested virt type.
    pub fn image_path(&self, key: &str, virt: VirtType) -> Option<String> {
        self.image_sections(virt).iter().find_map(|section| {
            self.ini
                .get::<String>(section, key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        })
    }

    /// Declared kernel and initrd paths. Each is looked up on its own; a
    /// descriptor may declare one without the other.
    pub fn kernel_paths(&self, virt: VirtType) -> (Option<String>, Option<String>) {
        (
            self.image_path(KEY_KERNEL, virt),
            self.image_path(KEY_INITRD, virt),
        )
    }
}

#[derive(Debug, Default)]
enum CacheState {
    #[default]
    Unfetched,
    Absent,
    Present(TreeInfo),
}

/// One-shot, per-store cache of the tree's descriptor.
#[derive(Debug, Default)]
pub struct TreeInfoCache {
    state: CacheState,
}

impl TreeInfoCache {
    /// Fetch and parse the descriptor on first use. Absence and parse errors
    /// are cached as "no descriptor"; only transient transport errors are
    /// returned, and those leave the cache unfetched so a retry can fill it.
    pub fn get(&mut self, fetcher: &mut dyn Fetcher) -> Result<Option<&TreeInfo>> {
        if matches!(self.state, CacheState::Unfetched) {
            self.state = match load(fetcher)? {
                Some(info) => CacheState::Present(info),
                None => CacheState::Absent,
            };
        }
        Ok(match &self.state {
            CacheState::Present(info) => Some(info),
            _ => None,
        })
    }
}

fn load(fetcher: &mut dyn Fetcher) -> Result<Option<TreeInfo>> {
    let path = match fetcher.acquire_file(TREEINFO_FILE) {
        Ok(path) => path,
        Err(e) if e.is_transient() => return Err(e),
        Err(e) => {
            debug!(error = %e, "no {TREEINFO_FILE} in tree");
            return Ok(None);
        }
    };

    let text = fs::read_to_string(&path);
    if let Err(e) = fs::remove_file(&path) {
        debug!(path = %path.display(), error = %e, "failed to remove descriptor temp file");
    }
    match text {
        Ok(text) => Ok(TreeInfo::parse(&text)),
        Err(e) => {
            warn!(error = %e, "unreadable {TREEINFO_FILE}; ignoring it");
            Ok(None)
        }
    }
}
