//! Package lookup in a Suse tree's `ls-lR.gz` listing.
//!
//! The listing is plain `ls -lR` output. Each directory block starts with a
//! `./suse/<dir>:` header followed by long-format entries whose last field
//! is the file name.
//!
//! Within one directory the first matching file is kept. Directories later
//! in the listing replace earlier picks. No version comparison is done, so
//! the result is whatever the mirror happened to list, not necessarily the
//! newest build.

use std::io::BufRead;

use crate::arch::is_x86_32;

pub const LISTING_FILE: &str = "ls-lR.gz";

const INSTALL_INITRD: &str = "install-initrd";
const KERNEL_XEN: &str = "kernel-xen";
const KERNEL_XENPAE: &str = "kernel-xenpae";

/// Tree-relative paths of the two packages the legacy initrd is built from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackageSelection {
    pub kernel: String,
    pub install_initrd: String,
}

/// `suse/<dir>` subdirectories that can carry packages for `arch`.
pub fn arch_dirs(arch: &str) -> &'static [&'static str] {
    if is_x86_32(arch) {
        &["i586", "i686"]
    } else {
        &["x86_64"]
    }
}

/// Whether `file` is an RPM of exactly `package` (not a longer name sharing
/// its prefix, as `kernel-xenpae` shares `kernel-xen`).
fn is_package(file: &str, package: &str) -> bool {
    file.strip_prefix(package)
        .and_then(|rest| rest.strip_prefix('-'))
        .is_some_and(|rest| rest.chars().next().is_some_and(|c| c.is_ascii_digit()))
        && file.ends_with(".rpm")
}

#[derive(Debug, Default)]
struct DirPicks {
    xen: Option<String>,
    xenpae: Option<String>,
    install_initrd: Option<String>,
}

/// Scan a decompressed listing for the Xen kernel and install-initrd
/// packages matching `arch`. `kernel-xenpae` is preferred on 32-bit x86.
pub fn scan(listing: impl BufRead, arch: &str) -> Option<PackageSelection> {
    let dirs = arch_dirs(arch);
    let mut kernel_xen: Option<String> = None;
    let mut kernel_xenpae: Option<String> = None;
    let mut install_initrd: Option<String> = None;

    let mut current: Option<String> = None;
    let mut picks = DirPicks::default();

    let mut flush = |dir: &Option<String>, picks: &mut DirPicks| {
        let Some(dir) = dir else { return };
        let take = std::mem::take(picks);
        if let Some(f) = take.xen {
            kernel_xen = Some(format!("{dir}/{f}"));
        }
        if let Some(f) = take.xenpae {
            kernel_xenpae = Some(format!("{dir}/{f}"));
        }
        if let Some(f) = take.install_initrd {
            install_initrd = Some(format!("{dir}/{f}"));
        }
    };

    for line in listing.lines().map_while(Result::ok) {
        let line = line.trim_end();
        if let Some(header) = line.strip_suffix(':') {
            flush(&current, &mut picks);
            current = header
                .strip_prefix("./")
                .filter(|h| {
                    h.strip_prefix("suse/")
                        .is_some_and(|d| dirs.contains(&d))
                })
                .map(str::to_string);
            continue;
        }
        if current.is_none() {
            continue;
        }
        let Some(file) = line.split_whitespace().last() else {
            continue;
        };
        if picks.xen.is_none() && is_package(file, KERNEL_XEN) {
            picks.xen = Some(file.to_string());
        } else if picks.xenpae.is_none() && is_package(file, KERNEL_XENPAE) {
            picks.xenpae = Some(file.to_string());
        } else if picks.install_initrd.is_none() && is_package(file, INSTALL_INITRD) {
            picks.install_initrd = Some(file.to_string());
        }
    }
    flush(&current, &mut picks);

    let kernel = if is_x86_32(arch) {
        kernel_xenpae.or(kernel_xen)
    } else {
        kernel_xen
    }?;
    Some(PackageSelection {
        kernel,
        install_initrd: install_initrd?,
    })
}
