//! Legacy Xen initrd synthesis for Suse trees older than 10.3.
//!
//! Those trees ship no Xen-capable installer initrd. One is built from two
//! packages found through the tree's `ls-lR.gz`:
//!
//! 1. `kernel-xen` (or `kernel-xenpae`) provides the kernel binary, its
//!    `System.map` and the module tree.
//! 2. `install-initrd` provides a base initrd and the list of modules the
//!    installer needs.
//!
//! The listed modules are staged into a `lib/modules/<version>` tree,
//! `depmod` regenerates its metadata, and the staging tree is appended to the
//! decompressed base initrd as a second newc archive before recompressing.
//!
//! Everything intermediate lives in a [`TempDir`] next to the downloads and
//! is gone on every exit path. Only the finished kernel and initrd outlive
//! the call.

use std::collections::HashMap;
use std::fs::{self, File};
use std::io::{BufReader, Read, Write};
use std::os::unix::fs::{symlink, PermissionsExt};
use std::path::{Path, PathBuf};

use anyhow::{bail, Context};
use cpio::newc::{Builder as NewcBuilder, ModeFileType};
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use tempfile::TempDir;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use super::listing::{self, PackageSelection, LISTING_FILE};
use crate::arch::tree_arch;
use crate::config::SynthConfig;
use crate::error::{FetchError, Result};
use crate::fetcher::{new_temp_file, Fetcher};
use crate::preflight::check_required_tools;
use crate::process::Cmd;

const MODULE_EXTENSIONS: [&str; 4] = [".ko", ".ko.gz", ".ko.xz", ".ko.zst"];

/// Finished kernel and initrd, both persisted under the scratch directory.
#[derive(Debug)]
pub struct SynthesizedKernel {
    pub kernel: PathBuf,
    pub initrd: PathBuf,
}

/// Downloaded packages, removed when dropped.
#[derive(Default)]
struct Downloads(Vec<PathBuf>);

impl Downloads {
    fn track(&mut self, path: PathBuf) -> PathBuf {
        self.0.push(path.clone());
        path
    }
}

impl Drop for Downloads {
    fn drop(&mut self) {
        for path in &self.0 {
            if let Err(e) = fs::remove_file(path) {
                debug!(path = %path.display(), error = %e, "failed to remove package download");
            }
        }
    }
}

/// Build a Xen kernel and installer initrd for `arch` from the tree's
/// packages.
pub fn synthesize(
    fetcher: &mut dyn Fetcher,
    arch: &str,
    config: &SynthConfig,
) -> Result<SynthesizedKernel> {
    check_required_tools(&[
        (config.rpm2cpio_program.as_str(), "rpm"),
        (config.cpio_program.as_str(), "cpio"),
        (config.depmod_program.as_str(), "kmod"),
    ])
    .map_err(FetchError::Synthesis)?;

    let selection = find_packages(fetcher, arch)?;
    info!(
        kernel = %selection.kernel,
        install_initrd = %selection.install_initrd,
        "building legacy Xen initrd"
    );

    let mut downloads = Downloads::default();
    let kernel_rpm = downloads.track(fetch_package(fetcher, &selection.kernel)?);
    let initrd_rpm = downloads.track(fetch_package(fetcher, &selection.install_initrd)?);

    let scratch = kernel_rpm
        .parent()
        .map(Path::to_path_buf)
        .unwrap_or_else(std::env::temp_dir);
    build(&kernel_rpm, &initrd_rpm, &scratch, arch, config).map_err(FetchError::Synthesis)
}

fn find_packages(fetcher: &mut dyn Fetcher, arch: &str) -> Result<PackageSelection> {
    let path = fetch_package(fetcher, LISTING_FILE)?;
    let scanned = File::open(&path)
        .map(|file| listing::scan(BufReader::new(GzDecoder::new(file)), arch));
    let _ = fs::remove_file(&path);

    match scanned {
        Ok(Some(selection)) => Ok(selection),
        Ok(None) => Err(FetchError::Synthesis(anyhow::anyhow!(
            "{LISTING_FILE} lists no kernel-xen and install-initrd packages for {arch}"
        ))),
        Err(e) => Err(FetchError::Synthesis(
            anyhow::Error::new(e).context(format!("reading {LISTING_FILE}")),
        )),
    }
}

/// Transient errors stay retryable; anything else fails the synthesis.
fn fetch_package(fetcher: &mut dyn Fetcher, rel: &str) -> Result<PathBuf> {
    fetcher.acquire_file(rel).map_err(|e| {
        if e.is_transient() {
            e
        } else {
            FetchError::Synthesis(anyhow::Error::new(e).context(format!("downloading {rel}")))
        }
    })
}

fn build(
    kernel_rpm: &Path,
    initrd_rpm: &Path,
    scratch: &Path,
    arch: &str,
    config: &SynthConfig,
) -> anyhow::Result<SynthesizedKernel> {
    let work = tempfile::Builder::new()
        .prefix("initrd-synth.")
        .tempdir_in(scratch)
        .context("creating synthesis work dir")?;
    let kernel_root = work.path().join("kernel");
    let helper_root = work.path().join("install-initrd");
    let stage = work.path().join("stage");

    extract_rpm(kernel_rpm, &kernel_root, config)?;
    let version = kernel_version(&kernel_root)?;
    debug!(version = %version, "kernel package extracted");
    let system_map = kernel_root.join(format!("boot/System.map-{version}"));
    let index = module_index(&kernel_root.join("lib/modules").join(&version));

    extract_rpm(initrd_rpm, &helper_root, config)?;
    let helper_dir = helper_root.join("usr/lib/install-initrd").join(tree_arch(arch));
    let wanted = read_module_list(&helper_dir.join("module.list"))?;
    let base = decompress(&helper_dir.join("initrd.gz"))?;

    let staged = stage_modules(&stage, &version, &wanted, &index)?;
    info!(staged, requested = wanted.len(), "modules staged");

    Cmd::new(&config.depmod_program)
        .args(["-a", "-b"])
        .arg_path(&stage)
        .arg("-F")
        .arg_path(&system_map)
        .arg(&version)
        .error_msg("depmod failed on staged modules")
        .run()?;

    let initrd = write_initrd(scratch, base, &stage, config.gzip_level)?;
    let kernel = persist_copy(scratch, &kernel_root.join(format!("boot/vmlinuz-{version}")))
        .inspect_err(|_| {
            let _ = fs::remove_file(&initrd);
        })?;

    drop(work);
    Ok(SynthesizedKernel { kernel, initrd })
}

fn extract_rpm(rpm: &Path, dest: &Path, config: &SynthConfig) -> anyhow::Result<()> {
    fs::create_dir_all(dest)?;
    Cmd::new(&config.rpm2cpio_program)
        .arg_path(rpm)
        .error_msg(format!("rpm2cpio failed on {}", rpm.display()))
        .pipe_into(
            Cmd::new(&config.cpio_program)
                .args(["-idm", "--quiet"])
                .current_dir(dest)
                .error_msg(format!("cpio failed extracting {}", rpm.display())),
        )?;
    Ok(())
}

/// Version string taken from the `boot/System.map-<version>` file name.
fn kernel_version(root: &Path) -> anyhow::Result<String> {
    let boot = root.join("boot");
    let entries = fs::read_dir(&boot)
        .with_context(|| format!("kernel package has no {}", boot.display()))?;
    for entry in entries {
        let name = entry?.file_name();
        if let Some(version) = name.to_string_lossy().strip_prefix("System.map-") {
            if !version.is_empty() {
                return Ok(version.to_string());
            }
        }
    }
    bail!("kernel package has no boot/System.map-<version>")
}

fn module_name(file_name: &str) -> Option<&str> {
    MODULE_EXTENSIONS
        .iter()
        .find_map(|ext| file_name.strip_suffix(ext))
        .filter(|name| !name.is_empty())
}

/// Module name to file for everything under `modules_dir`. The first file
/// seen for a name is kept.
fn module_index(modules_dir: &Path) -> HashMap<String, PathBuf> {
    let mut index = HashMap::new();
    for entry in WalkDir::new(modules_dir)
        .sort_by_file_name()
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
    {
        let file_name = entry.file_name().to_string_lossy();
        if let Some(name) = module_name(&file_name) {
            index
                .entry(name.to_string())
                .or_insert_with(|| entry.path().to_path_buf());
        }
    }
    index
}

fn read_module_list(path: &Path) -> anyhow::Result<Vec<String>> {
    let text = fs::read_to_string(path)
        .with_context(|| format!("install-initrd package has no {}", path.display()))?;
    Ok(text
        .lines()
        .map(|l| l.split('#').next().unwrap_or("").trim())
        .filter(|l| !l.is_empty())
        .map(|l| module_name(l).unwrap_or(l).to_string())
        .collect())
}

fn decompress(path: &Path) -> anyhow::Result<Vec<u8>> {
    let file = File::open(path)
        .with_context(|| format!("install-initrd package has no {}", path.display()))?;
    let mut out = Vec::new();
    GzDecoder::new(file)
        .read_to_end(&mut out)
        .with_context(|| format!("decompressing {}", path.display()))?;
    Ok(out)
}

/// Lay out `lib/modules/<version>/initrd` with the wanted modules, plus
/// `kernel` and `updates` links so depmod finds them where it looks.
fn stage_modules(
    stage: &Path,
    version: &str,
    wanted: &[String],
    index: &HashMap<String, PathBuf>,
) -> anyhow::Result<usize> {
    let modules = stage.join("lib/modules").join(version);
    let initrd_dir = modules.join("initrd");
    fs::create_dir_all(&initrd_dir)?;

    let mut staged = 0;
    for name in wanted {
        let Some(src) = index.get(name) else {
            warn!(module = %name, "module listed for install initrd not in kernel package");
            continue;
        };
        let Some(file_name) = src.file_name() else {
            continue;
        };
        fs::copy(src, initrd_dir.join(file_name))
            .with_context(|| format!("staging module {}", src.display()))?;
        staged += 1;
    }
    if staged == 0 {
        bail!("none of the {} listed modules exist in the kernel package", wanted.len());
    }

    symlink("initrd", modules.join("kernel"))?;
    symlink("initrd", modules.join("updates"))?;
    Ok(staged)
}

/// Base archive followed by the staging tree, gzip-compressed into a new
/// temp file.
fn write_initrd(scratch: &Path, base: Vec<u8>, stage: &Path, level: u32) -> anyhow::Result<PathBuf> {
    let mut archive = base;
    append_tree(&mut archive, stage)?;

    let (file, path) = new_temp_file(scratch, "initrd-xen")?;
    let written = (|| -> anyhow::Result<()> {
        let mut encoder = GzEncoder::new(file, Compression::new(level));
        encoder.write_all(&archive)?;
        encoder.finish()?.flush()?;
        Ok(())
    })();
    if let Err(e) = written {
        let _ = fs::remove_file(&path);
        return Err(e.context("writing synthesized initrd"));
    }
    Ok(path)
}

/// Append every entry below `root` to `out` as a newc archive.
fn append_tree(out: &mut Vec<u8>, root: &Path) -> anyhow::Result<()> {
    let mut entries = Vec::new();
    for entry in WalkDir::new(root).min_depth(1).sort_by_file_name() {
        let entry = entry?;
        let rel = entry
            .path()
            .strip_prefix(root)
            .context("staging entry outside stage root")?
            .to_string_lossy()
            .into_owned();
        let meta = entry.path().symlink_metadata()?;
        let mode = meta.permissions().mode() & 0o7777;
        let builder = NewcBuilder::new(&rel).mode(mode);

        if meta.file_type().is_symlink() {
            let target = fs::read_link(entry.path())?;
            let target = target.to_string_lossy();
            let mut w = builder
                .set_mode_file_type(ModeFileType::Symlink)
                .write(&mut entries, target.len() as u32);
            w.write_all(target.as_bytes())?;
            w.finish()?;
        } else if meta.is_dir() {
            builder
                .set_mode_file_type(ModeFileType::Directory)
                .write(&mut entries, 0)
                .finish()?;
        } else {
            let data = fs::read(entry.path())?;
            let mut w = builder
                .set_mode_file_type(ModeFileType::Regular)
                .write(&mut entries, data.len() as u32);
            w.write_all(&data)?;
            w.finish()?;
        }
    }
    let entries = cpio::newc::trailer(entries)?;
    out.extend_from_slice(&entries);
    Ok(())
}

fn persist_copy(scratch: &Path, src: &Path) -> anyhow::Result<PathBuf> {
    let name = src
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "vmlinuz".to_string());
    let (mut file, path) = new_temp_file(scratch, &name)?;
    let copied = File::open(src)
        .and_then(|mut input| std::io::copy(&mut input, &mut file));
    if let Err(e) = copied {
        let _ = fs::remove_file(&path);
        return Err(anyhow::Error::new(e).context(format!("copying {}", src.display())));
    }
    Ok(path)
}


#[cfg(test)]
mod tests {
    use super::test_support::{appended_names, LegacyTree, KERNEL_VERSION};
    use super::*;
    use crate::store::test_support::{read, Tree};

    #[test]
    fn module_names_strip_known_extensions() {
        assert_eq!(module_name("xenblk.ko"), Some("xenblk"));
        assert_eq!(module_name("ext3.ko.gz"), Some("ext3"));
        assert_eq!(module_name("README"), None);
        assert_eq!(module_name(".ko"), None);
    }

    #[test]
    fn version_from_system_map() {
        let root = TempDir::new().unwrap();
        fs::create_dir_all(root.path().join("boot")).unwrap();
        fs::write(root.path().join("boot/vmlinuz-2.6.18.8-0.5-xen"), "k").unwrap();
        fs::write(root.path().join("boot/System.map-2.6.18.8-0.5-xen"), "map").unwrap();
        assert_eq!(kernel_version(root.path()).unwrap(), "2.6.18.8-0.5-xen");

        let empty = TempDir::new().unwrap();
        assert!(kernel_version(empty.path()).is_err());
    }

    #[test]
    fn module_list_skips_comments() {
        let dir = TempDir::new().unwrap();
        let list = dir.path().join("module.list");
        fs::write(&list, "# storage\nxenblk\n\nxennet # net\next3.ko\n").unwrap();
        assert_eq!(read_module_list(&list).unwrap(), vec!["xenblk", "xennet", "ext3"]);
    }

    fn kernel_tree() -> (TempDir, HashMap<String, PathBuf>) {
        let root = TempDir::new().unwrap();
        let dir = root.path().join("lib/modules/2.6.18-xen/kernel/drivers/xen");
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join("xenblk.ko"), "blk").unwrap();
        fs::write(dir.join("xennet.ko"), "net").unwrap();
        let index = module_index(&root.path().join("lib/modules/2.6.18-xen"));
        (root, index)
    }

    #[test]
    fn staging_skips_missing_and_links_trees() {
        let (_root, index) = kernel_tree();
        let stage = TempDir::new().unwrap();
        let wanted = vec!["xenblk".to_string(), "floppy".to_string()];

        let staged = stage_modules(stage.path(), "2.6.18-xen", &wanted, &index).unwrap();
        assert_eq!(staged, 1);
        let modules = stage.path().join("lib/modules/2.6.18-xen");
        assert_eq!(fs::read_to_string(modules.join("initrd/xenblk.ko")).unwrap(), "blk");
        assert_eq!(fs::read_link(modules.join("updates")).unwrap(), Path::new("initrd"));
        assert_eq!(fs::read_link(modules.join("kernel")).unwrap(), Path::new("initrd"));
    }

    #[test]
    fn staging_with_no_resolvable_modules_fails() {
        let (_root, index) = kernel_tree();
        let stage = TempDir::new().unwrap();
        let wanted = vec!["floppy".to_string()];
        assert!(stage_modules(stage.path(), "2.6.18-xen", &wanted, &index).is_err());
    }

    #[test]
    fn appended_archive_follows_base_and_is_gzipped() {
        let (_root, index) = kernel_tree();
        let stage = TempDir::new().unwrap();
        stage_modules(stage.path(), "2.6.18-xen", &["xennet".to_string()], &index).unwrap();

        let scratch = TempDir::new().unwrap();
        let base = cpio::newc::trailer(Vec::new()).unwrap();
        let base_len = base.len();
        let path = write_initrd(scratch.path(), base, stage.path(), 6).unwrap();

        let mut raw = Vec::new();
        GzDecoder::new(File::open(&path).unwrap())
            .read_to_end(&mut raw)
            .unwrap();

        let names = appended_names(&raw, base_len);
        assert!(names.contains(&"lib/modules/2.6.18-xen/initrd/xennet.ko".to_string()));
        assert!(names.contains(&"lib/modules/2.6.18-xen/updates".to_string()));
    }

    fn legacy_tree() -> (Tree, LegacyTree) {
        let tree = Tree::new();
        let legacy = LegacyTree::new();
        legacy.write_to(tree.root.path());
        (tree, legacy)
    }

    #[test]
    fn builds_kernel_and_appends_modules_to_base_initrd() {
        let (tree, legacy) = legacy_tree();
        let mut fetcher = tree.fetcher();

        let built = synthesize(&mut fetcher, "x86_64", &legacy.synth_config()).unwrap();
        assert_eq!(read(&built.kernel), "kernel-image");

        let mut raw = Vec::new();
        GzDecoder::new(File::open(&built.initrd).unwrap())
            .read_to_end(&mut raw)
            .unwrap();
        let base_len = legacy.base_initrd.len();
        assert_eq!(&raw[..base_len], &legacy.base_initrd[..]);

        let names = appended_names(&raw, base_len);
        let modules = format!("lib/modules/{KERNEL_VERSION}");
        for expected in [
            format!("{modules}/initrd/xenblk.ko"),
            format!("{modules}/initrd/xennet.ko"),
            format!("{modules}/modules.dep"),
            format!("{modules}/kernel"),
            format!("{modules}/updates"),
        ] {
            assert!(names.contains(&expected), "{expected} missing from {names:?}");
        }
        assert!(!names.iter().any(|n| n.contains("floppy")));

        // Packages, listing and work dir are gone; only the results remain.
        assert_eq!(tree.scratch_entries(), 2);
    }

    #[test]
    fn failed_extraction_discards_downloads() {
        let (tree, legacy) = legacy_tree();
        let mut fetcher = tree.fetcher();
        let config = SynthConfig {
            rpm2cpio_program: "false".to_string(),
            ..legacy.synth_config()
        };

        let err = synthesize(&mut fetcher, "x86_64", &config).unwrap_err();
        assert!(matches!(err, FetchError::Synthesis(_)));
        assert!(format!("{err:#}").contains("rpm2cpio failed"));
        assert_eq!(tree.scratch_entries(), 0);
    }

    #[test]
    fn failed_depmod_discards_work_dir() {
        let (tree, legacy) = legacy_tree();
        let mut fetcher = tree.fetcher();
        let config = SynthConfig {
            depmod_program: "false".to_string(),
            ..legacy.synth_config()
        };

        let err = synthesize(&mut fetcher, "x86_64", &config).unwrap_err();
        assert!(matches!(err, FetchError::Synthesis(_)));
        assert_eq!(tree.scratch_entries(), 0);
    }

    #[test]
    fn missing_package_fails_after_listing() {
        let (tree, legacy) = legacy_tree();
        std::fs::remove_file(tree.root.path().join(super::test_support::INITRD_RPM)).unwrap();
        let mut fetcher = tree.fetcher();

        let err = synthesize(&mut fetcher, "x86_64", &legacy.synth_config()).unwrap_err();
        assert!(matches!(err, FetchError::Synthesis(_)));
        assert_eq!(tree.scratch_entries(), 0);
    }
}
