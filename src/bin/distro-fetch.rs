use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use distro_fetch::progress::LogProgress;
use distro_fetch::{
    acquire_boot_disk, acquire_kernel, AcquireRequest, Config, DistroFamily, Resolver, VirtType,
};
use tracing_subscriber::EnvFilter;

fn usage() -> &'static str {
    "Usage:\n  distro-fetch kernel <location> [options]\n  distro-fetch boot-iso <location> [options]\n\nOptions:\n  --scratch DIR    working directory for downloads and mount points\n  --virt hvm|xen   guest virtualization type (default: hvm)\n  --distro NAME    only try this distribution family\n  --arch ARCH      guest architecture (default: host)\n  --config FILE    TOML configuration\n  --json           print the result as JSON"
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Media {
    Kernel,
    BootIso,
}

#[derive(Debug)]
struct Args {
    media: Media,
    request: AcquireRequest,
    config: Option<PathBuf>,
    json: bool,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let args = parse_args(&args)?;

    let config = match &args.config {
        Some(path) => Config::load(path)?,
        None => Config::default(),
    };
    let resolver = Resolver::from_config(&config);
    let progress = Box::new(LogProgress::default());

    match args.media {
        Media::Kernel => {
            let media = acquire_kernel(&resolver, &config, &args.request, progress)?;
            if args.json {
                println!("{}", serde_json::to_string_pretty(&media)?);
            } else {
                println!("family:  {}", media.family);
                println!("kernel:  {}", media.kernel.display());
                println!("initrd:  {}", media.initrd.display());
                println!("cmdline: {}", media.cmdline);
            }
        }
        Media::BootIso => {
            let media = acquire_boot_disk(&resolver, &config, &args.request, progress)?;
            if args.json {
                println!("{}", serde_json::to_string_pretty(&media)?);
            } else {
                println!("family: {}", media.family);
                println!("iso:    {}", media.iso.display());
            }
        }
    }
    Ok(())
}

fn parse_args(args: &[String]) -> Result<Args> {
    let (media, location, rest) = match args {
        [cmd, location, rest @ ..] if cmd == "kernel" => (Media::Kernel, location, rest),
        [cmd, location, rest @ ..] if cmd == "boot-iso" => (Media::BootIso, location, rest),
        _ => bail!(usage()),
    };

    let mut scratch = None;
    let mut request = AcquireRequest::new(location.as_str(), PathBuf::new());
    let mut config = None;
    let mut json = false;

    let mut iter = rest.iter();
    while let Some(flag) = iter.next() {
        let mut value = || {
            iter.next()
                .with_context(|| format!("{flag} needs a value\n\n{}", usage()))
        };
        match flag.as_str() {
            "--scratch" => scratch = Some(PathBuf::from(value()?)),
            "--virt" => request = request.virt_type(value()?.parse::<VirtType>()?),
            "--distro" => request = request.distro(value()?.parse::<DistroFamily>()?),
            "--arch" => request = request.arch(value()?.as_str()),
            "--config" => config = Some(PathBuf::from(value()?)),
            "--json" => json = true,
            other => bail!("unknown option '{other}'\n\n{}", usage()),
        }
    }

    request.scratch_dir = match scratch {
        Some(dir) => dir,
        None => default_scratch_dir()?,
    };
    Ok(Args {
        media,
        request,
        config,
        json,
    })
}

/// Per-process directory under the user cache dir.
fn default_scratch_dir() -> Result<PathBuf> {
    let dir = dirs::cache_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join("distro-fetch")
        .join(format!("run-{}", std::process::id()));
    std::fs::create_dir_all(&dir)
        .with_context(|| format!("creating scratch directory '{}'", dir.display()))?;
    Ok(dir)
}
