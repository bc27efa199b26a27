//! Install location parsing.
//!
//! A location is the user-supplied install source string plus the transport
//! it implies. Parsing happens once; the result is immutable.

use std::fmt;
use std::fs;
use std::os::unix::fs::FileTypeExt;
use std::path::{Path, PathBuf};

use url::Url;

use crate::error::{FetchError, Result};

/// Transport implied by a location string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LocationKind {
    Http,
    Ftp,
    /// NFS export; carries the `host:/path` form handed to mount.
    Nfs { export: String },
    /// A local ISO image, loop-mounted.
    Iso(PathBuf),
    BlockDevice(PathBuf),
    /// An already-unpacked local tree.
    Directory(PathBuf),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Location {
    raw: String,
    kind: LocationKind,
}

impl Location {
    pub fn parse(raw: &str) -> Result<Self> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(FetchError::location(raw, "location is empty"));
        }

        let lower = trimmed.to_ascii_lowercase();
        let kind = if lower.starts_with("http://") || lower.starts_with("https://") {
            parse_url(trimmed)?;
            LocationKind::Http
        } else if lower.starts_with("ftp://") {
            parse_url(trimmed)?;
            LocationKind::Ftp
        } else if lower.starts_with("nfs:") {
            LocationKind::Nfs {
                export: nfs_export(trimmed)?,
            }
        } else if trimmed.starts_with('/') {
            local_kind(Path::new(trimmed))?
        } else {
            return Err(FetchError::location(
                trimmed,
                "expected an http/ftp/nfs URL or an absolute local path",
            ));
        };

        Ok(Self {
            raw: trimmed.to_string(),
            kind,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    pub fn kind(&self) -> &LocationKind {
        &self.kind
    }

    /// True for sources that live on this host. Nothing useful can be passed
    /// to a remote-install directive for them.
    pub fn is_local(&self) -> bool {
        matches!(
            self.kind,
            LocationKind::Iso(_) | LocationKind::BlockDevice(_) | LocationKind::Directory(_)
        )
    }

    pub fn is_remote(&self) -> bool {
        matches!(self.kind, LocationKind::Http | LocationKind::Ftp)
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

fn parse_url(raw: &str) -> Result<Url> {
    let url = Url::parse(raw).map_err(|e| FetchError::location(raw, e.to_string()))?;
    if url.host_str().map_or(true, str::is_empty) {
        return Err(FetchError::location(raw, "URL has no host"));
    }
    Ok(url)
}

/// Accepts `nfs://host/path` and `nfs:host/path` (also `nfs:host:/path`).
fn nfs_export(raw: &str) -> Result<String> {
    let rest = &raw["nfs:".len()..];
    let rest = rest.strip_prefix("//").unwrap_or(rest);

    let (host, path) = match rest.split_once(':') {
        Some((host, path)) => (host, path),
        None => match rest.find('/') {
            Some(idx) => (&rest[..idx], &rest[idx..]),
            None => (rest, ""),
        },
    };

    if host.is_empty() || path.trim_matches('/').is_empty() {
        return Err(FetchError::location(
            raw,
            "NFS location must name both a host and an export path",
        ));
    }

    let path = if path.starts_with('/') {
        path.to_string()
    } else {
        format!("/{path}")
    };
    Ok(format!("{host}:{path}"))
}

fn local_kind(path: &Path) -> Result<LocationKind> {
    let meta = fs::metadata(path)
        .map_err(|e| FetchError::location(path.display().to_string(), e.to_string()))?;
    let file_type = meta.file_type();

    if file_type.is_dir() {
        Ok(LocationKind::Directory(path.to_path_buf()))
    } else if file_type.is_block_device() {
        Ok(LocationKind::BlockDevice(path.to_path_buf()))
    } else if file_type.is_file() {
        Ok(LocationKind::Iso(path.to_path_buf()))
    } else {
        Err(FetchError::location(
            path.display().to_string(),
            "not a directory, ISO image or block device",
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn http_and_ftp_urls() {
        let http = Location::parse("http://mirror.example.com/fedora/8/os/").unwrap();
        assert_eq!(http.kind(), &LocationKind::Http);
        assert!(http.is_remote());

        let https = Location::parse("HTTPS://mirror.example.com/tree").unwrap();
        assert_eq!(https.kind(), &LocationKind::Http);

        let ftp = Location::parse("ftp://ftp.example.com/pub/suse").unwrap();
        assert_eq!(ftp.kind(), &LocationKind::Ftp);
    }

    #[test]
    fn nfs_forms_normalize_to_mount_source() {
        for raw in [
            "nfs://server/exports/tree",
            "nfs:server/exports/tree",
            "nfs:server:/exports/tree",
        ] {
            let loc = Location::parse(raw).unwrap();
            assert_eq!(
                loc.kind(),
                &LocationKind::Nfs {
                    export: "server:/exports/tree".to_string()
                },
                "{raw}"
            );
            assert!(!loc.is_local());
        }
    }

    #[test]
    fn nfs_without_path_is_rejected() {
        assert!(matches!(
            Location::parse("nfs://server"),
            Err(FetchError::Location { .. })
        ));
    }

    #[test]
    fn local_directory_and_iso() {
        let temp = TempDir::new().unwrap();
        let dir = Location::parse(temp.path().to_str().unwrap()).unwrap();
        assert!(matches!(dir.kind(), LocationKind::Directory(_)));
        assert!(dir.is_local());

        let iso = temp.path().join("boot.iso");
        fs::write(&iso, b"CD001").unwrap();
        let loc = Location::parse(iso.to_str().unwrap()).unwrap();
        assert!(matches!(loc.kind(), LocationKind::Iso(_)));
    }

    #[test]
    fn missing_local_path_is_location_error() {
        let err = Location::parse("/definitely/not/here/tree").unwrap_err();
        assert!(matches!(err, FetchError::Location { .. }));
    }

    #[test]
    fn relative_and_unknown_forms_are_rejected() {
        assert!(Location::parse("trees/fedora").is_err());
        assert!(Location::parse("gopher://old.example.com/tree").is_err());
        assert!(Location::parse("   ").is_err());
        assert!(Location::parse("http://").is_err());
    }
}
