//! Fetcher for HTTP(S) and FTP install trees.
//!
//! HTTP goes through a blocking `ureq` agent. FTP is handed to `curl`.
//! An HTTP 502 from an intermediary is the one failure reported as
//! [`FetchError::Transient`]; every other failure to retrieve a path means
//! the path is not there.

use std::fs;
use std::path::{Path, PathBuf};

use tracing::{debug, info};
use ureq::Agent;

use super::{new_temp_file, save_temp, validate_relative, Fetcher};
use crate::config::FetchConfig;
use crate::error::{FetchError, Result};
use crate::location::{Location, LocationKind};
use crate::process::Cmd;
use crate::progress::ProgressSink;

const BAD_GATEWAY: u16 = 502;

pub struct UrlFetcher {
    location: Location,
    base: String,
    scratch_dir: PathBuf,
    curl_program: String,
    progress: Box<dyn ProgressSink>,
    agent: Agent,
}

impl UrlFetcher {
    pub fn new(
        location: Location,
        scratch_dir: &Path,
        config: &FetchConfig,
        progress: Box<dyn ProgressSink>,
    ) -> Self {
        let mut base = location.as_str().to_string();
        if !base.ends_with('/') {
            base.push('/');
        }
        let agent = Agent::new_with_config(
            Agent::config_builder()
                .timeout_global(Some(config.http_timeout()))
                .build(),
        );
        Self {
            location,
            base,
            scratch_dir: scratch_dir.to_path_buf(),
            curl_program: config.curl_program.clone(),
            progress,
            agent,
        }
    }

    fn is_ftp(&self) -> bool {
        matches!(self.location.kind(), LocationKind::Ftp)
    }

    fn url_for(&self, rel: &str) -> String {
        format!("{}{}", self.base, rel)
    }

    fn http_acquire(&mut self, rel: &str) -> Result<PathBuf> {
        let url = self.url_for(rel);
        debug!(url = %url, "requesting");
        let response = self.agent.get(&url).call().map_err(|e| match e {
            ureq::Error::StatusCode(BAD_GATEWAY) => FetchError::Transient {
                path: rel.to_string(),
                reason: format!("HTTP {BAD_GATEWAY} from {url}"),
            },
            ureq::Error::StatusCode(code) => {
                FetchError::not_found(rel, format!("HTTP {code} from {url}"))
            }
            other => FetchError::not_found(rel, other.to_string()),
        })?;

        let total = response
            .headers()
            .get("content-length")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<u64>().ok());
        let mut reader = response.into_body().into_reader();
        save_temp(
            &mut reader,
            &self.scratch_dir,
            rel,
            total,
            self.progress.as_mut(),
        )
        .map_err(|e| FetchError::not_found(rel, format!("reading {url}: {e}")))
    }

    fn ftp_acquire(&mut self, rel: &str) -> Result<PathBuf> {
        let url = self.url_for(rel);
        let (file, path) = new_temp_file(&self.scratch_dir, rel)?;
        drop(file);

        self.progress.start(rel, None);
        let result = Cmd::new(&self.curl_program)
            .args(["--silent", "--show-error", "--fail", "-o"])
            .arg_path(&path)
            .arg(&url)
            .allow_fail()
            .run();
        let size = fs::metadata(&path).map(|m| m.len()).unwrap_or(0);
        self.progress.update(size);
        self.progress.finish();

        match result {
            Ok(out) if out.success() => Ok(path),
            Ok(out) => {
                let _ = fs::remove_file(&path);
                Err(FetchError::not_found(rel, out.stderr.trim().to_string()))
            }
            Err(e) => {
                let _ = fs::remove_file(&path);
                Err(FetchError::not_found(rel, format!("{e:#}")))
            }
        }
    }
}

impl Fetcher for UrlFetcher {
    fn location(&self) -> &Location {
        &self.location
    }

    fn prepare(&mut self) -> Result<()> {
        info!(location = %self.location, "checking install location is reachable");
        if self.is_ftp() {
            let out = Cmd::new(&self.curl_program)
                .args(["--silent", "--show-error", "--fail", "--list-only"])
                .arg(&self.base)
                .allow_fail()
                .run()
                .map_err(|e| FetchError::location(self.location.as_str(), format!("{e:#}")))?;
            if !out.success() {
                return Err(FetchError::location(
                    self.location.as_str(),
                    out.stderr.trim().to_string(),
                ));
            }
            return Ok(());
        }

        match self.agent.get(&self.base).call() {
            Ok(_) => Ok(()),
            Err(e) => Err(FetchError::location(self.location.as_str(), e.to_string())),
        }
    }

    fn cleanup(&mut self) {}

    fn acquire_file(&mut self, rel: &str) -> Result<PathBuf> {
        let rel = validate_relative(rel)?.to_string();
        if self.is_ftp() {
            self.ftp_acquire(&rel)
        } else {
            self.http_acquire(&rel)
        }
    }
}
