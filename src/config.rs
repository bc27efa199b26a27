//! TOML configuration.
//!
//! Every field has a default, so an empty file (or no file at all) yields a
//! working configuration:
//!
//! ```toml
//! [fetch]
//! http_timeout_secs = 60
//! nfs_options = "ro,nolock"
//!
//! [retry]
//! max_attempts = 10
//! delay_ms = 1000
//!
//! [host]
//! arch = "x86_64"
//! ```

use serde::Deserialize;
use std::fs;
use std::path::Path;
use std::time::Duration;

use crate::error::{FetchError, Result};

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct Config {
    pub fetch: FetchConfig,
    pub retry: RetryConfig,
    pub synth: SynthConfig,
    pub host: HostConfig,
}

/// Transport settings shared by all fetchers.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct FetchConfig {
    pub http_timeout_secs: u64,
    pub mount_program: String,
    pub umount_program: String,
    pub curl_program: String,
    /// Mount options for NFS exports; ISO and block sources always use `ro`.
    pub nfs_options: String,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            http_timeout_secs: 60,
            mount_program: "mount".to_string(),
            umount_program: "umount".to_string(),
            curl_program: "curl".to_string(),
            nfs_options: "ro,nolock".to_string(),
        }
    }
}

impl FetchConfig {
    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_secs)
    }
}

/// Bounded retry for transient probe failures.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 10,
            delay_ms: 1000,
        }
    }
}

/// Host tools used by the legacy initrd synthesizer.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct SynthConfig {
    pub rpm2cpio_program: String,
    pub cpio_program: String,
    pub depmod_program: String,
    pub gzip_level: u32,
}

impl Default for SynthConfig {
    fn default() -> Self {
        Self {
            rpm2cpio_program: "rpm2cpio".to_string(),
            cpio_program: "cpio".to_string(),
            depmod_program: "depmod".to_string(),
            gzip_level: 6,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct HostConfig {
    pub arch: String,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            arch: std::env::consts::ARCH.to_string(),
        }
    }
}

impl Config {
    /// Load and validate a config file.
    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path).map_err(|e| {
            FetchError::Config(format!("reading '{}': {}", path.display(), e))
        })?;
        Self::from_toml_str(&text)
            .map_err(|e| FetchError::Config(format!("'{}': {}", path.display(), e)))
    }

    pub fn from_toml_str(text: &str) -> Result<Self> {
        let config: Config =
            toml::from_str(text).map_err(|e| FetchError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.retry.max_attempts == 0 {
            return Err(FetchError::Config(
                "retry.max_attempts must be at least 1".to_string(),
            ));
        }
        if !(1..=9).contains(&self.synth.gzip_level) {
            return Err(FetchError::Config(format!(
                "synth.gzip_level must be between 1 and 9, got {}",
                self.synth.gzip_level
            )));
        }
        if self.host.arch.trim().is_empty() {
            return Err(FetchError::Config("host.arch must not be empty".to_string()));
        }
        Ok(())
    }
}
