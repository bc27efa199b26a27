//! Error taxonomy for install-media resolution.
//!
//! Only two variants are meant to reach end users: [`FetchError::Location`]
//! (the install source cannot be reached at all) and
//! [`FetchError::NoMatchingStore`] (it was reached but nothing recognized it).
//! `NotFound` is the probe-level "not here" signal and is folded into a
//! boolean before it leaves a store. `Transient` is the only retryable kind.

use thiserror::Error;

/// Result alias used throughout the crate.
pub type Result<T, E = FetchError> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum FetchError {
    /// The location cannot be parsed, reached, or mounted.
    #[error("invalid install location '{location}': {reason}")]
    Location { location: String, reason: String },

    /// A relative path is absent inside an otherwise reachable tree.
    #[error("'{path}' not found in install tree: {reason}")]
    NotFound { path: String, reason: String },

    /// An intermediary answered with a retryable failure (HTTP 502).
    #[error("transient failure fetching '{path}': {reason}")]
    Transient { path: String, reason: String },

    /// Every candidate store was probed and none matched.
    #[error("no installable distribution found at {location}")]
    NoMatchingStore { location: String },

    /// A store recognized the tree but it does not carry the requested media.
    #[error("{family} tree has no {media} for {virt} guests")]
    MediaUnavailable {
        family: String,
        media: String,
        virt: String,
    },

    /// The legacy initrd pipeline failed at some step.
    #[error("initrd synthesis failed: {0:#}")]
    Synthesis(anyhow::Error),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl FetchError {
    pub(crate) fn location(location: impl Into<String>, reason: impl Into<String>) -> Self {
        FetchError::Location {
            location: location.into(),
            reason: reason.into(),
        }
    }

    pub(crate) fn not_found(path: impl Into<String>, reason: impl Into<String>) -> Self {
        FetchError::NotFound {
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// Whether retrying the same operation may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, FetchError::Transient { .. })
    }

    /// Whether this is the probe-level "path absent" signal.
    pub fn is_not_found(&self) -> bool {
        matches!(self, FetchError::NotFound { .. })
    }

    /// Short stable code for logs and CLI exit reporting.
    pub fn reason_code(&self) -> &'static str {
        match self {
            FetchError::Location { .. } => "invalid_location",
            FetchError::NotFound { .. } => "not_found",
            FetchError::Transient { .. } => "transient",
            FetchError::NoMatchingStore { .. } => "no_matching_store",
            FetchError::MediaUnavailable { .. } => "media_unavailable",
            FetchError::Synthesis(_) => "synthesis_failed",
            FetchError::Config(_) => "invalid_config",
            FetchError::Io(_) => "io_error",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_transient_is_retryable() {
        let transient = FetchError::Transient {
            path: "images/pxeboot/vmlinuz".into(),
            reason: "HTTP 502".into(),
        };
        assert!(transient.is_transient());
        assert!(!FetchError::not_found("Fedora", "HTTP 404").is_transient());
        assert!(!FetchError::location("nfs:host/x", "mount failed").is_transient());
    }

    #[test]
    fn synthesis_error_shows_context_chain() {
        let inner = anyhow::anyhow!("depmod exited with 1").context("regenerating module deps");
        let err = FetchError::Synthesis(inner);
        let msg = err.to_string();
        assert!(msg.contains("regenerating module deps"));
        assert!(msg.contains("depmod exited with 1"));
        assert_eq!(err.reason_code(), "synthesis_failed");
    }
}
