//! Error types for the bundling pipeline.
//!
//! Every variant is terminal for the request that produced it: nothing in the
//! pipeline retries or recovers locally. The server maps all of them to a
//! `400 Bad Request` carrying the [`Display`](std::fmt::Display) message.

use http::StatusCode;
use thiserror::Error;

/// Result type alias using [`FontpackError`].
pub type FontpackResult<T> = Result<T, FontpackError>;

/// Errors produced while building a font bundle.
#[derive(Debug, Error)]
pub enum FontpackError {
    /// The stylesheet request never produced a response.
    #[error("Upstream unreachable: could not connect to {url}: {reason}")]
    UpstreamUnreachable {
        /// Stylesheet URL.
        url: String,
        /// Transport failure description.
        reason: String,
    },

    /// The stylesheet endpoint answered with a non-200 status.
    #[error("Upstream rejected: could not fetch {url} ({status})")]
    UpstreamRejected {
        /// Stylesheet URL.
        url: String,
        /// Status returned by the upstream API.
        status: u16,
    },

    /// An asset request never produced a response.
    #[error("Asset unreachable: could not fetch item #{index} {url}: {reason}")]
    AssetUnreachable {
        /// Asset URL.
        url: String,
        /// Ordinal of the asset within the stylesheet.
        index: usize,
        /// Transport failure description.
        reason: String,
    },

    /// An asset request answered with a non-200 status.
    #[error("Asset rejected: could not fetch item #{index} {url} ({status})")]
    AssetRejected {
        /// Asset URL.
        url: String,
        /// Ordinal of the asset within the stylesheet.
        index: usize,
        /// Status returned for the asset.
        status: u16,
    },

    /// An entry could not be written into the archive.
    #[error("Archive append failed for '{name}': {reason}")]
    ArchiveAppendFailed {
        /// Entry name.
        name: String,
        /// Failure description.
        reason: String,
    },

    /// Sealing the archive failed.
    #[error("Archive finalize failed: {reason}")]
    ArchiveFinalizeFailed {
        /// Failure description.
        reason: String,
    },

    /// A pipeline task ended abnormally (panic or abort).
    #[error("Internal error: {message}")]
    Internal {
        /// Error message.
        message: String,
    },
}

impl FontpackError {
    /// Create an upstream-unreachable error.
    pub fn upstream_unreachable(url: impl Into<String>, reason: impl ToString) -> Self {
        Self::UpstreamUnreachable {
            url: url.into(),
            reason: reason.to_string(),
        }
    }

    /// Create an upstream-rejected error.
    pub fn upstream_rejected(url: impl Into<String>, status: u16) -> Self {
        Self::UpstreamRejected {
            url: url.into(),
            status,
        }
    }

    /// Create an asset-unreachable error.
    pub fn asset_unreachable(url: impl Into<String>, index: usize, reason: impl ToString) -> Self {
        Self::AssetUnreachable {
            url: url.into(),
            index,
            reason: reason.to_string(),
        }
    }

    /// Create an asset-rejected error.
    pub fn asset_rejected(url: impl Into<String>, index: usize, status: u16) -> Self {
        Self::AssetRejected {
            url: url.into(),
            index,
            status,
        }
    }

    /// Create an archive append error.
    pub fn archive_append(name: impl Into<String>, reason: impl ToString) -> Self {
        Self::ArchiveAppendFailed {
            name: name.into(),
            reason: reason.to_string(),
        }
    }

    /// Create an archive finalize error.
    pub fn archive_finalize(reason: impl ToString) -> Self {
        Self::ArchiveFinalizeFailed {
            reason: reason.to_string(),
        }
    }

    /// Create an internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// HTTP status reported to the caller.
    ///
    /// Every pipeline failure is surfaced as a client error.
    pub fn status_code(&self) -> StatusCode {
        StatusCode::BAD_REQUEST
    }

    /// Short category name for logs and metrics labels.
    pub fn category(&self) -> &'static str {
        match self {
            Self::UpstreamUnreachable { .. } => "upstream_unreachable",
            Self::UpstreamRejected { .. } => "upstream_rejected",
            Self::AssetUnreachable { .. } => "asset_unreachable",
            Self::AssetRejected { .. } => "asset_rejected",
            Self::ArchiveAppendFailed { .. } => "archive_append_failed",
            Self::ArchiveFinalizeFailed { .. } => "archive_finalize_failed",
            Self::Internal { .. } => "internal",
        }
    }

    /// Whether the failure happened while fetching an individual asset.
    pub fn is_asset_failure(&self) -> bool {
        matches!(
            self,
            Self::AssetUnreachable { .. } | Self::AssetRejected { .. }
        )
    }
}
