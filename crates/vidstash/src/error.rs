use std::path::{Path, PathBuf};

use reqwest::StatusCode;

use crate::media::StreamKind;

#[derive(Debug, thiserror::Error)]
pub enum DownloadError {
    #[error("download cancelled")]
    Cancelled,

    #[error("invalid URL `{input}`: {reason}")]
    InvalidUrl { input: String, reason: String },

    #[error("configuration error: {reason}")]
    Configuration { reason: String },

    #[error("failed to fetch metadata from {url}: {reason}")]
    MetadataFetch {
        url: String,
        status: Option<StatusCode>,
        reason: String,
    },

    #[error("failed to fetch {stream} stream: {reason}")]
    StreamFetch { stream: StreamKind, reason: String },

    #[error("{kind} stream index {index} out of range ({available} available)")]
    InvalidSelection {
        kind: StreamKind,
        index: usize,
        available: usize,
    },

    #[error("{kind} stream has unusable MIME type `{value}`")]
    InvalidMimeType { kind: StreamKind, value: String },

    #[error("a download for `{id}` is already in progress")]
    AlreadyInProgress { id: String },

    #[error("I/O error while {op} `{}`: {source}", path.display())]
    Io {
        op: &'static str,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid state transition: cannot transition from {from} to {to}")]
    InvalidStateTransition { from: String, to: String },
}

/// Coarse classification of a [`DownloadError`], suitable for short user-facing messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Cancelled,
    InvalidInput,
    Configuration,
    Network,
    Storage,
    Internal,
}

impl DownloadError {
    pub fn invalid_url(input: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidUrl {
            input: input.into(),
            reason: reason.into(),
        }
    }

    pub fn configuration(reason: impl Into<String>) -> Self {
        Self::Configuration {
            reason: reason.into(),
        }
    }

    pub fn metadata_fetch(url: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::MetadataFetch {
            url: url.into(),
            status: None,
            reason: reason.into(),
        }
    }

    pub fn metadata_status(url: impl Into<String>, status: StatusCode) -> Self {
        Self::MetadataFetch {
            url: url.into(),
            status: Some(status),
            reason: format!("server responded with HTTP {status}"),
        }
    }

    pub fn stream_fetch(stream: StreamKind, reason: impl Into<String>) -> Self {
        Self::StreamFetch {
            stream,
            reason: reason.into(),
        }
    }

    pub fn io(op: &'static str, path: &Path, source: std::io::Error) -> Self {
        Self::Io {
            op,
            path: path.to_path_buf(),
            source,
        }
    }

    /// Whether the operation stopped because the caller asked it to.
    ///
    /// Cancellation is not a fault and should not be rendered as one.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Cancelled => ErrorKind::Cancelled,
            Self::InvalidUrl { .. }
            | Self::InvalidSelection { .. }
            | Self::InvalidMimeType { .. }
            | Self::AlreadyInProgress { .. } => ErrorKind::InvalidInput,
            Self::Configuration { .. } => ErrorKind::Configuration,
            Self::MetadataFetch { .. } | Self::StreamFetch { .. } => ErrorKind::Network,
            Self::Io { .. } => ErrorKind::Storage,
            Self::InvalidStateTransition { .. } => ErrorKind::Internal,
        }
    }
}

pub type Result<T, E = DownloadError> = std::result::Result<T, E>;
