use std::path::PathBuf;

use reqwest::StatusCode;

use crate::retry::classify_error;

// Error type for download operations
#[derive(Debug, thiserror::Error)]
pub enum DownloadError {
    #[error("HTTP error: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("Invalid URL: {0}")]
    UrlError(String),

    #[error("Server returned status code {status} for {url}")]
    StatusCode { status: StatusCode, url: String },

    #[error("Invalid proxy configuration: {0}")]
    ProxyError(String),

    #[error("Failed to build HTTP client: {0}")]
    ClientError(String),

    #[error("Download deadline of {0:?} exceeded")]
    DeadlineExceeded(std::time::Duration),

    #[error("Download cancelled")]
    Cancelled,

    #[error("Giving up after {attempts} attempts: {last}")]
    RetriesExhausted {
        attempts: u32,
        #[source]
        last: Box<DownloadError>,
    },
}

impl DownloadError {
    /// Whether another attempt could succeed.
    ///
    /// Transport errors are retried only when they classify as a network
    /// failure; statuses only when 5xx or 429.
    pub fn is_retryable(&self) -> bool {
        match self {
            DownloadError::HttpError(e) => classify_error(e).is_retryable(),
            DownloadError::StatusCode { status, .. } => crate::retry::is_retryable_status(*status),
            _ => false,
        }
    }

    /// The HTTP status behind this error, looking through retry wrappers.
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            DownloadError::StatusCode { status, .. } => Some(*status),
            DownloadError::HttpError(e) => e.status(),
            DownloadError::RetriesExhausted { last, .. } => last.status(),
            _ => None,
        }
    }
}

/// Errors surfaced by the cache store.
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    #[error("Cache I/O error at {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Download(#[from] DownloadError),
}

impl CacheError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        CacheError::Io {
            path: path.into(),
            source,
        }
    }
}
