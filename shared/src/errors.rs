/// Unified error types for media-sync.
use std::path::PathBuf;
use thiserror::Error;

/// Top-level error type for sync and refresh runs.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("Fetch error: {0}")]
    Fetch(#[from] FetchError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Errors from a single HTTP fetch (manifest, API call or file download).
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("HTTP {status} from {url}")]
    Status { url: String, status: u16 },

    #[error("Network error for {url}: {message}")]
    Network { url: String, message: String },

    #[error("Max retries ({attempts}) exhausted for {url}: {last}")]
    RetriesExhausted {
        url: String,
        attempts: u32,
        last: Box<FetchError>,
    },

    #[error("Failed to write {path:?}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl FetchError {
    /// Whether another attempt could plausibly succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            FetchError::Status { status, .. } => {
                *status == 429 || *status == 408 || (500..600).contains(status)
            }
            FetchError::Network { .. } => true,
            FetchError::RetriesExhausted { .. } | FetchError::Write { .. } => false,
        }
    }

    /// HTTP status carried by this error, looking through retry exhaustion.
    pub fn status(&self) -> Option<u16> {
        match self {
            FetchError::Status { status, .. } => Some(*status),
            FetchError::RetriesExhausted { last, .. } => last.status(),
            _ => None,
        }
    }
}

/// Result type alias for media-sync operations.
pub type SyncResult<T> = Result<T, SyncError>;
