//! Error types for catalog synchronization

use thiserror::Error;

pub type Result<T> = std::result::Result<T, SyncError>;

#[derive(Error, Debug)]
pub enum SyncError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("HTTP {status} from {url}: {body}")]
    HttpStatus { url: String, status: u16, body: String },

    #[error("Request to {url} failed after {attempts} attempts: {last_error}")]
    RetriesExhausted {
        url: String,
        attempts: u32,
        last_error: String,
    },

    #[error("Download from {url} stalled for {secs}s")]
    Stalled { url: String, secs: u64 },

    #[error("Download from {url} ended after {received} of {expected} bytes")]
    IncompleteDownload {
        url: String,
        expected: u64,
        received: u64,
    },

    #[error("Dataset type '{dataset_type}' is not listed at {url}")]
    DatasetNotFound { url: String, dataset_type: String },

    #[error("Unknown source: {0}")]
    UnknownSource(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Malformed dataset after {records} records: {message}")]
    Decode { records: usize, message: String },

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Run cancelled")]
    Cancelled,

    #[error("Aborted after {0} consecutive batch failures")]
    TooManyBatchFailures(u32),

    #[error("Scheduler is already running")]
    AlreadyRunning,

    #[error("Scheduler has been stopped")]
    SchedulerStopped,

    #[error("Background task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

impl SyncError {
    /// Whether retrying the same request may succeed
    ///
    /// Connection failures, timeouts, stalled, interrupted or short bodies, 5xx,
    /// 408 and 429 are transient. Every other error aborts a retry loop immediately.
    pub fn is_transient(&self) -> bool {
        match self {
            SyncError::Http(e) => e.is_timeout() || e.is_connect() || e.is_request() || e.is_body(),
            SyncError::Stalled { .. } | SyncError::IncompleteDownload { .. } => true,
            SyncError::HttpStatus { status, .. } => {
                *status >= 500 || *status == 408 || *status == 429
            },
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn status(code: u16) -> SyncError {
        SyncError::HttpStatus {
            url: "https://api.example.test/bulk".to_string(),
            status: code,
            body: String::new(),
        }
    }

    #[test]
    fn test_server_errors_and_throttling_are_transient() {
        assert!(status(500).is_transient());
        assert!(status(503).is_transient());
        assert!(status(429).is_transient());
        assert!(status(408).is_transient());
        assert!(SyncError::Stalled {
            url: "https://data.example.test/cards.json".to_string(),
            secs: 300
        }
        .is_transient());
        assert!(SyncError::IncompleteDownload {
            url: "https://data.example.test/cards.json".to_string(),
            expected: 4096,
            received: 1024
        }
        .is_transient());
    }

    #[test]
    fn test_client_errors_are_not_transient() {
        assert!(!status(400).is_transient());
        assert!(!status(404).is_transient());
        assert!(!SyncError::Cancelled.is_transient());
        assert!(!SyncError::Decode {
            records: 3,
            message: "EOF".to_string()
        }
        .is_transient());
    }
}
