//! Error types for vasco-tap.

use thiserror::Error;

use crate::models::{AttemptOutcome, JobPhase};

/// Result type alias using vasco-tap's Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Core error type for chunk orchestration.
#[derive(Error, Debug)]
pub enum Error {
    /// Connectivity failure worth retrying at the operation level
    #[error("Transient network error: {0}")]
    TransientNetwork(String),

    /// Remote job ended in ERROR or ABORTED
    #[error("Remote job {phase}: {detail}")]
    RemoteJob { phase: JobPhase, detail: String },

    /// Polling exceeded the per-attempt wall-clock budget
    #[error("Timeout: job still running after {0}s")]
    Timeout(u64),

    /// Remote returned an empty payload
    #[error("Empty result for chunk {0}")]
    EmptyResult(String),

    /// Postprocessing transform failed
    #[error("Postprocess error: {0}")]
    Postprocess(String),

    /// Submission endpoint kept failing; nothing was persisted
    #[error("Submission failed after {attempts} tries: {message}")]
    SubmissionFailed { attempts: u32, message: String },

    /// Async retry budget (and fallback, if enabled) used up
    #[error("Retries exhausted for {chunk_id} after {attempts} attempts (last outcome: {last_outcome}): {message}")]
    ExhaustedRetries {
        chunk_id: String,
        attempts: u32,
        last_outcome: AttemptOutcome,
        message: String,
    },

    /// Job handle no longer resolves on the remote service
    #[error("Job not found: {0}")]
    JobNotFound(String),

    /// Persisted job could not be checked; its metadata was kept
    #[error("Could not verify job {handle}: {message}")]
    Unverified { handle: String, message: String },

    /// Another worker holds the chunk lock
    #[error("Chunk {0} is locked by another worker")]
    ChunkLocked(String),

    /// Another aggregation holds the coarse lock
    #[error("Aggregation already in progress: {0}")]
    AggregateLocked(String),

    /// Operator requested a stop
    #[error("Stopped by operator")]
    Stopped,

    /// HTTP request failed with a non-retryable status
    #[error("Request error: {0}")]
    Request(String),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// File I/O operation failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Whether an operation-level retry may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, Error::TransientNetwork(_))
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

impl From<toml::de::Error> for Error {
    fn from(e: toml::de::Error) -> Self {
        Error::Config(e.to_string())
    }
}

impl From<reqwest::Error> for Error {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() || e.is_connect() {
            return Error::TransientNetwork(e.to_string());
        }
        match e.status() {
            Some(status) if status == reqwest::StatusCode::NOT_FOUND => Error::JobNotFound(
                e.url().map(|u| u.to_string()).unwrap_or_else(|| e.to_string()),
            ),
            Some(status) if is_transient_status(status) => Error::TransientNetwork(e.to_string()),
            _ => Error::Request(e.to_string()),
        }
    }
}

/// HTTP statuses that indicate a busy or restarting service.
pub fn is_transient_status(status: reqwest::StatusCode) -> bool {
    matches!(status.as_u16(), 429 | 502 | 503 | 504)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display_transient() {
        let err = Error::TransientNetwork("connection reset".to_string());
        assert_eq!(err.to_string(), "Transient network error: connection reset");
    }

    #[test]
    fn test_error_display_remote_job() {
        let err = Error::RemoteJob {
            phase: JobPhase::Aborted,
            detail: "killed by admin".to_string(),
        };
        assert_eq!(err.to_string(), "Remote job ABORTED: killed by admin");
    }

    #[test]
    fn test_error_display_exhausted() {
        let err = Error::ExhaustedRetries {
            chunk_id: "positions_chunk_00001".to_string(),
            attempts: 3,
            last_outcome: AttemptOutcome::Timeout,
            message: "still executing".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("positions_chunk_00001"));
        assert!(msg.contains("3 attempts"));
        assert!(msg.contains("TIMEOUT"));
    }

    #[test]
    fn test_only_transient_network_is_transient() {
        assert!(Error::TransientNetwork("x".into()).is_transient());
        assert!(!Error::JobNotFound("x".into()).is_transient());
        assert!(!Error::Timeout(10).is_transient());
        assert!(!Error::Request("400".into()).is_transient());
    }

    #[test]
    fn test_transient_statuses() {
        assert!(is_transient_status(reqwest::StatusCode::SERVICE_UNAVAILABLE));
        assert!(is_transient_status(reqwest::StatusCode::TOO_MANY_REQUESTS));
        assert!(!is_transient_status(reqwest::StatusCode::BAD_REQUEST));
        assert!(!is_transient_status(reqwest::StatusCode::NOT_FOUND));
    }

    #[test]
    fn test_from_serde_json_error() {
        let json_err = serde_json::from_str::<i32>("not a number").unwrap_err();
        let err: Error = json_err.into();
        assert!(matches!(err, Error::Serialization(_)));
    }

    #[test]
    fn test_from_io_error() {
        let io_err = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "access denied");
        let err: Error = io_err.into();
        assert!(err.to_string().contains("I/O error:"));
    }

    #[test]
    fn test_error_is_send_sync() {
        fn assert_send<T: Send>() {}
        fn assert_sync<T: Sync>() {}

        assert_send::<Error>();
        assert_sync::<Error>();
    }
}
