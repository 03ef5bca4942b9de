//! Core data models for chunk orchestration.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// =============================================================================
// JOB HANDLE & METADATA
// =============================================================================

/// Opaque reference to a remote asynchronous job (a UWS job URL for TAP).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobHandle(String);

impl JobHandle {
    pub fn new(handle: impl Into<String>) -> Self {
        Self(handle.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for JobHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for JobHandle {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for JobHandle {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Durable record linking a chunk to its remote job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobMetadata {
    pub chunk_id: String,
    #[serde(rename = "job_url")]
    pub handle: JobHandle,
    pub created_at: DateTime<Utc>,
}

impl JobMetadata {
    pub fn new(chunk_id: impl Into<String>, handle: JobHandle) -> Self {
        Self {
            chunk_id: chunk_id.into(),
            handle,
            created_at: Utc::now(),
        }
    }
}

// =============================================================================
// REMOTE PHASE
// =============================================================================

/// Phase reported by the remote job service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobPhase {
    Queued,
    Executing,
    Completed,
    Error,
    Aborted,
    Unknown(String),
}

impl JobPhase {
    /// Parse a UWS phase token. Unrecognized tokens are kept verbatim.
    pub fn parse(token: &str) -> Self {
        let token = token.trim();
        match token.to_ascii_uppercase().as_str() {
            "QUEUED" | "PENDING" | "HELD" | "SUSPENDED" => JobPhase::Queued,
            "EXECUTING" => JobPhase::Executing,
            "COMPLETED" => JobPhase::Completed,
            "ERROR" => JobPhase::Error,
            "ABORTED" => JobPhase::Aborted,
            _ => JobPhase::Unknown(token.to_string()),
        }
    }

    /// Terminal phases end polling.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobPhase::Completed | JobPhase::Error | JobPhase::Aborted
        )
    }

    pub fn is_failure(&self) -> bool {
        matches!(self, JobPhase::Error | JobPhase::Aborted)
    }

    pub fn as_str(&self) -> &str {
        match self {
            JobPhase::Queued => "QUEUED",
            JobPhase::Executing => "EXECUTING",
            JobPhase::Completed => "COMPLETED",
            JobPhase::Error => "ERROR",
            JobPhase::Aborted => "ABORTED",
            JobPhase::Unknown(token) => token,
        }
    }
}

impl fmt::Display for JobPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// ATTEMPT OUTCOME
// =============================================================================

/// Terminal classification of one async attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AttemptOutcome {
    Completed,
    Error,
    Aborted,
    Timeout,
}

impl AttemptOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, AttemptOutcome::Completed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            AttemptOutcome::Completed => "COMPLETED",
            AttemptOutcome::Error => "ERROR",
            AttemptOutcome::Aborted => "ABORTED",
            AttemptOutcome::Timeout => "TIMEOUT",
        }
    }
}

impl fmt::Display for AttemptOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// RECONCILED STATUS
// =============================================================================

/// Chunk state as derived by the health checker. Never persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ChunkStatus {
    New,
    InFlight,
    Partial,
    NeedResubmit,
    Completed,
}

impl ChunkStatus {
    pub const ALL: [ChunkStatus; 5] = [
        ChunkStatus::New,
        ChunkStatus::InFlight,
        ChunkStatus::Partial,
        ChunkStatus::NeedResubmit,
        ChunkStatus::Completed,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ChunkStatus::New => "NEW",
            ChunkStatus::InFlight => "IN_FLIGHT",
            ChunkStatus::Partial => "PARTIAL",
            ChunkStatus::NeedResubmit => "NEED_RESUBMIT",
            ChunkStatus::Completed => "COMPLETED",
        }
    }
}

impl fmt::Display for ChunkStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_phase_parse_known_tokens() {
        assert_eq!(JobPhase::parse("QUEUED"), JobPhase::Queued);
        assert_eq!(JobPhase::parse("executing\n"), JobPhase::Executing);
        assert_eq!(JobPhase::parse(" COMPLETED "), JobPhase::Completed);
        assert_eq!(JobPhase::parse("ERROR"), JobPhase::Error);
        assert_eq!(JobPhase::parse("ABORTED"), JobPhase::Aborted);
    }

    #[test]
    fn test_phase_parse_uws_waiting_phases_are_queued() {
        assert_eq!(JobPhase::parse("PENDING"), JobPhase::Queued);
        assert_eq!(JobPhase::parse("HELD"), JobPhase::Queued);
        assert_eq!(JobPhase::parse("SUSPENDED"), JobPhase::Queued);
    }

    #[test]
    fn test_phase_parse_unknown_keeps_token() {
        let phase = JobPhase::parse("ARCHIVED");
        assert_eq!(phase, JobPhase::Unknown("ARCHIVED".to_string()));
        assert_eq!(phase.to_string(), "ARCHIVED");
        assert!(!phase.is_terminal());
    }

    #[test]
    fn test_phase_terminality() {
        assert!(JobPhase::Completed.is_terminal());
        assert!(JobPhase::Error.is_terminal());
        assert!(JobPhase::Aborted.is_terminal());
        assert!(!JobPhase::Queued.is_terminal());
        assert!(!JobPhase::Executing.is_terminal());

        assert!(JobPhase::Error.is_failure());
        assert!(JobPhase::Aborted.is_failure());
        assert!(!JobPhase::Completed.is_failure());
    }

    #[test]
    fn test_metadata_serializes_handle_as_job_url() {
        let meta = JobMetadata::new("positions_chunk_00001", JobHandle::new("https://tap/async/42"));
        let json = serde_json::to_string(&meta).unwrap();
        assert!(json.contains("\"job_url\":\"https://tap/async/42\""));
        assert!(json.contains("\"chunk_id\":\"positions_chunk_00001\""));

        let back: JobMetadata = serde_json::from_str(&json).unwrap();
        assert_eq!(back, meta);
    }

    #[test]
    fn test_chunk_status_strings() {
        let expected = ["NEW", "IN_FLIGHT", "PARTIAL", "NEED_RESUBMIT", "COMPLETED"];
        for (status, s) in ChunkStatus::ALL.iter().zip(expected) {
            assert_eq!(status.as_str(), s);
            assert_eq!(serde_json::to_string(status).unwrap(), format!("\"{}\"", s));
        }
    }

    #[test]
    fn test_attempt_outcome_display() {
        assert_eq!(AttemptOutcome::Timeout.to_string(), "TIMEOUT");
        assert!(AttemptOutcome::Completed.is_success());
        assert!(!AttemptOutcome::Aborted.is_success());
    }
}
