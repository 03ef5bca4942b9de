//! Core traits for vasco-tap abstractions.
//!
//! These traits define the seams between the orchestrator and its external
//! collaborators (the remote job service and the result transform), enabling
//! pluggable backends and scripted test doubles.

use std::path::Path;

use async_trait::async_trait;

use crate::chunk::ChunkUnit;
use crate::error::Result;
use crate::models::{JobHandle, JobPhase};

/// Remote asynchronous job-based query service.
///
/// Implementations map transport failures worth retrying to
/// `Error::TransientNetwork` and handles the service no longer knows to
/// `Error::JobNotFound`.
#[async_trait]
pub trait JobService: Send + Sync {
    /// Upload a chunk and start a job for it.
    async fn submit(&self, chunk: &ChunkUnit) -> Result<JobHandle>;

    /// Current phase of a job.
    async fn phase(&self, handle: &JobHandle) -> Result<JobPhase>;

    /// Download the raw result payload of a completed job.
    async fn fetch_result(&self, handle: &JobHandle) -> Result<Vec<u8>>;

    /// Error summary of a failed job, for diagnostics.
    async fn error_detail(&self, handle: &JobHandle) -> Result<String>;

    /// Ask the service to stop a running job.
    async fn cancel(&self, handle: &JobHandle) -> Result<()>;

    /// Remove a job and its results from the service.
    async fn delete(&self, handle: &JobHandle) -> Result<()>;

    /// Run the chunk query on the synchronous endpoint in one round trip.
    async fn query_sync(&self, chunk: &ChunkUnit) -> Result<Vec<u8>>;
}

/// Transform from a raw result file into a finalized result file.
#[async_trait]
pub trait Postprocessor: Send + Sync {
    /// Name used in logs.
    fn name(&self) -> &str;

    /// Read `raw`, write the finalized result to `out`.
    async fn process(&self, raw: &Path, out: &Path) -> Result<()>;
}

/// Best-effort diagnostic summary of a finalized result.
pub trait ResultSummarizer: Send + Sync {
    fn summarize(&self, finalized: &Path) -> Result<String>;
}
