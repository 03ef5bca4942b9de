//! Job submission with resume from persisted metadata.

use std::sync::Arc;

use tracing::{debug, info, instrument, warn};

use vasco_core::{ChunkUnit, Error, JobHandle, JobMetadata, JobService, OrchestratorConfig, Result};

use crate::retry::retry_transient;
use crate::store;

/// A job handle obtained for a chunk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Submission {
    pub handle: JobHandle,
    /// The handle came from persisted metadata rather than a new submission.
    pub resumed: bool,
}

pub struct JobSubmitter {
    service: Arc<dyn JobService>,
    config: Arc<OrchestratorConfig>,
}

impl JobSubmitter {
    pub fn new(service: Arc<dyn JobService>, config: Arc<OrchestratorConfig>) -> Self {
        Self { service, config }
    }

    /// Obtain a job handle for `chunk`.
    ///
    /// Unless `fresh` is set, a persisted handle that still resolves on the
    /// service is resumed without touching the submission endpoint, and one
    /// the service reports as unknown is replaced. When the service cannot be
    /// asked, the error is returned and the metadata is kept. With `fresh`,
    /// any previous job is abandoned. Metadata for a new job is persisted
    /// only once the service has accepted it.
    #[instrument(skip(self, chunk), fields(chunk_id = chunk.chunk_id()))]
    pub async fn submit(&self, chunk: &ChunkUnit, fresh: bool) -> Result<Submission> {
        if fresh {
            self.abandon(chunk).await?;
        } else if let Some(meta) = store::load(chunk)? {
            if self.resolves(&meta.handle).await? {
                info!(job_url = %meta.handle, "Resuming existing job");
                return Ok(Submission {
                    handle: meta.handle,
                    resumed: true,
                });
            }
            warn!(job_url = %meta.handle, "Persisted job no longer resolves, submitting fresh");
            store::clear(chunk)?;
        }

        let (result, tries) = retry_transient(
            self.config.submit_retries,
            self.config.submit_retry_delay(),
            "submit",
            || self.service.submit(chunk),
        )
        .await;

        let handle = result.map_err(|e| Error::SubmissionFailed {
            attempts: tries,
            message: e.to_string(),
        })?;

        store::save(chunk, &JobMetadata::new(chunk.chunk_id(), handle.clone()))?;
        info!(job_url = %handle, tries, "Job submitted");
        Ok(Submission {
            handle,
            resumed: false,
        })
    }

    /// Clear the chunk's metadata, deleting its remote job on a best-effort
    /// basis.
    pub async fn abandon(&self, chunk: &ChunkUnit) -> Result<()> {
        if let Some(meta) = store::load(chunk)? {
            match self.service.delete(&meta.handle).await {
                Ok(()) => debug!(job_url = %meta.handle, "Deleted abandoned job"),
                Err(e) => debug!(job_url = %meta.handle, error = %e, "Could not delete abandoned job"),
            }
        }
        store::clear(chunk)
    }

    /// Whether the service still knows `handle`.
    ///
    /// Only `JobNotFound` means no; any other failure is returned.
    async fn resolves(&self, handle: &JobHandle) -> Result<bool> {
        let (result, _) = retry_transient(
            self.config.submit_retries,
            self.config.submit_retry_delay(),
            "phase",
            || self.service.phase(handle),
        )
        .await;

        match result {
            Ok(phase) => {
                debug!(job_url = %handle, %phase, "Persisted job resolves");
                Ok(true)
            }
            Err(Error::JobNotFound(_)) => Ok(false),
            Err(e) => {
                warn!(job_url = %handle, error = %e, "Could not verify persisted job, keeping metadata");
                Err(Error::Unverified {
                    handle: handle.to_string(),
                    message: e.to_string(),
                })
            }
        }
    }
}
