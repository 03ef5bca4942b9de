//! Result download and finalization.

use std::sync::Arc;

use tracing::{debug, info, instrument, warn};

use vasco_core::{
    tmp_path, ChunkUnit, Error, JobHandle, JobService, OrchestratorConfig, Postprocessor, Result,
    ResultSummarizer,
};

use crate::retry::retry_transient;
use crate::store::{publish_no_clobber, write_atomic};

/// What a finalization did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Finalized {
    /// The finalized result was written by this call.
    Written,
    /// A finalized result already existed and was left untouched.
    AlreadyPresent,
}

pub struct ResultFetcher {
    service: Arc<dyn JobService>,
    config: Arc<OrchestratorConfig>,
    postprocessor: Arc<dyn Postprocessor>,
    summarizer: Option<Arc<dyn ResultSummarizer>>,
}

impl ResultFetcher {
    pub fn new(
        service: Arc<dyn JobService>,
        config: Arc<OrchestratorConfig>,
        postprocessor: Arc<dyn Postprocessor>,
    ) -> Self {
        Self {
            service,
            config,
            postprocessor,
            summarizer: None,
        }
    }

    pub fn with_summarizer(mut self, summarizer: Arc<dyn ResultSummarizer>) -> Self {
        self.summarizer = Some(summarizer);
        self
    }

    /// Download the result of a completed job and finalize it.
    #[instrument(skip_all, fields(chunk_id = chunk.chunk_id(), job_url = %handle))]
    pub async fn fetch(&self, chunk: &ChunkUnit, handle: &JobHandle) -> Result<Finalized> {
        let (result, _) = retry_transient(
            self.config.submit_retries,
            self.config.submit_retry_delay(),
            "fetch_result",
            || self.service.fetch_result(handle),
        )
        .await;
        let payload = result?;
        debug!(bytes = payload.len(), "Result downloaded");
        self.store_payload(chunk, &payload).await
    }

    /// Persist a raw payload (async or sync) and finalize it.
    pub async fn store_payload(&self, chunk: &ChunkUnit, payload: &[u8]) -> Result<Finalized> {
        if payload.iter().all(u8::is_ascii_whitespace) {
            return Err(Error::EmptyResult(chunk.chunk_id().to_string()));
        }
        write_atomic(&chunk.raw_path(), payload)?;
        self.finalize(chunk).await
    }

    /// Run the postprocessor on the existing raw result.
    ///
    /// An existing finalized result is never replaced.
    #[instrument(skip_all, fields(chunk_id = chunk.chunk_id()))]
    pub async fn finalize(&self, chunk: &ChunkUnit) -> Result<Finalized> {
        let final_path = chunk.final_path();
        if chunk.has_final() {
            debug!("Finalized result already present");
            return Ok(Finalized::AlreadyPresent);
        }
        if !chunk.has_raw() {
            return Err(Error::EmptyResult(chunk.chunk_id().to_string()));
        }

        let tmp = tmp_path(&final_path);
        let _ = std::fs::remove_file(&tmp);
        if let Err(e) = self.postprocessor.process(&chunk.raw_path(), &tmp).await {
            let _ = std::fs::remove_file(&tmp);
            return Err(match e {
                Error::Postprocess(_) => e,
                other => Error::Postprocess(format!("{}: {other}", self.postprocessor.name())),
            });
        }

        if !publish_no_clobber(&tmp, &final_path)? {
            warn!("Finalized result appeared concurrently; keeping the existing one");
            return Ok(Finalized::AlreadyPresent);
        }
        info!(
            path = %final_path.display(),
            postprocessor = self.postprocessor.name(),
            "Chunk finalized"
        );

        self.summarize(chunk);
        Ok(Finalized::Written)
    }

    /// Best-effort QC summary next to the finalized result.
    fn summarize(&self, chunk: &ChunkUnit) {
        let Some(summarizer) = &self.summarizer else {
            return;
        };
        let text = match summarizer.summarize(&chunk.final_path()) {
            Ok(text) => text,
            Err(e) => {
                warn!(error = %e, "QC summary failed");
                return;
            }
        };
        match write_atomic(&chunk.qc_path(), text.as_bytes()) {
            Ok(()) => debug!(path = %chunk.qc_path().display(), "QC summary written"),
            Err(e) => warn!(error = %e, "Could not write QC summary"),
        }
    }
}
