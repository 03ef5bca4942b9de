//! Per-chunk lifecycle: lock, heartbeat, attempts, backoff and fallback.

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use tokio::time::sleep;
use tracing::{debug, error, info, instrument, warn};

use vasco_core::{
    AttemptOutcome, ChunkUnit, Error, JobService, OrchestratorConfig, Postprocessor, Result,
};

use crate::fetcher::ResultFetcher;
use crate::handler::{ChunkHandler, ChunkResult, SkipReason};
use crate::heartbeat::HeartbeatGuard;
use crate::lock::ChunkLock;
use crate::postprocess::{ClosestPerRow, CommandPostprocessor};
use crate::poller::JobPoller;
use crate::qc::QcSummary;
use crate::retry::{decide, retry_transient, sample_jitter, RetryContext, RetryDecision};
use crate::stop::StopSignal;
use crate::submitter::JobSubmitter;

/// Why a single async attempt did not produce a finalized result.
enum AttemptFailure {
    Failed(AttemptOutcome, String),
    /// The persisted job could not be checked and must not be replaced yet.
    Unverified(String),
    Stopped,
}

impl From<Error> for AttemptFailure {
    fn from(e: Error) -> Self {
        match e {
            Error::Stopped => Self::Stopped,
            Error::Unverified { .. } => Self::Unverified(e.to_string()),
            Error::Timeout(_) => Self::Failed(AttemptOutcome::Timeout, e.to_string()),
            other => Self::Failed(AttemptOutcome::Error, other.to_string()),
        }
    }
}

/// Drives one chunk from submission to a finalized result.
pub struct ChunkRunner {
    service: Arc<dyn JobService>,
    config: Arc<OrchestratorConfig>,
    submitter: JobSubmitter,
    poller: JobPoller,
    fetcher: ResultFetcher,
    stop: StopSignal,
}

impl ChunkRunner {
    /// Build a runner with the postprocessor named by the configuration.
    pub fn new(
        service: Arc<dyn JobService>,
        config: Arc<OrchestratorConfig>,
        stop: StopSignal,
    ) -> Result<Self> {
        let postprocessor: Arc<dyn Postprocessor> = match &config.postprocess_command {
            Some(command) => Arc::new(CommandPostprocessor::from_command_line(command)?),
            None => Arc::new(ClosestPerRow),
        };
        Ok(Self::with_postprocessor(service, config, stop, postprocessor))
    }

    pub fn with_postprocessor(
        service: Arc<dyn JobService>,
        config: Arc<OrchestratorConfig>,
        stop: StopSignal,
        postprocessor: Arc<dyn Postprocessor>,
    ) -> Self {
        let fetcher = ResultFetcher::new(service.clone(), config.clone(), postprocessor)
            .with_summarizer(Arc::new(QcSummary));
        Self {
            submitter: JobSubmitter::new(service.clone(), config.clone()),
            poller: JobPoller::new(service.clone(), config.clone()),
            fetcher,
            service,
            config,
            stop,
        }
    }

    pub fn fetcher(&self) -> &ResultFetcher {
        &self.fetcher
    }

    pub fn stop_signal(&self) -> &StopSignal {
        &self.stop
    }

    /// Process `chunk` until it is finalized, fails terminally, or is stopped.
    ///
    /// With `fresh`, persisted metadata is ignored and the first attempt
    /// submits a new job.
    #[instrument(skip(self, chunk), fields(chunk_id = chunk.chunk_id()))]
    pub async fn run(&self, chunk: &ChunkUnit, fresh: bool) -> ChunkResult {
        if chunk.has_final() {
            info!("Finalized result exists, nothing to do");
            return ChunkResult::Skipped(SkipReason::Finalized);
        }

        let _lock = match ChunkLock::try_acquire(chunk) {
            Ok(lock) => lock,
            Err(Error::ChunkLocked(_)) => {
                warn!("Chunk is locked by another worker");
                return ChunkResult::Skipped(SkipReason::Locked);
            }
            Err(e) => return ChunkResult::Failed(e),
        };
        // Another worker may have finished while we waited for the lock.
        if chunk.has_final() {
            return ChunkResult::Skipped(SkipReason::Finalized);
        }

        let heartbeat = match HeartbeatGuard::start(chunk) {
            Ok(hb) => hb.with_refresh(self.config.poll_interval()),
            Err(e) => return ChunkResult::Failed(e),
        };

        let started = Instant::now();
        let mut ctx = RetryContext::new(chunk.chunk_id());
        let mut fresh = fresh;
        let mut retry_fresh = true;
        let mut resumed_first = false;

        loop {
            if self.stop.is_stopping() {
                info!(attempts = ctx.attempt_count, "Stop requested, not starting another attempt");
                return ChunkResult::Stopped;
            }

            let attempt = ctx.begin_attempt();
            debug!(attempt, fresh, "Starting attempt");

            match self.attempt(chunk, fresh, &heartbeat).await {
                Ok(resumed) => {
                    if attempt == 1 {
                        resumed_first = resumed;
                    }
                    info!(
                        attempt,
                        duration_ms = started.elapsed().as_millis() as u64,
                        "Chunk completed"
                    );
                    return ChunkResult::Completed {
                        attempts: attempt,
                        via_fallback: false,
                        resumed: resumed_first,
                    };
                }
                Err(AttemptFailure::Stopped) => return ChunkResult::Stopped,
                Err(AttemptFailure::Failed(outcome, message)) => {
                    warn!(attempt, %outcome, error = %message, "Attempt failed");
                    ctx.record_failure(outcome, message);
                    retry_fresh = true;
                }
                Err(AttemptFailure::Unverified(message)) => {
                    warn!(attempt, error = %message, "Attempt failed, persisted job kept for resume");
                    ctx.record_failure(AttemptOutcome::Error, message);
                    retry_fresh = false;
                }
            }

            match decide(&ctx, &self.config, sample_jitter(&self.config.backoff)) {
                RetryDecision::Resubmit { delay } => {
                    debug!(
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        "Backing off before resubmission"
                    );
                    tokio::select! {
                        _ = self.stop.aborted() => return ChunkResult::Stopped,
                        _ = sleep(delay) => {}
                    }
                    fresh = retry_fresh;
                }
                RetryDecision::Fallback => return self.fallback(chunk, &ctx).await,
                RetryDecision::Fail => {
                    let err = ctx.exhausted(None);
                    error!(error = %err, "Chunk failed");
                    return ChunkResult::Failed(err);
                }
            }
        }
    }

    /// One async attempt. Returns whether the job was resumed.
    async fn attempt(
        &self,
        chunk: &ChunkUnit,
        fresh: bool,
        heartbeat: &HeartbeatGuard,
    ) -> std::result::Result<bool, AttemptFailure> {
        let submission = self.submitter.submit(chunk, fresh).await?;
        let poll = self
            .poller
            .poll(&submission.handle, heartbeat, &self.stop)
            .await?;
        if poll.outcome != AttemptOutcome::Completed {
            return Err(AttemptFailure::Failed(
                poll.outcome,
                poll.describe(self.config.max_wall_secs),
            ));
        }
        self.fetcher.fetch(chunk, &submission.handle).await?;
        Ok(submission.resumed)
    }

    /// Synchronous request once the async budget is spent.
    async fn fallback(&self, chunk: &ChunkUnit, ctx: &RetryContext) -> ChunkResult {
        if self.stop.is_stopping() {
            return ChunkResult::Stopped;
        }
        warn!(attempts = ctx.attempt_count, "Async attempts exhausted, using synchronous fallback");

        if let Err(e) = self.submitter.abandon(chunk).await {
            debug!(error = %e, "Could not clear metadata before fallback");
        }

        let (result, _) = retry_transient(
            self.config.submit_retries,
            self.config.submit_retry_delay(),
            "query_sync",
            || self.service.query_sync(chunk),
        )
        .await;

        let outcome = match result {
            Ok(payload) => self.fetcher.store_payload(chunk, &payload).await,
            Err(e) => Err(e),
        };

        match outcome {
            Ok(_) => {
                info!(attempts = ctx.attempt_count, "Chunk completed via synchronous fallback");
                ChunkResult::Completed {
                    attempts: ctx.attempt_count,
                    via_fallback: true,
                    resumed: false,
                }
            }
            Err(e) => {
                let err = ctx.exhausted(Some(&format!("sync fallback failed: {e}")));
                error!(error = %err, "Chunk failed");
                ChunkResult::Failed(err)
            }
        }
    }
}

#[async_trait]
impl ChunkHandler for ChunkRunner {
    async fn process(&self, chunk: ChunkUnit) -> ChunkResult {
        self.run(&chunk, false).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;
    use vasco_core::{BackoffPolicy, JobPhase};
    use vasco_tap::mock::MockJobService;

    use crate::store;

    fn chunk_in(dir: &TempDir) -> ChunkUnit {
        let input = dir.path().join("positions_chunk_00001.csv");
        std::fs::write(&input, "row_id,ra,dec\n1,10,20\n").unwrap();
        ChunkUnit::from_input(input).unwrap()
    }

    fn config(max_retries: u32, fallback: bool) -> OrchestratorConfig {
        OrchestratorConfig::default()
            .with_poll_interval(1_000)
            .with_max_wall_secs(30)
            .with_max_retries(max_retries)
            .with_backoff(BackoffPolicy::new(1_000, 4_000, 0))
            .with_fallback(fallback)
            .with_submit_retries(2, 10)
    }

    fn runner(service: &MockJobService, config: OrchestratorConfig) -> ChunkRunner {
        ChunkRunner::new(Arc::new(service.clone()), Arc::new(config), StopSignal::new()).unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn test_happy_path_finalizes() {
        let dir = TempDir::new().unwrap();
        let chunk = chunk_in(&dir);
        let service = MockJobService::new()
            .with_phases(vec![JobPhase::Queued, JobPhase::Executing, JobPhase::Completed]);

        let result = runner(&service, config(3, true)).run(&chunk, false).await;

        assert!(matches!(
            result,
            ChunkResult::Completed { attempts: 1, via_fallback: false, resumed: false }
        ));
        assert!(chunk.has_final());
        assert!(chunk.qc_path().exists());
        assert!(!chunk.heartbeat_path().exists());
        assert_eq!(service.submit_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_finalized_chunk_makes_no_calls() {
        let dir = TempDir::new().unwrap();
        let chunk = chunk_in(&dir);
        std::fs::write(chunk.final_path(), "row_id\n1\n").unwrap();
        let service = MockJobService::new();

        let result = runner(&service, config(3, true)).run(&chunk, false).await;

        assert!(matches!(result, ChunkResult::Skipped(SkipReason::Finalized)));
        assert_eq!(service.network_calls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_resubmits_after_remote_error() {
        let dir = TempDir::new().unwrap();
        let chunk = chunk_in(&dir);
        let service = MockJobService::new()
            .then_job(vec![JobPhase::Executing, JobPhase::Error])
            .then_job(vec![JobPhase::Completed]);

        let result = runner(&service, config(3, false)).run(&chunk, false).await;

        assert!(matches!(result, ChunkResult::Completed { attempts: 2, .. }));
        assert_eq!(service.submit_count(), 2);
        // The failed job is deleted before resubmission.
        assert_eq!(service.delete_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_fallback_after_exhausted_attempts() {
        let dir = TempDir::new().unwrap();
        let chunk = chunk_in(&dir);
        let service = MockJobService::new().always(JobPhase::Error);

        let result = runner(&service, config(2, true)).run(&chunk, false).await;

        assert!(matches!(
            result,
            ChunkResult::Completed { attempts: 2, via_fallback: true, .. }
        ));
        assert_eq!(service.submit_count(), 2);
        assert_eq!(service.sync_count(), 1);
        assert!(chunk.has_final());
        assert!(store::load(&chunk).unwrap().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_outage_during_resume_keeps_persisted_job() {
        let dir = TempDir::new().unwrap();
        let chunk = chunk_in(&dir);
        let handle = vasco_core::JobHandle::new("mock://jobs/running");
        let service = MockJobService::new().with_known_job(&handle, vec![JobPhase::Executing]);
        store::save(
            &chunk,
            &vasco_core::JobMetadata::new(chunk.chunk_id(), handle.clone()),
        )
        .unwrap();
        service.set_unreachable(true);

        let result = runner(&service, config(2, false)).run(&chunk, false).await;

        assert!(matches!(result, ChunkResult::Failed(Error::ExhaustedRetries { attempts: 2, .. })));
        assert_eq!(store::load(&chunk).unwrap().unwrap().handle, handle);
        assert_eq!(service.submit_count(), 0);
        assert_eq!(service.delete_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_terminal_failure_without_fallback() {
        let dir = TempDir::new().unwrap();
        let chunk = chunk_in(&dir);
        let service = MockJobService::new().always(JobPhase::Aborted);

        let result = runner(&service, config(2, false)).run(&chunk, false).await;

        match result {
            ChunkResult::Failed(Error::ExhaustedRetries {
                attempts,
                last_outcome,
                ..
            }) => {
                assert_eq!(attempts, 2);
                assert_eq!(last_outcome, AttemptOutcome::Aborted);
            }
            other => panic!("unexpected result: {other:?}"),
        }
        assert_eq!(service.sync_count(), 0);
        assert!(!chunk.has_final());
        assert!(!chunk.heartbeat_path().exists());
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_shares_retry_budget() {
        let dir = TempDir::new().unwrap();
        let chunk = chunk_in(&dir);
        let service = MockJobService::new().always(JobPhase::Executing);
        let config = config(2, false).with_max_wall_secs(5);

        let result = runner(&service, config).run(&chunk, false).await;

        assert!(matches!(
            result,
            ChunkResult::Failed(Error::ExhaustedRetries {
                attempts: 2,
                last_outcome: AttemptOutcome::Timeout,
                ..
            })
        ));
        assert_eq!(service.submit_count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_empty_result_counts_as_failed_attempt() {
        let dir = TempDir::new().unwrap();
        let chunk = chunk_in(&dir);
        let service = MockJobService::new()
            .with_result("")
            .with_sync_result("row_id,sep_deg\n1,0.0001\n");

        let result = runner(&service, config(2, true)).run(&chunk, false).await;

        assert!(matches!(
            result,
            ChunkResult::Completed { attempts: 2, via_fallback: true, .. }
        ));
        assert_eq!(service.fetch_count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_between_attempts() {
        let dir = TempDir::new().unwrap();
        let chunk = chunk_in(&dir);
        let service = MockJobService::new().always(JobPhase::Error);
        let runner = runner(&service, config(5, true));
        runner.stop_signal().request_stop();

        let result = runner.run(&chunk, false).await;

        assert!(matches!(result, ChunkResult::Stopped));
        assert_eq!(service.submit_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_invalid_postprocess_command_is_rejected() {
        let service = MockJobService::new();
        let config = config(1, false).with_postprocess_command(Some("  ".into()));

        let result = ChunkRunner::new(Arc::new(service), Arc::new(config), StopSignal::new());

        assert!(matches!(result, Err(Error::Config(_))));
    }
}
