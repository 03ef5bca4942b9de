//! Phase polling to a terminal attempt outcome.

use std::sync::Arc;

use tokio::time::{sleep, Instant};
use tracing::{debug, info, instrument, trace, warn};

use vasco_core::{AttemptOutcome, Error, JobHandle, JobPhase, JobService, OrchestratorConfig, Result};

use crate::heartbeat::HeartbeatGuard;
use crate::stop::StopSignal;

/// Terminal classification of one async attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PollOutcome {
    pub outcome: AttemptOutcome,
    /// Remote error document or local reason, for diagnostics.
    pub detail: Option<String>,
}

impl PollOutcome {
    fn new(outcome: AttemptOutcome, detail: Option<String>) -> Self {
        Self { outcome, detail }
    }

    /// Error text for a non-success outcome.
    pub fn describe(&self, max_wall_secs: u64) -> String {
        let detail = self.detail.clone().unwrap_or_default();
        match self.outcome {
            AttemptOutcome::Completed => "completed".to_string(),
            AttemptOutcome::Timeout => Error::Timeout(max_wall_secs).to_string(),
            AttemptOutcome::Error => Error::RemoteJob {
                phase: JobPhase::Error,
                detail,
            }
            .to_string(),
            AttemptOutcome::Aborted => Error::RemoteJob {
                phase: JobPhase::Aborted,
                detail,
            }
            .to_string(),
        }
    }
}

pub struct JobPoller {
    service: Arc<dyn JobService>,
    config: Arc<OrchestratorConfig>,
}

impl JobPoller {
    pub fn new(service: Arc<dyn JobService>, config: Arc<OrchestratorConfig>) -> Self {
        Self { service, config }
    }

    /// Poll `handle` until it reaches a terminal phase or the attempt's
    /// wall-clock budget runs out.
    ///
    /// Each iteration refreshes the heartbeat. Errors reading the phase are
    /// logged and polling continues. An abort cancels the remote job and
    /// returns `Error::Stopped`.
    #[instrument(skip_all, fields(job_url = %handle))]
    pub async fn poll(
        &self,
        handle: &JobHandle,
        heartbeat: &HeartbeatGuard,
        stop: &StopSignal,
    ) -> Result<PollOutcome> {
        let started = Instant::now();
        let budget = self.config.max_wall();
        let interval = self.config.poll_interval();
        let mut polls: u64 = 0;

        loop {
            if let Err(e) = heartbeat.touch() {
                warn!(error = %e, "Failed to refresh heartbeat");
            }

            polls += 1;
            match self.service.phase(handle).await {
                Ok(JobPhase::Completed) => {
                    info!(
                        polls,
                        duration_ms = started.elapsed().as_millis() as u64,
                        "Job completed"
                    );
                    return Ok(PollOutcome::new(AttemptOutcome::Completed, None));
                }
                Ok(JobPhase::Error) => {
                    let detail = self.error_detail(handle).await;
                    warn!(phase = "ERROR", detail = detail.as_deref().unwrap_or(""), "Job failed remotely");
                    return Ok(PollOutcome::new(AttemptOutcome::Error, detail));
                }
                Ok(JobPhase::Aborted) => {
                    let detail = self.error_detail(handle).await;
                    warn!(phase = "ABORTED", detail = detail.as_deref().unwrap_or(""), "Job aborted remotely");
                    return Ok(PollOutcome::new(AttemptOutcome::Aborted, detail));
                }
                Ok(phase) => trace!(%phase, polls, "Job not finished"),
                Err(Error::JobNotFound(url)) => {
                    warn!("Job handle stopped resolving while polling");
                    return Ok(PollOutcome::new(
                        AttemptOutcome::Error,
                        Some(format!("job not found: {url}")),
                    ));
                }
                Err(e) => debug!(error = %e, transient = e.is_transient(), "Phase check failed"),
            }

            let elapsed = started.elapsed();
            if elapsed >= budget {
                warn!(
                    polls,
                    max_wall_secs = self.config.max_wall_secs,
                    "Job still running at end of wall-clock budget"
                );
                return Ok(PollOutcome::new(
                    AttemptOutcome::Timeout,
                    Some(format!("still running after {polls} polls")),
                ));
            }

            tokio::select! {
                _ = stop.aborted() => {
                    info!("Abort during polling, cancelling remote job");
                    if let Err(e) = self.service.cancel(handle).await {
                        debug!(error = %e, "Remote cancel failed");
                    }
                    return Err(Error::Stopped);
                }
                _ = sleep(interval.min(budget - elapsed)) => {}
            }
        }
    }

    async fn error_detail(&self, handle: &JobHandle) -> Option<String> {
        match self.service.error_detail(handle).await {
            Ok(text) if !text.is_empty() => Some(text),
            Ok(_) => None,
            Err(e) => {
                debug!(error = %e, "Could not fetch remote error detail");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tempfile::TempDir;
    use vasco_core::{ChunkUnit, JobService};
    use vasco_tap::mock::MockJobService;

    struct Fixture {
        _dir: TempDir,
        heartbeat: HeartbeatGuard,
        chunk: ChunkUnit,
    }

    fn fixture() -> Fixture {
        let dir = TempDir::new().unwrap();
        let chunk = ChunkUnit::from_input(dir.path().join("positions_chunk_00001.csv")).unwrap();
        let heartbeat = HeartbeatGuard::start(&chunk).unwrap();
        Fixture {
            _dir: dir,
            heartbeat,
            chunk,
        }
    }

    fn poller(service: &MockJobService, max_wall_secs: u64) -> JobPoller {
        let config = OrchestratorConfig::default()
            .with_poll_interval(1_000)
            .with_max_wall_secs(max_wall_secs);
        JobPoller::new(Arc::new(service.clone()), Arc::new(config))
    }

    #[tokio::test(start_paused = true)]
    async fn test_polls_until_completed() {
        let fx = fixture();
        let service = MockJobService::new().with_phases(vec![
            JobPhase::Queued,
            JobPhase::Executing,
            JobPhase::Executing,
            JobPhase::Completed,
        ]);
        let handle = service.submit(&fx.chunk).await.unwrap();

        let outcome = poller(&service, 60)
            .poll(&handle, &fx.heartbeat, &StopSignal::new())
            .await
            .unwrap();

        assert_eq!(outcome.outcome, AttemptOutcome::Completed);
        assert_eq!(service.phase_count(), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_error_and_aborted_fetch_detail() {
        let fx = fixture();
        for (phase, expected) in [
            (JobPhase::Error, AttemptOutcome::Error),
            (JobPhase::Aborted, AttemptOutcome::Aborted),
        ] {
            let service = MockJobService::new().always(phase);
            let handle = service.submit(&fx.chunk).await.unwrap();

            let outcome = poller(&service, 60)
                .poll(&handle, &fx.heartbeat, &StopSignal::new())
                .await
                .unwrap();

            assert_eq!(outcome.outcome, expected);
            assert!(outcome.detail.unwrap().contains("mock failure"));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_after_wall_clock_budget() {
        let fx = fixture();
        let service = MockJobService::new().always(JobPhase::Executing);
        let handle = service.submit(&fx.chunk).await.unwrap();

        let outcome = poller(&service, 10)
            .poll(&handle, &fx.heartbeat, &StopSignal::new())
            .await
            .unwrap();

        assert_eq!(outcome.outcome, AttemptOutcome::Timeout);
        // One check at t=0 and one per second up to the 10s budget.
        assert_eq!(service.phase_count(), 11);
        assert!(outcome.describe(10).contains("10s"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_errors_keep_polling() {
        let fx = fixture();
        let service = MockJobService::new().always(JobPhase::Executing);
        let handle = service.submit(&fx.chunk).await.unwrap();
        service.set_unreachable(true);

        let outcome = poller(&service, 5)
            .poll(&handle, &fx.heartbeat, &StopSignal::new())
            .await
            .unwrap();

        assert_eq!(outcome.outcome, AttemptOutcome::Timeout);
        assert!(service.phase_count() > 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_vanished_job_is_error() {
        let fx = fixture();
        let service = MockJobService::new().always(JobPhase::Executing);
        let handle = service.submit(&fx.chunk).await.unwrap();
        service.forget_job(&handle);

        let outcome = poller(&service, 60)
            .poll(&handle, &fx.heartbeat, &StopSignal::new())
            .await
            .unwrap();

        assert_eq!(outcome.outcome, AttemptOutcome::Error);
    }

    #[tokio::test(start_paused = true)]
    async fn test_abort_cancels_remote_job() {
        let fx = fixture();
        let service = MockJobService::new().always(JobPhase::Executing);
        let handle = service.submit(&fx.chunk).await.unwrap();
        let stop = StopSignal::new();
        let poller = poller(&service, 3_600);

        let aborter = {
            let stop = stop.clone();
            tokio::spawn(async move {
                sleep(Duration::from_millis(2_500)).await;
                stop.abort();
            })
        };

        let result = poller.poll(&handle, &fx.heartbeat, &stop).await;
        aborter.await.unwrap();

        assert!(matches!(result, Err(Error::Stopped)));
        assert_eq!(service.cancel_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_graceful_stop_lets_attempt_finish() {
        let fx = fixture();
        let service = MockJobService::new().with_phases(vec![
            JobPhase::Executing,
            JobPhase::Completed,
        ]);
        let handle = service.submit(&fx.chunk).await.unwrap();
        let stop = StopSignal::new();
        stop.request_stop();

        let outcome = poller(&service, 60)
            .poll(&handle, &fx.heartbeat, &stop)
            .await
            .unwrap();

        assert_eq!(outcome.outcome, AttemptOutcome::Completed);
        assert_eq!(service.cancel_count(), 0);
    }
}
