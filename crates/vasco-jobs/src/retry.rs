//! Retry control: per-chunk attempt accounting, backoff, and the
//! resubmit / fallback / fail decision.
//!
//! ```text
//! NEW --submit--> SUBMITTED --poll--> {COMPLETED, ERROR, ABORTED, TIMEOUT}
//! failure & attempts <  max                --> backoff, clear metadata, resubmit
//! failure & attempts >= max & fallback     --> one synchronous request
//! failure & attempts >= max & no fallback  --> FAILED
//! ```

use std::future::Future;
use std::time::Duration;

use rand::Rng;
use tracing::debug;

use vasco_core::{AttemptOutcome, BackoffPolicy, Error, OrchestratorConfig, Result};

/// In-memory retry state of one chunk for one run.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryContext {
    pub chunk_id: String,
    pub attempt_count: u32,
    pub last_outcome: Option<AttemptOutcome>,
    pub last_error: Option<String>,
}

impl RetryContext {
    pub fn new(chunk_id: impl Into<String>) -> Self {
        Self {
            chunk_id: chunk_id.into(),
            attempt_count: 0,
            last_outcome: None,
            last_error: None,
        }
    }

    /// Count a new async attempt and return its 1-based number.
    pub fn begin_attempt(&mut self) -> u32 {
        self.attempt_count += 1;
        self.attempt_count
    }

    pub fn record_failure(&mut self, outcome: AttemptOutcome, message: impl Into<String>) {
        self.last_outcome = Some(outcome);
        self.last_error = Some(message.into());
    }

    /// Terminal error describing this context.
    pub fn exhausted(&self, extra: Option<&str>) -> Error {
        let mut message = self
            .last_error
            .clone()
            .unwrap_or_else(|| "no attempt recorded".to_string());
        if let Some(extra) = extra {
            message = format!("{message}; {extra}");
        }
        Error::ExhaustedRetries {
            chunk_id: self.chunk_id.clone(),
            attempts: self.attempt_count,
            last_outcome: self.last_outcome.unwrap_or(AttemptOutcome::Error),
            message,
        }
    }
}

/// What to do after a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Sleep, then resubmit as a fresh job.
    Resubmit { delay: Duration },
    /// Async budget spent; run the synchronous request.
    Fallback,
    /// Async budget spent and no fallback.
    Fail,
}

/// Decide the next step after a failed attempt.
pub fn decide(ctx: &RetryContext, config: &OrchestratorConfig, jitter: Duration) -> RetryDecision {
    if ctx.attempt_count < config.max_retries {
        RetryDecision::Resubmit {
            delay: config.backoff.base_delay(ctx.attempt_count) + jitter,
        }
    } else if config.fallback_enabled {
        RetryDecision::Fallback
    } else {
        RetryDecision::Fail
    }
}

/// Uniform jitter in `[0, jitter_max]`.
pub fn sample_jitter(policy: &BackoffPolicy) -> Duration {
    let max_ms = policy.jitter_max().as_millis() as u64;
    if max_ms == 0 {
        return Duration::ZERO;
    }
    Duration::from_millis(rand::thread_rng().gen_range(0..=max_ms))
}

/// Run `op` up to `tries` times, retrying only transient failures.
///
/// Returns the final result together with the number of tries made.
pub async fn retry_transient<T, F, Fut>(
    tries: u32,
    delay: Duration,
    what: &str,
    mut op: F,
) -> (Result<T>, u32)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let tries = tries.max(1);
    let mut attempt = 1;
    loop {
        match op().await {
            Ok(value) => return (Ok(value), attempt),
            Err(e) if e.is_transient() && attempt < tries => {
                debug!(
                    operation = what,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "Transient failure, retrying"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(e) => return (Err(e), attempt),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn config(max_retries: u32, fallback: bool) -> OrchestratorConfig {
        OrchestratorConfig::default()
            .with_max_retries(max_retries)
            .with_fallback(fallback)
            .with_backoff(BackoffPolicy::new(1_000, 8_000, 0))
    }

    fn failed_ctx(attempts: u32) -> RetryContext {
        let mut ctx = RetryContext::new("c");
        for _ in 0..attempts {
            ctx.begin_attempt();
            ctx.record_failure(AttemptOutcome::Error, "boom");
        }
        ctx
    }

    #[test]
    fn test_resubmit_while_budget_remains() {
        let decision = decide(&failed_ctx(1), &config(3, true), Duration::ZERO);
        assert_eq!(
            decision,
            RetryDecision::Resubmit {
                delay: Duration::from_millis(1_000)
            }
        );
    }

    #[test]
    fn test_delay_includes_jitter_and_grows() {
        let cfg = config(5, true);
        let jitter = Duration::from_millis(250);
        let delays: Vec<Duration> = (1..=3)
            .map(|n| match decide(&failed_ctx(n), &cfg, jitter) {
                RetryDecision::Resubmit { delay } => delay,
                other => panic!("unexpected {other:?}"),
            })
            .collect();

        assert_eq!(
            delays,
            vec![
                Duration::from_millis(1_250),
                Duration::from_millis(2_250),
                Duration::from_millis(4_250)
            ]
        );
    }

    #[test]
    fn test_fallback_after_budget() {
        assert_eq!(
            decide(&failed_ctx(2), &config(2, true), Duration::ZERO),
            RetryDecision::Fallback
        );
    }

    #[test]
    fn test_fail_without_fallback() {
        assert_eq!(
            decide(&failed_ctx(2), &config(2, false), Duration::ZERO),
            RetryDecision::Fail
        );
    }

    #[test]
    fn test_exhausted_error_carries_context() {
        let mut ctx = failed_ctx(3);
        ctx.record_failure(AttemptOutcome::Timeout, "still executing");

        match ctx.exhausted(Some("sync fallback failed")) {
            Error::ExhaustedRetries {
                chunk_id,
                attempts,
                last_outcome,
                message,
            } => {
                assert_eq!(chunk_id, "c");
                assert_eq!(attempts, 3);
                assert_eq!(last_outcome, AttemptOutcome::Timeout);
                assert_eq!(message, "still executing; sync fallback failed");
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_jitter_bounded() {
        let policy = BackoffPolicy::new(1_000, 8_000, 50);
        for _ in 0..100 {
            assert!(sample_jitter(&policy) <= Duration::from_millis(50));
        }
        assert_eq!(
            sample_jitter(&BackoffPolicy::new(1_000, 8_000, 0)),
            Duration::ZERO
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_transient_recovers() {
        let calls = AtomicU32::new(0);
        let (result, tries) = retry_transient(3, Duration::from_secs(2), "op", || async {
            if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                Err(Error::TransientNetwork("reset".into()))
            } else {
                Ok(7)
            }
        })
        .await;

        assert_eq!(result.unwrap(), 7);
        assert_eq!(tries, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_transient_gives_up() {
        let (result, tries) = retry_transient(3, Duration::from_secs(2), "op", || async {
            Err::<(), _>(Error::TransientNetwork("reset".into()))
        })
        .await;

        assert!(result.unwrap_err().is_transient());
        assert_eq!(tries, 3);
    }

    #[tokio::test]
    async fn test_retry_transient_stops_on_permanent_error() {
        let calls = AtomicU32::new(0);
        let (result, tries) = retry_transient(5, Duration::ZERO, "op", || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Err::<(), _>(Error::Request("400".into()))
        })
        .await;

        assert!(result.is_err());
        assert_eq!(tries, 1);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
