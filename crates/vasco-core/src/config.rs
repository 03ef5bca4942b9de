//! Orchestration configuration.
//!
//! Loaded once by the binary (TOML file or `VASCO_*` environment variables)
//! and passed by value to every component at construction.
//!
//! | Variable | Default | Description |
//! |----------|---------|-------------|
//! | `VASCO_POLL_INTERVAL_MS` | `15000` | Interval between phase checks |
//! | `VASCO_MAX_WALL_SECS` | `10800` | Wall-clock budget per async attempt |
//! | `VASCO_MAX_RETRIES` | `3` | Async attempts per chunk |
//! | `VASCO_BACKOFF_BASE_MS` | `30000` | Backoff base delay |
//! | `VASCO_BACKOFF_CAP_MS` | `600000` | Backoff delay cap (pre-jitter) |
//! | `VASCO_BACKOFF_JITTER_MS` | `5000` | Upper bound of uniform jitter |
//! | `VASCO_SYNC_FALLBACK` | `true` | Try the sync endpoint after retries |
//! | `VASCO_PARALLELISM` | `4` | Chunks processed concurrently |
//! | `VASCO_HEARTBEAT_GRACE` | `4.0` | Heartbeat freshness factor |
//! | `VASCO_SUBMIT_RETRIES` | `3` | Immediate submission retries |
//! | `VASCO_SUBMIT_RETRY_DELAY_MS` | `2000` | Delay between submission retries |
//! | `VASCO_POSTPROCESS_CMD` | unset | External postprocess program |

use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::defaults;
use crate::error::{Error, Result};

/// Exponential backoff parameters between async attempts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackoffPolicy {
    pub base_ms: u64,
    pub cap_ms: u64,
    pub jitter_ms: u64,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            base_ms: defaults::BACKOFF_BASE_MS,
            cap_ms: defaults::BACKOFF_CAP_MS,
            jitter_ms: defaults::BACKOFF_JITTER_MS,
        }
    }
}

impl BackoffPolicy {
    pub fn new(base_ms: u64, cap_ms: u64, jitter_ms: u64) -> Self {
        Self {
            base_ms,
            cap_ms,
            jitter_ms,
        }
    }

    /// Pre-jitter delay after failed attempt `attempt` (1-based):
    /// `min(base * 2^(attempt-1), cap)`.
    pub fn base_delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(63);
        let factor = 1u64.checked_shl(exponent).unwrap_or(u64::MAX);
        let ms = self.base_ms.saturating_mul(factor).min(self.cap_ms);
        Duration::from_millis(ms)
    }

    pub fn jitter_max(&self) -> Duration {
        Duration::from_millis(self.jitter_ms)
    }
}

/// Settings shared by the submitter, poller, retry controller and worker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    /// Interval between phase checks in milliseconds.
    pub poll_interval_ms: u64,
    /// Wall-clock budget for polling one async attempt, in seconds.
    pub max_wall_secs: u64,
    /// Async attempts per chunk before fallback or failure.
    pub max_retries: u32,
    pub backoff: BackoffPolicy,
    /// Issue one synchronous request once async attempts are exhausted.
    pub fallback_enabled: bool,
    /// Maximum number of chunks processed concurrently.
    pub parallelism: usize,
    /// Heartbeat is fresh while younger than poll interval × this factor.
    pub heartbeat_grace: f64,
    /// Immediate retries of a submission on connectivity errors.
    pub submit_retries: u32,
    pub submit_retry_delay_ms: u64,
    /// External postprocess program invoked as `<cmd> <raw> <out>`.
    pub postprocess_command: Option<String>,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: defaults::POLL_INTERVAL_MS,
            max_wall_secs: defaults::MAX_WALL_SECS,
            max_retries: defaults::MAX_RETRIES,
            backoff: BackoffPolicy::default(),
            fallback_enabled: defaults::SYNC_FALLBACK,
            parallelism: defaults::PARALLELISM,
            heartbeat_grace: defaults::HEARTBEAT_GRACE_FACTOR,
            submit_retries: defaults::SUBMIT_RETRIES,
            submit_retry_delay_ms: defaults::SUBMIT_RETRY_DELAY_MS,
            postprocess_command: None,
        }
    }
}

fn env_or<T: FromStr>(key: &str, default: T) -> T {
    match std::env::var(key) {
        Ok(v) => v.trim().parse::<T>().unwrap_or_else(|_| {
            warn!(key, value = %v, "Ignoring unparseable setting, using default");
            default
        }),
        Err(_) => default,
    }
}

fn env_flag(key: &str, default: bool) -> bool {
    std::env::var(key)
        .map(|v| v != "false" && v != "0")
        .unwrap_or(default)
}

impl OrchestratorConfig {
    /// Create config from `VASCO_*` environment variables (with defaults).
    pub fn from_env() -> Self {
        let d = Self::default();
        Self {
            poll_interval_ms: env_or("VASCO_POLL_INTERVAL_MS", d.poll_interval_ms),
            max_wall_secs: env_or("VASCO_MAX_WALL_SECS", d.max_wall_secs),
            max_retries: env_or("VASCO_MAX_RETRIES", d.max_retries).max(1),
            backoff: BackoffPolicy {
                base_ms: env_or("VASCO_BACKOFF_BASE_MS", d.backoff.base_ms),
                cap_ms: env_or("VASCO_BACKOFF_CAP_MS", d.backoff.cap_ms),
                jitter_ms: env_or("VASCO_BACKOFF_JITTER_MS", d.backoff.jitter_ms),
            },
            fallback_enabled: env_flag("VASCO_SYNC_FALLBACK", d.fallback_enabled),
            parallelism: env_or("VASCO_PARALLELISM", d.parallelism).max(1),
            heartbeat_grace: env_or("VASCO_HEARTBEAT_GRACE", d.heartbeat_grace),
            submit_retries: env_or("VASCO_SUBMIT_RETRIES", d.submit_retries).max(1),
            submit_retry_delay_ms: env_or("VASCO_SUBMIT_RETRY_DELAY_MS", d.submit_retry_delay_ms),
            postprocess_command: std::env::var("VASCO_POSTPROCESS_CMD")
                .ok()
                .filter(|v| !v.trim().is_empty()),
        }
    }

    /// Parse the `[orchestrator]` table of a TOML document.
    pub fn from_toml_str(content: &str) -> Result<Self> {
        #[derive(Deserialize)]
        struct Root {
            #[serde(default)]
            orchestrator: OrchestratorConfig,
        }

        let root: Root = toml::from_str(content)?;
        root.orchestrator.validate()?;
        Ok(root.orchestrator)
    }

    pub fn validate(&self) -> Result<()> {
        if self.poll_interval_ms == 0 {
            return Err(Error::Config("poll_interval_ms must be positive".into()));
        }
        if self.max_wall_secs == 0 {
            return Err(Error::Config("max_wall_secs must be positive".into()));
        }
        if self.max_retries == 0 {
            return Err(Error::Config("max_retries must be at least 1".into()));
        }
        if self.parallelism == 0 {
            return Err(Error::Config("parallelism must be at least 1".into()));
        }
        if self.submit_retries == 0 {
            return Err(Error::Config("submit_retries must be at least 1".into()));
        }
        if self.backoff.cap_ms < self.backoff.base_ms {
            return Err(Error::Config(format!(
                "backoff cap ({}ms) is below base ({}ms)",
                self.backoff.cap_ms, self.backoff.base_ms
            )));
        }
        if !(self.heartbeat_grace.is_finite() && self.heartbeat_grace >= 1.0) {
            return Err(Error::Config(format!(
                "heartbeat_grace must be >= 1.0, got {}",
                self.heartbeat_grace
            )));
        }
        Ok(())
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn max_wall(&self) -> Duration {
        Duration::from_secs(self.max_wall_secs)
    }

    pub fn submit_retry_delay(&self) -> Duration {
        Duration::from_millis(self.submit_retry_delay_ms)
    }

    /// Age below which a heartbeat counts as a live owner.
    pub fn heartbeat_freshness(&self) -> Duration {
        self.poll_interval().mul_f64(self.heartbeat_grace)
    }

    pub fn with_poll_interval(mut self, ms: u64) -> Self {
        self.poll_interval_ms = ms;
        self
    }

    pub fn with_max_wall_secs(mut self, secs: u64) -> Self {
        self.max_wall_secs = secs;
        self
    }

    pub fn with_max_retries(mut self, max: u32) -> Self {
        self.max_retries = max;
        self
    }

    pub fn with_backoff(mut self, backoff: BackoffPolicy) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn with_fallback(mut self, enabled: bool) -> Self {
        self.fallback_enabled = enabled;
        self
    }

    pub fn with_parallelism(mut self, n: usize) -> Self {
        self.parallelism = n;
        self
    }

    pub fn with_heartbeat_grace(mut self, factor: f64) -> Self {
        self.heartbeat_grace = factor;
        self
    }

    pub fn with_submit_retries(mut self, retries: u32, delay_ms: u64) -> Self {
        self.submit_retries = retries;
        self.submit_retry_delay_ms = delay_ms;
        self
    }

    pub fn with_postprocess_command(mut self, cmd: Option<String>) -> Self {
        self.postprocess_command = cmd;
        self
    }
}
