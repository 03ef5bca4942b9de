//! Operator stop control shared by every worker.
//!
//! Two levels:
//! - **stop**: no new chunk and no new attempt is started; in-flight attempts
//!   run to their natural end.
//! - **abort**: additionally interrupts polling and backoff sleeps; the
//!   interrupted worker cancels its remote job and cleans up.

use tokio_util::sync::CancellationToken;
use tracing::info;

#[derive(Debug, Clone, Default)]
pub struct StopSignal {
    stop: CancellationToken,
    abort: CancellationToken,
}

impl StopSignal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request a graceful stop.
    pub fn request_stop(&self) {
        if !self.stop.is_cancelled() {
            info!("Stop requested; in-flight chunks will finish their current attempt");
        }
        self.stop.cancel();
    }

    /// Request an immediate stop.
    pub fn abort(&self) {
        if !self.abort.is_cancelled() {
            info!("Abort requested; cancelling in-flight remote jobs");
        }
        self.stop.cancel();
        self.abort.cancel();
    }

    /// Check if a stop was requested (hot path, lock-free).
    pub fn is_stopping(&self) -> bool {
        self.stop.is_cancelled()
    }

    pub fn is_aborted(&self) -> bool {
        self.abort.is_cancelled()
    }

    /// Resolves once a stop (graceful or not) is requested.
    pub async fn stopped(&self) {
        self.stop.cancelled().await
    }

    /// Resolves once an abort is requested.
    pub async fn aborted(&self) {
        self.abort.cancelled().await
    }
}
