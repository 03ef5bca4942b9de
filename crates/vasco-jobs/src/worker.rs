//! Bounded worker pool that runs a batch of chunks.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Instant;

use futures::FutureExt;
use tokio::sync::{broadcast, Semaphore};
use tokio::task::JoinSet;
use tracing::{debug, error, info, instrument, warn};

use vasco_core::{defaults, ChunkUnit};

use crate::handler::{ChunkHandler, ChunkResult, SkipReason};
use crate::stop::StopSignal;

/// Event emitted by the batch worker.
#[derive(Debug, Clone)]
pub enum WorkerEvent {
    /// The batch started.
    WorkerStarted { total: usize },
    /// A chunk was handed to a worker.
    ChunkStarted { chunk_id: String },
    /// A chunk was finalized.
    ChunkCompleted {
        chunk_id: String,
        attempts: u32,
        via_fallback: bool,
    },
    /// A chunk was left alone.
    ChunkSkipped { chunk_id: String, reason: SkipReason },
    /// A chunk failed terminally.
    ChunkFailed { chunk_id: String, error: String },
    /// The batch ended.
    WorkerStopped,
}

/// Outcome of a batch run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchSummary {
    pub completed: Vec<String>,
    pub skipped: Vec<String>,
    /// `(chunk_id, reason)` for every terminal failure.
    pub failed: Vec<(String, String)>,
    /// Chunks never started because of a stop, or interrupted mid-run.
    pub not_started: Vec<String>,
    pub stopped: bool,
}

impl BatchSummary {
    pub fn is_success(&self) -> bool {
        self.failed.is_empty() && !self.stopped
    }
}

/// Runs chunks through a [`ChunkHandler`] with at most `parallelism` active.
pub struct BatchWorker {
    handler: Arc<dyn ChunkHandler>,
    parallelism: usize,
    stop: StopSignal,
    event_tx: broadcast::Sender<WorkerEvent>,
}

impl BatchWorker {
    pub fn new(handler: Arc<dyn ChunkHandler>, parallelism: usize, stop: StopSignal) -> Self {
        let (event_tx, _) = broadcast::channel(defaults::EVENT_BUS_CAPACITY);
        Self {
            handler,
            parallelism: parallelism.max(1),
            stop,
            event_tx,
        }
    }

    /// Get a receiver for worker events.
    pub fn events(&self) -> broadcast::Receiver<WorkerEvent> {
        self.event_tx.subscribe()
    }

    /// Process every chunk, returning once all started chunks have finished.
    ///
    /// A stop request prevents new chunks from starting; chunks already
    /// running finish their current attempt.
    #[instrument(skip_all, fields(total = chunks.len(), parallelism = self.parallelism))]
    pub async fn run(&self, chunks: Vec<ChunkUnit>) -> BatchSummary {
        let started = Instant::now();
        let mut summary = BatchSummary::default();
        let _ = self
            .event_tx
            .send(WorkerEvent::WorkerStarted { total: chunks.len() });
        info!("Batch started");

        let semaphore = Arc::new(Semaphore::new(self.parallelism));
        let mut tasks: JoinSet<(String, std::thread::Result<ChunkResult>)> = JoinSet::new();
        let mut pending = chunks.into_iter();

        while let Some(chunk) = pending.next() {
            if chunk.has_final() {
                debug!(chunk_id = chunk.chunk_id(), "Finalized result exists, not launching");
                self.record(&mut summary, chunk.chunk_id(), ChunkResult::Skipped(SkipReason::Finalized));
                continue;
            }

            // Reap finished chunks while waiting so events stream during the batch.
            let permit = loop {
                tokio::select! {
                    biased;
                    _ = self.stop.stopped() => break None,
                    Some(joined) = tasks.join_next(), if !tasks.is_empty() => {
                        self.reap(&mut summary, joined);
                    }
                    permit = semaphore.clone().acquire_owned() => break permit.ok(),
                }
            };
            let Some(permit) = permit else {
                info!("Stop requested, not starting remaining chunks");
                summary.not_started.push(chunk.chunk_id().to_string());
                summary
                    .not_started
                    .extend(pending.by_ref().map(|c| c.chunk_id().to_string()));
                break;
            };

            let chunk_id = chunk.chunk_id().to_string();
            let _ = self.event_tx.send(WorkerEvent::ChunkStarted {
                chunk_id: chunk_id.clone(),
            });
            let handler = self.handler.clone();
            tasks.spawn(async move {
                let _permit = permit;
                let result = AssertUnwindSafe(handler.process(chunk)).catch_unwind().await;
                (chunk_id, result)
            });
        }

        while let Some(joined) = tasks.join_next().await {
            self.reap(&mut summary, joined);
        }

        summary.stopped = self.stop.is_stopping();
        let _ = self.event_tx.send(WorkerEvent::WorkerStopped);
        info!(
            completed = summary.completed.len(),
            skipped = summary.skipped.len(),
            failed = summary.failed.len(),
            not_started = summary.not_started.len(),
            stopped = summary.stopped,
            duration_ms = started.elapsed().as_millis() as u64,
            "Batch finished"
        );
        summary
    }

    fn reap(
        &self,
        summary: &mut BatchSummary,
        joined: Result<(String, std::thread::Result<ChunkResult>), tokio::task::JoinError>,
    ) {
        match joined {
            Ok((chunk_id, Ok(result))) => self.record(summary, &chunk_id, result),
            Ok((chunk_id, Err(_))) => {
                error!(chunk_id = %chunk_id, "Chunk task panicked");
                let error = "worker task panicked".to_string();
                summary.failed.push((chunk_id.clone(), error.clone()));
                let _ = self.event_tx.send(WorkerEvent::ChunkFailed { chunk_id, error });
            }
            Err(e) => error!(error = ?e, "Chunk task did not complete"),
        }
    }

    fn record(&self, summary: &mut BatchSummary, chunk_id: &str, result: ChunkResult) {
        let chunk_id = chunk_id.to_string();
        let event = match result {
            ChunkResult::Completed {
                attempts,
                via_fallback,
                ..
            } => {
                summary.completed.push(chunk_id.clone());
                WorkerEvent::ChunkCompleted {
                    chunk_id,
                    attempts,
                    via_fallback,
                }
            }
            ChunkResult::Skipped(reason) => {
                summary.skipped.push(chunk_id.clone());
                WorkerEvent::ChunkSkipped { chunk_id, reason }
            }
            ChunkResult::Failed(err) => {
                let error = err.to_string();
                warn!(chunk_id = %chunk_id, %error, "Chunk failed");
                summary.failed.push((chunk_id.clone(), error.clone()));
                WorkerEvent::ChunkFailed { chunk_id, error }
            }
            ChunkResult::Stopped => {
                summary.not_started.push(chunk_id);
                return;
            }
        };
        let _ = self.event_tx.send(event);
    }
}
