//! # vasco-jobs
//!
//! Chunk job orchestration for vasco-tap.
//!
//! This crate provides:
//! - Crash-safe job metadata, heartbeats and file locks per chunk
//! - Submission with resume, phase polling with a wall-clock budget
//! - Result finalization through pluggable postprocessors and a QC summary
//! - Retry control with exponential backoff and a synchronous fallback
//! - A bounded batch worker with graceful stop and lifecycle events
//! - A read-only reconciler that classifies chunk health
//!
//! ## Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use vasco_core::{discover, OrchestratorConfig};
//! use vasco_jobs::{BatchWorker, ChunkRunner, StopSignal};
//! use vasco_tap::{TapClient, TapConfig};
//!
//! let config = Arc::new(OrchestratorConfig::from_env());
//! let service = Arc::new(TapClient::new(TapConfig::from_env()?)?);
//! let stop = StopSignal::new();
//!
//! let runner = Arc::new(ChunkRunner::new(service, config.clone(), stop.clone())?);
//! let worker = BatchWorker::new(runner, config.parallelism, stop);
//!
//! let mut events = worker.events();
//! let summary = worker.run(discover("chunks/positions_chunk_*.csv")?).await;
//! println!("{} completed, {} failed", summary.completed.len(), summary.failed.len());
//! ```

pub mod collect;
pub mod fetcher;
pub mod handler;
pub mod heartbeat;
pub mod lock;
pub mod poller;
pub mod postprocess;
pub mod qc;
pub mod reconcile;
pub mod retry;
pub mod runner;
pub mod stop;
pub mod store;
pub mod submitter;
pub mod worker;

pub use collect::{collect, CollectSummary};
pub use fetcher::{Finalized, ResultFetcher};
pub use handler::{ChunkHandler, ChunkResult, SkipReason};
pub use heartbeat::HeartbeatGuard;
pub use lock::{AggregateLock, ChunkLock};
pub use poller::{JobPoller, PollOutcome};
pub use postprocess::{ClosestPerRow, CommandPostprocessor};
pub use qc::{QcReport, QcSummary};
pub use reconcile::{ChunkHealth, HealthReport, Reconciler};
pub use retry::{RetryContext, RetryDecision};
pub use runner::ChunkRunner;
pub use stop::StopSignal;
pub use submitter::{JobSubmitter, Submission};
pub use worker::{BatchSummary, BatchWorker, WorkerEvent};
