//! # vasco-core
//!
//! Core types, traits, and configuration for vasco-tap.
//!
//! This crate provides the data model shared by the TAP client, the job
//! orchestration crate and the CLI: chunk layout, job metadata and phases,
//! the error taxonomy, the remote service and postprocessing traits, and the
//! explicit configuration object.
//!
//! ## Log Level Contract
//!
//! | Level | Usage |
//! |-------|-------|
//! | ERROR | Terminal chunk failure, requires operator attention |
//! | WARN  | Failed attempt, remote ERROR/ABORTED, fallback applied |
//! | INFO  | Lifecycle events (submit, resume, finalize, batch start/stop) |
//! | DEBUG | Decision points, transient retries, backoff delays |
//! | TRACE | Per-iteration polling, heartbeat refreshes |
//!
//! Structured fields use stable names across crates: `chunk_id`, `job_url`,
//! `attempt`, `phase`, `outcome`, `duration_ms`, `delay_ms`, `error`.

pub mod chunk;
pub mod config;
pub mod defaults;
pub mod error;
pub mod models;
pub mod table;
pub mod traits;

// Re-export commonly used types at crate root
pub use chunk::{discover, tmp_path, ChunkUnit};
pub use config::{BackoffPolicy, OrchestratorConfig};
pub use error::{Error, Result};
pub use models::*;
pub use table::CsvTable;
pub use traits::*;
