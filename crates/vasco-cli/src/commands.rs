//! Command implementations. Each returns the process exit code.
//!
//! Reports and JSON results go to stdout; logs go to stderr.

use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use serde_json::json;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, info, warn};

use vasco_core::{defaults, discover, ChunkUnit, Error, JobService};
use vasco_jobs::{
    collect, BatchWorker, ChunkLock, ChunkResult, ChunkRunner, Reconciler, SkipReason, StopSignal,
    WorkerEvent,
};

use crate::args::Command;
use crate::settings::Settings;

pub const EXIT_SUCCESS: u8 = 0;
pub const EXIT_FAILURE: u8 = 1;

/// Run `command` against `service`.
pub async fn execute(
    command: Command,
    settings: Settings,
    service: Arc<dyn JobService>,
    stop: StopSignal,
) -> anyhow::Result<u8> {
    match command {
        Command::SubmitOne { chunk, fresh } => {
            let chunk = input_chunk(&chunk)?;
            let runner = ChunkRunner::new(service, Arc::new(settings.orchestrator), stop)?;
            Ok(submit_one(&runner, &chunk, fresh).await)
        }
        Command::SubmitBatch { glob, parallelism } => {
            let settings = settings.with_parallelism(parallelism);
            submit_batch(&glob, settings, service, stop).await
        }
        Command::Status { glob } => {
            let Some(chunks) = matching_chunks(&glob)? else {
                return Ok(defaults::EXIT_NO_CHUNKS);
            };
            let report = Reconciler::offline(&settings.orchestrator)
                .check_all(&chunks)
                .await;
            print!("{}", report.render_table());
            Ok(EXIT_SUCCESS)
        }
        Command::Healthcheck {
            glob,
            emit_remediation,
            out_csv,
            out_md,
        } => {
            let Some(chunks) = matching_chunks(&glob)? else {
                return Ok(defaults::EXIT_NO_CHUNKS);
            };
            let report = Reconciler::new(service, &settings.orchestrator)
                .check_all(&chunks)
                .await;
            print!("{}", report.render_table());

            if emit_remediation {
                let commands: Vec<String> =
                    report.rows.iter().filter_map(|r| r.remediation()).collect();
                if !commands.is_empty() {
                    println!("\n# Remediation");
                    for cmd in commands {
                        println!("{cmd}");
                    }
                }
            }
            if let Some(path) = out_csv {
                write_report(&path, &report.to_csv())?;
            }
            if let Some(path) = out_md {
                write_report(&path, &report.to_markdown(emit_remediation))?;
            }
            Ok(EXIT_SUCCESS)
        }
        Command::Finalize { chunk } => {
            let chunk = input_chunk(&chunk)?;
            let runner = ChunkRunner::new(service, Arc::new(settings.orchestrator), stop)?;
            finalize(&runner, &chunk).await
        }
        Command::Collect { glob, output } => {
            let Some(chunks) = matching_chunks(&glob)? else {
                return Ok(defaults::EXIT_NO_CHUNKS);
            };
            let summary = collect(&chunks, &output)?;
            print_json(&json!({
                "output": summary.output.display().to_string(),
                "merged": summary.merged,
                "rows": summary.rows,
                "missing": summary.missing,
            }))?;
            Ok(EXIT_SUCCESS)
        }
    }
}

async fn submit_one(runner: &ChunkRunner, chunk: &ChunkUnit, fresh: bool) -> u8 {
    let result = runner.run(chunk, fresh).await;
    let (state, error) = match &result {
        ChunkResult::Completed { .. } => ("completed", None),
        ChunkResult::Skipped(SkipReason::Finalized) => ("skipped", None),
        ChunkResult::Skipped(reason @ SkipReason::Locked) => {
            ("locked", Some(reason.as_str().to_string()))
        }
        ChunkResult::Failed(e) => ("failed", Some(e.to_string())),
        ChunkResult::Stopped => ("stopped", None),
    };
    let code = if result.is_success() {
        EXIT_SUCCESS
    } else if matches!(result, ChunkResult::Stopped) {
        defaults::EXIT_STOPPED
    } else {
        EXIT_FAILURE
    };
    let (attempts, via_fallback, resumed) = match result {
        ChunkResult::Completed {
            attempts,
            via_fallback,
            resumed,
        } => (attempts, via_fallback, resumed),
        _ => (0, false, false),
    };

    let printed = print_json(&json!({
        "chunk_id": chunk.chunk_id(),
        "state": state,
        "attempts": attempts,
        "via_fallback": via_fallback,
        "resumed": resumed,
        "final": chunk.final_path().display().to_string(),
        "error": error,
    }));
    if let Err(e) = printed {
        warn!(error = %e, "Could not print result");
    }
    code
}

async fn submit_batch(
    glob: &str,
    settings: Settings,
    service: Arc<dyn JobService>,
    stop: StopSignal,
) -> anyhow::Result<u8> {
    let Some(chunks) = matching_chunks(glob)? else {
        return Ok(defaults::EXIT_NO_CHUNKS);
    };
    let parallelism = settings.orchestrator.parallelism;
    let runner = ChunkRunner::new(service, Arc::new(settings.orchestrator), stop.clone())?;
    let worker = BatchWorker::new(Arc::new(runner), parallelism, stop);

    let total = chunks.len();
    let mut events = worker.events();
    let progress = tokio::spawn(async move {
        let mut done = 0usize;
        loop {
            match events.recv().await {
                Ok(
                    WorkerEvent::ChunkCompleted { .. }
                    | WorkerEvent::ChunkSkipped { .. }
                    | WorkerEvent::ChunkFailed { .. },
                ) => {
                    done += 1;
                    info!(done, total, "Batch progress");
                }
                Ok(WorkerEvent::WorkerStopped) | Err(RecvError::Closed) => break,
                Ok(_) => {}
                Err(RecvError::Lagged(missed)) => {
                    debug!(missed, "Progress reporting lagged");
                }
            }
        }
    });

    let summary = worker.run(chunks).await;
    let _ = progress.await;

    print_json(&json!({
        "completed": summary.completed.len(),
        "skipped": summary.skipped.len(),
        "failed": summary
            .failed
            .iter()
            .map(|(chunk_id, error)| json!({ "chunk_id": chunk_id, "error": error }))
            .collect::<Vec<_>>(),
        "not_started": summary.not_started,
        "stopped": summary.stopped,
    }))?;

    Ok(if summary.is_success() {
        EXIT_SUCCESS
    } else if summary.stopped {
        defaults::EXIT_STOPPED
    } else {
        EXIT_FAILURE
    })
}

async fn finalize(runner: &ChunkRunner, chunk: &ChunkUnit) -> anyhow::Result<u8> {
    let _lock = ChunkLock::try_acquire(chunk)?;
    let outcome = runner.fetcher().finalize(chunk).await?;
    print_json(&json!({
        "chunk_id": chunk.chunk_id(),
        "finalized": matches!(outcome, vasco_jobs::Finalized::Written),
        "final": chunk.final_path().display().to_string(),
    }))?;
    Ok(EXIT_SUCCESS)
}

/// A chunk named on the command line must exist.
fn input_chunk(path: &Path) -> anyhow::Result<ChunkUnit> {
    if !path.is_file() {
        return Err(Error::InvalidInput(format!("chunk file not found: {}", path.display())).into());
    }
    Ok(ChunkUnit::from_input(path)?)
}

/// `None` when nothing matches.
fn matching_chunks(glob: &str) -> anyhow::Result<Option<Vec<ChunkUnit>>> {
    let chunks = discover(glob)?;
    if chunks.is_empty() {
        eprintln!("No chunk files match: {glob}");
        return Ok(None);
    }
    info!(count = chunks.len(), glob, "Discovered chunks");
    Ok(Some(chunks))
}

fn write_report(path: &Path, content: &str) -> anyhow::Result<()> {
    if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("creating report directory {}", dir.display()))?;
    }
    std::fs::write(path, content).with_context(|| format!("writing {}", path.display()))?;
    info!(path = %path.display(), "Report written");
    Ok(())
}

fn print_json(value: &serde_json::Value) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Exit code for an error that escaped a command.
pub fn exit_code_for(err: &anyhow::Error) -> u8 {
    match err.chain().find_map(|e| e.downcast_ref::<Error>()) {
        Some(Error::Stopped) => defaults::EXIT_STOPPED,
        Some(Error::InvalidInput(_)) => defaults::EXIT_NO_CHUNKS,
        _ => EXIT_FAILURE,
    }
}
