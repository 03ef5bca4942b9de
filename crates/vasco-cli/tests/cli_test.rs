//! Integration tests for the command layer against the scripted service.
//!
//! This test suite validates:
//! - Cli-001: submit-one exit codes for success, noop, missing input and failure
//! - Cli-002: submit-batch exit codes for success and an empty glob
//! - Cli-003: status works offline; healthcheck writes CSV and Markdown reports
//! - Cli-004: finalize builds the result from a raw file without network calls
//! - Cli-005: collect merges finalized results and rejects an empty merge

use std::sync::Arc;

use tempfile::TempDir;
use vasco_cli::{execute, exit_code_for, Command, Settings, EXIT_FAILURE, EXIT_SUCCESS};
use vasco_core::{defaults, BackoffPolicy, ChunkUnit, JobPhase, OrchestratorConfig};
use vasco_jobs::StopSignal;
use vasco_tap::mock::{MockJobService, MOCK_RESULT};
use vasco_tap::TapConfig;

// ============================================================================
// HELPER FUNCTIONS
// ============================================================================

fn settings() -> Settings {
    Settings {
        orchestrator: OrchestratorConfig::default()
            .with_poll_interval(1_000)
            .with_max_wall_secs(60)
            .with_max_retries(2)
            .with_backoff(BackoffPolicy::new(1_000, 2_000, 0))
            .with_submit_retries(1, 100)
            .with_fallback(false),
        tap: TapConfig::default(),
    }
}

fn write_chunk(dir: &TempDir, index: usize) -> ChunkUnit {
    let input = dir.path().join(format!("positions_chunk_{index:05}.csv"));
    std::fs::write(&input, "row_id,ra,dec\n1,10.0,20.0\n2,11.0,21.0\n").unwrap();
    ChunkUnit::from_input(input).unwrap()
}

fn chunk_glob(dir: &TempDir) -> String {
    format!("{}/positions_chunk_*.csv", dir.path().display())
}

async fn run(command: Command, service: &MockJobService) -> anyhow::Result<u8> {
    execute(
        command,
        settings(),
        Arc::new(service.clone()),
        StopSignal::new(),
    )
    .await
}

/// Exit code the binary would report.
async fn exit_code(command: Command, service: &MockJobService) -> u8 {
    match run(command, service).await {
        Ok(code) => code,
        Err(e) => exit_code_for(&e),
    }
}

// ============================================================================
// SUBMIT
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_submit_one_completes_then_noops() {
    let dir = TempDir::new().unwrap();
    let chunk = write_chunk(&dir, 1);
    let service = MockJobService::new();

    let cmd = || Command::SubmitOne {
        chunk: chunk.input().to_path_buf(),
        fresh: false,
    };

    assert_eq!(exit_code(cmd(), &service).await, EXIT_SUCCESS);
    assert!(chunk.has_final());
    let calls = service.network_calls();

    assert_eq!(exit_code(cmd(), &service).await, EXIT_SUCCESS);
    assert_eq!(service.network_calls(), calls);
}

#[tokio::test]
async fn test_submit_one_missing_input_is_usage_error() {
    let dir = TempDir::new().unwrap();
    let service = MockJobService::new();

    let code = exit_code(
        Command::SubmitOne {
            chunk: dir.path().join("absent.csv"),
            fresh: false,
        },
        &service,
    )
    .await;

    assert_eq!(code, defaults::EXIT_NO_CHUNKS);
    assert_eq!(service.network_calls(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_submit_one_exhausted_is_failure() {
    let dir = TempDir::new().unwrap();
    let chunk = write_chunk(&dir, 1);
    let service = MockJobService::new().always(JobPhase::Error);

    let code = exit_code(
        Command::SubmitOne {
            chunk: chunk.input().to_path_buf(),
            fresh: false,
        },
        &service,
    )
    .await;

    assert_eq!(code, EXIT_FAILURE);
    assert!(!chunk.has_final());
}

#[tokio::test(start_paused = true)]
async fn test_submit_batch_completes_every_chunk() {
    let dir = TempDir::new().unwrap();
    let chunks: Vec<ChunkUnit> = (1..=3).map(|i| write_chunk(&dir, i)).collect();
    let service = MockJobService::new();

    let code = exit_code(
        Command::SubmitBatch {
            glob: chunk_glob(&dir),
            parallelism: Some(2),
        },
        &service,
    )
    .await;

    assert_eq!(code, EXIT_SUCCESS);
    assert!(chunks.iter().all(ChunkUnit::has_final));
    assert!(service.max_concurrent_calls() <= 2);
}

#[tokio::test]
async fn test_submit_batch_empty_glob() {
    let dir = TempDir::new().unwrap();
    let service = MockJobService::new();

    let code = exit_code(
        Command::SubmitBatch {
            glob: chunk_glob(&dir),
            parallelism: None,
        },
        &service,
    )
    .await;

    assert_eq!(code, defaults::EXIT_NO_CHUNKS);
}

// ============================================================================
// STATUS AND HEALTHCHECK
// ============================================================================

#[tokio::test]
async fn test_status_is_offline() {
    let dir = TempDir::new().unwrap();
    write_chunk(&dir, 1);
    let service = MockJobService::new();

    let code = exit_code(
        Command::Status {
            glob: chunk_glob(&dir),
        },
        &service,
    )
    .await;

    assert_eq!(code, EXIT_SUCCESS);
    assert_eq!(service.network_calls(), 0);
}

#[tokio::test]
async fn test_healthcheck_writes_reports() {
    let dir = TempDir::new().unwrap();
    let partial = write_chunk(&dir, 1);
    std::fs::write(partial.raw_path(), MOCK_RESULT).unwrap();
    write_chunk(&dir, 2);
    let out_csv = dir.path().join("reports/health.csv");
    let out_md = dir.path().join("reports/health.md");

    let code = exit_code(
        Command::Healthcheck {
            glob: chunk_glob(&dir),
            emit_remediation: true,
            out_csv: Some(out_csv.clone()),
            out_md: Some(out_md.clone()),
        },
        &MockJobService::new(),
    )
    .await;

    assert_eq!(code, EXIT_SUCCESS);
    let csv = std::fs::read_to_string(&out_csv).unwrap();
    assert_eq!(csv.lines().count(), 3);
    assert!(csv.contains("positions_chunk_00001"));
    let md = std::fs::read_to_string(&out_md).unwrap();
    assert!(md.contains("- PARTIAL: 1"));
    assert!(md.contains("- NEW: 1"));
    assert!(md.contains("finalize"));
}

// ============================================================================
// FINALIZE AND COLLECT
// ============================================================================

#[tokio::test]
async fn test_finalize_from_raw() {
    let dir = TempDir::new().unwrap();
    let chunk = write_chunk(&dir, 1);
    std::fs::write(chunk.raw_path(), MOCK_RESULT).unwrap();
    let service = MockJobService::new();

    let code = exit_code(
        Command::Finalize {
            chunk: chunk.input().to_path_buf(),
        },
        &service,
    )
    .await;

    assert_eq!(code, EXIT_SUCCESS);
    assert!(chunk.has_final());
    assert_eq!(service.network_calls(), 0);
    assert!(!chunk.lock_path().exists());
}

#[tokio::test]
async fn test_finalize_without_raw_fails() {
    let dir = TempDir::new().unwrap();
    let chunk = write_chunk(&dir, 1);

    let code = exit_code(
        Command::Finalize {
            chunk: chunk.input().to_path_buf(),
        },
        &MockJobService::new(),
    )
    .await;

    assert_eq!(code, EXIT_FAILURE);
    assert!(!chunk.has_final());
}

#[tokio::test(start_paused = true)]
async fn test_collect_merges_finalized() {
    let dir = TempDir::new().unwrap();
    let done = write_chunk(&dir, 1);
    let pending = write_chunk(&dir, 2);
    let service = MockJobService::new();
    assert_eq!(
        exit_code(
            Command::SubmitOne {
                chunk: done.input().to_path_buf(),
                fresh: false,
            },
            &service,
        )
        .await,
        EXIT_SUCCESS
    );
    let output = dir.path().join("merged.csv");

    let code = exit_code(
        Command::Collect {
            glob: chunk_glob(&dir),
            output: output.clone(),
        },
        &service,
    )
    .await;

    assert_eq!(code, EXIT_SUCCESS);
    let merged = std::fs::read_to_string(&output).unwrap();
    assert!(merged.starts_with("chunk_id,"));
    assert!(merged.contains("positions_chunk_00001"));
    assert!(!merged.contains(pending.chunk_id()));
}

#[tokio::test]
async fn test_collect_nothing_finalized() {
    let dir = TempDir::new().unwrap();
    write_chunk(&dir, 1);

    let code = exit_code(
        Command::Collect {
            glob: chunk_glob(&dir),
            output: dir.path().join("merged.csv"),
        },
        &MockJobService::new(),
    )
    .await;

    assert_eq!(code, defaults::EXIT_NO_CHUNKS);
    assert!(!dir.path().join("merged.csv").exists());
}
