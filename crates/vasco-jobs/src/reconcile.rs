//! Read-only chunk health classification and reports.
//!
//! Classification, first match wins:
//!
//! 1. finalized result present → `COMPLETED`
//! 2. fresh heartbeat → `IN_FLIGHT`
//! 3. raw result present → `PARTIAL`
//! 4. metadata present → remote phase decides: running → `IN_FLIGHT`
//!    (orphaned), `COMPLETED` → `PARTIAL`, failed or unresolvable →
//!    `NEED_RESUBMIT`
//! 5. otherwise → `NEW`
//!
//! Nothing here writes to the chunk directory or changes remote state.

use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use futures::stream::{self, StreamExt};
use tracing::{debug, info, instrument};

use vasco_core::{
    defaults, ChunkStatus, ChunkUnit, CsvTable, JobHandle, JobPhase, JobService,
    OrchestratorConfig,
};

use crate::heartbeat::heartbeat_age;
use crate::store;

/// Command name used in remediation hints.
pub const REMEDIATION_BIN: &str = "vasco-tap";

/// Phase text when remote checks are skipped.
pub const PHASE_UNVERIFIED: &str = "unverified";

/// Health of one chunk.
#[derive(Debug, Clone, PartialEq)]
pub struct ChunkHealth {
    pub chunk_id: String,
    pub input: PathBuf,
    pub status: ChunkStatus,
    /// Remote phase text, empty when not queried.
    pub phase: String,
    pub job_url: Option<String>,
    pub heartbeat_age: Option<Duration>,
    /// Running remotely with no live local owner.
    pub orphaned: bool,
    pub detail: Option<String>,
    pub final_path: PathBuf,
    pub raw_path: PathBuf,
    pub meta_path: PathBuf,
}

impl ChunkHealth {
    fn new(chunk: &ChunkUnit, status: ChunkStatus) -> Self {
        Self {
            chunk_id: chunk.chunk_id().to_string(),
            input: chunk.input().to_path_buf(),
            status,
            phase: String::new(),
            job_url: None,
            heartbeat_age: heartbeat_age(&chunk.heartbeat_path()),
            orphaned: false,
            detail: None,
            final_path: chunk.final_path(),
            raw_path: chunk.raw_path(),
            meta_path: chunk.meta_path(),
        }
    }

    fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }

    /// Suggested command for chunks that need operator action.
    pub fn remediation(&self) -> Option<String> {
        let input = self.input.display();
        match self.status {
            ChunkStatus::Partial => Some(format!("{REMEDIATION_BIN} finalize {input}")),
            ChunkStatus::NeedResubmit => {
                Some(format!("{REMEDIATION_BIN} submit-one {input} --fresh"))
            }
            ChunkStatus::InFlight if self.orphaned => {
                Some(format!("{REMEDIATION_BIN} submit-one {input}"))
            }
            _ => None,
        }
    }
}

/// Classifies chunks against local artifacts and, when online, the remote
/// service.
pub struct Reconciler {
    service: Option<Arc<dyn JobService>>,
    freshness: Duration,
    fanout: usize,
    phase_timeout: Duration,
}

impl Reconciler {
    pub fn new(service: Arc<dyn JobService>, config: &OrchestratorConfig) -> Self {
        Self {
            service: Some(service),
            freshness: config.heartbeat_freshness(),
            fanout: defaults::HEALTHCHECK_FANOUT,
            phase_timeout: Duration::from_secs(defaults::PHASE_CHECK_TIMEOUT_SECS),
        }
    }

    /// Local-only classification; rule 4 reports `IN_FLIGHT` unverified.
    pub fn offline(config: &OrchestratorConfig) -> Self {
        Self {
            service: None,
            freshness: config.heartbeat_freshness(),
            fanout: defaults::HEALTHCHECK_FANOUT,
            phase_timeout: Duration::from_secs(defaults::PHASE_CHECK_TIMEOUT_SECS),
        }
    }

    pub fn with_fanout(mut self, fanout: usize) -> Self {
        self.fanout = fanout.max(1);
        self
    }

    pub fn with_phase_timeout(mut self, timeout: Duration) -> Self {
        self.phase_timeout = timeout;
        self
    }

    /// Classify one chunk.
    pub async fn classify(&self, chunk: &ChunkUnit) -> ChunkHealth {
        if chunk.has_final() {
            return ChunkHealth::new(chunk, ChunkStatus::Completed);
        }

        let mut health = ChunkHealth::new(chunk, ChunkStatus::InFlight);
        if health.heartbeat_age.is_some_and(|age| age < self.freshness) {
            return health;
        }

        if chunk.raw_path().is_file() {
            health.status = ChunkStatus::Partial;
            if !chunk.has_raw() {
                return health.with_detail("raw result is empty");
            }
            return health;
        }

        let meta = match store::load(chunk) {
            Ok(meta) => meta,
            Err(e) => {
                health.status = ChunkStatus::NeedResubmit;
                return health.with_detail(format!("metadata unreadable: {e}"));
            }
        };
        let Some(meta) = meta else {
            if chunk.meta_path().exists() {
                health.status = ChunkStatus::NeedResubmit;
                return health.with_detail("metadata unreadable");
            }
            health.status = ChunkStatus::New;
            return health;
        };

        health.job_url = Some(meta.handle.to_string());
        let Some(service) = &self.service else {
            health.phase = PHASE_UNVERIFIED.to_string();
            health.orphaned = true;
            return health;
        };

        match self.check_phase(service.as_ref(), &meta.handle).await {
            Ok(phase) => {
                health.phase = phase.to_string();
                if phase == JobPhase::Completed {
                    health.status = ChunkStatus::Partial;
                    health.with_detail("remote job completed, result not downloaded")
                } else if phase.is_failure() {
                    health.status = ChunkStatus::NeedResubmit;
                    health
                } else {
                    health.orphaned = true;
                    health.with_detail("no live local worker")
                }
            }
            Err(reason) => {
                health.status = ChunkStatus::NeedResubmit;
                health.with_detail(reason)
            }
        }
    }

    async fn check_phase(
        &self,
        service: &dyn JobService,
        handle: &JobHandle,
    ) -> std::result::Result<JobPhase, String> {
        match tokio::time::timeout(self.phase_timeout, service.phase(handle)).await {
            Ok(Ok(phase)) => Ok(phase),
            Ok(Err(e)) => {
                debug!(job_url = %handle, error = %e, "Phase check failed");
                Err(e.to_string())
            }
            Err(_) => {
                debug!(job_url = %handle, "Phase check timed out");
                Err(format!(
                    "phase check timed out after {}s",
                    self.phase_timeout.as_secs()
                ))
            }
        }
    }

    /// Classify every chunk with bounded concurrency.
    #[instrument(skip_all, fields(total = chunks.len(), online = self.service.is_some()))]
    pub async fn check_all(&self, chunks: &[ChunkUnit]) -> HealthReport {
        let mut rows: Vec<ChunkHealth> = stream::iter(chunks)
            .map(|chunk| self.classify(chunk))
            .buffer_unordered(self.fanout)
            .collect()
            .await;
        rows.sort_by(|a, b| a.input.cmp(&b.input));

        let report = HealthReport { rows };
        let counts = report.counts();
        info!(
            new = counts[&ChunkStatus::New],
            in_flight = counts[&ChunkStatus::InFlight],
            partial = counts[&ChunkStatus::Partial],
            need_resubmit = counts[&ChunkStatus::NeedResubmit],
            completed = counts[&ChunkStatus::Completed],
            "Health check finished"
        );
        report
    }
}

/// Classified chunks, sorted by input path.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct HealthReport {
    pub rows: Vec<ChunkHealth>,
}

impl HealthReport {
    /// Count per status; every status is present.
    pub fn counts(&self) -> BTreeMap<ChunkStatus, usize> {
        let mut counts: BTreeMap<ChunkStatus, usize> =
            ChunkStatus::ALL.iter().map(|s| (*s, 0)).collect();
        for row in &self.rows {
            *counts.entry(row.status).or_default() += 1;
        }
        counts
    }

    pub fn with_status(&self, status: ChunkStatus) -> impl Iterator<Item = &ChunkHealth> {
        self.rows.iter().filter(move |r| r.status == status)
    }

    /// True when every chunk is finalized.
    pub fn all_completed(&self) -> bool {
        self.rows.iter().all(|r| r.status == ChunkStatus::Completed)
    }

    /// Fixed-width table for a terminal.
    pub fn render_table(&self) -> String {
        let header = ["CHUNK", "STATE", "PHASE", "HEARTBEAT", "JOB"];
        let body: Vec<[String; 5]> = self
            .rows
            .iter()
            .map(|r| {
                let state = if r.orphaned {
                    format!("{} (orphaned)", r.status)
                } else {
                    r.status.to_string()
                };
                [
                    r.chunk_id.clone(),
                    state,
                    r.phase.clone(),
                    r.heartbeat_age
                        .map(|age| format!("{}s", age.as_secs()))
                        .unwrap_or_else(|| "-".to_string()),
                    r.job_url.clone().unwrap_or_else(|| "-".to_string()),
                ]
            })
            .collect();

        let mut widths = header.map(str::len);
        for row in &body {
            for (w, cell) in widths.iter_mut().zip(row) {
                *w = (*w).max(cell.len());
            }
        }

        let mut out = String::new();
        let mut line = |cells: &[&str]| {
            let mut text = String::new();
            for (i, cell) in cells.iter().enumerate() {
                if i + 1 == cells.len() {
                    text.push_str(cell);
                } else {
                    let _ = write!(text, "{cell:<width$}  ", width = widths[i]);
                }
            }
            out.push_str(text.trim_end());
            out.push('\n');
        };
        line(&header[..]);
        for row in &body {
            let cells: Vec<&str> = row.iter().map(String::as_str).collect();
            line(&cells);
        }

        let summary: Vec<String> = self
            .counts()
            .iter()
            .map(|(status, n)| format!("{status}={n}"))
            .collect();
        out.push_str(&summary.join(" "));
        out.push('\n');
        out
    }

    /// Per-chunk CSV: `chunk,state,phase,job_url,final,raw,meta`.
    pub fn to_csv(&self) -> String {
        let path = |p: &PathBuf| p.display().to_string();
        CsvTable {
            header: ["chunk", "state", "phase", "job_url", "final", "raw", "meta"]
                .map(String::from)
                .to_vec(),
            rows: self
                .rows
                .iter()
                .map(|r| {
                    vec![
                        path(&r.input),
                        r.status.to_string(),
                        r.phase.clone(),
                        r.job_url.clone().unwrap_or_default(),
                        path(&r.final_path),
                        path(&r.raw_path),
                        path(&r.meta_path),
                    ]
                })
                .collect(),
        }
        .to_csv()
    }

    /// Markdown summary with counts, per-state lists and, optionally,
    /// remediation commands.
    pub fn to_markdown(&self, emit_remediation: bool) -> String {
        let mut md = String::from("# Chunk health summary\n\n**Counts**\n");
        for (status, n) in self.counts() {
            let _ = writeln!(md, "- {status}: {n}");
        }

        for (status, title) in [
            (ChunkStatus::New, "ready to submit"),
            (ChunkStatus::InFlight, "async job running"),
            (ChunkStatus::Partial, "raw result or completed job, not finalized"),
            (ChunkStatus::NeedResubmit, "failed or unresolvable job, no result"),
            (ChunkStatus::Completed, "finalized result present"),
        ] {
            let _ = write!(md, "\n## {status} ({title})\n");
            let rows: Vec<&ChunkHealth> = self.with_status(status).collect();
            if rows.is_empty() {
                md.push_str("- (none)\n");
                continue;
            }
            for row in &rows {
                let _ = write!(md, "- `{}`", row.chunk_id);
                if row.orphaned {
                    md.push_str(" (orphaned)");
                }
                if let Some(detail) = &row.detail {
                    let _ = write!(md, ": {detail}");
                }
                md.push('\n');
            }

            let commands: Vec<String> = rows.iter().filter_map(|r| r.remediation()).collect();
            if emit_remediation && !commands.is_empty() {
                md.push_str("\nRemediation:\n\n```bash\n");
                for cmd in commands {
                    md.push_str(&cmd);
                    md.push('\n');
                }
                md.push_str("```\n");
            }
        }
        md
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::File;
    use std::time::SystemTime;
    use tempfile::TempDir;
    use vasco_core::JobMetadata;
    use vasco_tap::mock::MockJobService;

    fn chunk(dir: &TempDir, name: &str) -> ChunkUnit {
        let input = dir.path().join(format!("{name}.csv"));
        std::fs::write(&input, "row_id,ra,dec\n1,10,20\n").unwrap();
        ChunkUnit::from_input(input).unwrap()
    }

    fn config() -> OrchestratorConfig {
        OrchestratorConfig::default()
            .with_poll_interval(1_000)
            .with_heartbeat_grace(2.0)
    }

    fn age_file(path: &std::path::Path, age: Duration) {
        let file = File::options().write(true).open(path).unwrap();
        file.set_modified(SystemTime::now() - age).unwrap();
    }

    fn with_meta(chunk: &ChunkUnit, url: &str) -> JobHandle {
        let handle = JobHandle::new(url);
        store::save(chunk, &JobMetadata::new(chunk.chunk_id(), handle.clone())).unwrap();
        handle
    }

    #[tokio::test]
    async fn test_local_rules() {
        let dir = TempDir::new().unwrap();
        let new = chunk(&dir, "c_new");
        let live = chunk(&dir, "c_live");
        std::fs::write(live.heartbeat_path(), "{}").unwrap();
        let partial = chunk(&dir, "c_partial");
        std::fs::write(partial.raw_path(), "row_id\n1\n").unwrap();
        let done = chunk(&dir, "c_done");
        std::fs::write(done.final_path(), "row_id\n1\n").unwrap();
        std::fs::write(done.heartbeat_path(), "{}").unwrap();

        let reconciler = Reconciler::offline(&config());

        assert_eq!(reconciler.classify(&new).await.status, ChunkStatus::New);
        let live = reconciler.classify(&live).await;
        assert_eq!(live.status, ChunkStatus::InFlight);
        assert!(!live.orphaned);
        assert_eq!(reconciler.classify(&partial).await.status, ChunkStatus::Partial);
        assert_eq!(reconciler.classify(&done).await.status, ChunkStatus::Completed);
    }

    #[tokio::test]
    async fn test_empty_final_is_not_completed() {
        let dir = TempDir::new().unwrap();
        let c = chunk(&dir, "c1");
        std::fs::write(c.final_path(), "").unwrap();

        let health = Reconciler::offline(&config()).classify(&c).await;
        assert_eq!(health.status, ChunkStatus::New);
    }

    #[tokio::test]
    async fn test_empty_raw_is_partial() {
        let dir = TempDir::new().unwrap();
        let c = chunk(&dir, "c1");
        with_meta(&c, "mock://jobs/unused");
        std::fs::write(c.raw_path(), "").unwrap();

        let health = Reconciler::offline(&config()).classify(&c).await;
        assert_eq!(health.status, ChunkStatus::Partial);
        assert_eq!(health.detail.as_deref(), Some("raw result is empty"));
    }

    #[tokio::test]
    async fn test_remote_phase_rules() {
        let dir = TempDir::new().unwrap();
        let service = MockJobService::new();
        let running = chunk(&dir, "c_running");
        service.insert_job(&with_meta(&running, "mock://jobs/run"), vec![JobPhase::Executing]);
        let finished = chunk(&dir, "c_finished");
        service.insert_job(&with_meta(&finished, "mock://jobs/fin"), vec![JobPhase::Completed]);
        let failed = chunk(&dir, "c_failed");
        service.insert_job(&with_meta(&failed, "mock://jobs/err"), vec![JobPhase::Error]);
        let gone = chunk(&dir, "c_gone");
        with_meta(&gone, "mock://jobs/missing");

        let reconciler = Reconciler::new(Arc::new(service), &config());

        let h = reconciler.classify(&running).await;
        assert_eq!((h.status, h.orphaned), (ChunkStatus::InFlight, true));
        assert_eq!(h.phase, "EXECUTING");
        assert!(h.remediation().unwrap().ends_with("c_running.csv"));

        let h = reconciler.classify(&finished).await;
        assert_eq!(h.status, ChunkStatus::Partial);
        assert!(h.remediation().unwrap().contains("finalize"));

        let h = reconciler.classify(&failed).await;
        assert_eq!(h.status, ChunkStatus::NeedResubmit);
        assert!(h.remediation().unwrap().ends_with("--fresh"));

        let h = reconciler.classify(&gone).await;
        assert_eq!(h.status, ChunkStatus::NeedResubmit);
        assert!(h.detail.unwrap().contains("not found"));
    }

    #[tokio::test]
    async fn test_offline_reports_unverified() {
        let dir = TempDir::new().unwrap();
        let c = chunk(&dir, "c1");
        with_meta(&c, "mock://jobs/1");

        let h = Reconciler::offline(&config()).classify(&c).await;

        assert_eq!(h.status, ChunkStatus::InFlight);
        assert_eq!(h.phase, PHASE_UNVERIFIED);
        assert!(h.orphaned);
    }

    #[tokio::test]
    async fn test_stale_heartbeat_falls_through() {
        let dir = TempDir::new().unwrap();
        let c = chunk(&dir, "c1");
        std::fs::write(c.heartbeat_path(), "{}").unwrap();
        age_file(&c.heartbeat_path(), Duration::from_secs(60));

        let h = Reconciler::offline(&config()).classify(&c).await;

        assert_eq!(h.status, ChunkStatus::New);
        assert!(h.heartbeat_age.unwrap() >= Duration::from_secs(59));
    }

    #[tokio::test]
    async fn test_corrupt_metadata_needs_resubmit() {
        let dir = TempDir::new().unwrap();
        let c = chunk(&dir, "c1");
        std::fs::write(c.meta_path(), "{not json").unwrap();

        let h = Reconciler::offline(&config()).classify(&c).await;

        assert_eq!(h.status, ChunkStatus::NeedResubmit);
    }

    #[tokio::test]
    async fn test_classification_has_no_side_effects() {
        let dir = TempDir::new().unwrap();
        let c = chunk(&dir, "c1");
        let service = MockJobService::new();
        service.insert_job(&with_meta(&c, "mock://jobs/1"), vec![JobPhase::Error]);
        let before: Vec<_> = std::fs::read_dir(dir.path()).unwrap().map(|e| e.unwrap().path()).collect();

        Reconciler::new(Arc::new(service.clone()), &config())
            .classify(&c)
            .await;

        let after: Vec<_> = std::fs::read_dir(dir.path()).unwrap().map(|e| e.unwrap().path()).collect();
        assert_eq!(before.len(), after.len());
        assert_eq!(service.delete_count() + service.cancel_count() + service.submit_count(), 0);
    }

    #[tokio::test]
    async fn test_reports() {
        let dir = TempDir::new().unwrap();
        let a = chunk(&dir, "c_a");
        let b = chunk(&dir, "c_b");
        std::fs::write(b.raw_path(), "row_id\n1\n").unwrap();

        let report = Reconciler::offline(&config()).check_all(&[b, a]).await;

        assert_eq!(report.rows[0].chunk_id, "c_a");
        assert_eq!(report.counts()[&ChunkStatus::New], 1);
        assert_eq!(report.counts()[&ChunkStatus::Partial], 1);
        assert!(!report.all_completed());

        let csv = CsvTable::parse(&report.to_csv()).unwrap();
        assert_eq!(csv.header, vec!["chunk", "state", "phase", "job_url", "final", "raw", "meta"]);
        assert_eq!(csv.rows[1][1], "PARTIAL");

        let md = report.to_markdown(true);
        assert!(md.contains("- NEW: 1"));
        assert!(md.contains("- `c_a`"));
        assert!(md.contains("vasco-tap finalize"));
        assert!(!report.to_markdown(false).contains("Remediation"));

        let table = report.render_table();
        assert!(table.starts_with("CHUNK"));
        assert!(table.contains("PARTIAL=1"));
    }
}
