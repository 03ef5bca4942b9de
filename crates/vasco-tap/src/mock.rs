//! Scripted in-memory job service for deterministic testing.
//!
//! Every submission creates a job whose phases are served from a script: each
//! `phase()` call consumes one entry and the last entry repeats forever.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use vasco_core::JobPhase;
//! use vasco_tap::mock::MockJobService;
//!
//! let service = MockJobService::new()
//!     .with_phases(vec![JobPhase::Queued, JobPhase::Executing, JobPhase::Completed])
//!     .with_result("row_id,sep_deg\n1,0.0001\n");
//! assert_eq!(service.submit_count(), 0);
//! ```

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;

use vasco_core::{ChunkUnit, Error, JobHandle, JobPhase, JobService, Result};

/// Default payload served for completed jobs and sync queries.
pub const MOCK_RESULT: &str = "row_id,in_ra,in_dec,sep_deg,w1snr,w2snr\n\
1,10.0,20.0,0.0002,12.0,8.0\n\
1,10.0,20.0,0.0009,4.0,3.0\n\
2,11.0,21.0,0.0004,6.5,2.0\n";

/// Scripted job service.
#[derive(Clone)]
pub struct MockJobService {
    config: Arc<MockConfig>,
    state: Arc<Mutex<MockState>>,
    counters: Arc<Counters>,
}

#[derive(Debug, Clone)]
struct MockConfig {
    default_script: Vec<JobPhase>,
    result: Vec<u8>,
    sync_result: Vec<u8>,
    latency: Duration,
}

#[derive(Debug, Default)]
struct MockState {
    next_id: u64,
    jobs: HashMap<String, VecDeque<JobPhase>>,
    /// Scripts handed to the next submissions, in order.
    queued_scripts: VecDeque<Vec<JobPhase>>,
    submit_failures: u32,
    unreachable: bool,
    submitted_chunks: Vec<String>,
}

#[derive(Debug, Default)]
struct Counters {
    submit: AtomicUsize,
    phase: AtomicUsize,
    fetch: AtomicUsize,
    error_detail: AtomicUsize,
    cancel: AtomicUsize,
    delete: AtomicUsize,
    sync: AtomicUsize,
    active: AtomicUsize,
    max_active: AtomicUsize,
}

impl Default for MockConfig {
    fn default() -> Self {
        Self {
            default_script: vec![JobPhase::Completed],
            result: MOCK_RESULT.as_bytes().to_vec(),
            sync_result: MOCK_RESULT.as_bytes().to_vec(),
            latency: Duration::ZERO,
        }
    }
}

impl Default for MockJobService {
    fn default() -> Self {
        Self::new()
    }
}

impl MockJobService {
    /// Jobs complete on the first poll and return [`MOCK_RESULT`].
    pub fn new() -> Self {
        Self {
            config: Arc::new(MockConfig::default()),
            state: Arc::new(Mutex::new(MockState::default())),
            counters: Arc::new(Counters::default()),
        }
    }

    /// Phase script for every job without a queued script.
    pub fn with_phases(mut self, phases: Vec<JobPhase>) -> Self {
        if !phases.is_empty() {
            Arc::make_mut(&mut self.config).default_script = phases;
        }
        self
    }

    /// Every job reports `phase` forever.
    pub fn always(self, phase: JobPhase) -> Self {
        self.with_phases(vec![phase])
    }

    /// Script for the next submission; scripts are consumed in order.
    pub fn then_job(self, phases: Vec<JobPhase>) -> Self {
        self.state().queued_scripts.push_back(phases);
        self
    }

    pub fn with_result(mut self, body: impl Into<Vec<u8>>) -> Self {
        Arc::make_mut(&mut self.config).result = body.into();
        self
    }

    pub fn with_sync_result(mut self, body: impl Into<Vec<u8>>) -> Self {
        Arc::make_mut(&mut self.config).sync_result = body.into();
        self
    }

    /// The first `n` submissions fail with a transient error.
    pub fn with_submit_failures(self, n: u32) -> Self {
        self.state().submit_failures = n;
        self
    }

    /// Simulated latency for every call.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        Arc::make_mut(&mut self.config).latency = latency;
        self
    }

    /// Register a job that exists before any submission, e.g. one left by a
    /// previous run.
    pub fn with_known_job(self, handle: &JobHandle, phases: Vec<JobPhase>) -> Self {
        self.insert_job(handle, phases);
        self
    }

    pub fn insert_job(&self, handle: &JobHandle, phases: Vec<JobPhase>) {
        let script = if phases.is_empty() {
            self.config.default_script.clone()
        } else {
            phases
        };
        self.state()
            .jobs
            .insert(handle.as_str().to_string(), script.into());
    }

    /// Drop a job so its handle no longer resolves.
    pub fn forget_job(&self, handle: &JobHandle) {
        self.state().jobs.remove(handle.as_str());
    }

    /// Make every call fail with a transient error.
    pub fn set_unreachable(&self, unreachable: bool) {
        self.state().unreachable = unreachable;
    }

    pub fn submit_count(&self) -> usize {
        self.counters.submit.load(Ordering::SeqCst)
    }

    pub fn phase_count(&self) -> usize {
        self.counters.phase.load(Ordering::SeqCst)
    }

    pub fn fetch_count(&self) -> usize {
        self.counters.fetch.load(Ordering::SeqCst)
    }

    pub fn cancel_count(&self) -> usize {
        self.counters.cancel.load(Ordering::SeqCst)
    }

    pub fn delete_count(&self) -> usize {
        self.counters.delete.load(Ordering::SeqCst)
    }

    pub fn sync_count(&self) -> usize {
        self.counters.sync.load(Ordering::SeqCst)
    }

    /// Total remote calls of any kind.
    pub fn network_calls(&self) -> usize {
        let c = &self.counters;
        [
            &c.submit,
            &c.phase,
            &c.fetch,
            &c.error_detail,
            &c.cancel,
            &c.delete,
            &c.sync,
        ]
        .iter()
        .map(|n| n.load(Ordering::SeqCst))
        .sum()
    }

    /// Highest number of calls observed in flight at the same time.
    pub fn max_concurrent_calls(&self) -> usize {
        self.counters.max_active.load(Ordering::SeqCst)
    }

    /// Chunk ids in submission order (sync queries included).
    pub fn submitted_chunks(&self) -> Vec<String> {
        self.state().submitted_chunks.clone()
    }

    fn state(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Count a call, apply latency and the reachability switch.
    async fn enter(&self, counter: &AtomicUsize) -> Result<CallGuard> {
        counter.fetch_add(1, Ordering::SeqCst);
        let active = self.counters.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.counters.max_active.fetch_max(active, Ordering::SeqCst);
        let guard = CallGuard(self.counters.clone());

        if !self.config.latency.is_zero() {
            tokio::time::sleep(self.config.latency).await;
        }
        if self.state().unreachable {
            return Err(Error::TransientNetwork("mock service unreachable".into()));
        }
        Ok(guard)
    }

    fn known(&self, handle: &JobHandle) -> Result<()> {
        if self.state().jobs.contains_key(handle.as_str()) {
            Ok(())
        } else {
            Err(Error::JobNotFound(handle.to_string()))
        }
    }
}

struct CallGuard(Arc<Counters>);

impl Drop for CallGuard {
    fn drop(&mut self) {
        self.0.active.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl JobService for MockJobService {
    async fn submit(&self, chunk: &ChunkUnit) -> Result<JobHandle> {
        let _call = self.enter(&self.counters.submit).await?;
        let mut state = self.state();
        if state.submit_failures > 0 {
            state.submit_failures -= 1;
            return Err(Error::TransientNetwork("mock submission refused".into()));
        }

        state.next_id += 1;
        let handle = JobHandle::new(format!("mock://jobs/{}", state.next_id));
        let script = state
            .queued_scripts
            .pop_front()
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| self.config.default_script.clone());
        state.jobs.insert(handle.as_str().to_string(), script.into());
        state.submitted_chunks.push(chunk.chunk_id().to_string());
        Ok(handle)
    }

    async fn phase(&self, handle: &JobHandle) -> Result<JobPhase> {
        let _call = self.enter(&self.counters.phase).await?;
        let mut state = self.state();
        let script = state
            .jobs
            .get_mut(handle.as_str())
            .ok_or_else(|| Error::JobNotFound(handle.to_string()))?;
        let phase = if script.len() > 1 {
            script.pop_front()
        } else {
            script.front().cloned()
        };
        Ok(phase.unwrap_or(JobPhase::Completed))
    }

    async fn fetch_result(&self, handle: &JobHandle) -> Result<Vec<u8>> {
        let _call = self.enter(&self.counters.fetch).await?;
        self.known(handle)?;
        Ok(self.config.result.clone())
    }

    async fn error_detail(&self, handle: &JobHandle) -> Result<String> {
        let _call = self.enter(&self.counters.error_detail).await?;
        self.known(handle)?;
        Ok(format!("mock failure for {handle}"))
    }

    async fn cancel(&self, handle: &JobHandle) -> Result<()> {
        let _call = self.enter(&self.counters.cancel).await?;
        let mut state = self.state();
        match state.jobs.get_mut(handle.as_str()) {
            Some(script) => {
                *script = VecDeque::from([JobPhase::Aborted]);
                Ok(())
            }
            None => Err(Error::JobNotFound(handle.to_string())),
        }
    }

    async fn delete(&self, handle: &JobHandle) -> Result<()> {
        let _call = self.enter(&self.counters.delete).await?;
        self.state().jobs.remove(handle.as_str());
        Ok(())
    }

    async fn query_sync(&self, chunk: &ChunkUnit) -> Result<Vec<u8>> {
        let _call = self.enter(&self.counters.sync).await?;
        self.state()
            .submitted_chunks
            .push(chunk.chunk_id().to_string());
        Ok(self.config.sync_result.clone())
    }
}
