//! Centralized default constants for vasco-tap.
//!
//! **This module is the single source of truth** for shared default values.
//! Configuration structs, the TAP client and the CLI reference these
//! constants instead of defining their own magic numbers.

// =============================================================================
// POLLING
// =============================================================================

/// Interval between remote phase checks in milliseconds.
pub const POLL_INTERVAL_MS: u64 = 15_000;

/// Maximum wall-clock time a single async attempt may poll (seconds).
pub const MAX_WALL_SECS: u64 = 3 * 60 * 60;

/// A heartbeat is fresh while its age is below poll interval × this factor.
pub const HEARTBEAT_GRACE_FACTOR: f64 = 4.0;

// =============================================================================
// RETRY
// =============================================================================

/// Async attempts per chunk before giving up or falling back.
pub const MAX_RETRIES: u32 = 3;

/// Backoff base delay in milliseconds (first retry waits about this long).
pub const BACKOFF_BASE_MS: u64 = 30_000;

/// Upper bound on the pre-jitter backoff delay in milliseconds.
pub const BACKOFF_CAP_MS: u64 = 10 * 60 * 1000;

/// Upper bound on the uniform jitter added to each backoff delay.
pub const BACKOFF_JITTER_MS: u64 = 5_000;

/// Whether the synchronous endpoint is tried after the async budget is spent.
pub const SYNC_FALLBACK: bool = true;

/// Immediate retries of the submission call on connectivity errors.
pub const SUBMIT_RETRIES: u32 = 3;

/// Delay between immediate submission retries in milliseconds.
pub const SUBMIT_RETRY_DELAY_MS: u64 = 2_000;

// =============================================================================
// CONCURRENCY
// =============================================================================

/// Chunks processed concurrently by a batch run.
pub const PARALLELISM: usize = 4;

/// Worker event broadcast channel capacity.
pub const EVENT_BUS_CAPACITY: usize = 256;

/// Concurrent remote phase checks issued by the health checker.
pub const HEALTHCHECK_FANOUT: usize = 8;

// =============================================================================
// TAP SERVICE
// =============================================================================

/// Default TAP service base URL (IRSA).
pub const TAP_URL: &str = "https://irsa.ipac.caltech.edu/TAP";

/// Table name the uploaded positions are bound to in the ADQL query.
pub const UPLOAD_TABLE: &str = "my_positions";

/// Timeout for individual async-endpoint HTTP requests in seconds.
pub const HTTP_TIMEOUT_SECS: u64 = 60;

/// Timeout for the synchronous fallback request in seconds.
pub const SYNC_TIMEOUT_SECS: u64 = 30 * 60;

/// Timeout for phase checks made by the health checker in seconds.
pub const PHASE_CHECK_TIMEOUT_SECS: u64 = 5;

// =============================================================================
// LOCAL LAYOUT
// =============================================================================

/// Job metadata record suffix.
pub const META_SUFFIX: &str = ".meta";

/// Heartbeat marker suffix.
pub const HEARTBEAT_SUFFIX: &str = ".running";

/// Per-chunk lock file suffix.
pub const LOCK_SUFFIX: &str = ".lock";

/// Raw (unfinalized) result suffix.
pub const RAW_SUFFIX: &str = "_raw.csv";

/// Finalized result suffix.
pub const FINAL_SUFFIX: &str = "_final.csv";

/// Diagnostic QC summary suffix.
pub const QC_SUFFIX: &str = "_final.qc.txt";

/// Suffix for in-progress writes that are renamed into place.
pub const TMP_SUFFIX: &str = ".tmp";

/// Coarse lock guarding operations over all finalized results.
pub const AGGREGATE_LOCK_NAME: &str = ".aggregate.lock";

// =============================================================================
// POSTPROCESS / QC
// =============================================================================

/// Separation (arcsec) within which a row counts as a match in QC summaries.
pub const MATCH_RADIUS_ARCSEC: f64 = 5.0;

/// Separation assigned when no coordinate columns allow computing one.
pub const SEPARATION_SENTINEL_ARCSEC: f64 = 1e9;

/// Minimum SNR counted as a detection in QC summaries.
pub const QC_MIN_SNR: f64 = 5.0;

// =============================================================================
// CLI
// =============================================================================

/// Exit code reserved for runs stopped by an operator signal.
pub const EXIT_STOPPED: u8 = 130;

/// Exit code when a glob matched no chunk files.
pub const EXIT_NO_CHUNKS: u8 = 2;
