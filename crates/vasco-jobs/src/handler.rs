//! Chunk handler seam between the batch worker and the per-chunk lifecycle.

use async_trait::async_trait;

use vasco_core::{ChunkUnit, Error};

/// Why a chunk was not processed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// A finalized result already exists.
    Finalized,
    /// Another worker holds the chunk lock.
    Locked,
}

impl SkipReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Finalized => "already finalized",
            Self::Locked => "locked by another worker",
        }
    }
}

/// Result of processing one chunk.
#[derive(Debug)]
pub enum ChunkResult {
    /// The chunk has a finalized result.
    Completed {
        /// Async attempts made during this run.
        attempts: u32,
        /// The result came from the synchronous fallback.
        via_fallback: bool,
        /// The first attempt resumed a persisted job.
        resumed: bool,
    },
    /// The chunk was left alone.
    Skipped(SkipReason),
    /// The chunk reached a terminal failure.
    Failed(Error),
    /// Processing was interrupted by a stop or abort.
    Stopped,
}

impl ChunkResult {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Completed { .. } | Self::Skipped(SkipReason::Finalized))
    }
}

/// Processes one chunk to a [`ChunkResult`].
#[async_trait]
pub trait ChunkHandler: Send + Sync {
    async fn process(&self, chunk: ChunkUnit) -> ChunkResult;
}
