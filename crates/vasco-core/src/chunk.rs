//! Chunk identity, artifact naming, and discovery.
//!
//! Every artifact belonging to a chunk lives next to its input file and is
//! named after the input file stem:
//!
//! | Artifact | Path |
//! |----------|------|
//! | input | `<dir>/<chunk>.csv` |
//! | job metadata | `<dir>/<chunk>.meta` |
//! | heartbeat | `<dir>/<chunk>.running` |
//! | lock | `<dir>/<chunk>.lock` |
//! | raw result | `<dir>/<chunk>_raw.csv` |
//! | finalized result | `<dir>/<chunk>_final.csv` |
//! | QC summary | `<dir>/<chunk>_final.qc.txt` |

use std::path::{Path, PathBuf};

use crate::defaults;
use crate::error::{Error, Result};

/// A chunk input file and the paths of everything derived from it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkUnit {
    chunk_id: String,
    input: PathBuf,
    dir: PathBuf,
}

impl ChunkUnit {
    /// Build a chunk from its input file path. The chunk id is the file stem.
    pub fn from_input(input: impl Into<PathBuf>) -> Result<Self> {
        let input = input.into();
        let chunk_id = input
            .file_stem()
            .and_then(|s| s.to_str())
            .filter(|s| !s.is_empty())
            .ok_or_else(|| {
                Error::InvalidInput(format!("not a chunk file name: {}", input.display()))
            })?
            .to_string();
        let dir = input
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));

        Ok(Self {
            chunk_id,
            input,
            dir,
        })
    }

    pub fn chunk_id(&self) -> &str {
        &self.chunk_id
    }

    pub fn input(&self) -> &Path {
        &self.input
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn sibling(&self, suffix: &str) -> PathBuf {
        self.dir.join(format!("{}{}", self.chunk_id, suffix))
    }

    pub fn meta_path(&self) -> PathBuf {
        self.sibling(defaults::META_SUFFIX)
    }

    pub fn heartbeat_path(&self) -> PathBuf {
        self.sibling(defaults::HEARTBEAT_SUFFIX)
    }

    pub fn lock_path(&self) -> PathBuf {
        self.sibling(defaults::LOCK_SUFFIX)
    }

    pub fn raw_path(&self) -> PathBuf {
        self.sibling(defaults::RAW_SUFFIX)
    }

    pub fn final_path(&self) -> PathBuf {
        self.sibling(defaults::FINAL_SUFFIX)
    }

    pub fn qc_path(&self) -> PathBuf {
        self.sibling(defaults::QC_SUFFIX)
    }

    /// The authoritative success signal: a non-empty finalized result.
    pub fn has_final(&self) -> bool {
        non_empty(&self.final_path())
    }

    pub fn has_raw(&self) -> bool {
        non_empty(&self.raw_path())
    }
}

fn non_empty(path: &Path) -> bool {
    std::fs::metadata(path)
        .map(|m| m.is_file() && m.len() > 0)
        .unwrap_or(false)
}

/// Append `.tmp` to a path for write-then-rename.
pub fn tmp_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(defaults::TMP_SUFFIX);
    PathBuf::from(name)
}

/// True for files produced by the orchestrator rather than the splitter.
fn is_derived_artifact(path: &Path) -> bool {
    let name = match path.file_name().and_then(|n| n.to_str()) {
        Some(n) => n,
        None => return true,
    };
    [
        defaults::RAW_SUFFIX,
        defaults::FINAL_SUFFIX,
        defaults::QC_SUFFIX,
        defaults::META_SUFFIX,
        defaults::HEARTBEAT_SUFFIX,
        defaults::LOCK_SUFFIX,
        defaults::TMP_SUFFIX,
    ]
    .iter()
    .any(|suffix| name.ends_with(suffix))
}

/// Resolve a glob pattern to chunk units, sorted by path.
///
/// Orchestrator artifacts that happen to match the pattern (for example
/// `*_raw.csv` under `positions_chunk_*.csv`) are skipped.
pub fn discover(pattern: &str) -> Result<Vec<ChunkUnit>> {
    let entries = glob::glob(pattern)
        .map_err(|e| Error::InvalidInput(format!("bad chunk glob {pattern:?}: {e}")))?;

    let mut paths = Vec::new();
    for entry in entries {
        let path = entry.map_err(|e| Error::Io(e.into_error()))?;
        if path.is_file() && !is_derived_artifact(&path) {
            paths.push(path);
        }
    }
    paths.sort();

    paths.into_iter().map(ChunkUnit::from_input).collect()
}
