//! Merge finalized chunk results into one table.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use tracing::{info, warn};

use vasco_core::{ChunkUnit, CsvTable, Error, Result};

use crate::lock::AggregateLock;
use crate::store::write_atomic;

/// What a collection wrote.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CollectSummary {
    pub output: PathBuf,
    /// Chunks merged into the output.
    pub merged: usize,
    pub rows: usize,
    /// Chunks without a finalized result.
    pub missing: Vec<String>,
}

/// Concatenate the finalized results of `chunks` into `output`, prefixing a
/// `chunk_id` column.
///
/// Every chunk directory is held under its aggregate lock for the whole read.
/// All finalized results must share one header.
pub fn collect(chunks: &[ChunkUnit], output: &Path) -> Result<CollectSummary> {
    let dirs: BTreeSet<&Path> = chunks.iter().map(ChunkUnit::dir).collect();
    let _locks = dirs
        .into_iter()
        .map(AggregateLock::try_acquire)
        .collect::<Result<Vec<_>>>()?;

    let mut header: Option<Vec<String>> = None;
    let mut rows = Vec::new();
    let mut merged = 0;
    let mut missing = Vec::new();

    for chunk in chunks {
        if !chunk.has_final() {
            missing.push(chunk.chunk_id().to_string());
            continue;
        }
        let table = CsvTable::parse(&std::fs::read_to_string(chunk.final_path())?)?;
        match &header {
            None => header = Some(table.header.clone()),
            Some(h) if *h != table.header => {
                return Err(Error::InvalidInput(format!(
                    "{}: header {:?} does not match {:?}",
                    chunk.final_path().display(),
                    table.header,
                    h
                )));
            }
            Some(_) => {}
        }
        for row in table.rows {
            let mut out = Vec::with_capacity(row.len() + 1);
            out.push(chunk.chunk_id().to_string());
            out.extend(row);
            rows.push(out);
        }
        merged += 1;
    }

    let Some(header) = header else {
        return Err(Error::InvalidInput(
            "no finalized results to collect".to_string(),
        ));
    };
    if !missing.is_empty() {
        warn!(missing = missing.len(), "Some chunks have no finalized result");
    }

    let mut full_header = vec!["chunk_id".to_string()];
    full_header.extend(header);
    let table = CsvTable {
        header: full_header,
        rows,
    };
    write_atomic(output, table.to_csv().as_bytes())?;

    info!(
        path = %output.display(),
        merged,
        rows = table.len(),
        "Collected finalized results"
    );
    Ok(CollectSummary {
        output: output.to_path_buf(),
        merged,
        rows: table.len(),
        missing,
    })
}
