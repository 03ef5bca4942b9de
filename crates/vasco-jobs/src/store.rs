//! Crash-safe per-chunk job metadata.
//!
//! Records are written to a temporary sibling, fsynced, then renamed over the
//! destination, so a reader sees either the previous record or the new one.

use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::Path;

use tracing::{debug, warn};

use vasco_core::{tmp_path, ChunkUnit, JobMetadata, Result};

/// Write `bytes` to `path` atomically.
pub fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    let tmp = tmp_path(path);
    {
        let mut file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&tmp)?;
        file.write_all(bytes)?;
        file.sync_all()?;
    }
    if let Err(e) = fs::rename(&tmp, path) {
        let _ = fs::remove_file(&tmp);
        return Err(e.into());
    }
    sync_parent(path);
    Ok(())
}

/// Move `tmp` to `dest` unless `dest` already exists.
///
/// Returns `false` (and removes `tmp`) when `dest` was already present.
pub fn publish_no_clobber(tmp: &Path, dest: &Path) -> Result<bool> {
    match fs::hard_link(tmp, dest) {
        Ok(()) => {
            fs::remove_file(tmp)?;
            sync_parent(dest);
            Ok(true)
        }
        Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
            let _ = fs::remove_file(tmp);
            Ok(false)
        }
        Err(e) => {
            // Filesystems without hard links.
            debug!(error = %e, "hard link unavailable, falling back to rename");
            if dest.exists() {
                let _ = fs::remove_file(tmp);
                return Ok(false);
            }
            fs::rename(tmp, dest)?;
            sync_parent(dest);
            Ok(true)
        }
    }
}

fn sync_parent(path: &Path) {
    if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
        if let Ok(handle) = File::open(dir) {
            let _ = handle.sync_all();
        }
    }
}

/// Load the chunk's job metadata.
///
/// A record that cannot be parsed is reported and treated as absent.
pub fn load(chunk: &ChunkUnit) -> Result<Option<JobMetadata>> {
    let path = chunk.meta_path();
    let content = match fs::read_to_string(&path) {
        Ok(c) => c,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };

    match serde_json::from_str::<JobMetadata>(&content) {
        Ok(meta) => Ok(Some(meta)),
        Err(e) => {
            warn!(
                chunk_id = chunk.chunk_id(),
                path = %path.display(),
                error = %e,
                "Ignoring unreadable job metadata"
            );
            Ok(None)
        }
    }
}

/// Persist the chunk's job metadata.
pub fn save(chunk: &ChunkUnit, meta: &JobMetadata) -> Result<()> {
    let json = serde_json::to_vec_pretty(meta)?;
    write_atomic(&chunk.meta_path(), &json)?;
    debug!(chunk_id = chunk.chunk_id(), job_url = %meta.handle, "Saved job metadata");
    Ok(())
}

/// Remove the chunk's job metadata, if any.
pub fn clear(chunk: &ChunkUnit) -> Result<()> {
    match fs::remove_file(chunk.meta_path()) {
        Ok(()) => {
            debug!(chunk_id = chunk.chunk_id(), "Cleared job metadata");
            Ok(())
        }
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}
