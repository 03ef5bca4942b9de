//! Non-blocking advisory file locks.
//!
//! `flock(LOCK_EX | LOCK_NB)` on a per-chunk `<chunk>.lock` file, plus a coarse
//! `.aggregate.lock` per chunk directory for operations that read every
//! finalized result. Locks are released when the guard (and so the file
//! descriptor) is dropped; lock files themselves are left in place.

use std::fmt;
use std::fs::{File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};

use tracing::debug;

use vasco_core::{defaults, ChunkUnit, Error, Result};

/// Exclusive ownership of one chunk.
pub struct ChunkLock {
    _file: File,
    chunk_id: String,
}

impl fmt::Debug for ChunkLock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChunkLock")
            .field("chunk_id", &self.chunk_id)
            .finish_non_exhaustive()
    }
}

impl ChunkLock {
    /// Take the chunk's lock or fail with `ChunkLocked` if another worker
    /// holds it.
    pub fn try_acquire(chunk: &ChunkUnit) -> Result<Self> {
        let file = open_lock_file(&chunk.lock_path())?;
        if try_flock_exclusive(&file)? {
            debug!(chunk_id = chunk.chunk_id(), "Acquired chunk lock");
            Ok(Self {
                _file: file,
                chunk_id: chunk.chunk_id().to_string(),
            })
        } else {
            Err(Error::ChunkLocked(chunk.chunk_id().to_string()))
        }
    }
}

/// Exclusive access to all finalized results of a directory.
pub struct AggregateLock {
    _file: File,
    path: PathBuf,
}

impl fmt::Debug for AggregateLock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AggregateLock")
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}

impl AggregateLock {
    pub fn try_acquire(dir: &Path) -> Result<Self> {
        let path = dir.join(defaults::AGGREGATE_LOCK_NAME);
        let file = open_lock_file(&path)?;
        if try_flock_exclusive(&file)? {
            debug!(path = %path.display(), "Acquired aggregate lock");
            Ok(Self { _file: file, path })
        } else {
            Err(Error::AggregateLocked(path.display().to_string()))
        }
    }
}

fn open_lock_file(path: &Path) -> Result<File> {
    Ok(OpenOptions::new()
        .create(true)
        .read(true)
        .write(true)
        .truncate(false)
        .open(path)?)
}

/// Returns `Ok(false)` when the file is already locked elsewhere.
fn try_flock_exclusive(file: &File) -> io::Result<bool> {
    #[cfg(unix)]
    {
        use std::os::unix::io::AsRawFd;
        let fd = file.as_raw_fd();
        // SAFETY: `fd` is a valid descriptor owned by `file` for the whole call.
        let result = unsafe { libc::flock(fd, libc::LOCK_EX | libc::LOCK_NB) };
        if result == 0 {
            return Ok(true);
        }
        let err = io::Error::last_os_error();
        if err.kind() == io::ErrorKind::WouldBlock || err.raw_os_error() == Some(libc::EWOULDBLOCK)
        {
            return Ok(false);
        }
        Err(err)
    }
    #[cfg(not(unix))]
    {
        let _ = file;
        Ok(true)
    }
}
