use crate::util::{ensure_dir, now_rfc3339};
use fs2::FileExt;
use std::fs::{File, OpenOptions};
use std::io::{Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, warn};

const LOCK_FILE_NAME: &str = ".steamsync.lock";

#[derive(Debug, Error)]
pub enum LockError {
    #[error("another batch is already running against {root} (lock file: {lock_path})")]
    Held { root: String, lock_path: String },
    #[error("lock file I/O at {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

/// RAII guard for the per-install-root batch lock.
///
/// Mutual exclusion is `flock(LOCK_EX | LOCK_NB)` on a marker file inside the
/// install root, so it holds across separate OS processes. The OS drops the
/// flock when the holding process dies, whatever the exit path, so a crashed
/// batch can never wedge subsequent runs. The marker records the holder pid
/// and acquisition time for diagnostics only; it is truncated on release.
pub struct RunLock {
    file: File,
    lock_path: PathBuf,
    released: bool,
}

impl std::fmt::Debug for RunLock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunLock")
            .field("lock_path", &self.lock_path)
            .finish_non_exhaustive()
    }
}

impl RunLock {
    /// Try to acquire the batch lock for `root` without blocking.
    pub fn acquire(root: &Path) -> Result<RunLock, LockError> {
        ensure_dir(root).map_err(|e| LockError::Io {
            path: root.display().to_string(),
            source: std::io::Error::other(e.to_string()),
        })?;

        let lock_path = root.join(LOCK_FILE_NAME);
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(false)
            .open(&lock_path)
            .map_err(|e| LockError::Io {
                path: lock_path.display().to_string(),
                source: e,
            })?;

        match file.try_lock_exclusive() {
            Ok(()) => {}
            Err(e) if e.raw_os_error() == fs2::lock_contended_error().raw_os_error() => {
                return Err(LockError::Held {
                    root: root.display().to_string(),
                    lock_path: lock_path.display().to_string(),
                });
            }
            Err(e) => {
                return Err(LockError::Io {
                    path: lock_path.display().to_string(),
                    source: e,
                });
            }
        }

        let mut lock = RunLock {
            file,
            lock_path,
            released: false,
        };
        lock.write_marker();
        debug!("acquired run lock: {}", lock.lock_path.display());
        Ok(lock)
    }

    /// Release explicitly. Equivalent to dropping the guard; safe to call at
    /// most once because it consumes the guard.
    pub fn release(mut self) {
        self.release_inner();
    }

    pub fn path(&self) -> &Path {
        &self.lock_path
    }

    fn write_marker(&mut self) {
        let info = format!("pid={} acquired={}\n", std::process::id(), now_rfc3339());
        let res = self
            .file
            .set_len(0)
            .and_then(|()| self.file.seek(SeekFrom::Start(0)).map(|_| ()))
            .and_then(|()| self.file.write_all(info.as_bytes()))
            .and_then(|()| self.file.flush());
        if let Err(e) = res {
            warn!("failed to write lock marker {}: {e}", self.lock_path.display());
        }
    }

    fn release_inner(&mut self) {
        if self.released {
            return;
        }
        self.released = true;
        if let Err(e) = self.file.set_len(0) {
            warn!("failed to truncate lock marker {}: {e}", self.lock_path.display());
        }
        if let Err(e) = FileExt::unlock(&self.file) {
            warn!("failed to unlock {}: {e}", self.lock_path.display());
        }
        debug!("released run lock: {}", self.lock_path.display());
    }
}

impl Drop for RunLock {
    fn drop(&mut self) {
        self.release_inner();
    }
}
