use crate::error::CognateError;
use fs2::FileExt;
use std::{
    fs::{self, File, OpenOptions},
    io,
    path::{Path, PathBuf},
    thread,
    time::{Duration, Instant},
};

/// Name of the lock file placed inside each cache key directory.
pub const LOCK_FILE_NAME: &str = ".lock";

const POLL_INTERVAL: Duration = Duration::from_millis(10);

/// RAII guard for the exclusive advisory lock taken while a cache key
/// directory (embeddings or index) is being written.
///
/// Concurrent runs that target the same `(model, language, stage)` key
/// serialize on this lock instead of interleaving partial writes.
#[derive(Debug)]
pub struct CacheLock {
    file: File,
    path: PathBuf,
}

impl CacheLock {
    /// Acquire the lock for `dir`, creating the directory if needed.
    ///
    /// # Errors
    ///
    /// Returns [`CognateError::LockTimeout`] if another holder keeps the lock
    /// past `timeout`, or an I/O error if the lock file cannot be opened.
    pub fn acquire_dir(dir: &Path, timeout: Duration) -> anyhow::Result<Self> {
        Self::acquire(&dir.join(LOCK_FILE_NAME), timeout)
    }

    /// Acquire an exclusive advisory lock on `path`.
    ///
    /// # Errors
    ///
    /// See [`CacheLock::acquire_dir`].
    pub fn acquire(path: &Path, timeout: Duration) -> anyhow::Result<Self> {
        let parent = path.parent().ok_or_else(|| {
            io::Error::new(io::ErrorKind::InvalidInput, "lock path has no parent")
        })?;
        fs::create_dir_all(parent)?;

        let start = Instant::now();
        loop {
            let file = OpenOptions::new()
                .create(true)
                .read(true)
                .write(true)
                .truncate(false)
                .open(path)?;

            if FileExt::try_lock_exclusive(&file).is_ok() {
                tracing::debug!(path = %path.display(), "cache lock acquired");
                return Ok(Self {
                    file,
                    path: path.to_path_buf(),
                });
            }

            let waited = start.elapsed();
            if waited >= timeout {
                return Err(CognateError::LockTimeout {
                    path: path.to_path_buf(),
                    waited_ms: waited.as_millis(),
                }
                .into());
            }

            thread::sleep(POLL_INTERVAL);
        }
    }

    /// Explicitly release the lock. Release also happens automatically on drop.
    pub fn release(self) {
        drop(self);
    }

    /// Return the lock file path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for CacheLock {
    fn drop(&mut self) {
        let _ = FileExt::unlock(&self.file);
    }
}
