use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};
use std::thread;
use std::time::{Duration, Instant};

use fs2::FileExt;

use crate::error::{TaskError, TaskResult};

pub const LOCK_FILE_NAME: &str = ".lock";
pub const DEFAULT_LOCK_TIMEOUT_MS: u64 = 5_000;

const RETRY_INTERVAL: Duration = Duration::from_millis(10);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockMode {
    Shared,
    Exclusive,
}

/// Advisory lock on a task root, released when dropped.
#[derive(Debug)]
pub struct StoreLock {
    file: File,
    path: PathBuf,
    mode: LockMode,
}

impl StoreLock {
    /// Blocks until the lock is held or `timeout` elapses.
    pub fn acquire(task_root: &Path, mode: LockMode, timeout: Duration) -> TaskResult<Self> {
        fs::create_dir_all(task_root).map_err(|err| TaskError::io(task_root, err))?;
        let path = task_root.join(LOCK_FILE_NAME);
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(false)
            .open(&path)
            .map_err(|err| TaskError::io(&path, err))?;

        let started = Instant::now();
        let mut warned = false;
        loop {
            let attempt = match mode {
                LockMode::Shared => FileExt::try_lock_shared(&file),
                LockMode::Exclusive => FileExt::try_lock_exclusive(&file),
            };
            match attempt {
                Ok(()) => {
                    tracing::debug!(path = %path.display(), ?mode, "store lock acquired");
                    return Ok(Self { file, path, mode });
                }
                Err(err) if is_contended(&err) => {
                    let waited = started.elapsed();
                    if waited >= timeout {
                        return Err(TaskError::LockTimeout {
                            path,
                            waited_ms: waited.as_millis() as u64,
                        });
                    }
                    if !warned {
                        tracing::warn!(path = %path.display(), "store lock busy, waiting");
                        warned = true;
                    }
                    thread::sleep(RETRY_INTERVAL);
                }
                Err(err) => return Err(TaskError::io(&path, err)),
            }
        }
    }

    pub fn mode(&self) -> LockMode {
        self.mode
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for StoreLock {
    fn drop(&mut self) {
        if let Err(err) = FileExt::unlock(&self.file) {
            tracing::warn!(path = %self.path.display(), error = %err, "failed to release store lock");
        }
    }
}

fn is_contended(err: &std::io::Error) -> bool {
    err.kind() == std::io::ErrorKind::WouldBlock
        || err.raw_os_error() == fs2::lock_contended_error().raw_os_error()
}
