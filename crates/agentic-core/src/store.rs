use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::codec::{load_partition_file, save_partition_file};
use crate::error::TaskResult;
use crate::lock::{LockMode, StoreLock, DEFAULT_LOCK_TIMEOUT_MS};
use crate::task::{Partition, Task};

/// The three partition files under one task root.
///
/// Nothing is cached: every load re-reads the file and every save rewrites
/// it, so the files stay the only source of truth between invocations.
#[derive(Debug, Clone)]
pub struct TaskStore {
    root: PathBuf,
    lock_timeout: Duration,
}

impl TaskStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            lock_timeout: Duration::from_millis(DEFAULT_LOCK_TIMEOUT_MS),
        }
    }

    pub fn with_lock_timeout(mut self, timeout: Duration) -> Self {
        self.lock_timeout = timeout;
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn partition_path(&self, partition: Partition) -> PathBuf {
        self.root.join(partition.file_name())
    }

    pub fn load_tasks(&self, partition: Partition) -> TaskResult<Vec<Task>> {
        let path = self.partition_path(partition);
        let tasks = load_partition_file(&path)?;
        tracing::debug!(partition = %partition, count = tasks.len(), "loaded partition");
        Ok(tasks)
    }

    pub fn save_tasks(&self, partition: Partition, tasks: &[Task]) -> TaskResult<()> {
        let path = self.partition_path(partition);
        save_partition_file(&path, tasks)?;
        tracing::debug!(partition = %partition, count = tasks.len(), "saved partition");
        Ok(())
    }

    /// Loads every partition in lookup order.
    pub fn load_all(&self) -> TaskResult<Vec<(Partition, Vec<Task>)>> {
        Partition::ALL
            .iter()
            .map(|partition| Ok((*partition, self.load_tasks(*partition)?)))
            .collect()
    }

    pub fn lock(&self, mode: LockMode) -> TaskResult<StoreLock> {
        StoreLock::acquire(&self.root, mode, self.lock_timeout)
    }

    /// Whether the task root exists yet; reads skip locking until it does.
    pub fn exists(&self) -> bool {
        self.root.is_dir()
    }
}
