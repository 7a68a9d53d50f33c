use std::path::PathBuf;

use thiserror::Error;

use crate::task::Partition;

/// Errors raised by the task store and the transition engine.
#[derive(Debug, Error)]
pub enum TaskError {
    #[error("Invalid input: {0}")]
    Validation(String),
    #[error("Task {id} not found in {scope}")]
    NotFound { id: String, scope: NotFoundScope },
    #[error("IO error on {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Failed to parse {}: {source}", .path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },
    #[error("Failed to encode tasks: {0}")]
    Encode(#[from] serde_yaml::Error),
    #[error("Timed out after {waited_ms}ms waiting for lock {}", .path.display())]
    LockTimeout { path: PathBuf, waited_ms: u64 },
    /// The same ID is stored in several partitions and the copies differ in
    /// more than status and assignee.
    #[error("Task {id} has diverging copies in {}; merge them by hand", join_partitions(.copies))]
    Diverged { id: String, copies: Vec<Partition> },
}

fn join_partitions(partitions: &[Partition]) -> String {
    partitions
        .iter()
        .map(|partition| partition.as_str())
        .collect::<Vec<_>>()
        .join(", ")
}

/// Where a lookup was performed when it came up empty.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotFoundScope {
    Partition(Partition),
    AnyPartition,
    Subtasks,
}

impl std::fmt::Display for NotFoundScope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NotFoundScope::Partition(partition) => write!(f, "{}", partition.as_str()),
            NotFoundScope::AnyPartition => write!(f, "any partition"),
            NotFoundScope::Subtasks => write!(f, "subtasks"),
        }
    }
}

impl TaskError {
    pub fn validation(message: impl Into<String>) -> Self {
        TaskError::Validation(message.into())
    }

    pub fn not_found(id: &str, scope: NotFoundScope) -> Self {
        TaskError::NotFound {
            id: id.to_string(),
            scope,
        }
    }

    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        TaskError::Io {
            path: path.into(),
            source,
        }
    }

    pub fn is_validation(&self) -> bool {
        matches!(self, TaskError::Validation(_))
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, TaskError::NotFound { .. })
    }

    pub fn is_diverged(&self) -> bool {
        matches!(self, TaskError::Diverged { .. })
    }

    /// Filesystem, decoding and locking failures.
    pub fn is_io(&self) -> bool {
        matches!(
            self,
            TaskError::Io { .. }
                | TaskError::Parse { .. }
                | TaskError::Encode(_)
                | TaskError::LockTimeout { .. }
        )
    }
}

pub type TaskResult<T> = Result<T, TaskError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_found_message_names_partition() {
        let err = TaskError::not_found("TASK-1", NotFoundScope::Partition(Partition::Backlog));
        assert_eq!(err.to_string(), "Task TASK-1 not found in backlog");
        assert!(err.is_not_found());
        assert!(!err.is_io());
    }

    #[test]
    fn diverged_message_lists_every_copy() {
        let err = TaskError::Diverged {
            id: "TASK-1".to_string(),
            copies: vec![Partition::Backlog, Partition::InProgress],
        };
        assert_eq!(
            err.to_string(),
            "Task TASK-1 has diverging copies in backlog, in-progress; merge them by hand"
        );
        assert!(err.is_diverged());
        assert!(!err.is_io());
    }

    #[test]
    fn io_errors_are_classified() {
        let err = TaskError::io(
            "/tmp/x",
            std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied"),
        );
        assert!(err.is_io());
        assert!(!err.is_validation());
    }
}
