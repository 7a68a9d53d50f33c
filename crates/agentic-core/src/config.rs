use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::lock::DEFAULT_LOCK_TIMEOUT_MS;
use crate::store::TaskStore;

pub const CONFIG_FILE_NAME: &str = ".agentic.toml";
pub const PROJECT_DIR_NAME: &str = ".agentic";
pub const DEFAULT_TASKS_DIR: &str = ".agentic/tasks";
pub const TASKS_DIR_ENV: &str = "AGENTIC_TASKS_DIR";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Config IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("Failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgenticConfig {
    /// Task root relative to the project root.
    pub tasks_dir: Option<String>,
    /// Longest wait for the store lock before giving up.
    pub lock_timeout_ms: Option<u64>,
    /// Append transition events to `<task root>/.audit.log`. Defaults to on.
    pub audit_log: Option<bool>,
}

impl AgenticConfig {
    pub fn lock_timeout(&self) -> Duration {
        Duration::from_millis(self.lock_timeout_ms.unwrap_or(DEFAULT_LOCK_TIMEOUT_MS))
    }

    pub fn audit_enabled(&self) -> bool {
        self.audit_log.unwrap_or(true)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskRootSource {
    Flag,
    Env,
    Config,
    Default,
}

impl TaskRootSource {
    pub fn as_str(self) -> &'static str {
        match self {
            TaskRootSource::Flag => "flag",
            TaskRootSource::Env => "env",
            TaskRootSource::Config => "config",
            TaskRootSource::Default => "default",
        }
    }
}

#[derive(Debug, Clone)]
pub struct TaskRootResolution {
    pub task_root: PathBuf,
    pub project_root: PathBuf,
    pub source: TaskRootSource,
    pub config: AgenticConfig,
}

impl TaskRootResolution {
    pub fn store(&self) -> TaskStore {
        TaskStore::new(&self.task_root).with_lock_timeout(self.config.lock_timeout())
    }
}

pub fn config_path(project_root: &Path) -> PathBuf {
    project_root.join(CONFIG_FILE_NAME)
}

/// Nearest ancestor of `start` holding `.agentic.toml` or a `.agentic/` dir.
pub fn find_project_root(start: &Path) -> Option<PathBuf> {
    let start = start.canonicalize().unwrap_or_else(|_| start.to_path_buf());
    start
        .ancestors()
        .find(|candidate| {
            candidate.join(CONFIG_FILE_NAME).is_file() || candidate.join(PROJECT_DIR_NAME).is_dir()
        })
        .map(Path::to_path_buf)
}

pub fn load_config(project_root: &Path) -> Result<Option<AgenticConfig>, ConfigError> {
    let path = config_path(project_root);
    if !path.is_file() {
        return Ok(None);
    }
    let text = fs::read_to_string(&path)?;
    Ok(Some(toml::from_str::<AgenticConfig>(&text)?))
}

pub fn write_config(project_root: &Path, config: &AgenticConfig) -> Result<PathBuf, ConfigError> {
    let path = config_path(project_root);
    let body = toml::to_string_pretty(config)?;
    fs::write(&path, body)?;
    Ok(path)
}

/// Resolves the task root for a command started in `start`.
///
/// Precedence: `explicit` (from `--tasks-dir`), then `AGENTIC_TASKS_DIR`,
/// then `tasks_dir` in `.agentic.toml`, then `.agentic/tasks`.
pub fn resolve_task_root(
    start: &Path,
    explicit: Option<&Path>,
) -> Result<TaskRootResolution, ConfigError> {
    let env_value = std::env::var(TASKS_DIR_ENV).ok();
    resolve_task_root_with_env(start, explicit, env_value.as_deref())
}

pub fn resolve_task_root_with_env(
    start: &Path,
    explicit: Option<&Path>,
    env_value: Option<&str>,
) -> Result<TaskRootResolution, ConfigError> {
    let project_root = find_project_root(start).unwrap_or_else(|| start.to_path_buf());
    let config = load_config(&project_root)?.unwrap_or_default();

    let env_value = env_value
        .map(|value| value.trim())
        .filter(|value| !value.is_empty());
    let config_dir = config
        .tasks_dir
        .as_deref()
        .map(|value| value.trim())
        .filter(|value| !value.is_empty());

    let (task_root, source) = if let Some(path) = explicit {
        (anchor(start, path), TaskRootSource::Flag)
    } else if let Some(value) = env_value {
        (anchor(&project_root, Path::new(value)), TaskRootSource::Env)
    } else if let Some(value) = config_dir {
        (anchor(&project_root, Path::new(value)), TaskRootSource::Config)
    } else {
        (project_root.join(DEFAULT_TASKS_DIR), TaskRootSource::Default)
    };

    Ok(TaskRootResolution {
        task_root,
        project_root,
        source,
        config,
    })
}

fn anchor(base: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        base.join(path)
    }
}
