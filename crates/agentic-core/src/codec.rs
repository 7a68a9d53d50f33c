//! Reading and writing a single partition file.
//!
//! A partition file is a YAML document with one `tasks` sequence. Writes
//! go to a sibling `.tmp` file that is synced and then renamed over the
//! target, so a crash never leaves a truncated partition behind.

use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{TaskError, TaskResult};
use crate::task::Task;

#[derive(Debug, Default, Serialize, Deserialize)]
struct PartitionFile {
    #[serde(default)]
    tasks: Option<Vec<Task>>,
}

/// Loads the task list stored at `path`. A missing or blank file is an
/// empty partition.
pub fn load_partition_file(path: &Path) -> TaskResult<Vec<Task>> {
    let text = match fs::read_to_string(path) {
        Ok(text) => text,
        Err(err) if err.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
        Err(err) => return Err(TaskError::io(path, err)),
    };
    decode_tasks(&text).map_err(|source| TaskError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

/// Replaces the contents of `path` with `tasks`.
pub fn save_partition_file(path: &Path, tasks: &[Task]) -> TaskResult<()> {
    let body = encode_tasks(tasks)?;
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|err| TaskError::io(parent, err))?;
    }
    let tmp = tmp_path(path);
    let mut file = fs::File::create(&tmp).map_err(|err| TaskError::io(&tmp, err))?;
    file.write_all(body.as_bytes())
        .and_then(|_| file.sync_all())
        .map_err(|err| TaskError::io(&tmp, err))?;
    drop(file);
    fs::rename(&tmp, path).map_err(|err| TaskError::io(path, err))?;
    if let Some(parent) = path.parent() {
        sync_dir(parent)?;
    }
    Ok(())
}

/// Makes the rename itself durable before the caller writes the next file.
#[cfg(unix)]
fn sync_dir(dir: &Path) -> TaskResult<()> {
    fs::File::open(dir)
        .and_then(|handle| handle.sync_all())
        .map_err(|err| TaskError::io(dir, err))
}

#[cfg(not(unix))]
fn sync_dir(_dir: &Path) -> TaskResult<()> {
    Ok(())
}

pub fn decode_tasks(text: &str) -> Result<Vec<Task>, serde_yaml::Error> {
    if text.trim().is_empty() {
        return Ok(Vec::new());
    }
    let file: Option<PartitionFile> = serde_yaml::from_str(text)?;
    Ok(file.and_then(|file| file.tasks).unwrap_or_default())
}

pub fn encode_tasks(tasks: &[Task]) -> TaskResult<String> {
    #[derive(Serialize)]
    struct PartitionFileRef<'a> {
        tasks: &'a [Task],
    }
    Ok(serde_yaml::to_string(&PartitionFileRef { tasks })?)
}

fn tmp_path(path: &Path) -> PathBuf {
    path.with_extension("yaml.tmp")
}
