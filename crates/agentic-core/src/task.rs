use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_yaml::Value;

use crate::error::{TaskError, TaskResult};
use crate::id::subtask_seq;

pub const MAX_TITLE_CHARS: usize = 200;

/// Lifecycle status stored on each task entry.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    #[default]
    Pending,
    InProgress,
    Done,
}

impl TaskStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::InProgress => "in_progress",
            TaskStatus::Done => "done",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_lowercase().replace('-', "_").as_str() {
            "pending" => Some(Self::Pending),
            "in_progress" => Some(Self::InProgress),
            "done" => Some(Self::Done),
            _ => None,
        }
    }

    /// The partition a top-level task with this status belongs in.
    pub fn partition(self) -> Partition {
        match self {
            TaskStatus::Pending => Partition::Backlog,
            TaskStatus::InProgress => Partition::InProgress,
            TaskStatus::Done => Partition::Done,
        }
    }
}

/// One of the three named task stores.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "kebab-case")]
pub enum Partition {
    Backlog,
    InProgress,
    Done,
}

impl Partition {
    /// Lookup order used by every cross-partition search.
    pub const ALL: [Partition; 3] = [Partition::Backlog, Partition::InProgress, Partition::Done];

    pub fn as_str(self) -> &'static str {
        match self {
            Partition::Backlog => "backlog",
            Partition::InProgress => "in-progress",
            Partition::Done => "done",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_lowercase().replace('_', "-").as_str() {
            "backlog" => Some(Self::Backlog),
            "in-progress" => Some(Self::InProgress),
            "done" => Some(Self::Done),
            _ => None,
        }
    }

    pub fn file_name(self) -> &'static str {
        match self {
            Partition::Backlog => "backlog.yaml",
            Partition::InProgress => "in-progress.yaml",
            Partition::Done => "done.yaml",
        }
    }

    pub fn status(self) -> TaskStatus {
        match self {
            Partition::Backlog => TaskStatus::Pending,
            Partition::InProgress => TaskStatus::InProgress,
            Partition::Done => TaskStatus::Done,
        }
    }

    /// Position in the lifecycle; transitions only ever increase it.
    pub fn rank(self) -> u8 {
        match self {
            Partition::Backlog => 0,
            Partition::InProgress => 1,
            Partition::Done => 2,
        }
    }
}

impl std::fmt::Display for Partition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A unit of work as persisted in a partition file.
///
/// Keys not modelled here are kept in `extra` so hand-added fields survive
/// every load/save cycle and every transition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub status: TaskStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assigned_to: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub scope: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub spec_refs: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub skill_refs: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub inputs: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub outputs: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub acceptance: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub subtasks: Vec<SubTask>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubTask {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub status: TaskStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assigned_to: Option<String>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

impl Task {
    pub fn new(id: impl Into<String>, title: impl Into<String>) -> Self {
        Task {
            id: id.into(),
            title: title.into(),
            description: None,
            status: TaskStatus::Pending,
            assigned_to: None,
            scope: Vec::new(),
            spec_refs: Vec::new(),
            skill_refs: Vec::new(),
            inputs: Vec::new(),
            outputs: Vec::new(),
            acceptance: Vec::new(),
            subtasks: Vec::new(),
            extra: BTreeMap::new(),
        }
    }

    /// Sequence number the next appended subtask receives, or `None` once
    /// a hand-edited ID has used up the numbering.
    pub fn next_subtask_seq(&self) -> Option<u32> {
        self.subtasks
            .iter()
            .filter_map(|sub| subtask_seq(&self.id, &sub.id))
            .max()
            .unwrap_or(0)
            .checked_add(1)
    }

    pub fn subtask_mut(&mut self, subtask_id: &str) -> Option<&mut SubTask> {
        self.subtasks.iter_mut().find(|sub| sub.id == subtask_id)
    }
}

// List fields keep insertion order for display, but two tasks carrying the
// same members in a different order are the same task.
impl PartialEq for Task {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
            && self.title == other.title
            && self.description == other.description
            && self.status == other.status
            && self.assigned_to == other.assigned_to
            && same_members(&self.scope, &other.scope)
            && same_members(&self.spec_refs, &other.spec_refs)
            && same_members(&self.skill_refs, &other.skill_refs)
            && same_members(&self.inputs, &other.inputs)
            && same_members(&self.outputs, &other.outputs)
            && same_members(&self.acceptance, &other.acceptance)
            && self.subtasks == other.subtasks
            && self.extra == other.extra
    }
}

fn same_members(left: &[String], right: &[String]) -> bool {
    if left.len() != right.len() {
        return false;
    }
    let mut left: Vec<&String> = left.iter().collect();
    let mut right: Vec<&String> = right.iter().collect();
    left.sort();
    right.sort();
    left == right
}

/// Everything a caller may supply when creating a task.
#[derive(Debug, Clone, Default)]
pub struct NewTask {
    pub title: String,
    pub description: Option<String>,
    pub scope: Vec<String>,
    pub spec_refs: Vec<String>,
    pub skill_refs: Vec<String>,
    pub inputs: Vec<String>,
    pub outputs: Vec<String>,
    pub acceptance: Vec<String>,
}

impl NewTask {
    pub fn titled(title: impl Into<String>) -> Self {
        NewTask {
            title: title.into(),
            ..NewTask::default()
        }
    }

    pub(crate) fn into_task(self, id: String, title: String) -> Task {
        let mut task = Task::new(id, title);
        task.description = self
            .description
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty());
        task.scope = clean_list(self.scope);
        task.spec_refs = clean_list(self.spec_refs);
        task.skill_refs = clean_list(self.skill_refs);
        task.inputs = clean_list(self.inputs);
        task.outputs = clean_list(self.outputs);
        task.acceptance = clean_list(self.acceptance);
        task
    }
}

fn clean_list(values: Vec<String>) -> Vec<String> {
    values
        .into_iter()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
        .collect()
}

/// Checks a task or subtask title and returns it trimmed.
pub fn validate_title(title: &str) -> TaskResult<String> {
    let trimmed = title.trim();
    if trimmed.is_empty() {
        return Err(TaskError::validation("title must not be empty"));
    }
    if trimmed.contains('\n') || trimmed.contains('\r') {
        return Err(TaskError::validation("title must be a single line"));
    }
    let len = trimmed.chars().count();
    if len > MAX_TITLE_CHARS {
        return Err(TaskError::validation(format!(
            "title is {} characters; the limit is {}",
            len, MAX_TITLE_CHARS
        )));
    }
    Ok(trimmed.to_string())
}
