use std::collections::{HashMap, HashSet};

use serde::Serialize;

use crate::engine::{plan_recovery, TaskEngine};
use crate::error::TaskResult;
use crate::id::subtask_seq;
use crate::task::{validate_title, Partition, Task};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatusSummary {
    pub backlog: usize,
    pub in_progress: usize,
    pub done: usize,
    pub total: usize,
    pub percent_done: f64,
}

/// Counts among a known set of task IDs, e.g. the tasks generated from one
/// plan.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Progress {
    pub pending: usize,
    pub in_progress: usize,
    pub done: usize,
    pub missing: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CheckReport {
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

impl CheckReport {
    pub fn is_clean(&self) -> bool {
        self.errors.is_empty()
    }
}

pub fn status_summary(engine: &TaskEngine) -> TaskResult<StatusSummary> {
    let partitions = engine.all_tasks()?;
    Ok(summarize(&partitions))
}

pub fn summarize(partitions: &[(Partition, Vec<Task>)]) -> StatusSummary {
    let count = |wanted: Partition| {
        partitions
            .iter()
            .filter(|(partition, _)| *partition == wanted)
            .map(|(_, tasks)| tasks.len())
            .sum::<usize>()
    };
    let backlog = count(Partition::Backlog);
    let in_progress = count(Partition::InProgress);
    let done = count(Partition::Done);
    let total = backlog + in_progress + done;
    let percent_done = if total == 0 {
        0.0
    } else {
        (done as f64 / total as f64) * 100.0
    };
    StatusSummary {
        backlog,
        in_progress,
        done,
        total,
        percent_done,
    }
}

pub fn progress_for<S: AsRef<str>>(engine: &TaskEngine, ids: &[S]) -> TaskResult<Progress> {
    let partitions = engine.all_tasks()?;
    let mut location: HashMap<&str, Partition> = HashMap::new();
    // Reverse so the first partition in lookup order wins, as in find_task.
    for (partition, tasks) in partitions.iter().rev() {
        for task in tasks {
            location.insert(task.id.as_str(), *partition);
        }
    }

    let mut progress = Progress::default();
    for id in ids {
        match location.get(id.as_ref()) {
            Some(Partition::Backlog) => progress.pending += 1,
            Some(Partition::InProgress) => progress.in_progress += 1,
            Some(Partition::Done) => progress.done += 1,
            None => progress.missing.push(id.as_ref().to_string()),
        }
    }
    Ok(progress)
}

pub fn check_store(engine: &TaskEngine) -> TaskResult<CheckReport> {
    let partitions = engine.stored_tasks()?;
    Ok(check_partitions(&partitions))
}

/// Reports every broken store invariant without changing anything.
pub fn check_partitions(partitions: &[(Partition, Vec<Task>)]) -> CheckReport {
    let mut errors = Vec::new();
    let mut warnings = Vec::new();

    let mut seen: HashMap<&str, Vec<Partition>> = HashMap::new();
    for (partition, tasks) in partitions {
        for task in tasks {
            seen.entry(task.id.as_str()).or_default().push(*partition);
        }
    }
    let diverged: HashSet<String> = plan_recovery(partitions)
        .diverged
        .into_iter()
        .map(|divergence| divergence.id)
        .collect();
    let mut duplicated: Vec<(&str, &Vec<Partition>)> = seen
        .iter()
        .filter(|(_, places)| places.len() > 1)
        .map(|(id, places)| (*id, places))
        .collect();
    duplicated.sort();
    for (id, places) in duplicated {
        let names: Vec<&str> = places.iter().map(|partition| partition.as_str()).collect();
        let mut message = format!("{} appears {} times: {}", id, places.len(), names.join(", "));
        if diverged.contains(id) {
            message.push_str(" (copies differ, merge by hand)");
        }
        errors.push(message);
    }

    for (partition, tasks) in partitions {
        for task in tasks {
            if task.id.trim().is_empty() {
                errors.push(format!("task in {} has no id", partition));
            }
            if task.status != partition.status() {
                errors.push(format!(
                    "{} has status {} but lives in {}",
                    task.id,
                    task.status.as_str(),
                    partition
                ));
            }
            if let Err(err) = validate_title(&task.title) {
                errors.push(format!("{}: {}", task.id, err));
            }
            if *partition != Partition::Backlog && task.assigned_to.is_none() {
                warnings.push(format!("{} in {} has no assignee", task.id, partition));
            }
            check_subtasks(task, &mut errors, &mut warnings);
        }
    }

    CheckReport { errors, warnings }
}

fn check_subtasks(task: &Task, errors: &mut Vec<String>, warnings: &mut Vec<String>) {
    let mut ids = HashSet::new();
    for sub in &task.subtasks {
        if !ids.insert(sub.id.as_str()) {
            errors.push(format!("{} has duplicate subtask id {}", task.id, sub.id));
        }
        if subtask_seq(&task.id, &sub.id).is_none() {
            warnings.push(format!(
                "{} subtask {} is not derived from the parent id",
                task.id, sub.id
            ));
        }
    }
}
