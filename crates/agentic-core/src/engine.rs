//! The transition engine: the only code that moves tasks between partitions.
//!
//! Every mutating operation validates its input first, then takes the
//! exclusive store lock, heals any move a previous process left half done,
//! and performs its read-modify-write. Moves commit the destination
//! partition before the source, so an interruption leaves the task in two
//! files (healed on the next mutation) and never in none.
//!
//! Only a copy identical to the most advanced one apart from `status` and
//! `assigned_to` counts as the stale half of a move. Copies that differ in
//! anything else are never removed; operations on that ID fail with
//! [`TaskError::Diverged`] until someone merges them.

use std::collections::{BTreeMap, BTreeSet, HashSet};

use serde::Serialize;
use serde_json::json;

use crate::audit::{append_audit_event, AuditEvent};
use crate::config::TaskRootResolution;
use crate::error::{NotFoundScope, TaskError, TaskResult};
use crate::id::{new_unique_id, subtask_id};
use crate::lock::LockMode;
use crate::store::TaskStore;
use crate::task::{validate_title, NewTask, Partition, SubTask, Task, TaskStatus};

/// A lifecycle step for a top-level task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transition {
    /// `backlog` -> `in-progress`, recording who took the task.
    Claim { claimant: String },
    /// `in-progress` -> `done`.
    Complete,
    Move {
        from: Partition,
        to: Partition,
        status: TaskStatus,
    },
}

impl Transition {
    pub fn source(&self) -> Partition {
        match self {
            Transition::Claim { .. } => Partition::Backlog,
            Transition::Complete => Partition::InProgress,
            Transition::Move { from, .. } => *from,
        }
    }

    pub fn target(&self) -> Partition {
        match self {
            Transition::Claim { .. } => Partition::InProgress,
            Transition::Complete => Partition::Done,
            Transition::Move { to, .. } => *to,
        }
    }

    pub fn status(&self) -> TaskStatus {
        match self {
            Transition::Move { status, .. } => *status,
            _ => self.target().status(),
        }
    }

    pub fn action(&self) -> &'static str {
        match self {
            Transition::Claim { .. } => "claim",
            Transition::Complete => "complete",
            Transition::Move { .. } => "move",
        }
    }

    /// Rejects transitions that would break the lifecycle or desync status
    /// from partition.
    pub fn validate(&self) -> TaskResult<()> {
        if let Transition::Claim { claimant } = self {
            if claimant.trim().is_empty() {
                return Err(TaskError::validation("claimant must not be empty"));
            }
        }
        let (from, to) = (self.source(), self.target());
        if from == Partition::Done {
            return Err(TaskError::validation("tasks in done cannot be moved"));
        }
        if to.rank() <= from.rank() {
            return Err(TaskError::validation(format!(
                "cannot move a task from {} to {}",
                from, to
            )));
        }
        if self.status() != to.status() {
            return Err(TaskError::validation(format!(
                "status {} does not belong in {}",
                self.status().as_str(),
                to
            )));
        }
        Ok(())
    }

    /// Updates the engine-owned fields together; everything else is untouched.
    fn apply(&self, task: &mut Task) {
        task.status = self.status();
        if let Transition::Claim { claimant } = self {
            task.assigned_to = Some(claimant.trim().to_string());
        }
    }

    fn actor(&self) -> Option<&str> {
        match self {
            Transition::Claim { claimant } => Some(claimant.trim()),
            _ => None,
        }
    }
}

/// A duplicate copy removed while healing an interrupted move.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Repair {
    pub id: String,
    pub kept: Partition,
    pub dropped: Partition,
}

/// An ID stored in several partitions whose copies do not agree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Divergence {
    pub id: String,
    pub copies: Vec<Partition>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Recovery {
    pub repaired: Vec<Repair>,
    pub diverged: Vec<Divergence>,
}

impl Recovery {
    pub fn is_empty(&self) -> bool {
        self.repaired.is_empty() && self.diverged.is_empty()
    }
}

/// Sorts every duplicated ID into a stale copy left by an interrupted move
/// or a divergence that needs a person.
pub fn plan_recovery(partitions: &[(Partition, Vec<Task>)]) -> Recovery {
    let mut copies: BTreeMap<&str, Vec<(Partition, &Task)>> = BTreeMap::new();
    for (partition, tasks) in partitions {
        for task in tasks {
            copies
                .entry(task.id.as_str())
                .or_default()
                .push((*partition, task));
        }
    }

    let mut recovery = Recovery::default();
    for (id, found) in copies {
        if found.len() < 2 {
            continue;
        }
        let distinct: BTreeSet<Partition> = found.iter().map(|(partition, _)| *partition).collect();
        let newest = found
            .iter()
            .max_by_key(|(partition, _)| partition.rank())
            .map(|(partition, task)| (*partition, *task));
        match newest {
            Some((kept, newest))
                if distinct.len() == found.len()
                    && found.iter().all(|(_, copy)| same_apart_from_move(copy, newest)) =>
            {
                for (partition, _) in &found {
                    if *partition != kept {
                        recovery.repaired.push(Repair {
                            id: id.to_string(),
                            kept,
                            dropped: *partition,
                        });
                    }
                }
            }
            _ => recovery.diverged.push(Divergence {
                id: id.to_string(),
                copies: found.iter().map(|(partition, _)| *partition).collect(),
            }),
        }
    }
    recovery
}

/// Equal in every field a move leaves alone.
fn same_apart_from_move(copy: &Task, newest: &Task) -> bool {
    let mut copy = copy.clone();
    copy.status = newest.status;
    copy.assigned_to = newest.assigned_to.clone();
    copy == *newest
}

/// Removes the copies named in `repaired`, returning the partitions that
/// changed.
fn drop_stale(partitions: &mut [(Partition, Vec<Task>)], repaired: &[Repair]) -> BTreeSet<Partition> {
    let stale: HashSet<(&str, Partition)> = repaired
        .iter()
        .map(|repair| (repair.id.as_str(), repair.dropped))
        .collect();
    let mut changed = BTreeSet::new();
    for (partition, tasks) in partitions.iter_mut() {
        let before = tasks.len();
        tasks.retain(|task| !stale.contains(&(task.id.as_str(), *partition)));
        if tasks.len() != before {
            changed.insert(*partition);
        }
    }
    changed
}

#[derive(Debug, Clone)]
pub struct TaskEngine {
    store: TaskStore,
    audit: bool,
}

impl TaskEngine {
    pub fn new(store: TaskStore) -> Self {
        Self { store, audit: true }
    }

    pub fn from_resolution(resolution: &TaskRootResolution) -> Self {
        Self::new(resolution.store()).with_audit(resolution.config.audit_enabled())
    }

    pub fn with_audit(mut self, enabled: bool) -> Self {
        self.audit = enabled;
        self
    }

    pub fn store(&self) -> &TaskStore {
        &self.store
    }

    pub fn create_task(&self, title: &str) -> TaskResult<Task> {
        self.create_task_with(NewTask::titled(title))
    }

    /// Appends a new `pending` task to the backlog and returns it.
    pub fn create_task_with(&self, new_task: NewTask) -> TaskResult<Task> {
        let title = validate_title(&new_task.title)?;
        self.mutate(|store| {
            let mut partitions = store.load_all()?;
            let used: HashSet<String> = partitions
                .iter()
                .flat_map(|(_, tasks)| tasks.iter().map(|task| task.id.clone()))
                .collect();
            let task = new_task.into_task(new_unique_id(&used), title);

            // load_all yields partitions in lookup order, backlog first.
            let backlog = &mut partitions[0].1;
            backlog.push(task.clone());
            store.save_tasks(Partition::Backlog, backlog)?;

            tracing::info!(id = %task.id, title = %task.title, "task created");
            self.record(AuditEvent::new("create", &task.id).between(None, Some(Partition::Backlog)));
            Ok(task)
        })
    }

    /// Looks in `backlog`, `in-progress`, then `done`; absence is `None`.
    pub fn find_task(&self, id: &str) -> TaskResult<Option<(Task, Partition)>> {
        Ok(self.all_tasks()?.into_iter().find_map(|(partition, tasks)| {
            tasks
                .into_iter()
                .find(|task| task.id == id)
                .map(|task| (task, partition))
        }))
    }

    pub fn claim_task(&self, id: &str, claimant: &str) -> TaskResult<Task> {
        self.apply_transition(
            id,
            &Transition::Claim {
                claimant: claimant.to_string(),
            },
        )
    }

    pub fn complete_task(&self, id: &str) -> TaskResult<Task> {
        self.apply_transition(id, &Transition::Complete)
    }

    pub fn move_task(
        &self,
        id: &str,
        from: Partition,
        to: Partition,
        status: TaskStatus,
    ) -> TaskResult<Task> {
        self.apply_transition(id, &Transition::Move { from, to, status })
    }

    /// Moves `id` out of the transition's source partition and into its
    /// target, returning the task as stored in the target.
    pub fn apply_transition(&self, id: &str, transition: &Transition) -> TaskResult<Task> {
        transition.validate()?;
        let (from, to) = (transition.source(), transition.target());
        self.require_store(id, NotFoundScope::Partition(from))?;
        self.mutate(|store| {
            let mut source = store.load_tasks(from)?;
            let idx = source
                .iter()
                .position(|task| task.id == id)
                .ok_or_else(|| TaskError::not_found(id, NotFoundScope::Partition(from)))?;
            ensure_single_copy(store, id, from)?;
            let mut task = source.remove(idx);
            transition.apply(&mut task);

            let mut target = store.load_tasks(to)?;
            target.push(task.clone());
            store.save_tasks(to, &target)?;
            store.save_tasks(from, &source)?;

            tracing::info!(id, %from, %to, action = transition.action(), "task moved");
            let mut event = AuditEvent::new(transition.action(), id).between(Some(from), Some(to));
            if let Some(actor) = transition.actor() {
                event = event.actor(actor);
            }
            self.record(event);
            Ok(task)
        })
    }

    /// Appends one `pending` subtask per title to the task, wherever it
    /// lives. Repeating a call appends again; titles are not de-duplicated.
    pub fn decompose_task<S: AsRef<str>>(&self, id: &str, titles: &[S]) -> TaskResult<Task> {
        if titles.is_empty() {
            return Err(TaskError::validation("at least one subtask title is required"));
        }
        let titles = titles
            .iter()
            .map(|title| validate_title(title.as_ref()))
            .collect::<TaskResult<Vec<String>>>()?;

        self.require_store(id, NotFoundScope::AnyPartition)?;
        self.mutate(|store| {
            let (partition, mut tasks, idx) = locate(store, id)?
                .ok_or_else(|| TaskError::not_found(id, NotFoundScope::AnyPartition))?;
            let task = &mut tasks[idx];
            let exhausted = || {
                TaskError::validation(format!("subtask numbering of {} is exhausted", id))
            };
            let first = task.next_subtask_seq().ok_or_else(exhausted)?;
            let count = u32::try_from(titles.len()).map_err(|_| exhausted())?;
            first.checked_add(count - 1).ok_or_else(exhausted)?;
            for (offset, title) in (0..count).zip(&titles) {
                task.subtasks.push(SubTask {
                    id: subtask_id(&task.id, first + offset),
                    title: title.clone(),
                    status: TaskStatus::Pending,
                    assigned_to: None,
                    extra: Default::default(),
                });
            }
            let updated = task.clone();
            store.save_tasks(partition, &tasks)?;

            tracing::info!(id, %partition, added = titles.len(), "task decomposed");
            self.record(
                AuditEvent::new("decompose", id).details(json!({ "added": titles.len() })),
            );
            Ok(updated)
        })
    }

    /// Updates one subtask in place; the parent stays in its partition.
    pub fn set_subtask_status(
        &self,
        parent_id: &str,
        subtask_id: &str,
        status: TaskStatus,
        assignee: Option<&str>,
    ) -> TaskResult<Task> {
        let assignee = assignee
            .map(|value| value.trim())
            .filter(|value| !value.is_empty());
        self.require_store(parent_id, NotFoundScope::AnyPartition)?;
        self.mutate(|store| {
            let (partition, mut tasks, idx) = locate(store, parent_id)?
                .ok_or_else(|| TaskError::not_found(parent_id, NotFoundScope::AnyPartition))?;
            let subtask = tasks[idx]
                .subtask_mut(subtask_id)
                .ok_or_else(|| TaskError::not_found(subtask_id, NotFoundScope::Subtasks))?;
            subtask.status = status;
            if let Some(assignee) = assignee {
                subtask.assigned_to = Some(assignee.to_string());
            }
            let updated = tasks[idx].clone();
            store.save_tasks(partition, &tasks)?;

            tracing::info!(parent_id, subtask_id, status = status.as_str(), "subtask updated");
            let mut event = AuditEvent::new("subtask", parent_id)
                .details(json!({ "subtask": subtask_id, "status": status.as_str() }));
            if let Some(assignee) = assignee {
                event = event.actor(assignee);
            }
            self.record(event);
            Ok(updated)
        })
    }

    /// Applies an editor change to a task without moving it.
    ///
    /// `id`, `status`, `assigned_to` and `subtasks` belong to the engine and
    /// are restored after `edit` runs.
    pub fn update_task<F>(&self, id: &str, edit: F) -> TaskResult<Task>
    where
        F: FnOnce(&mut Task),
    {
        self.require_store(id, NotFoundScope::AnyPartition)?;
        self.mutate(|store| {
            let (partition, mut tasks, idx) = locate(store, id)?
                .ok_or_else(|| TaskError::not_found(id, NotFoundScope::AnyPartition))?;
            let before = tasks[idx].clone();
            let mut edited = before.clone();
            edit(&mut edited);
            edited.title = validate_title(&edited.title)?;
            edited.id = before.id;
            edited.status = before.status;
            edited.assigned_to = before.assigned_to;
            edited.subtasks = before.subtasks;
            tasks[idx] = edited.clone();
            store.save_tasks(partition, &tasks)?;

            tracing::info!(id, %partition, "task edited");
            self.record(AuditEvent::new("edit", id));
            Ok(edited)
        })
    }

    pub fn list_tasks(&self, partition: Partition) -> TaskResult<Vec<Task>> {
        Ok(self
            .all_tasks()?
            .into_iter()
            .find(|(found, _)| *found == partition)
            .map(|(_, tasks)| tasks)
            .unwrap_or_default())
    }

    /// Every partition in lookup order. Stale halves of an interrupted move
    /// are hidden here but left on disk; the next mutation removes them.
    pub fn all_tasks(&self) -> TaskResult<Vec<(Partition, Vec<Task>)>> {
        self.read(|store| {
            let mut partitions = store.load_all()?;
            let recovery = plan_recovery(&partitions);
            drop_stale(&mut partitions, &recovery.repaired);
            Ok(partitions)
        })
    }

    /// Every partition exactly as stored, duplicates included.
    pub fn stored_tasks(&self) -> TaskResult<Vec<(Partition, Vec<Task>)>> {
        self.read(|store| store.load_all())
    }

    /// The oldest backlog task, which is the next one to claim.
    pub fn next_claimable(&self) -> TaskResult<Option<Task>> {
        Ok(self.list_tasks(Partition::Backlog)?.into_iter().next())
    }

    /// Removes stale copies left by interrupted moves and reports the
    /// diverging ones it left in place.
    pub fn repair(&self) -> TaskResult<Recovery> {
        if !self.store.exists() {
            return Ok(Recovery::default());
        }
        let _lock = self.store.lock(LockMode::Exclusive)?;
        self.recover_interrupted_moves()
    }

    /// Lookups against a task root that was never created fail without
    /// creating it.
    fn require_store(&self, id: &str, scope: NotFoundScope) -> TaskResult<()> {
        if self.store.exists() {
            Ok(())
        } else {
            Err(TaskError::not_found(id, scope))
        }
    }

    fn mutate<T, F>(&self, op: F) -> TaskResult<T>
    where
        F: FnOnce(&TaskStore) -> TaskResult<T>,
    {
        let _lock = self.store.lock(LockMode::Exclusive)?;
        self.recover_interrupted_moves()?;
        op(&self.store)
    }

    fn read<T, F>(&self, op: F) -> TaskResult<T>
    where
        F: FnOnce(&TaskStore) -> TaskResult<T>,
    {
        if !self.store.exists() {
            return op(&self.store);
        }
        let _lock = self.store.lock(LockMode::Shared)?;
        op(&self.store)
    }

    /// Drops the stale halves of interrupted moves. Diverging copies stay
    /// on disk. Must run under the exclusive lock.
    fn recover_interrupted_moves(&self) -> TaskResult<Recovery> {
        let mut partitions = self.store.load_all()?;
        let recovery = plan_recovery(&partitions);
        let changed = drop_stale(&mut partitions, &recovery.repaired);
        for (partition, tasks) in &partitions {
            if changed.contains(partition) {
                self.store.save_tasks(*partition, tasks)?;
            }
        }

        for repair in &recovery.repaired {
            tracing::warn!(
                id = %repair.id,
                kept = %repair.kept,
                dropped = %repair.dropped,
                "removed stale copy left by an interrupted move"
            );
            self.record(
                AuditEvent::new("repair", &repair.id).between(Some(repair.dropped), Some(repair.kept)),
            );
        }
        for divergence in &recovery.diverged {
            tracing::warn!(
                id = %divergence.id,
                copies = ?divergence.copies,
                "task has diverging copies; leaving them for a manual merge"
            );
        }
        Ok(recovery)
    }

    fn record(&self, event: AuditEvent) {
        if !self.audit {
            return;
        }
        if let Err(err) = append_audit_event(self.store.root(), &event) {
            tracing::warn!(error = %err, action = %event.action, "failed to append audit event");
        }
    }
}

/// Finds `id` using the fixed lookup order, returning the whole partition
/// so callers can modify and save it.
fn locate(store: &TaskStore, id: &str) -> TaskResult<Option<(Partition, Vec<Task>, usize)>> {
    for partition in Partition::ALL {
        let tasks = store.load_tasks(partition)?;
        if let Some(idx) = tasks.iter().position(|task| task.id == id) {
            ensure_single_copy(store, id, partition)?;
            return Ok(Some((partition, tasks, idx)));
        }
    }
    Ok(None)
}

/// After recovery, an ID still stored in another partition has copies that
/// differ.
fn ensure_single_copy(store: &TaskStore, id: &str, found_in: Partition) -> TaskResult<()> {
    let mut copies = vec![found_in];
    for partition in Partition::ALL {
        if partition != found_in && store.load_tasks(partition)?.iter().any(|task| task.id == id) {
            copies.push(partition);
        }
    }
    if copies.len() > 1 {
        copies.sort();
        return Err(TaskError::Diverged {
            id: id.to_string(),
            copies,
        });
    }
    Ok(())
}
