use std::collections::HashSet;

use pretty_assertions::assert_eq;
use tempfile::TempDir;

use agentic_core::codec::{load_partition_file, save_partition_file};
use agentic_core::{NewTask, Partition, TaskEngine, TaskError, TaskStatus, TaskStore};

fn engine(temp: &TempDir) -> TaskEngine {
    TaskEngine::new(TaskStore::new(temp.path().join(".agentic").join("tasks")))
}

fn read_partition(engine: &TaskEngine, partition: Partition) -> String {
    std::fs::read_to_string(engine.store().partition_path(partition)).expect("read partition")
}

fn locations(engine: &TaskEngine, id: &str) -> Vec<Partition> {
    engine
        .all_tasks()
        .expect("all tasks")
        .into_iter()
        .filter(|(_, tasks)| tasks.iter().any(|task| task.id == id))
        .map(|(partition, _)| partition)
        .collect()
}

#[test]
fn create_claim_complete_scenario() {
    let temp = TempDir::new().expect("tempdir");
    let engine = engine(&temp);

    let task = engine.create_task("Add login").expect("create");
    let backlog = engine.list_tasks(Partition::Backlog).expect("backlog");
    assert_eq!(backlog.len(), 1);
    assert_eq!(backlog[0].title, "Add login");
    assert_eq!(backlog[0].status, TaskStatus::Pending);
    assert!(read_partition(&engine, Partition::Backlog).contains("status: pending"));

    let claimed = engine.claim_task(&task.id, "alice").expect("claim");
    assert_eq!(claimed.status, TaskStatus::InProgress);
    assert!(engine.list_tasks(Partition::Backlog).expect("backlog").is_empty());
    let in_progress_text = read_partition(&engine, Partition::InProgress);
    assert!(in_progress_text.contains("status: in_progress"));
    assert!(in_progress_text.contains("assigned_to: alice"));
    assert!(in_progress_text.contains("title: Add login"));

    engine.complete_task(&task.id).expect("complete");
    assert!(engine.list_tasks(Partition::InProgress).expect("in progress").is_empty());
    let done = engine.list_tasks(Partition::Done).expect("done");
    assert_eq!(done.len(), 1);
    assert_eq!(done[0].status, TaskStatus::Done);
    assert_eq!(done[0].assigned_to.as_deref(), Some("alice"));
    assert_eq!(locations(&engine, &task.id), vec![Partition::Done]);
}

#[test]
fn decompose_before_claim_appends_derived_subtasks() {
    let temp = TempDir::new().expect("tempdir");
    let engine = engine(&temp);
    let task = engine.create_task("Add login").expect("create");

    let parent = engine.decompose_task(&task.id, &["A", "B"]).expect("decompose");
    assert_eq!(parent.status, TaskStatus::Pending);
    let ids: Vec<String> = parent.subtasks.iter().map(|sub| sub.id.clone()).collect();
    assert_eq!(ids, vec![format!("{}.1", task.id), format!("{}.2", task.id)]);
    assert!(parent
        .subtasks
        .iter()
        .all(|sub| sub.status == TaskStatus::Pending));

    let (stored, partition) = engine.find_task(&task.id).expect("find").expect("present");
    assert_eq!(partition, Partition::Backlog);
    assert_eq!(stored, parent);
}

#[test]
fn decompose_appends_on_every_call() {
    let temp = TempDir::new().expect("tempdir");
    let engine = engine(&temp);
    let task = engine.create_task("Parent").expect("create");
    engine.claim_task(&task.id, "bob").expect("claim");

    engine.decompose_task(&task.id, &["A", "B"]).expect("first");
    let parent = engine.decompose_task(&task.id, &["A"]).expect("second");
    let titles: Vec<&str> = parent.subtasks.iter().map(|sub| sub.title.as_str()).collect();
    assert_eq!(titles, vec!["A", "B", "A"]);
    assert_eq!(parent.subtasks[2].id, format!("{}.3", task.id));
    assert_eq!(parent.status, TaskStatus::InProgress);
    assert_eq!(locations(&engine, &task.id), vec![Partition::InProgress]);
}

#[test]
fn decompose_rejects_empty_and_invalid_titles() {
    let temp = TempDir::new().expect("tempdir");
    let engine = engine(&temp);
    let task = engine.create_task("Parent").expect("create");
    let before = read_partition(&engine, Partition::Backlog);

    let none: [&str; 0] = [];
    assert!(engine
        .decompose_task(&task.id, &none)
        .expect_err("empty")
        .is_validation());
    assert!(engine
        .decompose_task(&task.id, &["ok", "bad\ntitle"])
        .expect_err("newline")
        .is_validation());
    assert_eq!(read_partition(&engine, Partition::Backlog), before);

    assert!(engine
        .decompose_task("TASK-NOPE", &["A"])
        .expect_err("missing")
        .is_not_found());
}

#[test]
fn creating_with_empty_title_touches_nothing() {
    let temp = TempDir::new().expect("tempdir");
    let engine = engine(&temp);
    let err = engine.create_task("   ").expect_err("empty title");
    assert!(matches!(err, TaskError::Validation(_)));
    assert!(!engine.store().exists());
}

#[test]
fn ids_are_unique_in_a_tight_loop() {
    let temp = TempDir::new().expect("tempdir");
    let engine = engine(&temp);
    let ids: Vec<String> = (0..50)
        .map(|n| engine.create_task(&format!("Task {n}")).expect("create").id)
        .collect();
    let unique: HashSet<&String> = ids.iter().collect();
    assert_eq!(unique.len(), ids.len());

    let stored: Vec<String> = engine
        .list_tasks(Partition::Backlog)
        .expect("backlog")
        .into_iter()
        .map(|task| task.id)
        .collect();
    assert_eq!(stored, ids);
}

#[test]
fn claim_and_complete_preserve_every_field() {
    let temp = TempDir::new().expect("tempdir");
    let engine = engine(&temp);
    let task = engine
        .create_task_with(NewTask {
            title: "Rich task".to_string(),
            description: Some("All the fields".to_string()),
            scope: vec!["src/auth".to_string()],
            spec_refs: vec!["specs/login.md".to_string()],
            skill_refs: vec!["rust".to_string()],
            inputs: vec!["design.md".to_string()],
            outputs: vec!["src/auth/login.rs".to_string()],
            acceptance: vec!["user can log in".to_string(), "errors are shown".to_string()],
        })
        .expect("create");
    let task = engine.decompose_task(&task.id, &["Write tests"]).expect("decompose");

    let claimed = engine.claim_task(&task.id, "alice").expect("claim");
    let reloaded = engine.list_tasks(Partition::InProgress).expect("in progress");
    assert_eq!(reloaded, vec![claimed.clone()]);
    let mut expected = task.clone();
    expected.status = TaskStatus::InProgress;
    expected.assigned_to = Some("alice".to_string());
    assert_eq!(reloaded[0], expected);

    engine
        .move_task(&task.id, Partition::InProgress, Partition::Done, TaskStatus::Done)
        .expect("complete");
    let done = engine.list_tasks(Partition::Done).expect("done");
    expected.status = TaskStatus::Done;
    assert_eq!(done, vec![expected]);
}

#[test]
fn lookups_distinguish_absence_from_failure() {
    let temp = TempDir::new().expect("tempdir");
    let engine = engine(&temp);
    engine.create_task("Something").expect("create");

    assert_eq!(engine.find_task("NONEXISTENT").expect("find"), None);
    let err = engine.claim_task("NONEXISTENT", "x").expect_err("claim");
    assert!(matches!(
        err,
        TaskError::NotFound {
            scope: agentic_core::NotFoundScope::Partition(Partition::Backlog),
            ..
        }
    ));
}

#[test]
fn claim_only_takes_tasks_from_backlog() {
    let temp = TempDir::new().expect("tempdir");
    let engine = engine(&temp);
    let task = engine.create_task("Once").expect("create");
    engine.claim_task(&task.id, "alice").expect("first claim");

    let before = read_partition(&engine, Partition::InProgress);
    assert!(engine
        .claim_task(&task.id, "bob")
        .expect_err("second claim")
        .is_not_found());
    assert_eq!(read_partition(&engine, Partition::InProgress), before);
    assert!(engine
        .complete_task(&engine.create_task("Unclaimed").expect("create").id)
        .expect_err("complete from backlog")
        .is_not_found());
}

#[test]
fn backward_moves_are_rejected_before_io() {
    let temp = TempDir::new().expect("tempdir");
    let engine = engine(&temp);
    let err = engine
        .move_task("TASK-1", Partition::Done, Partition::Backlog, TaskStatus::Pending)
        .expect_err("backward");
    assert!(err.is_validation());
    assert!(!engine.store().exists());
}

#[test]
fn update_task_cannot_desync_engine_fields() {
    let temp = TempDir::new().expect("tempdir");
    let engine = engine(&temp);
    let task = engine.create_task("Draft").expect("create");

    let edited = engine
        .update_task(&task.id, |task| {
            task.title = " Final title ".to_string();
            task.scope.push("docs".to_string());
            task.status = TaskStatus::Done;
            task.id = "HIJACKED".to_string();
        })
        .expect("edit");
    assert_eq!(edited.id, task.id);
    assert_eq!(edited.title, "Final title");
    assert_eq!(edited.status, TaskStatus::Pending);
    assert_eq!(edited.scope, vec!["docs"]);
    assert_eq!(locations(&engine, &task.id), vec![Partition::Backlog]);

    let err = engine
        .update_task(&task.id, |task| task.title = String::new())
        .expect_err("empty title");
    assert!(err.is_validation());
}

#[test]
fn subtask_status_updates_in_place() {
    let temp = TempDir::new().expect("tempdir");
    let engine = engine(&temp);
    let task = engine.create_task("Parent").expect("create");
    engine.decompose_task(&task.id, &["A", "B"]).expect("decompose");
    let sub_id = format!("{}.2", task.id);

    let parent = engine
        .set_subtask_status(&task.id, &sub_id, TaskStatus::Done, Some("carol"))
        .expect("update");
    assert_eq!(parent.subtasks[1].status, TaskStatus::Done);
    assert_eq!(parent.subtasks[1].assigned_to.as_deref(), Some("carol"));
    assert_eq!(parent.subtasks[0].status, TaskStatus::Pending);
    assert_eq!(parent.status, TaskStatus::Pending);

    assert!(engine
        .set_subtask_status(&task.id, "nope", TaskStatus::Done, None)
        .expect_err("missing subtask")
        .is_not_found());
}

#[test]
fn next_claimable_is_oldest_backlog_task() {
    let temp = TempDir::new().expect("tempdir");
    let engine = engine(&temp);
    assert_eq!(engine.next_claimable().expect("empty"), None);
    let first = engine.create_task("First").expect("first");
    engine.create_task("Second").expect("second");
    assert_eq!(engine.next_claimable().expect("next").map(|task| task.id), Some(first.id.clone()));
    engine.claim_task(&first.id, "alice").expect("claim");
    assert_eq!(
        engine.next_claimable().expect("next").map(|task| task.title),
        Some("Second".to_string())
    );
}

#[test]
fn hand_edited_partition_round_trips_without_drift() {
    let temp = TempDir::new().expect("tempdir");
    let engine = engine(&temp);
    let path = engine.store().partition_path(Partition::Backlog);
    std::fs::create_dir_all(path.parent().expect("parent")).expect("dir");
    let content = "tasks:\n"
        .to_string()
        + "  - id: TASK-1\n"
        + "    title: Hand written\n"
        + "    description: Multi\n"
        + "    status: pending\n"
        + "    scope: [b, a]\n"
        + "    owner_note: keep me\n"
        + "  - id: TASK-2\n"
        + "    title: Second\n"
        + "    status: pending\n"
        + "    acceptance:\n"
        + "      - one\n"
        + "      - two\n";
    std::fs::write(&path, content).expect("write");

    let first = load_partition_file(&path).expect("first load");
    save_partition_file(&path, &first).expect("save");
    let second = load_partition_file(&path).expect("second load");
    assert_eq!(first, second);
    assert_eq!(second[0].scope, vec!["b", "a"]);
    assert_eq!(second[1].id, "TASK-2");

    engine.claim_task("TASK-1", "dana").expect("claim");
    let claimed = engine.list_tasks(Partition::InProgress).expect("in progress");
    assert_eq!(
        claimed[0].extra.get("owner_note").and_then(|v| v.as_str()),
        Some("keep me")
    );
}
