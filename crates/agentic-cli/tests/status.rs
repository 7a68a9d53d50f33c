use std::fs;
use std::path::Path;
use std::process::{Command, Output};

use tempfile::TempDir;

fn bin() -> Command {
    let mut command = Command::new(env!("CARGO_BIN_EXE_agentic"));
    command.env_remove("AGENTIC_TASKS_DIR").env_remove("AGENTIC_LOG");
    command
}

fn run(root: &Path, args: &[&str]) -> Output {
    bin().arg("--root").arg(root).args(args).output().expect("run agentic")
}

fn write_partition(tasks: &Path, name: &str, body: &str) {
    fs::create_dir_all(tasks).expect("tasks dir");
    fs::write(tasks.join(name), body).expect("write partition");
}

#[test]
fn status_counts_partitions() {
    let temp = TempDir::new().expect("tempdir");
    let tasks = temp.path().join(".agentic").join("tasks");
    write_partition(
        &tasks,
        "backlog.yaml",
        "tasks:\n  - id: TASK-1\n    title: One\n    status: pending\n",
    );
    write_partition(
        &tasks,
        "done.yaml",
        "tasks:\n  - id: TASK-2\n    title: Two\n    status: done\n    assigned_to: alice\n",
    );

    let output = run(temp.path(), &["status", "--json"]);
    assert!(output.status.success());
    let summary: serde_json::Value = serde_json::from_slice(&output.stdout).expect("json");
    assert_eq!(summary["backlog"], 1);
    assert_eq!(summary["in_progress"], 0);
    assert_eq!(summary["done"], 1);
    assert_eq!(summary["total"], 2);
    assert_eq!(summary["percent_done"], 50.0);

    let text = run(temp.path(), &["status"]);
    let stdout = String::from_utf8_lossy(&text.stdout);
    assert!(stdout.contains("total: 2 (50% done)"), "stdout: {}", stdout);
}

#[test]
fn check_fails_on_duplicates_and_repair_heals_them() {
    let temp = TempDir::new().expect("tempdir");
    let tasks = temp.path().join(".agentic").join("tasks");
    // A move interrupted after the destination write leaves two copies.
    write_partition(
        &tasks,
        "backlog.yaml",
        "tasks:\n  - id: TASK-1\n    title: One\n    status: pending\n",
    );
    write_partition(
        &tasks,
        "in-progress.yaml",
        "tasks:\n  - id: TASK-1\n    title: One\n    status: in_progress\n    assigned_to: alice\n",
    );

    let check = run(temp.path(), &["check"]);
    assert!(!check.status.success());
    let stdout = String::from_utf8_lossy(&check.stdout);
    assert!(stdout.contains("ERROR: TASK-1 appears 2 times"), "stdout: {}", stdout);

    let repair = run(temp.path(), &["repair", "--json"]);
    assert!(repair.status.success());
    let recovery: serde_json::Value = serde_json::from_slice(&repair.stdout).expect("json");
    assert_eq!(recovery["repaired"][0]["id"], "TASK-1");
    assert_eq!(recovery["repaired"][0]["kept"], "in-progress");
    assert_eq!(recovery["repaired"][0]["dropped"], "backlog");
    assert_eq!(recovery["diverged"].as_array().map(Vec::len), Some(0));

    let check = run(temp.path(), &["check"]);
    assert!(check.status.success());
    assert!(String::from_utf8_lossy(&check.stdout).contains("OK"));
}

#[test]
fn repair_keeps_copies_that_differ() {
    let temp = TempDir::new().expect("tempdir");
    let tasks = temp.path().join(".agentic").join("tasks");
    write_partition(
        &tasks,
        "backlog.yaml",
        "tasks:\n  - id: TASK-1\n    title: One\n    status: pending\n    acceptance:\n      - must not be lost\n",
    );
    write_partition(
        &tasks,
        "in-progress.yaml",
        "tasks:\n  - id: TASK-1\n    title: One\n    status: in_progress\n    assigned_to: alice\n",
    );

    let check = run(temp.path(), &["check"]);
    assert!(!check.status.success());
    assert!(String::from_utf8_lossy(&check.stdout).contains("copies differ"));

    let repair = run(temp.path(), &["repair"]);
    assert!(!repair.status.success());
    let stdout = String::from_utf8_lossy(&repair.stdout);
    assert!(
        stdout.contains("TASK-1: copies in backlog, in-progress differ"),
        "stdout: {}",
        stdout
    );

    let create = run(temp.path(), &["create", "Unrelated"]);
    assert!(create.status.success());
    let backlog = fs::read_to_string(tasks.join("backlog.yaml")).expect("backlog");
    assert!(backlog.contains("must not be lost"));

    let complete = run(temp.path(), &["complete", "TASK-1"]);
    assert!(!complete.status.success());
    assert!(String::from_utf8_lossy(&complete.stderr).contains("diverging copies"));
}

#[test]
fn tasks_dir_flag_overrides_default_root() {
    let temp = TempDir::new().expect("tempdir");
    let output = bin()
        .arg("--root")
        .arg(temp.path())
        .arg("--tasks-dir")
        .arg("plans")
        .args(["create", "Elsewhere"])
        .output()
        .expect("create");
    assert!(output.status.success());
    assert!(temp.path().join("plans").join("backlog.yaml").is_file());
    assert!(!temp.path().join(".agentic").exists());
}

#[test]
fn env_var_selects_task_root() {
    let temp = TempDir::new().expect("tempdir");
    let output = bin()
        .env("AGENTIC_TASKS_DIR", "from-env")
        .arg("--root")
        .arg(temp.path())
        .args(["create", "Env rooted"])
        .output()
        .expect("create");
    assert!(output.status.success());
    assert!(temp.path().join("from-env").join("backlog.yaml").is_file());
}
