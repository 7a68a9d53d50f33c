use std::path::{Path, PathBuf};

use agentic_core::config::{
    config_path, resolve_task_root, write_config, AgenticConfig, TaskRootResolution,
    DEFAULT_TASKS_DIR,
};
use agentic_core::lock::LockMode;
use agentic_core::report::{check_store, status_summary};
use agentic_core::{NewTask, Partition, Task, TaskEngine, TaskStatus};
use anyhow::{bail, Context, Result};
use clap::{CommandFactory, Parser, Subcommand};
use serde::Serialize;

mod logging;

#[derive(Parser)]
#[command(name = "agentic", version, about = "File-backed task tracking for spec-driven work")]
struct Cli {
    /// Directory to start project discovery from (defaults to the current directory)
    #[arg(long, global = true)]
    root: Option<PathBuf>,
    /// Task root to use instead of the configured one
    #[arg(long, global = true)]
    tasks_dir: Option<PathBuf>,
    /// Log debug output to stderr
    #[arg(long, short, global = true)]
    verbose: bool,
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Print version information
    Version,
    /// Create the task root, empty partitions and .agentic.toml
    Init,
    /// Add a task to the backlog
    Create {
        title: String,
        #[arg(long)]
        description: Option<String>,
        #[arg(long = "scope")]
        scope: Vec<String>,
        #[arg(long = "spec-ref")]
        spec_refs: Vec<String>,
        #[arg(long = "skill-ref")]
        skill_refs: Vec<String>,
        #[arg(long = "input")]
        inputs: Vec<String>,
        #[arg(long = "output")]
        outputs: Vec<String>,
        #[arg(long = "acceptance")]
        acceptance: Vec<String>,
        #[arg(long)]
        json: bool,
    },
    /// Show a task and the partition it lives in
    Show {
        id: String,
        #[arg(long)]
        json: bool,
    },
    /// List tasks, optionally from one partition
    List {
        #[arg(long, value_parser = parse_partition)]
        partition: Option<Partition>,
        #[arg(long)]
        json: bool,
    },
    /// Move a backlog task to in-progress and assign it
    Claim {
        id: String,
        claimant: String,
        #[arg(long)]
        json: bool,
    },
    /// Move an in-progress task to done
    Complete {
        id: String,
        #[arg(long)]
        json: bool,
    },
    /// Move a task forward between partitions
    Move {
        id: String,
        #[arg(long, value_parser = parse_partition)]
        from: Partition,
        #[arg(long, value_parser = parse_partition)]
        to: Partition,
        /// Defaults to the status that belongs in the destination
        #[arg(long, value_parser = parse_status)]
        status: Option<TaskStatus>,
        #[arg(long)]
        json: bool,
    },
    /// Append subtasks to a task
    Decompose {
        id: String,
        #[arg(required = true)]
        titles: Vec<String>,
        #[arg(long)]
        json: bool,
    },
    /// Set the status of a subtask
    Subtask {
        parent: String,
        subtask: String,
        #[arg(value_parser = parse_status)]
        status: TaskStatus,
        #[arg(long)]
        assignee: Option<String>,
        #[arg(long)]
        json: bool,
    },
    /// Show the next claimable backlog task
    Next {
        #[arg(long)]
        json: bool,
    },
    /// Task counts per partition
    Status {
        #[arg(long)]
        json: bool,
    },
    /// Report broken store invariants
    Check {
        #[arg(long)]
        json: bool,
    },
    /// Remove stale copies left by interrupted moves
    Repair {
        #[arg(long)]
        json: bool,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    logging::init(cli.verbose);

    let Some(command) = cli.command else {
        Cli::command().print_help()?;
        println!();
        return Ok(());
    };
    if let Command::Version = command {
        println!("agentic {}", agentic_core::version());
        return Ok(());
    }

    let start = match cli.root {
        Some(root) => root,
        None => std::env::current_dir().context("resolve current directory")?,
    };
    let resolution = resolve_task_root(&start, cli.tasks_dir.as_deref())
        .with_context(|| format!("load config under {}", start.display()))?;
    tracing::debug!(
        task_root = %resolution.task_root.display(),
        source = resolution.source.as_str(),
        "resolved task root"
    );
    let engine = TaskEngine::from_resolution(&resolution);

    run(command, &engine, &resolution)
}

fn run(command: Command, engine: &TaskEngine, resolution: &TaskRootResolution) -> Result<()> {
    match command {
        Command::Version => {}
        Command::Init => init(engine, resolution)?,
        Command::Create {
            title,
            description,
            scope,
            spec_refs,
            skill_refs,
            inputs,
            outputs,
            acceptance,
            json,
        } => {
            let task = engine.create_task_with(NewTask {
                title,
                description,
                scope,
                spec_refs,
                skill_refs,
                inputs,
                outputs,
                acceptance,
            })?;
            print_task(&task, Partition::Backlog, json)?;
        }
        Command::Show { id, json } => match engine.find_task(&id)? {
            Some((task, partition)) => print_task(&task, partition, json)?,
            None => bail!("Task not found: {}", id),
        },
        Command::List { partition, json } => {
            let partitions = match partition {
                Some(partition) => vec![(partition, engine.list_tasks(partition)?)],
                None => engine.all_tasks()?,
            };
            if json {
                let entries: Vec<TaskEntry> = partitions
                    .iter()
                    .flat_map(|(partition, tasks)| {
                        tasks.iter().map(move |task| TaskEntry {
                            partition: *partition,
                            task,
                        })
                    })
                    .collect();
                println!("{}", serde_json::to_string_pretty(&entries)?);
            } else {
                for (partition, tasks) in &partitions {
                    for task in tasks {
                        println!("{}", render_task_line(task, *partition));
                    }
                }
            }
        }
        Command::Claim { id, claimant, json } => {
            let task = engine.claim_task(&id, &claimant)?;
            print_task(&task, Partition::InProgress, json)?;
        }
        Command::Complete { id, json } => {
            let task = engine.complete_task(&id)?;
            print_task(&task, Partition::Done, json)?;
        }
        Command::Move {
            id,
            from,
            to,
            status,
            json,
        } => {
            let status = status.unwrap_or_else(|| to.status());
            let task = engine.move_task(&id, from, to, status)?;
            print_task(&task, to, json)?;
        }
        Command::Decompose { id, titles, json } => {
            let task = engine.decompose_task(&id, &titles)?;
            let partition = task.status.partition();
            print_task(&task, partition, json)?;
        }
        Command::Subtask {
            parent,
            subtask,
            status,
            assignee,
            json,
        } => {
            let task = engine.set_subtask_status(&parent, &subtask, status, assignee.as_deref())?;
            let partition = task.status.partition();
            print_task(&task, partition, json)?;
        }
        Command::Next { json } => match engine.next_claimable()? {
            Some(task) => print_task(&task, Partition::Backlog, json)?,
            None if json => println!("null"),
            None => println!("No claimable tasks"),
        },
        Command::Status { json } => {
            let summary = status_summary(engine)?;
            if json {
                println!("{}", serde_json::to_string_pretty(&summary)?);
            } else {
                println!("backlog: {}", summary.backlog);
                println!("in-progress: {}", summary.in_progress);
                println!("done: {}", summary.done);
                println!("total: {} ({:.0}% done)", summary.total, summary.percent_done);
            }
        }
        Command::Check { json } => {
            let report = check_store(engine)?;
            if json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                for err in &report.errors {
                    println!("ERROR: {}", err);
                }
                for warn in &report.warnings {
                    println!("WARN: {}", warn);
                }
                if report.errors.is_empty() && report.warnings.is_empty() {
                    println!("OK");
                }
            }
            if !report.is_clean() {
                std::process::exit(1);
            }
        }
        Command::Repair { json } => {
            let recovery = engine.repair()?;
            if json {
                println!("{}", serde_json::to_string_pretty(&recovery)?);
            } else if recovery.is_empty() {
                println!("Nothing to repair");
            } else {
                for repair in &recovery.repaired {
                    println!(
                        "{}: kept {} copy, removed {} copy",
                        repair.id, repair.kept, repair.dropped
                    );
                }
                for divergence in &recovery.diverged {
                    let copies: Vec<&str> =
                        divergence.copies.iter().map(|partition| partition.as_str()).collect();
                    println!(
                        "{}: copies in {} differ, merge them by hand",
                        divergence.id,
                        copies.join(", ")
                    );
                }
            }
            if !recovery.diverged.is_empty() {
                std::process::exit(1);
            }
        }
    }
    Ok(())
}

fn init(engine: &TaskEngine, resolution: &TaskRootResolution) -> Result<()> {
    let store = engine.store();
    std::fs::create_dir_all(store.root())
        .with_context(|| format!("create task root {}", store.root().display()))?;
    let _lock = store.lock(LockMode::Exclusive)?;
    for partition in Partition::ALL {
        if !store.partition_path(partition).exists() {
            store.save_tasks(partition, &[])?;
        }
    }
    let config_file = config_path(&resolution.project_root);
    if !config_file.exists() {
        let config = AgenticConfig {
            tasks_dir: Some(relative_tasks_dir(&resolution.project_root, store.root())),
            ..AgenticConfig::default()
        };
        write_config(&resolution.project_root, &config)?;
        println!("Wrote {}", config_file.display());
    }
    println!("Task root: {}", store.root().display());
    Ok(())
}

fn relative_tasks_dir(project_root: &Path, task_root: &Path) -> String {
    task_root
        .strip_prefix(project_root)
        .map(|path| path.to_string_lossy().replace('\\', "/"))
        .unwrap_or_else(|_| DEFAULT_TASKS_DIR.to_string())
}

#[derive(Serialize)]
struct TaskEntry<'a> {
    partition: Partition,
    #[serde(flatten)]
    task: &'a Task,
}

fn print_task(task: &Task, partition: Partition, json: bool) -> Result<()> {
    if json {
        let entry = TaskEntry { partition, task };
        println!("{}", serde_json::to_string_pretty(&entry)?);
        return Ok(());
    }
    println!("{}", render_task_line(task, partition));
    if let Some(description) = &task.description {
        println!("  {}", description);
    }
    for sub in &task.subtasks {
        println!("  - {} [{}] {}", sub.id, sub.status.as_str(), sub.title);
    }
    Ok(())
}

fn render_task_line(task: &Task, partition: Partition) -> String {
    let assignee = task.assigned_to.as_deref().unwrap_or("-");
    format!(
        "{} | {} | {} | {} | {}",
        task.id,
        partition,
        task.status.as_str(),
        assignee,
        task.title
    )
}

fn parse_partition(value: &str) -> Result<Partition, String> {
    Partition::parse(value)
        .ok_or_else(|| format!("unknown partition '{}' (backlog, in-progress, done)", value))
}

fn parse_status(value: &str) -> Result<TaskStatus, String> {
    TaskStatus::parse(value)
        .ok_or_else(|| format!("unknown status '{}' (pending, in_progress, done)", value))
}
