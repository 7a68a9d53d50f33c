//! File-backed task store and state-transition engine for agentic.
//!
//! Tasks live in three YAML partitions (`backlog.yaml`, `in-progress.yaml`,
//! `done.yaml`) under a task root. [`engine::TaskEngine`] is the only
//! component that moves a task between them.

pub mod audit;
pub mod codec;
pub mod config;
pub mod engine;
pub mod error;
pub mod id;
pub mod lock;
pub mod report;
pub mod store;
pub mod task;

pub use engine::{Divergence, Recovery, Repair, TaskEngine, Transition};
pub use error::{NotFoundScope, TaskError, TaskResult};
pub use store::TaskStore;
pub use task::{NewTask, Partition, SubTask, Task, TaskStatus};

pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
