use std::fs::{self, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use ulid::Ulid;

use crate::task::Partition;

#[derive(Debug, Error)]
pub enum AuditError {
    #[error("Failed to write audit log: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to serialize audit event: {0}")]
    Serialize(#[from] serde_json::Error),
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AuditEvent {
    pub event_id: String,
    pub timestamp: String,
    pub action: String,
    pub task_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub actor: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from: Option<Partition>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub to: Option<Partition>,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub details: Value,
}

impl AuditEvent {
    pub fn new(action: &str, task_id: &str) -> Self {
        Self {
            event_id: Ulid::new().to_string(),
            timestamp: Utc::now().to_rfc3339(),
            action: action.to_string(),
            task_id: task_id.to_string(),
            actor: None,
            from: None,
            to: None,
            details: Value::Null,
        }
    }

    pub fn actor(mut self, actor: &str) -> Self {
        self.actor = Some(actor.to_string());
        self
    }

    pub fn between(mut self, from: Option<Partition>, to: Option<Partition>) -> Self {
        self.from = from;
        self.to = to;
        self
    }

    pub fn details(mut self, details: Value) -> Self {
        self.details = details;
        self
    }
}

pub fn audit_log_path(task_root: &Path) -> PathBuf {
    task_root.join(".audit.log")
}

pub fn append_audit_event(task_root: &Path, event: &AuditEvent) -> Result<(), AuditError> {
    fs::create_dir_all(task_root)?;
    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(audit_log_path(task_root))?;
    let line = serde_json::to_string(event)?;
    writeln!(file, "{}", line)?;
    Ok(())
}

/// Reads every event recorded so far; malformed lines are skipped.
pub fn read_audit_events(task_root: &Path) -> Result<Vec<AuditEvent>, AuditError> {
    let path = audit_log_path(task_root);
    if !path.exists() {
        return Ok(Vec::new());
    }
    let reader = BufReader::new(fs::File::open(path)?);
    let mut events = Vec::new();
    for line in reader.lines() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        if let Ok(event) = serde_json::from_str::<AuditEvent>(&line) {
            events.push(event);
        }
    }
    Ok(events)
}
