use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};

pub const TASK_ID_PREFIX: &str = "TASK-";

const SEQ_PER_MILLI: u64 = 1000;

static GENERATOR: IdGenerator = IdGenerator::new();

/// Issues task IDs of the form `TASK-<YYYYMMDDHHMMSSmmm><nnn>`.
///
/// The numeric part is a millisecond timestamp followed by a three digit
/// sequence. Each issued value is strictly greater than the previous one, so
/// bursts inside the same millisecond borrow from the following milliseconds
/// instead of colliding.
#[derive(Debug)]
pub struct IdGenerator {
    last: AtomicU64,
}

impl IdGenerator {
    pub const fn new() -> Self {
        Self {
            last: AtomicU64::new(0),
        }
    }

    pub fn next_id(&self) -> String {
        self.next_id_at(Utc::now())
    }

    pub fn next_id_at(&self, now: DateTime<Utc>) -> String {
        let floor = (now.timestamp_millis().max(0) as u64) * SEQ_PER_MILLI;
        let mut current = self.last.load(Ordering::Relaxed);
        loop {
            let candidate = floor.max(current + 1);
            match self.last.compare_exchange_weak(
                current,
                candidate,
                Ordering::AcqRel,
                Ordering::Relaxed,
            ) {
                Ok(_) => return format_id(candidate),
                Err(observed) => current = observed,
            }
        }
    }
}

impl Default for IdGenerator {
    fn default() -> Self {
        Self::new()
    }
}

/// Next ID from the process-wide generator.
pub fn new_id() -> String {
    GENERATOR.next_id()
}

/// Next ID from the process-wide generator that is not in `used`.
pub fn new_unique_id(used: &HashSet<String>) -> String {
    loop {
        let candidate = new_id();
        if !used.contains(&candidate) {
            return candidate;
        }
    }
}

fn format_id(value: u64) -> String {
    let millis = (value / SEQ_PER_MILLI) as i64;
    let seq = value % SEQ_PER_MILLI;
    let stamp = DateTime::<Utc>::from_timestamp_millis(millis)
        .map(|at| at.format("%Y%m%d%H%M%S%3f").to_string())
        .unwrap_or_else(|| format!("{:017}", millis));
    format!("{}{}{:03}", TASK_ID_PREFIX, stamp, seq)
}

pub fn subtask_id(parent_id: &str, seq: u32) -> String {
    format!("{}.{}", parent_id, seq)
}

/// Sequence number of `subtask_id` when it is derived from `parent_id`.
pub fn subtask_seq(parent_id: &str, subtask_id: &str) -> Option<u32> {
    subtask_id
        .strip_prefix(parent_id)?
        .strip_prefix('.')?
        .parse::<u32>()
        .ok()
}
