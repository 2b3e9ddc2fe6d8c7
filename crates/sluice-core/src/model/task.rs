use crate::model::TaskStatus;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// A task's mutable state within a single run.
///
/// Instances only exist inside a [`Run`](crate::model::Run); the executor and
/// task supervisors mutate status, attempt, timestamps and the error field
/// under the run's lock.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskInstance {
    pub name: String,
    pub script: String,
    pub runner: Option<String>,
    pub depends_on: Vec<String>,
    pub status: TaskStatus,
    pub attempt: u32,
    pub max_retries: u32,
    pub retry_delay: Duration,
    pub timeout: Duration,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
}

impl TaskInstance {
    pub fn new(name: impl Into<String>, script: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            script: script.into(),
            runner: None,
            depends_on: Vec::new(),
            status: TaskStatus::Pending,
            attempt: 0,
            max_retries: 0,
            retry_delay: Duration::ZERO,
            timeout: Duration::ZERO,
            started_at: None,
            ended_at: None,
            last_error: None,
        }
    }

    /// Total attempts this task may make: the first try plus retries.
    pub fn max_attempts(&self) -> u32 {
        self.max_retries + 1
    }
}
