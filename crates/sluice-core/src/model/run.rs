use crate::model::{RunStatus, TaskInstance};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Filesystem layout of a run: everything lives under a single directory
/// named by the run id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunDirs {
    /// Immutable copy of the project tree (`<run>/project`).
    pub snapshot: PathBuf,
    /// One `<task>.log` file per task (`<run>/logs`).
    pub logs: PathBuf,
    /// Inter-task data plus seeded trigger files (`<run>/data`).
    pub data: PathBuf,
}

impl RunDirs {
    /// The run's root directory (parent of the three subdirectories).
    pub fn root(&self) -> PathBuf {
        self.snapshot
            .parent()
            .map(PathBuf::from)
            .unwrap_or_else(|| self.snapshot.clone())
    }
}

/// The final state of a single DAG execution, as observed by callers once
/// `execute` returns. Task order matches the DAG's declared order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Run {
    pub id: String,
    pub dag_name: String,
    pub dirs: RunDirs,
    pub socket_addr: String,
    pub status: RunStatus,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub tasks: Vec<TaskInstance>,
}

impl Run {
    /// Aggregate status over task outcomes: `Success` unless any task ended
    /// `Failed` or `UpstreamFailed`.
    pub fn aggregate_status(tasks: &[TaskInstance]) -> RunStatus {
        if tasks.iter().any(|t| t.status.blocks_downstream()) {
            RunStatus::Failed
        } else {
            RunStatus::Success
        }
    }
}
