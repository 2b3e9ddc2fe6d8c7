use chrono::{DateTime, Utc};
use sluice_config::DbtConfig;
use sluice_core::{RunDirs, TaskInstance, TaskStatus};
use sluice_runner::RunnerRegistry;
use sluice_secrets::SecretStore;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

/// Why the run-level token fired, for task error messages.
#[derive(Debug, Default)]
pub(crate) struct CancelReason {
    deadline: AtomicBool,
}

impl CancelReason {
    pub(crate) fn mark_deadline(&self) {
        self.deadline.store(true, Ordering::Relaxed);
    }

    pub(crate) fn message(&self) -> &'static str {
        if self.deadline.load(Ordering::Relaxed) {
            "run deadline exceeded"
        } else {
            "run cancelled"
        }
    }
}

/// Shared state of an in-flight run. Task mutation goes through the single
/// lock; it is held only for the duration of a field update, never across
/// task execution.
pub(crate) struct RunCtx {
    pub id: String,
    pub dag_name: String,
    pub dirs: RunDirs,
    pub socket_addr: String,
    pub started_at: DateTime<Utc>,
    pub secrets: Option<Arc<SecretStore>>,
    pub orig_project_dir: PathBuf,
    pub sql_connection: Option<String>,
    pub dbt: Option<DbtConfig>,
    pub dbt_driver: Option<String>,
    pub verbose: bool,
    pub registry: RunnerRegistry,
    pub cancel_reason: CancelReason,
    tasks: Mutex<Vec<TaskInstance>>,
}

impl RunCtx {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        id: String,
        dag_name: String,
        dirs: RunDirs,
        socket_addr: String,
        secrets: Option<Arc<SecretStore>>,
        orig_project_dir: PathBuf,
        sql_connection: Option<String>,
        dbt: Option<DbtConfig>,
        dbt_driver: Option<String>,
        verbose: bool,
        tasks: Vec<TaskInstance>,
    ) -> Self {
        Self {
            id,
            dag_name,
            dirs,
            socket_addr,
            started_at: Utc::now(),
            secrets,
            orig_project_dir,
            sql_connection,
            dbt,
            dbt_driver,
            verbose,
            registry: RunnerRegistry::new(),
            cancel_reason: CancelReason::default(),
            tasks: Mutex::new(tasks),
        }
    }

    pub(crate) fn with_task<R>(&self, idx: usize, f: impl FnOnce(&mut TaskInstance) -> R) -> R {
        let mut tasks = self.tasks.lock().expect("run lock");
        f(&mut tasks[idx])
    }

    pub(crate) fn task_snapshot(&self, idx: usize) -> TaskInstance {
        self.tasks.lock().expect("run lock")[idx].clone()
    }

    /// One lock acquisition for a whole level's upstream checks.
    pub(crate) fn status_map(&self) -> HashMap<String, TaskStatus> {
        self.tasks
            .lock()
            .expect("run lock")
            .iter()
            .map(|t| (t.name.clone(), t.status))
            .collect()
    }

    pub(crate) fn tasks_clone(&self) -> Vec<TaskInstance> {
        self.tasks.lock().expect("run lock").clone()
    }
}
