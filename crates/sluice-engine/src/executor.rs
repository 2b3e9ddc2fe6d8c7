use crate::handlers::register_run_handlers;
use crate::snapshot::{SnapshotError, cleanup_artifacts, seed_data_dir, snapshot};
use crate::state::RunCtx;
use crate::summary::write_summary;
use crate::supervise::supervise_task;
use chrono::Utc;
use sluice_config::ProjectConfig;
use sluice_core::{DagError, Run, TaskInstance, TaskNode, TaskStatus, generate_run_id, level_groups};
use sluice_ftp::{FtpConnector, Remote};
use sluice_rpc::RpcServer;
use sluice_secrets::{SecretError, SecretStore};
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use thiserror::Error;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::warn;

/// Distinguishes concurrent runs hosted by one scheduler process; the pid
/// alone is not enough for the socket path.
static SOCKET_SEQ: AtomicU64 = AtomicU64::new(0);

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("snapshot: {0}")]
    Snapshot(#[from] SnapshotError),
    #[error("loading secrets: {0}")]
    Secrets(#[from] SecretError),
    #[error("starting rpc service: {0}")]
    Rpc(std::io::Error),
    #[error(transparent)]
    Dag(#[from] DagError),
    #[error("task {task:?} not found in DAG {dag:?}")]
    TaskNotFound { task: String, dag: String },
}

/// Configures a DAG execution.
#[derive(Default)]
pub struct ExecuteOpts {
    /// Directory for run snapshots (default: "runs").
    pub runs_dir: Option<PathBuf>,
    /// If set, only run this single task.
    pub task_name: Option<String>,
    /// Stream task output to the terminal.
    pub verbose: bool,
    /// Max parallel tasks (0 = unbounded).
    pub concurrency: usize,
    /// Path to the secrets file (optional).
    pub secrets_path: Option<PathBuf>,
    /// If set, copy its contents into the data dir before execution.
    pub data_seed_dir: Option<PathBuf>,
    /// ODBC driver for generated dbt profiles.
    pub dbt_driver: Option<String>,
    /// Which run subdirs to keep after completion (empty = all).
    pub keep_artifacts: Vec<String>,
    /// Remote-directory connector for the ftp_* RPC handlers.
    pub remote: Option<Arc<dyn Remote>>,
}

/// Runs a DAG to completion and returns the final run state.
pub async fn execute(
    cancel: &CancellationToken,
    cfg: &ProjectConfig,
    opts: ExecuteOpts,
) -> Result<Run, EngineError> {
    let dag_name = cfg.dag.name.clone();
    let run_id = generate_run_id(&dag_name);

    let runs_dir = opts.runs_dir.clone().unwrap_or_else(|| PathBuf::from("runs"));
    let dirs = snapshot(cfg.dir(), &runs_dir, &run_id)?;

    if let Some(seed_dir) = &opts.data_seed_dir {
        seed_data_dir(seed_dir, &dirs.data)?;
    }

    let secrets = match &opts.secrets_path {
        Some(path) => Some(Arc::new(SecretStore::load(path)?)),
        None => None,
    };

    // The RPC service must be listening before any task process starts.
    let socket_hint = std::env::temp_dir().join(format!(
        "sluice-{}-{}.sock",
        std::process::id(),
        SOCKET_SEQ.fetch_add(1, Ordering::Relaxed),
    ));
    let mut server =
        RpcServer::bind(&socket_hint, secrets.clone(), &dag_name).map_err(EngineError::Rpc)?;
    let remote = opts
        .remote
        .clone()
        .unwrap_or_else(|| Arc::new(FtpConnector));
    register_run_handlers(&mut server, secrets.clone(), &dag_name, &dirs.data, remote);
    let socket_addr = server.addr().to_string();
    let rpc = server.start(CancellationToken::new());

    let tasks: Vec<TaskInstance> = cfg
        .tasks
        .iter()
        .map(|tc| {
            let mut task = TaskInstance::new(&tc.name, &tc.script);
            task.runner = tc.runner.clone();
            task.depends_on = tc.depends_on.clone();
            task.max_retries = tc.retries;
            task.retry_delay = tc.retry_delay.map(|d| d.as_std()).unwrap_or_default();
            task.timeout = tc.timeout.map(|d| d.as_std()).unwrap_or_default();
            task
        })
        .collect();

    let ctx = Arc::new(RunCtx::new(
        run_id,
        dag_name.clone(),
        dirs,
        socket_addr,
        secrets,
        cfg.dir().to_path_buf(),
        cfg.dag.sql.connection.clone(),
        cfg.dag.dbt.clone(),
        opts.dbt_driver.clone(),
        opts.verbose,
        tasks,
    ));

    // Run-level timeout becomes a deadline on the cancellation token.
    let run_cancel = cancel.child_token();
    let deadline_watch = cfg.dag.timeout.filter(|t| !t.is_zero()).map(|timeout| {
        let token = run_cancel.clone();
        let ctx = Arc::clone(&ctx);
        tokio::spawn(async move {
            tokio::select! {
                _ = tokio::time::sleep(timeout.as_std()) => {
                    ctx.cancel_reason.mark_deadline();
                    token.cancel();
                }
                _ = token.cancelled() => {}
            }
        })
    });

    let result = run_tasks(&ctx, &run_cancel, &opts).await;

    run_cancel.cancel();
    if let Some(watch) = deadline_watch {
        let _ = watch.await;
    }

    let tasks = ctx.tasks_clone();
    let status = Run::aggregate_status(&tasks);
    let run = Run {
        id: ctx.id.clone(),
        dag_name: ctx.dag_name.clone(),
        dirs: ctx.dirs.clone(),
        socket_addr: ctx.socket_addr.clone(),
        status,
        started_at: ctx.started_at,
        ended_at: Some(Utc::now()),
        tasks,
    };

    if let Err(e) = result {
        rpc.shutdown().await;
        return Err(e);
    }

    {
        let mut stdout = std::io::stdout();
        let _ = write_summary(&mut stdout, &run);
    }

    rpc.shutdown().await;

    if !opts.keep_artifacts.is_empty()
        && let Err(e) = cleanup_artifacts(&run.dirs.root(), &opts.keep_artifacts)
    {
        warn!(run = %run.id, error = %e, "artifact cleanup failed");
    }

    Ok(run)
}

async fn run_tasks(
    ctx: &Arc<RunCtx>,
    run_cancel: &CancellationToken,
    opts: &ExecuteOpts,
) -> Result<(), EngineError> {
    let tasks = ctx.tasks_clone();

    // Single-task mode: mark everything else skipped and supervise just the
    // selected task; the DAG walk is bypassed entirely.
    if let Some(selected) = &opts.task_name {
        let Some(selected_idx) = tasks.iter().position(|t| &t.name == selected) else {
            return Err(EngineError::TaskNotFound {
                task: selected.clone(),
                dag: ctx.dag_name.clone(),
            });
        };

        for (idx, task) in tasks.iter().enumerate() {
            if idx != selected_idx {
                ctx.with_task(idx, |t| t.status = TaskStatus::Skipped);
            } else if !task.depends_on.is_empty() {
                warn!(
                    task = %task.name,
                    depends_on = ?task.depends_on,
                    "dependencies skipped in single-task mode"
                );
            }
        }

        supervise_task(Arc::clone(ctx), run_cancel.clone(), selected_idx, false).await;
        return Ok(());
    }

    let nodes: Vec<TaskNode<'_>> = tasks
        .iter()
        .map(|t| TaskNode {
            name: &t.name,
            depends_on: &t.depends_on,
        })
        .collect();
    let levels = level_groups(&nodes)?;

    let semaphore =
        (opts.concurrency > 0).then(|| Arc::new(Semaphore::new(opts.concurrency)));

    for level in levels {
        // A cancelled run marks the remaining tasks failed without starting
        // them.
        if run_cancel.is_cancelled() {
            for &idx in &level {
                ctx.with_task(idx, |t| {
                    if t.status == TaskStatus::Pending {
                        t.status = TaskStatus::Failed;
                        t.last_error = Some(ctx.cancel_reason.message().to_string());
                        t.ended_at = Some(Utc::now());
                    }
                });
            }
            continue;
        }

        // One lock acquisition: upstream checks for this whole level use the
        // same snapshot, so failures inside the level never cascade into
        // siblings, only into later levels.
        let status_map = ctx.status_map();
        let concurrent = level.len() > 1;

        let mut join_set = JoinSet::new();
        for &idx in &level {
            let has_failed_upstream = tasks[idx]
                .depends_on
                .iter()
                .any(|dep| status_map.get(dep).is_some_and(|s| s.blocks_downstream()));
            if has_failed_upstream {
                ctx.with_task(idx, |t| {
                    t.status = TaskStatus::UpstreamFailed;
                    t.ended_at = Some(Utc::now());
                });
                continue;
            }

            let ctx = Arc::clone(ctx);
            let cancel = run_cancel.clone();
            let semaphore = semaphore.clone();
            join_set.spawn(async move {
                let _permit = match semaphore {
                    Some(semaphore) => Some(
                        semaphore
                            .acquire_owned()
                            .await
                            .expect("semaphore is never closed"),
                    ),
                    None => None,
                };
                supervise_task(ctx, cancel, idx, concurrent).await;
            });
        }

        // Level barrier: nothing in the next level starts until every task
        // dispatched here has finished.
        while join_set.join_next().await.is_some() {}
    }

    Ok(())
}
