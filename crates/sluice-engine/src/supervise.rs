use crate::state::RunCtx;
use chrono::Utc;
use sluice_core::TaskStatus;
use sluice_runner::{
    DbtProfilesInput, DbtRunner, ExecEnv, ProfilesDir, Runner, RunnerError, TaskLog,
    generate_profiles,
};
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio_util::sync::CancellationToken;

/// Runs a single task to a terminal status: resolves its runner, prepares the
/// environment and log writer, and drives the per-attempt retry/timeout
/// protocol. All task mutation happens under the run's lock.
pub(crate) async fn supervise_task(
    ctx: Arc<RunCtx>,
    cancel: CancellationToken,
    idx: usize,
    concurrent: bool,
) {
    ctx.with_task(idx, |t| {
        t.status = TaskStatus::Running;
        t.started_at = Some(Utc::now());
    });

    let task = ctx.task_snapshot(idx);
    let script_path = ctx.dirs.snapshot.join(&task.script);
    let is_dbt = task.runner.as_deref() == Some("dbt");

    // dbt is special-cased: it is built from [dag.dbt] plus a generated
    // profiles directory, which must outlive every attempt.
    let mut _profiles_guard: Option<ProfilesDir> = None;
    let runner: Arc<dyn Runner> = if is_dbt {
        let Some(dbt_cfg) = ctx.dbt.clone() else {
            return fail_task(&ctx, idx, "dbt runner requires [dag.dbt] configuration section");
        };

        let profiles_dir = if let Some(store) = &ctx.secrets {
            let input = DbtProfilesInput {
                dag_name: ctx.dag_name.clone(),
                profile: dbt_cfg.profile.clone(),
                target: dbt_cfg.target.clone(),
                driver: ctx.dbt_driver.clone(),
                threads: dbt_cfg.threads.clone(),
                connection: dbt_cfg.connection.clone(),
            };
            match generate_profiles(&input, store) {
                Ok(dir) => {
                    let path = dir.path().to_path_buf();
                    _profiles_guard = Some(dir);
                    Some(path)
                }
                Err(e) => {
                    return fail_task(&ctx, idx, format!("generating dbt profiles: {e}"));
                }
            }
        } else {
            None
        };

        Arc::new(DbtRunner::new(dbt_cfg, profiles_dir))
    } else {
        match ctx.registry.resolve(task.runner.as_deref(), &script_path) {
            Ok(runner) => runner,
            Err(e) => return fail_task(&ctx, idx, e.to_string()),
        }
    };

    let log_path = ctx.dirs.logs.join(format!("{}.log", task.name));
    let log = match TaskLog::create(&log_path) {
        Ok(log) => log,
        Err(e) => return fail_task(&ctx, idx, format!("creating log file: {e}")),
    };
    let log = if ctx.verbose {
        log.echo_stdout(concurrent.then(|| task.name.clone()))
    } else {
        log
    };

    let mut exec = ExecEnv {
        script_path,
        snapshot_dir: ctx.dirs.snapshot.clone(),
        orig_project_dir: ctx.orig_project_dir.clone(),
        env: task_env(&ctx, &task.name),
        dag_name: ctx.dag_name.clone(),
        sql_connection: ctx.sql_connection.clone(),
        secrets: ctx.secrets.clone(),
    };

    if is_dbt {
        // The script field holds the raw dbt subcommand; the working
        // directory is the dbt project inside the snapshot.
        exec.script_path = PathBuf::from(&task.script);
        if let Some(dbt_cfg) = &ctx.dbt
            && !dbt_cfg.project_dir.is_empty()
        {
            exec.snapshot_dir = ctx.dirs.snapshot.join(&dbt_cfg.project_dir);
        }
    } else if let Err(e) = exec.validate_script() {
        return fail_task(&ctx, idx, e.to_string());
    }

    let max_attempts = task.max_attempts();
    for attempt in 1..=max_attempts {
        if cancel.is_cancelled() {
            return fail_task(&ctx, idx, ctx.cancel_reason.message());
        }

        ctx.with_task(idx, |t| t.attempt = attempt);

        let attempt_cancel = cancel.child_token();
        let timed_out = Arc::new(AtomicBool::new(false));
        let watchdog = (!task.timeout.is_zero()).then(|| {
            let token = attempt_cancel.clone();
            let flag = Arc::clone(&timed_out);
            let timeout = task.timeout;
            tokio::spawn(async move {
                tokio::select! {
                    _ = tokio::time::sleep(timeout) => {
                        flag.store(true, Ordering::Relaxed);
                        token.cancel();
                    }
                    _ = token.cancelled() => {}
                }
            })
        });

        if attempt > 1 {
            log.retry_banner(attempt, max_attempts);
        }

        let result = runner.run(&attempt_cancel, &exec, &log).await;
        attempt_cancel.cancel();
        if let Some(watchdog) = watchdog {
            let _ = watchdog.await;
        }

        match result {
            Ok(()) => {
                ctx.with_task(idx, |t| {
                    t.status = TaskStatus::Success;
                    t.ended_at = Some(Utc::now());
                });
                return;
            }
            Err(err) => {
                let message = match err {
                    RunnerError::Interrupted => {
                        if timed_out.load(Ordering::Relaxed) {
                            format!("attempt timed out after {:?}", task.timeout)
                        } else {
                            ctx.cancel_reason.message().to_string()
                        }
                    }
                    other => other.to_string(),
                };
                ctx.with_task(idx, |t| t.last_error = Some(message));
            }
        }

        if attempt < max_attempts && !task.retry_delay.is_zero() {
            tokio::select! {
                _ = cancel.cancelled() => {
                    return fail_task(&ctx, idx, ctx.cancel_reason.message());
                }
                _ = tokio::time::sleep(task.retry_delay) => {}
            }
        }
    }

    // Attempts exhausted; the last recorded error stands.
    ctx.with_task(idx, |t| {
        t.status = TaskStatus::Failed;
        t.ended_at = Some(Utc::now());
    });
}

fn fail_task(ctx: &RunCtx, idx: usize, message: impl Into<String>) {
    let message = message.into();
    ctx.with_task(idx, |t| {
        t.status = TaskStatus::Failed;
        t.last_error = Some(message);
        t.ended_at = Some(Utc::now());
    });
}

fn task_env(ctx: &RunCtx, task_name: &str) -> Vec<(String, String)> {
    let mut env: Vec<(String, String)> = std::env::vars().collect();
    env.push(("PIT_RUN_ID".to_string(), ctx.id.clone()));
    env.push(("PIT_TASK_NAME".to_string(), task_name.to_string()));
    env.push(("PIT_DAG_NAME".to_string(), ctx.dag_name.clone()));
    env.push(("PIT_SOCKET".to_string(), ctx.socket_addr.clone()));
    env.push((
        "PIT_DATA_DIR".to_string(),
        ctx.dirs.data.display().to_string(),
    ));
    env
}
