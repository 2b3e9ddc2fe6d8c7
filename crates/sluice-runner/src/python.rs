use crate::env::ExecEnv;
use crate::errors::RunnerError;
use crate::log::TaskLog;
use crate::process::run_logged;
use crate::Runner;
use async_trait::async_trait;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;

/// Executes Python scripts through `uv run`.
///
/// `--project` points at the original project directory so uv resolves the
/// pyproject.toml and virtualenv from there, not from the snapshot; the
/// working directory is the snapshot root.
#[derive(Debug, Default)]
pub struct PythonRunner;

#[async_trait]
impl Runner for PythonRunner {
    async fn run(
        &self,
        cancel: &CancellationToken,
        env: &ExecEnv,
        log: &TaskLog,
    ) -> Result<(), RunnerError> {
        let mut cmd = Command::new("uv");
        cmd.arg("run")
            .arg("--project")
            .arg(&env.orig_project_dir)
            .arg(&env.script_path)
            .current_dir(&env.snapshot_dir)
            .env_clear()
            .envs(env.env.iter().map(|(k, v)| (k.as_str(), v.as_str())));
        run_logged(cmd, "uv", cancel, log).await
    }
}
