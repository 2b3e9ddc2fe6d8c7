use crate::env::ExecEnv;
use crate::errors::RunnerError;
use crate::log::TaskLog;
use crate::process::run_logged;
use crate::Runner;
use async_trait::async_trait;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;

/// Executes scripts with `bash`, working directory at the snapshot root.
#[derive(Debug, Default)]
pub struct ShellRunner;

#[async_trait]
impl Runner for ShellRunner {
    async fn run(
        &self,
        cancel: &CancellationToken,
        env: &ExecEnv,
        log: &TaskLog,
    ) -> Result<(), RunnerError> {
        let mut cmd = Command::new("bash");
        cmd.arg(&env.script_path)
            .current_dir(&env.snapshot_dir)
            .env_clear()
            .envs(env.env.iter().map(|(k, v)| (k.as_str(), v.as_str())));
        run_logged(cmd, "bash", cancel, log).await
    }
}
