use crate::env::ExecEnv;
use crate::errors::RunnerError;
use crate::log::TaskLog;
use crate::process::run_logged;
use crate::Runner;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::process::Command;
use tokio_util::sync::CancellationToken;

/// Executes scripts with a user-supplied command prefix (the `"$ <command>"`
/// runner form). The prefix is whitespace-tokenized and the script path is
/// appended as the final argument.
///
/// This is a trust boundary: the command comes straight from the project's
/// config and runs without sandboxing.
#[derive(Debug, Clone)]
pub struct CustomRunner {
    pub command: String,
}

#[async_trait]
impl Runner for CustomRunner {
    async fn run(
        &self,
        cancel: &CancellationToken,
        env: &ExecEnv,
        log: &TaskLog,
    ) -> Result<(), RunnerError> {
        let mut parts = self.command.split_whitespace();
        let program = parts.next().ok_or(RunnerError::CommandNotFound {
            command: self.command.clone(),
        })?;

        // Resolve the binary up front for a clearer error than spawn's ENOENT.
        if lookup_path(program).is_none() {
            return Err(RunnerError::CommandNotFound {
                command: program.to_string(),
            });
        }

        let mut cmd = Command::new(program);
        cmd.args(parts)
            .arg(&env.script_path)
            .current_dir(&env.snapshot_dir)
            .env_clear()
            .envs(env.env.iter().map(|(k, v)| (k.as_str(), v.as_str())));
        run_logged(cmd, program, cancel, log).await
    }
}

/// Resolves a program name against PATH; names containing a separator are
/// checked directly.
fn lookup_path(program: &str) -> Option<PathBuf> {
    let candidate = Path::new(program);
    if program.contains(std::path::MAIN_SEPARATOR) || program.contains('/') {
        return is_executable(candidate).then(|| candidate.to_path_buf());
    }

    let path_var = std::env::var_os("PATH")?;
    std::env::split_paths(&path_var)
        .map(|dir| dir.join(program))
        .find(|candidate| is_executable(candidate))
}

#[cfg(unix)]
fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    path.metadata()
        .map(|m| m.is_file() && m.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

#[cfg(not(unix))]
fn is_executable(path: &Path) -> bool {
    path.is_file()
}
