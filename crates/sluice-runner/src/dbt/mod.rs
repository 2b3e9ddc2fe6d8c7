mod parser;
mod profiles;

pub use profiles::{DbtProfilesInput, ProfilesDir, ProfilesError, generate_profiles};

use crate::env::ExecEnv;
use crate::errors::RunnerError;
use crate::log::TaskLog;
use crate::process::run_streamed;
use crate::Runner;
use async_trait::async_trait;
use parser::DbtLogParser;
use sluice_config::DbtConfig;
use std::path::PathBuf;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;

/// Executes dbt subcommands via `uvx`.
///
/// The task's `script` field holds the dbt subcommand string (for example
/// `"run --select staging"`), not a file path. Structured JSON log output is
/// rewritten into human-readable progress lines by [`DbtLogParser`].
#[derive(Debug)]
pub struct DbtRunner {
    config: DbtConfig,
    profiles_dir: Option<PathBuf>,
}

impl DbtRunner {
    pub fn new(config: DbtConfig, profiles_dir: Option<PathBuf>) -> Self {
        Self {
            config,
            profiles_dir,
        }
    }

    /// The uvx argument list for one dbt invocation.
    pub fn build_args(&self, dbt_command: &str) -> Vec<String> {
        let mut args = vec![
            "--from".to_string(),
            format!("dbt-core=={}", self.config.version),
            "--with".to_string(),
            self.config.adapter.clone(),
        ];
        for dep in &self.config.extra_deps {
            args.push("--with".to_string());
            args.push(dep.clone());
        }
        args.push("dbt".to_string());
        args.extend(dbt_command.split_whitespace().map(String::from));
        args.push("--log-format".to_string());
        args.push("json".to_string());
        args
    }
}

#[async_trait]
impl Runner for DbtRunner {
    async fn run(
        &self,
        cancel: &CancellationToken,
        env: &ExecEnv,
        log: &TaskLog,
    ) -> Result<(), RunnerError> {
        if self.config.version.is_empty() {
            return Err(RunnerError::Dbt("version is required".to_string()));
        }
        if self.config.adapter.is_empty() {
            return Err(RunnerError::Dbt("adapter is required".to_string()));
        }

        let dbt_command = env.script_path.to_string_lossy();
        let args = self.build_args(&dbt_command);

        let mut cmd = Command::new("uvx");
        cmd.args(&args)
            .current_dir(&env.snapshot_dir)
            .env_clear()
            .envs(env.env.iter().map(|(k, v)| (k.as_str(), v.as_str())));
        if let Some(profiles_dir) = &self.profiles_dir {
            cmd.env("DBT_PROFILES_DIR", profiles_dir);
        }
        if !self.config.project_dir.is_empty() {
            cmd.env("DBT_PROJECT_DIR", &self.config.project_dir);
        }

        // stdout carries dbt's JSON event stream; stderr goes to the log
        // untouched.
        let mut parser = DbtLogParser::new(log.clone());
        let err_log = log.clone();
        run_streamed(
            cmd,
            "uvx",
            cancel,
            move |line| parser.handle_line(&line),
            move |line| err_log.write_line(&line),
        )
        .await
    }
}
