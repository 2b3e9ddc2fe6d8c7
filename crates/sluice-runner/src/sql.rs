use crate::env::ExecEnv;
use crate::errors::RunnerError;
use crate::log::TaskLog;
use crate::Runner;
use async_trait::async_trait;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

/// Executes `.sql` files against a database connection resolved from the
/// secrets store.
///
/// Without a store or a configured connection key it falls back to a stub
/// that writes the file contents to the log and succeeds, so projects can be
/// dry-run before credentials exist.
#[derive(Debug, Default)]
pub struct SqlRunner;

#[async_trait]
impl Runner for SqlRunner {
    async fn run(
        &self,
        cancel: &CancellationToken,
        env: &ExecEnv,
        log: &TaskLog,
    ) -> Result<(), RunnerError> {
        if cancel.is_cancelled() {
            return Err(RunnerError::Interrupted);
        }

        let Some((store, conn_key)) = env.secrets.as_ref().zip(env.sql_connection.as_deref())
        else {
            return self.run_stub(env, log);
        };

        let conn_str = store.resolve(&env.dag_name, conn_key).map_err(|source| {
            RunnerError::ResolveConnection {
                key: conn_key.to_string(),
                source,
            }
        })?;
        sluice_db::detect_driver(&conn_str)?;

        let content =
            std::fs::read_to_string(&env.script_path).map_err(|source| RunnerError::ReadScript {
                path: env.script_path.clone(),
                source,
            })?;

        let start = Instant::now();
        let rows = tokio::select! {
            result = sluice_db::execute_batch(&conn_str, &content) => result?,
            _ = cancel.cancelled() => return Err(RunnerError::Interrupted),
        };
        let elapsed = Duration::from_millis(start.elapsed().as_millis() as u64);

        log.write_line(&format!(
            "[sql] {} executed in {:?} ({rows} rows affected)",
            env.script_path.display(),
            elapsed,
        ));
        Ok(())
    }
}

impl SqlRunner {
    fn run_stub(&self, env: &ExecEnv, log: &TaskLog) -> Result<(), RunnerError> {
        let content =
            std::fs::read_to_string(&env.script_path).map_err(|source| RunnerError::ReadScript {
                path: env.script_path.clone(),
                source,
            })?;

        log.write_line("[sql-stub] would execute against configured connection:");
        log.write_line(&format!("--- {} ---", env.script_path.display()));
        for line in content.lines() {
            log.write_line(line);
        }
        log.write_line("--- end ---");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::log::MemorySink;
    use sluice_secrets::SecretStore;
    use std::sync::Arc;

    fn env_for(dir: &tempfile::TempDir, connection: Option<&str>, secrets: Option<SecretStore>) -> ExecEnv {
        ExecEnv {
            script_path: dir.path().join("query.sql"),
            snapshot_dir: dir.path().to_path_buf(),
            orig_project_dir: dir.path().to_path_buf(),
            env: Vec::new(),
            dag_name: "claims".to_string(),
            sql_connection: connection.map(String::from),
            secrets: secrets.map(Arc::new),
        }
    }

    #[tokio::test]
    async fn stub_logs_file_contents_and_succeeds() {
        let dir = tempfile::tempdir().expect("tempdir");
        std::fs::write(dir.path().join("query.sql"), "SELECT 1;\nSELECT 2;\n")
            .expect("write script");

        let sink = MemorySink::default();
        let log = TaskLog::to_sink(Box::new(sink.clone()));
        SqlRunner
            .run(&CancellationToken::new(), &env_for(&dir, None, None), &log)
            .await
            .expect("stub run");

        let contents = sink.contents();
        assert!(contents.starts_with("[sql-stub] would execute"));
        assert!(contents.contains("SELECT 1;"));
        assert!(contents.contains("--- end ---"));
    }

    #[tokio::test]
    async fn unresolvable_connection_is_an_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        std::fs::write(dir.path().join("query.sql"), "SELECT 1;").expect("write script");

        let store = SecretStore::parse("[claims]\n", "secrets.toml").expect("parse");
        let log = TaskLog::to_sink(Box::new(MemorySink::default()));
        let err = SqlRunner
            .run(
                &CancellationToken::new(),
                &env_for(&dir, Some("warehouse"), Some(store)),
                &log,
            )
            .await
            .expect_err("missing secret");
        assert!(matches!(err, RunnerError::ResolveConnection { .. }));
    }

    #[tokio::test]
    async fn unknown_driver_scheme_is_an_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        std::fs::write(dir.path().join("query.sql"), "SELECT 1;").expect("write script");

        let store = SecretStore::parse("[claims]\nwarehouse = \"postgres://x\"\n", "secrets.toml")
            .expect("parse");
        let log = TaskLog::to_sink(Box::new(MemorySink::default()));
        let err = SqlRunner
            .run(
                &CancellationToken::new(),
                &env_for(&dir, Some("warehouse"), Some(store)),
                &log,
            )
            .await
            .expect_err("bad scheme");
        assert!(matches!(err, RunnerError::Sql(_)));
    }

    #[tokio::test]
    async fn already_cancelled_attempt_is_interrupted() {
        let dir = tempfile::tempdir().expect("tempdir");
        let cancel = CancellationToken::new();
        cancel.cancel();

        let log = TaskLog::to_sink(Box::new(MemorySink::default()));
        let err = SqlRunner
            .run(&cancel, &env_for(&dir, None, None), &log)
            .await
            .expect_err("interrupted");
        assert!(matches!(err, RunnerError::Interrupted));
    }
}
