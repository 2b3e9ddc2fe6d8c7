use crate::errors::RunnerError;
use sluice_core::paths::is_within;
use sluice_secrets::SecretStore;
use std::path::PathBuf;
use std::sync::Arc;

/// Everything a runner needs to execute one task.
#[derive(Clone)]
pub struct ExecEnv {
    /// Absolute script path inside the snapshot. For dbt tasks this holds the
    /// raw dbt subcommand string instead.
    pub script_path: PathBuf,
    /// Working directory for the task process (`<run>/project`, or the dbt
    /// project subdirectory for dbt tasks).
    pub snapshot_dir: PathBuf,
    /// The original (pre-snapshot) project directory, used as the Python
    /// project root so the virtualenv is resolved from there.
    pub orig_project_dir: PathBuf,
    /// Full process environment: the parent environment plus the PIT_* vars.
    pub env: Vec<(String, String)>,
    pub dag_name: String,
    /// Secret key naming the default SQL connection, if configured.
    pub sql_connection: Option<String>,
    pub secrets: Option<Arc<SecretStore>>,
}

impl ExecEnv {
    /// Checks that the script path is contained within the snapshot
    /// directory, rejecting traversal like `script = "../../etc/passwd"`.
    /// Runs before any process is spawned.
    pub fn validate_script(&self) -> Result<(), RunnerError> {
        if is_within(&self.snapshot_dir, &self.script_path) {
            Ok(())
        } else {
            Err(RunnerError::PathEscape {
                path: self.script_path.clone(),
            })
        }
    }
}
