mod custom;
mod dbt;
mod env;
mod errors;
mod log;
mod process;
mod python;
mod registry;
mod shell;
mod sql;

pub use custom::CustomRunner;
pub use dbt::{DbtProfilesInput, DbtRunner, ProfilesDir, ProfilesError, generate_profiles};
pub use env::ExecEnv;
pub use errors::{ResolveError, RunnerError};
pub use log::{MemorySink, TaskLog};
pub use python::PythonRunner;
pub use registry::RunnerRegistry;
pub use shell::ShellRunner;
pub use sql::SqlRunner;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

/// Executes a single task attempt.
///
/// Implementations must honor `cancel` promptly: a cancelled attempt
/// terminates the underlying process (grace period, then kill) and returns
/// [`RunnerError::Interrupted`]. Combined stdout and stderr go to `log`.
#[async_trait]
pub trait Runner: Send + Sync + std::fmt::Debug {
    async fn run(
        &self,
        cancel: &CancellationToken,
        env: &ExecEnv,
        log: &TaskLog,
    ) -> Result<(), RunnerError>;
}
