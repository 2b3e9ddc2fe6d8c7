use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RunnerError {
    #[error("spawning {program:?}: {source}")]
    Spawn {
        program: String,
        source: std::io::Error,
    },
    #[error("{program} exited with status {code}")]
    NonZeroExit { program: String, code: i32 },
    #[error("{program} terminated by signal")]
    Signalled { program: String },
    #[error("attempt interrupted")]
    Interrupted,
    #[error("script path {path:?} escapes snapshot directory")]
    PathEscape { path: PathBuf },
    #[error("custom runner: command {command:?} not found on PATH")]
    CommandNotFound { command: String },
    #[error("reading {path:?}: {source}")]
    ReadScript {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("resolving connection {key:?}: {source}")]
    ResolveConnection {
        key: String,
        source: sluice_secrets::SecretError,
    },
    #[error("sql runner: {0}")]
    Sql(#[from] sluice_db::DbError),
    #[error("dbt runner: {0}")]
    Dbt(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ResolveError {
    #[error("custom runner command is empty")]
    EmptyCustomCommand,
    #[error("dbt runner is not resolvable by label; it is constructed from the [dag.dbt] config section")]
    DbtByLabel,
    #[error("unknown runner {0:?} (use python, bash, sql, or $ <command>)")]
    UnknownRunner(String),
    #[error(
        "unsupported script extension {0:?} — set runner explicitly (python, bash, sql, or $ <command>)"
    )]
    UnknownExtension(String),
}
