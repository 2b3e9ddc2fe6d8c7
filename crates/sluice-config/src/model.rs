use serde::de::Error as DeError;
use serde::{Deserialize, Deserializer};
use std::path::{Path, PathBuf};
use std::time::Duration as StdDuration;

/// Artifact subdirectories a run may keep after completion.
pub const VALID_ARTIFACTS: [&str; 3] = ["logs", "project", "data"];

/// Default ODBC driver written into generated dbt profiles.
pub const DEFAULT_DBT_DRIVER: &str = "ODBC Driver 18 for SQL Server";

pub fn default_keep_artifacts() -> Vec<String> {
    VALID_ARTIFACTS.iter().map(|s| s.to_string()).collect()
}

/// Wraps [`std::time::Duration`] for TOML deserialisation from humantime
/// strings such as `"30s"` or `"5m"`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Duration(pub StdDuration);

impl Duration {
    pub fn as_std(self) -> StdDuration {
        self.0
    }

    pub fn is_zero(self) -> bool {
        self.0.is_zero()
    }
}

impl<'de> Deserialize<'de> for Duration {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        humantime::parse_duration(&raw)
            .map(Duration)
            .map_err(|e| D::Error::custom(format!("invalid duration {raw:?}: {e}")))
    }
}

/// Top-level structure parsed from a project's `sluice.toml`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ProjectConfig {
    #[serde(default)]
    pub dag: DagConfig,
    #[serde(default)]
    pub tasks: Vec<TaskConfig>,
    #[serde(skip)]
    pub(crate) path: PathBuf,
}

impl ProjectConfig {
    /// Filesystem path this config was loaded from.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Directory containing the config file, i.e. the project root.
    pub fn dir(&self) -> &Path {
        self.path.parent().unwrap_or(Path::new("."))
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct DagConfig {
    #[serde(default)]
    pub name: String,
    pub schedule: Option<String>,
    pub overlap: Option<String>,
    pub timeout: Option<Duration>,
    #[serde(default)]
    pub keep_artifacts: Vec<String>,
    #[serde(default)]
    pub sql: SqlConfig,
    pub ftp_watch: Option<FtpWatchConfig>,
    pub dbt: Option<DbtConfig>,
}

impl DagConfig {
    /// Overlap policy with the documented default applied.
    pub fn overlap_policy(&self) -> &str {
        self.overlap.as_deref().filter(|s| !s.is_empty()).unwrap_or("allow")
    }
}

/// Default SQL connection (secret key) for a project's `.sql` tasks.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SqlConfig {
    pub connection: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TaskConfig {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub script: String,
    pub runner: Option<String>,
    #[serde(default)]
    pub depends_on: Vec<String>,
    pub timeout: Option<Duration>,
    #[serde(default)]
    pub retries: u32,
    pub retry_delay: Option<Duration>,
}

/// FTP file-arrival trigger configuration for a DAG.
///
/// Credentials come either from the structured secret named in `secret`
/// (preferred) or from the legacy `host`/`user` fields plus a plain
/// `password_secret`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct FtpWatchConfig {
    #[serde(default)]
    pub host: String,
    pub port: Option<u16>,
    #[serde(default)]
    pub user: String,
    #[serde(default)]
    pub password_secret: String,
    pub secret: Option<String>,
    #[serde(default)]
    pub tls: bool,
    #[serde(default)]
    pub directory: String,
    #[serde(default)]
    pub pattern: String,
    pub archive_dir: Option<String>,
    pub poll_interval: Option<Duration>,
    pub stable_seconds: Option<u64>,
}

impl FtpWatchConfig {
    pub fn port(&self) -> u16 {
        self.port.unwrap_or(21)
    }

    pub fn poll_interval(&self) -> StdDuration {
        self.poll_interval
            .map(Duration::as_std)
            .unwrap_or(StdDuration::from_secs(30))
    }

    pub fn stable_threshold(&self) -> StdDuration {
        StdDuration::from_secs(self.stable_seconds.unwrap_or(30))
    }
}

/// dbt project configuration for a DAG.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct DbtConfig {
    /// dbt-core version, e.g. "1.9.1".
    #[serde(default)]
    pub version: String,
    /// Adapter pip package, e.g. "dbt-sqlserver".
    #[serde(default)]
    pub adapter: String,
    #[serde(default)]
    pub extra_deps: Vec<String>,
    /// Relative path to the dbt project root within the project tree.
    #[serde(default)]
    pub project_dir: String,
    /// Profile name (default: DAG name).
    pub profile: Option<String>,
    /// Target name (default: "prod").
    pub target: Option<String>,
    /// Structured secret holding the connection fields.
    pub connection: Option<String>,
    pub threads: Option<String>,
}

/// Workspace-level settings from `sluice_config.toml` at the workspace root.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct WorkspaceConfig {
    pub secrets_dir: Option<PathBuf>,
    pub runs_dir: Option<PathBuf>,
    pub dbt_driver: Option<String>,
    pub keep_artifacts: Option<Vec<String>>,
}
