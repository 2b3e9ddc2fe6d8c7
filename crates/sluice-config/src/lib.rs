pub mod loader;
pub mod model;
pub mod validate;

pub use loader::{LoadError, discover, load, load_workspace};
pub use model::{
    DEFAULT_DBT_DRIVER, DagConfig, DbtConfig, Duration, FtpWatchConfig, ProjectConfig, SqlConfig,
    TaskConfig, VALID_ARTIFACTS, WorkspaceConfig, default_keep_artifacts,
};
pub use validate::{ValidationIssue, parse_schedule, validate, validate_all};
