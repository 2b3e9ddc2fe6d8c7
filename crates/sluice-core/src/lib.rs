pub mod errors;
pub mod levels;
pub mod model;
pub mod paths;
pub mod run_id;

pub use errors::DagError;
pub use levels::{TaskNode, level_groups};
pub use model::{Run, RunDirs, RunStatus, TaskInstance, TaskStatus};
pub use run_id::{dag_name_from_run_id, generate_run_id, timestamp_from_run_id};
