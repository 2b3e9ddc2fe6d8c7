mod run;
mod status;
mod task;

pub use run::{Run, RunDirs};
pub use status::{RunStatus, TaskStatus};
pub use task::TaskInstance;
