mod executor;
mod handlers;
mod snapshot;
mod state;
mod summary;
mod supervise;

pub use executor::{EngineError, ExecuteOpts, execute};
pub use snapshot::{SnapshotError, cleanup_artifacts, seed_data_dir, snapshot};
pub use summary::write_summary;
