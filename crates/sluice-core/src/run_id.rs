use chrono::{Local, NaiveDateTime};

/// Width of the timestamp portion of a run id (`YYYYMMDD_HHMMSS.mmm`).
const TIMESTAMP_WIDTH: usize = 19;

const TIMESTAMP_FORMAT: &str = "%Y%m%d_%H%M%S%.3f";

/// Creates a run id in the format `20240115_143022.123_dag_name`.
/// Millisecond precision reduces collision risk for rapid successive runs.
pub fn generate_run_id(dag_name: &str) -> String {
    let now = Local::now();
    format!("{}_{}", now.format(TIMESTAMP_FORMAT), dag_name)
}

/// Extracts the DAG name from a run id, or `None` if the id is malformed.
pub fn dag_name_from_run_id(run_id: &str) -> Option<&str> {
    if timestamp_from_run_id(run_id).is_none() {
        return None;
    }
    match run_id.as_bytes().get(TIMESTAMP_WIDTH) {
        Some(b'_') => run_id.get(TIMESTAMP_WIDTH + 1..).filter(|s| !s.is_empty()),
        _ => None,
    }
}

/// Extracts the (local, millisecond-precision) timestamp from a run id.
pub fn timestamp_from_run_id(run_id: &str) -> Option<NaiveDateTime> {
    let stamp = run_id.get(..TIMESTAMP_WIDTH)?;
    NaiveDateTime::parse_from_str(stamp, TIMESTAMP_FORMAT).ok()
}
