use sluice_core::{Run, TaskStatus};
use std::io::Write;
use std::time::Duration;

/// Writes the end-of-run table: run id, DAG, aggregate status and duration,
/// then one line per task with its status, error, retry indicator and
/// duration. Goes to the caller's terminal, never to a log file.
pub fn write_summary<W: Write>(w: &mut W, run: &Run) -> std::io::Result<()> {
    writeln!(w)?;
    writeln!(w, "── Run {} ──", run.id)?;

    let duration = run
        .ended_at
        .map(|ended| to_millis((ended - run.started_at).to_std().unwrap_or_default()))
        .unwrap_or_default();
    writeln!(
        w,
        "DAG: {}  Status: {}  Duration: {:?}",
        run.dag_name, run.status, duration
    )?;
    writeln!(w)?;

    for task in &run.tasks {
        let mut line = format!("  {:<20} {}", task.name, task.status);

        if task.status == TaskStatus::Failed
            && let Some(error) = &task.last_error
        {
            line.push_str(&format!("  ({error})"));
        }
        if task.attempt > 1 {
            line.push_str(&format!("  [attempt {}/{}]", task.attempt, task.max_attempts()));
        }
        if let (Some(started), Some(ended)) = (task.started_at, task.ended_at) {
            let elapsed = to_millis((ended - started).to_std().unwrap_or_default());
            line.push_str(&format!("  {elapsed:?}"));
        }

        writeln!(w, "{line}")?;
    }
    writeln!(w)
}

fn to_millis(d: Duration) -> Duration {
    Duration::from_millis(d.as_millis() as u64)
}
