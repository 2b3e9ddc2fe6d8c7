use sluice_config::{ProjectConfig, load};
use sluice_core::{RunStatus, TaskStatus, dag_name_from_run_id};
use sluice_engine::{EngineError, ExecuteOpts, execute};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

struct Fixture {
    _project: tempfile::TempDir,
    runs: tempfile::TempDir,
    cfg: ProjectConfig,
}

impl Fixture {
    fn new(config_toml: &str, scripts: &[(&str, &str)]) -> Self {
        let project = tempfile::tempdir().expect("project dir");
        for (name, contents) in scripts {
            let path = project.path().join(name);
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent).expect("script dir");
            }
            fs::write(&path, contents).expect("write script");
        }
        fs::write(project.path().join("sluice.toml"), config_toml).expect("write config");

        let cfg = load(project.path().join("sluice.toml")).expect("load config");
        Self {
            _project: project,
            runs: tempfile::tempdir().expect("runs dir"),
            cfg,
        }
    }

    fn opts(&self) -> ExecuteOpts {
        ExecuteOpts {
            runs_dir: Some(self.runs.path().to_path_buf()),
            ..ExecuteOpts::default()
        }
    }

    fn run_dir(&self, run_id: &str) -> PathBuf {
        self.runs.path().canonicalize().expect("runs dir").join(run_id)
    }
}

fn task<'a>(run: &'a sluice_core::Run, name: &str) -> &'a sluice_core::TaskInstance {
    run.tasks
        .iter()
        .find(|t| t.name == name)
        .unwrap_or_else(|| panic!("task {name} missing from run"))
}

#[tokio::test]
async fn linear_chain_succeeds_level_by_level() {
    let fixture = Fixture::new(
        r#"
[dag]
name = "chain"

[[tasks]]
name = "a"
script = "a.sh"

[[tasks]]
name = "b"
script = "b.sh"
depends_on = ["a"]

[[tasks]]
name = "c"
script = "c.sh"
depends_on = ["b"]
"#,
        &[
            ("a.sh", "echo from-a\n"),
            ("b.sh", "echo from-b\n"),
            ("c.sh", "echo from-c\n"),
        ],
    );

    let run = execute(&CancellationToken::new(), &fixture.cfg, fixture.opts())
        .await
        .expect("execute");

    assert_eq!(run.status, RunStatus::Success);
    assert_eq!(run.tasks.len(), 3);
    for name in ["a", "b", "c"] {
        let t = task(&run, name);
        assert_eq!(t.status, TaskStatus::Success, "task {name}");
        assert_eq!(t.attempt, 1);
    }
    assert_eq!(dag_name_from_run_id(&run.id), Some("chain"));

    // Levels impose ordering: b starts only after a ended.
    let a = task(&run, "a");
    let b = task(&run, "b");
    assert!(b.started_at.expect("b started") >= a.ended_at.expect("a ended"));

    // One log file per task, under <run>/logs/<task>.log.
    let log = fs::read_to_string(run.dirs.logs.join("b.log")).expect("read b.log");
    assert_eq!(log, "from-b\n");
    assert!(run.dirs.snapshot.join("a.sh").is_file());
}

#[tokio::test]
async fn middle_failure_cascades_to_downstream_only() {
    let fixture = Fixture::new(
        r#"
[dag]
name = "cascade"

[[tasks]]
name = "a"
script = "ok.sh"

[[tasks]]
name = "b"
script = "fail.sh"
depends_on = ["a"]
retries = 1

[[tasks]]
name = "c"
script = "ok.sh"
depends_on = ["b"]

[[tasks]]
name = "d"
script = "ok.sh"
"#,
        &[("ok.sh", "exit 0\n"), ("fail.sh", "echo boom; exit 1\n")],
    );

    let run = execute(&CancellationToken::new(), &fixture.cfg, fixture.opts())
        .await
        .expect("execute");

    assert_eq!(run.status, RunStatus::Failed);
    assert_eq!(task(&run, "a").status, TaskStatus::Success);

    let b = task(&run, "b");
    assert_eq!(b.status, TaskStatus::Failed);
    assert_eq!(b.attempt, 2, "one retry means two attempts");
    assert!(
        b.last_error.as_deref().is_some_and(|e| e.contains("status 1")),
        "error: {:?}",
        b.last_error
    );

    let c = task(&run, "c");
    assert_eq!(c.status, TaskStatus::UpstreamFailed);
    assert_eq!(c.attempt, 0, "upstream-failed tasks are never dispatched");

    assert_eq!(task(&run, "d").status, TaskStatus::Success);
}

#[tokio::test]
async fn flaky_task_retries_to_success_after_the_delay() {
    let fixture = Fixture::new(
        r#"
[dag]
name = "flaky"

[[tasks]]
name = "sometimes"
script = "sometimes.sh"
retries = 2
retry_delay = "300ms"
"#,
        &[(
            "sometimes.sh",
            "if [ -f \"$PIT_DATA_DIR/marker\" ]; then exit 0; fi\ntouch \"$PIT_DATA_DIR/marker\"\nexit 1\n",
        )],
    );

    let started = Instant::now();
    let run = execute(&CancellationToken::new(), &fixture.cfg, fixture.opts())
        .await
        .expect("execute");

    assert_eq!(run.status, RunStatus::Success);
    let t = task(&run, "sometimes");
    assert_eq!(t.status, TaskStatus::Success);
    assert_eq!(t.attempt, 2);
    assert!(
        started.elapsed() >= Duration::from_millis(300),
        "retry delay must be slept"
    );

    let log = fs::read_to_string(run.dirs.logs.join("sometimes.log")).expect("read log");
    assert!(log.contains("--- retry attempt 2/3 ---"));
}

#[tokio::test]
async fn concurrency_limit_of_one_serializes_a_level() {
    let fixture = Fixture::new(
        r#"
[dag]
name = "serial"

[[tasks]]
name = "left"
script = "nap.sh"

[[tasks]]
name = "right"
script = "nap.sh"
"#,
        &[("nap.sh", "sleep 0.2\n")],
    );

    let mut opts = fixture.opts();
    opts.concurrency = 1;
    let run = execute(&CancellationToken::new(), &fixture.cfg, opts)
        .await
        .expect("execute");

    assert_eq!(run.status, RunStatus::Success);
    let left = task(&run, "left");
    let right = task(&run, "right");
    let serial = left.ended_at.expect("left ended") <= right.started_at.expect("right started")
        || right.ended_at.expect("right ended") <= left.started_at.expect("left started");
    assert!(serial, "tasks overlapped under concurrency=1");
}

#[tokio::test]
async fn empty_dag_completes_successfully() {
    let fixture = Fixture::new("[dag]\nname = \"empty\"\n", &[]);
    let run = execute(&CancellationToken::new(), &fixture.cfg, fixture.opts())
        .await
        .expect("execute");
    assert_eq!(run.status, RunStatus::Success);
    assert!(run.tasks.is_empty());
    assert!(run.ended_at.is_some());
}

#[tokio::test]
async fn single_task_mode_skips_everything_else() {
    let fixture = Fixture::new(
        r#"
[dag]
name = "single"

[[tasks]]
name = "a"
script = "a.sh"

[[tasks]]
name = "b"
script = "b.sh"
depends_on = ["a"]

[[tasks]]
name = "c"
script = "c.sh"
depends_on = ["b"]
"#,
        &[
            ("a.sh", "exit 0\n"),
            ("b.sh", "exit 0\n"),
            ("c.sh", "echo solo\n"),
        ],
    );

    let mut opts = fixture.opts();
    opts.task_name = Some("c".to_string());
    let run = execute(&CancellationToken::new(), &fixture.cfg, opts)
        .await
        .expect("execute");

    assert_eq!(run.status, RunStatus::Success);
    assert_eq!(task(&run, "a").status, TaskStatus::Skipped);
    assert_eq!(task(&run, "b").status, TaskStatus::Skipped);
    assert_eq!(task(&run, "c").status, TaskStatus::Success);
}

#[tokio::test]
async fn unknown_single_task_is_an_error() {
    let fixture = Fixture::new(
        "[dag]\nname = \"single\"\n\n[[tasks]]\nname = \"a\"\nscript = \"a.sh\"\n",
        &[("a.sh", "exit 0\n")],
    );

    let mut opts = fixture.opts();
    opts.task_name = Some("ghost".to_string());
    let err = execute(&CancellationToken::new(), &fixture.cfg, opts)
        .await
        .expect_err("unknown task");
    assert!(matches!(err, EngineError::TaskNotFound { .. }));
}

#[tokio::test]
async fn cycle_is_rejected_before_any_task_runs() {
    let fixture = Fixture::new(
        r#"
[dag]
name = "loopy"

[[tasks]]
name = "a"
script = "a.sh"
depends_on = ["b"]

[[tasks]]
name = "b"
script = "a.sh"
depends_on = ["a"]
"#,
        &[("a.sh", "exit 0\n")],
    );

    let err = execute(&CancellationToken::new(), &fixture.cfg, fixture.opts())
        .await
        .expect_err("cycle");
    assert!(err.to_string().contains("cycle"));
    assert!(err.to_string().contains('a') && err.to_string().contains('b'));
}

#[tokio::test]
async fn per_attempt_timeout_fails_a_hanging_task() {
    let fixture = Fixture::new(
        r#"
[dag]
name = "hang"

[[tasks]]
name = "stuck"
script = "stuck.sh"
timeout = "250ms"
"#,
        &[("stuck.sh", "sleep 30\n")],
    );

    let started = Instant::now();
    let run = execute(&CancellationToken::new(), &fixture.cfg, fixture.opts())
        .await
        .expect("execute");

    assert_eq!(run.status, RunStatus::Failed);
    let t = task(&run, "stuck");
    assert_eq!(t.status, TaskStatus::Failed);
    assert!(
        t.last_error.as_deref().is_some_and(|e| e.contains("timed out")),
        "error: {:?}",
        t.last_error
    );
    assert!(started.elapsed() < Duration::from_secs(20));
}

#[tokio::test]
async fn cancellation_during_retry_delay_fails_the_run_promptly() {
    let fixture = Fixture::new(
        r#"
[dag]
name = "cancelme"

[[tasks]]
name = "broken"
script = "broken.sh"
retries = 5
retry_delay = "30s"

[[tasks]]
name = "after"
script = "ok.sh"
depends_on = ["broken"]
"#,
        &[("broken.sh", "exit 1\n"), ("ok.sh", "exit 0\n")],
    );

    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(400)).await;
            cancel.cancel();
        });
    }

    let started = Instant::now();
    let run = execute(&cancel, &fixture.cfg, fixture.opts())
        .await
        .expect("execute");

    assert_eq!(run.status, RunStatus::Failed);
    let broken = task(&run, "broken");
    assert_eq!(broken.status, TaskStatus::Failed);
    assert_eq!(broken.last_error.as_deref(), Some("run cancelled"));

    // Later levels are failed with the cancellation error, not
    // upstream_failed: they were never dispatched against a failed parent,
    // the run itself was torn down.
    let after = task(&run, "after");
    assert_eq!(after.status, TaskStatus::Failed);
    assert_eq!(after.last_error.as_deref(), Some("run cancelled"));

    assert!(started.elapsed() < Duration::from_secs(15));
}

#[tokio::test]
async fn run_level_timeout_reports_a_deadline() {
    let fixture = Fixture::new(
        r#"
[dag]
name = "deadline"
timeout = "300ms"

[[tasks]]
name = "slow"
script = "slow.sh"
"#,
        &[("slow.sh", "sleep 30\n")],
    );

    let started = Instant::now();
    let run = execute(&CancellationToken::new(), &fixture.cfg, fixture.opts())
        .await
        .expect("execute");

    assert_eq!(run.status, RunStatus::Failed);
    let t = task(&run, "slow");
    assert_eq!(t.last_error.as_deref(), Some("run deadline exceeded"));
    assert!(started.elapsed() < Duration::from_secs(20));
}

#[tokio::test]
async fn keep_artifacts_removes_the_other_subdirectories() {
    let fixture = Fixture::new(
        "[dag]\nname = \"tidy\"\n\n[[tasks]]\nname = \"a\"\nscript = \"a.sh\"\n",
        &[("a.sh", "exit 0\n")],
    );

    let mut opts = fixture.opts();
    opts.keep_artifacts = vec!["logs".to_string()];
    let run = execute(&CancellationToken::new(), &fixture.cfg, opts)
        .await
        .expect("execute");

    let run_dir = fixture.run_dir(&run.id);
    assert!(run_dir.join("logs").is_dir());
    assert!(!run_dir.join("project").exists());
    assert!(!run_dir.join("data").exists());
}

#[tokio::test]
async fn task_environment_carries_the_run_context() {
    let fixture = Fixture::new(
        r#"
[dag]
name = "envdag"

[[tasks]]
name = "probe"
script = "probe.sh"
"#,
        &[(
            "probe.sh",
            "printf '%s\\n%s\\n%s\\n%s\\n%s\\n' \"$PIT_RUN_ID\" \"$PIT_DAG_NAME\" \"$PIT_TASK_NAME\" \"$PIT_SOCKET\" \"$PIT_DATA_DIR\" > \"$PIT_DATA_DIR/env.txt\"\n",
        )],
    );

    let run = execute(&CancellationToken::new(), &fixture.cfg, fixture.opts())
        .await
        .expect("execute");
    assert_eq!(run.status, RunStatus::Success);

    let contents = fs::read_to_string(run.dirs.data.join("env.txt")).expect("read env.txt");
    let lines: Vec<&str> = contents.lines().collect();
    assert_eq!(lines[0], run.id);
    assert_eq!(lines[1], "envdag");
    assert_eq!(lines[2], "probe");
    assert_eq!(lines[3], run.socket_addr);
    assert_eq!(Path::new(lines[4]), run.dirs.data);
}

#[tokio::test]
async fn sql_tasks_without_secrets_use_the_stub() {
    let fixture = Fixture::new(
        r#"
[dag]
name = "sqlstub"

[[tasks]]
name = "load"
script = "load.sql"
"#,
        &[("load.sql", "SELECT 1;\n")],
    );

    let run = execute(&CancellationToken::new(), &fixture.cfg, fixture.opts())
        .await
        .expect("execute");
    assert_eq!(run.status, RunStatus::Success);

    let log = fs::read_to_string(run.dirs.logs.join("load.log")).expect("read log");
    assert!(log.contains("[sql-stub] would execute"));
    assert!(log.contains("SELECT 1;"));
}

#[tokio::test]
async fn traversal_scripts_never_start() {
    let fixture = Fixture::new(
        r#"
[dag]
name = "escape"

[[tasks]]
name = "evil"
script = "../../../../bin/true"
runner = "bash"
"#,
        &[],
    );

    let run = execute(&CancellationToken::new(), &fixture.cfg, fixture.opts())
        .await
        .expect("execute");
    assert_eq!(run.status, RunStatus::Failed);
    let t = task(&run, "evil");
    assert_eq!(t.status, TaskStatus::Failed);
    assert!(
        t.last_error
            .as_deref()
            .is_some_and(|e| e.contains("escapes snapshot directory")),
        "error: {:?}",
        t.last_error
    );
    assert_eq!(t.attempt, 0, "no attempt may start");
}

#[tokio::test]
async fn data_seed_dir_is_copied_before_tasks_run() {
    let fixture = Fixture::new(
        r#"
[dag]
name = "seeded"

[[tasks]]
name = "consume"
script = "consume.sh"
"#,
        &[(
            "consume.sh",
            "test -f \"$PIT_DATA_DIR/sales_2024.csv\" || exit 9\n",
        )],
    );

    let seed = tempfile::tempdir().expect("seed dir");
    fs::write(seed.path().join("sales_2024.csv"), "id,amount\n").expect("write seed");

    let mut opts = fixture.opts();
    opts.data_seed_dir = Some(seed.path().to_path_buf());
    let run = execute(&CancellationToken::new(), &fixture.cfg, opts)
        .await
        .expect("execute");
    assert_eq!(run.status, RunStatus::Success);
}
