use crate::model::{DbtConfig, FtpWatchConfig, ProjectConfig, VALID_ARTIFACTS};
use sluice_core::{DagError, TaskNode, level_groups};
use std::collections::BTreeMap;
use std::collections::HashSet;
use std::fmt;
use std::path::Path;
use std::str::FromStr;

const VALID_OVERLAP: [&str; 3] = ["skip", "queue", "allow"];

/// A single validation problem, attributed to a DAG and optionally a task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationIssue {
    pub dag: String,
    pub task: Option<String>,
    pub message: String,
}

impl ValidationIssue {
    fn dag_issue(dag: &str, message: impl Into<String>) -> Self {
        Self {
            dag: dag.to_string(),
            task: None,
            message: message.into(),
        }
    }

    fn task_issue(dag: &str, task: &str, message: impl Into<String>) -> Self {
        Self {
            dag: dag.to_string(),
            task: Some(task.to_string()),
            message: message.into(),
        }
    }
}

impl fmt::Display for ValidationIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.task {
            Some(task) => write!(f, "[{}] task {:?}: {}", self.dag, task, self.message),
            None => write!(f, "[{}] {}", self.dag, self.message),
        }
    }
}

/// Parses a standard 5-field cron expression.
///
/// The `cron` crate expects a seconds field, so expressions are parsed with a
/// fixed `0` seconds prefix.
pub fn parse_schedule(expr: &str) -> Result<cron::Schedule, cron::error::Error> {
    cron::Schedule::from_str(&format!("0 {expr}"))
}

/// Checks a single project config for problems. Returns every issue found;
/// an empty list means the DAG may be dispatched.
pub fn validate(cfg: &ProjectConfig) -> Vec<ValidationIssue> {
    let mut issues = Vec::new();
    let project_dir = cfg.dir();

    let dag_name = if cfg.dag.name.is_empty() {
        issues.push(ValidationIssue::dag_issue("(unnamed)", "dag.name is required"));
        "(unnamed)"
    } else {
        &cfg.dag.name
    };

    if let Some(overlap) = cfg.dag.overlap.as_deref()
        && !overlap.is_empty()
        && !VALID_OVERLAP.contains(&overlap)
    {
        issues.push(ValidationIssue::dag_issue(
            dag_name,
            format!("invalid dag.overlap value {overlap:?} (must be skip, queue, or allow)"),
        ));
    }

    // Task name set, duplicates included.
    let mut task_names: HashSet<&str> = HashSet::with_capacity(cfg.tasks.len());
    for task in &cfg.tasks {
        if task.name.is_empty() {
            issues.push(ValidationIssue::dag_issue(dag_name, "task with empty name"));
            continue;
        }
        if !task_names.insert(task.name.as_str()) {
            issues.push(ValidationIssue::task_issue(
                dag_name,
                &task.name,
                "duplicate task name",
            ));
        }
    }

    for task in &cfg.tasks {
        if task.name.is_empty() {
            continue;
        }
        for dep in &task.depends_on {
            if !task_names.contains(dep.as_str()) {
                issues.push(ValidationIssue::task_issue(
                    dag_name,
                    &task.name,
                    format!("depends_on references unknown task {dep:?}"),
                ));
            }
        }

        if task.runner.as_deref() == Some("dbt") {
            // dbt tasks carry a dbt subcommand in `script`, not a file path.
            if task.script.is_empty() {
                issues.push(ValidationIssue::task_issue(
                    dag_name,
                    &task.name,
                    "dbt task requires a non-empty script (dbt command, e.g. \"run --select staging\")",
                ));
            }
        } else if !task.script.is_empty() {
            let script_path = project_dir.join(&task.script);
            if !script_path.exists() {
                issues.push(ValidationIssue::task_issue(
                    dag_name,
                    &task.name,
                    format!("script {:?} not found", task.script),
                ));
            }
        }
    }

    if let Some(schedule) = cfg.dag.schedule.as_deref()
        && !schedule.is_empty()
        && let Err(e) = parse_schedule(schedule)
    {
        issues.push(ValidationIssue::dag_issue(
            dag_name,
            format!("invalid schedule {schedule:?}: {e}"),
        ));
    }

    if let Some(fw) = &cfg.dag.ftp_watch {
        issues.extend(validate_ftp_watch(fw, dag_name));
    }

    for artifact in &cfg.dag.keep_artifacts {
        if !VALID_ARTIFACTS.contains(&artifact.as_str()) {
            issues.push(ValidationIssue::dag_issue(
                dag_name,
                format!("invalid keep_artifacts value {artifact:?} (must be logs, project, or data)"),
            ));
        }
    }

    if let Some(dbt) = &cfg.dag.dbt {
        issues.extend(validate_dbt(dbt, dag_name, project_dir));
    }

    // Cycle detection over named tasks only; the issues above already cover
    // unnamed tasks and dangling dependencies.
    let named: Vec<&crate::model::TaskConfig> = cfg
        .tasks
        .iter()
        .filter(|t| !t.name.is_empty() && task_names.contains(t.name.as_str()))
        .collect();
    let nodes: Vec<TaskNode<'_>> = named
        .iter()
        .map(|t| TaskNode {
            name: &t.name,
            depends_on: &t.depends_on,
        })
        .collect();
    match level_groups(&nodes) {
        Ok(_) => {}
        Err(DagError::CycleDetected { tasks }) => {
            issues.push(ValidationIssue::dag_issue(
                dag_name,
                format!(
                    "dependency cycle detected involving tasks: {}",
                    tasks.join(", ")
                ),
            ));
        }
        // Duplicates and unknown dependencies were reported above.
        Err(_) => {}
    }

    issues
}

fn validate_ftp_watch(fw: &FtpWatchConfig, dag_name: &str) -> Vec<ValidationIssue> {
    let mut issues = Vec::new();

    // With a structured secret the legacy host/user/password fields are
    // resolved at poll time; only directory and pattern stay mandatory.
    if fw.secret.is_none() {
        if fw.host.is_empty() {
            issues.push(ValidationIssue::dag_issue(dag_name, "ftp_watch.host is required"));
        }
        if fw.user.is_empty() {
            issues.push(ValidationIssue::dag_issue(dag_name, "ftp_watch.user is required"));
        }
        if fw.password_secret.is_empty() {
            issues.push(ValidationIssue::dag_issue(
                dag_name,
                "ftp_watch.password_secret is required",
            ));
        }
    }
    if fw.directory.is_empty() {
        issues.push(ValidationIssue::dag_issue(
            dag_name,
            "ftp_watch.directory is required",
        ));
    }
    if fw.pattern.is_empty() {
        issues.push(ValidationIssue::dag_issue(
            dag_name,
            "ftp_watch.pattern is required",
        ));
    } else if let Err(e) = globset::Glob::new(&fw.pattern) {
        issues.push(ValidationIssue::dag_issue(
            dag_name,
            format!("invalid ftp_watch.pattern {:?}: {e}", fw.pattern),
        ));
    }

    issues
}

fn validate_dbt(dbt: &DbtConfig, dag_name: &str, project_dir: &Path) -> Vec<ValidationIssue> {
    let mut issues = Vec::new();

    if dbt.version.is_empty() {
        issues.push(ValidationIssue::dag_issue(dag_name, "dbt.version is required"));
    }
    if dbt.adapter.is_empty() {
        issues.push(ValidationIssue::dag_issue(dag_name, "dbt.adapter is required"));
    }
    if dbt.project_dir.is_empty() {
        issues.push(ValidationIssue::dag_issue(
            dag_name,
            "dbt.project_dir is required",
        ));
    } else {
        let dbt_dir = project_dir.join(&dbt.project_dir);
        match std::fs::metadata(&dbt_dir) {
            Err(_) => issues.push(ValidationIssue::dag_issue(
                dag_name,
                format!("dbt.project_dir {:?} not found", dbt.project_dir),
            )),
            Ok(meta) if !meta.is_dir() => issues.push(ValidationIssue::dag_issue(
                dag_name,
                format!("dbt.project_dir {:?} is not a directory", dbt.project_dir),
            )),
            Ok(_) => {}
        }
    }

    issues
}

/// Validates every discovered project, returning all issues.
pub fn validate_all(configs: &BTreeMap<String, ProjectConfig>) -> Vec<ValidationIssue> {
    configs.values().flat_map(validate).collect()
}
