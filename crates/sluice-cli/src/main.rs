mod logging;

use anyhow::{Context, Result, anyhow, bail};
use clap::{Args, Parser, Subcommand};
use sluice_config::{ProjectConfig, WorkspaceConfig, default_keep_artifacts, discover, load_workspace, validate, validate_all};
use sluice_core::RunStatus;
use sluice_engine::ExecuteOpts;
use sluice_sched::{Dispatcher, ServeOpts};
use std::collections::BTreeMap;
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;

#[derive(Parser)]
#[command(name = "sluice")]
#[command(about = "Lightweight data-pipeline orchestrator")]
struct Cli {
    /// Workspace root containing projects/ and sluice_config.toml.
    #[arg(long, default_value = ".", global = true)]
    root: PathBuf,
    /// Path to the secrets file.
    #[arg(long, global = true)]
    secrets: Option<PathBuf>,
    /// Directory for run snapshots.
    #[arg(long, global = true)]
    runs_dir: Option<PathBuf>,
    #[arg(long, global = true)]
    log_level: Option<String>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Execute a DAG run. Use dag/task syntax to run a single task.
    Run(RunArgs),
    /// Host triggers and execute DAGs in response to events.
    Serve(ServeArgs),
    /// Validate every project without running anything.
    Validate,
}

#[derive(Args)]
struct RunArgs {
    /// <dag> or <dag>/<task>
    target: String,
    /// Stream task output to the terminal.
    #[arg(long, short)]
    verbose: bool,
    /// Max parallel tasks (0 = unlimited).
    #[arg(long, default_value_t = 0)]
    concurrency: usize,
    /// Artifacts to keep after the run (logs, project, data).
    #[arg(long, value_delimiter = ',')]
    keep: Vec<String>,
}

#[derive(Args)]
struct ServeArgs {
    #[arg(long, short)]
    verbose: bool,
    #[arg(long, default_value_t = 0)]
    concurrency: usize,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    logging::init_logging(cli.log_level.as_deref());

    let workspace = load_workspace(&cli.root)?.unwrap_or_default();

    match &cli.command {
        Commands::Run(args) => run_command(&cli, args, &workspace).await,
        Commands::Serve(args) => serve_command(&cli, args, &workspace).await,
        Commands::Validate => validate_command(&cli),
    }
}

async fn run_command(cli: &Cli, args: &RunArgs, workspace: &WorkspaceConfig) -> Result<()> {
    let (dag_name, task_name) = parse_run_arg(&args.target)?;

    let configs = discover(&cli.root)?;
    let cfg = configs
        .get(dag_name)
        .ok_or_else(|| anyhow!("DAG {dag_name:?} not found (available: {})", available_dags(&configs)))?;

    let issues = validate(cfg);
    if !issues.is_empty() {
        for issue in &issues {
            eprintln!("ERROR: {issue}");
        }
        bail!("validation failed with {} error(s)", issues.len());
    }

    let cancel = cancel_on_ctrl_c();
    let opts = ExecuteOpts {
        runs_dir: resolve_runs_dir(cli, workspace),
        task_name: task_name.map(String::from),
        verbose: args.verbose,
        concurrency: args.concurrency,
        secrets_path: resolve_secrets_path(cli, workspace),
        data_seed_dir: None,
        dbt_driver: workspace.dbt_driver.clone(),
        keep_artifacts: resolve_keep_artifacts(&args.keep, cfg, workspace),
        remote: None,
    };

    let run = sluice_engine::execute(&cancel, cfg, opts).await?;
    if run.status == RunStatus::Failed {
        bail!("run failed");
    }
    Ok(())
}

async fn serve_command(cli: &Cli, args: &ServeArgs, workspace: &WorkspaceConfig) -> Result<()> {
    let configs = discover(&cli.root)?;
    if configs.is_empty() {
        bail!("no projects found in {}/projects/", cli.root.display());
    }

    let opts = ServeOpts {
        runs_dir: resolve_runs_dir(cli, workspace),
        verbose: args.verbose,
        concurrency: args.concurrency,
        secrets_path: resolve_secrets_path(cli, workspace),
        dbt_driver: workspace.dbt_driver.clone(),
        workspace_artifacts: workspace.keep_artifacts.clone(),
        remote: None,
    };

    let dispatcher = Dispatcher::new(configs, opts).context("building dispatcher")?;
    let cancel = cancel_on_ctrl_c();
    dispatcher.start(cancel).await;
    Ok(())
}

fn validate_command(cli: &Cli) -> Result<()> {
    let configs = discover(&cli.root)?;
    if configs.is_empty() {
        bail!("no projects found in {}/projects/", cli.root.display());
    }

    let issues = validate_all(&configs);
    if issues.is_empty() {
        println!("{} project(s) valid", configs.len());
        return Ok(());
    }
    for issue in &issues {
        eprintln!("ERROR: {issue}");
    }
    bail!("validation failed with {} error(s)", issues.len());
}

/// Cancels the returned token on the first Ctrl-C, letting in-flight runs
/// tear down gracefully.
fn cancel_on_ctrl_c() -> CancellationToken {
    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::info!("interrupt received, cancelling");
                cancel.cancel();
            }
        });
    }
    cancel
}

/// Splits "dag/task" into the DAG name and an optional task name.
fn parse_run_arg(arg: &str) -> Result<(&str, Option<&str>)> {
    match arg.split_once('/') {
        None if arg.is_empty() => bail!("DAG name cannot be empty"),
        None => Ok((arg, None)),
        Some(("", _)) => bail!("DAG name cannot be empty"),
        Some((dag, "")) => bail!(
            "task name cannot be empty in {arg:?} (use just {dag:?} to run the full DAG)"
        ),
        Some((dag, task)) => Ok((dag, Some(task))),
    }
}

fn available_dags(configs: &BTreeMap<String, ProjectConfig>) -> String {
    configs.keys().cloned().collect::<Vec<_>>().join(", ")
}

fn resolve_runs_dir(cli: &Cli, workspace: &WorkspaceConfig) -> Option<PathBuf> {
    cli.runs_dir.clone().or_else(|| workspace.runs_dir.clone())
}

fn resolve_secrets_path(cli: &Cli, workspace: &WorkspaceConfig) -> Option<PathBuf> {
    cli.secrets.clone().or_else(|| {
        workspace
            .secrets_dir
            .as_ref()
            .map(|dir| dir.join("secrets.toml"))
    })
}

/// keep_artifacts resolution: flag > per-project > workspace > default.
fn resolve_keep_artifacts(
    flag: &[String],
    cfg: &ProjectConfig,
    workspace: &WorkspaceConfig,
) -> Vec<String> {
    if !flag.is_empty() {
        return flag.to_vec();
    }
    if !cfg.dag.keep_artifacts.is_empty() {
        return cfg.dag.keep_artifacts.clone();
    }
    if let Some(workspace_artifacts) = &workspace.keep_artifacts {
        return workspace_artifacts.clone();
    }
    default_keep_artifacts()
}
