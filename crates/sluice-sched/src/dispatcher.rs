use crate::cron_trigger::CronTrigger;
use crate::event::{EventSource, TriggerEvent};
use crate::ftp_watch::FtpWatchTrigger;
use crate::{Trigger, TriggerError};
use sluice_config::{FtpWatchConfig, ProjectConfig, default_keep_artifacts, validate};
use sluice_core::RunStatus;
use sluice_engine::ExecuteOpts;
use sluice_ftp::{FtpConnector, Remote, resolve_endpoint};
use sluice_secrets::{SecretError, SecretStore};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{error, info, warn};

#[derive(Debug, Error)]
pub enum SchedError {
    #[error("loading secrets: {0}")]
    Secrets(#[from] SecretError),
    #[error("DAG {dag:?}: {source}")]
    Trigger { dag: String, source: TriggerError },
    #[error("no triggers registered (set schedule or ftp_watch in at least one DAG)")]
    NoTriggers,
}

/// Workspace-level settings passed from the CLI layer.
#[derive(Default)]
pub struct ServeOpts {
    pub runs_dir: Option<PathBuf>,
    pub verbose: bool,
    pub concurrency: usize,
    pub secrets_path: Option<PathBuf>,
    pub dbt_driver: Option<String>,
    /// Workspace-level keep_artifacts (None = default).
    pub workspace_artifacts: Option<Vec<String>>,
    /// Remote-directory connector; defaults to the FTP client.
    pub remote: Option<Arc<dyn Remote>>,
}

/// Owns the trigger set, consumes the shared event channel, enforces the
/// per-DAG overlap policy, and launches runs against the executor.
pub struct Dispatcher {
    configs: Arc<BTreeMap<String, ProjectConfig>>,
    secrets: Option<Arc<SecretStore>>,
    triggers: Vec<Arc<dyn Trigger>>,
    ftp_configs: Arc<HashMap<String, FtpWatchConfig>>,
    remote: Arc<dyn Remote>,
    opts: ServeOpts,
    active_runs: Arc<Mutex<HashSet<String>>>,
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("configs", &self.configs.keys().collect::<Vec<_>>())
            .field("triggers", &self.triggers.len())
            .finish()
    }
}

impl Dispatcher {
    /// Validates every project and registers its triggers.
    pub fn new(
        configs: BTreeMap<String, ProjectConfig>,
        opts: ServeOpts,
    ) -> Result<Self, SchedError> {
        let secrets = match &opts.secrets_path {
            Some(path) => Some(Arc::new(SecretStore::load(path)?)),
            None => None,
        };
        let remote = opts
            .remote
            .clone()
            .unwrap_or_else(|| Arc::new(FtpConnector));

        let mut triggers: Vec<Arc<dyn Trigger>> = Vec::new();
        let mut ftp_configs = HashMap::new();

        for (dag_name, cfg) in &configs {
            for issue in validate(cfg) {
                warn!("{issue}");
            }

            if let Some(schedule) = cfg.dag.schedule.as_deref().filter(|s| !s.is_empty()) {
                let trigger = CronTrigger::new(dag_name, schedule).map_err(|source| {
                    SchedError::Trigger {
                        dag: dag_name.clone(),
                        source,
                    }
                })?;
                triggers.push(Arc::new(trigger));
            }

            if let Some(fw) = &cfg.dag.ftp_watch {
                let trigger = FtpWatchTrigger::new(
                    dag_name,
                    fw.clone(),
                    secrets.clone(),
                    Arc::clone(&remote),
                )
                .map_err(|source| SchedError::Trigger {
                    dag: dag_name.clone(),
                    source,
                })?;
                triggers.push(Arc::new(trigger));
                ftp_configs.insert(dag_name.clone(), fw.clone());
            }
        }

        if triggers.is_empty() {
            return Err(SchedError::NoTriggers);
        }

        Ok(Self {
            configs: Arc::new(configs),
            secrets,
            triggers,
            ftp_configs: Arc::new(ftp_configs),
            remote,
            opts,
            active_runs: Arc::new(Mutex::new(HashSet::new())),
        })
    }

    /// Adds an extra trigger beyond the config-derived set.
    pub fn register_trigger(&mut self, trigger: Arc<dyn Trigger>) {
        self.triggers.push(trigger);
    }

    /// Launches all triggers and processes events until cancelled, then
    /// drains: triggers stop first, in-flight runs are awaited.
    pub async fn start(&self, cancel: CancellationToken) {
        info!("{} trigger(s) registered", self.triggers.len());
        for trigger in &self.triggers {
            info!("  {}", trigger.describe());
        }

        let (event_tx, mut event_rx) = mpsc::channel::<TriggerEvent>(64);

        let trigger_cancel = cancel.child_token();
        let trigger_tracker = TaskTracker::new();
        for trigger in &self.triggers {
            let trigger = Arc::clone(trigger);
            let token = trigger_cancel.clone();
            let tx = event_tx.clone();
            trigger_tracker.spawn(async move {
                if let Err(e) = trigger.start(token, tx).await {
                    error!(trigger = %trigger.describe(), error = %e, "trigger stopped");
                }
            });
        }
        trigger_tracker.close();
        drop(event_tx);

        let run_tracker = TaskTracker::new();
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                event = event_rx.recv() => match event {
                    Some(event) => self.handle_event(event, &cancel, &run_tracker),
                    None => break,
                },
            }
        }

        info!("shutting down...");
        trigger_cancel.cancel();
        trigger_tracker.wait().await;

        run_tracker.close();
        run_tracker.wait().await;
        info!("stopped");
    }

    fn handle_event(&self, event: TriggerEvent, cancel: &CancellationToken, run_tracker: &TaskTracker) {
        let Some(cfg) = self.configs.get(&event.dag_name) else {
            warn!(dag = %event.dag_name, "event for unknown DAG, skipping");
            return;
        };

        let overlap = cfg.dag.overlap_policy().to_string();
        {
            let mut active = self.active_runs.lock().expect("active runs lock");
            if active.contains(&event.dag_name) && overlap == "skip" {
                info!(dag = %event.dag_name, "skipping: DAG already running (overlap=skip)");
                return;
            }
            // "queue" has no persistent queue; it behaves like "allow".
            active.insert(event.dag_name.clone());
        }

        let configs = Arc::clone(&self.configs);
        let ftp_configs = Arc::clone(&self.ftp_configs);
        let secrets = self.secrets.clone();
        let remote = Arc::clone(&self.remote);
        let active_runs = Arc::clone(&self.active_runs);
        let opts = self.run_opts(cfg);
        let dag_name = event.dag_name.clone();
        let cancel = cancel.clone();

        run_tracker.spawn(async move {
            run_one(event, cancel, configs, ftp_configs, secrets, remote, opts).await;
            active_runs
                .lock()
                .expect("active runs lock")
                .remove(&dag_name);
        });
    }

    fn run_opts(&self, cfg: &ProjectConfig) -> ExecuteOpts {
        // keep_artifacts resolution: per-project > workspace > default.
        let keep_artifacts = if !cfg.dag.keep_artifacts.is_empty() {
            cfg.dag.keep_artifacts.clone()
        } else if let Some(workspace) = &self.opts.workspace_artifacts {
            workspace.clone()
        } else {
            default_keep_artifacts()
        };

        ExecuteOpts {
            runs_dir: self.opts.runs_dir.clone(),
            task_name: None,
            verbose: self.opts.verbose,
            concurrency: self.opts.concurrency,
            secrets_path: self.opts.secrets_path.clone(),
            data_seed_dir: None,
            dbt_driver: self.opts.dbt_driver.clone(),
            keep_artifacts,
            remote: Some(Arc::clone(&self.remote)),
        }
    }
}

async fn run_one(
    event: TriggerEvent,
    cancel: CancellationToken,
    configs: Arc<BTreeMap<String, ProjectConfig>>,
    ftp_configs: Arc<HashMap<String, FtpWatchConfig>>,
    secrets: Option<Arc<SecretStore>>,
    remote: Arc<dyn Remote>,
    mut opts: ExecuteOpts,
) {
    let dag_name = event.dag_name.clone();
    let Some(cfg) = configs.get(&dag_name) else {
        return;
    };
    info!(dag = %dag_name, source = %event.source, "triggered");

    // File-arrival runs pre-fetch the listed files into a throwaway staging
    // directory used to seed the run's data dir.
    let mut _staging: Option<tempfile::TempDir> = None;
    if event.source == EventSource::FileWatch && !event.files.is_empty() {
        match fetch_event_files(&event, &ftp_configs, &secrets, &remote).await {
            Ok(staging) => {
                opts.data_seed_dir = Some(staging.path().to_path_buf());
                _staging = Some(staging);
            }
            Err(e) => {
                error!(dag = %dag_name, error = %e, "FTP download failed");
                return;
            }
        }
    }

    let run = match sluice_engine::execute(&cancel, cfg, opts).await {
        Ok(run) => run,
        Err(e) => {
            error!(dag = %dag_name, error = %e, "execution error");
            return;
        }
    };
    info!(dag = %dag_name, run = %run.id, status = %run.status, "completed");

    if event.source == EventSource::FileWatch
        && run.status == RunStatus::Success
        && let Err(e) = archive_event_files(&event, &ftp_configs, &secrets, &remote).await
    {
        error!(dag = %dag_name, error = %e, "FTP archive failed");
    }
}

async fn fetch_event_files(
    event: &TriggerEvent,
    ftp_configs: &HashMap<String, FtpWatchConfig>,
    secrets: &Option<Arc<SecretStore>>,
    remote: &Arc<dyn Remote>,
) -> Result<tempfile::TempDir, String> {
    let fw = ftp_configs
        .get(&event.dag_name)
        .ok_or_else(|| format!("no FTP config for DAG {:?}", event.dag_name))?;
    let store = secrets
        .as_ref()
        .ok_or("secrets store not configured".to_string())?;
    let endpoint =
        resolve_endpoint(store, &event.dag_name, fw).map_err(|e| e.to_string())?;

    let staging = tempfile::Builder::new()
        .prefix("sluice-ftp-")
        .tempdir()
        .map_err(|e| format!("creating staging dir: {e}"))?;

    let directory = fw.directory.clone();
    let files = event.files.clone();
    let staging_path = staging.path().to_path_buf();
    let remote = Arc::clone(remote);
    let dag = event.dag_name.clone();

    tokio::task::spawn_blocking(move || {
        let mut conn = remote.connect(&endpoint).map_err(|e| e.to_string())?;
        for name in &files {
            let remote_path = format!("{directory}/{name}");
            conn.download(&remote_path, &staging_path.join(name))
                .map_err(|e| format!("downloading {name:?}: {e}"))?;
            info!(dag = %dag, file = %name, "downloaded");
        }
        let _ = conn.close();
        Ok::<(), String>(())
    })
    .await
    .map_err(|e| format!("download task failed: {e}"))??;

    Ok(staging)
}

async fn archive_event_files(
    event: &TriggerEvent,
    ftp_configs: &HashMap<String, FtpWatchConfig>,
    secrets: &Option<Arc<SecretStore>>,
    remote: &Arc<dyn Remote>,
) -> Result<(), String> {
    let Some(fw) = ftp_configs.get(&event.dag_name) else {
        return Ok(());
    };
    let Some(archive_dir) = fw.archive_dir.clone().filter(|a| !a.is_empty()) else {
        return Ok(());
    };
    let store = secrets
        .as_ref()
        .ok_or("secrets store not configured".to_string())?;
    let endpoint =
        resolve_endpoint(store, &event.dag_name, fw).map_err(|e| e.to_string())?;

    let directory = fw.directory.clone();
    let files = event.files.clone();
    let remote = Arc::clone(remote);
    let dag = event.dag_name.clone();

    tokio::task::spawn_blocking(move || {
        let mut conn = remote.connect(&endpoint).map_err(|e| e.to_string())?;
        conn.mkdir_all(&archive_dir).map_err(|e| e.to_string())?;
        for name in &files {
            let src = format!("{directory}/{name}");
            let dst = format!("{archive_dir}/{name}");
            conn.rename(&src, &dst)
                .map_err(|e| format!("archiving {name:?}: {e}"))?;
            info!(dag = %dag, file = %name, archive = %archive_dir, "archived");
        }
        let _ = conn.close();
        Ok::<(), String>(())
    })
    .await
    .map_err(|e| format!("archive task failed: {e}"))?
}
