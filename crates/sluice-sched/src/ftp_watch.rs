use crate::event::TriggerEvent;
use crate::{Trigger, TriggerError};
use async_trait::async_trait;
use sluice_config::FtpWatchConfig;
use sluice_ftp::{NameMatcher, Remote, RemoteFile, resolve_endpoint};
use sluice_secrets::SecretStore;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Tracks a file's stability between polls.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct FileState {
    size: u64,
    first_seen: Instant,
}

/// Polls a remote directory and emits an event once matching files have
/// stopped growing for the configured stability threshold.
pub struct FtpWatchTrigger {
    dag_name: String,
    cfg: FtpWatchConfig,
    secrets: Arc<SecretStore>,
    remote: Arc<dyn Remote>,
}

impl std::fmt::Debug for FtpWatchTrigger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FtpWatchTrigger")
            .field("dag_name", &self.dag_name)
            .field("cfg", &self.cfg)
            .finish()
    }
}

impl FtpWatchTrigger {
    pub fn new(
        dag_name: impl Into<String>,
        cfg: FtpWatchConfig,
        secrets: Option<Arc<SecretStore>>,
        remote: Arc<dyn Remote>,
    ) -> Result<Self, TriggerError> {
        let secrets = secrets.ok_or(TriggerError::SecretsRequired)?;
        NameMatcher::new(&cfg.pattern).map_err(|e| TriggerError::InvalidPattern {
            pattern: cfg.pattern.clone(),
            message: e.to_string(),
        })?;

        Ok(Self {
            dag_name: dag_name.into(),
            cfg,
            secrets,
            remote,
        })
    }

    async fn poll(
        &self,
        cancel: &CancellationToken,
        events: &mpsc::Sender<TriggerEvent>,
        tracking: &mut HashMap<String, FileState>,
    ) {
        let endpoint = match resolve_endpoint(&self.secrets, &self.dag_name, &self.cfg) {
            Ok(endpoint) => endpoint,
            Err(e) => {
                warn!(dag = %self.dag_name, error = %e, "ftp watch: resolving credentials");
                return;
            }
        };

        let remote = Arc::clone(&self.remote);
        let directory = self.cfg.directory.clone();
        let pattern = self.cfg.pattern.clone();
        let listing = tokio::task::spawn_blocking(move || {
            let mut conn = remote.connect(&endpoint)?;
            let files = conn.list(&directory, &pattern);
            let _ = conn.close();
            files
        })
        .await;

        let files: Vec<RemoteFile> = match listing {
            Ok(Ok(files)) => files,
            Ok(Err(e)) => {
                warn!(dag = %self.dag_name, error = %e, "ftp watch: list failed");
                return;
            }
            Err(e) => {
                warn!(dag = %self.dag_name, error = %e, "ftp watch: poll task failed");
                return;
            }
        };

        let now = Instant::now();

        // A new file, or one whose size changed, restarts its stability
        // timer; files that disappeared are forgotten.
        for file in &files {
            let reset = tracking
                .get(&file.name)
                .is_none_or(|prev| prev.size != file.size);
            if reset {
                tracking.insert(
                    file.name.clone(),
                    FileState {
                        size: file.size,
                        first_seen: now,
                    },
                );
            }
        }
        tracking.retain(|name, _| files.iter().any(|f| &f.name == name));

        let threshold = self.cfg.stable_threshold();
        let mut stable: Vec<String> = tracking
            .iter()
            .filter(|(_, state)| now.duration_since(state.first_seen) >= threshold)
            .map(|(name, _)| name.clone())
            .collect();
        stable.sort();

        if stable.is_empty() {
            return;
        }

        // Remove stable entries before emitting so the same file is not
        // re-announced next poll.
        for name in &stable {
            tracking.remove(name);
        }

        debug!(dag = %self.dag_name, files = ?stable, "ftp watch: stable files found");
        let event = TriggerEvent::file_watch(&self.dag_name, stable);
        tokio::select! {
            _ = cancel.cancelled() => {}
            sent = events.send(event) => {
                if sent.is_err() {
                    warn!(dag = %self.dag_name, "ftp watch: event channel closed");
                }
            }
        }
    }
}

#[async_trait]
impl Trigger for FtpWatchTrigger {
    async fn start(
        &self,
        cancel: CancellationToken,
        events: mpsc::Sender<TriggerEvent>,
    ) -> Result<(), TriggerError> {
        let mut ticker = tokio::time::interval(self.cfg.poll_interval());
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // The first interval tick completes immediately; consume it so polls
        // start one interval after startup.
        ticker.tick().await;

        let mut tracking: HashMap<String, FileState> = HashMap::new();
        loop {
            tokio::select! {
                _ = cancel.cancelled() => return Ok(()),
                _ = ticker.tick() => {
                    self.poll(&cancel, &events, &mut tracking).await;
                }
            }
        }
    }

    fn describe(&self) -> String {
        format!(
            "ftp_watch({}:{}{} {}) → {}",
            self.cfg.host,
            self.cfg.port(),
            self.cfg.directory,
            self.cfg.pattern,
            self.dag_name
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sluice_ftp::{FtpEndpoint, FtpError, RemoteDir};
    use std::collections::VecDeque;
    use std::path::Path;
    use std::sync::Mutex;
    use std::time::Duration;

    /// A connector whose successive connections see scripted listings; the
    /// final listing repeats forever.
    struct ScriptedRemote {
        listings: Mutex<VecDeque<Vec<RemoteFile>>>,
        last: Mutex<Vec<RemoteFile>>,
    }

    impl ScriptedRemote {
        fn new(listings: Vec<Vec<RemoteFile>>) -> Arc<Self> {
            Arc::new(Self {
                listings: Mutex::new(listings.into()),
                last: Mutex::new(Vec::new()),
            })
        }
    }

    impl Remote for ScriptedRemote {
        fn connect(&self, _endpoint: &FtpEndpoint) -> Result<Box<dyn RemoteDir>, FtpError> {
            let mut listings = self.listings.lock().expect("listings lock");
            let listing = match listings.pop_front() {
                Some(listing) => {
                    *self.last.lock().expect("last lock") = listing.clone();
                    listing
                }
                None => self.last.lock().expect("last lock").clone(),
            };
            Ok(Box::new(ScriptedDir { listing }))
        }
    }

    struct ScriptedDir {
        listing: Vec<RemoteFile>,
    }

    impl RemoteDir for ScriptedDir {
        fn list(&mut self, _dir: &str, pattern: &str) -> Result<Vec<RemoteFile>, FtpError> {
            let matcher = NameMatcher::new(pattern).expect("pattern");
            Ok(self
                .listing
                .iter()
                .filter(|f| matcher.is_match(&f.name))
                .cloned()
                .collect())
        }

        fn download(&mut self, _remote: &str, _local: &Path) -> Result<(), FtpError> {
            Ok(())
        }

        fn upload(&mut self, _local: &Path, _remote: &str) -> Result<(), FtpError> {
            Ok(())
        }

        fn rename(&mut self, _from: &str, _to: &str) -> Result<(), FtpError> {
            Ok(())
        }

        fn mkdir_all(&mut self, _dir: &str) -> Result<(), FtpError> {
            Ok(())
        }

        fn close(&mut self) -> Result<(), FtpError> {
            Ok(())
        }
    }

    fn file(name: &str, size: u64) -> RemoteFile {
        RemoteFile {
            name: name.to_string(),
            size,
        }
    }

    fn secrets() -> Option<Arc<SecretStore>> {
        let store = SecretStore::parse(
            "[claims.drop]\nhost = \"ftp.example.com\"\nuser = \"u\"\npassword = \"p\"\n",
            "secrets.toml",
        )
        .expect("parse secrets");
        Some(Arc::new(store))
    }

    fn watch_cfg() -> FtpWatchConfig {
        FtpWatchConfig {
            secret: Some("drop".to_string()),
            directory: "/in".to_string(),
            pattern: "sales_*.csv".to_string(),
            poll_interval: Some(sluice_config::Duration(Duration::from_secs(1))),
            stable_seconds: Some(3),
            ..FtpWatchConfig::default()
        }
    }

    fn trigger(remote: Arc<dyn Remote>) -> FtpWatchTrigger {
        FtpWatchTrigger::new("claims", watch_cfg(), secrets(), remote).expect("trigger")
    }

    #[test]
    fn missing_secrets_store_is_rejected() {
        let remote = ScriptedRemote::new(vec![]);
        let err = FtpWatchTrigger::new("claims", watch_cfg(), None, remote).expect_err("secrets");
        assert!(matches!(err, TriggerError::SecretsRequired));
    }

    #[test]
    fn invalid_pattern_is_rejected_at_construction() {
        let mut cfg = watch_cfg();
        cfg.pattern = "sales_[.csv".to_string();
        let remote = ScriptedRemote::new(vec![]);
        let err = FtpWatchTrigger::new("claims", cfg, secrets(), remote).expect_err("pattern");
        assert!(matches!(err, TriggerError::InvalidPattern { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn growing_file_becomes_stable_once_and_fires_a_single_event() {
        // Poll interval 1s, stability 3s. The file grows on the second poll,
        // then holds its size; it must be announced exactly once.
        let remote = ScriptedRemote::new(vec![
            vec![file("sales_2024.csv", 100)],
            vec![file("sales_2024.csv", 200)],
            vec![file("sales_2024.csv", 200)],
        ]);
        let trigger = trigger(remote);

        let (tx, mut rx) = mpsc::channel(8);
        let cancel = CancellationToken::new();
        let worker = {
            let cancel = cancel.clone();
            tokio::spawn(async move { trigger.start(cancel, tx).await })
        };

        let event = tokio::time::timeout(Duration::from_secs(60), rx.recv())
            .await
            .expect("an event must fire")
            .expect("channel open");
        assert_eq!(
            event,
            TriggerEvent::file_watch("claims", vec!["sales_2024.csv".to_string()])
        );

        // No duplicate on the polls that follow: emission cleared the
        // tracking entry, so the file has to sit through a fresh stability
        // window (by which time the dispatcher has archived it away).
        let duplicate = tokio::time::timeout(Duration::from_secs(2), rx.recv()).await;
        assert!(duplicate.is_err(), "file was re-announced: {duplicate:?}");

        cancel.cancel();
        worker.await.expect("join").expect("clean stop");
    }

    #[tokio::test(start_paused = true)]
    async fn file_that_keeps_growing_never_fires() {
        let remote = ScriptedRemote::new(vec![
            vec![file("sales_2024.csv", 100)],
            vec![file("sales_2024.csv", 200)],
            vec![file("sales_2024.csv", 300)],
            vec![file("sales_2024.csv", 400)],
            vec![file("sales_2024.csv", 500)],
            vec![file("sales_2024.csv", 600)],
            vec![file("sales_2024.csv", 700)],
            vec![file("sales_2024.csv", 800)],
        ]);
        let trigger = trigger(remote);

        let (tx, mut rx) = mpsc::channel(8);
        let cancel = CancellationToken::new();
        let worker = {
            let cancel = cancel.clone();
            tokio::spawn(async move { trigger.start(cancel, tx).await })
        };

        let fired = tokio::time::timeout(Duration::from_secs(7), rx.recv()).await;
        assert!(fired.is_err(), "growing file must not fire: {fired:?}");

        cancel.cancel();
        worker.await.expect("join").expect("clean stop");
    }

    #[tokio::test(start_paused = true)]
    async fn vanished_files_are_forgotten() {
        // The file disappears before reaching stability, then returns; its
        // timer restarts from scratch and it still fires exactly once.
        let remote = ScriptedRemote::new(vec![
            vec![file("sales_2024.csv", 100)],
            vec![],
            vec![file("sales_2024.csv", 100)],
            vec![file("sales_2024.csv", 100)],
        ]);
        let trigger = trigger(remote);

        let (tx, mut rx) = mpsc::channel(8);
        let cancel = CancellationToken::new();
        let worker = {
            let cancel = cancel.clone();
            tokio::spawn(async move { trigger.start(cancel, tx).await })
        };

        let event = tokio::time::timeout(Duration::from_secs(60), rx.recv())
            .await
            .expect("an event must fire")
            .expect("channel open");
        assert_eq!(event.files, vec!["sales_2024.csv".to_string()]);

        cancel.cancel();
        worker.await.expect("join").expect("clean stop");
    }

    #[tokio::test(start_paused = true)]
    async fn only_matching_files_are_tracked() {
        let remote = ScriptedRemote::new(vec![vec![
            file("sales_2024.csv", 100),
            file("purchases_2024.csv", 100),
            file("sales_2024.txt", 100),
        ]]);
        let trigger = trigger(remote);

        let (tx, mut rx) = mpsc::channel(8);
        let cancel = CancellationToken::new();
        let worker = {
            let cancel = cancel.clone();
            tokio::spawn(async move { trigger.start(cancel, tx).await })
        };

        let event = tokio::time::timeout(Duration::from_secs(60), rx.recv())
            .await
            .expect("an event must fire")
            .expect("channel open");
        assert_eq!(event.files, vec!["sales_2024.csv".to_string()]);

        cancel.cancel();
        worker.await.expect("join").expect("clean stop");
    }
}
