mod cron_trigger;
mod dispatcher;
mod event;
mod ftp_watch;

pub use cron_trigger::CronTrigger;
pub use dispatcher::{Dispatcher, SchedError, ServeOpts};
pub use event::{EventSource, TriggerEvent};
pub use ftp_watch::FtpWatchTrigger;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Error)]
pub enum TriggerError {
    #[error("invalid cron schedule {expr:?}: {source}")]
    InvalidSchedule {
        expr: String,
        source: cron::error::Error,
    },
    #[error("secrets store required for FTP watch")]
    SecretsRequired,
    #[error("invalid ftp_watch pattern {pattern:?}: {message}")]
    InvalidPattern { pattern: String, message: String },
    #[error("event channel closed")]
    ChannelClosed,
}

/// A long-lived producer of [`TriggerEvent`]s bound to a single DAG.
///
/// `start` blocks until the token is cancelled; transient runtime failures
/// (a poll that cannot connect, a fire with nowhere to send) are logged and
/// absorbed, never returned.
#[async_trait]
pub trait Trigger: Send + Sync {
    async fn start(
        &self,
        cancel: CancellationToken,
        events: mpsc::Sender<TriggerEvent>,
    ) -> Result<(), TriggerError>;

    /// Human-readable identifier for startup logs.
    fn describe(&self) -> String;
}
