use crate::event::TriggerEvent;
use crate::{Trigger, TriggerError};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sluice_config::parse_schedule;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Fires events on a standard 5-field cron schedule.
#[derive(Debug)]
pub struct CronTrigger {
    dag_name: String,
    expr: String,
    schedule: cron::Schedule,
}

impl CronTrigger {
    /// Validates the schedule expression at construction.
    pub fn new(dag_name: impl Into<String>, expr: &str) -> Result<Self, TriggerError> {
        let schedule = parse_schedule(expr).map_err(|source| TriggerError::InvalidSchedule {
            expr: expr.to_string(),
            source,
        })?;
        Ok(Self {
            dag_name: dag_name.into(),
            expr: expr.to_string(),
            schedule,
        })
    }

    /// The next fire time strictly after `after`.
    pub fn next_after(&self, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.schedule.after(&after).next()
    }
}

#[async_trait]
impl Trigger for CronTrigger {
    async fn start(
        &self,
        cancel: CancellationToken,
        events: mpsc::Sender<TriggerEvent>,
    ) -> Result<(), TriggerError> {
        loop {
            let now = Utc::now();
            let Some(next) = self.next_after(now) else {
                // The schedule has no future fire times; nothing left to do.
                return Ok(());
            };
            let wait = (next - now).to_std().unwrap_or(Duration::ZERO);
            debug!(dag = %self.dag_name, fire_at = %next, "cron trigger sleeping until next fire");

            tokio::select! {
                _ = cancel.cancelled() => return Ok(()),
                _ = tokio::time::sleep(wait) => {}
            }

            let event = TriggerEvent::cron(&self.dag_name);
            tokio::select! {
                _ = cancel.cancelled() => return Ok(()),
                sent = events.send(event) => {
                    if sent.is_err() {
                        return Err(TriggerError::ChannelClosed);
                    }
                }
            }
        }
    }

    fn describe(&self) -> String {
        format!("cron({}) → {}", self.expr, self.dag_name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn invalid_expression_is_rejected_at_construction() {
        let err = CronTrigger::new("claims", "not a schedule").expect_err("invalid");
        assert!(matches!(err, TriggerError::InvalidSchedule { .. }));
        assert!(err.to_string().contains("not a schedule"));
    }

    #[test]
    fn five_field_expressions_are_accepted() {
        assert!(CronTrigger::new("claims", "0 2 * * *").is_ok());
        assert!(CronTrigger::new("claims", "*/15 * * * 1-5").is_ok());
    }

    #[test]
    fn next_after_honours_the_expression() {
        let trigger = CronTrigger::new("claims", "30 2 * * *").expect("trigger");
        let after = Utc.with_ymd_and_hms(2024, 1, 15, 0, 0, 0).single().expect("time");
        let next = trigger.next_after(after).expect("next fire");
        assert_eq!(
            next,
            Utc.with_ymd_and_hms(2024, 1, 15, 2, 30, 0).single().expect("time")
        );

        // Strictly after: asking again from the fire time moves a day ahead.
        let following = trigger.next_after(next).expect("following fire");
        assert_eq!(
            following,
            Utc.with_ymd_and_hms(2024, 1, 16, 2, 30, 0).single().expect("time")
        );
    }

    #[test]
    fn describe_names_schedule_and_dag() {
        let trigger = CronTrigger::new("claims", "0 2 * * *").expect("trigger");
        assert_eq!(trigger.describe(), "cron(0 2 * * *) → claims");
    }

    #[tokio::test]
    async fn start_returns_promptly_on_cancellation() {
        let trigger = CronTrigger::new("claims", "0 2 * * *").expect("trigger");
        let (tx, _rx) = mpsc::channel(1);
        let cancel = CancellationToken::new();
        cancel.cancel();

        tokio::time::timeout(Duration::from_secs(1), trigger.start(cancel, tx))
            .await
            .expect("start must return once cancelled")
            .expect("clean stop");
    }
}
