//! Trigger consumer: resolve the recipient, send the email, complete the
//! alert, commit the offset. Redelivery is the only retry mechanism, so the
//! commit decision is the whole contract.

use crate::email::{trigger_notification, Mailer};
use crate::errors::ServiceError;
use crate::models::AlertStatus;
use crate::store::AlertRepo;
use rdkafka::config::ClientConfig;
use rdkafka::consumer::{CommitMode, Consumer, StreamConsumer};
use rdkafka::message::Message;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{error, info, warn};

/// What to do with the message after processing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerOutcome {
    /// Done (or nothing can ever be done): commit the offset.
    Commit,
    /// Leave the offset alone so the group redelivers the message.
    Retry,
}

/// Process one trigger message. Completion is idempotent because status moves
/// are monotonic, so a redelivered message converges to the same terminal
/// state; a second email send is permitted (at-least-once).
pub async fn handle_trigger(
    repo: &dyn AlertRepo,
    mailer: &dyn Mailer,
    key: &str,
    price: &str,
) -> TriggerOutcome {
    let alert_id: i64 = match key.parse() {
        Ok(id) => id,
        Err(_) => {
            // Poison message: it will never parse, don't wedge the partition.
            warn!(key, "trigger message with non-numeric key");
            return TriggerOutcome::Commit;
        }
    };

    let email = match repo.get_user_email_by_alert(alert_id).await {
        Ok(email) => email,
        Err(ServiceError::NotFound(_)) => {
            info!(alert_id, "alert gone before notification; dropping trigger");
            return TriggerOutcome::Commit;
        }
        Err(e) => {
            warn!(alert_id, error = %e, "recipient lookup failed; leaving for redelivery");
            return TriggerOutcome::Retry;
        }
    };

    let (subject, body) = trigger_notification(price);
    if let Err(e) = mailer.send(&email, &subject, &body).await {
        warn!(alert_id, error = %e, "email send failed; leaving for redelivery");
        return TriggerOutcome::Retry;
    }

    match repo.update_status(alert_id, AlertStatus::Completed).await {
        Ok(()) => {
            info!(alert_id, price, "alert completed");
            TriggerOutcome::Commit
        }
        Err(ServiceError::NotFound(_)) => {
            info!(alert_id, "alert deleted after send; committing");
            TriggerOutcome::Commit
        }
        Err(e @ ServiceError::Validation(_)) => {
            // A trigger for a row that never reached `triggered` cannot make
            // progress; redelivering it forever would not change that.
            error!(alert_id, error = %e, "cannot complete alert; committing");
            TriggerOutcome::Commit
        }
        Err(e) => {
            warn!(alert_id, error = %e, "completion failed; leaving for redelivery");
            TriggerOutcome::Retry
        }
    }
}

pub struct TriggerConsumer {
    consumer: StreamConsumer,
    repo: Arc<dyn AlertRepo>,
    mailer: Arc<dyn Mailer>,
}

impl TriggerConsumer {
    pub fn new(
        address: &str,
        group: &str,
        topic: &str,
        repo: Arc<dyn AlertRepo>,
        mailer: Arc<dyn Mailer>,
    ) -> anyhow::Result<Self> {
        let consumer: StreamConsumer = ClientConfig::new()
            .set("bootstrap.servers", address)
            .set("group.id", group)
            // Offsets are committed only after the alert is completed.
            .set("enable.auto.commit", "false")
            .set("auto.offset.reset", "earliest")
            .create()?;

        consumer.subscribe(&[topic])?;

        Ok(Self {
            consumer,
            repo,
            mailer,
        })
    }

    /// Poll loop. Stops at the shutdown signal and lets the group rebalance.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!("trigger consumer started");

        loop {
            tokio::select! {
                _ = shutdown.changed() => {
                    info!("trigger consumer shut down");
                    return;
                }
                received = self.consumer.recv() => {
                    let message = match received {
                        Ok(message) => message,
                        Err(e) => {
                            warn!(error = %e, "consumer poll error");
                            continue;
                        }
                    };

                    let key = message
                        .key()
                        .map(|k| String::from_utf8_lossy(k).into_owned())
                        .unwrap_or_default();
                    let price = message
                        .payload()
                        .map(|p| String::from_utf8_lossy(p).into_owned())
                        .unwrap_or_default();

                    let outcome =
                        handle_trigger(self.repo.as_ref(), self.mailer.as_ref(), &key, &price)
                            .await;

                    if outcome == TriggerOutcome::Commit {
                        if let Err(e) = self.consumer.commit_message(&message, CommitMode::Async) {
                            warn!(error = %e, "offset commit failed");
                        }
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::Result;
    use crate::models::{Alert, Direction, Symbol, User};
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use rust_decimal::Decimal;
    use std::collections::HashMap;

    #[derive(Default)]
    struct FakeRepo {
        statuses: Mutex<HashMap<i64, AlertStatus>>,
        emails: Mutex<HashMap<i64, String>>,
        lookup_fails: Mutex<bool>,
    }

    impl FakeRepo {
        fn with_alert(id: i64, status: AlertStatus, email: &str) -> Self {
            let repo = Self::default();
            repo.statuses.lock().insert(id, status);
            repo.emails.lock().insert(id, email.to_string());
            repo
        }

        fn status_of(&self, id: i64) -> Option<AlertStatus> {
            self.statuses.lock().get(&id).copied()
        }
    }

    #[async_trait]
    impl AlertRepo for FakeRepo {
        async fn create_user(&self, _: &str, _: &str) -> Result<User> {
            unimplemented!()
        }
        async fn get_user(&self, _: i64) -> Result<User> {
            unimplemented!()
        }
        async fn create_alert(&self, _: i64, _: Symbol, _: Decimal, _: Direction) -> Result<Alert> {
            unimplemented!()
        }
        async fn get_alert(&self, _: i64) -> Result<Alert> {
            unimplemented!()
        }
        async fn list_alerts(&self, _: i64, _: i64, _: i64) -> Result<Vec<Alert>> {
            unimplemented!()
        }
        async fn list_alerts_by_status(
            &self,
            _: i64,
            _: AlertStatus,
            _: i64,
            _: i64,
        ) -> Result<Vec<Alert>> {
            unimplemented!()
        }
        async fn list_created_alerts(&self, _: i64, _: i64) -> Result<Vec<Alert>> {
            unimplemented!()
        }
        async fn update_alert(&self, _: i64, _: Symbol, _: Decimal, _: Direction) -> Result<Alert> {
            unimplemented!()
        }

        async fn update_status(&self, id: i64, new_status: AlertStatus) -> Result<()> {
            let mut statuses = self.statuses.lock();
            match statuses.get(&id).copied() {
                None => Err(ServiceError::NotFound("alert")),
                Some(current) if current == new_status => Ok(()),
                Some(current) if current.can_transition_to(new_status) => {
                    statuses.insert(id, new_status);
                    Ok(())
                }
                Some(current) => Err(ServiceError::validation(format!(
                    "alert {id} cannot move from {current} to {new_status}"
                ))),
            }
        }

        async fn get_user_email_by_alert(&self, alert_id: i64) -> Result<String> {
            if *self.lookup_fails.lock() {
                return Err(ServiceError::transient("store down"));
            }
            self.emails
                .lock()
                .get(&alert_id)
                .cloned()
                .ok_or(ServiceError::NotFound("alert"))
        }
    }

    #[derive(Default)]
    struct FakeMailer {
        sent: Mutex<Vec<(String, String)>>,
        fail: Mutex<bool>,
    }

    #[async_trait]
    impl Mailer for FakeMailer {
        async fn send(&self, to: &str, _subject: &str, body: &str) -> Result<()> {
            if *self.fail.lock() {
                return Err(ServiceError::transient("smtp down"));
            }
            self.sent.lock().push((to.to_string(), body.to_string()));
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_happy_path_sends_completes_and_commits() {
        let repo = FakeRepo::with_alert(42, AlertStatus::Triggered, "user@example.com");
        let mailer = FakeMailer::default();

        let outcome = handle_trigger(&repo, &mailer, "42", "100.0").await;

        assert_eq!(outcome, TriggerOutcome::Commit);
        assert_eq!(repo.status_of(42), Some(AlertStatus::Completed));

        let sent = mailer.sent.lock();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].0, "user@example.com");
        assert!(sent[0].1.contains("100.0"));
    }

    #[tokio::test]
    async fn test_redelivery_converges_without_regression() {
        let repo = FakeRepo::with_alert(42, AlertStatus::Triggered, "user@example.com");
        let mailer = FakeMailer::default();

        // First delivery completes; a redelivered copy re-sends and commits
        // again, but the status never moves backwards.
        for _ in 0..2 {
            let outcome = handle_trigger(&repo, &mailer, "42", "100.0").await;
            assert_eq!(outcome, TriggerOutcome::Commit);
            assert_eq!(repo.status_of(42), Some(AlertStatus::Completed));
        }
        assert_eq!(mailer.sent.lock().len(), 2);
    }

    #[tokio::test]
    async fn test_missing_alert_commits_without_sending() {
        let repo = FakeRepo::default();
        let mailer = FakeMailer::default();

        let outcome = handle_trigger(&repo, &mailer, "7", "55").await;

        assert_eq!(outcome, TriggerOutcome::Commit);
        assert!(mailer.sent.lock().is_empty());
    }

    #[tokio::test]
    async fn test_send_failure_retries_and_preserves_status() {
        let repo = FakeRepo::with_alert(42, AlertStatus::Triggered, "user@example.com");
        let mailer = FakeMailer::default();
        *mailer.fail.lock() = true;

        let outcome = handle_trigger(&repo, &mailer, "42", "100.0").await;

        assert_eq!(outcome, TriggerOutcome::Retry);
        assert_eq!(repo.status_of(42), Some(AlertStatus::Triggered));
    }

    #[tokio::test]
    async fn test_transient_lookup_failure_retries() {
        let repo = FakeRepo::with_alert(42, AlertStatus::Triggered, "user@example.com");
        *repo.lookup_fails.lock() = true;
        let mailer = FakeMailer::default();

        let outcome = handle_trigger(&repo, &mailer, "42", "100.0").await;

        assert_eq!(outcome, TriggerOutcome::Retry);
        assert!(mailer.sent.lock().is_empty());
    }

    #[tokio::test]
    async fn test_garbage_key_is_committed_as_poison() {
        let repo = FakeRepo::default();
        let mailer = FakeMailer::default();

        let outcome = handle_trigger(&repo, &mailer, "not-an-id", "1").await;

        assert_eq!(outcome, TriggerOutcome::Commit);
        assert!(mailer.sent.lock().is_empty());
    }
}
