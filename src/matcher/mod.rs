//! Matching engine: one task per symbol turning market ticks into triggers.
//!
//! Each tick reads the last price, range-pops every crossed alert out of the
//! live index, moves the row to `triggered`, and publishes the notification.
//! At-most-once firing rests entirely on the index's atomic pop; everything
//! downstream is at-least-once.

use crate::errors::ServiceError;
use crate::index::PriceIndex;
use crate::ingest::{LastPriceMap, NO_TICK};
use crate::models::{AlertStatus, Direction, Symbol};
use crate::queue::TriggerSink;
use crate::store::AlertRepo;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{info, warn};

pub struct Matcher {
    prices: Arc<LastPriceMap>,
    index: Arc<dyn PriceIndex>,
    repo: Arc<dyn AlertRepo>,
    producer: Arc<dyn TriggerSink>,
    errors: mpsc::Sender<ServiceError>,
    tick_interval: Duration,
}

impl Matcher {
    pub fn new(
        prices: Arc<LastPriceMap>,
        index: Arc<dyn PriceIndex>,
        repo: Arc<dyn AlertRepo>,
        producer: Arc<dyn TriggerSink>,
        errors: mpsc::Sender<ServiceError>,
        tick_interval: Duration,
    ) -> Self {
        Self {
            prices,
            index,
            repo,
            producer,
            errors,
            tick_interval,
        }
    }

    /// Spawn one matcher task per symbol, each on its own interval so a slow
    /// tick on one market never stalls the others.
    pub fn spawn_all(
        self: Arc<Self>,
        shutdown: &watch::Receiver<bool>,
    ) -> Vec<JoinHandle<()>> {
        Symbol::ALL
            .iter()
            .map(|&symbol| {
                let matcher = self.clone();
                let shutdown = shutdown.clone();
                tokio::spawn(async move { matcher.run_symbol(symbol, shutdown).await })
            })
            .collect()
    }

    async fn run_symbol(&self, symbol: Symbol, mut shutdown: watch::Receiver<bool>) {
        info!(symbol = %symbol, tick_ms = self.tick_interval.as_millis() as u64, "matcher started");
        let mut ticker = tokio::time::interval(self.tick_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = shutdown.changed() => {
                    info!(symbol = %symbol, "matcher shut down");
                    return;
                }
                _ = ticker.tick() => self.tick_once(symbol).await,
            }
        }
    }

    /// One evaluation pass for one symbol. Ticks for the same symbol are
    /// serial by construction (one task, awaited in sequence); ticks across
    /// symbols run concurrently.
    pub async fn tick_once(&self, symbol: Symbol) {
        let price = self.prices.get(symbol);
        if price == NO_TICK {
            return;
        }

        for direction in [Direction::Above, Direction::Below] {
            let crossed = match self.index.pop_crossed(symbol, direction, &price).await {
                Ok(ids) => ids,
                Err(e) => {
                    // Index unreachable: skip this tick, keep the loop alive.
                    let _ = self.errors.send(e).await;
                    return;
                }
            };

            for alert_id in crossed {
                info!(symbol = %symbol, price = %price, alert_id, "alert crossed");

                match self.repo.update_status(alert_id, AlertStatus::Triggered).await {
                    Ok(()) => {}
                    Err(e @ (ServiceError::NotFound(_) | ServiceError::Validation(_))) => {
                        // The row was deleted or mutated concurrently; the pop
                        // already removed it from the index, nothing to send.
                        warn!(alert_id, error = %e, "skipping stale alert");
                        continue;
                    }
                    Err(e) => {
                        let _ = self.errors.send(e).await;
                        continue;
                    }
                }

                if let Err(e) = self.producer.publish(alert_id, &price).await {
                    let _ = self.errors.send(e).await;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::Result;
    use crate::index::MemoryIndex;
    use crate::models::{Alert, User};
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use rust_decimal::Decimal;
    use std::collections::HashMap;
    use std::str::FromStr;

    /// Store fake: a status map plus switches for the failure paths.
    #[derive(Default)]
    struct FakeRepo {
        statuses: Mutex<HashMap<i64, AlertStatus>>,
        fail_transiently: Mutex<bool>,
    }

    impl FakeRepo {
        fn with_created(ids: &[i64]) -> Self {
            let repo = Self::default();
            {
                let mut statuses = repo.statuses.lock();
                for &id in ids {
                    statuses.insert(id, AlertStatus::Created);
                }
            }
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
            if *self.fail_transiently.lock() {
                return Err(ServiceError::transient("store down"));
            }
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

        async fn get_user_email_by_alert(&self, _: i64) -> Result<String> {
            unimplemented!()
        }
    }

    /// Producer fake recording every publish.
    #[derive(Default)]
    struct FakeSink {
        published: Mutex<Vec<(i64, String)>>,
    }

    #[async_trait]
    impl TriggerSink for FakeSink {
        async fn publish(&self, alert_id: i64, price: &str) -> Result<()> {
            self.published.lock().push((alert_id, price.to_string()));
            Ok(())
        }
    }

    fn dec(s: &str) -> Decimal {
        Decimal::from_str(s).unwrap()
    }

    struct Harness {
        matcher: Matcher,
        index: Arc<MemoryIndex>,
        repo: Arc<FakeRepo>,
        sink: Arc<FakeSink>,
        prices: Arc<LastPriceMap>,
        errors: mpsc::Receiver<ServiceError>,
    }

    fn harness(repo: FakeRepo) -> Harness {
        let prices = Arc::new(LastPriceMap::new());
        let index = Arc::new(MemoryIndex::new());
        let repo = Arc::new(repo);
        let sink = Arc::new(FakeSink::default());
        let (err_tx, errors) = mpsc::channel(64);

        let matcher = Matcher::new(
            prices.clone(),
            index.clone(),
            repo.clone(),
            sink.clone(),
            err_tx,
            Duration::from_millis(100),
        );

        Harness {
            matcher,
            index,
            repo,
            sink,
            prices,
            errors,
        }
    }

    #[tokio::test]
    async fn test_above_cross_fires_exactly_once() {
        let mut h = harness(FakeRepo::with_created(&[1]));
        h.index.add(1, Symbol::Btc, dec("100.0"), Direction::Above).await.unwrap();

        // Below the target: nothing happens.
        h.prices.set(Symbol::Btc, "99.9".to_string());
        h.matcher.tick_once(Symbol::Btc).await;
        assert!(h.sink.published.lock().is_empty());

        // At the target: exactly one trigger, status moved forward.
        h.prices.set(Symbol::Btc, "100.0".to_string());
        h.matcher.tick_once(Symbol::Btc).await;

        assert_eq!(*h.sink.published.lock(), vec![(1, "100.0".to_string())]);
        assert_eq!(h.repo.status_of(1), Some(AlertStatus::Triggered));

        // Market keeps rising: no double fire.
        for price in ["101", "102"] {
            h.prices.set(Symbol::Btc, price.to_string());
            h.matcher.tick_once(Symbol::Btc).await;
        }
        assert_eq!(h.sink.published.lock().len(), 1);
        assert!(h.errors.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_below_cross_fires_on_drop() {
        let h = harness(FakeRepo::with_created(&[2]));
        h.index.add(2, Symbol::Eth, dec("50.0"), Direction::Below).await.unwrap();

        h.prices.set(Symbol::Eth, "51".to_string());
        h.matcher.tick_once(Symbol::Eth).await;
        assert!(h.sink.published.lock().is_empty());

        h.prices.set(Symbol::Eth, "50".to_string());
        h.matcher.tick_once(Symbol::Eth).await;

        assert_eq!(*h.sink.published.lock(), vec![(2, "50".to_string())]);
        assert_eq!(h.repo.status_of(2), Some(AlertStatus::Triggered));
    }

    #[tokio::test]
    async fn test_both_directions_checked_in_one_tick() {
        let h = harness(FakeRepo::with_created(&[1, 2]));
        h.index.add(1, Symbol::Btc, dec("90"), Direction::Above).await.unwrap();
        h.index.add(2, Symbol::Btc, dec("110"), Direction::Below).await.unwrap();

        h.prices.set(Symbol::Btc, "100".to_string());
        h.matcher.tick_once(Symbol::Btc).await;

        let mut published = h.sink.published.lock().clone();
        published.sort_unstable();
        assert_eq!(
            published,
            vec![(1, "100".to_string()), (2, "100".to_string())]
        );
    }

    #[tokio::test]
    async fn test_sentinel_price_skips_tick() {
        let h = harness(FakeRepo::with_created(&[1]));
        h.index.add(1, Symbol::Sol, dec("0"), Direction::Above).await.unwrap();

        // No tick observed yet; even a zero-target alert must wait.
        h.matcher.tick_once(Symbol::Sol).await;

        assert!(h.sink.published.lock().is_empty());
        assert_eq!(h.index.len(), 1);
    }

    #[tokio::test]
    async fn test_deleted_alert_is_not_published() {
        // Index still holds the entry, but the row is gone from the store.
        let h = harness(FakeRepo::default());
        h.index.add(9, Symbol::Btc, dec("100"), Direction::Above).await.unwrap();

        h.prices.set(Symbol::Btc, "100".to_string());
        h.matcher.tick_once(Symbol::Btc).await;

        assert!(h.sink.published.lock().is_empty());
    }

    #[tokio::test]
    async fn test_transient_store_failure_reports_and_continues() {
        let mut h = harness(FakeRepo::with_created(&[1]));
        h.index.add(1, Symbol::Btc, dec("100"), Direction::Above).await.unwrap();
        *h.repo.fail_transiently.lock() = true;

        h.prices.set(Symbol::Btc, "100".to_string());
        h.matcher.tick_once(Symbol::Btc).await;

        // Error routed to the channel, nothing published, loop survives.
        assert!(matches!(h.errors.try_recv(), Ok(ServiceError::Transient(_))));
        assert!(h.sink.published.lock().is_empty());
    }

    #[tokio::test]
    async fn test_identical_alerts_from_two_users_both_fire() {
        let h = harness(FakeRepo::with_created(&[11, 12]));
        h.index.add(11, Symbol::Btc, dec("100"), Direction::Above).await.unwrap();
        h.index.add(12, Symbol::Btc, dec("100"), Direction::Above).await.unwrap();

        h.prices.set(Symbol::Btc, "100".to_string());
        h.matcher.tick_once(Symbol::Btc).await;

        let mut published: Vec<i64> = h.sink.published.lock().iter().map(|(id, _)| *id).collect();
        published.sort_unstable();
        assert_eq!(published, vec![11, 12]);
    }
}
