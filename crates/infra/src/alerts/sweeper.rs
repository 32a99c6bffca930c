use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{info, warn};

use super::AlertEvaluator;

/// Handle to stop and join a running sweeper.
#[derive(Debug)]
pub struct SweeperHandle {
    shutdown: Option<oneshot::Sender<()>>,
    join: Option<JoinHandle<()>>,
}

impl SweeperHandle {
    /// Request graceful shutdown and wait for the sweeper to stop. A sweep in
    /// progress finishes first.
    pub async fn shutdown(mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        if let Some(join) = self.join.take() {
            if let Err(err) = join.await {
                warn!(error = %err, "alert sweeper task ended abnormally");
            }
        }
    }
}

/// Periodic stock and expiry sweep.
#[derive(Debug)]
pub struct AlertSweeper;

impl AlertSweeper {
    /// Spawn the sweep loop on the current runtime. The first sweep runs
    /// immediately, then once per `interval`.
    pub fn spawn(evaluator: Arc<AlertEvaluator>, interval: Duration) -> SweeperHandle {
        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let join = tokio::spawn(sweep_loop(evaluator, interval, shutdown_rx));
        SweeperHandle {
            shutdown: Some(shutdown_tx),
            join: Some(join),
        }
    }
}

async fn sweep_loop(
    evaluator: Arc<AlertEvaluator>,
    interval: Duration,
    mut shutdown_rx: oneshot::Receiver<()>,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    info!(interval_secs = interval.as_secs(), "alert sweeper started");

    loop {
        tokio::select! {
            _ = &mut shutdown_rx => break,
            _ = ticker.tick() => {
                let today = Utc::now().date_naive();
                if let Err(err) = evaluator.sweep(today).await {
                    warn!(error = %err, "alert sweep failed, retrying next interval");
                }
            }
        }
    }

    info!("alert sweeper stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use rxledger_core::ProductId;
    use rxledger_events::InMemoryEventBus;
    use rxledger_inventory::NewProduct;

    use crate::audit::InMemoryAuditLog;
    use crate::notify::{LedgerEnvelope, Notifier};
    use crate::store::{AlertStore, InMemoryAlertStore, InMemoryLedgerStore, LedgerStore};

    #[tokio::test]
    async fn sweeper_runs_immediately_and_stops_on_shutdown() {
        let ledger = InMemoryLedgerStore::new();
        let alerts = Arc::new(InMemoryAlertStore::new());
        let bus: Arc<InMemoryEventBus<LedgerEnvelope>> = Arc::new(InMemoryEventBus::new());
        let evaluator = Arc::new(AlertEvaluator::new(
            Arc::new(ledger.clone()),
            alerts.clone(),
            Arc::new(Notifier::new(bus)),
            Arc::new(InMemoryAuditLog::new()),
        ));

        let product = NewProduct {
            code: "IBU-200".into(),
            name: "Ibuprofen 200mg".into(),
            unit_price: 450,
            reorder_threshold: 5,
            expiry_date: None,
        }
        .into_product(ProductId::new(), Utc::now())
        .unwrap();
        ledger.insert_product(&product).await.unwrap();

        let handle = AlertSweeper::spawn(evaluator, Duration::from_secs(3600));

        let mut opened = Vec::new();
        for _ in 0..100 {
            opened = alerts.open_alerts(product.id).await.unwrap();
            if !opened.is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(opened.len(), 1, "first sweep should open the out-of-stock alert");

        tokio::time::timeout(Duration::from_secs(5), handle.shutdown())
            .await
            .unwrap();
    }
}
