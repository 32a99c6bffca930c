use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Arc, Mutex as StdMutex};

use chrono::{DateTime, NaiveDate, Utc};
use tokio::sync::Mutex;
use tracing::instrument;

use rxledger_core::{Actor, AlertId, DomainError, ProductId, UserId};
use rxledger_inventory::{AlertFilter, AlertPlan, Product, StockAlert};

use crate::audit::{AuditAction, AuditEntry, AuditSink, record_quietly};
use crate::error::{ErrorKind, LedgerError, trace_failure};
use crate::notify::{LedgerEvent, Notifier};
use crate::store::{AlertStore, LedgerStore, ResolveOutcome};

/// Alerts opened and closed by one evaluation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AlertChanges {
    pub opened: Vec<StockAlert>,
    pub resolved: Vec<StockAlert>,
}

impl AlertChanges {
    pub fn is_empty(&self) -> bool {
        self.opened.is_empty() && self.resolved.is_empty()
    }

    fn absorb(&mut self, other: AlertChanges) {
        self.opened.extend(other.opened);
        self.resolved.extend(other.resolved);
    }
}

/// Outcome of a full sweep.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub products_evaluated: usize,
    pub changes: AlertChanges,
}

/// Opens and auto-resolves stock and expiry alerts.
///
/// Evaluations of one product are serialized so that a slower evaluation
/// working from an older stock level cannot overwrite a newer one. Different
/// products evaluate independently.
pub struct AlertEvaluator {
    ledger: Arc<dyn LedgerStore>,
    alerts: Arc<dyn AlertStore>,
    notifier: Arc<Notifier>,
    audit: Arc<dyn AuditSink>,
    guards: StdMutex<HashMap<ProductId, Arc<Mutex<()>>>>,
}

impl AlertEvaluator {
    pub fn new(
        ledger: Arc<dyn LedgerStore>,
        alerts: Arc<dyn AlertStore>,
        notifier: Arc<Notifier>,
        audit: Arc<dyn AuditSink>,
    ) -> Self {
        Self {
            ledger,
            alerts,
            notifier,
            audit,
            guards: StdMutex::new(HashMap::new()),
        }
    }

    fn guard(&self, product_id: ProductId) -> Arc<Mutex<()>> {
        let mut guards = self.guards.lock().unwrap_or_else(|e| e.into_inner());
        guards.entry(product_id).or_default().clone()
    }

    /// Apply the stock rules to the product's current state.
    ///
    /// Archived products get every open alert closed and none opened.
    #[instrument(skip(self), fields(product_id = %product_id))]
    pub async fn evaluate(&self, product_id: ProductId) -> Result<AlertChanges, LedgerError> {
        let guard = self.guard(product_id);
        let _held = guard.lock().await;

        let product = self
            .ledger
            .product(product_id)
            .await?
            .ok_or_else(|| LedgerError::not_found(format!("product {product_id}")))?;
        let now = Utc::now();
        self.apply(&product, AlertPlan::for_stock(&product), now.date_naive(), now)
            .await
    }

    /// Stock and expiry rules together, as of `today`.
    pub async fn evaluate_with_expiry(
        &self,
        product_id: ProductId,
        today: NaiveDate,
    ) -> Result<AlertChanges, LedgerError> {
        let guard = self.guard(product_id);
        let _held = guard.lock().await;

        let product = self
            .ledger
            .product(product_id)
            .await?
            .ok_or_else(|| LedgerError::not_found(format!("product {product_id}")))?;
        self.apply(
            &product,
            AlertPlan::for_product(&product, today),
            today,
            Utc::now(),
        )
        .await
    }

    /// Close every open alert of a product (used when it is deleted).
    pub async fn close_all(&self, product_id: ProductId) -> Result<AlertChanges, LedgerError> {
        let guard = self.guard(product_id);
        let _held = guard.lock().await;

        let mut changes = AlertChanges::default();
        let at = Utc::now();
        for alert in self.alerts.open_alerts(product_id).await? {
            if let Some(closed) = self
                .alerts
                .resolve_open(product_id, alert.alert_type, UserId::system(), at)
                .await?
            {
                changes.resolved.push(closed);
            }
        }
        self.announce(&changes);
        Ok(changes)
    }

    /// Evaluate stock and expiry rules for every product, then auto-resolve
    /// whatever is left open without a qualifying condition.
    #[instrument(skip(self))]
    pub async fn sweep(&self, today: NaiveDate) -> Result<SweepReport, LedgerError> {
        let products = self.ledger.list_products(true).await?;
        let mut report = SweepReport {
            products_evaluated: products.len(),
            ..SweepReport::default()
        };

        for product in &products {
            match self.evaluate_with_expiry(product.id, today).await {
                Ok(changes) => report.changes.absorb(changes),
                Err(err) if err.kind() == ErrorKind::NotFound => {}
                Err(err) => {
                    trace_failure("alert_sweep", &err);
                    return Err(err);
                }
            }
        }

        report.changes.absorb(self.auto_resolve(today).await?);
        tracing::info!(
            products = report.products_evaluated,
            opened = report.changes.opened.len(),
            resolved = report.changes.resolved.len(),
            "alert sweep finished"
        );
        Ok(report)
    }

    /// Close, in bulk, open alerts whose condition no longer holds. Alerts of
    /// products that no longer exist are closed as well.
    pub async fn auto_resolve(&self, today: NaiveDate) -> Result<AlertChanges, LedgerError> {
        let open = self
            .alerts
            .list(&AlertFilter {
                resolved: Some(false),
                ..AlertFilter::default()
            })
            .await?;

        let mut by_product: BTreeMap<ProductId, Vec<StockAlert>> = BTreeMap::new();
        for alert in open {
            by_product.entry(alert.product_id).or_default().push(alert);
        }

        let mut changes = AlertChanges::default();
        let at = Utc::now();
        for (product_id, alerts) in by_product {
            let guard = self.guard(product_id);
            let _held = guard.lock().await;

            let still_valid: HashSet<_> = match self.ledger.product(product_id).await? {
                Some(product) => AlertPlan::for_product(&product, today)
                    .open
                    .into_iter()
                    .collect(),
                None => HashSet::new(),
            };
            for alert in alerts {
                if still_valid.contains(&alert.alert_type) {
                    continue;
                }
                if let Some(closed) = self
                    .alerts
                    .resolve_open(product_id, alert.alert_type, UserId::system(), at)
                    .await?
                {
                    changes.resolved.push(closed);
                }
            }
        }
        self.announce(&changes);
        Ok(changes)
    }

    /// Manually resolve an alert. Requires a staff actor.
    #[instrument(skip(self, actor), fields(alert_id = %alert_id, actor = %actor.user_id()))]
    pub async fn resolve(&self, alert_id: AlertId, actor: &Actor) -> Result<StockAlert, LedgerError> {
        let result = self.resolve_inner(alert_id, actor).await;
        if let Err(err) = &result {
            trace_failure("resolve_alert", err);
        }
        result
    }

    async fn resolve_inner(&self, alert_id: AlertId, actor: &Actor) -> Result<StockAlert, LedgerError> {
        if actor.is_system() {
            return Err(DomainError::unauthorized(
                "alerts must be resolved by a staff member, not the system identity",
            )
            .into());
        }

        let at = Utc::now();
        match self.alerts.resolve(alert_id, actor.user_id(), at).await? {
            ResolveOutcome::Resolved(alert) => {
                record_quietly(
                    self.audit.as_ref(),
                    AuditEntry::new(
                        actor,
                        AuditAction::AlertResolved,
                        "stock_alert",
                        alert.id,
                        format!("resolved {} alert: {}", alert.alert_type, alert.message),
                        at,
                    ),
                );
                self.notifier.publish(LedgerEvent::AlertResolved {
                    alert: alert.clone(),
                });
                Ok(alert)
            }
            ResolveOutcome::AlreadyResolved(alert) => Err(DomainError::business(format!(
                "alert {} is already resolved",
                alert.id
            ))
            .into()),
        }
    }

    pub async fn list(&self, filter: &AlertFilter) -> Result<Vec<StockAlert>, LedgerError> {
        Ok(self.alerts.list(filter).await?)
    }

    pub async fn alert(&self, id: AlertId) -> Result<StockAlert, LedgerError> {
        self.alerts
            .alert(id)
            .await?
            .ok_or_else(|| LedgerError::not_found(format!("alert {id}")))
    }

    async fn apply(
        &self,
        product: &Product,
        plan: AlertPlan,
        today: NaiveDate,
        at: DateTime<Utc>,
    ) -> Result<AlertChanges, LedgerError> {
        let mut changes = AlertChanges::default();

        for alert_type in &plan.close {
            if let Some(closed) = self
                .alerts
                .resolve_open(product.id, *alert_type, UserId::system(), at)
                .await?
            {
                changes.resolved.push(closed);
            }
        }
        for alert_type in &plan.open {
            let candidate = StockAlert::open(product, *alert_type, today, at);
            if let Some(opened) = self.alerts.open_if_absent(candidate).await? {
                changes.opened.push(opened);
            }
        }

        self.announce(&changes);
        Ok(changes)
    }

    fn announce(&self, changes: &AlertChanges) {
        for alert in &changes.opened {
            tracing::info!(
                product_id = %alert.product_id,
                alert_type = %alert.alert_type,
                severity = alert.severity.as_str(),
                "alert opened"
            );
            self.notifier.publish(LedgerEvent::AlertOpened {
                alert: alert.clone(),
            });
        }
        for alert in &changes.resolved {
            tracing::info!(
                product_id = %alert.product_id,
                alert_type = %alert.alert_type,
                "alert auto-resolved"
            );
            self.notifier.publish(LedgerEvent::AlertResolved {
                alert: alert.clone(),
            });
        }
    }
}

impl core::fmt::Debug for AlertEvaluator {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("AlertEvaluator").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Days;
    use rxledger_core::Role;
    use rxledger_events::InMemoryEventBus;
    use rxledger_inventory::{AlertType, NewMovement, NewProduct, ReferenceType};

    use crate::audit::InMemoryAuditLog;
    use crate::notify::LedgerEnvelope;
    use crate::store::{InMemoryAlertStore, InMemoryLedgerStore};

    struct Fixture {
        ledger: InMemoryLedgerStore,
        alerts: Arc<InMemoryAlertStore>,
        evaluator: AlertEvaluator,
    }

    fn fixture() -> Fixture {
        let ledger = InMemoryLedgerStore::new();
        let alerts = Arc::new(InMemoryAlertStore::new());
        let bus: Arc<InMemoryEventBus<LedgerEnvelope>> = Arc::new(InMemoryEventBus::new());
        let evaluator = AlertEvaluator::new(
            Arc::new(ledger.clone()),
            alerts.clone(),
            Arc::new(Notifier::new(bus)),
            Arc::new(InMemoryAuditLog::new()),
        );
        Fixture {
            ledger,
            alerts,
            evaluator,
        }
    }

    async fn product(ledger: &InMemoryLedgerStore, threshold: i64, expiry: Option<NaiveDate>) -> Product {
        let p = NewProduct {
            code: "AMX-250".into(),
            name: "Amoxicillin 250mg".into(),
            unit_price: 1200,
            reorder_threshold: threshold,
            expiry_date: expiry,
        }
        .into_product(ProductId::new(), Utc::now())
        .unwrap();
        ledger.insert_product(&p).await.unwrap();
        p
    }

    async fn set_stock(ledger: &InMemoryLedgerStore, id: ProductId, target: i64) {
        let mut unit = ledger.begin(&[id]).await.unwrap();
        let current = unit.product(id).unwrap().stock_quantity;
        let delta = target - current;
        unit.append(
            NewMovement::new(
                id,
                delta,
                current,
                ReferenceType::Adjustment,
                "count",
                UserId::new(),
                Utc::now(),
            )
            .with_reason("count"),
        )
        .await
        .unwrap();
        unit.apply_delta(id, delta).await.unwrap();
        unit.commit().await.unwrap();
    }

    fn open_types(alerts: &[StockAlert]) -> Vec<AlertType> {
        let mut types: Vec<_> = alerts
            .iter()
            .filter(|a| !a.is_resolved)
            .map(|a| a.alert_type)
            .collect();
        types.sort();
        types
    }

    #[tokio::test]
    async fn stock_rules_swap_low_and_out_of_stock() {
        let fx = fixture();
        let p = product(&fx.ledger, 10, None).await;

        set_stock(&fx.ledger, p.id, 7).await;
        let changes = fx.evaluator.evaluate(p.id).await.unwrap();
        assert_eq!(open_types(&changes.opened), vec![AlertType::LowStock]);

        // Re-evaluating the same state changes nothing.
        assert!(fx.evaluator.evaluate(p.id).await.unwrap().is_empty());

        set_stock(&fx.ledger, p.id, 0).await;
        let changes = fx.evaluator.evaluate(p.id).await.unwrap();
        assert_eq!(open_types(&changes.opened), vec![AlertType::OutOfStock]);
        assert_eq!(changes.resolved.len(), 1);
        assert_eq!(changes.resolved[0].alert_type, AlertType::LowStock);
        assert_eq!(changes.resolved[0].resolved_by, Some(UserId::system()));

        set_stock(&fx.ledger, p.id, 25).await;
        fx.evaluator.evaluate(p.id).await.unwrap();
        assert!(fx.alerts.open_alerts(p.id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn sweep_moves_expiry_between_buckets() {
        let fx = fixture();
        let today = NaiveDate::from_ymd_opt(2024, 6, 1).unwrap();
        let expiry = today.checked_add_days(Days::new(20)).unwrap();
        let p = product(&fx.ledger, 0, Some(expiry)).await;
        set_stock(&fx.ledger, p.id, 50).await;

        fx.evaluator.sweep(today).await.unwrap();
        assert_eq!(
            open_types(&fx.alerts.open_alerts(p.id).await.unwrap()),
            vec![AlertType::ExpiringIn30Days]
        );

        let later = today.checked_add_days(Days::new(15)).unwrap();
        let report = fx.evaluator.sweep(later).await.unwrap();
        assert_eq!(open_types(&report.changes.opened), vec![AlertType::ExpiringIn7Days]);
        assert_eq!(
            open_types(&fx.alerts.open_alerts(p.id).await.unwrap()),
            vec![AlertType::ExpiringIn7Days]
        );

        let expired = today.checked_add_days(Days::new(21)).unwrap();
        fx.evaluator.sweep(expired).await.unwrap();
        assert_eq!(
            open_types(&fx.alerts.open_alerts(p.id).await.unwrap()),
            vec![AlertType::Expired]
        );
    }

    #[tokio::test]
    async fn archived_products_keep_no_open_alerts() {
        let fx = fixture();
        let p = product(&fx.ledger, 10, None).await;
        fx.evaluator.evaluate(p.id).await.unwrap();
        assert_eq!(fx.alerts.open_alerts(p.id).await.unwrap().len(), 1);

        let mut unit = fx.ledger.begin(&[p.id]).await.unwrap();
        let mut archived = unit.product(p.id).unwrap().clone();
        archived.archived = true;
        unit.stage_details(&archived).await.unwrap();
        unit.commit().await.unwrap();

        let changes = fx.evaluator.evaluate(p.id).await.unwrap();
        assert!(changes.opened.is_empty());
        assert!(fx.alerts.open_alerts(p.id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn manual_resolve_requires_staff_and_rejects_repeats() {
        let fx = fixture();
        let p = product(&fx.ledger, 10, None).await;
        let opened = fx.evaluator.evaluate(p.id).await.unwrap().opened;
        let alert_id = opened[0].id;

        let err = fx
            .evaluator
            .resolve(alert_id, &Actor::system())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Unauthorized);

        let pharmacist = Actor::user(UserId::new(), Role::Pharmacist).unwrap();
        let resolved = fx.evaluator.resolve(alert_id, &pharmacist).await.unwrap();
        assert_eq!(resolved.resolved_by, Some(pharmacist.user_id()));

        let err = fx.evaluator.resolve(alert_id, &pharmacist).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Business);

        let err = fx
            .evaluator
            .resolve(AlertId::new(), &pharmacist)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[tokio::test]
    async fn auto_resolve_closes_alerts_of_deleted_products() {
        let fx = fixture();
        let p = product(&fx.ledger, 10, None).await;
        fx.evaluator.evaluate(p.id).await.unwrap();
        fx.ledger.delete_product(p.id).await.unwrap();

        let changes = fx
            .evaluator
            .auto_resolve(Utc::now().date_naive())
            .await
            .unwrap();
        assert_eq!(changes.resolved.len(), 1);
        assert!(fx.alerts.open_alerts(p.id).await.unwrap().is_empty());
    }
}
