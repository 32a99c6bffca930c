//! Composition root of the ledger: one handle over every engine, sharing the
//! same stores, alert evaluator and post-commit path.

use std::sync::Arc;

use chrono::NaiveDate;
use tracing::info;

use rxledger_core::{Actor, AlertId, ProductId, TransactionId};
use rxledger_events::{EventBus, InMemoryEventBus, Subscription};
use rxledger_inventory::{
    AlertFilter, HistoryFilter, InventoryMovement, MovementSummary, NewProduct, Product,
    ProductUpdate, StockAlert,
};
use rxledger_sales::{Transaction, TransactionFilter};

use crate::adjustment::{AdjustStock, ReceiveStock, StockAdjuster};
use crate::alerts::{AlertChanges, AlertEvaluator, AlertSweeper, SweepReport, SweeperHandle};
use crate::audit::{AuditSink, TracingAuditSink};
use crate::catalog::Catalog;
use crate::config::LedgerConfig;
use crate::effects::PostCommit;
use crate::error::LedgerError;
use crate::notify::{LedgerEnvelope, Notifier};
use crate::projector::{StockProjector, Verification, VerificationReport};
use crate::reversal::{ReversalEngine, VoidSale};
use crate::settlement::{SettleSale, SettlementEngine};
use crate::store::{
    AlertStore, InMemoryAlertStore, InMemoryLedgerStore, LedgerStore, PostgresAlertStore,
    PostgresLedgerStore, postgres,
};

#[derive(Debug)]
pub struct LedgerService {
    ledger: Arc<dyn LedgerStore>,
    catalog: Catalog,
    settlement: SettlementEngine,
    reversal: ReversalEngine,
    adjuster: StockAdjuster,
    projector: StockProjector,
    effects: Arc<PostCommit>,
    config: LedgerConfig,
}

impl LedgerService {
    pub fn new(
        ledger: Arc<dyn LedgerStore>,
        alerts: Arc<dyn AlertStore>,
        audit: Arc<dyn AuditSink>,
        bus: Arc<dyn EventBus<LedgerEnvelope>>,
        config: LedgerConfig,
    ) -> Self {
        let notifier = Arc::new(Notifier::new(bus));
        let evaluator = Arc::new(AlertEvaluator::new(
            ledger.clone(),
            alerts,
            notifier.clone(),
            audit.clone(),
        ));
        let effects = Arc::new(PostCommit::new(
            evaluator,
            notifier,
            audit,
            config.alerts.mode,
        ));
        let attempts = config.ledger.max_commit_attempts;

        Self {
            catalog: Catalog::new(ledger.clone(), effects.clone()),
            settlement: SettlementEngine::new(ledger.clone(), effects.clone(), attempts),
            reversal: ReversalEngine::new(
                ledger.clone(),
                effects.clone(),
                config.void_policy(),
                attempts,
            ),
            adjuster: StockAdjuster::new(ledger.clone(), effects.clone(), attempts),
            projector: StockProjector::new(ledger.clone()),
            ledger,
            effects,
            config,
        }
    }

    /// In-memory stores, tracing audit sink, in-process bus.
    pub fn in_memory(config: LedgerConfig) -> Self {
        let bus: Arc<InMemoryEventBus<LedgerEnvelope>> = Arc::new(InMemoryEventBus::new());
        Self::new(
            Arc::new(InMemoryLedgerStore::new()),
            Arc::new(InMemoryAlertStore::new()),
            Arc::new(TracingAuditSink),
            bus,
            config,
        )
    }

    /// Postgres stores when `database.url` is set, in-memory otherwise.
    pub async fn from_config(config: LedgerConfig) -> Result<Self, LedgerError> {
        let Some(url) = config.database.url.clone() else {
            info!("no database configured, using in-memory stores");
            return Ok(Self::in_memory(config));
        };

        let pool = postgres::connect(&url, config.database.max_connections).await?;
        postgres::migrate(&pool).await?;
        info!(max_connections = config.database.max_connections, "connected to postgres");

        let bus: Arc<InMemoryEventBus<LedgerEnvelope>> = Arc::new(InMemoryEventBus::new());
        Ok(Self::new(
            Arc::new(PostgresLedgerStore::new(pool.clone())),
            Arc::new(PostgresAlertStore::new(pool)),
            Arc::new(TracingAuditSink),
            bus,
            config,
        ))
    }

    pub fn config(&self) -> &LedgerConfig {
        &self.config
    }

    pub fn subscribe(&self) -> Subscription<LedgerEnvelope> {
        self.effects.notifier().subscribe()
    }

    /// Start the periodic alert sweep on the current runtime.
    pub fn spawn_sweeper(&self) -> SweeperHandle {
        AlertSweeper::spawn(self.effects.evaluator().clone(), self.config.sweep_interval())
    }

    // Settlement and reversal

    pub async fn settle(&self, cmd: SettleSale) -> Result<Transaction, LedgerError> {
        self.settlement.settle(cmd).await
    }

    pub async fn void(&self, cmd: VoidSale) -> Result<Transaction, LedgerError> {
        self.reversal.void(cmd).await
    }

    pub async fn receive(&self, cmd: ReceiveStock) -> Result<InventoryMovement, LedgerError> {
        self.adjuster.receive(cmd).await
    }

    pub async fn adjust(&self, cmd: AdjustStock) -> Result<InventoryMovement, LedgerError> {
        self.adjuster.adjust(cmd).await
    }

    pub async fn transaction(&self, id: TransactionId) -> Result<Transaction, LedgerError> {
        self.ledger
            .transaction(id)
            .await?
            .ok_or_else(|| LedgerError::not_found(format!("transaction {id}")))
    }

    pub async fn transaction_by_code(&self, code: &str) -> Result<Transaction, LedgerError> {
        self.ledger
            .transaction_by_code(code)
            .await?
            .ok_or_else(|| LedgerError::not_found(format!("transaction {}", code.trim())))
    }

    pub async fn list_transactions(
        &self,
        filter: &TransactionFilter,
    ) -> Result<Vec<Transaction>, LedgerError> {
        Ok(self.ledger.list_transactions(filter).await?)
    }

    // Ledger reads and projection

    pub async fn current_stock(&self, product_id: ProductId) -> Result<i64, LedgerError> {
        self.projector.current_stock(product_id).await
    }

    pub async fn history(
        &self,
        product_id: ProductId,
        filter: &HistoryFilter,
    ) -> Result<Vec<InventoryMovement>, LedgerError> {
        self.projector.history(product_id, filter).await
    }

    pub async fn summary(
        &self,
        product_id: ProductId,
        month: u32,
        year: i32,
    ) -> Result<MovementSummary, LedgerError> {
        self.projector.summary(product_id, month, year).await
    }

    pub async fn verify(&self, product_id: ProductId) -> Result<Verification, LedgerError> {
        self.projector.verify(product_id).await
    }

    pub async fn verify_all(&self) -> Result<VerificationReport, LedgerError> {
        self.projector.verify_all().await
    }

    // Catalogue

    pub async fn create_product(&self, new: NewProduct, actor: &Actor) -> Result<Product, LedgerError> {
        self.catalog.create_product(new, actor).await
    }

    pub async fn update_product(
        &self,
        product_id: ProductId,
        update: ProductUpdate,
        actor: &Actor,
    ) -> Result<Product, LedgerError> {
        self.catalog.update_product(product_id, update, actor).await
    }

    pub async fn archive_product(&self, product_id: ProductId, actor: &Actor) -> Result<Product, LedgerError> {
        self.catalog.archive_product(product_id, actor).await
    }

    pub async fn delete_product(&self, product_id: ProductId, actor: &Actor) -> Result<(), LedgerError> {
        self.catalog.delete_product(product_id, actor).await
    }

    pub async fn product(&self, product_id: ProductId) -> Result<Product, LedgerError> {
        self.catalog.product(product_id).await
    }

    pub async fn product_by_code(&self, code: &str) -> Result<Product, LedgerError> {
        self.catalog.product_by_code(code).await
    }

    pub async fn list_products(&self, include_archived: bool) -> Result<Vec<Product>, LedgerError> {
        self.catalog.list_products(include_archived).await
    }

    // Alerts

    pub async fn evaluate_alerts(&self, product_id: ProductId) -> Result<AlertChanges, LedgerError> {
        self.effects.evaluator().evaluate(product_id).await
    }

    pub async fn sweep_alerts(&self, today: NaiveDate) -> Result<SweepReport, LedgerError> {
        self.effects.evaluator().sweep(today).await
    }

    pub async fn resolve_alert(&self, alert_id: AlertId, actor: &Actor) -> Result<StockAlert, LedgerError> {
        self.effects.evaluator().resolve(alert_id, actor).await
    }

    pub async fn alert(&self, alert_id: AlertId) -> Result<StockAlert, LedgerError> {
        self.effects.evaluator().alert(alert_id).await
    }

    pub async fn list_alerts(&self, filter: &AlertFilter) -> Result<Vec<StockAlert>, LedgerError> {
        self.effects.evaluator().list(filter).await
    }
}
