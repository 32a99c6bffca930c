//! In-memory ledger and alert stores.
//!
//! Intended for tests/dev and single-process deployments. Each product lives
//! in its own slot behind a `tokio::sync::Mutex`; a unit holds the owned
//! guards of its products (acquired in id order) until it commits or drops.
//! Units on different products never contend.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::{Mutex, OwnedMutexGuard};

use rxledger_core::{AlertId, ExpectedVersion, MovementId, ProductId, TransactionId, UserId};
use rxledger_inventory::{
    AlertFilter, AlertType, HistoryFilter, InventoryMovement, NewMovement, Product, StockAlert,
};
use rxledger_sales::{Transaction, TransactionFilter, VoidRecord};

use super::{
    AlertStore, DeleteOutcome, LedgerStore, LedgerUnit, ResolveOutcome, StoreError, lock_order,
};

#[derive(Debug)]
struct ProductSlot {
    product: Product,
    /// Oldest first.
    movements: Vec<InventoryMovement>,
    deleted: bool,
}

#[derive(Debug, Default)]
struct Catalog {
    slots: HashMap<ProductId, Arc<Mutex<ProductSlot>>>,
    codes: HashMap<String, ProductId>,
}

#[derive(Debug, Default)]
struct TransactionTable {
    by_id: HashMap<TransactionId, Transaction>,
    by_code: HashMap<String, TransactionId>,
    /// Insertion order (oldest first).
    order: Vec<TransactionId>,
}

#[derive(Debug, Default)]
struct Inner {
    catalog: RwLock<Catalog>,
    transactions: RwLock<TransactionTable>,
    last_movement_id: AtomicU64,
}

fn poisoned() -> StoreError {
    StoreError::Unavailable("lock poisoned".to_string())
}

impl Inner {
    fn catalog(&self) -> Result<RwLockReadGuard<'_, Catalog>, StoreError> {
        self.catalog.read().map_err(|_| poisoned())
    }

    fn catalog_mut(&self) -> Result<RwLockWriteGuard<'_, Catalog>, StoreError> {
        self.catalog.write().map_err(|_| poisoned())
    }

    fn transactions(&self) -> Result<RwLockReadGuard<'_, TransactionTable>, StoreError> {
        self.transactions.read().map_err(|_| poisoned())
    }

    fn transactions_mut(&self) -> Result<RwLockWriteGuard<'_, TransactionTable>, StoreError> {
        self.transactions.write().map_err(|_| poisoned())
    }

    fn slot(&self, id: ProductId) -> Result<Option<Arc<Mutex<ProductSlot>>>, StoreError> {
        Ok(self.catalog()?.slots.get(&id).cloned())
    }

    fn next_movement_id(&self) -> MovementId {
        MovementId::new(self.last_movement_id.fetch_add(1, Ordering::SeqCst) + 1)
    }
}

/// In-memory [`LedgerStore`].
#[derive(Debug, Clone, Default)]
pub struct InMemoryLedgerStore {
    inner: Arc<Inner>,
}

impl InMemoryLedgerStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl LedgerStore for InMemoryLedgerStore {
    async fn begin(&self, products: &[ProductId]) -> Result<Box<dyn LedgerUnit>, StoreError> {
        let slots: Vec<Arc<Mutex<ProductSlot>>> = {
            let catalog = self.inner.catalog()?;
            lock_order(products)
                .iter()
                .filter_map(|id| catalog.slots.get(id).cloned())
                .collect()
        };

        let mut locked = Vec::with_capacity(slots.len());
        for slot in slots {
            let guard = slot.lock_owned().await;
            if !guard.deleted {
                locked.push(guard);
            }
        }

        Ok(Box::new(InMemoryUnit::new(self.inner.clone(), locked)))
    }

    async fn product(&self, id: ProductId) -> Result<Option<Product>, StoreError> {
        let Some(slot) = self.inner.slot(id)? else {
            return Ok(None);
        };
        let slot = slot.lock().await;
        Ok((!slot.deleted).then(|| slot.product.clone()))
    }

    async fn product_by_code(&self, code: &str) -> Result<Option<Product>, StoreError> {
        let id = self.inner.catalog()?.codes.get(code.trim()).copied();
        match id {
            Some(id) => self.product(id).await,
            None => Ok(None),
        }
    }

    async fn list_products(&self, include_archived: bool) -> Result<Vec<Product>, StoreError> {
        let slots: Vec<Arc<Mutex<ProductSlot>>> =
            self.inner.catalog()?.slots.values().cloned().collect();

        let mut products = Vec::with_capacity(slots.len());
        for slot in slots {
            let slot = slot.lock().await;
            if slot.deleted || (slot.product.archived && !include_archived) {
                continue;
            }
            products.push(slot.product.clone());
        }
        products.sort_by(|a, b| a.code.cmp(&b.code));
        Ok(products)
    }

    async fn insert_product(&self, product: &Product) -> Result<(), StoreError> {
        let mut catalog = self.inner.catalog_mut()?;
        if catalog.codes.contains_key(&product.code) {
            return Err(StoreError::Duplicate(format!("product code {}", product.code)));
        }
        if catalog.slots.contains_key(&product.id) {
            return Err(StoreError::Duplicate(format!("product {}", product.id)));
        }
        catalog.codes.insert(product.code.clone(), product.id);
        catalog.slots.insert(
            product.id,
            Arc::new(Mutex::new(ProductSlot {
                product: product.clone(),
                movements: Vec::new(),
                deleted: false,
            })),
        );
        Ok(())
    }

    async fn delete_product(&self, id: ProductId) -> Result<DeleteOutcome, StoreError> {
        let Some(slot) = self.inner.slot(id)? else {
            return Ok(DeleteOutcome::NotFound);
        };
        let mut slot = slot.lock().await;
        if slot.deleted {
            return Ok(DeleteOutcome::NotFound);
        }
        if !slot.movements.is_empty() {
            return Ok(DeleteOutcome::HasHistory);
        }
        slot.deleted = true;

        let mut catalog = self.inner.catalog_mut()?;
        catalog.slots.remove(&id);
        catalog.codes.remove(&slot.product.code);
        Ok(DeleteOutcome::Deleted)
    }

    async fn history(
        &self,
        product_id: ProductId,
        filter: &HistoryFilter,
    ) -> Result<Vec<InventoryMovement>, StoreError> {
        let Some(slot) = self.inner.slot(product_id)? else {
            return Err(StoreError::NotFound(format!("product {product_id}")));
        };
        let slot = slot.lock().await;
        Ok(filter.apply(&slot.movements))
    }

    async fn snapshot(
        &self,
        id: ProductId,
    ) -> Result<Option<(Product, Vec<InventoryMovement>)>, StoreError> {
        let Some(slot) = self.inner.slot(id)? else {
            return Ok(None);
        };
        let slot = slot.lock().await;
        if slot.deleted {
            return Ok(None);
        }
        Ok(Some((slot.product.clone(), slot.movements.clone())))
    }

    async fn transaction(&self, id: TransactionId) -> Result<Option<Transaction>, StoreError> {
        Ok(self.inner.transactions()?.by_id.get(&id).cloned())
    }

    async fn transaction_by_code(&self, code: &str) -> Result<Option<Transaction>, StoreError> {
        let table = self.inner.transactions()?;
        Ok(table
            .by_code
            .get(code.trim())
            .and_then(|id| table.by_id.get(id))
            .cloned())
    }

    async fn list_transactions(
        &self,
        filter: &TransactionFilter,
    ) -> Result<Vec<Transaction>, StoreError> {
        let table = self.inner.transactions()?;
        Ok(table
            .order
            .iter()
            .rev()
            .filter_map(|id| table.by_id.get(id))
            .filter(|tx| filter.matches(tx))
            .take(filter.limit.unwrap_or(usize::MAX))
            .cloned()
            .collect())
    }
}

#[derive(Debug)]
struct Staged {
    product: Product,
    movements: Vec<InventoryMovement>,
    stock_touched: bool,
    details_touched: bool,
}

/// Unit over locked product slots. Nothing is visible to other callers
/// until commit.
///
/// Transactions are not locked individually: every transaction write
/// (insert, void) happens while the unit holds the locks of all products on
/// that transaction, which already serializes writers of one transaction.
struct InMemoryUnit {
    inner: Arc<Inner>,
    locked: Vec<OwnedMutexGuard<ProductSlot>>,
    staged: HashMap<ProductId, Staged>,
    new_transactions: Vec<Transaction>,
    voids: Vec<(TransactionId, VoidRecord)>,
}

impl InMemoryUnit {
    fn new(inner: Arc<Inner>, locked: Vec<OwnedMutexGuard<ProductSlot>>) -> Self {
        let staged = locked
            .iter()
            .map(|slot| {
                (
                    slot.product.id,
                    Staged {
                        product: slot.product.clone(),
                        movements: Vec::new(),
                        stock_touched: false,
                        details_touched: false,
                    },
                )
            })
            .collect();
        Self {
            inner,
            locked,
            staged,
            new_transactions: Vec::new(),
            voids: Vec::new(),
        }
    }

    fn slot(&self, id: ProductId) -> Option<&ProductSlot> {
        self.locked
            .iter()
            .map(|guard| &**guard)
            .find(|slot| slot.product.id == id)
    }

    fn not_locked(id: ProductId) -> StoreError {
        StoreError::NotFound(format!("product {id} (not part of this unit)"))
    }

    /// Check every touched product before anything is written.
    fn validate_products(&self) -> Result<(), StoreError> {
        for (id, staged) in &self.staged {
            if !staged.stock_touched && staged.movements.is_empty() {
                continue;
            }
            let slot = self.slot(*id).ok_or_else(|| Self::not_locked(*id))?;
            let tail = staged.movements.last().or(slot.movements.last());
            let ledger_quantity = tail
                .map(|m| m.new_quantity)
                .unwrap_or(slot.product.stock_quantity);
            if staged.product.stock_quantity != ledger_quantity {
                return Err(StoreError::Consistency(format!(
                    "product {} projected stock {} disagrees with ledger tail {}",
                    staged.product.code, staged.product.stock_quantity, ledger_quantity
                )));
            }
            if !ExpectedVersion::Exact(staged.product.version).matches(slot.product.version) {
                return Err(StoreError::Concurrency(format!(
                    "product {} changed during the unit",
                    staged.product.code
                )));
            }
        }
        Ok(())
    }
}

/// Uniqueness and void checks, run under the transaction table write lock.
fn validate_transactions(
    table: &TransactionTable,
    new_transactions: &[Transaction],
    voids: &[(TransactionId, VoidRecord)],
) -> Result<(), StoreError> {
    for tx in new_transactions {
        if table.by_code.contains_key(&tx.code) {
            return Err(StoreError::Duplicate(format!("transaction code {}", tx.code)));
        }
        if table.by_id.contains_key(&tx.id) {
            return Err(StoreError::Duplicate(format!("transaction {}", tx.id)));
        }
    }
    for (id, _) in voids {
        let staged_here = new_transactions.iter().any(|tx| tx.id == *id);
        match table.by_id.get(id) {
            Some(tx) if tx.is_voided => {
                return Err(StoreError::Concurrency(format!(
                    "transaction {} was voided concurrently",
                    tx.code
                )));
            }
            Some(_) => {}
            None if staged_here => {}
            None => return Err(StoreError::NotFound(format!("transaction {id}"))),
        }
    }
    Ok(())
}

#[async_trait]
impl LedgerUnit for InMemoryUnit {
    fn product(&self, id: ProductId) -> Option<&Product> {
        self.staged.get(&id).map(|s| &s.product)
    }

    async fn append(&mut self, movement: NewMovement) -> Result<InventoryMovement, StoreError> {
        let id = movement.product_id;
        let slot = self
            .locked
            .iter()
            .find(|slot| slot.product.id == id)
            .ok_or_else(|| Self::not_locked(id))?;
        let staged = self.staged.get_mut(&id).ok_or_else(|| Self::not_locked(id))?;

        let tail = staged.movements.last().or(slot.movements.last());
        movement
            .check_link(tail, slot.product.stock_quantity)
            .map_err(|e| StoreError::Consistency(e.to_string()))?;

        let recorded = InventoryMovement::record(self.inner.next_movement_id(), movement)
            .map_err(|e| StoreError::Consistency(e.to_string()))?;
        staged.movements.push(recorded.clone());
        Ok(recorded)
    }

    async fn apply_delta(&mut self, product_id: ProductId, delta: i64) -> Result<i64, StoreError> {
        let staged = self
            .staged
            .get_mut(&product_id)
            .ok_or_else(|| Self::not_locked(product_id))?;
        let next = staged
            .product
            .stock_quantity
            .checked_add(delta)
            .filter(|q| *q >= 0)
            .ok_or_else(|| {
                StoreError::Consistency(format!(
                    "stock of product {} cannot move from {} by {delta:+}",
                    staged.product.code, staged.product.stock_quantity
                ))
            })?;
        staged.product.stock_quantity = next;
        staged.stock_touched = true;
        Ok(next)
    }

    async fn stage_details(&mut self, product: &Product) -> Result<(), StoreError> {
        let staged = self
            .staged
            .get_mut(&product.id)
            .ok_or_else(|| Self::not_locked(product.id))?;
        staged.product.name = product.name.clone();
        staged.product.unit_price = product.unit_price;
        staged.product.reorder_threshold = product.reorder_threshold;
        staged.product.expiry_date = product.expiry_date;
        staged.product.archived = product.archived;
        staged.product.updated_at = product.updated_at;
        staged.details_touched = true;
        Ok(())
    }

    async fn transaction(&mut self, id: TransactionId) -> Result<Option<Transaction>, StoreError> {
        let mut tx = match self.new_transactions.iter().find(|tx| tx.id == id) {
            Some(tx) => Some(tx.clone()),
            None => self.inner.transactions()?.by_id.get(&id).cloned(),
        };
        if let Some(tx) = tx.as_mut() {
            if let Some((_, record)) = self.voids.iter().find(|(voided, _)| *voided == id) {
                tx.mark_voided(record)
                    .map_err(|e| StoreError::Consistency(e.to_string()))?;
            }
        }
        Ok(tx)
    }

    async fn insert_transaction(&mut self, tx: &Transaction) -> Result<(), StoreError> {
        {
            let table = self.inner.transactions()?;
            if table.by_code.contains_key(&tx.code) {
                return Err(StoreError::Duplicate(format!("transaction code {}", tx.code)));
            }
        }
        if self.new_transactions.iter().any(|t| t.code == tx.code) {
            return Err(StoreError::Duplicate(format!("transaction code {}", tx.code)));
        }
        self.new_transactions.push(tx.clone());
        Ok(())
    }

    async fn mark_voided(&mut self, id: TransactionId, record: &VoidRecord) -> Result<(), StoreError> {
        match self.transaction(id).await? {
            None => Err(StoreError::NotFound(format!("transaction {id}"))),
            Some(tx) if tx.is_voided => Err(StoreError::Concurrency(format!(
                "transaction {} is already voided",
                tx.code
            ))),
            Some(_) => {
                self.voids.push((id, record.clone()));
                Ok(())
            }
        }
    }

    async fn commit(self: Box<Self>) -> Result<(), StoreError> {
        self.validate_products()?;

        let InMemoryUnit {
            inner,
            mut locked,
            mut staged,
            new_transactions,
            voids,
        } = *self;

        let mut table = inner.transactions_mut()?;
        validate_transactions(&table, &new_transactions, &voids)?;

        for tx in new_transactions {
            table.by_code.insert(tx.code.clone(), tx.id);
            table.order.push(tx.id);
            table.by_id.insert(tx.id, tx);
        }
        for (id, record) in &voids {
            if let Some(tx) = table.by_id.get_mut(id) {
                tx.mark_voided(record)
                    .map_err(|e| StoreError::Consistency(e.to_string()))?;
            }
        }

        for slot in locked.iter_mut() {
            let Some(change) = staged.remove(&slot.product.id) else {
                continue;
            };
            if change.stock_touched || !change.movements.is_empty() {
                slot.product.stock_quantity = change.product.stock_quantity;
                slot.product.version += 1;
                if let Some(last) = change.movements.last() {
                    slot.product.updated_at = last.created_at;
                }
                slot.movements.extend(change.movements);
            }
            if change.details_touched {
                slot.product.name = change.product.name;
                slot.product.unit_price = change.product.unit_price;
                slot.product.reorder_threshold = change.product.reorder_threshold;
                slot.product.expiry_date = change.product.expiry_date;
                slot.product.archived = change.product.archived;
                slot.product.updated_at = change.product.updated_at;
            }
        }
        Ok(())
    }
}

/// In-memory [`AlertStore`].
#[derive(Debug, Default)]
pub struct InMemoryAlertStore {
    /// Insertion order (oldest first).
    alerts: RwLock<Vec<StockAlert>>,
}

impl InMemoryAlertStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl AlertStore for InMemoryAlertStore {
    async fn open_alerts(&self, product_id: ProductId) -> Result<Vec<StockAlert>, StoreError> {
        let alerts = self.alerts.read().map_err(|_| poisoned())?;
        Ok(alerts
            .iter()
            .filter(|a| a.product_id == product_id && !a.is_resolved)
            .cloned()
            .collect())
    }

    async fn open_if_absent(&self, alert: StockAlert) -> Result<Option<StockAlert>, StoreError> {
        let mut alerts = self.alerts.write().map_err(|_| poisoned())?;
        let exists = alerts.iter().any(|a| {
            a.product_id == alert.product_id && a.alert_type == alert.alert_type && !a.is_resolved
        });
        if exists {
            return Ok(None);
        }
        alerts.push(alert.clone());
        Ok(Some(alert))
    }

    async fn resolve_open(
        &self,
        product_id: ProductId,
        alert_type: AlertType,
        resolved_by: UserId,
        at: DateTime<Utc>,
    ) -> Result<Option<StockAlert>, StoreError> {
        let mut alerts = self.alerts.write().map_err(|_| poisoned())?;
        let Some(alert) = alerts
            .iter_mut()
            .find(|a| a.product_id == product_id && a.alert_type == alert_type && !a.is_resolved)
        else {
            return Ok(None);
        };
        alert
            .resolve(resolved_by, at)
            .map_err(|e| StoreError::Consistency(e.to_string()))?;
        Ok(Some(alert.clone()))
    }

    async fn resolve(
        &self,
        alert_id: AlertId,
        resolved_by: UserId,
        at: DateTime<Utc>,
    ) -> Result<ResolveOutcome, StoreError> {
        let mut alerts = self.alerts.write().map_err(|_| poisoned())?;
        let alert = alerts
            .iter_mut()
            .find(|a| a.id == alert_id)
            .ok_or_else(|| StoreError::NotFound(format!("alert {alert_id}")))?;
        if alert.is_resolved {
            return Ok(ResolveOutcome::AlreadyResolved(alert.clone()));
        }
        alert
            .resolve(resolved_by, at)
            .map_err(|e| StoreError::Consistency(e.to_string()))?;
        Ok(ResolveOutcome::Resolved(alert.clone()))
    }

    async fn alert(&self, id: AlertId) -> Result<Option<StockAlert>, StoreError> {
        let alerts = self.alerts.read().map_err(|_| poisoned())?;
        Ok(alerts.iter().find(|a| a.id == id).cloned())
    }

    async fn list(&self, filter: &AlertFilter) -> Result<Vec<StockAlert>, StoreError> {
        let alerts = self.alerts.read().map_err(|_| poisoned())?;
        Ok(alerts
            .iter()
            .rev()
            .filter(|a| filter.matches(a))
            .cloned()
            .collect())
    }
}
