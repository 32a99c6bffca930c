//! Ledger persistence boundary.
//!
//! Two stores back the engines:
//!
//! - [`LedgerStore`]: products (with their projected stock), the append-only
//!   movement ledger and settled transactions.
//! - [`AlertStore`]: stock/expiry alert records.
//!
//! ## Units
//!
//! Every stock mutation runs inside a [`LedgerUnit`] opened with
//! [`LedgerStore::begin`] for a set of products. Opening a unit locks those
//! products (sorted by id, so two units never wait on each other in a cycle);
//! other products stay untouched. Inside the unit the caller reads the locked
//! snapshot, appends movements, applies deltas to the projection and stages
//! transaction writes. [`LedgerUnit::commit`] validates and writes everything
//! at once; dropping the unit discards everything.
//!
//! At commit, for every touched product, the projected stock must equal the
//! newest movement's `new_quantity`. A mismatch aborts the unit with
//! [`StoreError::Consistency`].

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

use rxledger_core::{AlertId, ProductId, TransactionId, UserId};
use rxledger_inventory::{
    AlertFilter, AlertType, HistoryFilter, InventoryMovement, NewMovement, Product, StockAlert,
};
use rxledger_sales::{Transaction, TransactionFilter, VoidRecord};

pub mod in_memory;
pub mod postgres;

pub use in_memory::{InMemoryAlertStore, InMemoryLedgerStore};
pub use postgres::{PostgresAlertStore, PostgresLedgerStore};

/// Store operation error.
///
/// Infrastructure-level failures, as opposed to domain errors.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// Optimistic version check failed.
    #[error("optimistic concurrency check failed: {0}")]
    Concurrency(String),

    /// Ledger chain or projection invariant violated. Fatal for the unit.
    #[error("ledger consistency violation: {0}")]
    Consistency(String),

    #[error("{0} not found")]
    NotFound(String),

    /// Unique key already taken (product code, transaction code).
    #[error("duplicate: {0}")]
    Duplicate(String),

    /// Backend unreachable or failing. Retry is safe.
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

/// Result of a hard delete request.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum DeleteOutcome {
    Deleted,
    /// The product has ledger history and must be archived instead.
    HasHistory,
    NotFound,
}

/// Result of resolving an alert by id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResolveOutcome {
    Resolved(StockAlert),
    AlreadyResolved(StockAlert),
}

/// Products, movement ledger and transactions.
#[async_trait]
pub trait LedgerStore: Send + Sync + std::fmt::Debug {
    /// Open a unit holding the locks of `products`.
    ///
    /// Unknown ids are skipped; [`LedgerUnit::product`] returns `None` for them.
    async fn begin(&self, products: &[ProductId]) -> Result<Box<dyn LedgerUnit>, StoreError>;

    async fn product(&self, id: ProductId) -> Result<Option<Product>, StoreError>;

    async fn product_by_code(&self, code: &str) -> Result<Option<Product>, StoreError>;

    async fn list_products(&self, include_archived: bool) -> Result<Vec<Product>, StoreError>;

    /// Insert a new product. The code must be unused.
    async fn insert_product(&self, product: &Product) -> Result<(), StoreError>;

    /// Hard delete, only when the product has no movements.
    async fn delete_product(&self, id: ProductId) -> Result<DeleteOutcome, StoreError>;

    /// Movements of a product, newest first.
    async fn history(
        &self,
        product_id: ProductId,
        filter: &HistoryFilter,
    ) -> Result<Vec<InventoryMovement>, StoreError>;

    /// A product and its whole ledger (oldest first), read from one
    /// consistent snapshot so no unit can commit between the two.
    async fn snapshot(
        &self,
        id: ProductId,
    ) -> Result<Option<(Product, Vec<InventoryMovement>)>, StoreError>;

    async fn transaction(&self, id: TransactionId) -> Result<Option<Transaction>, StoreError>;

    async fn transaction_by_code(&self, code: &str) -> Result<Option<Transaction>, StoreError>;

    /// Transactions matching `filter`, newest first.
    async fn list_transactions(
        &self,
        filter: &TransactionFilter,
    ) -> Result<Vec<Transaction>, StoreError>;
}

/// An open, locked unit of ledger work. Dropping it rolls back.
#[async_trait]
pub trait LedgerUnit: Send {
    /// Locked snapshot of a product including changes staged in this unit.
    fn product(&self, id: ProductId) -> Option<&Product>;

    /// Append a movement. `previous_quantity` must equal the ledger tail of
    /// the product (or its projected stock when it has no movements yet).
    async fn append(&mut self, movement: NewMovement) -> Result<InventoryMovement, StoreError>;

    /// Apply a signed delta to the product's projected stock; returns the new
    /// quantity. Stock never goes below zero.
    async fn apply_delta(&mut self, product_id: ProductId, delta: i64) -> Result<i64, StoreError>;

    /// Stage catalogue attribute changes (name, price, threshold, expiry,
    /// archived flag). Stock and version are ignored.
    async fn stage_details(&mut self, product: &Product) -> Result<(), StoreError>;

    /// Read a transaction, locking it for the rest of the unit.
    async fn transaction(&mut self, id: TransactionId) -> Result<Option<Transaction>, StoreError>;

    /// Stage a new transaction. Its code and id must be unused.
    async fn insert_transaction(&mut self, tx: &Transaction) -> Result<(), StoreError>;

    async fn mark_voided(&mut self, id: TransactionId, record: &VoidRecord) -> Result<(), StoreError>;

    /// Validate and write everything staged in this unit.
    async fn commit(self: Box<Self>) -> Result<(), StoreError>;
}

/// Stock alert records.
///
/// At most one unresolved alert exists per (product, alert type); stores
/// enforce this on insert.
#[async_trait]
pub trait AlertStore: Send + Sync {
    async fn open_alerts(&self, product_id: ProductId) -> Result<Vec<StockAlert>, StoreError>;

    /// Insert `alert` unless an unresolved alert of the same product and type
    /// already exists. Returns the inserted alert.
    async fn open_if_absent(&self, alert: StockAlert) -> Result<Option<StockAlert>, StoreError>;

    /// Resolve the open alert of `alert_type` for a product, if any.
    async fn resolve_open(
        &self,
        product_id: ProductId,
        alert_type: AlertType,
        resolved_by: UserId,
        at: DateTime<Utc>,
    ) -> Result<Option<StockAlert>, StoreError>;

    async fn resolve(
        &self,
        alert_id: AlertId,
        resolved_by: UserId,
        at: DateTime<Utc>,
    ) -> Result<ResolveOutcome, StoreError>;

    async fn alert(&self, id: AlertId) -> Result<Option<StockAlert>, StoreError>;

    /// Alerts matching `filter`, newest first.
    async fn list(&self, filter: &AlertFilter) -> Result<Vec<StockAlert>, StoreError>;
}

/// Sorted, de-duplicated lock order for a unit.
pub(crate) fn lock_order(products: &[ProductId]) -> Vec<ProductId> {
    let mut ids = products.to_vec();
    ids.sort();
    ids.dedup();
    ids
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        #[test]
        fn lock_order_is_sorted_and_unique(picks in proptest::collection::vec(0usize..6, 0..20)) {
            let pool: Vec<ProductId> = (0..6).map(|_| ProductId::new()).collect();
            let requested: Vec<ProductId> = picks.iter().map(|&i| pool[i]).collect();

            let order = lock_order(&requested);
            prop_assert!(order.windows(2).all(|w| w[0] < w[1]));
            prop_assert!(requested.iter().all(|id| order.contains(id)));
            prop_assert!(order.iter().all(|id| requested.contains(id)));
        }
    }
}
