//! Product state projection and ledger reads.
//!
//! The projection (a product's `stock_quantity`) is written only inside
//! units, next to the movement that justifies it. This module reads it back,
//! replays the ledger to verify it, and serves the history and monthly
//! summary reads.

use std::sync::Arc;

use tracing::{error, instrument};

use rxledger_core::ProductId;
use rxledger_inventory::movement::{replayed_stock, verify_chain};
use rxledger_inventory::{HistoryFilter, InventoryMovement, MonthWindow, MovementSummary, Product};

use crate::error::LedgerError;
use crate::store::LedgerStore;

/// Result of replaying one product's ledger.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Verification {
    pub product_id: ProductId,
    pub projected_stock: i64,
    pub movements: usize,
}

/// Outcome of verifying every product.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VerificationReport {
    pub verified: Vec<Verification>,
    /// Products whose projection or chain is broken, with the reason.
    pub divergent: Vec<(ProductId, String)>,
}

impl VerificationReport {
    pub fn is_consistent(&self) -> bool {
        self.divergent.is_empty()
    }
}

#[derive(Debug, Clone)]
pub struct StockProjector {
    ledger: Arc<dyn LedgerStore>,
}

impl StockProjector {
    pub fn new(ledger: Arc<dyn LedgerStore>) -> Self {
        Self { ledger }
    }

    pub async fn current_stock(&self, product_id: ProductId) -> Result<i64, LedgerError> {
        Ok(self.product(product_id).await?.stock_quantity)
    }

    /// Movements of a product, newest first.
    pub async fn history(
        &self,
        product_id: ProductId,
        filter: &HistoryFilter,
    ) -> Result<Vec<InventoryMovement>, LedgerError> {
        Ok(self.ledger.history(product_id, filter).await?)
    }

    /// Inbound and outbound totals within one UTC calendar month.
    pub async fn summary(
        &self,
        product_id: ProductId,
        month: u32,
        year: i32,
    ) -> Result<MovementSummary, LedgerError> {
        let window = MonthWindow::new(month, year)?;
        let filter = HistoryFilter {
            from: Some(window.start),
            ..HistoryFilter::default()
        };
        let movements = self.ledger.history(product_id, &filter).await?;
        Ok(MovementSummary::of(&movements, &window))
    }

    /// Replay the product's ledger: the chain must hold and the projected
    /// stock must equal the first movement's previous quantity plus every
    /// signed quantity (zero for an empty ledger).
    ///
    /// Product and ledger come from one store snapshot, so units committing
    /// concurrently never show up as divergence.
    #[instrument(skip(self), fields(product_id = %product_id))]
    pub async fn verify(&self, product_id: ProductId) -> Result<Verification, LedgerError> {
        let (product, movements) = self
            .ledger
            .snapshot(product_id)
            .await?
            .ok_or_else(|| LedgerError::not_found(format!("product {product_id}")))?;
        let result = replay(&product, &movements);
        if let Err(err) = &result {
            error!(code = %product.code, error = %err, "stock projection diverges from ledger");
        }
        result
    }

    /// Verify every product, archived ones included.
    #[instrument(skip(self))]
    pub async fn verify_all(&self) -> Result<VerificationReport, LedgerError> {
        let mut report = VerificationReport::default();
        for listed in self.ledger.list_products(true).await? {
            // Deleted since the listing.
            let Some((product, movements)) = self.ledger.snapshot(listed.id).await? else {
                continue;
            };
            match replay(&product, &movements) {
                Ok(verification) => report.verified.push(verification),
                Err(LedgerError::Consistency(reason)) => {
                    error!(code = %product.code, %reason, "stock projection diverges from ledger");
                    report.divergent.push((product.id, reason));
                }
                Err(err) => return Err(err),
            }
        }
        Ok(report)
    }

    async fn product(&self, product_id: ProductId) -> Result<Product, LedgerError> {
        self.ledger
            .product(product_id)
            .await?
            .ok_or_else(|| LedgerError::not_found(format!("product {product_id}")))
    }
}

/// Check `movements` (oldest first) against the projected stock of `product`.
fn replay(product: &Product, movements: &[InventoryMovement]) -> Result<Verification, LedgerError> {
    verify_chain(movements).map_err(|e| LedgerError::Consistency(e.to_string()))?;
    let replayed = if movements.is_empty() {
        0
    } else {
        replayed_stock(movements).ok_or_else(|| {
            LedgerError::Consistency(format!("ledger of {} overflows", product.code))
        })?
    };
    if replayed != product.stock_quantity {
        return Err(LedgerError::Consistency(format!(
            "{} projects stock {} but its ledger replays to {}",
            product.code, product.stock_quantity, replayed
        )));
    }

    Ok(Verification {
        product_id: product.id,
        projected_stock: product.stock_quantity,
        movements: movements.len(),
    })
}
