//! Settlement engine: turns a sale request into a committed transaction.
//!
//! ## Flow
//!
//! ```text
//! SettleSale
//!   ↓
//! 1. Validate shape (lines, quantities, discount, payment), no IO
//!   ↓
//! 2. Open a unit locking every product on the sale (sorted order)
//!   ↓
//! 3. Check existence, archived flag and stock against the locked snapshot
//!   ↓
//! 4. Price the sale from the same snapshot
//!   ↓
//! 5. Stage the transaction, one outbound movement and one stock delta per line
//!   ↓
//! 6. Commit (all or nothing)
//!   ↓
//! 7. Audit, notify, re-evaluate stock alerts (best-effort)
//! ```
//!
//! A rejected request drops its unit, which leaves no trace in the store.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, instrument};

use rxledger_core::{Actor, DomainError, DomainResult, ProductId, TransactionId};
use rxledger_inventory::{NewMovement, Product, ReferenceType};
use rxledger_sales::pricing::line_subtotal;
use rxledger_sales::{
    DiscountSpec, LineItem, PaymentMethod, Transaction, price, transaction_code,
};

use crate::audit::{AuditAction, AuditEntry};
use crate::effects::PostCommit;
use crate::error::{LedgerError, retry_conflicts, trace_failure};
use crate::notify::LedgerEvent;
use crate::store::{LedgerStore, LedgerUnit};

#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SaleLineRequest {
    pub product_id: ProductId,
    pub quantity: i64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SettleSale {
    pub lines: Vec<SaleLineRequest>,
    pub payment_method: PaymentMethod,
    pub discount: DiscountSpec,
    pub amount_paid: i64,
    pub actor: Actor,
    pub occurred_at: DateTime<Utc>,
}

impl SettleSale {
    /// Checks that need no stored state.
    pub fn validate(&self) -> DomainResult<()> {
        self.actor.ensure_staff("settling a sale")?;
        if self.lines.is_empty() {
            return Err(DomainError::validation("a sale needs at least one line item"));
        }
        if let Some(line) = self.lines.iter().find(|l| l.quantity <= 0) {
            return Err(DomainError::validation(format!(
                "quantity for product {} must be positive, got {}",
                line.product_id, line.quantity
            )));
        }
        self.discount.validate()?;
        if self.amount_paid < 0 {
            return Err(DomainError::validation("amount paid cannot be negative"));
        }
        Ok(())
    }

    /// Requested quantity per product; repeated lines for one product add up.
    fn requested(&self) -> DomainResult<BTreeMap<ProductId, i64>> {
        let mut requested = BTreeMap::new();
        for line in &self.lines {
            let total: &mut i64 = requested.entry(line.product_id).or_default();
            *total = total
                .checked_add(line.quantity)
                .ok_or_else(|| DomainError::business("requested quantity overflow"))?;
        }
        Ok(requested)
    }
}

#[derive(Debug)]
pub struct SettlementEngine {
    ledger: Arc<dyn LedgerStore>,
    effects: Arc<PostCommit>,
    max_attempts: u32,
}

impl SettlementEngine {
    pub fn new(ledger: Arc<dyn LedgerStore>, effects: Arc<PostCommit>, max_attempts: u32) -> Self {
        Self {
            ledger,
            effects,
            max_attempts,
        }
    }

    #[instrument(skip(self, cmd), fields(lines = cmd.lines.len(), actor = %cmd.actor.user_id()))]
    pub async fn settle(&self, cmd: SettleSale) -> Result<Transaction, LedgerError> {
        let result = match cmd.validate() {
            Ok(()) => {
                retry_conflicts("settle", self.max_attempts, |_| self.settle_once(&cmd)).await
            }
            Err(err) => Err(err.into()),
        };

        match &result {
            Ok(tx) => {
                info!(
                    code = %tx.code,
                    total = tx.total_amount,
                    change = tx.change_amount,
                    "sale settled"
                );
                self.after_commit(tx, &cmd.actor).await;
            }
            Err(err) => trace_failure("settle", err),
        }
        result
    }

    async fn settle_once(&self, cmd: &SettleSale) -> Result<Transaction, LedgerError> {
        let requested = cmd.requested()?;
        let ids: Vec<ProductId> = requested.keys().copied().collect();
        let mut unit = self.ledger.begin(&ids).await?;

        for (product_id, quantity) in &requested {
            let product = locked(unit.as_ref(), *product_id)?;
            product.ensure_sellable()?;
            if *quantity > product.stock_quantity {
                return Err(DomainError::insufficient_stock(
                    &product.code,
                    *quantity,
                    product.stock_quantity,
                )
                .into());
            }
        }

        let mut items = Vec::with_capacity(cmd.lines.len());
        for line in &cmd.lines {
            let product = locked(unit.as_ref(), line.product_id)?;
            items.push(LineItem {
                product_id: product.id,
                product_code: product.code.clone(),
                product_name: product.name.clone(),
                quantity: line.quantity,
                unit_price: product.unit_price,
                subtotal: line_subtotal(line.quantity, product.unit_price)?,
            });
        }
        let priced: Vec<(i64, i64)> = items.iter().map(|i| (i.quantity, i.unit_price)).collect();
        let pricing = price(&priced, cmd.discount, cmd.amount_paid)?;

        let id = TransactionId::new();
        let tx = Transaction::settled(
            id,
            transaction_code(id, cmd.occurred_at),
            items,
            pricing,
            cmd.payment_method,
            cmd.actor.user_id(),
            cmd.occurred_at,
        )?;
        unit.insert_transaction(&tx).await?;

        for item in &tx.items {
            let previous = locked(unit.as_ref(), item.product_id)?.stock_quantity;
            unit.append(NewMovement::new(
                item.product_id,
                -item.quantity,
                previous,
                ReferenceType::Sale,
                &tx.code,
                cmd.actor.user_id(),
                cmd.occurred_at,
            ))
            .await?;
            unit.apply_delta(item.product_id, -item.quantity).await?;
        }

        unit.commit().await?;
        Ok(tx)
    }

    async fn after_commit(&self, tx: &Transaction, actor: &Actor) {
        self.effects.audit(AuditEntry::new(
            actor,
            AuditAction::SaleSettled,
            "transaction",
            &tx.code,
            format!(
                "settled {} line(s): total {}, paid {} by {}",
                tx.items.len(),
                tx.total_amount,
                tx.amount_paid,
                tx.payment_method.as_str()
            ),
            tx.created_at,
        ));
        self.effects.notify(LedgerEvent::SaleSettled {
            transaction_id: tx.id,
            code: tx.code.clone(),
            total_amount: tx.total_amount,
            product_ids: tx.product_ids(),
            staff_user_id: tx.staff_user_id,
            at: tx.created_at,
        });
        self.effects.evaluate(&tx.product_ids()).await;
    }
}

/// Product from a unit's locked snapshot.
pub(crate) fn locked(
    unit: &dyn LedgerUnit,
    product_id: ProductId,
) -> Result<&Product, LedgerError> {
    unit.product(product_id)
        .ok_or_else(|| LedgerError::not_found(format!("product {product_id}")))
}
