//! Stock receipts and manual adjustments.
//!
//! Both post a single movement through the same locked unit, projector
//! update and post-commit path as a sale.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{info, instrument};
use uuid::Uuid;

use rxledger_core::{Actor, DomainError, DomainResult, ProductId};
use rxledger_inventory::{InventoryMovement, NewMovement, ReferenceType};

use crate::audit::{AuditAction, AuditEntry};
use crate::effects::PostCommit;
use crate::error::{LedgerError, retry_conflicts, trace_failure};
use crate::notify::LedgerEvent;
use crate::settlement::locked;
use crate::store::LedgerStore;

/// Goods arriving: a purchase order delivery or a customer return.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceiveStock {
    pub product_id: ProductId,
    pub quantity: i64,
    pub reference_type: ReferenceType,
    pub reference_id: String,
    pub reason: Option<String>,
    pub actor: Actor,
    pub occurred_at: DateTime<Utc>,
}

impl ReceiveStock {
    pub fn validate(&self) -> DomainResult<()> {
        self.actor.ensure_staff("receiving stock")?;
        if self.quantity <= 0 {
            return Err(DomainError::validation(format!(
                "received quantity must be positive, got {}",
                self.quantity
            )));
        }
        if !matches!(
            self.reference_type,
            ReferenceType::PurchaseOrder | ReferenceType::Return
        ) {
            return Err(DomainError::validation(format!(
                "stock can only be received against a purchase order or a return, not {}",
                self.reference_type.as_str()
            )));
        }
        if self.reference_id.trim().is_empty() {
            return Err(DomainError::validation("a receipt needs a reference id"));
        }
        Ok(())
    }
}

/// A counted correction (breakage, expiry write-off, recount).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdjustStock {
    pub product_id: ProductId,
    /// Signed: positive adds stock, negative removes it.
    pub quantity: i64,
    pub reason: String,
    pub actor: Actor,
    pub occurred_at: DateTime<Utc>,
}

impl AdjustStock {
    pub fn validate(&self) -> DomainResult<()> {
        self.actor.ensure_staff("adjusting stock")?;
        if self.quantity == 0 {
            return Err(DomainError::validation("adjustment quantity cannot be zero"));
        }
        if self.reason.trim().is_empty() {
            return Err(DomainError::validation("an adjustment needs a reason"));
        }
        Ok(())
    }
}

/// `ADJ-YYYYMMDD-XXXXXXXX`, the reference id of a manual adjustment.
fn adjustment_reference(at: DateTime<Utc>) -> String {
    let hex = Uuid::now_v7().simple().to_string().to_ascii_uppercase();
    format!("ADJ-{}-{}", at.format("%Y%m%d"), &hex[hex.len() - 8..])
}

struct Posting<'a> {
    product_id: ProductId,
    quantity: i64,
    reference_type: ReferenceType,
    reference_id: &'a str,
    reason: Option<&'a str>,
    actor: &'a Actor,
    at: DateTime<Utc>,
    allow_archived: bool,
}

#[derive(Debug)]
pub struct StockAdjuster {
    ledger: Arc<dyn LedgerStore>,
    effects: Arc<PostCommit>,
    max_attempts: u32,
}

impl StockAdjuster {
    pub fn new(ledger: Arc<dyn LedgerStore>, effects: Arc<PostCommit>, max_attempts: u32) -> Self {
        Self {
            ledger,
            effects,
            max_attempts,
        }
    }

    /// Post an inbound receipt. Archived products cannot receive stock.
    #[instrument(skip(self, cmd), fields(product_id = %cmd.product_id, quantity = cmd.quantity))]
    pub async fn receive(&self, cmd: ReceiveStock) -> Result<InventoryMovement, LedgerError> {
        let result = match cmd.validate() {
            Ok(()) => {
                let posting = Posting {
                    product_id: cmd.product_id,
                    quantity: cmd.quantity,
                    reference_type: cmd.reference_type,
                    reference_id: cmd.reference_id.trim(),
                    reason: cmd.reason.as_deref(),
                    actor: &cmd.actor,
                    at: cmd.occurred_at,
                    allow_archived: false,
                };
                retry_conflicts("receive_stock", self.max_attempts, |_| self.post(&posting)).await
            }
            Err(err) => Err(err.into()),
        };

        match &result {
            Ok(movement) => {
                info!(
                    new_quantity = movement.new_quantity,
                    reference = %movement.reference_id,
                    "stock received"
                );
                self.effects.audit(AuditEntry::new(
                    &cmd.actor,
                    AuditAction::StockReceived,
                    "product",
                    movement.product_id,
                    format!(
                        "received {} against {} {}",
                        movement.quantity,
                        movement.reference_type.as_str(),
                        movement.reference_id
                    ),
                    movement.created_at,
                ));
                self.effects.notify(LedgerEvent::StockReceived {
                    product_id: movement.product_id,
                    quantity: movement.quantity,
                    new_quantity: movement.new_quantity,
                    reference_type: movement.reference_type,
                    at: movement.created_at,
                });
                self.effects.evaluate(&[movement.product_id]).await;
            }
            Err(err) => trace_failure("receive_stock", err),
        }
        result
    }

    /// Post a signed adjustment. The result may never go below zero.
    #[instrument(skip(self, cmd), fields(product_id = %cmd.product_id, quantity = cmd.quantity))]
    pub async fn adjust(&self, cmd: AdjustStock) -> Result<InventoryMovement, LedgerError> {
        let result = match cmd.validate() {
            Ok(()) => {
                let reference = adjustment_reference(cmd.occurred_at);
                let posting = Posting {
                    product_id: cmd.product_id,
                    quantity: cmd.quantity,
                    reference_type: ReferenceType::Adjustment,
                    reference_id: &reference,
                    reason: Some(cmd.reason.trim()),
                    actor: &cmd.actor,
                    at: cmd.occurred_at,
                    allow_archived: true,
                };
                retry_conflicts("adjust_stock", self.max_attempts, |_| self.post(&posting)).await
            }
            Err(err) => Err(err.into()),
        };

        match &result {
            Ok(movement) => {
                info!(new_quantity = movement.new_quantity, "stock adjusted");
                self.effects.audit(AuditEntry::new(
                    &cmd.actor,
                    AuditAction::StockAdjusted,
                    "product",
                    movement.product_id,
                    format!(
                        "adjusted by {:+} ({} -> {}): {}",
                        movement.quantity,
                        movement.previous_quantity,
                        movement.new_quantity,
                        movement.reason.as_deref().unwrap_or_default()
                    ),
                    movement.created_at,
                ));
                self.effects.notify(LedgerEvent::StockAdjusted {
                    product_id: movement.product_id,
                    quantity: movement.quantity,
                    new_quantity: movement.new_quantity,
                    at: movement.created_at,
                });
                self.effects.evaluate(&[movement.product_id]).await;
            }
            Err(err) => trace_failure("adjust_stock", err),
        }
        result
    }

    async fn post(&self, posting: &Posting<'_>) -> Result<InventoryMovement, LedgerError> {
        let mut unit = self.ledger.begin(&[posting.product_id]).await?;

        let product = locked(unit.as_ref(), posting.product_id)?;
        if product.archived && !posting.allow_archived {
            return Err(DomainError::business(format!(
                "product {} is archived and cannot receive stock",
                product.code
            ))
            .into());
        }
        let previous = product.stock_quantity;
        if posting.quantity < 0 && -posting.quantity > previous {
            return Err(DomainError::insufficient_stock(&product.code, -posting.quantity, previous).into());
        }

        let mut movement = NewMovement::new(
            posting.product_id,
            posting.quantity,
            previous,
            posting.reference_type,
            posting.reference_id,
            posting.actor.user_id(),
            posting.at,
        );
        if let Some(reason) = posting.reason.filter(|r| !r.trim().is_empty()) {
            movement = movement.with_reason(reason.trim());
        }
        // Overflow and sign checks before anything is staged.
        movement.validate()?;

        let recorded = unit.append(movement).await?;
        unit.apply_delta(posting.product_id, posting.quantity).await?;
        unit.commit().await?;
        Ok(recorded)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rxledger_core::{Role, UserId};

    fn pharmacist() -> Actor {
        Actor::user(UserId::new(), Role::Pharmacist).unwrap()
    }

    #[test]
    fn receipts_only_accept_inbound_reference_types() {
        let mut cmd = ReceiveStock {
            product_id: ProductId::new(),
            quantity: 10,
            reference_type: ReferenceType::PurchaseOrder,
            reference_id: "PO-1001".into(),
            reason: None,
            actor: pharmacist(),
            occurred_at: Utc::now(),
        };
        assert!(cmd.validate().is_ok());

        cmd.reference_type = ReferenceType::Sale;
        assert!(matches!(cmd.validate(), Err(DomainError::Validation(_))));

        cmd.reference_type = ReferenceType::Return;
        cmd.quantity = -1;
        assert!(matches!(cmd.validate(), Err(DomainError::Validation(_))));
    }

    #[test]
    fn adjustments_need_a_reason_and_a_quantity() {
        let cmd = AdjustStock {
            product_id: ProductId::new(),
            quantity: -3,
            reason: "  ".into(),
            actor: pharmacist(),
            occurred_at: Utc::now(),
        };
        assert!(matches!(cmd.validate(), Err(DomainError::Validation(_))));

        let zero = AdjustStock {
            quantity: 0,
            reason: "recount".into(),
            ..cmd
        };
        assert!(matches!(zero.validate(), Err(DomainError::Validation(_))));
    }

    #[test]
    fn adjustment_references_carry_the_date() {
        let at = chrono::TimeZone::with_ymd_and_hms(&Utc, 2024, 3, 9, 12, 0, 0).unwrap();
        let reference = adjustment_reference(at);
        assert!(reference.starts_with("ADJ-20240309-"));
        assert_eq!(reference.len(), "ADJ-20240309-".len() + 8);
    }
}
