//! Reversal (void) engine.
//!
//! A void never edits the original sale: every line gets a compensating
//! inbound `VoidReversal` movement referencing the transaction code, and the
//! transaction row is flagged voided. Both happen in one unit.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{info, instrument};

use rxledger_core::{Actor, DomainResult, TransactionId};
use rxledger_inventory::{NewMovement, ReferenceType};
use rxledger_sales::{Transaction, VoidPolicy, VoidRecord};

use crate::audit::{AuditAction, AuditEntry};
use crate::effects::PostCommit;
use crate::error::{LedgerError, retry_conflicts, trace_failure};
use crate::notify::LedgerEvent;
use crate::store::LedgerStore;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VoidSale {
    pub transaction_id: TransactionId,
    pub reason: String,
    pub actor: Actor,
    pub occurred_at: DateTime<Utc>,
}

impl VoidSale {
    pub fn validate(&self) -> DomainResult<()> {
        self.actor.ensure_staff("voiding a sale")?;
        VoidPolicy::validate_reason(&self.reason)
    }
}

#[derive(Debug)]
pub struct ReversalEngine {
    ledger: Arc<dyn LedgerStore>,
    effects: Arc<PostCommit>,
    policy: VoidPolicy,
    max_attempts: u32,
}

impl ReversalEngine {
    pub fn new(
        ledger: Arc<dyn LedgerStore>,
        effects: Arc<PostCommit>,
        policy: VoidPolicy,
        max_attempts: u32,
    ) -> Self {
        Self {
            ledger,
            effects,
            policy,
            max_attempts,
        }
    }

    #[instrument(skip(self, cmd), fields(transaction_id = %cmd.transaction_id, actor = %cmd.actor.user_id()))]
    pub async fn void(&self, cmd: VoidSale) -> Result<Transaction, LedgerError> {
        let result = match cmd.validate() {
            Ok(()) => retry_conflicts("void", self.max_attempts, |_| self.void_once(&cmd)).await,
            Err(err) => Err(err.into()),
        };

        match &result {
            Ok(tx) => {
                info!(code = %tx.code, lines = tx.items.len(), "transaction voided");
                self.after_commit(tx, &cmd.actor).await;
            }
            Err(err) => trace_failure("void", err),
        }
        result
    }

    async fn void_once(&self, cmd: &VoidSale) -> Result<Transaction, LedgerError> {
        let not_found = || LedgerError::not_found(format!("transaction {}", cmd.transaction_id));

        // Unlocked read, only to learn which products to lock.
        let original = self
            .ledger
            .transaction(cmd.transaction_id)
            .await?
            .ok_or_else(not_found)?;

        let mut unit = self.ledger.begin(&original.product_ids()).await?;
        let mut tx = unit
            .transaction(cmd.transaction_id)
            .await?
            .ok_or_else(not_found)?;
        self.policy.check(&tx, &cmd.actor, cmd.occurred_at)?;

        let record = VoidRecord {
            reason: cmd.reason.trim().to_string(),
            voided_by: cmd.actor.user_id(),
            voided_at: cmd.occurred_at,
        };

        for item in &tx.items {
            // Products with history are never deleted.
            let previous = unit
                .product(item.product_id)
                .map(|p| p.stock_quantity)
                .ok_or_else(|| {
                    LedgerError::Consistency(format!(
                        "product {} of transaction {} is missing",
                        item.product_code, tx.code
                    ))
                })?;
            unit.append(
                NewMovement::new(
                    item.product_id,
                    item.quantity,
                    previous,
                    ReferenceType::VoidReversal,
                    &tx.code,
                    record.voided_by,
                    record.voided_at,
                )
                .with_reason(&record.reason),
            )
            .await?;
            unit.apply_delta(item.product_id, item.quantity).await?;
        }

        unit.mark_voided(tx.id, &record).await?;
        tx.mark_voided(&record)?;
        unit.commit().await?;
        Ok(tx)
    }

    async fn after_commit(&self, tx: &Transaction, actor: &Actor) {
        let at = tx.voided_at.unwrap_or(tx.created_at);
        self.effects.audit(AuditEntry::new(
            actor,
            AuditAction::TransactionVoided,
            "transaction",
            &tx.code,
            format!(
                "voided sale of {} line(s), total {}: {}",
                tx.items.len(),
                tx.total_amount,
                tx.void_reason.as_deref().unwrap_or_default()
            ),
            at,
        ));
        self.effects.notify(LedgerEvent::TransactionVoided {
            transaction_id: tx.id,
            code: tx.code.clone(),
            voided_by: actor.user_id(),
            at,
        });
        self.effects.evaluate(&tx.product_ids()).await;
    }
}
