//! Audit trail collaborator.
//!
//! Ledger operations report what they did through an [`AuditSink`] after
//! their unit committed. Recording is fire-and-forget: a failing sink is
//! logged and never fails the operation that produced the entry.

use std::sync::RwLock;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use rxledger_core::{Actor, Role, UserId};

#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditAction {
    SaleSettled,
    TransactionVoided,
    StockReceived,
    StockAdjusted,
    ProductCreated,
    ProductUpdated,
    ProductArchived,
    ProductDeleted,
    AlertResolved,
}

impl AuditAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditAction::SaleSettled => "sale_settled",
            AuditAction::TransactionVoided => "transaction_voided",
            AuditAction::StockReceived => "stock_received",
            AuditAction::StockAdjusted => "stock_adjusted",
            AuditAction::ProductCreated => "product_created",
            AuditAction::ProductUpdated => "product_updated",
            AuditAction::ProductArchived => "product_archived",
            AuditAction::ProductDeleted => "product_deleted",
            AuditAction::AlertResolved => "alert_resolved",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditEntry {
    pub actor: UserId,
    pub role: Role,
    pub action: AuditAction,
    /// Entity kind, e.g. `transaction` or `product`.
    pub entity: String,
    pub entity_id: String,
    pub description: String,
    pub recorded_at: DateTime<Utc>,
}

impl AuditEntry {
    pub fn new(
        actor: &Actor,
        action: AuditAction,
        entity: &str,
        entity_id: impl ToString,
        description: impl Into<String>,
        recorded_at: DateTime<Utc>,
    ) -> Self {
        Self {
            actor: actor.user_id(),
            role: actor.role(),
            action,
            entity: entity.to_string(),
            entity_id: entity_id.to_string(),
            description: description.into(),
            recorded_at,
        }
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("audit sink failure: {0}")]
pub struct AuditError(pub String);

pub trait AuditSink: Send + Sync + std::fmt::Debug {
    fn record(&self, entry: AuditEntry) -> Result<(), AuditError>;
}

/// Record `entry`, logging instead of propagating a sink failure.
pub(crate) fn record_quietly(sink: &dyn AuditSink, entry: AuditEntry) {
    let action = entry.action.as_str();
    if let Err(err) = sink.record(entry) {
        tracing::warn!(action, error = %err, "audit entry dropped");
    }
}

/// Keeps entries in memory; used by tests and single-process deployments.
#[derive(Debug, Default)]
pub struct InMemoryAuditLog {
    entries: RwLock<Vec<AuditEntry>>,
}

impl InMemoryAuditLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entries(&self) -> Vec<AuditEntry> {
        self.entries.read().map(|e| e.clone()).unwrap_or_default()
    }

    pub fn entries_for(&self, action: AuditAction) -> Vec<AuditEntry> {
        self.entries()
            .into_iter()
            .filter(|e| e.action == action)
            .collect()
    }
}

impl AuditSink for InMemoryAuditLog {
    fn record(&self, entry: AuditEntry) -> Result<(), AuditError> {
        let mut entries = self
            .entries
            .write()
            .map_err(|_| AuditError("audit log lock poisoned".to_string()))?;
        entries.push(entry);
        Ok(())
    }
}

/// Writes entries as structured `info` events on the `audit` target.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingAuditSink;

impl AuditSink for TracingAuditSink {
    fn record(&self, entry: AuditEntry) -> Result<(), AuditError> {
        tracing::info!(
            target: "audit",
            actor = %entry.actor,
            role = %entry.role,
            action = entry.action.as_str(),
            entity = %entry.entity,
            entity_id = %entry.entity_id,
            at = %entry.recorded_at,
            "{}",
            entry.description
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn in_memory_log_filters_by_action() {
        let log = InMemoryAuditLog::new();
        let actor = Actor::user(UserId::new(), Role::Cashier).unwrap();
        let now = Utc::now();
        log.record(AuditEntry::new(&actor, AuditAction::SaleSettled, "transaction", "TRX-1", "sold", now))
            .unwrap();
        log.record(AuditEntry::new(
            &actor,
            AuditAction::StockAdjusted,
            "product",
            "PCM-500",
            "count correction",
            now,
        ))
        .unwrap();

        let sales = log.entries_for(AuditAction::SaleSettled);
        assert_eq!(sales.len(), 1);
        assert_eq!(sales[0].actor, actor.user_id());
        assert_eq!(sales[0].role, Role::Cashier);
        assert_eq!(log.entries().len(), 2);
    }
}
