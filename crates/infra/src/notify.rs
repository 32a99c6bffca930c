//! Real-time notifications of committed ledger changes.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use rxledger_core::{ProductId, TransactionId, UserId};
use rxledger_events::{Event, EventBus, EventEnvelope, Subscription};
use rxledger_inventory::{ReferenceType, StockAlert};

/// A committed ledger change, published after the unit that produced it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LedgerEvent {
    SaleSettled {
        transaction_id: TransactionId,
        code: String,
        total_amount: i64,
        product_ids: Vec<ProductId>,
        staff_user_id: UserId,
        at: DateTime<Utc>,
    },
    TransactionVoided {
        transaction_id: TransactionId,
        code: String,
        voided_by: UserId,
        at: DateTime<Utc>,
    },
    StockReceived {
        product_id: ProductId,
        quantity: i64,
        new_quantity: i64,
        reference_type: ReferenceType,
        at: DateTime<Utc>,
    },
    StockAdjusted {
        product_id: ProductId,
        quantity: i64,
        new_quantity: i64,
        at: DateTime<Utc>,
    },
    AlertOpened {
        alert: StockAlert,
    },
    AlertResolved {
        alert: StockAlert,
    },
}

impl Event for LedgerEvent {
    fn event_type(&self) -> &'static str {
        match self {
            LedgerEvent::SaleSettled { .. } => "ledger.sale_settled",
            LedgerEvent::TransactionVoided { .. } => "ledger.transaction_voided",
            LedgerEvent::StockReceived { .. } => "ledger.stock_received",
            LedgerEvent::StockAdjusted { .. } => "ledger.stock_adjusted",
            LedgerEvent::AlertOpened { .. } => "ledger.alert_opened",
            LedgerEvent::AlertResolved { .. } => "ledger.alert_resolved",
        }
    }

    fn subject(&self) -> String {
        match self {
            LedgerEvent::SaleSettled { code, .. } | LedgerEvent::TransactionVoided { code, .. } => {
                code.clone()
            }
            LedgerEvent::StockReceived { product_id, .. }
            | LedgerEvent::StockAdjusted { product_id, .. } => product_id.to_string(),
            LedgerEvent::AlertOpened { alert } | LedgerEvent::AlertResolved { alert } => {
                alert.product_id.to_string()
            }
        }
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            LedgerEvent::SaleSettled { at, .. }
            | LedgerEvent::TransactionVoided { at, .. }
            | LedgerEvent::StockReceived { at, .. }
            | LedgerEvent::StockAdjusted { at, .. } => *at,
            LedgerEvent::AlertOpened { alert } => alert.created_at,
            LedgerEvent::AlertResolved { alert } => alert.resolved_at.unwrap_or(alert.created_at),
        }
    }
}

pub type LedgerEnvelope = EventEnvelope<LedgerEvent>;

/// Publishes [`LedgerEvent`]s, numbering them in publish order.
///
/// Publishing is best-effort: a closed bus is logged and otherwise ignored.
pub struct Notifier {
    bus: Arc<dyn EventBus<LedgerEnvelope>>,
    sequence: AtomicU64,
}

impl Notifier {
    pub fn new(bus: Arc<dyn EventBus<LedgerEnvelope>>) -> Self {
        Self {
            bus,
            sequence: AtomicU64::new(0),
        }
    }

    pub fn subscribe(&self) -> Subscription<LedgerEnvelope> {
        self.bus.subscribe()
    }

    pub fn publish(&self, event: LedgerEvent) {
        let sequence = self.sequence.fetch_add(1, Ordering::Relaxed) + 1;
        let envelope = EventEnvelope::wrap(sequence, event);
        let event_type = envelope.event_type().to_string();
        match self.bus.publish(envelope) {
            Ok(receivers) => tracing::debug!(%event_type, sequence, receivers, "ledger event published"),
            Err(err) => tracing::warn!(%event_type, sequence, error = %err, "ledger event dropped"),
        }
    }
}

impl core::fmt::Debug for Notifier {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Notifier")
            .field("sequence", &self.sequence.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rxledger_events::InMemoryEventBus;

    fn voided(code: &str) -> LedgerEvent {
        LedgerEvent::TransactionVoided {
            transaction_id: TransactionId::new(),
            code: code.to_string(),
            voided_by: UserId::new(),
            at: Utc::now(),
        }
    }

    #[test]
    fn envelopes_are_numbered_in_publish_order() {
        let bus: Arc<InMemoryEventBus<LedgerEnvelope>> = Arc::new(InMemoryEventBus::new());
        let notifier = Notifier::new(bus);
        let mut sub = notifier.subscribe();

        notifier.publish(voided("TRX-20240101-00000001"));
        notifier.publish(voided("TRX-20240101-00000002"));

        let first = sub.try_recv().unwrap();
        let second = sub.try_recv().unwrap();
        assert_eq!(first.sequence(), 1);
        assert_eq!(second.sequence(), 2);
        assert_eq!(first.event_type(), "ledger.transaction_voided");
        assert_eq!(first.subject(), "TRX-20240101-00000001");
    }

    #[test]
    fn payloads_are_tagged_by_type_on_the_wire() {
        let envelope = LedgerEnvelope::wrap(7, voided("TRX-20240101-00000004"));
        let json = serde_json::to_value(&envelope).unwrap();
        assert_eq!(json["sequence"], 7);
        assert_eq!(json["payload"]["type"], "transaction_voided");
        assert_eq!(json["payload"]["code"], "TRX-20240101-00000004");
    }

    #[test]
    fn closed_bus_does_not_fail_the_publisher() {
        let bus: Arc<InMemoryEventBus<LedgerEnvelope>> = Arc::new(InMemoryEventBus::new());
        bus.close();
        let notifier = Notifier::new(bus);
        notifier.publish(voided("TRX-20240101-00000003"));
    }
}
