//! When a settled transaction may still be voided.

use chrono::{DateTime, Duration, Utc};

use rxledger_core::{Actor, DomainError, DomainResult};

use crate::transaction::Transaction;

pub const DEFAULT_VOID_WINDOW_HOURS: i64 = 24;

/// Void rules: a transaction can be voided once, within `window` of its
/// creation. Privileged roles may void after the window has passed.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct VoidPolicy {
    window: Duration,
}

impl VoidPolicy {
    pub fn new(window: Duration) -> Self {
        Self { window }
    }

    pub fn with_hours(hours: i64) -> Self {
        Self::new(Duration::hours(hours))
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    /// Reason must carry text; checked before anything is read.
    pub fn validate_reason(reason: &str) -> DomainResult<()> {
        if reason.trim().is_empty() {
            return Err(DomainError::validation("void reason cannot be empty"));
        }
        Ok(())
    }

    /// Check whether `actor` may void `tx` at `now`.
    ///
    /// An already-voided transaction is rejected regardless of role.
    pub fn check(&self, tx: &Transaction, actor: &Actor, now: DateTime<Utc>) -> DomainResult<()> {
        if tx.is_voided {
            return Err(DomainError::business(format!(
                "transaction {} is already voided",
                tx.code
            )));
        }
        let age = now.signed_duration_since(tx.created_at);
        if age > self.window && !actor.is_privileged() {
            return Err(DomainError::business(format!(
                "transaction {} is older than the {}h void window; a manager or admin must void it",
                tx.code,
                self.window.num_hours()
            )));
        }
        Ok(())
    }
}

impl Default for VoidPolicy {
    fn default() -> Self {
        Self::with_hours(DEFAULT_VOID_WINDOW_HOURS)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pricing::{DiscountSpec, price};
    use crate::transaction::{LineItem, PaymentMethod, VoidRecord};
    use rxledger_core::{ProductId, Role, TransactionId, UserId};

    fn tx_created(at: DateTime<Utc>) -> Transaction {
        Transaction::settled(
            TransactionId::new(),
            "TRX-20260101-00000001".into(),
            vec![LineItem {
                product_id: ProductId::new(),
                product_code: "IBU-200".into(),
                product_name: "Ibuprofen 200mg".into(),
                quantity: 1,
                unit_price: 500,
                subtotal: 500,
            }],
            price(&[(1, 500)], DiscountSpec::None, 500).unwrap(),
            PaymentMethod::Cash,
            UserId::new(),
            at,
        )
        .unwrap()
    }

    fn cashier() -> Actor {
        Actor::user(UserId::new(), Role::Cashier).unwrap()
    }

    #[test]
    fn inside_window_anyone_may_void() {
        let now = Utc::now();
        let tx = tx_created(now - Duration::hours(23));
        assert!(VoidPolicy::default().check(&tx, &cashier(), now).is_ok());
    }

    #[test]
    fn outside_window_needs_privilege() {
        let now = Utc::now();
        let tx = tx_created(now - Duration::hours(25));
        let policy = VoidPolicy::default();

        assert!(matches!(
            policy.check(&tx, &cashier(), now),
            Err(DomainError::BusinessRule(_))
        ));
        assert!(matches!(
            policy.check(&tx, &Actor::system(), now),
            Err(DomainError::BusinessRule(_))
        ));
        let manager = Actor::user(UserId::new(), Role::Manager).unwrap();
        assert!(policy.check(&tx, &manager, now).is_ok());
    }

    #[test]
    fn already_voided_is_rejected_even_for_admins() {
        let now = Utc::now();
        let mut tx = tx_created(now);
        tx.mark_voided(&VoidRecord {
            reason: "duplicate".into(),
            voided_by: UserId::new(),
            voided_at: now,
        })
        .unwrap();
        let admin = Actor::user(UserId::new(), Role::Admin).unwrap();
        assert!(VoidPolicy::default().check(&tx, &admin, now).is_err());
    }

    #[test]
    fn blank_reason_is_rejected() {
        assert!(VoidPolicy::validate_reason("  ").is_err());
        assert!(VoidPolicy::validate_reason("customer returned").is_ok());
    }
}
