use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use rxledger_core::{DomainError, DomainResult, ProductId, TransactionId, UserId};

use crate::pricing::{DiscountType, PriceBreakdown};

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentMethod {
    Cash,
    Card,
    #[serde(rename = "ewallet")]
    EWallet,
    BankTransfer,
}

impl PaymentMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentMethod::Cash => "cash",
            PaymentMethod::Card => "card",
            PaymentMethod::EWallet => "ewallet",
            PaymentMethod::BankTransfer => "bank_transfer",
        }
    }
}

impl core::str::FromStr for PaymentMethod {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "cash" => Ok(PaymentMethod::Cash),
            "card" => Ok(PaymentMethod::Card),
            "ewallet" => Ok(PaymentMethod::EWallet),
            "bank_transfer" => Ok(PaymentMethod::BankTransfer),
            other => Err(DomainError::validation(format!(
                "unknown payment method '{other}'"
            ))),
        }
    }
}

/// One sold line, with the product snapshot taken at settlement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineItem {
    pub product_id: ProductId,
    pub product_code: String,
    pub product_name: String,
    pub quantity: i64,
    pub unit_price: i64,
    pub subtotal: i64,
}

/// A settled sale. Write-once, except for the void fields.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    pub id: TransactionId,
    pub code: String,
    pub items: Vec<LineItem>,
    pub subtotal: i64,
    pub discount_type: DiscountType,
    /// Cents for flat discounts, basis points for percentage discounts.
    pub discount_value: i64,
    pub discount_amount: i64,
    pub total_amount: i64,
    pub amount_paid: i64,
    pub change_amount: i64,
    pub payment_method: PaymentMethod,
    pub staff_user_id: UserId,
    pub is_voided: bool,
    pub void_reason: Option<String>,
    pub voided_by: Option<UserId>,
    pub voided_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

/// Who voided a transaction, when and why.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoidRecord {
    pub reason: String,
    pub voided_by: UserId,
    pub voided_at: DateTime<Utc>,
}

impl Transaction {
    /// Assemble a settled transaction from priced lines.
    pub fn settled(
        id: TransactionId,
        code: String,
        items: Vec<LineItem>,
        pricing: PriceBreakdown,
        payment_method: PaymentMethod,
        staff_user_id: UserId,
        created_at: DateTime<Utc>,
    ) -> DomainResult<Self> {
        if items.is_empty() {
            return Err(DomainError::validation("a sale needs at least one line item"));
        }
        let line_sum = items
            .iter()
            .try_fold(0i64, |acc, item| acc.checked_add(item.subtotal));
        if line_sum != Some(pricing.subtotal) {
            return Err(DomainError::invariant(
                "line subtotals do not add up to the transaction subtotal",
            ));
        }
        if pricing.total != pricing.subtotal - pricing.discount_amount {
            return Err(DomainError::invariant("total must equal subtotal minus discount"));
        }

        Ok(Self {
            id,
            code,
            items,
            subtotal: pricing.subtotal,
            discount_type: pricing.discount_type,
            discount_value: pricing.discount_value,
            discount_amount: pricing.discount_amount,
            total_amount: pricing.total,
            amount_paid: pricing.amount_paid,
            change_amount: pricing.change,
            payment_method,
            staff_user_id,
            is_voided: false,
            void_reason: None,
            voided_by: None,
            voided_at: None,
            created_at,
        })
    }

    /// Distinct products on this transaction, sorted.
    pub fn product_ids(&self) -> Vec<ProductId> {
        let mut ids: Vec<ProductId> = self.items.iter().map(|i| i.product_id).collect();
        ids.sort();
        ids.dedup();
        ids
    }

    pub fn void_record(&self) -> Option<VoidRecord> {
        if !self.is_voided {
            return None;
        }
        Some(VoidRecord {
            reason: self.void_reason.clone().unwrap_or_default(),
            voided_by: self.voided_by.unwrap_or_else(UserId::system),
            voided_at: self.voided_at.unwrap_or(self.created_at),
        })
    }

    pub fn mark_voided(&mut self, record: &VoidRecord) -> DomainResult<()> {
        if self.is_voided {
            return Err(DomainError::business(format!(
                "transaction {} is already voided",
                self.code
            )));
        }
        self.is_voided = true;
        self.void_reason = Some(record.reason.clone());
        self.voided_by = Some(record.voided_by);
        self.voided_at = Some(record.voided_at);
        Ok(())
    }
}

/// Filters for listing transactions (reporting reads). Voided transactions
/// are included unless `include_voided` is false.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionFilter {
    #[serde(default)]
    pub from: Option<DateTime<Utc>>,
    #[serde(default)]
    pub to: Option<DateTime<Utc>>,
    #[serde(default)]
    pub staff_user_id: Option<UserId>,
    #[serde(default = "include_voided_default")]
    pub include_voided: bool,
    #[serde(default)]
    pub limit: Option<usize>,
}

fn include_voided_default() -> bool {
    true
}

impl Default for TransactionFilter {
    fn default() -> Self {
        Self {
            from: None,
            to: None,
            staff_user_id: None,
            include_voided: true,
            limit: None,
        }
    }
}

impl TransactionFilter {
    pub fn matches(&self, tx: &Transaction) -> bool {
        self.from.is_none_or(|from| tx.created_at >= from)
            && self.to.is_none_or(|to| tx.created_at <= to)
            && self.staff_user_id.is_none_or(|u| u == tx.staff_user_id)
            && (self.include_voided || !tx.is_voided)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pricing::{DiscountSpec, price};

    fn line(product_id: ProductId, quantity: i64, unit_price: i64) -> LineItem {
        LineItem {
            product_id,
            product_code: "CTZ-10".into(),
            product_name: "Cetirizine 10mg".into(),
            quantity,
            unit_price,
            subtotal: quantity * unit_price,
        }
    }

    fn sample() -> Transaction {
        let p = ProductId::new();
        let items = vec![line(p, 2, 300), line(p, 1, 300)];
        let pricing = price(&[(2, 300), (1, 300)], DiscountSpec::Flat(100), 1000).unwrap();
        Transaction::settled(
            TransactionId::new(),
            "TRX-20260101-0000ABCD".into(),
            items,
            pricing,
            PaymentMethod::Cash,
            UserId::new(),
            Utc::now(),
        )
        .unwrap()
    }

    #[test]
    fn settled_transaction_carries_pricing() {
        let tx = sample();
        assert_eq!(tx.subtotal, 900);
        assert_eq!(tx.total_amount, 800);
        assert_eq!(tx.change_amount, 200);
        assert_eq!(tx.product_ids().len(), 1);
        assert!(!tx.is_voided);
    }

    #[test]
    fn mismatched_lines_are_an_invariant_violation() {
        let p = ProductId::new();
        let pricing = price(&[(1, 100)], DiscountSpec::None, 100).unwrap();
        let err = Transaction::settled(
            TransactionId::new(),
            "TRX-20260101-0000ABCD".into(),
            vec![line(p, 2, 100)],
            pricing,
            PaymentMethod::Card,
            UserId::new(),
            Utc::now(),
        )
        .unwrap_err();
        assert!(matches!(err, DomainError::InvariantViolation(_)));
    }

    #[test]
    fn void_is_recorded_once() {
        let mut tx = sample();
        let record = VoidRecord {
            reason: "wrong item".into(),
            voided_by: UserId::new(),
            voided_at: Utc::now(),
        };
        tx.mark_voided(&record).unwrap();
        assert_eq!(tx.void_record(), Some(record.clone()));
        assert!(tx.mark_voided(&record).is_err());
    }

    #[test]
    fn filter_can_exclude_voided() {
        let mut tx = sample();
        tx.is_voided = true;
        let filter = TransactionFilter {
            include_voided: false,
            ..Default::default()
        };
        assert!(!filter.matches(&tx));
        assert!(TransactionFilter::default().matches(&tx));
    }

    #[test]
    fn payment_method_round_trips_through_str() {
        for m in [
            PaymentMethod::Cash,
            PaymentMethod::Card,
            PaymentMethod::EWallet,
            PaymentMethod::BankTransfer,
        ] {
            assert_eq!(m.as_str().parse::<PaymentMethod>().unwrap(), m);
            assert_eq!(serde_json::to_string(&m).unwrap(), format!("\"{}\"", m.as_str()));
        }
    }
}
