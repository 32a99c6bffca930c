use chrono::{NaiveDate, Utc};
use serde::Deserialize;
use serde_json::json;

use rxledger_core::{Actor, ProductId, TransactionId};
use rxledger_infra::{
    AdjustStock, ReceiveStock, SaleLineRequest, SettleSale, SweepReport, VerificationReport,
    VoidSale,
};
use rxledger_inventory::ReferenceType;
use rxledger_sales::{DiscountSpec, PaymentMethod};

// -------------------------
// Request DTOs
// -------------------------

#[derive(Debug, Deserialize)]
pub struct ListProductsQuery {
    #[serde(default)]
    pub include_archived: bool,
}

#[derive(Debug, Deserialize)]
pub struct ReceiveStockRequest {
    pub quantity: i64,
    pub reference_type: ReferenceType,
    pub reference_id: String,
    #[serde(default)]
    pub reason: Option<String>,
}

impl ReceiveStockRequest {
    pub fn into_command(self, product_id: ProductId, actor: &Actor) -> ReceiveStock {
        ReceiveStock {
            product_id,
            quantity: self.quantity,
            reference_type: self.reference_type,
            reference_id: self.reference_id,
            reason: self.reason,
            actor: *actor,
            occurred_at: Utc::now(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct AdjustStockRequest {
    /// Signed change; negative removes stock.
    pub quantity: i64,
    pub reason: String,
}

impl AdjustStockRequest {
    pub fn into_command(self, product_id: ProductId, actor: &Actor) -> AdjustStock {
        AdjustStock {
            product_id,
            quantity: self.quantity,
            reason: self.reason,
            actor: *actor,
            occurred_at: Utc::now(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct SummaryQuery {
    pub month: u32,
    pub year: i32,
}

#[derive(Debug, Deserialize)]
pub struct SettleRequest {
    pub lines: Vec<SaleLineRequest>,
    pub payment_method: PaymentMethod,
    #[serde(default)]
    pub discount: DiscountSpec,
    pub amount_paid: i64,
}

impl SettleRequest {
    pub fn into_command(self, actor: &Actor) -> SettleSale {
        SettleSale {
            lines: self.lines,
            payment_method: self.payment_method,
            discount: self.discount,
            amount_paid: self.amount_paid,
            actor: *actor,
            occurred_at: Utc::now(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct VoidRequest {
    pub reason: String,
}

impl VoidRequest {
    pub fn into_command(self, transaction_id: TransactionId, actor: &Actor) -> VoidSale {
        VoidSale {
            transaction_id,
            reason: self.reason,
            actor: *actor,
            occurred_at: Utc::now(),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct SweepRequest {
    /// Defaults to the current UTC date.
    #[serde(default)]
    pub today: Option<NaiveDate>,
}

// -------------------------
// Response mapping
// -------------------------

pub fn sweep_to_json(report: &SweepReport) -> serde_json::Value {
    json!({
        "products_evaluated": report.products_evaluated,
        "opened": report.changes.opened,
        "resolved": report.changes.resolved,
    })
}

pub fn verification_to_json(report: &VerificationReport) -> serde_json::Value {
    json!({
        "consistent": report.is_consistent(),
        "verified": report.verified.len(),
        "divergent": report
            .divergent
            .iter()
            .map(|(product_id, reason)| json!({ "product_id": product_id, "reason": reason }))
            .collect::<Vec<_>>(),
    })
}
