//! Stock and expiry alert rules.
//!
//! Per (product, alert type) an alert is either open or resolved, and at most
//! one unresolved alert exists at a time. The rules here only decide which
//! types *should* be open; the alert store owns the records.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use rxledger_core::{AlertId, DomainError, DomainResult, ProductId, UserId};

use crate::product::Product;

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertType {
    LowStock,
    OutOfStock,
    #[serde(rename = "expiring_in_7_days")]
    ExpiringIn7Days,
    #[serde(rename = "expiring_in_30_days")]
    ExpiringIn30Days,
    #[serde(rename = "expiring_in_60_days")]
    ExpiringIn60Days,
    Expired,
}

impl AlertType {
    pub const STOCK: [AlertType; 2] = [AlertType::LowStock, AlertType::OutOfStock];

    pub const EXPIRY: [AlertType; 4] = [
        AlertType::Expired,
        AlertType::ExpiringIn7Days,
        AlertType::ExpiringIn30Days,
        AlertType::ExpiringIn60Days,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            AlertType::LowStock => "low_stock",
            AlertType::OutOfStock => "out_of_stock",
            AlertType::ExpiringIn7Days => "expiring_in_7_days",
            AlertType::ExpiringIn30Days => "expiring_in_30_days",
            AlertType::ExpiringIn60Days => "expiring_in_60_days",
            AlertType::Expired => "expired",
        }
    }

    pub fn severity(&self) -> Severity {
        match self {
            AlertType::OutOfStock | AlertType::Expired | AlertType::ExpiringIn7Days => {
                Severity::Critical
            }
            AlertType::LowStock | AlertType::ExpiringIn30Days => Severity::Warning,
            AlertType::ExpiringIn60Days => Severity::Info,
        }
    }

    pub fn is_expiry(&self) -> bool {
        Self::EXPIRY.contains(self)
    }

    /// Stock-level condition for a product, if any.
    pub fn for_stock(stock: i64, reorder_threshold: i64) -> Option<AlertType> {
        if stock <= 0 {
            Some(AlertType::OutOfStock)
        } else if stock <= reorder_threshold {
            Some(AlertType::LowStock)
        } else {
            None
        }
    }

    /// Expiry bucket for the given number of days until expiry, if any.
    pub fn for_days_until_expiry(days: i64) -> Option<AlertType> {
        match days {
            d if d < 0 => Some(AlertType::Expired),
            d if d <= 7 => Some(AlertType::ExpiringIn7Days),
            d if d <= 30 => Some(AlertType::ExpiringIn30Days),
            d if d <= 60 => Some(AlertType::ExpiringIn60Days),
            _ => None,
        }
    }
}

impl core::fmt::Display for AlertType {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl core::str::FromStr for AlertType {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "low_stock" => Ok(AlertType::LowStock),
            "out_of_stock" => Ok(AlertType::OutOfStock),
            "expiring_in_7_days" => Ok(AlertType::ExpiringIn7Days),
            "expiring_in_30_days" => Ok(AlertType::ExpiringIn30Days),
            "expiring_in_60_days" => Ok(AlertType::ExpiringIn60Days),
            "expired" => Ok(AlertType::Expired),
            other => Err(DomainError::validation(format!("unknown alert type '{other}'"))),
        }
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Info,
    Warning,
    Critical,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Info => "info",
            Severity::Warning => "warning",
            Severity::Critical => "critical",
        }
    }
}

impl core::str::FromStr for Severity {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "info" => Ok(Severity::Info),
            "warning" => Ok(Severity::Warning),
            "critical" => Ok(Severity::Critical),
            other => Err(DomainError::validation(format!("unknown severity '{other}'"))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockAlert {
    pub id: AlertId,
    pub product_id: ProductId,
    pub alert_type: AlertType,
    pub severity: Severity,
    pub message: String,
    pub is_resolved: bool,
    pub resolved_by: Option<UserId>,
    pub resolved_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl StockAlert {
    /// A new open alert describing the product's current state.
    pub fn open(product: &Product, alert_type: AlertType, today: NaiveDate, at: DateTime<Utc>) -> Self {
        Self {
            id: AlertId::new(),
            product_id: product.id,
            alert_type,
            severity: alert_type.severity(),
            message: message_for(product, alert_type, today),
            is_resolved: false,
            resolved_by: None,
            resolved_at: None,
            created_at: at,
        }
    }

    pub fn resolve(&mut self, resolved_by: UserId, at: DateTime<Utc>) -> DomainResult<()> {
        if self.is_resolved {
            return Err(DomainError::business(format!(
                "alert {} is already resolved",
                self.id
            )));
        }
        self.is_resolved = true;
        self.resolved_by = Some(resolved_by);
        self.resolved_at = Some(at);
        Ok(())
    }
}

fn message_for(product: &Product, alert_type: AlertType, today: NaiveDate) -> String {
    let label = format!("{} ({})", product.name, product.code);
    match alert_type {
        AlertType::OutOfStock => format!("{label} is out of stock"),
        AlertType::LowStock => format!(
            "{label} is low on stock: {} left, reorder threshold {}",
            product.stock_quantity, product.reorder_threshold
        ),
        AlertType::Expired => match product.days_until_expiry(today) {
            Some(days) => format!("{label} expired {} day(s) ago", -days),
            None => format!("{label} has expired"),
        },
        _ => match product.days_until_expiry(today) {
            Some(days) => format!("{label} expires in {days} day(s)"),
            None => format!("{label} is approaching expiry"),
        },
    }
}

/// Which alert types to open and which to close for one product.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AlertPlan {
    pub open: Vec<AlertType>,
    pub close: Vec<AlertType>,
}

impl AlertPlan {
    /// Stock alerts: at most one of OutOfStock / LowStock, the other closed.
    pub fn for_stock(product: &Product) -> Self {
        if product.archived {
            return Self::close_all();
        }
        Self::one_of(
            &AlertType::STOCK,
            AlertType::for_stock(product.stock_quantity, product.reorder_threshold),
        )
    }

    /// Expiry alerts: exactly the current bucket open, every other bucket closed.
    pub fn for_expiry(product: &Product, today: NaiveDate) -> Self {
        if product.archived {
            return Self::close_all();
        }
        let bucket = product
            .days_until_expiry(today)
            .and_then(AlertType::for_days_until_expiry);
        Self::one_of(&AlertType::EXPIRY, bucket)
    }

    /// Stock and expiry rules together.
    pub fn for_product(product: &Product, today: NaiveDate) -> Self {
        if product.archived {
            return Self::close_all();
        }
        let mut plan = Self::for_stock(product);
        let expiry = Self::for_expiry(product, today);
        plan.open.extend(expiry.open);
        plan.close.extend(expiry.close);
        plan
    }

    /// Archived products keep no open alerts.
    pub fn close_all() -> Self {
        Self {
            open: Vec::new(),
            close: AlertType::STOCK
                .iter()
                .chain(AlertType::EXPIRY.iter())
                .copied()
                .collect(),
        }
    }

    fn one_of(family: &[AlertType], active: Option<AlertType>) -> Self {
        Self {
            open: active.into_iter().collect(),
            close: family
                .iter()
                .copied()
                .filter(|t| Some(*t) != active)
                .collect(),
        }
    }
}

/// Filters for listing alerts.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AlertFilter {
    #[serde(default)]
    pub product_id: Option<ProductId>,
    #[serde(default)]
    pub alert_type: Option<AlertType>,
    #[serde(default)]
    pub resolved: Option<bool>,
}

impl AlertFilter {
    pub fn open_for(product_id: ProductId) -> Self {
        Self {
            product_id: Some(product_id),
            alert_type: None,
            resolved: Some(false),
        }
    }

    pub fn matches(&self, alert: &StockAlert) -> bool {
        self.product_id.is_none_or(|p| p == alert.product_id)
            && self.alert_type.is_none_or(|t| t == alert.alert_type)
            && self.resolved.is_none_or(|r| r == alert.is_resolved)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::product::NewProduct;

    fn product(stock: i64, threshold: i64) -> Product {
        let mut p = NewProduct {
            code: "AMX-250".into(),
            name: "Amoxicillin 250mg".into(),
            unit_price: 1200,
            reorder_threshold: threshold,
            expiry_date: None,
        }
        .into_product(ProductId::new(), Utc::now())
        .unwrap();
        p.stock_quantity = stock;
        p
    }

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 6, 1).unwrap()
    }

    #[test]
    fn stock_condition_boundaries() {
        assert_eq!(AlertType::for_stock(0, 10), Some(AlertType::OutOfStock));
        assert_eq!(AlertType::for_stock(1, 10), Some(AlertType::LowStock));
        assert_eq!(AlertType::for_stock(10, 10), Some(AlertType::LowStock));
        assert_eq!(AlertType::for_stock(11, 10), None);
        // A zero threshold still reports out-of-stock.
        assert_eq!(AlertType::for_stock(0, 0), Some(AlertType::OutOfStock));
        assert_eq!(AlertType::for_stock(1, 0), None);
    }

    #[test]
    fn expiry_bucket_boundaries() {
        assert_eq!(AlertType::for_days_until_expiry(-1), Some(AlertType::Expired));
        assert_eq!(AlertType::for_days_until_expiry(0), Some(AlertType::ExpiringIn7Days));
        assert_eq!(AlertType::for_days_until_expiry(7), Some(AlertType::ExpiringIn7Days));
        assert_eq!(AlertType::for_days_until_expiry(8), Some(AlertType::ExpiringIn30Days));
        assert_eq!(AlertType::for_days_until_expiry(30), Some(AlertType::ExpiringIn30Days));
        assert_eq!(AlertType::for_days_until_expiry(60), Some(AlertType::ExpiringIn60Days));
        assert_eq!(AlertType::for_days_until_expiry(61), None);
    }

    #[test]
    fn out_of_stock_plan_closes_low_stock() {
        let plan = AlertPlan::for_stock(&product(0, 10));
        assert_eq!(plan.open, vec![AlertType::OutOfStock]);
        assert_eq!(plan.close, vec![AlertType::LowStock]);
    }

    #[test]
    fn healthy_stock_closes_both() {
        let plan = AlertPlan::for_stock(&product(50, 10));
        assert!(plan.open.is_empty());
        assert_eq!(plan.close.len(), 2);
    }

    #[test]
    fn expiry_plan_keeps_exactly_one_bucket() {
        let mut p = product(50, 10);
        p.expiry_date = today().checked_add_days(chrono::Days::new(20));
        let plan = AlertPlan::for_expiry(&p, today());
        assert_eq!(plan.open, vec![AlertType::ExpiringIn30Days]);
        assert_eq!(plan.close.len(), 3);
        assert!(!plan.close.contains(&AlertType::ExpiringIn30Days));
    }

    #[test]
    fn archived_product_closes_everything() {
        let mut p = product(0, 10);
        p.archived = true;
        let plan = AlertPlan::for_product(&p, today());
        assert!(plan.open.is_empty());
        assert_eq!(plan.close.len(), 6);
    }

    #[test]
    fn severity_mapping() {
        assert_eq!(AlertType::OutOfStock.severity(), Severity::Critical);
        assert_eq!(AlertType::ExpiringIn7Days.severity(), Severity::Critical);
        assert_eq!(AlertType::LowStock.severity(), Severity::Warning);
        assert_eq!(AlertType::ExpiringIn60Days.severity(), Severity::Info);
    }

    #[test]
    fn resolving_twice_is_rejected() {
        let mut alert = StockAlert::open(&product(0, 10), AlertType::OutOfStock, today(), Utc::now());
        assert_eq!(alert.message, "Amoxicillin 250mg (AMX-250) is out of stock");
        alert.resolve(UserId::new(), Utc::now()).unwrap();
        assert!(alert.resolve(UserId::new(), Utc::now()).is_err());
    }

    #[test]
    fn alert_type_serializes_as_snake_case() {
        let json = serde_json::to_string(&AlertType::ExpiringIn30Days).unwrap();
        assert_eq!(json, "\"expiring_in_30_days\"");
        assert_eq!("expiring_in_30_days".parse::<AlertType>().unwrap(), AlertType::ExpiringIn30Days);
    }
}
