//! Append-only stock movements and the quantity chain they form.
//!
//! For one product, movements are totally ordered and chained: each entry's
//! `previous_quantity` is the `new_quantity` of the entry before it, and
//! `new_quantity = previous_quantity + quantity`.

use chrono::{DateTime, Datelike, NaiveDate, TimeZone, Utc};
use serde::{Deserialize, Serialize};

use rxledger_core::{DomainError, DomainResult, MovementId, ProductId, UserId};

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MovementType {
    Inbound,
    Outbound,
}

impl MovementType {
    pub fn for_quantity(signed_quantity: i64) -> Self {
        if signed_quantity < 0 {
            MovementType::Outbound
        } else {
            MovementType::Inbound
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            MovementType::Inbound => "inbound",
            MovementType::Outbound => "outbound",
        }
    }
}

impl core::str::FromStr for MovementType {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "inbound" => Ok(MovementType::Inbound),
            "outbound" => Ok(MovementType::Outbound),
            other => Err(DomainError::validation(format!(
                "unknown movement type '{other}'"
            ))),
        }
    }
}

/// What caused a movement.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReferenceType {
    Sale,
    Adjustment,
    PurchaseOrder,
    Return,
    VoidReversal,
}

impl ReferenceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReferenceType::Sale => "sale",
            ReferenceType::Adjustment => "adjustment",
            ReferenceType::PurchaseOrder => "purchase_order",
            ReferenceType::Return => "return",
            ReferenceType::VoidReversal => "void_reversal",
        }
    }
}

impl core::str::FromStr for ReferenceType {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "sale" => Ok(ReferenceType::Sale),
            "adjustment" => Ok(ReferenceType::Adjustment),
            "purchase_order" => Ok(ReferenceType::PurchaseOrder),
            "return" => Ok(ReferenceType::Return),
            "void_reversal" => Ok(ReferenceType::VoidReversal),
            other => Err(DomainError::validation(format!(
                "unknown reference type '{other}'"
            ))),
        }
    }
}

/// A movement about to be appended. The store assigns the id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewMovement {
    pub product_id: ProductId,
    pub movement_type: MovementType,
    /// Signed: positive for inbound, negative for outbound.
    pub quantity: i64,
    pub previous_quantity: i64,
    pub reference_type: ReferenceType,
    pub reference_id: String,
    pub reason: Option<String>,
    pub created_by: UserId,
    pub created_at: DateTime<Utc>,
}

impl NewMovement {
    /// Build a movement whose type follows the sign of `signed_quantity`.
    pub fn new(
        product_id: ProductId,
        signed_quantity: i64,
        previous_quantity: i64,
        reference_type: ReferenceType,
        reference_id: impl Into<String>,
        created_by: UserId,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            product_id,
            movement_type: MovementType::for_quantity(signed_quantity),
            quantity: signed_quantity,
            previous_quantity,
            reference_type,
            reference_id: reference_id.into(),
            reason: None,
            created_by,
            created_at,
        }
    }

    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    /// Quantity after this movement. Never negative.
    pub fn new_quantity(&self) -> DomainResult<i64> {
        let next = self
            .previous_quantity
            .checked_add(self.quantity)
            .ok_or_else(|| DomainError::business("stock quantity overflow"))?;
        if next < 0 {
            return Err(DomainError::invariant(format!(
                "movement would take product {} below zero ({} {:+})",
                self.product_id, self.previous_quantity, self.quantity
            )));
        }
        Ok(next)
    }

    pub fn validate(&self) -> DomainResult<()> {
        if self.quantity == 0 {
            return Err(DomainError::validation("movement quantity cannot be zero"));
        }
        if MovementType::for_quantity(self.quantity) != self.movement_type {
            return Err(DomainError::validation(format!(
                "{} movement cannot carry quantity {}",
                self.movement_type.as_str(),
                self.quantity
            )));
        }
        if self.previous_quantity < 0 {
            return Err(DomainError::invariant("previous quantity cannot be negative"));
        }
        if self.reference_id.trim().is_empty() {
            return Err(DomainError::validation("movement reference id cannot be empty"));
        }
        self.new_quantity().map(|_| ())
    }

    /// Check that this movement continues the product's chain.
    ///
    /// `tail` is the newest committed-or-staged movement; without one, the
    /// product's current projected stock is the expected opening quantity.
    pub fn check_link(&self, tail: Option<&InventoryMovement>, current_stock: i64) -> DomainResult<()> {
        self.check_previous(tail.map(|m| m.new_quantity).unwrap_or(current_stock))
    }

    /// Check `previous_quantity` against the quantity the ledger ends at.
    pub fn check_previous(&self, ledger_quantity: i64) -> DomainResult<()> {
        if self.previous_quantity != ledger_quantity {
            return Err(DomainError::invariant(format!(
                "ledger chain broken for product {}: previous quantity {} but ledger tail is {}",
                self.product_id, self.previous_quantity, ledger_quantity
            )));
        }
        Ok(())
    }
}

/// An immutable ledger entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InventoryMovement {
    pub id: MovementId,
    pub product_id: ProductId,
    pub movement_type: MovementType,
    pub quantity: i64,
    pub previous_quantity: i64,
    pub new_quantity: i64,
    pub reference_type: ReferenceType,
    pub reference_id: String,
    pub reason: Option<String>,
    pub created_by: UserId,
    pub created_at: DateTime<Utc>,
}

impl InventoryMovement {
    /// Validate a pending movement and stamp it with its id.
    pub fn record(id: MovementId, movement: NewMovement) -> DomainResult<Self> {
        movement.validate()?;
        let new_quantity = movement.new_quantity()?;
        Ok(Self {
            id,
            product_id: movement.product_id,
            movement_type: movement.movement_type,
            quantity: movement.quantity,
            previous_quantity: movement.previous_quantity,
            new_quantity,
            reference_type: movement.reference_type,
            reference_id: movement.reference_id,
            reason: movement.reason,
            created_by: movement.created_by,
            created_at: movement.created_at,
        })
    }

    /// Absolute quantity moved.
    pub fn magnitude(&self) -> i64 {
        self.quantity.saturating_abs()
    }
}

/// Verify the chain of one product's movements, given oldest first.
pub fn verify_chain(movements: &[InventoryMovement]) -> DomainResult<()> {
    let mut previous: Option<&InventoryMovement> = None;
    for m in movements {
        if m.previous_quantity.checked_add(m.quantity) != Some(m.new_quantity) {
            return Err(DomainError::invariant(format!(
                "movement {} does not add up: {} {:+} != {}",
                m.id, m.previous_quantity, m.quantity, m.new_quantity
            )));
        }
        if let Some(prev) = previous {
            if prev.product_id != m.product_id {
                return Err(DomainError::invariant(format!(
                    "movement {} belongs to another product",
                    m.id
                )));
            }
            if prev.new_quantity != m.previous_quantity {
                return Err(DomainError::invariant(format!(
                    "movement {} starts at {} but movement {} ended at {}",
                    m.id, m.previous_quantity, prev.id, prev.new_quantity
                )));
            }
        }
        previous = Some(m);
    }
    Ok(())
}

/// Stock implied by replaying a product's ledger, oldest first.
///
/// `None` for an empty ledger.
pub fn replayed_stock(movements: &[InventoryMovement]) -> Option<i64> {
    let first = movements.first()?;
    movements
        .iter()
        .try_fold(first.previous_quantity, |acc, m| acc.checked_add(m.quantity))
}

/// Calendar month in UTC, `[start, end)`.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct MonthWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl MonthWindow {
    pub fn new(month: u32, year: i32) -> DomainResult<Self> {
        if !(1..=12).contains(&month) {
            return Err(DomainError::validation(format!(
                "month must be between 1 and 12, got {month}"
            )));
        }
        let first = NaiveDate::from_ymd_opt(year, month, 1)
            .ok_or_else(|| DomainError::validation(format!("year {year} is out of range")))?;
        let next = if month == 12 {
            NaiveDate::from_ymd_opt(year + 1, 1, 1)
        } else {
            NaiveDate::from_ymd_opt(year, month + 1, 1)
        }
        .ok_or_else(|| DomainError::validation(format!("year {year} is out of range")))?;

        Ok(Self {
            start: Utc.from_utc_datetime(&first.and_time(chrono::NaiveTime::MIN)),
            end: Utc.from_utc_datetime(&next.and_time(chrono::NaiveTime::MIN)),
        })
    }

    pub fn contains(&self, at: DateTime<Utc>) -> bool {
        at >= self.start && at < self.end
    }

    pub fn month(&self) -> u32 {
        self.start.month()
    }

    pub fn year(&self) -> i32 {
        self.start.year()
    }
}

/// Monthly totals for one product.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MovementSummary {
    pub total_inbound: i64,
    pub total_outbound: i64,
    pub net_change: i64,
}

impl MovementSummary {
    /// Sum absolute inbound and outbound quantities that fall inside `window`.
    pub fn of<'a>(
        movements: impl IntoIterator<Item = &'a InventoryMovement>,
        window: &MonthWindow,
    ) -> Self {
        movements
            .into_iter()
            .filter(|m| window.contains(m.created_at))
            .fold(Self::default(), |mut acc, m| {
                match m.movement_type {
                    MovementType::Inbound => acc.total_inbound += m.magnitude(),
                    MovementType::Outbound => acc.total_outbound += m.magnitude(),
                }
                acc.net_change = acc.total_inbound - acc.total_outbound;
                acc
            })
    }
}

/// Optional filters for history reads. Results are returned newest first.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryFilter {
    #[serde(default)]
    pub movement_type: Option<MovementType>,
    #[serde(default)]
    pub reference_type: Option<ReferenceType>,
    #[serde(default)]
    pub reference_id: Option<String>,
    #[serde(default)]
    pub from: Option<DateTime<Utc>>,
    #[serde(default)]
    pub to: Option<DateTime<Utc>>,
    #[serde(default)]
    pub limit: Option<usize>,
}

impl HistoryFilter {
    pub fn matches(&self, m: &InventoryMovement) -> bool {
        self.movement_type.is_none_or(|t| t == m.movement_type)
            && self.reference_type.is_none_or(|t| t == m.reference_type)
            && self
                .reference_id
                .as_deref()
                .is_none_or(|r| r == m.reference_id)
            && self.from.is_none_or(|from| m.created_at >= from)
            && self.to.is_none_or(|to| m.created_at <= to)
    }

    /// Filter and order a product's ledger (given oldest first).
    pub fn apply(&self, movements: &[InventoryMovement]) -> Vec<InventoryMovement> {
        movements
            .iter()
            .rev()
            .filter(|m| self.matches(m))
            .take(self.limit.unwrap_or(usize::MAX))
            .cloned()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn build_chain(product_id: ProductId, opening: i64, deltas: &[i64]) -> Vec<InventoryMovement> {
        let mut out: Vec<InventoryMovement> = Vec::new();
        let mut stock = opening;
        for (i, delta) in deltas.iter().enumerate() {
            let new = NewMovement::new(
                product_id,
                *delta,
                stock,
                ReferenceType::Adjustment,
                format!("ADJ-{i}"),
                UserId::new(),
                Utc::now(),
            );
            new.check_link(out.last(), opening).unwrap();
            let m = InventoryMovement::record(MovementId::new(i as u64 + 1), new).unwrap();
            stock = m.new_quantity;
            out.push(m);
        }
        out
    }

    #[test]
    fn zero_quantity_is_rejected() {
        let m = NewMovement::new(
            ProductId::new(),
            0,
            5,
            ReferenceType::Adjustment,
            "ADJ-1",
            UserId::new(),
            Utc::now(),
        );
        assert!(matches!(m.validate(), Err(DomainError::Validation(_))));
    }

    #[test]
    fn type_must_agree_with_sign() {
        let mut m = NewMovement::new(
            ProductId::new(),
            -3,
            5,
            ReferenceType::Sale,
            "TRX-1",
            UserId::new(),
            Utc::now(),
        );
        assert_eq!(m.movement_type, MovementType::Outbound);
        m.movement_type = MovementType::Inbound;
        assert!(m.validate().is_err());
    }

    #[test]
    fn movement_cannot_go_below_zero() {
        let m = NewMovement::new(
            ProductId::new(),
            -6,
            5,
            ReferenceType::Sale,
            "TRX-1",
            UserId::new(),
            Utc::now(),
        );
        assert!(matches!(
            m.validate(),
            Err(DomainError::InvariantViolation(_))
        ));
    }

    #[test]
    fn stale_previous_quantity_breaks_the_link() {
        let product = ProductId::new();
        let chain = build_chain(product, 0, &[10, -4]);
        let stale = NewMovement::new(
            product,
            -1,
            10,
            ReferenceType::Sale,
            "TRX-2",
            UserId::new(),
            Utc::now(),
        );
        assert!(stale.check_link(chain.last(), 6).is_err());
    }

    #[test]
    fn verify_chain_detects_tampering() {
        let mut chain = build_chain(ProductId::new(), 0, &[10, -4, 3]);
        assert!(verify_chain(&chain).is_ok());
        chain[1].new_quantity = 7;
        assert!(verify_chain(&chain).is_err());
    }

    #[test]
    fn month_window_rejects_invalid_month() {
        assert!(MonthWindow::new(0, 2026).is_err());
        assert!(MonthWindow::new(13, 2026).is_err());
        let dec = MonthWindow::new(12, 2026).unwrap();
        assert_eq!(dec.end.year(), 2027);
    }

    #[test]
    fn summary_counts_only_the_requested_month() {
        let product = ProductId::new();
        let mut chain = build_chain(product, 0, &[20, -5, -3, 4]);
        let march = Utc.with_ymd_and_hms(2026, 3, 15, 12, 0, 0).unwrap();
        let april = Utc.with_ymd_and_hms(2026, 4, 1, 0, 0, 0).unwrap();
        chain[0].created_at = march;
        chain[1].created_at = march;
        chain[2].created_at = march;
        chain[3].created_at = april;

        let window = MonthWindow::new(3, 2026).unwrap();
        let summary = MovementSummary::of(&chain, &window);
        assert_eq!(
            summary,
            MovementSummary {
                total_inbound: 20,
                total_outbound: 8,
                net_change: 12
            }
        );
    }

    #[test]
    fn history_filter_is_newest_first_and_limited() {
        let chain = build_chain(ProductId::new(), 0, &[10, -1, -2, 5]);
        let filter = HistoryFilter {
            movement_type: Some(MovementType::Outbound),
            limit: Some(1),
            ..Default::default()
        };
        let hits = filter.apply(&chain);
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].quantity, -2);
    }

    proptest! {
        #[test]
        fn replay_matches_tail(opening in 0i64..1_000, deltas in proptest::collection::vec(1i64..50, 1..40), signs in proptest::collection::vec(any::<bool>(), 40)) {
            // Only emit outbound deltas that keep stock non-negative.
            let mut stock = opening;
            let mut applied = Vec::new();
            for (d, outbound) in deltas.iter().zip(signs.iter()) {
                let delta = if *outbound && stock >= *d { -*d } else { *d };
                stock += delta;
                applied.push(delta);
            }

            let chain = build_chain(ProductId::new(), opening, &applied);
            prop_assert!(verify_chain(&chain).is_ok());
            prop_assert_eq!(replayed_stock(&chain), Some(stock));
            prop_assert_eq!(chain.last().map(|m| m.new_quantity), Some(stock));
            prop_assert!(chain.iter().all(|m| m.new_quantity >= 0));
        }
    }
}
