//! Sale pricing: line subtotals, discount, total and change.
//!
//! All arithmetic is checked; an overflow is a business error, never a wrap.

use serde::{Deserialize, Serialize};

use rxledger_core::{DomainError, DomainResult};

/// Percentages are expressed in basis points: 10_000 = 100%.
pub const BASIS_POINTS_MAX: u32 = 10_000;

/// Discount requested by the caller.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum DiscountSpec {
    #[default]
    None,
    /// Fixed amount in minor units.
    Flat(i64),
    /// Basis points of the subtotal (1000 = 10%).
    Percentage(u32),
}

/// Stored discount kind.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiscountType {
    None,
    Flat,
    Percentage,
}

impl DiscountType {
    pub fn as_str(&self) -> &'static str {
        match self {
            DiscountType::None => "none",
            DiscountType::Flat => "flat",
            DiscountType::Percentage => "percentage",
        }
    }
}

impl core::str::FromStr for DiscountType {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "none" => Ok(DiscountType::None),
            "flat" => Ok(DiscountType::Flat),
            "percentage" => Ok(DiscountType::Percentage),
            other => Err(DomainError::validation(format!(
                "unknown discount type '{other}'"
            ))),
        }
    }
}

impl DiscountSpec {
    /// Shape checks that need no subtotal.
    pub fn validate(&self) -> DomainResult<()> {
        match *self {
            DiscountSpec::None => Ok(()),
            DiscountSpec::Flat(amount) if amount < 0 => Err(DomainError::validation(
                "flat discount cannot be negative",
            )),
            DiscountSpec::Flat(_) => Ok(()),
            DiscountSpec::Percentage(bps) if bps > BASIS_POINTS_MAX => {
                Err(DomainError::validation(format!(
                    "percentage discount must be between 0 and {BASIS_POINTS_MAX} basis points, got {bps}"
                )))
            }
            DiscountSpec::Percentage(_) => Ok(()),
        }
    }

    pub fn discount_type(&self) -> DiscountType {
        match self {
            DiscountSpec::None => DiscountType::None,
            DiscountSpec::Flat(_) => DiscountType::Flat,
            DiscountSpec::Percentage(_) => DiscountType::Percentage,
        }
    }

    /// The raw value as stored (cents for flat, basis points for percentage).
    pub fn value(&self) -> i64 {
        match *self {
            DiscountSpec::None => 0,
            DiscountSpec::Flat(amount) => amount,
            DiscountSpec::Percentage(bps) => i64::from(bps),
        }
    }

    /// Discount amount for a subtotal. Never exceeds the subtotal.
    pub fn amount(&self, subtotal: i64) -> DomainResult<i64> {
        self.validate()?;
        match *self {
            DiscountSpec::None => Ok(0),
            DiscountSpec::Flat(amount) => {
                if amount > subtotal {
                    return Err(DomainError::business(format!(
                        "flat discount {amount} exceeds subtotal {subtotal}"
                    )));
                }
                Ok(amount)
            }
            DiscountSpec::Percentage(bps) => {
                // Half-up rounding to the minor unit.
                let raw = (i128::from(subtotal) * i128::from(bps) + 5_000) / 10_000;
                i64::try_from(raw).map_err(|_| DomainError::business("discount overflow"))
            }
        }
    }
}

/// Computed totals of a sale.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriceBreakdown {
    pub subtotal: i64,
    pub discount_type: DiscountType,
    pub discount_value: i64,
    pub discount_amount: i64,
    pub total: i64,
    pub amount_paid: i64,
    pub change: i64,
}

pub fn line_subtotal(quantity: i64, unit_price: i64) -> DomainResult<i64> {
    quantity
        .checked_mul(unit_price)
        .ok_or_else(|| DomainError::business("line subtotal overflow"))
}

/// Price a sale from `(quantity, unit_price)` pairs.
pub fn price(
    lines: &[(i64, i64)],
    discount: DiscountSpec,
    amount_paid: i64,
) -> DomainResult<PriceBreakdown> {
    if amount_paid < 0 {
        return Err(DomainError::validation("amount paid cannot be negative"));
    }

    let subtotal = lines.iter().try_fold(0i64, |acc, (qty, unit)| {
        acc.checked_add(line_subtotal(*qty, *unit)?)
            .ok_or_else(|| DomainError::business("subtotal overflow"))
    })?;

    let discount_amount = discount.amount(subtotal)?;
    let total = subtotal.saturating_sub(discount_amount).max(0);

    let change = amount_paid - total;
    if change < 0 {
        return Err(DomainError::business(format!(
            "insufficient payment: total {total}, paid {amount_paid}"
        )));
    }

    Ok(PriceBreakdown {
        subtotal,
        discount_type: discount.discount_type(),
        discount_value: discount.value(),
        discount_amount,
        total,
        amount_paid,
        change,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn ten_percent_of_one_thousand() {
        let p = price(&[(1, 1000)], DiscountSpec::Percentage(1000), 900).unwrap();
        assert_eq!(p.subtotal, 1000);
        assert_eq!(p.discount_amount, 100);
        assert_eq!(p.total, 900);
        assert_eq!(p.change, 0);
    }

    #[test]
    fn underpayment_is_rejected() {
        let err = price(&[(1, 1000)], DiscountSpec::Percentage(1000), 800).unwrap_err();
        assert!(matches!(err, DomainError::BusinessRule(_)));
    }

    #[test]
    fn percentage_rounds_half_up() {
        // 12.5% of 999 = 124.875 -> 125
        assert_eq!(DiscountSpec::Percentage(1250).amount(999).unwrap(), 125);
        // 0.5% of 100 = 0.5 -> 1
        assert_eq!(DiscountSpec::Percentage(50).amount(100).unwrap(), 1);
        // 0.4% of 100 = 0.4 -> 0
        assert_eq!(DiscountSpec::Percentage(40).amount(100).unwrap(), 0);
    }

    #[test]
    fn malformed_discounts_are_validation_errors() {
        assert!(matches!(
            DiscountSpec::Flat(-1).validate(),
            Err(DomainError::Validation(_))
        ));
        assert!(matches!(
            DiscountSpec::Percentage(10_001).validate(),
            Err(DomainError::Validation(_))
        ));
    }

    #[test]
    fn flat_discount_above_subtotal_is_a_business_error() {
        let err = price(&[(2, 100)], DiscountSpec::Flat(201), 0).unwrap_err();
        assert!(matches!(err, DomainError::BusinessRule(_)));
    }

    #[test]
    fn full_discount_gives_zero_total() {
        let p = price(&[(3, 450)], DiscountSpec::Percentage(10_000), 0).unwrap();
        assert_eq!(p.total, 0);
        assert_eq!(p.change, 0);
    }

    #[test]
    fn overflow_is_a_business_error() {
        let err = price(&[(i64::MAX, 2)], DiscountSpec::None, 0).unwrap_err();
        assert!(matches!(err, DomainError::BusinessRule(_)));
    }

    #[test]
    fn discount_spec_wire_format() {
        let json = serde_json::to_string(&DiscountSpec::Percentage(1000)).unwrap();
        assert_eq!(json, r#"{"type":"percentage","value":1000}"#);
        let none: DiscountSpec = serde_json::from_str(r#"{"type":"none"}"#).unwrap();
        assert_eq!(none, DiscountSpec::None);
    }

    proptest! {
        #[test]
        fn totals_are_consistent(
            lines in proptest::collection::vec((1i64..100, 0i64..100_000), 1..10),
            bps in 0u32..=10_000,
            extra in 0i64..10_000,
        ) {
            let subtotal: i64 = lines.iter().map(|(q, u)| q * u).sum();
            let discount = DiscountSpec::Percentage(bps);
            let expected_total = subtotal - discount.amount(subtotal).unwrap();
            let p = price(&lines, discount, expected_total + extra).unwrap();

            prop_assert_eq!(p.subtotal, subtotal);
            prop_assert!(p.discount_amount >= 0 && p.discount_amount <= p.subtotal);
            prop_assert_eq!(p.total, p.subtotal - p.discount_amount);
            prop_assert_eq!(p.change, extra);
        }

        #[test]
        fn flat_discount_never_exceeds_subtotal(subtotal in 0i64..1_000_000, flat in 0i64..2_000_000) {
            match DiscountSpec::Flat(flat).amount(subtotal) {
                Ok(amount) => prop_assert!(amount <= subtotal),
                Err(e) => {
                    prop_assert!(flat > subtotal);
                    prop_assert!(matches!(e, DomainError::BusinessRule(_)), "unexpected error kind");
                }
            }
        }
    }
}
