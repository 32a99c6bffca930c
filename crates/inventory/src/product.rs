use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use rxledger_core::{DomainError, DomainResult, ProductId};

/// Catalogue product together with its projected stock.
///
/// `stock_quantity` is derived state: it always equals the opening quantity of
/// the product's first movement plus the sum of all signed movement quantities.
/// Only the ledger engines change it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Product {
    pub id: ProductId,
    pub code: String,
    pub name: String,
    /// Price in minor currency units (cents).
    pub unit_price: i64,
    pub stock_quantity: i64,
    pub reorder_threshold: i64,
    pub expiry_date: Option<NaiveDate>,
    pub archived: bool,
    /// Incremented once per committed stock mutation.
    pub version: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Product {
    /// Products can only be sold while they are active.
    pub fn ensure_sellable(&self) -> DomainResult<()> {
        if self.archived {
            return Err(DomainError::business(format!(
                "product {} is archived and cannot be sold",
                self.code
            )));
        }
        Ok(())
    }

    /// Whole days from `today` until the expiry date; negative once expired.
    pub fn days_until_expiry(&self, today: NaiveDate) -> Option<i64> {
        self.expiry_date
            .map(|expiry| expiry.signed_duration_since(today).num_days())
    }
}

/// Input for creating a catalogue product. Stock always starts at zero.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewProduct {
    pub code: String,
    pub name: String,
    pub unit_price: i64,
    pub reorder_threshold: i64,
    #[serde(default)]
    pub expiry_date: Option<NaiveDate>,
}

impl NewProduct {
    pub fn validate(&self) -> DomainResult<()> {
        if self.code.trim().is_empty() {
            return Err(DomainError::validation("product code cannot be empty"));
        }
        if self.name.trim().is_empty() {
            return Err(DomainError::validation("product name cannot be empty"));
        }
        if self.unit_price < 0 {
            return Err(DomainError::validation("unit price cannot be negative"));
        }
        if self.reorder_threshold < 0 {
            return Err(DomainError::validation("reorder threshold cannot be negative"));
        }
        Ok(())
    }

    /// Validate and build the product record.
    pub fn into_product(self, id: ProductId, at: DateTime<Utc>) -> DomainResult<Product> {
        self.validate()?;
        Ok(Product {
            id,
            code: self.code.trim().to_string(),
            name: self.name.trim().to_string(),
            unit_price: self.unit_price,
            stock_quantity: 0,
            reorder_threshold: self.reorder_threshold,
            expiry_date: self.expiry_date,
            archived: false,
            version: 0,
            created_at: at,
            updated_at: at,
        })
    }
}

/// Partial update of catalogue attributes. Stock is deliberately absent.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProductUpdate {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub unit_price: Option<i64>,
    #[serde(default)]
    pub reorder_threshold: Option<i64>,
    #[serde(default)]
    pub expiry_date: Option<NaiveDate>,
    /// Remove the expiry date (ignored when `expiry_date` is set).
    #[serde(default)]
    pub clear_expiry: bool,
}

impl ProductUpdate {
    pub fn validate(&self) -> DomainResult<()> {
        if let Some(name) = &self.name {
            if name.trim().is_empty() {
                return Err(DomainError::validation("product name cannot be empty"));
            }
        }
        if self.unit_price.is_some_and(|p| p < 0) {
            return Err(DomainError::validation("unit price cannot be negative"));
        }
        if self.reorder_threshold.is_some_and(|t| t < 0) {
            return Err(DomainError::validation("reorder threshold cannot be negative"));
        }
        Ok(())
    }

    pub fn is_empty(&self) -> bool {
        self.name.is_none()
            && self.unit_price.is_none()
            && self.reorder_threshold.is_none()
            && self.expiry_date.is_none()
            && !self.clear_expiry
    }

    /// Apply to a product in place.
    pub fn apply(&self, product: &mut Product, at: DateTime<Utc>) -> DomainResult<()> {
        self.validate()?;
        if let Some(name) = &self.name {
            product.name = name.trim().to_string();
        }
        if let Some(price) = self.unit_price {
            product.unit_price = price;
        }
        if let Some(threshold) = self.reorder_threshold {
            product.reorder_threshold = threshold;
        }
        if self.expiry_date.is_some() {
            product.expiry_date = self.expiry_date;
        } else if self.clear_expiry {
            product.expiry_date = None;
        }
        product.updated_at = at;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn paracetamol() -> NewProduct {
        NewProduct {
            code: " PCM-500 ".to_string(),
            name: "Paracetamol 500mg".to_string(),
            unit_price: 250,
            reorder_threshold: 10,
            expiry_date: None,
        }
    }

    #[test]
    fn new_product_starts_with_zero_stock_and_trimmed_code() {
        let at = Utc::now();
        let product = paracetamol().into_product(ProductId::new(), at).unwrap();
        assert_eq!(product.code, "PCM-500");
        assert_eq!(product.stock_quantity, 0);
        assert_eq!(product.version, 0);
        assert!(!product.archived);
    }

    #[test]
    fn new_product_rejects_bad_input() {
        let mut p = paracetamol();
        p.code = "  ".into();
        assert!(matches!(p.validate(), Err(DomainError::Validation(_))));

        let mut p = paracetamol();
        p.unit_price = -1;
        assert!(matches!(p.validate(), Err(DomainError::Validation(_))));

        let mut p = paracetamol();
        p.reorder_threshold = -5;
        assert!(matches!(p.validate(), Err(DomainError::Validation(_))));
    }

    #[test]
    fn archived_product_is_not_sellable() {
        let mut product = paracetamol().into_product(ProductId::new(), Utc::now()).unwrap();
        assert!(product.ensure_sellable().is_ok());
        product.archived = true;
        assert!(matches!(
            product.ensure_sellable(),
            Err(DomainError::BusinessRule(_))
        ));
    }

    #[test]
    fn update_never_touches_stock() {
        let mut product = paracetamol().into_product(ProductId::new(), Utc::now()).unwrap();
        product.stock_quantity = 40;
        let update = ProductUpdate {
            unit_price: Some(300),
            expiry_date: NaiveDate::from_ymd_opt(2027, 1, 31),
            ..Default::default()
        };
        update.apply(&mut product, Utc::now()).unwrap();
        assert_eq!(product.unit_price, 300);
        assert_eq!(product.stock_quantity, 40);

        let clear = ProductUpdate {
            clear_expiry: true,
            ..Default::default()
        };
        clear.apply(&mut product, Utc::now()).unwrap();
        assert_eq!(product.expiry_date, None);
    }

    #[test]
    fn days_until_expiry_is_negative_after_expiry() {
        let mut product = paracetamol().into_product(ProductId::new(), Utc::now()).unwrap();
        let today = NaiveDate::from_ymd_opt(2026, 3, 10).unwrap();
        assert_eq!(product.days_until_expiry(today), None);

        product.expiry_date = NaiveDate::from_ymd_opt(2026, 3, 8);
        assert_eq!(product.days_until_expiry(today), Some(-2));
    }
}
