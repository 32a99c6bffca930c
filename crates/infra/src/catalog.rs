//! Product catalogue: create, edit, archive and delete products.
//!
//! Stock is never written here. Attribute edits go through a unit so they
//! serialize with stock mutations of the same product.

use std::sync::Arc;

use chrono::Utc;
use tracing::{info, instrument};

use rxledger_core::{Actor, DomainError, ProductId};
use rxledger_inventory::{NewProduct, Product, ProductUpdate};

use crate::audit::{AuditAction, AuditEntry};
use crate::effects::PostCommit;
use crate::error::{LedgerError, trace_failure};
use crate::settlement::locked;
use crate::store::{DeleteOutcome, LedgerStore, StoreError};

#[derive(Debug)]
pub struct Catalog {
    ledger: Arc<dyn LedgerStore>,
    effects: Arc<PostCommit>,
}

impl Catalog {
    pub fn new(ledger: Arc<dyn LedgerStore>, effects: Arc<PostCommit>) -> Self {
        Self { ledger, effects }
    }

    #[instrument(skip(self, new, actor), fields(code = %new.code))]
    pub async fn create_product(&self, new: NewProduct, actor: &Actor) -> Result<Product, LedgerError> {
        let result = self.create_inner(new, actor).await;
        match &result {
            Ok(product) => {
                info!(product_id = %product.id, code = %product.code, "product created");
                self.effects.audit(AuditEntry::new(
                    actor,
                    AuditAction::ProductCreated,
                    "product",
                    product.id,
                    format!("created {} ({})", product.name, product.code),
                    product.created_at,
                ));
                self.effects.evaluate(&[product.id]).await;
            }
            Err(err) => trace_failure("create_product", err),
        }
        result
    }

    async fn create_inner(&self, new: NewProduct, actor: &Actor) -> Result<Product, LedgerError> {
        actor.ensure_staff("creating a product")?;
        new.validate()?;
        let code = new.code.trim().to_string();
        let duplicate = || DomainError::business(format!("product code {code} is already in use"));

        if self.ledger.product_by_code(&code).await?.is_some() {
            return Err(duplicate().into());
        }
        let product = new.into_product(ProductId::new(), Utc::now())?;
        match self.ledger.insert_product(&product).await {
            Ok(()) => Ok(product),
            Err(StoreError::Duplicate(_)) => Err(duplicate().into()),
            Err(err) => Err(err.into()),
        }
    }

    /// Edit catalogue attributes (never stock).
    #[instrument(skip(self, update, actor), fields(product_id = %product_id))]
    pub async fn update_product(
        &self,
        product_id: ProductId,
        update: ProductUpdate,
        actor: &Actor,
    ) -> Result<Product, LedgerError> {
        let result = self
            .edit(product_id, actor, "updating a product", |product| {
                if update.is_empty() {
                    return Err(DomainError::validation("nothing to update"));
                }
                update.validate()?;
                update.apply(product, Utc::now())
            })
            .await;
        match &result {
            Ok(product) => {
                self.effects.audit(AuditEntry::new(
                    actor,
                    AuditAction::ProductUpdated,
                    "product",
                    product.id,
                    format!("updated {} ({})", product.name, product.code),
                    product.updated_at,
                ));
                self.effects.evaluate(&[product.id]).await;
            }
            Err(err) => trace_failure("update_product", err),
        }
        result
    }

    /// Soft delete. Archived products keep their history and cannot be sold.
    #[instrument(skip(self, actor), fields(product_id = %product_id))]
    pub async fn archive_product(&self, product_id: ProductId, actor: &Actor) -> Result<Product, LedgerError> {
        let result = self
            .edit(product_id, actor, "archiving a product", |product| {
                if product.archived {
                    return Err(DomainError::business(format!(
                        "product {} is already archived",
                        product.code
                    )));
                }
                product.archived = true;
                product.updated_at = Utc::now();
                Ok(())
            })
            .await;
        match &result {
            Ok(product) => {
                info!(code = %product.code, "product archived");
                self.effects.audit(AuditEntry::new(
                    actor,
                    AuditAction::ProductArchived,
                    "product",
                    product.id,
                    format!("archived {} ({})", product.name, product.code),
                    product.updated_at,
                ));
                self.effects.evaluate(&[product.id]).await;
            }
            Err(err) => trace_failure("archive_product", err),
        }
        result
    }

    /// Hard delete, allowed only while the product has no movements.
    #[instrument(skip(self, actor), fields(product_id = %product_id))]
    pub async fn delete_product(&self, product_id: ProductId, actor: &Actor) -> Result<(), LedgerError> {
        let result = self.delete_inner(product_id, actor).await;
        match &result {
            Ok(product) => {
                info!(code = %product.code, "product deleted");
                self.effects.audit(AuditEntry::new(
                    actor,
                    AuditAction::ProductDeleted,
                    "product",
                    product.id,
                    format!("deleted {} ({})", product.name, product.code),
                    Utc::now(),
                ));
                if let Err(err) = self.effects.evaluator().close_all(product.id).await {
                    tracing::warn!(error = %err, "closing alerts of a deleted product failed");
                }
            }
            Err(err) => trace_failure("delete_product", err),
        }
        result.map(|_| ())
    }

    async fn delete_inner(&self, product_id: ProductId, actor: &Actor) -> Result<Product, LedgerError> {
        actor.ensure_staff("deleting a product")?;
        let product = self.product(product_id).await?;
        match self.ledger.delete_product(product_id).await? {
            DeleteOutcome::Deleted => Ok(product),
            DeleteOutcome::HasHistory => Err(DomainError::business(format!(
                "product {} has stock movements and cannot be deleted; archive it instead",
                product.code
            ))
            .into()),
            DeleteOutcome::NotFound => Err(LedgerError::not_found(format!("product {product_id}"))),
        }
    }

    pub async fn product(&self, product_id: ProductId) -> Result<Product, LedgerError> {
        self.ledger
            .product(product_id)
            .await?
            .ok_or_else(|| LedgerError::not_found(format!("product {product_id}")))
    }

    pub async fn product_by_code(&self, code: &str) -> Result<Product, LedgerError> {
        self.ledger
            .product_by_code(code)
            .await?
            .ok_or_else(|| LedgerError::not_found(format!("product {}", code.trim())))
    }

    pub async fn list_products(&self, include_archived: bool) -> Result<Vec<Product>, LedgerError> {
        Ok(self.ledger.list_products(include_archived).await?)
    }

    /// Run `change` on the locked product and stage the result.
    async fn edit<F>(
        &self,
        product_id: ProductId,
        actor: &Actor,
        action: &str,
        change: F,
    ) -> Result<Product, LedgerError>
    where
        F: FnOnce(&mut Product) -> Result<(), DomainError>,
    {
        actor.ensure_staff(action)?;
        let mut unit = self.ledger.begin(&[product_id]).await?;
        let mut product = locked(unit.as_ref(), product_id)?.clone();
        change(&mut product)?;
        unit.stage_details(&product).await?;
        unit.commit().await?;
        Ok(product)
    }
}
