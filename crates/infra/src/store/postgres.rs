//! Postgres-backed ledger and alert stores.
//!
//! Schema lives in `migrations/0001_ledger.sql` and is applied with [`migrate`].
//!
//! ## Locking
//!
//! A unit is one database transaction. [`LedgerStore::begin`] locks the
//! product rows with `SELECT ... FOR UPDATE` ordered by id, so concurrent
//! units on overlapping products queue up instead of deadlocking. Product
//! updates at commit also carry a `version` check; a lost race surfaces as
//! [`StoreError::Concurrency`].
//!
//! ## Error Mapping
//!
//! | SQLx error | code | StoreError |
//! |------------|------|------------|
//! | unique violation | `23505` | `Duplicate` (`Concurrency` for the movement chain) |
//! | serialization failure / deadlock | `40001` / `40P01` | `Concurrency` |
//! | check violation | `23514` | `Consistency` |
//! | decode failures | n/a | `Consistency` |
//! | `RowNotFound` | n/a | `NotFound` |
//! | anything else | n/a | `Unavailable` |

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::{PgPool, Postgres, Row};
use tracing::instrument;
use uuid::Uuid;

use rxledger_core::{AlertId, DomainError, MovementId, ProductId, TransactionId, UserId};
use rxledger_inventory::{
    AlertFilter, AlertType, HistoryFilter, InventoryMovement, NewMovement, Product, StockAlert,
};
use rxledger_sales::{LineItem, Transaction, TransactionFilter, VoidRecord};

use super::{
    AlertStore, DeleteOutcome, LedgerStore, LedgerUnit, ResolveOutcome, StoreError, lock_order,
};

const SCHEMA: &str = include_str!("../../migrations/0001_ledger.sql");

const PRODUCT_COLUMNS: &str = "id, code, name, unit_price, stock_quantity, reorder_threshold, \
     expiry_date, archived, version, created_at, updated_at";

const MOVEMENT_COLUMNS: &str = "id, product_id, movement_type, quantity, previous_quantity, \
     new_quantity, reference_type, reference_id, reason, created_by, created_at";

const TRANSACTION_COLUMNS: &str = "id, code, subtotal, discount_type, discount_value, \
     discount_amount, total_amount, amount_paid, change_amount, payment_method, staff_user_id, \
     is_voided, void_reason, voided_by, voided_at, created_at";

const ALERT_COLUMNS: &str = "id, product_id, alert_type, severity, message, is_resolved, \
     resolved_by, resolved_at, created_at";

/// Open a connection pool.
pub async fn connect(url: &str, max_connections: u32) -> Result<PgPool, StoreError> {
    PgPoolOptions::new()
        .max_connections(max_connections)
        .connect(url)
        .await
        .map_err(|e| map_sqlx_error("connect", e))
}

/// Apply the ledger schema (idempotent).
#[instrument(skip(pool), err)]
pub async fn migrate(pool: &PgPool) -> Result<(), StoreError> {
    sqlx::raw_sql(SCHEMA)
        .execute(pool)
        .await
        .map(|_| ())
        .map_err(|e| map_sqlx_error("migrate", e))
}

/// Postgres [`LedgerStore`].
#[derive(Debug, Clone)]
pub struct PostgresLedgerStore {
    pool: Arc<PgPool>,
}

impl PostgresLedgerStore {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool: Arc::new(pool),
        }
    }
}

#[async_trait]
impl LedgerStore for PostgresLedgerStore {
    #[instrument(skip(self, products), fields(products = products.len()), err)]
    async fn begin(&self, products: &[ProductId]) -> Result<Box<dyn LedgerUnit>, StoreError> {
        let ids = uuids(&lock_order(products));

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin_unit", e))?;

        let sql = format!(
            "SELECT {PRODUCT_COLUMNS} FROM products WHERE id = ANY($1) ORDER BY id FOR UPDATE"
        );
        let rows = sqlx::query(&sql)
            .bind(&ids)
            .fetch_all(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("lock_products", e))?;

        let tail_rows = sqlx::query(
            r#"
            SELECT DISTINCT ON (product_id) product_id, seq, new_quantity
            FROM inventory_movements
            WHERE product_id = ANY($1)
            ORDER BY product_id, seq DESC
            "#,
        )
        .bind(&ids)
        .fetch_all(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error("load_ledger_tails", e))?;

        let mut tails = HashMap::with_capacity(tail_rows.len());
        for row in &tail_rows {
            let product_id: Uuid = row.try_get("product_id").map_err(decode_error)?;
            let tail = Tail {
                seq: row.try_get("seq").map_err(decode_error)?,
                quantity: row.try_get("new_quantity").map_err(decode_error)?,
            };
            tails.insert(ProductId::from_uuid(product_id), tail);
        }

        let mut staged = HashMap::with_capacity(rows.len());
        for row in &rows {
            let product = product_from_row(row).map_err(decode_error)?;
            staged.insert(
                product.id,
                PgStaged {
                    opening_stock: product.stock_quantity,
                    base_version: product.version,
                    tail: tails.get(&product.id).copied(),
                    appended: 0,
                    last_movement_at: None,
                    stock_touched: false,
                    details_touched: false,
                    product,
                },
            );
        }

        Ok(Box::new(PostgresUnit { tx, staged }))
    }

    #[instrument(skip(self), fields(product_id = %id), err)]
    async fn product(&self, id: ProductId) -> Result<Option<Product>, StoreError> {
        let sql = format!("SELECT {PRODUCT_COLUMNS} FROM products WHERE id = $1");
        let row = sqlx::query(&sql)
            .bind(id.as_uuid())
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("load_product", e))?;
        row.as_ref()
            .map(product_from_row)
            .transpose()
            .map_err(decode_error)
    }

    async fn product_by_code(&self, code: &str) -> Result<Option<Product>, StoreError> {
        let sql = format!("SELECT {PRODUCT_COLUMNS} FROM products WHERE code = $1");
        let row = sqlx::query(&sql)
            .bind(code.trim())
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("load_product_by_code", e))?;
        row.as_ref()
            .map(product_from_row)
            .transpose()
            .map_err(decode_error)
    }

    async fn list_products(&self, include_archived: bool) -> Result<Vec<Product>, StoreError> {
        let sql = format!(
            "SELECT {PRODUCT_COLUMNS} FROM products WHERE ($1 OR NOT archived) ORDER BY code"
        );
        let rows = sqlx::query(&sql)
            .bind(include_archived)
            .fetch_all(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("list_products", e))?;
        rows.iter()
            .map(product_from_row)
            .collect::<Result<_, _>>()
            .map_err(decode_error)
    }

    #[instrument(skip(self, product), fields(product_id = %product.id, code = %product.code), err)]
    async fn insert_product(&self, product: &Product) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO products (
                id, code, name, unit_price, stock_quantity, reorder_threshold,
                expiry_date, archived, version, created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            "#,
        )
        .bind(product.id.as_uuid())
        .bind(&product.code)
        .bind(&product.name)
        .bind(product.unit_price)
        .bind(product.stock_quantity)
        .bind(product.reorder_threshold)
        .bind(product.expiry_date)
        .bind(product.archived)
        .bind(product.version as i64)
        .bind(product.created_at)
        .bind(product.updated_at)
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("insert_product", e))?;
        Ok(())
    }

    #[instrument(skip(self), fields(product_id = %id), err)]
    async fn delete_product(&self, id: ProductId) -> Result<DeleteOutcome, StoreError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin_delete", e))?;

        let exists = sqlx::query("SELECT id FROM products WHERE id = $1 FOR UPDATE")
            .bind(id.as_uuid())
            .fetch_optional(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("lock_product", e))?
            .is_some();
        if !exists {
            tx.rollback()
                .await
                .map_err(|e| map_sqlx_error("rollback", e))?;
            return Ok(DeleteOutcome::NotFound);
        }

        let has_history: bool = sqlx::query_scalar(
            "SELECT EXISTS (SELECT 1 FROM inventory_movements WHERE product_id = $1)",
        )
        .bind(id.as_uuid())
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error("check_history", e))?;
        if has_history {
            tx.rollback()
                .await
                .map_err(|e| map_sqlx_error("rollback", e))?;
            return Ok(DeleteOutcome::HasHistory);
        }

        sqlx::query("DELETE FROM products WHERE id = $1")
            .bind(id.as_uuid())
            .execute(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("delete_product", e))?;
        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("commit_delete", e))?;
        Ok(DeleteOutcome::Deleted)
    }

    #[instrument(skip(self, filter), fields(product_id = %product_id), err)]
    async fn history(
        &self,
        product_id: ProductId,
        filter: &HistoryFilter,
    ) -> Result<Vec<InventoryMovement>, StoreError> {
        if self.product(product_id).await?.is_none() {
            return Err(StoreError::NotFound(format!("product {product_id}")));
        }

        let sql = format!(
            r#"
            SELECT {MOVEMENT_COLUMNS}
            FROM inventory_movements
            WHERE product_id = $1
              AND ($2::text IS NULL OR movement_type = $2)
              AND ($3::text IS NULL OR reference_type = $3)
              AND ($4::text IS NULL OR reference_id = $4)
              AND ($5::timestamptz IS NULL OR created_at >= $5)
              AND ($6::timestamptz IS NULL OR created_at <= $6)
            ORDER BY seq DESC
            LIMIT $7
            "#
        );
        let rows = sqlx::query(&sql)
            .bind(product_id.as_uuid())
            .bind(filter.movement_type.map(|t| t.as_str()))
            .bind(filter.reference_type.map(|t| t.as_str()))
            .bind(filter.reference_id.as_deref())
            .bind(filter.from)
            .bind(filter.to)
            .bind(filter.limit.map(|l| l as i64))
            .fetch_all(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("load_history", e))?;

        rows.iter()
            .map(movement_from_row)
            .collect::<Result<_, _>>()
            .map_err(decode_error)
    }

    #[instrument(skip(self), fields(product_id = %id), err)]
    async fn snapshot(
        &self,
        id: ProductId,
    ) -> Result<Option<(Product, Vec<InventoryMovement>)>, StoreError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin_snapshot", e))?;
        sqlx::query("SET TRANSACTION ISOLATION LEVEL REPEATABLE READ, READ ONLY")
            .execute(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("begin_snapshot", e))?;

        let sql = format!("SELECT {PRODUCT_COLUMNS} FROM products WHERE id = $1");
        let Some(row) = sqlx::query(&sql)
            .bind(id.as_uuid())
            .fetch_optional(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("load_product", e))?
        else {
            return Ok(None);
        };
        let product = product_from_row(&row).map_err(decode_error)?;

        let sql = format!(
            "SELECT {MOVEMENT_COLUMNS} FROM inventory_movements WHERE product_id = $1 ORDER BY seq"
        );
        let rows = sqlx::query(&sql)
            .bind(id.as_uuid())
            .fetch_all(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("load_ledger", e))?;
        let movements = rows
            .iter()
            .map(movement_from_row)
            .collect::<Result<Vec<_>, _>>()
            .map_err(decode_error)?;

        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("end_snapshot", e))?;
        Ok(Some((product, movements)))
    }

    async fn transaction(&self, id: TransactionId) -> Result<Option<Transaction>, StoreError> {
        let sql = format!("SELECT {TRANSACTION_COLUMNS} FROM transactions WHERE id = $1");
        let row = sqlx::query(&sql)
            .bind(id.as_uuid())
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("load_transaction", e))?;
        let Some(row) = row else {
            return Ok(None);
        };
        let mut items = load_items(&*self.pool, &[*id.as_uuid()]).await?;
        transaction_from_row(&row, &mut items).map(Some)
    }

    async fn transaction_by_code(&self, code: &str) -> Result<Option<Transaction>, StoreError> {
        let sql = format!("SELECT {TRANSACTION_COLUMNS} FROM transactions WHERE code = $1");
        let row = sqlx::query(&sql)
            .bind(code.trim())
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("load_transaction_by_code", e))?;
        let Some(row) = row else {
            return Ok(None);
        };
        let id: Uuid = row.try_get("id").map_err(decode_error)?;
        let mut items = load_items(&*self.pool, &[id]).await?;
        transaction_from_row(&row, &mut items).map(Some)
    }

    #[instrument(skip(self, filter), err)]
    async fn list_transactions(
        &self,
        filter: &TransactionFilter,
    ) -> Result<Vec<Transaction>, StoreError> {
        let sql = format!(
            r#"
            SELECT {TRANSACTION_COLUMNS}
            FROM transactions
            WHERE ($1::timestamptz IS NULL OR created_at >= $1)
              AND ($2::timestamptz IS NULL OR created_at <= $2)
              AND ($3::uuid IS NULL OR staff_user_id = $3)
              AND ($4 OR NOT is_voided)
            ORDER BY created_at DESC, id DESC
            LIMIT $5
            "#
        );
        let rows = sqlx::query(&sql)
            .bind(filter.from)
            .bind(filter.to)
            .bind(filter.staff_user_id.map(Uuid::from))
            .bind(filter.include_voided)
            .bind(filter.limit.map(|l| l as i64))
            .fetch_all(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("list_transactions", e))?;

        let ids = rows
            .iter()
            .map(|row| row.try_get::<Uuid, _>("id"))
            .collect::<Result<Vec<_>, _>>()
            .map_err(decode_error)?;
        let mut items = load_items(&*self.pool, &ids).await?;

        rows.iter()
            .map(|row| transaction_from_row(row, &mut items))
            .collect()
    }
}

#[derive(Debug, Copy, Clone)]
struct Tail {
    seq: i64,
    quantity: i64,
}

#[derive(Debug)]
struct PgStaged {
    product: Product,
    opening_stock: i64,
    base_version: u64,
    tail: Option<Tail>,
    appended: usize,
    last_movement_at: Option<DateTime<Utc>>,
    stock_touched: bool,
    details_touched: bool,
}

/// Unit backed by one database transaction holding row locks.
struct PostgresUnit {
    tx: sqlx::Transaction<'static, Postgres>,
    staged: HashMap<ProductId, PgStaged>,
}

fn not_locked(id: ProductId) -> StoreError {
    StoreError::NotFound(format!("product {id} (not part of this unit)"))
}

fn consistency(err: DomainError) -> StoreError {
    StoreError::Consistency(err.to_string())
}

#[async_trait]
impl LedgerUnit for PostgresUnit {
    fn product(&self, id: ProductId) -> Option<&Product> {
        self.staged.get(&id).map(|s| &s.product)
    }

    async fn append(&mut self, movement: NewMovement) -> Result<InventoryMovement, StoreError> {
        let staged = self
            .staged
            .get_mut(&movement.product_id)
            .ok_or_else(|| not_locked(movement.product_id))?;

        let ledger_quantity = staged
            .tail
            .map(|t| t.quantity)
            .unwrap_or(staged.opening_stock);
        movement
            .check_previous(ledger_quantity)
            .map_err(consistency)?;
        movement.validate().map_err(consistency)?;
        let new_quantity = movement.new_quantity().map_err(consistency)?;
        let seq = staged.tail.map(|t| t.seq).unwrap_or(0) + 1;

        let id: i64 = sqlx::query_scalar(
            r#"
            INSERT INTO inventory_movements (
                product_id, seq, movement_type, quantity, previous_quantity, new_quantity,
                reference_type, reference_id, reason, created_by, created_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            RETURNING id
            "#,
        )
        .bind(movement.product_id.as_uuid())
        .bind(seq)
        .bind(movement.movement_type.as_str())
        .bind(movement.quantity)
        .bind(movement.previous_quantity)
        .bind(new_quantity)
        .bind(movement.reference_type.as_str())
        .bind(&movement.reference_id)
        .bind(movement.reason.as_deref())
        .bind(movement.created_by.as_uuid())
        .bind(movement.created_at)
        .fetch_one(&mut *self.tx)
        .await
        .map_err(|e| {
            if is_unique_violation(&e) {
                StoreError::Concurrency(format!(
                    "concurrent append detected: seq {seq} of product {} already exists",
                    movement.product_id
                ))
            } else {
                map_sqlx_error("append_movement", e)
            }
        })?;

        staged.tail = Some(Tail {
            seq,
            quantity: new_quantity,
        });
        staged.appended += 1;
        staged.last_movement_at = Some(movement.created_at);

        InventoryMovement::record(MovementId::new(id as u64), movement).map_err(consistency)
    }

    async fn apply_delta(&mut self, product_id: ProductId, delta: i64) -> Result<i64, StoreError> {
        let staged = self
            .staged
            .get_mut(&product_id)
            .ok_or_else(|| not_locked(product_id))?;
        let next = staged
            .product
            .stock_quantity
            .checked_add(delta)
            .filter(|q| *q >= 0)
            .ok_or_else(|| {
                StoreError::Consistency(format!(
                    "stock of product {} cannot move from {} by {delta:+}",
                    staged.product.code, staged.product.stock_quantity
                ))
            })?;
        staged.product.stock_quantity = next;
        staged.stock_touched = true;
        Ok(next)
    }

    async fn stage_details(&mut self, product: &Product) -> Result<(), StoreError> {
        let staged = self
            .staged
            .get_mut(&product.id)
            .ok_or_else(|| not_locked(product.id))?;
        staged.product.name = product.name.clone();
        staged.product.unit_price = product.unit_price;
        staged.product.reorder_threshold = product.reorder_threshold;
        staged.product.expiry_date = product.expiry_date;
        staged.product.archived = product.archived;
        staged.product.updated_at = product.updated_at;
        staged.details_touched = true;
        Ok(())
    }

    async fn transaction(&mut self, id: TransactionId) -> Result<Option<Transaction>, StoreError> {
        let sql = format!("SELECT {TRANSACTION_COLUMNS} FROM transactions WHERE id = $1 FOR UPDATE");
        let row = sqlx::query(&sql)
            .bind(id.as_uuid())
            .fetch_optional(&mut *self.tx)
            .await
            .map_err(|e| map_sqlx_error("lock_transaction", e))?;
        let Some(row) = row else {
            return Ok(None);
        };
        let mut items = load_items(&mut *self.tx, &[*id.as_uuid()]).await?;
        transaction_from_row(&row, &mut items).map(Some)
    }

    async fn insert_transaction(&mut self, tx: &Transaction) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO transactions (
                id, code, subtotal, discount_type, discount_value, discount_amount,
                total_amount, amount_paid, change_amount, payment_method, staff_user_id,
                is_voided, void_reason, voided_by, voided_at, created_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16)
            "#,
        )
        .bind(tx.id.as_uuid())
        .bind(&tx.code)
        .bind(tx.subtotal)
        .bind(tx.discount_type.as_str())
        .bind(tx.discount_value)
        .bind(tx.discount_amount)
        .bind(tx.total_amount)
        .bind(tx.amount_paid)
        .bind(tx.change_amount)
        .bind(tx.payment_method.as_str())
        .bind(tx.staff_user_id.as_uuid())
        .bind(tx.is_voided)
        .bind(tx.void_reason.as_deref())
        .bind(tx.voided_by.map(Uuid::from))
        .bind(tx.voided_at)
        .bind(tx.created_at)
        .execute(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("insert_transaction", e))?;

        for (line_no, item) in tx.items.iter().enumerate() {
            sqlx::query(
                r#"
                INSERT INTO transaction_items (
                    transaction_id, line_no, product_id, product_code, product_name,
                    quantity, unit_price, subtotal
                )
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
                "#,
            )
            .bind(tx.id.as_uuid())
            .bind(line_no as i32 + 1)
            .bind(item.product_id.as_uuid())
            .bind(&item.product_code)
            .bind(&item.product_name)
            .bind(item.quantity)
            .bind(item.unit_price)
            .bind(item.subtotal)
            .execute(&mut *self.tx)
            .await
            .map_err(|e| map_sqlx_error("insert_transaction_item", e))?;
        }
        Ok(())
    }

    async fn mark_voided(&mut self, id: TransactionId, record: &VoidRecord) -> Result<(), StoreError> {
        let updated = sqlx::query(
            r#"
            UPDATE transactions
            SET is_voided = TRUE, void_reason = $2, voided_by = $3, voided_at = $4
            WHERE id = $1 AND NOT is_voided
            "#,
        )
        .bind(id.as_uuid())
        .bind(&record.reason)
        .bind(record.voided_by.as_uuid())
        .bind(record.voided_at)
        .execute(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("mark_voided", e))?
        .rows_affected();

        if updated == 0 {
            let exists: bool =
                sqlx::query_scalar("SELECT EXISTS (SELECT 1 FROM transactions WHERE id = $1)")
                    .bind(id.as_uuid())
                    .fetch_one(&mut *self.tx)
                    .await
                    .map_err(|e| map_sqlx_error("check_transaction", e))?;
            return Err(if exists {
                StoreError::Concurrency(format!("transaction {id} is already voided"))
            } else {
                StoreError::NotFound(format!("transaction {id}"))
            });
        }
        Ok(())
    }

    #[instrument(skip(self), fields(products = self.staged.len()), err)]
    async fn commit(self: Box<Self>) -> Result<(), StoreError> {
        let PostgresUnit { mut tx, staged } = *self;

        for staged in staged.values() {
            if !staged.stock_touched && staged.appended == 0 {
                continue;
            }
            let ledger_quantity = staged
                .tail
                .map(|t| t.quantity)
                .unwrap_or(staged.opening_stock);
            if staged.product.stock_quantity != ledger_quantity {
                return Err(StoreError::Consistency(format!(
                    "product {} projected stock {} disagrees with ledger tail {}",
                    staged.product.code, staged.product.stock_quantity, ledger_quantity
                )));
            }

            let updated = sqlx::query(
                r#"
                UPDATE products
                SET stock_quantity = $2, version = version + 1, updated_at = $3
                WHERE id = $1 AND version = $4
                "#,
            )
            .bind(staged.product.id.as_uuid())
            .bind(staged.product.stock_quantity)
            .bind(staged.last_movement_at.unwrap_or_else(Utc::now))
            .bind(staged.base_version as i64)
            .execute(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("update_stock", e))?
            .rows_affected();
            if updated == 0 {
                return Err(StoreError::Concurrency(format!(
                    "product {} changed during the unit",
                    staged.product.code
                )));
            }
        }

        for staged in staged.values().filter(|s| s.details_touched) {
            let p = &staged.product;
            sqlx::query(
                r#"
                UPDATE products
                SET name = $2, unit_price = $3, reorder_threshold = $4,
                    expiry_date = $5, archived = $6, updated_at = $7
                WHERE id = $1
                "#,
            )
            .bind(p.id.as_uuid())
            .bind(&p.name)
            .bind(p.unit_price)
            .bind(p.reorder_threshold)
            .bind(p.expiry_date)
            .bind(p.archived)
            .bind(p.updated_at)
            .execute(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("update_product_details", e))?;
        }

        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("commit_unit", e))
    }
}

/// Postgres [`AlertStore`].
#[derive(Debug, Clone)]
pub struct PostgresAlertStore {
    pool: Arc<PgPool>,
}

impl PostgresAlertStore {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool: Arc::new(pool),
        }
    }
}

#[async_trait]
impl AlertStore for PostgresAlertStore {
    async fn open_alerts(&self, product_id: ProductId) -> Result<Vec<StockAlert>, StoreError> {
        let sql = format!(
            "SELECT {ALERT_COLUMNS} FROM stock_alerts \
             WHERE product_id = $1 AND NOT is_resolved ORDER BY created_at"
        );
        let rows = sqlx::query(&sql)
            .bind(product_id.as_uuid())
            .fetch_all(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("load_open_alerts", e))?;
        rows.iter()
            .map(alert_from_row)
            .collect::<Result<_, _>>()
            .map_err(decode_error)
    }

    #[instrument(skip(self, alert), fields(product_id = %alert.product_id, alert_type = %alert.alert_type), err)]
    async fn open_if_absent(&self, alert: StockAlert) -> Result<Option<StockAlert>, StoreError> {
        let sql = format!(
            r#"
            INSERT INTO stock_alerts (
                id, product_id, alert_type, severity, message, is_resolved,
                resolved_by, resolved_at, created_at
            )
            VALUES ($1, $2, $3, $4, $5, FALSE, NULL, NULL, $6)
            ON CONFLICT (product_id, alert_type) WHERE NOT is_resolved DO NOTHING
            RETURNING {ALERT_COLUMNS}
            "#
        );
        let row = sqlx::query(&sql)
            .bind(alert.id.as_uuid())
            .bind(alert.product_id.as_uuid())
            .bind(alert.alert_type.as_str())
            .bind(alert.severity.as_str())
            .bind(&alert.message)
            .bind(alert.created_at)
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("open_alert", e))?;
        row.as_ref()
            .map(alert_from_row)
            .transpose()
            .map_err(decode_error)
    }

    async fn resolve_open(
        &self,
        product_id: ProductId,
        alert_type: AlertType,
        resolved_by: UserId,
        at: DateTime<Utc>,
    ) -> Result<Option<StockAlert>, StoreError> {
        let sql = format!(
            r#"
            UPDATE stock_alerts
            SET is_resolved = TRUE, resolved_by = $3, resolved_at = $4
            WHERE product_id = $1 AND alert_type = $2 AND NOT is_resolved
            RETURNING {ALERT_COLUMNS}
            "#
        );
        let row = sqlx::query(&sql)
            .bind(product_id.as_uuid())
            .bind(alert_type.as_str())
            .bind(resolved_by.as_uuid())
            .bind(at)
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("resolve_open_alert", e))?;
        row.as_ref()
            .map(alert_from_row)
            .transpose()
            .map_err(decode_error)
    }

    #[instrument(skip(self), fields(alert_id = %alert_id), err)]
    async fn resolve(
        &self,
        alert_id: AlertId,
        resolved_by: UserId,
        at: DateTime<Utc>,
    ) -> Result<ResolveOutcome, StoreError> {
        let sql = format!(
            r#"
            UPDATE stock_alerts
            SET is_resolved = TRUE, resolved_by = $2, resolved_at = $3
            WHERE id = $1 AND NOT is_resolved
            RETURNING {ALERT_COLUMNS}
            "#
        );
        let row = sqlx::query(&sql)
            .bind(alert_id.as_uuid())
            .bind(resolved_by.as_uuid())
            .bind(at)
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("resolve_alert", e))?;

        if let Some(row) = row {
            return alert_from_row(&row)
                .map(ResolveOutcome::Resolved)
                .map_err(decode_error);
        }
        match self.alert(alert_id).await? {
            Some(existing) => Ok(ResolveOutcome::AlreadyResolved(existing)),
            None => Err(StoreError::NotFound(format!("alert {alert_id}"))),
        }
    }

    async fn alert(&self, id: AlertId) -> Result<Option<StockAlert>, StoreError> {
        let sql = format!("SELECT {ALERT_COLUMNS} FROM stock_alerts WHERE id = $1");
        let row = sqlx::query(&sql)
            .bind(id.as_uuid())
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("load_alert", e))?;
        row.as_ref()
            .map(alert_from_row)
            .transpose()
            .map_err(decode_error)
    }

    async fn list(&self, filter: &AlertFilter) -> Result<Vec<StockAlert>, StoreError> {
        let sql = format!(
            r#"
            SELECT {ALERT_COLUMNS}
            FROM stock_alerts
            WHERE ($1::uuid IS NULL OR product_id = $1)
              AND ($2::text IS NULL OR alert_type = $2)
              AND ($3::boolean IS NULL OR is_resolved = $3)
            ORDER BY created_at DESC
            "#
        );
        let rows = sqlx::query(&sql)
            .bind(filter.product_id.map(Uuid::from))
            .bind(filter.alert_type.map(|t| t.as_str()))
            .bind(filter.resolved)
            .fetch_all(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("list_alerts", e))?;
        rows.iter()
            .map(alert_from_row)
            .collect::<Result<_, _>>()
            .map_err(decode_error)
    }
}

// Row mapping

fn uuids(ids: &[ProductId]) -> Vec<Uuid> {
    ids.iter().map(|id| *id.as_uuid()).collect()
}

fn parse_column<T>(row: &PgRow, column: &str) -> Result<T, sqlx::Error>
where
    T: core::str::FromStr<Err = DomainError>,
{
    let raw: String = row.try_get(column)?;
    raw.parse().map_err(|e: DomainError| sqlx::Error::ColumnDecode {
        index: column.to_string(),
        source: Box::new(e),
    })
}

fn product_from_row(row: &PgRow) -> Result<Product, sqlx::Error> {
    Ok(Product {
        id: ProductId::from_uuid(row.try_get("id")?),
        code: row.try_get("code")?,
        name: row.try_get("name")?,
        unit_price: row.try_get("unit_price")?,
        stock_quantity: row.try_get("stock_quantity")?,
        reorder_threshold: row.try_get("reorder_threshold")?,
        expiry_date: row.try_get("expiry_date")?,
        archived: row.try_get("archived")?,
        version: row.try_get::<i64, _>("version")? as u64,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn movement_from_row(row: &PgRow) -> Result<InventoryMovement, sqlx::Error> {
    Ok(InventoryMovement {
        id: MovementId::new(row.try_get::<i64, _>("id")? as u64),
        product_id: ProductId::from_uuid(row.try_get("product_id")?),
        movement_type: parse_column(row, "movement_type")?,
        quantity: row.try_get("quantity")?,
        previous_quantity: row.try_get("previous_quantity")?,
        new_quantity: row.try_get("new_quantity")?,
        reference_type: parse_column(row, "reference_type")?,
        reference_id: row.try_get("reference_id")?,
        reason: row.try_get("reason")?,
        created_by: UserId::from_uuid(row.try_get("created_by")?),
        created_at: row.try_get("created_at")?,
    })
}

fn alert_from_row(row: &PgRow) -> Result<StockAlert, sqlx::Error> {
    Ok(StockAlert {
        id: AlertId::from_uuid(row.try_get("id")?),
        product_id: ProductId::from_uuid(row.try_get("product_id")?),
        alert_type: parse_column(row, "alert_type")?,
        severity: parse_column(row, "severity")?,
        message: row.try_get("message")?,
        is_resolved: row.try_get("is_resolved")?,
        resolved_by: row
            .try_get::<Option<Uuid>, _>("resolved_by")?
            .map(UserId::from_uuid),
        resolved_at: row.try_get("resolved_at")?,
        created_at: row.try_get("created_at")?,
    })
}

/// Build a transaction from its row, taking its items out of `items`.
fn transaction_from_row(
    row: &PgRow,
    items: &mut HashMap<Uuid, Vec<LineItem>>,
) -> Result<Transaction, StoreError> {
    let mut decode = || -> Result<Transaction, sqlx::Error> {
        let id: Uuid = row.try_get("id")?;
        Ok(Transaction {
            id: TransactionId::from_uuid(id),
            code: row.try_get("code")?,
            items: items.remove(&id).unwrap_or_default(),
            subtotal: row.try_get("subtotal")?,
            discount_type: parse_column(row, "discount_type")?,
            discount_value: row.try_get("discount_value")?,
            discount_amount: row.try_get("discount_amount")?,
            total_amount: row.try_get("total_amount")?,
            amount_paid: row.try_get("amount_paid")?,
            change_amount: row.try_get("change_amount")?,
            payment_method: parse_column(row, "payment_method")?,
            staff_user_id: UserId::from_uuid(row.try_get("staff_user_id")?),
            is_voided: row.try_get("is_voided")?,
            void_reason: row.try_get("void_reason")?,
            voided_by: row
                .try_get::<Option<Uuid>, _>("voided_by")?
                .map(UserId::from_uuid),
            voided_at: row.try_get("voided_at")?,
            created_at: row.try_get("created_at")?,
        })
    };
    let tx = decode().map_err(decode_error)?;
    if tx.items.is_empty() {
        return Err(StoreError::Consistency(format!(
            "transaction {} has no line items",
            tx.code
        )));
    }
    Ok(tx)
}

async fn load_items<'e, E>(
    executor: E,
    transaction_ids: &[Uuid],
) -> Result<HashMap<Uuid, Vec<LineItem>>, StoreError>
where
    E: sqlx::Executor<'e, Database = Postgres>,
{
    let rows = sqlx::query(
        r#"
        SELECT transaction_id, product_id, product_code, product_name, quantity, unit_price, subtotal
        FROM transaction_items
        WHERE transaction_id = ANY($1)
        ORDER BY transaction_id, line_no
        "#,
    )
    .bind(transaction_ids)
    .fetch_all(executor)
    .await
    .map_err(|e| map_sqlx_error("load_transaction_items", e))?;

    let mut items: HashMap<Uuid, Vec<LineItem>> = HashMap::new();
    for row in &rows {
        let tx_id: Uuid = row.try_get("transaction_id").map_err(decode_error)?;
        let item = LineItem {
            product_id: ProductId::from_uuid(row.try_get("product_id").map_err(decode_error)?),
            product_code: row.try_get("product_code").map_err(decode_error)?,
            product_name: row.try_get("product_name").map_err(decode_error)?,
            quantity: row.try_get("quantity").map_err(decode_error)?,
            unit_price: row.try_get("unit_price").map_err(decode_error)?,
            subtotal: row.try_get("subtotal").map_err(decode_error)?,
        };
        items.entry(tx_id).or_default().push(item);
    }
    Ok(items)
}

fn decode_error(err: sqlx::Error) -> StoreError {
    map_sqlx_error("decode_row", err)
}

/// Map SQLx errors to StoreError.
fn map_sqlx_error(operation: &str, err: sqlx::Error) -> StoreError {
    match err {
        sqlx::Error::Database(db_err) => {
            let msg = format!("database error in {operation}: {}", db_err.message());
            match db_err.code().as_deref() {
                Some("23505") => StoreError::Duplicate(msg),
                Some("40001") | Some("40P01") => StoreError::Concurrency(msg),
                Some("23514") => StoreError::Consistency(msg),
                _ => StoreError::Unavailable(msg),
            }
        }
        sqlx::Error::RowNotFound => StoreError::NotFound(format!("row in {operation}")),
        err @ (sqlx::Error::ColumnDecode { .. }
        | sqlx::Error::ColumnNotFound(_)
        | sqlx::Error::Decode(_)) => {
            StoreError::Consistency(format!("undecodable row in {operation}: {err}"))
        }
        other => StoreError::Unavailable(format!("sqlx error in {operation}: {other}")),
    }
}

/// Check if an error is a unique constraint violation.
fn is_unique_violation(err: &sqlx::Error) -> bool {
    if let sqlx::Error::Database(db_err) = err {
        if let Some(code) = db_err.code() {
            return code.as_ref() == "23505";
        }
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn non_database_errors_map_to_store_errors() {
        assert!(matches!(
            map_sqlx_error("load", sqlx::Error::RowNotFound),
            StoreError::NotFound(_)
        ));
        assert!(matches!(
            map_sqlx_error("load", sqlx::Error::PoolClosed),
            StoreError::Unavailable(_)
        ));
        assert!(matches!(
            map_sqlx_error("load", sqlx::Error::ColumnNotFound("seq".into())),
            StoreError::Consistency(_)
        ));
        assert!(!is_unique_violation(&sqlx::Error::PoolTimedOut));
    }

    #[test]
    fn schema_declares_one_open_alert_per_type() {
        assert!(SCHEMA.contains("stock_alerts_one_open_idx"));
        assert!(SCHEMA.contains("UNIQUE (product_id, seq)"));
    }
}
