//! # Product Repository
//!
//! Catalogue writes for products. Same convergence rules as customers, plus
//! one extra rule for stock:
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  products.stock_qty is a PROJECTION of inventory_adjustments           │
//! │                                                                         │
//! │  upsert (new row)       stock_qty = SUM(ledger deltas for this id)     │
//! │  upsert (existing row)  stock_qty untouched                            │
//! │  apply adjustment       stock_qty += delta    (InventoryRepository)    │
//! │                                                                         │
//! │  Nothing here ever SETs a quantity.                                    │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use chrono::{DateTime, Utc};
use sqlx::{SqliteConnection, SqlitePool};
use std::sync::Arc;
use tracing::debug;
use vela_core::events::{EntityDeleted, ProductUpserted};
use vela_core::{EventKind, OutboxEvent, Product, SchemaValidator};

use crate::error::DbResult;
use crate::repository::{db_time, enqueue_validated, tombstone_time};

const COLUMNS: &str = "tenant_id, id, sku, name, price_cents, stock_qty, active, updated_at, deleted_at";

/// Repository for product database operations.
///
/// ## Usage
/// ```rust,ignore
/// let repo = db.products();
///
/// // Edge: write and enqueue in one transaction
/// let event = repo.upsert_with_event("t1", &product).await?;
///
/// // Hub: apply an inbound event at its occurredAt
/// repo.upsert("t1", &product, occurred_at).await?;
/// ```
#[derive(Debug, Clone)]
pub struct ProductRepository {
    pool: SqlitePool,
    validator: Arc<SchemaValidator>,
}

impl ProductRepository {
    pub fn new(pool: SqlitePool, validator: Arc<SchemaValidator>) -> Self {
        ProductRepository { pool, validator }
    }

    /// Applies an upsert stamped `at`.
    ///
    /// ## Returns
    /// * `Ok(true)` - Row inserted or updated
    /// * `Ok(false)` - A newer write already holds the row
    pub async fn upsert(&self, tenant_id: &str, product: &ProductUpserted, at: DateTime<Utc>) -> DbResult<bool> {
        let mut conn = self.pool.acquire().await?;
        upsert_on(&mut conn, tenant_id, product, at).await
    }

    /// Logical delete stamped `at`.
    pub async fn soft_delete(&self, tenant_id: &str, id: &str, at: DateTime<Utc>) -> DbResult<()> {
        let mut conn = self.pool.acquire().await?;
        soft_delete_on(&mut conn, tenant_id, id, at).await
    }

    /// Edge write: upsert now and enqueue `product.upserted.v1`.
    ///
    /// The payload is validated before commit; a schema failure rolls the
    /// product write back.
    pub async fn upsert_with_event(&self, tenant_id: &str, product: &ProductUpserted) -> DbResult<OutboxEvent> {
        let payload = serde_json::to_value(product)?;
        let mut tx = self.pool.begin().await?;
        upsert_on(&mut tx, tenant_id, product, Utc::now()).await?;
        let event =
            enqueue_validated(&mut tx, &self.validator, tenant_id, EventKind::ProductUpserted, &payload).await?;
        tx.commit().await?;
        Ok(event)
    }

    /// Edge write: soft delete now and enqueue `product.deleted.v1`.
    pub async fn delete_with_event(&self, tenant_id: &str, id: &str) -> DbResult<OutboxEvent> {
        let payload = serde_json::to_value(EntityDeleted { id: id.to_string() })?;
        let mut tx = self.pool.begin().await?;
        soft_delete_on(&mut tx, tenant_id, id, Utc::now()).await?;
        let event =
            enqueue_validated(&mut tx, &self.validator, tenant_id, EventKind::ProductDeleted, &payload).await?;
        tx.commit().await?;
        Ok(event)
    }

    /// Gets a product, active or not.
    pub async fn find(&self, tenant_id: &str, id: &str) -> DbResult<Option<Product>> {
        let sql = format!("SELECT {COLUMNS} FROM products WHERE tenant_id = ? AND id = ?");
        let product = sqlx::query_as::<_, Product>(&sql)
            .bind(tenant_id)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(product)
    }

    /// Lists active products sorted by name.
    pub async fn list_active(&self, tenant_id: &str, limit: u32) -> DbResult<Vec<Product>> {
        let sql = format!(
            "SELECT {COLUMNS} FROM products
             WHERE tenant_id = ? AND active = 1
             ORDER BY name
             LIMIT ?"
        );
        let products = sqlx::query_as::<_, Product>(&sql)
            .bind(tenant_id)
            .bind(limit as i64)
            .fetch_all(&self.pool)
            .await?;
        Ok(products)
    }
}

pub(crate) async fn upsert_on(
    conn: &mut SqliteConnection,
    tenant_id: &str,
    product: &ProductUpserted,
    at: DateTime<Utc>,
) -> DbResult<bool> {
    let result = sqlx::query(
        r#"
        INSERT INTO products
            (tenant_id, id, sku, name, price_cents, stock_qty, active, updated_at)
        VALUES (
            ?1, ?2, ?3, ?4, ?5,
            (SELECT COALESCE(SUM(delta), 0) FROM inventory_adjustments
             WHERE tenant_id = ?1 AND product_id = ?2),
            1, ?6
        )
        ON CONFLICT (tenant_id, id) DO UPDATE SET
            sku = excluded.sku,
            name = excluded.name,
            price_cents = excluded.price_cents,
            updated_at = excluded.updated_at,
            active = CASE
                WHEN products.deleted_at IS NOT NULL
                     AND products.deleted_at >= excluded.updated_at THEN 0
                ELSE 1
            END
        WHERE excluded.updated_at >= products.updated_at
        "#,
    )
    .bind(tenant_id)
    .bind(&product.id)
    .bind(&product.sku)
    .bind(&product.name)
    .bind(product.price.cents())
    .bind(db_time(at))
    .execute(&mut *conn)
    .await?;

    let applied = result.rows_affected() == 1;
    debug!(tenant_id = %tenant_id, id = %product.id, applied, "Product upsert");
    Ok(applied)
}

pub(crate) async fn soft_delete_on(
    conn: &mut SqliteConnection,
    tenant_id: &str,
    id: &str,
    at: DateTime<Utc>,
) -> DbResult<()> {
    sqlx::query(
        r#"
        INSERT INTO products (tenant_id, id, sku, name, price_cents, stock_qty, active, updated_at, deleted_at)
        VALUES (
            ?1, ?2, '', '', 0,
            (SELECT COALESCE(SUM(delta), 0) FROM inventory_adjustments
             WHERE tenant_id = ?1 AND product_id = ?2),
            0, ?3, ?4
        )
        ON CONFLICT (tenant_id, id) DO UPDATE SET
            deleted_at = CASE
                WHEN products.deleted_at IS NULL
                     OR excluded.deleted_at > products.deleted_at THEN excluded.deleted_at
                ELSE products.deleted_at
            END,
            active = CASE
                WHEN excluded.deleted_at >= products.updated_at THEN 0
                ELSE products.active
            END
        "#,
    )
    .bind(tenant_id)
    .bind(id)
    .bind(tombstone_time())
    .bind(db_time(at))
    .execute(&mut *conn)
    .await?;

    debug!(tenant_id = %tenant_id, id = %id, "Product soft-deleted");
    Ok(())
}
