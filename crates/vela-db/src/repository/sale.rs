//! # Sale Repository
//!
//! Sales with their line items.
//!
//! ## Line Replacement
//! ```text
//! apply(sale)  ──►  BEGIN
//!                   UPSERT sales header
//!                   DELETE FROM sale_items WHERE sale = id
//!                   INSERT sale_items (line 1..n)
//!                   COMMIT
//! ```
//! Redelivering a sale therefore leaves exactly the payload's lines, never
//! duplicates and never stale extras.

use chrono::{DateTime, Utc};
use sqlx::{SqliteConnection, SqlitePool};
use std::sync::Arc;
use tracing::debug;
use vela_core::events::SaleCreated;
use vela_core::{EventKind, OutboxEvent, Sale, SaleItem, SchemaValidator};

use crate::error::DbResult;
use crate::repository::{db_time, enqueue_validated};

/// Repository for sale database operations.
///
/// ## Usage
/// ```rust,ignore
/// // Edge: the sale and its outbox event commit together
/// let event = db.sales().create_with_event("t1", &sale).await?;
/// // ...then the stock movement, as a separate retriable step
/// db.inventory().apply_sale("t1", &sale).await?;
/// ```
#[derive(Debug, Clone)]
pub struct SaleRepository {
    pool: SqlitePool,
    validator: Arc<SchemaValidator>,
}

impl SaleRepository {
    pub fn new(pool: SqlitePool, validator: Arc<SchemaValidator>) -> Self {
        SaleRepository { pool, validator }
    }

    /// Stores a sale and replaces its lines in one transaction.
    pub async fn apply(&self, tenant_id: &str, sale: &SaleCreated, occurred_at: DateTime<Utc>) -> DbResult<()> {
        let mut tx = self.pool.begin().await?;
        apply_on(&mut tx, tenant_id, sale, occurred_at).await?;
        tx.commit().await?;
        Ok(())
    }

    /// Edge write: store the sale and enqueue `sale.created.v1` atomically.
    ///
    /// Stock is not touched here; see `InventoryRepository::apply_sale`.
    pub async fn create_with_event(&self, tenant_id: &str, sale: &SaleCreated) -> DbResult<OutboxEvent> {
        let payload = serde_json::to_value(sale)?;
        let mut tx = self.pool.begin().await?;
        apply_on(&mut tx, tenant_id, sale, Utc::now()).await?;
        let event = enqueue_validated(&mut tx, &self.validator, tenant_id, EventKind::SaleCreated, &payload).await?;
        tx.commit().await?;
        Ok(event)
    }

    pub async fn find(&self, tenant_id: &str, id: &str) -> DbResult<Option<Sale>> {
        let sale = sqlx::query_as::<_, Sale>(
            r#"
            SELECT tenant_id, id, customer_id, total_cents, occurred_at, updated_at
            FROM sales
            WHERE tenant_id = ? AND id = ?
            "#,
        )
        .bind(tenant_id)
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(sale)
    }

    /// Lines of a sale in payload order.
    pub async fn items(&self, tenant_id: &str, sale_id: &str) -> DbResult<Vec<SaleItem>> {
        let items = sqlx::query_as::<_, SaleItem>(
            r#"
            SELECT tenant_id, sale_id, line_no, product_id, qty, unit_price_cents
            FROM sale_items
            WHERE tenant_id = ? AND sale_id = ?
            ORDER BY line_no
            "#,
        )
        .bind(tenant_id)
        .bind(sale_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(items)
    }
}

async fn apply_on(
    conn: &mut SqliteConnection,
    tenant_id: &str,
    sale: &SaleCreated,
    occurred_at: DateTime<Utc>,
) -> DbResult<()> {
    sqlx::query(
        r#"
        INSERT INTO sales (tenant_id, id, customer_id, total_cents, occurred_at, updated_at)
        VALUES (?1, ?2, ?3, ?4, ?5, ?6)
        ON CONFLICT (tenant_id, id) DO UPDATE SET
            customer_id = excluded.customer_id,
            total_cents = excluded.total_cents,
            updated_at = excluded.updated_at
        "#,
    )
    .bind(tenant_id)
    .bind(&sale.id)
    .bind(&sale.customer_id)
    .bind(sale.total.cents())
    .bind(db_time(occurred_at))
    .bind(db_time(Utc::now()))
    .execute(&mut *conn)
    .await?;

    sqlx::query("DELETE FROM sale_items WHERE tenant_id = ? AND sale_id = ?")
        .bind(tenant_id)
        .bind(&sale.id)
        .execute(&mut *conn)
        .await?;

    for (index, line) in sale.items.iter().enumerate() {
        sqlx::query(
            r#"
            INSERT INTO sale_items (tenant_id, sale_id, line_no, product_id, qty, unit_price_cents)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(tenant_id)
        .bind(&sale.id)
        .bind(index as i64 + 1)
        .bind(&line.product_id)
        .bind(line.qty)
        .bind(line.unit_price.cents())
        .execute(&mut *conn)
        .await?;
    }

    debug!(tenant_id = %tenant_id, sale_id = %sale.id, lines = sale.items.len(), "Sale applied");
    Ok(())
}
