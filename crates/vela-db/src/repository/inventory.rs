//! # Inventory Repository
//!
//! Append-only stock ledger backing `products.stock_qty`.
//!
//! ## Delta Application
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                      ONE TRANSACTION PER DELTA                          │
//! │                                                                         │
//! │  INSERT INTO inventory_adjustments (id, delta, reason, ...)            │
//! │  ON CONFLICT (tenant_id, id) DO NOTHING                                │
//! │       │                                                                 │
//! │       ├── 0 rows: id already applied ──► no-op (redelivery)            │
//! │       │                                                                 │
//! │       └── 1 row ──► UPDATE products SET stock_qty = stock_qty + delta  │
//! │                                                                         │
//! │  Invariant: stock_qty == SUM(delta) for every (tenant, product)        │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! A sale and its stock movement commit separately: the sale must exist
//! first. A failure here after the sale committed is returned to the caller
//! and is safe to retry, because sale-line adjustments use deterministic ids.

use chrono::{DateTime, Utc};
use sqlx::{SqliteConnection, SqlitePool};
use std::sync::Arc;
use tracing::{debug, info};
use vela_core::events::{InventoryAdjusted, SaleCreated};
use vela_core::schema::MAX_QUANTITY;
use vela_core::{
    AdjustmentReason, CoreError, EventKind, InventoryAdjustment, OutboxEvent, SchemaValidator, ValidationError,
};

use crate::error::DbResult;
use crate::repository::{db_time, enqueue_validated};

/// Repository for the stock ledger.
#[derive(Debug, Clone)]
pub struct InventoryRepository {
    pool: SqlitePool,
    validator: Arc<SchemaValidator>,
}

impl InventoryRepository {
    pub fn new(pool: SqlitePool, validator: Arc<SchemaValidator>) -> Self {
        InventoryRepository { pool, validator }
    }

    /// Records one adjustment and moves the projection by the same delta.
    ///
    /// ## Returns
    /// * `Ok(true)` - Adjustment recorded
    /// * `Ok(false)` - This adjustment id was already applied
    pub async fn apply(&self, tenant_id: &str, adjustment: &InventoryAdjusted, at: DateTime<Utc>) -> DbResult<bool> {
        let mut tx = self.pool.begin().await?;
        let applied = apply_on(&mut tx, tenant_id, adjustment, at).await?;
        tx.commit().await?;
        Ok(applied)
    }

    /// Applies the stock movement of every line of a sale (hub side).
    ///
    /// Returns how many lines were newly applied.
    pub async fn apply_sale_lines(&self, tenant_id: &str, sale: &SaleCreated, at: DateTime<Utc>) -> DbResult<usize> {
        let mut tx = self.pool.begin().await?;
        let mut applied = 0;
        for adjustment in sale_adjustments(sale) {
            if apply_on(&mut tx, tenant_id, &adjustment, at).await? {
                applied += 1;
            }
        }
        tx.commit().await?;

        debug!(tenant_id = %tenant_id, sale_id = %sale.id, applied, "Applied sale stock movement");
        Ok(applied)
    }

    /// Edge write: record a manual adjustment and enqueue `inventory.adjusted.v1`.
    pub async fn adjust_with_event(&self, tenant_id: &str, adjustment: &InventoryAdjusted) -> DbResult<OutboxEvent> {
        let payload = serde_json::to_value(adjustment)?;
        let mut tx = self.pool.begin().await?;
        apply_on(&mut tx, tenant_id, adjustment, Utc::now()).await?;
        let event =
            enqueue_validated(&mut tx, &self.validator, tenant_id, EventKind::InventoryAdjusted, &payload).await?;
        tx.commit().await?;
        Ok(event)
    }

    /// Edge write: decrement stock for a committed sale and enqueue one
    /// `inventory.adjusted.v1` per newly applied line.
    ///
    /// Called after `SaleRepository::create_with_event` committed. Lines
    /// applied by an earlier attempt are skipped, so a failed call can simply
    /// be repeated.
    pub async fn apply_sale(&self, tenant_id: &str, sale: &SaleCreated) -> DbResult<Vec<OutboxEvent>> {
        let now = Utc::now();
        let mut tx = self.pool.begin().await?;
        let mut events = Vec::new();

        for adjustment in sale_adjustments(sale) {
            if !apply_on(&mut tx, tenant_id, &adjustment, now).await? {
                continue;
            }
            let payload = serde_json::to_value(&adjustment)?;
            let event =
                enqueue_validated(&mut tx, &self.validator, tenant_id, EventKind::InventoryAdjusted, &payload)
                    .await?;
            events.push(event);
        }

        tx.commit().await?;
        info!(tenant_id = %tenant_id, sale_id = %sale.id, lines = events.len(), "Sale stock movement recorded");
        Ok(events)
    }

    /// Sum of all recorded deltas for a product.
    pub async fn ledger_sum(&self, tenant_id: &str, product_id: &str) -> DbResult<i64> {
        let sum: i64 = sqlx::query_scalar(
            "SELECT COALESCE(SUM(delta), 0) FROM inventory_adjustments WHERE tenant_id = ? AND product_id = ?",
        )
        .bind(tenant_id)
        .bind(product_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(sum)
    }

    /// Current projected quantity, `None` when the product row is absent.
    pub async fn stock_qty(&self, tenant_id: &str, product_id: &str) -> DbResult<Option<i64>> {
        let qty: Option<i64> =
            sqlx::query_scalar("SELECT stock_qty FROM products WHERE tenant_id = ? AND id = ?")
                .bind(tenant_id)
                .bind(product_id)
                .fetch_optional(&self.pool)
                .await?;
        Ok(qty)
    }

    /// Ledger rows of one product, oldest first.
    pub async fn list_for_product(&self, tenant_id: &str, product_id: &str) -> DbResult<Vec<InventoryAdjustment>> {
        let rows = sqlx::query_as::<_, InventoryAdjustment>(
            r#"
            SELECT tenant_id, id, product_id, delta, reason, reference_id, created_at
            FROM inventory_adjustments
            WHERE tenant_id = ? AND product_id = ?
            ORDER BY created_at, rowid
            "#,
        )
        .bind(tenant_id)
        .bind(product_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }
}

/// Stock movements implied by a sale: one negative delta per line.
pub fn sale_adjustments(sale: &SaleCreated) -> Vec<InventoryAdjusted> {
    sale.items
        .iter()
        .enumerate()
        .map(|(index, line)| InventoryAdjusted {
            id: InventoryAdjustment::sale_line_id(&sale.id, index as i64 + 1),
            product_id: line.product_id.clone(),
            delta: line.qty.saturating_neg(),
            reason: AdjustmentReason::Sale,
            reference_id: Some(sale.id.clone()),
        })
        .collect()
}

pub(crate) async fn apply_on(
    conn: &mut SqliteConnection,
    tenant_id: &str,
    adjustment: &InventoryAdjusted,
    at: DateTime<Utc>,
) -> DbResult<bool> {
    if adjustment.delta == 0 {
        return Err(CoreError::from(ValidationError::InvalidFormat {
            field: "delta".to_string(),
            reason: "must not be zero".to_string(),
        })
        .into());
    }
    if adjustment.delta.unsigned_abs() > MAX_QUANTITY.unsigned_abs() {
        return Err(CoreError::from(ValidationError::InvalidFormat {
            field: "delta".to_string(),
            reason: format!("must be within ±{MAX_QUANTITY}"),
        })
        .into());
    }

    // DO NOTHING only covers the key; CHECK failures still raise
    let inserted = sqlx::query(
        r#"
        INSERT INTO inventory_adjustments
            (tenant_id, id, product_id, delta, reason, reference_id, created_at)
        VALUES (?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT (tenant_id, id) DO NOTHING
        "#,
    )
    .bind(tenant_id)
    .bind(&adjustment.id)
    .bind(&adjustment.product_id)
    .bind(adjustment.delta)
    .bind(adjustment.reason.as_str())
    .bind(&adjustment.reference_id)
    .bind(db_time(at))
    .execute(&mut *conn)
    .await?
    .rows_affected()
        == 1;

    if !inserted {
        debug!(tenant_id = %tenant_id, id = %adjustment.id, "Adjustment already applied");
        return Ok(false);
    }

    sqlx::query("UPDATE products SET stock_qty = stock_qty + ? WHERE tenant_id = ? AND id = ?")
        .bind(adjustment.delta)
        .bind(tenant_id)
        .bind(&adjustment.product_id)
        .execute(&mut *conn)
        .await?;

    debug!(
        tenant_id = %tenant_id,
        product_id = %adjustment.product_id,
        delta = adjustment.delta,
        "Adjustment applied"
    );
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::DbError;
    use crate::{Database, DbConfig};
    use proptest::prelude::*;
    use vela_core::events::{ProductUpserted, SaleLine};
    use vela_core::Money;

    fn adjustment(id: &str, delta: i64) -> InventoryAdjusted {
        InventoryAdjusted {
            id: id.to_string(),
            product_id: "p1".to_string(),
            delta,
            reason: AdjustmentReason::Manual,
            reference_id: None,
        }
    }

    async fn db_with_product() -> Database {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let product = ProductUpserted {
            id: "p1".to_string(),
            sku: "APL-1".to_string(),
            name: "Apple".to_string(),
            price: Money::from_cents(100),
        };
        db.products().upsert("t1", &product, Utc::now()).await.unwrap();
        db
    }

    #[tokio::test]
    async fn test_same_adjustment_applies_once() {
        let db = db_with_product().await;
        let repo = db.inventory();

        assert!(repo.apply("t1", &adjustment("a1", 10), Utc::now()).await.unwrap());
        assert!(!repo.apply("t1", &adjustment("a1", 10), Utc::now()).await.unwrap());

        assert_eq!(repo.stock_qty("t1", "p1").await.unwrap(), Some(10));
        assert_eq!(repo.list_for_product("t1", "p1").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_zero_delta_is_rejected() {
        let db = db_with_product().await;
        let err = db.inventory().apply("t1", &adjustment("a1", 0), Utc::now()).await.unwrap_err();

        assert!(matches!(err, DbError::Core(CoreError::Validation(_))));
        assert!(db.inventory().list_for_product("t1", "p1").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_oversized_delta_is_rejected() {
        let db = db_with_product().await;
        let repo = db.inventory();
        repo.apply("t1", &adjustment("a1", 5), Utc::now()).await.unwrap();

        for delta in [i64::MAX, i64::MIN, MAX_QUANTITY + 1] {
            let err = repo.apply("t1", &adjustment("a2", delta), Utc::now()).await.unwrap_err();
            assert!(matches!(err, DbError::Core(CoreError::Validation(_))), "{delta}");
        }
        assert_eq!(repo.stock_qty("t1", "p1").await.unwrap(), Some(5));
    }

    #[tokio::test]
    async fn test_ledger_is_append_only() {
        let db = db_with_product().await;
        db.inventory().apply("t1", &adjustment("a1", 3), Utc::now()).await.unwrap();

        let update = sqlx::query("UPDATE inventory_adjustments SET delta = 30")
            .execute(db.pool())
            .await;
        let delete = sqlx::query("DELETE FROM inventory_adjustments").execute(db.pool()).await;
        assert!(update.is_err());
        assert!(delete.is_err());
    }

    #[tokio::test]
    async fn test_adjustment_before_product_is_counted_on_create() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        db.inventory().apply("t1", &adjustment("a1", 7), Utc::now()).await.unwrap();
        assert_eq!(db.inventory().stock_qty("t1", "p1").await.unwrap(), None);

        let product = ProductUpserted {
            id: "p1".to_string(),
            sku: "APL-1".to_string(),
            name: "Apple".to_string(),
            price: Money::from_cents(100),
        };
        db.products().upsert("t1", &product, Utc::now()).await.unwrap();
        assert_eq!(db.inventory().stock_qty("t1", "p1").await.unwrap(), Some(7));
    }

    #[tokio::test]
    async fn test_apply_sale_is_repeatable() {
        let db = db_with_product().await;
        let repo = db.inventory();
        repo.apply("t1", &adjustment("restock", 20), Utc::now()).await.unwrap();

        let sale = SaleCreated {
            id: "s1".to_string(),
            customer_id: None,
            total: Money::from_cents(300),
            items: vec![SaleLine {
                product_id: "p1".to_string(),
                qty: 3,
                unit_price: Money::from_cents(100),
            }],
        };

        let first = repo.apply_sale("t1", &sale).await.unwrap();
        let second = repo.apply_sale("t1", &sale).await.unwrap();
        assert_eq!(first.len(), 1);
        assert_eq!(first[0].payload["id"], "sale:s1:1");
        assert!(second.is_empty());

        // The hub applying the same sale lines is also a no-op
        assert_eq!(repo.apply_sale_lines("t1", &sale, Utc::now()).await.unwrap(), 0);
        assert_eq!(repo.stock_qty("t1", "p1").await.unwrap(), Some(17));
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(24))]

        #[test]
        fn prop_stock_equals_start_plus_deltas(
            start in -50i64..50,
            deltas in prop::collection::vec((-20i64..20).prop_filter("non-zero", |d| *d != 0), 0..12),
        ) {
            let rt = tokio::runtime::Runtime::new().unwrap();
            rt.block_on(async {
                let db = db_with_product().await;
                let repo = db.inventory();
                if start != 0 {
                    repo.apply("t1", &adjustment("opening", start), Utc::now()).await.unwrap();
                }
                for (n, delta) in deltas.iter().enumerate() {
                    repo.apply("t1", &adjustment(&format!("a{n}"), *delta), Utc::now()).await.unwrap();
                }

                let expected = start + deltas.iter().sum::<i64>();
                let opening_rows = usize::from(start != 0);
                assert_eq!(repo.stock_qty("t1", "p1").await.unwrap(), Some(expected));
                assert_eq!(repo.ledger_sum("t1", "p1").await.unwrap(), expected);
                assert_eq!(
                    repo.list_for_product("t1", "p1").await.unwrap().len(),
                    deltas.len() + opening_rows
                );
            });
        }
    }
}
