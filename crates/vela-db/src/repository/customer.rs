//! # Customer Repository
//!
//! Customer upserts and logical deletes, ordered by event time so that
//! redelivery and reordering converge on the same row.

use chrono::{DateTime, Utc};
use sqlx::{SqliteConnection, SqlitePool};
use std::sync::Arc;
use tracing::debug;
use vela_core::events::{CustomerUpserted, EntityDeleted};
use vela_core::{Customer, EventKind, OutboxEvent, SchemaValidator};

use crate::error::DbResult;
use crate::repository::{db_time, enqueue_validated, tombstone_time};

/// Repository for customer database operations.
#[derive(Debug, Clone)]
pub struct CustomerRepository {
    pool: SqlitePool,
    validator: Arc<SchemaValidator>,
}

impl CustomerRepository {
    pub fn new(pool: SqlitePool, validator: Arc<SchemaValidator>) -> Self {
        CustomerRepository { pool, validator }
    }

    /// Applies an upsert stamped `at`. Returns `false` when a newer write
    /// already holds the row.
    pub async fn upsert(&self, tenant_id: &str, customer: &CustomerUpserted, at: DateTime<Utc>) -> DbResult<bool> {
        let mut conn = self.pool.acquire().await?;
        upsert_on(&mut conn, tenant_id, customer, at).await
    }

    /// Logical delete stamped `at`. Creates a tombstone when the customer is
    /// unknown so a late upsert cannot bring it back.
    pub async fn soft_delete(&self, tenant_id: &str, id: &str, at: DateTime<Utc>) -> DbResult<()> {
        let mut conn = self.pool.acquire().await?;
        soft_delete_on(&mut conn, tenant_id, id, at).await
    }

    /// Edge write: upsert now and enqueue `customer.upserted.v1` atomically.
    pub async fn upsert_with_event(&self, tenant_id: &str, customer: &CustomerUpserted) -> DbResult<OutboxEvent> {
        let payload = serde_json::to_value(customer)?;
        let mut tx = self.pool.begin().await?;
        upsert_on(&mut tx, tenant_id, customer, Utc::now()).await?;
        let event =
            enqueue_validated(&mut tx, &self.validator, tenant_id, EventKind::CustomerUpserted, &payload).await?;
        tx.commit().await?;
        Ok(event)
    }

    /// Edge write: a local delete always leaves the soft-delete event.
    pub async fn delete_with_event(&self, tenant_id: &str, id: &str) -> DbResult<OutboxEvent> {
        let payload = serde_json::to_value(EntityDeleted { id: id.to_string() })?;
        let mut tx = self.pool.begin().await?;
        soft_delete_on(&mut tx, tenant_id, id, Utc::now()).await?;
        let event =
            enqueue_validated(&mut tx, &self.validator, tenant_id, EventKind::CustomerDeleted, &payload).await?;
        tx.commit().await?;
        Ok(event)
    }

    pub async fn find(&self, tenant_id: &str, id: &str) -> DbResult<Option<Customer>> {
        let customer = sqlx::query_as::<_, Customer>(
            r#"
            SELECT tenant_id, id, name, email, phone, active, updated_at, deleted_at
            FROM customers
            WHERE tenant_id = ? AND id = ?
            "#,
        )
        .bind(tenant_id)
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(customer)
    }
}

async fn upsert_on(
    conn: &mut SqliteConnection,
    tenant_id: &str,
    customer: &CustomerUpserted,
    at: DateTime<Utc>,
) -> DbResult<bool> {
    let result = sqlx::query(
        r#"
        INSERT INTO customers (tenant_id, id, name, email, phone, active, updated_at)
        VALUES (?1, ?2, ?3, ?4, ?5, 1, ?6)
        ON CONFLICT (tenant_id, id) DO UPDATE SET
            name = excluded.name,
            email = excluded.email,
            phone = excluded.phone,
            updated_at = excluded.updated_at,
            active = CASE
                WHEN customers.deleted_at IS NOT NULL
                     AND customers.deleted_at >= excluded.updated_at THEN 0
                ELSE 1
            END
        WHERE excluded.updated_at >= customers.updated_at
        "#,
    )
    .bind(tenant_id)
    .bind(&customer.id)
    .bind(&customer.name)
    .bind(&customer.email)
    .bind(&customer.phone)
    .bind(db_time(at))
    .execute(&mut *conn)
    .await?;

    let applied = result.rows_affected() == 1;
    debug!(tenant_id = %tenant_id, id = %customer.id, applied, "Customer upsert");
    Ok(applied)
}

async fn soft_delete_on(conn: &mut SqliteConnection, tenant_id: &str, id: &str, at: DateTime<Utc>) -> DbResult<()> {
    sqlx::query(
        r#"
        INSERT INTO customers (tenant_id, id, name, active, updated_at, deleted_at)
        VALUES (?1, ?2, '', 0, ?3, ?4)
        ON CONFLICT (tenant_id, id) DO UPDATE SET
            deleted_at = CASE
                WHEN customers.deleted_at IS NULL
                     OR excluded.deleted_at > customers.deleted_at THEN excluded.deleted_at
                ELSE customers.deleted_at
            END,
            active = CASE
                WHEN excluded.deleted_at >= customers.updated_at THEN 0
                ELSE customers.active
            END
        "#,
    )
    .bind(tenant_id)
    .bind(id)
    .bind(tombstone_time())
    .bind(db_time(at))
    .execute(&mut *conn)
    .await?;

    debug!(tenant_id = %tenant_id, id = %id, "Customer soft-deleted");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Database, DbConfig};
    use chrono::Duration;
    use vela_core::OutboxStatus;

    fn alice(name: &str) -> CustomerUpserted {
        CustomerUpserted {
            id: "c1".to_string(),
            name: name.to_string(),
            email: Some("alice@example.com".to_string()),
            phone: None,
        }
    }

    #[tokio::test]
    async fn test_older_upsert_is_ignored() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let repo = db.customers();
        let t0 = Utc::now();

        assert!(repo.upsert("t1", &alice("Alice B"), t0 + Duration::seconds(5)).await.unwrap());
        assert!(!repo.upsert("t1", &alice("Alice A"), t0).await.unwrap());

        let stored = repo.find("t1", "c1").await.unwrap().unwrap();
        assert_eq!(stored.name, "Alice B");
        assert!(stored.active);
    }

    #[tokio::test]
    async fn test_delete_before_upsert_does_not_resurrect() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let repo = db.customers();
        let t0 = Utc::now();

        // Delete arrives first, then the older upsert
        repo.soft_delete("t1", "c1", t0 + Duration::seconds(1)).await.unwrap();
        repo.upsert("t1", &alice("Alice"), t0).await.unwrap();

        let stored = repo.find("t1", "c1").await.unwrap().unwrap();
        assert!(!stored.active);
        assert_eq!(stored.name, "Alice");

        // A genuinely newer upsert re-activates
        repo.upsert("t1", &alice("Alice"), t0 + Duration::seconds(2)).await.unwrap();
        assert!(repo.find("t1", "c1").await.unwrap().unwrap().active);
    }

    #[tokio::test]
    async fn test_tenants_are_isolated() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let repo = db.customers();
        repo.upsert("t1", &alice("Alice"), Utc::now()).await.unwrap();

        assert!(repo.find("t2", "c1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_delete_with_event_enqueues_soft_delete() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let repo = db.customers();
        repo.upsert_with_event("t1", &alice("Alice")).await.unwrap();
        let event = repo.delete_with_event("t1", "c1").await.unwrap();

        assert_eq!(event.event_type, "customer.deleted.v1");
        assert_eq!(event.status, OutboxStatus::Pending);
        assert!(!repo.find("t1", "c1").await.unwrap().unwrap().active);
        assert_eq!(db.outbox().fetch_drainable(10).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_invalid_payload_rolls_back_write() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let repo = db.customers();
        let customer = alice("");

        assert!(repo.upsert_with_event("t1", &customer).await.is_err());
        assert!(repo.find("t1", "c1").await.unwrap().is_none());
        assert!(db.outbox().fetch_drainable(10).await.unwrap().is_empty());
    }
}
