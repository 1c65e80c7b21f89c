//! # Outbox Repository
//!
//! The per-node durable queue of domain events awaiting transmission.
//!
//! ## The Outbox Pattern
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Outbox Pattern Implementation                        │
//! │                                                                         │
//! │  LOCAL OPERATION (e.g., create_with_event)                             │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │                   SINGLE TRANSACTION                            │   │
//! │  │                                                                 │   │
//! │  │  1. INSERT/UPDATE the domain row(s)                            │   │
//! │  │  2. validate payload against its schema  (fail → rollback)     │   │
//! │  │  3. INSERT INTO outbox_events (..., status = 'pending')        │   │
//! │  │                                                                 │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  COMMIT ← a readable outbox row ⟺ a durable domain change             │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │            SYNC AGENT (vela-sync)                               │   │
//! │  │                                                                 │   │
//! │  │  fetch_drainable → mark_validating → mark_sending → POST       │   │
//! │  │     → mark_sent → mark_processed        (or → mark_error)      │   │
//! │  │  schema mismatch: mark_validating → mark_rejected (parked)     │   │
//! │  │                                                                 │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Compare-and-Set
//! Every `mark_*` is `UPDATE … WHERE id = ? AND status IN (<predecessors>)`.
//! It returns `false` when the row was not in an allowed status (another
//! agent run got there first); callers skip the event instead of failing.

use chrono::{DateTime, Duration, Utc};
use sqlx::{Sqlite, SqlitePool, Transaction};
use std::collections::HashMap;
use tracing::{debug, info};
use vela_core::validation::validate_event_type;
use vela_core::{CoreError, OutboxEvent, OutboxStatus, OutboxTransition};

use crate::error::{DbError, DbResult};
use crate::repository::db_time;

const COLUMNS: &str = "id, tenant_id, event_type, aggregate, payload, status, attempts, \
                       created_at, updated_at, processed_at, last_error";

/// Reason recorded by [`OutboxRepository::recover_interrupted`].
pub const INTERRUPTED_REASON: &str = "interrupted before completion";

#[derive(Debug, sqlx::FromRow)]
struct OutboxRow {
    id: String,
    tenant_id: String,
    event_type: String,
    aggregate: String,
    payload: String,
    status: OutboxStatus,
    attempts: i64,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    processed_at: Option<DateTime<Utc>>,
    last_error: Option<String>,
}

impl TryFrom<OutboxRow> for OutboxEvent {
    type Error = DbError;

    fn try_from(row: OutboxRow) -> Result<Self, Self::Error> {
        let payload = serde_json::from_str(&row.payload)
            .map_err(|e| DbError::Corrupt(format!("outbox payload of {}: {}", row.id, e)))?;
        Ok(OutboxEvent {
            id: row.id,
            tenant_id: row.tenant_id,
            event_type: row.event_type,
            aggregate: row.aggregate,
            payload,
            status: row.status,
            attempts: row.attempts,
            created_at: row.created_at,
            updated_at: row.updated_at,
            processed_at: row.processed_at,
            last_error: row.last_error,
        })
    }
}

/// What a transition does to `last_error` (and `retryable`).
#[derive(Debug, Clone, Copy)]
enum ErrorField<'a> {
    Keep,
    Set(&'a str),
    /// Sets `last_error` and parks the row: `retryable = 0`.
    Reject(&'a str),
    Clear,
}

/// Rows touched by [`OutboxRepository::recover_interrupted`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RecoveryReport {
    /// `validating`/`sending` rows moved to `error`.
    pub requeued: u64,
    /// `sent` rows moved to `processed`.
    pub completed: u64,
}

/// Repository for outbox operations.
#[derive(Debug, Clone)]
pub struct OutboxRepository {
    pool: SqlitePool,
}

impl OutboxRepository {
    pub fn new(pool: SqlitePool) -> Self {
        OutboxRepository { pool }
    }

    // =========================================================================
    // Enqueue
    // =========================================================================

    /// Enqueues an event in its own transaction.
    ///
    /// Does not run the schema validator: the agent's validating step is the
    /// gate before `sending`.
    pub async fn enqueue(
        &self,
        tenant_id: &str,
        event_type: &str,
        payload: &serde_json::Value,
    ) -> DbResult<OutboxEvent> {
        let mut tx = self.pool.begin().await?;
        let event = Self::enqueue_in_tx(&mut tx, tenant_id, event_type, payload).await?;
        tx.commit().await?;
        Ok(event)
    }

    /// Enqueues an event inside the caller's transaction, as `pending`.
    ///
    /// ## Example
    /// ```rust,ignore
    /// let mut tx = pool.begin().await?;
    /// sqlx::query("UPDATE products SET name = ? WHERE ...").execute(&mut *tx).await?;
    /// OutboxRepository::enqueue_in_tx(&mut tx, "t1", "product.upserted.v1", &payload).await?;
    /// tx.commit().await?;
    /// ```
    pub async fn enqueue_in_tx(
        tx: &mut Transaction<'_, Sqlite>,
        tenant_id: &str,
        event_type: &str,
        payload: &serde_json::Value,
    ) -> DbResult<OutboxEvent> {
        validate_event_type(event_type).map_err(CoreError::from)?;

        let event = OutboxEvent::new(tenant_id, event_type, payload.clone());
        let payload_text = serde_json::to_string(&event.payload)?;

        sqlx::query(
            r#"
            INSERT INTO outbox_events
                (id, tenant_id, event_type, aggregate, payload, status, attempts,
                 created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, 'pending', 0, ?, ?)
            "#,
        )
        .bind(&event.id)
        .bind(&event.tenant_id)
        .bind(&event.event_type)
        .bind(&event.aggregate)
        .bind(&payload_text)
        .bind(db_time(event.created_at))
        .bind(db_time(event.updated_at))
        .execute(&mut **tx)
        .await?;

        debug!(id = %event.id, event_type = %event.event_type, "Enqueued outbox event");
        Ok(event)
    }

    // =========================================================================
    // Reads
    // =========================================================================

    pub async fn get(&self, id: &str) -> DbResult<OutboxEvent> {
        let sql = format!("SELECT {COLUMNS} FROM outbox_events WHERE id = ?");
        let row: Option<OutboxRow> = sqlx::query_as(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.ok_or_else(|| DbError::not_found("OutboxEvent", id))?
            .try_into()
    }

    /// Oldest `pending` and retryable `error` events first (FIFO by
    /// creation, then insertion). Rejected rows are never returned.
    pub async fn fetch_drainable(&self, limit: u32) -> DbResult<Vec<OutboxEvent>> {
        let sql = format!(
            "SELECT {COLUMNS} FROM outbox_events
             WHERE status = 'pending' OR (status = 'error' AND retryable = 1)
             ORDER BY created_at ASC, seq ASC
             LIMIT ?"
        );
        let rows: Vec<OutboxRow> = sqlx::query_as(&sql)
            .bind(limit as i64)
            .fetch_all(&self.pool)
            .await?;
        rows.into_iter().map(OutboxEvent::try_from).collect()
    }

    pub async fn list_by_status(&self, status: OutboxStatus, limit: u32) -> DbResult<Vec<OutboxEvent>> {
        let sql = format!(
            "SELECT {COLUMNS} FROM outbox_events
             WHERE status = ?
             ORDER BY created_at ASC, seq ASC
             LIMIT ?"
        );
        let rows: Vec<OutboxRow> = sqlx::query_as(&sql)
            .bind(status.as_str())
            .bind(limit as i64)
            .fetch_all(&self.pool)
            .await?;
        rows.into_iter().map(OutboxEvent::try_from).collect()
    }

    /// `error` rows parked by [`mark_rejected`](Self::mark_rejected), oldest
    /// first. They wait for [`mark_pending`](Self::mark_pending).
    pub async fn list_rejected(&self, limit: u32) -> DbResult<Vec<OutboxEvent>> {
        let sql = format!(
            "SELECT {COLUMNS} FROM outbox_events
             WHERE status = 'error' AND retryable = 0
             ORDER BY created_at ASC, seq ASC
             LIMIT ?"
        );
        let rows: Vec<OutboxRow> = sqlx::query_as(&sql)
            .bind(limit as i64)
            .fetch_all(&self.pool)
            .await?;
        rows.into_iter().map(OutboxEvent::try_from).collect()
    }

    /// Number of rows per status. Missing statuses count zero.
    pub async fn count_by_status(&self) -> DbResult<HashMap<OutboxStatus, i64>> {
        let rows: Vec<(OutboxStatus, i64)> =
            sqlx::query_as("SELECT status, COUNT(*) FROM outbox_events GROUP BY status")
                .fetch_all(&self.pool)
                .await?;

        let mut counts: HashMap<OutboxStatus, i64> =
            OutboxStatus::ALL.into_iter().map(|s| (s, 0)).collect();
        counts.extend(rows);
        Ok(counts)
    }

    /// Recorded status changes of one event, oldest first.
    pub async fn transitions(&self, id: &str) -> DbResult<Vec<OutboxTransition>> {
        let transitions = sqlx::query_as::<_, OutboxTransition>(
            r#"
            SELECT event_id, from_status, to_status, at, detail
            FROM outbox_transitions
            WHERE event_id = ?
            ORDER BY id ASC
            "#,
        )
        .bind(id)
        .fetch_all(&self.pool)
        .await?;
        Ok(transitions)
    }

    // =========================================================================
    // Status Transitions
    // =========================================================================

    /// `error → pending`, the first step of an automatic retry.
    ///
    /// Also the only way out for a rejected row: the operator requeues it
    /// once the cause is fixed, which makes it retryable again.
    pub async fn mark_pending(&self, id: &str) -> DbResult<bool> {
        self.transition(id, OutboxStatus::Pending, ErrorField::Keep).await
    }

    /// `pending → validating`.
    pub async fn mark_validating(&self, id: &str) -> DbResult<bool> {
        self.transition(id, OutboxStatus::Validating, ErrorField::Keep).await
    }

    /// `validating | error → sending`. Counts an attempt.
    pub async fn mark_sending(&self, id: &str) -> DbResult<bool> {
        self.transition(id, OutboxStatus::Sending, ErrorField::Keep).await
    }

    /// `sending → sent`: the hub acknowledged the batch.
    pub async fn mark_sent(&self, id: &str) -> DbResult<bool> {
        self.transition(id, OutboxStatus::Sent, ErrorField::Keep).await
    }

    /// `sending | sent → processed`, stamping `processed_at`.
    ///
    /// `last_error` records why the hub rejected an event that will not be
    /// retried; `None` clears any earlier error.
    pub async fn mark_processed(&self, id: &str, last_error: Option<&str>) -> DbResult<bool> {
        let error = match last_error {
            Some(reason) => ErrorField::Set(reason),
            None => ErrorField::Clear,
        };
        self.transition(id, OutboxStatus::Processed, error).await
    }

    /// `validating | sending → error` with the failure message.
    pub async fn mark_error(&self, id: &str, reason: &str) -> DbResult<bool> {
        self.transition(id, OutboxStatus::Error, ErrorField::Set(reason)).await
    }

    /// `validating → error` for a payload that failed its schema locally.
    ///
    /// The row keeps `reason` and is left out of
    /// [`fetch_drainable`](Self::fetch_drainable) until requeued.
    pub async fn mark_rejected(&self, id: &str, reason: &str) -> DbResult<bool> {
        self.transition(id, OutboxStatus::Error, ErrorField::Reject(reason)).await
    }

    async fn transition(&self, id: &str, to: OutboxStatus, error: ErrorField<'_>) -> DbResult<bool> {
        let predecessors = to.predecessors();
        let placeholders = vec!["?"; predecessors.len()].join(", ");

        let attempts_clause = if to == OutboxStatus::Sending {
            ", attempts = attempts + 1"
        } else {
            ""
        };
        let processed_clause = if to == OutboxStatus::Processed {
            ", processed_at = ?"
        } else {
            ""
        };
        let error_clause = match error {
            ErrorField::Keep => "",
            ErrorField::Set(_) => ", last_error = ?",
            ErrorField::Reject(_) => ", last_error = ?, retryable = 0",
            ErrorField::Clear => ", last_error = NULL",
        };
        let retry_clause = match (to, error) {
            (_, ErrorField::Reject(_)) => "",
            (OutboxStatus::Error | OutboxStatus::Pending, _) => ", retryable = 1",
            _ => "",
        };

        let sql = format!(
            "UPDATE outbox_events
             SET status = ?, updated_at = ?{attempts_clause}{processed_clause}{error_clause}{retry_clause}
             WHERE id = ? AND status IN ({placeholders})"
        );

        let now = db_time(Utc::now());
        let mut query = sqlx::query(&sql).bind(to.as_str()).bind(&now);
        if to == OutboxStatus::Processed {
            query = query.bind(&now);
        }
        if let ErrorField::Set(reason) | ErrorField::Reject(reason) = error {
            query = query.bind(reason);
        }
        query = query.bind(id);
        for from in &predecessors {
            query = query.bind(from.as_str());
        }

        let moved = query.execute(&self.pool).await?.rows_affected() == 1;
        if moved {
            debug!(id = %id, to = %to, "Outbox transition");
        } else {
            debug!(id = %id, to = %to, "Outbox transition skipped: precondition not met");
        }
        Ok(moved)
    }

    // =========================================================================
    // Maintenance
    // =========================================================================

    /// Repairs rows left mid-flight by a crash. Run before the first push.
    ///
    /// `validating`/`sending` rows go to `error` (retried next run, the hub
    /// is idempotent); `sent` rows were acknowledged and go to `processed`.
    pub async fn recover_interrupted(&self) -> DbResult<RecoveryReport> {
        let now = db_time(Utc::now());

        let requeued = sqlx::query(
            r#"
            UPDATE outbox_events
            SET status = 'error', updated_at = ?, last_error = ?, retryable = 1
            WHERE status IN ('validating', 'sending')
            "#,
        )
        .bind(&now)
        .bind(INTERRUPTED_REASON)
        .execute(&self.pool)
        .await?
        .rows_affected();

        let completed = sqlx::query(
            r#"
            UPDATE outbox_events
            SET status = 'processed', updated_at = ?, processed_at = ?
            WHERE status = 'sent'
            "#,
        )
        .bind(&now)
        .bind(&now)
        .execute(&self.pool)
        .await?
        .rows_affected();

        if requeued > 0 || completed > 0 {
            info!(requeued, completed, "Recovered interrupted outbox rows");
        }
        Ok(RecoveryReport {
            requeued,
            completed,
        })
    }

    /// Deletes `processed` rows (and their transition log) processed before
    /// `now - older_than`. Never called automatically.
    pub async fn purge_processed(&self, older_than: Duration) -> DbResult<u64> {
        let cutoff = db_time(Utc::now() - older_than);
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            DELETE FROM outbox_transitions
            WHERE event_id IN (
                SELECT id FROM outbox_events
                WHERE status = 'processed' AND processed_at < ?
            )
            "#,
        )
        .bind(&cutoff)
        .execute(&mut *tx)
        .await?;

        let purged = sqlx::query(
            "DELETE FROM outbox_events WHERE status = 'processed' AND processed_at < ?",
        )
        .bind(&cutoff)
        .execute(&mut *tx)
        .await?
        .rows_affected();

        tx.commit().await?;
        info!(purged, "Purged processed outbox rows");
        Ok(purged)
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Database, DbConfig};
    use serde_json::json;

    async fn repo() -> (Database, OutboxRepository) {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let repo = db.outbox();
        (db, repo)
    }

    fn payload() -> serde_json::Value {
        json!({"id": "p1", "sku": "A-1", "name": "Apple", "price": 1.25})
    }

    #[tokio::test]
    async fn test_enqueue_stores_pending_with_transition() {
        let (_db, repo) = repo().await;
        let event = repo.enqueue("t1", "product.upserted.v1", &payload()).await.unwrap();

        let stored = repo.get(&event.id).await.unwrap();
        assert_eq!(stored, event);
        assert_eq!(stored.status, OutboxStatus::Pending);
        assert_eq!(stored.aggregate, "product");

        let log = repo.transitions(&event.id).await.unwrap();
        assert_eq!(log.len(), 1);
        assert_eq!(log[0].from_status, None);
        assert_eq!(log[0].to_status, OutboxStatus::Pending);
    }

    #[tokio::test]
    async fn test_enqueue_rejects_malformed_type() {
        let (_db, repo) = repo().await;
        let err = repo.enqueue("t1", "ProductUpserted", &payload()).await.unwrap_err();
        assert!(matches!(err, DbError::Core(_)));
    }

    #[tokio::test]
    async fn test_enqueue_in_tx_rolls_back_with_caller() {
        let (db, repo) = repo().await;
        let mut tx = db.pool().begin().await.unwrap();
        OutboxRepository::enqueue_in_tx(&mut tx, "t1", "product.upserted.v1", &payload())
            .await
            .unwrap();
        tx.rollback().await.unwrap();

        assert!(repo.fetch_drainable(10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_full_lifecycle() {
        let (_db, repo) = repo().await;
        let event = repo.enqueue("t1", "product.upserted.v1", &payload()).await.unwrap();

        assert!(repo.mark_validating(&event.id).await.unwrap());
        assert!(repo.mark_sending(&event.id).await.unwrap());
        assert!(repo.mark_sent(&event.id).await.unwrap());
        assert!(repo.mark_processed(&event.id, None).await.unwrap());

        let stored = repo.get(&event.id).await.unwrap();
        assert_eq!(stored.status, OutboxStatus::Processed);
        assert_eq!(stored.attempts, 1);
        assert!(stored.processed_at.is_some());

        let path: Vec<OutboxStatus> = repo
            .transitions(&event.id)
            .await
            .unwrap()
            .into_iter()
            .map(|t| t.to_status)
            .collect();
        assert_eq!(
            path,
            vec![
                OutboxStatus::Pending,
                OutboxStatus::Validating,
                OutboxStatus::Sending,
                OutboxStatus::Sent,
                OutboxStatus::Processed
            ]
        );
    }

    #[tokio::test]
    async fn test_cas_rejects_illegal_or_repeated_moves() {
        let (_db, repo) = repo().await;
        let event = repo.enqueue("t1", "product.upserted.v1", &payload()).await.unwrap();

        // pending → sending skips validation
        assert!(!repo.mark_sending(&event.id).await.unwrap());
        assert!(repo.mark_validating(&event.id).await.unwrap());
        // A second agent run loses the race
        assert!(!repo.mark_validating(&event.id).await.unwrap());
        assert_eq!(repo.get(&event.id).await.unwrap().status, OutboxStatus::Validating);
    }

    #[tokio::test]
    async fn test_error_is_retried_through_pending() {
        let (_db, repo) = repo().await;
        let event = repo.enqueue("t1", "product.upserted.v1", &payload()).await.unwrap();

        repo.mark_validating(&event.id).await.unwrap();
        repo.mark_sending(&event.id).await.unwrap();
        assert!(repo.mark_error(&event.id, "connection refused").await.unwrap());

        let drainable = repo.fetch_drainable(10).await.unwrap();
        assert_eq!(drainable.len(), 1);
        assert_eq!(drainable[0].last_error.as_deref(), Some("connection refused"));

        assert!(repo.mark_pending(&event.id).await.unwrap());
        assert!(repo.mark_validating(&event.id).await.unwrap());
        assert!(repo.mark_sending(&event.id).await.unwrap());
        assert!(repo.mark_processed(&event.id, None).await.unwrap());

        let stored = repo.get(&event.id).await.unwrap();
        assert_eq!(stored.attempts, 2);
        assert_eq!(stored.last_error, None);

        let log = repo.transitions(&event.id).await.unwrap();
        let error_step = log.iter().find(|t| t.to_status == OutboxStatus::Error).unwrap();
        assert_eq!(error_step.detail.as_deref(), Some("connection refused"));
    }

    #[tokio::test]
    async fn test_rejected_row_parked_until_requeued() {
        let (_db, repo) = repo().await;
        let bad = repo.enqueue("t1", "product.upserted.v1", &json!({"id": "p1"})).await.unwrap();
        let good = repo.enqueue("t1", "product.upserted.v1", &payload()).await.unwrap();

        repo.mark_validating(&bad.id).await.unwrap();
        assert!(repo.mark_rejected(&bad.id, "missing sku").await.unwrap());

        let drainable = repo.fetch_drainable(10).await.unwrap();
        assert_eq!(drainable.len(), 1);
        assert_eq!(drainable[0].id, good.id);

        let rejected = repo.list_rejected(10).await.unwrap();
        assert_eq!(rejected.len(), 1);
        assert_eq!(rejected[0].status, OutboxStatus::Error);
        assert_eq!(rejected[0].last_error.as_deref(), Some("missing sku"));

        // Requeued, then a transport failure: retryable again
        assert!(repo.mark_pending(&bad.id).await.unwrap());
        assert!(repo.list_rejected(10).await.unwrap().is_empty());
        repo.mark_validating(&bad.id).await.unwrap();
        repo.mark_sending(&bad.id).await.unwrap();
        repo.mark_error(&bad.id, "connection refused").await.unwrap();
        assert_eq!(repo.fetch_drainable(10).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_drain_order_is_fifo() {
        let (_db, repo) = repo().await;
        let mut ids = Vec::new();
        for n in 0..5 {
            let p = json!({"id": format!("p{n}")});
            ids.push(repo.enqueue("t1", "product.deleted.v1", &p).await.unwrap().id);
        }

        let drained: Vec<String> = repo
            .fetch_drainable(3)
            .await
            .unwrap()
            .into_iter()
            .map(|e| e.id)
            .collect();
        assert_eq!(drained, ids[..3].to_vec());
    }

    #[tokio::test]
    async fn test_payload_frozen_once_sent() {
        let (db, repo) = repo().await;
        let event = repo.enqueue("t1", "product.upserted.v1", &payload()).await.unwrap();

        // Mutable while pending
        sqlx::query("UPDATE outbox_events SET payload = '{}' WHERE id = ?")
            .bind(&event.id)
            .execute(db.pool())
            .await
            .unwrap();

        repo.mark_validating(&event.id).await.unwrap();
        repo.mark_sending(&event.id).await.unwrap();
        repo.mark_sent(&event.id).await.unwrap();

        let result = sqlx::query("UPDATE outbox_events SET payload = '{\"id\":\"x\"}' WHERE id = ?")
            .bind(&event.id)
            .execute(db.pool())
            .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_recover_interrupted() {
        let (_db, repo) = repo().await;
        let a = repo.enqueue("t1", "product.deleted.v1", &json!({"id": "a"})).await.unwrap();
        let b = repo.enqueue("t1", "product.deleted.v1", &json!({"id": "b"})).await.unwrap();
        let c = repo.enqueue("t1", "product.deleted.v1", &json!({"id": "c"})).await.unwrap();

        repo.mark_validating(&a.id).await.unwrap();
        repo.mark_validating(&b.id).await.unwrap();
        repo.mark_sending(&b.id).await.unwrap();
        repo.mark_sent(&b.id).await.unwrap();

        let report = repo.recover_interrupted().await.unwrap();
        assert_eq!(report, RecoveryReport { requeued: 1, completed: 1 });

        let a = repo.get(&a.id).await.unwrap();
        assert_eq!(a.status, OutboxStatus::Error);
        assert_eq!(a.last_error.as_deref(), Some(INTERRUPTED_REASON));
        assert_eq!(repo.get(&b.id).await.unwrap().status, OutboxStatus::Processed);
        assert_eq!(repo.get(&c.id).await.unwrap().status, OutboxStatus::Pending);
    }

    #[tokio::test]
    async fn test_count_and_purge() {
        let (_db, repo) = repo().await;
        let a = repo.enqueue("t1", "product.deleted.v1", &json!({"id": "a"})).await.unwrap();
        repo.enqueue("t1", "product.deleted.v1", &json!({"id": "b"})).await.unwrap();

        repo.mark_validating(&a.id).await.unwrap();
        repo.mark_sending(&a.id).await.unwrap();
        repo.mark_processed(&a.id, None).await.unwrap();

        let counts = repo.count_by_status().await.unwrap();
        assert_eq!(counts[&OutboxStatus::Processed], 1);
        assert_eq!(counts[&OutboxStatus::Pending], 1);
        assert_eq!(counts[&OutboxStatus::Error], 0);

        // Far cutoff keeps everything
        assert_eq!(repo.purge_processed(Duration::days(30)).await.unwrap(), 0);

        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        assert_eq!(repo.purge_processed(Duration::zero()).await.unwrap(), 1);
        assert!(matches!(repo.get(&a.id).await, Err(DbError::NotFound { .. })));
        assert!(repo.transitions(&a.id).await.unwrap().is_empty());
    }
}
