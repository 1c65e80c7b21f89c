//! # Command Repository
//!
//! Hub → edge instructions. The hub stores them opaquely; the edge decides
//! what they mean.
//!
//! ## Delivery
//! ```text
//! enqueue ──► queued ──take_pending──► leased (leased_until, leased_by)
//!                ▲                        │
//!                └── lease runs out ──────┤
//!                                         └──ack──► acked (never handed out again)
//! ```
//! Delivery is at-least-once: a device that loses the pull response sees the
//! same command again after the lease.

use chrono::{DateTime, Duration, Utc};
use serde_json::json;
use sqlx::SqlitePool;
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::{DbError, DbResult};
use crate::repository::db_time;

#[derive(Debug, sqlx::FromRow)]
struct CommandRow {
    id: String,
    command_type: String,
    payload: String,
    created_at: DateTime<Utc>,
}

/// Repository for queued commands.
#[derive(Debug, Clone)]
pub struct CommandRepository {
    pool: SqlitePool,
}

impl CommandRepository {
    pub fn new(pool: SqlitePool) -> Self {
        CommandRepository { pool }
    }

    /// Queues a command. `device_id = None` lets any device of the tenant
    /// take it.
    pub async fn enqueue(
        &self,
        tenant_id: &str,
        device_id: Option<&str>,
        command_type: &str,
        payload: &serde_json::Value,
    ) -> DbResult<String> {
        let id = Uuid::new_v4().to_string();
        sqlx::query(
            r#"
            INSERT INTO sync_commands (id, tenant_id, device_id, command_type, payload, created_at)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&id)
        .bind(tenant_id)
        .bind(device_id)
        .bind(command_type)
        .bind(serde_json::to_string(payload)?)
        .bind(db_time(Utc::now()))
        .execute(&self.pool)
        .await?;

        info!(tenant_id = %tenant_id, command_type = %command_type, "Command queued");
        Ok(id)
    }

    /// Leases up to `limit` unacked commands, oldest first, for `lease`.
    ///
    /// Commands under a live lease are skipped. Each command is returned as
    /// `{ id, type, payload, createdAt }`.
    pub async fn take_pending(
        &self,
        tenant_id: &str,
        device_id: Option<&str>,
        limit: i64,
        lease: Duration,
    ) -> DbResult<Vec<serde_json::Value>> {
        let now = Utc::now();
        let mut tx = self.pool.begin().await?;

        let rows: Vec<CommandRow> = sqlx::query_as(
            r#"
            SELECT id, command_type, payload, created_at
            FROM sync_commands
            WHERE tenant_id = ?1
              AND acked_at IS NULL
              AND (leased_until IS NULL OR leased_until <= ?3)
              AND (device_id IS NULL OR device_id = ?2)
            ORDER BY created_at, rowid
            LIMIT ?4
            "#,
        )
        .bind(tenant_id)
        .bind(device_id)
        .bind(db_time(now))
        .bind(limit)
        .fetch_all(&mut *tx)
        .await?;

        let delivered_at = db_time(now);
        let leased_until = db_time(now + lease);
        let mut commands = Vec::with_capacity(rows.len());
        for row in rows {
            sqlx::query(
                "UPDATE sync_commands SET delivered_at = ?, leased_until = ?, leased_by = ? WHERE id = ?",
            )
            .bind(&delivered_at)
            .bind(&leased_until)
            .bind(device_id)
            .bind(&row.id)
            .execute(&mut *tx)
            .await?;

            let payload: serde_json::Value = serde_json::from_str(&row.payload)
                .map_err(|e| DbError::Corrupt(format!("command {}: {}", row.id, e)))?;
            commands.push(json!({
                "id": row.id,
                "type": row.command_type,
                "payload": payload,
                "createdAt": db_time(row.created_at),
            }));
        }

        tx.commit().await?;
        debug!(tenant_id = %tenant_id, count = commands.len(), "Commands leased");
        Ok(commands)
    }

    /// Marks commands handled so they are never handed out again.
    ///
    /// With a device, only commands that device leased are acked. Unknown,
    /// foreign and already-acked ids are skipped. Returns how many were acked.
    pub async fn ack(&self, tenant_id: &str, device_id: Option<&str>, ids: &[String]) -> DbResult<u64> {
        let acked_at = db_time(Utc::now());
        let mut tx = self.pool.begin().await?;
        let mut acked = 0;

        for id in ids {
            let result = sqlx::query(
                r#"
                UPDATE sync_commands SET acked_at = ?1, leased_until = NULL
                WHERE id = ?2
                  AND tenant_id = ?3
                  AND acked_at IS NULL
                  AND delivered_at IS NOT NULL
                  AND (?4 IS NULL OR leased_by = ?4)
                "#,
            )
            .bind(&acked_at)
            .bind(id)
            .bind(tenant_id)
            .bind(device_id)
            .execute(&mut *tx)
            .await?;
            acked += result.rows_affected();
        }

        tx.commit().await?;
        debug!(tenant_id = %tenant_id, requested = ids.len(), acked, "Commands acked");
        Ok(acked)
    }
}
