//! # Appointment Repository
//!
//! Conflict-checked booking of resource slots.
//!
//! ## Schedule Conflict Resolution
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  save(appt) is ONE statement, so check and write cannot interleave:    │
//! │                                                                         │
//! │  INSERT INTO appointments (...)                                        │
//! │  SELECT :values                                                        │
//! │  WHERE :status IN ('cancelled', 'no_show')                             │
//! │     OR NOT EXISTS (                                                    │
//! │          SELECT 1 FROM appointments a                                  │
//! │          WHERE a.resource_id = :resource AND a.id <> :id               │
//! │            AND a.active = 1                                            │
//! │            AND a.status NOT IN ('cancelled', 'no_show')                │
//! │            AND a.starts_at < :end AND a.ends_at > :start)              │
//! │  ON CONFLICT (tenant_id, id) DO UPDATE ... WHERE newer                 │
//! │                                                                         │
//! │  1 row  → Applied                                                      │
//! │  0 rows → stored row is newer  → Stale                                 │
//! │         → otherwise overlap    → ScheduleConflict                      │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! SQLite runs one writer at a time, so two overlapping bookings submitted
//! concurrently cannot both pass the `NOT EXISTS`.

use chrono::{DateTime, Utc};
use sqlx::{SqliteConnection, SqlitePool};
use std::sync::Arc;
use tracing::{debug, warn};
use vela_core::events::{AppointmentUpserted, EntityDeleted};
use vela_core::schedule::{self, Interval};
use vela_core::{Appointment, AppointmentStatus, CoreError, EventKind, OutboxEvent, SchemaValidator};

use crate::error::{DbError, DbResult};
use crate::repository::{db_time, enqueue_validated, tombstone_time};

const COLUMNS: &str =
    "tenant_id, id, resource_id, customer_id, starts_at, ends_at, status, active, updated_at, deleted_at";

/// Result of [`AppointmentRepository::save`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaveOutcome {
    Applied,
    /// A write with a later timestamp already holds the row.
    Stale,
}

#[derive(Debug, sqlx::FromRow)]
struct AppointmentRow {
    tenant_id: String,
    id: String,
    resource_id: String,
    customer_id: Option<String>,
    starts_at: i64,
    ends_at: i64,
    status: AppointmentStatus,
    active: bool,
    updated_at: DateTime<Utc>,
    deleted_at: Option<DateTime<Utc>>,
}

impl TryFrom<AppointmentRow> for Appointment {
    type Error = DbError;

    fn try_from(row: AppointmentRow) -> Result<Self, Self::Error> {
        let millis = |ms: i64| {
            DateTime::from_timestamp_millis(ms)
                .ok_or_else(|| DbError::Corrupt(format!("appointment {} has bad time {}", row.id, ms)))
        };
        Ok(Appointment {
            starts_at: millis(row.starts_at)?,
            ends_at: millis(row.ends_at)?,
            tenant_id: row.tenant_id,
            id: row.id,
            resource_id: row.resource_id,
            customer_id: row.customer_id,
            status: row.status,
            active: row.active,
            updated_at: row.updated_at,
            deleted_at: row.deleted_at,
        })
    }
}

/// Repository for appointments.
#[derive(Debug, Clone)]
pub struct AppointmentRepository {
    pool: SqlitePool,
    validator: Arc<SchemaValidator>,
}

impl AppointmentRepository {
    pub fn new(pool: SqlitePool, validator: Arc<SchemaValidator>) -> Self {
        AppointmentRepository { pool, validator }
    }

    /// Creates or updates an appointment stamped `at`.
    ///
    /// ## Errors
    /// * `DbError::Core(CoreError::ScheduleConflict)` - slot overlaps a
    ///   non-cancelled appointment on the same resource
    /// * `DbError::Core(CoreError::Validation)` - `end <= start`
    pub async fn save(
        &self,
        tenant_id: &str,
        appointment: &AppointmentUpserted,
        at: DateTime<Utc>,
    ) -> DbResult<SaveOutcome> {
        let mut tx = self.pool.begin().await?;
        let outcome = save_on(&mut tx, tenant_id, appointment, at).await?;
        tx.commit().await?;
        Ok(outcome)
    }

    /// Edge write: book now and enqueue `appointment.upserted.v1`.
    pub async fn save_with_event(&self, tenant_id: &str, appointment: &AppointmentUpserted) -> DbResult<OutboxEvent> {
        let payload = serde_json::to_value(appointment)?;
        let mut tx = self.pool.begin().await?;
        save_on(&mut tx, tenant_id, appointment, Utc::now()).await?;
        let event =
            enqueue_validated(&mut tx, &self.validator, tenant_id, EventKind::AppointmentUpserted, &payload).await?;
        tx.commit().await?;
        Ok(event)
    }

    /// Logical delete stamped `at`. A deleted appointment frees its slot.
    pub async fn soft_delete(&self, tenant_id: &str, id: &str, at: DateTime<Utc>) -> DbResult<()> {
        let mut conn = self.pool.acquire().await?;
        soft_delete_on(&mut conn, tenant_id, id, at).await
    }

    /// Edge write: soft delete now and enqueue `appointment.deleted.v1`.
    pub async fn delete_with_event(&self, tenant_id: &str, id: &str) -> DbResult<OutboxEvent> {
        let payload = serde_json::to_value(EntityDeleted { id: id.to_string() })?;
        let mut tx = self.pool.begin().await?;
        soft_delete_on(&mut tx, tenant_id, id, Utc::now()).await?;
        let event =
            enqueue_validated(&mut tx, &self.validator, tenant_id, EventKind::AppointmentDeleted, &payload).await?;
        tx.commit().await?;
        Ok(event)
    }

    pub async fn find(&self, tenant_id: &str, id: &str) -> DbResult<Option<Appointment>> {
        let sql = format!("SELECT {COLUMNS} FROM appointments WHERE tenant_id = ? AND id = ?");
        let row: Option<AppointmentRow> = sqlx::query_as(&sql)
            .bind(tenant_id)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(Appointment::try_from).transpose()
    }

    /// Active appointments of one resource, earliest first.
    pub async fn list_for_resource(&self, tenant_id: &str, resource_id: &str) -> DbResult<Vec<Appointment>> {
        let sql = format!(
            "SELECT {COLUMNS} FROM appointments
             WHERE tenant_id = ? AND resource_id = ? AND active = 1
             ORDER BY starts_at"
        );
        let rows: Vec<AppointmentRow> = sqlx::query_as(&sql)
            .bind(tenant_id)
            .bind(resource_id)
            .fetch_all(&self.pool)
            .await?;
        rows.into_iter().map(Appointment::try_from).collect()
    }

    /// Read-only availability check, for callers that want to ask before
    /// booking. `save` repeats the check atomically.
    pub async fn check_available(
        &self,
        tenant_id: &str,
        resource_id: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        exclude_id: Option<&str>,
    ) -> DbResult<()> {
        let candidate = Interval::new(start, end)?;
        let existing = self.list_for_resource(tenant_id, resource_id).await?;
        schedule::check_available(&existing, resource_id, candidate, exclude_id)?;
        Ok(())
    }
}

async fn save_on(
    conn: &mut SqliteConnection,
    tenant_id: &str,
    appointment: &AppointmentUpserted,
    at: DateTime<Utc>,
) -> DbResult<SaveOutcome> {
    let interval = Interval::new(appointment.start, appointment.end)?;
    let starts_at = interval.start.timestamp_millis();
    let ends_at = interval.end.timestamp_millis();
    let stamp = db_time(at);

    // The WHERE on the SELECT also keeps SQLite from reading ON CONFLICT as a join
    let result = sqlx::query(
        r#"
        INSERT INTO appointments
            (tenant_id, id, resource_id, customer_id, starts_at, ends_at, status, active, updated_at)
        SELECT ?1, ?2, ?3, ?4, ?5, ?6, ?7, 1, ?8
        WHERE ?7 IN ('cancelled', 'no_show')
           OR NOT EXISTS (
                SELECT 1 FROM appointments a
                WHERE a.tenant_id = ?1
                  AND a.resource_id = ?3
                  AND a.id <> ?2
                  AND a.active = 1
                  AND a.status NOT IN ('cancelled', 'no_show')
                  AND a.starts_at < ?6
                  AND a.ends_at > ?5
           )
        ON CONFLICT (tenant_id, id) DO UPDATE SET
            resource_id = excluded.resource_id,
            customer_id = excluded.customer_id,
            starts_at = excluded.starts_at,
            ends_at = excluded.ends_at,
            status = excluded.status,
            updated_at = excluded.updated_at,
            active = CASE
                WHEN appointments.deleted_at IS NOT NULL
                     AND appointments.deleted_at >= excluded.updated_at THEN 0
                ELSE 1
            END
        WHERE excluded.updated_at >= appointments.updated_at
        "#,
    )
    .bind(tenant_id)
    .bind(&appointment.id)
    .bind(&appointment.resource_id)
    .bind(&appointment.customer_id)
    .bind(starts_at)
    .bind(ends_at)
    .bind(appointment.status.as_str())
    .bind(&stamp)
    .execute(&mut *conn)
    .await?;

    if result.rows_affected() == 1 {
        debug!(tenant_id = %tenant_id, id = %appointment.id, "Appointment saved");
        return Ok(SaveOutcome::Applied);
    }

    let newer_exists: bool = sqlx::query_scalar(
        "SELECT EXISTS (SELECT 1 FROM appointments WHERE tenant_id = ? AND id = ? AND updated_at > ?)",
    )
    .bind(tenant_id)
    .bind(&appointment.id)
    .bind(&stamp)
    .fetch_one(&mut *conn)
    .await?;
    if newer_exists {
        debug!(tenant_id = %tenant_id, id = %appointment.id, "Stale appointment write ignored");
        return Ok(SaveOutcome::Stale);
    }

    let conflicting_id: Option<String> = sqlx::query_scalar(
        r#"
        SELECT id FROM appointments
        WHERE tenant_id = ?1
          AND resource_id = ?2
          AND id <> ?3
          AND active = 1
          AND status NOT IN ('cancelled', 'no_show')
          AND starts_at < ?5
          AND ends_at > ?4
        ORDER BY starts_at
        LIMIT 1
        "#,
    )
    .bind(tenant_id)
    .bind(&appointment.resource_id)
    .bind(&appointment.id)
    .bind(starts_at)
    .bind(ends_at)
    .fetch_optional(&mut *conn)
    .await?;

    match conflicting_id {
        Some(conflicting_id) => {
            warn!(
                tenant_id = %tenant_id,
                id = %appointment.id,
                resource_id = %appointment.resource_id,
                conflicting_id = %conflicting_id,
                "Appointment rejected: schedule conflict"
            );
            Err(CoreError::ScheduleConflict {
                resource_id: appointment.resource_id.clone(),
                conflicting_id,
            }
            .into())
        }
        None => Ok(SaveOutcome::Stale),
    }
}

async fn soft_delete_on(conn: &mut SqliteConnection, tenant_id: &str, id: &str, at: DateTime<Utc>) -> DbResult<()> {
    sqlx::query(
        r#"
        INSERT INTO appointments
            (tenant_id, id, resource_id, starts_at, ends_at, status, active, updated_at, deleted_at)
        VALUES (?1, ?2, '', 0, 1, 'cancelled', 0, ?3, ?4)
        ON CONFLICT (tenant_id, id) DO UPDATE SET
            deleted_at = CASE
                WHEN appointments.deleted_at IS NULL
                     OR excluded.deleted_at > appointments.deleted_at THEN excluded.deleted_at
                ELSE appointments.deleted_at
            END,
            active = CASE
                WHEN excluded.deleted_at >= appointments.updated_at THEN 0
                ELSE appointments.active
            END
        "#,
    )
    .bind(tenant_id)
    .bind(id)
    .bind(tombstone_time())
    .bind(db_time(at))
    .execute(&mut *conn)
    .await?;

    debug!(tenant_id = %tenant_id, id = %id, "Appointment soft-deleted");
    Ok(())
}
