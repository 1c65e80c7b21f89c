//! # License Repository
//!
//! Issued license tokens, one row per (tenant, device).
//!
//! Reissuing for the same device overwrites the row, so the table grows with
//! devices, not with activations. The previous token's `jti` is gone after a
//! reissue, which is how the guard recognises it as superseded.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use tracing::{debug, info};
use vela_core::protocol::LicenseInfo;

use crate::error::{DbError, DbResult};
use crate::repository::db_time;

/// A stored license.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct LicenseRecord {
    pub tenant_id: String,
    pub device_id: String,
    pub token: String,
    pub jti: String,
    pub plan_key: String,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub revoked_at: Option<DateTime<Utc>>,
}

impl LicenseRecord {
    /// Public metadata (no token).
    pub fn info(&self) -> LicenseInfo {
        LicenseInfo {
            tenant_id: self.tenant_id.clone(),
            device_id: self.device_id.clone(),
            plan: self.plan_key.clone(),
            jti: self.jti.clone(),
            issued_at: self.issued_at,
            expires_at: self.expires_at,
            revoked_at: self.revoked_at,
        }
    }
}

/// What the store knows about a presented token.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LicenseState {
    /// Latest token for its device and not revoked.
    Current,
    Revoked,
    /// A newer token was issued for the same device.
    Superseded,
    /// No record for the device (issued elsewhere or before a reset).
    Unknown,
}

const COLUMNS: &str = "tenant_id, device_id, token, jti, plan_key, issued_at, expires_at, revoked_at";

/// Repository for issued licenses.
#[derive(Debug, Clone)]
pub struct LicenseRepository {
    pool: SqlitePool,
}

impl LicenseRepository {
    pub fn new(pool: SqlitePool) -> Self {
        LicenseRepository { pool }
    }

    /// Stores a freshly issued license, replacing the device's previous one
    /// and clearing any revocation.
    pub async fn upsert(&self, record: &LicenseRecord) -> DbResult<()> {
        sqlx::query(
            r#"
            INSERT INTO licenses
                (tenant_id, device_id, token, jti, plan_key, issued_at, expires_at, revoked_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, NULL)
            ON CONFLICT (tenant_id, device_id) DO UPDATE SET
                token = excluded.token,
                jti = excluded.jti,
                plan_key = excluded.plan_key,
                issued_at = excluded.issued_at,
                expires_at = excluded.expires_at,
                revoked_at = NULL
            "#,
        )
        .bind(&record.tenant_id)
        .bind(&record.device_id)
        .bind(&record.token)
        .bind(&record.jti)
        .bind(&record.plan_key)
        .bind(db_time(record.issued_at))
        .bind(db_time(record.expires_at))
        .execute(&self.pool)
        .await?;

        debug!(tenant_id = %record.tenant_id, device_id = %record.device_id, "License stored");
        Ok(())
    }

    pub async fn find(&self, tenant_id: &str, device_id: &str) -> DbResult<Option<LicenseRecord>> {
        let sql = format!("SELECT {COLUMNS} FROM licenses WHERE tenant_id = ? AND device_id = ?");
        let record = sqlx::query_as::<_, LicenseRecord>(&sql)
            .bind(tenant_id)
            .bind(device_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(record)
    }

    /// Revokes the device's license. Revoking twice keeps the first time.
    ///
    /// ## Errors
    /// * `DbError::NotFound` - no license was ever issued for the device
    pub async fn revoke(&self, tenant_id: &str, device_id: &str) -> DbResult<LicenseRecord> {
        sqlx::query(
            r#"
            UPDATE licenses SET revoked_at = ?
            WHERE tenant_id = ? AND device_id = ? AND revoked_at IS NULL
            "#,
        )
        .bind(db_time(Utc::now()))
        .bind(tenant_id)
        .bind(device_id)
        .execute(&self.pool)
        .await?;

        let record = self
            .find(tenant_id, device_id)
            .await?
            .ok_or_else(|| DbError::not_found("License", format!("{tenant_id}/{device_id}")))?;
        info!(tenant_id = %tenant_id, device_id = %device_id, "License revoked");
        Ok(record)
    }

    /// Devices of the tenant holding an unrevoked, unexpired license.
    pub async fn count_active_devices(&self, tenant_id: &str, now: DateTime<Utc>) -> DbResult<i64> {
        let count: i64 = sqlx::query_scalar(
            r#"
            SELECT COUNT(*) FROM licenses
            WHERE tenant_id = ? AND revoked_at IS NULL AND expires_at > ?
            "#,
        )
        .bind(tenant_id)
        .bind(db_time(now))
        .fetch_one(&self.pool)
        .await?;
        Ok(count)
    }

    /// Classifies a presented token by its device and `jti`.
    pub async fn state(&self, tenant_id: &str, device_id: &str, jti: &str) -> DbResult<LicenseState> {
        let state = match self.find(tenant_id, device_id).await? {
            None => LicenseState::Unknown,
            Some(record) if record.revoked_at.is_some() => LicenseState::Revoked,
            Some(record) if record.jti != jti => LicenseState::Superseded,
            Some(_) => LicenseState::Current,
        };
        Ok(state)
    }
}
