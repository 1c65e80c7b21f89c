//! # Enrollment Key Repository
//!
//! One provisioning secret per tenant. A device that has never been licensed
//! proves it belongs to the tenant by presenting it on activation.
//!
//! Only the argon2 PHC string is stored; the key itself never touches disk.

use argon2::password_hash::rand_core::OsRng;
use argon2::password_hash::SaltString;
use argon2::{Argon2, PasswordHash, PasswordHasher, PasswordVerifier};
use chrono::Utc;
use sqlx::SqlitePool;
use tracing::{debug, info, warn};
use vela_core::ValidationError;

use crate::error::{DbError, DbResult};
use crate::repository::db_time;

/// Shortest key accepted by [`EnrollmentRepository::set_key`].
pub const MIN_KEY_LEN: usize = 16;

/// Repository for per-tenant enrollment keys.
#[derive(Debug, Clone)]
pub struct EnrollmentRepository {
    pool: SqlitePool,
}

impl EnrollmentRepository {
    pub fn new(pool: SqlitePool) -> Self {
        EnrollmentRepository { pool }
    }

    /// Sets or rotates the tenant's key. The previous key stops working.
    pub async fn set_key(&self, tenant_id: &str, key: &str) -> DbResult<()> {
        if key.chars().count() < MIN_KEY_LEN {
            return Err(DbError::Core(
                ValidationError::InvalidFormat {
                    field: "key".to_string(),
                    reason: format!("must be at least {MIN_KEY_LEN} characters"),
                }
                .into(),
            ));
        }

        let key_hash = hash_key(key)?;
        let now = db_time(Utc::now());
        sqlx::query(
            r#"
            INSERT INTO enrollment_keys (tenant_id, key_hash, created_at, updated_at)
            VALUES (?1, ?2, ?3, ?3)
            ON CONFLICT (tenant_id) DO UPDATE SET
                key_hash = excluded.key_hash,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(tenant_id)
        .bind(&key_hash)
        .bind(&now)
        .execute(&self.pool)
        .await?;

        info!(tenant_id = %tenant_id, "Enrollment key set");
        Ok(())
    }

    pub async fn has_key(&self, tenant_id: &str) -> DbResult<bool> {
        Ok(self.stored_hash(tenant_id).await?.is_some())
    }

    /// True when `key` matches the tenant's key. A tenant without a key
    /// accepts nothing.
    pub async fn verify(&self, tenant_id: &str, key: &str) -> DbResult<bool> {
        let Some(stored) = self.stored_hash(tenant_id).await? else {
            debug!(tenant_id = %tenant_id, "No enrollment key for tenant");
            return Ok(false);
        };

        let parsed = match PasswordHash::new(&stored) {
            Ok(parsed) => parsed,
            Err(e) => {
                warn!(tenant_id = %tenant_id, error = %e, "Stored enrollment key hash is unreadable");
                return Ok(false);
            }
        };
        Ok(Argon2::default().verify_password(key.as_bytes(), &parsed).is_ok())
    }

    pub async fn remove(&self, tenant_id: &str) -> DbResult<bool> {
        let result = sqlx::query("DELETE FROM enrollment_keys WHERE tenant_id = ?")
            .bind(tenant_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn stored_hash(&self, tenant_id: &str) -> DbResult<Option<String>> {
        Ok(
            sqlx::query_scalar("SELECT key_hash FROM enrollment_keys WHERE tenant_id = ?")
                .bind(tenant_id)
                .fetch_optional(&self.pool)
                .await?,
        )
    }
}

fn hash_key(key: &str) -> DbResult<String> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(key.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| DbError::Internal(format!("failed to hash enrollment key: {e}")))
}
