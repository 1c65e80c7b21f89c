//! # Tenant Repository
//!
//! Tenants, plans, subscriptions and the legacy entitlement table, plus the
//! plan resolution used when a license is issued.
//!
//! ## Plan Resolution
//! ```text
//! resolve_plan(tenant)
//!      │
//!      ├── live subscription (active | trialing) ──► its plan
//!      │
//!      ├── tenant_entitlements row               ──► legacy plan
//!      │
//!      └── nothing                               ──► provision_default
//!                                                     (tenant + starter plan
//!                                                      + active subscription)
//! ```
//! Activation never fails for lack of setup data.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use std::collections::BTreeMap;
use std::fmt;
use tracing::{debug, info};
use uuid::Uuid;
use vela_core::DEFAULT_PLAN_KEY;

use crate::error::{DbError, DbResult};
use crate::repository::db_time;

/// Grace period used when a plan row does not say otherwise.
pub const DEFAULT_GRACE_DAYS: i64 = 7;

// =============================================================================
// Types
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionStatus {
    Trialing,
    Active,
    PastDue,
    Cancelled,
    Expired,
}

impl SubscriptionStatus {
    pub const fn as_str(&self) -> &'static str {
        match self {
            SubscriptionStatus::Trialing => "trialing",
            SubscriptionStatus::Active => "active",
            SubscriptionStatus::PastDue => "past_due",
            SubscriptionStatus::Cancelled => "cancelled",
            SubscriptionStatus::Expired => "expired",
        }
    }
}

impl fmt::Display for SubscriptionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A sellable plan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Plan {
    pub id: String,
    pub key: String,
    pub name: String,
    /// `{ "<entitlement>": true | <limit> }`
    pub entitlements: BTreeMap<String, serde_json::Value>,
    pub max_seats: i64,
    pub max_devices: i64,
    pub grace_days: i64,
    pub created_at: DateTime<Utc>,
}

/// Input for [`TenantRepository::create_plan`].
#[derive(Debug, Clone)]
pub struct NewPlan {
    pub key: String,
    pub name: String,
    pub entitlements: BTreeMap<String, serde_json::Value>,
    pub max_seats: i64,
    pub max_devices: i64,
    pub grace_days: i64,
}

impl NewPlan {
    /// The plan auto-provisioned for tenants with no setup data.
    pub fn starter() -> Self {
        NewPlan {
            key: DEFAULT_PLAN_KEY.to_string(),
            name: "Starter".to_string(),
            entitlements: BTreeMap::from([
                ("pos".to_string(), serde_json::Value::Bool(true)),
                ("sync".to_string(), serde_json::Value::Bool(true)),
            ]),
            max_seats: 5,
            max_devices: 3,
            grace_days: DEFAULT_GRACE_DAYS,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Subscription {
    pub id: String,
    pub tenant_id: String,
    pub plan_id: String,
    pub status: SubscriptionStatus,
    pub current_period_end: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Entitlements recorded before subscriptions existed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LegacyEntitlements {
    pub tenant_id: String,
    pub plan_key: String,
    pub entitlements: BTreeMap<String, serde_json::Value>,
    pub max_seats: i64,
    pub max_devices: i64,
    pub expires_at: Option<DateTime<Utc>>,
}

/// Where a [`ResolvedPlan`] came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlanSource {
    Subscription,
    Legacy,
    Provisioned,
}

/// Everything license issuance needs to know about a tenant's plan.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedPlan {
    pub source: PlanSource,
    pub plan_key: String,
    pub plan_id: Option<String>,
    pub entitlements: BTreeMap<String, serde_json::Value>,
    pub max_seats: i64,
    pub max_devices: i64,
    pub grace_days: i64,
    /// End of the paid period or legacy expiry. `None` means the license
    /// TTL alone governs.
    pub expires_at: Option<DateTime<Utc>>,
}

#[derive(sqlx::FromRow)]
struct PlanRow {
    id: String,
    key: String,
    name: String,
    entitlements: String,
    max_seats: i64,
    max_devices: i64,
    grace_days: i64,
    created_at: DateTime<Utc>,
}

impl TryFrom<PlanRow> for Plan {
    type Error = DbError;

    fn try_from(row: PlanRow) -> Result<Self, Self::Error> {
        Ok(Plan {
            entitlements: parse_entitlements(&row.entitlements)?,
            id: row.id,
            key: row.key,
            name: row.name,
            max_seats: row.max_seats,
            max_devices: row.max_devices,
            grace_days: row.grace_days,
            created_at: row.created_at,
        })
    }
}

#[derive(sqlx::FromRow)]
struct LegacyRow {
    tenant_id: String,
    plan_key: String,
    entitlements: String,
    max_seats: i64,
    max_devices: i64,
    expires_at: Option<DateTime<Utc>>,
}

fn parse_entitlements(text: &str) -> DbResult<BTreeMap<String, serde_json::Value>> {
    serde_json::from_str(text).map_err(|e| DbError::Corrupt(format!("entitlements: {e}")))
}

const PLAN_COLUMNS: &str = "id, key, name, entitlements, max_seats, max_devices, grace_days, created_at";

// =============================================================================
// Repository
// =============================================================================

/// Repository for tenants and their plans.
#[derive(Debug, Clone)]
pub struct TenantRepository {
    pool: SqlitePool,
}

impl TenantRepository {
    pub fn new(pool: SqlitePool) -> Self {
        TenantRepository { pool }
    }

    /// Creates the tenant if it does not exist yet.
    pub async fn ensure_tenant(&self, id: &str, name: &str) -> DbResult<()> {
        sqlx::query("INSERT INTO tenants (id, name, created_at) VALUES (?, ?, ?) ON CONFLICT (id) DO NOTHING")
            .bind(id)
            .bind(name)
            .bind(db_time(Utc::now()))
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Creates a plan.
    ///
    /// ## Errors
    /// * `DbError::UniqueViolation` - a plan with this key exists
    pub async fn create_plan(&self, plan: &NewPlan) -> DbResult<Plan> {
        let id = Uuid::new_v4().to_string();
        sqlx::query(
            r#"
            INSERT INTO plans (id, key, name, entitlements, max_seats, max_devices, grace_days, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&id)
        .bind(&plan.key)
        .bind(&plan.name)
        .bind(serde_json::to_string(&plan.entitlements)?)
        .bind(plan.max_seats)
        .bind(plan.max_devices)
        .bind(plan.grace_days)
        .bind(db_time(Utc::now()))
        .execute(&self.pool)
        .await
        .map_err(|e| match DbError::from(e) {
            DbError::UniqueViolation { .. } => DbError::duplicate("plan key", &plan.key),
            other => other,
        })?;

        info!(key = %plan.key, "Plan created");
        self.find_plan_by_key(&plan.key)
            .await?
            .ok_or_else(|| DbError::not_found("Plan", &plan.key))
    }

    pub async fn find_plan_by_key(&self, key: &str) -> DbResult<Option<Plan>> {
        let sql = format!("SELECT {PLAN_COLUMNS} FROM plans WHERE key = ?");
        let row: Option<PlanRow> = sqlx::query_as(&sql).bind(key).fetch_optional(&self.pool).await?;
        row.map(Plan::try_from).transpose()
    }

    /// Starts a subscription.
    ///
    /// ## Errors
    /// * `DbError::UniqueViolation` - the tenant already has a live one
    pub async fn create_subscription(
        &self,
        tenant_id: &str,
        plan_id: &str,
        status: SubscriptionStatus,
        current_period_end: Option<DateTime<Utc>>,
    ) -> DbResult<Subscription> {
        let now = db_time(Utc::now());
        let id = Uuid::new_v4().to_string();
        sqlx::query(
            r#"
            INSERT INTO subscriptions
                (id, tenant_id, plan_id, status, current_period_end, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&id)
        .bind(tenant_id)
        .bind(plan_id)
        .bind(status.as_str())
        .bind(current_period_end.map(db_time))
        .bind(&now)
        .bind(&now)
        .execute(&self.pool)
        .await
        .map_err(|e| match DbError::from(e) {
            DbError::UniqueViolation { .. } => DbError::duplicate("live subscription", tenant_id),
            other => other,
        })?;

        let subscription = sqlx::query_as::<_, Subscription>(
            r#"
            SELECT id, tenant_id, plan_id, status, current_period_end, created_at, updated_at
            FROM subscriptions WHERE id = ?
            "#,
        )
        .bind(&id)
        .fetch_one(&self.pool)
        .await?;
        Ok(subscription)
    }

    /// The tenant's live (active or trialing) subscription with its plan.
    pub async fn active_subscription(&self, tenant_id: &str) -> DbResult<Option<(Subscription, Plan)>> {
        let subscription = sqlx::query_as::<_, Subscription>(
            r#"
            SELECT id, tenant_id, plan_id, status, current_period_end, created_at, updated_at
            FROM subscriptions
            WHERE tenant_id = ? AND status IN ('active', 'trialing')
            ORDER BY created_at DESC
            LIMIT 1
            "#,
        )
        .bind(tenant_id)
        .fetch_optional(&self.pool)
        .await?;

        let Some(subscription) = subscription else {
            return Ok(None);
        };

        let sql = format!("SELECT {PLAN_COLUMNS} FROM plans WHERE id = ?");
        let plan: PlanRow = sqlx::query_as(&sql)
            .bind(&subscription.plan_id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| DbError::not_found("Plan", &subscription.plan_id))?;

        Ok(Some((subscription, plan.try_into()?)))
    }

    pub async fn upsert_legacy_entitlements(&self, legacy: &LegacyEntitlements) -> DbResult<()> {
        sqlx::query(
            r#"
            INSERT INTO tenant_entitlements
                (tenant_id, plan_key, entitlements, max_seats, max_devices, expires_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT (tenant_id) DO UPDATE SET
                plan_key = excluded.plan_key,
                entitlements = excluded.entitlements,
                max_seats = excluded.max_seats,
                max_devices = excluded.max_devices,
                expires_at = excluded.expires_at,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(&legacy.tenant_id)
        .bind(&legacy.plan_key)
        .bind(serde_json::to_string(&legacy.entitlements)?)
        .bind(legacy.max_seats)
        .bind(legacy.max_devices)
        .bind(legacy.expires_at.map(db_time))
        .bind(db_time(Utc::now()))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn legacy_entitlements(&self, tenant_id: &str) -> DbResult<Option<LegacyEntitlements>> {
        let row: Option<LegacyRow> = sqlx::query_as(
            r#"
            SELECT tenant_id, plan_key, entitlements, max_seats, max_devices, expires_at
            FROM tenant_entitlements
            WHERE tenant_id = ?
            "#,
        )
        .bind(tenant_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(|row| {
            Ok(LegacyEntitlements {
                entitlements: parse_entitlements(&row.entitlements)?,
                tenant_id: row.tenant_id,
                plan_key: row.plan_key,
                max_seats: row.max_seats,
                max_devices: row.max_devices,
                expires_at: row.expires_at,
            })
        })
        .transpose()
    }

    /// Resolves the plan that governs a tenant's licenses.
    ///
    /// Falls back from subscription to legacy entitlements to a freshly
    /// provisioned starter plan.
    pub async fn resolve_plan(&self, tenant_id: &str) -> DbResult<ResolvedPlan> {
        if let Some((subscription, plan)) = self.active_subscription(tenant_id).await? {
            debug!(tenant_id = %tenant_id, plan = %plan.key, "Plan resolved from subscription");
            return Ok(from_subscription(subscription, plan));
        }

        if let Some(legacy) = self.legacy_entitlements(tenant_id).await? {
            debug!(tenant_id = %tenant_id, plan = %legacy.plan_key, "Plan resolved from legacy entitlements");
            let grace_days = self
                .find_plan_by_key(&legacy.plan_key)
                .await?
                .map(|plan| plan.grace_days)
                .unwrap_or(DEFAULT_GRACE_DAYS);
            return Ok(ResolvedPlan {
                source: PlanSource::Legacy,
                plan_key: legacy.plan_key,
                plan_id: None,
                entitlements: legacy.entitlements,
                max_seats: legacy.max_seats,
                max_devices: legacy.max_devices,
                grace_days,
                expires_at: legacy.expires_at,
            });
        }

        self.provision_default(tenant_id).await
    }

    /// Creates the tenant, the starter plan and an active subscription.
    ///
    /// Safe under concurrent activations: every insert yields to an
    /// existing row.
    pub async fn provision_default(&self, tenant_id: &str) -> DbResult<ResolvedPlan> {
        let starter = NewPlan::starter();
        let now = db_time(Utc::now());
        let mut tx = self.pool.begin().await?;

        sqlx::query("INSERT INTO tenants (id, name, created_at) VALUES (?, ?, ?) ON CONFLICT (id) DO NOTHING")
            .bind(tenant_id)
            .bind(tenant_id)
            .bind(&now)
            .execute(&mut *tx)
            .await?;

        sqlx::query(
            r#"
            INSERT INTO plans (id, key, name, entitlements, max_seats, max_devices, grace_days, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT (key) DO NOTHING
            "#,
        )
        .bind(Uuid::new_v4().to_string())
        .bind(&starter.key)
        .bind(&starter.name)
        .bind(serde_json::to_string(&starter.entitlements)?)
        .bind(starter.max_seats)
        .bind(starter.max_devices)
        .bind(starter.grace_days)
        .bind(&now)
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r#"
            INSERT INTO subscriptions
                (id, tenant_id, plan_id, status, current_period_end, created_at, updated_at)
            SELECT ?, ?, id, 'active', NULL, ?, ? FROM plans WHERE key = ?
            ON CONFLICT (tenant_id) WHERE status IN ('active', 'trialing') DO NOTHING
            "#,
        )
        .bind(Uuid::new_v4().to_string())
        .bind(tenant_id)
        .bind(&now)
        .bind(&now)
        .bind(&starter.key)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        info!(tenant_id = %tenant_id, plan = %starter.key, "Provisioned default plan");

        let (subscription, plan) = self
            .active_subscription(tenant_id)
            .await?
            .ok_or_else(|| DbError::not_found("Subscription", tenant_id))?;
        Ok(ResolvedPlan {
            source: PlanSource::Provisioned,
            ..from_subscription(subscription, plan)
        })
    }
}

fn from_subscription(subscription: Subscription, plan: Plan) -> ResolvedPlan {
    ResolvedPlan {
        source: PlanSource::Subscription,
        plan_key: plan.key,
        plan_id: Some(plan.id),
        entitlements: plan.entitlements,
        max_seats: plan.max_seats,
        max_devices: plan.max_devices,
        grace_days: plan.grace_days,
        expires_at: subscription.current_period_end,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Database, DbConfig};
    use chrono::Duration;

    fn pro_plan() -> NewPlan {
        NewPlan {
            key: "pro".to_string(),
            name: "Pro".to_string(),
            entitlements: BTreeMap::from([("appointments".to_string(), serde_json::json!(true))]),
            max_seats: 20,
            max_devices: 10,
            grace_days: 14,
        }
    }

    #[tokio::test]
    async fn test_subscription_plan_wins() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let repo = db.tenants();
        repo.ensure_tenant("t1", "Acme").await.unwrap();
        let plan = repo.create_plan(&pro_plan()).await.unwrap();
        let period_end = Utc::now() + Duration::days(20);
        repo.create_subscription("t1", &plan.id, SubscriptionStatus::Active, Some(period_end))
            .await
            .unwrap();

        let resolved = repo.resolve_plan("t1").await.unwrap();
        assert_eq!(resolved.source, PlanSource::Subscription);
        assert_eq!(resolved.plan_key, "pro");
        assert_eq!(resolved.plan_id, Some(plan.id));
        assert_eq!(resolved.max_devices, 10);
        assert_eq!(resolved.grace_days, 14);
        assert!(resolved.expires_at.is_some());
    }

    #[tokio::test]
    async fn test_legacy_entitlements_fallback() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let repo = db.tenants();
        repo.upsert_legacy_entitlements(&LegacyEntitlements {
            tenant_id: "t1".to_string(),
            plan_key: "legacy-gold".to_string(),
            entitlements: BTreeMap::from([("pos".to_string(), serde_json::json!(true))]),
            max_seats: 2,
            max_devices: 2,
            expires_at: None,
        })
        .await
        .unwrap();

        let resolved = repo.resolve_plan("t1").await.unwrap();
        assert_eq!(resolved.source, PlanSource::Legacy);
        assert_eq!(resolved.plan_key, "legacy-gold");
        assert_eq!(resolved.plan_id, None);
        assert_eq!(resolved.grace_days, DEFAULT_GRACE_DAYS);
    }

    #[tokio::test]
    async fn test_unknown_tenant_is_provisioned_once() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let repo = db.tenants();

        let first = repo.resolve_plan("fresh").await.unwrap();
        assert_eq!(first.source, PlanSource::Provisioned);
        assert_eq!(first.plan_key, DEFAULT_PLAN_KEY);
        assert_eq!(first.max_devices, 3);

        // Second call finds the subscription it created
        let second = repo.resolve_plan("fresh").await.unwrap();
        assert_eq!(second.source, PlanSource::Subscription);
        assert_eq!(second.plan_id, first.plan_id);
    }

    #[tokio::test]
    async fn test_duplicate_plan_key_and_live_subscription() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let repo = db.tenants();
        repo.ensure_tenant("t1", "Acme").await.unwrap();
        let plan = repo.create_plan(&pro_plan()).await.unwrap();

        assert!(matches!(
            repo.create_plan(&pro_plan()).await,
            Err(DbError::UniqueViolation { .. })
        ));

        repo.create_subscription("t1", &plan.id, SubscriptionStatus::Trialing, None)
            .await
            .unwrap();
        assert!(matches!(
            repo.create_subscription("t1", &plan.id, SubscriptionStatus::Active, None).await,
            Err(DbError::UniqueViolation { .. })
        ));
        // Ended subscriptions do not count
        repo.create_subscription("t1", &plan.id, SubscriptionStatus::Expired, None)
            .await
            .unwrap();
    }
}
