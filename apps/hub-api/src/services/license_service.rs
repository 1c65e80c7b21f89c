//! License issuance and lifecycle.
//!
//! ## Issuance
//! ```text
//! activate(tenant, device, proof)
//!    │
//!    ├─► admit: operator identity                → may replace
//!    │          device's own current token       → may replace
//!    │          tenant enrollment key            → new or lapsed devices only
//!    │          nothing (open enrollment, no key) → new or lapsed devices only
//!    ├─► resolve plan: subscription → legacy entitlements → provision starter
//!    ├─► device limit: active devices < maxDevices (reissue always allowed)
//!    ├─► exp = min(now + ttl, plan end)
//!    ├─► sign RS256 { tenantId, deviceId, plan, entitlements, ..., jti }
//!    └─► upsert (tenant, device) ── supersedes the previous token
//! ```

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use tracing::info;
use uuid::Uuid;

use vela_core::protocol::{ActivateResponse, LicenseInfo};
use vela_core::validation::{validate_device_id, validate_tenant_id};
use vela_core::LicenseClaims;
use vela_db::{Database, LicenseRecord, LicenseState};

use crate::auth::AuthFailure;
use crate::config::LicenseConfig;
use crate::error::{ApiError, ApiResult};
use crate::keys::LicenseKeys;

/// Credentials presented with an activation.
#[derive(Debug, Clone, Default)]
pub struct ActivationProof {
    /// Verified claims of a license token sent with the request.
    pub renewal: Option<LicenseClaims>,
    /// An operator authenticated against the identity provider.
    pub operator: bool,
    pub enrollment_key: Option<String>,
}

impl ActivationProof {
    pub fn anonymous() -> Self {
        Self::default()
    }

    pub fn operator() -> Self {
        ActivationProof {
            operator: true,
            ..Self::default()
        }
    }

    pub fn renewal(claims: LicenseClaims) -> Self {
        ActivationProof {
            renewal: Some(claims),
            ..Self::default()
        }
    }

    pub fn enrollment_key(key: impl Into<String>) -> Self {
        ActivationProof {
            enrollment_key: Some(key.into()),
            ..Self::default()
        }
    }

    fn kind(&self) -> &'static str {
        if self.operator {
            "operator"
        } else if self.renewal.is_some() {
            "renewal"
        } else if self.enrollment_key.is_some() {
            "enrollment_key"
        } else {
            "anonymous"
        }
    }
}

/// Issues, revokes and describes device licenses.
#[derive(Debug, Clone)]
pub struct LicenseService {
    db: Database,
    keys: Arc<LicenseKeys>,
    config: LicenseConfig,
    open_enrollment: bool,
}

impl LicenseService {
    pub fn new(db: Database, keys: Arc<LicenseKeys>, config: LicenseConfig) -> Self {
        LicenseService {
            db,
            keys,
            config,
            open_enrollment: false,
        }
    }

    /// Lets devices of tenants without an enrollment key activate with no
    /// credential at all.
    pub fn open_enrollment(mut self, open: bool) -> Self {
        self.open_enrollment = open;
        self
    }

    /// Issues a license for `device_id`, replacing any earlier one when
    /// `proof` allows it.
    ///
    /// ## Errors
    /// * `ApiError::Validation` - malformed ids
    /// * `ApiError::Unauthorized` - no acceptable proof
    /// * `ApiError::Conflict` - the device already holds an active license the
    ///   proof cannot replace, or the plan's device limit is reached
    /// * `ApiError::Forbidden` - the plan has already ended
    pub async fn activate(&self, tenant_id: &str, device_id: &str, proof: ActivationProof) -> ApiResult<ActivateResponse> {
        self.activate_at(tenant_id, device_id, &proof, Utc::now()).await
    }

    async fn activate_at(
        &self,
        tenant_id: &str,
        device_id: &str,
        proof: &ActivationProof,
        now: DateTime<Utc>,
    ) -> ApiResult<ActivateResponse> {
        validate_tenant_id(tenant_id)?;
        validate_device_id(device_id)?;

        let licenses = self.db.licenses();
        let holds_active = licenses
            .find(tenant_id, device_id)
            .await?
            .is_some_and(|r| r.revoked_at.is_none() && r.expires_at > now);
        self.admit(tenant_id, device_id, proof, holds_active).await?;

        let plan = self.db.tenants().resolve_plan(tenant_id).await?;

        if plan.max_devices > 0 {
            let active = licenses.count_active_devices(tenant_id, now).await?;
            if !holds_active && active >= plan.max_devices {
                return Err(ApiError::Conflict(format!(
                    "device limit of {} reached for plan {}",
                    plan.max_devices, plan.plan_key
                )));
            }
        }

        let ttl_end = now + Duration::days(self.config.default_ttl_days);
        let expires_at = plan.expires_at.map_or(ttl_end, |end| end.min(ttl_end));
        if expires_at <= now {
            return Err(ApiError::Forbidden(format!("plan {} has ended", plan.plan_key)));
        }

        let grace_days = if plan.grace_days > 0 {
            plan.grace_days
        } else {
            self.config.grace_days
        };

        let claims = LicenseClaims {
            iss: self.config.issuer.clone(),
            sub: device_id.to_string(),
            tenant_id: tenant_id.to_string(),
            device_id: device_id.to_string(),
            plan: plan.plan_key.clone(),
            plan_id: plan.plan_id.clone(),
            entitlements: plan.entitlements.clone(),
            max_seats: plan.max_seats,
            max_devices: plan.max_devices,
            grace_days,
            iat: now.timestamp(),
            exp: expires_at.timestamp(),
            jti: Uuid::new_v4().to_string(),
        };
        let token = self.keys.sign(&claims)?;

        licenses
            .upsert(&LicenseRecord {
                tenant_id: tenant_id.to_string(),
                device_id: device_id.to_string(),
                token: token.clone(),
                jti: claims.jti.clone(),
                plan_key: plan.plan_key.clone(),
                issued_at: now,
                expires_at,
                revoked_at: None,
            })
            .await?;

        info!(
            tenant_id = %tenant_id,
            device_id = %device_id,
            plan = %plan.plan_key,
            source = ?plan.source,
            proof = proof.kind(),
            expires_at = %expires_at,
            "License issued"
        );

        Ok(ActivateResponse {
            token,
            expires_at,
            plan: plan.plan_key,
            plan_id: plan.plan_id,
            entitlements: plan.entitlements,
            max_seats: plan.max_seats,
            max_devices: plan.max_devices,
            grace_days,
        })
    }

    /// Checks `proof` against the device's current license.
    async fn admit(&self, tenant_id: &str, device_id: &str, proof: &ActivationProof, holds_active: bool) -> ApiResult<()> {
        if proof.operator {
            return Ok(());
        }

        let mut refused_renewal = None;
        if let Some(claims) = &proof.renewal {
            match self.renewal_failure(tenant_id, device_id, claims).await? {
                None => return Ok(()),
                Some(failure) => refused_renewal = Some(ApiError::license(failure)),
            }
        }

        if let Some(key) = &proof.enrollment_key {
            if !self.db.enrollment().verify(tenant_id, key).await? {
                return Err(ApiError::activation(AuthFailure::BadEnrollmentKey));
            }
            return refuse_takeover(device_id, holds_active);
        }

        if let Some(refused) = refused_renewal {
            return Err(refused);
        }

        if self.open_enrollment && !self.db.enrollment().has_key(tenant_id).await? {
            return refuse_takeover(device_id, holds_active);
        }
        Err(ApiError::activation(AuthFailure::Missing))
    }

    /// Why `claims` cannot renew (tenant, device), or `None` when they can.
    async fn renewal_failure(
        &self,
        tenant_id: &str,
        device_id: &str,
        claims: &LicenseClaims,
    ) -> ApiResult<Option<AuthFailure>> {
        if claims.tenant_id != tenant_id || claims.device_id != device_id {
            return Ok(Some(AuthFailure::WrongDevice));
        }
        let failure = match self.db.licenses().state(tenant_id, device_id, &claims.jti).await? {
            LicenseState::Current => None,
            LicenseState::Revoked => Some(AuthFailure::Revoked),
            // Unknown: replaced, or never issued by this hub
            LicenseState::Superseded | LicenseState::Unknown => Some(AuthFailure::Superseded),
        };
        Ok(failure)
    }

    pub async fn revoke(&self, tenant_id: &str, device_id: &str) -> ApiResult<LicenseInfo> {
        validate_tenant_id(tenant_id)?;
        validate_device_id(device_id)?;
        Ok(self.db.licenses().revoke(tenant_id, device_id).await?.info())
    }

    pub async fn info(&self, tenant_id: &str, device_id: &str) -> ApiResult<LicenseInfo> {
        self.db
            .licenses()
            .find(tenant_id, device_id)
            .await?
            .map(|record| record.info())
            .ok_or_else(|| ApiError::NotFound(format!("license {tenant_id}/{device_id}")))
    }
}

fn refuse_takeover(device_id: &str, holds_active: bool) -> ApiResult<()> {
    if holds_active {
        return Err(ApiError::Conflict(format!(
            "device {device_id} already holds an active license; renew with its token"
        )));
    }
    Ok(())
}
