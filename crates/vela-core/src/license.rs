//! # License Claims
//!
//! Claim sets carried by license tokens (issued by the hub) and identity
//! tokens (issued by an external identity provider).
//!
//! ## License Token Anatomy
//! ```text
//! header  { alg: RS256, kid: "vela-license-1", typ: JWT }
//! claims  {
//!   iss: "vela-hub", sub: "<deviceId>",
//!   tenantId, deviceId, plan, planId?,
//!   entitlements: { "appointments": true, "max_products": 500 },
//!   maxSeats, maxDevices, graceDays,
//!   iat, exp, jti
//! }
//! ```
//!
//! Signing and verification live in the hub. This module only holds the
//! shapes and the checks that do not need a key.

use chrono::{DateTime, Duration, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use ts_rs::TS;

use crate::error::{CoreResult, ValidationError};

// =============================================================================
// License Claims
// =============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub struct LicenseClaims {
    pub iss: String,
    pub sub: String,
    /// Immutable for the token's lifetime.
    #[serde(default)]
    pub tenant_id: String,
    #[serde(default)]
    pub device_id: String,
    /// Plan key, e.g. `starter`.
    #[serde(default)]
    pub plan: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plan_id: Option<String>,
    #[serde(default)]
    #[ts(type = "Record<string, unknown>")]
    pub entitlements: BTreeMap<String, serde_json::Value>,
    #[serde(default)]
    pub max_seats: i64,
    #[serde(default)]
    pub max_devices: i64,
    #[serde(default)]
    pub grace_days: i64,
    /// Issued-at, seconds since epoch.
    pub iat: i64,
    /// Expiry, seconds since epoch.
    pub exp: i64,
    /// Unique per issuance. A reissue for the same device changes it.
    pub jti: String,
}

impl LicenseClaims {
    /// Rejects claim sets missing the fields every guard depends on.
    pub fn ensure_complete(&self) -> CoreResult<()> {
        if self.tenant_id.trim().is_empty() {
            return Err(ValidationError::Required {
                field: "tenantId".to_string(),
            }
            .into());
        }
        if self.plan.trim().is_empty() {
            return Err(ValidationError::Required {
                field: "plan".to_string(),
            }
            .into());
        }
        Ok(())
    }

    /// Entitlement check: `true` flags or positive numeric limits count.
    pub fn has_entitlement(&self, name: &str) -> bool {
        match self.entitlements.get(name) {
            Some(serde_json::Value::Bool(flag)) => *flag,
            Some(serde_json::Value::Number(n)) => n.as_f64().is_some_and(|v| v > 0.0),
            Some(serde_json::Value::String(s)) => !s.is_empty(),
            _ => false,
        }
    }

    /// Numeric entitlement limit, if the plan sets one.
    pub fn entitlement_limit(&self, name: &str) -> Option<i64> {
        self.entitlements.get(name).and_then(|v| v.as_i64())
    }

    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        Utc.timestamp_opt(self.exp, 0).single()
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now.timestamp() >= self.exp
    }

    /// Soft-expiry: still usable for `grace_days` after `exp`.
    pub fn within_grace(&self, now: DateTime<Utc>) -> bool {
        if !self.is_expired(now) {
            return true;
        }
        let grace_end = self.exp + Duration::days(self.grace_days.max(0)).num_seconds();
        now.timestamp() < grace_end
    }
}

// =============================================================================
// Identity Claims
// =============================================================================

/// `aud` may be a single string or a list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Audience {
    One(String),
    Many(Vec<String>),
}

impl Audience {
    pub fn contains(&self, audience: &str) -> bool {
        match self {
            Audience::One(a) => a == audience,
            Audience::Many(list) => list.iter().any(|a| a == audience),
        }
    }
}

/// Validated external identity, request-scoped and never persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IdentityClaims {
    pub sub: String,
    pub iss: String,
    #[serde(default)]
    pub aud: Option<Audience>,
    pub exp: i64,
    /// Tenant hint used by tenant scoping.
    #[serde(default, alias = "tenantId")]
    pub tenant_id: Option<String>,
}
