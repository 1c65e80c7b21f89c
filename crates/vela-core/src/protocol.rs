//! # Wire Protocol
//!
//! JSON bodies exchanged between the edge agent and the hub. Both sides
//! compile against these types, so a field rename breaks the build, not
//! production.
//!
//! ## Push Exchange
//! ```text
//!  Edge                                              Hub
//!   │  POST /tenants/{id}/sync/events                 │
//!   │  x-license-token: <jwt>                         │
//!   │  { events: [{id, aggregate, type,               │
//!   │              payload, occurredAt}] }            │
//!   │ ──────────────────────────────────────────────► │
//!   │                                                 │ per-event ingest
//!   │  200 { accepted, failed, skipped,               │
//!   │        errors: [{id, type, reason, retryable}] }│
//!   │ ◄────────────────────────────────────────────── │
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use ts_rs::TS;

use crate::types::OutboxEvent;

/// Preferred header for presenting a license token.
pub const LICENSE_HEADER: &str = "x-license-token";

/// Explicit tenant header, highest precedence in tenant scoping.
pub const TENANT_HEADER: &str = "x-tenant-id";

// =============================================================================
// Sync Events
// =============================================================================

/// One event as it travels to the hub.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub struct WireEvent {
    pub id: String,
    pub aggregate: String,
    #[serde(rename = "type")]
    pub event_type: String,
    #[ts(type = "unknown")]
    pub payload: serde_json::Value,
    #[ts(as = "String")]
    pub occurred_at: DateTime<Utc>,
}

impl From<&OutboxEvent> for WireEvent {
    fn from(event: &OutboxEvent) -> Self {
        WireEvent {
            id: event.id.clone(),
            aggregate: event.aggregate.clone(),
            event_type: event.event_type.clone(),
            payload: event.payload.clone(),
            occurred_at: event.created_at,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct PushEventsRequest {
    pub events: Vec<WireEvent>,
}

/// Why one event of a push was not applied.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct EventFailure {
    pub id: String,
    #[serde(rename = "type")]
    pub event_type: String,
    pub reason: String,
    /// `true` when resending the same event later could succeed.
    #[serde(default)]
    pub retryable: bool,
}

/// Per-batch ingest report.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct PushEventsResponse {
    pub accepted: usize,
    pub failed: usize,
    /// Unknown event types, logged and ignored by the hub.
    #[serde(default)]
    pub skipped: usize,
    #[serde(default)]
    pub errors: Vec<EventFailure>,
}

impl PushEventsResponse {
    pub fn failure_for(&self, id: &str) -> Option<&EventFailure> {
        self.errors.iter().find(|f| f.id == id)
    }
}

// =============================================================================
// Commands
// =============================================================================

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct PullCommandsResponse {
    #[ts(type = "unknown[]")]
    pub commands: Vec<serde_json::Value>,
}

/// Operator request to queue a command for edge nodes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub struct EnqueueCommandRequest {
    /// Target one device, or every device of the tenant when absent.
    #[serde(default)]
    pub device_id: Option<String>,
    pub command_type: String,
    #[serde(default)]
    #[ts(type = "unknown")]
    pub payload: serde_json::Value,
}

/// Device report of commands it has handled. Unacked commands are handed
/// out again once their lease runs out.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct AckCommandsRequest {
    pub ids: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct AckCommandsResponse {
    /// Commands newly acked by this call.
    pub acked: u64,
}

// =============================================================================
// Licensing
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub struct ActivateRequest {
    pub tenant_id: String,
    pub device_id: String,
    /// Tenant enrollment key, for a device without a current license.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enrollment_key: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub struct ActivateResponse {
    pub token: String,
    #[ts(as = "String")]
    pub expires_at: DateTime<Utc>,
    pub plan: String,
    #[serde(default)]
    pub plan_id: Option<String>,
    #[ts(type = "Record<string, unknown>")]
    pub entitlements: BTreeMap<String, serde_json::Value>,
    pub max_seats: i64,
    pub max_devices: i64,
    pub grace_days: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub struct RevokeRequest {
    pub tenant_id: String,
    pub device_id: String,
}

/// Operator request to set or rotate a tenant's enrollment key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub struct SetEnrollmentKeyRequest {
    pub tenant_id: String,
    pub key: String,
}

/// License metadata, without the token itself.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub struct LicenseInfo {
    pub tenant_id: String,
    pub device_id: String,
    pub plan: String,
    pub jti: String,
    #[ts(as = "String")]
    pub issued_at: DateTime<Utc>,
    #[ts(as = "String")]
    pub expires_at: DateTime<Utc>,
    #[ts(as = "Option<String>")]
    pub revoked_at: Option<DateTime<Utc>>,
}

/// Error body returned by every hub route.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct ApiErrorBody {
    pub error: String,
    pub message: String,
}
