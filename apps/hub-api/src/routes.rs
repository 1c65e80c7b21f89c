//! HTTP routes.
//!
//! ## Route Table
//! ```text
//! ┌────────────────────────────────────────────────┬───────────────────────────┐
//! │ Route                                          │ Guards                    │
//! ├────────────────────────────────────────────────┼───────────────────────────┤
//! │ GET  /health                                   │ none                      │
//! │ GET  /.well-known/jwks.json                    │ none                      │
//! │ POST /tenants/{tenantId}/sync/events           │ license, tenant scope     │
//! │ GET  /tenants/{tenantId}/sync/commands         │ license, tenant scope     │
//! │ POST /tenants/{tenantId}/sync/commands/ack     │ license, tenant scope     │
//! │ POST /licenses/activate                        │ activation, tenant scope  │
//! │ POST /tenants/{tenantId}/sync/commands         │ identity, tenant scope    │
//! │ POST /licenses/revoke                          │ identity, tenant scope    │
//! │ POST /licenses/enrollment-key                  │ identity, tenant scope    │
//! │ GET  /licenses/{tenantId}/{deviceId}           │ identity, tenant scope    │
//! └────────────────────────────────────────────────┴───────────────────────────┘
//! ```
//!
//! Activation also needs proof the license service accepts: the device's
//! current token, an operator bearer token or the tenant's enrollment key.

use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::middleware::{from_fn, from_fn_with_state};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::json;

use vela_core::protocol::{
    AckCommandsRequest, AckCommandsResponse, ActivateRequest, ActivateResponse, EnqueueCommandRequest, LicenseInfo, PullCommandsResponse, PushEventsRequest,
    PushEventsResponse, RevokeRequest, SetEnrollmentKeyRequest,
};
use vela_core::validation::{validate_batch_size, validate_command_limit, validate_device_id, validate_tenant_id};
use vela_core::ValidationError;

use crate::error::ApiResult;
use crate::keys::JwksDocument;
use crate::middleware::{activation_guard, identity_guard, license_guard, log_request, tenant_scope, RequestContext};
use crate::services::ActivationProof;
use crate::SharedState;

/// Builds the hub router.
pub fn router(state: SharedState) -> Router {
    let device = Router::new()
        .route("/tenants/{tenant_id}/sync/events", post(push_events))
        .route("/tenants/{tenant_id}/sync/commands", get(pull_commands))
        .route("/tenants/{tenant_id}/sync/commands/ack", post(ack_commands))
        .route_layer(from_fn_with_state(state.clone(), tenant_scope))
        .route_layer(from_fn_with_state(state.clone(), license_guard));

    let activation = Router::new()
        .route("/licenses/activate", post(activate))
        .route_layer(from_fn_with_state(state.clone(), tenant_scope))
        .route_layer(from_fn_with_state(state.clone(), activation_guard));

    let operator = Router::new()
        .route("/tenants/{tenant_id}/sync/commands", post(enqueue_command))
        .route("/licenses/revoke", post(revoke))
        .route("/licenses/enrollment-key", post(set_enrollment_key))
        .route("/licenses/{tenant_id}/{device_id}", get(license_info))
        .route_layer(from_fn_with_state(state.clone(), tenant_scope))
        .route_layer(from_fn_with_state(state.clone(), identity_guard));

    Router::new()
        .route("/health", get(health))
        .route("/.well-known/jwks.json", get(jwks))
        .merge(device)
        .merge(activation)
        .merge(operator)
        .layer(from_fn(log_request))
        .with_state(state)
}

// =============================================================================
// Public
// =============================================================================

async fn health(State(state): State<SharedState>) -> (StatusCode, Json<serde_json::Value>) {
    if state.db.health_check().await {
        (StatusCode::OK, Json(json!({ "status": "ok", "database": "ok" })))
    } else {
        (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({ "status": "degraded", "database": "unreachable" })),
        )
    }
}

async fn jwks(State(state): State<SharedState>) -> Json<JwksDocument> {
    Json(state.keys.jwks())
}

// =============================================================================
// Device Sync
// =============================================================================

async fn push_events(
    State(state): State<SharedState>,
    ctx: RequestContext,
    Path(tenant_id): Path<String>,
    body: Result<Json<PushEventsRequest>, JsonRejection>,
) -> ApiResult<Json<PushEventsResponse>> {
    validate_tenant_id(&tenant_id)?;
    ctx.ensure_tenant(&tenant_id)?;

    let Json(request) = body?;
    validate_batch_size(request.events.len(), state.config.sync_batch_size_limit)?;

    Ok(Json(state.ingest.ingest(&tenant_id, &request.events).await))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PullQuery {
    limit: Option<i64>,
    device_id: Option<String>,
}

async fn pull_commands(
    State(state): State<SharedState>,
    ctx: RequestContext,
    Path(tenant_id): Path<String>,
    query: Result<Query<PullQuery>, QueryRejection>,
) -> ApiResult<Json<PullCommandsResponse>> {
    validate_tenant_id(&tenant_id)?;
    ctx.ensure_tenant(&tenant_id)?;

    let Query(query) = query?;
    let limit = validate_command_limit(
        query.limit,
        state.config.commands_default_limit,
        state.config.commands_max_limit(),
    )?;

    // A licensed device only ever sees its own and tenant-wide commands
    let device_id = licensed_device(&ctx).or(query.device_id);
    if let Some(device_id) = &device_id {
        validate_device_id(device_id)?;
    }

    let commands = state
        .db
        .commands()
        .take_pending(&tenant_id, device_id.as_deref(), limit, state.config.command_lease())
        .await?;
    Ok(Json(PullCommandsResponse { commands }))
}

async fn ack_commands(
    State(state): State<SharedState>,
    ctx: RequestContext,
    Path(tenant_id): Path<String>,
    body: Result<Json<AckCommandsRequest>, JsonRejection>,
) -> ApiResult<Json<AckCommandsResponse>> {
    validate_tenant_id(&tenant_id)?;
    ctx.ensure_tenant(&tenant_id)?;

    let Json(request) = body?;
    let max = state.config.commands_max_limit();
    if i64::try_from(request.ids.len()).unwrap_or(i64::MAX) > max {
        return Err(ValidationError::OutOfRange {
            field: "ids".to_string(),
            min: 0,
            max,
        }
        .into());
    }
    if request.ids.iter().any(|id| id.trim().is_empty()) {
        return Err(ValidationError::Required {
            field: "ids".to_string(),
        }
        .into());
    }

    // A licensed device can only ack what it leased
    let device_id = licensed_device(&ctx);
    let acked = state
        .db
        .commands()
        .ack(&tenant_id, device_id.as_deref(), &request.ids)
        .await?;
    Ok(Json(AckCommandsResponse { acked }))
}

fn licensed_device(ctx: &RequestContext) -> Option<String> {
    ctx.license
        .as_ref()
        .map(|claims| claims.device_id.clone())
        .filter(|id| !id.is_empty())
}

// =============================================================================
// Licensing
// =============================================================================

async fn activate(
    State(state): State<SharedState>,
    ctx: RequestContext,
    body: Result<Json<ActivateRequest>, JsonRejection>,
) -> ApiResult<Json<ActivateResponse>> {
    let Json(request) = body?;
    ctx.ensure_tenant(&request.tenant_id)?;

    let proof = ActivationProof {
        renewal: ctx.license,
        operator: ctx.identity.is_some(),
        enrollment_key: request.enrollment_key,
    };
    Ok(Json(
        state
            .licenses
            .activate(&request.tenant_id, &request.device_id, proof)
            .await?,
    ))
}

async fn set_enrollment_key(
    State(state): State<SharedState>,
    ctx: RequestContext,
    body: Result<Json<SetEnrollmentKeyRequest>, JsonRejection>,
) -> ApiResult<StatusCode> {
    let Json(request) = body?;
    validate_tenant_id(&request.tenant_id)?;
    ctx.ensure_tenant(&request.tenant_id)?;

    state.db.enrollment().set_key(&request.tenant_id, &request.key).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn revoke(
    State(state): State<SharedState>,
    ctx: RequestContext,
    body: Result<Json<RevokeRequest>, JsonRejection>,
) -> ApiResult<Json<LicenseInfo>> {
    let Json(request) = body?;
    ctx.ensure_tenant(&request.tenant_id)?;
    Ok(Json(state.licenses.revoke(&request.tenant_id, &request.device_id).await?))
}

async fn license_info(
    State(state): State<SharedState>,
    ctx: RequestContext,
    Path((tenant_id, device_id)): Path<(String, String)>,
) -> ApiResult<Json<LicenseInfo>> {
    ctx.ensure_tenant(&tenant_id)?;
    Ok(Json(state.licenses.info(&tenant_id, &device_id).await?))
}

// =============================================================================
// Operator Commands
// =============================================================================

async fn enqueue_command(
    State(state): State<SharedState>,
    ctx: RequestContext,
    Path(tenant_id): Path<String>,
    body: Result<Json<EnqueueCommandRequest>, JsonRejection>,
) -> ApiResult<(StatusCode, Json<serde_json::Value>)> {
    validate_tenant_id(&tenant_id)?;
    ctx.ensure_tenant(&tenant_id)?;

    let Json(request) = body?;
    if request.command_type.trim().is_empty() {
        return Err(ValidationError::Required {
            field: "commandType".to_string(),
        }
        .into());
    }
    if let Some(device_id) = &request.device_id {
        validate_device_id(device_id)?;
    }

    let id = state
        .db
        .commands()
        .enqueue(&tenant_id, request.device_id.as_deref(), &request.command_type, &request.payload)
        .await?;
    Ok((StatusCode::CREATED, Json(json!({ "id": id }))))
}
