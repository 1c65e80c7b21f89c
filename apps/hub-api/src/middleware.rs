//! Access guards.
//!
//! ## Layering
//! ```text
//! request ──► log_request ──► guard ──► tenant_scope ──► handler
//!                                │              │
//!          license_guard    ─► LicenseClaims    TenantScope
//!          identity_guard   ─► IdentityClaims      │
//!          activation_guard ─► either, if sent     │
//!                                └─── request extensions ──► RequestContext
//! ```
//!
//! `/health` and `/.well-known/jwks.json` sit outside every guard.

use std::convert::Infallible;
use std::time::Instant;

use axum::extract::{FromRequestParts, Request, State};
use axum::http::request::Parts;
use axum::middleware::Next;
use axum::response::Response;
use tracing::{debug, info};

use vela_core::protocol::TENANT_HEADER;
use vela_core::validation::validate_tenant_id;
use vela_core::{IdentityClaims, LicenseClaims};
use vela_db::LicenseState;

use crate::auth::{bearer_token, extract_license_token, license_header, AuthFailure};
use crate::error::{ApiError, ApiResult};
use crate::SharedState;

/// Query parameter consulted by tenant scoping.
const TENANT_QUERY_PARAM: &str = "tenantId";

// =============================================================================
// Request Logging
// =============================================================================

pub async fn log_request(request: Request, next: Next) -> Response {
    let method = request.method().clone();
    let path = request.uri().path().to_string();
    let started = Instant::now();

    let response = next.run(request).await;

    info!(
        %method,
        %path,
        status = response.status().as_u16(),
        elapsed_ms = started.elapsed().as_millis() as u64,
        "Request handled"
    );
    response
}

// =============================================================================
// License Guard
// =============================================================================

/// Requires a valid, unrevoked license token and attaches its claims.
pub async fn license_guard(
    State(state): State<SharedState>,
    mut request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    if !state.config.license.enforcement {
        return Ok(next.run(request).await);
    }

    let (source, token) =
        extract_license_token(request.headers()).ok_or_else(|| ApiError::license(AuthFailure::Missing))?;
    debug!(?source, "License token presented");
    let claims = state.verifier.verify(token).map_err(ApiError::license)?;

    match state
        .db
        .licenses()
        .state(&claims.tenant_id, &claims.device_id, &claims.jti)
        .await?
    {
        LicenseState::Revoked => return Err(ApiError::license(AuthFailure::Revoked)),
        LicenseState::Superseded => return Err(ApiError::license(AuthFailure::Superseded)),
        LicenseState::Current | LicenseState::Unknown => {}
    }

    request.extensions_mut().insert(claims);
    Ok(next.run(request).await)
}

// =============================================================================
// Identity Guard
// =============================================================================

/// Requires an operator bearer token from the identity provider.
pub async fn identity_guard(
    State(state): State<SharedState>,
    mut request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let Some(verifier) = &state.identity else {
        return Ok(next.run(request).await);
    };

    let token = bearer_token(request.headers()).ok_or_else(|| ApiError::identity(AuthFailure::Missing))?;
    let claims = verifier.verify(token).await.map_err(ApiError::identity)?;
    debug!(sub = %claims.sub, "Operator authenticated");

    request.extensions_mut().insert(claims);
    Ok(next.run(request).await)
}

// =============================================================================
// Activation Guard
// =============================================================================

/// Attaches the credentials an activation may present. Nothing is required
/// here; the license service decides what the request is allowed to do.
///
/// A license token that fails verification is dropped so an expired device
/// can still enroll with a key. A bearer token that fails is refused.
pub async fn activation_guard(
    State(state): State<SharedState>,
    mut request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let renewal = license_header(request.headers()).map(|token| state.verifier.verify(token));
    match renewal {
        Some(Ok(claims)) => {
            request.extensions_mut().insert(claims);
        }
        Some(Err(failure)) => debug!(%failure, "Renewal token ignored"),
        None => {}
    }

    if let Some(verifier) = &state.identity {
        let bearer = bearer_token(request.headers()).map(str::to_string);
        if let Some(token) = bearer {
            let claims = verifier.verify(&token).await.map_err(ApiError::identity)?;
            debug!(sub = %claims.sub, "Operator activating a device");
            request.extensions_mut().insert(claims);
        }
    }

    Ok(next.run(request).await)
}

// =============================================================================
// Tenant Scope
// =============================================================================

/// Where the request's tenant came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TenantSource {
    Header,
    Identity,
    Query,
    Path,
}

/// The tenant a request is scoped to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TenantScope {
    pub tenant_id: String,
    pub source: TenantSource,
}

/// Resolves the tenant: header, identity claims, query, then path.
pub fn resolve_tenant(request: &Request) -> Option<TenantScope> {
    let scope = |tenant_id: String, source| TenantScope { tenant_id, source };

    let from_header = || {
        request
            .headers()
            .get(TENANT_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .map(|v| scope(v.to_string(), TenantSource::Header))
    };
    let from_identity = || {
        request
            .extensions()
            .get::<IdentityClaims>()
            .and_then(|claims| claims.tenant_id.clone())
            .filter(|v| !v.is_empty())
            .map(|v| scope(v, TenantSource::Identity))
    };
    let from_query = || {
        request.uri().query().and_then(|query| {
            url::form_urlencoded::parse(query.as_bytes())
                .find(|(key, value)| key == TENANT_QUERY_PARAM && !value.is_empty())
                .map(|(_, value)| scope(value.into_owned(), TenantSource::Query))
        })
    };
    let from_path = || {
        let mut segments = request.uri().path().split('/').filter(|s| !s.is_empty());
        segments
            .by_ref()
            .find(|segment| *segment == "tenants")
            .and(segments.next())
            .map(|v| scope(v.to_string(), TenantSource::Path))
    };

    from_header()
        .or_else(from_identity)
        .or_else(from_query)
        .or_else(from_path)
}

/// Attaches the request's [`TenantScope`].
pub async fn tenant_scope(
    State(state): State<SharedState>,
    mut request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    match resolve_tenant(&request) {
        Some(scope) => {
            validate_tenant_id(&scope.tenant_id)?;
            debug!(tenant_id = %scope.tenant_id, source = ?scope.source, "Tenant resolved");
            request.extensions_mut().insert(scope);
        }
        None if state.config.tenant_required => {
            return Err(ApiError::Validation("tenant could not be resolved".to_string()));
        }
        None => {}
    }
    Ok(next.run(request).await)
}

// =============================================================================
// Request Context
// =============================================================================

/// What the guards established about the caller.
#[derive(Debug, Clone, Default)]
pub struct RequestContext {
    pub tenant: Option<TenantScope>,
    pub license: Option<LicenseClaims>,
    pub identity: Option<IdentityClaims>,
}

impl RequestContext {
    pub fn tenant_id(&self) -> Option<&str> {
        self.tenant.as_ref().map(|scope| scope.tenant_id.as_str())
    }

    /// Rejects access to `tenant_id` when any credential or the resolved
    /// scope names another tenant.
    pub fn ensure_tenant(&self, tenant_id: &str) -> ApiResult<()> {
        let bound = [
            self.tenant_id(),
            self.license.as_ref().map(|claims| claims.tenant_id.as_str()),
            self.identity.as_ref().and_then(|claims| claims.tenant_id.as_deref()),
        ];
        if bound.into_iter().flatten().any(|bound| bound != tenant_id) {
            return Err(ApiError::Forbidden(format!("not authorized for tenant {tenant_id}")));
        }
        Ok(())
    }
}

impl<S> FromRequestParts<S> for RequestContext
where
    S: Send + Sync,
{
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Ok(RequestContext {
            tenant: parts.extensions.get::<TenantScope>().cloned(),
            license: parts.extensions.get::<LicenseClaims>().cloned(),
            identity: parts.extensions.get::<IdentityClaims>().cloned(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;

    fn request(uri: &str) -> Request {
        Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    fn identity(tenant: Option<&str>) -> IdentityClaims {
        IdentityClaims {
            sub: "op".into(),
            iss: "idp".into(),
            aud: None,
            exp: 0,
            tenant_id: tenant.map(str::to_string),
        }
    }

    #[test]
    fn test_tenant_precedence() {
        let mut req = request("/tenants/from-path/sync/events?tenantId=from-query");
        assert_eq!(resolve_tenant(&req).unwrap().source, TenantSource::Query);

        req.extensions_mut().insert(identity(Some("from-identity")));
        assert_eq!(resolve_tenant(&req).unwrap().tenant_id, "from-identity");

        req.headers_mut().insert(TENANT_HEADER, "from-header".parse().unwrap());
        let scope = resolve_tenant(&req).unwrap();
        assert_eq!(scope.tenant_id, "from-header");
        assert_eq!(scope.source, TenantSource::Header);
    }

    #[test]
    fn test_tenant_from_path_only() {
        let scope = resolve_tenant(&request("/tenants/acme/sync/commands?limit=5")).unwrap();
        assert_eq!(scope, TenantScope {
            tenant_id: "acme".into(),
            source: TenantSource::Path,
        });

        assert!(resolve_tenant(&request("/licenses/activate")).is_none());
        assert!(resolve_tenant(&request("/tenants")).is_none());
    }

    #[test]
    fn test_identity_without_tenant_falls_through() {
        let mut req = request("/licenses/revoke?tenantId=t9");
        req.extensions_mut().insert(identity(None));
        assert_eq!(resolve_tenant(&req).unwrap().tenant_id, "t9");
    }

    #[test]
    fn test_ensure_tenant() {
        let ctx = RequestContext {
            tenant: Some(TenantScope {
                tenant_id: "t1".into(),
                source: TenantSource::Path,
            }),
            license: None,
            identity: Some(identity(None)),
        };
        assert!(ctx.ensure_tenant("t1").is_ok());
        assert!(matches!(ctx.ensure_tenant("t2"), Err(ApiError::Forbidden(_))));

        let operator = RequestContext {
            identity: Some(identity(Some("t1"))),
            ..RequestContext::default()
        };
        assert!(matches!(operator.ensure_tenant("t2"), Err(ApiError::Forbidden(_))));
        assert!(RequestContext::default().ensure_tenant("anything").is_ok());
    }
}
