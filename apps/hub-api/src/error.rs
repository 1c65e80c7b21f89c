//! Error types for the hub API.
//!
//! Every error leaves the hub as `{ "error": <code>, "message": <reason> }`.
//! Auth failures carry one generic message whatever went wrong, and storage
//! failures answer `internal error`; the detail only goes to the log.

use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use tracing::{debug, error};

use vela_core::protocol::ApiErrorBody;
use vela_core::{CoreError, ValidationError};
use vela_db::DbError;

use crate::auth::AuthFailure;

/// Result type alias for handlers and services.
pub type ApiResult<T> = Result<T, ApiError>;

/// Which credential a 401 is about.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Credential {
    License,
    Identity,
    /// Proof a device may take a license: its current token, an operator
    /// identity or the tenant's enrollment key.
    Activation,
}

impl Credential {
    fn denial(&self) -> &'static str {
        match self {
            Credential::License => "missing or invalid license",
            Credential::Identity => "missing or invalid identity",
            Credential::Activation => "missing or invalid activation credential",
        }
    }
}

/// Hub API errors.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// Malformed request or payload.
    #[error("Invalid request: {0}")]
    Validation(String),

    /// Credential absent, malformed, expired, revoked or unverifiable.
    #[error("Authentication failed ({credential:?}): {failure}")]
    Unauthorized {
        credential: Credential,
        failure: AuthFailure,
    },

    /// Authenticated, but not for this tenant or plan.
    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Not found: {0}")]
    NotFound(String),

    /// Admission rule refused the write (overlap, device limit).
    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl ApiError {
    pub fn license(failure: AuthFailure) -> Self {
        ApiError::Unauthorized {
            credential: Credential::License,
            failure,
        }
    }

    pub fn identity(failure: AuthFailure) -> Self {
        ApiError::Unauthorized {
            credential: Credential::Identity,
            failure,
        }
    }

    pub fn activation(failure: AuthFailure) -> Self {
        ApiError::Unauthorized {
            credential: Credential::Activation,
            failure,
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::Validation(_) => StatusCode::BAD_REQUEST,
            ApiError::Unauthorized { .. } => StatusCode::UNAUTHORIZED,
            ApiError::Forbidden(_) => StatusCode::FORBIDDEN,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Conflict(_) => StatusCode::CONFLICT,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn body(&self) -> ApiErrorBody {
        let (code, message) = match self {
            ApiError::Validation(msg) => ("validation_error", msg.clone()),
            ApiError::Unauthorized { credential, .. } => ("unauthorized", credential.denial().to_string()),
            ApiError::Forbidden(msg) => ("forbidden", msg.clone()),
            ApiError::NotFound(msg) => ("not_found", msg.clone()),
            ApiError::Conflict(msg) => ("conflict", msg.clone()),
            ApiError::Internal(_) => ("internal_error", "internal error".to_string()),
        };
        ApiErrorBody {
            error: code.to_string(),
            message,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match &self {
            ApiError::Internal(detail) => error!(%detail, "Request failed"),
            ApiError::Unauthorized { credential, failure } => {
                debug!(?credential, %failure, "Request denied")
            }
            _ => {}
        }
        (self.status(), Json(self.body())).into_response()
    }
}

// =============================================================================
// Error Conversions
// =============================================================================

impl From<DbError> for ApiError {
    fn from(err: DbError) -> Self {
        if err.is_conflict() {
            return ApiError::Conflict(err.to_string());
        }
        match err {
            DbError::NotFound { entity, id } => ApiError::NotFound(format!("{entity} {id}")),
            DbError::Core(core) => core.into(),
            other => ApiError::Internal(other.to_string()),
        }
    }
}

impl From<CoreError> for ApiError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::ScheduleConflict { .. } => ApiError::Conflict(err.to_string()),
            CoreError::SchemaCompile { .. } | CoreError::InvalidTransition { .. } => {
                ApiError::Internal(err.to_string())
            }
            other => ApiError::Validation(other.to_string()),
        }
    }
}

impl From<ValidationError> for ApiError {
    fn from(err: ValidationError) -> Self {
        ApiError::Validation(err.to_string())
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError::Validation(rejection.body_text())
    }
}

impl From<QueryRejection> for ApiError {
    fn from(rejection: QueryRejection) -> Self {
        ApiError::Validation(rejection.body_text())
    }
}

impl From<jsonwebtoken::errors::Error> for ApiError {
    fn from(err: jsonwebtoken::errors::Error) -> Self {
        ApiError::Internal(format!("token signing failed: {err}"))
    }
}
