//! # Sync Error Types
//!
//! Error types for the edge agent.
//!
//! ## Error Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                       Sync Error Categories                             │
//! │                                                                         │
//! │  ┌─────────────────┐  ┌─────────────────┐  ┌─────────────────────────┐ │
//! │  │  Configuration  │  │   Transport     │  │     Protocol            │ │
//! │  │                 │  │   (retryable)   │  │                         │ │
//! │  │  InvalidConfig  │  │  Connection     │  │  InvalidResponse        │ │
//! │  │  MissingDeviceId│  │  Timeout        │  │  SerializationFailed    │ │
//! │  │  InvalidUrl     │  │  HubRejected    │  │                         │ │
//! │  └─────────────────┘  └─────────────────┘  └─────────────────────────┘ │
//! │                                                                         │
//! │  ┌─────────────────┐  ┌─────────────────┐  ┌─────────────────────────┐ │
//! │  │    Database     │  │      Auth       │  │      Internal           │ │
//! │  │                 │  │   (no retry)    │  │                         │ │
//! │  │  DatabaseError  │  │  Unauthorized   │  │  Internal (task join)   │ │
//! │  └─────────────────┘  └─────────────────┘  └─────────────────────────┘ │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Transport and auth errors abort the current push, but the rows they touch
//! are always left in `error`, so nothing is dropped.

use std::time::Duration;
use thiserror::Error;

/// Result type alias for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Sync error type covering all possible agent failures.
#[derive(Debug, Error)]
pub enum SyncError {
    // =========================================================================
    // Configuration Errors
    // =========================================================================
    /// Invalid sync configuration.
    #[error("Invalid sync configuration: {0}")]
    InvalidConfig(String),

    /// Missing device ID (required for sync and activation).
    #[error("Device ID not configured. Run initial setup first.")]
    MissingDeviceId,

    /// Missing tenant ID.
    #[error("Tenant ID not configured")]
    MissingTenantId,

    /// Invalid hub URL.
    #[error("Invalid hub URL: {0}")]
    InvalidUrl(String),

    /// Failed to load config file.
    #[error("Failed to load config: {0}")]
    ConfigLoadFailed(String),

    /// Failed to save config file.
    #[error("Failed to save config: {0}")]
    ConfigSaveFailed(String),

    // =========================================================================
    // Transport Errors
    // =========================================================================
    /// Could not reach the hub.
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// The call did not finish within its bound.
    ///
    /// ## When This Occurs
    /// - Hub is reachable but too slow to answer
    /// - Network drops mid-response
    ///
    /// Treated exactly like a connection failure: the batch goes back to
    /// `error`.
    #[error("Request timed out after {0} seconds")]
    Timeout(u64),

    /// The hub answered with a non-2xx status other than 401/403.
    #[error("Hub rejected the request with status {status}: {body}")]
    HubRejected { status: u16, body: String },

    // =========================================================================
    // Auth Errors
    // =========================================================================
    /// The hub refused the license credential (401/403).
    ///
    /// ## When This Occurs
    /// - No token was activated yet and enforcement is on
    /// - Token expired, revoked or superseded by a reissue
    /// - Token tenant differs from the configured tenant
    #[error("Hub refused the license: {0}")]
    Unauthorized(String),

    // =========================================================================
    // Protocol Errors
    // =========================================================================
    /// The hub answered 2xx with a body we cannot read.
    #[error("Invalid hub response: {0}")]
    InvalidResponse(String),

    /// Failed to serialize a request body.
    #[error("Serialization failed: {0}")]
    SerializationFailed(String),

    // =========================================================================
    // Database Errors
    // =========================================================================
    /// Outbox store failure.
    #[error("Database error: {0}")]
    DatabaseError(String),

    // =========================================================================
    // Internal Errors
    // =========================================================================
    /// Internal sync agent error.
    #[error("Internal error: {0}")]
    Internal(String),
}

// =============================================================================
// Error Conversions
// =============================================================================

impl From<vela_db::DbError> for SyncError {
    fn from(err: vela_db::DbError) -> Self {
        SyncError::DatabaseError(err.to_string())
    }
}

impl From<serde_json::Error> for SyncError {
    fn from(err: serde_json::Error) -> Self {
        SyncError::SerializationFailed(err.to_string())
    }
}

impl From<url::ParseError> for SyncError {
    fn from(err: url::ParseError) -> Self {
        SyncError::InvalidUrl(err.to_string())
    }
}

impl From<std::io::Error> for SyncError {
    fn from(err: std::io::Error) -> Self {
        SyncError::ConfigLoadFailed(err.to_string())
    }
}

impl From<toml::de::Error> for SyncError {
    fn from(err: toml::de::Error) -> Self {
        SyncError::ConfigLoadFailed(err.to_string())
    }
}

impl From<toml::ser::Error> for SyncError {
    fn from(err: toml::ser::Error) -> Self {
        SyncError::ConfigSaveFailed(err.to_string())
    }
}

impl SyncError {
    /// Maps a reqwest failure, reporting timeouts with the configured bound.
    pub fn from_reqwest(err: reqwest::Error, timeout: Duration) -> Self {
        if err.is_timeout() {
            SyncError::Timeout(timeout.as_secs())
        } else if err.is_decode() {
            SyncError::InvalidResponse(err.to_string())
        } else if err.is_builder() {
            SyncError::InvalidConfig(err.to_string())
        } else {
            SyncError::ConnectionFailed(err.to_string())
        }
    }

    /// Classifies a non-2xx answer.
    pub fn from_status(status: u16, body: String) -> Self {
        match status {
            401 | 403 => SyncError::Unauthorized(body),
            _ => SyncError::HubRejected { status, body },
        }
    }
}

// =============================================================================
// Error Categorization (for retry logic)
// =============================================================================

impl SyncError {
    /// Returns true if the scheduler should back off and try again.
    ///
    /// ## Retryable Errors
    /// - Connection failures and timeouts
    /// - Non-2xx answers other than 401/403
    /// - Outbox store failures (locked database)
    ///
    /// ## Non-Retryable Errors
    /// - Configuration errors
    /// - Refused license (needs activation or an operator)
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            SyncError::ConnectionFailed(_)
                | SyncError::Timeout(_)
                | SyncError::HubRejected { .. }
                | SyncError::DatabaseError(_)
        )
    }

    /// Returns true if this error indicates a configuration problem.
    pub fn is_config_error(&self) -> bool {
        matches!(
            self,
            SyncError::InvalidConfig(_)
                | SyncError::MissingDeviceId
                | SyncError::MissingTenantId
                | SyncError::InvalidUrl(_)
                | SyncError::ConfigLoadFailed(_)
                | SyncError::ConfigSaveFailed(_)
        )
    }

    /// Returns true if the hub refused our credential.
    pub fn is_auth_error(&self) -> bool {
        matches!(self, SyncError::Unauthorized(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_errors() {
        assert!(SyncError::ConnectionFailed("refused".into()).is_retryable());
        assert!(SyncError::Timeout(15).is_retryable());
        assert!(SyncError::HubRejected {
            status: 503,
            body: "busy".into()
        }
        .is_retryable());

        assert!(!SyncError::InvalidConfig("bad".into()).is_retryable());
        assert!(!SyncError::MissingDeviceId.is_retryable());
        assert!(!SyncError::Unauthorized("missing or invalid license".into()).is_retryable());
    }

    #[test]
    fn test_status_classification() {
        assert!(SyncError::from_status(401, String::new()).is_auth_error());
        assert!(SyncError::from_status(403, String::new()).is_auth_error());
        assert!(matches!(
            SyncError::from_status(500, "boom".into()),
            SyncError::HubRejected { status: 500, .. }
        ));
    }

    #[test]
    fn test_config_errors() {
        assert!(SyncError::MissingTenantId.is_config_error());
        assert!(SyncError::InvalidUrl("ftp://x".into()).is_config_error());
        assert!(!SyncError::Timeout(5).is_config_error());
    }
}
