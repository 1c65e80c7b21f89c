//! # Error Types
//!
//! Domain-specific error types for vela-core.
//!
//! ## Error Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Error Types                                     │
//! │                                                                         │
//! │  vela-core errors (this file)                                          │
//! │  ├── CoreError        - Schema, transition, conflict, money failures   │
//! │  └── ValidationError  - Field-level input failures                     │
//! │                                                                         │
//! │  vela-db errors                                                        │
//! │  └── DbError          - Storage failures, Conflict, NotFound           │
//! │                                                                         │
//! │  vela-sync errors                                                      │
//! │  └── SyncError        - Transport/auth failures with is_retryable()    │
//! │                                                                         │
//! │  hub-api errors                                                        │
//! │  └── ApiError         - What HTTP callers see (never raw internals)    │
//! │                                                                         │
//! │  Flow: ValidationError → CoreError → DbError → ApiError / SyncError    │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use thiserror::Error;

// =============================================================================
// Core Error
// =============================================================================

/// Core domain errors.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Event payload does not match the schema registered for its type.
    ///
    /// ## When This Occurs
    /// - Edge: a domain write tries to enqueue a malformed payload
    /// - Edge: the agent re-validates a stored event before sending
    /// - Hub: an inbound event fails validation before reaching a reconciler
    ///
    /// Never retried automatically.
    #[error("{event_type} failed schema validation: {}", errors.join("; "))]
    SchemaViolation {
        event_type: String,
        errors: Vec<String>,
    },

    /// No schema is registered for the event type.
    #[error("Unknown event type: {0}")]
    UnknownEventType(String),

    /// A registered schema could not be compiled.
    #[error("Schema for {event_type} is invalid: {reason}")]
    SchemaCompile { event_type: String, reason: String },

    /// Outbox status change that the state machine does not allow.
    ///
    /// ## When This Occurs
    /// - A caller asks for `processed → pending`
    /// - A caller skips a step (`pending → sending`)
    #[error("Outbox status cannot move from {from} to {to}")]
    InvalidTransition { from: String, to: String },

    /// Requested slot intersects an existing non-cancelled appointment.
    ///
    /// ## User Workflow
    /// ```text
    /// Book 10:00-11:00 for resource R
    ///      │
    ///      ▼
    /// Existing 10:30-11:30 (confirmed)
    ///      │
    ///      ▼
    /// ScheduleConflict { resource_id: "R", conflicting_id: "appt-7" }
    /// ```
    #[error("Schedule conflict on resource {resource_id} with appointment {conflicting_id}")]
    ScheduleConflict {
        resource_id: String,
        conflicting_id: String,
    },

    /// Monetary amount cannot be represented exactly in cents.
    #[error("Invalid amount '{input}': {reason}")]
    InvalidAmount { input: String, reason: String },

    /// Payload could not be converted to its typed form.
    #[error("Malformed payload: {0}")]
    MalformedPayload(String),

    /// Validation error (wraps ValidationError).
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),
}

impl From<serde_json::Error> for CoreError {
    fn from(err: serde_json::Error) -> Self {
        CoreError::MalformedPayload(err.to_string())
    }
}

// =============================================================================
// Validation Error
// =============================================================================

/// Input validation errors.
#[derive(Debug, Error)]
pub enum ValidationError {
    /// A required field is missing or empty.
    #[error("{field} is required")]
    Required { field: String },

    /// Field value is too long.
    #[error("{field} must be at most {max} characters")]
    TooLong { field: String, max: usize },

    /// Numeric value is out of range.
    #[error("{field} must be between {min} and {max}")]
    OutOfRange { field: String, min: i64, max: i64 },

    /// Invalid format (e.g., bad event type, invalid date).
    #[error("{field} has invalid format: {reason}")]
    InvalidFormat { field: String, reason: String },

    /// Value is not in allowed set.
    #[error("{field} must be one of: {allowed:?}")]
    NotAllowed { field: String, allowed: Vec<String> },
}

// =============================================================================
// Result Type Alias
// =============================================================================

/// Convenience type alias for Results with CoreError.
pub type CoreResult<T> = Result<T, CoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_schema_violation_message_joins_errors() {
        let err = CoreError::SchemaViolation {
            event_type: "sale.created.v1".to_string(),
            errors: vec!["a".to_string(), "b".to_string()],
        };
        assert_eq!(err.to_string(), "sale.created.v1 failed schema validation: a; b");
    }

    #[test]
    fn test_validation_converts_to_core_error() {
        let validation_err = ValidationError::Required {
            field: "tenant_id".to_string(),
        };
        let core_err: CoreError = validation_err.into();
        assert!(matches!(core_err, CoreError::Validation(_)));
    }
}
