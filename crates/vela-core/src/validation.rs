//! # Validation Module
//!
//! Identifier and limit checks applied at the edges of the system.
//!
//! ## Where They Run
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  Hub routes        validate_tenant_id / validate_device_id             │
//! │                    validate_batch_size / validate_command_limit         │
//! │  Outbox enqueue    validate_event_type                                  │
//! │  Sync config       validate_device_id                                   │
//! │                                                                         │
//! │  Payload contents are the schema validator's job, not this module's.   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use crate::error::ValidationError;

/// Result type for validation operations.
pub type ValidationResult<T> = Result<T, ValidationError>;

/// Longest identifier accepted for tenants, devices and entities.
pub const MAX_ID_LEN: usize = 128;

// =============================================================================
// Identifier Validators
// =============================================================================

fn validate_id(field: &str, value: &str) -> ValidationResult<()> {
    let value = value.trim();

    if value.is_empty() {
        return Err(ValidationError::Required {
            field: field.to_string(),
        });
    }

    if value.len() > MAX_ID_LEN {
        return Err(ValidationError::TooLong {
            field: field.to_string(),
            max: MAX_ID_LEN,
        });
    }

    if !value
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | ':' | '.'))
    {
        return Err(ValidationError::InvalidFormat {
            field: field.to_string(),
            reason: "must contain only letters, numbers, '-', '_', ':' and '.'".to_string(),
        });
    }

    Ok(())
}

/// Validates a tenant id.
///
/// ## Example
/// ```rust
/// use vela_core::validation::validate_tenant_id;
///
/// assert!(validate_tenant_id("acme-01").is_ok());
/// assert!(validate_tenant_id("").is_err());
/// assert!(validate_tenant_id("acme/../other").is_err());
/// ```
pub fn validate_tenant_id(tenant_id: &str) -> ValidationResult<()> {
    validate_id("tenantId", tenant_id)
}

pub fn validate_device_id(device_id: &str) -> ValidationResult<()> {
    validate_id("deviceId", device_id)
}

/// Validates an event type's shape: `aggregate.action.vN`.
///
/// Does not check that the type is registered.
pub fn validate_event_type(event_type: &str) -> ValidationResult<()> {
    let invalid = || ValidationError::InvalidFormat {
        field: "type".to_string(),
        reason: "expected <aggregate>.<action>.v<N>".to_string(),
    };

    let parts: Vec<&str> = event_type.split('.').collect();
    if parts.len() != 3 {
        return Err(invalid());
    }

    let is_word = |s: &str| {
        !s.is_empty() && s.chars().all(|c| c.is_ascii_lowercase() || c == '_')
    };
    let is_version = |s: &str| {
        s.strip_prefix('v')
            .is_some_and(|n| !n.is_empty() && n.chars().all(|c| c.is_ascii_digit()))
    };

    if is_word(parts[0]) && is_word(parts[1]) && is_version(parts[2]) {
        Ok(())
    } else {
        Err(invalid())
    }
}

// =============================================================================
// Limit Validators
// =============================================================================

/// Validates the number of events in one push.
pub fn validate_batch_size(len: usize, max: usize) -> ValidationResult<()> {
    if len > max {
        return Err(ValidationError::OutOfRange {
            field: "events".to_string(),
            min: 0,
            max: max as i64,
        });
    }
    Ok(())
}

/// Clamps a requested command limit into `1..=max`, defaulting when absent.
pub fn validate_command_limit(
    requested: Option<i64>,
    default: i64,
    max: i64,
) -> ValidationResult<i64> {
    match requested {
        None => Ok(default.min(max)),
        Some(limit) if (1..=max).contains(&limit) => Ok(limit),
        Some(_) => Err(ValidationError::OutOfRange {
            field: "limit".to_string(),
            min: 1,
            max,
        }),
    }
}
