//! # Event Schema Validator
//!
//! A data-driven table of compiled JSON Schemas keyed by event type.
//!
//! ## The Gate
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                                                                         │
//! │   Edge domain write ──┐                                                 │
//! │                       ├──► validate(type, payload) ──► valid?          │
//! │   Hub ingest ─────────┘                                  │    │         │
//! │                                                         yes   no        │
//! │                                                          │    │         │
//! │                                            outbox / reconciler  errors  │
//! │                                                                         │
//! │   Unknown type → invalid, "unknown event type: X". Never accepted.     │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Adding a Type
//! ```rust
//! use vela_core::schema::SchemaValidator;
//! use serde_json::json;
//!
//! let mut validator = SchemaValidator::new(true).unwrap();
//! validator
//!     .register("pet.upserted.v1", json!({
//!         "type": "object",
//!         "required": ["id"],
//!         "properties": { "id": { "type": "string" } }
//!     }))
//!     .unwrap();
//!
//! assert!(validator.validate("pet.upserted.v1", &json!({"id": "p1"})).valid);
//! ```

use serde::Serialize;
use serde_json::{json, Value};
use std::collections::HashMap;
use tracing::debug;

use crate::error::{CoreError, CoreResult};
use crate::events::EventKind;

// =============================================================================
// Outcome
// =============================================================================

/// Result of validating one payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ValidationOutcome {
    pub valid: bool,
    pub errors: Vec<String>,
}

impl ValidationOutcome {
    fn ok() -> Self {
        ValidationOutcome {
            valid: true,
            errors: Vec::new(),
        }
    }

    fn failed(errors: Vec<String>) -> Self {
        ValidationOutcome {
            valid: false,
            errors,
        }
    }
}

// =============================================================================
// Validator
// =============================================================================

/// Compiled schema table.
///
/// Compiled once and shared (`Arc<SchemaValidator>`); `validate` takes `&self`
/// and holds no mutable state.
pub struct SchemaValidator {
    strict: bool,
    validators: HashMap<String, jsonschema::Validator>,
}

impl std::fmt::Debug for SchemaValidator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut types: Vec<&String> = self.validators.keys().collect();
        types.sort();
        f.debug_struct("SchemaValidator")
            .field("strict", &self.strict)
            .field("types", &types)
            .finish()
    }
}

impl SchemaValidator {
    /// Builds a validator preloaded with the built-in catalogue.
    ///
    /// `strict` closes every object schema (`additionalProperties: false`)
    /// unless the schema says otherwise.
    pub fn new(strict: bool) -> CoreResult<Self> {
        let mut validator = SchemaValidator {
            strict,
            validators: HashMap::new(),
        };
        for kind in EventKind::ALL {
            validator.register(kind.as_str(), builtin_schema(kind))?;
        }
        Ok(validator)
    }

    /// Strict validator with the built-in catalogue.
    pub fn strict() -> CoreResult<Self> {
        SchemaValidator::new(true)
    }

    /// Compiles and registers (or replaces) the schema for `event_type`.
    pub fn register(&mut self, event_type: &str, mut schema: Value) -> CoreResult<()> {
        if self.strict {
            close_objects(&mut schema);
        }

        let compiled = jsonschema::options()
            .should_validate_formats(true)
            .build(&schema)
            .map_err(|e| CoreError::SchemaCompile {
                event_type: event_type.to_string(),
                reason: e.to_string(),
            })?;

        debug!(event_type = %event_type, strict = self.strict, "Registered event schema");
        self.validators.insert(event_type.to_string(), compiled);
        Ok(())
    }

    pub fn is_registered(&self, event_type: &str) -> bool {
        self.validators.contains_key(event_type)
    }

    pub fn is_strict(&self) -> bool {
        self.strict
    }

    /// Validates a payload against the schema for its type.
    pub fn validate(&self, event_type: &str, payload: &Value) -> ValidationOutcome {
        let Some(validator) = self.validators.get(event_type) else {
            return ValidationOutcome::failed(vec![format!("unknown event type: {event_type}")]);
        };

        let errors: Vec<String> = validator
            .iter_errors(payload)
            .map(|e| format!("{} at {}", e, e.instance_path))
            .collect();

        if errors.is_empty() {
            ValidationOutcome::ok()
        } else {
            ValidationOutcome::failed(errors)
        }
    }

    /// Same as [`validate`](Self::validate) but as a `Result`.
    pub fn ensure_valid(&self, event_type: &str, payload: &Value) -> CoreResult<()> {
        let outcome = self.validate(event_type, payload);
        if outcome.valid {
            Ok(())
        } else {
            Err(CoreError::SchemaViolation {
                event_type: event_type.to_string(),
                errors: outcome.errors,
            })
        }
    }
}

/// Adds `additionalProperties: false` to every object schema with
/// `properties` that does not already decide it.
fn close_objects(schema: &mut Value) {
    match schema {
        Value::Object(map) => {
            if map.contains_key("properties") && !map.contains_key("additionalProperties") {
                map.insert("additionalProperties".to_string(), Value::Bool(false));
            }
            for value in map.values_mut() {
                close_objects(value);
            }
        }
        Value::Array(items) => items.iter_mut().for_each(close_objects),
        _ => {}
    }
}

// =============================================================================
// Built-in Catalogue
// =============================================================================

fn id_only() -> Value {
    json!({
        "type": "object",
        "required": ["id"],
        "properties": { "id": { "type": "string", "minLength": 1 } }
    })
}

/// Largest sale quantity, and largest stock movement either way.
pub const MAX_QUANTITY: i64 = 1_000_000;

/// Largest amount, in whole currency units. `MAX_AMOUNT * 100 * MAX_QUANTITY`
/// still fits in i64 cents.
pub const MAX_AMOUNT: i64 = 1_000_000_000;

/// Draft 2020-12 schema for each known kind.
pub fn builtin_schema(kind: EventKind) -> Value {
    let optional_string = || json!({ "type": ["string", "null"] });
    let id = || json!({ "type": "string", "minLength": 1 });
    let amount = || json!({ "type": "number", "minimum": 0, "maximum": MAX_AMOUNT });

    match kind {
        EventKind::CustomerUpserted => json!({
            "type": "object",
            "required": ["id", "name"],
            "properties": {
                "id": id(),
                "name": { "type": "string", "minLength": 1, "maxLength": 200 },
                "email": optional_string(),
                "phone": optional_string()
            }
        }),
        EventKind::ProductUpserted => json!({
            "type": "object",
            "required": ["id", "sku", "name", "price"],
            "properties": {
                "id": id(),
                "sku": { "type": "string", "minLength": 1, "maxLength": 64 },
                "name": { "type": "string", "minLength": 1, "maxLength": 200 },
                "price": amount()
            }
        }),
        EventKind::SaleCreated => json!({
            "type": "object",
            "required": ["id", "total", "items"],
            "properties": {
                "id": id(),
                "customerId": optional_string(),
                "total": amount(),
                "items": {
                    "type": "array",
                    "minItems": 1,
                    "items": {
                        "type": "object",
                        "required": ["productId", "qty", "unitPrice"],
                        "properties": {
                            "productId": id(),
                            "qty": { "type": "integer", "minimum": 1, "maximum": MAX_QUANTITY },
                            "unitPrice": amount()
                        }
                    }
                }
            }
        }),
        EventKind::AppointmentUpserted => json!({
            "type": "object",
            "required": ["id", "resourceId", "start", "end", "status"],
            "properties": {
                "id": id(),
                "resourceId": id(),
                "customerId": optional_string(),
                "start": { "type": "string", "format": "date-time" },
                "end": { "type": "string", "format": "date-time" },
                "status": {
                    "enum": ["scheduled", "confirmed", "completed", "cancelled", "no_show"]
                }
            }
        }),
        EventKind::InventoryAdjusted => json!({
            "type": "object",
            "required": ["id", "productId", "delta", "reason"],
            "properties": {
                "id": id(),
                "productId": id(),
                "delta": {
                    "type": "integer",
                    "minimum": -MAX_QUANTITY,
                    "maximum": MAX_QUANTITY,
                    "not": { "const": 0 }
                },
                "reason": { "enum": ["sale", "refund", "manual", "sync"] },
                "referenceId": optional_string()
            }
        }),
        EventKind::CustomerDeleted | EventKind::ProductDeleted | EventKind::AppointmentDeleted => {
            id_only()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn validator() -> SchemaValidator {
        SchemaValidator::strict().unwrap()
    }

    #[test]
    fn test_valid_sale() {
        let outcome = validator().validate(
            "sale.created.v1",
            &json!({
                "id": "s1",
                "total": 100.50,
                "items": [{"productId": "p1", "qty": 1, "unitPrice": 100.50}]
            }),
        );
        assert!(outcome.valid, "{:?}", outcome.errors);
    }

    #[test]
    fn test_unknown_type_is_invalid() {
        let outcome = validator().validate("pet.created.v1", &json!({"id": "x"}));
        assert!(!outcome.valid);
        assert_eq!(outcome.errors, vec!["unknown event type: pet.created.v1"]);
    }

    #[test]
    fn test_strict_rejects_unknown_fields() {
        let outcome = validator().validate(
            "product.upserted.v1",
            &json!({"id": "p1", "sku": "A", "name": "A", "price": 1, "colour": "red"}),
        );
        assert!(!outcome.valid);
        assert!(outcome.errors[0].contains("colour"));
    }

    #[test]
    fn test_strict_applies_to_nested_items() {
        let outcome = validator().validate(
            "sale.created.v1",
            &json!({
                "id": "s1",
                "total": 1,
                "items": [{"productId": "p1", "qty": 1, "unitPrice": 1, "extra": true}]
            }),
        );
        assert!(!outcome.valid);
        assert!(outcome.errors[0].contains("/items/0"));
    }

    #[test]
    fn test_lenient_mode_allows_unknown_fields() {
        let lenient = SchemaValidator::new(false).unwrap();
        let outcome = lenient.validate(
            "product.upserted.v1",
            &json!({"id": "p1", "sku": "A", "name": "A", "price": 1, "colour": "red"}),
        );
        assert!(outcome.valid);
    }

    #[test]
    fn test_date_time_format_is_asserted() {
        let outcome = validator().validate(
            "appointment.upserted.v1",
            &json!({
                "id": "a1",
                "resourceId": "r1",
                "start": "tomorrow at ten",
                "end": "2026-03-01T11:00:00Z",
                "status": "scheduled"
            }),
        );
        assert!(!outcome.valid);
        assert!(outcome.errors.iter().any(|e| e.contains("/start")));
    }

    #[test]
    fn test_zero_delta_rejected() {
        let outcome = validator().validate(
            "inventory.adjusted.v1",
            &json!({"id": "adj1", "productId": "p1", "delta": 0, "reason": "manual"}),
        );
        assert!(!outcome.valid);
    }

    #[test]
    fn test_out_of_range_numbers_rejected() {
        let v = validator();
        let adjust = |delta: Value| {
            v.validate(
                "inventory.adjusted.v1",
                &json!({"id": "adj1", "productId": "p1", "delta": delta, "reason": "sync"}),
            )
        };
        assert!(adjust(json!(MAX_QUANTITY)).valid);
        assert!(adjust(json!(-MAX_QUANTITY)).valid);
        assert!(!adjust(json!(i64::MAX)).valid);
        assert!(!adjust(json!(i64::MIN)).valid);

        let sale = |qty: Value, price: Value| {
            v.validate(
                "sale.created.v1",
                &json!({"id": "s1", "total": 1, "items": [{"productId": "p1", "qty": qty, "unitPrice": price}]}),
            )
        };
        assert!(sale(json!(2), json!(10.5)).valid);
        assert!(!sale(json!(MAX_QUANTITY + 1), json!(1)).valid);
        assert!(!sale(json!(1), json!(1e15)).valid);
    }

    #[test]
    fn test_empty_sale_items_rejected() {
        let outcome = validator().validate(
            "sale.created.v1",
            &json!({"id": "s1", "total": 0, "items": []}),
        );
        assert!(!outcome.valid);
    }

    #[test]
    fn test_register_adds_type() {
        let mut v = validator();
        v.register(
            "pet.upserted.v1",
            json!({"type": "object", "required": ["id"], "properties": {"id": {"type": "string"}}}),
        )
        .unwrap();
        assert!(v.is_registered("pet.upserted.v1"));
        assert!(v.validate("pet.upserted.v1", &json!({"id": "p"})).valid);
        assert!(!v.validate("pet.upserted.v1", &json!({"id": "p", "x": 1})).valid);
    }

    #[test]
    fn test_register_rejects_broken_schema() {
        let mut v = validator();
        let err = v.register("bad.v1", json!({"type": 12})).unwrap_err();
        assert!(matches!(err, CoreError::SchemaCompile { .. }));
    }

    #[test]
    fn test_ensure_valid_returns_schema_violation() {
        let err = validator()
            .ensure_valid("customer.deleted.v1", &json!({}))
            .unwrap_err();
        assert!(matches!(err, CoreError::SchemaViolation { .. }));
    }
}
