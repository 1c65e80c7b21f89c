//! # vela-core: Pure Logic for the Vela Sync Engine
//!
//! Everything the edge and the hub must agree on, with zero I/O.
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        Vela Architecture                                │
//! │                                                                         │
//! │  ┌──────────────────────────┐          ┌──────────────────────────┐    │
//! │  │   vela-sync (edge)       │  HTTPS   │   vela-hub (hub)         │    │
//! │  │   outbox → push/pull     │ ───────► │   guards → ingest        │    │
//! │  └────────────┬─────────────┘          └────────────┬─────────────┘    │
//! │               │                                     │                   │
//! │  ┌────────────▼─────────────────────────────────────▼─────────────┐   │
//! │  │                    vela-db (SQLite)                             │   │
//! │  └─────────────────────────────┬───────────────────────────────────┘   │
//! │                                │                                        │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │               ★ vela-core (THIS CRATE) ★                        │   │
//! │  │                                                                 │   │
//! │  │   ┌──────────┐ ┌──────────┐ ┌──────────┐ ┌──────────┐          │   │
//! │  │   │  events  │ │  schema  │ │ schedule │ │ license  │          │   │
//! │  │   │ EventKind│ │ Validator│ │ Interval │ │  Claims  │          │   │
//! │  │   └──────────┘ └──────────┘ └──────────┘ └──────────┘          │   │
//! │  │   ┌──────────┐ ┌──────────┐ ┌──────────┐ ┌──────────┐          │   │
//! │  │   │  types   │ │  money   │ │ protocol │ │validation│          │   │
//! │  │   │  Outbox  │ │  cents   │ │ wire JSON│ │   ids    │          │   │
//! │  │   └──────────┘ └──────────┘ └──────────┘ └──────────┘          │   │
//! │  │                                                                 │   │
//! │  │   NO I/O • NO DATABASE • NO NETWORK • PURE FUNCTIONS           │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`types`] - Outbox state machine and stored entities
//! - [`events`] - Closed event catalogue and typed payloads
//! - [`schema`] - Event Schema Validator (JSON Schema per event type)
//! - [`schedule`] - Interval overlap rule for appointments
//! - [`license`] - License and identity claim sets
//! - [`protocol`] - Edge ↔ hub JSON bodies
//! - [`money`] - Integer cents with exact decimal parsing
//! - [`validation`] - Identifier and limit checks
//! - [`error`] - Domain error types
//!
//! ## Example Usage
//!
//! ```rust
//! use vela_core::schema::SchemaValidator;
//! use vela_core::events::{DomainEvent, EventKind};
//! use serde_json::json;
//!
//! let validator = SchemaValidator::strict().unwrap();
//! let payload = json!({
//!     "id": "s1",
//!     "total": 100.50,
//!     "items": [{ "productId": "p1", "qty": 1, "unitPrice": 100.50 }]
//! });
//!
//! assert!(validator.validate("sale.created.v1", &payload).valid);
//!
//! let event = DomainEvent::decode(EventKind::SaleCreated, &payload).unwrap();
//! assert_eq!(event.entity_id(), "s1");
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod error;
pub mod events;
pub mod license;
pub mod money;
pub mod protocol;
pub mod schedule;
pub mod schema;
pub mod types;
pub mod validation;

// =============================================================================
// Re-exports for Convenience
// =============================================================================

pub use error::{CoreError, CoreResult, ValidationError};
pub use events::{DomainEvent, EventKind};
pub use license::{IdentityClaims, LicenseClaims};
pub use money::Money;
pub use schema::{SchemaValidator, ValidationOutcome};
pub use types::*;

// =============================================================================
// Crate-Level Constants
// =============================================================================

/// Events drained per push when the caller does not say otherwise.
pub const DEFAULT_BATCH_SIZE: usize = 100;

/// Plan provisioned for tenants that activate without any plan data.
pub const DEFAULT_PLAN_KEY: &str = "starter";
