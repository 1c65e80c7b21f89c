//! # Event Catalogue
//!
//! The closed set of event kinds exchanged between edge and hub, and their
//! typed payloads.
//!
//! ## Dispatch
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  "sale.created.v1" ──► EventKind::parse ──► Some(EventKind::SaleCreated)│
//! │  "pet.created.v1"  ──► EventKind::parse ──► None  (logged + skipped)   │
//! │                                                                         │
//! │  EventKind + payload ──► DomainEvent::decode ──► DomainEvent::Sale(..) │
//! │                                                   │                     │
//! │                                    exhaustive match in the reconciler   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Payload fields are camelCase on the wire. Money fields are JSON decimals
//! decoded exactly (see [`crate::money::decimal`]).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use ts_rs::TS;

use crate::error::{CoreError, CoreResult, ValidationError};
use crate::money::Money;
use crate::types::{AdjustmentReason, AppointmentStatus};

// =============================================================================
// Event Kind
// =============================================================================

/// Every event type this version understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    CustomerUpserted,
    CustomerDeleted,
    ProductUpserted,
    ProductDeleted,
    SaleCreated,
    AppointmentUpserted,
    AppointmentDeleted,
    InventoryAdjusted,
}

impl EventKind {
    pub const ALL: [EventKind; 8] = [
        EventKind::CustomerUpserted,
        EventKind::CustomerDeleted,
        EventKind::ProductUpserted,
        EventKind::ProductDeleted,
        EventKind::SaleCreated,
        EventKind::AppointmentUpserted,
        EventKind::AppointmentDeleted,
        EventKind::InventoryAdjusted,
    ];

    /// Wire name, including the version suffix.
    pub const fn as_str(&self) -> &'static str {
        match self {
            EventKind::CustomerUpserted => "customer.upserted.v1",
            EventKind::CustomerDeleted => "customer.deleted.v1",
            EventKind::ProductUpserted => "product.upserted.v1",
            EventKind::ProductDeleted => "product.deleted.v1",
            EventKind::SaleCreated => "sale.created.v1",
            EventKind::AppointmentUpserted => "appointment.upserted.v1",
            EventKind::AppointmentDeleted => "appointment.deleted.v1",
            EventKind::InventoryAdjusted => "inventory.adjusted.v1",
        }
    }

    /// Looks up a wire name. Unknown or future types return `None`.
    pub fn parse(event_type: &str) -> Option<EventKind> {
        EventKind::ALL.into_iter().find(|k| k.as_str() == event_type)
    }

    pub const fn aggregate(&self) -> &'static str {
        match self {
            EventKind::CustomerUpserted | EventKind::CustomerDeleted => "customer",
            EventKind::ProductUpserted | EventKind::ProductDeleted => "product",
            EventKind::SaleCreated => "sale",
            EventKind::AppointmentUpserted | EventKind::AppointmentDeleted => "appointment",
            EventKind::InventoryAdjusted => "inventory",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// Payloads
// =============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub struct CustomerUpserted {
    pub id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
}

/// Payload of every `*.deleted.v1` event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub struct EntityDeleted {
    pub id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub struct ProductUpserted {
    pub id: String,
    pub sku: String,
    pub name: String,
    #[serde(with = "crate::money::decimal")]
    #[ts(type = "number")]
    pub price: Money,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub struct SaleLine {
    pub product_id: String,
    pub qty: i64,
    #[serde(with = "crate::money::decimal")]
    #[ts(type = "number")]
    pub unit_price: Money,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub struct SaleCreated {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub customer_id: Option<String>,
    #[serde(with = "crate::money::decimal")]
    #[ts(type = "number")]
    pub total: Money,
    pub items: Vec<SaleLine>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub struct AppointmentUpserted {
    pub id: String,
    pub resource_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub customer_id: Option<String>,
    #[ts(as = "String")]
    pub start: DateTime<Utc>,
    #[ts(as = "String")]
    pub end: DateTime<Utc>,
    pub status: AppointmentStatus,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub struct InventoryAdjusted {
    /// Adjustment id, the ledger's idempotency key.
    pub id: String,
    pub product_id: String,
    pub delta: i64,
    pub reason: AdjustmentReason,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reference_id: Option<String>,
}

// =============================================================================
// Domain Event
// =============================================================================

/// A decoded event: kind and typed payload together.
#[derive(Debug, Clone, PartialEq)]
pub enum DomainEvent {
    CustomerUpserted(CustomerUpserted),
    CustomerDeleted(EntityDeleted),
    ProductUpserted(ProductUpserted),
    ProductDeleted(EntityDeleted),
    SaleCreated(SaleCreated),
    AppointmentUpserted(AppointmentUpserted),
    AppointmentDeleted(EntityDeleted),
    InventoryAdjusted(InventoryAdjusted),
}

impl DomainEvent {
    /// Decodes a payload that already passed schema validation.
    ///
    /// Catches what a JSON Schema cannot express: exact cents, and
    /// `end > start`.
    pub fn decode(kind: EventKind, payload: &serde_json::Value) -> CoreResult<DomainEvent> {
        let p = payload.clone();
        let event = match kind {
            EventKind::CustomerUpserted => DomainEvent::CustomerUpserted(serde_json::from_value(p)?),
            EventKind::CustomerDeleted => DomainEvent::CustomerDeleted(serde_json::from_value(p)?),
            EventKind::ProductUpserted => DomainEvent::ProductUpserted(serde_json::from_value(p)?),
            EventKind::ProductDeleted => DomainEvent::ProductDeleted(serde_json::from_value(p)?),
            EventKind::SaleCreated => DomainEvent::SaleCreated(serde_json::from_value(p)?),
            EventKind::AppointmentUpserted => {
                DomainEvent::AppointmentUpserted(serde_json::from_value(p)?)
            }
            EventKind::AppointmentDeleted => {
                DomainEvent::AppointmentDeleted(serde_json::from_value(p)?)
            }
            EventKind::InventoryAdjusted => {
                DomainEvent::InventoryAdjusted(serde_json::from_value(p)?)
            }
        };

        if let DomainEvent::AppointmentUpserted(appt) = &event {
            if appt.end <= appt.start {
                return Err(ValidationError::InvalidFormat {
                    field: "end".to_string(),
                    reason: "must be after start".to_string(),
                }
                .into());
            }
        }

        Ok(event)
    }

    pub fn kind(&self) -> EventKind {
        match self {
            DomainEvent::CustomerUpserted(_) => EventKind::CustomerUpserted,
            DomainEvent::CustomerDeleted(_) => EventKind::CustomerDeleted,
            DomainEvent::ProductUpserted(_) => EventKind::ProductUpserted,
            DomainEvent::ProductDeleted(_) => EventKind::ProductDeleted,
            DomainEvent::SaleCreated(_) => EventKind::SaleCreated,
            DomainEvent::AppointmentUpserted(_) => EventKind::AppointmentUpserted,
            DomainEvent::AppointmentDeleted(_) => EventKind::AppointmentDeleted,
            DomainEvent::InventoryAdjusted(_) => EventKind::InventoryAdjusted,
        }
    }

    /// Id of the entity the event is about.
    pub fn entity_id(&self) -> &str {
        match self {
            DomainEvent::CustomerUpserted(p) => &p.id,
            DomainEvent::ProductUpserted(p) => &p.id,
            DomainEvent::SaleCreated(p) => &p.id,
            DomainEvent::AppointmentUpserted(p) => &p.id,
            DomainEvent::InventoryAdjusted(p) => &p.id,
            DomainEvent::CustomerDeleted(p)
            | DomainEvent::ProductDeleted(p)
            | DomainEvent::AppointmentDeleted(p) => &p.id,
        }
    }

    /// Serializes the payload for the outbox.
    pub fn to_payload(&self) -> CoreResult<serde_json::Value> {
        let value = match self {
            DomainEvent::CustomerUpserted(p) => serde_json::to_value(p),
            DomainEvent::ProductUpserted(p) => serde_json::to_value(p),
            DomainEvent::SaleCreated(p) => serde_json::to_value(p),
            DomainEvent::AppointmentUpserted(p) => serde_json::to_value(p),
            DomainEvent::InventoryAdjusted(p) => serde_json::to_value(p),
            DomainEvent::CustomerDeleted(p)
            | DomainEvent::ProductDeleted(p)
            | DomainEvent::AppointmentDeleted(p) => serde_json::to_value(p),
        };
        value.map_err(CoreError::from)
    }
}
