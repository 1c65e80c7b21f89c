//! # Domain Types
//!
//! Core domain types shared by the edge and the hub.
//!
//! ## Type Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Domain Types                                    │
//! │                                                                         │
//! │  ┌─────────────────┐   ┌─────────────────┐   ┌─────────────────┐       │
//! │  │  OutboxEvent    │   │    Product      │   │  Appointment    │       │
//! │  │  ─────────────  │   │  ─────────────  │   │  ─────────────  │       │
//! │  │  id (UUID)      │   │  id, sku, name  │   │  resource_id    │       │
//! │  │  event_type     │   │  price_cents    │   │  starts_at      │       │
//! │  │  payload (JSON) │   │  stock_qty ◄────┼───┤  ends_at        │       │
//! │  │  status         │   │  (ledger only)  │   │  status         │       │
//! │  └─────────────────┘   └─────────────────┘   └─────────────────┘       │
//! │                                                                         │
//! │  ┌─────────────────┐   ┌─────────────────┐   ┌─────────────────┐       │
//! │  │  OutboxStatus   │   │AdjustmentReason │   │AppointmentStatus│       │
//! │  │  pending        │   │  sale           │   │  scheduled      │       │
//! │  │  validating     │   │  refund         │   │  confirmed      │       │
//! │  │  sending        │   │  manual         │   │  completed      │       │
//! │  │  sent/processed │   │  sync           │   │  cancelled      │       │
//! │  │  error          │   └─────────────────┘   │  no_show        │       │
//! │  └─────────────────┘                         └─────────────────┘       │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Tenant Scoping
//! Every stored entity carries `tenant_id`. Entity ids are only unique
//! within a tenant, so every lookup takes both.

use chrono::{DateTime, SubsecRound, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use ts_rs::TS;
use uuid::Uuid;

use crate::error::{CoreError, CoreResult};
use crate::money::Money;

// =============================================================================
// Outbox Status
// =============================================================================

/// Lifecycle of an outbox row.
///
/// ## State Machine
/// ```text
///  pending ──► validating ──► sending ──► sent ──► processed
///     ▲            │            │  │                  ▲
///     │            ▼            ▼  └──────────────────┘
///     └─────────  error ◄───────┘
///                   │
///                   └──────────► sending   (direct retry)
/// ```
///
/// Moves are monotonic except `error → pending` and `error → sending`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "lowercase"))]
#[ts(export)]
#[serde(rename_all = "lowercase")]
pub enum OutboxStatus {
    /// Written with the domain change, waiting for the agent.
    Pending,
    /// Being checked against its schema.
    Validating,
    /// Part of an in-flight push.
    Sending,
    /// Hub acknowledged the batch; per-event outcome not yet recorded.
    Sent,
    /// Failed validation or transport; eligible for retry.
    Error,
    /// Done. Never picked up again.
    Processed,
}

impl OutboxStatus {
    /// Every status, in lifecycle order.
    pub const ALL: [OutboxStatus; 6] = [
        OutboxStatus::Pending,
        OutboxStatus::Validating,
        OutboxStatus::Sending,
        OutboxStatus::Sent,
        OutboxStatus::Error,
        OutboxStatus::Processed,
    ];

    /// Statuses the agent drains from.
    pub const DRAINABLE: [OutboxStatus; 2] = [OutboxStatus::Pending, OutboxStatus::Error];

    pub const fn as_str(&self) -> &'static str {
        match self {
            OutboxStatus::Pending => "pending",
            OutboxStatus::Validating => "validating",
            OutboxStatus::Sending => "sending",
            OutboxStatus::Sent => "sent",
            OutboxStatus::Error => "error",
            OutboxStatus::Processed => "processed",
        }
    }

    /// Whether the state machine allows `self → next`.
    pub fn can_transition_to(&self, next: OutboxStatus) -> bool {
        use OutboxStatus::*;
        matches!(
            (self, next),
            (Pending, Validating)
                | (Validating, Sending)
                | (Validating, Error)
                | (Sending, Sent)
                | (Sending, Processed)
                | (Sending, Error)
                | (Sent, Processed)
                | (Error, Pending)
                | (Error, Sending)
        )
    }

    /// Statuses a row may be in for a move to `self` to be legal.
    ///
    /// Used as the `WHERE status IN (...)` precondition of a
    /// compare-and-set update.
    pub fn predecessors(&self) -> Vec<OutboxStatus> {
        OutboxStatus::ALL
            .into_iter()
            .filter(|from| from.can_transition_to(*self))
            .collect()
    }

    /// Checks a transition, returning the typed error when it is not allowed.
    pub fn ensure_transition(&self, next: OutboxStatus) -> Result<(), CoreError> {
        if self.can_transition_to(next) {
            Ok(())
        } else {
            Err(CoreError::InvalidTransition {
                from: self.to_string(),
                to: next.to_string(),
            })
        }
    }

    /// Payload is frozen from here on.
    pub const fn is_delivered(&self) -> bool {
        matches!(self, OutboxStatus::Sent | OutboxStatus::Processed)
    }
}

impl fmt::Display for OutboxStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OutboxStatus {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        OutboxStatus::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| CoreError::MalformedPayload(format!("unknown outbox status: {s}")))
    }
}

impl Default for OutboxStatus {
    fn default() -> Self {
        OutboxStatus::Pending
    }
}

// =============================================================================
// Outbox Event
// =============================================================================

/// An immutable fact about a domain change, queued for transmission.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct OutboxEvent {
    pub id: String,
    pub tenant_id: String,
    /// Dotted type with version suffix, e.g. `sale.created.v1`.
    pub event_type: String,
    /// First segment of `event_type`.
    pub aggregate: String,
    /// Snapshot of the entity at write time.
    #[ts(type = "unknown")]
    pub payload: serde_json::Value,
    pub status: OutboxStatus,
    /// Number of push attempts that reached `sending`.
    pub attempts: i64,
    #[ts(as = "String")]
    pub created_at: DateTime<Utc>,
    #[ts(as = "String")]
    pub updated_at: DateTime<Utc>,
    #[ts(as = "Option<String>")]
    pub processed_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
}

impl OutboxEvent {
    /// Builds a fresh `pending` event with a new UUID.
    ///
    /// Used for the in-memory "fire now" path and by the repository when
    /// enqueuing.
    pub fn new(tenant_id: &str, event_type: &str, payload: serde_json::Value) -> Self {
        // Stored with microsecond precision
        let now = Utc::now().trunc_subsecs(6);
        OutboxEvent {
            id: Uuid::new_v4().to_string(),
            tenant_id: tenant_id.to_string(),
            event_type: event_type.to_string(),
            aggregate: aggregate_of(event_type).to_string(),
            payload,
            status: OutboxStatus::Pending,
            attempts: 0,
            created_at: now,
            updated_at: now,
            processed_at: None,
            last_error: None,
        }
    }
}

/// Derives the aggregate from an event type (`sale.created.v1` → `sale`).
pub fn aggregate_of(event_type: &str) -> &str {
    event_type.split('.').next().unwrap_or(event_type)
}

/// One recorded status change of an outbox row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[ts(export)]
pub struct OutboxTransition {
    pub event_id: String,
    /// `None` for the initial insert.
    pub from_status: Option<OutboxStatus>,
    pub to_status: OutboxStatus,
    #[ts(as = "String")]
    pub at: DateTime<Utc>,
    pub detail: Option<String>,
}

// =============================================================================
// Appointment Status
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "snake_case"))]
#[ts(export)]
#[serde(rename_all = "snake_case")]
pub enum AppointmentStatus {
    Scheduled,
    Confirmed,
    Completed,
    Cancelled,
    NoShow,
}

impl AppointmentStatus {
    pub const ALL: [AppointmentStatus; 5] = [
        AppointmentStatus::Scheduled,
        AppointmentStatus::Confirmed,
        AppointmentStatus::Completed,
        AppointmentStatus::Cancelled,
        AppointmentStatus::NoShow,
    ];

    pub const fn as_str(&self) -> &'static str {
        match self {
            AppointmentStatus::Scheduled => "scheduled",
            AppointmentStatus::Confirmed => "confirmed",
            AppointmentStatus::Completed => "completed",
            AppointmentStatus::Cancelled => "cancelled",
            AppointmentStatus::NoShow => "no_show",
        }
    }

    /// Whether an appointment in this status occupies its slot.
    ///
    /// Cancelled and no-show appointments never block a booking.
    pub const fn blocks_schedule(&self) -> bool {
        !matches!(self, AppointmentStatus::Cancelled | AppointmentStatus::NoShow)
    }
}

impl fmt::Display for AppointmentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Default for AppointmentStatus {
    fn default() -> Self {
        AppointmentStatus::Scheduled
    }
}

// =============================================================================
// Adjustment Reason
// =============================================================================

/// Why a stock quantity changed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "lowercase"))]
#[ts(export)]
#[serde(rename_all = "lowercase")]
pub enum AdjustmentReason {
    Sale,
    Refund,
    Manual,
    /// Applied from a peer node's event.
    Sync,
}

impl AdjustmentReason {
    pub const fn as_str(&self) -> &'static str {
        match self {
            AdjustmentReason::Sale => "sale",
            AdjustmentReason::Refund => "refund",
            AdjustmentReason::Manual => "manual",
            AdjustmentReason::Sync => "sync",
        }
    }
}

impl fmt::Display for AdjustmentReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// Stored Entities
// =============================================================================

/// A customer record. Soft-deleted via `active = false`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[ts(export)]
pub struct Customer {
    pub tenant_id: String,
    pub id: String,
    pub name: String,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub active: bool,
    #[ts(as = "String")]
    pub updated_at: DateTime<Utc>,
    #[ts(as = "Option<String>")]
    pub deleted_at: Option<DateTime<Utc>>,
}

/// A product. `stock_qty` is a projection of the inventory ledger.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[ts(export)]
pub struct Product {
    pub tenant_id: String,
    pub id: String,
    pub sku: String,
    pub name: String,
    pub price_cents: i64,
    /// Only ever changed by applying an inventory adjustment.
    pub stock_qty: i64,
    pub active: bool,
    #[ts(as = "String")]
    pub updated_at: DateTime<Utc>,
    #[ts(as = "Option<String>")]
    pub deleted_at: Option<DateTime<Utc>>,
}

impl Product {
    #[inline]
    pub fn price(&self) -> Money {
        Money::from_cents(self.price_cents)
    }
}

/// A sale header.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[ts(export)]
pub struct Sale {
    pub tenant_id: String,
    pub id: String,
    pub customer_id: Option<String>,
    pub total_cents: i64,
    #[ts(as = "String")]
    pub occurred_at: DateTime<Utc>,
    #[ts(as = "String")]
    pub updated_at: DateTime<Utc>,
}

impl Sale {
    #[inline]
    pub fn total(&self) -> Money {
        Money::from_cents(self.total_cents)
    }
}

/// A sale line. Lines are replaced as a set whenever the sale is re-applied.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[ts(export)]
pub struct SaleItem {
    pub tenant_id: String,
    pub sale_id: String,
    pub line_no: i64,
    pub product_id: String,
    pub qty: i64,
    pub unit_price_cents: i64,
}

impl SaleItem {
    #[inline]
    pub fn unit_price(&self) -> Money {
        Money::from_cents(self.unit_price_cents)
    }

    /// `unit_price * qty`, or `InvalidAmount` when it overflows.
    pub fn line_total(&self) -> CoreResult<Money> {
        self.unit_price().multiply_quantity(self.qty)
    }
}

/// A booked slot on a resource (professional, room, table).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct Appointment {
    pub tenant_id: String,
    pub id: String,
    pub resource_id: String,
    pub customer_id: Option<String>,
    #[ts(as = "String")]
    pub starts_at: DateTime<Utc>,
    #[ts(as = "String")]
    pub ends_at: DateTime<Utc>,
    pub status: AppointmentStatus,
    pub active: bool,
    #[ts(as = "String")]
    pub updated_at: DateTime<Utc>,
    #[ts(as = "Option<String>")]
    pub deleted_at: Option<DateTime<Utc>>,
}

/// One immutable row of the stock ledger.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[ts(export)]
pub struct InventoryAdjustment {
    pub tenant_id: String,
    /// Idempotency key. Re-applying an id is a no-op.
    pub id: String,
    pub product_id: String,
    /// Signed, never zero.
    pub delta: i64,
    pub reason: AdjustmentReason,
    pub reference_id: Option<String>,
    #[ts(as = "String")]
    pub created_at: DateTime<Utc>,
}

impl InventoryAdjustment {
    /// Deterministic id for the stock movement of one sale line.
    pub fn sale_line_id(sale_id: &str, line_no: i64) -> String {
        format!("sale:{sale_id}:{line_no}")
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_outbox_happy_path_transitions() {
        use OutboxStatus::*;
        assert!(Pending.can_transition_to(Validating));
        assert!(Validating.can_transition_to(Sending));
        assert!(Sending.can_transition_to(Sent));
        assert!(Sent.can_transition_to(Processed));
        assert!(Sending.can_transition_to(Processed));
    }

    #[test]
    fn test_outbox_only_error_moves_backwards() {
        use OutboxStatus::*;
        assert!(Error.can_transition_to(Pending));
        assert!(Error.can_transition_to(Sending));
        assert!(!Processed.can_transition_to(Pending));
        assert!(!Sent.can_transition_to(Sending));
        assert!(!Sending.can_transition_to(Pending));
        assert!(!Pending.can_transition_to(Sending));
        assert!(!Processed.can_transition_to(Error));
    }

    #[test]
    fn test_predecessors() {
        use OutboxStatus::*;
        assert_eq!(Pending.predecessors(), vec![Error]);
        assert_eq!(Sending.predecessors(), vec![Validating, Error]);
        assert_eq!(Processed.predecessors(), vec![Sending, Sent]);
        assert_eq!(Error.predecessors(), vec![Validating, Sending]);
    }

    #[test]
    fn test_ensure_transition_error_message() {
        let err = OutboxStatus::Processed
            .ensure_transition(OutboxStatus::Pending)
            .unwrap_err();
        assert_eq!(err.to_string(), "Outbox status cannot move from processed to pending");
    }

    #[test]
    fn test_status_parse_roundtrip() {
        for status in OutboxStatus::ALL {
            assert_eq!(status.as_str().parse::<OutboxStatus>().unwrap(), status);
        }
        assert!("done".parse::<OutboxStatus>().is_err());
    }

    #[test]
    fn test_aggregate_of() {
        assert_eq!(aggregate_of("sale.created.v1"), "sale");
        assert_eq!(aggregate_of("inventory.adjusted.v1"), "inventory");
        assert_eq!(aggregate_of("bare"), "bare");
    }

    #[test]
    fn test_new_outbox_event_is_pending() {
        let event = OutboxEvent::new("t1", "product.upserted.v1", serde_json::json!({"id": "p1"}));
        assert_eq!(event.status, OutboxStatus::Pending);
        assert_eq!(event.aggregate, "product");
        assert_eq!(event.attempts, 0);
        assert!(event.processed_at.is_none());
    }

    #[test]
    fn test_cancelled_and_no_show_do_not_block() {
        assert!(AppointmentStatus::Scheduled.blocks_schedule());
        assert!(AppointmentStatus::Completed.blocks_schedule());
        assert!(!AppointmentStatus::Cancelled.blocks_schedule());
        assert!(!AppointmentStatus::NoShow.blocks_schedule());
    }

    #[test]
    fn test_sale_line_adjustment_id() {
        assert_eq!(InventoryAdjustment::sale_line_id("s-1", 2), "sale:s-1:2");
    }

    #[test]
    fn test_line_total_overflow_is_rejected() {
        let mut item = SaleItem {
            tenant_id: "t1".into(),
            sale_id: "s1".into(),
            line_no: 1,
            product_id: "p1".into(),
            qty: 3,
            unit_price_cents: 250,
        };
        assert_eq!(item.line_total().unwrap(), Money::from_cents(750));

        item.qty = i64::MAX;
        assert!(matches!(item.line_total(), Err(CoreError::InvalidAmount { .. })));
    }
}
