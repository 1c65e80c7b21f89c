//! # Repository Module
//!
//! Database repository implementations for Vela.
//!
//! ## Repository Pattern
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                                                                         │
//! │  Edge domain write / hub reconciler / license service                  │
//! │       │                                                                 │
//! │       │  db.sales().create_with_event(tenant, &sale)                   │
//! │       ▼                                                                 │
//! │  SaleRepository                                                        │
//! │  ├── apply(tenant, &sale, occurred_at)      ← hub reconciler           │
//! │  ├── create_with_event(tenant, &sale)       ← edge domain write        │
//! │  └── find / items                                                      │
//! │       │                                                                 │
//! │       │  SQL (one transaction per call)                                │
//! │       ▼                                                                 │
//! │  SQLite Database                                                       │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Convergence Rules (customers, products, appointments)
//! ```text
//! upsert(t):  applied only if t >= updated_at;  active = !(deleted_at >= t)
//! delete(t):  deleted_at = max(deleted_at, t);  active = 0 if t >= updated_at
//!             absent row → tombstone (updated_at = epoch, active = 0)
//! ```
//! Applying the same events in any order gives the state of applying them in
//! `occurredAt` order; a tie goes to the delete.
//!
//! ## Available Repositories
//!
//! - [`OutboxRepository`](outbox::OutboxRepository) - Outbox enqueue and status CAS
//! - [`CustomerRepository`](customer::CustomerRepository) - Customer upsert / soft delete
//! - [`ProductRepository`](product::ProductRepository) - Product upsert / soft delete
//! - [`InventoryRepository`](inventory::InventoryRepository) - Append-only stock ledger
//! - [`SaleRepository`](sale::SaleRepository) - Sales with atomic line replacement
//! - [`AppointmentRepository`](appointment::AppointmentRepository) - Conflict-checked booking
//! - [`TenantRepository`](tenant::TenantRepository) - Tenants, plans, subscriptions
//! - [`LicenseRepository`](license::LicenseRepository) - Issued license records
//! - [`CommandRepository`](command::CommandRepository) - Hub → edge commands, leased until acked
//! - [`EnrollmentRepository`](enrollment::EnrollmentRepository) - Per-tenant device enrollment keys

use chrono::{DateTime, SecondsFormat, Utc};
use sqlx::{Sqlite, Transaction};
use vela_core::{EventKind, OutboxEvent, SchemaValidator};

use crate::error::DbResult;
use outbox::OutboxRepository;

pub mod appointment;
pub mod command;
pub mod customer;
pub mod enrollment;
pub mod inventory;
pub mod license;
pub mod outbox;
pub mod product;
pub mod sale;
pub mod tenant;

/// Formats a timestamp for a TEXT column.
///
/// Fixed-width UTC with microseconds, so string comparison in SQL orders the
/// same way as time does.
pub fn db_time(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// `updated_at` written on tombstones: older than any real upsert.
pub(crate) fn tombstone_time() -> String {
    db_time(DateTime::<Utc>::UNIX_EPOCH)
}

/// Validates a payload and enqueues it in the caller's transaction.
///
/// A schema failure returns before anything is written, so the caller's
/// `?` drops the transaction and the domain write rolls back with it.
pub(crate) async fn enqueue_validated(
    tx: &mut Transaction<'_, Sqlite>,
    validator: &SchemaValidator,
    tenant_id: &str,
    kind: EventKind,
    payload: &serde_json::Value,
) -> DbResult<OutboxEvent> {
    validator.ensure_valid(kind.as_str(), payload)?;
    OutboxRepository::enqueue_in_tx(tx, tenant_id, kind.as_str(), payload).await
}
