//! # vela-db: Database Layer for Vela
//!
//! SQLite access shared by the edge agent and the hub, via sqlx.
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                          Vela Data Flow                                 │
//! │                                                                         │
//! │  Edge domain write            Hub ingestion / license service          │
//! │       │                               │                                 │
//! │       ▼                               ▼                                 │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │                     vela-db (THIS CRATE)                        │   │
//! │  │                                                                 │   │
//! │  │   ┌───────────────┐    ┌───────────────┐    ┌──────────────┐  │   │
//! │  │   │   Database    │    │  Repositories │    │  Migrations  │  │   │
//! │  │   │   (pool.rs)   │    │               │    │  (embedded)  │  │   │
//! │  │   │               │    │ Outbox        │    │              │  │   │
//! │  │   │ SqlitePool    │◄───│ Product/Inv.  │    │ 001_outbox   │  │   │
//! │  │   │ SchemaValid.  │    │ Sale, Appt.   │    │ 002_catalog  │  │   │
//! │  │   │               │    │ Tenant, Lic.  │    │ ...          │  │   │
//! │  │   └───────────────┘    └───────────────┘    └──────────────┘  │   │
//! │  │                                                                 │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │                     SQLite Database (WAL)                       │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Module Organization
//!
//! - [`pool`] - Connection pool creation and configuration
//! - [`migrations`] - Embedded database migrations
//! - [`error`] - Database error types
//! - [`repository`] - Repository implementations
//!
//! ## Usage
//!
//! ```rust,ignore
//! use vela_db::{Database, DbConfig};
//!
//! let db = Database::new(DbConfig::new("path/to/edge.db")).await?;
//!
//! // Domain write and outbox row commit together
//! let event = db.products().upsert_with_event("t1", &product).await?;
//!
//! // The sync agent drains them later
//! let batch = db.outbox().fetch_drainable(100).await?;
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod error;
pub mod migrations;
pub mod pool;
pub mod repository;

// =============================================================================
// Re-exports
// =============================================================================

pub use error::{DbError, DbResult};
pub use pool::{Database, DbConfig};

// Repository re-exports for convenience
pub use repository::appointment::{AppointmentRepository, SaveOutcome};
pub use repository::command::CommandRepository;
pub use repository::customer::CustomerRepository;
pub use repository::enrollment::EnrollmentRepository;
pub use repository::inventory::InventoryRepository;
pub use repository::license::{LicenseRecord, LicenseRepository, LicenseState};
pub use repository::outbox::{OutboxRepository, RecoveryReport};
pub use repository::product::ProductRepository;
pub use repository::sale::SaleRepository;
pub use repository::tenant::{PlanSource, ResolvedPlan, TenantRepository};
