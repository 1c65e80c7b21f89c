//! # Database Migrations
//!
//! Embedded SQL migrations shared by edge and hub databases.
//!
//! ## Schema
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  001_outbox.sql         outbox_events, outbox_transitions, triggers    │
//! │  002_catalog.sql        customers, products, inventory_adjustments     │
//! │  003_sales.sql          sales, sale_items                              │
//! │  004_appointments.sql   appointments                                   │
//! │  005_licensing.sql      tenants, plans, subscriptions, licenses        │
//! │  006_commands.sql       sync_commands                                  │
//! │  007_outbox_rejections  outbox_events.retryable                        │
//! │  008_enrollment_keys    enrollment_keys (argon2 hashes)                │
//! │  009_command_leases     sync_commands lease + ack columns              │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Adding New Migrations
//!
//! 1. Create a new file in `migrations/sqlite/` with the next sequence number
//! 2. Name format: `NNN_description.sql`
//! 3. **NEVER** modify an applied migration, always add a new one

use sqlx::SqlitePool;
use tracing::info;

use crate::error::DbResult;

/// Embedded migrations from the `migrations/sqlite` directory.
static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!("../../migrations/sqlite");

/// Runs all pending database migrations.
///
/// Each migration runs in its own transaction and is recorded in
/// `_sqlx_migrations`.
pub async fn run_migrations(pool: &SqlitePool) -> DbResult<()> {
    info!("Checking for pending migrations");

    MIGRATOR.run(pool).await?;

    info!("All migrations applied successfully");
    Ok(())
}

/// Returns (total_migrations, applied_migrations), for diagnostics.
pub async fn migration_status(pool: &SqlitePool) -> DbResult<(usize, usize)> {
    let total = MIGRATOR.migrations.len();

    let applied: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM _sqlx_migrations")
        .fetch_one(pool)
        .await
        .unwrap_or(0);

    Ok((total, applied as usize))
}
