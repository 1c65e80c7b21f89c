//! # Vela Hub
//!
//! HTTP service that edge nodes push their outbox to, pull commands from,
//! and activate licenses against.
//!
//! ## Architecture
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                             Hub Service                                 │
//! │                                                                         │
//! │  ┌──────────────────┐   ┌──────────────────┐   ┌─────────────────────┐ │
//! │  │  Guards          │   │  Routes          │   │  Services           │ │
//! │  │                  │   │                  │   │                     │ │
//! │  │ • license (JWT)  │──►│ • sync events    │──►│ • IngestService     │ │
//! │  │ • identity (IdP) │   │ • sync commands  │   │ • LicenseService    │ │
//! │  │ • tenant scope   │   │ • licenses       │   │                     │ │
//! │  └──────────────────┘   │ • jwks, health   │   └──────────┬──────────┘ │
//! │                         └──────────────────┘              │            │
//! │                                                           ▼            │
//! │  ┌──────────────────┐                          ┌─────────────────────┐ │
//! │  │  LicenseKeys     │                          │  vela-db (SQLite)   │ │
//! │  │  RS256 + JWKS    │                          │  same schema as the │ │
//! │  └──────────────────┘                          │  edge               │ │
//! │                                                └─────────────────────┘ │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Configuration
//! Environment variables, see [`HubConfig`]:
//! - `HUB_BIND_ADDR` - listen address (default: 0.0.0.0:8080)
//! - `DATABASE_PATH` - SQLite file (default: ./vela_hub.db)
//! - `APP_ENV` - `development` or `production`
//! - `LICENSE_PRIVATE_KEY_PEM` / `LICENSE_PRIVATE_KEY_PATH` - signing key
//! - `LICENSE_ENFORCEMENT`, `IDENTITY_ENFORCEMENT`, `TENANT_REQUIRED` - guard toggles

use std::sync::Arc;

use vela_db::Database;

pub mod auth;
pub mod config;
pub mod error;
pub mod keys;
pub mod middleware;
pub mod routes;
pub mod services;

// Re-exports
pub use config::{ConfigError, HubConfig};
pub use error::{ApiError, ApiResult};
pub use keys::LicenseKeys;

use crate::auth::{IdentityVerifier, LicenseVerifier};
use crate::services::{IngestService, LicenseService};

/// Shared application state.
pub struct AppState {
    pub db: Database,
    pub config: HubConfig,
    pub keys: Arc<LicenseKeys>,
    pub ingest: IngestService,
    pub licenses: LicenseService,
    pub verifier: LicenseVerifier,
    pub identity: Option<IdentityVerifier>,
}

pub type SharedState = Arc<AppState>;

impl AppState {
    pub fn new(config: HubConfig, db: Database, keys: LicenseKeys) -> Result<SharedState, ConfigError> {
        let keys = Arc::new(keys);
        let identity = IdentityVerifier::from_config(&config.identity)?;

        Ok(Arc::new(AppState {
            ingest: IngestService::new(db.clone()),
            licenses: LicenseService::new(db.clone(), keys.clone(), config.license.clone())
                .open_enrollment(!config.identity.enforcement),
            verifier: LicenseVerifier::new(keys.decoding_key().clone(), config.license.issuer.clone()),
            identity,
            keys,
            db,
            config,
        }))
    }
}

/// Builds the full router for `state`.
pub fn app(state: SharedState) -> axum::Router {
    routes::router(state)
}
