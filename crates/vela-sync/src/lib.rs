//! # vela-sync: Edge Sync Agent for Vela
//!
//! Offline-first propagation of local changes to the hub. Domain writes
//! commit together with an outbox row (vela-db); this crate drains those
//! rows in the background and pulls hub commands back.
//!
//! ## Architecture Overview
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        Edge Sync Architecture                           │
//! │                                                                         │
//! │  Domain write ──► [products + outbox_events] (one local transaction)   │
//! │                                   │                                     │
//! │  ┌────────────────────────────────▼─────────────────────────────────┐  │
//! │  │                      SyncAgent                                   │  │
//! │  │  timer + on-demand triggers, one push at a time, kill-switch     │  │
//! │  └────────────────────────────────┬─────────────────────────────────┘  │
//! │                                   │                                     │
//! │         ┌─────────────────────────┼──────────────────────┐             │
//! │         ▼                         ▼                      ▼              │
//! │  ┌────────────────┐  ┌─────────────────────┐  ┌────────────────────┐   │
//! │  │OutboxProcessor │  │  HttpHubClient      │  │ LicenseTokenHolder │   │
//! │  │ validate, CAS  │  │  reqwest, bounded   │  │ x-license-token    │   │
//! │  │ status updates │  │  timeouts           │  │                    │   │
//! │  └────────────────┘  └─────────────────────┘  └────────────────────┘   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Module Organization
//! - [`agent`] - `SyncAgent` orchestrator and background cycle
//! - [`client`] - `HubTransport` seam and its reqwest implementation
//! - [`config`] - TOML + environment configuration
//! - [`error`] - Sync error types
//! - [`license_token`] - The credential presented on sync calls
//! - [`outbox`] - The push algorithm over the outbox store
//!
//! ## Usage
//! ```rust,ignore
//! let config = SyncConfig::load(None)?;
//! let db = Database::new(DbConfig::new("./edge.db")).await?;
//! let agent = Arc::new(SyncAgent::from_config(config, db)?);
//!
//! agent.activate().await?;
//! let (handle, mut commands) = Arc::clone(&agent).spawn();
//! while let Some(command) = commands.recv().await {
//!     // apply locally
//! }
//! handle.shutdown().await?;
//! ```

pub mod agent;
pub mod client;
pub mod config;
pub mod error;
pub mod license_token;
pub mod outbox;

#[cfg(test)]
pub(crate) mod testing;

pub use agent::{SyncAgent, SyncAgentHandle, SyncStatus};
pub use client::{HttpHubClient, HubTransport};
pub use config::SyncConfig;
pub use error::{SyncError, SyncResult};
pub use license_token::{LicenseToken, LicenseTokenHolder};
pub use outbox::{OutboxProcessor, PushReport};
