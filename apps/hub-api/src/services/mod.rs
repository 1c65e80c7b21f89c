//! Hub service layer.
//!
//! Handlers stay thin: they authorize and decode, then call into these.

pub mod ingest_service;
pub mod license_service;

pub use ingest_service::IngestService;
pub use license_service::{ActivationProof, LicenseService};
