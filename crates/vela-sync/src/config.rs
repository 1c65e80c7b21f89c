//! # Sync Configuration
//!
//! Configuration for the edge agent.
//!
//! ## Configuration Sources
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Configuration Priority                               │
//! │                                                                         │
//! │  1. Environment Variables (highest priority)                           │
//! │     VELA_HUB_URL=https://hub.example.com                               │
//! │     VELA_TENANT_ID=acme                                                │
//! │                                                                         │
//! │  2. TOML Config File                                                   │
//! │     ~/.config/vela/sync.toml (Linux)                                   │
//! │     ~/Library/Application Support/com.vela.edge/sync.toml (macOS)      │
//! │                                                                         │
//! │  3. Default Values (lowest priority)                                   │
//! │     sync enabled, batch of 100, auto-generated device_id               │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Configuration File Format
//! ```toml
//! # sync.toml
//! [device]
//! id = "550e8400-e29b-41d4-a716-446655440000"
//! name = "Front Desk"
//!
//! [tenant]
//! id = "acme"
//!
//! [sync]
//! enabled = true
//! hub_url = "https://hub.example.com"
//! batch_size = 100
//! poll_interval_secs = 30
//! request_timeout_secs = 15
//!
//! [license]
//! # token = "eyJhbGciOiJSUzI1NiIs..."
//! # enrollment_key = "..."   first activation only
//! ```

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::{SyncError, SyncResult};

// =============================================================================
// Device Configuration
// =============================================================================

/// Configuration for this device.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceConfig {
    /// Unique device identifier. Licenses are issued per (tenant, device).
    /// Auto-generated on first run if not provided.
    #[serde(default = "default_device_id")]
    pub id: String,

    /// Human-readable device name (e.g., "Front Desk").
    #[serde(default = "default_device_name")]
    pub name: String,
}

fn default_device_id() -> String {
    Uuid::new_v4().to_string()
}

fn default_device_name() -> String {
    "Edge Node".to_string()
}

impl Default for DeviceConfig {
    fn default() -> Self {
        DeviceConfig {
            id: default_device_id(),
            name: default_device_name(),
        }
    }
}

// =============================================================================
// Tenant Configuration
// =============================================================================

/// The tenant this edge node belongs to.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TenantConfig {
    #[serde(default)]
    pub id: String,
}

// =============================================================================
// Sync Settings
// =============================================================================

/// Sync behavior settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncSettings {
    /// Kill-switch. When false, push and pull are no-op successes.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Base URL of the hub (`http://` or `https://`).
    #[serde(default)]
    pub hub_url: Option<String>,

    /// Events drained per push.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Interval between background cycles (seconds).
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,

    /// Bound on every hub call, connect included (seconds).
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,

    /// Connection timeout (seconds).
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,

    /// Initial backoff after a failed cycle (milliseconds).
    #[serde(default = "default_initial_backoff")]
    pub initial_backoff_ms: u64,

    /// Maximum backoff after repeated failures (seconds).
    #[serde(default = "default_max_backoff")]
    pub max_backoff_secs: u64,
}

fn default_true() -> bool {
    true
}
fn default_batch_size() -> usize {
    vela_core::DEFAULT_BATCH_SIZE
}
fn default_poll_interval() -> u64 {
    30
}
fn default_request_timeout() -> u64 {
    15
}
fn default_connect_timeout() -> u64 {
    5
}
fn default_initial_backoff() -> u64 {
    500
}
fn default_max_backoff() -> u64 {
    60
}

impl Default for SyncSettings {
    fn default() -> Self {
        SyncSettings {
            enabled: default_true(),
            hub_url: None,
            batch_size: default_batch_size(),
            poll_interval_secs: default_poll_interval(),
            request_timeout_secs: default_request_timeout(),
            connect_timeout_secs: default_connect_timeout(),
            initial_backoff_ms: default_initial_backoff(),
            max_backoff_secs: default_max_backoff(),
        }
    }
}

impl SyncSettings {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }
}

// =============================================================================
// License Settings
// =============================================================================

/// A previously activated license, and the tenant key used to get the
/// first one.
///
/// Never logged.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LicenseSettings {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,

    /// Sent on activation so a device without a current license can enroll.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enrollment_key: Option<String>,
}

// =============================================================================
// Main Sync Configuration
// =============================================================================

/// Complete edge configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SyncConfig {
    #[serde(default)]
    pub device: DeviceConfig,

    #[serde(default)]
    pub tenant: TenantConfig,

    #[serde(default)]
    pub sync: SyncSettings,

    #[serde(default)]
    pub license: LicenseSettings,
}

impl SyncConfig {
    /// Creates a config for `tenant_id` talking to `hub_url`, defaults elsewhere.
    pub fn new(tenant_id: impl Into<String>, hub_url: impl Into<String>) -> Self {
        let mut config = Self::default();
        config.tenant.id = tenant_id.into();
        config.sync.hub_url = Some(hub_url.into());
        config
    }

    /// Loads configuration from file, environment, and defaults.
    ///
    /// ## Load Order (later overrides earlier)
    /// 1. Default values
    /// 2. Config file (sync.toml)
    /// 3. Environment variables
    pub fn load(config_path: Option<PathBuf>) -> SyncResult<Self> {
        let mut config = Self::default();

        if let Some(path) = config_path.or_else(Self::default_config_path) {
            if path.exists() {
                info!(?path, "Loading sync config from file");
                let contents = std::fs::read_to_string(&path)?;
                config = toml::from_str(&contents)?;
            } else {
                debug!(?path, "Config file not found, using defaults");
            }
        }

        config.apply_env_overrides();
        config.validate()?;

        Ok(config)
    }

    /// Saves configuration to file.
    pub fn save(&self, config_path: Option<PathBuf>) -> SyncResult<()> {
        let path = config_path
            .or_else(Self::default_config_path)
            .ok_or_else(|| SyncError::ConfigSaveFailed("No config path available".into()))?;

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let contents = toml::to_string_pretty(self)?;
        std::fs::write(&path, contents)?;

        info!(?path, "Sync config saved");
        Ok(())
    }

    /// Validates the configuration.
    pub fn validate(&self) -> SyncResult<()> {
        if self.device.id.trim().is_empty() {
            return Err(SyncError::MissingDeviceId);
        }

        if self.tenant.id.trim().is_empty() {
            return Err(SyncError::MissingTenantId);
        }

        if let Some(ref url) = self.sync.hub_url {
            if !url.starts_with("http://") && !url.starts_with("https://") {
                return Err(SyncError::InvalidUrl(format!(
                    "Hub URL must start with http:// or https://, got: {}",
                    url
                )));
            }
            url::Url::parse(url)?;
        }

        if self.sync.batch_size == 0 {
            return Err(SyncError::InvalidConfig(
                "batch_size must be greater than 0".into(),
            ));
        }

        // Hub calls are never unbounded
        if self.sync.request_timeout_secs == 0 {
            return Err(SyncError::InvalidConfig(
                "request_timeout_secs must be greater than 0".into(),
            ));
        }

        Ok(())
    }

    /// Applies environment variable overrides.
    fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    /// Applies overrides from any key lookup; `VELA_*` names.
    pub(crate) fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(id) = lookup("VELA_DEVICE_ID") {
            debug!(device_id = %id, "Overriding device ID from environment");
            self.device.id = id;
        }

        if let Some(name) = lookup("VELA_DEVICE_NAME") {
            self.device.name = name;
        }

        if let Some(id) = lookup("VELA_TENANT_ID") {
            debug!(tenant_id = %id, "Overriding tenant ID from environment");
            self.tenant.id = id;
        }

        if let Some(url) = lookup("VELA_HUB_URL") {
            debug!(url = %url, "Overriding hub URL from environment");
            self.sync.hub_url = Some(url);
        }

        if let Some(enabled) = lookup("VELA_SYNC_ENABLED") {
            match enabled.to_lowercase().as_str() {
                "1" | "true" | "yes" | "on" => self.sync.enabled = true,
                "0" | "false" | "no" | "off" => self.sync.enabled = false,
                _ => warn!(value = %enabled, "Unknown VELA_SYNC_ENABLED value in environment"),
            }
        }

        if let Some(size) = lookup("VELA_SYNC_BATCH_SIZE") {
            match size.parse::<usize>() {
                Ok(n) => self.sync.batch_size = n,
                Err(_) => warn!(value = %size, "Ignoring non-numeric VELA_SYNC_BATCH_SIZE"),
            }
        }

        if let Some(token) = lookup("VELA_LICENSE_TOKEN") {
            debug!("Using license token from environment");
            self.license.token = Some(token);
        }

        if let Some(key) = lookup("VELA_ENROLLMENT_KEY") {
            debug!("Using enrollment key from environment");
            self.license.enrollment_key = Some(key);
        }
    }

    /// Returns the default config file path.
    fn default_config_path() -> Option<PathBuf> {
        directories::ProjectDirs::from("com", "vela", "edge")
            .map(|dirs| dirs.config_dir().join("sync.toml"))
    }

    // =========================================================================
    // Convenience Methods
    // =========================================================================

    pub fn device_id(&self) -> &str {
        &self.device.id
    }

    pub fn tenant_id(&self) -> &str {
        &self.tenant.id
    }

    pub fn hub_url(&self) -> Option<&str> {
        self.sync.hub_url.as_deref()
    }
}
