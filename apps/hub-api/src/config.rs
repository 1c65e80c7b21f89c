//! Hub configuration module.
//!
//! Configuration is loaded from environment variables with fallback to
//! defaults. Key material may be given inline (`*_PEM`) or as a file path
//! (`*_PATH`); inline wins.

use std::env;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

/// Deployment environment, from `APP_ENV`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Environment {
    Development,
    Production,
}

impl Environment {
    fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "development" | "dev" | "local" | "test" => Some(Environment::Development),
            "production" | "prod" => Some(Environment::Production),
            _ => None,
        }
    }

    pub fn is_production(&self) -> bool {
        matches!(self, Environment::Production)
    }
}

/// License issuance and verification settings.
#[derive(Debug, Clone)]
pub struct LicenseConfig {
    /// When false the license guard lets every request through.
    pub enforcement: bool,

    /// RSA private key (PKCS#8 or PKCS#1 PEM) used to sign licenses.
    pub private_key_pem: Option<String>,

    /// Public key (SPKI or PKCS#1 PEM). Derived from the private key when absent.
    pub public_key_pem: Option<String>,

    /// `kid` stamped on every token and published in the JWKS.
    pub key_id: String,

    /// `iss` claim of issued tokens; the guard rejects any other issuer.
    pub issuer: String,

    /// License lifetime when the plan does not end sooner.
    pub default_ttl_days: i64,

    /// Grace period used when the plan carries none.
    pub grace_days: i64,

    /// Generate an in-memory key pair when no key is configured.
    /// Refused in production.
    pub allow_ephemeral_keys: bool,
}

/// Identity-provider settings for operator routes.
#[derive(Debug, Clone)]
pub struct IdentityConfig {
    pub enforcement: bool,
    pub jwks_url: Option<String>,
    pub issuer: Option<String>,
    pub audience: Option<String>,
    pub jwks_timeout_secs: u64,

    /// Least time between two JWKS fetches triggered by unknown kids.
    pub jwks_min_refresh_secs: u64,
}

impl IdentityConfig {
    pub fn jwks_timeout(&self) -> Duration {
        Duration::from_secs(self.jwks_timeout_secs)
    }

    pub fn jwks_min_refresh(&self) -> Duration {
        Duration::from_secs(self.jwks_min_refresh_secs)
    }
}

/// Hub configuration.
#[derive(Debug, Clone)]
pub struct HubConfig {
    /// Listen address
    pub bind_addr: SocketAddr,

    /// SQLite database file
    pub database_path: PathBuf,

    pub environment: Environment,

    pub license: LicenseConfig,

    pub identity: IdentityConfig,

    /// Reject scoped requests whose tenant cannot be resolved
    pub tenant_required: bool,

    /// Maximum events accepted in one push (also the command pull ceiling)
    pub sync_batch_size_limit: usize,

    /// Commands returned per pull when the caller gives no limit
    pub commands_default_limit: i64,

    /// How long a pulled command stays hidden waiting for its ack
    pub command_lease_secs: i64,
}

impl HubConfig {
    /// Load configuration from environment variables.
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(|key| env::var(key).ok())
    }

    /// Load configuration through `lookup` instead of the process environment.
    pub fn load_from<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let environment = match var("APP_ENV") {
            Some(value) => Environment::parse(&value)
                .ok_or_else(|| ConfigError::InvalidValue("APP_ENV".to_string()))?,
            None => Environment::Development,
        };

        let config = HubConfig {
            bind_addr: parse(&var, "HUB_BIND_ADDR", "0.0.0.0:8080")?,

            database_path: var("DATABASE_PATH")
                .unwrap_or_else(|| "./vela_hub.db".to_string())
                .into(),

            environment,

            license: LicenseConfig {
                enforcement: parse(&var, "LICENSE_ENFORCEMENT", "true")?,
                private_key_pem: pem(&var, "LICENSE_PRIVATE_KEY_PEM", "LICENSE_PRIVATE_KEY_PATH")?,
                public_key_pem: pem(&var, "LICENSE_PUBLIC_KEY_PEM", "LICENSE_PUBLIC_KEY_PATH")?,
                key_id: var("LICENSE_KEY_ID").unwrap_or_else(|| "vela-license-1".to_string()),
                issuer: var("LICENSE_ISSUER").unwrap_or_else(|| "vela-hub".to_string()),
                default_ttl_days: parse(&var, "LICENSE_DEFAULT_TTL_DAYS", "30")?,
                grace_days: parse(&var, "LICENSE_GRACE_DAYS", "7")?,
                allow_ephemeral_keys: parse(&var, "LICENSE_ALLOW_EPHEMERAL_KEYS", "false")?,
            },

            identity: IdentityConfig {
                enforcement: parse(&var, "IDENTITY_ENFORCEMENT", "false")?,
                jwks_url: var("IDENTITY_JWKS_URL"),
                issuer: var("IDENTITY_ISSUER"),
                audience: var("IDENTITY_AUDIENCE"),
                jwks_timeout_secs: parse(&var, "IDENTITY_JWKS_TIMEOUT_SECS", "5")?,
                jwks_min_refresh_secs: parse(&var, "IDENTITY_JWKS_MIN_REFRESH_SECS", "30")?,
            },

            tenant_required: parse(&var, "TENANT_REQUIRED", "true")?,

            sync_batch_size_limit: parse(&var, "SYNC_BATCH_SIZE_LIMIT", "1000")?,

            commands_default_limit: parse(&var, "SYNC_COMMANDS_DEFAULT_LIMIT", "100")?,

            command_lease_secs: parse(&var, "SYNC_COMMAND_LEASE_SECS", "60")?,
        };

        config.validate()?;
        Ok(config)
    }

    /// Checks cross-field rules.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.license.allow_ephemeral_keys && self.environment.is_production() {
            return Err(ConfigError::InvalidValue(
                "LICENSE_ALLOW_EPHEMERAL_KEYS (not allowed in production)".to_string(),
            ));
        }
        if self.license.default_ttl_days <= 0 {
            return Err(ConfigError::InvalidValue("LICENSE_DEFAULT_TTL_DAYS".to_string()));
        }
        if self.license.grace_days < 0 {
            return Err(ConfigError::InvalidValue("LICENSE_GRACE_DAYS".to_string()));
        }
        if self.identity.enforcement && self.identity.jwks_url.is_none() {
            return Err(ConfigError::MissingRequired("IDENTITY_JWKS_URL".to_string()));
        }
        if self.identity.jwks_timeout_secs == 0 {
            return Err(ConfigError::InvalidValue("IDENTITY_JWKS_TIMEOUT_SECS".to_string()));
        }
        if self.sync_batch_size_limit == 0 {
            return Err(ConfigError::InvalidValue("SYNC_BATCH_SIZE_LIMIT".to_string()));
        }
        if self.commands_default_limit <= 0 {
            return Err(ConfigError::InvalidValue("SYNC_COMMANDS_DEFAULT_LIMIT".to_string()));
        }
        if self.command_lease_secs <= 0 {
            return Err(ConfigError::InvalidValue("SYNC_COMMAND_LEASE_SECS".to_string()));
        }
        Ok(())
    }

    pub fn command_lease(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.command_lease_secs)
    }

    /// Largest command page a device may ask for.
    pub fn commands_max_limit(&self) -> i64 {
        i64::try_from(self.sync_batch_size_limit).unwrap_or(i64::MAX)
    }
}

fn parse<T, V>(var: &V, key: &str, default: &str) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    V: Fn(&str) -> Option<String>,
{
    var(key)
        .unwrap_or_else(|| default.to_string())
        .trim()
        .parse()
        .map_err(|_| ConfigError::InvalidValue(key.to_string()))
}

fn pem<V>(var: &V, inline_key: &str, path_key: &str) -> Result<Option<String>, ConfigError>
where
    V: Fn(&str) -> Option<String>,
{
    if let Some(inline) = var(inline_key) {
        // Single-line env values often carry literal "\n"
        return Ok(Some(inline.replace("\\n", "\n")));
    }
    match var(path_key) {
        Some(path) => std::fs::read_to_string(&path)
            .map(Some)
            .map_err(|e| ConfigError::KeyFile {
                path,
                reason: e.to_string(),
            }),
        None => Ok(None),
    }
}

/// Configuration error types.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid value for {0}")]
    InvalidValue(String),

    #[error("Missing required configuration: {0}")]
    MissingRequired(String),

    #[error("Cannot read key file {path}: {reason}")]
    KeyFile { path: String, reason: String },

    #[error("Invalid license key: {0}")]
    InvalidKey(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn load(vars: &[(&str, &str)]) -> Result<HubConfig, ConfigError> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        HubConfig::load_from(|key| vars.get(key).cloned())
    }

    #[test]
    fn test_defaults() {
        let config = load(&[]).unwrap();
        assert_eq!(config.bind_addr.port(), 8080);
        assert_eq!(config.environment, Environment::Development);
        assert!(config.license.enforcement);
        assert!(!config.license.allow_ephemeral_keys);
        assert_eq!(config.license.key_id, "vela-license-1");
        assert_eq!(config.license.default_ttl_days, 30);
        assert!(!config.identity.enforcement);
        assert!(config.tenant_required);
        assert_eq!(config.sync_batch_size_limit, 1000);
        assert_eq!(config.commands_default_limit, 100);
        assert_eq!(config.command_lease(), chrono::Duration::seconds(60));
    }

    #[test]
    fn test_command_lease_must_be_positive() {
        let err = load(&[("SYNC_COMMAND_LEASE_SECS", "0")]).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue(ref key) if key == "SYNC_COMMAND_LEASE_SECS"));
    }

    #[test]
    fn test_invalid_number_is_reported_by_name() {
        let err = load(&[("SYNC_BATCH_SIZE_LIMIT", "lots")]).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue(ref key) if key == "SYNC_BATCH_SIZE_LIMIT"));
    }

    #[test]
    fn test_ephemeral_keys_refused_in_production() {
        let err = load(&[("APP_ENV", "production"), ("LICENSE_ALLOW_EPHEMERAL_KEYS", "true")]).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue(_)));

        let config = load(&[("APP_ENV", "development"), ("LICENSE_ALLOW_EPHEMERAL_KEYS", "true")]).unwrap();
        assert!(config.license.allow_ephemeral_keys);
    }

    #[test]
    fn test_identity_enforcement_needs_jwks_url() {
        let err = load(&[("IDENTITY_ENFORCEMENT", "true")]).unwrap_err();
        assert!(matches!(err, ConfigError::MissingRequired(_)));

        let config = load(&[
            ("IDENTITY_ENFORCEMENT", "true"),
            ("IDENTITY_JWKS_URL", "https://idp.example.com/.well-known/jwks.json"),
        ])
        .unwrap();
        assert_eq!(config.identity.jwks_timeout(), Duration::from_secs(5));
        assert_eq!(config.identity.jwks_min_refresh(), Duration::from_secs(30));
    }

    #[test]
    fn test_inline_pem_unescapes_newlines() {
        let config = load(&[("LICENSE_PRIVATE_KEY_PEM", "-----BEGIN X-----\\nabc\\n-----END X-----")]).unwrap();
        let pem = config.license.private_key_pem.unwrap();
        assert_eq!(pem.lines().count(), 3);
    }

    #[test]
    fn test_key_path_is_read() {
        let path = concat!(env!("CARGO_MANIFEST_DIR"), "/testdata/license_public.pem");
        let config = load(&[("LICENSE_PUBLIC_KEY_PATH", path)]).unwrap();
        assert!(config.license.public_key_pem.unwrap().contains("BEGIN PUBLIC KEY"));

        let err = load(&[("LICENSE_PRIVATE_KEY_PATH", "/nonexistent/key.pem")]).unwrap_err();
        assert!(matches!(err, ConfigError::KeyFile { .. }));
    }

    #[test]
    fn test_unknown_environment_rejected() {
        assert!(load(&[("APP_ENV", "staging-ish")]).is_err());
        assert!(load(&[("APP_ENV", "PRODUCTION")]).unwrap().environment.is_production());
    }
}
