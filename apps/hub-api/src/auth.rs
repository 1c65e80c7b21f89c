//! Token verification for the access guards.
//!
//! ## Credentials
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  License (edge devices)              Identity (operators)              │
//! │  ─────────────────────               ────────────────────               │
//! │  x-license-token: <jwt>   (first)    Authorization: Bearer <jwt>       │
//! │  Authorization: Bearer    (fallback)                                   │
//! │                                                                         │
//! │  LicenseVerifier                     IdentityVerifier                  │
//! │  • hub's own RSA public key          • IdP JWKS, cached by kid         │
//! │  • alg ∈ {RS256, RS512, ES256}       • unknown kid: single-flight      │
//! │                                        refresh, at most one per        │
//! │                                        IDENTITY_JWKS_MIN_REFRESH_SECS  │
//! │  • exp, iss, tenantId + plan         • bounded fetch, fails closed     │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use std::collections::HashMap;
use std::time::{Duration, Instant};

use axum::http::{header, HeaderMap};
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::jwk::JwkSet;
use jsonwebtoken::{Algorithm, DecodingKey, Validation};
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};

use vela_core::protocol::LICENSE_HEADER;
use vela_core::{IdentityClaims, LicenseClaims};

use crate::config::{ConfigError, IdentityConfig};

/// Default least time between two kid-miss refreshes.
pub const DEFAULT_MIN_REFRESH_INTERVAL: Duration = Duration::from_secs(30);

/// Algorithms a presented token may be signed with.
pub const ALLOWED_ALGORITHMS: [Algorithm; 3] = [Algorithm::RS256, Algorithm::RS512, Algorithm::ES256];

/// Why a credential was refused. Logged, never sent to the client.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AuthFailure {
    #[error("no credential presented")]
    Missing,

    #[error("malformed token: {0}")]
    Malformed(String),

    #[error("algorithm {0:?} not allowed")]
    AlgorithmNotAllowed(Algorithm),

    #[error("bad signature")]
    BadSignature,

    #[error("token expired")]
    Expired,

    #[error("required claims missing: {0}")]
    Incomplete(String),

    #[error("license revoked")]
    Revoked,

    #[error("license superseded by a newer activation")]
    Superseded,

    #[error("enrollment key does not match")]
    BadEnrollmentKey,

    #[error("license belongs to another device")]
    WrongDevice,

    #[error("unknown signing key {0}")]
    UnknownKey(String),

    #[error("signing keys unavailable: {0}")]
    KeysUnavailable(String),
}

impl From<jsonwebtoken::errors::Error> for AuthFailure {
    fn from(err: jsonwebtoken::errors::Error) -> Self {
        match err.kind() {
            ErrorKind::ExpiredSignature => AuthFailure::Expired,
            ErrorKind::InvalidSignature => AuthFailure::BadSignature,
            _ => AuthFailure::Malformed(err.to_string()),
        }
    }
}

// =============================================================================
// Token Extraction
// =============================================================================

/// Where a license token was found.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenSource {
    LicenseHeader,
    Bearer,
}

type Extractor = fn(&HeaderMap) -> Option<&str>;

/// Extraction strategies, tried in order.
const LICENSE_EXTRACTORS: [(TokenSource, Extractor); 2] = [
    (TokenSource::LicenseHeader, license_header),
    (TokenSource::Bearer, bearer_token),
];

/// Token from the license header.
pub fn license_header(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(LICENSE_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|token| !token.is_empty())
}

/// Extract bearer token from the authorization header.
pub fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|token| !token.is_empty())
}

/// First license token found, dedicated header before bearer.
pub fn extract_license_token(headers: &HeaderMap) -> Option<(TokenSource, &str)> {
    LICENSE_EXTRACTORS
        .iter()
        .find_map(|(source, extract)| extract(headers).map(|token| (*source, token)))
}

fn allowed_header(token: &str) -> Result<jsonwebtoken::Header, AuthFailure> {
    let header = jsonwebtoken::decode_header(token)?;
    if !ALLOWED_ALGORITHMS.contains(&header.alg) {
        return Err(AuthFailure::AlgorithmNotAllowed(header.alg));
    }
    Ok(header)
}

// =============================================================================
// License Verifier
// =============================================================================

/// Verifies license tokens against the hub's public key.
#[derive(Clone)]
pub struct LicenseVerifier {
    key: DecodingKey,
    issuer: String,
}

impl LicenseVerifier {
    pub fn new(key: DecodingKey, issuer: impl Into<String>) -> Self {
        LicenseVerifier {
            key,
            issuer: issuer.into(),
        }
    }

    /// Checks algorithm, signature, expiry and issuer, then that tenant and
    /// plan are present.
    ///
    /// The token's own `alg` drives verification; an allowed algorithm from
    /// another key family than the configured key fails as malformed.
    pub fn verify(&self, token: &str) -> Result<LicenseClaims, AuthFailure> {
        let header = allowed_header(token)?;

        let mut validation = Validation::new(header.alg);
        validation.leeway = 0;
        validation.validate_aud = false;
        validation.set_issuer(&[self.issuer.as_str()]);
        validation.set_required_spec_claims(&["exp", "iss"]);

        let claims = jsonwebtoken::decode::<LicenseClaims>(token, &self.key, &validation)?.claims;
        claims
            .ensure_complete()
            .map_err(|e| AuthFailure::Incomplete(e.to_string()))?;
        Ok(claims)
    }
}

// =============================================================================
// Identity Verifier
// =============================================================================

/// Verifies operator tokens against an identity provider's JWKS.
///
/// A kid missing from the cache triggers a refresh, but only one fetch runs
/// at a time and none starts within `min_refresh_interval` of the previous
/// one. Tokens naming an unknown kid in between fail as `UnknownKey`.
pub struct IdentityVerifier {
    http: reqwest::Client,
    jwks_url: String,
    issuer: Option<String>,
    audience: Option<String>,
    keys: RwLock<HashMap<String, DecodingKey>>,
    /// When the last fetch started. Held across the fetch.
    last_refresh: Mutex<Option<Instant>>,
    min_refresh_interval: Duration,
}

impl IdentityVerifier {
    pub fn new(
        jwks_url: impl Into<String>,
        issuer: Option<String>,
        audience: Option<String>,
        timeout: Duration,
    ) -> Result<Self, ConfigError> {
        let jwks_url = jwks_url.into();
        url::Url::parse(&jwks_url).map_err(|_| ConfigError::InvalidValue("IDENTITY_JWKS_URL".to_string()))?;

        let http = reqwest::Client::builder()
            .timeout(timeout)
            .connect_timeout(timeout)
            .build()
            .map_err(|e| ConfigError::InvalidValue(format!("IDENTITY_JWKS_URL ({e})")))?;

        Ok(IdentityVerifier {
            http,
            jwks_url,
            issuer,
            audience,
            keys: RwLock::new(HashMap::new()),
            last_refresh: Mutex::new(None),
            min_refresh_interval: DEFAULT_MIN_REFRESH_INTERVAL,
        })
    }

    /// Sets the least time between two kid-miss refreshes.
    pub fn min_refresh_interval(mut self, interval: Duration) -> Self {
        self.min_refresh_interval = interval;
        self
    }

    /// Builds the verifier when enforcement is on.
    pub fn from_config(config: &IdentityConfig) -> Result<Option<Self>, ConfigError> {
        if !config.enforcement {
            return Ok(None);
        }
        let jwks_url = config
            .jwks_url
            .clone()
            .ok_or_else(|| ConfigError::MissingRequired("IDENTITY_JWKS_URL".to_string()))?;
        Self::new(
            jwks_url,
            config.issuer.clone(),
            config.audience.clone(),
            config.jwks_timeout(),
        )
        .map(|verifier| Some(verifier.min_refresh_interval(config.jwks_min_refresh())))
    }

    pub async fn verify(&self, token: &str) -> Result<IdentityClaims, AuthFailure> {
        let header = allowed_header(token)?;
        let kid = header
            .kid
            .ok_or_else(|| AuthFailure::Malformed("token has no kid".to_string()))?;
        let key = self.key_for(&kid).await?;

        let mut validation = Validation::new(header.alg);
        match &self.audience {
            Some(audience) => validation.set_audience(&[audience.as_str()]),
            None => validation.validate_aud = false,
        }
        if let Some(issuer) = &self.issuer {
            validation.set_issuer(&[issuer.as_str()]);
        }

        Ok(jsonwebtoken::decode::<IdentityClaims>(token, &key, &validation)?.claims)
    }

    async fn cached(&self, kid: &str) -> Option<DecodingKey> {
        self.keys.read().await.get(kid).cloned()
    }

    async fn key_for(&self, kid: &str) -> Result<DecodingKey, AuthFailure> {
        if let Some(key) = self.cached(kid).await {
            return Ok(key);
        }

        let mut last_refresh = self.last_refresh.lock().await;
        // Whoever held the lock may have fetched this kid
        if let Some(key) = self.cached(kid).await {
            return Ok(key);
        }
        if (*last_refresh).is_some_and(|at| at.elapsed() < self.min_refresh_interval) {
            debug!(%kid, "Signing key unknown, JWKS refreshed recently");
            return Err(AuthFailure::UnknownKey(kid.to_string()));
        }

        debug!(%kid, "Signing key not cached, refreshing JWKS");
        *last_refresh = Some(Instant::now());
        self.fetch().await?;
        drop(last_refresh);

        self.cached(kid)
            .await
            .ok_or_else(|| AuthFailure::UnknownKey(kid.to_string()))
    }

    /// Replaces the cached key set with the provider's current one,
    /// regardless of when it was last fetched.
    pub async fn refresh(&self) -> Result<usize, AuthFailure> {
        let mut last_refresh = self.last_refresh.lock().await;
        *last_refresh = Some(Instant::now());
        self.fetch().await
    }

    async fn fetch(&self) -> Result<usize, AuthFailure> {
        let unavailable = |e: reqwest::Error| {
            warn!(url = %self.jwks_url, error = %e, "JWKS fetch failed");
            AuthFailure::KeysUnavailable(e.to_string())
        };

        let set: JwkSet = self
            .http
            .get(&self.jwks_url)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(unavailable)?
            .json()
            .await
            .map_err(unavailable)?;

        let mut fresh = HashMap::new();
        for jwk in &set.keys {
            let Some(kid) = jwk.common.key_id.clone() else {
                continue;
            };
            match DecodingKey::from_jwk(jwk) {
                Ok(key) => {
                    fresh.insert(kid, key);
                }
                Err(e) => debug!(%kid, error = %e, "Skipping unusable JWK"),
            }
        }

        let count = fresh.len();
        *self.keys.write().await = fresh;
        info!(keys = count, "Identity JWKS refreshed");
        Ok(count)
    }
}
