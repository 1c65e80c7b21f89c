//! License signing keys and their public JWK document.
//!
//! ## Key Sources
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  LICENSE_PRIVATE_KEY_PEM / _PATH set ──► load (public derived/checked)  │
//! │                                                                         │
//! │  unset + LICENSE_ALLOW_EPHEMERAL_KEYS                                   │
//! │        + APP_ENV != production       ──► generate in memory, warn      │
//! │                                                                         │
//! │  anything else                       ──► startup fails                  │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Ephemeral keys are never written anywhere: every restart is a new trust
//! root and every previously issued token stops verifying.

use std::fmt;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header};
use rsa::pkcs1::{DecodeRsaPrivateKey, DecodeRsaPublicKey};
use rsa::pkcs8::{DecodePrivateKey, DecodePublicKey, EncodePrivateKey, LineEnding};
use rsa::traits::PublicKeyParts;
use rsa::{RsaPrivateKey, RsaPublicKey};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::config::{ConfigError, Environment, LicenseConfig};

/// Modulus size of generated development keys.
const EPHEMERAL_KEY_BITS: usize = 2048;

/// One RSA public key in JWK form.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublicJwk {
    pub kty: String,
    #[serde(rename = "use")]
    pub key_use: String,
    pub alg: String,
    pub kid: String,
    pub n: String,
    pub e: String,
}

/// Body of `/.well-known/jwks.json`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JwksDocument {
    pub keys: Vec<PublicJwk>,
}

/// The hub's license key pair.
pub struct LicenseKeys {
    kid: String,
    encoding: EncodingKey,
    decoding: DecodingKey,
    public: RsaPublicKey,
    ephemeral: bool,
}

impl fmt::Debug for LicenseKeys {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LicenseKeys")
            .field("kid", &self.kid)
            .field("ephemeral", &self.ephemeral)
            .finish_non_exhaustive()
    }
}

impl LicenseKeys {
    /// Resolves the signing key for this deployment.
    ///
    /// ## Errors
    /// * `ConfigError::MissingRequired` - no key and ephemeral keys not allowed
    /// * `ConfigError::InvalidKey` - unparseable PEM, or a public key that
    ///   does not belong to the private key
    pub fn from_config(license: &LicenseConfig, environment: Environment) -> Result<Self, ConfigError> {
        if let Some(private_pem) = &license.private_key_pem {
            let keys = Self::from_pem(&license.key_id, private_pem, license.public_key_pem.as_deref())?;
            info!(kid = %keys.kid, "License signing key loaded");
            return Ok(keys);
        }

        if license.allow_ephemeral_keys && !environment.is_production() {
            warn!(
                kid = %license.key_id,
                "No license signing key configured: using an ephemeral in-memory key pair. \
                 Tokens issued now will not verify after a restart. Development only."
            );
            return Self::generate(&license.key_id);
        }

        Err(ConfigError::MissingRequired(
            "LICENSE_PRIVATE_KEY_PEM or LICENSE_PRIVATE_KEY_PATH".to_string(),
        ))
    }

    /// Loads a PEM private key, PKCS#8 or PKCS#1.
    pub fn from_pem(kid: &str, private_pem: &str, public_pem: Option<&str>) -> Result<Self, ConfigError> {
        let private = parse_private(private_pem)?;
        let public = RsaPublicKey::from(&private);

        if let Some(public_pem) = public_pem {
            if parse_public(public_pem)? != public {
                return Err(ConfigError::InvalidKey(
                    "public key does not match the private key".to_string(),
                ));
            }
        }

        let encoding = EncodingKey::from_rsa_pem(private_pem.as_bytes()).map_err(invalid)?;
        Self::assemble(kid, encoding, public, false)
    }

    /// Generates a fresh in-memory key pair.
    pub fn generate(kid: &str) -> Result<Self, ConfigError> {
        let private = RsaPrivateKey::new(&mut rand::thread_rng(), EPHEMERAL_KEY_BITS).map_err(invalid)?;
        let pem = private.to_pkcs8_pem(LineEnding::LF).map_err(invalid)?;
        let encoding = EncodingKey::from_rsa_pem(pem.as_bytes()).map_err(invalid)?;
        Self::assemble(kid, encoding, RsaPublicKey::from(&private), true)
    }

    fn assemble(kid: &str, encoding: EncodingKey, public: RsaPublicKey, ephemeral: bool) -> Result<Self, ConfigError> {
        let (n, e) = components(&public);
        let decoding = DecodingKey::from_rsa_components(&n, &e).map_err(invalid)?;
        Ok(LicenseKeys {
            kid: kid.to_string(),
            encoding,
            decoding,
            public,
            ephemeral,
        })
    }

    pub fn kid(&self) -> &str {
        &self.kid
    }

    pub fn is_ephemeral(&self) -> bool {
        self.ephemeral
    }

    /// Key the license guard verifies against.
    pub fn decoding_key(&self) -> &DecodingKey {
        &self.decoding
    }

    /// Signs `claims` with RS256, `kid` in the header.
    pub fn sign<T: Serialize>(&self, claims: &T) -> jsonwebtoken::errors::Result<String> {
        let mut header = Header::new(Algorithm::RS256);
        header.kid = Some(self.kid.clone());
        jsonwebtoken::encode(&header, claims, &self.encoding)
    }

    pub fn jwks(&self) -> JwksDocument {
        let (n, e) = components(&self.public);
        JwksDocument {
            keys: vec![PublicJwk {
                kty: "RSA".to_string(),
                key_use: "sig".to_string(),
                alg: "RS256".to_string(),
                kid: self.kid.clone(),
                n,
                e,
            }],
        }
    }
}

fn components(public: &RsaPublicKey) -> (String, String) {
    (
        URL_SAFE_NO_PAD.encode(public.n().to_bytes_be()),
        URL_SAFE_NO_PAD.encode(public.e().to_bytes_be()),
    )
}

fn parse_private(pem: &str) -> Result<RsaPrivateKey, ConfigError> {
    <RsaPrivateKey as DecodePrivateKey>::from_pkcs8_pem(pem)
        .or_else(|_| <RsaPrivateKey as DecodeRsaPrivateKey>::from_pkcs1_pem(pem))
        .map_err(invalid)
}

fn parse_public(pem: &str) -> Result<RsaPublicKey, ConfigError> {
    <RsaPublicKey as DecodePublicKey>::from_public_key_pem(pem)
        .or_else(|_| <RsaPublicKey as DecodeRsaPublicKey>::from_pkcs1_pem(pem))
        .map_err(invalid)
}

fn invalid(err: impl fmt::Display) -> ConfigError {
    ConfigError::InvalidKey(err.to_string())
}
