//! # License Token Holder
//!
//! The credential the agent presents on every sync call.
//!
//! The token is opaque here: the hub verifies it. The holder only keeps the
//! metadata returned at activation so status reports can show the plan and
//! expiry without decoding anything.

use chrono::{DateTime, Utc};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{info, warn};

use vela_core::protocol::ActivateResponse;

/// Stored license and what the hub said about it.
#[derive(Clone)]
pub struct LicenseToken {
    pub token: String,
    pub plan: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
}

impl LicenseToken {
    /// Past `expires_at`. Unknown expiry counts as valid; the hub decides.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|exp| now >= exp)
    }
}

// Hand-written so the token never shows up in logs
impl std::fmt::Debug for LicenseToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LicenseToken")
            .field("token", &"<redacted>")
            .field("plan", &self.plan)
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

/// Shared, swappable license credential.
#[derive(Debug, Clone, Default)]
pub struct LicenseTokenHolder {
    inner: Arc<RwLock<Option<LicenseToken>>>,
}

impl LicenseTokenHolder {
    /// Starts with a configured token (metadata unknown) or empty.
    pub fn new(initial: Option<String>) -> Self {
        let token = initial
            .filter(|t| !t.trim().is_empty())
            .map(|token| LicenseToken {
                token,
                plan: None,
                expires_at: None,
            });
        LicenseTokenHolder {
            inner: Arc::new(RwLock::new(token)),
        }
    }

    /// The raw token to present, if any.
    pub async fn current(&self) -> Option<String> {
        let guard = self.inner.read().await;
        let token = guard.as_ref()?;
        if token.is_expired(Utc::now()) {
            warn!(expires_at = ?token.expires_at, "Presenting an expired license; activation needed");
        }
        Some(token.token.clone())
    }

    pub async fn snapshot(&self) -> Option<LicenseToken> {
        self.inner.read().await.clone()
    }

    /// Stores the result of an activation.
    pub async fn store(&self, response: &ActivateResponse) {
        let token = LicenseToken {
            token: response.token.clone(),
            plan: Some(response.plan.clone()),
            expires_at: Some(response.expires_at),
        };
        *self.inner.write().await = Some(token);
        info!(plan = %response.plan, expires_at = %response.expires_at, "License token updated");
    }

    pub async fn clear(&self) {
        *self.inner.write().await = None;
    }

    pub async fn is_present(&self) -> bool {
        self.inner.read().await.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use std::collections::BTreeMap;

    fn activation(expires_in: Duration) -> ActivateResponse {
        ActivateResponse {
            token: "header.claims.sig".to_string(),
            expires_at: Utc::now() + expires_in,
            plan: "starter".to_string(),
            plan_id: None,
            entitlements: BTreeMap::new(),
            max_seats: 5,
            max_devices: 3,
            grace_days: 7,
        }
    }

    #[tokio::test]
    async fn test_blank_initial_token_is_ignored() {
        let holder = LicenseTokenHolder::new(Some("   ".to_string()));
        assert!(!holder.is_present().await);
        assert!(holder.current().await.is_none());
    }

    #[tokio::test]
    async fn test_store_replaces_token() {
        let holder = LicenseTokenHolder::new(Some("old".to_string()));
        holder.store(&activation(Duration::days(30))).await;

        assert_eq!(holder.current().await.as_deref(), Some("header.claims.sig"));
        let snapshot = holder.snapshot().await.unwrap();
        assert_eq!(snapshot.plan.as_deref(), Some("starter"));
        assert!(!snapshot.is_expired(Utc::now()));

        holder.clear().await;
        assert!(holder.current().await.is_none());
    }

    #[tokio::test]
    async fn test_expired_token_is_still_presented() {
        let holder = LicenseTokenHolder::default();
        holder.store(&activation(Duration::seconds(-5))).await;
        let snapshot = holder.snapshot().await.unwrap();
        assert!(snapshot.is_expired(Utc::now()));
        assert!(holder.current().await.is_some());
    }

    #[test]
    fn test_debug_redacts_token() {
        let token = LicenseToken {
            token: "secret-token".to_string(),
            plan: None,
            expires_at: None,
        };
        assert!(!format!("{token:?}").contains("secret-token"));
    }
}
