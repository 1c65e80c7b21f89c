//! # Hub Client
//!
//! The agent's only way to reach the hub.
//!
//! ## Request Shape
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Hub Calls                                       │
//! │                                                                         │
//! │  push_events    POST /tenants/{id}/sync/events     x-license-token     │
//! │  pull_commands  GET  /tenants/{id}/sync/commands   x-license-token     │
//! │  ack_commands   POST /tenants/{id}/sync/commands/ack  x-license-token  │
//! │  activate       POST /licenses/activate            token held, if any  │
//! │                                                                         │
//! │  Every call: bounded timeout → SyncError::Timeout (fails closed)       │
//! │              401/403         → SyncError::Unauthorized                 │
//! │              other non-2xx   → SyncError::HubRejected                  │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! [`HubTransport`] is the seam; tests swap [`HttpHubClient`] for an
//! in-memory fake.

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use std::time::Duration;
use tracing::debug;
use url::Url;

use vela_core::protocol::{
    AckCommandsRequest, AckCommandsResponse, ActivateRequest, ActivateResponse, PullCommandsResponse, PushEventsRequest,
    PushEventsResponse, LICENSE_HEADER, TENANT_HEADER,
};

use crate::config::SyncConfig;
use crate::error::{SyncError, SyncResult};

/// Calls the agent makes against the hub.
#[async_trait]
pub trait HubTransport: Send + Sync {
    /// Sends one batch. A 2xx answer carries the per-event report.
    async fn push_events(
        &self,
        tenant_id: &str,
        token: Option<&str>,
        request: &PushEventsRequest,
    ) -> SyncResult<PushEventsResponse>;

    /// Leases up to `limit` queued commands for this device.
    async fn pull_commands(
        &self,
        tenant_id: &str,
        token: Option<&str>,
        limit: u32,
    ) -> SyncResult<PullCommandsResponse>;

    /// Confirms commands were handled so the hub stops handing them out.
    async fn ack_commands(
        &self,
        tenant_id: &str,
        token: Option<&str>,
        request: &AckCommandsRequest,
    ) -> SyncResult<AckCommandsResponse>;

    /// Requests a license for (tenant, device). `renewal` is the device's
    /// current token, which lets the hub replace it.
    async fn activate(&self, request: &ActivateRequest, renewal: Option<&str>) -> SyncResult<ActivateResponse>;
}

// =============================================================================
// HTTP Implementation
// =============================================================================

/// reqwest-backed [`HubTransport`].
#[derive(Debug, Clone)]
pub struct HttpHubClient {
    http: Client,
    base: Url,
    timeout: Duration,
    device_id: Option<String>,
}

impl HttpHubClient {
    /// Builds a client for `base_url` with a bound on every call.
    pub fn new(base_url: &str, timeout: Duration, connect_timeout: Duration) -> SyncResult<Self> {
        if timeout.is_zero() {
            return Err(SyncError::InvalidConfig("request timeout must be greater than 0".into()));
        }

        let mut base = Url::parse(base_url)?;
        if !matches!(base.scheme(), "http" | "https") {
            return Err(SyncError::InvalidUrl(format!(
                "Hub URL must start with http:// or https://, got: {}",
                base_url
            )));
        }
        // Relative joins keep any path prefix only with a trailing slash
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }

        let http = Client::builder()
            .timeout(timeout)
            .connect_timeout(connect_timeout.min(timeout))
            .user_agent(concat!("vela-sync/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| SyncError::from_reqwest(e, timeout))?;

        Ok(HttpHubClient {
            http,
            base,
            timeout,
            device_id: None,
        })
    }

    /// Builds a client from the agent configuration.
    pub fn from_config(config: &SyncConfig) -> SyncResult<Self> {
        let hub_url = config
            .hub_url()
            .ok_or_else(|| SyncError::InvalidConfig("Hub URL required for sync".into()))?;
        let client = Self::new(
            hub_url,
            config.sync.request_timeout(),
            config.sync.connect_timeout(),
        )?;
        Ok(client.with_device(config.device_id()))
    }

    /// Pulls target this device's commands as well as tenant-wide ones.
    pub fn with_device(mut self, device_id: impl Into<String>) -> Self {
        self.device_id = Some(device_id.into());
        self
    }

    pub fn base_url(&self) -> &Url {
        &self.base
    }

    fn endpoint(&self, path: &str) -> SyncResult<Url> {
        Ok(self.base.join(path)?)
    }

    fn authorize(builder: RequestBuilder, tenant_id: &str, token: Option<&str>) -> RequestBuilder {
        let builder = builder.header(TENANT_HEADER, tenant_id);
        match token {
            Some(token) => builder.header(LICENSE_HEADER, token),
            None => builder,
        }
    }

    async fn send<T: DeserializeOwned>(&self, builder: RequestBuilder) -> SyncResult<T> {
        let response = builder
            .send()
            .await
            .map_err(|e| SyncError::from_reqwest(e, self.timeout))?;
        self.read(response).await
    }

    async fn read<T: DeserializeOwned>(&self, response: Response) -> SyncResult<T> {
        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|e| format!("<unreadable body: {e}>"));
            debug!(status = status.as_u16(), "Hub answered with an error status");
            return Err(SyncError::from_status(status.as_u16(), body));
        }

        response
            .json::<T>()
            .await
            .map_err(|e| SyncError::from_reqwest(e, self.timeout))
    }
}

#[async_trait]
impl HubTransport for HttpHubClient {
    async fn push_events(
        &self,
        tenant_id: &str,
        token: Option<&str>,
        request: &PushEventsRequest,
    ) -> SyncResult<PushEventsResponse> {
        let url = self.endpoint(&format!("tenants/{}/sync/events", tenant_id))?;
        debug!(%url, count = request.events.len(), "Pushing events");
        let builder = Self::authorize(self.http.post(url), tenant_id, token).json(request);
        self.send(builder).await
    }

    async fn pull_commands(
        &self,
        tenant_id: &str,
        token: Option<&str>,
        limit: u32,
    ) -> SyncResult<PullCommandsResponse> {
        let mut url = self.endpoint(&format!("tenants/{}/sync/commands", tenant_id))?;
        {
            let mut query = url.query_pairs_mut();
            query.append_pair("limit", &limit.to_string());
            if let Some(device_id) = &self.device_id {
                query.append_pair("deviceId", device_id);
            }
        }
        debug!(%url, "Pulling commands");
        let builder = Self::authorize(self.http.get(url), tenant_id, token);
        self.send(builder).await
    }

    async fn ack_commands(
        &self,
        tenant_id: &str,
        token: Option<&str>,
        request: &AckCommandsRequest,
    ) -> SyncResult<AckCommandsResponse> {
        let url = self.endpoint(&format!("tenants/{}/sync/commands/ack", tenant_id))?;
        debug!(%url, count = request.ids.len(), "Acking commands");
        let builder = Self::authorize(self.http.post(url), tenant_id, token).json(request);
        self.send(builder).await
    }

    async fn activate(&self, request: &ActivateRequest, renewal: Option<&str>) -> SyncResult<ActivateResponse> {
        let url = self.endpoint("licenses/activate")?;
        debug!(
            %url,
            tenant_id = %request.tenant_id,
            device_id = %request.device_id,
            renewal = renewal.is_some(),
            keyed = request.enrollment_key.is_some(),
            "Activating license"
        );
        let builder = Self::authorize(self.http.post(url), &request.tenant_id, renewal).json(request);
        self.send(builder).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client(base: &str) -> HttpHubClient {
        HttpHubClient::new(base, Duration::from_secs(5), Duration::from_secs(2)).unwrap()
    }

    #[test]
    fn test_endpoint_keeps_path_prefix() {
        let c = client("https://hub.example.com/api");
        assert_eq!(
            c.endpoint("tenants/t1/sync/events").unwrap().as_str(),
            "https://hub.example.com/api/tenants/t1/sync/events"
        );

        let c = client("http://127.0.0.1:8080");
        assert_eq!(
            c.endpoint("licenses/activate").unwrap().as_str(),
            "http://127.0.0.1:8080/licenses/activate"
        );
    }

    #[test]
    fn test_rejects_non_http_urls() {
        let err = HttpHubClient::new("ws://hub", Duration::from_secs(5), Duration::from_secs(2)).unwrap_err();
        assert!(matches!(err, SyncError::InvalidUrl(_)));
    }

    #[test]
    fn test_rejects_unbounded_timeout() {
        let err = HttpHubClient::new("http://hub", Duration::ZERO, Duration::from_secs(2)).unwrap_err();
        assert!(err.is_config_error());
    }

    #[test]
    fn test_from_config_requires_hub_url() {
        let mut config = SyncConfig::new("t1", "http://hub.local");
        assert!(HttpHubClient::from_config(&config).is_ok());

        config.sync.hub_url = None;
        assert!(HttpHubClient::from_config(&config).is_err());
    }

    #[tokio::test]
    async fn test_unreachable_hub_is_retryable() {
        // Port 9 (discard) on localhost is closed in test environments
        let c = HttpHubClient::new("http://127.0.0.1:9", Duration::from_secs(2), Duration::from_secs(1)).unwrap();
        let err = c
            .push_events("t1", None, &PushEventsRequest { events: vec![] })
            .await
            .unwrap_err();
        assert!(err.is_retryable(), "unexpected error: {err:?}");
    }
}
