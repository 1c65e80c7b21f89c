//! Live hub on an ephemeral port, shared by the end-to-end tests.

#![allow(dead_code)]

use std::collections::HashMap;

use tokio::net::TcpListener;

use vela_db::{Database, DbConfig};
use vela_hub::{AppState, HubConfig, LicenseKeys, SharedState};
use vela_sync::{SyncAgent, SyncConfig};

pub const LICENSE_PRIVATE: &str = include_str!("../../testdata/license_private.pem");
pub const OTHER_PRIVATE: &str = include_str!("../../testdata/other_private.pem");
pub const ENROLLMENT_KEY: &str = "t1-enrollment-key-0001";

pub struct TestHub {
    pub url: String,
    pub db: Database,
    pub state: SharedState,
    handle: tokio::task::JoinHandle<()>,
}

impl Drop for TestHub {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

/// Starts a hub configured from `vars` on 127.0.0.1.
pub async fn spawn_hub(vars: &[(&str, &str)]) -> TestHub {
    let vars: HashMap<String, String> = vars.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
    let config = HubConfig::load_from(|key| vars.get(key).cloned()).unwrap();
    let db = Database::new(DbConfig::in_memory()).await.unwrap();
    let keys = LicenseKeys::from_pem(&config.license.key_id, LICENSE_PRIVATE, None).unwrap();
    let state = AppState::new(config, db.clone(), keys).unwrap();

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let app = vela_hub::app(state.clone());
    let handle = tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    TestHub {
        url: format!("http://{addr}"),
        db,
        state,
        handle,
    }
}

/// An edge agent for `tenant_id`/`device_id` over HTTP, with its own store.
pub async fn edge(hub_url: &str, tenant_id: &str, device_id: &str) -> (SyncAgent, Database) {
    let db = Database::new(DbConfig::in_memory()).await.unwrap();
    (edge_on(db.clone(), hub_url, tenant_id, device_id), db)
}

pub fn edge_on(db: Database, hub_url: &str, tenant_id: &str, device_id: &str) -> SyncAgent {
    SyncAgent::from_config(edge_config(hub_url, tenant_id, device_id), db).unwrap()
}

/// Edge config with short timeouts for `tenant_id`/`device_id`.
pub fn edge_config(hub_url: &str, tenant_id: &str, device_id: &str) -> SyncConfig {
    let mut config = SyncConfig::new(tenant_id, hub_url);
    config.device.id = device_id.to_string();
    config.sync.request_timeout_secs = 5;
    config.sync.connect_timeout_secs = 2;
    config
}
