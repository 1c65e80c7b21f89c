//! Edge agent against a live hub over HTTP.

mod common;

use serde_json::json;

use vela_core::events::{SaleCreated, SaleLine};
use vela_core::{Money, OutboxEvent, OutboxStatus};

use vela_db::{Database, DbConfig};
use vela_sync::SyncAgent;

use common::{edge, edge_config, edge_on, spawn_hub, ENROLLMENT_KEY};

fn sale() -> SaleCreated {
    SaleCreated {
        id: "s-100".into(),
        customer_id: None,
        total: Money::parse_decimal("100.50").unwrap(),
        items: vec![
            SaleLine {
                product_id: "p1".into(),
                qty: 2,
                unit_price: Money::parse_decimal("25.25").unwrap(),
            },
            SaleLine {
                product_id: "p2".into(),
                qty: 1,
                unit_price: Money::parse_decimal("50.00").unwrap(),
            },
        ],
    }
}

fn product(id: &str, name: &str) -> serde_json::Value {
    json!({"id": id, "sku": format!("SKU-{id}"), "name": name, "price": 9.99})
}

#[tokio::test]
async fn test_sale_reaches_hub_with_exact_items() {
    let hub = spawn_hub(&[]).await;
    let (agent, edge_db) = edge(&hub.url, "t1", "dev-1").await;
    agent.activate().await.unwrap();

    let sale = sale();
    let event = edge_db.sales().create_with_event("t1", &sale).await.unwrap();

    let report = agent.push_outbox().await.unwrap();
    assert_eq!(report.accepted, 1);
    assert_eq!(report.failed, 0);

    let stored = hub.db.sales().find("t1", "s-100").await.unwrap().unwrap();
    assert_eq!(stored.total_cents, 10_050);

    let items = hub.db.sales().items("t1", "s-100").await.unwrap();
    let got: Vec<(String, i64, i64)> = items
        .iter()
        .map(|i| (i.product_id.clone(), i.qty, i.unit_price_cents))
        .collect();
    let want: Vec<(String, i64, i64)> = sale
        .items
        .iter()
        .map(|l| (l.product_id.clone(), l.qty, l.unit_price.cents()))
        .collect();
    assert_eq!(got, want);

    let row = edge_db.outbox().get(&event.id).await.unwrap();
    assert_eq!(row.status, OutboxStatus::Processed);
    assert!(row.processed_at.is_some());

    assert_eq!(hub.db.inventory().ledger_sum("t1", "p1").await.unwrap(), -2);
}

#[tokio::test]
async fn test_redelivered_event_yields_one_row() {
    let hub = spawn_hub(&[]).await;
    let (agent, _edge_db) = edge(&hub.url, "t1", "dev-1").await;
    agent.activate().await.unwrap();

    let event = OutboxEvent::new("t1", "product.upserted.v1", product("p1", "Latte"));
    let first = agent.push_events(vec![event.clone()]).await.unwrap();
    let second = agent.push_events(vec![event]).await.unwrap();
    assert_eq!((first.accepted, second.accepted), (1, 1));
    assert_eq!(second.failed, 0);

    let active = hub.db.products().list_active("t1", 10).await.unwrap();
    assert_eq!(active.len(), 1);
    assert_eq!(active[0].name, "Latte");
}

#[tokio::test]
async fn test_invalid_event_isolated_from_batch() {
    let hub = spawn_hub(&[]).await;
    let (agent, edge_db) = edge(&hub.url, "t1", "dev-1").await;
    agent.activate().await.unwrap();

    let outbox = edge_db.outbox();
    let first = outbox.enqueue("t1", "product.upserted.v1", &product("p1", "Tea")).await.unwrap();
    let broken = outbox.enqueue("t1", "product.upserted.v1", &json!({"id": "p2"})).await.unwrap();
    let third = outbox.enqueue("t1", "product.upserted.v1", &product("p3", "Cake")).await.unwrap();

    let report = agent.push_outbox().await.unwrap();
    assert_eq!(report.accepted, 2);
    assert_eq!(report.failed, 1);
    assert_eq!(report.failures[0].id, broken.id);

    assert_eq!(outbox.get(&first.id).await.unwrap().status, OutboxStatus::Processed);
    assert_eq!(outbox.get(&broken.id).await.unwrap().status, OutboxStatus::Error);
    assert_eq!(outbox.get(&third.id).await.unwrap().status, OutboxStatus::Processed);

    assert!(hub.db.products().find("t1", "p1").await.unwrap().is_some());
    assert!(hub.db.products().find("t1", "p2").await.unwrap().is_none());
    assert!(hub.db.products().find("t1", "p3").await.unwrap().is_some());
}

#[tokio::test]
async fn test_unreachable_hub_then_retry_succeeds() {
    let hub = spawn_hub(&[]).await;
    let (offline, edge_db) = edge("http://127.0.0.1:9", "t1", "dev-1").await;

    let event = edge_db
        .outbox()
        .enqueue("t1", "product.upserted.v1", &product("p1", "Scone"))
        .await
        .unwrap();

    let err = offline.push_outbox().await.unwrap_err();
    assert!(err.is_retryable());
    assert_eq!(edge_db.outbox().get(&event.id).await.unwrap().status, OutboxStatus::Error);

    let online = edge_on(edge_db.clone(), &hub.url, "t1", "dev-1");
    online.activate().await.unwrap();
    let report = online.push_outbox().await.unwrap();
    assert_eq!(report.accepted, 1);

    let row = edge_db.outbox().get(&event.id).await.unwrap();
    assert_eq!(row.status, OutboxStatus::Processed);
    assert!(row.processed_at.is_some());
}

#[tokio::test]
async fn test_push_without_activation_is_refused() {
    let hub = spawn_hub(&[]).await;
    let (agent, edge_db) = edge(&hub.url, "t1", "dev-1").await;

    let event = edge_db
        .outbox()
        .enqueue("t1", "product.upserted.v1", &product("p1", "Muffin"))
        .await
        .unwrap();

    let err = agent.push_outbox().await.unwrap_err();
    assert!(err.is_auth_error());
    assert_eq!(edge_db.outbox().get(&event.id).await.unwrap().status, OutboxStatus::Error);
    assert!(hub.db.products().find("t1", "p1").await.unwrap().is_none());
}

#[tokio::test]
async fn test_commands_leased_until_acked() {
    let hub = spawn_hub(&[]).await;
    let (agent, _edge_db) = edge(&hub.url, "t1", "dev-1").await;
    agent.activate().await.unwrap();

    let commands = hub.db.commands();
    commands
        .enqueue("t1", None, "refresh_catalog", &json!({}))
        .await
        .unwrap();
    commands
        .enqueue("t1", Some("dev-2"), "wipe_cache", &json!({}))
        .await
        .unwrap();

    let pulled = agent.pull_commands(10).await.unwrap();
    assert_eq!(pulled.len(), 1);
    assert_eq!(pulled[0]["type"], "refresh_catalog");
    assert!(agent.pull_commands(10).await.unwrap().is_empty());

    let id = pulled[0]["id"].as_str().unwrap().to_string();
    assert_eq!(agent.ack_commands(vec![id.clone()]).await.unwrap(), 1);
    assert_eq!(agent.ack_commands(vec![id]).await.unwrap(), 0);
}

#[tokio::test]
async fn test_lost_pull_is_redelivered() {
    let hub = spawn_hub(&[("SYNC_COMMAND_LEASE_SECS", "1")]).await;
    let (agent, _edge_db) = edge(&hub.url, "t1", "dev-1").await;
    agent.activate().await.unwrap();
    hub.db
        .commands()
        .enqueue("t1", None, "refresh_catalog", &json!({}))
        .await
        .unwrap();

    // Pulled but never acked
    let lost = agent.pull_commands(10).await.unwrap();
    tokio::time::sleep(std::time::Duration::from_millis(1100)).await;
    let again = agent.pull_commands(10).await.unwrap();
    assert_eq!(again.len(), 1);
    assert_eq!(again[0]["id"], lost[0]["id"]);
}

#[tokio::test]
async fn test_disabled_agent_does_nothing() {
    let hub = spawn_hub(&[]).await;
    let (agent, edge_db) = edge(&hub.url, "t1", "dev-1").await;
    agent.set_enabled(false);

    let event = edge_db
        .outbox()
        .enqueue("t1", "product.upserted.v1", &product("p1", "Bun"))
        .await
        .unwrap();

    let report = agent.push_outbox().await.unwrap();
    assert!(report.is_empty());
    assert_eq!(edge_db.outbox().get(&event.id).await.unwrap().status, OutboxStatus::Pending);
    assert!(agent.pull_commands(10).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_enrolled_device_renews_and_cannot_be_hijacked() {
    let hub = spawn_hub(&[
        ("IDENTITY_ENFORCEMENT", "true"),
        ("IDENTITY_JWKS_URL", "http://127.0.0.1:9/.well-known/jwks.json"),
    ])
    .await;
    hub.db.enrollment().set_key("t1", ENROLLMENT_KEY).await.unwrap();

    let keyed = |db: Database| {
        let mut config = edge_config(&hub.url, "t1", "dev-1");
        config.license.enrollment_key = Some(ENROLLMENT_KEY.to_string());
        SyncAgent::from_config(config, db).unwrap()
    };

    // Without a key the hub refuses to enroll
    let (anonymous, _) = edge(&hub.url, "t1", "dev-1").await;
    assert!(anonymous.activate().await.unwrap_err().is_auth_error());

    let owner_db = Database::new(DbConfig::in_memory()).await.unwrap();
    let owner = keyed(owner_db.clone());
    owner.activate().await.unwrap();
    owner.activate().await.unwrap();

    // Same key and device id from another machine
    let intruder = keyed(Database::new(DbConfig::in_memory()).await.unwrap());
    let err = intruder.activate().await.unwrap_err();
    assert!(matches!(err, vela_sync::SyncError::HubRejected { status: 409, .. }), "{err:?}");

    owner_db
        .outbox()
        .enqueue("t1", "product.upserted.v1", &product("p1", "Chai"))
        .await
        .unwrap();
    assert_eq!(owner.push_outbox().await.unwrap().accepted, 1);
}
