//! Event ingestion.
//!
//! ## Per-Event Pipeline
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  for each event in the push (one at a time, independent outcomes)      │
//! │                                                                         │
//! │  EventKind::parse(type)                                                 │
//! │     └── None ─────────────────────────────► skipped (logged)           │
//! │  SchemaValidator::validate(type, payload)                               │
//! │     └── invalid ──────────────────────────► failed, not retryable      │
//! │  DomainEvent::decode                                                    │
//! │     └── err ──────────────────────────────► failed, not retryable      │
//! │  apply (idempotent upsert / soft delete / ledger delta)                │
//! │     ├── conflict, validation ─────────────► failed, not retryable      │
//! │     ├── storage busy ─────────────────────► failed, retryable          │
//! │     └── ok ───────────────────────────────► accepted                   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use chrono::{DateTime, Utc};
use tracing::{debug, error, info, warn};

use vela_core::protocol::{EventFailure, PushEventsResponse, WireEvent};
use vela_core::{DomainEvent, EventKind};
use vela_db::{Database, DbError, SaveOutcome};

/// Reason given for failures the edge should simply resend.
const RETRY_LATER: &str = "storage temporarily unavailable, retry later";

/// Applies pushed events to the hub store.
#[derive(Debug, Clone)]
pub struct IngestService {
    db: Database,
}

impl IngestService {
    pub fn new(db: Database) -> Self {
        IngestService { db }
    }

    /// Applies a batch for one tenant. Never fails as a whole.
    pub async fn ingest(&self, tenant_id: &str, events: &[WireEvent]) -> PushEventsResponse {
        let mut report = PushEventsResponse::default();

        for event in events {
            match self.ingest_one(tenant_id, event).await {
                Ok(Outcome::Applied) => report.accepted += 1,
                Ok(Outcome::Skipped) => report.skipped += 1,
                Err(failure) => {
                    report.failed += 1;
                    report.errors.push(failure);
                }
            }
        }

        info!(
            tenant_id = %tenant_id,
            received = events.len(),
            accepted = report.accepted,
            failed = report.failed,
            skipped = report.skipped,
            "Push ingested"
        );
        report
    }

    async fn ingest_one(&self, tenant_id: &str, event: &WireEvent) -> Result<Outcome, EventFailure> {
        let Some(kind) = EventKind::parse(&event.event_type) else {
            warn!(
                tenant_id = %tenant_id,
                event_id = %event.id,
                event_type = %event.event_type,
                "Unknown event type, skipping"
            );
            return Ok(Outcome::Skipped);
        };

        let outcome = self.db.validator().validate(kind.as_str(), &event.payload);
        if !outcome.valid {
            debug!(event_id = %event.id, errors = ?outcome.errors, "Event failed schema validation");
            return Err(failure(event, outcome.errors.join("; "), false));
        }

        let domain = DomainEvent::decode(kind, &event.payload)
            .map_err(|e| failure(event, e.to_string(), false))?;

        self.apply(tenant_id, &domain, event.occurred_at)
            .await
            .map_err(|e| storage_failure(event, e))?;

        debug!(tenant_id = %tenant_id, event_id = %event.id, event_type = %kind, "Event applied");
        Ok(Outcome::Applied)
    }

    async fn apply(&self, tenant_id: &str, event: &DomainEvent, at: DateTime<Utc>) -> Result<(), DbError> {
        match event {
            DomainEvent::CustomerUpserted(customer) => {
                self.db.customers().upsert(tenant_id, customer, at).await?;
            }
            DomainEvent::CustomerDeleted(deleted) => {
                self.db.customers().soft_delete(tenant_id, &deleted.id, at).await?;
            }
            DomainEvent::ProductUpserted(product) => {
                self.db.products().upsert(tenant_id, product, at).await?;
            }
            DomainEvent::ProductDeleted(deleted) => {
                self.db.products().soft_delete(tenant_id, &deleted.id, at).await?;
            }
            DomainEvent::SaleCreated(sale) => {
                // Two commits; the ledger step is idempotent on redelivery
                self.db.sales().apply(tenant_id, sale, at).await?;
                self.db.inventory().apply_sale_lines(tenant_id, sale, at).await?;
            }
            DomainEvent::AppointmentUpserted(appointment) => {
                if self.db.appointments().save(tenant_id, appointment, at).await? == SaveOutcome::Stale {
                    debug!(appointment_id = %appointment.id, "Older appointment write ignored");
                }
            }
            DomainEvent::AppointmentDeleted(deleted) => {
                self.db.appointments().soft_delete(tenant_id, &deleted.id, at).await?;
            }
            DomainEvent::InventoryAdjusted(adjustment) => {
                self.db.inventory().apply(tenant_id, adjustment, at).await?;
            }
        }
        Ok(())
    }
}

enum Outcome {
    Applied,
    Skipped,
}

fn failure(event: &WireEvent, reason: String, retryable: bool) -> EventFailure {
    EventFailure {
        id: event.id.clone(),
        event_type: event.event_type.clone(),
        reason,
        retryable,
    }
}

fn storage_failure(event: &WireEvent, err: DbError) -> EventFailure {
    if err.is_retryable() {
        warn!(event_id = %event.id, error = %err, "Event apply failed, edge will retry");
        return failure(event, RETRY_LATER.to_string(), true);
    }
    match err {
        DbError::Conflict(_) | DbError::UniqueViolation { .. } | DbError::NotFound { .. } | DbError::Core(_) => {
            failure(event, err.to_string(), false)
        }
        other => {
            error!(event_id = %event.id, error = %other, "Event apply failed");
            failure(event, "internal error".to_string(), false)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Value};
    use vela_db::DbConfig;

    async fn service() -> (IngestService, Database) {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        (IngestService::new(db.clone()), db)
    }

    fn wire(id: &str, event_type: &str, payload: Value) -> WireEvent {
        WireEvent {
            id: id.to_string(),
            aggregate: event_type.split('.').next().unwrap_or_default().to_string(),
            event_type: event_type.to_string(),
            payload,
            occurred_at: Utc::now(),
        }
    }

    fn product(id: &str, name: &str) -> Value {
        json!({"id": id, "sku": format!("SKU-{id}"), "name": name, "price": 4.5})
    }

    #[tokio::test]
    async fn test_same_product_event_twice_yields_one_row() {
        let (svc, db) = service().await;
        let event = wire("e1", "product.upserted.v1", product("p1", "Espresso"));

        let first = svc.ingest("t1", std::slice::from_ref(&event)).await;
        let second = svc.ingest("t1", std::slice::from_ref(&event)).await;
        assert_eq!((first.accepted, second.accepted), (1, 1));
        assert_eq!(second.failed, 0);

        let later = wire("e2", "product.upserted.v1", product("p1", "Double Espresso"));
        svc.ingest("t1", &[later]).await;

        let stored = db.products().find("t1", "p1").await.unwrap().unwrap();
        assert_eq!(stored.name, "Double Espresso");
        assert_eq!(db.products().list_active("t1", 10).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_failed_event_does_not_stop_batch() {
        let (svc, db) = service().await;
        let events = vec![
            wire("e1", "product.upserted.v1", product("p1", "Tea")),
            wire("e2", "product.upserted.v1", json!({"id": "p2"})),
            wire("e3", "product.upserted.v1", product("p3", "Cake")),
        ];

        let report = svc.ingest("t1", &events).await;
        assert_eq!(report.accepted, 2);
        assert_eq!(report.failed, 1);

        let failure = report.failure_for("e2").unwrap();
        assert_eq!(failure.event_type, "product.upserted.v1");
        assert!(!failure.retryable);

        assert!(db.products().find("t1", "p1").await.unwrap().is_some());
        assert!(db.products().find("t1", "p2").await.unwrap().is_none());
        assert!(db.products().find("t1", "p3").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_unknown_type_is_skipped() {
        let (svc, _db) = service().await;
        let report = svc
            .ingest("t1", &[wire("e1", "loyalty.points.v3", json!({"anything": true}))])
            .await;
        assert_eq!(report, PushEventsResponse {
            accepted: 0,
            failed: 0,
            skipped: 1,
            errors: vec![],
        });
    }

    #[tokio::test]
    async fn test_sale_lines_replaced_and_stock_moved_once() {
        let (svc, db) = service().await;
        svc.ingest("t1", &[wire("e0", "product.upserted.v1", product("p1", "Bagel"))]).await;

        let sale = json!({
            "id": "s1",
            "total": 100.50,
            "items": [
                {"productId": "p1", "qty": 2, "unitPrice": 25.25},
                {"productId": "p2", "qty": 1, "unitPrice": 50.0}
            ]
        });
        let event = wire("e1", "sale.created.v1", sale);
        svc.ingest("t1", std::slice::from_ref(&event)).await;
        let report = svc.ingest("t1", std::slice::from_ref(&event)).await;
        assert_eq!(report.accepted, 1);

        let stored = db.sales().find("t1", "s1").await.unwrap().unwrap();
        assert_eq!(stored.total_cents, 10_050);
        assert_eq!(db.sales().items("t1", "s1").await.unwrap().len(), 2);
        assert_eq!(db.inventory().stock_qty("t1", "p1").await.unwrap(), Some(-2));
        assert_eq!(db.inventory().ledger_sum("t1", "p2").await.unwrap(), -1);
    }

    #[tokio::test]
    async fn test_overlapping_appointment_reported_as_conflict() {
        let (svc, db) = service().await;
        let slot = |id: &str, start: &str, end: &str| {
            json!({
                "id": id,
                "resourceId": "chair-1",
                "start": start,
                "end": end,
                "status": "scheduled"
            })
        };

        let report = svc
            .ingest(
                "t1",
                &[
                    wire("e1", "appointment.upserted.v1", slot("a1", "2026-03-01T10:00:00Z", "2026-03-01T11:00:00Z")),
                    wire("e2", "appointment.upserted.v1", slot("a2", "2026-03-01T10:30:00Z", "2026-03-01T11:30:00Z")),
                    wire("e3", "appointment.upserted.v1", slot("a3", "2026-03-01T11:00:00Z", "2026-03-01T12:00:00Z")),
                ],
            )
            .await;

        assert_eq!(report.accepted, 2);
        let conflict = report.failure_for("e2").unwrap();
        assert!(!conflict.retryable);
        assert!(db.appointments().find("t1", "a2").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_delete_before_upsert_does_not_resurrect() {
        let (svc, db) = service().await;
        let mut upsert = wire("e1", "customer.upserted.v1", json!({"id": "c1", "name": "Ada"}));
        let delete = wire("e2", "customer.deleted.v1", json!({"id": "c1"}));
        upsert.occurred_at = delete.occurred_at - chrono::Duration::minutes(5);

        let report = svc.ingest("t1", &[delete, upsert]).await;
        assert_eq!(report.accepted, 2);

        let stored = db.customers().find("t1", "c1").await.unwrap().unwrap();
        assert!(!stored.active);
    }
}
