//! # Outbox Processor
//!
//! Drains the local outbox to the hub.
//!
//! ## Push Flow
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Outbox Processor Flow                                │
//! │                                                                         │
//! │  1. Select: pending, or error and retryable, ORDER BY created_at       │
//! │                                                                         │
//! │  2. Per event (CAS updates; a lost race skips the event):              │
//! │        error ──► pending ──► validating                                │
//! │                                  │                                      │
//! │                    schema fails ─┼─► error, parked (batch goes on)     │
//! │                                  ▼                                      │
//! │                               sending                                   │
//! │                                                                         │
//! │  3. POST the survivors as one batch                                    │
//! │        │                                                                │
//! │        ├── transport failure / non-2xx ──► all attempted → error,      │
//! │        │                                   error returned to caller    │
//! │        │                                                                │
//! │        └── 2xx report, per event:                                      │
//! │              accepted / skipped     ──► sent ──► processed             │
//! │              failed, retryable      ──► error                          │
//! │              failed, not retryable  ──► sent ──► processed (+reason)   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Events of different tenants are pushed as separate batches to their own
//! tenant path. A store failure while claiming rows puts every claimed row
//! back in `error` before the failure is returned.

use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use vela_core::protocol::{EventFailure, PushEventsRequest, PushEventsResponse, WireEvent};
use vela_core::validation::validate_tenant_id;
use vela_core::{OutboxEvent, OutboxStatus, SchemaValidator};
use vela_db::{Database, DbResult, OutboxRepository};

use crate::client::HubTransport;
use crate::error::SyncResult;
use crate::license_token::LicenseTokenHolder;

// =============================================================================
// Push Report
// =============================================================================

/// Outcome of one push, local validation failures included.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PushReport {
    /// Events that went out in a request.
    pub attempted: usize,
    pub accepted: usize,
    pub failed: usize,
    pub skipped: usize,
    pub failures: Vec<EventFailure>,
}

impl PushReport {
    fn local_failure(&mut self, event: &OutboxEvent, reason: String) {
        self.failed += 1;
        self.failures.push(EventFailure {
            id: event.id.clone(),
            event_type: event.event_type.clone(),
            reason,
            retryable: false,
        });
    }

    fn absorb(&mut self, response: PushEventsResponse) {
        self.accepted += response.accepted;
        self.failed += response.failed;
        self.skipped += response.skipped;
        self.failures.extend(response.errors);
    }

    fn merge(&mut self, other: PushReport) {
        self.attempted += other.attempted;
        self.accepted += other.accepted;
        self.failed += other.failed;
        self.skipped += other.skipped;
        self.failures.extend(other.failures);
    }

    pub fn is_empty(&self) -> bool {
        self.attempted == 0 && self.failed == 0
    }
}

// =============================================================================
// Outbox Processor
// =============================================================================

/// Runs the push algorithm against the outbox store.
#[derive(Clone)]
pub struct OutboxProcessor {
    outbox: OutboxRepository,
    validator: Arc<SchemaValidator>,
    transport: Arc<dyn HubTransport>,
    tokens: LicenseTokenHolder,
    batch_size: usize,
}

impl OutboxProcessor {
    pub fn new(
        db: &Database,
        transport: Arc<dyn HubTransport>,
        tokens: LicenseTokenHolder,
        batch_size: usize,
    ) -> Self {
        OutboxProcessor {
            outbox: db.outbox(),
            validator: db.validator(),
            transport,
            tokens,
            batch_size: batch_size.max(1),
        }
    }

    /// Pushes up to one batch of drainable events.
    ///
    /// ## Errors
    /// Transport and auth failures are returned after the attempted rows
    /// are moved to `error`.
    pub async fn drain(&self) -> SyncResult<PushReport> {
        let limit = u32::try_from(self.batch_size).unwrap_or(u32::MAX);
        let events = self.outbox.fetch_drainable(limit).await?;

        if events.is_empty() {
            debug!("No drainable outbox events");
            return Ok(PushReport::default());
        }

        info!(count = events.len(), "Processing outbox batch");

        let mut report = PushReport::default();
        for (tenant_id, group) in group_by_tenant(events) {
            let part = self.push_stored(&tenant_id, group).await?;
            report.merge(part);
        }

        info!(
            attempted = report.attempted,
            accepted = report.accepted,
            failed = report.failed,
            skipped = report.skipped,
            "Outbox batch finished"
        );
        Ok(report)
    }

    /// Pushes caller-supplied events without touching the store.
    ///
    /// Events are grouped by their own `tenant_id` and each group goes to
    /// its tenant path, as [`drain`](Self::drain) does. Invalid events are
    /// reported and left out; a transport failure is returned as is.
    pub async fn push_batch(&self, events: Vec<OutboxEvent>) -> SyncResult<PushReport> {
        let mut report = PushReport::default();

        for (tenant_id, group) in group_by_tenant(events) {
            let mut ready = Vec::with_capacity(group.len());
            for event in group {
                if let Err(e) = validate_tenant_id(&tenant_id) {
                    warn!(id = %event.id, error = %e, "Event has no usable tenant");
                    report.local_failure(&event, e.to_string());
                    continue;
                }
                let outcome = self.validator.validate(&event.event_type, &event.payload);
                if outcome.valid {
                    ready.push(event);
                } else {
                    let reason = outcome.errors.join("; ");
                    warn!(id = %event.id, event_type = %event.event_type, reason = %reason, "Event failed schema validation");
                    report.local_failure(&event, reason);
                }
            }

            if ready.is_empty() {
                continue;
            }

            let response = self.send(&tenant_id, &ready).await?;
            report.attempted += ready.len();
            report.absorb(response);
        }
        Ok(report)
    }

    async fn push_stored(&self, tenant_id: &str, events: Vec<OutboxEvent>) -> SyncResult<PushReport> {
        let mut report = PushReport::default();
        let ids: Vec<String> = events.iter().map(|e| e.id.clone()).collect();

        let ready = match self.claim(events, &mut report).await {
            Ok(ready) => ready,
            Err(err) => {
                let reason = err.to_string();
                warn!(tenant_id = %tenant_id, error = %reason, "Outbox store failed mid-batch, releasing claimed events");
                self.release(&ids, &reason).await;
                return Err(err.into());
            }
        };

        if ready.is_empty() {
            return Ok(report);
        }

        let response = match self.send(tenant_id, &ready).await {
            Ok(response) => response,
            Err(err) => {
                let reason = err.to_string();
                warn!(tenant_id = %tenant_id, count = ready.len(), error = %reason, "Push failed, events back to error");
                let ids: Vec<String> = ready.iter().map(|e| e.id.clone()).collect();
                self.release(&ids, &reason).await;
                return Err(err);
            }
        };

        self.resolve(&ready, &response).await;
        report.attempted = ready.len();
        report.absorb(response);
        Ok(report)
    }

    /// Moves each event through `validating` to `sending`, parking the ones
    /// that fail their schema. Returns the events ready to go out.
    async fn claim(&self, events: Vec<OutboxEvent>, report: &mut PushReport) -> DbResult<Vec<OutboxEvent>> {
        let mut ready = Vec::with_capacity(events.len());

        for event in events {
            if event.status == OutboxStatus::Error && !self.outbox.mark_pending(&event.id).await? {
                debug!(id = %event.id, "Event moved on before retry, skipping");
                continue;
            }
            if !self.outbox.mark_validating(&event.id).await? {
                debug!(id = %event.id, "Event claimed elsewhere, skipping");
                continue;
            }

            let outcome = self.validator.validate(&event.event_type, &event.payload);
            if !outcome.valid {
                let reason = outcome.errors.join("; ");
                warn!(id = %event.id, event_type = %event.event_type, reason = %reason, "Event failed schema validation, parked");
                self.outbox.mark_rejected(&event.id, &reason).await?;
                report.local_failure(&event, reason);
                continue;
            }

            if !self.outbox.mark_sending(&event.id).await? {
                debug!(id = %event.id, "Event moved on before sending, skipping");
                continue;
            }
            ready.push(event);
        }
        Ok(ready)
    }

    /// Puts rows left in `validating`/`sending` back to `error`. Rows in any
    /// other status fail the CAS and are untouched.
    async fn release(&self, ids: &[String], reason: &str) {
        for id in ids {
            // A row this misses stays in flight until recovery at the next
            // agent start
            if let Err(e) = self.outbox.mark_error(id, reason).await {
                error!(id = %id, error = %e, "Failed to mark event as error");
            }
        }
    }

    async fn send(&self, tenant_id: &str, events: &[OutboxEvent]) -> SyncResult<PushEventsResponse> {
        let request = PushEventsRequest {
            events: events.iter().map(WireEvent::from).collect(),
        };
        let token = self.tokens.current().await;
        self.transport
            .push_events(tenant_id, token.as_deref(), &request)
            .await
    }

    /// Applies the hub's per-event report to the sent rows.
    async fn resolve(&self, sent: &[OutboxEvent], response: &PushEventsResponse) {
        for event in sent {
            let result = match response.failure_for(&event.id) {
                Some(failure) if failure.retryable => {
                    debug!(id = %event.id, reason = %failure.reason, "Hub asked for a retry");
                    self.outbox.mark_error(&event.id, &failure.reason).await
                }
                Some(failure) => {
                    warn!(id = %event.id, reason = %failure.reason, "Hub rejected event permanently");
                    self.complete(&event.id, Some(&failure.reason)).await
                }
                None => self.complete(&event.id, None).await,
            };

            if let Err(e) = result {
                error!(id = %event.id, error = %e, "Failed to record push outcome");
            }
        }
    }

    async fn complete(&self, id: &str, last_error: Option<&str>) -> vela_db::DbResult<bool> {
        self.outbox.mark_sent(id).await?;
        self.outbox.mark_processed(id, last_error).await
    }
}

/// Splits a FIFO batch per tenant, keeping order inside each group.
fn group_by_tenant(events: Vec<OutboxEvent>) -> Vec<(String, Vec<OutboxEvent>)> {
    let mut groups: Vec<(String, Vec<OutboxEvent>)> = Vec::new();
    for event in events {
        match groups.iter_mut().find(|(tenant, _)| *tenant == event.tenant_id) {
            Some((_, group)) => group.push(event),
            None => groups.push((event.tenant_id.clone(), vec![event])),
        }
    }
    groups
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SyncError;
    use crate::testing::FakeHub;
    use serde_json::json;
    use vela_db::DbConfig;

    fn product(id: &str) -> serde_json::Value {
        json!({"id": id, "sku": format!("SKU-{id}"), "name": "Widget", "price": 2.5})
    }

    async fn setup(hub: Arc<FakeHub>) -> (Database, OutboxProcessor) {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let processor = OutboxProcessor::new(&db, hub, LicenseTokenHolder::new(Some("tok".into())), 100);
        (db, processor)
    }

    #[tokio::test]
    async fn test_drain_marks_processed() {
        let hub = Arc::new(FakeHub::default());
        let (db, processor) = setup(hub.clone()).await;
        let event = db.outbox().enqueue("t1", "product.upserted.v1", &product("p1")).await.unwrap();

        let report = processor.drain().await.unwrap();
        assert_eq!(report.attempted, 1);
        assert_eq!(report.accepted, 1);

        let stored = db.outbox().get(&event.id).await.unwrap();
        assert_eq!(stored.status, OutboxStatus::Processed);
        assert!(stored.processed_at.is_some());
        assert_eq!(stored.attempts, 1);

        let path: Vec<OutboxStatus> = db
            .outbox()
            .transitions(&event.id)
            .await
            .unwrap()
            .into_iter()
            .map(|t| t.to_status)
            .collect();
        assert_eq!(
            path,
            vec![
                OutboxStatus::Pending,
                OutboxStatus::Validating,
                OutboxStatus::Sending,
                OutboxStatus::Sent,
                OutboxStatus::Processed
            ]
        );

        let pushes = hub.pushes.lock().unwrap();
        let (tenant, token, request) = &pushes[0];
        assert_eq!(tenant, "t1");
        assert_eq!(token.as_deref(), Some("tok"));
        assert_eq!(request.events[0].aggregate, "product");
        assert_eq!(request.events[0].event_type, "product.upserted.v1");
    }

    #[tokio::test]
    async fn test_invalid_event_does_not_abort_batch() {
        let hub = Arc::new(FakeHub::default());
        let (db, processor) = setup(hub.clone()).await;
        let outbox = db.outbox();
        let first = outbox.enqueue("t1", "product.upserted.v1", &product("p1")).await.unwrap();
        let bad = outbox
            .enqueue("t1", "product.upserted.v1", &json!({"id": "p2", "price": -1}))
            .await
            .unwrap();
        let third = outbox.enqueue("t1", "product.upserted.v1", &product("p3")).await.unwrap();

        let report = processor.drain().await.unwrap();
        assert_eq!(report.accepted, 2);
        assert_eq!(report.failed, 1);
        assert_eq!(report.failures[0].id, bad.id);
        assert_eq!(hub.pushed_ids(), vec![vec![first.id.clone(), third.id.clone()]]);

        let bad = outbox.get(&bad.id).await.unwrap();
        assert_eq!(bad.status, OutboxStatus::Error);
        assert!(bad.last_error.is_some());
        assert_eq!(bad.attempts, 0);
        assert_eq!(outbox.list_rejected(10).await.unwrap()[0].id, bad.id);
    }

    #[tokio::test]
    async fn test_invalid_rows_do_not_starve_valid_ones() {
        let hub = Arc::new(FakeHub::default());
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let processor = OutboxProcessor::new(&db, hub.clone(), LicenseTokenHolder::default(), 2);
        let outbox = db.outbox();
        outbox.enqueue("t1", "product.upserted.v1", &json!({"id": "p1"})).await.unwrap();
        outbox.enqueue("t1", "product.upserted.v1", &json!({"id": "p2"})).await.unwrap();
        let valid = outbox.enqueue("t1", "product.upserted.v1", &product("p3")).await.unwrap();

        let first = processor.drain().await.unwrap();
        assert_eq!(first.failed, 2);
        assert_eq!(hub.push_count(), 0);

        let second = processor.drain().await.unwrap();
        assert_eq!(second.accepted, 1);
        assert_eq!(hub.pushed_ids(), vec![vec![valid.id.clone()]]);

        // Parked rows stay out of every later drain
        assert!(processor.drain().await.unwrap().is_empty());
        assert_eq!(hub.push_count(), 1);
        let rejected = outbox.list_rejected(10).await.unwrap();
        assert_eq!(rejected.len(), 2);
        assert!(rejected.iter().all(|e| e.attempts == 0));
    }

    #[tokio::test]
    async fn test_store_failure_mid_batch_releases_claimed_rows() {
        let hub = Arc::new(FakeHub::default());
        let (db, processor) = setup(hub.clone()).await;
        let outbox = db.outbox();
        let first = outbox.enqueue("t1", "product.upserted.v1", &product("p1")).await.unwrap();
        let second = outbox.enqueue("t1", "product.upserted.v1", &product("p2")).await.unwrap();

        let trigger = format!(
            "CREATE TRIGGER fail_sending BEFORE UPDATE OF status ON outbox_events
             WHEN NEW.id = '{}' AND NEW.status = 'sending'
             BEGIN SELECT RAISE(ABORT, 'disk I/O error'); END",
            second.id
        );
        sqlx::query(&trigger).execute(db.pool()).await.unwrap();

        let err = processor.drain().await.unwrap_err();
        assert!(matches!(err, SyncError::DatabaseError(_)));
        assert_eq!(hub.push_count(), 0);
        for id in [&first.id, &second.id] {
            let stored = outbox.get(id).await.unwrap();
            assert_eq!(stored.status, OutboxStatus::Error, "{id}");
        }
        assert_eq!(outbox.fetch_drainable(10).await.unwrap().len(), 2);

        sqlx::query("DROP TRIGGER fail_sending").execute(db.pool()).await.unwrap();
        let report = processor.drain().await.unwrap();
        assert_eq!(report.accepted, 2);
    }

    #[tokio::test]
    async fn test_transport_failure_then_retry() {
        let hub = Arc::new(FakeHub::default());
        hub.answer(Err(SyncError::Timeout(15)));
        let (db, processor) = setup(hub.clone()).await;
        let event = db.outbox().enqueue("t1", "product.upserted.v1", &product("p1")).await.unwrap();

        let err = processor.drain().await.unwrap_err();
        assert!(err.is_retryable());
        let stored = db.outbox().get(&event.id).await.unwrap();
        assert_eq!(stored.status, OutboxStatus::Error);
        assert!(stored.last_error.unwrap().contains("timed out"));

        // Next run picks the error row up again
        let report = processor.drain().await.unwrap();
        assert_eq!(report.accepted, 1);
        let stored = db.outbox().get(&event.id).await.unwrap();
        assert_eq!(stored.status, OutboxStatus::Processed);
        assert!(stored.processed_at.is_some());
        assert!(stored.last_error.is_none());
        assert_eq!(stored.attempts, 2);
    }

    #[tokio::test]
    async fn test_auth_failure_leaves_rows_retriable() {
        let hub = Arc::new(FakeHub::default());
        hub.answer(Err(SyncError::Unauthorized("missing or invalid license".into())));
        let (db, processor) = setup(hub).await;
        let event = db.outbox().enqueue("t1", "customer.deleted.v1", &json!({"id": "c1"})).await.unwrap();

        let err = processor.drain().await.unwrap_err();
        assert!(err.is_auth_error());
        assert_eq!(db.outbox().get(&event.id).await.unwrap().status, OutboxStatus::Error);
        assert_eq!(db.outbox().fetch_drainable(10).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_hub_report_decides_each_row() {
        let hub = Arc::new(FakeHub::default());
        let (db, processor) = setup(hub.clone()).await;
        let outbox = db.outbox();
        let ok = outbox.enqueue("t1", "product.upserted.v1", &product("p1")).await.unwrap();
        let rejected = outbox.enqueue("t1", "product.upserted.v1", &product("p2")).await.unwrap();
        let busy = outbox.enqueue("t1", "product.upserted.v1", &product("p3")).await.unwrap();

        hub.answer(Ok(PushEventsResponse {
            accepted: 1,
            failed: 2,
            skipped: 0,
            errors: vec![
                EventFailure {
                    id: rejected.id.clone(),
                    event_type: "product.upserted.v1".into(),
                    reason: "conflict".into(),
                    retryable: false,
                },
                EventFailure {
                    id: busy.id.clone(),
                    event_type: "product.upserted.v1".into(),
                    reason: "database is locked".into(),
                    retryable: true,
                },
            ],
        }));

        let report = processor.drain().await.unwrap();
        assert_eq!(report.failed, 2);

        assert_eq!(outbox.get(&ok.id).await.unwrap().status, OutboxStatus::Processed);
        let rejected = outbox.get(&rejected.id).await.unwrap();
        assert_eq!(rejected.status, OutboxStatus::Processed);
        assert_eq!(rejected.last_error.as_deref(), Some("conflict"));
        assert_eq!(outbox.get(&busy.id).await.unwrap().status, OutboxStatus::Error);
    }

    #[tokio::test]
    async fn test_fifo_and_batch_size() {
        let hub = Arc::new(FakeHub::default());
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let processor = OutboxProcessor::new(&db, hub.clone(), LicenseTokenHolder::default(), 2);

        let mut ids = Vec::new();
        for n in 0..3 {
            let e = db.outbox().enqueue("t1", "product.upserted.v1", &product(&format!("p{n}"))).await.unwrap();
            ids.push(e.id);
        }

        processor.drain().await.unwrap();
        processor.drain().await.unwrap();
        assert_eq!(hub.pushed_ids(), vec![ids[..2].to_vec(), ids[2..].to_vec()]);
        assert!(hub.pushes.lock().unwrap()[0].1.is_none());
    }

    #[tokio::test]
    async fn test_tenants_pushed_separately() {
        let hub = Arc::new(FakeHub::default());
        let (db, processor) = setup(hub.clone()).await;
        db.outbox().enqueue("t1", "product.upserted.v1", &product("p1")).await.unwrap();
        db.outbox().enqueue("t2", "product.upserted.v1", &product("p2")).await.unwrap();
        db.outbox().enqueue("t1", "product.upserted.v1", &product("p3")).await.unwrap();

        let report = processor.drain().await.unwrap();
        assert_eq!(report.accepted, 3);

        let pushes = hub.pushes.lock().unwrap();
        assert_eq!(pushes.len(), 2);
        assert_eq!(pushes[0].0, "t1");
        assert_eq!(pushes[0].2.events.len(), 2);
        assert_eq!(pushes[1].0, "t2");
    }

    #[tokio::test]
    async fn test_explicit_batch_bypasses_store() {
        let hub = Arc::new(FakeHub::default());
        let (db, processor) = setup(hub.clone()).await;
        let events = vec![
            OutboxEvent::new("t1", "product.upserted.v1", product("p1")),
            OutboxEvent::new("t1", "pet.created.v1", json!({"id": "x"})),
        ];

        let report = processor.push_batch(events).await.unwrap();
        assert_eq!(report.attempted, 1);
        assert_eq!(report.accepted, 1);
        assert_eq!(report.failed, 1);
        assert!(report.failures[0].reason.contains("unknown event type"));
        assert!(db.outbox().fetch_drainable(10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_explicit_batch_goes_to_each_events_tenant() {
        let hub = Arc::new(FakeHub::default());
        let (_db, processor) = setup(hub.clone()).await;
        let events = vec![
            OutboxEvent::new("t1", "product.upserted.v1", product("p1")),
            OutboxEvent::new("t2", "product.upserted.v1", product("p2")),
            OutboxEvent::new("", "product.upserted.v1", product("p3")),
        ];

        let report = processor.push_batch(events).await.unwrap();
        assert_eq!(report.attempted, 2);
        assert_eq!(report.failed, 1);

        let pushes = hub.pushes.lock().unwrap();
        let tenants: Vec<&str> = pushes.iter().map(|(tenant, _, _)| tenant.as_str()).collect();
        assert_eq!(tenants, vec!["t1", "t2"]);
        assert_eq!(pushes[1].2.events[0].payload["id"], "p2");
    }

    #[tokio::test]
    async fn test_empty_outbox_sends_nothing() {
        let hub = Arc::new(FakeHub::default());
        let (_db, processor) = setup(hub.clone()).await;
        let report = processor.drain().await.unwrap();
        assert!(report.is_empty());
        assert_eq!(hub.push_count(), 0);
    }
}
