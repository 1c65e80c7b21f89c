//! # Sync Agent
//!
//! Main orchestrator for the edge. Owns the kill-switch, serializes pushes
//! and runs the background cycle.
//!
//! ## Agent Architecture
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        SyncAgent Architecture                           │
//! │                                                                         │
//! │  ┌──────────────────────────────────────────────────────────────────┐  │
//! │  │                         SyncAgent                                │  │
//! │  │                                                                  │  │
//! │  │  • enabled flag: disabled push/pull are no-op successes          │  │
//! │  │  • cycle lock: concurrent triggers queue, never run in parallel  │  │
//! │  │  • status: counts, last report, last error, last sync            │  │
//! │  └────────────────────────────┬─────────────────────────────────────┘  │
//! │                               │                                         │
//! │         ┌─────────────────────┼─────────────────────┐                  │
//! │         ▼                     ▼                     ▼                   │
//! │  ┌────────────────┐  ┌────────────────┐  ┌────────────────────────┐    │
//! │  │OutboxProcessor │  │  HubTransport  │  │  LicenseTokenHolder    │    │
//! │  │                │  │                │  │                        │    │
//! │  │ push_outbox    │  │ push / pull /  │  │ token presented on     │    │
//! │  │ push_events    │  │ ack / activate │  │ every sync call        │    │
//! │  └────────────────┘  └────────────────┘  └────────────────────────┘    │
//! │                                                                         │
//! │  BACKGROUND CYCLE (spawn):                                             │
//! │  recover_interrupted → loop { push → pull → forward → ack → sleep }    │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use backoff::backoff::Backoff;
use backoff::ExponentialBackoff;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use vela_core::protocol::{AckCommandsRequest, ActivateRequest, ActivateResponse};
use vela_core::{OutboxEvent, OutboxStatus};
use vela_db::{Database, RecoveryReport};

use crate::client::{HttpHubClient, HubTransport};
use crate::config::SyncConfig;
use crate::error::{SyncError, SyncResult};
use crate::license_token::LicenseTokenHolder;
use crate::outbox::{OutboxProcessor, PushReport};

// =============================================================================
// Sync Status
// =============================================================================

/// Current sync status for external queries.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncStatus {
    pub enabled: bool,

    /// A push is running right now.
    pub in_progress: bool,

    pub pending_count: i64,
    pub error_count: i64,

    pub license_present: bool,

    pub last_push: Option<PushReport>,

    /// Last push that reached the hub.
    pub last_sync: Option<DateTime<Utc>>,

    /// Last error message (cleared by the next successful push).
    pub last_error: Option<String>,
}

// =============================================================================
// Sync Agent
// =============================================================================

/// Edge sync agent. Independent instances share nothing.
pub struct SyncAgent {
    config: Arc<SyncConfig>,
    db: Database,
    transport: Arc<dyn HubTransport>,
    tokens: LicenseTokenHolder,
    processor: OutboxProcessor,
    enabled: AtomicBool,
    /// Held for the whole of a push.
    cycle: Mutex<()>,
    status: RwLock<SyncStatus>,
}

impl SyncAgent {
    /// Creates an agent over any transport.
    pub fn new(config: SyncConfig, db: Database, transport: Arc<dyn HubTransport>) -> Self {
        let tokens = LicenseTokenHolder::new(config.license.token.clone());
        let processor = OutboxProcessor::new(
            &db,
            Arc::clone(&transport),
            tokens.clone(),
            config.sync.batch_size,
        );

        SyncAgent {
            enabled: AtomicBool::new(config.sync.enabled),
            config: Arc::new(config),
            db,
            transport,
            tokens,
            processor,
            cycle: Mutex::new(()),
            status: RwLock::new(SyncStatus::default()),
        }
    }

    /// Validates the config and talks to the hub over HTTP.
    pub fn from_config(config: SyncConfig, db: Database) -> SyncResult<Self> {
        config.validate()?;
        let client = HttpHubClient::from_config(&config)?;
        Ok(Self::new(config, db, Arc::new(client)))
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    pub fn tokens(&self) -> &LicenseTokenHolder {
        &self.tokens
    }

    // =========================================================================
    // Kill-switch
    // =========================================================================

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    /// Turns sync on or off for this agent only.
    pub fn set_enabled(&self, enabled: bool) {
        let previous = self.enabled.swap(enabled, Ordering::SeqCst);
        if previous != enabled {
            info!(enabled, "Sync switch changed");
        }
    }

    // =========================================================================
    // Operations
    // =========================================================================

    /// Repairs rows a crash left mid-flight. Run once before pushing.
    pub async fn recover(&self) -> SyncResult<RecoveryReport> {
        Ok(self.db.outbox().recover_interrupted().await?)
    }

    /// Drains one batch of the outbox to the hub.
    ///
    /// Concurrent callers queue behind the running push; each then works on
    /// whatever is still drainable.
    pub async fn push_outbox(&self) -> SyncResult<PushReport> {
        if !self.is_enabled() {
            debug!("Sync disabled, push skipped");
            return Ok(PushReport::default());
        }

        let _guard = self.cycle.lock().await;
        self.status.write().await.in_progress = true;
        let result = self.processor.drain().await;
        self.record(&result).await;
        result
    }

    /// Pushes caller-supplied events now, bypassing the store.
    pub async fn push_events(&self, events: Vec<OutboxEvent>) -> SyncResult<PushReport> {
        if !self.is_enabled() {
            debug!("Sync disabled, push skipped");
            return Ok(PushReport::default());
        }
        self.processor.push_batch(events).await
    }

    /// Leases queued hub commands. They are opaque to the agent.
    ///
    /// A command comes back on a later pull unless it is passed to
    /// [`SyncAgent::ack_commands`] before its lease runs out.
    pub async fn pull_commands(&self, limit: u32) -> SyncResult<Vec<serde_json::Value>> {
        if !self.is_enabled() {
            debug!("Sync disabled, pull skipped");
            return Ok(Vec::new());
        }

        let token = self.tokens.current().await;
        let response = self
            .transport
            .pull_commands(self.config.tenant_id(), token.as_deref(), limit)
            .await?;

        if !response.commands.is_empty() {
            info!(count = response.commands.len(), "Pulled hub commands");
        }
        Ok(response.commands)
    }

    /// Tells the hub these commands were handled. Returns how many it acked.
    pub async fn ack_commands(&self, ids: Vec<String>) -> SyncResult<u64> {
        if !self.is_enabled() || ids.is_empty() {
            return Ok(0);
        }

        let token = self.tokens.current().await;
        let response = self
            .transport
            .ack_commands(self.config.tenant_id(), token.as_deref(), &AckCommandsRequest { ids })
            .await?;
        debug!(acked = response.acked, "Acked hub commands");
        Ok(response.acked)
    }

    /// Activates this device and keeps the returned token.
    ///
    /// The token held now goes along as proof for a renewal, the configured
    /// enrollment key for a first activation. Not gated by the sync switch.
    pub async fn activate(&self) -> SyncResult<ActivateResponse> {
        let request = ActivateRequest {
            tenant_id: self.config.tenant_id().to_string(),
            device_id: self.config.device_id().to_string(),
            enrollment_key: self.config.license.enrollment_key.clone(),
        };
        if request.tenant_id.is_empty() {
            return Err(SyncError::MissingTenantId);
        }
        if request.device_id.is_empty() {
            return Err(SyncError::MissingDeviceId);
        }

        let renewal = self.tokens.current().await;
        let response = self.transport.activate(&request, renewal.as_deref()).await?;
        self.tokens.store(&response).await;
        info!(tenant_id = %request.tenant_id, device_id = %request.device_id, plan = %response.plan, "Device activated");
        Ok(response)
    }

    /// Status snapshot with live outbox counts.
    pub async fn status(&self) -> SyncResult<SyncStatus> {
        let counts = self.db.outbox().count_by_status().await?;
        let mut status = self.status.read().await.clone();
        status.enabled = self.is_enabled();
        status.pending_count = counts.get(&OutboxStatus::Pending).copied().unwrap_or(0);
        status.error_count = counts.get(&OutboxStatus::Error).copied().unwrap_or(0);
        status.license_present = self.tokens.is_present().await;
        Ok(status)
    }

    async fn record(&self, result: &SyncResult<PushReport>) {
        let mut status = self.status.write().await;
        status.in_progress = false;
        match result {
            Ok(report) => {
                if report.attempted > 0 {
                    status.last_sync = Some(Utc::now());
                }
                status.last_push = Some(report.clone());
                status.last_error = None;
            }
            Err(e) => status.last_error = Some(e.to_string()),
        }
    }

    // =========================================================================
    // Background Cycle
    // =========================================================================

    /// Starts the background cycle. Pulled commands arrive on the receiver.
    ///
    /// Delivery is at-least-once: a command is acked once it is on the
    /// channel, and one whose ack is lost arrives again.
    pub fn spawn(self: Arc<Self>) -> (SyncAgentHandle, mpsc::Receiver<serde_json::Value>) {
        let (shutdown_tx, shutdown_rx) = mpsc::channel(1);
        let (commands_tx, commands_rx) = mpsc::channel(256);

        let agent = Arc::clone(&self);
        let task = tokio::spawn(async move { agent.run(shutdown_rx, commands_tx).await });

        let handle = SyncAgentHandle {
            shutdown_tx,
            task,
            agent: self,
        };
        (handle, commands_rx)
    }

    async fn run(
        self: Arc<Self>,
        mut shutdown_rx: mpsc::Receiver<()>,
        commands_tx: mpsc::Sender<serde_json::Value>,
    ) {
        info!(
            device_id = %self.config.device_id(),
            tenant_id = %self.config.tenant_id(),
            hub_url = ?self.config.hub_url(),
            "Starting sync agent"
        );

        if let Err(e) = self.recover().await {
            error!(error = %e, "Outbox recovery failed");
        }

        let interval = self.config.sync.poll_interval();
        let mut backoff = self.create_backoff();

        loop {
            let delay = match self.cycle_once(&commands_tx).await {
                Ok(()) => {
                    backoff.reset();
                    interval
                }
                Err(e) if e.is_retryable() => {
                    let delay = backoff
                        .next_backoff()
                        .unwrap_or_else(|| Duration::from_secs(self.config.sync.max_backoff_secs));
                    warn!(error = %e, ?delay, "Sync cycle failed, backing off");
                    delay
                }
                Err(e) => {
                    error!(error = %e, "Sync cycle failed");
                    interval
                }
            };

            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = shutdown_rx.recv() => {
                    info!("Sync agent received shutdown");
                    break;
                }
            }
        }

        info!("Sync agent stopped");
    }

    async fn cycle_once(&self, commands_tx: &mpsc::Sender<serde_json::Value>) -> SyncResult<()> {
        self.push_outbox().await?;

        // Pulls lease commands on the hub; only pull when someone is listening
        if commands_tx.is_closed() {
            return Ok(());
        }

        let limit = u32::try_from(self.config.sync.batch_size).unwrap_or(u32::MAX);
        let mut forwarded = Vec::new();
        for command in self.pull_commands(limit).await? {
            let id = command.get("id").and_then(|id| id.as_str()).map(str::to_string);
            if commands_tx.send(command).await.is_err() {
                warn!("Command receiver dropped mid-delivery");
                break;
            }
            forwarded.extend(id);
        }

        // Anything not forwarded stays leased and is handed out again
        self.ack_commands(forwarded).await?;
        Ok(())
    }

    fn create_backoff(&self) -> ExponentialBackoff {
        ExponentialBackoff {
            initial_interval: Duration::from_millis(self.config.sync.initial_backoff_ms),
            max_interval: Duration::from_secs(self.config.sync.max_backoff_secs),
            multiplier: 2.0,
            max_elapsed_time: None,
            ..Default::default()
        }
    }
}

// =============================================================================
// Agent Handle
// =============================================================================

/// Handle for a running background cycle.
pub struct SyncAgentHandle {
    shutdown_tx: mpsc::Sender<()>,
    task: JoinHandle<()>,
    agent: Arc<SyncAgent>,
}

impl SyncAgentHandle {
    pub fn agent(&self) -> &Arc<SyncAgent> {
        &self.agent
    }

    pub async fn status(&self) -> SyncResult<SyncStatus> {
        self.agent.status().await
    }

    /// Stops the cycle and waits for it to finish its current step.
    pub async fn shutdown(self) -> SyncResult<()> {
        // The loop may have exited already
        let _ = self.shutdown_tx.send(()).await;
        self.task
            .await
            .map_err(|e| SyncError::Internal(format!("sync task failed: {e}")))
    }
}
