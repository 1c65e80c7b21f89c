//! In-memory hub used by the agent and processor tests.

use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::Mutex;

use vela_core::protocol::{
    AckCommandsRequest, AckCommandsResponse, ActivateRequest, ActivateResponse, PullCommandsResponse, PushEventsRequest,
    PushEventsResponse,
};

use crate::client::HubTransport;
use crate::error::{SyncError, SyncResult};

/// Scripted hub. Pushes accept everything unless a scripted answer is queued.
/// Queued commands are handed out on every pull until acked.
#[derive(Default)]
pub struct FakeHub {
    pub push_answers: Mutex<VecDeque<SyncResult<PushEventsResponse>>>,
    pub pushes: Mutex<Vec<(String, Option<String>, PushEventsRequest)>>,
    pub commands: Mutex<Vec<serde_json::Value>>,
    pub acks: Mutex<Vec<Vec<String>>>,
    pub activation: Mutex<Option<ActivateResponse>>,
    /// Every activation request with the renewal token it carried.
    pub activations: Mutex<Vec<(ActivateRequest, Option<String>)>>,
    pub push_delay: Option<std::time::Duration>,
}

impl FakeHub {
    pub fn answer(&self, answer: SyncResult<PushEventsResponse>) {
        self.push_answers.lock().unwrap().push_back(answer);
    }

    pub fn push_count(&self) -> usize {
        self.pushes.lock().unwrap().len()
    }

    /// Event ids of every push, in order.
    pub fn pushed_ids(&self) -> Vec<Vec<String>> {
        self.pushes
            .lock()
            .unwrap()
            .iter()
            .map(|(_, _, request)| request.events.iter().map(|e| e.id.clone()).collect())
            .collect()
    }
}

#[async_trait]
impl HubTransport for FakeHub {
    async fn push_events(
        &self,
        tenant_id: &str,
        token: Option<&str>,
        request: &PushEventsRequest,
    ) -> SyncResult<PushEventsResponse> {
        if let Some(delay) = self.push_delay {
            tokio::time::sleep(delay).await;
        }
        self.pushes.lock().unwrap().push((
            tenant_id.to_string(),
            token.map(str::to_string),
            request.clone(),
        ));
        let scripted = self.push_answers.lock().unwrap().pop_front();
        scripted.unwrap_or_else(|| {
            Ok(PushEventsResponse {
                accepted: request.events.len(),
                ..Default::default()
            })
        })
    }

    async fn pull_commands(
        &self,
        _tenant_id: &str,
        _token: Option<&str>,
        limit: u32,
    ) -> SyncResult<PullCommandsResponse> {
        let queued = self.commands.lock().unwrap();
        Ok(PullCommandsResponse {
            commands: queued.iter().take(limit as usize).cloned().collect(),
        })
    }

    async fn ack_commands(
        &self,
        _tenant_id: &str,
        _token: Option<&str>,
        request: &AckCommandsRequest,
    ) -> SyncResult<AckCommandsResponse> {
        let mut queued = self.commands.lock().unwrap();
        let before = queued.len();
        queued.retain(|c| !request.ids.iter().any(|id| c["id"] == id.as_str()));
        self.acks.lock().unwrap().push(request.ids.clone());
        Ok(AckCommandsResponse {
            acked: (before - queued.len()) as u64,
        })
    }

    async fn activate(&self, request: &ActivateRequest, renewal: Option<&str>) -> SyncResult<ActivateResponse> {
        self.activations
            .lock()
            .unwrap()
            .push((request.clone(), renewal.map(str::to_string)));
        self.activation
            .lock()
            .unwrap()
            .clone()
            .ok_or_else(|| SyncError::Unauthorized("activation refused".into()))
    }
}
