//! Request/response correlation over an agent transport.
//!
//! The transport itself (websocket, message broker) is owned by the layer
//! that accepted the agent connection; this module only needs a way to send
//! a frame ([`AgentTransport`]) and to be fed inbound frames
//! ([`AgentClient::handle_frame`]). Multiple commands may be in flight to
//! the same agent concurrently; each carries a uuid correlation id.

pub mod protocol;

pub use protocol::{
    AgentCommand, AgentEvent, AgentFrame, AgentRequest, AgentResponse, DeployComposePayload,
};

use crate::error::{GantryError, Result};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, Mutex};
use tracing::{debug, instrument, warn};
use uuid::Uuid;

/// Outbound half of an agent connection.
#[async_trait]
pub trait AgentTransport: Send + Sync {
    /// Send one serialized frame to the agent.
    async fn send(&self, frame: String) -> Result<()>;
}

/// Retry policy for transient command failures.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total attempts (first try included).
    pub attempts: u32,
    pub delay: Duration,
    /// Per-attempt response timeout.
    pub timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self { attempts: 3, delay: Duration::from_secs(2), timeout: Duration::from_secs(30) }
    }
}

/// Buffered deployment events per watcher.
const WATCHER_BUFFER: usize = 64;

/// Correlates commands with responses and fans deployment events out to
/// watchers.
pub struct AgentClient {
    agent_id: String,
    transport: Arc<dyn AgentTransport>,
    retry: RetryPolicy,
    pending: Mutex<HashMap<String, oneshot::Sender<AgentResponse>>>,
    watchers: Mutex<HashMap<String, mpsc::Sender<AgentEvent>>>,
}

impl AgentClient {
    pub fn new(agent_id: &str, transport: Arc<dyn AgentTransport>, retry: RetryPolicy) -> Self {
        Self {
            agent_id: agent_id.to_string(),
            transport,
            retry,
            pending: Mutex::new(HashMap::new()),
            watchers: Mutex::new(HashMap::new()),
        }
    }

    pub fn agent_id(&self) -> &str {
        &self.agent_id
    }

    /// Send a command and await its correlated response.
    ///
    /// Acceptance only: for long-running commands the real outcome arrives
    /// later through [`AgentClient::watch_deployment`]. Transient failures
    /// (send errors, per-attempt timeouts) are retried per the policy; a
    /// response with `success=false` is a definitive rejection and is not
    /// retried.
    #[instrument(skip(self, command), fields(agent_id = %self.agent_id, command = command.name()))]
    pub async fn request(&self, command: AgentCommand) -> Result<AgentResponse> {
        let name = command.name();
        let mut last_err = None;

        for attempt in 1..=self.retry.attempts {
            match self.request_once(&command).await {
                Ok(response) => {
                    if !response.success {
                        return Err(GantryError::AgentCommand {
                            command: name.to_string(),
                            reason: response
                                .error
                                .unwrap_or_else(|| "unspecified agent error".to_string()),
                        });
                    }
                    return Ok(response);
                }
                Err(e) => {
                    warn!(attempt, error = %e, "Agent command attempt failed");
                    last_err = Some(e);
                    if attempt < self.retry.attempts {
                        tokio::time::sleep(self.retry.delay).await;
                    }
                }
            }
        }

        Err(last_err.unwrap_or_else(|| GantryError::AgentTimeout {
            command: name.to_string(),
            seconds: self.retry.timeout.as_secs(),
        }))
    }

    async fn request_once(&self, command: &AgentCommand) -> Result<AgentResponse> {
        let request_id = Uuid::new_v4().simple().to_string();
        let request =
            AgentRequest { request_id: request_id.clone(), command: command.clone() };

        let frame = serde_json::to_string(&request)
            .map_err(|e| GantryError::Internal(format!("Failed to encode command: {}", e)))?;

        let (tx, rx) = oneshot::channel();
        self.pending.lock().await.insert(request_id.clone(), tx);

        if let Err(e) = self.transport.send(frame).await {
            self.pending.lock().await.remove(&request_id);
            return Err(e);
        }

        match tokio::time::timeout(self.retry.timeout, rx).await {
            Ok(Ok(response)) => Ok(response),
            Ok(Err(_)) => {
                // Sender dropped: the client is being torn down.
                Err(GantryError::AgentUnavailable { agent_id: self.agent_id.clone() })
            }
            Err(_) => {
                self.pending.lock().await.remove(&request_id);
                Err(GantryError::AgentTimeout {
                    command: command.name().to_string(),
                    seconds: self.retry.timeout.as_secs(),
                })
            }
        }
    }

    /// Feed one inbound frame from the transport.
    ///
    /// Unknown frames are logged and dropped; they must never take the
    /// connection down.
    pub async fn handle_frame(&self, raw: &str) {
        let frame: AgentFrame = match serde_json::from_str(raw) {
            Ok(frame) => frame,
            Err(e) => {
                warn!(agent_id = %self.agent_id, error = %e, "Dropping undecodable agent frame");
                return;
            }
        };

        match frame {
            AgentFrame::Response(response) => {
                let sender = self.pending.lock().await.remove(&response.request_id);
                match sender {
                    Some(tx) => {
                        let _ = tx.send(response);
                    }
                    None => {
                        debug!(
                            agent_id = %self.agent_id,
                            request_id = %response.request_id,
                            "Response for unknown or timed-out request"
                        );
                    }
                }
            }
            AgentFrame::Event(event) => {
                let deployment_id = event.deployment_id().to_string();
                let watcher = self.watchers.lock().await.get(&deployment_id).cloned();
                match watcher {
                    Some(tx) => {
                        if tx.send(event).await.is_err() {
                            self.watchers.lock().await.remove(&deployment_id);
                        }
                    }
                    None => {
                        debug!(
                            agent_id = %self.agent_id,
                            deployment_id = %deployment_id,
                            "Deployment event with no watcher"
                        );
                    }
                }
            }
        }
    }

    /// Subscribe to asynchronous events for one deployment.
    ///
    /// The returned channel closes when the client (and with it the
    /// transport) goes away, letting the executor fail faster than the
    /// global deployment timeout on agent disconnect.
    pub async fn watch_deployment(&self, deployment_id: &str) -> mpsc::Receiver<AgentEvent> {
        let (tx, rx) = mpsc::channel(WATCHER_BUFFER);
        self.watchers.lock().await.insert(deployment_id.to_string(), tx);
        rx
    }

    /// Drop the watcher for a deployment.
    pub async fn unwatch_deployment(&self, deployment_id: &str) {
        self.watchers.lock().await.remove(deployment_id);
    }

    /// Tear down after transport loss.
    ///
    /// Pending requests resolve to [`GantryError::AgentUnavailable`] and
    /// every deployment watcher channel closes, so in-flight executions
    /// fail immediately instead of waiting out their timeouts.
    pub async fn disconnect(&self) {
        warn!(agent_id = %self.agent_id, "Agent transport lost; failing in-flight work");
        self.pending.lock().await.clear();
        self.watchers.lock().await.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex as StdMutex;

    /// Transport capturing outbound frames, optionally failing sends.
    struct RecordingTransport {
        frames: StdMutex<Vec<String>>,
        fail_sends: StdMutex<u32>,
    }

    impl RecordingTransport {
        fn new() -> Arc<Self> {
            Arc::new(Self { frames: StdMutex::new(Vec::new()), fail_sends: StdMutex::new(0) })
        }

        fn sent(&self) -> Vec<String> {
            self.frames.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl AgentTransport for RecordingTransport {
        async fn send(&self, frame: String) -> Result<()> {
            let mut failures = self.fail_sends.lock().unwrap();
            if *failures > 0 {
                *failures -= 1;
                return Err(GantryError::AgentUnavailable { agent_id: "test".to_string() });
            }
            self.frames.lock().unwrap().push(frame);
            Ok(())
        }
    }

    fn fast_retry() -> RetryPolicy {
        RetryPolicy {
            attempts: 3,
            delay: Duration::from_millis(1),
            timeout: Duration::from_millis(200),
        }
    }

    #[tokio::test]
    async fn test_request_response_correlation() {
        let transport = RecordingTransport::new();
        let client =
            Arc::new(AgentClient::new("agent-1", transport.clone(), fast_retry()));

        let requester = {
            let client = client.clone();
            tokio::spawn(async move { client.request(AgentCommand::Ping).await })
        };

        // Wait for the frame to be sent, then answer it.
        let request_id = loop {
            let frames = transport.sent();
            if let Some(frame) = frames.first() {
                let value: serde_json::Value = serde_json::from_str(frame).unwrap();
                break value["request_id"].as_str().unwrap().to_string();
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        };

        client
            .handle_frame(&format!(r#"{{"request_id":"{}","success":true}}"#, request_id))
            .await;

        let response = requester.await.unwrap().unwrap();
        assert!(response.success);
    }

    #[tokio::test]
    async fn test_timeout_after_attempts_exhausted() {
        let transport = RecordingTransport::new();
        let client = AgentClient::new(
            "agent-1",
            transport.clone(),
            RetryPolicy {
                attempts: 2,
                delay: Duration::from_millis(1),
                timeout: Duration::from_millis(20),
            },
        );

        let err = client.request(AgentCommand::Ping).await.unwrap_err();
        assert!(matches!(err, GantryError::AgentTimeout { .. }));
        // One frame per attempt
        assert_eq!(transport.sent().len(), 2);
    }

    #[tokio::test]
    async fn test_send_failure_is_retried() {
        let transport = RecordingTransport::new();
        *transport.fail_sends.lock().unwrap() = 1;
        let client =
            Arc::new(AgentClient::new("agent-1", transport.clone(), fast_retry()));

        let requester = {
            let client = client.clone();
            tokio::spawn(async move { client.request(AgentCommand::Ping).await })
        };

        let request_id = loop {
            let frames = transport.sent();
            if let Some(frame) = frames.first() {
                let value: serde_json::Value = serde_json::from_str(frame).unwrap();
                break value["request_id"].as_str().unwrap().to_string();
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        };

        client
            .handle_frame(&format!(r#"{{"request_id":"{}","success":true}}"#, request_id))
            .await;

        assert!(requester.await.unwrap().is_ok());
    }

    #[tokio::test]
    async fn test_agent_rejection_is_not_retried() {
        let transport = RecordingTransport::new();
        let client =
            Arc::new(AgentClient::new("agent-1", transport.clone(), fast_retry()));

        let requester = {
            let client = client.clone();
            tokio::spawn(async move { client.request(AgentCommand::Ping).await })
        };

        let request_id = loop {
            let frames = transport.sent();
            if let Some(frame) = frames.first() {
                let value: serde_json::Value = serde_json::from_str(frame).unwrap();
                break value["request_id"].as_str().unwrap().to_string();
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        };

        client
            .handle_frame(&format!(
                r#"{{"request_id":"{}","success":false,"error":"nope"}}"#,
                request_id
            ))
            .await;

        let err = requester.await.unwrap().unwrap_err();
        assert!(matches!(err, GantryError::AgentCommand { .. }));
        assert_eq!(transport.sent().len(), 1);
    }

    #[tokio::test]
    async fn test_deployment_events_reach_watcher() {
        let transport = RecordingTransport::new();
        let client = AgentClient::new("agent-1", transport, fast_retry());

        let mut rx = client.watch_deployment("d1").await;

        client
            .handle_frame(
                r#"{"type":"deploy_progress","deployment_id":"d1","stage":"pulling","message":"pulling nginx"}"#,
            )
            .await;
        client
            .handle_frame(
                r#"{"type":"deploy_complete","deployment_id":"d1","success":true,"services":{"web":"running"}}"#,
            )
            .await;
        // Event for a different deployment must not cross over.
        client
            .handle_frame(
                r#"{"type":"deploy_progress","deployment_id":"other","stage":"pulling","message":"x"}"#,
            )
            .await;

        match rx.recv().await.unwrap() {
            AgentEvent::DeployProgress { stage, .. } => assert_eq!(stage, "pulling"),
            other => panic!("unexpected event {:?}", other),
        }
        match rx.recv().await.unwrap() {
            AgentEvent::DeployComplete { success, .. } => assert!(success),
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_concurrent_requests_correlate_independently() {
        let transport = RecordingTransport::new();
        let client =
            Arc::new(AgentClient::new("agent-1", transport.clone(), fast_retry()));

        let first = {
            let client = client.clone();
            tokio::spawn(async move { client.request(AgentCommand::Ping).await })
        };
        let second = {
            let client = client.clone();
            tokio::spawn(async move { client.request(AgentCommand::ListNetworks).await })
        };

        let (id_a, id_b) = loop {
            let frames = transport.sent();
            if frames.len() >= 2 {
                let a: serde_json::Value = serde_json::from_str(&frames[0]).unwrap();
                let b: serde_json::Value = serde_json::from_str(&frames[1]).unwrap();
                break (
                    a["request_id"].as_str().unwrap().to_string(),
                    b["request_id"].as_str().unwrap().to_string(),
                );
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        };

        // Answer in reverse order.
        client
            .handle_frame(&format!(r#"{{"request_id":"{}","success":true}}"#, id_b))
            .await;
        client
            .handle_frame(&format!(r#"{{"request_id":"{}","success":true}}"#, id_a))
            .await;

        assert!(first.await.unwrap().is_ok());
        assert!(second.await.unwrap().is_ok());
    }
}
