//! Deployment event broadcasting.
//!
//! Every state or progress change on a deployment is published after it is
//! persisted. Publishing is fire-and-forget: consumers (API layer, UI
//! streams) subscribe, and nothing blocks or fails when nobody listens.

use crate::types::Deployment;
use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::sync::broadcast;
use tracing::debug;

/// Maximum number of events buffered in the broadcast channel.
const EVENT_BUFFER_SIZE: usize = 256;

/// Progress payload of a deployment event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProgressInfo {
    pub overall_percent: u8,
    pub stage: String,
}

/// One deployment state/progress change, as broadcast to consumers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeploymentEvent {
    #[serde(rename = "type")]
    pub event_type: String,
    pub deployment_id: String,
    pub host_id: String,
    pub name: String,
    pub status: String,
    pub progress: ProgressInfo,
    /// Unix seconds.
    pub created_at: i64,
    /// Unix seconds; None while the deployment is in progress.
    pub completed_at: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl DeploymentEvent {
    /// Snapshot a deployment row into its broadcast form.
    pub fn from_deployment(deployment: &Deployment) -> Self {
        Self {
            event_type: "deployment".to_string(),
            deployment_id: deployment.id.clone(),
            host_id: deployment.host_id.clone(),
            name: deployment.stack_name.clone(),
            status: deployment.status.as_str().to_string(),
            progress: ProgressInfo {
                overall_percent: deployment.progress,
                stage: deployment.stage.clone(),
            },
            created_at: unix_seconds(deployment.created_at),
            completed_at: deployment.completed_at.map(unix_seconds),
            error: deployment.error.clone(),
        }
    }
}

fn unix_seconds(t: SystemTime) -> i64 {
    t.duration_since(UNIX_EPOCH).unwrap_or_default().as_secs() as i64
}

/// Broadcast channel for deployment events.
#[derive(Clone)]
pub struct DeploymentBroadcast {
    sender: broadcast::Sender<DeploymentEvent>,
}

impl DeploymentBroadcast {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(EVENT_BUFFER_SIZE);
        Self { sender }
    }

    /// Publish an event to all subscribers. Never blocks, never fails.
    pub fn publish(&self, event: DeploymentEvent) {
        debug!(
            deployment_id = %event.deployment_id,
            status = %event.status,
            percent = event.progress.overall_percent,
            "Publishing deployment event"
        );
        // Ignore send errors (no subscribers)
        let _ = self.sender.send(event);
    }

    /// Snapshot and publish a deployment's current state.
    pub fn publish_deployment(&self, deployment: &Deployment) {
        self.publish(DeploymentEvent::from_deployment(deployment));
    }

    /// Subscribe to all deployment events.
    pub fn subscribe(&self) -> broadcast::Receiver<DeploymentEvent> {
        self.sender.subscribe()
    }

    /// Get the number of current subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for DeploymentBroadcast {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::DeploymentStatus;

    #[tokio::test]
    async fn test_publish_subscribe() {
        let bus = DeploymentBroadcast::new();
        let mut rx = bus.subscribe();

        let mut deployment = Deployment::new("host-1", "web", true);
        deployment.transition(DeploymentStatus::Validating);
        deployment.set_progress(10, "validating stack");
        bus.publish_deployment(&deployment);

        let event = tokio::time::timeout(std::time::Duration::from_millis(100), rx.recv())
            .await
            .unwrap()
            .unwrap();

        assert_eq!(event.deployment_id, deployment.id);
        assert_eq!(event.status, "validating");
        assert_eq!(event.progress.overall_percent, 10);
        assert_eq!(event.name, "web");
    }

    #[test]
    fn test_publish_without_subscribers_is_fine() {
        let bus = DeploymentBroadcast::new();
        let deployment = Deployment::new("host-1", "web", true);
        bus.publish_deployment(&deployment);
        assert_eq!(bus.subscriber_count(), 0);
    }

    #[test]
    fn test_event_wire_shape() {
        let mut deployment = Deployment::new("host-1", "web", true);
        deployment.transition(DeploymentStatus::Validating);
        deployment.transition(DeploymentStatus::Failed);
        deployment.error = Some("pull failed".to_string());

        let event = DeploymentEvent::from_deployment(&deployment);
        let json = serde_json::to_value(&event).unwrap();

        assert_eq!(json["type"], "deployment");
        assert_eq!(json["status"], "failed");
        assert_eq!(json["error"], "pull failed");
        assert!(json["progress"]["overall_percent"].is_number());
        assert!(json["completed_at"].is_number());
    }
}
