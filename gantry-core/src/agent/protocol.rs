//! Agent command channel message types.
//!
//! Commands are serialized as `{"command": ..., "request_id": ..., "payload": ...}`
//! frames and answered by a correlated [`AgentResponse`]. Long-running
//! operations additionally emit asynchronous [`AgentEvent`] frames
//! (`deploy_progress`, `deploy_complete`) after the command was accepted.

use crate::types::{ContainerPlan, NetworkAttachment, NetworkPlan, RegistryAuth, VolumePlan};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// A command sent to a remote agent.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "command", content = "payload", rename_all = "snake_case")]
pub enum AgentCommand {
    Ping,
    PullImage {
        image: String,
        #[serde(default)]
        credentials: Option<RegistryAuth>,
    },
    CreateContainer {
        plan: ContainerPlan,
    },
    StartContainer {
        container_id: String,
    },
    StopContainer {
        container_id: String,
        timeout_sec: u64,
    },
    RemoveContainer {
        container_id: String,
        force: bool,
    },
    ContainerStatus {
        container_id: String,
    },
    ContainerLogs {
        container_id: String,
        tail: usize,
    },
    ListNetworks,
    CreateNetwork {
        plan: NetworkPlan,
    },
    ConnectNetwork {
        container_id: String,
        attachment: NetworkAttachment,
    },
    ListVolumes,
    CreateVolume {
        plan: VolumePlan,
    },
    PortsInUse,
    WaitHealthy {
        container_id: String,
        has_healthcheck: bool,
        timeout_sec: u64,
    },
    /// Hand a whole compose deployment to the agent in one round trip.
    DeployCompose(DeployComposePayload),
}

impl AgentCommand {
    /// Command name as it appears on the wire (for logs and errors).
    pub fn name(&self) -> &'static str {
        match self {
            AgentCommand::Ping => "ping",
            AgentCommand::PullImage { .. } => "pull_image",
            AgentCommand::CreateContainer { .. } => "create_container",
            AgentCommand::StartContainer { .. } => "start_container",
            AgentCommand::StopContainer { .. } => "stop_container",
            AgentCommand::RemoveContainer { .. } => "remove_container",
            AgentCommand::ContainerStatus { .. } => "container_status",
            AgentCommand::ContainerLogs { .. } => "container_logs",
            AgentCommand::ListNetworks => "list_networks",
            AgentCommand::CreateNetwork { .. } => "create_network",
            AgentCommand::ConnectNetwork { .. } => "connect_network",
            AgentCommand::ListVolumes => "list_volumes",
            AgentCommand::CreateVolume { .. } => "create_volume",
            AgentCommand::PortsInUse => "ports_in_use",
            AgentCommand::WaitHealthy { .. } => "wait_healthy",
            AgentCommand::DeployCompose(_) => "deploy_compose",
        }
    }
}

/// Payload of the `deploy_compose` command.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeployComposePayload {
    pub deployment_id: String,
    pub project_name: String,
    pub compose_content: String,
    #[serde(default)]
    pub environment: HashMap<String, String>,
    /// "up" or "down".
    pub action: String,
    #[serde(default)]
    pub profiles: Vec<String>,
    #[serde(default)]
    pub wait_for_healthy: bool,
    /// Health wait ceiling in seconds.
    #[serde(default)]
    pub health_timeout: u64,
    #[serde(default)]
    pub registry_credentials: Option<RegistryAuth>,
}

/// Outbound frame: a command plus its correlation id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentRequest {
    pub request_id: String,
    #[serde(flatten)]
    pub command: AgentCommand,
}

/// Correlated response acknowledging (or rejecting) a command.
///
/// Acceptance of a long-running command is distinct from its completion,
/// which arrives later as [`AgentEvent`] frames.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentResponse {
    pub request_id: String,
    pub success: bool,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub data: serde_json::Value,
}

/// Asynchronous event frames emitted by the agent.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AgentEvent {
    DeployProgress {
        deployment_id: String,
        stage: String,
        message: String,
        #[serde(default)]
        services: Option<HashMap<String, String>>,
    },
    DeployComplete {
        deployment_id: String,
        success: bool,
        #[serde(default)]
        partial_success: bool,
        #[serde(default)]
        services: HashMap<String, String>,
        #[serde(default)]
        failed_services: Vec<String>,
        #[serde(default)]
        error: Option<String>,
    },
}

impl AgentEvent {
    pub fn deployment_id(&self) -> &str {
        match self {
            AgentEvent::DeployProgress { deployment_id, .. } => deployment_id,
            AgentEvent::DeployComplete { deployment_id, .. } => deployment_id,
        }
    }
}

/// Any inbound frame from an agent.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AgentFrame {
    Event(AgentEvent),
    Response(AgentResponse),
}
