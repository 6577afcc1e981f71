//! Agent-routed execution backend.
//!
//! Serializes each host capability into a command on the agent channel.
//! Responses carry operation results in the `data` field; long-running
//! deployment work additionally reports through asynchronous events the
//! executor consumes directly from the [`AgentClient`].

use super::HostConnector;
use crate::agent::{AgentClient, AgentCommand};
use crate::error::{GantryError, Result};
use crate::types::{
    ContainerPlan, ContainerStatus, NetworkAttachment, NetworkPlan, PullProgress, RegistryAuth,
    VolumePlan,
};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

/// Remote execution backend speaking through an [`AgentClient`].
pub struct AgentConnector {
    client: Arc<AgentClient>,
}

impl AgentConnector {
    pub fn new(client: Arc<AgentClient>) -> Self {
        Self { client }
    }

    /// The underlying command channel, for deployment-event watching.
    pub fn client(&self) -> Arc<AgentClient> {
        self.client.clone()
    }

    async fn request_data<T: DeserializeOwned>(&self, command: AgentCommand) -> Result<T> {
        let name = command.name();
        let response = self.client.request(command).await?;
        // Agents may omit `data` entirely; treat that as an empty payload so
        // defaulted fields still deserialize.
        let data = match response.data {
            serde_json::Value::Null => serde_json::Value::Object(Default::default()),
            data => data,
        };
        serde_json::from_value(data).map_err(|e| GantryError::AgentCommand {
            command: name.to_string(),
            reason: format!("malformed response payload: {}", e),
        })
    }
}

#[derive(Debug, Deserialize)]
struct ContainerIdData {
    container_id: String,
}

#[derive(Debug, Deserialize)]
struct StatusData {
    status: String,
}

#[derive(Debug, Deserialize)]
struct LogsData {
    #[serde(default)]
    logs: String,
}

#[derive(Debug, Deserialize)]
struct NamesData {
    #[serde(default)]
    names: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct PortsData {
    #[serde(default)]
    ports: Vec<u16>,
}

#[derive(Debug, Deserialize)]
struct HealthyData {
    healthy: bool,
}

#[async_trait]
impl HostConnector for AgentConnector {
    async fn ping(&self) -> Result<()> {
        self.client.request(AgentCommand::Ping).await?;
        Ok(())
    }

    async fn pull_image(
        &self,
        image: &str,
        credentials: Option<&RegistryAuth>,
        _progress: Option<mpsc::Sender<PullProgress>>,
    ) -> Result<()> {
        // Pull progress for agent hosts arrives through deploy events, not
        // through this per-call channel.
        self.client
            .request(AgentCommand::PullImage {
                image: image.to_string(),
                credentials: credentials.cloned(),
            })
            .await?;
        Ok(())
    }

    async fn create_container(&self, plan: &ContainerPlan) -> Result<String> {
        let data: ContainerIdData =
            self.request_data(AgentCommand::CreateContainer { plan: plan.clone() }).await?;
        Ok(super::short_id(&data.container_id))
    }

    async fn start_container(&self, container_id: &str) -> Result<()> {
        self.client
            .request(AgentCommand::StartContainer { container_id: container_id.to_string() })
            .await?;
        Ok(())
    }

    async fn stop_container(&self, container_id: &str, timeout: Duration) -> Result<()> {
        self.client
            .request(AgentCommand::StopContainer {
                container_id: container_id.to_string(),
                timeout_sec: timeout.as_secs(),
            })
            .await?;
        Ok(())
    }

    async fn remove_container(&self, container_id: &str, force: bool) -> Result<()> {
        self.client
            .request(AgentCommand::RemoveContainer {
                container_id: container_id.to_string(),
                force,
            })
            .await?;
        Ok(())
    }

    async fn container_status(&self, container_id: &str) -> Result<ContainerStatus> {
        let data: StatusData = self
            .request_data(AgentCommand::ContainerStatus {
                container_id: container_id.to_string(),
            })
            .await?;
        Ok(ContainerStatus::parse(&data.status))
    }

    async fn container_logs(&self, container_id: &str, tail: usize) -> Result<String> {
        let data: LogsData = self
            .request_data(AgentCommand::ContainerLogs {
                container_id: container_id.to_string(),
                tail,
            })
            .await?;
        Ok(data.logs)
    }

    async fn list_networks(&self) -> Result<Vec<String>> {
        let data: NamesData = self.request_data(AgentCommand::ListNetworks).await?;
        Ok(data.names)
    }

    async fn create_network(&self, plan: &NetworkPlan) -> Result<()> {
        self.client.request(AgentCommand::CreateNetwork { plan: plan.clone() }).await?;
        Ok(())
    }

    async fn connect_network(
        &self,
        container_id: &str,
        attachment: &NetworkAttachment,
    ) -> Result<()> {
        self.client
            .request(AgentCommand::ConnectNetwork {
                container_id: container_id.to_string(),
                attachment: attachment.clone(),
            })
            .await?;
        Ok(())
    }

    async fn list_volumes(&self) -> Result<Vec<String>> {
        let data: NamesData = self.request_data(AgentCommand::ListVolumes).await?;
        Ok(data.names)
    }

    async fn create_volume(&self, plan: &VolumePlan) -> Result<()> {
        self.client.request(AgentCommand::CreateVolume { plan: plan.clone() }).await?;
        Ok(())
    }

    async fn ports_in_use(&self) -> Result<Vec<u16>> {
        let data: PortsData = self.request_data(AgentCommand::PortsInUse).await?;
        Ok(data.ports)
    }

    async fn wait_healthy(
        &self,
        container_id: &str,
        has_healthcheck: bool,
        timeout: Duration,
    ) -> Result<bool> {
        let result: Result<HealthyData> = self
            .request_data(AgentCommand::WaitHealthy {
                container_id: container_id.to_string(),
                has_healthcheck,
                timeout_sec: timeout.as_secs(),
            })
            .await;

        match result {
            Ok(data) => Ok(data.healthy),
            // The wait contract is boolean: a timed-out wait is not an error.
            Err(GantryError::AgentTimeout { .. }) => Ok(false),
            Err(e) => Err(e),
        }
    }

    fn name(&self) -> &str {
        "agent"
    }
}
