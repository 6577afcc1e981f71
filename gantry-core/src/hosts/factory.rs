//! Connector factory keyed on the host's connection type.

use super::{AgentConnector, DockerConnector, HostConnector};
use crate::agent::AgentClient;
use crate::error::{GantryError, Result};
use crate::types::{Host, HostConnection};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{info, instrument};

/// Produces the right execution backend for a host.
///
/// Agent clients are registered by whatever layer owns the agent
/// connections; direct connectors are built on demand from the host record
/// and cached, so concurrent deployments against one host share a single
/// engine client.
#[derive(Default)]
pub struct ConnectorFactory {
    agents: RwLock<HashMap<String, Arc<AgentClient>>>,
    connectors: RwLock<HashMap<String, Arc<dyn HostConnector>>>,
}

impl ConnectorFactory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a pre-built connector for a host.
    ///
    /// Used for sharing externally constructed engine clients and for
    /// substituting backends in tests.
    pub async fn register_connector(&self, host_id: &str, connector: Arc<dyn HostConnector>) {
        self.connectors.write().await.insert(host_id.to_string(), connector);
    }

    /// Drop a cached connector (e.g. after a host's connection settings
    /// changed).
    pub async fn evict_connector(&self, host_id: &str) {
        self.connectors.write().await.remove(host_id);
    }

    /// Register a connected agent's command channel.
    pub async fn register_agent(&self, client: Arc<AgentClient>) {
        info!(agent_id = %client.agent_id(), "Registering agent channel");
        self.agents.write().await.insert(client.agent_id().to_string(), client);
    }

    /// Remove a disconnected agent's command channel.
    pub async fn unregister_agent(&self, agent_id: &str) {
        info!(agent_id = %agent_id, "Unregistering agent channel");
        self.agents.write().await.remove(agent_id);
    }

    /// Look up a registered agent channel.
    pub async fn agent_client(&self, agent_id: &str) -> Result<Arc<AgentClient>> {
        self.agents.read().await.get(agent_id).cloned().ok_or_else(|| {
            GantryError::AgentUnavailable { agent_id: agent_id.to_string() }
        })
    }

    /// Get the connector matching the host's connection type.
    #[instrument(skip(self, host), fields(host_id = %host.id))]
    pub async fn connector_for(&self, host: &Host) -> Result<Arc<dyn HostConnector>> {
        if let Some(connector) = self.connectors.read().await.get(&host.id) {
            return Ok(connector.clone());
        }

        match &host.connection {
            HostConnection::Local { .. } | HostConnection::Tcp { .. } => {
                let connector: Arc<dyn HostConnector> = Arc::new(DockerConnector::new(host)?);
                self.connectors.write().await.insert(host.id.clone(), connector.clone());
                Ok(connector)
            }
            // Agent connectors are thin wrappers over the registered client;
            // building them fresh keeps unregistration authoritative.
            HostConnection::Agent { agent_id } => {
                let client = self.agent_client(agent_id).await?;
                Ok(Arc::new(AgentConnector::new(client)))
            }
        }
    }
}
