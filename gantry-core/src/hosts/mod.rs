//! Host execution abstraction.
//!
//! Gantry talks to container engines through the `HostConnector` trait:
//! - [`DockerConnector`]: direct engine-API calls (local socket or TCP/TLS)
//! - [`AgentConnector`]: the same capabilities routed through a remote agent
//!
//! Connectors are produced by [`ConnectorFactory`] keyed on the host's
//! connection type; orchestration code never branches on a backend string.

use crate::error::Result;
use crate::types::{
    ContainerPlan, ContainerStatus, NetworkAttachment, NetworkPlan, PullProgress, RegistryAuth,
    VolumePlan,
};
use async_trait::async_trait;
use std::time::Duration;
use tokio::sync::mpsc;

pub mod agent;
pub mod docker;
mod factory;

pub use agent::AgentConnector;
pub use docker::DockerConnector;
pub use factory::ConnectorFactory;

/// Canonical persisted form of a container identifier.
pub const SHORT_ID_LEN: usize = 12;

/// Truncate a full container id to its 12-character short form.
pub fn short_id(id: &str) -> String {
    id.chars().take(SHORT_ID_LEN).collect()
}

/// Capability set every execution backend provides.
#[async_trait]
pub trait HostConnector: Send + Sync {
    /// Verify the engine (or agent) is reachable.
    async fn ping(&self) -> Result<()>;

    /// Pull an image, optionally streaming progress to `progress`.
    async fn pull_image(
        &self,
        image: &str,
        credentials: Option<&RegistryAuth>,
        progress: Option<mpsc::Sender<PullProgress>>,
    ) -> Result<()>;

    /// Create a container from a resolved plan.
    ///
    /// Returns the 12-character short id.
    async fn create_container(&self, plan: &ContainerPlan) -> Result<String>;

    async fn start_container(&self, container_id: &str) -> Result<()>;

    /// Stop gracefully, waiting up to `timeout` before the engine kills it.
    async fn stop_container(&self, container_id: &str, timeout: Duration) -> Result<()>;

    async fn remove_container(&self, container_id: &str, force: bool) -> Result<()>;

    async fn container_status(&self, container_id: &str) -> Result<ContainerStatus>;

    /// Last `tail` lines of combined stdout/stderr.
    async fn container_logs(&self, container_id: &str, tail: usize) -> Result<String>;

    async fn list_networks(&self) -> Result<Vec<String>>;

    async fn create_network(&self, plan: &NetworkPlan) -> Result<()>;

    /// Attach a created container to an additional network.
    async fn connect_network(
        &self,
        container_id: &str,
        attachment: &NetworkAttachment,
    ) -> Result<()>;

    async fn list_volumes(&self) -> Result<Vec<String>>;

    async fn create_volume(&self, plan: &VolumePlan) -> Result<()>;

    /// Host ports currently taken by running containers.
    async fn ports_in_use(&self) -> Result<Vec<u16>>;

    /// Wait for a started container to settle.
    ///
    /// With a declared health check, polls until healthy bounded by
    /// `timeout`; without one, applies a fixed short stability delay and
    /// checks the container is still running. Returns false on timeout or
    /// an unhealthy/stopped container; never errors on timeout itself.
    async fn wait_healthy(
        &self,
        container_id: &str,
        has_healthcheck: bool,
        timeout: Duration,
    ) -> Result<bool>;

    /// Backend name (for logging and metrics).
    fn name(&self) -> &str;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_short_id_truncates() {
        let full = "0123456789abcdef0123456789abcdef";
        assert_eq!(short_id(full), "0123456789ab");
        assert_eq!(short_id("abc"), "abc");
    }
}
