//! Resolved container configuration primitives.
//!
//! A [`ContainerPlan`] is the engine-agnostic form a compose service is
//! lowered into. The stack orchestrator produces plans, the security policy
//! engine audits them, and host connectors translate them into engine calls.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

/// Transport protocol for a published port.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    #[default]
    Tcp,
    Udp,
}

impl Protocol {
    pub fn as_str(&self) -> &'static str {
        match self {
            Protocol::Tcp => "tcp",
            Protocol::Udp => "udp",
        }
    }
}

impl std::fmt::Display for Protocol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A host-to-container port mapping.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortBinding {
    /// Bind address on the host; engine default when absent.
    #[serde(default)]
    pub host_ip: Option<String>,
    pub host_port: u16,
    pub container_port: u16,
    #[serde(default)]
    pub protocol: Protocol,
}

/// A host-path bind mount.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BindMount {
    /// Host source path.
    pub source: String,
    /// Mount target inside the container.
    pub target: String,
    #[serde(default)]
    pub read_only: bool,
}

/// A named-volume mount.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NamedVolumeMount {
    /// Volume name (scoped to the stack unless external).
    pub volume: String,
    pub target: String,
    #[serde(default)]
    pub read_only: bool,
}

/// Restart policy for a container.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum RestartPolicy {
    #[default]
    No,
    Always,
    OnFailure,
    UnlessStopped,
}

impl RestartPolicy {
    /// Parse a compose `restart:` value. Unknown values fall back to `no`.
    pub fn parse(s: &str) -> Self {
        match s {
            "always" => RestartPolicy::Always,
            "on-failure" => RestartPolicy::OnFailure,
            "unless-stopped" => RestartPolicy::UnlessStopped,
            _ => RestartPolicy::No,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RestartPolicy::No => "no",
            RestartPolicy::Always => "always",
            RestartPolicy::OnFailure => "on-failure",
            RestartPolicy::UnlessStopped => "unless-stopped",
        }
    }
}

/// Declared health check for a container.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthcheckSpec {
    /// Check command in engine form, marker included
    /// (e.g. `["CMD-SHELL", "curl -f http://localhost/"]`).
    pub test: Vec<String>,
    pub interval: Duration,
    pub timeout: Duration,
    pub retries: u32,
    pub start_period: Duration,
}

/// A device passed through to the container.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceMapping {
    pub host_path: String,
    pub container_path: String,
    /// cgroup permissions string (`rwm` subset).
    pub permissions: String,
}

impl DeviceMapping {
    /// Parse a compose device string `host[:container[:permissions]]`.
    pub fn parse(s: &str) -> Self {
        let mut parts = s.splitn(3, ':');
        let host_path = parts.next().unwrap_or_default().to_string();
        let container_path = parts.next().map(str::to_string).unwrap_or_else(|| host_path.clone());
        let permissions = parts.next().unwrap_or("rwm").to_string();
        Self { host_path, container_path, permissions }
    }
}

/// Attachment of a container to one network.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkAttachment {
    /// Engine-level network name.
    pub network: String,
    #[serde(default)]
    pub ipv4_address: Option<String>,
    #[serde(default)]
    pub aliases: Vec<String>,
}

/// Fully resolved, engine-agnostic container configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ContainerPlan {
    /// Container name on the host.
    pub name: String,

    /// Image reference.
    pub image: String,

    /// Environment in `KEY=value` form.
    #[serde(default)]
    pub env: Vec<String>,

    #[serde(default)]
    pub command: Option<Vec<String>>,

    #[serde(default)]
    pub entrypoint: Option<Vec<String>>,

    #[serde(default)]
    pub ports: Vec<PortBinding>,

    #[serde(default)]
    pub binds: Vec<BindMount>,

    #[serde(default)]
    pub volumes: Vec<NamedVolumeMount>,

    /// Network joined at creation time, if any.
    #[serde(default)]
    pub network: Option<NetworkAttachment>,

    /// Networks requiring explicit post-create connect calls.
    #[serde(default)]
    pub extra_networks: Vec<NetworkAttachment>,

    /// Raw engine network mode (`host`, `none`, `container:<name>`).
    /// Mutually exclusive with `network`/`extra_networks`.
    #[serde(default)]
    pub network_mode: Option<String>,

    #[serde(default)]
    pub restart: RestartPolicy,

    /// Memory limit in bytes.
    #[serde(default)]
    pub memory_bytes: Option<i64>,

    /// CPU limit in units of 1e-9 cores.
    #[serde(default)]
    pub nano_cpus: Option<i64>,

    #[serde(default)]
    pub healthcheck: Option<HealthcheckSpec>,

    #[serde(default)]
    pub devices: Vec<DeviceMapping>,

    /// Additional `/etc/hosts` entries in `host:ip` form.
    #[serde(default)]
    pub extra_hosts: Vec<String>,

    #[serde(default)]
    pub cap_add: Vec<String>,

    #[serde(default)]
    pub cap_drop: Vec<String>,

    #[serde(default)]
    pub privileged: bool,

    #[serde(default)]
    pub user: Option<String>,

    #[serde(default)]
    pub working_dir: Option<String>,

    #[serde(default)]
    pub labels: HashMap<String, String>,
}

/// Network to be created (or validated, when external) before services.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkPlan {
    /// Engine-level network name.
    pub name: String,
    pub driver: String,
    #[serde(default)]
    pub subnet: Option<String>,
    /// External resources are validated to exist, never created or removed.
    #[serde(default)]
    pub external: bool,
}

/// Named volume to be created (or validated, when external) before services.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VolumePlan {
    pub name: String,
    pub driver: String,
    #[serde(default)]
    pub driver_opts: HashMap<String, String>,
    #[serde(default)]
    pub external: bool,
}

/// Observed runtime state of a container.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContainerStatus {
    Created,
    Running,
    Restarting,
    Paused,
    Exited,
    Dead,
    Unknown,
}

impl ContainerStatus {
    pub fn parse(s: &str) -> Self {
        match s {
            "created" => ContainerStatus::Created,
            "running" => ContainerStatus::Running,
            "restarting" => ContainerStatus::Restarting,
            "paused" => ContainerStatus::Paused,
            "exited" => ContainerStatus::Exited,
            "dead" => ContainerStatus::Dead,
            _ => ContainerStatus::Unknown,
        }
    }
}

/// Registry credentials for authenticated pulls.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistryAuth {
    pub registry: String,
    pub username: String,
    pub password: String,
}

/// Progress report emitted while pulling an image.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PullProgress {
    pub image: String,
    /// Engine status line (e.g. "Downloading", "Extracting").
    pub status: String,
    #[serde(default)]
    pub current: u64,
    #[serde(default)]
    pub total: u64,
}
