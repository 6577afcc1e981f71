//! Direct engine-API backend via bollard.

use super::{short_id, HostConnector};
use crate::error::{GantryError, Result};
use crate::types::{
    ContainerPlan, ContainerStatus, Host, HostConnection, NetworkAttachment, NetworkPlan,
    PullProgress, RegistryAuth, VolumePlan,
};
use async_trait::async_trait;
use bollard::auth::DockerCredentials;
use bollard::container::{
    Config, CreateContainerOptions, InspectContainerOptions, ListContainersOptions, LogsOptions,
    RemoveContainerOptions, StartContainerOptions, StopContainerOptions,
};
use bollard::image::CreateImageOptions;
use bollard::models::{
    DeviceMapping as EngineDeviceMapping, EndpointIpamConfig, EndpointSettings, HealthConfig,
    HealthStatusEnum, HostConfig, Ipam, IpamConfig, PortBinding as EnginePortBinding,
    RestartPolicy as EngineRestartPolicy, RestartPolicyNameEnum,
};
use bollard::network::{ConnectNetworkOptions, CreateNetworkOptions, ListNetworksOptions};
use bollard::volume::{CreateVolumeOptions, ListVolumesOptions};
use bollard::{Docker, API_DEFAULT_VERSION};
use futures::StreamExt;
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, instrument, warn};

/// Engine connection timeout in seconds.
const CONNECT_TIMEOUT_SECS: u64 = 30;

/// How long a container must stay up to count as settled when it declares
/// no health check.
const STABILITY_DELAY: Duration = Duration::from_secs(3);

/// Poll interval while waiting on a declared health check.
const HEALTH_POLL_INTERVAL: Duration = Duration::from_secs(2);

/// Direct engine-API backend.
pub struct DockerConnector {
    docker: Docker,
    host_id: String,
}

impl DockerConnector {
    /// Connect to the engine described by the host record.
    pub fn new(host: &Host) -> Result<Self> {
        let docker = match &host.connection {
            HostConnection::Local { socket_path } => match socket_path {
                Some(path) => Docker::connect_with_socket(
                    &path.to_string_lossy(),
                    CONNECT_TIMEOUT_SECS,
                    API_DEFAULT_VERSION,
                ),
                None => Docker::connect_with_local_defaults(),
            },
            HostConnection::Tcp { addr, tls } => match tls {
                Some(paths) => Docker::connect_with_ssl(
                    addr,
                    &paths.key,
                    &paths.cert,
                    &paths.ca,
                    CONNECT_TIMEOUT_SECS,
                    API_DEFAULT_VERSION,
                ),
                None => Docker::connect_with_http(
                    addr,
                    CONNECT_TIMEOUT_SECS,
                    API_DEFAULT_VERSION,
                ),
            },
            HostConnection::Agent { agent_id } => {
                return Err(GantryError::InvalidConfig {
                    reason: format!(
                        "Host {} is agent-routed (agent {}); use the agent connector",
                        host.id, agent_id
                    ),
                })
            }
        }
        .map_err(|e| GantryError::HostOperation {
            operation: "connect".to_string(),
            reason: e.to_string(),
        })?;

        Ok(Self { docker, host_id: host.id.clone() })
    }

    fn op_err(operation: &str, e: impl std::fmt::Display) -> GantryError {
        metrics::counter!("gantry_host_errors_total", "backend" => "docker").increment(1);
        GantryError::HostOperation { operation: operation.to_string(), reason: e.to_string() }
    }

    fn render_config(plan: &ContainerPlan) -> Config<String> {
        let mut binds: Vec<String> = plan
            .binds
            .iter()
            .map(|b| {
                if b.read_only {
                    format!("{}:{}:ro", b.source, b.target)
                } else {
                    format!("{}:{}", b.source, b.target)
                }
            })
            .collect();
        for v in &plan.volumes {
            if v.read_only {
                binds.push(format!("{}:{}:ro", v.volume, v.target));
            } else {
                binds.push(format!("{}:{}", v.volume, v.target));
            }
        }

        let mut port_bindings: HashMap<String, Option<Vec<EnginePortBinding>>> = HashMap::new();
        let mut exposed_ports: HashMap<String, HashMap<(), ()>> = HashMap::new();
        for p in &plan.ports {
            let key = format!("{}/{}", p.container_port, p.protocol);
            exposed_ports.insert(key.clone(), HashMap::new());
            let entry = port_bindings.entry(key).or_insert_with(|| Some(Vec::new()));
            if let Some(list) = entry {
                list.push(EnginePortBinding {
                    host_ip: p.host_ip.clone(),
                    host_port: Some(p.host_port.to_string()),
                });
            }
        }

        let restart_policy = EngineRestartPolicy {
            name: Some(match plan.restart {
                crate::types::RestartPolicy::No => RestartPolicyNameEnum::NO,
                crate::types::RestartPolicy::Always => RestartPolicyNameEnum::ALWAYS,
                crate::types::RestartPolicy::OnFailure => RestartPolicyNameEnum::ON_FAILURE,
                crate::types::RestartPolicy::UnlessStopped => {
                    RestartPolicyNameEnum::UNLESS_STOPPED
                }
            }),
            maximum_retry_count: None,
        };

        let devices: Vec<EngineDeviceMapping> = plan
            .devices
            .iter()
            .map(|d| EngineDeviceMapping {
                path_on_host: Some(d.host_path.clone()),
                path_in_container: Some(d.container_path.clone()),
                cgroup_permissions: Some(d.permissions.clone()),
            })
            .collect();

        let host_config = HostConfig {
            binds: if binds.is_empty() { None } else { Some(binds) },
            port_bindings: if port_bindings.is_empty() { None } else { Some(port_bindings) },
            network_mode: plan.network_mode.clone(),
            restart_policy: Some(restart_policy),
            memory: plan.memory_bytes,
            nano_cpus: plan.nano_cpus,
            cap_add: if plan.cap_add.is_empty() { None } else { Some(plan.cap_add.clone()) },
            cap_drop: if plan.cap_drop.is_empty() { None } else { Some(plan.cap_drop.clone()) },
            privileged: Some(plan.privileged),
            devices: if devices.is_empty() { None } else { Some(devices) },
            extra_hosts: if plan.extra_hosts.is_empty() {
                None
            } else {
                Some(plan.extra_hosts.clone())
            },
            ..Default::default()
        };

        let healthcheck = plan.healthcheck.as_ref().map(|h| {
            HealthConfig {
                test: Some(h.test.clone()),
                interval: Some(h.interval.as_nanos() as i64),
                timeout: Some(h.timeout.as_nanos() as i64),
                retries: Some(h.retries as i64),
                start_period: Some(h.start_period.as_nanos() as i64),
                start_interval: None,
            }
        });

        // Engines only auto-join the network passed at creation; any others
        // are attached afterwards with explicit connect calls.
        let networking_config = plan.network.as_ref().map(|attachment| {
            let mut endpoints = HashMap::new();
            endpoints.insert(attachment.network.clone(), Self::endpoint(attachment));
            bollard::container::NetworkingConfig { endpoints_config: endpoints }
        });

        Config {
            image: Some(plan.image.clone()),
            cmd: plan.command.clone(),
            entrypoint: plan.entrypoint.clone(),
            env: if plan.env.is_empty() { None } else { Some(plan.env.clone()) },
            exposed_ports: if exposed_ports.is_empty() { None } else { Some(exposed_ports) },
            labels: if plan.labels.is_empty() { None } else { Some(plan.labels.clone()) },
            user: plan.user.clone(),
            working_dir: plan.working_dir.clone(),
            healthcheck,
            host_config: Some(host_config),
            networking_config,
            ..Default::default()
        }
    }

    fn endpoint(attachment: &NetworkAttachment) -> EndpointSettings {
        EndpointSettings {
            aliases: if attachment.aliases.is_empty() {
                None
            } else {
                Some(attachment.aliases.clone())
            },
            ipam_config: attachment.ipv4_address.as_ref().map(|ip| EndpointIpamConfig {
                ipv4_address: Some(ip.clone()),
                ..Default::default()
            }),
            ..Default::default()
        }
    }
}

#[async_trait]
impl HostConnector for DockerConnector {
    #[instrument(skip(self), fields(host_id = %self.host_id))]
    async fn ping(&self) -> Result<()> {
        self.docker.ping().await.map_err(|e| Self::op_err("ping", e))?;
        Ok(())
    }

    #[instrument(skip(self, credentials, progress), fields(host_id = %self.host_id, image = %image))]
    async fn pull_image(
        &self,
        image: &str,
        credentials: Option<&RegistryAuth>,
        progress: Option<mpsc::Sender<PullProgress>>,
    ) -> Result<()> {
        let options =
            CreateImageOptions { from_image: image.to_string(), ..Default::default() };
        let creds = credentials.map(|c| DockerCredentials {
            username: Some(c.username.clone()),
            password: Some(c.password.clone()),
            serveraddress: Some(c.registry.clone()),
            ..Default::default()
        });

        let mut stream = self.docker.create_image(Some(options), None, creds);
        while let Some(item) = stream.next().await {
            let info = item.map_err(|e| Self::op_err("pull_image", e))?;
            if let Some(tx) = &progress {
                let detail = info.progress_detail.unwrap_or_default();
                let report = PullProgress {
                    image: image.to_string(),
                    status: info.status.unwrap_or_default(),
                    current: detail.current.unwrap_or(0) as u64,
                    total: detail.total.unwrap_or(0) as u64,
                };
                // Progress is best-effort; a full buffer must not stall the pull.
                let _ = tx.try_send(report);
            }
        }

        debug!(image = %image, "Image pulled");
        Ok(())
    }

    #[instrument(skip(self, plan), fields(host_id = %self.host_id, container = %plan.name))]
    async fn create_container(&self, plan: &ContainerPlan) -> Result<String> {
        let options = CreateContainerOptions { name: plan.name.clone(), platform: None };
        let config = Self::render_config(plan);

        let response = self
            .docker
            .create_container(Some(options), config)
            .await
            .map_err(|e| Self::op_err("create_container", e))?;

        Ok(short_id(&response.id))
    }

    #[instrument(skip(self), fields(host_id = %self.host_id))]
    async fn start_container(&self, container_id: &str) -> Result<()> {
        self.docker
            .start_container(container_id, None::<StartContainerOptions<String>>)
            .await
            .map_err(|e| Self::op_err("start_container", e))?;
        Ok(())
    }

    #[instrument(skip(self), fields(host_id = %self.host_id))]
    async fn stop_container(&self, container_id: &str, timeout: Duration) -> Result<()> {
        let options = StopContainerOptions { t: timeout.as_secs() as i64 };
        self.docker
            .stop_container(container_id, Some(options))
            .await
            .map_err(|e| Self::op_err("stop_container", e))?;
        Ok(())
    }

    #[instrument(skip(self), fields(host_id = %self.host_id))]
    async fn remove_container(&self, container_id: &str, force: bool) -> Result<()> {
        let options = RemoveContainerOptions { force, ..Default::default() };
        self.docker
            .remove_container(container_id, Some(options))
            .await
            .map_err(|e| Self::op_err("remove_container", e))?;
        Ok(())
    }

    async fn container_status(&self, container_id: &str) -> Result<ContainerStatus> {
        let inspect = self
            .docker
            .inspect_container(container_id, None::<InspectContainerOptions>)
            .await
            .map_err(|e| Self::op_err("container_status", e))?;

        let status = inspect
            .state
            .and_then(|s| s.status)
            .map(|s| ContainerStatus::parse(&s.to_string()))
            .unwrap_or(ContainerStatus::Unknown);
        Ok(status)
    }

    async fn container_logs(&self, container_id: &str, tail: usize) -> Result<String> {
        let options = LogsOptions::<String> {
            stdout: true,
            stderr: true,
            tail: tail.to_string(),
            ..Default::default()
        };

        let mut stream = self.docker.logs(container_id, Some(options));
        let mut out = String::new();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| Self::op_err("container_logs", e))?;
            out.push_str(&String::from_utf8_lossy(&chunk.into_bytes()));
        }
        Ok(out)
    }

    async fn list_networks(&self) -> Result<Vec<String>> {
        let networks = self
            .docker
            .list_networks(None::<ListNetworksOptions<String>>)
            .await
            .map_err(|e| Self::op_err("list_networks", e))?;
        Ok(networks.into_iter().filter_map(|n| n.name).collect())
    }

    #[instrument(skip(self, plan), fields(host_id = %self.host_id, network = %plan.name))]
    async fn create_network(&self, plan: &NetworkPlan) -> Result<()> {
        let ipam = plan.subnet.as_ref().map(|subnet| Ipam {
            config: Some(vec![IpamConfig { subnet: Some(subnet.clone()), ..Default::default() }]),
            ..Default::default()
        });

        let options = CreateNetworkOptions {
            name: plan.name.clone(),
            driver: plan.driver.clone(),
            ipam: ipam.unwrap_or_default(),
            ..Default::default()
        };

        self.docker
            .create_network(options)
            .await
            .map_err(|e| Self::op_err("create_network", e))?;
        Ok(())
    }

    async fn connect_network(
        &self,
        container_id: &str,
        attachment: &NetworkAttachment,
    ) -> Result<()> {
        let options = ConnectNetworkOptions {
            container: container_id.to_string(),
            endpoint_config: Self::endpoint(attachment),
        };
        self.docker
            .connect_network(&attachment.network, options)
            .await
            .map_err(|e| Self::op_err("connect_network", e))?;
        Ok(())
    }

    async fn list_volumes(&self) -> Result<Vec<String>> {
        let response = self
            .docker
            .list_volumes(None::<ListVolumesOptions<String>>)
            .await
            .map_err(|e| Self::op_err("list_volumes", e))?;
        Ok(response.volumes.unwrap_or_default().into_iter().map(|v| v.name).collect())
    }

    #[instrument(skip(self, plan), fields(host_id = %self.host_id, volume = %plan.name))]
    async fn create_volume(&self, plan: &VolumePlan) -> Result<()> {
        let options = CreateVolumeOptions {
            name: plan.name.clone(),
            driver: plan.driver.clone(),
            driver_opts: plan.driver_opts.clone(),
            ..Default::default()
        };
        self.docker
            .create_volume(options)
            .await
            .map_err(|e| Self::op_err("create_volume", e))?;
        Ok(())
    }

    async fn ports_in_use(&self) -> Result<Vec<u16>> {
        let containers = self
            .docker
            .list_containers(None::<ListContainersOptions<String>>)
            .await
            .map_err(|e| Self::op_err("ports_in_use", e))?;

        let mut ports: Vec<u16> = containers
            .into_iter()
            .flat_map(|c| c.ports.unwrap_or_default())
            .filter_map(|p| p.public_port.map(|port| port as u16))
            .collect();
        ports.sort_unstable();
        ports.dedup();
        Ok(ports)
    }

    #[instrument(skip(self), fields(host_id = %self.host_id))]
    async fn wait_healthy(
        &self,
        container_id: &str,
        has_healthcheck: bool,
        timeout: Duration,
    ) -> Result<bool> {
        if !has_healthcheck {
            // No declared check: a short stability window has to do.
            tokio::time::sleep(STABILITY_DELAY).await;
            return Ok(self.container_status(container_id).await? == ContainerStatus::Running);
        }

        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let inspect = self
                .docker
                .inspect_container(container_id, None::<InspectContainerOptions>)
                .await
                .map_err(|e| Self::op_err("wait_healthy", e))?;

            let state = inspect.state.unwrap_or_default();
            if let Some(health) = state.health.and_then(|h| h.status) {
                match health {
                    HealthStatusEnum::HEALTHY => return Ok(true),
                    HealthStatusEnum::UNHEALTHY => {
                        warn!(container_id = %container_id, "Container reported unhealthy");
                        return Ok(false);
                    }
                    _ => {}
                }
            }

            if tokio::time::Instant::now() >= deadline {
                return Ok(false);
            }
            tokio::time::sleep(HEALTH_POLL_INTERVAL).await;
        }
    }

    fn name(&self) -> &str {
        "docker"
    }
}
