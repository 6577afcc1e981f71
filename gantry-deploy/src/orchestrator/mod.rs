//! Stack orchestration.
//!
//! Turns a validated compose stack into an ordered operation plan: resource
//! steps (networks, named volumes) first, then per-service container plans
//! grouped into dependency waves. The inverse plan drives teardown and
//! rollback.

pub mod plan;

pub use plan::{overall_progress, DeployPlan, ServiceStage, ServiceStep, TeardownPlan};

use gantry_core::compose::{
    parse_duration, parse_memory_bytes, parse_port_mapping, Healthcheck, Service, StringOrList,
    ValidatedStack,
};
use gantry_core::error::{GantryError, Result};
use gantry_core::types::{
    BindMount, ContainerPlan, DeviceMapping, HealthcheckSpec, NamedVolumeMount,
    NetworkAttachment, NetworkPlan, RestartPolicy, VolumePlan,
};
use std::collections::{HashMap, HashSet};
use std::time::Duration;
use tracing::{debug, instrument, warn};

/// Default health check cadence when the compose file leaves it out.
const DEFAULT_HEALTH_INTERVAL: Duration = Duration::from_secs(30);
const DEFAULT_HEALTH_TIMEOUT: Duration = Duration::from_secs(30);
const DEFAULT_HEALTH_RETRIES: u32 = 3;

/// Builds deployment plans from validated stacks.
pub struct StackOrchestrator;

impl StackOrchestrator {
    /// Build the forward plan for a stack.
    #[instrument(skip(stack), fields(project = %project))]
    pub fn plan(stack: &ValidatedStack, project: &str) -> Result<DeployPlan> {
        let networks = Self::plan_networks(stack, project);
        let volumes = Self::plan_volumes(stack, project)?;

        let mut waves = Vec::with_capacity(stack.waves.len());
        for wave in &stack.waves {
            let mut steps = Vec::with_capacity(wave.len());
            for service_name in wave {
                let service = stack.compose.services.get(service_name).ok_or_else(|| {
                    GantryError::Internal(format!(
                        "Validated stack lost service '{}'",
                        service_name
                    ))
                })?;
                steps.push(Self::plan_service(stack, project, service_name, service)?);
            }
            waves.push(steps);
        }

        debug!(
            networks = networks.len(),
            volumes = volumes.len(),
            waves = waves.len(),
            "Deployment plan built"
        );

        Ok(DeployPlan {
            project: project.to_string(),
            networks,
            volumes,
            waves,
            start_order: stack.start_order.clone(),
            stop_order: stack.stop_order.clone(),
        })
    }

    /// Engine-level name of a stack network.
    fn network_name(project: &str, name: &str, external: bool) -> String {
        if external {
            name.to_string()
        } else {
            format!("{}_{}", project, name)
        }
    }

    /// Engine-level name of a stack volume.
    fn volume_name(project: &str, name: &str, external: bool) -> String {
        if external {
            name.to_string()
        } else {
            format!("{}_{}", project, name)
        }
    }

    fn default_network_name(project: &str) -> String {
        format!("{}_default", project)
    }

    fn plan_networks(stack: &ValidatedStack, project: &str) -> Vec<NetworkPlan> {
        let mut plans = Vec::new();

        let mut names: Vec<&String> = stack.compose.networks.keys().collect();
        names.sort();
        for name in names {
            let definition =
                stack.compose.networks.get(name).and_then(|d| d.clone()).unwrap_or_default();
            plans.push(NetworkPlan {
                name: Self::network_name(project, name, definition.external),
                driver: definition.driver.unwrap_or_else(|| "bridge".to_string()),
                subnet: definition.ipam.as_ref().and_then(|ipam| ipam.subnet()),
                external: definition.external,
            });
        }

        // Services with no attachment land on the stack's default network.
        let needs_default = stack.compose.services.values().any(|s| {
            s.network_mode.is_none() && s.networks.is_empty()
        });
        if needs_default {
            plans.push(NetworkPlan {
                name: Self::default_network_name(project),
                driver: "bridge".to_string(),
                subnet: None,
                external: false,
            });
        }

        plans
    }

    fn plan_volumes(stack: &ValidatedStack, project: &str) -> Result<Vec<VolumePlan>> {
        // Named volumes referenced by services; path-like sources are binds.
        let mut referenced: HashSet<String> = HashSet::new();
        for service in stack.compose.services.values() {
            for entry in &service.volumes {
                if let VolumeSpec::Named { volume, .. } = parse_volume_spec(entry) {
                    referenced.insert(volume);
                }
            }
        }

        let mut plans = Vec::new();
        let mut names: Vec<&String> = stack.compose.volumes.keys().collect();
        names.sort();
        for name in names {
            let definition =
                stack.compose.volumes.get(name).and_then(|d| d.clone()).unwrap_or_default();
            plans.push(VolumePlan {
                name: Self::volume_name(project, name, definition.external),
                driver: definition.driver.unwrap_or_else(|| "local".to_string()),
                driver_opts: definition.driver_opts,
                external: definition.external,
            });
            referenced.remove(name);
        }

        // Volumes used but never declared get stack-scoped defaults.
        let mut undeclared: Vec<String> = referenced.into_iter().collect();
        undeclared.sort();
        for name in undeclared {
            plans.push(VolumePlan {
                name: Self::volume_name(project, &name, false),
                driver: "local".to_string(),
                driver_opts: HashMap::new(),
                external: false,
            });
        }

        Ok(plans)
    }

    fn plan_service(
        stack: &ValidatedStack,
        project: &str,
        service_name: &str,
        service: &Service,
    ) -> Result<ServiceStep> {
        let container_name = service
            .container_name
            .clone()
            .unwrap_or_else(|| format!("{}_{}", project, service_name));

        let image = service.image.clone().unwrap_or_default();

        let mut env: Vec<String> = service
            .environment
            .to_map()
            .into_iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect();
        env.sort();

        let mut ports = Vec::with_capacity(service.ports.len());
        for entry in &service.ports {
            let binding = parse_port_mapping(entry).map_err(|reason| {
                GantryError::InvalidPort {
                    service: service_name.to_string(),
                    port: entry.clone(),
                    reason,
                }
            })?;
            ports.push(binding);
        }

        let mut binds = Vec::new();
        let mut volumes = Vec::new();
        for entry in &service.volumes {
            match parse_volume_spec(entry) {
                VolumeSpec::Bind { source, target, read_only } => {
                    binds.push(BindMount { source, target, read_only });
                }
                VolumeSpec::Named { volume, target, read_only } => {
                    let external = stack
                        .compose
                        .volumes
                        .get(&volume)
                        .and_then(|d| d.as_ref())
                        .map(|d| d.external)
                        .unwrap_or(false);
                    volumes.push(NamedVolumeMount {
                        volume: Self::volume_name(project, &volume, external),
                        target,
                        read_only,
                    });
                }
                VolumeSpec::Anonymous { target } => {
                    // The engine provisions anonymous volumes on its own.
                    warn!(
                        service = %service_name,
                        target = %target,
                        "Anonymous volume left to the engine"
                    );
                }
            }
        }

        let (network, connects, network_mode) =
            Self::plan_service_networks(stack, project, service_name, service)?;

        let memory_bytes = service
            .mem_limit
            .as_deref()
            .and_then(parse_memory_bytes)
            .or_else(|| Self::nested_limit(service, |l| l.memory.as_deref(), parse_memory_bytes));

        let nano_cpus = service
            .cpus
            .as_ref()
            .and_then(|c| c.as_f64())
            .or_else(|| {
                Self::nested_limit(service, |l| l.cpus.as_deref(), |s| s.trim().parse().ok())
            })
            .map(|cpus| (cpus * 1e9) as i64);

        let healthcheck = service.healthcheck.as_ref().and_then(Self::plan_healthcheck);

        let plan = ContainerPlan {
            name: container_name,
            image,
            env,
            command: service.command.as_ref().map(StringOrList::to_argv),
            entrypoint: service.entrypoint.as_ref().map(StringOrList::to_argv),
            ports,
            binds,
            volumes,
            network,
            extra_networks: connects.clone(),
            network_mode,
            restart: service
                .restart
                .as_deref()
                .map(RestartPolicy::parse)
                .unwrap_or_default(),
            memory_bytes,
            nano_cpus,
            healthcheck,
            devices: service.devices.iter().map(|d| DeviceMapping::parse(d)).collect(),
            extra_hosts: service.extra_hosts.clone(),
            cap_add: service.cap_add.clone(),
            cap_drop: service.cap_drop.clone(),
            privileged: service.privileged,
            user: service.user.clone(),
            working_dir: service.working_dir.clone(),
            labels: service.labels.clone(),
        };

        Ok(ServiceStep { service: service_name.to_string(), plan, connects })
    }

    /// Resolve a service's network attachment.
    ///
    /// A single simple network maps to a creation-time join. Multiple
    /// networks, or any needing a static IP or aliases, go through explicit
    /// post-create connect calls because engines only auto-join the network
    /// passed at creation.
    fn plan_service_networks(
        stack: &ValidatedStack,
        project: &str,
        service_name: &str,
        service: &Service,
    ) -> Result<(Option<NetworkAttachment>, Vec<NetworkAttachment>, Option<String>)> {
        if let Some(mode) = &service.network_mode {
            let resolved = Self::resolve_network_mode(stack, project, service_name, mode)?;
            return Ok((None, Vec::new(), Some(resolved)));
        }

        let entries = service.networks.entries();
        if entries.is_empty() {
            let attachment = NetworkAttachment {
                network: Self::default_network_name(project),
                ipv4_address: None,
                aliases: Vec::new(),
            };
            return Ok((Some(attachment), Vec::new(), None));
        }

        let attachments: Vec<NetworkAttachment> = entries
            .into_iter()
            .map(|(name, cfg)| {
                let external = stack
                    .compose
                    .networks
                    .get(&name)
                    .and_then(|d| d.as_ref())
                    .map(|d| d.external)
                    .unwrap_or(false);
                NetworkAttachment {
                    network: Self::network_name(project, &name, external),
                    ipv4_address: cfg.ipv4_address,
                    aliases: cfg.aliases,
                }
            })
            .collect();

        let all_simple = attachments
            .iter()
            .all(|a| a.ipv4_address.is_none() && a.aliases.is_empty());

        if attachments.len() == 1 && all_simple {
            Ok((Some(attachments.into_iter().next().unwrap()), Vec::new(), None))
        } else {
            Ok((None, attachments, None))
        }
    }

    /// Resolve `network_mode: service:<other>` to the other service's actual
    /// container name before it reaches the engine.
    fn resolve_network_mode(
        stack: &ValidatedStack,
        project: &str,
        service_name: &str,
        mode: &str,
    ) -> Result<String> {
        match mode.strip_prefix("service:") {
            Some(other) => {
                let target = stack.compose.services.get(other).ok_or_else(|| {
                    GantryError::MissingDependency {
                        service: service_name.to_string(),
                        dependency: other.to_string(),
                    }
                })?;
                let container = target
                    .container_name
                    .clone()
                    .unwrap_or_else(|| format!("{}_{}", project, other));
                Ok(format!("container:{}", container))
            }
            None => Ok(mode.to_string()),
        }
    }

    fn nested_limit<T>(
        service: &Service,
        pick: impl Fn(&gantry_core::compose::ResourceLimit) -> Option<&str>,
        parse: impl Fn(&str) -> Option<T>,
    ) -> Option<T> {
        service
            .deploy
            .as_ref()
            .and_then(|d| d.resources.as_ref())
            .and_then(|r| r.limits.as_ref())
            .and_then(|l| pick(l))
            .and_then(|s| parse(s))
    }

    fn plan_healthcheck(declared: &Healthcheck) -> Option<HealthcheckSpec> {
        if declared.disable {
            return None;
        }

        let test = match &declared.test {
            Some(StringOrList::Str(cmd)) => {
                vec!["CMD-SHELL".to_string(), cmd.clone()]
            }
            Some(StringOrList::List(list)) => {
                if list.first().map(String::as_str) == Some("NONE") {
                    return None;
                }
                if matches!(list.first().map(String::as_str), Some("CMD") | Some("CMD-SHELL")) {
                    list.clone()
                } else {
                    let mut test = vec!["CMD".to_string()];
                    test.extend(list.iter().cloned());
                    test
                }
            }
            None => return None,
        };

        Some(HealthcheckSpec {
            test,
            interval: declared
                .interval
                .as_deref()
                .and_then(parse_duration)
                .unwrap_or(DEFAULT_HEALTH_INTERVAL),
            timeout: declared
                .timeout
                .as_deref()
                .and_then(parse_duration)
                .unwrap_or(DEFAULT_HEALTH_TIMEOUT),
            retries: declared.retries.unwrap_or(DEFAULT_HEALTH_RETRIES),
            start_period: declared
                .start_period
                .as_deref()
                .and_then(parse_duration)
                .unwrap_or(Duration::ZERO),
        })
    }
}

/// How one `volumes:` entry mounts into the container.
enum VolumeSpec {
    Bind { source: String, target: String, read_only: bool },
    Named { volume: String, target: String, read_only: bool },
    Anonymous { target: String },
}

/// Parse a compose volume string: `source:target[:options]` or bare target.
/// Path-like sources are binds; everything else is a named volume.
fn parse_volume_spec(entry: &str) -> VolumeSpec {
    let parts: Vec<&str> = entry.splitn(3, ':').collect();
    match parts.as_slice() {
        [target] => VolumeSpec::Anonymous { target: (*target).to_string() },
        [source, target] | [source, target, _] => {
            let read_only = parts
                .get(2)
                .map(|opts| opts.split(',').any(|o| o == "ro"))
                .unwrap_or(false);
            if is_path_like(source) {
                VolumeSpec::Bind {
                    source: (*source).to_string(),
                    target: (*target).to_string(),
                    read_only,
                }
            } else {
                VolumeSpec::Named {
                    volume: (*source).to_string(),
                    target: (*target).to_string(),
                    read_only,
                }
            }
        }
        _ => VolumeSpec::Anonymous { target: entry.to_string() },
    }
}

fn is_path_like(source: &str) -> bool {
    source.starts_with('/')
        || source.starts_with("./")
        || source.starts_with("../")
        || source.starts_with('~')
}

#[cfg(test)]
mod tests {
    use super::*;
    use gantry_core::compose::StackValidator;
    use gantry_core::types::Protocol;
    use std::collections::HashMap;

    fn validate(text: &str) -> ValidatedStack {
        StackValidator::validate(text, &HashMap::new()).unwrap()
    }

    #[test]
    fn test_plan_simple_stack() {
        let stack = validate(
            r#"
services:
  web:
    image: nginx:1.27
    ports:
      - "8080:80"
    depends_on: [db]
  db:
    image: postgres:16
    volumes:
      - db-data:/var/lib/postgresql/data
volumes:
  db-data:
"#,
        );

        let plan = StackOrchestrator::plan(&stack, "shop").unwrap();

        assert_eq!(plan.total_services(), 2);
        assert_eq!(plan.waves.len(), 2);
        assert_eq!(plan.waves[0][0].service, "db");
        assert_eq!(plan.waves[1][0].service, "web");

        // Named volume is stack-scoped and scheduled before services
        assert_eq!(plan.volumes.len(), 1);
        assert_eq!(plan.volumes[0].name, "shop_db-data");
        assert!(!plan.volumes[0].external);

        // Both services land on the default network via creation-time join
        let web = plan.service_step("web").unwrap();
        assert_eq!(web.plan.name, "shop_web");
        assert_eq!(web.plan.network.as_ref().unwrap().network, "shop_default");
        assert!(web.connects.is_empty());
        assert_eq!(web.plan.ports[0].host_port, 8080);
        assert_eq!(web.plan.ports[0].protocol, Protocol::Tcp);

        let db = plan.service_step("db").unwrap();
        assert_eq!(db.plan.volumes[0].volume, "shop_db-data");
    }

    #[test]
    fn test_multiple_networks_need_explicit_connects() {
        let stack = validate(
            r#"
services:
  app:
    image: app:1.0
    networks:
      - frontend
      - backend
networks:
  frontend:
  backend:
"#,
        );

        let plan = StackOrchestrator::plan(&stack, "p").unwrap();
        let app = plan.service_step("app").unwrap();

        assert!(app.plan.network.is_none());
        assert_eq!(app.connects.len(), 2);
        let names: Vec<&str> =
            app.connects.iter().map(|c| c.network.as_str()).collect();
        assert_eq!(names, vec!["p_backend", "p_frontend"]);
    }

    #[test]
    fn test_static_ip_forces_explicit_connect() {
        let stack = validate(
            r#"
services:
  app:
    image: app:1.0
    networks:
      backend:
        ipv4_address: 10.5.0.10
networks:
  backend:
    ipam:
      config:
        - subnet: 10.5.0.0/24
"#,
        );

        let plan = StackOrchestrator::plan(&stack, "p").unwrap();
        let app = plan.service_step("app").unwrap();

        assert!(app.plan.network.is_none());
        assert_eq!(app.connects.len(), 1);
        assert_eq!(app.connects[0].ipv4_address.as_deref(), Some("10.5.0.10"));

        let backend = plan.networks.iter().find(|n| n.name == "p_backend").unwrap();
        assert_eq!(backend.subnet.as_deref(), Some("10.5.0.0/24"));
    }

    #[test]
    fn test_external_resources_keep_their_names() {
        let stack = validate(
            r#"
services:
  app:
    image: app:1.0
    networks: [shared]
    volumes:
      - certs:/certs:ro
networks:
  shared:
    external: true
volumes:
  certs:
    external: true
"#,
        );

        let plan = StackOrchestrator::plan(&stack, "p").unwrap();

        let shared = plan.networks.iter().find(|n| n.external).unwrap();
        assert_eq!(shared.name, "shared");
        let certs = plan.volumes.iter().find(|v| v.external).unwrap();
        assert_eq!(certs.name, "certs");

        let app = plan.service_step("app").unwrap();
        assert_eq!(app.plan.network.as_ref().unwrap().network, "shared");
        assert_eq!(app.plan.volumes[0].volume, "certs");
        assert!(app.plan.volumes[0].read_only);
    }

    #[test]
    fn test_network_mode_service_resolves_to_container_name() {
        let stack = validate(
            r#"
services:
  app:
    image: app:1.0
  sidecar:
    image: sidecar:1.0
    network_mode: service:app
"#,
        );

        let plan = StackOrchestrator::plan(&stack, "p").unwrap();
        let sidecar = plan.service_step("sidecar").unwrap();
        assert_eq!(sidecar.plan.network_mode.as_deref(), Some("container:p_app"));
        assert!(sidecar.plan.network.is_none());
    }

    #[test]
    fn test_network_mode_service_unknown_target() {
        let stack = validate(
            r#"
services:
  sidecar:
    image: sidecar:1.0
    network_mode: service:ghost
"#,
        );
        let err = StackOrchestrator::plan(&stack, "p").unwrap_err();
        assert!(matches!(err, GantryError::MissingDependency { .. }));
    }

    #[test]
    fn test_resource_limits_both_syntaxes() {
        let stack = validate(
            r#"
services:
  simple:
    image: a:1
    mem_limit: 512m
    cpus: 0.5
  nested:
    image: b:1
    deploy:
      resources:
        limits:
          cpus: "2"
          memory: 1g
"#,
        );

        let plan = StackOrchestrator::plan(&stack, "p").unwrap();

        let simple = plan.service_step("simple").unwrap();
        assert_eq!(simple.plan.memory_bytes, Some(512 * 1024 * 1024));
        assert_eq!(simple.plan.nano_cpus, Some(500_000_000));

        let nested = plan.service_step("nested").unwrap();
        assert_eq!(nested.plan.memory_bytes, Some(1024 * 1024 * 1024));
        assert_eq!(nested.plan.nano_cpus, Some(2_000_000_000));
    }

    #[test]
    fn test_healthcheck_forms() {
        let stack = validate(
            r#"
services:
  shell:
    image: a:1
    healthcheck:
      test: curl -f http://localhost/
      interval: 5s
      retries: 5
  argv:
    image: b:1
    healthcheck:
      test: ["CMD", "pg_isready"]
  disabled:
    image: c:1
    healthcheck:
      test: ["NONE"]
"#,
        );

        let plan = StackOrchestrator::plan(&stack, "p").unwrap();

        let shell = plan.service_step("shell").unwrap();
        let hc = shell.plan.healthcheck.as_ref().unwrap();
        assert_eq!(hc.test[0], "CMD-SHELL");
        assert_eq!(hc.interval, Duration::from_secs(5));
        assert_eq!(hc.retries, 5);

        let argv = plan.service_step("argv").unwrap();
        assert_eq!(argv.plan.healthcheck.as_ref().unwrap().test[0], "CMD");

        let disabled = plan.service_step("disabled").unwrap();
        assert!(disabled.plan.healthcheck.is_none());
    }

    #[test]
    fn test_bind_mounts_and_devices() {
        let stack = validate(
            r#"
services:
  app:
    image: a:1
    volumes:
      - ./conf:/etc/app:ro
      - /srv/data:/data
    devices:
      - /dev/snd:/dev/snd
    extra_hosts:
      - "db.internal:10.0.0.5"
    cap_add: [NET_ADMIN]
    cap_drop: [ALL]
"#,
        );

        let plan = StackOrchestrator::plan(&stack, "p").unwrap();
        let app = plan.service_step("app").unwrap();

        assert_eq!(app.plan.binds.len(), 2);
        assert!(app.plan.binds[0].read_only);
        assert_eq!(app.plan.devices[0].host_path, "/dev/snd");
        assert_eq!(app.plan.extra_hosts[0], "db.internal:10.0.0.5");
        assert_eq!(app.plan.cap_add, vec!["NET_ADMIN"]);
        assert_eq!(app.plan.cap_drop, vec!["ALL"]);
    }

    #[test]
    fn test_teardown_is_structural_inverse() {
        let stack = validate(
            r#"
services:
  web:
    image: nginx:1.27
    depends_on: [db]
  db:
    image: postgres:16
    volumes:
      - data:/var/lib/postgresql/data
volumes:
  data:
networks:
  shared:
    external: true
"#,
        );

        let plan = StackOrchestrator::plan(&stack, "p").unwrap();
        let teardown = plan.teardown();

        assert_eq!(teardown.container_names, vec!["p_web", "p_db"]);
        // External resources are never torn down
        assert!(teardown.networks.iter().all(|n| !n.external));
        assert!(teardown.volumes.iter().all(|v| !v.external));
        assert!(teardown.volumes.iter().any(|v| v.name == "p_data"));
    }

    #[test]
    fn test_undeclared_named_volume_gets_stack_scope() {
        let stack = validate(
            r#"
services:
  db:
    image: postgres:16
    volumes:
      - pgdata:/var/lib/postgresql/data
"#,
        );

        let plan = StackOrchestrator::plan(&stack, "p").unwrap();
        assert!(plan.volumes.iter().any(|v| v.name == "p_pgdata" && !v.external));
    }
}
