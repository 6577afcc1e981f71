//! Configuration hazard checks.

use super::{Severity, SecurityViolation};
use crate::types::ContainerPlan;
use once_cell::sync::Lazy;
use regex::Regex;
use tracing::debug;

/// Host paths whose bind-mounting grants escalating control over the host.
/// Read-only mounts drop one severity level.
const DANGEROUS_MOUNTS: &[(&str, Severity)] = &[
    ("/var/run/docker.sock", Severity::Critical),
    ("/run/docker.sock", Severity::Critical),
    ("/", Severity::Critical),
    ("/etc", Severity::High),
    ("/proc", Severity::High),
    ("/sys", Severity::High),
    ("/boot", Severity::High),
    ("/dev", Severity::High),
];

/// Linux capabilities with known abuse paths, by hazard level.
const DANGEROUS_CAPABILITIES: &[(&str, Severity)] = &[
    ("ALL", Severity::Critical),
    ("SYS_ADMIN", Severity::Critical),
    ("SYS_MODULE", Severity::Critical),
    ("SYS_RAWIO", Severity::High),
    ("SYS_PTRACE", Severity::High),
    ("NET_ADMIN", Severity::High),
    ("DAC_READ_SEARCH", Severity::High),
    ("NET_RAW", Severity::Medium),
    ("SYS_BOOT", Severity::Medium),
    ("SYS_CHROOT", Severity::Medium),
];

/// Memory limits above this are flagged as excessive.
const EXCESSIVE_MEMORY_BYTES: i64 = 16 * 1024 * 1024 * 1024;

/// Environment names that usually carry credentials.
static SECRET_NAME_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)(password|passwd|secret|token|api_?key|private_key|credentials)").unwrap()
});

/// Audits resolved container configurations against the deployment policy.
pub struct PolicyEngine;

impl PolicyEngine {
    /// Scan one container plan. `ports_in_use` carries host ports already
    /// taken by running containers, when the caller knows them.
    ///
    /// Returns violations ordered most severe first; never errors.
    pub fn audit(plan: &ContainerPlan, ports_in_use: &[u16]) -> Vec<SecurityViolation> {
        let mut violations = Vec::new();

        check_bind_mounts(plan, &mut violations);
        check_privileged(plan, &mut violations);
        check_network_mode(plan, &mut violations);
        check_capabilities(plan, &mut violations);
        check_resource_limits(plan, &mut violations);
        check_port_collisions(plan, ports_in_use, &mut violations);
        check_image_reference(plan, &mut violations);
        check_secret_environment(plan, &mut violations);

        violations.sort_by(|a, b| b.severity.cmp(&a.severity));

        if !violations.is_empty() {
            debug!(
                container = %plan.name,
                count = violations.len(),
                "Security audit found violations"
            );
        }

        violations
    }

    /// Deployment is blocked iff at least one critical violation exists.
    /// Everything below critical is advisory.
    pub fn blocks(violations: &[SecurityViolation]) -> bool {
        violations.iter().any(|v| v.severity == Severity::Critical)
    }
}

/// Free-function form of [`PolicyEngine::audit`].
pub fn audit(plan: &ContainerPlan, ports_in_use: &[u16]) -> Vec<SecurityViolation> {
    PolicyEngine::audit(plan, ports_in_use)
}

/// Free-function form of [`PolicyEngine::blocks`].
pub fn blocks(violations: &[SecurityViolation]) -> bool {
    PolicyEngine::blocks(violations)
}

fn check_bind_mounts(plan: &ContainerPlan, violations: &mut Vec<SecurityViolation>) {
    for bind in &plan.binds {
        let source = bind.source.trim_end_matches('/');
        let source = if source.is_empty() { "/" } else { source };

        let hit = DANGEROUS_MOUNTS.iter().find(|(path, _)| {
            if *path == "/" {
                source == "/"
            } else {
                source == *path || source.starts_with(&format!("{}/", path))
            }
        });

        // Rootless engines place the socket under /run/user/<uid>/
        let rootless_socket =
            source.starts_with("/run/user/") && source.ends_with("/docker.sock");

        let severity = match (hit, rootless_socket) {
            (Some((_, severity)), _) => Some(*severity),
            (None, true) => Some(Severity::Critical),
            (None, false) => None,
        };

        if let Some(severity) = severity {
            let severity = if bind.read_only { severity.step_down() } else { severity };
            let mode = if bind.read_only { "read-only" } else { "read-write" };
            violations.push(SecurityViolation::new(
                severity,
                "volumes",
                format!("Bind mount of sensitive host path '{}' ({})", bind.source, mode),
            ));
        }
    }
}

fn check_privileged(plan: &ContainerPlan, violations: &mut Vec<SecurityViolation>) {
    if plan.privileged {
        violations.push(SecurityViolation::new(
            Severity::Critical,
            "privileged",
            "Privileged mode disables all container isolation",
        ));
    }
}

fn check_network_mode(plan: &ContainerPlan, violations: &mut Vec<SecurityViolation>) {
    if plan.network_mode.as_deref() == Some("host") {
        violations.push(SecurityViolation::new(
            Severity::High,
            "network_mode",
            "Host network mode exposes all host interfaces to the container",
        ));
    }
}

fn check_capabilities(plan: &ContainerPlan, violations: &mut Vec<SecurityViolation>) {
    for cap in &plan.cap_add {
        let normalized = cap.trim().trim_start_matches("CAP_").to_uppercase();
        if let Some((name, severity)) =
            DANGEROUS_CAPABILITIES.iter().find(|(name, _)| *name == normalized)
        {
            violations.push(SecurityViolation::new(
                *severity,
                "cap_add",
                format!("Capability {} grants elevated host access", name),
            ));
        }
    }
}

fn check_resource_limits(plan: &ContainerPlan, violations: &mut Vec<SecurityViolation>) {
    match plan.memory_bytes {
        None => violations.push(SecurityViolation::new(
            Severity::Low,
            "mem_limit",
            "No memory limit set; the container can exhaust host memory",
        )),
        Some(bytes) if bytes > EXCESSIVE_MEMORY_BYTES => {
            violations.push(SecurityViolation::new(
                Severity::Medium,
                "mem_limit",
                format!("Memory limit of {} bytes exceeds 16 GiB", bytes),
            ))
        }
        Some(_) => {}
    }

    if plan.nano_cpus.is_none() {
        violations.push(SecurityViolation::new(
            Severity::Low,
            "cpus",
            "No CPU limit set; the container can saturate host CPUs",
        ));
    }
}

fn check_port_collisions(
    plan: &ContainerPlan,
    ports_in_use: &[u16],
    violations: &mut Vec<SecurityViolation>,
) {
    for binding in &plan.ports {
        if ports_in_use.contains(&binding.host_port) {
            violations.push(SecurityViolation::new(
                Severity::High,
                "ports",
                format!("Host port {} is already in use on this host", binding.host_port),
            ));
        }
    }
}

fn check_image_reference(plan: &ContainerPlan, violations: &mut Vec<SecurityViolation>) {
    let image = plan.image.as_str();
    if image.is_empty() {
        return;
    }

    let (registry, remainder) = split_registry(image);

    let tag = remainder.rsplit_once(':').map(|(_, tag)| tag);
    match tag {
        None | Some("latest") => violations.push(SecurityViolation::new(
            Severity::Low,
            "image",
            format!("Image '{}' is not pinned to a specific tag", image),
        )),
        Some(_) => {}
    }

    if let Some(registry) = registry {
        violations.push(SecurityViolation::new(
            Severity::Info,
            "image",
            format!("Image is pulled from non-default registry '{}'", registry),
        ));
    }
}

/// Split a leading registry component off an image reference.
/// A first path segment counts as a registry when it contains '.' or ':'.
fn split_registry(image: &str) -> (Option<&str>, &str) {
    match image.split_once('/') {
        Some((first, rest)) if first.contains('.') || first.contains(':') => {
            (Some(first), rest)
        }
        _ => (None, image),
    }
}

fn check_secret_environment(plan: &ContainerPlan, violations: &mut Vec<SecurityViolation>) {
    for entry in &plan.env {
        let Some((name, value)) = entry.split_once('=') else { continue };
        if !SECRET_NAME_RE.is_match(name) {
            continue;
        }
        if value.is_empty() || is_secrets_file_reference(name, value) {
            continue;
        }
        violations.push(SecurityViolation::new(
            Severity::Medium,
            "environment",
            format!("Variable '{}' looks like a credential passed as plain text", name),
        ));
    }
}

/// Values pointing at mounted secrets files, and `*_FILE` indirection, are
/// the sanctioned ways to pass credentials.
fn is_secrets_file_reference(name: &str, value: &str) -> bool {
    name.to_uppercase().ends_with("_FILE") || value.starts_with("/run/secrets/")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{BindMount, PortBinding, Protocol};

    fn plan_with_limits() -> ContainerPlan {
        ContainerPlan {
            name: "web".to_string(),
            image: "nginx:1.27".to_string(),
            memory_bytes: Some(512 * 1024 * 1024),
            nano_cpus: Some(1_000_000_000),
            ..Default::default()
        }
    }

    fn count_by_severity(violations: &[SecurityViolation], severity: Severity) -> usize {
        violations.iter().filter(|v| v.severity == severity).count()
    }

    #[test]
    fn test_clean_plan_never_blocks() {
        let violations = PolicyEngine::audit(&plan_with_limits(), &[]);
        assert!(!PolicyEngine::blocks(&violations));
    }

    #[test]
    fn test_privileged_is_exactly_one_critical_and_blocks() {
        let plan = ContainerPlan { privileged: true, ..plan_with_limits() };
        let violations = PolicyEngine::audit(&plan, &[]);
        assert_eq!(count_by_severity(&violations, Severity::Critical), 1);
        assert!(PolicyEngine::blocks(&violations));
    }

    #[test]
    fn test_engine_socket_readwrite_blocks_readonly_does_not() {
        let mut plan = plan_with_limits();
        plan.binds = vec![BindMount {
            source: "/var/run/docker.sock".to_string(),
            target: "/var/run/docker.sock".to_string(),
            read_only: false,
        }];
        let rw = PolicyEngine::audit(&plan, &[]);
        assert_eq!(count_by_severity(&rw, Severity::Critical), 1);
        assert!(PolicyEngine::blocks(&rw));

        plan.binds[0].read_only = true;
        let ro = PolicyEngine::audit(&plan, &[]);
        assert_eq!(count_by_severity(&ro, Severity::Critical), 0);
        assert_eq!(count_by_severity(&ro, Severity::High), 1);
        assert!(!PolicyEngine::blocks(&ro));
    }

    #[test]
    fn test_readonly_relief_is_exactly_one_level() {
        let mut plan = plan_with_limits();
        plan.binds = vec![BindMount {
            source: "/etc".to_string(),
            target: "/host-etc".to_string(),
            read_only: false,
        }];
        let rw = PolicyEngine::audit(&plan, &[]);
        let rw_severity =
            rw.iter().find(|v| v.field == "volumes").map(|v| v.severity).unwrap();

        plan.binds[0].read_only = true;
        let ro = PolicyEngine::audit(&plan, &[]);
        let ro_severity =
            ro.iter().find(|v| v.field == "volumes").map(|v| v.severity).unwrap();

        assert_eq!(ro_severity, rw_severity.step_down());
    }

    #[test]
    fn test_subpath_of_sensitive_directory_flagged() {
        let mut plan = plan_with_limits();
        plan.binds = vec![BindMount {
            source: "/etc/nginx".to_string(),
            target: "/config".to_string(),
            read_only: false,
        }];
        let violations = PolicyEngine::audit(&plan, &[]);
        assert_eq!(count_by_severity(&violations, Severity::High), 1);
    }

    #[test]
    fn test_rootless_socket_is_critical() {
        let mut plan = plan_with_limits();
        plan.binds = vec![BindMount {
            source: "/run/user/1000/docker.sock".to_string(),
            target: "/var/run/docker.sock".to_string(),
            read_only: false,
        }];
        let violations = PolicyEngine::audit(&plan, &[]);
        assert!(PolicyEngine::blocks(&violations));
    }

    #[test]
    fn test_harmless_bind_not_flagged() {
        let mut plan = plan_with_limits();
        plan.binds = vec![BindMount {
            source: "/srv/app/data".to_string(),
            target: "/data".to_string(),
            read_only: false,
        }];
        let violations = PolicyEngine::audit(&plan, &[]);
        assert!(violations.iter().all(|v| v.field != "volumes"));
    }

    #[test]
    fn test_host_network_is_high_not_blocking() {
        let mut plan = plan_with_limits();
        plan.network_mode = Some("host".to_string());
        let violations = PolicyEngine::audit(&plan, &[]);
        assert_eq!(count_by_severity(&violations, Severity::High), 1);
        assert!(!PolicyEngine::blocks(&violations));
    }

    #[test]
    fn test_capability_severity_table() {
        let mut plan = plan_with_limits();
        plan.cap_add = vec!["SYS_ADMIN".to_string(), "CAP_NET_RAW".to_string()];
        let violations = PolicyEngine::audit(&plan, &[]);
        assert_eq!(count_by_severity(&violations, Severity::Critical), 1);
        assert_eq!(count_by_severity(&violations, Severity::Medium), 1);
        assert!(PolicyEngine::blocks(&violations));
    }

    #[test]
    fn test_missing_limits_are_low() {
        let plan = ContainerPlan {
            name: "web".to_string(),
            image: "nginx:1.27".to_string(),
            ..Default::default()
        };
        let violations = PolicyEngine::audit(&plan, &[]);
        assert_eq!(count_by_severity(&violations, Severity::Low), 2);
        assert!(!PolicyEngine::blocks(&violations));
    }

    #[test]
    fn test_excessive_memory_is_medium() {
        let mut plan = plan_with_limits();
        plan.memory_bytes = Some(32 * 1024 * 1024 * 1024);
        let violations = PolicyEngine::audit(&plan, &[]);
        assert_eq!(count_by_severity(&violations, Severity::Medium), 1);
    }

    #[test]
    fn test_port_collision_is_high() {
        let mut plan = plan_with_limits();
        plan.ports = vec![PortBinding {
            host_ip: None,
            host_port: 8080,
            container_port: 80,
            protocol: Protocol::Tcp,
        }];
        let violations = PolicyEngine::audit(&plan, &[8080]);
        assert_eq!(count_by_severity(&violations, Severity::High), 1);

        let violations = PolicyEngine::audit(&plan, &[9090]);
        assert!(violations.iter().all(|v| v.field != "ports"));
    }

    #[test]
    fn test_unpinned_image_is_low_and_foreign_registry_is_info() {
        let mut plan = plan_with_limits();
        plan.image = "nginx".to_string();
        let violations = PolicyEngine::audit(&plan, &[]);
        assert!(violations
            .iter()
            .any(|v| v.field == "image" && v.severity == Severity::Low));

        plan.image = "registry.example.com/team/app:1.4.2".to_string();
        let violations = PolicyEngine::audit(&plan, &[]);
        assert!(violations
            .iter()
            .any(|v| v.field == "image" && v.severity == Severity::Info));
        assert!(violations
            .iter()
            .all(|v| !(v.field == "image" && v.severity == Severity::Low)));
    }

    #[test]
    fn test_secret_environment_detection() {
        let mut plan = plan_with_limits();
        plan.env = vec![
            "DB_PASSWORD=hunter2".to_string(),
            "DB_PASSWORD_FILE=/run/secrets/db_password".to_string(),
            "API_TOKEN=/run/secrets/api_token".to_string(),
            "LOG_LEVEL=debug".to_string(),
        ];
        let violations = PolicyEngine::audit(&plan, &[]);
        let env_hits: Vec<_> =
            violations.iter().filter(|v| v.field == "environment").collect();
        assert_eq!(env_hits.len(), 1);
        assert!(env_hits[0].message.contains("DB_PASSWORD"));
    }

    #[test]
    fn test_violations_ordered_most_severe_first() {
        let mut plan = ContainerPlan {
            name: "web".to_string(),
            image: "nginx".to_string(),
            privileged: true,
            ..Default::default()
        };
        plan.network_mode = Some("host".to_string());
        let violations = PolicyEngine::audit(&plan, &[]);
        for pair in violations.windows(2) {
            assert!(pair[0].severity >= pair[1].severity);
        }
        assert_eq!(violations[0].severity, Severity::Critical);
    }
}
