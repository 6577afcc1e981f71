//! Compose text validation pipeline.
//!
//! Validation is all-or-nothing: safety scan, variable substitution,
//! structural checks, port checks, and dependency-graph checks all run before
//! any host is touched, and the first failure aborts the whole thing. The
//! pipeline has no ambient state, so identical (text, variables) inputs
//! always produce identical results.

use super::graph::DependencyGraph;
use super::types::ComposeFile;
use crate::error::{GantryError, Result};
use crate::types::{PortBinding, Protocol};
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashMap;
use tracing::instrument;

/// Markers that can trigger code execution in permissive YAML loaders.
/// The scan runs on raw text, before any structural parsing.
const UNSAFE_MARKERS: &[&str] = &["!!python/", "!!ruby/", "!!java", "!!perl/"];

/// `${NAME}` / `${NAME:-default}` references.
static VARIABLE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)(:-([^}]*))?\}").unwrap());

/// A compose file that passed every validation stage.
#[derive(Debug, Clone)]
pub struct ValidatedStack {
    pub compose: ComposeFile,

    /// Deterministic startup order (valid topological order).
    pub start_order: Vec<String>,

    /// Teardown order: the exact reverse of `start_order`.
    pub stop_order: Vec<String>,

    /// Dependency waves; services within a wave may be created concurrently.
    pub waves: Vec<Vec<String>>,
}

/// Validator for compose stack text.
pub struct StackValidator;

impl StackValidator {
    /// Run the full validation pipeline.
    #[instrument(skip(text, variables))]
    pub fn validate(text: &str, variables: &HashMap<String, String>) -> Result<ValidatedStack> {
        Self::safety_scan(text)?;

        let substituted = Self::substitute_variables(text, variables)?;

        let compose: ComposeFile = serde_yaml::from_str(&substituted)
            .map_err(|e| GantryError::ComposeParse { reason: e.to_string() })?;

        Self::validate_services(&compose)?;
        Self::validate_ports(&compose)?;

        let graph = Self::build_graph(&compose)?;
        if let Some(path) = graph.find_cycle() {
            return Err(GantryError::DependencyCycle { path });
        }
        let start_order = graph.start_order()?;
        let mut stop_order = start_order.clone();
        stop_order.reverse();
        let waves = graph.waves()?;

        Ok(ValidatedStack { compose, start_order, stop_order, waves })
    }

    /// Reject text containing markers capable of triggering code execution
    /// during parsing.
    fn safety_scan(text: &str) -> Result<()> {
        for marker in UNSAFE_MARKERS {
            if text.contains(marker) {
                return Err(GantryError::UnsafeCompose { marker: (*marker).to_string() });
            }
        }
        Ok(())
    }

    /// Replace `${NAME}` / `${NAME:-default}` references.
    ///
    /// A reference with neither a value nor a default fails naming the
    /// missing variable.
    pub fn substitute_variables(
        text: &str,
        variables: &HashMap<String, String>,
    ) -> Result<String> {
        let mut out = String::with_capacity(text.len());
        let mut last = 0;

        for caps in VARIABLE_RE.captures_iter(text) {
            let whole = caps.get(0).unwrap();
            let name = caps.get(1).unwrap().as_str();
            let default = caps.get(3).map(|m| m.as_str());

            out.push_str(&text[last..whole.start()]);

            match variables.get(name) {
                Some(value) => out.push_str(value),
                None => match default {
                    Some(d) => out.push_str(d),
                    None => {
                        return Err(GantryError::MissingVariable { name: name.to_string() })
                    }
                },
            }

            last = whole.end();
        }

        out.push_str(&text[last..]);
        Ok(out)
    }

    /// Structural checks: non-empty service map, image required, build
    /// rejected with guidance.
    fn validate_services(compose: &ComposeFile) -> Result<()> {
        if compose.services.is_empty() {
            return Err(GantryError::ComposeParse { reason: "No services defined".to_string() });
        }

        for (name, service) in &compose.services {
            if service.build.is_some() {
                return Err(GantryError::BuildNotSupported { service: name.clone() });
            }
            if service.image.as_deref().unwrap_or("").is_empty() {
                return Err(GantryError::ComposeParse {
                    reason: format!("Service '{}' missing image", name),
                });
            }
            if service.network_mode.is_some() && !service.networks.is_empty() {
                return Err(GantryError::ConflictingNetworkConfig { service: name.clone() });
            }
        }

        Ok(())
    }

    /// Every declared port mapping must parse.
    fn validate_ports(compose: &ComposeFile) -> Result<()> {
        for (name, service) in &compose.services {
            for entry in &service.ports {
                parse_port_mapping(entry).map_err(|reason| GantryError::InvalidPort {
                    service: name.clone(),
                    port: entry.clone(),
                    reason,
                })?;
            }
        }
        Ok(())
    }

    fn build_graph(compose: &ComposeFile) -> Result<DependencyGraph> {
        let mut declarations: Vec<(String, Vec<String>)> = compose
            .services
            .iter()
            .map(|(name, service)| (name.clone(), service.depends_on.names()))
            .collect();
        declarations.sort_by(|a, b| a.0.cmp(&b.0));
        DependencyGraph::build(&declarations)
    }
}

/// Parse one compose port mapping: `[host_ip:]host_port:container_port[/protocol]`.
pub fn parse_port_mapping(entry: &str) -> std::result::Result<PortBinding, String> {
    let entry = entry.trim();
    if entry.is_empty() {
        return Err("empty port mapping".to_string());
    }

    let (spec, protocol) = match entry.split_once('/') {
        Some((spec, proto)) => {
            let protocol = match proto {
                "tcp" => Protocol::Tcp,
                "udp" => Protocol::Udp,
                other => return Err(format!("unknown protocol '{}'", other)),
            };
            (spec, protocol)
        }
        None => (entry, Protocol::Tcp),
    };

    let parts: Vec<&str> = spec.split(':').collect();
    let (host_ip, host_part, container_part) = match parts.as_slice() {
        [host, container] => (None, *host, *container),
        [ip, host, container] => (Some((*ip).to_string()), *host, *container),
        _ => {
            return Err(
                "expected [host_ip:]host_port:container_port[/protocol]".to_string()
            )
        }
    };

    let host_port = parse_port_number(host_part)?;
    let container_port = parse_port_number(container_part)?;

    Ok(PortBinding { host_ip, host_port, container_port, protocol })
}

fn parse_port_number(s: &str) -> std::result::Result<u16, String> {
    let port: u32 =
        s.parse().map_err(|_| format!("'{}' is not a valid port number", s))?;
    if port == 0 || port > 65535 {
        return Err(format!("port {} out of range 1-65535", port));
    }
    Ok(port as u16)
}
