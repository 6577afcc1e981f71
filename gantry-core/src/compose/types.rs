//! Compose file format types.
//!
//! Types matching the compose specification subset Gantry deploys. Fields the
//! engine cannot honor are parsed anyway so validation can reject them with a
//! useful message instead of silently dropping them.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

/// Root structure of a compose file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComposeFile {
    /// Compose file format version (legacy; informational).
    #[serde(default)]
    pub version: String,

    /// Services to be created.
    pub services: HashMap<String, Service>,

    /// Named volumes.
    #[serde(default)]
    pub volumes: HashMap<String, Option<VolumeDefinition>>,

    /// Networks.
    #[serde(default)]
    pub networks: HashMap<String, Option<NetworkDefinition>>,
}

/// A service in a compose file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Service {
    /// Container image to use. Required; enforced by the validator rather
    /// than serde so the build-directive rejection can give guidance.
    #[serde(default)]
    pub image: Option<String>,

    /// Build directive. Parsed only so it can be rejected explicitly.
    #[serde(default)]
    pub build: Option<serde_yaml::Value>,

    #[serde(default)]
    pub container_name: Option<String>,

    /// Port mappings (e.g. ["8080:80", "127.0.0.1:443:443/tcp"]).
    #[serde(default)]
    pub ports: Vec<String>,

    #[serde(default)]
    pub environment: Environment,

    /// Volume mounts (e.g. ["./data:/data:ro", "db:/var/lib/db"]).
    #[serde(default)]
    pub volumes: Vec<String>,

    #[serde(default)]
    pub networks: Networks,

    #[serde(default)]
    pub network_mode: Option<String>,

    #[serde(default)]
    pub depends_on: DependsOn,

    #[serde(default)]
    pub command: Option<StringOrList>,

    #[serde(default)]
    pub entrypoint: Option<StringOrList>,

    #[serde(default)]
    pub restart: Option<String>,

    /// Simple-syntax memory limit (e.g. "512m").
    #[serde(default)]
    pub mem_limit: Option<String>,

    /// Simple-syntax CPU limit (e.g. 0.5 or "2").
    #[serde(default)]
    pub cpus: Option<CpuLimit>,

    /// Nested-syntax resource limits (deploy.resources.limits).
    #[serde(default)]
    pub deploy: Option<DeployConfig>,

    #[serde(default)]
    pub healthcheck: Option<Healthcheck>,

    #[serde(default)]
    pub devices: Vec<String>,

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

    #[serde(default)]
    pub profiles: Vec<String>,
}

/// Environment variables can be specified as a map or list.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Environment {
    /// Environment as key-value map.
    Map(HashMap<String, String>),
    /// Environment as list of KEY=value strings.
    List(Vec<String>),
}

impl Default for Environment {
    fn default() -> Self {
        Environment::Map(HashMap::new())
    }
}

impl Environment {
    /// Convert environment to a HashMap regardless of input format.
    pub fn to_map(&self) -> HashMap<String, String> {
        match self {
            Environment::Map(map) => map.clone(),
            Environment::List(list) => list
                .iter()
                .filter_map(|s| {
                    let parts: Vec<&str> = s.splitn(2, '=').collect();
                    if parts.len() == 2 {
                        Some((parts[0].to_string(), parts[1].to_string()))
                    } else {
                        None
                    }
                })
                .collect(),
        }
    }
}

/// Command-like values can be a single shell string or an argv list.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum StringOrList {
    Str(String),
    List(Vec<String>),
}

impl StringOrList {
    /// Resolve to argv form; a bare string becomes a shell invocation.
    pub fn to_argv(&self) -> Vec<String> {
        match self {
            StringOrList::Str(s) => {
                vec!["/bin/sh".to_string(), "-c".to_string(), s.clone()]
            }
            StringOrList::List(list) => list.clone(),
        }
    }
}

/// Service network attachment: plain list or map with per-network settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Networks {
    List(Vec<String>),
    Map(HashMap<String, Option<ServiceNetworkConfig>>),
}

impl Default for Networks {
    fn default() -> Self {
        Networks::List(Vec::new())
    }
}

impl Networks {
    pub fn is_empty(&self) -> bool {
        match self {
            Networks::List(l) => l.is_empty(),
            Networks::Map(m) => m.is_empty(),
        }
    }

    /// Flatten to (name, settings) pairs, sorted by name for determinism.
    pub fn entries(&self) -> Vec<(String, ServiceNetworkConfig)> {
        let mut out: Vec<(String, ServiceNetworkConfig)> = match self {
            Networks::List(l) => {
                l.iter().map(|n| (n.clone(), ServiceNetworkConfig::default())).collect()
            }
            Networks::Map(m) => m
                .iter()
                .map(|(n, cfg)| (n.clone(), cfg.clone().unwrap_or_default()))
                .collect(),
        };
        out.sort_by(|a, b| a.0.cmp(&b.0));
        out
    }
}

/// Per-network settings for a service attachment.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ServiceNetworkConfig {
    #[serde(default)]
    pub ipv4_address: Option<String>,

    #[serde(default)]
    pub aliases: Vec<String>,
}

impl ServiceNetworkConfig {
    /// True when the attachment needs more than a creation-time join.
    pub fn needs_explicit_connect(&self) -> bool {
        self.ipv4_address.is_some() || !self.aliases.is_empty()
    }
}

/// Dependencies: plain list or the long map syntax with conditions.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum DependsOn {
    List(Vec<String>),
    Map(HashMap<String, Option<DependsOnSpec>>),
}

impl Default for DependsOn {
    fn default() -> Self {
        DependsOn::List(Vec::new())
    }
}

impl DependsOn {
    /// Names of all declared dependencies.
    pub fn names(&self) -> Vec<String> {
        match self {
            DependsOn::List(l) => l.clone(),
            DependsOn::Map(m) => m.keys().cloned().collect(),
        }
    }
}

/// Long-syntax dependency entry.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DependsOnSpec {
    #[serde(default)]
    pub condition: Option<String>,
}

/// CPU limits appear as a float or a string in the wild.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CpuLimit {
    Num(f64),
    Str(String),
}

impl CpuLimit {
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            CpuLimit::Num(n) => Some(*n),
            CpuLimit::Str(s) => s.trim().parse().ok(),
        }
    }
}

/// Deployment configuration (nested resource syntax).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DeployConfig {
    #[serde(default)]
    pub resources: Option<Resources>,
}

/// Resource configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Resources {
    /// Resource limits (maximum).
    #[serde(default)]
    pub limits: Option<ResourceLimit>,

    /// Resource reservations (minimum).
    #[serde(default)]
    pub reservations: Option<ResourceLimit>,
}

/// Resource limits for CPU and memory.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ResourceLimit {
    /// CPU limit (e.g. "2.0" for 2 cores).
    #[serde(default)]
    pub cpus: Option<String>,

    /// Memory limit (e.g. "1024M", "1G").
    #[serde(default)]
    pub memory: Option<String>,
}

/// Health check declaration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Healthcheck {
    #[serde(default)]
    pub test: Option<StringOrList>,

    #[serde(default)]
    pub interval: Option<String>,

    #[serde(default)]
    pub timeout: Option<String>,

    #[serde(default)]
    pub retries: Option<u32>,

    #[serde(default)]
    pub start_period: Option<String>,

    #[serde(default)]
    pub disable: bool,
}

/// Volume definition.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VolumeDefinition {
    #[serde(default)]
    pub driver: Option<String>,

    #[serde(default)]
    pub driver_opts: HashMap<String, String>,

    #[serde(default)]
    pub external: bool,
}

/// Network definition.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NetworkDefinition {
    #[serde(default)]
    pub driver: Option<String>,

    #[serde(default)]
    pub external: bool,

    #[serde(default)]
    pub ipam: Option<IpamConfig>,
}

/// IP address management configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IpamConfig {
    #[serde(default)]
    pub driver: Option<String>,

    #[serde(default)]
    pub config: Vec<HashMap<String, String>>,
}

impl IpamConfig {
    /// First declared subnet, if any.
    pub fn subnet(&self) -> Option<String> {
        self.config.iter().find_map(|entry| entry.get("subnet").cloned())
    }
}

/// Parse a compose duration string (e.g. "30s", "1m30s", "500ms").
pub fn parse_duration(s: &str) -> Option<Duration> {
    let s = s.trim();
    if s.is_empty() {
        return None;
    }

    let mut total = Duration::ZERO;
    let mut number = String::new();
    let mut chars = s.chars().peekable();

    while let Some(c) = chars.next() {
        if c.is_ascii_digit() || c == '.' {
            number.push(c);
            continue;
        }

        let mut unit = c.to_string();
        if c == 'm' && chars.peek() == Some(&'s') {
            chars.next();
            unit.push('s');
        }

        let value: f64 = number.parse().ok()?;
        number.clear();

        let part = match unit.as_str() {
            "h" => Duration::from_secs_f64(value * 3600.0),
            "m" => Duration::from_secs_f64(value * 60.0),
            "s" => Duration::from_secs_f64(value),
            "ms" => Duration::from_secs_f64(value / 1000.0),
            _ => return None,
        };
        total += part;
    }

    if !number.is_empty() {
        // Bare number means seconds
        let value: f64 = number.parse().ok()?;
        total += Duration::from_secs_f64(value);
    }

    Some(total)
}

/// Parse a memory string (e.g. "1g", "512M", "1073741824") to bytes.
pub fn parse_memory_bytes(s: &str) -> Option<i64> {
    let s = s.trim().to_lowercase();
    if s.is_empty() {
        return None;
    }

    let (digits, multiplier) = if let Some(stripped) = s.strip_suffix("gb").or(s.strip_suffix('g'))
    {
        (stripped, 1024 * 1024 * 1024)
    } else if let Some(stripped) = s.strip_suffix("mb").or(s.strip_suffix('m')) {
        (stripped, 1024 * 1024)
    } else if let Some(stripped) = s.strip_suffix("kb").or(s.strip_suffix('k')) {
        (stripped, 1024)
    } else if let Some(stripped) = s.strip_suffix('b') {
        (stripped, 1)
    } else {
        (s.as_str(), 1)
    };

    digits.trim().parse::<i64>().ok().map(|n| n * multiplier)
}
