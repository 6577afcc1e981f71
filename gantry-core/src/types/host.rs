//! Target host types.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// A container-engine host Gantry deploys onto.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Host {
    /// Host identifier (stable, user-assigned).
    pub id: String,

    /// Display name.
    pub name: String,

    /// How the engine on this host is reached.
    pub connection: HostConnection,
}

/// Connection method for a host's container engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum HostConnection {
    /// Engine reachable through the local unix socket.
    Local {
        /// Override for the default socket path.
        #[serde(default)]
        socket_path: Option<PathBuf>,
    },

    /// Engine reachable over TCP, optionally with mutual TLS.
    Tcp {
        /// Address in `host:port` form.
        addr: String,
        #[serde(default)]
        tls: Option<TlsPaths>,
    },

    /// Engine reachable only through a remote agent process.
    Agent {
        /// Identifier of the agent owning the host.
        agent_id: String,
    },
}

/// PEM file locations for a TLS engine connection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TlsPaths {
    pub ca: PathBuf,
    pub cert: PathBuf,
    pub key: PathBuf,
}

impl Host {
    /// True when operations must be routed through an agent.
    pub fn is_agent_routed(&self) -> bool {
        matches!(self.connection, HostConnection::Agent { .. })
    }
}
