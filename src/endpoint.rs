//! Named (port, protocol) endpoint primitives
//!
//! Endpoints describe firewall openings and service exposure without tying
//! the description to a particular service. They are pure data.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Transport protocol for an endpoint
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    #[default]
    Tcp,
    Udp,
}

impl Protocol {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Tcp => "tcp",
            Self::Udp => "udp",
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A named (port, protocol) pair
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Endpoint {
    /// Human-readable name (e.g. "https")
    pub name: String,
    /// Port number
    pub port: u16,
    /// Transport protocol
    #[serde(default)]
    pub protocol: Protocol,
}

impl Endpoint {
    pub fn new(name: &str, port: u16, protocol: Protocol) -> Self {
        Self {
            name: name.to_string(),
            port,
            protocol,
        }
    }

    pub fn tcp(name: &str, port: u16) -> Self {
        Self::new(name, port, Protocol::Tcp)
    }

    pub fn udp(name: &str, port: u16) -> Self {
        Self::new(name, port, Protocol::Udp)
    }

    /// Firewall rule form, e.g. "443/tcp"
    pub fn rule(&self) -> String {
        format!("{}/{}", self.port, self.protocol)
    }
}

/// Well-known endpoints used by node provisioning and the default services
pub mod well_known {
    use super::{Endpoint, Protocol};

    pub fn ssh() -> Endpoint {
        Endpoint::tcp("ssh", 22)
    }

    pub fn http() -> Endpoint {
        Endpoint::tcp("http", 80)
    }

    pub fn https() -> Endpoint {
        Endpoint::tcp("https", 443)
    }

    /// Swarm cluster management traffic
    pub fn swarm_management() -> Endpoint {
        Endpoint::tcp("swarm-management", 2377)
    }

    /// Swarm node-to-node communication
    pub fn swarm_nodes() -> Vec<Endpoint> {
        vec![
            Endpoint::tcp("swarm-nodes-tcp", 7946),
            Endpoint::udp("swarm-nodes-udp", 7946),
        ]
    }

    /// Swarm overlay network traffic (VXLAN)
    pub fn swarm_overlay() -> Endpoint {
        Endpoint::new("swarm-overlay", 4789, Protocol::Udp)
    }
}
