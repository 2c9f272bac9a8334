//! Deployment target hosts

use super::user::ClusterUser;
use crate::remote::{Executor, SshExecutor};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// A deployment target host
///
/// Stateless beyond host identity; executors are derived per (node, user)
/// invocation and torn down with it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterNode {
    /// Hostname or IP address
    pub host: String,
    /// SSH port
    #[serde(default = "default_ssh_port")]
    pub port: u16,
}

fn default_ssh_port() -> u16 {
    22
}

impl ClusterNode {
    pub fn new(host: &str) -> Self {
        Self {
            host: host.to_string(),
            port: 22,
        }
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Build an SSH executor for this node authenticated as the given user
    pub fn executor(&self, user: &ClusterUser) -> Arc<dyn Executor> {
        let mut exec = SshExecutor::new(&self.host, &user.username).with_port(self.port);
        if let Some(ref key) = user.private_key_path {
            exec = exec.with_identity_file(key.clone());
        }
        Arc::new(exec)
    }
}
