//! Compose/Swarm document types

use crate::error::{ArmadaError, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Target orchestrator flavor a document is compiled for
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeployTarget {
    /// Single-node `docker compose`
    Compose,
    /// `docker stack deploy` onto a swarm
    #[default]
    Swarm,
}

/// An assembled deployment document
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ComposeDocument {
    /// Project name; compose only, swarm stacks are unnamed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default)]
    pub services: BTreeMap<String, ServiceConfig>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub networks: BTreeMap<String, NetworkConfig>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub volumes: BTreeMap<String, VolumeConfig>,
}

impl ComposeDocument {
    pub fn to_yaml(&self) -> Result<String> {
        serde_yaml::to_string(self).map_err(|e| ArmadaError::Yaml(e.to_string()))
    }
}

/// Per-service compose fragment
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ServiceConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<Vec<String>>,
    /// Label values flattened to strings
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,
    /// Environment values flattened to strings
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub environment: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub sysctls: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub cap_add: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub cap_drop: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub profiles: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub volumes: Vec<VolumeMountConfig>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub ports: Vec<PortConfig>,
    /// Compose-only restart policy
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub restart: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deploy: Option<DeployConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub depends_on: Option<DependsOnConfig>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub networks: BTreeMap<String, ServiceNetworkConfig>,
    /// Raw passthrough keys
    #[serde(default, flatten)]
    pub extra: BTreeMap<String, serde_yaml::Value>,
}

/// Long-syntax port mapping
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PortConfig {
    pub target: u16,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub published: Option<u16>,
    /// Host IP to bind to
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ip: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub protocol: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mode: Option<String>,
}

/// Long-syntax volume mount
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VolumeMountConfig {
    #[serde(rename = "type")]
    pub kind: String,
    pub source: String,
    pub target: String,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub read_only: bool,
}

/// `depends_on` rendering: condition map for compose, bare list for swarm
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum DependsOnConfig {
    List(Vec<String>),
    Map(BTreeMap<String, DependsOnCondition>),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DependsOnCondition {
    pub condition: String,
    pub restart: bool,
    pub required: bool,
}

impl Default for DependsOnCondition {
    fn default() -> Self {
        Self {
            condition: "service_started".to_string(),
            restart: true,
            required: true,
        }
    }
}

/// Per-service deploy block
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DeployConfig {
    /// Swarm only
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mode: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replicas: Option<u32>,
    /// Swarm only
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub placement: Option<PlacementConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resources: Option<ResourcesConfig>,
    /// Swarm only
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub restart_policy: Option<RestartPolicyConfig>,
}

impl DeployConfig {
    pub fn is_empty(&self) -> bool {
        self.mode.is_none()
            && self.replicas.is_none()
            && self.placement.is_none()
            && self.resources.is_none()
            && self.restart_policy.is_none()
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PlacementConfig {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub constraints: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ResourcesConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limits: Option<ResourceSpecConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reservations: Option<ResourceSpecConfig>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ResourceSpecConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cpus: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memory: Option<String>,
}

impl ResourceSpecConfig {
    pub fn is_empty(&self) -> bool {
        self.cpus.is_none() && self.memory.is_none()
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RestartPolicyConfig {
    pub condition: String,
}

/// Service-side network attachment
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ServiceNetworkConfig {
    /// Compose only; swarm rejects the key
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<i32>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub aliases: Vec<String>,
}

/// Top-level network entry
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NetworkConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub driver: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attachable: Option<bool>,
    /// Physical network name, matching across clusters that share it
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Declared and owned by another cluster
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub external: Option<bool>,
}

/// Top-level volume entry
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VolumeConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_sections_omitted() {
        let doc = ComposeDocument {
            name: Some("test".to_string()),
            ..Default::default()
        };
        let yaml = doc.to_yaml().unwrap();
        assert!(yaml.contains("name: test"));
        assert!(!yaml.contains("networks"));
        assert!(!yaml.contains("volumes"));
    }

    #[test]
    fn test_depends_on_renders_both_shapes() {
        let list = DependsOnConfig::List(vec!["db".to_string()]);
        let yaml = serde_yaml::to_string(&list).unwrap();
        assert_eq!(yaml.trim(), "- db");

        let mut map = BTreeMap::new();
        map.insert("db".to_string(), DependsOnCondition::default());
        let yaml = serde_yaml::to_string(&DependsOnConfig::Map(map)).unwrap();
        assert!(yaml.contains("condition: service_started"));
        assert!(yaml.contains("required: true"));
    }

    #[test]
    fn test_extra_keys_flatten_into_fragment() {
        let mut service = ServiceConfig::default();
        service.extra.insert(
            "stop_grace_period".to_string(),
            serde_yaml::Value::String("30s".to_string()),
        );
        let yaml = serde_yaml::to_string(&service).unwrap();
        assert!(yaml.contains("stop_grace_period: 30s"));
    }
}
