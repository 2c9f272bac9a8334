//! Generic cluster model: services, dependency graph, nodes, users
//!
//! This module is orchestrator-agnostic. The Docker specialization that
//! compiles the graph into a Compose/Swarm document lives in `crate::docker`.

pub mod cluster;
pub mod node;
pub mod service;
pub mod user;

pub use cluster::{Cluster, ClusterBase, Dependency};
pub use node::ClusterNode;
pub use service::{
    Capabilities, ConfigValue, PortMode, ProxyRole, Replicas, ResourceRange, RestartPolicy,
    SchedulingMode, ServiceBuilder, ServicePort, ServiceSpec, ServiceVolume, VolumeKind, WebRole,
};
pub use user::ClusterUser;
