//! Docker specialization: topology compiler and rollout mechanics
//!
//! Turns the generic dependency graph into a Compose/Swarm document and
//! drives the manager-first rollout over remote nodes.

pub mod cluster;
pub mod node;
pub mod service;

pub use cluster::{DockerCluster, RolloutOptions, RolloutReport};
pub use node::DockerNode;
