//! Armada - declarative fleet topology compiler and rollout orchestrator
//!
//! Armada models a cluster of services as a dependency graph, compiles the
//! graph into Docker Compose or Swarm deployment documents, and rolls the
//! result out over SSH, manager first. It provides:
//!
//! - Dependency-graph resolution with cluster boundaries
//! - Compose/Swarm document compilation (networks, volumes, deploy blocks)
//! - Manager-first multi-node rollout (setup, deploy, run)
//! - Image building and registry authentication
//! - First-time node provisioning and hardening

pub mod compose;
pub mod config;
pub mod docker;
pub mod endpoint;
pub mod error;
pub mod fleet;
pub mod image;
pub mod provision;
pub mod remote;
pub mod services;

pub use error::{ArmadaError, Result};
