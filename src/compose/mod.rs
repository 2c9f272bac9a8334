//! Compose/Swarm document wire format
//!
//! The structured document the topology compiler emits, covering the subset
//! of the compose schema the compiler produces.

pub mod document;

pub use document::{ComposeDocument, DeployTarget, ServiceConfig};
