//! Image build and registry collaborators
//!
//! The topology compiler never produces images itself; it drives these two
//! contracts during the build phase of a rollout.

pub mod builder;
pub mod registry;

pub use builder::{BuildOptions, ImageBuilder};
pub use registry::{Registry, RegistryCredentials};
