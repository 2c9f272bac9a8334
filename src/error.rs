//! Error types for Armada

use thiserror::Error;

/// Result type for Armada operations
pub type Result<T> = std::result::Result<T, ArmadaError>;

/// Armada error types
#[derive(Error, Debug)]
pub enum ArmadaError {
    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Cluster {0} has no admin user")]
    MissingAdmin(String),

    #[error("Cluster {0} has no manager node")]
    MissingManager(String),

    #[error("Dependency not found: {0}")]
    DependencyNotFound(String),

    #[error("Invalid replica bounds for {service}: min={min} initial={initial} max={max}")]
    ReplicaBounds {
        service: String,
        min: u32,
        initial: u32,
        max: u32,
    },

    #[error("Duplicate port on {service}: {port}")]
    DuplicatePort { service: String, port: String },

    #[error("Invalid port specification: {0}")]
    InvalidPort(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Volume error: {0}")]
    Volume(String),

    #[error("Build error: {0}")]
    Build(String),

    #[error("Registry error: {0}")]
    Registry(String),

    #[error(
        "Remote command failed with exit code {code}: {command}\nstdout: {stdout}\nstderr: {stderr}"
    )]
    RemoteCommand {
        command: String,
        code: i32,
        stdout: String,
        stderr: String,
    },

    #[error("Rollout error: {0}")]
    Rollout(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(String),
}
