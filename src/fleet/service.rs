//! Service specifications and their builder
//!
//! A `ServiceSpec` is an immutable snapshot produced by `ServiceBuilder`.
//! All mutation (labels, ports, dependencies) happens at configuration time
//! through the builder; the compiler and rollout only ever read.

use super::cluster::{ClusterBase, Dependency};
use crate::endpoint::Protocol;
use crate::error::{ArmadaError, Result};
use crate::image::{ImageBuilder, Registry};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

/// Scheduling mode for a service
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SchedulingMode {
    /// A fixed number of replicas
    #[default]
    Replicated,
    /// One task per node
    Global,
}

impl SchedulingMode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Replicated => "replicated",
            Self::Global => "global",
        }
    }
}

/// Restart policy, declared in compose terms
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RestartPolicy {
    No,
    Always,
    OnFailure,
    /// Compose-only; has no swarm equivalent and is rejected there
    UnlessStopped,
}

impl RestartPolicy {
    pub fn compose_value(self) -> &'static str {
        match self {
            Self::No => "no",
            Self::Always => "always",
            Self::OnFailure => "on-failure",
            Self::UnlessStopped => "unless-stopped",
        }
    }

    /// Swarm restart condition, when one exists
    pub fn swarm_condition(self) -> Option<&'static str> {
        match self {
            Self::No => Some("none"),
            Self::Always => Some("any"),
            Self::OnFailure => Some("on-failure"),
            Self::UnlessStopped => None,
        }
    }
}

/// Replica bounds, validated on construction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Replicas {
    pub min: u32,
    pub initial: u32,
    pub max: u32,
}

impl Replicas {
    /// Requires `min <= initial <= max`
    pub fn new(service: &str, min: u32, initial: u32, max: u32) -> Result<Self> {
        if min > initial || initial > max {
            return Err(ArmadaError::ReplicaBounds {
                service: service.to_string(),
                min,
                initial,
                max,
            });
        }
        Ok(Self { min, initial, max })
    }

    pub fn fixed(count: u32) -> Self {
        Self {
            min: count,
            initial: count,
            max: count,
        }
    }
}

impl Default for Replicas {
    fn default() -> Self {
        Self::fixed(1)
    }
}

/// A min/max resource range (cpus or memory), compose string form
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResourceRange {
    pub min: Option<String>,
    pub max: Option<String>,
}

impl ResourceRange {
    pub fn new(min: &str, max: &str) -> Self {
        Self {
            min: Some(min.to_string()),
            max: Some(max.to_string()),
        }
    }
}

/// Published port publish mode
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum PortMode {
    #[default]
    Ingress,
    Host,
}

impl PortMode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Ingress => "ingress",
            Self::Host => "host",
        }
    }
}

/// A service port mapping
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServicePort {
    /// Container-side port
    pub target: u16,
    /// Host-side port
    pub published: Option<u16>,
    /// Host IP to bind to
    pub ip: Option<String>,
    pub protocol: Protocol,
    pub mode: PortMode,
}

impl ServicePort {
    pub fn new(target: u16) -> Self {
        Self {
            target,
            published: None,
            ip: None,
            protocol: Protocol::Tcp,
            mode: PortMode::Ingress,
        }
    }

    pub fn published(mut self, port: u16) -> Self {
        self.published = Some(port);
        self
    }

    pub fn bind_ip(mut self, ip: &str) -> Self {
        self.ip = Some(ip.to_string());
        self
    }

    pub fn protocol(mut self, protocol: Protocol) -> Self {
        self.protocol = protocol;
        self
    }

    pub fn mode(mut self, mode: PortMode) -> Self {
        self.mode = mode;
        self
    }

    /// Parse the short `[published:]target[/protocol]` syntax
    pub fn parse(spec: &str) -> Result<Self> {
        let (ports, protocol) = match spec.split_once('/') {
            Some((ports, "tcp")) => (ports, Protocol::Tcp),
            Some((ports, "udp")) => (ports, Protocol::Udp),
            Some((_, other)) => {
                return Err(ArmadaError::InvalidPort(format!(
                    "unknown protocol '{}' in '{}'",
                    other, spec
                )))
            }
            None => (spec, Protocol::Tcp),
        };

        let parse_num = |value: &str| {
            value
                .parse::<u16>()
                .map_err(|_| ArmadaError::InvalidPort(format!("invalid port in '{}'", spec)))
        };

        let port = match ports.split_once(':') {
            Some((published, target)) => Self {
                target: parse_num(target)?,
                published: Some(parse_num(published)?),
                ip: None,
                protocol,
                mode: PortMode::Ingress,
            },
            None => Self {
                target: parse_num(ports)?,
                published: None,
                ip: None,
                protocol,
                mode: PortMode::Ingress,
            },
        };

        Ok(port)
    }

    /// Identity used for deduplication
    pub fn key(&self) -> (u16, Option<u16>, Protocol) {
        (self.target, self.published, self.protocol)
    }

    pub fn display(&self) -> String {
        match self.published {
            Some(published) => format!("{}:{}/{}", published, self.target, self.protocol),
            None => format!("{}/{}", self.target, self.protocol),
        }
    }
}

/// Kind of a volume mount
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VolumeKind {
    /// Named volume, registered at the document top level
    Volume,
    /// Host bind mount
    Bind,
    Tmpfs,
}

impl VolumeKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Volume => "volume",
            Self::Bind => "bind",
            Self::Tmpfs => "tmpfs",
        }
    }
}

/// A volume mount on a service
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceVolume {
    pub kind: VolumeKind,
    /// Volume name or host path
    pub source: String,
    /// Mount point in the container
    pub target: String,
    pub read_only: bool,
}

impl ServiceVolume {
    pub fn volume(source: &str, target: &str) -> Self {
        Self {
            kind: VolumeKind::Volume,
            source: source.to_string(),
            target: target.to_string(),
            read_only: false,
        }
    }

    pub fn bind(source: &str, target: &str) -> Self {
        Self {
            kind: VolumeKind::Bind,
            source: source.to_string(),
            target: target.to_string(),
            read_only: false,
        }
    }

    pub fn read_only(mut self) -> Self {
        self.read_only = true;
        self
    }
}

/// A label or environment value, flattened to a string at compile time
#[derive(Debug, Clone, PartialEq)]
pub enum ConfigValue {
    Str(String),
    Bool(bool),
    Int(i64),
    Float(f64),
}

impl ConfigValue {
    /// Document form: booleans as "true"/"false", numbers as decimal strings
    pub fn flatten(&self) -> String {
        match self {
            Self::Str(s) => s.clone(),
            Self::Bool(b) => b.to_string(),
            Self::Int(n) => n.to_string(),
            Self::Float(n) => n.to_string(),
        }
    }
}

impl From<&str> for ConfigValue {
    fn from(value: &str) -> Self {
        Self::Str(value.to_string())
    }
}

impl From<String> for ConfigValue {
    fn from(value: String) -> Self {
        Self::Str(value)
    }
}

impl From<bool> for ConfigValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<i64> for ConfigValue {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<u16> for ConfigValue {
    fn from(value: u16) -> Self {
        Self::Int(value as i64)
    }
}

impl From<f64> for ConfigValue {
    fn from(value: f64) -> Self {
        Self::Float(value)
    }
}

/// Reverse-proxy capability attached to a service
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProxyRole {
    /// Entrypoint names exposed to routed services (e.g. "websecure")
    pub entrypoints: Vec<String>,
}

/// Web capability attached to a service
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WebRole {
    /// Domain names this service answers for
    pub domains: Vec<String>,
    /// Name of the proxy service requests route through
    pub proxy: String,
    /// Container port the proxy forwards to
    pub port: u16,
}

/// Added/dropped Linux capabilities
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Capabilities {
    pub add: Vec<String>,
    pub drop: Vec<String>,
}

/// An immutable, validated service specification
#[derive(Debug, Clone)]
pub struct ServiceSpec {
    pub name: String,
    pub image: String,
    /// Local build context; services without one are pulled, not built
    pub context: Option<PathBuf>,
    pub registry: Option<Registry>,
    pub builder: Option<ImageBuilder>,
    pub mode: SchedulingMode,
    /// Swarm placement constraint, e.g. "node.role == manager"
    pub placement: Option<String>,
    pub labels: BTreeMap<String, ConfigValue>,
    pub sysctls: BTreeMap<String, String>,
    pub capabilities: Capabilities,
    pub profiles: Vec<String>,
    pub environment: BTreeMap<String, ConfigValue>,
    pub cpus: ResourceRange,
    pub memory: ResourceRange,
    pub replicas: Replicas,
    pub ports: Vec<ServicePort>,
    pub volumes: Vec<ServiceVolume>,
    pub restart: Option<RestartPolicy>,
    pub command: Option<Vec<String>>,
    /// Raw compose keys merged into the emitted fragment as-is
    pub extra: BTreeMap<String, serde_yaml::Value>,
    pub proxy_role: Option<ProxyRole>,
    pub web_role: Option<WebRole>,
    /// Declared dependency edges, in declaration order
    pub dependencies: Vec<Dependency>,
}

impl ServiceSpec {
    pub fn builder(name: &str, image: &str) -> ServiceBuilder {
        ServiceBuilder::new(name, image)
    }

    /// True when this service plays the reverse-proxy role
    pub fn is_proxy(&self) -> bool {
        self.proxy_role.is_some()
    }

    /// Domains this service answers for when routed through `proxy`
    pub fn domains_behind(&self, proxy: &str) -> Vec<String> {
        match self.web_role {
            Some(ref web) if web.proxy == proxy => web.domains.clone(),
            _ => Vec::new(),
        }
    }
}

/// Chained-setter builder producing an immutable `ServiceSpec`
#[derive(Debug, Clone)]
pub struct ServiceBuilder {
    spec: ServiceSpec,
}

impl ServiceBuilder {
    pub fn new(name: &str, image: &str) -> Self {
        Self {
            spec: ServiceSpec {
                name: name.to_string(),
                image: image.to_string(),
                context: None,
                registry: None,
                builder: None,
                mode: SchedulingMode::Replicated,
                placement: None,
                labels: BTreeMap::new(),
                sysctls: BTreeMap::new(),
                capabilities: Capabilities::default(),
                profiles: Vec::new(),
                environment: BTreeMap::new(),
                cpus: ResourceRange::default(),
                memory: ResourceRange::default(),
                replicas: Replicas::default(),
                ports: Vec::new(),
                volumes: Vec::new(),
                restart: None,
                command: None,
                extra: BTreeMap::new(),
                proxy_role: None,
                web_role: None,
                dependencies: Vec::new(),
            },
        }
    }

    pub fn context(mut self, path: PathBuf) -> Self {
        self.spec.context = Some(path);
        self
    }

    pub fn registry(mut self, registry: Registry) -> Self {
        self.spec.registry = Some(registry);
        self
    }

    pub fn image_builder(mut self, builder: ImageBuilder) -> Self {
        self.spec.builder = Some(builder);
        self
    }

    pub fn mode(mut self, mode: SchedulingMode) -> Self {
        self.spec.mode = mode;
        self
    }

    pub fn placement(mut self, constraint: &str) -> Self {
        self.spec.placement = Some(constraint.to_string());
        self
    }

    pub fn label(mut self, key: &str, value: impl Into<ConfigValue>) -> Self {
        self.spec.labels.insert(key.to_string(), value.into());
        self
    }

    pub fn sysctl(mut self, key: &str, value: &str) -> Self {
        self.spec.sysctls.insert(key.to_string(), value.to_string());
        self
    }

    pub fn cap_add(mut self, capability: &str) -> Self {
        self.spec.capabilities.add.push(capability.to_string());
        self
    }

    pub fn cap_drop(mut self, capability: &str) -> Self {
        self.spec.capabilities.drop.push(capability.to_string());
        self
    }

    pub fn profile(mut self, profile: &str) -> Self {
        self.spec.profiles.push(profile.to_string());
        self
    }

    pub fn env(mut self, key: &str, value: impl Into<ConfigValue>) -> Self {
        self.spec.environment.insert(key.to_string(), value.into());
        self
    }

    pub fn cpus(mut self, min: &str, max: &str) -> Self {
        self.spec.cpus = ResourceRange::new(min, max);
        self
    }

    pub fn memory(mut self, min: &str, max: &str) -> Self {
        self.spec.memory = ResourceRange::new(min, max);
        self
    }

    pub fn replicas(mut self, replicas: Replicas) -> Self {
        self.spec.replicas = replicas;
        self
    }

    /// Add a port from the short `[published:]target[/protocol]` syntax.
    ///
    /// Errors on a duplicate `(target, published, protocol)` triple.
    pub fn port(self, spec: &str) -> Result<Self> {
        let port = ServicePort::parse(spec)?;
        self.port_spec(port)
    }

    /// Add a structured port mapping; duplicates are an error
    pub fn port_spec(mut self, port: ServicePort) -> Result<Self> {
        if self.spec.ports.iter().any(|p| p.key() == port.key()) {
            return Err(ArmadaError::DuplicatePort {
                service: self.spec.name.clone(),
                port: port.display(),
            });
        }
        self.spec.ports.push(port);
        Ok(self)
    }

    pub fn volume(mut self, volume: ServiceVolume) -> Self {
        self.spec.volumes.push(volume);
        self
    }

    pub fn restart(mut self, policy: RestartPolicy) -> Self {
        self.spec.restart = Some(policy);
        self
    }

    pub fn command(mut self, command: Vec<String>) -> Self {
        self.spec.command = Some(command);
        self
    }

    pub fn extra(mut self, key: &str, value: serde_yaml::Value) -> Self {
        self.spec.extra.insert(key.to_string(), value);
        self
    }

    pub fn proxy_role(mut self, role: ProxyRole) -> Self {
        self.spec.proxy_role = Some(role);
        self
    }

    pub fn web_role(mut self, role: WebRole) -> Self {
        self.spec.web_role = Some(role);
        self
    }

    /// Declare a dependency on a service owned by `cluster`
    pub fn depends_on(mut self, service: Arc<ServiceSpec>, cluster: ClusterBase) -> Self {
        self.spec.dependencies.push(Dependency { service, cluster });
        self
    }

    /// Snapshot the configuration
    pub fn build(self) -> Arc<ServiceSpec> {
        Arc::new(self.spec)
    }
}
