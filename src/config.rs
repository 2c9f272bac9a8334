//! Declarative fleet file loading
//!
//! A fleet file names the cluster, its users and nodes, and its services;
//! loading one produces a fully wired `DockerCluster`. Values support
//! `${VAR}` and `${VAR:-default}` interpolation against the process
//! environment, so secrets stay out of the file.

use crate::compose::DeployTarget;
use crate::docker::DockerCluster;
use crate::error::{ArmadaError, Result};
use crate::fleet::cluster::{Cluster, ClusterBase};
use crate::fleet::node::ClusterNode;
use crate::fleet::service::{
    ProxyRole, Replicas, RestartPolicy, SchedulingMode, ServiceSpec, ServiceVolume, WebRole,
};
use crate::fleet::user::ClusterUser;
use crate::image::{ImageBuilder, Registry};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Default fleet file names, probed in order
pub const DEFAULT_FLEET_FILES: &[&str] = &["fleet.yaml", "fleet.yml", "armada.yaml", "armada.yml"];

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FleetFile {
    pub cluster: String,
    #[serde(default)]
    pub external_name: Option<String>,
    /// Deployment target: `swarm` (default) or `compose`
    #[serde(default, rename = "type")]
    pub target: DeployTarget,
    #[serde(default)]
    pub users: Vec<ClusterUser>,
    #[serde(default)]
    pub nodes: Vec<ClusterNode>,
    /// Declaration order decides resolution order
    #[serde(default)]
    pub services: Vec<ServiceEntry>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ServiceEntry {
    pub name: String,
    pub image: String,
    #[serde(default)]
    pub build: Option<BuildEntry>,
    #[serde(default)]
    pub registry: Option<RegistryEntry>,
    #[serde(default)]
    pub global: bool,
    #[serde(default)]
    pub placement: Option<String>,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
    #[serde(default)]
    pub environment: BTreeMap<String, String>,
    /// Short syntax: `[published:]target[/protocol]`
    #[serde(default)]
    pub ports: Vec<String>,
    /// Short syntax: `source:target[:ro]`; absolute sources are binds
    #[serde(default)]
    pub volumes: Vec<String>,
    #[serde(default)]
    pub restart: Option<String>,
    #[serde(default)]
    pub command: Option<Vec<String>>,
    #[serde(default)]
    pub sysctls: BTreeMap<String, String>,
    #[serde(default)]
    pub capabilities: Option<CapabilitiesEntry>,
    #[serde(default)]
    pub profiles: Vec<String>,
    #[serde(default)]
    pub replicas: Option<ReplicasEntry>,
    #[serde(default)]
    pub cpus: Option<RangeEntry>,
    #[serde(default)]
    pub memory: Option<RangeEntry>,
    /// In-cluster service names this service depends on; must be declared
    /// earlier in the file
    #[serde(default)]
    pub depends_on: Vec<String>,
    /// Routing: domains served through `proxy` on `port`
    #[serde(default)]
    pub web: Option<WebEntry>,
    /// Reverse-proxy role: makes this service an alias target for the
    /// domains of web services routed through it
    #[serde(default)]
    pub proxy: Option<ProxyEntry>,
    /// Raw compose keys passed through to the fragment
    #[serde(default)]
    pub extra: BTreeMap<String, serde_yaml::Value>,
}

#[derive(Debug, Deserialize)]
pub struct BuildEntry {
    pub context: PathBuf,
    #[serde(default)]
    pub dockerfile: Option<String>,
    #[serde(default)]
    pub platform: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub args: BTreeMap<String, String>,
}

#[derive(Debug, Deserialize)]
pub struct RegistryEntry {
    pub server: String,
    #[serde(default)]
    pub namespace: Option<String>,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ReplicasEntry {
    pub min: u32,
    #[serde(default)]
    pub initial: Option<u32>,
    pub max: u32,
}

#[derive(Debug, Deserialize)]
pub struct RangeEntry {
    pub min: String,
    pub max: String,
}

#[derive(Debug, Deserialize)]
pub struct WebEntry {
    pub domains: Vec<String>,
    pub proxy: String,
    pub port: u16,
}

#[derive(Debug, Deserialize)]
pub struct ProxyEntry {
    #[serde(default)]
    pub entrypoints: Vec<String>,
}

#[derive(Debug, Deserialize)]
pub struct CapabilitiesEntry {
    #[serde(default)]
    pub add: Vec<String>,
    #[serde(default)]
    pub drop: Vec<String>,
}

impl FleetFile {
    /// Probe the working directory for a fleet file
    pub fn find(dir: &Path) -> Option<PathBuf> {
        DEFAULT_FLEET_FILES
            .iter()
            .map(|name| dir.join(name))
            .find(|path| path.exists())
    }

    pub fn parse_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| ArmadaError::Config(format!("failed to read {}: {}", path.display(), e)))?;
        Self::parse_str(&content)
    }

    pub fn parse_str(content: &str) -> Result<Self> {
        let content = interpolate(content);
        serde_yaml::from_str(&content)
            .map_err(|e| ArmadaError::Config(format!("failed to parse fleet file: {}", e)))
    }

    /// Wire the parsed file into a deployable cluster
    pub fn into_cluster(self) -> Result<DockerCluster> {
        let mut base = ClusterBase::new(&self.cluster);
        if let Some(ref external) = self.external_name {
            base = base.with_external_name(external);
        }

        let mut cluster = Cluster::with_base(base.clone());
        for user in self.users {
            cluster.add_user(user);
        }
        for node in self.nodes {
            cluster.add_node(node);
        }

        // services reference earlier declarations by name
        let mut known: BTreeMap<String, Arc<ServiceSpec>> = BTreeMap::new();
        for entry in self.services {
            let name = entry.name.clone();
            let spec = entry.into_spec(&base, &known)?;
            cluster.add_dependency(spec.clone(), None);
            known.insert(name, spec);
        }

        Ok(DockerCluster::new(cluster, self.target))
    }
}

impl ServiceEntry {
    fn into_spec(
        self,
        base: &ClusterBase,
        known: &BTreeMap<String, Arc<ServiceSpec>>,
    ) -> Result<Arc<ServiceSpec>> {
        let mut builder = ServiceSpec::builder(&self.name, &self.image);

        if let Some(build) = self.build {
            let mut image_builder = ImageBuilder::new();
            if let Some(ref dockerfile) = build.dockerfile {
                image_builder = image_builder.dockerfile(dockerfile);
            }
            if let Some(ref platform) = build.platform {
                image_builder = image_builder.platform(platform);
            }
            for tag in &build.tags {
                image_builder = image_builder.tag(tag);
            }
            for (key, value) in &build.args {
                image_builder = image_builder.build_arg(key, value);
            }
            builder = builder.context(build.context).image_builder(image_builder);
        }

        if let Some(registry) = self.registry {
            let mut reg = Registry::new(&registry.server);
            if let Some(ref namespace) = registry.namespace {
                reg = reg.with_namespace(namespace);
            }
            if let (Some(username), Some(password)) = (registry.username, registry.password) {
                reg = reg.with_credentials(&username, &password);
            }
            builder = builder.registry(reg);
        }

        if self.global {
            builder = builder.mode(SchedulingMode::Global);
        }
        if let Some(ref placement) = self.placement {
            builder = builder.placement(placement);
        }
        for (key, value) in self.labels {
            builder = builder.label(&key, value);
        }
        for (key, value) in self.environment {
            builder = builder.env(&key, value);
        }
        for port in &self.ports {
            builder = builder.port(port)?;
        }
        for volume in &self.volumes {
            builder = builder.volume(parse_volume(&self.name, volume)?);
        }
        if let Some(ref restart) = self.restart {
            builder = builder.restart(parse_restart(&self.name, restart)?);
        }
        if let Some(command) = self.command {
            builder = builder.command(command);
        }
        for (key, value) in &self.sysctls {
            builder = builder.sysctl(key, value);
        }
        if let Some(ref caps) = self.capabilities {
            for cap in &caps.add {
                builder = builder.cap_add(cap);
            }
            for cap in &caps.drop {
                builder = builder.cap_drop(cap);
            }
        }
        for profile in &self.profiles {
            builder = builder.profile(profile);
        }
        if let Some(replicas) = self.replicas {
            let initial = replicas.initial.unwrap_or(replicas.min);
            builder = builder.replicas(Replicas::new(
                &self.name,
                replicas.min,
                initial,
                replicas.max,
            )?);
        }
        if let Some(cpus) = self.cpus {
            builder = builder.cpus(&cpus.min, &cpus.max);
        }
        if let Some(memory) = self.memory {
            builder = builder.memory(&memory.min, &memory.max);
        }
        if let Some(web) = self.web {
            builder = builder.web_role(WebRole {
                domains: web.domains,
                proxy: web.proxy,
                port: web.port,
            });
        }
        if let Some(proxy) = self.proxy {
            builder = builder.proxy_role(ProxyRole {
                entrypoints: proxy.entrypoints,
            });
        }
        for (key, value) in self.extra {
            builder = builder.extra(&key, value);
        }

        for dep_name in &self.depends_on {
            let dep = known.get(dep_name).ok_or_else(|| {
                ArmadaError::Config(format!(
                    "service {} depends on undeclared service {}",
                    self.name, dep_name
                ))
            })?;
            builder = builder.depends_on(dep.clone(), base.clone());
        }

        Ok(builder.build())
    }
}

fn parse_volume(service: &str, spec: &str) -> Result<ServiceVolume> {
    let mut parts = spec.splitn(3, ':');
    let (source, target) = match (parts.next(), parts.next()) {
        (Some(source), Some(target)) if !source.is_empty() && !target.is_empty() => {
            (source, target)
        }
        _ => {
            return Err(ArmadaError::Volume(format!(
                "invalid volume '{}' on {}: expected source:target[:ro]",
                spec, service
            )))
        }
    };

    let mut volume = if source.starts_with('/') || source.starts_with('.') {
        ServiceVolume::bind(source, target)
    } else {
        ServiceVolume::volume(source, target)
    };

    match parts.next() {
        Some("ro") => volume = volume.read_only(),
        Some(other) => {
            return Err(ArmadaError::Volume(format!(
                "invalid volume option '{}' on {}",
                other, service
            )))
        }
        None => {}
    }
    Ok(volume)
}

fn parse_restart(service: &str, value: &str) -> Result<RestartPolicy> {
    match value {
        "no" => Ok(RestartPolicy::No),
        "always" => Ok(RestartPolicy::Always),
        "on-failure" => Ok(RestartPolicy::OnFailure),
        "unless-stopped" => Ok(RestartPolicy::UnlessStopped),
        other => Err(ArmadaError::Config(format!(
            "unknown restart policy '{}' on {}",
            other, service
        ))),
    }
}

/// Expand `${VAR}` and `${VAR:-default}` from the process environment.
///
/// An unset variable without a default expands to the empty string, the
/// same behavior Compose files have.
fn interpolate(content: &str) -> String {
    let re = regex::Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)(?::-([^}]*))?\}").unwrap();
    re.replace_all(content, |caps: &regex::Captures| {
        std::env::var(&caps[1]).unwrap_or_else(|_| {
            caps.get(2).map(|m| m.as_str().to_string()).unwrap_or_default()
        })
    })
    .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    const FLEET: &str = r#"
cluster: app
type: swarm
users:
  - username: root
  - username: deploy
nodes:
  - host: 10.0.0.1
  - host: 10.0.0.2
    port: 2222
services:
  - name: db
    image: postgres:16
    volumes:
      - data:/var/lib/postgresql/data
    restart: always
  - name: api
    image: api
    registry:
      server: registry.example.com
    ports:
      - "8000:8000/tcp"
    depends_on:
      - db
    web:
      domains: [api.example.com]
      proxy: traefik
      port: 8000
"#;

    #[test]
    fn test_parse_and_wire() {
        let docker = FleetFile::parse_str(FLEET).unwrap().into_cluster().unwrap();
        let cluster = docker.cluster();

        assert_eq!(cluster.name(), "app");
        assert_eq!(cluster.admin().unwrap().username, "root");
        assert_eq!(cluster.runner().unwrap().username, "deploy");
        assert_eq!(cluster.manager().unwrap().host, "10.0.0.1");
        assert_eq!(cluster.workers()[0].port, 2222);

        let api = cluster.dependency("api").unwrap();
        assert_eq!(api.service.dependencies.len(), 1);
        assert_eq!(api.service.dependencies[0].service.name, "db");
        assert_eq!(api.service.web_role.as_ref().unwrap().proxy, "traefik");
    }

    #[test]
    fn test_forward_reference_rejected() {
        let fleet = r#"
cluster: app
services:
  - name: api
    image: api:latest
    depends_on: [db]
  - name: db
    image: postgres:16
"#;
        let err = FleetFile::parse_str(fleet).unwrap().into_cluster().err().unwrap();
        assert!(matches!(err, ArmadaError::Config(_)));
    }

    #[test]
    fn test_proxy_role_declared_in_fleet_file() {
        let fleet = r#"
cluster: edge
services:
  - name: traefik
    image: traefik:v3.1
    proxy:
      entrypoints: [websecure]
    sysctls:
      net.ipv4.ip_unprivileged_port_start: "0"
    capabilities:
      add: [NET_BIND_SERVICE]
    profiles: [frontend]
  - name: site
    image: site:latest
    web:
      domains: [example.com]
      proxy: traefik
      port: 3000
"#;
        let docker = FleetFile::parse_str(fleet).unwrap().into_cluster().unwrap();

        let traefik = docker.cluster().dependency("traefik").unwrap();
        assert_eq!(
            traefik.service.proxy_role.as_ref().unwrap().entrypoints,
            vec!["websecure".to_string()]
        );
        assert_eq!(
            traefik.service.sysctls["net.ipv4.ip_unprivileged_port_start"],
            "0"
        );
        assert_eq!(traefik.service.capabilities.add, vec!["NET_BIND_SERVICE"]);
        assert_eq!(traefik.service.profiles, vec!["frontend"]);

        // the proxy picks up the routed domains when the document is compiled
        let doc = docker.to_compose().unwrap();
        let aliases = &doc.services["traefik"].networks["edge_traefik_network"].aliases;
        assert_eq!(aliases, &["example.com"]);
    }

    #[test]
    fn test_volume_short_syntax() {
        let named = parse_volume("db", "data:/var/lib/postgresql/data").unwrap();
        assert_eq!(named.kind, crate::fleet::service::VolumeKind::Volume);

        let bind = parse_volume("proxy", "/var/run/docker.sock:/var/run/docker.sock:ro").unwrap();
        assert_eq!(bind.kind, crate::fleet::service::VolumeKind::Bind);
        assert!(bind.read_only);

        assert!(parse_volume("x", "justone").is_err());
    }

    #[test]
    fn test_find_probes_default_names() {
        let dir = tempfile::tempdir().unwrap();
        assert!(FleetFile::find(dir.path()).is_none());

        std::fs::write(dir.path().join("fleet.yaml"), FLEET).unwrap();
        let path = FleetFile::find(dir.path()).unwrap();
        let fleet = FleetFile::parse_file(&path).unwrap();
        assert_eq!(fleet.cluster, "app");
    }

    #[test]
    fn test_interpolation_with_default() {
        std::env::remove_var("ARMADA_TEST_UNSET");
        assert_eq!(
            interpolate("host: ${ARMADA_TEST_UNSET:-localhost}"),
            "host: localhost"
        );
        assert_eq!(interpolate("host: ${ARMADA_TEST_UNSET}"), "host: ");

        std::env::set_var("ARMADA_TEST_SET", "10.0.0.9");
        assert_eq!(interpolate("host: ${ARMADA_TEST_SET}"), "host: 10.0.0.9");
    }
}
