//! Per-service compose fragment compiler
//!
//! Pure functions from a `ServiceSpec` plus explicit cluster context to the
//! service's slice of the deployment document. Network membership is
//! intentionally non-transitive: a service joins its own network and the
//! networks of services it *directly* depends on, nothing further.

use crate::compose::document::{
    DependsOnCondition, DependsOnConfig, DeployConfig, PlacementConfig, PortConfig,
    ResourceSpecConfig, ResourcesConfig, RestartPolicyConfig, ServiceConfig,
    ServiceNetworkConfig, VolumeMountConfig,
};
use crate::compose::DeployTarget;
use crate::error::{ArmadaError, Result};
use crate::fleet::cluster::ClusterBase;
use crate::fleet::service::{PortMode, SchedulingMode, ServiceSpec, VolumeKind};
use std::collections::BTreeMap;

/// The network a service owns: `{cluster}_{service}_network`
pub fn network_name(cluster: &ClusterBase, service: &ServiceSpec) -> String {
    format!("{}_{}_network", cluster.name, service.name)
}

/// Unique top-level name for a named volume: `{cluster}_{source}_volume`
pub fn volume_name(cluster: &ClusterBase, source: &str) -> String {
    format!("{}_{}_volume", cluster.name, source)
}

/// Image reference as it appears in the document: qualified through the
/// service's registry when one is configured
pub fn image_reference(service: &ServiceSpec) -> String {
    match service.registry {
        Some(ref registry) => {
            let (name, tag) = match service.image.rsplit_once(':') {
                Some((name, tag)) => (name, tag),
                None => (service.image.as_str(), "latest"),
            };
            registry.uri(name, tag)
        }
        None => service.image.clone(),
    }
}

/// Compile a service into its compose fragment.
///
/// `cluster` is the cluster the document is being compiled for; the service
/// itself always belongs to it (external services are compiled by their own
/// cluster's pass).
pub fn compile(
    service: &ServiceSpec,
    cluster: &ClusterBase,
    target: DeployTarget,
) -> Result<ServiceConfig> {
    let mut fragment = ServiceConfig {
        image: Some(image_reference(service)),
        command: service.command.clone(),
        ..Default::default()
    };

    for (key, value) in &service.labels {
        fragment.labels.insert(key.clone(), value.flatten());
    }
    for (key, value) in &service.environment {
        fragment.environment.insert(key.clone(), value.flatten());
    }
    fragment.sysctls = service.sysctls.clone();
    fragment.cap_add = service.capabilities.add.clone();
    fragment.cap_drop = service.capabilities.drop.clone();
    fragment.profiles = service.profiles.clone();

    fragment.volumes = service
        .volumes
        .iter()
        .map(|volume| {
            let source = match volume.kind {
                // named volumes resolve to their unique top-level name
                VolumeKind::Volume => volume_name(cluster, &volume.source),
                VolumeKind::Bind | VolumeKind::Tmpfs => volume.source.clone(),
            };
            VolumeMountConfig {
                kind: volume.kind.as_str().to_string(),
                source,
                target: volume.target.clone(),
                read_only: volume.read_only,
            }
        })
        .collect();

    for port in &service.ports {
        if port.ip.as_deref() == Some("0.0.0.0") && port.mode != PortMode::Host {
            // binding every interface in ingress mode bypasses host firewall
            // rules silently
            return Err(ArmadaError::InvalidPort(format!(
                "port {} on {} binds 0.0.0.0 outside host mode",
                port.display(),
                service.name
            )));
        }
        fragment.ports.push(PortConfig {
            target: port.target,
            published: port.published,
            ip: port.ip.clone(),
            protocol: Some(port.protocol.as_str().to_string()),
            mode: Some(port.mode.as_str().to_string()),
        });
    }

    fragment.restart = match (target, service.restart) {
        (DeployTarget::Compose, Some(policy)) => Some(policy.compose_value().to_string()),
        _ => None,
    };

    let deploy = deploy_block(service, target)?;
    fragment.deploy = (!deploy.is_empty()).then_some(deploy);
    fragment.depends_on = depends_on(service, cluster, target);
    fragment.networks = networks(service, cluster, target);
    fragment.extra = service.extra.clone();

    Ok(fragment)
}

/// Compile the per-service deploy block.
///
/// `mode`, `placement` and `restart_policy` are swarm-only and dropped for
/// compose; a compose-only restart policy under swarm is a configuration
/// error rather than a silent drop.
pub fn deploy_block(service: &ServiceSpec, target: DeployTarget) -> Result<DeployConfig> {
    let mut deploy = DeployConfig::default();

    let limits = ResourceSpecConfig {
        cpus: service.cpus.max.clone(),
        memory: service.memory.max.clone(),
    };
    let reservations = ResourceSpecConfig {
        cpus: service.cpus.min.clone(),
        memory: service.memory.min.clone(),
    };
    if !limits.is_empty() || !reservations.is_empty() {
        deploy.resources = Some(ResourcesConfig {
            limits: (!limits.is_empty()).then_some(limits),
            reservations: (!reservations.is_empty()).then_some(reservations),
        });
    }

    if service.mode == SchedulingMode::Replicated {
        deploy.replicas = Some(service.replicas.min);
    }

    match target {
        DeployTarget::Swarm => {
            deploy.mode = Some(service.mode.as_str().to_string());
            if let Some(ref constraint) = service.placement {
                deploy.placement = Some(PlacementConfig {
                    constraints: vec![constraint.clone()],
                });
            }
            if let Some(policy) = service.restart {
                let condition = policy.swarm_condition().ok_or_else(|| {
                    ArmadaError::Config(format!(
                        "restart policy '{}' on {} is not supported under swarm",
                        policy.compose_value(),
                        service.name
                    ))
                })?;
                deploy.restart_policy = Some(RestartPolicyConfig {
                    condition: condition.to_string(),
                });
            }
        }
        DeployTarget::Compose => {}
    }

    Ok(deploy)
}

/// Render `depends_on` from the service's direct in-cluster dependencies
pub fn depends_on(
    service: &ServiceSpec,
    cluster: &ClusterBase,
    target: DeployTarget,
) -> Option<DependsOnConfig> {
    let names: Vec<String> = service
        .dependencies
        .iter()
        .filter(|edge| !edge.is_external_to(cluster))
        .map(|edge| edge.service.name.clone())
        .collect();
    if names.is_empty() {
        return None;
    }

    Some(match target {
        DeployTarget::Swarm => DependsOnConfig::List(names),
        DeployTarget::Compose => {
            let mut map = BTreeMap::new();
            for name in names {
                map.insert(name, DependsOnCondition::default());
            }
            DependsOnConfig::Map(map)
        }
    })
}

/// Networks a service joins: its own, plus the own network of every
/// *direct* dependency (external ones included; that is how two clusters
/// share a physical network).
pub fn networks(
    service: &ServiceSpec,
    cluster: &ClusterBase,
    target: DeployTarget,
) -> BTreeMap<String, ServiceNetworkConfig> {
    let mut map = BTreeMap::new();

    let own = ServiceNetworkConfig {
        // swarm rejects the priority key
        priority: matches!(target, DeployTarget::Compose).then_some(0),
        aliases: Vec::new(),
    };
    map.insert(network_name(cluster, service), own);

    for edge in &service.dependencies {
        map.entry(network_name(&edge.cluster, &edge.service))
            .or_default();
    }

    map
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fleet::service::{Replicas, RestartPolicy, ServicePort};

    fn base() -> ClusterBase {
        ClusterBase::new("test")
    }

    #[test]
    fn test_naming() {
        let svc = ServiceSpec::builder("api", "api:latest").build();
        assert_eq!(network_name(&base(), &svc), "test_api_network");
        assert_eq!(volume_name(&base(), "data"), "test_data_volume");
    }

    #[test]
    fn test_image_qualified_through_registry() {
        let svc = ServiceSpec::builder("api", "api:v2")
            .registry(crate::image::Registry::new("registry.example.com"))
            .build();
        assert_eq!(image_reference(&svc), "registry.example.com/api:v2");

        let plain = ServiceSpec::builder("db", "postgres:16").build();
        assert_eq!(image_reference(&plain), "postgres:16");
    }

    #[test]
    fn test_swarm_deploy_block_has_mode_and_placement() {
        let svc = ServiceSpec::builder("api", "api:latest")
            .placement("node.role == worker")
            .restart(RestartPolicy::OnFailure)
            .cpus("0.25", "1")
            .memory("128M", "512M")
            .replicas(Replicas::new("api", 2, 2, 4).unwrap())
            .build();

        let deploy = deploy_block(&svc, DeployTarget::Swarm).unwrap();
        assert_eq!(deploy.mode.as_deref(), Some("replicated"));
        assert_eq!(deploy.replicas, Some(2));
        assert_eq!(
            deploy.placement.unwrap().constraints,
            ["node.role == worker"]
        );
        assert_eq!(deploy.restart_policy.unwrap().condition, "on-failure");

        let resources = deploy.resources.unwrap();
        assert_eq!(resources.limits.unwrap().cpus.as_deref(), Some("1"));
        assert_eq!(
            resources.reservations.unwrap().memory.as_deref(),
            Some("128M")
        );
    }

    #[test]
    fn test_compose_deploy_block_drops_swarm_keys() {
        let svc = ServiceSpec::builder("api", "api:latest")
            .placement("node.role == worker")
            .restart(RestartPolicy::UnlessStopped)
            .build();

        let deploy = deploy_block(&svc, DeployTarget::Compose).unwrap();
        assert!(deploy.mode.is_none());
        assert!(deploy.placement.is_none());
        assert!(deploy.restart_policy.is_none());

        let fragment = compile(&svc, &base(), DeployTarget::Compose).unwrap();
        assert_eq!(fragment.restart.as_deref(), Some("unless-stopped"));
    }

    #[test]
    fn test_unless_stopped_rejected_under_swarm() {
        let svc = ServiceSpec::builder("api", "api:latest")
            .restart(RestartPolicy::UnlessStopped)
            .build();
        let err = compile(&svc, &base(), DeployTarget::Swarm).unwrap_err();
        assert!(matches!(err, ArmadaError::Config(_)));
    }

    #[test]
    fn test_global_mode_omits_replicas() {
        let svc = ServiceSpec::builder("agent", "agent:latest")
            .mode(SchedulingMode::Global)
            .build();
        let deploy = deploy_block(&svc, DeployTarget::Swarm).unwrap();
        assert_eq!(deploy.mode.as_deref(), Some("global"));
        assert!(deploy.replicas.is_none());
    }

    #[test]
    fn test_wildcard_bind_rejected_outside_host_mode() {
        let svc = ServiceSpec::builder("api", "api:latest")
            .port_spec(ServicePort::new(8080).published(80).bind_ip("0.0.0.0"))
            .unwrap()
            .build();
        let err = compile(&svc, &base(), DeployTarget::Swarm).unwrap_err();
        assert!(matches!(err, ArmadaError::InvalidPort(_)));

        let svc = ServiceSpec::builder("api", "api:latest")
            .port_spec(
                ServicePort::new(8080)
                    .published(80)
                    .bind_ip("0.0.0.0")
                    .mode(crate::fleet::service::PortMode::Host),
            )
            .unwrap()
            .build();
        assert!(compile(&svc, &base(), DeployTarget::Swarm).is_ok());
    }

    #[test]
    fn test_networks_are_non_transitive() {
        let cluster = base();
        let a = ServiceSpec::builder("a", "a:latest").build();
        let b = ServiceSpec::builder("b", "b:latest")
            .depends_on(a, cluster.clone())
            .build();
        let c = ServiceSpec::builder("c", "c:latest")
            .depends_on(b, cluster.clone())
            .build();

        let nets = networks(&c, &cluster, DeployTarget::Swarm);
        assert!(nets.contains_key("test_c_network"));
        assert!(nets.contains_key("test_b_network"));
        assert!(!nets.contains_key("test_a_network"));
    }

    #[test]
    fn test_own_network_priority_is_compose_only() {
        let svc = ServiceSpec::builder("api", "api:latest").build();
        let nets = networks(&svc, &base(), DeployTarget::Compose);
        assert_eq!(nets["test_api_network"].priority, Some(0));

        let nets = networks(&svc, &base(), DeployTarget::Swarm);
        assert_eq!(nets["test_api_network"].priority, None);
    }

    #[test]
    fn test_depends_on_shape_per_target() {
        let cluster = base();
        let db = ServiceSpec::builder("db", "postgres:16").build();
        let api = ServiceSpec::builder("api", "api:latest")
            .depends_on(db, cluster.clone())
            .build();

        match depends_on(&api, &cluster, DeployTarget::Swarm).unwrap() {
            DependsOnConfig::List(names) => assert_eq!(names, ["db"]),
            _ => panic!("swarm depends_on must be a list"),
        }
        match depends_on(&api, &cluster, DeployTarget::Compose).unwrap() {
            DependsOnConfig::Map(map) => {
                assert_eq!(map["db"].condition, "service_started");
            }
            _ => panic!("compose depends_on must be a map"),
        }
    }

    #[test]
    fn test_external_dependency_excluded_from_depends_on() {
        let cluster = base();
        let shared = ServiceSpec::builder("proxy", "traefik:v3").build();
        let api = ServiceSpec::builder("api", "api:latest")
            .depends_on(shared, ClusterBase::new("infra"))
            .build();

        // the proxy lives in another stack, compose cannot wait on it
        assert!(depends_on(&api, &cluster, DeployTarget::Compose).is_none());
        // but its network is still joined
        let nets = networks(&api, &cluster, DeployTarget::Compose);
        assert!(nets.contains_key("infra_proxy_network"));
    }

    #[test]
    fn test_named_volume_sources_rewritten() {
        let svc = ServiceSpec::builder("db", "postgres:16")
            .volume(crate::fleet::service::ServiceVolume::volume(
                "data",
                "/var/lib/postgresql/data",
            ))
            .volume(crate::fleet::service::ServiceVolume::bind(
                "/etc/localtime",
                "/etc/localtime",
            ))
            .build();

        let fragment = compile(&svc, &base(), DeployTarget::Swarm).unwrap();
        assert_eq!(fragment.volumes[0].source, "test_data_volume");
        assert_eq!(fragment.volumes[1].source, "/etc/localtime");
    }

    #[test]
    fn test_label_flattening() {
        let svc = ServiceSpec::builder("api", "api:latest")
            .label("traefik.enable", true)
            .label("replica-weight", 3i64)
            .env("PORT", 8080u16)
            .build();
        let fragment = compile(&svc, &base(), DeployTarget::Swarm).unwrap();
        assert_eq!(fragment.labels["traefik.enable"], "true");
        assert_eq!(fragment.labels["replica-weight"], "3");
        assert_eq!(fragment.environment["PORT"], "8080");
    }
}
