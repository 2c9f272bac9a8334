//! Docker cluster: document assembly and the rollout orchestrator

use super::node::DockerNode;
use super::service;
use crate::compose::document::{ComposeDocument, NetworkConfig, VolumeConfig};
use crate::compose::DeployTarget;
use crate::endpoint::{well_known, Endpoint};
use crate::error::{ArmadaError, Result};
use crate::fleet::cluster::{Cluster, Dependency};
use crate::fleet::node::ClusterNode;
use crate::fleet::service::VolumeKind;
use crate::fleet::user::ClusterUser;
use crate::image::{BuildOptions, Registry};
use crate::provision;
use crate::remote::Executor;
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use tokio::task::JoinSet;

/// Seam for substituting executors, used by tests
pub type ExecutorFactory = dyn Fn(&ClusterNode, &ClusterUser) -> Arc<dyn Executor> + Send + Sync;

/// Options shared by the rollout entry points
#[derive(Debug, Clone, Default)]
pub struct RolloutOptions {
    /// Skip the image build phase
    pub skip_build: bool,
}

/// Outcome summary of a completed rollout
#[derive(Debug, Clone)]
pub struct RolloutReport {
    pub operation: &'static str,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
    /// Number of nodes touched
    pub nodes: usize,
}

/// A cluster compiled for and deployed onto Docker
pub struct DockerCluster {
    cluster: Cluster,
    target: DeployTarget,
    /// Extra top-level networks beyond the generated ones
    extra_networks: BTreeMap<String, NetworkConfig>,
    /// Extra top-level volumes beyond the generated ones
    extra_volumes: BTreeMap<String, VolumeConfig>,
    executor_factory: Option<Arc<ExecutorFactory>>,
}

impl DockerCluster {
    pub fn new(cluster: Cluster, target: DeployTarget) -> Self {
        Self {
            cluster,
            target,
            extra_networks: BTreeMap::new(),
            extra_volumes: BTreeMap::new(),
            executor_factory: None,
        }
    }

    pub fn cluster(&self) -> &Cluster {
        &self.cluster
    }

    pub fn target(&self) -> DeployTarget {
        self.target
    }

    /// Stack/project name used on the nodes
    pub fn stack_name(&self) -> String {
        self.cluster.base.external_name().to_string()
    }

    pub fn add_network(&mut self, name: &str, config: NetworkConfig) {
        self.extra_networks.insert(name.to_string(), config);
    }

    pub fn add_volume(&mut self, name: &str, config: VolumeConfig) {
        self.extra_volumes.insert(name.to_string(), config);
    }

    pub fn with_executor_factory(mut self, factory: Arc<ExecutorFactory>) -> Self {
        self.executor_factory = Some(factory);
        self
    }

    // --- document assembly -------------------------------------------------

    /// Compile the full deployment document for this cluster.
    ///
    /// Two passes: first every resolved in-cluster service is compiled to
    /// its fragment and every encountered network recorded with its
    /// boundary; then proxy aliases are computed over the complete resolved
    /// set and the top-level networks/volumes maps are assembled.
    pub fn to_compose(&self) -> Result<ComposeDocument> {
        let resolved = self.cluster.dependencies(false, true);
        let base = &self.cluster.base;

        let mut doc = ComposeDocument::default();
        if self.target == DeployTarget::Compose {
            doc.name = Some(self.stack_name());
        }

        // network name -> crosses a cluster boundary
        let mut network_boundary: BTreeMap<String, bool> = BTreeMap::new();

        for dep in &resolved {
            let fragment = service::compile(&dep.service, base, self.target)?;

            network_boundary.insert(service::network_name(base, &dep.service), false);
            for edge in &dep.service.dependencies {
                let name = service::network_name(&edge.cluster, &edge.service);
                let external = edge.is_external_to(base);
                network_boundary
                    .entry(name)
                    .and_modify(|b| *b = *b || external)
                    .or_insert(external);
            }

            doc.services.insert(dep.service.name.clone(), fragment);
        }

        self.apply_proxy_aliases(&resolved, &mut doc);

        for (name, external) in network_boundary {
            let config = if external {
                NetworkConfig {
                    external: Some(true),
                    ..Default::default()
                }
            } else {
                NetworkConfig {
                    driver: Some(
                        match self.target {
                            DeployTarget::Swarm => "overlay",
                            DeployTarget::Compose => "bridge",
                        }
                        .to_string(),
                    ),
                    attachable: Some(true),
                    // explicit physical name so clusters sharing the network
                    // agree on it
                    name: Some(name.clone()),
                    external: None,
                }
            };
            doc.networks.insert(name, config);
        }
        for (name, config) in &self.extra_networks {
            if doc.networks.contains_key(name) {
                return Err(ArmadaError::Network(format!("duplicate network name {}", name)));
            }
            doc.networks.insert(name.clone(), config.clone());
        }

        for dep in &resolved {
            for volume in &dep.service.volumes {
                if volume.kind != VolumeKind::Volume {
                    continue;
                }
                let name = service::volume_name(base, &volume.source);
                doc.volumes.entry(name.clone()).or_insert(VolumeConfig { name: Some(name) });
            }
        }
        for (name, config) in &self.extra_volumes {
            if doc.volumes.contains_key(name) {
                return Err(ArmadaError::Volume(format!("duplicate volume name {}", name)));
            }
            doc.volumes.insert(name.clone(), config.clone());
        }

        Ok(doc)
    }

    /// Add the domains of routed web services as aliases on each top-level
    /// proxy's own network.
    ///
    /// A proxy that is itself someone else's dependency is skipped; nested
    /// proxy chains are not a defined topology.
    fn apply_proxy_aliases(&self, resolved: &[Dependency], doc: &mut ComposeDocument) {
        let dependency_keys: HashSet<String> = resolved
            .iter()
            .flat_map(|dep| dep.service.dependencies.iter().map(|edge| edge.key()))
            .collect();

        for dep in resolved {
            if !dep.service.is_proxy() || dependency_keys.contains(&dep.key()) {
                continue;
            }

            let aliases: Vec<String> = resolved
                .iter()
                .flat_map(|other| other.service.domains_behind(&dep.service.name))
                .collect();
            if aliases.is_empty() {
                continue;
            }

            let own = service::network_name(&self.cluster.base, &dep.service);
            if let Some(fragment) = doc.services.get_mut(&dep.service.name) {
                if let Some(network) = fragment.networks.get_mut(&own) {
                    network.aliases = aliases;
                }
            }
        }
    }

    // --- executors ---------------------------------------------------------

    fn executor_for(&self, node: &ClusterNode, user: &ClusterUser) -> Arc<dyn Executor> {
        match self.executor_factory {
            Some(ref factory) => factory(node, user),
            None => node.executor(user),
        }
    }

    /// Executor used for deploy/run commands: admin login, de-escalated to
    /// the runner account when one is declared
    fn deploy_executor(&self, node: &ClusterNode) -> Result<Arc<dyn Executor>> {
        let admin = self.cluster.admin()?;
        let executor = self.executor_for(node, admin);
        Ok(match self.cluster.runner() {
            Some(runner) => executor.scoped(&runner.username),
            None => executor,
        })
    }

    // --- rollout -----------------------------------------------------------

    /// Compile and deploy the cluster: build, authenticate, manager first,
    /// then workers in parallel.
    pub async fn deploy(&self, options: &RolloutOptions) -> Result<RolloutReport> {
        let started_at = Utc::now();
        self.cluster.admin()?;
        let manager = self.cluster.manager()?;

        // compile first: configuration errors must surface before any
        // command reaches a node
        let document = self.to_compose()?.to_yaml()?;
        let stack = self.stack_name();

        let resolved = self.cluster.dependencies(false, true);
        if !options.skip_build {
            self.build_phase(&resolved).await?;
        }
        self.authenticate_nodes(&resolved).await?;

        // manager-first barrier: workers must not start until this resolves
        DockerNode::new(self.deploy_executor(manager)?)
            .deploy(&document, &stack, self.target)
            .await?;

        let mut set = JoinSet::new();
        for worker in self.cluster.workers() {
            let executor = self.deploy_executor(worker)?;
            let document = document.clone();
            let stack = stack.clone();
            let target = self.target;
            set.spawn(async move {
                DockerNode::new(executor).deploy(&document, &stack, target).await
            });
        }
        drain(set).await?;

        Ok(RolloutReport {
            operation: "deploy",
            started_at,
            completed_at: Utc::now(),
            nodes: self.cluster.nodes.len(),
        })
    }

    /// Start the stack from documents already deployed to the nodes
    pub async fn run(&self, options: &RolloutOptions) -> Result<RolloutReport> {
        let started_at = Utc::now();
        self.cluster.admin()?;
        let manager = self.cluster.manager()?;

        let resolved = self.cluster.dependencies(false, true);
        if !options.skip_build {
            self.build_phase(&resolved).await?;
        }
        self.authenticate_nodes(&resolved).await?;

        let stack = self.stack_name();
        DockerNode::new(self.deploy_executor(manager)?)
            .run(&stack, self.target)
            .await?;

        let mut set = JoinSet::new();
        for worker in self.cluster.workers() {
            let executor = self.deploy_executor(worker)?;
            let stack = stack.clone();
            let target = self.target;
            set.spawn(async move { DockerNode::new(executor).run(&stack, target).await });
        }
        drain(set).await?;

        Ok(RolloutReport {
            operation: "run",
            started_at,
            completed_at: Utc::now(),
            nodes: self.cluster.nodes.len(),
        })
    }

    /// First-time provisioning: harden every node, install the engine, and
    /// (for swarm) form the cluster around the manager.
    pub async fn setup(&self) -> Result<RolloutReport> {
        let started_at = Utc::now();
        let admin = self.cluster.admin()?.clone();
        let manager = self.cluster.manager()?.clone();
        let runner = self.cluster.runner().cloned();

        let admin_key = read_key(&admin).await;
        let runner_key = match runner {
            Some(ref user) => read_key(user).await.or(admin_key.clone()),
            None => None,
        };
        let endpoints = self.firewall_endpoints();

        // manager provisioning must finish before any worker: it mints the
        // join token workers consume
        let manager_exec = self.executor_for(&manager, &admin);
        provision_node(
            Arc::clone(&manager_exec),
            admin_key.clone(),
            runner.clone(),
            runner_key.clone(),
            endpoints.clone(),
        )
        .await?;

        let join = match self.target {
            DeployTarget::Swarm => {
                let docker = DockerNode::new(Arc::clone(&manager_exec));
                docker.swarm_init(&manager.host).await?;
                if self.cluster.workers().is_empty() {
                    None
                } else {
                    Some((manager.host.clone(), docker.worker_join_token().await?))
                }
            }
            DeployTarget::Compose => None,
        };

        let mut set = JoinSet::new();
        for worker in self.cluster.workers() {
            let executor = self.executor_for(worker, &admin);
            let admin_key = admin_key.clone();
            let runner = runner.clone();
            let runner_key = runner_key.clone();
            let endpoints = endpoints.clone();
            let join = join.clone();
            set.spawn(async move {
                provision_node(Arc::clone(&executor), admin_key, runner, runner_key, endpoints)
                    .await?;
                if let Some((manager_host, token)) = join {
                    DockerNode::new(executor).swarm_join(&manager_host, &token).await?;
                }
                Ok(())
            });
        }
        drain(set).await?;

        // registry auth last: the runner account must exist before its
        // credential file can be written
        let resolved = self.cluster.dependencies(false, true);
        self.authenticate_nodes(&resolved).await?;

        Ok(RolloutReport {
            operation: "setup",
            started_at,
            completed_at: Utc::now(),
            nodes: self.cluster.nodes.len(),
        })
    }

    /// Serial image build phase.
    ///
    /// Builds share the operator's one registry-credential file, so they
    /// must not run concurrently.
    async fn build_phase(&self, resolved: &[Dependency]) -> Result<()> {
        for dep in resolved {
            let spec = &dep.service;
            let Some(ref context) = spec.context else {
                continue;
            };
            tracing::info!(service = %spec.name, "build phase");

            let builder = spec.builder.clone().unwrap_or_default();
            let labels = spec
                .labels
                .iter()
                .map(|(k, v)| (k.clone(), v.flatten()))
                .collect();
            let options = BuildOptions {
                context: context.clone(),
                push: spec.registry.is_some(),
                labels,
            };
            // the builder applies its own tags
            let image = spec
                .image
                .rsplit_once(':')
                .map(|(name, _)| name)
                .unwrap_or(&spec.image);
            builder.build(image, spec.registry.as_ref(), &options).await?;
        }
        Ok(())
    }

    /// Authenticate every node against the union of dependency registries,
    /// in parallel across nodes.
    ///
    /// Credentials are written for the user the stack commands run as, so
    /// the scoped deploy executor is used here.
    async fn authenticate_nodes(&self, resolved: &[Dependency]) -> Result<()> {
        let mut registries: Vec<Registry> = Vec::new();
        for dep in resolved {
            if let Some(ref registry) = dep.service.registry {
                if !registries.iter().any(|r| r.server == registry.server) {
                    registries.push(registry.clone());
                }
            }
        }
        if registries.is_empty() {
            return Ok(());
        }

        let mut set = JoinSet::new();
        for node in &self.cluster.nodes {
            let executor = self.deploy_executor(node)?;
            let registries = registries.clone();
            set.spawn(async move {
                for registry in &registries {
                    registry.login(&executor).await?;
                }
                Ok(())
            });
        }
        drain(set).await
    }

    /// Firewall openings: SSH, swarm traffic (swarm target), and every
    /// published service port.
    fn firewall_endpoints(&self) -> Vec<Endpoint> {
        let mut endpoints = vec![well_known::ssh()];
        if self.target == DeployTarget::Swarm {
            endpoints.push(well_known::swarm_management());
            endpoints.extend(well_known::swarm_nodes());
            endpoints.push(well_known::swarm_overlay());
        }
        for dep in self.cluster.dependencies(false, true) {
            for port in &dep.service.ports {
                if let Some(published) = port.published {
                    endpoints.push(Endpoint::new(
                        &format!("{}-{}", dep.service.name, published),
                        published,
                        port.protocol,
                    ));
                }
            }
        }
        endpoints
    }
}

/// Sequential provisioning of a single node
async fn provision_node(
    executor: Arc<dyn Executor>,
    admin_key: Option<String>,
    runner: Option<ClusterUser>,
    runner_key: Option<String>,
    endpoints: Vec<Endpoint>,
) -> Result<()> {
    provision::update_packages(&executor).await?;
    if let Some(ref key) = admin_key {
        provision::install_authorized_key(&executor, key).await?;
    }
    provision::disable_password_auth(&executor).await?;
    provision::configure_firewall(&executor, &endpoints).await?;
    if let Some(ref runner) = runner {
        provision::create_user(&executor, &runner.username, runner_key.as_deref()).await?;
    }

    let docker = DockerNode::new(Arc::clone(&executor));
    docker.install_engine().await?;
    if let Some(ref runner) = runner {
        docker.grant_engine_access(&runner.username).await?;
    }
    Ok(())
}

/// Local public key for a user, when one is configured and readable
async fn read_key(user: &ClusterUser) -> Option<String> {
    let path = user.public_key_path.as_ref()?;
    tokio::fs::read_to_string(path).await.ok()
}

/// Await every task, surfacing the first failure without cancelling the
/// siblings already in flight.
async fn drain(mut set: JoinSet<Result<()>>) -> Result<()> {
    let mut first: Option<ArmadaError> = None;
    while let Some(joined) = set.join_next().await {
        let outcome = match joined {
            Ok(result) => result,
            Err(e) => Err(ArmadaError::Rollout(format!("rollout task failed: {}", e))),
        };
        if let Err(e) = outcome {
            tracing::error!(error = %e, "rollout step failed");
            if first.is_none() {
                first = Some(e);
            }
        }
    }
    match first {
        Some(e) => Err(e),
        None => Ok(()),
    }
}
