//! Cluster identity and the dependency-graph resolver

use super::node::ClusterNode;
use super::service::ServiceSpec;
use super::user::ClusterUser;
use crate::error::{ArmadaError, Result};
use std::collections::HashSet;
use std::sync::Arc;

/// Identity anchor for dependency-boundary checks
///
/// Two services are in the same cluster iff their owning bases share `name`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClusterBase {
    pub name: String,
    /// Name the cluster is addressed by from outside (stack/project name);
    /// defaults to `name`
    pub external_name: Option<String>,
}

impl ClusterBase {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            external_name: None,
        }
    }

    pub fn with_external_name(mut self, external_name: &str) -> Self {
        self.external_name = Some(external_name.to_string());
        self
    }

    pub fn external_name(&self) -> &str {
        self.external_name.as_deref().unwrap_or(&self.name)
    }
}

/// A directed dependency edge: a service together with its home cluster
#[derive(Debug, Clone)]
pub struct Dependency {
    pub service: Arc<ServiceSpec>,
    /// Home cluster of the dependency; decides whether the edge crosses a
    /// cluster boundary
    pub cluster: ClusterBase,
}

impl Dependency {
    pub fn new(service: Arc<ServiceSpec>, cluster: ClusterBase) -> Self {
        Self { service, cluster }
    }

    /// Edge identity used for deduplication
    pub fn key(&self) -> String {
        format!("{}:{}", self.cluster.name, self.service.name)
    }

    /// True when the edge leaves `cluster`
    pub fn is_external_to(&self, cluster: &ClusterBase) -> bool {
        self.cluster.name != cluster.name
    }
}

/// A named collection of nodes, users, and top-level service dependencies
///
/// Constructed once from declarative configuration. `add_dependency` is a
/// configuration-time operation; the graph is read-only during rollout.
#[derive(Debug, Clone)]
pub struct Cluster {
    pub base: ClusterBase,
    /// Ordered: first is the admin, second (when present) the runner
    pub users: Vec<ClusterUser>,
    /// Ordered: first is the manager
    pub nodes: Vec<ClusterNode>,
    dependencies: Vec<Dependency>,
}

impl Cluster {
    pub fn new(name: &str) -> Self {
        Self {
            base: ClusterBase::new(name),
            users: Vec::new(),
            nodes: Vec::new(),
            dependencies: Vec::new(),
        }
    }

    pub fn with_base(base: ClusterBase) -> Self {
        Self {
            base,
            users: Vec::new(),
            nodes: Vec::new(),
            dependencies: Vec::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.base.name
    }

    pub fn add_user(&mut self, user: ClusterUser) {
        self.users.push(user);
    }

    pub fn add_node(&mut self, node: ClusterNode) {
        self.nodes.push(node);
    }

    /// Admin user; required before any rollout starts
    pub fn admin(&self) -> Result<&ClusterUser> {
        self.users
            .first()
            .ok_or_else(|| ArmadaError::MissingAdmin(self.base.name.clone()))
    }

    /// Runner user, when a dedicated one was declared
    pub fn runner(&self) -> Option<&ClusterUser> {
        self.users.get(1)
    }

    /// Manager node; source of truth for swarm membership
    pub fn manager(&self) -> Result<&ClusterNode> {
        self.nodes
            .first()
            .ok_or_else(|| ArmadaError::MissingManager(self.base.name.clone()))
    }

    pub fn workers(&self) -> &[ClusterNode] {
        if self.nodes.len() > 1 {
            &self.nodes[1..]
        } else {
            &[]
        }
    }

    /// Declare a top-level dependency. The home cluster defaults to this
    /// cluster; duplicates (by edge identity) are dropped, first wins.
    pub fn add_dependency(&mut self, service: Arc<ServiceSpec>, cluster: Option<ClusterBase>) {
        let edge = Dependency::new(service, cluster.unwrap_or_else(|| self.base.clone()));
        if self.dependencies.iter().any(|d| d.key() == edge.key()) {
            return;
        }
        self.dependencies.push(edge);
    }

    /// Resolve the dependency list.
    ///
    /// External edges (home cluster differs from this one) are filtered out
    /// unless `include_external`, and are never recursed into either way;
    /// their transitive dependencies belong to their own cluster's
    /// compilation pass. With `include_depends` the resolver expands
    /// non-external edges depth-first, pre-order: parent before children,
    /// children in declared order. Deduplicated by edge identity, first
    /// occurrence wins.
    pub fn dependencies(&self, include_external: bool, include_depends: bool) -> Vec<Dependency> {
        let mut out = Vec::new();
        let mut seen = HashSet::new();
        Self::collect(
            &self.base,
            &self.dependencies,
            include_external,
            include_depends,
            &mut seen,
            &mut out,
        );
        out
    }

    fn collect(
        base: &ClusterBase,
        edges: &[Dependency],
        include_external: bool,
        include_depends: bool,
        seen: &mut HashSet<String>,
        out: &mut Vec<Dependency>,
    ) {
        for edge in edges {
            let external = edge.is_external_to(base);
            if external && !include_external {
                continue;
            }
            if !seen.insert(edge.key()) {
                continue;
            }
            out.push(edge.clone());
            if include_depends && !external {
                Self::collect(
                    base,
                    &edge.service.dependencies,
                    include_external,
                    include_depends,
                    seen,
                    out,
                );
            }
        }
    }

    /// Look up a fully-resolved in-cluster dependency by service name
    pub fn dependency(&self, name: &str) -> Result<Dependency> {
        self.dependencies(false, true)
            .into_iter()
            .find(|d| d.service.name == name)
            .ok_or_else(|| ArmadaError::DependencyNotFound(name.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn svc(name: &str) -> Arc<ServiceSpec> {
        ServiceSpec::builder(name, &format!("{}:latest", name)).build()
    }

    fn svc_with_dep(name: &str, dep: Arc<ServiceSpec>, cluster: ClusterBase) -> Arc<ServiceSpec> {
        ServiceSpec::builder(name, &format!("{}:latest", name))
            .depends_on(dep, cluster)
            .build()
    }

    #[test]
    fn test_dedup_first_occurrence_wins() {
        let mut cluster = Cluster::new("test");
        let shared = svc("db");
        let other = svc("cache");
        cluster.add_dependency(shared.clone(), None);
        cluster.add_dependency(other, None);
        cluster.add_dependency(shared, None);

        let deps = cluster.dependencies(false, false);
        assert_eq!(deps.len(), 2);
        assert_eq!(deps[0].service.name, "db");
        assert_eq!(deps[1].service.name, "cache");
    }

    #[test]
    fn test_external_excluded_by_default() {
        let mut a = Cluster::new("a");
        let b_base = ClusterBase::new("b");
        let s = svc_with_dep("s", svc("s-child"), b_base.clone());
        a.add_dependency(s, Some(b_base));
        a.add_dependency(svc("own"), None);

        let deps = a.dependencies(false, true);
        assert_eq!(deps.len(), 1);
        assert_eq!(deps[0].service.name, "own");
    }

    #[test]
    fn test_external_included_but_never_recursed() {
        let mut a = Cluster::new("a");
        let b_base = ClusterBase::new("b");
        let s = svc_with_dep("s", svc("s-child"), b_base.clone());
        a.add_dependency(s, Some(b_base));

        // without recursion
        let deps = a.dependencies(true, false);
        assert_eq!(deps.len(), 1);
        assert_eq!(deps[0].service.name, "s");

        // with recursion the external edge is still a leaf
        let deps = a.dependencies(true, true);
        assert_eq!(deps.len(), 1);
        assert_eq!(deps[0].service.name, "s");
    }

    #[test]
    fn test_recursion_is_preorder_parent_first() {
        let base = ClusterBase::new("test");
        let leaf = svc("leaf");
        let mid = svc_with_dep("mid", leaf, base.clone());
        let top = svc_with_dep("top", mid, base.clone());

        let mut cluster = Cluster::with_base(base);
        cluster.add_dependency(top, None);

        let names: Vec<_> = cluster
            .dependencies(false, true)
            .into_iter()
            .map(|d| d.service.name.clone())
            .collect();
        assert_eq!(names, ["top", "mid", "leaf"]);
    }

    #[test]
    fn test_shared_transitive_dependency_resolved_once() {
        let base = ClusterBase::new("test");
        let db = svc("db");
        let api = svc_with_dep("api", db.clone(), base.clone());
        let worker = svc_with_dep("worker", db, base.clone());

        let mut cluster = Cluster::with_base(base);
        cluster.add_dependency(api, None);
        cluster.add_dependency(worker, None);

        let names: Vec<_> = cluster
            .dependencies(false, true)
            .into_iter()
            .map(|d| d.service.name.clone())
            .collect();
        assert_eq!(names, ["api", "db", "worker"]);
    }

    #[test]
    fn test_dependency_lookup() {
        let base = ClusterBase::new("test");
        let db = svc("db");
        let api = svc_with_dep("api", db, base.clone());
        let mut cluster = Cluster::with_base(base);
        cluster.add_dependency(api, None);

        assert!(cluster.dependency("db").is_ok());
        assert!(matches!(
            cluster.dependency("ghost"),
            Err(ArmadaError::DependencyNotFound(_))
        ));
    }

    #[test]
    fn test_admin_and_manager_preconditions() {
        let cluster = Cluster::new("empty");
        assert!(matches!(cluster.admin(), Err(ArmadaError::MissingAdmin(_))));
        assert!(matches!(
            cluster.manager(),
            Err(ArmadaError::MissingManager(_))
        ));
    }
}
