//! Web application specialization: routed through a proxy via labels

use crate::error::Result;
use crate::fleet::cluster::ClusterBase;
use crate::fleet::service::{ServiceBuilder, ServiceSpec, WebRole};
use std::sync::Arc;

/// Factory for a web service routed through a Traefik proxy
///
/// Emits the router labels the proxy's Docker provider picks up and
/// attaches the web role so the compiler can alias the proxy onto the
/// service's domains.
#[derive(Debug, Clone)]
pub struct WebService {
    name: String,
    image: String,
    domains: Vec<String>,
    proxy: String,
    port: u16,
    /// Route over the TLS entrypoint with the ACME resolver
    tls: bool,
}

impl WebService {
    pub fn new(name: &str, image: &str, proxy: &str, port: u16) -> Self {
        Self {
            name: name.to_string(),
            image: image.to_string(),
            domains: Vec::new(),
            proxy: proxy.to_string(),
            port,
            tls: false,
        }
    }

    pub fn domain(mut self, domain: &str) -> Self {
        self.domains.push(domain.to_string());
        self
    }

    pub fn tls(mut self) -> Self {
        self.tls = true;
        self
    }

    /// Configure routing on an existing builder and snapshot it.
    ///
    /// The caller is responsible for wiring the dependency edge onto the
    /// proxy so the two share a network; `build` does both.
    pub fn apply(self, builder: ServiceBuilder) -> Result<Arc<ServiceSpec>> {
        let rule = self
            .domains
            .iter()
            .map(|domain| format!("Host(`{}`)", domain))
            .collect::<Vec<_>>()
            .join(" || ");

        let mut builder = builder
            .label("traefik.enable", true)
            .label(&format!("traefik.http.routers.{}.rule", self.name), rule)
            .label(
                &format!(
                    "traefik.http.services.{}.loadbalancer.server.port",
                    self.name
                ),
                i64::from(self.port),
            )
            .web_role(WebRole {
                domains: self.domains.clone(),
                proxy: self.proxy.clone(),
                port: self.port,
            });

        if self.tls {
            builder = builder
                .label(
                    &format!("traefik.http.routers.{}.entrypoints", self.name),
                    "websecure",
                )
                .label(
                    &format!("traefik.http.routers.{}.tls.certresolver", self.name),
                    "le",
                );
        }

        Ok(builder.build())
    }

    /// Build a standalone routed service depending on `proxy` in `cluster`
    pub fn build(
        self,
        proxy: Arc<ServiceSpec>,
        cluster: ClusterBase,
    ) -> Result<Arc<ServiceSpec>> {
        let builder =
            ServiceSpec::builder(&self.name, &self.image).depends_on(proxy, cluster);
        self.apply(builder)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::TraefikService;

    #[test]
    fn test_router_labels() {
        let cluster = ClusterBase::new("test");
        let proxy = TraefikService::new("traefik").build().unwrap();
        let site = WebService::new("site", "site:latest", "traefik", 3000)
            .domain("example.com")
            .domain("www.example.com")
            .build(proxy, cluster)
            .unwrap();

        assert_eq!(site.labels["traefik.enable"].flatten(), "true");
        assert_eq!(
            site.labels["traefik.http.routers.site.rule"].flatten(),
            "Host(`example.com`) || Host(`www.example.com`)"
        );
        assert_eq!(
            site.labels["traefik.http.services.site.loadbalancer.server.port"].flatten(),
            "3000"
        );
        assert_eq!(site.domains_behind("traefik"), ["example.com", "www.example.com"]);
        assert_eq!(site.dependencies.len(), 1);
    }

    #[test]
    fn test_tls_labels() {
        let cluster = ClusterBase::new("test");
        let proxy = TraefikService::new("traefik").acme("ops@example.com").build().unwrap();
        let site = WebService::new("site", "site:latest", "traefik", 3000)
            .domain("example.com")
            .tls()
            .build(proxy, cluster)
            .unwrap();

        assert_eq!(
            site.labels["traefik.http.routers.site.entrypoints"].flatten(),
            "websecure"
        );
        assert_eq!(
            site.labels["traefik.http.routers.site.tls.certresolver"].flatten(),
            "le"
        );
    }
}
