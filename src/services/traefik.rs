//! Traefik reverse-proxy specialization

use crate::error::Result;
use crate::fleet::service::{ProxyRole, RestartPolicy, SchedulingMode, ServiceSpec, ServiceVolume};
use std::sync::Arc;

const DEFAULT_IMAGE: &str = "traefik:v3.1";
const DOCKER_SOCKET: &str = "/var/run/docker.sock";

/// Factory for a Traefik service carrying the proxy role
///
/// Configures the Docker provider against the local socket with
/// `exposedByDefault` off, so only services that opt in via labels are
/// routed.
#[derive(Debug, Clone)]
pub struct TraefikService {
    name: String,
    image: String,
    dashboard: bool,
    /// ACME contact; enables the Let's Encrypt resolver when set
    acme_email: Option<String>,
}

impl TraefikService {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            image: DEFAULT_IMAGE.to_string(),
            dashboard: false,
            acme_email: None,
        }
    }

    pub fn image(mut self, image: &str) -> Self {
        self.image = image.to_string();
        self
    }

    pub fn dashboard(mut self) -> Self {
        self.dashboard = true;
        self
    }

    pub fn acme(mut self, email: &str) -> Self {
        self.acme_email = Some(email.to_string());
        self
    }

    pub fn build(self) -> Result<Arc<ServiceSpec>> {
        let mut entrypoints = vec!["web".to_string()];

        let mut builder = ServiceSpec::builder(&self.name, &self.image)
            .proxy_role(ProxyRole {
                entrypoints: entrypoints.clone(),
            })
            // the provider needs the engine API, so pin to a manager
            .mode(SchedulingMode::Global)
            .placement("node.role == manager")
            .restart(RestartPolicy::Always)
            .volume(ServiceVolume::bind(DOCKER_SOCKET, DOCKER_SOCKET).read_only())
            .env("TRAEFIK_PROVIDERS_DOCKER_EXPOSEDBYDEFAULT", false)
            .env(
                "TRAEFIK_PROVIDERS_DOCKER_ENDPOINT",
                format!("unix://{}", DOCKER_SOCKET),
            )
            .env("TRAEFIK_ENTRYPOINTS_WEB_ADDRESS", ":80")
            .env("TRAEFIK_LOG_LEVEL", "info")
            .port("80:80/tcp")?;

        if let Some(ref email) = self.acme_email {
            entrypoints.push("websecure".to_string());
            builder = builder
                .proxy_role(ProxyRole { entrypoints })
                .env("TRAEFIK_ENTRYPOINTS_WEBSECURE_ADDRESS", ":443")
                .env("TRAEFIK_CERTIFICATESRESOLVERS_LE_ACME_EMAIL", email.clone())
                .env("TRAEFIK_CERTIFICATESRESOLVERS_LE_ACME_TLSCHALLENGE", true)
                .port("443:443/tcp")?;
        }
        if self.dashboard {
            builder = builder
                .env("TRAEFIK_API_INSECURE", true)
                .port("8080:8080/tcp")?;
        }

        Ok(builder.build())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_minimal_proxy() {
        let proxy = TraefikService::new("traefik").build().unwrap();
        assert!(proxy.is_proxy());
        assert_eq!(proxy.ports.len(), 1);
        assert!(proxy
            .volumes
            .iter()
            .any(|v| v.source == DOCKER_SOCKET && v.read_only));
    }

    #[test]
    fn test_acme_adds_websecure() {
        let proxy = TraefikService::new("traefik")
            .acme("ops@example.com")
            .build()
            .unwrap();
        assert_eq!(proxy.ports.len(), 2);
        assert_eq!(
            proxy.proxy_role.as_ref().unwrap().entrypoints,
            ["web", "websecure"]
        );
        assert!(proxy
            .environment
            .contains_key("TRAEFIK_CERTIFICATESRESOLVERS_LE_ACME_EMAIL"));
    }

    #[test]
    fn test_dashboard_port() {
        let proxy = TraefikService::new("traefik").dashboard().build().unwrap();
        assert!(proxy.ports.iter().any(|p| p.target == 8080));
    }
}
