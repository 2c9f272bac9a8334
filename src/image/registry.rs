//! Container registry client

use crate::error::{ArmadaError, Result};
use crate::remote::Executor;
use base64::Engine;
use serde::Serialize;
use std::collections::BTreeMap;
use std::process::Stdio;
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

/// Login credentials for a registry
#[derive(Debug, Clone)]
pub struct RegistryCredentials {
    pub username: String,
    pub password: String,
    pub server: String,
}

impl RegistryCredentials {
    /// `user:password` in base64, the form Docker's config.json stores
    pub fn auth(&self) -> String {
        base64::engine::general_purpose::STANDARD
            .encode(format!("{}:{}", self.username, self.password))
    }
}

#[derive(Serialize)]
struct DockerAuthConfig {
    auths: BTreeMap<String, DockerAuthEntry>,
}

#[derive(Serialize)]
struct DockerAuthEntry {
    auth: String,
}

/// A container registry services push to and nodes pull from
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Registry {
    /// Registry server, e.g. "registry.example.com"
    pub server: String,
    /// Optional repository namespace prefix
    pub namespace: Option<String>,
    pub username: Option<String>,
    pub password: Option<String>,
}

impl Registry {
    pub fn new(server: &str) -> Self {
        Self {
            server: server.to_string(),
            namespace: None,
            username: None,
            password: None,
        }
    }

    pub fn with_namespace(mut self, namespace: &str) -> Self {
        self.namespace = Some(namespace.to_string());
        self
    }

    pub fn with_credentials(mut self, username: &str, password: &str) -> Self {
        self.username = Some(username.to_string());
        self.password = Some(password.to_string());
        self
    }

    /// Fully-qualified image URI for a tag
    pub fn uri(&self, image: &str, tag: &str) -> String {
        match self.namespace {
            Some(ref ns) => format!("{}/{}/{}:{}", self.server, ns, image, tag),
            None => format!("{}/{}:{}", self.server, image, tag),
        }
    }

    pub fn credentials(&self) -> Result<RegistryCredentials> {
        match (self.username.as_ref(), self.password.as_ref()) {
            (Some(username), Some(password)) => Ok(RegistryCredentials {
                username: username.clone(),
                password: password.clone(),
                server: self.server.clone(),
            }),
            _ => Err(ArmadaError::Registry(format!(
                "registry {} has no credentials configured",
                self.server
            ))),
        }
    }

    /// Authenticate a remote node by installing a Docker auth entry
    ///
    /// Writes `~/.docker/config.json` for the executor's effective user, so
    /// the password never appears on a remote command line.
    pub async fn login(&self, executor: &Arc<dyn Executor>) -> Result<()> {
        let credentials = self.credentials()?;
        tracing::info!(host = %executor.host(), server = %self.server, "registry login");

        let mut auths = BTreeMap::new();
        auths.insert(
            credentials.server.clone(),
            DockerAuthEntry {
                auth: credentials.auth(),
            },
        );
        let config = serde_json::to_vec_pretty(&DockerAuthConfig { auths })?;

        executor.exec("mkdir -p .docker").await?;
        executor.put_file(&config, ".docker/config.json").await?;
        Ok(())
    }

    /// Authenticate the local Docker client, used before pushing.
    ///
    /// This touches the one shared credential file on the operator machine,
    /// which is why builds run strictly serially.
    pub async fn login_local(&self) -> Result<()> {
        let credentials = self.credentials()?;

        let mut child = Command::new("docker")
            .args(["login", &self.server, "-u", &credentials.username, "--password-stdin"])
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin.write_all(credentials.password.as_bytes()).await?;
        }

        let output = child.wait_with_output().await?;
        if !output.status.success() {
            return Err(ArmadaError::Registry(format!(
                "docker login {} failed: {}",
                self.server,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        Ok(())
    }

    /// Push already-built tags of an image
    pub async fn push(&self, image: &str, tags: &[String]) -> Result<()> {
        for tag in tags {
            let uri = self.uri(image, tag);
            tracing::info!(image = %uri, "pushing image");

            let output = Command::new("docker").args(["push", &uri]).output().await?;
            if !output.status.success() {
                return Err(ArmadaError::Registry(format!(
                    "docker push {} failed: {}",
                    uri,
                    String::from_utf8_lossy(&output.stderr).trim()
                )));
            }
        }
        Ok(())
    }
}
