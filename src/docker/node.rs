//! Remote Docker mechanics for a single node

use crate::compose::DeployTarget;
use crate::error::Result;
use crate::remote::executor::sh_quote;
use crate::remote::Executor;
use std::sync::Arc;

/// Directory on the node holding rendered deployment documents
const DOCUMENT_DIR: &str = ".armada";

/// A cluster node with Docker-specific deployment mechanics bound to an
/// executor
pub struct DockerNode {
    executor: Arc<dyn Executor>,
}

impl DockerNode {
    pub fn new(executor: Arc<dyn Executor>) -> Self {
        Self { executor }
    }

    pub fn host(&self) -> &str {
        self.executor.host()
    }

    fn document_path(stack: &str) -> String {
        format!("{}/{}.yaml", DOCUMENT_DIR, stack)
    }

    /// Upload the rendered document and start the stack
    pub async fn deploy(&self, document: &str, stack: &str, target: DeployTarget) -> Result<()> {
        tracing::info!(host = %self.host(), stack, "deploying stack");

        self.executor
            .exec(&format!("mkdir -p {}", DOCUMENT_DIR))
            .await?;
        self.executor
            .put_file(document.as_bytes(), &Self::document_path(stack))
            .await?;
        self.start(stack, target).await
    }

    /// Start the stack from an already-uploaded document
    pub async fn run(&self, stack: &str, target: DeployTarget) -> Result<()> {
        tracing::info!(host = %self.host(), stack, "starting stack");
        self.start(stack, target).await
    }

    async fn start(&self, stack: &str, target: DeployTarget) -> Result<()> {
        let path = Self::document_path(stack);
        let command = match target {
            DeployTarget::Swarm => format!(
                "docker stack deploy --with-registry-auth -c {} {}",
                sh_quote(&path),
                sh_quote(stack)
            ),
            DeployTarget::Compose => format!(
                "docker compose -f {} up -d --remove-orphans",
                sh_quote(&path)
            ),
        };
        self.executor.exec(&command).await?;
        Ok(())
    }

    /// Install the Docker engine when it is missing
    pub async fn install_engine(&self) -> Result<()> {
        self.executor
            .exec("command -v docker >/dev/null 2>&1 || curl -fsSL https://get.docker.com | sudo sh")
            .await?;
        Ok(())
    }

    /// Allow a non-root user to talk to the engine
    pub async fn grant_engine_access(&self, username: &str) -> Result<()> {
        self.executor
            .exec(&format!("sudo usermod -aG docker {}", sh_quote(username)))
            .await?;
        Ok(())
    }

    /// Initialize swarm mode on the manager; no-op when already active
    pub async fn swarm_init(&self, advertise_addr: &str) -> Result<()> {
        let state = self
            .executor
            .exec("docker info --format '{{.Swarm.LocalNodeState}}'")
            .await?;
        if state.line() == "active" {
            tracing::debug!(host = %self.host(), "swarm already active");
            return Ok(());
        }
        self.executor
            .exec(&format!(
                "docker swarm init --advertise-addr {}",
                sh_quote(advertise_addr)
            ))
            .await?;
        Ok(())
    }

    /// Mint the worker join token; the manager is the source of truth for
    /// swarm membership
    pub async fn worker_join_token(&self) -> Result<String> {
        let output = self
            .executor
            .exec("docker swarm join-token -q worker")
            .await?;
        Ok(output.line())
    }

    /// Join the swarm as a worker; no-op when already a member
    pub async fn swarm_join(&self, manager_host: &str, token: &str) -> Result<()> {
        let state = self
            .executor
            .exec("docker info --format '{{.Swarm.LocalNodeState}}'")
            .await?;
        if state.line() == "active" {
            tracing::debug!(host = %self.host(), "node already in swarm");
            return Ok(());
        }
        self.executor
            .exec(&format!(
                "docker swarm join --token {} {}:2377",
                sh_quote(token),
                sh_quote(manager_host)
            ))
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remote::executor::testing::{RecordedCall, RecordingExecutor};
    use std::sync::Mutex;

    fn recording(log: &Arc<Mutex<Vec<RecordedCall>>>) -> Arc<dyn Executor> {
        Arc::new(RecordingExecutor::new("node1", Arc::clone(log)))
    }

    #[tokio::test]
    async fn test_deploy_uploads_then_starts_swarm_stack() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let node = DockerNode::new(recording(&log));
        node.deploy("services: {}", "prod", DeployTarget::Swarm)
            .await
            .unwrap();

        let calls = log.lock().unwrap();
        assert_eq!(calls[0].command, "mkdir -p .armada");
        assert_eq!(calls[1].command, "put_file .armada/prod.yaml");
        assert_eq!(
            calls[2].command,
            "docker stack deploy --with-registry-auth -c .armada/prod.yaml prod"
        );
    }

    #[tokio::test]
    async fn test_compose_start_command() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let node = DockerNode::new(recording(&log));
        node.run("dev", DeployTarget::Compose).await.unwrap();

        let calls = log.lock().unwrap();
        assert_eq!(
            calls[0].command,
            "docker compose -f .armada/dev.yaml up -d --remove-orphans"
        );
    }

    #[tokio::test]
    async fn test_swarm_init_skipped_when_active() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let exec: Arc<dyn Executor> = Arc::new(
            RecordingExecutor::new("node1", Arc::clone(&log)).respond("LocalNodeState", "active"),
        );
        let node = DockerNode::new(exec);
        node.swarm_init("10.0.0.1").await.unwrap();

        let calls = log.lock().unwrap();
        assert_eq!(calls.len(), 1);
        assert!(calls[0].command.contains("docker info"));
    }

    #[tokio::test]
    async fn test_join_token_trimmed() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let exec: Arc<dyn Executor> = Arc::new(
            RecordingExecutor::new("node1", Arc::clone(&log))
                .respond("join-token", "SWMTKN-1-abc\n"),
        );
        let node = DockerNode::new(exec);
        assert_eq!(node.worker_join_token().await.unwrap(), "SWMTKN-1-abc");
    }
}
