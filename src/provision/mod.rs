//! First-time node hardening primitives
//!
//! Thin one-command wrappers over the remote executor, run strictly in
//! sequence by `setup`: package update, authorized-key install,
//! password-auth disablement, firewall allow-list, runner account creation.

use crate::endpoint::Endpoint;
use crate::error::Result;
use crate::remote::executor::sh_quote;
use crate::remote::Executor;
use std::sync::Arc;

/// Refresh and upgrade system packages
pub async fn update_packages(executor: &Arc<dyn Executor>) -> Result<()> {
    tracing::info!(host = %executor.host(), "updating packages");
    executor
        .exec("sudo DEBIAN_FRONTEND=noninteractive apt-get update -q && sudo DEBIAN_FRONTEND=noninteractive apt-get upgrade -yq")
        .await?;
    Ok(())
}

/// Append a public key to the current user's authorized_keys
pub async fn install_authorized_key(executor: &Arc<dyn Executor>, public_key: &str) -> Result<()> {
    let key = sh_quote(public_key.trim());
    executor
        .exec(&format!(
            "mkdir -p ~/.ssh && chmod 700 ~/.ssh && grep -qxF {key} ~/.ssh/authorized_keys 2>/dev/null || printf '%s\\n' {key} >> ~/.ssh/authorized_keys && chmod 600 ~/.ssh/authorized_keys",
        ))
        .await?;
    Ok(())
}

/// Turn off SSH password authentication
pub async fn disable_password_auth(executor: &Arc<dyn Executor>) -> Result<()> {
    executor
        .exec("sudo sed -i 's/^#\\?PasswordAuthentication.*/PasswordAuthentication no/' /etc/ssh/sshd_config && sudo systemctl reload ssh")
        .await?;
    Ok(())
}

/// Allow the given endpoints through the firewall and enable it
pub async fn configure_firewall(
    executor: &Arc<dyn Executor>,
    endpoints: &[Endpoint],
) -> Result<()> {
    for endpoint in endpoints {
        executor
            .exec(&format!("sudo ufw allow {}", endpoint.rule()))
            .await?;
    }
    executor.exec("sudo ufw --force enable").await?;
    Ok(())
}

/// Create a login account with the given public key installed
pub async fn create_user(
    executor: &Arc<dyn Executor>,
    username: &str,
    public_key: Option<&str>,
) -> Result<()> {
    let user = sh_quote(username);
    executor
        .exec(&format!(
            "id -u {user} >/dev/null 2>&1 || sudo useradd -m -s /bin/bash {user}"
        ))
        .await?;

    if let Some(key) = public_key {
        let key = sh_quote(key.trim());
        executor
            .exec(&format!(
                "sudo -u {user} sh -c 'mkdir -p ~/.ssh && chmod 700 ~/.ssh && printf %s\\\\n {key} >> ~/.ssh/authorized_keys && chmod 600 ~/.ssh/authorized_keys'"
            ))
            .await?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::endpoint::well_known;
    use crate::remote::executor::testing::{RecordedCall, RecordingExecutor};
    use std::sync::Mutex;

    #[tokio::test]
    async fn test_firewall_rules_then_enable() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let exec: Arc<dyn Executor> =
            Arc::new(RecordingExecutor::new("node1", Arc::clone(&log)));

        let endpoints = vec![well_known::ssh(), well_known::https()];
        configure_firewall(&exec, &endpoints).await.unwrap();

        let calls: Vec<RecordedCall> = log.lock().unwrap().clone();
        assert_eq!(calls[0].command, "sudo ufw allow 22/tcp");
        assert_eq!(calls[1].command, "sudo ufw allow 443/tcp");
        assert_eq!(calls[2].command, "sudo ufw --force enable");
    }
}
