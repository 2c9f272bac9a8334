//! SSH-backed remote executor

use crate::error::{ArmadaError, Result};
use async_trait::async_trait;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::process::Command;

/// Captured output of a remote command
#[derive(Debug, Clone, Default)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
    pub code: i32,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.code == 0
    }

    /// Trimmed stdout, convenient for single-line results (tokens, paths)
    pub fn line(&self) -> String {
        self.stdout.trim().to_string()
    }
}

/// Remote execution capability required by the rollout orchestrator
#[async_trait]
pub trait Executor: Send + Sync {
    /// Host this executor targets
    fn host(&self) -> &str;

    /// Run a shell command, failing on non-zero exit
    async fn exec(&self, command: &str) -> Result<CommandOutput>;

    /// Upload file content to a remote path
    async fn put_file(&self, content: &[u8], remote_path: &str) -> Result<()>;

    /// Re-scope to another local user on the same host (via sudo)
    fn scoped(&self, user: &str) -> Arc<dyn Executor>;
}

/// Quote a string for a POSIX shell
///
/// Single-quote wrapping with embedded quotes escaped; safe for arbitrary
/// command arguments passed through `ssh`.
pub fn sh_quote(value: &str) -> String {
    if !value.is_empty()
        && value
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "._-/:=@".contains(c))
    {
        return value.to_string();
    }
    format!("'{}'", value.replace('\'', r"'\''"))
}

/// Executor shelling out to the local `ssh`/`scp` binaries
#[derive(Debug, Clone)]
pub struct SshExecutor {
    host: String,
    username: String,
    port: u16,
    identity_file: Option<PathBuf>,
    /// Remote user to run commands as (sudo -u), when different from the
    /// SSH login user
    run_as: Option<String>,
}

impl SshExecutor {
    pub fn new(host: &str, username: &str) -> Self {
        Self {
            host: host.to_string(),
            username: username.to_string(),
            port: 22,
            identity_file: None,
            run_as: None,
        }
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn with_identity_file(mut self, path: PathBuf) -> Self {
        self.identity_file = Some(path);
        self
    }

    fn common_args(&self) -> Vec<String> {
        let mut args = vec![
            "-o".to_string(),
            "BatchMode=yes".to_string(),
            "-o".to_string(),
            "StrictHostKeyChecking=accept-new".to_string(),
        ];
        if let Some(ref identity) = self.identity_file {
            args.push("-i".to_string());
            args.push(identity.display().to_string());
        }
        args
    }

    fn destination(&self) -> String {
        format!("{}@{}", self.username, self.host)
    }

    /// Wrap the command for the effective remote user.
    ///
    /// sudo keeps the login user's working directory, so relative paths
    /// must be re-anchored in the effective user's home.
    fn remote_command(&self, command: &str) -> String {
        match self.run_as {
            Some(ref user) => format!(
                "sudo -H -u {} sh -c {}",
                user,
                sh_quote(&format!("cd \"$HOME\" && {}", command))
            ),
            None => command.to_string(),
        }
    }
}

#[async_trait]
impl Executor for SshExecutor {
    fn host(&self) -> &str {
        &self.host
    }

    async fn exec(&self, command: &str) -> Result<CommandOutput> {
        let remote = self.remote_command(command);
        tracing::debug!(host = %self.host, command = %remote, "executing remote command");

        let mut cmd = Command::new("ssh");
        cmd.args(self.common_args());
        cmd.arg("-p").arg(self.port.to_string());
        cmd.arg(self.destination());
        cmd.arg("--").arg(&remote);

        let output = cmd.output().await?;
        let result = CommandOutput {
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
            code: output.status.code().unwrap_or(-1),
        };

        if !result.success() {
            return Err(ArmadaError::RemoteCommand {
                command: remote,
                code: result.code,
                stdout: result.stdout,
                stderr: result.stderr,
            });
        }

        Ok(result)
    }

    async fn put_file(&self, content: &[u8], remote_path: &str) -> Result<()> {
        let local = std::env::temp_dir().join(format!("armada-{}", uuid::Uuid::new_v4()));
        tokio::fs::write(&local, content).await?;

        // Uploads always land in the login user's session first; a scoped
        // executor then moves them into the effective user's ownership.
        let staging = format!("armada-upload-{}", uuid::Uuid::new_v4());

        let mut cmd = Command::new("scp");
        cmd.args(self.common_args());
        cmd.arg("-P").arg(self.port.to_string());
        cmd.arg(&local);
        cmd.arg(format!("{}:{}", self.destination(), staging));

        let output = cmd.output().await;
        let _ = tokio::fs::remove_file(&local).await;
        let output = output?;

        if !output.status.success() {
            return Err(ArmadaError::RemoteCommand {
                command: format!("scp {}", remote_path),
                code: output.status.code().unwrap_or(-1),
                stdout: String::from_utf8_lossy(&output.stdout).to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).to_string(),
            });
        }

        let mut login = self.clone();
        login.run_as = None;
        match self.run_as {
            Some(ref user) => {
                // relative destinations resolve in the effective user's home
                let dest = if remote_path.starts_with('/') {
                    remote_path.to_string()
                } else {
                    let home = login
                        .exec(&format!("getent passwd {} | cut -d: -f6", sh_quote(user)))
                        .await?
                        .line();
                    format!("{}/{}", home, remote_path)
                };
                login
                    .exec(&format!(
                        "sudo mv {} {} && sudo chown {} {}",
                        sh_quote(&staging),
                        sh_quote(&dest),
                        sh_quote(user),
                        sh_quote(&dest)
                    ))
                    .await?;
            }
            None => {
                login
                    .exec(&format!(
                        "mv {} {}",
                        sh_quote(&staging),
                        sh_quote(remote_path)
                    ))
                    .await?;
            }
        }

        Ok(())
    }

    fn scoped(&self, user: &str) -> Arc<dyn Executor> {
        let mut scoped = self.clone();
        scoped.run_as = Some(user.to_string());
        Arc::new(scoped)
    }
}

#[cfg(test)]
pub mod testing {
    //! Recording executor used by rollout tests

    use super::*;
    use std::sync::Mutex;

    /// One observed call, in global invocation order
    #[derive(Debug, Clone, PartialEq, Eq)]
    pub struct RecordedCall {
        pub host: String,
        pub command: String,
    }

    /// Executor that records commands instead of running them
    pub struct RecordingExecutor {
        host: String,
        log: Arc<Mutex<Vec<RecordedCall>>>,
        /// Commands containing this substring fail
        fail_on: Option<String>,
        /// Canned stdout keyed by command substring
        responses: Vec<(String, String)>,
    }

    impl RecordingExecutor {
        pub fn new(host: &str, log: Arc<Mutex<Vec<RecordedCall>>>) -> Self {
            Self {
                host: host.to_string(),
                log,
                fail_on: None,
                responses: Vec::new(),
            }
        }

        pub fn fail_on(mut self, needle: &str) -> Self {
            self.fail_on = Some(needle.to_string());
            self
        }

        pub fn respond(mut self, needle: &str, stdout: &str) -> Self {
            self.responses.push((needle.to_string(), stdout.to_string()));
            self
        }
    }

    #[async_trait]
    impl Executor for RecordingExecutor {
        fn host(&self) -> &str {
            &self.host
        }

        async fn exec(&self, command: &str) -> Result<CommandOutput> {
            self.log.lock().unwrap().push(RecordedCall {
                host: self.host.clone(),
                command: command.to_string(),
            });

            if let Some(ref needle) = self.fail_on {
                if command.contains(needle.as_str()) {
                    return Err(ArmadaError::RemoteCommand {
                        command: command.to_string(),
                        code: 1,
                        stdout: String::new(),
                        stderr: "injected failure".to_string(),
                    });
                }
            }

            let stdout = self
                .responses
                .iter()
                .find(|(needle, _)| command.contains(needle.as_str()))
                .map(|(_, out)| out.clone())
                .unwrap_or_default();

            Ok(CommandOutput {
                stdout,
                stderr: String::new(),
                code: 0,
            })
        }

        async fn put_file(&self, _content: &[u8], remote_path: &str) -> Result<()> {
            self.log.lock().unwrap().push(RecordedCall {
                host: self.host.clone(),
                command: format!("put_file {}", remote_path),
            });
            Ok(())
        }

        fn scoped(&self, _user: &str) -> Arc<dyn Executor> {
            Arc::new(Self {
                host: self.host.clone(),
                log: Arc::clone(&self.log),
                fail_on: self.fail_on.clone(),
                responses: self.responses.clone(),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sh_quote_passthrough() {
        assert_eq!(sh_quote("docker"), "docker");
        assert_eq!(sh_quote("/var/lib/armada"), "/var/lib/armada");
    }

    #[test]
    fn test_sh_quote_wraps_specials() {
        assert_eq!(sh_quote("a b"), "'a b'");
        assert_eq!(sh_quote("it's"), r"'it'\''s'");
        assert_eq!(sh_quote(""), "''");
    }

    #[test]
    fn test_scoped_wraps_with_sudo() {
        let exec = SshExecutor::new("node1", "admin");
        let cmd = exec.remote_command("docker ps");
        assert_eq!(cmd, "docker ps");

        let mut scoped = exec.clone();
        scoped.run_as = Some("runner".to_string());
        let cmd = scoped.remote_command("docker ps");
        assert_eq!(cmd, r#"sudo -H -u runner sh -c 'cd "$HOME" && docker ps'"#);
    }
}
