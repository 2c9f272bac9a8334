//! Credentialed cluster actors

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// A credentialed identity used to provision and deploy onto nodes
///
/// Users are cloned per role (admin vs. runner) via the `with_*` overrides,
/// never mutated in place.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterUser {
    /// Login name
    pub username: String,
    /// Password, when password auth or sudo needs one
    #[serde(default)]
    pub password: Option<String>,
    /// Private key used for SSH auth
    #[serde(default)]
    pub private_key_path: Option<PathBuf>,
    /// Public key installed into authorized_keys during setup
    #[serde(default)]
    pub public_key_path: Option<PathBuf>,
}

impl ClusterUser {
    pub fn new(username: &str) -> Self {
        Self {
            username: username.to_string(),
            password: None,
            private_key_path: default_key_path(false),
            public_key_path: default_key_path(true),
        }
    }

    /// Same credentials under a different login name
    pub fn with_username(&self, username: &str) -> Self {
        Self {
            username: username.to_string(),
            ..self.clone()
        }
    }

    pub fn with_password(mut self, password: &str) -> Self {
        self.password = Some(password.to_string());
        self
    }

    pub fn with_private_key(mut self, path: PathBuf) -> Self {
        self.private_key_path = Some(path);
        self
    }

    pub fn with_public_key(mut self, path: PathBuf) -> Self {
        self.public_key_path = Some(path);
        self
    }
}

fn default_key_path(public: bool) -> Option<PathBuf> {
    let home = std::env::var_os("HOME")?;
    let name = if public { "id_rsa.pub" } else { "id_rsa" };
    Some(PathBuf::from(home).join(".ssh").join(name))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_with_username_keeps_keys() {
        let admin = ClusterUser::new("admin").with_private_key(PathBuf::from("/keys/deploy"));
        let runner = admin.with_username("runner");

        assert_eq!(runner.username, "runner");
        assert_eq!(runner.private_key_path, Some(PathBuf::from("/keys/deploy")));
        // the original is untouched
        assert_eq!(admin.username, "admin");
    }
}
