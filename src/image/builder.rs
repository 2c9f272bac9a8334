//! Local image building via the Docker CLI

use super::registry::Registry;
use crate::error::{ArmadaError, Result};
use std::collections::BTreeMap;
use std::path::PathBuf;
use tokio::process::Command;

/// Options for a single build invocation
#[derive(Debug, Clone, Default)]
pub struct BuildOptions {
    /// Build context directory
    pub context: PathBuf,
    /// Push the produced tags after building
    pub push: bool,
    /// Labels stamped onto the image
    pub labels: BTreeMap<String, String>,
}

/// Builds images by shelling out to `docker build`
///
/// Abstracts the image-construction step; the compiler does not know how
/// images are produced beyond this contract.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ImageBuilder {
    /// Dockerfile name inside the context, when not the default
    pub dockerfile: Option<String>,
    /// Build arguments
    pub build_args: BTreeMap<String, String>,
    /// Target platform, e.g. "linux/amd64"
    pub platform: Option<String>,
    /// Tags to produce; defaults to ["latest"]
    pub tags: Vec<String>,
}

impl ImageBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn dockerfile(mut self, name: &str) -> Self {
        self.dockerfile = Some(name.to_string());
        self
    }

    pub fn build_arg(mut self, key: &str, value: &str) -> Self {
        self.build_args.insert(key.to_string(), value.to_string());
        self
    }

    pub fn platform(mut self, platform: &str) -> Self {
        self.platform = Some(platform.to_string());
        self
    }

    pub fn tag(mut self, tag: &str) -> Self {
        self.tags.push(tag.to_string());
        self
    }

    fn effective_tags(&self) -> Vec<String> {
        if self.tags.is_empty() {
            vec!["latest".to_string()]
        } else {
            self.tags.clone()
        }
    }

    /// Build `image` from the context, tagging against `registry` when one
    /// is given, and return the produced tags.
    pub async fn build(
        &self,
        image: &str,
        registry: Option<&Registry>,
        options: &BuildOptions,
    ) -> Result<Vec<String>> {
        let tags = self.effective_tags();
        tracing::info!(image, context = %options.context.display(), "building image");

        let mut cmd = Command::new("docker");
        cmd.arg("build");

        if let Some(ref dockerfile) = self.dockerfile {
            cmd.arg("-f").arg(options.context.join(dockerfile));
        }
        if let Some(ref platform) = self.platform {
            cmd.arg("--platform").arg(platform);
        }
        for (key, value) in &self.build_args {
            cmd.arg("--build-arg").arg(format!("{}={}", key, value));
        }
        for (key, value) in &options.labels {
            cmd.arg("--label").arg(format!("{}={}", key, value));
        }
        for tag in &tags {
            let name = match registry {
                Some(registry) => registry.uri(image, tag),
                None => format!("{}:{}", image, tag),
            };
            cmd.arg("-t").arg(name);
        }
        cmd.arg(&options.context);

        let output = cmd.output().await?;
        if !output.status.success() {
            return Err(ArmadaError::Build(format!(
                "docker build {} failed: {}",
                image,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }

        if options.push {
            let registry = registry.ok_or_else(|| {
                ArmadaError::Build(format!("cannot push {}: no registry configured", image))
            })?;
            registry.login_local().await?;
            registry.push(image, &tags).await?;
        }

        Ok(tags)
    }
}
