//! Redis specialization

use crate::error::Result;
use crate::fleet::service::{RestartPolicy, ServiceSpec, ServiceVolume};
use std::sync::Arc;

const DEFAULT_IMAGE: &str = "redis:7";

/// Factory for a Redis service, append-only persistence optional
#[derive(Debug, Clone)]
pub struct RedisService {
    name: String,
    image: String,
    persistent: bool,
}

impl RedisService {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            image: DEFAULT_IMAGE.to_string(),
            persistent: false,
        }
    }

    pub fn image(mut self, image: &str) -> Self {
        self.image = image.to_string();
        self
    }

    pub fn persistent(mut self) -> Self {
        self.persistent = true;
        self
    }

    pub fn build(self) -> Result<Arc<ServiceSpec>> {
        let mut builder = ServiceSpec::builder(&self.name, &self.image)
            .restart(RestartPolicy::Always);

        if self.persistent {
            builder = builder
                .command(
                    ["redis-server", "--appendonly", "yes"]
                        .map(String::from)
                        .to_vec(),
                )
                .volume(ServiceVolume::volume(&format!("{}-data", self.name), "/data"));
        }

        Ok(builder.build())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ephemeral_by_default() {
        let cache = RedisService::new("cache").build().unwrap();
        assert!(cache.volumes.is_empty());
        assert!(cache.command.is_none());
    }

    #[test]
    fn test_persistence_enables_aof() {
        let cache = RedisService::new("cache").persistent().build().unwrap();
        assert_eq!(cache.volumes[0].source, "cache-data");
        assert_eq!(
            cache.command.as_deref().unwrap(),
            ["redis-server", "--appendonly", "yes"]
        );
    }
}
