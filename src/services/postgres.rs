//! PostgreSQL specialization

use crate::error::Result;
use crate::fleet::service::{RestartPolicy, ServiceSpec, ServiceVolume};
use std::sync::Arc;

const DEFAULT_IMAGE: &str = "postgres:16";
const DATA_DIR: &str = "/var/lib/postgresql/data";

/// Factory for a PostgreSQL service with a persistent data volume
#[derive(Debug, Clone)]
pub struct PostgresService {
    name: String,
    image: String,
    database: String,
    username: String,
    password: String,
    /// Publish 5432 on the host, for clusters with external clients
    published_port: Option<u16>,
}

impl PostgresService {
    pub fn new(name: &str, database: &str, username: &str, password: &str) -> Self {
        Self {
            name: name.to_string(),
            image: DEFAULT_IMAGE.to_string(),
            database: database.to_string(),
            username: username.to_string(),
            password: password.to_string(),
            published_port: None,
        }
    }

    pub fn image(mut self, image: &str) -> Self {
        self.image = image.to_string();
        self
    }

    pub fn publish(mut self, port: u16) -> Self {
        self.published_port = Some(port);
        self
    }

    pub fn build(self) -> Result<Arc<ServiceSpec>> {
        let mut builder = ServiceSpec::builder(&self.name, &self.image)
            .env("POSTGRES_DB", self.database.clone())
            .env("POSTGRES_USER", self.username.clone())
            .env("POSTGRES_PASSWORD", self.password.clone())
            .restart(RestartPolicy::Always)
            .volume(ServiceVolume::volume(&format!("{}-data", self.name), DATA_DIR));

        if let Some(port) = self.published_port {
            builder = builder.port(&format!("{}:5432/tcp", port))?;
        }

        Ok(builder.build())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_data_volume_and_env() {
        let db = PostgresService::new("db", "app", "app", "hunter2")
            .build()
            .unwrap();

        assert_eq!(db.environment["POSTGRES_DB"].flatten(), "app");
        assert_eq!(db.volumes.len(), 1);
        assert_eq!(db.volumes[0].source, "db-data");
        assert_eq!(db.volumes[0].target, DATA_DIR);
        assert!(db.ports.is_empty());
    }

    #[test]
    fn test_published_port() {
        let db = PostgresService::new("db", "app", "app", "hunter2")
            .publish(15432)
            .build()
            .unwrap();
        assert_eq!(db.ports[0].published, Some(15432));
        assert_eq!(db.ports[0].target, 5432);
    }
}
