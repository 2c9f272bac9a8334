//! Ready-made service specializations
//!
//! Thin factories over `ServiceBuilder` for the services most clusters
//! carry. Each one only contributes labels, ports, volumes, and roles; the
//! compiler treats the result like any other `ServiceSpec`.

pub mod postgres;
pub mod redis;
pub mod traefik;
pub mod web;

pub use postgres::PostgresService;
pub use redis::RedisService;
pub use traefik::TraefikService;
pub use web::WebService;
