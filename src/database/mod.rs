//! Tenant database connectivity
//!
//! This module provides the per-tenant connector registry, the backend
//! connector trait with its PostgreSQL and MySQL adapters, and the
//! configuration structures tenants are declared with.

pub mod adapters;
pub mod config;
pub mod connection;
pub mod connector;
pub mod registry;
pub mod status;

// Re-export main types for convenience
pub use adapters::{MySqlConnection, MySqlConnector, PostgresConnection, PostgresConnector};
pub use config::{
    EngineConfig, MySqlConfig, PoolSettings, PostgresConfig, TenantConfig, TenantGroup,
    TenantSource,
};
pub use connection::{ConnectionHandle, DatabaseConnection, ResolvedConnection};
pub use connector::BackendConnector;
pub use registry::{
    ConnectorRegistry, RegistryStats, RetiredGuard, TenantState, DEFAULT_TENANT,
};
pub use status::ConnectionStatus;
