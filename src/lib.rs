//! tenantdb - lazy, exactly-once database connections per tenant
//!
//! tenantdb resolves a tenant key to a live database connection for
//! multi-tenant services:
//! - one connection attempt per tenant, shared by every concurrent caller
//! - PostgreSQL and MySQL connectors on top of sqlx pools
//! - explicit refresh, close and health-check operations
//! - TOML configuration with environment overrides
//!
//! ```rust,no_run
//! use tenantdb::{ResolverConfig, TenantResolver};
//!
//! # async fn example() -> tenantdb::Result<()> {
//! let resolver = TenantResolver::from_config(ResolverConfig::load()?).await?;
//! let resolved = resolver.get_connector("acme").await;
//! println!("{}", resolved.status().message);
//! # Ok(())
//! # }
//! ```

// Enforce error handling best practices
#![cfg_attr(
    not(test),
    warn(
        clippy::unwrap_used,
        clippy::expect_used,
        clippy::panic,
        clippy::unimplemented,
        clippy::todo,
    )
)]
// Allow in tests
#![cfg_attr(test, allow(clippy::unwrap_used, clippy::expect_used,))]

pub mod config;
pub mod database;
pub mod error;
pub mod resolver;

// Re-export main types for public API
pub use config::{Environment, LifecycleMode, MissingTenantPolicy, ResolverConfig};
pub use database::{
    BackendConnector, ConnectionHandle, ConnectionStatus, ConnectorRegistry, DatabaseConnection,
    EngineConfig, MySqlConfig, MySqlConnector, PostgresConfig, PostgresConnector,
    ResolvedConnection, TenantConfig, TenantSource, TenantState, DEFAULT_TENANT,
};
pub use error::{Error, Result};
pub use resolver::{HealthReport, HealthStatus, TenantResolver};

/// Prelude module for common imports
pub mod prelude {
    pub use crate::*;
    pub use async_trait::async_trait;
    pub use std::sync::Arc;
}
