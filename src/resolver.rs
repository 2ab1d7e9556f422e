//! Tenant resolver facade
//!
//! `TenantResolver` is the entry point applications use. It layers the
//! add/update/remove/get/refresh/close operations over a
//! [`ConnectorRegistry`] and applies the configured missing-tenant policy
//! and lifecycle mode.
//!
//! ```rust,no_run
//! use tenantdb::{PostgresConfig, TenantResolver};
//! use tenantdb::database::config::MultiTenantPostgresConfig;
//!
//! # async fn example() {
//! let resolver = TenantResolver::new();
//! resolver
//!     .add_postgres_connectors(vec![MultiTenantPostgresConfig {
//!         key: "acme".to_string(),
//!         config: PostgresConfig::new("pg.internal", 5432, "app", "secret", "acme"),
//!     }])
//!     .await;
//!
//! let resolved = resolver.get_connector("acme").await;
//! if let Some(handle) = resolved.handle() {
//!     let _ = handle.ping().await;
//! }
//! # }
//! ```

use crate::config::{LifecycleMode, MissingTenantPolicy, ResolverConfig};
use crate::database::config::{
    count_by_engine, EngineConfig, MultiTenantMySqlConfig, MultiTenantPostgresConfig,
    TenantSource,
};
use crate::database::connection::{ConnectionHandle, ResolvedConnection};
use crate::database::connector::BackendConnector;
use crate::database::registry::{ConnectorRegistry, DEFAULT_TENANT};
use crate::database::status::ConnectionStatus;
use crate::error::{Error, Result};
use futures::future::join_all;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::sync::Arc;

/// Facade resolving tenant keys to live database connections
#[derive(Clone)]
pub struct TenantResolver {
    registry: ConnectorRegistry,
    on_missing_tenant: MissingTenantPolicy,
    /// Connector provisioned for unknown tenants when no default tenant exists
    fallback: Arc<dyn BackendConnector>,
}

impl TenantResolver {
    /// Create a resolver with the default policies
    pub fn new() -> Self {
        Self::with_options(MissingTenantPolicy::default(), LifecycleMode::default())
    }

    /// Create a resolver with explicit policies
    pub fn with_options(on_missing_tenant: MissingTenantPolicy, lifecycle: LifecycleMode) -> Self {
        Self {
            registry: ConnectorRegistry::with_lifecycle(lifecycle),
            on_missing_tenant,
            fallback: EngineConfig::default().into_connector(),
        }
    }

    /// Replace the fallback connector used by [`MissingTenantPolicy::UseDefault`]
    pub fn with_fallback_connector(mut self, connector: Arc<dyn BackendConnector>) -> Self {
        self.fallback = connector;
        self
    }

    /// Replace the fallback configuration used by [`MissingTenantPolicy::UseDefault`]
    pub fn with_fallback_config(self, config: EngineConfig) -> Self {
        self.with_fallback_connector(config.into_connector())
    }

    /// Build a resolver from configuration and register every declared tenant
    pub async fn from_config(config: ResolverConfig) -> Result<Self> {
        config.validate()?;

        let resolver = Self::with_options(config.on_missing_tenant, config.lifecycle)
            .with_fallback_config(config.fallback.clone());
        let registered = resolver.add_connectors_from_config(config.sources()).await;

        log::info!(
            "Tenant resolver ready: {} tenant(s) registered, policy {:?}, lifecycle {:?}",
            registered,
            config.on_missing_tenant,
            config.lifecycle
        );
        Ok(resolver)
    }

    /// Underlying registry, for inspection
    pub fn registry(&self) -> &ConnectorRegistry {
        &self.registry
    }

    pub fn missing_tenant_policy(&self) -> MissingTenantPolicy {
        self.on_missing_tenant
    }

    pub fn lifecycle(&self) -> LifecycleMode {
        self.registry.lifecycle()
    }

    /// Register a connector for a tenant, replacing any previous one
    pub async fn add_connector(
        &self,
        key: impl Into<String>,
        connector: Arc<dyn BackendConnector>,
    ) {
        if let Some(retired) = self.registry.register(key, connector).await {
            self.registry.release(retired).await;
        }
    }

    /// Register several connectors under one tenant; the last one wins
    pub async fn add_connectors<I>(&self, key: impl Into<String>, connectors: I)
    where
        I: IntoIterator<Item = Arc<dyn BackendConnector>>,
    {
        if let Some(retired) = self.registry.register_batch(key, connectors).await {
            self.registry.release(retired).await;
        }
    }

    /// Register one PostgreSQL connector per configuration
    pub async fn add_postgres_connectors<I>(&self, configs: I)
    where
        I: IntoIterator<Item = MultiTenantPostgresConfig>,
    {
        for config in configs {
            self.add_connector(config.key, EngineConfig::from(config.config).into_connector())
                .await;
        }
    }

    /// Register one MySQL connector per configuration
    pub async fn add_mysql_connectors<I>(&self, configs: I)
    where
        I: IntoIterator<Item = MultiTenantMySqlConfig>,
    {
        for config in configs {
            self.add_connector(config.key, EngineConfig::from(config.config).into_connector())
                .await;
        }
    }

    /// Register every tenant found in a set of configuration sources
    ///
    /// Sources may mix single tenants, flat lists and named clusters.
    /// Returns the number of connectors registered.
    pub async fn add_connectors_from_config<I, S>(&self, sources: I) -> usize
    where
        I: IntoIterator<Item = S>,
        S: Into<TenantSource>,
    {
        let tenants: Vec<_> = sources
            .into_iter()
            .flat_map(|source| source.into().flatten())
            .collect();

        for (engine, count) in count_by_engine(&tenants) {
            log::debug!("Registering {} {} tenant(s) from configuration", count, engine);
        }

        let count = tenants.len();
        for tenant in tenants {
            self.add_connector(tenant.key, tenant.engine.into_connector()).await;
        }
        count
    }

    /// Replace a tenant's connector
    ///
    /// In strict lifecycle mode the displaced connection is closed.
    pub async fn update_connector(
        &self,
        key: impl Into<String>,
        connector: Arc<dyn BackendConnector>,
    ) {
        let key = key.into();
        log::debug!("Updating connector for tenant {}", key);
        self.add_connector(key, connector).await;
    }

    /// Remove a tenant, closing its cached connection
    ///
    /// Returns false if the tenant was not registered.
    pub async fn remove_connector(&self, key: &str) -> bool {
        self.registry.unregister(key).await
    }

    /// Resolve a tenant's connection, connecting on first use
    ///
    /// Failures never escalate: inspect the returned status.
    pub async fn get_connector(&self, key: &str) -> ResolvedConnection {
        if self.on_missing_tenant == MissingTenantPolicy::UseDefault {
            self.provision_default(key).await;
        }
        self.registry.resolve(key).await
    }

    async fn provision_default(&self, key: &str) {
        if self.registry.contains(key).await {
            return;
        }

        let connector = match self.registry.info(DEFAULT_TENANT).await {
            Some(connector) => connector,
            None => Arc::clone(&self.fallback),
        };

        if self.registry.register_if_absent(key, connector).await {
            log::warn!(
                "No connector found for tenant {}; using the default configuration",
                key
            );
        }
    }

    /// Resolve the default tenant
    pub async fn get_default_connector(&self) -> ResolvedConnection {
        self.get_connector(DEFAULT_TENANT).await
    }

    /// Register the default tenant's connector
    pub async fn set_default_connector(&self, connector: Arc<dyn BackendConnector>) {
        self.add_connector(DEFAULT_TENANT, connector).await;
    }

    /// Look up a tenant's connector without connecting
    pub async fn get_connector_info(&self, key: &str) -> Option<Arc<dyn BackendConnector>> {
        self.registry.info(key).await
    }

    /// Reset a tenant's guard so the next lookup reconnects
    ///
    /// Returns false if the tenant was not registered.
    pub async fn refresh_connector(&self, key: &str) -> bool {
        match self.registry.refresh(key).await {
            Some(retired) => {
                self.registry.release(retired).await;
                true
            }
            None => false,
        }
    }

    /// Close one tenant's cached connection
    pub async fn close_connection(&self, key: &str) -> bool {
        self.registry.close(key).await
    }

    /// Close every cached connection; returns how many were live
    pub async fn close_all_connections(&self) -> usize {
        self.registry.close_all().await
    }

    /// Close every connection and remove every connector
    pub async fn clear_all_connectors(&self) -> usize {
        self.registry.clear().await
    }

    /// Check every registered connector and report which ones connect
    pub async fn health_check(&self) -> HashMap<String, bool> {
        self.health_report().await.summary()
    }

    /// Check every registered connector concurrently
    ///
    /// Each check opens a fresh connection through the connector, independent
    /// of the cached one, and closes it before returning.
    pub async fn health_report(&self) -> HealthReport {
        let connectors = self.registry.snapshot().await;

        let checks = connectors.into_iter().map(|(tenant, connector)| async move {
            let (handle, status) = connector.connect().await.into_parts();
            if let Some(handle) = handle {
                handle.close().await;
            }
            (tenant, status)
        });

        let tenants: BTreeMap<String, ConnectionStatus> =
            join_all(checks).await.into_iter().collect();
        HealthReport::new(tenants)
    }

    /// Run `f` with a tenant's connection, then close it
    ///
    /// The tenant's connection is closed whether `f` succeeds or fails. If
    /// the tenant cannot be resolved `f` is not called.
    pub async fn with_connection<F, Fut, T>(&self, key: &str, f: F) -> Result<T>
    where
        F: FnOnce(ConnectionHandle) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let resolved = self.get_connector(key).await;

        let result = match resolved.handle() {
            Some(handle) => f(Arc::clone(handle)).await,
            None if resolved.status().is_missing_tenant() => Err(Error::tenant_not_found(key)),
            None => Err(Error::tenant_unavailable(
                key,
                resolved.status().message.clone(),
            )),
        };

        self.close_connection(key).await;
        result
    }
}

impl Default for TenantResolver {
    fn default() -> Self {
        Self::new()
    }
}

/// Overall outcome of a health check
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    /// Every tenant connected (or no tenants are registered)
    Healthy,
    /// Some tenants connected
    Degraded,
    /// No tenant connected
    Unhealthy,
}

/// Result of checking every registered tenant
#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    pub status: HealthStatus,
    /// RFC 3339 time the check finished
    pub timestamp: String,
    pub tenants: BTreeMap<String, ConnectionStatus>,
}

impl HealthReport {
    fn new(tenants: BTreeMap<String, ConnectionStatus>) -> Self {
        let connected = tenants.values().filter(|status| status.connected).count();
        let status = if connected == tenants.len() {
            HealthStatus::Healthy
        } else if connected == 0 {
            HealthStatus::Unhealthy
        } else {
            HealthStatus::Degraded
        };

        Self {
            status,
            timestamp: chrono::Utc::now().to_rfc3339(),
            tenants,
        }
    }

    pub fn is_healthy(&self) -> bool {
        self.status == HealthStatus::Healthy
    }

    /// Tenant key to connected flag
    pub fn summary(&self) -> HashMap<String, bool> {
        self.tenants
            .iter()
            .map(|(tenant, status)| (tenant.clone(), status.connected))
            .collect()
    }

    /// Render the report as JSON
    pub fn to_json(&self) -> Result<serde_json::Value> {
        Ok(serde_json::to_value(self)?)
    }

    /// Tenants whose check failed, sorted
    pub fn failing(&self) -> Vec<&str> {
        self.tenants
            .iter()
            .filter(|(_, status)| !status.connected)
            .map(|(tenant, _)| tenant.as_str())
            .collect()
    }
}
