//! Engine and tenant configuration structures
//!
//! This module describes how a tenant's connector is configured: the
//! engine-specific connection settings, the tenant key they belong to, and
//! the shapes in which tenant configuration arrives (single tenant, flat
//! list, named clusters of lists).

use crate::database::adapters::{MySqlConnector, PostgresConnector};
use crate::database::connector::BackendConnector;
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Host used by the process-wide fallback configuration
pub const DEFAULT_HOST: &str = "127.0.0.1";
/// User used by the process-wide fallback configuration
pub const DEFAULT_USER: &str = "default-db-user";
/// Password used by the process-wide fallback configuration
pub const DEFAULT_PASSWORD: &str = "default-db-password";
/// Database name used by the process-wide fallback configuration
pub const DEFAULT_DATABASE: &str = "default-db-name";
/// Default PostgreSQL port
pub const DEFAULT_POSTGRES_PORT: u16 = 5432;
/// Default MySQL port
pub const DEFAULT_MYSQL_PORT: u16 = 3306;

/// Pool settings handed straight to the driver
///
/// tenantdb never manages pool sizes or idle eviction itself; these values
/// are passed through to the sqlx pool options.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolSettings {
    /// Maximum number of connections in the pool
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,

    /// Minimum number of connections to maintain
    #[serde(default)]
    pub min_connections: u32,

    /// Connection timeout in seconds
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout: u64,

    /// Idle timeout in seconds (0 disables it)
    #[serde(default = "default_idle_timeout")]
    pub idle_timeout: u64,

    /// Maximum lifetime of a connection in seconds (0 disables it)
    #[serde(default = "default_max_lifetime")]
    pub max_lifetime: u64,
}

impl PoolSettings {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout)
    }

    pub fn idle_timeout(&self) -> Option<Duration> {
        (self.idle_timeout > 0).then(|| Duration::from_secs(self.idle_timeout))
    }

    pub fn max_lifetime(&self) -> Option<Duration> {
        (self.max_lifetime > 0).then(|| Duration::from_secs(self.max_lifetime))
    }

    fn validate(&self) -> Result<()> {
        if self.max_connections == 0 {
            return Err(Error::config("max_connections must be at least 1"));
        }
        if self.min_connections > self.max_connections {
            return Err(Error::config(format!(
                "min_connections ({}) exceeds max_connections ({})",
                self.min_connections, self.max_connections
            )));
        }
        Ok(())
    }
}

impl Default for PoolSettings {
    fn default() -> Self {
        Self {
            max_connections: default_max_connections(),
            min_connections: 0,
            connect_timeout: default_connect_timeout(),
            idle_timeout: default_idle_timeout(),
            max_lifetime: default_max_lifetime(),
        }
    }
}

/// PostgreSQL connection settings
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PostgresConfig {
    /// Disabled configs resolve to a failure without touching the network
    pub enabled: bool,
    /// Log every statement at debug level and mark statuses as debug
    pub debug_mode: bool,
    pub host: String,
    pub port: u16,
    pub user: String,
    #[serde(skip_serializing)]
    pub password: String,
    pub database: String,
    /// `disable`, `allow`, `prefer`, `require`, `verify-ca` or `verify-full`
    pub ssl_mode: String,
    pub application_name: Option<String>,
    #[serde(flatten)]
    pub pool: PoolSettings,
}

impl Default for PostgresConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            debug_mode: false,
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_POSTGRES_PORT,
            user: DEFAULT_USER.to_string(),
            password: DEFAULT_PASSWORD.to_string(),
            database: DEFAULT_DATABASE.to_string(),
            ssl_mode: "prefer".to_string(),
            application_name: None,
            pool: PoolSettings::default(),
        }
    }
}

impl PostgresConfig {
    pub fn new(
        host: impl Into<String>,
        port: u16,
        user: impl Into<String>,
        password: impl Into<String>,
        database: impl Into<String>,
    ) -> Self {
        Self {
            host: host.into(),
            port,
            user: user.into(),
            password: password.into(),
            database: database.into(),
            ..Self::default()
        }
    }

    /// Connection URL with the password masked, for logs
    pub fn redacted_dsn(&self) -> String {
        redacted_dsn("postgres", &self.host, self.port, &self.user, &self.database)
    }

    pub fn validate(&self) -> Result<()> {
        validate_endpoint(&self.host, self.port)?;
        self.pool.validate()
    }
}

impl fmt::Debug for PostgresConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PostgresConfig")
            .field("enabled", &self.enabled)
            .field("debug_mode", &self.debug_mode)
            .field("dsn", &self.redacted_dsn())
            .field("ssl_mode", &self.ssl_mode)
            .field("application_name", &self.application_name)
            .field("pool", &self.pool)
            .finish()
    }
}

/// MySQL connection settings
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MySqlConfig {
    /// Disabled configs resolve to a failure without touching the network
    pub enabled: bool,
    /// Log every statement at debug level and mark statuses as debug
    pub debug_mode: bool,
    pub host: String,
    pub port: u16,
    pub user: String,
    #[serde(skip_serializing)]
    pub password: String,
    pub database: String,
    pub charset: String,
    /// `disabled`, `preferred`, `required`, `verify_ca` or `verify_identity`
    pub ssl_mode: String,
    #[serde(flatten)]
    pub pool: PoolSettings,
}

impl Default for MySqlConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            debug_mode: false,
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_MYSQL_PORT,
            user: DEFAULT_USER.to_string(),
            password: DEFAULT_PASSWORD.to_string(),
            database: DEFAULT_DATABASE.to_string(),
            charset: "utf8mb4".to_string(),
            ssl_mode: "preferred".to_string(),
            pool: PoolSettings::default(),
        }
    }
}

impl MySqlConfig {
    pub fn new(
        host: impl Into<String>,
        port: u16,
        user: impl Into<String>,
        password: impl Into<String>,
        database: impl Into<String>,
    ) -> Self {
        Self {
            host: host.into(),
            port,
            user: user.into(),
            password: password.into(),
            database: database.into(),
            ..Self::default()
        }
    }

    /// Connection URL with the password masked, for logs
    pub fn redacted_dsn(&self) -> String {
        redacted_dsn("mysql", &self.host, self.port, &self.user, &self.database)
    }

    pub fn validate(&self) -> Result<()> {
        validate_endpoint(&self.host, self.port)?;
        self.pool.validate()
    }
}

impl fmt::Debug for MySqlConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MySqlConfig")
            .field("enabled", &self.enabled)
            .field("debug_mode", &self.debug_mode)
            .field("dsn", &self.redacted_dsn())
            .field("charset", &self.charset)
            .field("ssl_mode", &self.ssl_mode)
            .field("pool", &self.pool)
            .finish()
    }
}

/// Engine-specific configuration, tagged by `engine`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "engine")]
pub enum EngineConfig {
    #[serde(rename = "postgres", alias = "postgresql")]
    Postgres(PostgresConfig),
    #[serde(rename = "mysql", alias = "mariadb")]
    MySql(MySqlConfig),
}

impl EngineConfig {
    pub fn engine(&self) -> &'static str {
        match self {
            EngineConfig::Postgres(_) => "postgres",
            EngineConfig::MySql(_) => "mysql",
        }
    }

    pub fn redacted_dsn(&self) -> String {
        match self {
            EngineConfig::Postgres(c) => c.redacted_dsn(),
            EngineConfig::MySql(c) => c.redacted_dsn(),
        }
    }

    pub fn validate(&self) -> Result<()> {
        match self {
            EngineConfig::Postgres(c) => c.validate(),
            EngineConfig::MySql(c) => c.validate(),
        }
    }

    /// Override host and port, keeping every other setting
    pub fn set_endpoint(&mut self, host: Option<String>, port: Option<u16>) {
        let (h, p) = match self {
            EngineConfig::Postgres(c) => (&mut c.host, &mut c.port),
            EngineConfig::MySql(c) => (&mut c.host, &mut c.port),
        };
        if let Some(host) = host {
            *h = host;
        }
        if let Some(port) = port {
            *p = port;
        }
    }

    /// Build the backend connector for this configuration
    pub fn into_connector(self) -> Arc<dyn BackendConnector> {
        match self {
            EngineConfig::Postgres(c) => Arc::new(PostgresConnector::new(c)),
            EngineConfig::MySql(c) => Arc::new(MySqlConnector::new(c)),
        }
    }
}

impl Default for EngineConfig {
    /// The process-wide fallback: a local PostgreSQL with placeholder credentials
    fn default() -> Self {
        EngineConfig::Postgres(PostgresConfig::default())
    }
}

impl From<PostgresConfig> for EngineConfig {
    fn from(config: PostgresConfig) -> Self {
        EngineConfig::Postgres(config)
    }
}

impl From<MySqlConfig> for EngineConfig {
    fn from(config: MySqlConfig) -> Self {
        EngineConfig::MySql(config)
    }
}

/// One tenant key bound to one engine configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TenantConfig {
    pub key: String,
    #[serde(flatten)]
    pub engine: EngineConfig,
}

impl TenantConfig {
    pub fn new(key: impl Into<String>, engine: impl Into<EngineConfig>) -> Self {
        Self {
            key: key.into(),
            engine: engine.into(),
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.key.is_empty() {
            return Err(Error::config("tenant key cannot be empty"));
        }
        self.engine
            .validate()
            .map_err(|e| e.with_context(format!("invalid configuration for tenant {}", self.key)))
    }
}

/// A named group of tenants, typically the tenants hosted by one cluster
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TenantGroup {
    pub name: String,
    #[serde(default)]
    pub tenants: Vec<TenantConfig>,
}

/// PostgreSQL settings for one tenant
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MultiTenantPostgresConfig {
    pub key: String,
    pub config: PostgresConfig,
}

/// MySQL settings for one tenant
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MultiTenantMySqlConfig {
    pub key: String,
    pub config: MySqlConfig,
}

/// A named cluster of PostgreSQL tenants
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterMultiTenantPostgresConfig {
    pub name: String,
    pub clusters: Vec<MultiTenantPostgresConfig>,
}

/// A named cluster of MySQL tenants
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterMultiTenantMySqlConfig {
    pub name: String,
    pub clusters: Vec<MultiTenantMySqlConfig>,
}

impl From<MultiTenantPostgresConfig> for TenantConfig {
    fn from(c: MultiTenantPostgresConfig) -> Self {
        TenantConfig::new(c.key, c.config)
    }
}

impl From<MultiTenantMySqlConfig> for TenantConfig {
    fn from(c: MultiTenantMySqlConfig) -> Self {
        TenantConfig::new(c.key, c.config)
    }
}

/// The shapes in which tenant configuration can be supplied
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TenantSource {
    /// A single tenant
    Single(TenantConfig),
    /// A flat list of tenants
    List(Vec<TenantConfig>),
    /// Named groups of tenant lists
    Cluster(Vec<TenantGroup>),
}

impl TenantSource {
    /// Flatten into individual tenant configurations, preserving order
    ///
    /// When the same key appears more than once the later entry wins once
    /// registered.
    pub fn flatten(self) -> Vec<TenantConfig> {
        match self {
            TenantSource::Single(tenant) => vec![tenant],
            TenantSource::List(tenants) => tenants,
            TenantSource::Cluster(groups) => groups
                .into_iter()
                .flat_map(|group| group.tenants)
                .collect(),
        }
    }

    /// Number of tenant entries this source carries
    pub fn len(&self) -> usize {
        match self {
            TenantSource::Single(_) => 1,
            TenantSource::List(tenants) => tenants.len(),
            TenantSource::Cluster(groups) => groups.iter().map(|g| g.tenants.len()).sum(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl From<TenantConfig> for TenantSource {
    fn from(c: TenantConfig) -> Self {
        TenantSource::Single(c)
    }
}

impl From<Vec<TenantConfig>> for TenantSource {
    fn from(c: Vec<TenantConfig>) -> Self {
        TenantSource::List(c)
    }
}

impl From<Vec<TenantGroup>> for TenantSource {
    fn from(groups: Vec<TenantGroup>) -> Self {
        TenantSource::Cluster(groups)
    }
}

impl From<MultiTenantPostgresConfig> for TenantSource {
    fn from(c: MultiTenantPostgresConfig) -> Self {
        TenantSource::Single(c.into())
    }
}

impl From<MultiTenantMySqlConfig> for TenantSource {
    fn from(c: MultiTenantMySqlConfig) -> Self {
        TenantSource::Single(c.into())
    }
}

impl From<ClusterMultiTenantPostgresConfig> for TenantSource {
    fn from(c: ClusterMultiTenantPostgresConfig) -> Self {
        TenantSource::Cluster(vec![TenantGroup {
            name: c.name,
            tenants: c.clusters.into_iter().map(Into::into).collect(),
        }])
    }
}

impl From<ClusterMultiTenantMySqlConfig> for TenantSource {
    fn from(c: ClusterMultiTenantMySqlConfig) -> Self {
        TenantSource::Cluster(vec![TenantGroup {
            name: c.name,
            tenants: c.clusters.into_iter().map(Into::into).collect(),
        }])
    }
}

/// Group tenant configurations by engine name, for startup logging
pub fn count_by_engine(tenants: &[TenantConfig]) -> BTreeMap<&'static str, usize> {
    let mut counts = BTreeMap::new();
    for tenant in tenants {
        *counts.entry(tenant.engine.engine()).or_insert(0) += 1;
    }
    counts
}

fn redacted_dsn(scheme: &str, host: &str, port: u16, user: &str, database: &str) -> String {
    let built = url::Url::parse(&format!("{}://{}:{}", scheme, host, port)).and_then(|mut url| {
        // Setters only fail for cannot-be-a-base URLs, which these never are
        let _ = url.set_username(user);
        let _ = url.set_password(Some("***"));
        url.set_path(database);
        Ok(url)
    });

    match built {
        Ok(url) => url.to_string(),
        Err(_) => format!("{}://{}:***@{}:{}/{}", scheme, user, host, port, database),
    }
}

fn validate_endpoint(host: &str, port: u16) -> Result<()> {
    if host.trim().is_empty() {
        return Err(Error::config("host cannot be empty"));
    }
    if port == 0 {
        return Err(Error::config("port cannot be 0"));
    }
    Ok(())
}

// Default values for configuration
fn default_max_connections() -> u32 {
    10
}
fn default_connect_timeout() -> u64 {
    30
}
fn default_idle_timeout() -> u64 {
    600
} // 10 minutes
fn default_max_lifetime() -> u64 {
    1800
} // 30 minutes
