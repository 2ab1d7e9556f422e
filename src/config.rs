//! Resolver configuration
//!
//! `ResolverConfig` selects the resolver's policies and declares the tenants
//! to register at startup. It is normally loaded from `tenantdb.toml`, merged
//! with an environment-specific `tenantdb.<env>.toml`, and finally adjusted
//! by `TENANTDB_*` environment variables.
//!
//! ```toml
//! on_missing_tenant = "fail"
//! lifecycle = "strict"
//!
//! [fallback]
//! engine = "postgres"
//! host = "127.0.0.1"
//!
//! [[tenants]]
//! key = "acme"
//! engine = "postgres"
//! host = "pg-1.internal"
//! database = "acme"
//!
//! [[clusters]]
//! name = "eu-west"
//!
//! [[clusters.tenants]]
//! key = "globex"
//! engine = "mysql"
//! host = "mysql-eu.internal"
//! ```

use crate::database::config::{EngineConfig, TenantConfig, TenantGroup, TenantSource};
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::env;
use std::str::FromStr;

#[cfg(feature = "config")]
use crate::error::ErrorContext;
#[cfg(feature = "config")]
use std::fs;
#[cfg(feature = "config")]
use std::path::Path;

/// What `get_connector` does for a tenant with no registered connector
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MissingTenantPolicy {
    /// Report a failure status and leave the registry untouched
    #[default]
    Fail,
    /// Register the default tenant's connector (or the fallback
    /// configuration) under the requested key, then resolve it
    UseDefault,
}

impl FromStr for MissingTenantPolicy {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "fail" => Ok(MissingTenantPolicy::Fail),
            "use_default" | "use-default" | "default" => Ok(MissingTenantPolicy::UseDefault),
            _ => Err(Error::config(format!(
                "invalid missing-tenant policy: {} (expected fail or use_default)",
                s
            ))),
        }
    }
}

/// How closing and replacing connections treats the one-shot guard
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleMode {
    /// Closing resets the guard; refresh and update close the old connection
    #[default]
    Strict,
    /// Closing keeps the guard fired; refresh and update leave the old
    /// connection open
    Legacy,
}

impl FromStr for LifecycleMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "strict" => Ok(LifecycleMode::Strict),
            "legacy" | "compat" => Ok(LifecycleMode::Legacy),
            _ => Err(Error::config(format!(
                "invalid lifecycle mode: {} (expected strict or legacy)",
                s
            ))),
        }
    }
}

/// Environment type for configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    #[default]
    Development,
    Production,
}

impl Environment {
    /// Get environment from string; unknown values mean development
    pub fn parse(env: &str) -> Self {
        match env.to_lowercase().as_str() {
            "production" | "prod" => Environment::Production,
            _ => Environment::Development,
        }
    }

    /// Short name used in environment-specific file names
    pub fn as_str(&self) -> &'static str {
        match self {
            Environment::Development => "dev",
            Environment::Production => "prod",
        }
    }

    pub fn is_production(&self) -> bool {
        matches!(self, Environment::Production)
    }
}

/// Configuration for a [`TenantResolver`](crate::TenantResolver)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ResolverConfig {
    #[serde(default)]
    pub environment: Environment,

    #[serde(default)]
    pub on_missing_tenant: MissingTenantPolicy,

    #[serde(default)]
    pub lifecycle: LifecycleMode,

    /// Engine configuration used when a missing tenant is auto-provisioned
    #[serde(default)]
    pub fallback: EngineConfig,

    /// Tenants registered at startup
    #[serde(default)]
    pub tenants: Vec<TenantConfig>,

    /// Named groups of tenants registered at startup
    #[serde(default)]
    pub clusters: Vec<TenantGroup>,
}

impl ResolverConfig {
    /// Load configuration from `tenantdb.toml` in the working directory
    #[cfg(feature = "config")]
    pub fn load() -> Result<Self> {
        Self::load_with_base_dir(".")
    }

    /// Load configuration from a specific base directory
    ///
    /// Reads `tenantdb.toml` (optional), merges `tenantdb.<env>.toml` on top
    /// of it when present, applies environment variable overrides and
    /// validates the result.
    #[cfg(feature = "config")]
    pub fn load_with_base_dir<P: AsRef<Path>>(base_dir: P) -> Result<Self> {
        let base_dir = base_dir.as_ref();
        let env = Self::detect_environment();

        let base_config_path = base_dir.join("tenantdb.toml");
        let mut merged_value = if base_config_path.exists() {
            Self::load_toml_value(&base_config_path)?
        } else {
            toml::Value::Table(toml::map::Map::new())
        };

        let env_config_path = base_dir.join(format!("tenantdb.{}.toml", env.as_str()));
        if env_config_path.exists() {
            log::debug!(
                "Loading environment-specific config from: {}",
                env_config_path.display()
            );
            let env_value = Self::load_toml_value(&env_config_path)?;

            // Environment config takes precedence over the base file
            merged_value = serde_toml_merge::merge(merged_value, env_value).map_err(|e| {
                Error::config(format!("Failed to merge configuration files: {}", e))
            })?;
        }

        let mut config: ResolverConfig = merged_value
            .try_into()
            .context("Failed to deserialize merged configuration")?;

        config.environment = env;
        config.apply_env_overrides()?;
        config.validate()?;

        log::info!(
            "Resolver configuration loaded (environment: {}, {} tenant(s))",
            config.environment.as_str(),
            config.tenant_count()
        );

        Ok(config)
    }

    /// Load configuration from a single TOML file, without overrides
    #[cfg(feature = "config")]
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path_ref = path.as_ref();

        let content = fs::read_to_string(path_ref).with_context(|| {
            format!(
                "Failed to read config file '{}'. Make sure the file exists and is readable.",
                path_ref.display()
            )
        })?;

        let config = Self::from_toml_str(&content)
            .with_context(|| format!("Failed to parse config file '{}'", path_ref.display()))?;

        log::debug!(
            "Successfully loaded configuration from: {}",
            path_ref.display()
        );
        Ok(config)
    }

    /// Parse configuration from a TOML string
    #[cfg(feature = "config")]
    pub fn from_toml_str(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    #[cfg(feature = "config")]
    fn load_toml_value<P: AsRef<Path>>(path: P) -> Result<toml::Value> {
        let path_ref = path.as_ref();

        let content = fs::read_to_string(path_ref)
            .with_context(|| format!("Failed to read config file '{}'", path_ref.display()))?;

        let value: toml::Value = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file '{}'", path_ref.display()))?;

        Ok(value)
    }

    /// Detect current environment from `TENANTDB_ENV`
    pub fn detect_environment() -> Environment {
        env::var("TENANTDB_ENV")
            .map(|env| Environment::parse(&env))
            .unwrap_or_default()
    }

    /// Apply `TENANTDB_*` environment variable overrides
    pub fn apply_env_overrides(&mut self) -> Result<()> {
        self.apply_overrides_from(|key| env::var(key).ok())
    }

    /// Apply overrides from an arbitrary key lookup
    ///
    /// Recognized keys: `TENANTDB_ON_MISSING_TENANT`, `TENANTDB_LIFECYCLE`,
    /// `TENANTDB_DEFAULT_HOST`, `TENANTDB_DEFAULT_PORT`.
    pub fn apply_overrides_from<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(policy) = lookup("TENANTDB_ON_MISSING_TENANT") {
            self.on_missing_tenant = policy.parse()?;
        }
        if let Some(mode) = lookup("TENANTDB_LIFECYCLE") {
            self.lifecycle = mode.parse()?;
        }

        let host = lookup("TENANTDB_DEFAULT_HOST");
        let port = match lookup("TENANTDB_DEFAULT_PORT") {
            Some(port) => Some(
                port.parse::<u16>()
                    .map_err(|_| Error::config("Invalid TENANTDB_DEFAULT_PORT value"))?,
            ),
            None => None,
        };
        self.fallback.set_endpoint(host, port);

        Ok(())
    }

    /// Validate the fallback and every declared tenant
    ///
    /// A key declared more than once is allowed (the last declaration wins
    /// at registration) but logged.
    pub fn validate(&self) -> Result<()> {
        self.fallback
            .validate()
            .map_err(|e| e.with_context("invalid fallback configuration"))?;

        let mut seen = HashSet::new();
        for tenant in self.all_tenants() {
            tenant.validate()?;
            if !seen.insert(tenant.key.as_str()) {
                log::warn!(
                    "Tenant {} is declared more than once; the last declaration wins",
                    tenant.key
                );
            }
        }

        for group in &self.clusters {
            if group.name.is_empty() {
                return Err(Error::config("cluster name cannot be empty"));
            }
        }

        Ok(())
    }

    /// Number of tenant declarations, clusters included
    pub fn tenant_count(&self) -> usize {
        self.all_tenants().count()
    }

    /// Tenant declarations as configuration sources, in registration order
    pub fn sources(&self) -> Vec<TenantSource> {
        let mut sources = Vec::new();
        if !self.tenants.is_empty() {
            sources.push(TenantSource::List(self.tenants.clone()));
        }
        if !self.clusters.is_empty() {
            sources.push(TenantSource::Cluster(self.clusters.clone()));
        }
        sources
    }

    fn all_tenants(&self) -> impl Iterator<Item = &TenantConfig> {
        self.tenants
            .iter()
            .chain(self.clusters.iter().flat_map(|group| group.tenants.iter()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::config::{MySqlConfig, PostgresConfig};
    use std::collections::HashMap;

    #[test]
    fn test_defaults() {
        let config = ResolverConfig::default();

        assert_eq!(config.on_missing_tenant, MissingTenantPolicy::Fail);
        assert_eq!(config.lifecycle, LifecycleMode::Strict);
        assert_eq!(config.environment, Environment::Development);
        assert_eq!(config.tenant_count(), 0);
        assert!(config.sources().is_empty());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_policy_parsing() {
        assert_eq!(
            "use_default".parse::<MissingTenantPolicy>().unwrap(),
            MissingTenantPolicy::UseDefault
        );
        assert_eq!(
            "FAIL".parse::<MissingTenantPolicy>().unwrap(),
            MissingTenantPolicy::Fail
        );
        assert!("maybe".parse::<MissingTenantPolicy>().is_err());

        assert_eq!(
            "legacy".parse::<LifecycleMode>().unwrap(),
            LifecycleMode::Legacy
        );
        assert!("loose".parse::<LifecycleMode>().is_err());
    }

    #[test]
    fn test_overrides_from_lookup() {
        let vars: HashMap<&str, &str> = [
            ("TENANTDB_ON_MISSING_TENANT", "use_default"),
            ("TENANTDB_LIFECYCLE", "legacy"),
            ("TENANTDB_DEFAULT_HOST", "10.1.2.3"),
            ("TENANTDB_DEFAULT_PORT", "6543"),
        ]
        .into_iter()
        .collect();

        let mut config = ResolverConfig::default();
        config
            .apply_overrides_from(|key| vars.get(key).map(|v| v.to_string()))
            .unwrap();

        assert_eq!(config.on_missing_tenant, MissingTenantPolicy::UseDefault);
        assert_eq!(config.lifecycle, LifecycleMode::Legacy);
        let EngineConfig::Postgres(fallback) = &config.fallback else {
            panic!("fallback should stay postgres");
        };
        assert_eq!(fallback.host, "10.1.2.3");
        assert_eq!(fallback.port, 6543);
    }

    #[test]
    fn test_invalid_port_override() {
        let mut config = ResolverConfig::default();
        let result = config.apply_overrides_from(|key| {
            (key == "TENANTDB_DEFAULT_PORT").then(|| "not-a-port".to_string())
        });

        assert!(result.is_err());
    }

    #[test]
    fn test_sources_and_duplicate_keys() {
        let config = ResolverConfig {
            tenants: vec![
                TenantConfig::new("a", PostgresConfig::default()),
                TenantConfig::new("b", MySqlConfig::default()),
            ],
            clusters: vec![TenantGroup {
                name: "eu".to_string(),
                tenants: vec![TenantConfig::new("a", MySqlConfig::default())],
            }],
            ..ResolverConfig::default()
        };

        assert!(config.validate().is_ok());
        assert_eq!(config.tenant_count(), 3);

        let sources = config.sources();
        assert_eq!(sources.len(), 2);
        assert!(matches!(sources[0], TenantSource::List(_)));
        assert!(matches!(sources[1], TenantSource::Cluster(_)));
    }

    #[test]
    fn test_validate_rejects_empty_cluster_name() {
        let config = ResolverConfig {
            clusters: vec![TenantGroup {
                name: String::new(),
                tenants: Vec::new(),
            }],
            ..ResolverConfig::default()
        };

        assert!(config.validate().is_err());
    }

    #[cfg(feature = "config")]
    #[test]
    fn test_from_toml_str() {
        let config = ResolverConfig::from_toml_str(
            r#"
on_missing_tenant = "use_default"

[[tenants]]
key = "acme"
engine = "postgres"
host = "pg.internal"
port = 5433
database = "acme"
max_connections = 4

[[clusters]]
name = "eu"

[[clusters.tenants]]
key = "globex"
engine = "mysql"
host = "mysql.internal"
"#,
        )
        .unwrap();

        assert_eq!(config.on_missing_tenant, MissingTenantPolicy::UseDefault);
        assert_eq!(config.tenants.len(), 1);
        let EngineConfig::Postgres(pg) = &config.tenants[0].engine else {
            panic!("expected postgres");
        };
        assert_eq!(pg.port, 5433);
        assert_eq!(pg.pool.max_connections, 4);
        assert_eq!(pg.user, "default-db-user");

        assert_eq!(config.clusters[0].tenants[0].engine.engine(), "mysql");
    }
}
