//! PostgreSQL backend connector implementation

use crate::database::config::PostgresConfig;
use crate::database::connection::{DatabaseConnection, ResolvedConnection};
use crate::database::connector::BackendConnector;
use crate::database::status::ConnectionStatus;
use crate::error::{Error, Result};
use async_trait::async_trait;
use sqlx::postgres::{PgConnectOptions, PgPoolOptions, PgSslMode};
use sqlx::{ConnectOptions, PgPool};
use std::sync::Arc;
use std::time::Instant;

const ENGINE: &str = "postgres";

/// PostgreSQL backend connector
#[derive(Debug, Clone)]
pub struct PostgresConnector {
    config: PostgresConfig,
}

impl PostgresConnector {
    /// Create a new PostgreSQL connector
    pub fn new(config: PostgresConfig) -> Self {
        Self { config }
    }

    /// Get the connector's configuration
    pub fn config(&self) -> &PostgresConfig {
        &self.config
    }

    fn connect_options(&self) -> Result<PgConnectOptions> {
        let ssl_mode: PgSslMode = self.config.ssl_mode.parse().map_err(|e: sqlx::Error| {
            Error::config(format!(
                "invalid PostgreSQL ssl_mode '{}': {}",
                self.config.ssl_mode, e
            ))
        })?;

        let mut options = PgConnectOptions::new()
            .host(&self.config.host)
            .port(self.config.port)
            .username(&self.config.user)
            .password(&self.config.password)
            .database(&self.config.database)
            .ssl_mode(ssl_mode);

        if let Some(name) = &self.config.application_name {
            options = options.application_name(name);
        }

        Ok(if self.config.debug_mode {
            options.log_statements(log::LevelFilter::Debug)
        } else {
            options.disable_statement_logging()
        })
    }

    async fn open_pool(&self) -> Result<PgPool> {
        let options = self.connect_options()?;
        let pool = &self.config.pool;

        PgPoolOptions::new()
            .max_connections(pool.max_connections)
            .min_connections(pool.min_connections)
            .acquire_timeout(pool.connect_timeout())
            .idle_timeout(pool.idle_timeout())
            .max_lifetime(pool.max_lifetime())
            .connect_with(options)
            .await
            .map_err(|e| {
                Error::database_connection(format!(
                    "Failed to connect to PostgreSQL at {}: {}",
                    self.config.redacted_dsn(),
                    e
                ))
            })
    }
}

#[async_trait]
impl BackendConnector for PostgresConnector {
    fn engine(&self) -> &'static str {
        ENGINE
    }

    async fn connect(&self) -> ResolvedConnection {
        let start = Instant::now();
        let dsn = self.config.redacted_dsn();

        if !self.config.enabled {
            let status = ConnectionStatus::failed(
                format!("PostgreSQL connector for {} is disabled", dsn),
                None,
            );
            return ResolvedConnection::failed(
                status
                    .with_engine(ENGINE)
                    .with_debug_mode(self.config.debug_mode)
                    .with_new_instance(false),
            );
        }

        match self.open_pool().await {
            Ok(pool) => {
                let pid = sqlx::query_scalar::<_, i32>("SELECT pg_backend_pid()")
                    .fetch_one(&pool)
                    .await
                    .ok()
                    .and_then(|pid| u64::try_from(pid).ok());

                log::debug!("PostgreSQL pool opened for {} (pid {:?})", dsn, pid);

                let status =
                    ConnectionStatus::connected(format!("Connected to PostgreSQL at {}", dsn))
                        .with_engine(ENGINE)
                        .with_debug_mode(self.config.debug_mode)
                        .with_pid(pid)
                        .with_elapsed(start.elapsed());
                ResolvedConnection::connected(Arc::new(PostgresConnection::new(pool)), status)
            }
            Err(e) => {
                let status = ConnectionStatus::failed(e.to_string(), Some(e))
                    .with_engine(ENGINE)
                    .with_debug_mode(self.config.debug_mode)
                    .with_elapsed(start.elapsed());
                ResolvedConnection::failed(status)
            }
        }
    }

    fn as_any(&self) -> &dyn std::any::Any {
        self
    }
}

/// Live PostgreSQL pool handed out by the registry
#[derive(Debug, Clone)]
pub struct PostgresConnection {
    pool: PgPool,
}

impl PostgresConnection {
    /// Wrap an existing pool
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Get reference to the underlying pool
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl DatabaseConnection for PostgresConnection {
    fn engine(&self) -> &'static str {
        ENGINE
    }

    async fn ping(&self) -> Result<bool> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map(|_| true)
            .map_err(|e| Error::database_query(format!("PostgreSQL ping failed: {}", e)))
    }

    async fn close(&self) {
        self.pool.close().await;
    }

    fn is_closed(&self) -> bool {
        self.pool.is_closed()
    }

    fn as_any(&self) -> &dyn std::any::Any {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_disabled_connector_fails_without_connecting() {
        let config = PostgresConfig {
            enabled: false,
            ..PostgresConfig::default()
        };
        let resolved = PostgresConnector::new(config).connect().await;

        assert!(!resolved.is_connected());
        assert!(resolved.handle().is_none());
        assert!(resolved.status().message.contains("disabled"));
        assert!(!resolved.status().new_instance);
    }

    #[tokio::test]
    async fn test_invalid_ssl_mode_is_reported() {
        let config = PostgresConfig {
            ssl_mode: "sometimes".to_string(),
            ..PostgresConfig::default()
        };
        let resolved = PostgresConnector::new(config).connect().await;

        assert!(!resolved.is_connected());
        assert_eq!(
            resolved.status().error.as_ref().map(|e| e.error_code()),
            Some("E_CONFIG")
        );
    }

    #[tokio::test]
    async fn test_unreachable_server_reports_failure() {
        // Nothing listens on port 1; the pool gives up after connect_timeout
        let mut config = PostgresConfig::new("127.0.0.1", 1, "app", "secret", "app");
        config.ssl_mode = "disable".to_string();
        config.pool.connect_timeout = 2;

        let resolved = PostgresConnector::new(config).connect().await;
        let status = resolved.status();

        assert!(!status.connected);
        assert_eq!(status.engine.as_deref(), Some("postgres"));
        assert!(status.message.contains("127.0.0.1:1"));
        assert!(!status.message.contains("secret"));
        assert!(status.error.is_some());
    }
}
