//! MySQL backend connector implementation

use crate::database::config::MySqlConfig;
use crate::database::connection::{DatabaseConnection, ResolvedConnection};
use crate::database::connector::BackendConnector;
use crate::database::status::ConnectionStatus;
use crate::error::{Error, Result};
use async_trait::async_trait;
use sqlx::mysql::{MySqlConnectOptions, MySqlPoolOptions, MySqlSslMode};
use sqlx::{ConnectOptions, MySqlPool};
use std::sync::Arc;
use std::time::Instant;

const ENGINE: &str = "mysql";

/// MySQL backend connector
#[derive(Debug, Clone)]
pub struct MySqlConnector {
    config: MySqlConfig,
}

impl MySqlConnector {
    /// Create a new MySQL connector
    pub fn new(config: MySqlConfig) -> Self {
        Self { config }
    }

    /// Get the connector's configuration
    pub fn config(&self) -> &MySqlConfig {
        &self.config
    }

    fn connect_options(&self) -> Result<MySqlConnectOptions> {
        let ssl_mode: MySqlSslMode = self.config.ssl_mode.parse().map_err(|e: sqlx::Error| {
            Error::config(format!(
                "invalid MySQL ssl_mode '{}': {}",
                self.config.ssl_mode, e
            ))
        })?;

        let options = MySqlConnectOptions::new()
            .host(&self.config.host)
            .port(self.config.port)
            .username(&self.config.user)
            .password(&self.config.password)
            .database(&self.config.database)
            .charset(&self.config.charset)
            .ssl_mode(ssl_mode);

        Ok(if self.config.debug_mode {
            options.log_statements(log::LevelFilter::Debug)
        } else {
            options.disable_statement_logging()
        })
    }

    async fn open_pool(&self) -> Result<MySqlPool> {
        let options = self.connect_options()?;
        let pool = &self.config.pool;

        MySqlPoolOptions::new()
            .max_connections(pool.max_connections)
            .min_connections(pool.min_connections)
            .acquire_timeout(pool.connect_timeout())
            .idle_timeout(pool.idle_timeout())
            .max_lifetime(pool.max_lifetime())
            .connect_with(options)
            .await
            .map_err(|e| {
                Error::database_connection(format!(
                    "Failed to connect to MySQL at {}: {}",
                    self.config.redacted_dsn(),
                    e
                ))
            })
    }
}

#[async_trait]
impl BackendConnector for MySqlConnector {
    fn engine(&self) -> &'static str {
        ENGINE
    }

    async fn connect(&self) -> ResolvedConnection {
        let start = Instant::now();
        let dsn = self.config.redacted_dsn();

        if !self.config.enabled {
            let status =
                ConnectionStatus::failed(format!("MySQL connector for {} is disabled", dsn), None);
            return ResolvedConnection::failed(
                status
                    .with_engine(ENGINE)
                    .with_debug_mode(self.config.debug_mode)
                    .with_new_instance(false),
            );
        }

        match self.open_pool().await {
            Ok(pool) => {
                let pid = sqlx::query_scalar::<_, u64>("SELECT CONNECTION_ID()")
                    .fetch_one(&pool)
                    .await
                    .ok();

                log::debug!("MySQL pool opened for {} (connection id {:?})", dsn, pid);

                let status = ConnectionStatus::connected(format!("Connected to MySQL at {}", dsn))
                    .with_engine(ENGINE)
                    .with_debug_mode(self.config.debug_mode)
                    .with_pid(pid)
                    .with_elapsed(start.elapsed());
                ResolvedConnection::connected(Arc::new(MySqlConnection::new(pool)), status)
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

/// Live MySQL pool handed out by the registry
#[derive(Debug, Clone)]
pub struct MySqlConnection {
    pool: MySqlPool,
}

impl MySqlConnection {
    /// Wrap an existing pool
    pub fn new(pool: MySqlPool) -> Self {
        Self { pool }
    }

    /// Get reference to the underlying pool
    pub fn pool(&self) -> &MySqlPool {
        &self.pool
    }
}

#[async_trait]
impl DatabaseConnection for MySqlConnection {
    fn engine(&self) -> &'static str {
        ENGINE
    }

    async fn ping(&self) -> Result<bool> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map(|_| true)
            .map_err(|e| Error::database_query(format!("MySQL ping failed: {}", e)))
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
