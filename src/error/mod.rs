use thiserror::Error;

pub mod context;

pub type Result<T> = std::result::Result<T, Error>;

pub use context::{ErrorChain, ErrorContext};

/// Main error type for tenantdb
#[derive(Error, Debug)]
pub enum Error {
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    // Database-specific errors
    #[error("Database connection error: {0}")]
    DatabaseConnection(String),

    #[error("Database query error: {0}")]
    DatabaseQuery(String),

    // Tenant lookup errors
    #[error("No connector found for tenant {0}")]
    TenantNotFound(String),

    #[error("Tenant {tenant} is unavailable: {message}")]
    TenantUnavailable { tenant: String, message: String },

    // Error with context chain
    #[error("{message}")]
    WithContext {
        message: String,
        #[source]
        source: Box<Error>,
    },
}

impl Error {
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    // Database error constructors
    pub fn database_connection(msg: impl Into<String>) -> Self {
        Self::DatabaseConnection(msg.into())
    }

    pub fn database_query(msg: impl Into<String>) -> Self {
        Self::DatabaseQuery(msg.into())
    }

    pub fn tenant_not_found(tenant: impl Into<String>) -> Self {
        Self::TenantNotFound(tenant.into())
    }

    pub fn tenant_unavailable(tenant: impl Into<String>, message: impl Into<String>) -> Self {
        Self::TenantUnavailable {
            tenant: tenant.into(),
            message: message.into(),
        }
    }

    // Add context to an error
    pub fn with_context(self, context: impl Into<String>) -> Self {
        Self::WithContext {
            message: context.into(),
            source: Box::new(self),
        }
    }

    /// Check if error is retryable
    ///
    /// Connection failures are transient from the registry's point of view:
    /// a `refresh` followed by a new resolve may succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::DatabaseConnection(_) | Error::TenantUnavailable { .. } => true,
            Error::WithContext { source, .. } => source.is_retryable(),
            _ => false,
        }
    }

    /// Get a stable error code for logs and API responses
    pub fn error_code(&self) -> &'static str {
        match self {
            Error::Json(_) => "E_JSON",
            Error::Io(_) => "E_IO",
            Error::Config(_) => "E_CONFIG",
            Error::DatabaseConnection(_) => "E_DB_CONNECTION",
            Error::DatabaseQuery(_) => "E_DB_QUERY",
            Error::TenantNotFound(_) => "E_TENANT_NOT_FOUND",
            Error::TenantUnavailable { .. } => "E_TENANT_UNAVAILABLE",
            Error::WithContext { source, .. } => source.error_code(),
        }
    }
}

impl From<sqlx::Error> for Error {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::Database(e) => Self::DatabaseQuery(e.to_string()),
            sqlx::Error::RowNotFound | sqlx::Error::ColumnNotFound(_) => {
                Self::DatabaseQuery(err.to_string())
            }
            other => Self::DatabaseConnection(other.to_string()),
        }
    }
}

#[cfg(feature = "config")]
impl From<toml::de::Error> for Error {
    fn from(err: toml::de::Error) -> Self {
        Self::Config(format!("TOML parse error: {}", err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes() {
        assert_eq!(
            Error::database_connection("refused").error_code(),
            "E_DB_CONNECTION"
        );
        assert_eq!(
            Error::tenant_not_found("acme").error_code(),
            "E_TENANT_NOT_FOUND"
        );
        assert_eq!(
            Error::config("bad port")
                .with_context("loading tenantdb.toml")
                .error_code(),
            "E_CONFIG"
        );
    }

    #[test]
    fn test_retryable() {
        assert!(Error::database_connection("refused").is_retryable());
        assert!(Error::tenant_unavailable("acme", "down").is_retryable());
        assert!(Error::database_connection("refused")
            .with_context("resolving acme")
            .is_retryable());
        assert!(!Error::tenant_not_found("acme").is_retryable());
        assert!(!Error::config("bad").is_retryable());
    }

    #[test]
    fn test_display() {
        assert_eq!(
            Error::tenant_not_found("acme").to_string(),
            "No connector found for tenant acme"
        );
        assert_eq!(
            Error::tenant_unavailable("acme", "connection refused").to_string(),
            "Tenant acme is unavailable: connection refused"
        );
    }

    #[test]
    fn test_from_sqlx_pool_timeout() {
        let err: Error = sqlx::Error::PoolTimedOut.into();
        assert!(matches!(err, Error::DatabaseConnection(_)));

        let err: Error = sqlx::Error::RowNotFound.into();
        assert!(matches!(err, Error::DatabaseQuery(_)));
    }
}
