//! Connection status reported by backend connectors
//!
//! A `ConnectionStatus` is the value every resolution path hands back to the
//! caller. It is cheap to clone: the optional cause is shared behind an `Arc`
//! so that every caller observing a cached result sees the same error.

use crate::error::{Error, ErrorChain};
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Outcome of a connection attempt
#[derive(Clone, Default, Serialize)]
pub struct ConnectionStatus {
    /// Whether the connector produced a usable connection
    pub connected: bool,
    /// Human readable description of the outcome
    pub message: String,
    /// Underlying cause when the attempt failed
    #[serde(serialize_with = "serialize_error")]
    pub error: Option<Arc<Error>>,
    /// Engine that produced this status (`"postgres"`, `"mysql"`, ...)
    pub engine: Option<String>,
    /// The connector was configured with its debug flag on
    pub debug_mode: bool,
    /// A new physical connection was opened to produce this status
    pub new_instance: bool,
    /// Server-side session id of the connection used to verify the pool
    pub pid: Option<u64>,
    /// Time spent inside `connect`
    #[serde(with = "duration_millis")]
    pub elapsed: Duration,
    #[serde(skip)]
    kind: StatusKind,
}

/// Distinguishes failures the registry produced itself from connector failures
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
enum StatusKind {
    #[default]
    Attempted,
    MissingTenant,
    Closed,
}

impl ConnectionStatus {
    /// Status for a successful connection attempt
    pub fn connected(message: impl Into<String>) -> Self {
        Self {
            connected: true,
            message: message.into(),
            new_instance: true,
            ..Self::default()
        }
    }

    /// Status for a failed connection attempt
    pub fn failed(message: impl Into<String>, error: Option<Error>) -> Self {
        Self {
            connected: false,
            message: message.into(),
            error: error.map(Arc::new),
            ..Self::default()
        }
    }

    /// Status returned when no connector is registered for `tenant`
    pub fn missing_tenant(tenant: &str) -> Self {
        Self {
            connected: false,
            message: format!("No connector found for tenant {}", tenant),
            error: Some(Arc::new(Error::tenant_not_found(tenant))),
            debug_mode: true,
            kind: StatusKind::MissingTenant,
            ..Self::default()
        }
    }

    /// Status returned for a tenant whose cached connection was closed
    pub fn closed(tenant: &str) -> Self {
        Self {
            connected: false,
            message: format!(
                "Connection for tenant {} was closed; refresh the connector to reconnect",
                tenant
            ),
            kind: StatusKind::Closed,
            ..Self::default()
        }
    }

    pub fn with_engine(mut self, engine: impl Into<String>) -> Self {
        self.engine = Some(engine.into());
        self
    }

    pub fn with_debug_mode(mut self, debug_mode: bool) -> Self {
        self.debug_mode = debug_mode;
        self
    }

    pub fn with_new_instance(mut self, new_instance: bool) -> Self {
        self.new_instance = new_instance;
        self
    }

    pub fn with_pid(mut self, pid: Option<u64>) -> Self {
        self.pid = pid;
        self
    }

    pub fn with_elapsed(mut self, elapsed: Duration) -> Self {
        self.elapsed = elapsed;
        self
    }

    /// True when the tenant had no registered connector
    pub fn is_missing_tenant(&self) -> bool {
        self.kind == StatusKind::MissingTenant
    }

    /// True when the tenant's cached connection was explicitly closed
    pub fn is_closed(&self) -> bool {
        self.kind == StatusKind::Closed
    }

    /// Single-line description of the cause, if any
    pub fn cause(&self) -> Option<String> {
        self.error
            .as_deref()
            .map(|e| ErrorChain::new(e).format_for_log())
    }
}

impl fmt::Debug for ConnectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionStatus")
            .field("connected", &self.connected)
            .field("message", &self.message)
            .field("error", &self.cause())
            .field("engine", &self.engine)
            .field("debug_mode", &self.debug_mode)
            .field("new_instance", &self.new_instance)
            .field("pid", &self.pid)
            .field("elapsed", &self.elapsed)
            .finish()
    }
}

fn serialize_error<S>(error: &Option<Arc<Error>>, serializer: S) -> Result<S::Ok, S::Error>
where
    S: serde::Serializer,
{
    match error {
        Some(e) => serializer.serialize_some(&e.to_string()),
        None => serializer.serialize_none(),
    }
}

mod duration_millis {
    use serde::Serializer;
    use std::time::Duration;

    pub fn serialize<S>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(u64::try_from(value.as_millis()).unwrap_or(u64::MAX))
    }
}
