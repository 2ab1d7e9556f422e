//! Live connection handles owned by the registry

use crate::database::status::ConnectionStatus;
use crate::error::Result;
use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;

/// A live, closable database connection (usually a driver pool)
///
/// The registry owns every handle it caches. Callers receive shared clones
/// and must release them through the resolver's close operations rather
/// than calling [`DatabaseConnection::close`] themselves.
#[async_trait]
pub trait DatabaseConnection: Send + Sync + fmt::Debug {
    /// Engine name, e.g. `"postgres"`
    fn engine(&self) -> &'static str;

    /// Test connectivity with a trivial round trip
    async fn ping(&self) -> Result<bool>;

    /// Close the connection, waiting for in-use connections to be returned
    async fn close(&self);

    /// Whether `close` has been called
    fn is_closed(&self) -> bool;

    /// Access the concrete connection type for downcasting
    fn as_any(&self) -> &dyn std::any::Any;
}

impl dyn DatabaseConnection {
    /// Downcast to a concrete connection type such as `PostgresConnection`
    pub fn downcast_ref<T: 'static>(&self) -> Option<&T> {
        self.as_any().downcast_ref::<T>()
    }
}

/// Shared handle to a live connection
pub type ConnectionHandle = Arc<dyn DatabaseConnection>;

/// Result of resolving a tenant: an optional handle plus its status
///
/// The handle is present exactly when `status.connected` is true.
#[derive(Clone, Debug)]
pub struct ResolvedConnection {
    handle: Option<ConnectionHandle>,
    status: ConnectionStatus,
}

impl ResolvedConnection {
    /// A successful resolution
    pub fn connected(handle: ConnectionHandle, mut status: ConnectionStatus) -> Self {
        status.connected = true;
        Self {
            handle: Some(handle),
            status,
        }
    }

    /// A failed resolution; never carries a handle
    pub fn failed(mut status: ConnectionStatus) -> Self {
        status.connected = false;
        Self {
            handle: None,
            status,
        }
    }

    pub fn handle(&self) -> Option<&ConnectionHandle> {
        self.handle.as_ref()
    }

    pub fn status(&self) -> &ConnectionStatus {
        &self.status
    }

    pub fn is_connected(&self) -> bool {
        self.status.connected
    }

    pub fn into_parts(self) -> (Option<ConnectionHandle>, ConnectionStatus) {
        (self.handle, self.status)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::any::Any;
    use std::sync::atomic::{AtomicBool, Ordering};

    #[derive(Debug, Default)]
    struct FakeConnection {
        closed: AtomicBool,
    }

    #[async_trait]
    impl DatabaseConnection for FakeConnection {
        fn engine(&self) -> &'static str {
            "fake"
        }

        async fn ping(&self) -> Result<bool> {
            Ok(!self.is_closed())
        }

        async fn close(&self) {
            self.closed.store(true, Ordering::SeqCst);
        }

        fn is_closed(&self) -> bool {
            self.closed.load(Ordering::SeqCst)
        }

        fn as_any(&self) -> &dyn Any {
            self
        }
    }

    #[test]
    fn test_constructors_keep_handle_and_flag_in_step() {
        let handle: ConnectionHandle = Arc::new(FakeConnection::default());
        let resolved =
            ResolvedConnection::connected(handle, ConnectionStatus::failed("stale", None));
        assert!(resolved.is_connected());
        assert!(resolved.handle().is_some());

        let resolved = ResolvedConnection::failed(ConnectionStatus::connected("ok"));
        assert!(!resolved.is_connected());
        assert!(resolved.handle().is_none());
    }

    #[test]
    fn test_downcast_handle() {
        let handle: ConnectionHandle = Arc::new(FakeConnection::default());

        assert!(handle.downcast_ref::<FakeConnection>().is_some());
        assert_eq!(handle.engine(), "fake");
        assert!(tokio_test::block_on(handle.ping()).unwrap());

        tokio_test::block_on(handle.close());
        assert!(!tokio_test::block_on(handle.ping()).unwrap());
    }
}
