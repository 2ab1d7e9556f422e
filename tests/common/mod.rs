//! Counting mock connectors shared by the integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use std::any::Any;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tenantdb::{
    BackendConnector, ConnectionHandle, ConnectionStatus, DatabaseConnection, ResolvedConnection,
};

/// Connection that only records whether it was closed
#[derive(Debug, Default)]
pub struct MockConnection {
    pub id: usize,
    closed: AtomicBool,
    close_calls: AtomicUsize,
}

impl MockConnection {
    pub fn close_calls(&self) -> usize {
        self.close_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DatabaseConnection for MockConnection {
    fn engine(&self) -> &'static str {
        "mock"
    }

    async fn ping(&self) -> tenantdb::Result<bool> {
        Ok(!self.is_closed())
    }

    async fn close(&self) {
        self.close_calls.fetch_add(1, Ordering::SeqCst);
        self.closed.store(true, Ordering::SeqCst);
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Connector that counts `connect` calls and remembers every handle it made
#[derive(Debug)]
pub struct MockConnector {
    name: String,
    succeed: bool,
    delay: Option<Duration>,
    calls: AtomicUsize,
    opened: Mutex<Vec<Arc<MockConnection>>>,
}

impl MockConnector {
    pub fn succeeding(name: &str) -> Arc<Self> {
        Self::build(name, true, None)
    }

    pub fn failing(name: &str) -> Arc<Self> {
        Self::build(name, false, None)
    }

    /// Succeeds after sleeping for `delay`
    pub fn slow(name: &str, delay: Duration) -> Arc<Self> {
        Self::build(name, true, Some(delay))
    }

    fn build(name: &str, succeed: bool, delay: Option<Duration>) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            succeed,
            delay,
            calls: AtomicUsize::new(0),
            opened: Mutex::new(Vec::new()),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Every connection this connector handed out, in order
    pub fn opened(&self) -> Vec<Arc<MockConnection>> {
        self.opened.lock().unwrap().clone()
    }

    pub fn open_count(&self) -> usize {
        self.opened().iter().filter(|c| !c.is_closed()).count()
    }

    pub fn as_connector(self: &Arc<Self>) -> Arc<dyn BackendConnector> {
        Arc::clone(self) as Arc<dyn BackendConnector>
    }
}

#[async_trait]
impl BackendConnector for MockConnector {
    fn engine(&self) -> &'static str {
        "mock"
    }

    async fn connect(&self) -> ResolvedConnection {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        if !self.succeed {
            return ResolvedConnection::failed(ConnectionStatus::failed(
                format!("{} refused the connection", self.name),
                Some(tenantdb::Error::database_connection("connection refused")),
            ));
        }

        let connection = Arc::new(MockConnection {
            id: call,
            ..MockConnection::default()
        });
        self.opened.lock().unwrap().push(Arc::clone(&connection));

        ResolvedConnection::connected(
            connection as ConnectionHandle,
            ConnectionStatus::connected(format!("connected to {}", self.name)).with_engine("mock"),
        )
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Downcast a resolved handle back to the mock connection
pub fn mock_connection(handle: &ConnectionHandle) -> &MockConnection {
    handle
        .downcast_ref::<MockConnection>()
        .expect("handle should be a MockConnection")
}
