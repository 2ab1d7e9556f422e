//! Backend connector trait
//!
//! A backend connector knows how to open a connection for one engine from
//! its engine-specific configuration. The registry only ever calls
//! [`BackendConnector::connect`]; adding a new engine means implementing this
//! trait, nothing else.

use crate::database::connection::ResolvedConnection;
use async_trait::async_trait;
use std::fmt;

/// Capability to open a database connection
#[async_trait]
pub trait BackendConnector: Send + Sync + fmt::Debug {
    /// Engine name, e.g. `"postgres"`
    fn engine(&self) -> &'static str;

    /// Attempt to open a connection
    ///
    /// Failures are reported through the returned status, never by
    /// panicking. Each call opens a new physical connection; caching is the
    /// registry's job.
    async fn connect(&self) -> ResolvedConnection;

    /// Access the concrete connector type for downcasting
    fn as_any(&self) -> &dyn std::any::Any;
}

impl dyn BackendConnector {
    /// Downcast to a concrete connector such as `PostgresConnector`
    pub fn downcast_ref<T: 'static>(&self) -> Option<&T> {
        self.as_any().downcast_ref::<T>()
    }
}
