//! Tenant connector registry
//!
//! The registry maps tenant keys to backend connectors and caches, per
//! tenant, the result of the first connection attempt. Every entry carries a
//! one-shot guard: the first `resolve` for a tenant runs the connector, every
//! concurrent or later caller waits for and shares that result until the
//! guard is reset by `register`, `refresh`, `close` or `unregister`.
//!
//! The map lock is never held while connecting or closing. A guard that is
//! displaced while its connection attempt is still running is *retired*:
//! whoever retires it waits for the attempt to finish and disposes of the
//! result, and callers still waiting on it start over against the current
//! entry.

use crate::config::LifecycleMode;
use crate::database::connection::{ConnectionHandle, ResolvedConnection};
use crate::database::connector::BackendConnector;
use crate::database::status::ConnectionStatus;
use futures::future::join_all;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{OnceCell, RwLock};

/// Tenant key reserved for the default tenant
pub const DEFAULT_TENANT: &str = "default";

/// What a guard settled on
#[derive(Clone)]
enum Outcome {
    Resolved(ResolvedConnection),
    /// The guard was retired before it ever ran
    Superseded,
}

/// One-shot initialization guard for a single tenant
#[derive(Default)]
struct Guard {
    cell: OnceCell<Outcome>,
    resolving: AtomicBool,
}

/// Clears the `resolving` flag even if the connecting future is dropped
struct ResolvingFlag<'a>(&'a AtomicBool);

impl<'a> ResolvingFlag<'a> {
    fn raise(flag: &'a AtomicBool) -> Self {
        flag.store(true, Ordering::SeqCst);
        Self(flag)
    }
}

impl Drop for ResolvingFlag<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

impl Guard {
    async fn resolve(&self, tenant: &str, connector: &dyn BackendConnector) -> Outcome {
        self.cell
            .get_or_init(|| async {
                let _flag = ResolvingFlag::raise(&self.resolving);
                let start = Instant::now();

                let (handle, mut status) = connector.connect().await.into_parts();
                let elapsed = start.elapsed();
                if status.elapsed.is_zero() {
                    status = status.with_elapsed(elapsed);
                }
                let resolved = match handle {
                    Some(handle) => ResolvedConnection::connected(handle, status),
                    None => ResolvedConnection::failed(status),
                };

                if resolved.is_connected() {
                    log::info!(
                        "Database connection for tenant {} established in {:?} ({})",
                        tenant,
                        elapsed,
                        connector.engine()
                    );
                } else {
                    let status = resolved.status();
                    log::error!(
                        "Error initializing database connection for tenant {} (executed in {:?}): {}{}",
                        tenant,
                        elapsed,
                        status.message,
                        status
                            .cause()
                            .map(|cause| format!(" [{}]", cause))
                            .unwrap_or_default()
                    );
                }

                Outcome::Resolved(resolved)
            })
            .await
            .clone()
    }

    fn handle(&self) -> Option<ConnectionHandle> {
        match self.cell.get() {
            Some(Outcome::Resolved(resolved)) => resolved.handle().cloned(),
            _ => None,
        }
    }

    fn state(&self) -> TenantState {
        match self.cell.get() {
            Some(Outcome::Resolved(resolved)) if resolved.is_connected() => TenantState::Connected,
            Some(Outcome::Resolved(_)) => TenantState::Failed,
            Some(Outcome::Superseded) => TenantState::Unresolved,
            None if self.resolving.load(Ordering::SeqCst) => TenantState::Resolving,
            None => TenantState::Unresolved,
        }
    }
}

/// Registered connector plus its guard
struct Entry {
    connector: Arc<dyn BackendConnector>,
    guard: Arc<Guard>,
    /// Set by a legacy-mode close; the guard stays fired
    closed: bool,
}

impl Entry {
    fn new(connector: Arc<dyn BackendConnector>) -> Self {
        Self {
            connector,
            guard: Arc::new(Guard::default()),
            closed: false,
        }
    }

    fn reset_guard(&mut self, tenant: &str) -> RetiredGuard {
        let guard = std::mem::take(&mut self.guard);
        let retired = RetiredGuard {
            tenant: tenant.to_string(),
            guard,
            already_closed: self.closed,
        };
        self.closed = false;
        retired
    }

    fn retire(self, tenant: &str) -> RetiredGuard {
        RetiredGuard {
            tenant: tenant.to_string(),
            guard: self.guard,
            already_closed: self.closed,
        }
    }
}

/// A guard displaced from its entry, together with whatever it cached
///
/// Dispose of it with [`RetiredGuard::close`] (wait for any in-flight
/// attempt, then close its connection) or [`RetiredGuard::discard`] (leave
/// the connection open).
#[must_use = "a retired guard may own a live connection; close or discard it"]
pub struct RetiredGuard {
    tenant: String,
    guard: Arc<Guard>,
    already_closed: bool,
}

impl RetiredGuard {
    /// Tenant the guard belonged to
    pub fn tenant(&self) -> &str {
        &self.tenant
    }

    /// Whether the guard had produced a live connection
    pub fn has_connection(&self) -> bool {
        !self.already_closed && self.guard.handle().is_some()
    }

    /// Wait for any in-flight attempt, then close the cached connection
    ///
    /// Returns true when a live connection was closed.
    pub async fn close(self) -> bool {
        let outcome = self
            .guard
            .cell
            .get_or_init(|| async { Outcome::Superseded })
            .await;

        if self.already_closed {
            return false;
        }

        match outcome {
            Outcome::Resolved(resolved) => match resolved.handle() {
                Some(handle) => {
                    log::debug!("Closing connection for tenant {}", self.tenant);
                    handle.close().await;
                    true
                }
                None => false,
            },
            Outcome::Superseded => false,
        }
    }

    /// Drop the guard without closing its connection
    ///
    /// A guard that never started is stamped so that callers still holding
    /// it re-resolve against the current entry.
    pub fn discard(self) {
        let _ = self.guard.cell.set(Outcome::Superseded);
        if self.has_connection() {
            log::debug!(
                "Discarding connection for tenant {} without closing it",
                self.tenant
            );
        }
    }
}

/// Observable lifecycle state of a registered tenant
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TenantState {
    /// Registered, no connection attempt yet
    Unresolved,
    /// A connection attempt is in flight
    Resolving,
    /// Resolved with a live connection
    Connected,
    /// Resolved with a failed attempt
    Failed,
    /// Connection closed while the guard stayed fired (legacy lifecycle)
    Closed,
}

/// Registry mapping tenant keys to connectors and cached connections
#[derive(Clone)]
pub struct ConnectorRegistry {
    /// Map of tenant key to entry
    entries: Arc<RwLock<HashMap<String, Entry>>>,
    /// How `close` and `close_all` treat the guard
    lifecycle: LifecycleMode,
}

impl ConnectorRegistry {
    /// Create a new empty registry with the strict lifecycle
    pub fn new() -> Self {
        Self::with_lifecycle(LifecycleMode::default())
    }

    /// Create a new empty registry with the given lifecycle mode
    pub fn with_lifecycle(lifecycle: LifecycleMode) -> Self {
        Self {
            entries: Arc::new(RwLock::new(HashMap::new())),
            lifecycle,
        }
    }

    pub fn lifecycle(&self) -> LifecycleMode {
        self.lifecycle
    }

    /// Register a connector for a tenant, replacing any previous one
    ///
    /// The tenant's guard and cached result are reset. The displaced guard
    /// is returned; closing its connection is the caller's decision.
    pub async fn register(
        &self,
        tenant: impl Into<String>,
        connector: Arc<dyn BackendConnector>,
    ) -> Option<RetiredGuard> {
        let tenant = tenant.into();
        log::debug!(
            "Registering {} connector for tenant {}",
            connector.engine(),
            tenant
        );

        let mut entries = self.entries.write().await;
        let previous = entries.insert(tenant.clone(), Entry::new(connector));
        drop(entries);

        previous.map(|entry| entry.retire(&tenant))
    }

    /// Register a connector only if the tenant has none yet
    ///
    /// Returns true when this call inserted the entry.
    pub async fn register_if_absent(
        &self,
        tenant: impl Into<String>,
        connector: Arc<dyn BackendConnector>,
    ) -> bool {
        let mut entries = self.entries.write().await;
        match entries.entry(tenant.into()) {
            std::collections::hash_map::Entry::Occupied(_) => false,
            std::collections::hash_map::Entry::Vacant(slot) => {
                log::debug!(
                    "Registering {} connector for tenant {}",
                    connector.engine(),
                    slot.key()
                );
                slot.insert(Entry::new(connector));
                true
            }
        }
    }

    /// Register several connectors under the same tenant; the last one wins
    pub async fn register_batch<I>(
        &self,
        tenant: impl Into<String>,
        connectors: I,
    ) -> Option<RetiredGuard>
    where
        I: IntoIterator<Item = Arc<dyn BackendConnector>>,
    {
        let tenant = tenant.into();
        let mut connectors = connectors.into_iter();
        let first = connectors.next()?;

        let mut entries = self.entries.write().await;
        // Only the entry that existed before this call can have been shared
        let displaced = entries
            .insert(tenant.clone(), Entry::new(first))
            .map(|entry| entry.retire(&tenant));

        for connector in connectors {
            entries.insert(tenant.clone(), Entry::new(connector));
        }

        displaced
    }

    /// Resolve a tenant's connection, connecting on first use
    ///
    /// Concurrent callers for the same unresolved tenant share a single
    /// connection attempt. Unknown tenants yield a failed status and no
    /// entry is created.
    pub async fn resolve(&self, tenant: &str) -> ResolvedConnection {
        loop {
            let (connector, guard) = {
                let entries = self.entries.read().await;
                match entries.get(tenant) {
                    None => {
                        log::warn!("No connector found for tenant {}", tenant);
                        return ResolvedConnection::failed(ConnectionStatus::missing_tenant(tenant));
                    }
                    Some(entry) if entry.closed => {
                        return ResolvedConnection::failed(ConnectionStatus::closed(tenant));
                    }
                    Some(entry) => (Arc::clone(&entry.connector), Arc::clone(&entry.guard)),
                }
            };

            if let Outcome::Resolved(resolved) = guard.resolve(tenant, connector.as_ref()).await {
                // A guard replaced while we waited on it must not leak its result
                if self.is_current(tenant, &guard).await {
                    return resolved;
                }
            }
            log::debug!(
                "Connector for tenant {} changed during resolution, retrying",
                tenant
            );
        }
    }

    async fn is_current(&self, tenant: &str, guard: &Arc<Guard>) -> bool {
        let entries = self.entries.read().await;
        entries
            .get(tenant)
            .is_some_and(|entry| !entry.closed && Arc::ptr_eq(&entry.guard, guard))
    }

    /// Cached result for a tenant, without triggering a connection
    pub async fn peek(&self, tenant: &str) -> Option<ResolvedConnection> {
        let entries = self.entries.read().await;
        let entry = entries.get(tenant)?;
        if entry.closed {
            return Some(ResolvedConnection::failed(ConnectionStatus::closed(tenant)));
        }
        match entry.guard.cell.get() {
            Some(Outcome::Resolved(resolved)) => Some(resolved.clone()),
            _ => None,
        }
    }

    /// Remove a tenant entirely, closing its cached connection
    ///
    /// Returns false if the tenant was not registered.
    pub async fn unregister(&self, tenant: &str) -> bool {
        let removed = self.entries.write().await.remove(tenant);

        match removed {
            Some(entry) => {
                log::debug!("Unregistered connector for tenant {}", tenant);
                let _ = entry.retire(tenant).close().await;
                true
            }
            None => false,
        }
    }

    /// Look up a tenant's connector without connecting
    pub async fn info(&self, tenant: &str) -> Option<Arc<dyn BackendConnector>> {
        let entries = self.entries.read().await;
        entries.get(tenant).map(|entry| Arc::clone(&entry.connector))
    }

    /// Reset a tenant's guard so the next `resolve` connects again
    ///
    /// The connector registration is untouched. The displaced guard is
    /// returned; closing its connection is the caller's decision.
    pub async fn refresh(&self, tenant: &str) -> Option<RetiredGuard> {
        let mut entries = self.entries.write().await;
        let entry = entries.get_mut(tenant)?;
        log::debug!("Refreshing connector guard for tenant {}", tenant);
        Some(entry.reset_guard(tenant))
    }

    /// Dispose of a retired guard according to the lifecycle mode
    pub async fn release(&self, retired: RetiredGuard) {
        match self.lifecycle {
            LifecycleMode::Strict => {
                let _ = retired.close().await;
            }
            LifecycleMode::Legacy => retired.discard(),
        }
    }

    /// Close a tenant's cached connection
    ///
    /// In strict mode the guard is reset as well, so the next `resolve`
    /// reconnects. In legacy mode the guard stays fired and the tenant
    /// reports [`TenantState::Closed`] until refreshed. Returns true when a
    /// live connection was closed.
    pub async fn close(&self, tenant: &str) -> bool {
        match self.lifecycle {
            LifecycleMode::Strict => {
                let retired = {
                    let mut entries = self.entries.write().await;
                    match entries.get_mut(tenant) {
                        Some(entry) => entry.reset_guard(tenant),
                        None => return false,
                    }
                };
                retired.close().await
            }
            LifecycleMode::Legacy => {
                let handle = {
                    let mut entries = self.entries.write().await;
                    match entries.get_mut(tenant) {
                        Some(entry) if !entry.closed && entry.guard.cell.initialized() => {
                            entry.closed = true;
                            entry.guard.handle()
                        }
                        _ => return false,
                    }
                };
                match handle {
                    Some(handle) => {
                        log::debug!("Closing connection for tenant {}", tenant);
                        handle.close().await;
                        true
                    }
                    None => false,
                }
            }
        }
    }

    /// Close every tenant's cached connection; returns how many were live
    pub async fn close_all(&self) -> usize {
        let closed = match self.lifecycle {
            LifecycleMode::Strict => {
                let retired: Vec<RetiredGuard> = {
                    let mut entries = self.entries.write().await;
                    entries
                        .iter_mut()
                        .map(|(tenant, entry)| entry.reset_guard(tenant))
                        .collect()
                };
                join_all(retired.into_iter().map(RetiredGuard::close)).await
            }
            LifecycleMode::Legacy => {
                let handles: Vec<ConnectionHandle> = {
                    let mut entries = self.entries.write().await;
                    entries
                        .values_mut()
                        .filter(|entry| !entry.closed && entry.guard.cell.initialized())
                        .filter_map(|entry| {
                            entry.closed = true;
                            entry.guard.handle()
                        })
                        .collect()
                };
                join_all(handles.iter().map(|handle| async move {
                    handle.close().await;
                    true
                }))
                .await
            }
        };

        let count = closed.into_iter().filter(|closed| *closed).count();
        log::debug!("Closed {} tenant connection(s)", count);
        count
    }

    /// Remove every tenant, closing all cached connections
    ///
    /// Returns the number of tenants removed.
    pub async fn clear(&self) -> usize {
        let removed = std::mem::take(&mut *self.entries.write().await);
        let count = removed.len();

        join_all(
            removed
                .into_iter()
                .map(|(tenant, entry)| entry.retire(&tenant).close()),
        )
        .await;

        log::debug!("Cleared {} tenant connector(s)", count);
        count
    }

    /// Check if a tenant is registered
    pub async fn contains(&self, tenant: &str) -> bool {
        self.entries.read().await.contains_key(tenant)
    }

    /// Lifecycle state of a tenant, `None` if unregistered
    pub async fn state(&self, tenant: &str) -> Option<TenantState> {
        let entries = self.entries.read().await;
        entries.get(tenant).map(|entry| {
            if entry.closed {
                TenantState::Closed
            } else {
                entry.guard.state()
            }
        })
    }

    /// List all registered tenant keys, sorted
    pub async fn tenants(&self) -> Vec<String> {
        let mut tenants: Vec<String> = self.entries.read().await.keys().cloned().collect();
        tenants.sort();
        tenants
    }

    /// Snapshot of every registered connector
    pub async fn snapshot(&self) -> Vec<(String, Arc<dyn BackendConnector>)> {
        let entries = self.entries.read().await;
        entries
            .iter()
            .map(|(tenant, entry)| (tenant.clone(), Arc::clone(&entry.connector)))
            .collect()
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }

    /// Get statistics about the registry
    pub async fn stats(&self) -> RegistryStats {
        let entries = self.entries.read().await;
        let mut stats = RegistryStats {
            total_tenants: entries.len(),
            ..RegistryStats::default()
        };

        for (tenant, entry) in entries.iter() {
            let state = if entry.closed {
                TenantState::Closed
            } else {
                entry.guard.state()
            };
            match state {
                TenantState::Unresolved => stats.unresolved += 1,
                TenantState::Resolving => stats.resolving += 1,
                TenantState::Connected => stats.connected += 1,
                TenantState::Failed => stats.failed += 1,
                TenantState::Closed => stats.closed += 1,
            }
            stats.tenant_names.push(tenant.clone());
        }
        stats.tenant_names.sort();

        stats
    }
}

/// Statistics about the connector registry
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RegistryStats {
    /// Total number of registered tenants
    pub total_tenants: usize,
    pub unresolved: usize,
    pub resolving: usize,
    pub connected: usize,
    pub failed: usize,
    pub closed: usize,
    /// Sorted list of all tenant keys
    pub tenant_names: Vec<String>,
}

impl Default for ConnectorRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::connection::DatabaseConnection;
    use crate::error::Result;
    use async_trait::async_trait;
    use std::any::Any;
    use std::sync::atomic::AtomicUsize;

    #[derive(Debug, Default)]
    struct StubConnection {
        closed: AtomicBool,
    }

    #[async_trait]
    impl DatabaseConnection for StubConnection {
        fn engine(&self) -> &'static str {
            "stub"
        }

        async fn ping(&self) -> Result<bool> {
            Ok(true)
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

    #[derive(Debug)]
    struct StubConnector {
        succeed: bool,
        calls: AtomicUsize,
    }

    impl StubConnector {
        fn new(succeed: bool) -> Arc<Self> {
            Arc::new(Self {
                succeed,
                calls: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl BackendConnector for StubConnector {
        fn engine(&self) -> &'static str {
            "stub"
        }

        async fn connect(&self) -> ResolvedConnection {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.succeed {
                ResolvedConnection::connected(
                    Arc::new(StubConnection::default()),
                    ConnectionStatus::connected("ok"),
                )
            } else {
                ResolvedConnection::failed(ConnectionStatus::failed("refused", None))
            }
        }

        fn as_any(&self) -> &dyn Any {
            self
        }
    }

    #[tokio::test]
    async fn test_registry_creation() {
        let registry = ConnectorRegistry::new();
        let stats = registry.stats().await;

        assert_eq!(stats.total_tenants, 0);
        assert!(stats.tenant_names.is_empty());
        assert!(registry.is_empty().await);
        assert_eq!(registry.lifecycle(), LifecycleMode::Strict);
    }

    #[tokio::test]
    async fn test_state_transitions() {
        let registry = ConnectorRegistry::new();
        assert_eq!(registry.state("t1").await, None);

        let _ = registry.register("t1", StubConnector::new(true)).await;
        assert_eq!(registry.state("t1").await, Some(TenantState::Unresolved));

        let resolved = registry.resolve("t1").await;
        assert!(resolved.is_connected());
        assert_eq!(registry.state("t1").await, Some(TenantState::Connected));

        let retired = registry.refresh("t1").await.unwrap();
        assert!(retired.has_connection());
        assert!(retired.close().await);
        assert_eq!(registry.state("t1").await, Some(TenantState::Unresolved));

        assert!(registry.unregister("t1").await);
        assert_eq!(registry.state("t1").await, None);
    }

    #[tokio::test]
    async fn test_failed_result_is_cached() {
        let registry = ConnectorRegistry::new();
        let connector = StubConnector::new(false);
        let _ = registry.register("t2", connector.clone()).await;

        assert!(!registry.resolve("t2").await.is_connected());
        assert!(!registry.resolve("t2").await.is_connected());

        assert_eq!(connector.calls.load(Ordering::SeqCst), 1);
        assert_eq!(registry.state("t2").await, Some(TenantState::Failed));
    }

    #[tokio::test]
    async fn test_discarded_guard_leaves_connection_open() {
        let registry = ConnectorRegistry::with_lifecycle(LifecycleMode::Legacy);
        let _ = registry.register("t1", StubConnector::new(true)).await;

        let handle = registry.resolve("t1").await.handle().cloned().unwrap();
        registry.release(registry.refresh("t1").await.unwrap()).await;

        assert!(!handle.is_closed());
    }

    #[tokio::test]
    async fn test_stats_by_state() {
        let registry = ConnectorRegistry::new();
        let _ = registry.register("ok", StubConnector::new(true)).await;
        let _ = registry.register("bad", StubConnector::new(false)).await;
        let _ = registry.register("idle", StubConnector::new(true)).await;

        registry.resolve("ok").await;
        registry.resolve("bad").await;

        let stats = registry.stats().await;
        assert_eq!(stats.total_tenants, 3);
        assert_eq!(stats.connected, 1);
        assert_eq!(stats.failed, 1);
        assert_eq!(stats.unresolved, 1);
        assert_eq!(stats.tenant_names, vec!["bad", "idle", "ok"]);
    }
}
