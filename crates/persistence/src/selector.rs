//! Backend selection and the process-wide backend handle.
//!
//! The selector walks the configured descriptors in priority order, probes
//! each one and commits to the first healthy backend. The resulting
//! [`BackendHandle`] is cached for the lifetime of the selector; only
//! [`BackendSelector::reconnect`] can replace it.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use tokio::time::Instant;

use crate::backends::{AdapterFactory, DriverFactory};
use crate::config::StoreConfig;
use crate::core::{BackendAdapter, BackendDescriptor, BackendKind, Dialect};
use crate::error::{BackendResult, ConfigError, SelectionError, StoreResult};
use crate::pool::{ConnectionPool, PoolConfig, PooledConnection};
use crate::probe::probe_descriptor;

/// The resolved, live binding to the active backend.
#[derive(Debug)]
pub struct BackendHandle {
    descriptor: BackendDescriptor,
    adapter: Arc<dyn BackendAdapter>,
    dialect: Arc<dyn Dialect>,
    pool: ConnectionPool,
}

impl BackendHandle {
    /// Binds a pool to `adapter`.
    pub fn new(
        descriptor: BackendDescriptor,
        adapter: Arc<dyn BackendAdapter>,
        pool_config: PoolConfig,
    ) -> Self {
        let dialect = adapter.dialect();
        let pool = ConnectionPool::new(Arc::clone(&adapter), pool_config);
        Self {
            descriptor,
            adapter,
            dialect,
            pool,
        }
    }

    /// Descriptor of the active backend.
    pub fn descriptor(&self) -> &BackendDescriptor {
        &self.descriptor
    }

    /// Role of the active backend.
    pub fn kind(&self) -> BackendKind {
        self.descriptor.kind
    }

    /// Adapter of the active backend.
    pub fn adapter(&self) -> &Arc<dyn BackendAdapter> {
        &self.adapter
    }

    /// Dialect of the active backend.
    pub fn dialect(&self) -> &dyn Dialect {
        self.dialect.as_ref()
    }

    /// Connection pool bound to the active backend.
    pub fn pool(&self) -> &ConnectionPool {
        &self.pool
    }

    /// Checks out a connection using the configured acquire timeout.
    pub async fn acquire(&self) -> BackendResult<PooledConnection> {
        self.pool.acquire(self.pool.config().acquire_timeout).await
    }

    /// Waits for outstanding connections, then closes the pool.
    pub async fn shutdown(&self, drain_timeout: Duration) {
        if !self.pool.drain(drain_timeout).await {
            tracing::warn!(
                backend = %self.descriptor,
                in_use = self.pool.stats().in_use,
                "Closing pool with connections still checked out"
            );
        }
        self.pool.close();
    }
}

/// Resolves and caches the active backend.
#[derive(Debug)]
pub struct BackendSelector {
    descriptors: Vec<BackendDescriptor>,
    factory: Arc<dyn AdapterFactory>,
    probe_timeout: Duration,
    pool_config: PoolConfig,
    drain_timeout: Duration,
    resolving: tokio::sync::Mutex<()>,
    current: RwLock<Option<Arc<BackendHandle>>>,
}

impl BackendSelector {
    /// Creates a selector over `descriptors`, ordered by their priority rank.
    pub fn new(
        mut descriptors: Vec<BackendDescriptor>,
        probe_timeout: Duration,
        pool_config: PoolConfig,
    ) -> Result<Self, ConfigError> {
        if descriptors.is_empty() {
            return Err(ConfigError::NoDescriptors);
        }
        descriptors.sort_by_key(|d| d.priority);
        Ok(Self {
            descriptors,
            factory: Arc::new(DriverFactory),
            probe_timeout,
            pool_config,
            drain_timeout: Duration::from_secs(30),
            resolving: tokio::sync::Mutex::new(()),
            current: RwLock::new(None),
        })
    }

    /// Creates a selector from loaded configuration.
    pub fn from_config(config: &StoreConfig) -> Result<Self, ConfigError> {
        Self::new(
            config.descriptors()?,
            config.probe_timeout(),
            config.pool_config(),
        )
    }

    /// Replaces the adapter factory.
    pub fn with_factory(mut self, factory: Arc<dyn AdapterFactory>) -> Self {
        self.factory = factory;
        self
    }

    /// Sets how long a reconnect waits for the old pool to drain.
    pub fn with_drain_timeout(mut self, timeout: Duration) -> Self {
        self.drain_timeout = timeout;
        self
    }

    /// Descriptors in the order they are tried.
    pub fn descriptors(&self) -> &[BackendDescriptor] {
        &self.descriptors
    }

    /// Adapter factory in use.
    pub fn factory(&self) -> &Arc<dyn AdapterFactory> {
        &self.factory
    }

    /// Per-descriptor probe timeout.
    pub fn probe_timeout(&self) -> Duration {
        self.probe_timeout
    }

    /// The active handle, if one has been resolved.
    pub fn current(&self) -> Option<Arc<BackendHandle>> {
        self.current.read().clone()
    }

    /// Returns the active handle, resolving it on first use.
    pub async fn resolve(&self) -> StoreResult<Arc<BackendHandle>> {
        if let Some(handle) = self.current() {
            return Ok(handle);
        }

        let _guard = self.resolving.lock().await;
        if let Some(handle) = self.current() {
            return Ok(handle);
        }

        let handle = Arc::new(self.select().await?);
        *self.current.write() = Some(Arc::clone(&handle));
        Ok(handle)
    }

    /// Re-runs the full probe sequence.
    ///
    /// The active handle is replaced only when a different backend wins; the
    /// old pool is drained and closed first.
    pub async fn reconnect(&self) -> StoreResult<Arc<BackendHandle>> {
        let _guard = self.resolving.lock().await;
        let candidate = self.select().await?;

        let previous = self.current();
        if let Some(previous) = &previous
            && previous.kind() == candidate.kind()
        {
            tracing::info!(backend = %previous.descriptor(), "Reconnect kept the active backend");
            candidate.pool().close();
            return Ok(Arc::clone(previous));
        }

        if let Some(previous) = previous {
            tracing::info!(
                from = %previous.descriptor(),
                to = %candidate.descriptor(),
                "Switching active backend"
            );
            previous.shutdown(self.drain_timeout).await;
        }

        let handle = Arc::new(candidate);
        *self.current.write() = Some(Arc::clone(&handle));
        Ok(handle)
    }

    async fn select(&self) -> StoreResult<BackendHandle> {
        // Every descriptor must be well-formed, not only the ones probed.
        let adapters = self
            .descriptors
            .iter()
            .map(|d| self.factory.adapter(d))
            .collect::<Result<Vec<_>, _>>()?;

        let started = Instant::now();
        let mut attempts = Vec::new();
        for (descriptor, adapter) in self.descriptors.iter().zip(adapters) {
            let report = probe_descriptor(descriptor, adapter.as_ref(), self.probe_timeout).await;
            if report.outcome.is_healthy() {
                tracing::info!(
                    backend = %descriptor,
                    skipped = attempts.len(),
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "Selected backend"
                );
                return Ok(BackendHandle::new(
                    descriptor.clone(),
                    adapter,
                    self.pool_config.clone(),
                ));
            }
            attempts.push(report);
        }

        tracing::error!(tried = attempts.len(), "No backend available");
        Err(SelectionError::NoBackendAvailable { attempts }.into())
    }
}
