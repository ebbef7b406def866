//! Bounded connection pool for the active backend.
//!
//! At most `max_size` connections are checked out at once. Callers beyond
//! that wait in FIFO order on a semaphore, up to `max_waiters` of them, for at
//! most their acquire timeout. Idle connections are reused newest-first and
//! pinged before being handed out; connections idle longer than the idle
//! timeout are closed down to the `min_idle` floor.
//!
//! Every checkout is tracked as a lease. A lease held past the leak threshold
//! is reported once; past threshold plus grace its pool slot is reclaimed so
//! other callers are not starved. The leaked connection itself is closed when
//! its guard is eventually dropped and never returns to the idle set.

use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::ops::{Deref, DerefMut};
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::{OwnedSemaphorePermit, Semaphore, TryAcquireError};
use tokio::time::{Instant, MissedTickBehavior};

use crate::core::{BackendAdapter, Connection};
use crate::error::{BackendError, BackendResult};

/// Lower bound on the liveness ping of an idle connection, so a caller that
/// got its slot just before the deadline does not discard a healthy one.
const MIN_PING_BUDGET: Duration = Duration::from_millis(100);

fn default_max_size() -> usize {
    10
}

fn default_min_idle() -> usize {
    1
}

fn default_max_waiters() -> usize {
    64
}

fn default_acquire_timeout() -> Duration {
    Duration::from_millis(2000)
}

fn default_idle_timeout() -> Duration {
    Duration::from_secs(600)
}

fn default_leak_threshold() -> Duration {
    Duration::from_secs(300)
}

fn default_leak_grace() -> Duration {
    Duration::from_secs(60)
}

fn default_maintenance_interval() -> Option<Duration> {
    Some(Duration::from_secs(30))
}

/// Pool sizing and timing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolConfig {
    /// Maximum number of connections checked out at once.
    pub max_size: usize,
    /// Idle connections kept open regardless of idle time.
    pub min_idle: usize,
    /// Maximum number of callers waiting for a connection.
    pub max_waiters: usize,
    /// Acquire timeout used by [`crate::selector::BackendHandle::acquire`].
    pub acquire_timeout: Duration,
    /// Idle time after which a connection above the floor is closed.
    pub idle_timeout: Duration,
    /// Lease age at which a checkout is reported as leaked.
    pub leak_threshold: Duration,
    /// Additional time before a leaked lease's slot is reclaimed.
    pub leak_grace: Duration,
    /// Period of the background maintenance task; `None` disables it.
    pub maintenance_interval: Option<Duration>,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_size: default_max_size(),
            min_idle: default_min_idle(),
            max_waiters: default_max_waiters(),
            acquire_timeout: default_acquire_timeout(),
            idle_timeout: default_idle_timeout(),
            leak_threshold: default_leak_threshold(),
            leak_grace: default_leak_grace(),
            maintenance_interval: default_maintenance_interval(),
        }
    }
}

/// Point-in-time pool counters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PoolStats {
    /// Backend name.
    pub backend: String,
    /// Configured capacity.
    pub max_size: usize,
    /// Open connections (idle plus in use).
    pub size: usize,
    /// Idle connections.
    pub idle: usize,
    /// Checked-out connections.
    pub in_use: usize,
    /// Callers currently waiting.
    pub waiting: usize,
    /// Whether the pool has been closed.
    pub closed: bool,
}

/// What one maintenance pass did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReapSummary {
    /// Idle connections closed.
    pub evicted_idle: usize,
    /// Leases newly reported as leaked.
    pub leaks_reported: usize,
    /// Leased slots reclaimed.
    pub leaks_reclaimed: usize,
}

struct IdleConnection {
    conn: Box<dyn Connection>,
    idle_since: Instant,
}

struct Lease {
    acquired_at: Instant,
    reported: bool,
}

#[derive(Default)]
struct PoolState {
    idle: VecDeque<IdleConnection>,
    leases: HashMap<u64, Lease>,
    next_lease: u64,
    waiting: usize,
    closed: bool,
}

struct PoolInner {
    name: String,
    adapter: Arc<dyn BackendAdapter>,
    config: PoolConfig,
    semaphore: Arc<Semaphore>,
    state: Mutex<PoolState>,
}

/// A bounded pool of connections to one backend.
///
/// Cloning is cheap; clones share the same pool.
#[derive(Clone)]
pub struct ConnectionPool {
    inner: Arc<PoolInner>,
}

impl fmt::Debug for ConnectionPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionPool")
            .field("backend", &self.inner.name)
            .field("config", &self.inner.config)
            .finish()
    }
}

impl ConnectionPool {
    /// Creates an empty pool. Connections are opened on demand.
    ///
    /// When called inside a tokio runtime and `maintenance_interval` is set,
    /// a background task runs [`reap`](Self::reap) until the pool is closed
    /// or dropped.
    pub fn new(adapter: Arc<dyn BackendAdapter>, config: PoolConfig) -> Self {
        let inner = Arc::new(PoolInner {
            name: adapter.name().to_string(),
            semaphore: Arc::new(Semaphore::new(config.max_size)),
            adapter,
            config,
            state: Mutex::new(PoolState::default()),
        });
        spawn_maintenance(&inner);
        Self { inner }
    }

    /// Backend name.
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// The adapter connections are opened through.
    pub fn adapter(&self) -> &Arc<dyn BackendAdapter> {
        &self.inner.adapter
    }

    /// Pool configuration.
    pub fn config(&self) -> &PoolConfig {
        &self.inner.config
    }

    /// Checks out a connection, waiting at most `timeout`.
    ///
    /// Fails with [`BackendError::PoolExhausted`] when no slot frees up in
    /// time, the wait queue is full, or a new connection cannot be opened
    /// within the remaining time.
    pub async fn acquire(&self, timeout: Duration) -> BackendResult<PooledConnection> {
        let inner = &self.inner;
        let started = Instant::now();

        let permit = match Arc::clone(&inner.semaphore).try_acquire_owned() {
            Ok(permit) => permit,
            Err(TryAcquireError::Closed) => return Err(inner.closed_error()),
            Err(TryAcquireError::NoPermits) => {
                let _slot = WaitSlot::enter(inner)?;
                match tokio::time::timeout(timeout, Arc::clone(&inner.semaphore).acquire_owned())
                    .await
                {
                    Ok(Ok(permit)) => permit,
                    Ok(Err(_)) => return Err(inner.closed_error()),
                    Err(_) => {
                        let waited_ms = started.elapsed().as_millis() as u64;
                        tracing::warn!(backend = %inner.name, waited_ms, "Connection pool exhausted");
                        return Err(BackendError::PoolExhausted {
                            backend_name: inner.name.clone(),
                            waited_ms,
                        });
                    }
                }
            }
        };

        while let Some(mut idle) = inner.pop_idle()? {
            if idle.conn.is_broken() {
                tracing::debug!(backend = %inner.name, "Discarding broken idle connection");
                continue;
            }
            let budget = timeout.saturating_sub(started.elapsed()).max(MIN_PING_BUDGET);
            match tokio::time::timeout(budget, idle.conn.ping()).await {
                Ok(Ok(())) => return Ok(inner.lease(idle.conn, permit)),
                _ => {
                    tracing::debug!(backend = %inner.name, "Discarding stale idle connection");
                }
            }
        }

        let remaining = timeout.saturating_sub(started.elapsed());
        let conn = match tokio::time::timeout(remaining, inner.adapter.connect()).await {
            Ok(Ok(conn)) => conn,
            Ok(Err(e)) => return Err(e),
            Err(_) => {
                let waited_ms = started.elapsed().as_millis() as u64;
                tracing::warn!(backend = %inner.name, waited_ms, "Timed out opening pooled connection");
                return Err(BackendError::PoolExhausted {
                    backend_name: inner.name.clone(),
                    waited_ms,
                });
            }
        };
        tracing::debug!(backend = %inner.name, "Opened pooled connection");

        Ok(inner.lease(conn, permit))
    }

    /// Returns a connection to the pool.
    ///
    /// Dropping a [`PooledConnection`] has the same effect.
    pub fn release(&self, conn: PooledConnection) {
        if !Arc::ptr_eq(&self.inner, &conn.pool) {
            tracing::warn!(
                backend = %self.inner.name,
                owner = %conn.pool.name,
                "Connection released to a pool that did not issue it"
            );
        }
        drop(conn);
    }

    /// Current counters.
    pub fn stats(&self) -> PoolStats {
        let state = self.inner.state.lock();
        PoolStats {
            backend: self.inner.name.clone(),
            max_size: self.inner.config.max_size,
            size: state.idle.len() + state.leases.len(),
            idle: state.idle.len(),
            in_use: state.leases.len(),
            waiting: state.waiting,
            closed: state.closed,
        }
    }

    /// Runs one maintenance pass: idle eviction and leak reclamation.
    pub fn reap(&self) -> ReapSummary {
        self.inner.reap()
    }

    /// Waits until no connection is checked out, for at most `timeout`.
    ///
    /// Returns false when leases were still outstanding at the deadline.
    pub async fn drain(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            if self.inner.state.lock().leases.is_empty() {
                return true;
            }
            if Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(Duration::from_millis(25)).await;
        }
    }

    /// Closes the pool.
    ///
    /// Idle connections are closed immediately; checked-out connections are
    /// closed when released. Waiting and future callers get
    /// [`BackendError::PoolClosed`].
    pub fn close(&self) {
        let idle: Vec<_> = {
            let mut state = self.inner.state.lock();
            if state.closed {
                return;
            }
            state.closed = true;
            state.idle.drain(..).collect()
        };
        self.inner.semaphore.close();
        tracing::info!(backend = %self.inner.name, closed_idle = idle.len(), "Connection pool closed");
    }

    /// Whether [`close`](Self::close) has been called.
    pub fn is_closed(&self) -> bool {
        self.inner.state.lock().closed
    }
}

impl PoolInner {
    fn closed_error(&self) -> BackendError {
        BackendError::PoolClosed {
            backend_name: self.name.clone(),
        }
    }

    fn pop_idle(&self) -> BackendResult<Option<IdleConnection>> {
        let mut state = self.state.lock();
        if state.closed {
            return Err(self.closed_error());
        }
        Ok(state.idle.pop_back())
    }

    fn lease(self: &Arc<Self>, conn: Box<dyn Connection>, permit: OwnedSemaphorePermit) -> PooledConnection {
        let mut state = self.state.lock();
        let lease_id = state.next_lease;
        state.next_lease += 1;
        state.leases.insert(
            lease_id,
            Lease {
                acquired_at: Instant::now(),
                reported: false,
            },
        );
        PooledConnection {
            conn: Some(conn),
            permit: Some(permit),
            lease_id,
            pool: Arc::clone(self),
        }
    }

    fn check_in(&self, lease_id: u64, conn: Box<dyn Connection>, permit: Option<OwnedSemaphorePermit>) {
        let mut state = self.state.lock();
        if state.leases.remove(&lease_id).is_none() {
            // Slot was reclaimed by reap(); its permit was already re-issued.
            drop(state);
            if let Some(permit) = permit {
                permit.forget();
            }
            tracing::warn!(backend = %self.name, lease_id, "Leaked connection returned after reclamation; closing it");
            return;
        }

        let discard = if state.closed || conn.is_broken() {
            Some(conn)
        } else {
            state.idle.push_back(IdleConnection {
                conn,
                idle_since: Instant::now(),
            });
            None
        };
        drop(state);
        drop(discard);
        drop(permit);
    }

    fn reap(&self) -> ReapSummary {
        let now = Instant::now();
        let threshold = self.config.leak_threshold;
        let deadline = threshold + self.config.leak_grace;

        let mut summary = ReapSummary::default();
        let mut evicted = Vec::new();
        let mut reclaimed = Vec::new();

        {
            let mut state = self.state.lock();

            while state.idle.len() > self.config.min_idle {
                let expired = state
                    .idle
                    .front()
                    .is_some_and(|c| now.duration_since(c.idle_since) >= self.config.idle_timeout);
                if !expired {
                    break;
                }
                if let Some(idle) = state.idle.pop_front() {
                    evicted.push(idle.conn);
                }
            }

            for (&lease_id, lease) in state.leases.iter_mut() {
                let held = now.duration_since(lease.acquired_at);
                if held >= deadline {
                    reclaimed.push((lease_id, held));
                } else if held >= threshold && !lease.reported {
                    lease.reported = true;
                    summary.leaks_reported += 1;
                    tracing::warn!(
                        backend = %self.name,
                        lease_id,
                        held = %humantime::format_duration(Duration::from_secs(held.as_secs())),
                        "Connection held past leak threshold"
                    );
                }
            }
            for (lease_id, _) in &reclaimed {
                state.leases.remove(lease_id);
            }
        }

        if !reclaimed.is_empty() {
            self.semaphore.add_permits(reclaimed.len());
        }
        for (lease_id, held) in &reclaimed {
            tracing::error!(
                backend = %self.name,
                lease_id,
                held = %humantime::format_duration(Duration::from_secs(held.as_secs())),
                "Connection leaked: pool slot reclaimed. The caller must release connections it acquires"
            );
        }

        summary.evicted_idle = evicted.len();
        summary.leaks_reclaimed = reclaimed.len();
        if summary.evicted_idle > 0 {
            tracing::debug!(backend = %self.name, evicted = summary.evicted_idle, "Closed idle connections");
        }
        summary
    }
}

struct WaitSlot<'a>(&'a PoolInner);

impl<'a> WaitSlot<'a> {
    fn enter(pool: &'a PoolInner) -> BackendResult<Self> {
        let mut state = pool.state.lock();
        if state.closed {
            return Err(pool.closed_error());
        }
        if state.waiting >= pool.config.max_waiters {
            tracing::warn!(backend = %pool.name, waiting = state.waiting, "Connection wait queue full");
            return Err(BackendError::PoolExhausted {
                backend_name: pool.name.clone(),
                waited_ms: 0,
            });
        }
        state.waiting += 1;
        Ok(Self(pool))
    }
}

impl Drop for WaitSlot<'_> {
    fn drop(&mut self) {
        self.0.state.lock().waiting -= 1;
    }
}

fn spawn_maintenance(inner: &Arc<PoolInner>) {
    let Some(period) = inner.config.maintenance_interval else {
        return;
    };
    let Ok(runtime) = tokio::runtime::Handle::try_current() else {
        tracing::debug!(backend = %inner.name, "No runtime; pool maintenance disabled");
        return;
    };

    let pool: Weak<PoolInner> = Arc::downgrade(inner);
    runtime.spawn(async move {
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        ticker.tick().await;
        loop {
            ticker.tick().await;
            let Some(pool) = pool.upgrade() else {
                break;
            };
            if pool.state.lock().closed {
                break;
            }
            pool.reap();
        }
    });
}

/// A checked-out connection.
///
/// Dereferences to the underlying [`Connection`]. Dropping the guard returns
/// the connection to its pool.
pub struct PooledConnection {
    conn: Option<Box<dyn Connection>>,
    permit: Option<OwnedSemaphorePermit>,
    lease_id: u64,
    pool: Arc<PoolInner>,
}

impl PooledConnection {
    /// Lease identifier, as reported in leak logs.
    pub fn lease_id(&self) -> u64 {
        self.lease_id
    }
}

impl fmt::Debug for PooledConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PooledConnection")
            .field("backend", &self.pool.name)
            .field("lease_id", &self.lease_id)
            .finish()
    }
}

impl Deref for PooledConnection {
    type Target = dyn Connection;

    fn deref(&self) -> &Self::Target {
        self.conn.as_deref().expect("connection present until drop")
    }
}

impl DerefMut for PooledConnection {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.conn.as_deref_mut().expect("connection present until drop")
    }
}

impl Drop for PooledConnection {
    fn drop(&mut self) {
        if let Some(conn) = self.conn.take() {
            self.pool.check_in(self.lease_id, conn, self.permit.take());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = PoolConfig::default();
        assert_eq!(config.max_size, 10);
        assert_eq!(config.min_idle, 1);
        assert_eq!(config.acquire_timeout, Duration::from_secs(2));
        assert_eq!(config.leak_threshold, Duration::from_secs(300));
        assert!(config.maintenance_interval.is_some());
    }
}
