//! Connection pool tests: capacity, timeouts, reuse, eviction and leaks.

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{FakeAdapter, FakeMode, test_pool_config};
use guild_persistence::error::BackendError;
use guild_persistence::pool::{ConnectionPool, PoolConfig};

fn pool(adapter: &Arc<FakeAdapter>, config: PoolConfig) -> ConnectionPool {
    ConnectionPool::new(adapter.clone(), config)
}

#[tokio::test(start_paused = true)]
async fn test_acquire_beyond_capacity_times_out() {
    let adapter = FakeAdapter::healthy("fake");
    let pool = pool(&adapter, test_pool_config(5));

    let mut held = Vec::new();
    for _ in 0..5 {
        held.push(pool.acquire(Duration::from_secs(2)).await.unwrap());
    }

    let err = pool.acquire(Duration::from_secs(2)).await.unwrap_err();

    assert!(err.is_retryable());
    match err {
        BackendError::PoolExhausted { waited_ms, .. } => assert_eq!(waited_ms, 2000),
        other => panic!("expected PoolExhausted, got {other:?}"),
    }
    assert_eq!(pool.stats().in_use, 5);
    assert_eq!(pool.stats().waiting, 0);
}

#[tokio::test(start_paused = true)]
async fn test_slow_connect_is_reported_as_exhaustion_at_the_deadline() {
    let adapter = FakeAdapter::new("fake", FakeMode::Slow);
    let pool = pool(&adapter, test_pool_config(5));

    let started = tokio::time::Instant::now();
    let err = pool.acquire(Duration::from_secs(2)).await.unwrap_err();

    assert_eq!(started.elapsed(), Duration::from_secs(2));
    assert!(err.is_retryable());
    match err {
        BackendError::PoolExhausted { waited_ms, .. } => assert_eq!(waited_ms, 2000),
        other => panic!("expected PoolExhausted, got {other:?}"),
    }
    assert_eq!(pool.stats().in_use, 0, "slot is returned after the failed open");

    adapter.set_mode(FakeMode::Healthy);
    assert!(pool.acquire(Duration::from_secs(2)).await.is_ok());
}

#[tokio::test(start_paused = true)]
async fn test_waiter_is_served_when_a_connection_is_released() {
    let adapter = FakeAdapter::healthy("fake");
    let pool = pool(&adapter, test_pool_config(1));

    let first = pool.acquire(Duration::from_secs(2)).await.unwrap();
    let waiter = {
        let pool = pool.clone();
        tokio::spawn(async move { pool.acquire(Duration::from_secs(2)).await })
    };

    tokio::time::sleep(Duration::from_millis(500)).await;
    assert_eq!(pool.stats().waiting, 1);
    pool.release(first);

    let second = waiter.await.unwrap().unwrap();
    assert_eq!(adapter.connects(), 1, "released connection is reused");
    drop(second);
    assert_eq!(pool.stats().idle, 1);
}

#[tokio::test]
async fn test_idle_connection_is_reused() {
    let adapter = FakeAdapter::healthy("fake");
    let pool = pool(&adapter, test_pool_config(2));

    let conn = pool.acquire(Duration::from_secs(1)).await.unwrap();
    drop(conn);
    let stats = pool.stats();
    assert_eq!((stats.size, stats.idle, stats.in_use), (1, 1, 0));

    let _conn = pool.acquire(Duration::from_secs(1)).await.unwrap();
    assert_eq!(adapter.connects(), 1);
    assert_eq!(pool.stats().in_use, 1);
}

#[tokio::test]
async fn test_stale_idle_connection_is_replaced() {
    let adapter = FakeAdapter::healthy("fake");
    let pool = pool(&adapter, test_pool_config(2));

    drop(pool.acquire(Duration::from_secs(1)).await.unwrap());
    adapter.fail_pings(true);

    // The idle connection fails its ping and is discarded; a fresh one is opened.
    let mut conn = pool.acquire(Duration::from_secs(1)).await.unwrap();
    assert_eq!(adapter.connects(), 2);

    adapter.fail_pings(false);
    conn.ping().await.unwrap();
    assert_eq!(pool.stats().size, 1);
}

#[tokio::test(start_paused = true)]
async fn test_idle_connections_evicted_down_to_floor() {
    let adapter = FakeAdapter::healthy("fake");
    let config = PoolConfig {
        min_idle: 1,
        idle_timeout: Duration::from_secs(60),
        ..test_pool_config(3)
    };
    let pool = pool(&adapter, config);

    let a = pool.acquire(Duration::from_secs(1)).await.unwrap();
    let b = pool.acquire(Duration::from_secs(1)).await.unwrap();
    let c = pool.acquire(Duration::from_secs(1)).await.unwrap();
    drop((a, b, c));
    assert_eq!(pool.stats().idle, 3);

    assert_eq!(pool.reap().evicted_idle, 0);

    tokio::time::advance(Duration::from_secs(61)).await;
    let summary = pool.reap();

    assert_eq!(summary.evicted_idle, 2);
    assert_eq!(pool.stats().idle, 1);
}

#[tokio::test(start_paused = true)]
async fn test_leaked_connection_is_reported_then_reclaimed() {
    let adapter = FakeAdapter::healthy("fake");
    let config = PoolConfig {
        leak_threshold: Duration::from_secs(300),
        leak_grace: Duration::from_secs(60),
        ..test_pool_config(1)
    };
    let pool = pool(&adapter, config);

    let leaked = pool.acquire(Duration::from_secs(1)).await.unwrap();

    tokio::time::advance(Duration::from_secs(301)).await;
    let summary = pool.reap();
    assert_eq!(summary.leaks_reported, 1);
    assert_eq!(summary.leaks_reclaimed, 0);

    // Reported once only.
    assert_eq!(pool.reap().leaks_reported, 0);

    tokio::time::advance(Duration::from_secs(60)).await;
    let summary = pool.reap();
    assert_eq!(summary.leaks_reclaimed, 1);
    assert_eq!(pool.stats().in_use, 0);

    // The reclaimed slot is usable again.
    let fresh = pool.acquire(Duration::from_secs(1)).await.unwrap();
    assert_eq!(adapter.connects(), 2);

    // The leaked connection never rejoins the idle set, and its late return
    // does not free a second slot.
    drop(leaked);
    assert_eq!(pool.stats().idle, 0);
    drop(fresh);
    let stats = pool.stats();
    assert_eq!((stats.idle, stats.in_use), (1, 0));

    let _a = pool.acquire(Duration::from_secs(1)).await.unwrap();
    let err = pool.acquire(Duration::from_millis(100)).await.unwrap_err();
    assert!(matches!(err, BackendError::PoolExhausted { .. }));
}

#[tokio::test(start_paused = true)]
async fn test_full_wait_queue_fails_fast() {
    let adapter = FakeAdapter::healthy("fake");
    let config = PoolConfig {
        max_waiters: 1,
        ..test_pool_config(1)
    };
    let pool = pool(&adapter, config);

    let _held = pool.acquire(Duration::from_secs(1)).await.unwrap();
    let waiter = {
        let pool = pool.clone();
        tokio::spawn(async move { pool.acquire(Duration::from_secs(10)).await })
    };
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(pool.stats().waiting, 1);

    let err = pool.acquire(Duration::from_secs(10)).await.unwrap_err();
    assert!(matches!(err, BackendError::PoolExhausted { waited_ms: 0, .. }));

    waiter.abort();
}

#[tokio::test]
async fn test_closed_pool_rejects_acquire() {
    let adapter = FakeAdapter::healthy("fake");
    let pool = pool(&adapter, test_pool_config(2));

    let held = pool.acquire(Duration::from_secs(1)).await.unwrap();
    drop(pool.acquire(Duration::from_secs(1)).await.unwrap());
    pool.close();

    assert!(pool.is_closed());
    assert_eq!(pool.stats().idle, 0);
    let err = pool.acquire(Duration::from_secs(1)).await.unwrap_err();
    assert!(matches!(err, BackendError::PoolClosed { .. }));

    // Connections returned after close are discarded.
    drop(held);
    assert_eq!(pool.stats().size, 0);
}

#[tokio::test(start_paused = true)]
async fn test_drain_waits_for_outstanding_leases() {
    let adapter = FakeAdapter::healthy("fake");
    let pool = pool(&adapter, test_pool_config(2));

    let held = pool.acquire(Duration::from_secs(1)).await.unwrap();
    assert!(!pool.drain(Duration::from_millis(100)).await);

    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(200)).await;
        drop(held);
    });
    assert!(pool.drain(Duration::from_secs(1)).await);
}
