//! Tests for connection pool functionality

use std::sync::Arc;
use std::thread;

use pretty_assertions::assert_eq;
use tidepool_core::{ConnectionConfig, TidepoolError};
use tidepool_drivers::DriverRegistry;

use super::config::{MAX_POOL_SIZE, PoolConfig};
use super::pool::ConnectionPool;
use super::stats::PoolStats;
use crate::Connection;
use crate::test_support::{MockDriver, MockState};

fn mock_config() -> ConnectionConfig {
    ConnectionConfig::new("mock").with_host("localhost").with_database("app")
}

fn mock_pool(size: usize) -> (ConnectionPool, Arc<MockState>) {
    let (driver, state) = MockDriver::new();
    let mut registry = DriverRegistry::new();
    registry.register(driver);
    let pool = ConnectionPool::with_registry(
        PoolConfig::new(size).expect("valid size"),
        registry,
        Some(mock_config()),
    )
    .expect("pool");
    (pool, state)
}

// =============================================================================
// PoolConfig tests
// =============================================================================

#[test]
fn test_pool_config_creation() {
    let config = PoolConfig::new(8).expect("valid");
    assert_eq!(config.size(), 8);
    assert!(!config.test_on_checkout());
}

#[test]
fn test_pool_config_default() {
    let config = PoolConfig::default();
    assert_eq!(config.size(), 5);
    assert!(config.validate().is_ok());
}

#[test]
fn test_pool_config_rejects_bad_sizes() {
    for size in [0, MAX_POOL_SIZE + 1, 100] {
        assert!(
            matches!(PoolConfig::new(size), Err(TidepoolError::Configuration(_))),
            "size {size} must be rejected"
        );
    }
}

#[test]
fn test_pool_config_deserialization() {
    let config: PoolConfig = toml::from_str("size = 3\ntest_on_checkout = true").expect("parse");
    assert_eq!(config, PoolConfig::new(3).expect("valid").with_test_on_checkout(true));

    let config: PoolConfig = toml::from_str("").expect("parse");
    assert_eq!(config, PoolConfig::default());
}

// =============================================================================
// PoolStats tests
// =============================================================================

#[test]
fn test_pool_stats() {
    let stats = PoolStats::new(4, 0, 4);
    assert!(stats.is_exhausted());
    assert!(!stats.is_full());

    let stats = PoolStats::new(4, 4, 4);
    assert!(stats.is_full());
    assert_eq!(stats.capacity(), 4);
    assert_eq!(stats.created(), 4);
}

// =============================================================================
// ConnectionPool tests
// =============================================================================

#[test]
fn test_every_valid_size_fills_exactly() {
    for size in 1..=MAX_POOL_SIZE {
        let (pool, state) = mock_pool(size);
        assert_eq!(pool.idle_count(), size);

        let mut held = Vec::with_capacity(size);
        for _ in 0..size {
            held.push(pool.get_connection().expect("connection available"));
        }
        assert!(matches!(
            pool.get_connection(),
            Err(TidepoolError::PoolExhausted)
        ));

        // One probe plus one session per pooled connection
        assert_eq!(state.opens(), size + 1);
    }
}

#[test]
fn test_get_connection_on_empty_pool() {
    let (driver, _state) = MockDriver::new();
    let mut registry = DriverRegistry::new();
    registry.register(driver);
    let pool = ConnectionPool::with_registry(PoolConfig::default(), registry, None)
        .expect("unconfigured pool");

    assert!(matches!(
        pool.get_connection(),
        Err(TidepoolError::PoolExhausted)
    ));
    assert!(!pool.is_configured());
}

#[test]
fn test_add_connection_requires_config() {
    let (driver, _state) = MockDriver::new();
    let mut registry = DriverRegistry::new();
    registry.register(driver);
    let pool = ConnectionPool::with_registry(PoolConfig::default(), registry, None)
        .expect("unconfigured pool");

    assert!(matches!(
        pool.add_connection(None),
        Err(TidepoolError::Configuration(_))
    ));
}

#[test]
fn test_add_connection_on_full_pool() {
    let (pool, _state) = mock_pool(2);
    assert!(matches!(
        pool.add_connection(None),
        Err(TidepoolError::PoolFull)
    ));
}

#[test]
fn test_checkout_and_return() {
    let (pool, state) = mock_pool(2);

    let mut conn = pool.get_connection().expect("connection");
    assert_eq!(pool.idle_count(), 1);
    conn.query("SELECT 1", ()).expect("query");

    pool.add_connection(Some(conn)).expect("return connection");
    assert_eq!(pool.idle_count(), 2);
    assert_eq!(state.closes(), 1, "only the probe was closed");

    let stats = pool.stats();
    assert_eq!(stats, PoolStats::new(2, 2, 2));
}

#[test]
fn test_add_connection_creates_when_below_capacity() {
    let (pool, _state) = mock_pool(3);
    let taken = pool.get_connection().expect("connection");
    drop(taken);

    pool.add_connection(None).expect("create replacement");
    assert_eq!(pool.idle_count(), 3);
    assert_eq!(pool.stats().created(), 4);
}

#[test]
fn test_add_connection_rejects_other_driver() {
    let (pool, _state) = mock_pool(2);
    let _taken = pool.get_connection().expect("connection");

    let (other, other_state) = MockDriver::named("other");
    let foreign = Connection::new(other, ConnectionConfig::new("other").with_database("x"));

    match pool.add_connection(Some(foreign)) {
        Err(TidepoolError::ConnectionMismatch { expected, found }) => {
            assert_eq!(expected, "mock");
            assert_eq!(found, "other");
        }
        other => panic!("expected mismatch, got {other:?}"),
    }
    assert_eq!(other_state.closes(), 1, "rejected connection is closed");
}

#[test]
fn test_add_connection_full_pool_closes_rejected_connection() {
    let (driver, state) = MockDriver::new();
    let mut registry = DriverRegistry::new();
    registry.register(driver.clone());
    let pool = ConnectionPool::with_registry(
        PoolConfig::new(1).expect("size"),
        registry,
        Some(mock_config()),
    )
    .expect("pool");
    let closes_after_fill = state.closes();
    assert!(pool.stats().is_full());

    let extra = Connection::new(driver, mock_config());
    assert!(matches!(
        pool.add_connection(Some(extra)),
        Err(TidepoolError::PoolFull)
    ));
    assert_eq!(state.closes(), closes_after_fill + 1);
    assert_eq!(pool.idle_count(), 1);
}

#[test]
fn test_add_connection_propagates_open_failure() {
    let (driver, state) = MockDriver::new();
    let mut registry = DriverRegistry::new();
    registry.register(driver);
    let pool = ConnectionPool::with_registry(PoolConfig::default(), registry, None)
        .expect("unconfigured pool");
    pool.set_config(mock_config()).expect("probe succeeds");

    state.set_fail_open(true);
    assert!(pool.add_connection(None).is_err());
    assert_eq!(pool.idle_count(), 0);
}

#[test]
fn test_construction_with_unreachable_server() {
    let (driver, state) = MockDriver::new();
    state.set_fail_open(true);
    let mut registry = DriverRegistry::new();
    registry.register(driver);

    let result = ConnectionPool::with_registry(PoolConfig::default(), registry, Some(mock_config()));
    assert!(matches!(result, Err(TidepoolError::Configuration(_))));
}

#[test]
fn test_set_config_failure_keeps_previous_config() {
    let (pool, state) = mock_pool(1);
    let before = pool.connection_config().expect("configured");

    state.set_fail_open(true);
    let err = pool
        .set_config(mock_config().with_database("other"))
        .expect_err("probe fails");
    assert!(matches!(err, TidepoolError::Configuration(_)));
    assert_eq!(pool.connection_config(), Some(before));
}

#[test]
fn test_set_config_rejects_unknown_driver() {
    let (pool, _state) = mock_pool(1);
    let err = pool
        .set_config(ConnectionConfig::new("oracle").with_database("x"))
        .expect_err("unknown driver");
    assert!(matches!(err, TidepoolError::Configuration(_)));
    assert_eq!(
        pool.connection_config().map(|c| c.driver),
        Some("mock".to_string())
    );
}

#[test]
fn test_set_config_probe_is_closed_and_pinged() {
    let (driver, state) = MockDriver::new();
    let mut registry = DriverRegistry::new();
    registry.register(driver);
    let pool = ConnectionPool::with_registry(PoolConfig::default(), registry, None)
        .expect("pool");

    pool.set_config(mock_config()).expect("probe");
    assert_eq!(state.opens(), 1);
    assert_eq!(state.pings(), 1);
    assert_eq!(state.closes(), 1);
    assert_eq!(pool.idle_count(), 0);
}

#[test]
fn test_set_config_ping_failure() {
    let (driver, state) = MockDriver::new();
    state.set_fail_ping(true);
    let mut registry = DriverRegistry::new();
    registry.register(driver);
    let pool = ConnectionPool::with_registry(PoolConfig::default(), registry, None)
        .expect("pool");

    assert!(pool.set_config(mock_config()).is_err());
    assert!(!pool.is_configured());
    assert_eq!(state.closes(), 1, "probe is closed after a failed ping");
}

#[test]
fn test_dispose_closes_everything() {
    let (pool, state) = mock_pool(4);
    let closed = pool.dispose().expect("dispose");
    assert_eq!(closed, 4);
    assert_eq!(pool.idle_count(), 0);
    assert_eq!(state.closes(), 5);
}

#[test]
fn test_dispose_swallows_close_errors() {
    let (pool, state) = mock_pool(3);
    state.set_fail_close(true);

    let closed = pool.dispose().expect("driver close errors are swallowed");
    assert_eq!(closed, 3);
    assert_eq!(pool.idle_count(), 0);
}

#[test]
fn test_dispose_reports_foreign_connections() {
    let (driver, _state) = MockDriver::new();
    let (other, _other_state) = MockDriver::named("other");
    let mut registry = DriverRegistry::new();
    registry.register(driver);
    registry.register(other);
    let pool = ConnectionPool::with_registry(
        PoolConfig::new(2).expect("size"),
        registry,
        Some(mock_config()),
    )
    .expect("pool");

    pool.set_config(ConnectionConfig::new("other").with_database("x"))
        .expect("switch driver");
    let err = pool.dispose().expect_err("queued connections use the old driver");
    assert!(matches!(err, TidepoolError::ConnectionMismatch { .. }));
    assert_eq!(pool.idle_count(), 0);
}

#[test]
fn test_test_on_checkout_pings() {
    let (driver, state) = MockDriver::new();
    let mut registry = DriverRegistry::new();
    registry.register(driver);
    let pool = ConnectionPool::with_registry(
        PoolConfig::new(1).expect("size").with_test_on_checkout(true),
        registry,
        Some(mock_config()),
    )
    .expect("pool");
    let pings_after_fill = state.pings();

    let conn = pool.get_connection().expect("connection");
    assert_eq!(state.pings(), pings_after_fill + 1);
    pool.add_connection(Some(conn)).expect("return");

    state.set_fail_ping(true);
    assert!(pool.get_connection().is_err());
    assert_eq!(pool.idle_count(), 1, "failed connection goes back to the pool");
}

#[test]
fn test_lazy_validation_by_default() {
    let (pool, state) = mock_pool(1);
    let pings_after_fill = state.pings();
    let _conn = pool.get_connection().expect("connection");
    assert_eq!(state.pings(), pings_after_fill);
}

#[test]
fn test_concurrent_checkout() {
    let (pool, _state) = mock_pool(8);
    let pool = Arc::new(pool);

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let pool = pool.clone();
            thread::spawn(move || {
                let mut conn = pool.get_connection().expect("one connection per thread");
                conn.execute("UPDATE t SET v = v + 1", ()).expect("execute");
                pool.add_connection(Some(conn)).expect("return");
            })
        })
        .collect();

    for handle in handles {
        handle.join().expect("thread");
    }
    assert_eq!(pool.idle_count(), 8);
}
