//! Connection pool implementation

use std::cell::RefCell;
use std::collections::VecDeque;
use std::sync::Arc;

use parking_lot::ReentrantMutex;
use tidepool_core::{ConnectionConfig, Driver, Result, TidepoolError};
use tidepool_drivers::DriverRegistry;

use super::config::PoolConfig;
use super::stats::PoolStats;
use crate::Connection;

/// Mutable pool state, only touched while holding the pool lock
#[derive(Default)]
struct PoolState {
    /// Template for connections the pool creates, with its resolved driver
    target: Option<(ConnectionConfig, Arc<dyn Driver>)>,
    idle: VecDeque<Connection>,
    created: usize,
}

/// A bounded pool of idle connections
///
/// All mutating operations serialize on one re-entrant lock, so nested
/// calls from the same thread do not deadlock. Connections handed out by
/// `get_connection` belong to the caller until passed back to
/// `add_connection`.
pub struct ConnectionPool {
    config: PoolConfig,
    registry: DriverRegistry,
    state: ReentrantMutex<RefCell<PoolState>>,
}

impl ConnectionPool {
    /// Create a pool using the built-in drivers.
    ///
    /// With a connection configuration the pool validates it and fills
    /// itself with `size` connections; any failure is returned.
    pub fn new(config: PoolConfig, connection: Option<ConnectionConfig>) -> Result<Self> {
        Self::with_registry(config, DriverRegistry::with_defaults(), connection)
    }

    /// Create a pool resolving drivers from `registry`
    pub fn with_registry(
        config: PoolConfig,
        registry: DriverRegistry,
        connection: Option<ConnectionConfig>,
    ) -> Result<Self> {
        config.validate()?;
        let pool = Self {
            config,
            registry,
            state: ReentrantMutex::new(RefCell::new(PoolState::default())),
        };

        if let Some(connection) = connection {
            pool.set_config(connection)?;
            pool.fill()?;
        }
        Ok(pool)
    }

    fn fill(&self) -> Result<()> {
        let _guard = self.state.lock();
        for _ in 0..self.config.size() {
            self.add_connection(None)?;
        }
        tracing::info!(size = self.config.size(), "connection pool filled");
        Ok(())
    }

    pub fn config(&self) -> &PoolConfig {
        &self.config
    }

    /// Maximum number of idle connections
    pub fn size(&self) -> usize {
        self.config.size()
    }

    /// Number of connections currently waiting in the pool
    pub fn idle_count(&self) -> usize {
        self.state.lock().borrow().idle.len()
    }

    /// Whether a connection configuration has been accepted
    pub fn is_configured(&self) -> bool {
        self.state.lock().borrow().target.is_some()
    }

    /// The accepted connection configuration, if any
    pub fn connection_config(&self) -> Option<ConnectionConfig> {
        self.state
            .lock()
            .borrow()
            .target
            .as_ref()
            .map(|(config, _)| config.clone())
    }

    pub fn stats(&self) -> PoolStats {
        let guard = self.state.lock();
        let state = guard.borrow();
        PoolStats::new(self.config.size(), state.idle.len(), state.created)
    }

    /// Validate `config` with a probe session and make it the template for
    /// new connections.
    ///
    /// The probe is opened, pinged and closed without joining the pool. On
    /// failure the previous configuration stays in place.
    pub fn set_config(&self, config: ConnectionConfig) -> Result<()> {
        let guard = self.state.lock();

        let driver = self.probe(&config).map_err(|e| {
            tracing::error!(driver = %config.driver, host = %config.host, error = %e, "connection configuration rejected");
            TidepoolError::Configuration(format!("invalid connection configuration: {}", e))
        })?;

        tracing::info!(
            driver = %config.driver,
            host = %config.host,
            database = %config.database,
            "pool configuration accepted"
        );
        guard.borrow_mut().target = Some((config, driver));
        Ok(())
    }

    fn probe(&self, config: &ConnectionConfig) -> Result<Arc<dyn Driver>> {
        config.validate()?;
        let driver = self.registry.resolve(config)?;
        let mut session = driver.open(config)?;
        if let Err(e) = session.ping() {
            if let Err(close_err) = session.close() {
                tracing::warn!(error = %close_err, "error closing probe connection");
            }
            return Err(e);
        }
        session.close()?;
        Ok(driver)
    }

    /// Put a connection into the pool.
    ///
    /// `None` creates a new connection from the accepted configuration.
    /// A supplied connection must use the configured driver.
    ///
    /// A rejected connection (`PoolFull` or `ConnectionMismatch`) is not
    /// handed back: it is dropped, which closes its session. Check
    /// `stats().is_full()` first to keep a connection the pool would refuse.
    pub fn add_connection(&self, connection: Option<Connection>) -> Result<()> {
        let guard = self.state.lock();

        let (config, driver) = {
            let state = guard.borrow();
            let Some((config, driver)) = state.target.as_ref() else {
                return Err(TidepoolError::Configuration(
                    "pool has no connection configuration".into(),
                ));
            };
            if state.idle.len() >= self.config.size() {
                return Err(TidepoolError::PoolFull);
            }
            (config.clone(), driver.clone())
        };

        let connection = match connection {
            None => {
                let connection = Connection::connect(driver, config)?;
                guard.borrow_mut().created += 1;
                connection
            }
            Some(connection) => {
                if connection.driver_name() != driver.name() {
                    return Err(TidepoolError::ConnectionMismatch {
                        expected: driver.name().to_string(),
                        found: connection.driver_name().to_string(),
                    });
                }
                connection
            }
        };

        let mut state = guard.borrow_mut();
        if state.idle.len() >= self.config.size() {
            return Err(TidepoolError::PoolFull);
        }
        tracing::trace!(connection_id = connection.id(), idle = state.idle.len() + 1, "connection added to pool");
        state.idle.push_back(connection);
        Ok(())
    }

    /// Take an idle connection without waiting.
    ///
    /// Fails with `PoolExhausted` when none is available. With
    /// `test_on_checkout` the connection is pinged first; if that fails it
    /// goes back to the pool and the error is returned.
    pub fn get_connection(&self) -> Result<Connection> {
        let guard = self.state.lock();
        let Some(mut connection) = guard.borrow_mut().idle.pop_front() else {
            tracing::debug!(size = self.config.size(), "connection pool exhausted");
            return Err(TidepoolError::PoolExhausted);
        };

        if self.config.test_on_checkout() {
            if let Err(e) = connection.ping() {
                tracing::warn!(connection_id = connection.id(), error = %e, "checkout validation failed");
                guard.borrow_mut().idle.push_front(connection);
                return Err(e);
            }
        }

        tracing::trace!(connection_id = connection.id(), "connection checked out");
        Ok(connection)
    }

    /// Close every idle connection and empty the pool.
    ///
    /// Driver errors while closing are logged and skipped. A connection
    /// that does not belong to the configured driver is still closed, and
    /// the mismatch is reported once draining is done. Returns the number
    /// of connections closed.
    pub fn dispose(&self) -> Result<usize> {
        let guard = self.state.lock();
        let drained: Vec<Connection> = guard.borrow_mut().idle.drain(..).collect();
        let expected = guard
            .borrow()
            .target
            .as_ref()
            .map(|(_, driver)| driver.name().to_string());

        let mut closed = 0;
        let mut mismatch = None;
        for mut connection in drained {
            if let Some(expected) = &expected {
                if connection.driver_name() != expected && mismatch.is_none() {
                    mismatch = Some(TidepoolError::ConnectionMismatch {
                        expected: expected.clone(),
                        found: connection.driver_name().to_string(),
                    });
                }
            }
            if let Err(e) = connection.close() {
                tracing::warn!(connection_id = connection.id(), error = %e, "error closing pooled connection");
            }
            closed += 1;
        }

        tracing::info!(closed, "connection pool disposed");
        match mismatch {
            Some(e) => Err(e),
            None => Ok(closed),
        }
    }
}
