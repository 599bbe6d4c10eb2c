//! Fixed-size connection pool
//!
//! The pool holds up to `size` idle connections behind a single re-entrant
//! lock. Acquiring never waits: an empty pool reports exhaustion at once.
//! Checked-out connections are not returned automatically; hand them back
//! with `add_connection`.
//!
//! # Example
//!
//! ```ignore
//! use tidepool_connection::{ConnectionConfig, ConnectionPool, PoolConfig};
//!
//! let config = ConnectionConfig::new_mysql("127.0.0.1", "app").with_user("app");
//! let pool = ConnectionPool::new(PoolConfig::new(5)?, Some(config))?;
//!
//! let mut conn = pool.get_connection()?;
//! let rows = conn.query("SELECT id, name FROM users", ())?;
//! pool.add_connection(Some(conn))?;
//! ```

mod config;
mod pool;
mod stats;

#[cfg(test)]
mod tests;

pub use config::{DEFAULT_POOL_SIZE, MAX_POOL_SIZE, PoolConfig};
pub use pool::ConnectionPool;
pub use stats::PoolStats;
