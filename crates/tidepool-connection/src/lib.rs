//! Tidepool connection - connection lifecycle and pooling
//!
//! `Connection` wraps one driver session with lazy reconnection and scoped
//! transactions; `ConnectionPool` keeps a fixed number of them ready.

mod connection;
pub mod pool;
mod settings;

#[cfg(test)]
mod test_support;

pub use connection::{Connection, Rows};
pub use pool::{ConnectionPool, PoolConfig, PoolStats};
pub use settings::Settings;

/// Re-export commonly used types from tidepool-core
pub use tidepool_core::{
    ConnectionConfig, ExecResult, HostAddress, Params, Result, Row, TidepoolError,
    TypeConversions, Value, params,
};
pub use tidepool_drivers::DriverRegistry;
