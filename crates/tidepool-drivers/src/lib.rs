//! Tidepool drivers - database adapter registry
//!
//! Concrete adapters live in their own crates and are enabled through
//! cargo features; `DriverRegistry` maps a configuration's driver id to
//! the adapter that opens its sessions.

#[cfg(feature = "mysql")]
pub use tidepool_driver_mysql as mysql;
#[cfg(feature = "sqlite")]
pub use tidepool_driver_sqlite as sqlite;

mod registry;

pub use registry::DriverRegistry;

/// Re-export commonly used types from tidepool-core
pub use tidepool_core::{ConnectionConfig, Driver, Result, Session, TidepoolError};
