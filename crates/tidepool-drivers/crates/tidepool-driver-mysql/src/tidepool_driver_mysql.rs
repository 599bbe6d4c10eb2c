//! MySQL/MariaDB driver for tidepool
//!
//! Sessions sit on the blocking `mysql` client. Statements without
//! parameters go over the text protocol; parameterized ones are prepared
//! and use the binary protocol.

mod convert;
mod driver;
mod session;

#[cfg(test)]
mod convert_tests;
#[cfg(test)]
mod driver_tests;

pub use driver::MySqlDriver;
pub use session::{MySqlSession, build_opts, init_commands};
