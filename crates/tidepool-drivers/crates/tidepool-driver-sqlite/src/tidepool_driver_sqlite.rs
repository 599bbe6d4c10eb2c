//! SQLite database driver implementation
//!
//! The database is an embedded file (or `:memory:`), so the configured host
//! is ignored and `database` names the file.

mod driver;
mod session;

#[cfg(test)]
mod driver_tests;
#[cfg(test)]
mod session_tests;

pub use driver::SqliteDriver;
pub use session::SqliteSession;
