//! tidepool core - shared abstractions for the connection layer
//!
//! This crate provides the types and traits every other tidepool crate
//! depends on:
//!
//! - `Driver` / `Session` - the adapter seam each database backend implements
//! - `ConnectionConfig` - connection parameters, host parsing and defaults
//! - `Value`, `Row`, `Params`, `ExecResult` - data crossing the adapter seam
//! - `TidepoolError` - the error taxonomy shared by drivers and the pool

mod config;
mod driver;
mod error;
mod types;

pub use config::*;
pub use driver::*;
pub use error::*;
pub use types::*;
