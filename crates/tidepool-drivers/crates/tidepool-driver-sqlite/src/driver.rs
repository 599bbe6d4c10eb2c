//! SQLite driver implementation

use tidepool_core::{ConnectionConfig, Driver, Result, Session, TidepoolError};

use crate::SqliteSession;

/// SQLite database driver
pub struct SqliteDriver;

impl SqliteDriver {
    /// Create a new SQLite driver instance
    pub fn new() -> Self {
        tracing::debug!("SQLite driver initialized");
        Self
    }
}

impl Default for SqliteDriver {
    fn default() -> Self {
        Self::new()
    }
}

impl Driver for SqliteDriver {
    fn name(&self) -> &'static str {
        "sqlite"
    }

    #[tracing::instrument(skip(self, config), fields(path = %config.database))]
    fn open(&self, config: &ConnectionConfig) -> Result<Box<dyn Session>> {
        if config.database.trim().is_empty() {
            return Err(TidepoolError::Configuration(
                "SQLite requires 'database' to be a file path or ':memory:'".into(),
            ));
        }

        let session = SqliteSession::open(&config.database, config)?;
        Ok(Box::new(session))
    }
}
