//! MySQL driver implementation

use tidepool_core::{ConnectionConfig, DEFAULT_PORT, Driver, Result, Session};

use crate::MySqlSession;

/// MySQL database driver
pub struct MySqlDriver;

impl MySqlDriver {
    /// Create a new MySQL driver instance
    pub fn new() -> Self {
        tracing::debug!("MySQL driver initialized");
        Self
    }
}

impl Default for MySqlDriver {
    fn default() -> Self {
        Self::new()
    }
}

impl Driver for MySqlDriver {
    fn name(&self) -> &'static str {
        "mysql"
    }

    fn default_port(&self) -> Option<u16> {
        Some(DEFAULT_PORT)
    }

    #[tracing::instrument(skip(self, config), fields(host = %config.host, database = %config.database))]
    fn open(&self, config: &ConnectionConfig) -> Result<Box<dyn Session>> {
        let session = MySqlSession::connect(config)?;
        Ok(Box::new(session))
    }
}
