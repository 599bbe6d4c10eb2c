//! Pool configuration types

use serde::{Deserialize, Serialize};
use tidepool_core::{Result, TidepoolError};

/// Largest number of connections a pool may hold
pub const MAX_POOL_SIZE: usize = 32;

pub const DEFAULT_POOL_SIZE: usize = 5;

/// Configuration for a connection pool
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    /// Number of connections created when the pool is filled
    size: usize,
    /// Ping idle connections (reconnecting once) before handing them out
    test_on_checkout: bool,
}

impl PoolConfig {
    /// Create a pool configuration holding `size` connections
    ///
    /// Fails unless `1 <= size <= 32`.
    pub fn new(size: usize) -> Result<Self> {
        let config = Self {
            size,
            test_on_checkout: false,
        };
        config.validate()?;
        Ok(config)
    }

    /// Set whether idle connections are pinged on checkout
    pub fn with_test_on_checkout(mut self, enabled: bool) -> Self {
        self.test_on_checkout = enabled;
        self
    }

    /// Get the pool size
    pub fn size(&self) -> usize {
        self.size
    }

    pub fn test_on_checkout(&self) -> bool {
        self.test_on_checkout
    }

    /// Check the size bounds; needed after deserializing
    pub fn validate(&self) -> Result<()> {
        if self.size == 0 || self.size > MAX_POOL_SIZE {
            return Err(TidepoolError::Configuration(format!(
                "pool size must be between 1 and {}, got {}",
                MAX_POOL_SIZE, self.size
            )));
        }
        Ok(())
    }
}

impl Default for PoolConfig {
    /// Five connections, lazily validated
    fn default() -> Self {
        Self {
            size: DEFAULT_POOL_SIZE,
            test_on_checkout: false,
        }
    }
}
