//! Pool statistics types

use serde::{Deserialize, Serialize};

/// Snapshot of a connection pool's state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolStats {
    /// Maximum number of idle connections the pool holds
    capacity: usize,
    /// Number of idle connections available in the pool
    idle: usize,
    /// Number of connections the pool has created itself
    created: usize,
}

impl PoolStats {
    /// Create new pool statistics
    pub fn new(capacity: usize, idle: usize, created: usize) -> Self {
        Self {
            capacity,
            idle,
            created,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Get the number of idle connections
    pub fn idle(&self) -> usize {
        self.idle
    }

    pub fn created(&self) -> usize {
        self.created
    }

    /// Whether `get_connection` would report exhaustion
    pub fn is_exhausted(&self) -> bool {
        self.idle == 0
    }

    /// Whether `add_connection` would report a full pool
    pub fn is_full(&self) -> bool {
        self.idle >= self.capacity
    }
}
