//! Driver registry for managing available database drivers

use std::collections::HashMap;
use std::sync::Arc;
use tidepool_core::{ConnectionConfig, Driver, Result, TidepoolError};

/// Registry of available database drivers
#[derive(Clone)]
pub struct DriverRegistry {
    drivers: HashMap<String, Arc<dyn Driver>>,
}

impl DriverRegistry {
    /// Create a new empty registry
    pub fn new() -> Self {
        Self {
            drivers: HashMap::new(),
        }
    }

    /// Create a registry with all built-in drivers registered
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();

        #[cfg(feature = "mysql")]
        registry.register(Arc::new(crate::mysql::MySqlDriver::new()));
        #[cfg(feature = "sqlite")]
        registry.register(Arc::new(crate::sqlite::SqliteDriver::new()));

        registry
    }

    /// Register a new driver, replacing any driver with the same name
    pub fn register(&mut self, driver: Arc<dyn Driver>) {
        let name = driver.name().to_string();
        tracing::info!(driver = %name, "registering database driver");
        self.drivers.insert(name, driver);
    }

    /// Get a driver by name
    pub fn get(&self, name: &str) -> Option<Arc<dyn Driver>> {
        let driver = self.drivers.get(name).cloned();
        if driver.is_none() {
            tracing::warn!(driver = %name, "driver not found in registry");
        }
        driver
    }

    /// Resolve the driver a configuration asks for
    pub fn resolve(&self, config: &ConnectionConfig) -> Result<Arc<dyn Driver>> {
        self.get(&config.driver)
            .ok_or_else(|| TidepoolError::UnknownDriver(config.driver.clone()))
    }

    /// List all registered driver names, sorted
    pub fn list(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.drivers.keys().map(|s| s.as_str()).collect();
        names.sort_unstable();
        names
    }

    /// Check if a driver is registered
    pub fn has(&self, name: &str) -> bool {
        self.drivers.contains_key(name)
    }
}

impl Default for DriverRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tidepool_core::Session;

    struct NullDriver;

    impl Driver for NullDriver {
        fn name(&self) -> &'static str {
            "null"
        }

        fn open(&self, _config: &ConnectionConfig) -> Result<Box<dyn Session>> {
            Err(TidepoolError::Operational("null driver never connects".into()))
        }
    }

    #[test]
    fn test_empty_registry() {
        let registry = DriverRegistry::new();
        assert!(registry.list().is_empty());
        assert!(!registry.has("mysql"));
        assert!(registry.get("mysql").is_none());
    }

    #[test]
    fn test_register_and_resolve() {
        let mut registry = DriverRegistry::new();
        registry.register(Arc::new(NullDriver));

        assert!(registry.has("null"));
        assert_eq!(registry.list(), vec!["null"]);

        let driver = registry
            .resolve(&ConnectionConfig::new("null"))
            .expect("registered driver resolves");
        assert_eq!(driver.name(), "null");
    }

    #[test]
    fn test_resolve_unknown_driver() {
        let registry = DriverRegistry::new();
        match registry.resolve(&ConnectionConfig::new("oracle")) {
            Err(TidepoolError::UnknownDriver(name)) => assert_eq!(name, "oracle"),
            Err(other) => panic!("unexpected error: {other}"),
            Ok(_) => panic!("unknown driver must not resolve"),
        }
    }

    #[cfg(all(feature = "mysql", feature = "sqlite"))]
    #[test]
    fn test_default_drivers() {
        let registry = DriverRegistry::default();
        assert_eq!(registry.list(), vec!["mysql", "sqlite"]);
    }

    #[cfg(feature = "sqlite")]
    #[test]
    fn test_open_sqlite_through_registry() {
        let registry = DriverRegistry::with_defaults();
        let config = ConnectionConfig::new_sqlite(":memory:");
        let driver = registry.resolve(&config).expect("sqlite driver");
        let mut session = driver.open(&config).expect("open");
        session.ping().expect("ping");
    }
}
