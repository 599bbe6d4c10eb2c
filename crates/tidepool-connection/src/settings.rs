//! Settings files
//!
//! A settings file is TOML with a `[connection]` table (see
//! `ConnectionConfig`) and an optional `[pool]` table.

use std::path::Path;

use serde::{Deserialize, Serialize};
use tidepool_core::{ConnectionConfig, Result, TidepoolError};

use crate::pool::PoolConfig;

/// Connection and pool settings loaded from a file
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub connection: ConnectionConfig,
    pub pool: PoolConfig,
}

impl Settings {
    /// Parse settings from a TOML document
    pub fn from_toml_str(source: &str) -> Result<Self> {
        let settings: Settings = toml::from_str(source)
            .map_err(|e| TidepoolError::Configuration(format!("invalid settings: {}", e)))?;
        settings.pool.validate()?;
        Ok(settings)
    }

    /// Read and parse a settings file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let source = std::fs::read_to_string(path)?;
        let settings = Self::from_toml_str(&source)?;
        tracing::debug!(path = %path.display(), driver = %settings.connection.driver, "settings loaded");
        Ok(settings)
    }

    /// Render the settings as TOML
    pub fn to_toml_string(&self) -> Result<String> {
        toml::to_string_pretty(self)
            .map_err(|e| TidepoolError::Configuration(format!("cannot serialize settings: {}", e)))
    }
}
