//! Connection configuration and host parsing

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use crate::{Result, TidepoolError};

/// Port used when the host string does not carry one
pub const DEFAULT_PORT: u16 = 3306;

/// MySQL closes idle clients after 8 hours by default; reconnect before that.
pub const DEFAULT_MAX_IDLE_TIME: Duration = Duration::from_secs(7 * 3600);

pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Where the server lives, as parsed from the configured host string
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HostAddress {
    /// Unix domain socket path
    Socket(PathBuf),
    /// TCP host and port
    Tcp { host: String, port: u16 },
}

impl HostAddress {
    /// Parse a host string.
    ///
    /// Anything containing `/` is a socket path. Otherwise `host:port` sets the
    /// port and every other shape (including bare IPv6 literals) is taken as a
    /// host name on the default port.
    pub fn parse(host: &str) -> Result<Self> {
        let host = host.trim();
        if host.is_empty() {
            return Err(TidepoolError::Configuration("host must not be empty".into()));
        }

        if host.contains('/') {
            return Ok(HostAddress::Socket(PathBuf::from(host)));
        }

        let parts: Vec<&str> = host.split(':').collect();
        match parts.as_slice() {
            [name, port] => {
                let port = port.parse::<u16>().map_err(|e| {
                    TidepoolError::Configuration(format!("invalid port in host '{}': {}", host, e))
                })?;
                Ok(HostAddress::Tcp {
                    host: (*name).to_string(),
                    port,
                })
            }
            _ => Ok(HostAddress::Tcp {
                host: host.to_string(),
                port: DEFAULT_PORT,
            }),
        }
    }
}

impl fmt::Display for HostAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HostAddress::Socket(path) => write!(f, "{}", path.display()),
            HostAddress::Tcp { host, port } => write!(f, "{}:{}", host, port),
        }
    }
}

/// How drivers coerce column values into `Value`s
///
/// Passed to the adapter with each configuration instead of living in
/// process-wide tables.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TypeConversions {
    /// Decode binary-flagged string columns as text when they are valid UTF-8
    pub binary_as_text: bool,
    /// Render dates, times and datetimes as ISO-8601 strings
    pub datetimes_as_text: bool,
}

impl Default for TypeConversions {
    fn default() -> Self {
        Self {
            binary_as_text: true,
            datetimes_as_text: false,
        }
    }
}

/// Parameters for opening a database session
///
/// Durations are expressed in whole seconds when (de)serialized.
#[derive(Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ConnectionConfig {
    /// Driver id used to pick the adapter (e.g. "mysql", "sqlite")
    pub driver: String,
    /// `host`, `host:port` or a unix socket path; ignored by file-based drivers
    pub host: String,
    /// Database name, or file path for file-based drivers
    pub database: String,
    pub user: Option<String>,
    pub password: Option<String>,
    /// Reconnect before use when the session sat unused longer than this
    #[serde(with = "duration_secs")]
    pub max_idle_time: Duration,
    #[serde(with = "option_duration_secs")]
    pub connect_timeout: Option<Duration>,
    pub time_zone: String,
    pub charset: String,
    pub sql_mode: String,
    /// Ping the session before use when this much time passed since the last check
    #[serde(with = "option_duration_secs")]
    pub health_check_interval: Option<Duration>,
    pub conversions: TypeConversions,
    /// Additional driver-specific parameters
    pub params: HashMap<String, String>,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            driver: "mysql".to_string(),
            host: String::new(),
            database: String::new(),
            user: None,
            password: None,
            max_idle_time: DEFAULT_MAX_IDLE_TIME,
            connect_timeout: Some(DEFAULT_CONNECT_TIMEOUT),
            time_zone: "+0:00".to_string(),
            charset: "utf8".to_string(),
            sql_mode: "TRADITIONAL".to_string(),
            health_check_interval: None,
            conversions: TypeConversions::default(),
            params: HashMap::new(),
        }
    }
}

impl ConnectionConfig {
    /// Create a configuration for the given driver with default values
    pub fn new(driver: &str) -> Self {
        Self {
            driver: driver.to_string(),
            ..Self::default()
        }
    }

    /// Create a MySQL configuration
    pub fn new_mysql(host: &str, database: &str) -> Self {
        Self::new("mysql").with_host(host).with_database(database)
    }

    /// Create a SQLite configuration (`:memory:` or a file path)
    ///
    /// Every `:memory:` session is its own empty database. Each pooled
    /// connection gets a separate one, and a reconnect (idle timeout,
    /// operational error) starts from scratch. Use a file path, or a
    /// shared-cache URI such as `file:app?mode=memory&cache=shared`, when
    /// connections must see the same data.
    pub fn new_sqlite(database_path: &str) -> Self {
        Self::new("sqlite").with_database(database_path)
    }

    pub fn with_host(mut self, host: &str) -> Self {
        self.host = host.to_string();
        self
    }

    pub fn with_database(mut self, database: &str) -> Self {
        self.database = database.to_string();
        self
    }

    pub fn with_user(mut self, user: &str) -> Self {
        self.user = Some(user.to_string());
        self
    }

    pub fn with_password(mut self, password: &str) -> Self {
        self.password = Some(password.to_string());
        self
    }

    pub fn with_max_idle_time(mut self, max_idle_time: Duration) -> Self {
        self.max_idle_time = max_idle_time;
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn with_time_zone(mut self, time_zone: &str) -> Self {
        self.time_zone = time_zone.to_string();
        self
    }

    pub fn with_charset(mut self, charset: &str) -> Self {
        self.charset = charset.to_string();
        self
    }

    pub fn with_sql_mode(mut self, sql_mode: &str) -> Self {
        self.sql_mode = sql_mode.to_string();
        self
    }

    pub fn with_health_check_interval(mut self, interval: Option<Duration>) -> Self {
        self.health_check_interval = interval;
        self
    }

    pub fn with_conversions(mut self, conversions: TypeConversions) -> Self {
        self.conversions = conversions;
        self
    }

    /// Set a driver-specific parameter
    pub fn with_param(mut self, key: &str, value: &str) -> Self {
        self.params.insert(key.to_string(), value.to_string());
        self
    }

    /// Parsed form of `host`
    pub fn address(&self) -> Result<HostAddress> {
        HostAddress::parse(&self.host)
    }

    /// Reject configurations that can never open a session.
    ///
    /// Drivers may apply stricter checks when opening.
    pub fn validate(&self) -> Result<()> {
        if self.driver.trim().is_empty() {
            return Err(TidepoolError::Configuration("driver must not be empty".into()));
        }
        if self.database.trim().is_empty() {
            return Err(TidepoolError::Configuration(
                "database must not be empty".into(),
            ));
        }
        tracing::trace!(driver = %self.driver, database = %self.database, "configuration validated");
        Ok(())
    }
}

impl fmt::Debug for ConnectionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionConfig")
            .field("driver", &self.driver)
            .field("host", &self.host)
            .field("database", &self.database)
            .field("user", &self.user)
            .field("password", &self.password.as_ref().map(|_| "***"))
            .field("max_idle_time", &self.max_idle_time)
            .field("connect_timeout", &self.connect_timeout)
            .field("time_zone", &self.time_zone)
            .field("charset", &self.charset)
            .field("sql_mode", &self.sql_mode)
            .field("health_check_interval", &self.health_check_interval)
            .field("conversions", &self.conversions)
            .field("params", &self.params)
            .finish()
    }
}

mod duration_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_f64(value.as_secs_f64())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let secs = f64::deserialize(deserializer)?;
        Duration::try_from_secs_f64(secs).map_err(serde::de::Error::custom)
    }
}

mod option_duration_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(
        value: &Option<Duration>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        match value {
            Some(d) => serializer.serialize_some(&d.as_secs_f64()),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<Duration>, D::Error> {
        // Zero means "disabled", matching how connect timeouts are usually written.
        match Option::<f64>::deserialize(deserializer)? {
            None => Ok(None),
            Some(secs) if secs == 0.0 => Ok(None),
            Some(secs) => Duration::try_from_secs_f64(secs)
                .map(Some)
                .map_err(serde::de::Error::custom),
        }
    }
}
