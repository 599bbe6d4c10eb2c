//! Connection lifecycle: lazy open, idle recycling, scoped transactions
//!
//! A `Connection` owns at most one driver session. Every operation first
//! makes sure the session exists and has not sat idle longer than the
//! configured `max_idle_time`, reopening it when needed. Operational
//! errors close the session so the next call starts from a fresh one;
//! statements are never retried.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use tidepool_core::{
    ConnectionConfig, Driver, ExecResult, Params, Result, Row, RowIter, Session, TidepoolError,
};
use tidepool_drivers::DriverRegistry;


static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

fn sql_preview(sql: &str) -> String {
    sql.chars().take(100).collect()
}

/// A database connection wrapping one driver session
pub struct Connection {
    id: u64,
    driver: Arc<dyn Driver>,
    config: ConnectionConfig,
    session: Option<Box<dyn Session>>,
    /// Set when a streaming read hit an operational error; the session is
    /// replaced on next use.
    broken: bool,
    /// Set between `BEGIN` and the end of a `transaction` scope; the
    /// session must not be replaced while it holds uncommitted work.
    in_transaction: bool,
    last_use: Instant,
    last_health_check: Instant,
}

impl Connection {
    /// Create a connection and try to open its session.
    ///
    /// A failed open is logged and leaves the connection disconnected; the
    /// next operation retries the open and reports the error.
    pub fn new(driver: Arc<dyn Driver>, config: ConnectionConfig) -> Self {
        let mut conn = Self::disconnected(driver, config);
        if let Err(e) = conn.reconnect() {
            tracing::error!(
                connection_id = conn.id,
                host = %conn.config.host,
                database = %conn.config.database,
                error = %e,
                "cannot connect to database"
            );
        }
        conn
    }

    /// Create a connection, failing if the session cannot be opened
    pub fn connect(driver: Arc<dyn Driver>, config: ConnectionConfig) -> Result<Self> {
        let mut conn = Self::disconnected(driver, config);
        conn.reconnect()?;
        Ok(conn)
    }

    /// Create a connection using the driver named in the configuration.
    ///
    /// Only an unknown driver id is an error here.
    pub fn open(registry: &DriverRegistry, config: ConnectionConfig) -> Result<Self> {
        let driver = registry.resolve(&config)?;
        Ok(Self::new(driver, config))
    }

    fn disconnected(driver: Arc<dyn Driver>, config: ConnectionConfig) -> Self {
        let now = Instant::now();
        Self {
            id: NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed),
            driver,
            config,
            session: None,
            broken: false,
            in_transaction: false,
            last_use: now,
            last_health_check: now,
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    /// Name of the driver this connection was opened with
    pub fn driver_name(&self) -> &'static str {
        self.driver.name()
    }

    pub fn config(&self) -> &ConnectionConfig {
        &self.config
    }

    pub fn host(&self) -> &str {
        &self.config.host
    }

    pub fn database(&self) -> &str {
        &self.config.database
    }

    pub fn max_idle_time(&self) -> Duration {
        self.config.max_idle_time
    }

    /// Instant of the last successful readiness check
    pub fn last_use(&self) -> Instant {
        self.last_use
    }

    /// Whether a usable session is currently open
    pub fn is_connected(&self) -> bool {
        self.session.is_some() && !self.broken
    }

    /// Close the current session (if any) and open a fresh one
    pub fn reconnect(&mut self) -> Result<()> {
        if let Err(e) = self.close() {
            tracing::warn!(connection_id = self.id, error = %e, "error closing connection before reconnect");
        }

        let session = self.driver.open(&self.config)?;
        tracing::info!(
            connection_id = self.id,
            driver = %self.driver.name(),
            host = %self.config.host,
            database = %self.config.database,
            "connection opened"
        );

        let now = Instant::now();
        self.session = Some(session);
        self.last_use = now;
        self.last_health_check = now;
        Ok(())
    }

    /// Close the session. Calling this on a closed connection does nothing.
    ///
    /// The session is released even when the driver reports an error.
    pub fn close(&mut self) -> Result<()> {
        self.broken = false;
        match self.session.take() {
            Some(session) => {
                tracing::debug!(connection_id = self.id, "closing connection");
                session.close()
            }
            None => Ok(()),
        }
    }

    fn ensure_connected(&mut self) -> Result<()> {
        let idle = self.last_use.elapsed();
        if self.session.is_none() || self.broken {
            self.renew("connection lost")?;
        } else if idle > self.config.max_idle_time {
            tracing::debug!(
                connection_id = self.id,
                idle_secs = idle.as_secs(),
                "connection idle too long, reconnecting"
            );
            self.renew("connection idle longer than max_idle_time")?;
        } else if let Some(interval) = self.config.health_check_interval {
            if self.last_health_check.elapsed() >= interval {
                self.last_health_check = Instant::now();
                let healthy = self
                    .session
                    .as_deref_mut()
                    .is_some_and(|session| session.ping().is_ok());
                if !healthy {
                    tracing::warn!(connection_id = self.id, "health check failed, reconnecting");
                    self.renew("health check failed")?;
                }
            }
        }

        self.last_use = Instant::now();
        Ok(())
    }

    /// Replace the session, unless a transaction is open on it: a fresh
    /// session would silently drop the uncommitted work and run the rest
    /// of the transaction in autocommit mode.
    fn renew(&mut self, reason: &str) -> Result<()> {
        if self.in_transaction {
            tracing::error!(connection_id = self.id, reason, "session unusable inside transaction");
            return Err(TidepoolError::Operational(format!(
                "{} during transaction",
                reason
            )));
        }
        self.reconnect()
    }

    /// Run `f` against a ready session, closing the session when it fails
    /// with an operational error.
    fn with_session<T>(
        &mut self,
        sql: &str,
        f: impl FnOnce(&mut dyn Session) -> Result<T>,
    ) -> Result<T> {
        self.ensure_connected()?;
        let session = self
            .session
            .as_deref_mut()
            .ok_or(TidepoolError::NotConnected)?;
        match f(session) {
            Ok(value) => Ok(value),
            Err(e) => Err(self.handle_error(e, sql)),
        }
    }

    fn handle_error(&mut self, error: TidepoolError, sql: &str) -> TidepoolError {
        if error.is_operational() {
            tracing::error!(
                connection_id = self.id,
                error = %error,
                sql_preview = %sql_preview(sql),
                "operational error, closing connection"
            );
            if let Err(e) = self.close() {
                tracing::warn!(connection_id = self.id, error = %e, "error closing failed connection");
            }
        } else {
            tracing::debug!(
                connection_id = self.id,
                error = %error,
                sql_preview = %sql_preview(sql),
                "statement failed"
            );
        }
        error
    }

    /// Ping the server, reconnecting once if the first ping fails
    pub fn ping(&mut self) -> Result<()> {
        self.ensure_connected()?;
        let first = self
            .session
            .as_deref_mut()
            .ok_or(TidepoolError::NotConnected)?
            .ping();
        if let Err(e) = first {
            if self.in_transaction {
                return Err(self.handle_error(e, "ping"));
            }
            tracing::warn!(connection_id = self.id, error = %e, "ping failed, reconnecting");
            self.reconnect()?;
            return self.with_session("ping", |session| session.ping());
        }
        self.last_health_check = Instant::now();
        Ok(())
    }

    /// Run a query and return every row
    #[tracing::instrument(skip(self, sql, params), fields(connection_id = self.id, sql_preview = %sql_preview(sql)))]
    pub fn query(&mut self, sql: &str, params: impl Into<Params>) -> Result<Vec<Row>> {
        let params = params.into();
        self.with_session(sql, |session| session.query(sql, &params))
    }

    /// Run a query and stream its rows.
    ///
    /// The returned iterator borrows the connection; dropping it early
    /// releases the cursor.
    pub fn iter(&mut self, sql: &str, params: impl Into<Params>) -> Result<Rows<'_>> {
        let params = params.into();
        self.ensure_connected()?;

        let connection_id = self.id;
        let Connection {
            session, broken, ..
        } = self;
        let session = session.as_deref_mut().ok_or(TidepoolError::NotConnected)?;
        match session.query_iter(sql, &params) {
            Ok(inner) => Ok(Rows {
                inner,
                broken,
                connection_id,
                done: false,
            }),
            Err(e) => {
                if e.is_operational() {
                    tracing::error!(
                        connection_id,
                        error = %e,
                        sql_preview = %sql_preview(sql),
                        "operational error, closing connection"
                    );
                    *broken = true;
                }
                Err(e)
            }
        }
    }

    /// Return the single row a query produces, `None` when it produces
    /// nothing.
    ///
    /// More than one row is an error.
    pub fn get(&mut self, sql: &str, params: impl Into<Params>) -> Result<Option<Row>> {
        let mut rows = self.query(sql, params)?;
        match rows.len() {
            0 => Ok(None),
            1 => Ok(rows.pop()),
            n => Err(TidepoolError::MultipleRows(n)),
        }
    }

    /// Execute a statement and return both the inserted id and the number
    /// of affected rows
    pub fn execute_result(&mut self, sql: &str, params: impl Into<Params>) -> Result<ExecResult> {
        let params = params.into();
        let result = self.with_session(sql, |session| session.execute(sql, &params))?;
        tracing::debug!(
            connection_id = self.id,
            affected_rows = result.affected_rows,
            last_insert_id = ?result.last_insert_id,
            "statement executed"
        );
        Ok(result)
    }

    /// Execute a statement and return the id of the inserted row, if any
    pub fn execute(&mut self, sql: &str, params: impl Into<Params>) -> Result<Option<u64>> {
        Ok(self.execute_result(sql, params)?.last_insert_id)
    }

    /// Execute a statement and return the number of affected rows
    pub fn execute_rowcount(&mut self, sql: &str, params: impl Into<Params>) -> Result<u64> {
        Ok(self.execute_result(sql, params)?.affected_rows)
    }

    /// Execute a statement once per parameter set and return the total
    /// number of affected rows
    pub fn execute_many<I, P>(&mut self, sql: &str, batch: I) -> Result<u64>
    where
        I: IntoIterator<Item = P>,
        P: Into<Params>,
    {
        let batch: Vec<Params> = batch.into_iter().map(Into::into).collect();
        let result = self.with_session(sql, |session| session.execute_many(sql, &batch))?;
        tracing::debug!(
            connection_id = self.id,
            statements = batch.len(),
            affected_rows = result.affected_rows,
            "batch executed"
        );
        Ok(result.affected_rows)
    }

    /// Alias for `execute`
    pub fn insert(&mut self, sql: &str, params: impl Into<Params>) -> Result<Option<u64>> {
        self.execute(sql, params)
    }

    /// Alias for `execute_many`
    pub fn insert_many<I, P>(&mut self, sql: &str, batch: I) -> Result<u64>
    where
        I: IntoIterator<Item = P>,
        P: Into<Params>,
    {
        self.execute_many(sql, batch)
    }

    /// Alias for `execute_rowcount`
    pub fn update(&mut self, sql: &str, params: impl Into<Params>) -> Result<u64> {
        self.execute_rowcount(sql, params)
    }

    /// Alias for `execute_many`
    pub fn update_many<I, P>(&mut self, sql: &str, batch: I) -> Result<u64>
    where
        I: IntoIterator<Item = P>,
        P: Into<Params>,
    {
        self.execute_many(sql, batch)
    }

    /// Alias for `execute_rowcount`
    pub fn delete(&mut self, sql: &str, params: impl Into<Params>) -> Result<u64> {
        self.execute_rowcount(sql, params)
    }

    /// Run `f` inside a transaction.
    ///
    /// Commits when `f` returns `Ok`, rolls back when it returns `Err` and
    /// hands that error back. Autocommit is switched back on afterwards in
    /// every case, including a panic inside `f`.
    ///
    /// The session is never replaced inside the scope. If it goes idle past
    /// `max_idle_time`, fails a health check or is lost, the next statement
    /// fails with an operational error instead of reconnecting.
    ///
    /// ```ignore
    /// conn.transaction(|tx| {
    ///     tx.execute("INSERT INTO audit (event) VALUES (?)", params!["login"])?;
    ///     tx.update("UPDATE users SET logins = logins + 1 WHERE id = ?", params![7])
    /// })?;
    /// ```
    pub fn transaction<F, T, E>(&mut self, f: F) -> std::result::Result<T, E>
    where
        F: FnOnce(&mut Connection) -> std::result::Result<T, E>,
        E: From<TidepoolError>,
    {
        self.with_session("SET autocommit = 0", |session| session.set_autocommit(false))?;
        let mut guard = AutocommitGuard {
            conn: self,
            finished: false,
        };
        guard.conn.with_session("BEGIN", |session| session.begin())?;
        guard.conn.in_transaction = true;

        match f(&mut *guard.conn) {
            Ok(value) => {
                guard.conn.with_session("COMMIT", |session| session.commit())?;
                guard.finished = true;
                tracing::debug!(connection_id = guard.conn.id, "transaction committed");
                Ok(value)
            }
            Err(e) => {
                guard.rollback();
                guard.finished = true;
                Err(e)
            }
        }
    }
}

/// Restores autocommit when a transaction scope ends
///
/// A scope that did not finish (commit failure or panic) is rolled back
/// first, since re-enabling autocommit would otherwise commit it.
struct AutocommitGuard<'a> {
    conn: &'a mut Connection,
    finished: bool,
}

impl AutocommitGuard<'_> {
    fn rollback(&mut self) {
        let id = self.conn.id;
        if let Some(session) = self.conn.session.as_deref_mut() {
            match session.rollback() {
                Ok(()) => tracing::debug!(connection_id = id, "transaction rolled back"),
                Err(e) => tracing::warn!(connection_id = id, error = %e, "rollback failed"),
            }
        }
    }
}

impl Drop for AutocommitGuard<'_> {
    fn drop(&mut self) {
        self.conn.in_transaction = false;
        if !self.finished {
            self.rollback();
        }
        let restored = self
            .conn
            .session
            .as_deref_mut()
            .map(|session| session.set_autocommit(true));
        if let Some(Err(e)) = restored {
            tracing::warn!(connection_id = self.conn.id, error = %e, "failed to restore autocommit");
            if e.is_operational() {
                if let Err(e) = self.conn.close() {
                    tracing::warn!(connection_id = self.conn.id, error = %e, "error closing failed connection");
                }
            }
        }
    }
}

impl fmt::Display for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "<Connection(host={}, db={}, user={})>",
            self.config.host,
            self.config.database,
            self.config.user.as_deref().unwrap_or("")
        )
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("driver", &self.driver.name())
            .field("host", &self.config.host)
            .field("database", &self.config.database)
            .field("connected", &self.is_connected())
            .finish()
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            tracing::warn!(connection_id = self.id, error = %e, "error closing connection on drop");
        }
    }
}

/// Rows streamed from a connection
///
/// Stops after the first error. An operational error marks the
/// connection for reconnection.
pub struct Rows<'a> {
    inner: RowIter<'a>,
    broken: &'a mut bool,
    connection_id: u64,
    done: bool,
}

impl Iterator for Rows<'_> {
    type Item = Result<Row>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        match self.inner.next() {
            Some(Ok(row)) => Some(Ok(row)),
            Some(Err(e)) => {
                self.done = true;
                if e.is_operational() {
                    tracing::error!(
                        connection_id = self.connection_id,
                        error = %e,
                        "operational error while reading rows"
                    );
                    *self.broken = true;
                }
                Some(Err(e))
            }
            None => {
                self.done = true;
                None
            }
        }
    }
}
