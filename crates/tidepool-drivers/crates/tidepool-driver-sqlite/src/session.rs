//! SQLite session implementation

use rusqlite::types::{ToSql, Value as SqlValue, ValueRef};
use rusqlite::{Connection as RusqliteConnection, ErrorCode, OpenFlags, Statement, params_from_iter};
use std::sync::Arc;
use tidepool_core::{
    ConnectionConfig, ExecResult, Params, Result, Row, RowIter, Session, TidepoolError,
    TypeConversions, Value,
};

/// Config params with this prefix are applied as pragmas,
/// e.g. `pragma.journal_mode = "DELETE"`.
const PRAGMA_PARAM_PREFIX: &str = "pragma.";

/// One open SQLite database handle
pub struct SqliteSession {
    conn: RusqliteConnection,
    path: String,
    /// SQLite has no autocommit switch; when disabled, statements outside an
    /// explicit transaction implicitly open one, as MySQL does.
    autocommit: bool,
    conversions: TypeConversions,
}

impl SqliteSession {
    /// Open a SQLite database
    pub fn open(path: &str, config: &ConnectionConfig) -> Result<Self> {
        tracing::info!(path = %path, "opening SQLite database");

        let conn = if path == ":memory:" {
            RusqliteConnection::open_in_memory().map_err(|e| {
                TidepoolError::Operational(format!("Failed to open in-memory database: {}", e))
            })?
        } else {
            if !path.starts_with("file:") {
                let file_path = std::path::Path::new(path);
                if let Some(parent) = file_path.parent()
                    && !parent.as_os_str().is_empty()
                    && !parent.exists()
                {
                    return Err(TidepoolError::Configuration(format!(
                        "Parent directory does not exist: {}",
                        parent.display()
                    )));
                }
            }

            let flags = OpenFlags::SQLITE_OPEN_READ_WRITE
                | OpenFlags::SQLITE_OPEN_CREATE
                | OpenFlags::SQLITE_OPEN_URI
                | OpenFlags::SQLITE_OPEN_NO_MUTEX;

            RusqliteConnection::open_with_flags(path, flags).map_err(|e| {
                TidepoolError::Operational(format!(
                    "Failed to open SQLite database at '{}': {}",
                    path, e
                ))
            })?
        };

        conn.pragma_update(None, "foreign_keys", "ON")
            .map_err(|e| map_error("Failed to enable foreign keys", e))?;

        if let Some(timeout) = config.connect_timeout {
            conn.busy_timeout(timeout)
                .map_err(|e| map_error("Failed to set busy timeout", e))?;
        }

        for (key, value) in &config.params {
            if let Some(pragma) = key.strip_prefix(PRAGMA_PARAM_PREFIX) {
                tracing::debug!(pragma = %pragma, value = %value, "applying SQLite pragma");
                conn.pragma_update(None, pragma, value)
                    .map_err(|e| map_error("Failed to apply pragma", e))?;
            }
        }

        tracing::info!(path = %path, "SQLite database connection established");
        Ok(Self {
            conn,
            path: path.to_string(),
            autocommit: true,
            conversions: config.conversions,
        })
    }

    /// Path this session was opened with
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Whether an explicit or implicit transaction is currently open
    pub fn in_transaction(&self) -> bool {
        !self.conn.is_autocommit()
    }

    fn begin_implicit(&mut self) -> Result<()> {
        if !self.autocommit && !self.in_transaction() {
            tracing::trace!("opening implicit SQLite transaction");
            self.conn
                .execute_batch("BEGIN")
                .map_err(|e| map_error("Failed to begin transaction", e))?;
        }
        Ok(())
    }

    fn fetch_all(&mut self, sql: &str, params: &Params) -> Result<Vec<Row>> {
        self.begin_implicit()?;

        let mut stmt = self
            .conn
            .prepare(sql)
            .map_err(|e| map_error("Failed to prepare query", e))?;

        let columns: Arc<[String]> = stmt
            .column_names()
            .into_iter()
            .map(str::to_string)
            .collect();
        let column_count = columns.len();
        let conversions = self.conversions;

        let bound = bind(params);
        let mut rows = query_bound(&mut stmt, &bound)
            .map_err(|e| map_error("Failed to execute query", e))?;

        let mut result = Vec::new();
        while let Some(row) = rows
            .next()
            .map_err(|e| map_error("Failed to fetch row", e))?
        {
            let mut values = Vec::with_capacity(column_count);
            for idx in 0..column_count {
                let value_ref = row
                    .get_ref(idx)
                    .map_err(|e| map_error("Failed to read column", e))?;
                values.push(sqlite_to_value(value_ref, &conversions));
            }
            result.push(Row::new(columns.clone(), values));
        }

        tracing::debug!(row_count = result.len(), "query executed");
        Ok(result)
    }
}

impl Session for SqliteSession {
    fn driver_name(&self) -> &'static str {
        "sqlite"
    }

    fn ping(&mut self) -> Result<()> {
        self.conn
            .query_row("SELECT 1", [], |_| Ok(()))
            .map_err(|e| map_error("Ping failed", e))
    }

    /// SQLite has no server-side cursor; rows are read eagerly and handed out
    /// one by one.
    fn query_iter<'a>(&'a mut self, sql: &str, params: &Params) -> Result<RowIter<'a>> {
        let rows = self.fetch_all(sql, params)?;
        Ok(Box::new(rows.into_iter().map(Ok)))
    }

    #[tracing::instrument(skip(self, sql, params), fields(sql_preview = %sql.chars().take(100).collect::<String>()))]
    fn query(&mut self, sql: &str, params: &Params) -> Result<Vec<Row>> {
        self.fetch_all(sql, params)
    }

    #[tracing::instrument(skip(self, sql, params), fields(sql_preview = %sql.chars().take(100).collect::<String>()))]
    fn execute(&mut self, sql: &str, params: &Params) -> Result<ExecResult> {
        self.begin_implicit()?;

        let mut stmt = self
            .conn
            .prepare(sql)
            .map_err(|e| map_error("Failed to prepare statement", e))?;
        let bound = bind(params);
        let affected_rows = execute_bound(&mut stmt, &bound)
            .map_err(|e| map_error("Failed to execute statement", e))?;
        drop(stmt);

        let last_insert_id = if is_insert(sql) && affected_rows > 0 {
            u64::try_from(self.conn.last_insert_rowid())
                .ok()
                .filter(|id| *id > 0)
        } else {
            None
        };

        tracing::debug!(affected_rows = affected_rows, "statement executed");
        Ok(ExecResult {
            last_insert_id,
            affected_rows: affected_rows as u64,
        })
    }

    fn execute_many(&mut self, sql: &str, batch: &[Params]) -> Result<ExecResult> {
        self.begin_implicit()?;

        let mut stmt = self
            .conn
            .prepare(sql)
            .map_err(|e| map_error("Failed to prepare statement", e))?;

        let mut affected_rows = 0u64;
        for params in batch {
            let bound = bind(params);
            affected_rows += execute_bound(&mut stmt, &bound)
                .map_err(|e| map_error("Failed to execute statement", e))?
                as u64;
        }
        drop(stmt);

        let last_insert_id = if is_insert(sql) && affected_rows > 0 {
            u64::try_from(self.conn.last_insert_rowid())
                .ok()
                .filter(|id| *id > 0)
        } else {
            None
        };

        tracing::debug!(affected_rows = affected_rows, batch_size = batch.len(), "batch executed");
        Ok(ExecResult {
            last_insert_id,
            affected_rows,
        })
    }

    fn set_autocommit(&mut self, enabled: bool) -> Result<()> {
        // Turning autocommit back on commits pending work, as in MySQL.
        if enabled && !self.autocommit && self.in_transaction() {
            self.conn
                .execute_batch("COMMIT")
                .map_err(|e| map_error("Failed to commit", e))?;
        }
        self.autocommit = enabled;
        Ok(())
    }

    fn begin(&mut self) -> Result<()> {
        if self.in_transaction() {
            return Ok(());
        }
        self.conn
            .execute_batch("BEGIN")
            .map_err(|e| map_error("Failed to begin transaction", e))
    }

    fn commit(&mut self) -> Result<()> {
        if !self.in_transaction() {
            return Ok(());
        }
        self.conn
            .execute_batch("COMMIT")
            .map_err(|e| map_error("Failed to commit", e))
    }

    fn rollback(&mut self) -> Result<()> {
        if !self.in_transaction() {
            return Ok(());
        }
        self.conn
            .execute_batch("ROLLBACK")
            .map_err(|e| map_error("Failed to roll back", e))
    }

    fn close(self: Box<Self>) -> Result<()> {
        tracing::info!(path = %self.path, "closing SQLite database");
        self.conn
            .close()
            .map_err(|(_, e)| map_error("Failed to close database", e))
    }
}

/// Parameters converted to rusqlite values
enum Bound {
    Positional(Vec<SqlValue>),
    Named(Vec<(String, SqlValue)>),
}

fn bind(params: &Params) -> Bound {
    match params {
        Params::Empty => Bound::Positional(Vec::new()),
        Params::Positional(values) => Bound::Positional(values.iter().map(value_to_sqlite).collect()),
        Params::Named(pairs) => Bound::Named(
            pairs
                .iter()
                .map(|(name, value)| (placeholder_name(name), value_to_sqlite(value)))
                .collect(),
        ),
    }
}

/// rusqlite looks parameters up by their full placeholder, prefix included
fn placeholder_name(name: &str) -> String {
    if name.starts_with([':', '@', '$']) {
        name.to_string()
    } else {
        format!(":{}", name)
    }
}

fn execute_bound(stmt: &mut Statement<'_>, bound: &Bound) -> rusqlite::Result<usize> {
    match bound {
        Bound::Positional(values) => stmt.execute(params_from_iter(values.iter())),
        Bound::Named(pairs) => {
            let refs: Vec<(&str, &dyn ToSql)> = pairs
                .iter()
                .map(|(name, value)| (name.as_str(), value as &dyn ToSql))
                .collect();
            stmt.execute(refs.as_slice())
        }
    }
}

fn query_bound<'s>(
    stmt: &'s mut Statement<'_>,
    bound: &Bound,
) -> rusqlite::Result<rusqlite::Rows<'s>> {
    match bound {
        Bound::Positional(values) => stmt.query(params_from_iter(values.iter())),
        Bound::Named(pairs) => {
            let refs: Vec<(&str, &dyn ToSql)> = pairs
                .iter()
                .map(|(name, value)| (name.as_str(), value as &dyn ToSql))
                .collect();
            stmt.query(refs.as_slice())
        }
    }
}

fn is_insert(sql: &str) -> bool {
    let head = sql.trim_start();
    ["INSERT", "REPLACE"]
        .iter()
        .any(|kw| head.get(..kw.len()).is_some_and(|h| h.eq_ignore_ascii_case(kw)))
}

/// Map a rusqlite error onto the shared taxonomy.
///
/// Busy/locked and I/O level failures leave the handle suspect and are
/// operational; constraint violations are integrity errors.
pub(crate) fn map_error(context: &str, err: rusqlite::Error) -> TidepoolError {
    let message = format!("{}: {}", context, err);
    match &err {
        rusqlite::Error::SqliteFailure(ffi, _) => match ffi.code {
            ErrorCode::ConstraintViolation => TidepoolError::Integrity(message),
            ErrorCode::DatabaseBusy
            | ErrorCode::DatabaseLocked
            | ErrorCode::SystemIoFailure
            | ErrorCode::CannotOpen
            | ErrorCode::NotADatabase
            | ErrorCode::DatabaseCorrupt => TidepoolError::Operational(message),
            _ => TidepoolError::Query(message),
        },
        _ => TidepoolError::Query(message),
    }
}

pub(crate) fn value_to_sqlite(value: &Value) -> SqlValue {
    match value {
        Value::Null => SqlValue::Null,
        Value::Bool(b) => SqlValue::Integer(i64::from(*b)),
        Value::Int64(i) => SqlValue::Integer(*i),
        Value::UInt64(u) => match i64::try_from(*u) {
            Ok(i) => SqlValue::Integer(i),
            Err(_) => SqlValue::Text(u.to_string()),
        },
        Value::Float64(f) => SqlValue::Real(*f),
        Value::Decimal(d) => SqlValue::Text(d.clone()),
        Value::String(s) => SqlValue::Text(s.clone()),
        Value::Bytes(b) => SqlValue::Blob(b.clone()),
        Value::Date(d) => SqlValue::Text(d.to_string()),
        Value::Time(t) => SqlValue::Text(t.to_string()),
        Value::DateTime(dt) => SqlValue::Text(dt.format("%Y-%m-%d %H:%M:%S%.f").to_string()),
        Value::Json(j) => SqlValue::Text(j.to_string()),
    }
}

pub(crate) fn sqlite_to_value(value_ref: ValueRef<'_>, conversions: &TypeConversions) -> Value {
    match value_ref {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(i) => Value::Int64(i),
        ValueRef::Real(f) => Value::Float64(f),
        ValueRef::Text(s) => Value::String(String::from_utf8_lossy(s).into_owned()),
        ValueRef::Blob(b) => match std::str::from_utf8(b) {
            Ok(s) if conversions.binary_as_text => Value::String(s.to_string()),
            _ => Value::Bytes(b.to_vec()),
        },
    }
}
