//! Driver adapter traits
//!
//! A `Driver` knows how to open sessions for one database backend; a
//! `Session` is one live handle. The connection wrapper and the pool only
//! ever talk to these two traits.

use crate::{ConnectionConfig, ExecResult, Params, Result, Row};

/// Lazily produced rows of one result set
///
/// Dropping the iterator releases the underlying cursor, even when it was
/// not read to the end.
pub type RowIter<'a> = Box<dyn Iterator<Item = Result<Row>> + 'a>;

/// A database driver that can open sessions
pub trait Driver: Send + Sync {
    /// Unique identifier for this driver (e.g. "mysql", "sqlite")
    fn name(&self) -> &'static str;

    /// Default connection port (None for file-based databases like SQLite)
    fn default_port(&self) -> Option<u16> {
        None
    }

    /// Open a new session with the given configuration
    fn open(&self, config: &ConnectionConfig) -> Result<Box<dyn Session>>;
}

/// One open database session
///
/// Sessions are used by exactly one owner at a time, so every operation
/// takes `&mut self`.
pub trait Session: Send {
    /// Get the driver name this session belongs to
    fn driver_name(&self) -> &'static str;

    /// Check that the server still answers
    fn ping(&mut self) -> Result<()>;

    /// Execute a query and stream its rows
    fn query_iter<'a>(&'a mut self, sql: &str, params: &Params) -> Result<RowIter<'a>>;

    /// Execute a query and materialize every row
    fn query(&mut self, sql: &str, params: &Params) -> Result<Vec<Row>> {
        self.query_iter(sql, params)?.collect()
    }

    /// Execute a statement that modifies data (INSERT/UPDATE/DELETE/DDL)
    fn execute(&mut self, sql: &str, params: &Params) -> Result<ExecResult>;

    /// Execute a statement once per parameter set.
    ///
    /// `affected_rows` is summed over the batch; `last_insert_id` is the one
    /// reported by the final statement.
    fn execute_many(&mut self, sql: &str, batch: &[Params]) -> Result<ExecResult> {
        let mut total = ExecResult::default();
        for params in batch {
            let result = self.execute(sql, params)?;
            total.affected_rows += result.affected_rows;
            total.last_insert_id = result.last_insert_id;
        }
        Ok(total)
    }

    fn set_autocommit(&mut self, enabled: bool) -> Result<()>;

    fn begin(&mut self) -> Result<()>;

    fn commit(&mut self) -> Result<()>;

    fn rollback(&mut self) -> Result<()>;

    /// Close the session, releasing the server-side resources
    fn close(self: Box<Self>) -> Result<()>;
}
