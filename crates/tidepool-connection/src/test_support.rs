//! Mock driver shared by the connection and pool tests

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};

use parking_lot::Mutex;
use tidepool_core::{
    ConnectionConfig, Driver, ExecResult, Params, Result, Row, RowIter, Session, TidepoolError,
    Value,
};

/// Failure injected into the next statement a mock session runs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Failure {
    Operational,
    Query,
}

impl Failure {
    fn into_error(self) -> TidepoolError {
        match self {
            Failure::Operational => TidepoolError::Operational("server has gone away".into()),
            Failure::Query => TidepoolError::Query("syntax error".into()),
        }
    }
}

/// State shared between a mock driver and every session it opened
#[derive(Default)]
pub(crate) struct MockState {
    pub opens: AtomicUsize,
    pub closes: AtomicUsize,
    pub pings: AtomicUsize,
    pub fail_open: AtomicBool,
    pub fail_ping: AtomicBool,
    pub fail_close: AtomicBool,
    next_failure: Mutex<Option<Failure>>,
    next_id: AtomicU64,
    rows: Mutex<Vec<Row>>,
    log: Mutex<Vec<String>>,
}

impl MockState {
    pub fn opens(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }

    pub fn closes(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }

    pub fn pings(&self) -> usize {
        self.pings.load(Ordering::SeqCst)
    }

    pub fn set_fail_open(&self, fail: bool) {
        self.fail_open.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_ping(&self, fail: bool) {
        self.fail_ping.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_close(&self, fail: bool) {
        self.fail_close.store(fail, Ordering::SeqCst);
    }

    pub fn fail_next(&self, failure: Failure) {
        *self.next_failure.lock() = Some(failure);
    }

    /// Rows returned by every query
    pub fn set_rows(&self, rows: Vec<Row>) {
        *self.rows.lock() = rows;
    }

    /// Statements and transaction commands seen so far
    pub fn log(&self) -> Vec<String> {
        self.log.lock().clone()
    }

    pub fn clear_log(&self) {
        self.log.lock().clear();
    }

    fn record(&self, entry: impl Into<String>) -> Result<()> {
        self.log.lock().push(entry.into());
        match self.next_failure.lock().take() {
            Some(failure) => Err(failure.into_error()),
            None => Ok(()),
        }
    }
}

pub(crate) fn row(columns: &[&str], values: Vec<Value>) -> Row {
    let columns: Arc<[String]> = columns.iter().map(|c| c.to_string()).collect();
    Row::new(columns, values)
}

/// Driver whose sessions record commands instead of talking to a server
pub(crate) struct MockDriver {
    name: &'static str,
    state: Arc<MockState>,
}

impl MockDriver {
    pub fn new() -> (Arc<Self>, Arc<MockState>) {
        Self::named("mock")
    }

    pub fn named(name: &'static str) -> (Arc<Self>, Arc<MockState>) {
        let state = Arc::new(MockState::default());
        let driver = Arc::new(Self {
            name,
            state: state.clone(),
        });
        (driver, state)
    }
}

impl Driver for MockDriver {
    fn name(&self) -> &'static str {
        self.name
    }

    fn open(&self, _config: &ConnectionConfig) -> Result<Box<dyn Session>> {
        if self.state.fail_open.load(Ordering::SeqCst) {
            return Err(TidepoolError::Operational("connection refused".into()));
        }
        self.state.opens.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(MockSession {
            name: self.name,
            state: self.state.clone(),
        }))
    }
}

struct MockSession {
    name: &'static str,
    state: Arc<MockState>,
}

impl Session for MockSession {
    fn driver_name(&self) -> &'static str {
        self.name
    }

    fn ping(&mut self) -> Result<()> {
        self.state.pings.fetch_add(1, Ordering::SeqCst);
        if self.state.fail_ping.load(Ordering::SeqCst) {
            return Err(TidepoolError::Operational("ping failed".into()));
        }
        Ok(())
    }

    fn query_iter<'a>(&'a mut self, sql: &str, _params: &Params) -> Result<RowIter<'a>> {
        self.state.record(sql)?;
        let rows = self.state.rows.lock().clone();
        Ok(Box::new(rows.into_iter().map(Ok)))
    }

    fn execute(&mut self, sql: &str, _params: &Params) -> Result<ExecResult> {
        self.state.record(sql)?;
        let id = self.state.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(ExecResult {
            last_insert_id: Some(id),
            affected_rows: 1,
        })
    }

    fn set_autocommit(&mut self, enabled: bool) -> Result<()> {
        self.state.record(format!("autocommit={}", enabled))
    }

    fn begin(&mut self) -> Result<()> {
        self.state.record("BEGIN")
    }

    fn commit(&mut self) -> Result<()> {
        self.state.record("COMMIT")
    }

    fn rollback(&mut self) -> Result<()> {
        self.state.record("ROLLBACK")
    }

    fn close(self: Box<Self>) -> Result<()> {
        self.state.closes.fetch_add(1, Ordering::SeqCst);
        if self.state.fail_close.load(Ordering::SeqCst) {
            return Err(TidepoolError::Operational("close failed".into()));
        }
        Ok(())
    }
}
