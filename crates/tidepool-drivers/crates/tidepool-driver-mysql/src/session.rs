//! MySQL session implementation

use std::sync::Arc;

use mysql::prelude::Queryable;
use mysql::{Conn, OptsBuilder};
use tidepool_core::{
    ConnectionConfig, ExecResult, HostAddress, Params, Result, Row, RowIter, Session,
    TidepoolError, TypeConversions,
};

use crate::convert::{mysql_to_value, params_to_mysql};

/// Driver-specific parameter holding an extra statement to run on connect
const INIT_COMMAND_PARAM: &str = "init_command";

/// A live MySQL session
pub struct MySqlSession {
    conn: Conn,
    address: HostAddress,
    conversions: TypeConversions,
}

impl MySqlSession {
    /// Connect using the given configuration and switch the session to
    /// autocommit mode.
    pub fn connect(config: &ConnectionConfig) -> Result<Self> {
        let address = config.address()?;
        let opts = build_opts(config)?;

        tracing::info!(address = %address, database = %config.database, "connecting to MySQL");
        let mut conn = Conn::new(opts).map_err(|e| {
            TidepoolError::Operational(format!(
                "Failed to connect to MySQL on {}: {}",
                address, e
            ))
        })?;
        conn.query_drop("SET autocommit = 1")
            .map_err(|e| map_error("enable autocommit", e))?;
        tracing::debug!(
            connection_id = conn.connection_id(),
            "MySQL session established"
        );

        Ok(Self {
            conn,
            address,
            conversions: config.conversions,
        })
    }

    /// Server address this session is connected to
    pub fn address(&self) -> &HostAddress {
        &self.address
    }

    fn drop_statement(&mut self, sql: &str, params: &Params) -> Result<()> {
        if params.is_empty() {
            self.conn.query_drop(sql)
        } else {
            self.conn.exec_drop(sql, params_to_mysql(params))
        }
        .map_err(|e| map_error("execute", e))
    }
}

/// Build client options from a configuration
pub fn build_opts(config: &ConnectionConfig) -> Result<OptsBuilder> {
    let mut builder = OptsBuilder::new();
    builder = match config.address()? {
        HostAddress::Socket(path) => builder.socket(Some(path.to_string_lossy().into_owned())),
        HostAddress::Tcp { host, port } => builder.ip_or_hostname(Some(host)).tcp_port(port),
    };

    let database = config.database.trim();
    Ok(builder
        .db_name((!database.is_empty()).then(|| database.to_string()))
        .user(config.user.clone())
        .pass(config.password.clone())
        .tcp_connect_timeout(config.connect_timeout)
        .init(init_commands(config)?))
}

/// Statements run on every new session: character set, time zone and
/// SQL mode, plus any configured `init_command`.
pub fn init_commands(config: &ConnectionConfig) -> Result<Vec<String>> {
    let charset = config.charset.trim();
    if charset.is_empty()
        || !charset
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_')
    {
        return Err(TidepoolError::Configuration(format!(
            "invalid charset '{}'",
            config.charset
        )));
    }

    let mut commands = vec![
        format!("SET NAMES {}", charset),
        format!("SET time_zone = '{}'", quote(&config.time_zone)),
        format!("SET SESSION sql_mode = '{}'", quote(&config.sql_mode)),
    ];
    if let Some(command) = config.params.get(INIT_COMMAND_PARAM) {
        commands.push(command.clone());
    }
    Ok(commands)
}

fn quote(value: &str) -> String {
    value.replace('\\', "\\\\").replace('\'', "''")
}

/// Classify a client error.
///
/// Lost connections and protocol failures are operational; constraint
/// violations are integrity errors; everything else is a query error.
pub(crate) fn map_error(context: &str, error: mysql::Error) -> TidepoolError {
    use mysql::{DriverError, Error};

    let message = format!("{}: {}", context, error);
    match &error {
        Error::IoError(_) | Error::CodecError(_) => TidepoolError::Operational(message),
        Error::DriverError(
            DriverError::MismatchedStmtParams(..)
            | DriverError::NamedParamsForPositionalQuery
            | DriverError::MixedParams
            | DriverError::MissingNamedParameter(_),
        ) => TidepoolError::Query(message),
        Error::DriverError(_) => TidepoolError::Operational(message),
        Error::MySqlError(server) => match server.code {
            // server gone away, lost connection, shutdown in progress, connection killed
            2006 | 2013 | 1053 | 1927 => TidepoolError::Operational(message),
            // duplicate key, foreign key, NOT NULL violations
            1062 | 1451 | 1452 | 1048 | 1216 | 1217 | 1364 => {
                TidepoolError::Integrity(message)
            }
            _ => TidepoolError::Query(message),
        },
        _ => TidepoolError::Query(message),
    }
}

/// Rows of one result set, converted as they are read
struct MySqlRows<I> {
    inner: I,
    columns: Option<Arc<[String]>>,
    conversions: TypeConversions,
}

impl<I> MySqlRows<I> {
    fn new(inner: I, conversions: TypeConversions) -> Self {
        Self {
            inner,
            columns: None,
            conversions,
        }
    }
}

impl<I> Iterator for MySqlRows<I>
where
    I: Iterator<Item = mysql::Result<mysql::Row>>,
{
    type Item = Result<Row>;

    fn next(&mut self) -> Option<Self::Item> {
        let row = match self.inner.next()? {
            Ok(row) => row,
            Err(e) => return Some(Err(map_error("fetch row", e))),
        };

        let columns = self
            .columns
            .get_or_insert_with(|| {
                row.columns_ref()
                    .iter()
                    .map(|c| c.name_str().into_owned())
                    .collect::<Vec<_>>()
                    .into()
            })
            .clone();

        let values = row
            .columns_ref()
            .iter()
            .enumerate()
            .map(|(i, column)| {
                let raw = row.as_ref(i).cloned().unwrap_or(mysql::Value::NULL);
                mysql_to_value(raw, column.column_type(), column.flags(), self.conversions)
            })
            .collect();

        Some(Ok(Row::new(columns, values)))
    }
}

impl Session for MySqlSession {
    fn driver_name(&self) -> &'static str {
        "mysql"
    }

    fn ping(&mut self) -> Result<()> {
        self.conn
            .query_drop("SELECT 1")
            .map_err(|e| map_error("ping", e))
    }

    #[tracing::instrument(skip(self, sql, params), fields(sql_preview = %sql.chars().take(100).collect::<String>()))]
    fn query_iter<'a>(&'a mut self, sql: &str, params: &Params) -> Result<RowIter<'a>> {
        let conversions = self.conversions;
        if params.is_empty() {
            let result = self
                .conn
                .query_iter(sql)
                .map_err(|e| map_error("query", e))?;
            Ok(Box::new(MySqlRows::new(result, conversions)))
        } else {
            let result = self
                .conn
                .exec_iter(sql, params_to_mysql(params))
                .map_err(|e| map_error("query", e))?;
            Ok(Box::new(MySqlRows::new(result, conversions)))
        }
    }

    #[tracing::instrument(skip(self, sql, params), fields(sql_preview = %sql.chars().take(100).collect::<String>()))]
    fn execute(&mut self, sql: &str, params: &Params) -> Result<ExecResult> {
        self.drop_statement(sql, params)?;
        let last_insert_id = Some(self.conn.last_insert_id()).filter(|id| *id > 0);
        let affected_rows = self.conn.affected_rows();
        tracing::debug!(affected_rows, ?last_insert_id, "statement executed");
        Ok(ExecResult {
            last_insert_id,
            affected_rows,
        })
    }

    fn set_autocommit(&mut self, enabled: bool) -> Result<()> {
        let sql = if enabled {
            "SET autocommit = 1"
        } else {
            "SET autocommit = 0"
        };
        self.conn
            .query_drop(sql)
            .map_err(|e| map_error("set autocommit", e))
    }

    fn begin(&mut self) -> Result<()> {
        self.conn
            .query_drop("BEGIN")
            .map_err(|e| map_error("begin", e))
    }

    fn commit(&mut self) -> Result<()> {
        self.conn
            .query_drop("COMMIT")
            .map_err(|e| map_error("commit", e))
    }

    fn rollback(&mut self) -> Result<()> {
        self.conn
            .query_drop("ROLLBACK")
            .map_err(|e| map_error("rollback", e))
    }

    fn close(self: Box<Self>) -> Result<()> {
        tracing::debug!(address = %self.address, "closing MySQL session");
        // Dropping the client sends COM_QUIT
        drop(self);
        Ok(())
    }
}
