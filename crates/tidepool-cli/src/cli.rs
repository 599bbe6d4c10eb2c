//! tidepool: run statements through a connection pool
//!
//! ```bash
//! tidepool --config tidepool.toml ping
//! tidepool --driver sqlite --database app.db query "SELECT * FROM users WHERE id = ?" -p 7
//! TIDEPOOL_PASSWORD=secret tidepool --host db:3306 --database app --user app exec "DELETE FROM sessions"
//! ```

use std::io::{self, Write};
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use tidepool_connection::{Connection, ConnectionPool, Params, PoolConfig, Settings, Value};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(
    name = "tidepool",
    version,
    about = "Run SQL through a tidepool connection pool"
)]
struct Cli {
    /// Settings file with [connection] and [pool] tables
    #[arg(long, short, global = true, env = "TIDEPOOL_CONFIG")]
    config: Option<PathBuf>,

    #[command(flatten)]
    connection: ConnectionArgs,

    /// Number of pooled connections (overrides the settings file)
    #[arg(long, global = true)]
    pool_size: Option<usize>,

    /// Emit logs as JSON
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Command,
}

/// Connection options; each one overrides the settings file
#[derive(Args, Debug)]
struct ConnectionArgs {
    /// Driver id ("mysql" or "sqlite")
    #[arg(long, global = true)]
    driver: Option<String>,

    /// host, host:port or unix socket path
    #[arg(long, global = true)]
    host: Option<String>,

    /// Database name, or file path for sqlite
    #[arg(long, global = true)]
    database: Option<String>,

    #[arg(long, global = true)]
    user: Option<String>,

    #[arg(long, global = true, env = "TIDEPOOL_PASSWORD", hide_env_values = true)]
    password: Option<String>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Check that the database is reachable
    Ping,

    /// Run a query and print each row as a JSON line
    Query(StatementArgs),

    /// Run a statement and print the affected row count
    Exec(StatementArgs),
}

#[derive(Args, Debug)]
struct StatementArgs {
    /// SQL text with `?` placeholders
    sql: String,

    /// Positional parameter, repeatable
    #[arg(long = "param", short = 'p')]
    params: Vec<String>,
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .with_target(false);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn load_settings(cli: &Cli) -> Result<Settings> {
    let mut settings = match &cli.config {
        Some(path) => Settings::load(path)
            .with_context(|| format!("failed to load settings from {}", path.display()))?,
        None => Settings::default(),
    };

    let args = &cli.connection;
    let connection = &mut settings.connection;
    if let Some(driver) = &args.driver {
        connection.driver = driver.clone();
    }
    if let Some(host) = &args.host {
        connection.host = host.clone();
    }
    if let Some(database) = &args.database {
        connection.database = database.clone();
    }
    if args.user.is_some() {
        connection.user = args.user.clone();
    }
    if args.password.is_some() {
        connection.password = args.password.clone();
    }

    if let Some(size) = cli.pool_size {
        settings.pool = PoolConfig::new(size)?
            .with_test_on_checkout(settings.pool.test_on_checkout());
    }
    Ok(settings)
}

/// Interpret a command-line parameter: integers and floats keep their
/// type, `NULL` is null, anything else is text.
fn parse_param(raw: &str) -> Value {
    if raw.eq_ignore_ascii_case("null") {
        Value::Null
    } else if let Ok(i) = raw.parse::<i64>() {
        Value::Int64(i)
    } else if let Ok(f) = raw.parse::<f64>() {
        Value::Float64(f)
    } else {
        Value::String(raw.to_string())
    }
}

fn statement_params(args: &StatementArgs) -> Params {
    args.params
        .iter()
        .map(|raw| parse_param(raw))
        .collect::<Vec<_>>()
        .into()
}

fn execute_command(conn: &mut Connection, command: &Command, out: &mut impl Write) -> Result<()> {
    match command {
        Command::Ping => {
            conn.ping()?;
            writeln!(out, "ok {}", conn)?;
        }
        Command::Query(args) => {
            for row in conn.iter(&args.sql, statement_params(args))? {
                writeln!(out, "{}", serde_json::to_string(&row?.to_json())?)?;
            }
        }
        Command::Exec(args) => {
            let result = conn.execute_result(&args.sql, statement_params(args))?;
            let id = result
                .last_insert_id
                .map(|id| id.to_string())
                .unwrap_or_else(|| "-".to_string());
            writeln!(
                out,
                "affected_rows={} last_insert_id={}",
                result.affected_rows, id
            )?;
        }
    }
    Ok(())
}

fn run(cli: Cli) -> Result<()> {
    let settings = load_settings(&cli)?;
    tracing::debug!(connection = ?settings.connection, pool = ?settings.pool, "starting");

    let pool = ConnectionPool::new(settings.pool, Some(settings.connection))
        .context("failed to create connection pool")?;
    let mut conn = pool.get_connection()?;
    let outcome = execute_command(&mut conn, &cli.command, &mut io::stdout().lock());

    pool.add_connection(Some(conn))?;
    let closed = pool.dispose()?;
    tracing::debug!(closed, "pool disposed");
    outcome
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.json_logs);
    run(cli)
}
