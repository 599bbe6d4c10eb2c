//! Unit tests for MySQL driver

use super::*;
use mysql::Opts;
use tidepool_core::{ConnectionConfig, DEFAULT_PORT, Driver, TidepoolError};

#[test]
fn test_mysql_driver_name() {
    let driver = MySqlDriver::new();
    assert_eq!(driver.name(), "mysql");
}

#[test]
fn test_mysql_default_port() {
    let driver = MySqlDriver::new();
    assert_eq!(driver.default_port(), Some(3306));
    assert_eq!(driver.default_port(), Some(DEFAULT_PORT));
}

#[test]
fn test_build_opts_tcp_host_and_port() {
    let config = ConnectionConfig::new_mysql("db.internal:3307", "app")
        .with_user("app_user")
        .with_password("secret");
    let opts = Opts::from(build_opts(&config).expect("opts"));

    assert_eq!(opts.get_ip_or_hostname(), "db.internal");
    assert_eq!(opts.get_tcp_port(), 3307);
    assert_eq!(opts.get_db_name(), Some("app"));
    assert_eq!(opts.get_user(), Some("app_user"));
    assert_eq!(opts.get_pass(), Some("secret"));
    assert!(opts.get_socket().is_none());
}

#[test]
fn test_build_opts_default_port() {
    let config = ConnectionConfig::new_mysql("localhost", "app");
    let opts = Opts::from(build_opts(&config).expect("opts"));
    assert_eq!(opts.get_tcp_port(), DEFAULT_PORT);
}

#[test]
fn test_build_opts_unix_socket() {
    let config = ConnectionConfig::new_mysql("/var/run/mysqld/mysqld.sock", "app");
    let opts = Opts::from(build_opts(&config).expect("opts"));
    assert_eq!(opts.get_socket(), Some("/var/run/mysqld/mysqld.sock"));
}

#[test]
fn test_build_opts_rejects_bad_port() {
    let config = ConnectionConfig::new_mysql("localhost:notaport", "app");
    assert!(matches!(
        build_opts(&config),
        Err(TidepoolError::Configuration(_))
    ));
}

#[test]
fn test_init_commands_defaults() {
    let config = ConnectionConfig::new_mysql("localhost", "app");
    let commands = init_commands(&config).expect("commands");
    assert_eq!(
        commands,
        vec![
            "SET NAMES utf8".to_string(),
            "SET time_zone = '+0:00'".to_string(),
            "SET SESSION sql_mode = 'TRADITIONAL'".to_string(),
        ]
    );
}

#[test]
fn test_init_commands_quote_values_and_append_init_command() {
    let config = ConnectionConfig::new_mysql("localhost", "app")
        .with_charset("utf8mb4")
        .with_time_zone("Europe/O'Brien")
        .with_param("init_command", "SET SESSION wait_timeout = 600");
    let commands = init_commands(&config).expect("commands");
    assert_eq!(commands[0], "SET NAMES utf8mb4");
    assert_eq!(commands[1], "SET time_zone = 'Europe/O''Brien'");
    assert_eq!(commands[3], "SET SESSION wait_timeout = 600");
}

#[test]
fn test_init_commands_reject_bad_charset() {
    let config = ConnectionConfig::new_mysql("localhost", "app").with_charset("utf8; DROP TABLE x");
    assert!(matches!(
        init_commands(&config),
        Err(TidepoolError::Configuration(_))
    ));
}

#[test]
fn test_connect_refused_is_operational() {
    // Port 1 on loopback is never a MySQL server
    let config = ConnectionConfig::new_mysql("127.0.0.1:1", "app")
        .with_connect_timeout(Some(std::time::Duration::from_secs(1)));
    let err = MySqlDriver::new()
        .open(&config)
        .err()
        .expect("connect must fail");
    assert!(err.is_operational(), "got {err:?}");
}

#[test]
fn test_server_error_classification() {
    use mysql::MySqlError;

    let server_error = |code: u16| {
        mysql::Error::MySqlError(MySqlError {
            state: "HY000".to_string(),
            message: "boom".to_string(),
            code,
        })
    };

    assert!(matches!(
        session::map_error("q", server_error(2006)),
        TidepoolError::Operational(_)
    ));
    assert!(matches!(
        session::map_error("q", server_error(1062)),
        TidepoolError::Integrity(_)
    ));
    assert!(matches!(
        session::map_error("q", server_error(1064)),
        TidepoolError::Query(_)
    ));
    let io = mysql::Error::IoError(std::io::Error::new(
        std::io::ErrorKind::ConnectionReset,
        "reset",
    ));
    assert!(session::map_error("q", io).is_operational());
}
