//! Conversion between tidepool values and MySQL wire values

use chrono::{Datelike, NaiveDate, NaiveDateTime, NaiveTime, Timelike};
use mysql::Value as MySqlValue;
use mysql::consts::{ColumnFlags, ColumnType};
use tidepool_core::{Params, TypeConversions, Value};

const DATE_FORMAT: &str = "%Y-%m-%d";
const DATETIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.f";
const TIME_FORMAT: &str = "%H:%M:%S%.f";

/// Convert a tidepool value into a MySQL parameter value
pub(crate) fn value_to_mysql(value: &Value) -> MySqlValue {
    match value {
        Value::Null => MySqlValue::NULL,
        Value::Bool(b) => MySqlValue::Int(i64::from(*b)),
        Value::Int64(i) => MySqlValue::Int(*i),
        Value::UInt64(u) => MySqlValue::UInt(*u),
        Value::Float64(f) => MySqlValue::Double(*f),
        Value::Decimal(s) | Value::String(s) => MySqlValue::Bytes(s.clone().into_bytes()),
        Value::Bytes(b) => MySqlValue::Bytes(b.clone()),
        Value::Date(d) => MySqlValue::Date(
            d.year() as u16,
            d.month() as u8,
            d.day() as u8,
            0,
            0,
            0,
            0,
        ),
        Value::Time(t) => MySqlValue::Time(
            false,
            0,
            t.hour() as u8,
            t.minute() as u8,
            t.second() as u8,
            micros(t.nanosecond()),
        ),
        Value::DateTime(dt) => MySqlValue::Date(
            dt.year() as u16,
            dt.month() as u8,
            dt.day() as u8,
            dt.hour() as u8,
            dt.minute() as u8,
            dt.second() as u8,
            micros(dt.nanosecond()),
        ),
        Value::Json(j) => MySqlValue::Bytes(j.to_string().into_bytes()),
    }
}

// Leap seconds are carried as nanosecond values >= 1e9
fn micros(nanos: u32) -> u32 {
    (nanos / 1_000).min(999_999)
}

/// Convert statement parameters into the MySQL client's representation
///
/// Named parameter keys may be given with or without the leading `:`.
pub(crate) fn params_to_mysql(params: &Params) -> mysql::Params {
    match params {
        Params::Empty => mysql::Params::Empty,
        Params::Positional(values) if values.is_empty() => mysql::Params::Empty,
        Params::Positional(values) => {
            mysql::Params::Positional(values.iter().map(value_to_mysql).collect())
        }
        Params::Named(pairs) => mysql::Params::from(
            pairs
                .iter()
                .map(|(name, value)| {
                    (
                        name.trim_start_matches(':').to_string(),
                        value_to_mysql(value),
                    )
                })
                .collect::<Vec<(String, MySqlValue)>>(),
        ),
    }
}

/// Convert a MySQL column value into a tidepool value
///
/// Text-protocol results arrive as raw bytes and are decoded according to
/// the column type; binary-protocol results are already typed.
pub(crate) fn mysql_to_value(
    value: MySqlValue,
    column_type: ColumnType,
    flags: ColumnFlags,
    conversions: TypeConversions,
) -> Value {
    match value {
        MySqlValue::NULL => Value::Null,
        MySqlValue::Bytes(bytes) => bytes_to_value(bytes, column_type, flags, conversions),
        MySqlValue::Int(i) => Value::Int64(i),
        MySqlValue::UInt(u) => i64::try_from(u)
            .map(Value::Int64)
            .unwrap_or(Value::UInt64(u)),
        MySqlValue::Float(f) => Value::Float64(f64::from(f)),
        MySqlValue::Double(d) => Value::Float64(d),
        MySqlValue::Date(year, month, day, hour, min, sec, micro) => {
            let text = if column_type == ColumnType::MYSQL_TYPE_DATE {
                format!("{:04}-{:02}-{:02}", year, month, day)
            } else if micro > 0 {
                format!(
                    "{:04}-{:02}-{:02} {:02}:{:02}:{:02}.{:06}",
                    year, month, day, hour, min, sec, micro
                )
            } else {
                format!(
                    "{:04}-{:02}-{:02} {:02}:{:02}:{:02}",
                    year, month, day, hour, min, sec
                )
            };
            if conversions.datetimes_as_text {
                return Value::String(text);
            }

            let date = NaiveDate::from_ymd_opt(i32::from(year), u32::from(month), u32::from(day));
            if column_type == ColumnType::MYSQL_TYPE_DATE {
                return date.map(Value::Date).unwrap_or(Value::String(text));
            }
            date.and_then(|d| {
                d.and_hms_micro_opt(u32::from(hour), u32::from(min), u32::from(sec), micro)
            })
            .map(Value::DateTime)
            .unwrap_or(Value::String(text))
        }
        MySqlValue::Time(negative, days, hours, mins, secs, micros) => {
            if !negative && days == 0 && !conversions.datetimes_as_text {
                if let Some(time) = NaiveTime::from_hms_micro_opt(
                    u32::from(hours),
                    u32::from(mins),
                    u32::from(secs),
                    micros,
                ) {
                    return Value::Time(time);
                }
            }
            let total_hours = days * 24 + u32::from(hours);
            let sign = if negative { "-" } else { "" };
            if micros > 0 {
                Value::String(format!(
                    "{}{:02}:{:02}:{:02}.{:06}",
                    sign, total_hours, mins, secs, micros
                ))
            } else {
                Value::String(format!("{}{:02}:{:02}:{:02}", sign, total_hours, mins, secs))
            }
        }
    }
}

fn bytes_to_value(
    bytes: Vec<u8>,
    column_type: ColumnType,
    flags: ColumnFlags,
    conversions: TypeConversions,
) -> Value {
    match column_type {
        ColumnType::MYSQL_TYPE_TINY
        | ColumnType::MYSQL_TYPE_SHORT
        | ColumnType::MYSQL_TYPE_LONG
        | ColumnType::MYSQL_TYPE_LONGLONG
        | ColumnType::MYSQL_TYPE_INT24
        | ColumnType::MYSQL_TYPE_YEAR => {
            let text = lossy(bytes);
            if let Ok(i) = text.parse::<i64>() {
                Value::Int64(i)
            } else if let Ok(u) = text.parse::<u64>() {
                Value::UInt64(u)
            } else {
                Value::String(text)
            }
        }
        ColumnType::MYSQL_TYPE_FLOAT | ColumnType::MYSQL_TYPE_DOUBLE => {
            let text = lossy(bytes);
            text.parse::<f64>()
                .map(Value::Float64)
                .unwrap_or(Value::String(text))
        }
        ColumnType::MYSQL_TYPE_DECIMAL | ColumnType::MYSQL_TYPE_NEWDECIMAL => {
            Value::Decimal(lossy(bytes))
        }
        ColumnType::MYSQL_TYPE_BIT if bytes.len() <= 8 => {
            Value::UInt64(bytes.iter().fold(0u64, |acc, b| (acc << 8) | u64::from(*b)))
        }
        ColumnType::MYSQL_TYPE_JSON => match serde_json::from_slice(&bytes) {
            Ok(json) => Value::Json(json),
            Err(_) => text_or_bytes(bytes, flags, conversions),
        },
        ColumnType::MYSQL_TYPE_DATE
        | ColumnType::MYSQL_TYPE_DATETIME
        | ColumnType::MYSQL_TYPE_TIMESTAMP
        | ColumnType::MYSQL_TYPE_TIME => {
            let text = lossy(bytes);
            if conversions.datetimes_as_text {
                Value::String(text)
            } else {
                parse_temporal(text, column_type)
            }
        }
        _ => text_or_bytes(bytes, flags, conversions),
    }
}

/// Parse a text-protocol temporal value; zero dates and out-of-range
/// times stay strings.
fn parse_temporal(text: String, column_type: ColumnType) -> Value {
    let parsed = match column_type {
        ColumnType::MYSQL_TYPE_DATE => NaiveDate::parse_from_str(&text, DATE_FORMAT)
            .ok()
            .map(Value::Date),
        ColumnType::MYSQL_TYPE_TIME => NaiveTime::parse_from_str(&text, TIME_FORMAT)
            .ok()
            .map(Value::Time),
        _ => NaiveDateTime::parse_from_str(&text, DATETIME_FORMAT)
            .ok()
            .map(Value::DateTime),
    };
    parsed.unwrap_or(Value::String(text))
}

fn text_or_bytes(bytes: Vec<u8>, flags: ColumnFlags, conversions: TypeConversions) -> Value {
    if flags.contains(ColumnFlags::BINARY_FLAG) && !conversions.binary_as_text {
        return Value::Bytes(bytes);
    }
    match String::from_utf8(bytes) {
        Ok(s) => Value::String(s),
        Err(e) => Value::Bytes(e.into_bytes()),
    }
}

fn lossy(bytes: Vec<u8>) -> String {
    String::from_utf8(bytes).unwrap_or_else(|e| String::from_utf8_lossy(e.as_bytes()).into_owned())
}
