//! MySQL backend (feature `mysql`).
//!
//! Implements the read-only [`Connection`] surface over mysql_async. The
//! driver connection lives behind a take/put mutex because mysql_async
//! needs `&mut Conn` for execution while the trait surface is `&self`.

use async_trait::async_trait;
use chrono::{Datelike, Timelike};
use mysql_async::prelude::*;
use mysql_async::{Conn, OptsBuilder};
use std::sync::Arc;
use tokio::sync::Mutex;

use crate::connection::{
    Connection, ConnectionConfig, ConnectionFactory, RowStream, VecRowStream,
};
use crate::descriptor::SourceKind;
use crate::error::{Error, Result};
use crate::types::{Row, Value};

/// Convert a siphon Value to a MySQL parameter
fn value_to_sql(value: &Value) -> mysql_async::Value {
    match value {
        Value::Null => mysql_async::Value::NULL,
        Value::Bool(b) => mysql_async::Value::from(*b),
        Value::Int8(n) => mysql_async::Value::from(*n),
        Value::Int16(n) => mysql_async::Value::from(*n),
        Value::Int32(n) => mysql_async::Value::from(*n),
        Value::Int64(n) => mysql_async::Value::from(*n),
        Value::Float32(n) => mysql_async::Value::from(*n),
        Value::Float64(n) => mysql_async::Value::from(*n),
        // MySQL DECIMAL travels as text
        Value::Decimal(d) => mysql_async::Value::from(d.to_string()),
        Value::String(s) => mysql_async::Value::from(s.clone()),
        Value::Bytes(b) => mysql_async::Value::from(b.clone()),
        Value::Date(d) => {
            mysql_async::Value::Date(d.year() as u16, d.month() as u8, d.day() as u8, 0, 0, 0, 0)
        }
        Value::Time(t) => mysql_async::Value::Time(
            false,
            0,
            t.hour() as u8,
            t.minute() as u8,
            t.second() as u8,
            t.nanosecond() / 1000,
        ),
        Value::DateTime(dt) => {
            let (date, time) = (dt.date(), dt.time());
            mysql_async::Value::Date(
                date.year() as u16,
                date.month() as u8,
                date.day() as u8,
                time.hour() as u8,
                time.minute() as u8,
                time.second() as u8,
                time.nanosecond() / 1000,
            )
        }
        Value::DateTimeTz(dt) => {
            let naive = dt.naive_utc();
            let (date, time) = (naive.date(), naive.time());
            mysql_async::Value::Date(
                date.year() as u16,
                date.month() as u8,
                date.day() as u8,
                time.hour() as u8,
                time.minute() as u8,
                time.second() as u8,
                time.nanosecond() / 1000,
            )
        }
        Value::Uuid(u) => mysql_async::Value::from(u.to_string()),
        Value::Json(j) => mysql_async::Value::from(j.to_string()),
    }
}

/// Convert a MySQL value to a siphon Value
fn mysql_value_to_value(val: mysql_async::Value) -> Value {
    match val {
        mysql_async::Value::NULL => Value::Null,
        mysql_async::Value::Bytes(b) => match String::from_utf8(b) {
            Ok(s) => Value::String(s),
            Err(e) => Value::Bytes(e.into_bytes()),
        },
        mysql_async::Value::Int(n) => Value::Int64(n),
        mysql_async::Value::UInt(n) => Value::Int64(n as i64),
        mysql_async::Value::Float(f) => Value::Float32(f),
        mysql_async::Value::Double(d) => Value::Float64(d),
        mysql_async::Value::Date(year, month, day, hour, min, sec, micro) => {
            let date = chrono::NaiveDate::from_ymd_opt(year as i32, month as u32, day as u32);
            match date {
                Some(date) if hour == 0 && min == 0 && sec == 0 && micro == 0 => Value::Date(date),
                Some(date) => chrono::NaiveTime::from_hms_micro_opt(
                    hour as u32,
                    min as u32,
                    sec as u32,
                    micro,
                )
                .map(|time| Value::DateTime(chrono::NaiveDateTime::new(date, time)))
                .unwrap_or(Value::Null),
                None => Value::Null,
            }
        }
        mysql_async::Value::Time(neg, days, hour, min, sec, micro) => {
            if neg {
                // Negative durations have no extraction value mapping
                return Value::Null;
            }
            let total_hours = days * 24 + hour as u32;
            chrono::NaiveTime::from_hms_micro_opt(total_hours % 24, min as u32, sec as u32, micro)
                .map(Value::Time)
                .unwrap_or(Value::Null)
        }
    }
}

fn mysql_row_to_row(row: mysql_async::Row) -> Row {
    let columns: Vec<String> = row
        .columns_ref()
        .iter()
        .map(|c| c.name_str().to_string())
        .collect();

    let values: Vec<Value> = (0..row.len())
        .map(|i| {
            let val: mysql_async::Value = row.as_ref(i).cloned().unwrap_or(mysql_async::Value::NULL);
            mysql_value_to_value(val)
        })
        .collect();

    Row::new(columns, values)
}

/// MySQL connection
pub struct MySqlConnection {
    conn: Arc<Mutex<Option<Conn>>>,
}

impl MySqlConnection {
    /// Wrap an already-connected mysql_async connection
    pub fn new(conn: Conn) -> Self {
        Self {
            conn: Arc::new(Mutex::new(Some(conn))),
        }
    }

    async fn take_conn(&self) -> Result<Conn> {
        self.conn
            .lock()
            .await
            .take()
            .ok_or_else(|| Error::connection("connection not available"))
    }

    async fn put_conn(&self, conn: Conn) {
        *self.conn.lock().await = Some(conn);
    }
}

#[async_trait]
impl Connection for MySqlConnection {
    async fn query(&self, sql: &str, params: &[Value]) -> Result<Vec<Row>> {
        let mut conn = self.take_conn().await?;

        let mysql_params: Vec<mysql_async::Value> = params.iter().map(value_to_sql).collect();

        let result: std::result::Result<Vec<mysql_async::Row>, mysql_async::Error> =
            conn.exec(sql, mysql_params).await;

        match result {
            Ok(rows) => {
                self.put_conn(conn).await;
                Ok(rows.into_iter().map(mysql_row_to_row).collect())
            }
            Err(e) => {
                self.put_conn(conn).await;
                Err(Error::query_with_sql(e.to_string(), sql))
            }
        }
    }

    async fn query_stream(&self, sql: &str, params: &[Value]) -> Result<Box<dyn RowStream>> {
        let rows = self.query(sql, params).await?;
        Ok(Box::new(VecRowStream::new(rows)))
    }

    async fn is_valid(&self) -> bool {
        let mut guard = self.conn.lock().await;
        match guard.as_mut() {
            Some(conn) => conn.ping().await.is_ok(),
            None => false,
        }
    }

    async fn close(&self) -> Result<()> {
        if let Some(conn) = self.conn.lock().await.take() {
            conn.disconnect()
                .await
                .map_err(|e| Error::connection_with_source("failed to disconnect", e))?;
        }
        Ok(())
    }
}

/// MySQL connection factory
#[derive(Debug, Clone, Default)]
pub struct MySqlConnectionFactory;

#[async_trait]
impl ConnectionFactory for MySqlConnectionFactory {
    async fn connect(&self, config: &ConnectionConfig) -> Result<Box<dyn Connection>> {
        let base = mysql_async::Opts::from_url(&config.url)
            .map_err(|e| Error::connection_with_source("invalid connection url", e))?;

        let mut opts = OptsBuilder::from_opts(base);
        if let Some(username) = &config.username {
            opts = opts.user(Some(username.clone()));
        }
        if let Some(password) = &config.password {
            opts = opts.pass(Some(password.clone()));
        }

        let mut conn = Conn::new(opts)
            .await
            .map_err(|e| Error::connection_with_source("failed to connect", e))?;

        if config.read_only {
            conn.query_drop("SET SESSION TRANSACTION READ ONLY")
                .await
                .map_err(|e| {
                    Error::connection_with_source("failed to set read-only session", e)
                })?;
        }

        Ok(Box::new(MySqlConnection::new(conn)))
    }

    fn kind(&self) -> SourceKind {
        SourceKind::MySql
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_value_conversion_roundtrip_basics() {
        assert_eq!(
            mysql_value_to_value(mysql_async::Value::Int(42)),
            Value::Int64(42)
        );
        assert_eq!(mysql_value_to_value(mysql_async::Value::NULL), Value::Null);
        assert_eq!(
            mysql_value_to_value(mysql_async::Value::Bytes(b"abc".to_vec())),
            Value::String("abc".to_string())
        );
    }

    #[test]
    fn test_date_maps_to_date_when_midnight() {
        let v = mysql_value_to_value(mysql_async::Value::Date(2024, 6, 1, 0, 0, 0, 0));
        assert!(matches!(v, Value::Date(_)));

        let v = mysql_value_to_value(mysql_async::Value::Date(2024, 6, 1, 12, 30, 0, 0));
        assert!(matches!(v, Value::DateTime(_)));
    }

    #[test]
    fn test_negative_time_maps_to_null() {
        let v = mysql_value_to_value(mysql_async::Value::Time(true, 0, 1, 0, 0, 0));
        assert_eq!(v, Value::Null);
    }

    #[test]
    fn test_factory_kind() {
        assert_eq!(MySqlConnectionFactory.kind(), SourceKind::MySql);
    }
}
