//! PostgreSQL access layer.
//!
//! Connections are acquired per operation under a semaphore bound: each
//! acquisition connects, spawns the connection driver task, and hands back a
//! guard that releases the permit and tears the connection down on Drop, so
//! release happens on every exit path including errors.

use anyhow::{Context, Result};
use aula_common::DatabaseConfig;
use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde_json::{Map, Value};
use std::sync::Arc;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio_postgres::types::Type;
use tokio_postgres::{NoTls, Row};
use tracing::{debug, warn};

/// One row of a result set, column name to JSON scalar
pub type ResultRow = Map<String, Value>;

/// Bounded database handle
pub struct Database {
    config: DatabaseConfig,
    permits: Arc<Semaphore>,
}

/// A live connection scoped to one operation
pub struct PooledConnection {
    pub client: tokio_postgres::Client,
    driver: tokio::task::JoinHandle<()>,
    _permit: OwnedSemaphorePermit,
}

impl Drop for PooledConnection {
    fn drop(&mut self) {
        self.driver.abort();
    }
}

impl Database {
    pub fn new(config: DatabaseConfig) -> Self {
        let permits = Arc::new(Semaphore::new(config.max_connections));
        Self { config, permits }
    }

    pub fn config(&self) -> &DatabaseConfig {
        &self.config
    }

    /// Acquire a connection, waiting for a permit when at the bound.
    pub async fn acquire(&self) -> Result<PooledConnection> {
        let permit = self
            .permits
            .clone()
            .acquire_owned()
            .await
            .context("connection semaphore closed")?;

        let (client, connection) = tokio_postgres::connect(&self.config.url, NoTls)
            .await
            .context("failed to connect to PostgreSQL")?;

        let driver = tokio::spawn(async move {
            if let Err(e) = connection.await {
                debug!("connection driver ended: {}", e);
            }
        });

        Ok(PooledConnection {
            client,
            driver,
            _permit: permit,
        })
    }

    /// Cheap reachability probe for the status endpoint.
    pub async fn ping(&self) -> Result<()> {
        let conn = self.acquire().await?;
        conn.client
            .simple_query("SELECT 1")
            .await
            .context("ping query failed")?;
        Ok(())
    }
}

/// Convert a row into a JSON map keyed by column name.
pub fn row_to_json(row: &Row) -> ResultRow {
    let mut map = Map::new();
    for (idx, col) in row.columns().iter().enumerate() {
        map.insert(col.name().to_string(), column_to_json(row, idx, col.type_()));
    }
    map
}

fn get_opt<'a, T: tokio_postgres::types::FromSql<'a>>(row: &'a Row, idx: usize) -> Option<T> {
    row.try_get::<_, Option<T>>(idx).ok().flatten()
}

fn column_to_json(row: &Row, idx: usize, ty: &Type) -> Value {
    match *ty {
        Type::BOOL => get_opt::<bool>(row, idx).map(Value::Bool).unwrap_or(Value::Null),
        Type::INT2 => get_opt::<i16>(row, idx)
            .map(|v| Value::from(v as i64))
            .unwrap_or(Value::Null),
        Type::INT4 => get_opt::<i32>(row, idx)
            .map(|v| Value::from(v as i64))
            .unwrap_or(Value::Null),
        Type::INT8 => get_opt::<i64>(row, idx).map(Value::from).unwrap_or(Value::Null),
        Type::FLOAT4 => get_opt::<f32>(row, idx)
            .map(|v| Value::from(v as f64))
            .unwrap_or(Value::Null),
        Type::FLOAT8 => get_opt::<f64>(row, idx).map(Value::from).unwrap_or(Value::Null),
        Type::NUMERIC => get_opt::<Decimal>(row, idx)
            .map(decimal_to_json)
            .unwrap_or(Value::Null),
        Type::TEXT | Type::VARCHAR | Type::BPCHAR | Type::NAME => get_opt::<String>(row, idx)
            .map(Value::String)
            .unwrap_or(Value::Null),
        Type::DATE => get_opt::<NaiveDate>(row, idx)
            .map(|v| Value::String(v.to_string()))
            .unwrap_or(Value::Null),
        Type::TIME => get_opt::<NaiveTime>(row, idx)
            .map(|v| Value::String(v.to_string()))
            .unwrap_or(Value::Null),
        Type::TIMESTAMP => get_opt::<NaiveDateTime>(row, idx)
            .map(|v| Value::String(v.to_string()))
            .unwrap_or(Value::Null),
        Type::TIMESTAMPTZ => get_opt::<DateTime<Utc>>(row, idx)
            .map(|v| Value::String(v.to_rfc3339()))
            .unwrap_or(Value::Null),
        Type::UUID => get_opt::<uuid::Uuid>(row, idx)
            .map(|v| Value::String(v.to_string()))
            .unwrap_or(Value::Null),
        Type::JSON | Type::JSONB => get_opt::<Value>(row, idx).unwrap_or(Value::Null),
        _ => {
            // Unknown type: last resort is the textual representation
            match get_opt::<String>(row, idx) {
                Some(s) => Value::String(s),
                None => {
                    warn!("unsupported column type {} at index {}", ty, idx);
                    Value::Null
                }
            }
        }
    }
}

fn decimal_to_json(d: Decimal) -> Value {
    match d.to_f64() {
        Some(f) => Value::from(f),
        None => Value::String(d.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decimal_to_json_float() {
        let d = Decimal::new(875, 2); // 8.75
        assert_eq!(decimal_to_json(d), Value::from(8.75));
    }

    #[test]
    fn test_database_respects_configured_bound() {
        let config = DatabaseConfig {
            max_connections: 3,
            ..Default::default()
        };
        let db = Database::new(config);
        assert_eq!(db.permits.available_permits(), 3);
    }
}
