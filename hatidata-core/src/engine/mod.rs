//! Local engine: the embedded DuckDB backend
//!
//! This module provides the storage layer for fully local (offline) agent
//! workflows:
//! - Lazy, idempotent schema bootstrap
//! - Memory store with filtered text search and versioned key-value state
//! - Hash-chained chain-of-thought ledger with replay verification
//! - Semantic trigger registry
//! - Copy-on-write data branches over schema views
//!
//! The connection is single-writer; every operation holds the connection
//! lock for its full duration, which serializes same-session ledger
//! appends within the process.

pub mod branch;
pub mod cot;
pub mod memory;
pub mod schema;
pub mod triggers;

use crate::backend::{JsonRow, SqlBackend, SqlParam};
use crate::error::Result;
use duckdb::types::{TimeUnit, ToSqlOutput, Value, ValueRef};
use duckdb::{params_from_iter, Connection};
use schema::SchemaKind;
use serde_json::Value as JsonValue;
use std::collections::HashSet;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

/// Engine handle over a single embedded database file.
pub struct LocalEngine {
    conn: Mutex<Connection>,
    /// Schemas already bootstrapped by this process
    initialized: Mutex<HashSet<SchemaKind>>,
}

impl LocalEngine {
    /// Open or create the database at the given path.
    ///
    /// Parent directories are created on demand.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let conn = Connection::open(path)?;
        tracing::info!(path = %path.display(), "Opened local database");

        Ok(Self {
            conn: Mutex::new(conn),
            initialized: Mutex::new(HashSet::new()),
        })
    }

    /// Open an in-memory database (for testing)
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        Ok(Self {
            conn: Mutex::new(conn),
            initialized: Mutex::new(HashSet::new()),
        })
    }

    pub(crate) fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap()
    }

    /// Bootstrap an internal schema if this process has not done so yet.
    ///
    /// The DDL is `IF NOT EXISTS`, so racing or repeated calls are safe;
    /// the guard set only avoids redundant round-trips.
    pub(crate) fn ensure_schema(&self, kind: SchemaKind) -> Result<()> {
        if self.initialized.lock().unwrap().contains(&kind) {
            return Ok(());
        }

        {
            let conn = self.conn();
            for stmt in kind.ddl() {
                conn.execute_batch(stmt)?;
            }
        }
        tracing::debug!(schema = kind.name(), "Schema bootstrapped");

        self.initialized.lock().unwrap().insert(kind);
        Ok(())
    }
}

impl SqlBackend for LocalEngine {
    fn query(&self, sql: &str, params: &[SqlParam]) -> Result<Vec<JsonRow>> {
        let conn = self.conn();
        query_on(&conn, sql, params)
    }

    fn execute(&self, sql: &str, params: &[SqlParam]) -> Result<usize> {
        let conn = self.conn();
        execute_on(&conn, sql, params)
    }
}

/// Run a query on an already-locked connection.
pub(crate) fn query_on(conn: &Connection, sql: &str, params: &[SqlParam]) -> Result<Vec<JsonRow>> {
    let mut stmt = conn.prepare(sql)?;
    let mut rows = stmt.query(params_from_iter(params.iter()))?;

    let mut out = Vec::new();
    let mut names: Option<Vec<String>> = None;
    while let Some(row) = rows.next()? {
        let names = names.get_or_insert_with(|| {
            row.as_ref()
                .column_names()
                .iter()
                .map(|n| n.to_string())
                .collect()
        });

        let mut obj = JsonRow::new();
        for (idx, name) in names.iter().enumerate() {
            obj.insert(name.clone(), value_to_json(row.get_ref(idx)?));
        }
        out.push(obj);
    }
    Ok(out)
}

/// Run a statement on an already-locked connection.
///
/// Parameterless statements go through the unprepared path so that DDL,
/// SET, and multi-statement scripts all work; their affected-row count
/// is reported as 0 (the trait promises best effort only).
pub(crate) fn execute_on(conn: &Connection, sql: &str, params: &[SqlParam]) -> Result<usize> {
    if params.is_empty() {
        conn.execute_batch(sql)?;
        Ok(0)
    } else {
        Ok(conn.execute(sql, params_from_iter(params.iter()))?)
    }
}

impl duckdb::ToSql for SqlParam {
    fn to_sql(&self) -> duckdb::Result<ToSqlOutput<'_>> {
        Ok(match self {
            SqlParam::Null => ToSqlOutput::Owned(Value::Null),
            SqlParam::Bool(b) => ToSqlOutput::Owned(Value::Boolean(*b)),
            SqlParam::Int(i) => ToSqlOutput::Owned(Value::BigInt(*i)),
            SqlParam::Float(f) => ToSqlOutput::Owned(Value::Double(*f)),
            SqlParam::Text(s) => ToSqlOutput::Borrowed(ValueRef::Text(s.as_bytes())),
        })
    }
}

/// Convert a DuckDB value into its JSON representation.
///
/// Exotic nested types (lists, structs, intervals) fall back to their
/// debug rendering; the tool surface only promises JSON-representable
/// scalars for the internal schemas.
fn value_to_json(value: ValueRef<'_>) -> JsonValue {
    match value {
        ValueRef::Null => JsonValue::Null,
        ValueRef::Boolean(b) => JsonValue::Bool(b),
        ValueRef::TinyInt(i) => JsonValue::from(i),
        ValueRef::SmallInt(i) => JsonValue::from(i),
        ValueRef::Int(i) => JsonValue::from(i),
        ValueRef::BigInt(i) => JsonValue::from(i),
        ValueRef::HugeInt(i) => {
            if let Ok(v) = i64::try_from(i) {
                JsonValue::from(v)
            } else {
                JsonValue::String(i.to_string())
            }
        }
        ValueRef::UTinyInt(i) => JsonValue::from(i),
        ValueRef::USmallInt(i) => JsonValue::from(i),
        ValueRef::UInt(i) => JsonValue::from(i),
        ValueRef::UBigInt(i) => JsonValue::from(i),
        ValueRef::Float(f) => serde_json::Number::from_f64(f as f64)
            .map(JsonValue::Number)
            .unwrap_or(JsonValue::Null),
        ValueRef::Double(f) => serde_json::Number::from_f64(f)
            .map(JsonValue::Number)
            .unwrap_or(JsonValue::Null),
        ValueRef::Decimal(d) => JsonValue::String(d.to_string()),
        ValueRef::Text(bytes) => JsonValue::String(String::from_utf8_lossy(bytes).into_owned()),
        ValueRef::Blob(bytes) => JsonValue::String(hex::encode(bytes)),
        ValueRef::Timestamp(unit, v) => {
            let micros = to_micros(unit, v);
            chrono::DateTime::from_timestamp_micros(micros)
                .map(|dt| JsonValue::String(dt.format("%Y-%m-%dT%H:%M:%S%.6fZ").to_string()))
                .unwrap_or(JsonValue::Null)
        }
        ValueRef::Date32(days) => chrono::DateTime::from_timestamp(i64::from(days) * 86_400, 0)
            .map(|dt| JsonValue::String(dt.format("%Y-%m-%d").to_string()))
            .unwrap_or(JsonValue::Null),
        ValueRef::Time64(unit, v) => {
            let micros = to_micros(unit, v);
            let secs = (micros / 1_000_000) as u32;
            let nanos = ((micros % 1_000_000) * 1_000) as u32;
            chrono::NaiveTime::from_num_seconds_from_midnight_opt(secs, nanos)
                .map(|t| JsonValue::String(t.to_string()))
                .unwrap_or(JsonValue::Null)
        }
        other => JsonValue::String(format!("{:?}", other)),
    }
}

fn to_micros(unit: TimeUnit, v: i64) -> i64 {
    match unit {
        TimeUnit::Second => v.saturating_mul(1_000_000),
        TimeUnit::Millisecond => v.saturating_mul(1_000),
        TimeUnit::Microsecond => v,
        TimeUnit::Nanosecond => v / 1_000,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn query_returns_named_json_rows() {
        let engine = LocalEngine::open_in_memory().unwrap();
        let rows = engine
            .query("SELECT 42 AS answer, 'hi' AS greeting, NULL AS nothing", &[])
            .unwrap();

        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0]["answer"], JsonValue::from(42));
        assert_eq!(rows[0]["greeting"], JsonValue::from("hi"));
        assert_eq!(rows[0]["nothing"], JsonValue::Null);
    }

    #[test]
    fn parameters_bind_positionally() {
        let engine = LocalEngine::open_in_memory().unwrap();
        let rows = engine
            .query(
                "SELECT $1::VARCHAR AS a, $2::BIGINT AS b, $3::DOUBLE AS c, $4::BOOLEAN AS d",
                &["x".into(), 7i64.into(), 0.5f64.into(), true.into()],
            )
            .unwrap();

        assert_eq!(rows[0]["a"], JsonValue::from("x"));
        assert_eq!(rows[0]["b"], JsonValue::from(7));
        assert_eq!(rows[0]["c"], JsonValue::from(0.5));
        assert_eq!(rows[0]["d"], JsonValue::from(true));
    }

    #[test]
    fn open_creates_parent_directories() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/deeper/local.duckdb");
        let engine = LocalEngine::open(&path).unwrap();
        drop(engine);
        assert!(path.exists());
    }
}
