//! Backend abstraction for the tool dispatcher
//!
//! Both backends expose the same two capabilities, `query` and `execute`.
//! The local variant additionally carries typed helper methods; the
//! dispatcher prefers those and falls back to plain SQL (see
//! [`crate::fallback`]) when only this interface is available.

use crate::engine::LocalEngine;
use crate::error::Result;
use crate::remote::RemoteClient;

/// One result row: column name to JSON value, in select order.
pub type JsonRow = serde_json::Map<String, serde_json::Value>;

/// Backend-neutral SQL parameter value.
///
/// Converted to the native parameter type of whichever backend runs the
/// statement. Shared SQL uses `$1`-numbered placeholders, which both the
/// embedded engine and the Postgres-wire endpoint accept.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlParam {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
}

impl From<&str> for SqlParam {
    fn from(v: &str) -> Self {
        SqlParam::Text(v.to_string())
    }
}

impl From<String> for SqlParam {
    fn from(v: String) -> Self {
        SqlParam::Text(v)
    }
}

impl From<i64> for SqlParam {
    fn from(v: i64) -> Self {
        SqlParam::Int(v)
    }
}

impl From<f64> for SqlParam {
    fn from(v: f64) -> Self {
        SqlParam::Float(v)
    }
}

impl From<bool> for SqlParam {
    fn from(v: bool) -> Self {
        SqlParam::Bool(v)
    }
}

impl From<Option<String>> for SqlParam {
    fn from(v: Option<String>) -> Self {
        match v {
            Some(s) => SqlParam::Text(s),
            None => SqlParam::Null,
        }
    }
}

/// The capability set shared by every backend.
pub trait SqlBackend {
    /// Execute SQL and return result rows as JSON maps.
    fn query(&self, sql: &str, params: &[SqlParam]) -> Result<Vec<JsonRow>>;

    /// Execute a statement and return the affected-row count (best effort).
    fn execute(&self, sql: &str, params: &[SqlParam]) -> Result<usize>;
}

/// A concrete backend the dispatcher routes tool calls to.
pub enum Backend {
    /// Embedded engine with typed helpers
    Local(LocalEngine),
    /// SQL-only remote endpoint
    Remote(RemoteClient),
}

impl Backend {
    /// View the backend through its shared capability set.
    pub fn sql(&self) -> &dyn SqlBackend {
        match self {
            Backend::Local(engine) => engine,
            Backend::Remote(client) => client,
        }
    }
}
