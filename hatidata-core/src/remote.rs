//! Remote SQL backend: thin client over the Postgres wire protocol
//!
//! Exposes only the shared `query`/`execute` capability set; all domain
//! behavior against this backend is reconstructed in [`crate::fallback`].
//! The agent identifies itself through connection startup parameters that
//! the proxy reads for billing, scheduling, and audit.

use crate::backend::{JsonRow, SqlBackend, SqlParam};
use crate::error::{Error, Result};
use postgres::types::{ToSql, Type};
use postgres::{NoTls, Row};
use serde_json::Value as JsonValue;
use std::sync::Mutex;
use std::time::Duration;

/// Connection settings for the remote endpoint
#[derive(Debug, Clone)]
pub struct RemoteConfig {
    pub host: String,
    pub port: u16,
    pub database: String,
    pub user: String,
    pub password: String,
    pub agent_id: String,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 5439,
            database: "hatidata".to_string(),
            user: "agent".to_string(),
            password: String::new(),
            agent_id: "mcp-agent".to_string(),
        }
    }
}

/// Synchronous remote client
pub struct RemoteClient {
    client: Mutex<postgres::Client>,
}

impl RemoteClient {
    /// Connect with agent identification startup parameters.
    pub fn connect(config: &RemoteConfig) -> Result<Self> {
        let mut pg = postgres::Config::new();
        pg.host(&config.host)
            .port(config.port)
            .dbname(&config.database)
            .user(&config.user)
            .application_name(&format!("hatidata-mcp/{}", env!("CARGO_PKG_VERSION")))
            .options(&format!("-c hatidata_agent_id={}", config.agent_id))
            .connect_timeout(Duration::from_secs(10));
        if !config.password.is_empty() {
            pg.password(&config.password);
        }

        let client = pg.connect(NoTls).map_err(transport)?;
        tracing::info!(host = %config.host, port = config.port, "Connected to remote backend");

        Ok(Self {
            client: Mutex::new(client),
        })
    }
}

impl SqlBackend for RemoteClient {
    fn query(&self, sql: &str, params: &[SqlParam]) -> Result<Vec<JsonRow>> {
        let owned = to_pg_params(params);
        let refs: Vec<&(dyn ToSql + Sync)> = owned.iter().map(|b| b.as_ref()).collect();

        let mut client = self.client.lock().unwrap();
        let rows = client.query(sql, &refs).map_err(transport)?;
        Ok(rows.iter().map(row_to_json).collect())
    }

    fn execute(&self, sql: &str, params: &[SqlParam]) -> Result<usize> {
        let owned = to_pg_params(params);
        let refs: Vec<&(dyn ToSql + Sync)> = owned.iter().map(|b| b.as_ref()).collect();

        let mut client = self.client.lock().unwrap();
        let affected = client.execute(sql, &refs).map_err(transport)?;
        Ok(affected as usize)
    }
}

fn transport(e: postgres::Error) -> Error {
    Error::Transport(e.to_string())
}

fn to_pg_params(params: &[SqlParam]) -> Vec<Box<dyn ToSql + Sync>> {
    params
        .iter()
        .map(|p| -> Box<dyn ToSql + Sync> {
            match p {
                SqlParam::Null => Box::new(Option::<String>::None),
                SqlParam::Bool(b) => Box::new(*b),
                SqlParam::Int(i) => Box::new(*i),
                SqlParam::Float(f) => Box::new(*f),
                SqlParam::Text(s) => Box::new(s.clone()),
            }
        })
        .collect()
}

fn row_to_json(row: &Row) -> JsonRow {
    let mut obj = JsonRow::new();
    for (idx, col) in row.columns().iter().enumerate() {
        let t = col.type_();
        let value = if *t == Type::BOOL {
            row.try_get::<_, Option<bool>>(idx).ok().flatten().map(JsonValue::from)
        } else if *t == Type::INT2 {
            row.try_get::<_, Option<i16>>(idx).ok().flatten().map(JsonValue::from)
        } else if *t == Type::INT4 {
            row.try_get::<_, Option<i32>>(idx).ok().flatten().map(JsonValue::from)
        } else if *t == Type::INT8 {
            row.try_get::<_, Option<i64>>(idx).ok().flatten().map(JsonValue::from)
        } else if *t == Type::FLOAT4 {
            row.try_get::<_, Option<f32>>(idx)
                .ok()
                .flatten()
                .map(|f| JsonValue::from(f as f64))
        } else if *t == Type::FLOAT8 {
            row.try_get::<_, Option<f64>>(idx).ok().flatten().map(JsonValue::from)
        } else if *t == Type::JSON || *t == Type::JSONB {
            row.try_get::<_, Option<JsonValue>>(idx).ok().flatten()
        } else {
            row.try_get::<_, Option<String>>(idx).ok().flatten().map(JsonValue::from)
        };
        obj.insert(col.name().to_string(), value.unwrap_or(JsonValue::Null));
    }
    obj
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_matches_cli_defaults() {
        let config = RemoteConfig::default();
        assert_eq!(config.host, "localhost");
        assert_eq!(config.port, 5439);
        assert_eq!(config.database, "hatidata");
        assert_eq!(config.user, "agent");
        assert_eq!(config.agent_id, "mcp-agent");
        assert!(config.password.is_empty());
    }

    #[test]
    fn params_convert_without_loss() {
        let boxed = to_pg_params(&[
            SqlParam::Null,
            SqlParam::Bool(true),
            SqlParam::Int(7),
            SqlParam::Float(0.5),
            SqlParam::Text("x".into()),
        ]);
        assert_eq!(boxed.len(), 5);
    }
}
