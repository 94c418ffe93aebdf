//! Tool dispatcher: maps tool calls onto a backend
//!
//! One entrypoint for both backends. Local calls go through the engine's
//! typed helpers; the SQL-only remote backend gets the reconstructed
//! statements from [`crate::fallback`]. Callers cannot tell the two
//! apart. No handler error ever aborts the loop: everything surfaces as
//! a tool-result envelope with `isError` set.

use crate::backend::{Backend, SqlBackend};
use crate::error::{Error, Result};
use crate::fallback;
use crate::tools::{catalog, ToolDef};
use crate::types::{ActionType, MergeStrategy, StepType};
use serde::Serialize;
use serde_json::{json, Map, Value as JsonValue};
use std::str::FromStr;

/// Schemas hidden from unfiltered catalog listings.
fn is_internal_schema(name: &str) -> bool {
    name.starts_with('_') || name == "information_schema" || name == "pg_catalog"
}

/// One content item in a tool-result envelope.
#[derive(Debug, Clone, Serialize)]
pub struct Content {
    #[serde(rename = "type")]
    pub content_type: &'static str,
    pub text: String,
}

/// The uniform tool-result envelope.
#[derive(Debug, Clone, Serialize)]
pub struct ToolResult {
    pub content: Vec<Content>,
    #[serde(rename = "isError", skip_serializing_if = "std::ops::Not::not")]
    pub is_error: bool,
}

impl ToolResult {
    fn success(value: &JsonValue) -> Self {
        Self {
            content: vec![Content {
                content_type: "text",
                text: value.to_string(),
            }],
            is_error: false,
        }
    }

    fn error(message: &str) -> Self {
        Self {
            content: vec![Content {
                content_type: "text",
                text: message.to_string(),
            }],
            is_error: true,
        }
    }
}

/// Dispatcher over a concrete backend.
pub struct Dispatcher {
    backend: Backend,
    default_agent_id: String,
}

impl Dispatcher {
    pub fn new(backend: Backend, default_agent_id: impl Into<String>) -> Self {
        Self {
            backend,
            default_agent_id: default_agent_id.into(),
        }
    }

    /// The advertised tool catalog.
    pub fn tools(&self) -> Vec<ToolDef> {
        catalog()
    }

    /// Run a tool call. Never fails: errors come back in the envelope.
    pub fn call(&self, name: &str, arguments: &JsonValue) -> ToolResult {
        let empty = Map::new();
        let args = arguments.as_object().unwrap_or(&empty);

        match self.try_call(name, args) {
            Ok(value) => ToolResult::success(&value),
            Err(e) => {
                tracing::warn!(tool = name, error = %e, "Tool call failed");
                ToolResult::error(&format!("Error: {}", e))
            }
        }
    }

    fn try_call(&self, name: &str, args: &Map<String, JsonValue>) -> Result<JsonValue> {
        match name {
            // ── SQL surface ─────────────────────────────────────────
            "query" => {
                let sql = req_str(args, "sql")?;
                Ok(json!(self.backend.sql().query(sql, &[])?))
            }
            "read_query" => {
                let sql = req_str(args, "sql")?;
                let wrapped = format!(
                    "SELECT * FROM ({}) AS _readonly",
                    sql.trim().trim_end_matches(';')
                );
                Ok(json!(self.backend.sql().query(&wrapped, &[])?))
            }
            "list_schemas" => {
                let rows = self.backend.sql().query(
                    "SELECT schema_name FROM information_schema.schemata ORDER BY schema_name",
                    &[],
                )?;
                Ok(json!(rows))
            }
            "list_tables" => match opt_str(args, "schema") {
                Some(schema) => {
                    let rows = self.backend.sql().query(
                        "SELECT table_schema, table_name, table_type \
                         FROM information_schema.tables \
                         WHERE table_schema = $1 ORDER BY table_name",
                        &[schema.into()],
                    )?;
                    Ok(json!(rows))
                }
                None => {
                    let rows = self.backend.sql().query(
                        "SELECT table_schema, table_name, table_type \
                         FROM information_schema.tables \
                         ORDER BY table_schema, table_name",
                        &[],
                    )?;
                    let visible: Vec<_> = rows
                        .into_iter()
                        .filter(|r| {
                            r.get("table_schema")
                                .and_then(|v| v.as_str())
                                .map(|s| !is_internal_schema(s))
                                .unwrap_or(true)
                        })
                        .collect();
                    Ok(json!(visible))
                }
            },
            "describe_table" => {
                let table = req_str(args, "table_name")?;
                let rows = self.backend.sql().query(
                    "SELECT column_name, data_type, is_nullable \
                     FROM information_schema.columns \
                     WHERE table_name = $1 ORDER BY ordinal_position",
                    &[table.into()],
                )?;
                Ok(json!(rows))
            }
            "get_usage_stats" => match &self.backend {
                Backend::Local(engine) => {
                    let rows = engine.query(
                        "SELECT schema_name, table_name, estimated_size AS estimated_rows, \
                         column_count FROM duckdb_tables() WHERE NOT internal \
                         ORDER BY schema_name, table_name",
                        &[],
                    )?;
                    let visible: Vec<_> = rows
                        .into_iter()
                        .filter(|r| {
                            r.get("schema_name")
                                .and_then(|v| v.as_str())
                                .map(|s| !is_internal_schema(s))
                                .unwrap_or(true)
                        })
                        .collect();
                    Ok(json!(visible))
                }
                Backend::Remote(client) => Ok(json!(fallback::get_usage_stats(client)?)),
            },

            // ── Agent memory ────────────────────────────────────────
            "store_memory" => {
                let agent_id = self.agent_id(args);
                let content = req_str(args, "content")?;
                let memory_type = opt_str(args, "memory_type").unwrap_or("fact");
                let metadata = opt_object(args, "metadata");
                let importance = opt_f64(args, "importance")?.unwrap_or(0.5);

                let memory_id = match &self.backend {
                    Backend::Local(engine) => {
                        engine.store_memory(agent_id, content, memory_type, metadata, importance)?
                    }
                    Backend::Remote(client) => fallback::store_memory(
                        client, agent_id, content, memory_type, metadata, importance,
                    )?,
                };
                Ok(json!({"memory_id": memory_id}))
            }
            "search_memory" => {
                let agent_id = self.agent_id(args);
                let query = req_str(args, "query")?;
                let top_k = opt_i64(args, "top_k")?.unwrap_or(10);
                let memory_type = opt_str(args, "memory_type");
                let min_importance = opt_f64(args, "min_importance")?;

                match &self.backend {
                    Backend::Local(engine) => Ok(json!(engine.search_memory(
                        agent_id,
                        query,
                        top_k,
                        memory_type,
                        min_importance
                    )?)),
                    Backend::Remote(client) => Ok(json!(fallback::search_memory(
                        client,
                        agent_id,
                        query,
                        top_k,
                        memory_type,
                        min_importance
                    )?)),
                }
            }
            "delete_memory" => {
                let memory_id = req_str(args, "memory_id")?;
                let deleted = match &self.backend {
                    Backend::Local(engine) => engine.delete_memory(memory_id)?,
                    Backend::Remote(client) => fallback::delete_memory(client, memory_id)?,
                };
                Ok(json!({"deleted": deleted}))
            }
            "get_state" => {
                let agent_id = self.agent_id(args);
                let key = req_str(args, "key")?;
                let value = match &self.backend {
                    Backend::Local(engine) => engine.get_state(agent_id, key)?,
                    Backend::Remote(client) => fallback::get_state(client, agent_id, key)?,
                };
                Ok(json!({
                    "key": key,
                    "found": value.is_some(),
                    "value": value,
                }))
            }
            "set_state" => {
                let agent_id = self.agent_id(args);
                let key = req_str(args, "key")?;
                let value = args
                    .get("value")
                    .ok_or_else(|| Error::BadArgument("missing required field: value".into()))?;

                match &self.backend {
                    Backend::Local(engine) => engine.set_state(agent_id, key, value)?,
                    Backend::Remote(client) => fallback::set_state(client, agent_id, key, value)?,
                }
                Ok(json!({"status": "ok"}))
            }

            // ── Chain-of-thought ledger ─────────────────────────────
            "log_reasoning_step" => {
                let agent_id = self.agent_id(args);
                let session_id = req_str(args, "session_id")?;
                let step_type = StepType::from_str(req_str(args, "step_type")?)
                    .map_err(Error::BadArgument)?;
                let content = req_str(args, "content")?;
                let metadata = opt_object(args, "metadata");
                let importance = opt_f64(args, "importance")?.unwrap_or(0.5);

                let trace_id = match &self.backend {
                    Backend::Local(engine) => engine.log_reasoning_step(
                        agent_id, session_id, step_type, content, metadata, importance,
                    )?,
                    Backend::Remote(client) => fallback::log_reasoning_step(
                        client, agent_id, session_id, step_type, content, metadata, importance,
                    )?,
                };
                Ok(json!({"trace_id": trace_id}))
            }
            "replay_session" => {
                let session_id = req_str(args, "session_id")?;
                let verify = opt_bool(args, "verify_chain")?.unwrap_or(false);

                match &self.backend {
                    Backend::Local(engine) => {
                        Ok(serde_json::to_value(engine.replay_session(session_id, verify)?)?)
                    }
                    Backend::Remote(client) => {
                        Ok(fallback::replay_session(client, session_id, verify)?)
                    }
                }
            }
            "list_sessions" => {
                let agent_id = opt_str(args, "agent_id");
                let limit = opt_i64(args, "limit")?.unwrap_or(50);
                let since = opt_str(args, "since");

                match &self.backend {
                    Backend::Local(engine) => {
                        Ok(json!(engine.list_sessions(agent_id, limit, since)?))
                    }
                    Backend::Remote(client) => {
                        Ok(json!(fallback::list_sessions(client, agent_id, limit, since)?))
                    }
                }
            }

            // ── Semantic triggers ───────────────────────────────────
            "register_trigger" => {
                let trigger_name = req_str(args, "name")?;
                let concept = req_str(args, "concept")?;
                let threshold = opt_f64(args, "threshold")?.unwrap_or(0.7);
                let action_type = ActionType::from_str(
                    opt_str(args, "action_type").unwrap_or("flag_for_review"),
                )
                .map_err(Error::BadArgument)?;
                let action_config = opt_object(args, "action_config");

                let trigger_id = match &self.backend {
                    Backend::Local(engine) => engine.register_trigger(
                        trigger_name, concept, threshold, action_type, action_config,
                    )?,
                    Backend::Remote(client) => fallback::register_trigger(
                        client,
                        trigger_name,
                        concept,
                        threshold,
                        action_type.as_str(),
                        action_config,
                    )?,
                };
                Ok(json!({"trigger_id": trigger_id}))
            }
            "list_triggers" => {
                let status = opt_str(args, "status");
                match &self.backend {
                    Backend::Local(engine) => Ok(json!(engine.list_triggers(status)?)),
                    Backend::Remote(client) => Ok(json!(fallback::list_triggers(client, status)?)),
                }
            }
            "delete_trigger" => {
                let trigger_id = req_str(args, "trigger_id")?;
                let deleted = match &self.backend {
                    Backend::Local(engine) => engine.delete_trigger(trigger_id)?,
                    Backend::Remote(client) => fallback::delete_trigger(client, trigger_id)?,
                };
                Ok(json!({"deleted": deleted}))
            }
            "test_trigger" => {
                let trigger_id = req_str(args, "trigger_id")?;
                let content = req_str(args, "content")?;

                let outcome = match &self.backend {
                    Backend::Local(engine) => engine
                        .test_trigger(trigger_id, content)?
                        .map(|m| serde_json::to_value(m))
                        .transpose()?,
                    Backend::Remote(client) => fallback::test_trigger(client, trigger_id, content)?,
                };
                // Absence is a data result for this tool, not an error.
                Ok(outcome.unwrap_or_else(|| {
                    json!({"matched": false, "error": "Trigger not found"})
                }))
            }

            // ── Data branches ───────────────────────────────────────
            "branch_create" => {
                let branch_name = opt_str(args, "name");
                let description = opt_str(args, "description");
                let ttl_seconds = opt_i64(args, "ttl_seconds")?.unwrap_or(3600);

                match &self.backend {
                    Backend::Local(engine) => Ok(serde_json::to_value(
                        engine.branch_create(branch_name, description, ttl_seconds)?,
                    )?),
                    Backend::Remote(client) => Ok(fallback::branch_create(
                        client,
                        branch_name,
                        description,
                        ttl_seconds,
                    )?),
                }
            }
            "branch_query" => {
                let branch_id = req_str(args, "branch_id")?;
                let sql = req_str(args, "sql")?;

                match &self.backend {
                    Backend::Local(engine) => Ok(json!(engine.branch_query(branch_id, sql)?)),
                    Backend::Remote(client) => {
                        Ok(json!(fallback::branch_query(client, branch_id, sql)?))
                    }
                }
            }
            "branch_merge" => {
                let branch_id = req_str(args, "branch_id")?;
                let strategy =
                    MergeStrategy::from_str(opt_str(args, "strategy").unwrap_or("branch_wins"))
                        .map_err(Error::BadArgument)?;

                match &self.backend {
                    Backend::Local(engine) => Ok(serde_json::to_value(
                        engine.branch_merge(branch_id, strategy)?,
                    )?),
                    Backend::Remote(client) => {
                        Ok(fallback::branch_merge(client, branch_id, strategy)?)
                    }
                }
            }
            "branch_discard" => {
                let branch_id = req_str(args, "branch_id")?;
                let discarded = match &self.backend {
                    Backend::Local(engine) => engine.branch_discard(branch_id)?,
                    Backend::Remote(client) => fallback::branch_discard(client, branch_id)?,
                };
                Ok(json!({"discarded": discarded}))
            }
            "branch_list" => match &self.backend {
                Backend::Local(engine) => Ok(json!(engine.branch_list()?)),
                Backend::Remote(client) => Ok(json!(fallback::branch_list(client)?)),
            },

            other => Err(Error::BadArgument(format!("Unknown tool: {}", other))),
        }
    }

    fn agent_id<'a>(&'a self, args: &'a Map<String, JsonValue>) -> &'a str {
        opt_str(args, "agent_id").unwrap_or(&self.default_agent_id)
    }
}

// ── Argument extraction ─────────────────────────────────────────────

fn req_str<'a>(args: &'a Map<String, JsonValue>, key: &str) -> Result<&'a str> {
    match args.get(key) {
        Some(JsonValue::String(s)) => Ok(s),
        Some(_) => Err(Error::BadArgument(format!("field {} must be a string", key))),
        None => Err(Error::BadArgument(format!("missing required field: {}", key))),
    }
}

fn opt_str<'a>(args: &'a Map<String, JsonValue>, key: &str) -> Option<&'a str> {
    args.get(key).and_then(|v| v.as_str())
}

fn opt_object<'a>(args: &'a Map<String, JsonValue>, key: &str) -> Option<&'a JsonValue> {
    match args.get(key) {
        Some(JsonValue::Null) | None => None,
        Some(v) => Some(v),
    }
}

fn opt_f64(args: &Map<String, JsonValue>, key: &str) -> Result<Option<f64>> {
    match args.get(key) {
        Some(JsonValue::Null) | None => Ok(None),
        Some(v) => v
            .as_f64()
            .map(Some)
            .ok_or_else(|| Error::BadArgument(format!("field {} must be a number", key))),
    }
}

fn opt_i64(args: &Map<String, JsonValue>, key: &str) -> Result<Option<i64>> {
    match args.get(key) {
        Some(JsonValue::Null) | None => Ok(None),
        Some(v) => v
            .as_i64()
            .map(Some)
            .ok_or_else(|| Error::BadArgument(format!("field {} must be an integer", key))),
    }
}

fn opt_bool(args: &Map<String, JsonValue>, key: &str) -> Result<Option<bool>> {
    match args.get(key) {
        Some(JsonValue::Null) | None => Ok(None),
        Some(v) => v
            .as_bool()
            .map(Some)
            .ok_or_else(|| Error::BadArgument(format!("field {} must be a boolean", key))),
    }
}
