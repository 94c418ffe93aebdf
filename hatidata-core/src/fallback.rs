//! SQL-only reconstruction of the domain operations
//!
//! When the dispatcher runs against a backend that exposes nothing beyond
//! `query`/`execute`, every tool is rebuilt here from plain SQL: schema
//! bootstrap DDL, the predecessor-hash lookup for ledger appends, and
//! information-schema catalog queries for branches. The building blocks
//! (DDL constants, `chain_hash`, token and score functions, identifier
//! validation) are shared with the local engine, so the two paths return
//! identical results for identical state.
//!
//! Bootstrap runs its `IF NOT EXISTS` DDL on every touch rather than
//! keeping per-process state; the remote client stays stateless.

use crate::backend::{JsonRow, SqlBackend, SqlParam};
use crate::engine::branch::{
    materialization_target, quote_ident, returns_rows, split_statements, validate_branch_id,
};
use crate::engine::cot::chain_hash;
use crate::engine::memory::search_tokens;
use crate::engine::schema::SchemaKind;
use crate::engine::triggers::{concept_score, round_score};
use crate::error::{Error, Result};
use crate::types::{utc_now_iso, MergeStrategy, StepType};
use serde_json::{json, Value as JsonValue};
use uuid::Uuid;

const MEMORY_COLUMNS: &str = "memory_id, agent_id, content, memory_type, importance, \
                              metadata, created_at, last_accessed_at";
const TRACE_COLUMNS: &str = "trace_id, session_id, agent_id, step_number, step_type, \
                             content, importance, metadata, prev_hash, hash, created_at";
const TRIGGER_COLUMNS: &str = "trigger_id, name, concept, threshold, action_type, \
                               action_config, enabled, cooldown_ms, fire_count, \
                               last_fired_at, created_at, updated_at";

fn ensure(backend: &dyn SqlBackend, kind: SchemaKind) -> Result<()> {
    for stmt in kind.ddl() {
        backend.execute(stmt, &[])?;
    }
    Ok(())
}

fn str_field<'a>(row: &'a JsonRow, key: &str) -> &'a str {
    row.get(key).and_then(|v| v.as_str()).unwrap_or("")
}

// ============================================
// Memory
// ============================================

pub fn store_memory(
    backend: &dyn SqlBackend,
    agent_id: &str,
    content: &str,
    memory_type: &str,
    metadata: Option<&JsonValue>,
    importance: f64,
) -> Result<String> {
    if agent_id.is_empty() {
        return Err(Error::BadArgument("agent_id must not be empty".into()));
    }
    ensure(backend, SchemaKind::Memory)?;

    let memory_id = Uuid::new_v4().simple().to_string();
    let now = utc_now_iso();
    backend.execute(
        "INSERT INTO _memory.agent_memories \
         (memory_id, agent_id, content, memory_type, importance, metadata, \
          created_at, last_accessed_at) \
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8)",
        &[
            memory_id.as_str().into(),
            agent_id.into(),
            content.into(),
            memory_type.into(),
            importance.into(),
            metadata.map(|m| m.to_string()).into(),
            now.as_str().into(),
            now.into(),
        ],
    )?;
    Ok(memory_id)
}

pub fn search_memory(
    backend: &dyn SqlBackend,
    agent_id: &str,
    query: &str,
    top_k: i64,
    memory_type: Option<&str>,
    min_importance: Option<f64>,
) -> Result<Vec<JsonRow>> {
    ensure(backend, SchemaKind::Memory)?;

    let mut sql = format!(
        "SELECT {} FROM _memory.agent_memories WHERE agent_id = $1",
        MEMORY_COLUMNS
    );
    let mut params: Vec<SqlParam> = vec![agent_id.into()];

    let tokens = search_tokens(query);
    if !tokens.is_empty() {
        let clauses: Vec<String> = tokens
            .iter()
            .enumerate()
            .map(|(i, _)| format!("content ILIKE ${}", params.len() + i + 1))
            .collect();
        sql.push_str(&format!(" AND ({})", clauses.join(" OR ")));
        params.extend(tokens.iter().map(|t| SqlParam::Text(format!("%{}%", t))));
    }
    if let Some(mt) = memory_type {
        sql.push_str(&format!(" AND memory_type = ${}", params.len() + 1));
        params.push(mt.into());
    }
    if let Some(min) = min_importance {
        sql.push_str(&format!(" AND importance >= ${}", params.len() + 1));
        params.push(min.into());
    }
    sql.push_str(&format!(
        " ORDER BY importance DESC, created_at DESC LIMIT {}",
        top_k.max(0)
    ));

    backend.query(&sql, &params)
}

pub fn delete_memory(backend: &dyn SqlBackend, memory_id: &str) -> Result<bool> {
    ensure(backend, SchemaKind::Memory)?;

    let rows = backend.query(
        "SELECT COUNT(*) AS c FROM _memory.agent_memories WHERE memory_id = $1",
        &[memory_id.into()],
    )?;
    let existing = rows
        .first()
        .and_then(|r| r.get("c"))
        .and_then(|v| v.as_i64())
        .unwrap_or(0);
    if existing == 0 {
        return Ok(false);
    }

    backend.execute(
        "DELETE FROM _memory.agent_memories WHERE memory_id = $1",
        &[memory_id.into()],
    )?;
    Ok(true)
}

pub fn get_state(backend: &dyn SqlBackend, agent_id: &str, key: &str) -> Result<Option<JsonValue>> {
    ensure(backend, SchemaKind::Memory)?;

    let rows = backend.query(
        "SELECT value FROM _memory.agent_state WHERE agent_id = $1 AND key = $2",
        &[agent_id.into(), key.into()],
    )?;
    Ok(rows.first().and_then(|r| r.get("value")).and_then(|v| {
        v.as_str()
            .map(|s| serde_json::from_str(s).unwrap_or(JsonValue::String(s.to_string())))
    }))
}

pub fn set_state(
    backend: &dyn SqlBackend,
    agent_id: &str,
    key: &str,
    value: &JsonValue,
) -> Result<()> {
    ensure(backend, SchemaKind::Memory)?;

    backend.execute(
        "INSERT INTO _memory.agent_state (agent_id, key, value, version, updated_at) \
         VALUES ($1, $2, $3, 1, $4) \
         ON CONFLICT (agent_id, key) DO UPDATE SET \
             value = EXCLUDED.value, \
             version = version + 1, \
             updated_at = EXCLUDED.updated_at",
        &[
            agent_id.into(),
            key.into(),
            value.to_string().into(),
            utc_now_iso().into(),
        ],
    )?;
    Ok(())
}

// ============================================
// Chain-of-thought ledger
// ============================================

pub fn log_reasoning_step(
    backend: &dyn SqlBackend,
    agent_id: &str,
    session_id: &str,
    step_type: StepType,
    content: &str,
    metadata: Option<&JsonValue>,
    importance: f64,
) -> Result<String> {
    if agent_id.is_empty() {
        return Err(Error::BadArgument("agent_id must not be empty".into()));
    }
    if session_id.is_empty() {
        return Err(Error::BadArgument("session_id must not be empty".into()));
    }
    ensure(backend, SchemaKind::Cot)?;

    let rows = backend.query(
        "SELECT hash, step_number FROM _cot.agent_traces \
         WHERE session_id = $1 ORDER BY step_number DESC LIMIT 1",
        &[session_id.into()],
    )?;
    let (prev_hash, step_number) = match rows.first() {
        Some(row) => (
            str_field(row, "hash").to_string(),
            row.get("step_number").and_then(|v| v.as_i64()).unwrap_or(-1) + 1,
        ),
        None => (String::new(), 0),
    };
    let hash = chain_hash(&prev_hash, session_id, step_type.as_str(), content);

    let trace_id = Uuid::new_v4().simple().to_string();
    backend.execute(
        "INSERT INTO _cot.agent_traces \
         (trace_id, session_id, agent_id, step_number, step_type, content, \
          importance, metadata, prev_hash, hash, created_at) \
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)",
        &[
            trace_id.as_str().into(),
            session_id.into(),
            agent_id.into(),
            step_number.into(),
            step_type.as_str().into(),
            content.into(),
            importance.into(),
            metadata.map(|m| m.to_string()).into(),
            prev_hash.into(),
            hash.into(),
            utc_now_iso().into(),
        ],
    )?;
    Ok(trace_id)
}

pub fn replay_session(
    backend: &dyn SqlBackend,
    session_id: &str,
    verify: bool,
) -> Result<JsonValue> {
    ensure(backend, SchemaKind::Cot)?;

    let steps = backend.query(
        &format!(
            "SELECT {} FROM _cot.agent_traces \
             WHERE session_id = $1 ORDER BY step_number ASC",
            TRACE_COLUMNS
        ),
        &[session_id.into()],
    )?;

    let chain_valid = if verify && !steps.is_empty() {
        let mut valid = true;
        for (i, step) in steps.iter().enumerate() {
            let expected_prev = if i > 0 { str_field(&steps[i - 1], "hash") } else { "" };
            if str_field(step, "prev_hash") != expected_prev {
                valid = false;
                break;
            }
            let expected = chain_hash(
                str_field(step, "prev_hash"),
                str_field(step, "session_id"),
                str_field(step, "step_type"),
                str_field(step, "content"),
            );
            if str_field(step, "hash") != expected {
                valid = false;
                break;
            }
        }
        Some(valid)
    } else {
        None
    };

    let step_count = steps.len();
    let mut result = json!({
        "session_id": session_id,
        "steps": steps,
        "step_count": step_count,
    });
    if let Some(valid) = chain_valid {
        result["chain_valid"] = JsonValue::Bool(valid);
    }
    Ok(result)
}

pub fn list_sessions(
    backend: &dyn SqlBackend,
    agent_id: Option<&str>,
    limit: i64,
    since: Option<&str>,
) -> Result<Vec<JsonRow>> {
    ensure(backend, SchemaKind::Cot)?;

    let mut conditions: Vec<String> = Vec::new();
    let mut params: Vec<SqlParam> = Vec::new();
    if let Some(agent) = agent_id {
        params.push(agent.into());
        conditions.push(format!("agent_id = ${}", params.len()));
    }
    if let Some(since) = since {
        params.push(since.into());
        conditions.push(format!("created_at >= ${}", params.len()));
    }
    let where_clause = if conditions.is_empty() {
        String::new()
    } else {
        format!("WHERE {} ", conditions.join(" AND "))
    };

    backend.query(
        &format!(
            "SELECT session_id, agent_id, MIN(created_at) AS started_at, \
             MAX(created_at) AS last_step_at, COUNT(*) AS step_count \
             FROM _cot.agent_traces {}\
             GROUP BY session_id, agent_id \
             ORDER BY started_at DESC LIMIT {}",
            where_clause,
            limit.max(0)
        ),
        &params,
    )
}

// ============================================
// Triggers
// ============================================

pub fn register_trigger(
    backend: &dyn SqlBackend,
    name: &str,
    concept: &str,
    threshold: f64,
    action_type: &str,
    action_config: Option<&JsonValue>,
) -> Result<String> {
    ensure(backend, SchemaKind::Triggers)?;

    let trigger_id = Uuid::new_v4().simple().to_string();
    let now = utc_now_iso();
    backend.execute(
        "INSERT INTO _triggers.trigger_registry \
         (trigger_id, name, concept, threshold, action_type, action_config, \
          created_at, updated_at) \
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8)",
        &[
            trigger_id.as_str().into(),
            name.into(),
            concept.into(),
            threshold.into(),
            action_type.into(),
            action_config
                .map(|c| c.to_string())
                .unwrap_or_else(|| "{}".to_string())
                .into(),
            now.as_str().into(),
            now.into(),
        ],
    )?;
    Ok(trigger_id)
}

pub fn list_triggers(backend: &dyn SqlBackend, status: Option<&str>) -> Result<Vec<JsonRow>> {
    ensure(backend, SchemaKind::Triggers)?;

    let where_clause = match status {
        Some("active") => "WHERE enabled = TRUE ",
        Some("inactive") => "WHERE enabled = FALSE ",
        _ => "",
    };
    backend.query(
        &format!(
            "SELECT {} FROM _triggers.trigger_registry {}ORDER BY created_at DESC",
            TRIGGER_COLUMNS, where_clause
        ),
        &[],
    )
}

pub fn delete_trigger(backend: &dyn SqlBackend, trigger_id: &str) -> Result<bool> {
    ensure(backend, SchemaKind::Triggers)?;

    let rows = backend.query(
        "SELECT trigger_id FROM _triggers.trigger_registry WHERE trigger_id = $1",
        &[trigger_id.into()],
    )?;
    if rows.is_empty() {
        return Ok(false);
    }

    backend.execute(
        "UPDATE _triggers.trigger_registry \
         SET enabled = FALSE, updated_at = $1 WHERE trigger_id = $2",
        &[utc_now_iso().into(), trigger_id.into()],
    )?;
    Ok(true)
}

pub fn test_trigger(
    backend: &dyn SqlBackend,
    trigger_id: &str,
    content: &str,
) -> Result<Option<JsonValue>> {
    ensure(backend, SchemaKind::Triggers)?;

    let rows = backend.query(
        &format!(
            "SELECT {} FROM _triggers.trigger_registry WHERE trigger_id = $1",
            TRIGGER_COLUMNS
        ),
        &[trigger_id.into()],
    )?;
    let Some(trigger) = rows.first() else {
        return Ok(None);
    };

    let concept = str_field(trigger, "concept");
    let threshold = trigger
        .get("threshold")
        .and_then(|v| v.as_f64())
        .unwrap_or(0.7);
    let score = concept_score(concept, content);

    Ok(Some(json!({
        "matched": score >= threshold,
        "score": round_score(score),
        "threshold": threshold,
        "trigger_name": str_field(trigger, "name"),
        "concept": concept,
    })))
}

// ============================================
// Branches
// ============================================

fn schema_exists(backend: &dyn SqlBackend, schema: &str) -> Result<bool> {
    let rows = backend.query(
        "SELECT schema_name FROM information_schema.schemata WHERE schema_name = $1",
        &[schema.into()],
    )?;
    Ok(!rows.is_empty())
}

fn base_tables(backend: &dyn SqlBackend, schema: &str) -> Result<Vec<String>> {
    let rows = backend.query(
        "SELECT table_name FROM information_schema.tables \
         WHERE table_schema = $1 AND table_type = 'BASE TABLE' ORDER BY table_name",
        &[schema.into()],
    )?;
    Ok(rows
        .into_iter()
        .filter_map(|r| r.get("table_name").and_then(|v| v.as_str().map(str::to_string)))
        .collect())
}

pub fn branch_create(
    backend: &dyn SqlBackend,
    name: Option<&str>,
    description: Option<&str>,
    ttl_seconds: i64,
) -> Result<JsonValue> {
    let branch_id = Uuid::new_v4().simple().to_string()[..12].to_string();
    let schema_name = format!("branch_{}", branch_id);

    backend.execute(&format!("CREATE SCHEMA {}", quote_ident(&schema_name)), &[])?;

    let tables = base_tables(backend, "main")?;
    for table in &tables {
        let qt = quote_ident(table);
        backend.execute(
            &format!(
                "CREATE VIEW {}.{} AS SELECT * FROM main.{}",
                quote_ident(&schema_name),
                qt,
                qt
            ),
            &[],
        )?;
    }

    Ok(json!({
        "branch_id": branch_id,
        "schema_name": schema_name,
        "name": name.unwrap_or(&schema_name),
        "description": description.unwrap_or(""),
        "table_count": tables.len(),
        "ttl_seconds": ttl_seconds,
        "created_at": utc_now_iso(),
    }))
}

/// Restores the session search path when dropped.
struct SearchPathReset<'a> {
    backend: &'a dyn SqlBackend,
}

impl Drop for SearchPathReset<'_> {
    fn drop(&mut self) {
        if let Err(e) = self.backend.execute("RESET search_path", &[]) {
            tracing::warn!(error = %e, "Failed to restore search_path");
        }
    }
}

pub fn branch_query(backend: &dyn SqlBackend, branch_id: &str, sql: &str) -> Result<Vec<JsonRow>> {
    validate_branch_id(branch_id)?;
    let schema_name = format!("branch_{}", branch_id);
    if !schema_exists(backend, &schema_name)? {
        return Err(Error::NotFound(format!("branch {}", branch_id)));
    }

    backend.execute(&format!("SET search_path = '{},main'", schema_name), &[])?;
    let _guard = SearchPathReset { backend };

    let statements = split_statements(sql);
    let Some((last, head)) = statements.split_last() else {
        return Ok(Vec::new());
    };
    for stmt in head {
        drop_shadowing_view(backend, &schema_name, stmt)?;
        backend.execute(stmt, &[])?;
    }
    if returns_rows(last) {
        backend.query(last, &[])
    } else {
        drop_shadowing_view(backend, &schema_name, last)?;
        backend.execute(last, &[])?;
        Ok(Vec::new())
    }
}

/// Copy-on-write materialization, mirroring the engine: a CREATE TABLE
/// aimed at a passthrough view replaces it.
fn drop_shadowing_view(backend: &dyn SqlBackend, schema_name: &str, stmt: &str) -> Result<()> {
    let Some(table) = materialization_target(stmt, schema_name) else {
        return Ok(());
    };
    let views = backend.query(
        "SELECT table_name FROM information_schema.tables \
         WHERE table_schema = $1 AND table_name = $2 AND table_type = 'VIEW'",
        &[schema_name.into(), table.as_str().into()],
    )?;
    if !views.is_empty() {
        backend.execute(
            &format!("DROP VIEW {}.{}", quote_ident(schema_name), quote_ident(&table)),
            &[],
        )?;
    }
    Ok(())
}

pub fn branch_merge(
    backend: &dyn SqlBackend,
    branch_id: &str,
    strategy: MergeStrategy,
) -> Result<JsonValue> {
    validate_branch_id(branch_id)?;
    let schema_name = format!("branch_{}", branch_id);
    if !schema_exists(backend, &schema_name)? {
        return Err(Error::NotFound(format!("branch {}", branch_id)));
    }

    let tables = base_tables(backend, &schema_name)?;
    let mut merged = 0;
    if strategy == MergeStrategy::BranchWins {
        for table in &tables {
            let qt = quote_ident(table);
            backend.execute(&format!("DROP TABLE IF EXISTS main.{}", qt), &[])?;
            backend.execute(
                &format!(
                    "CREATE TABLE main.{} AS SELECT * FROM {}.{}",
                    qt,
                    quote_ident(&schema_name),
                    qt
                ),
                &[],
            )?;
            merged += 1;
        }
    }

    backend.execute(
        &format!("DROP SCHEMA {} CASCADE", quote_ident(&schema_name)),
        &[],
    )?;

    Ok(json!({
        "branch_id": branch_id,
        "strategy": strategy.as_str(),
        "merged": merged,
        "status": "completed",
    }))
}

pub fn branch_discard(backend: &dyn SqlBackend, branch_id: &str) -> Result<bool> {
    validate_branch_id(branch_id)?;
    let schema_name = format!("branch_{}", branch_id);
    if !schema_exists(backend, &schema_name)? {
        return Ok(false);
    }
    backend.execute(
        &format!("DROP SCHEMA {} CASCADE", quote_ident(&schema_name)),
        &[],
    )?;
    Ok(true)
}

pub fn branch_list(backend: &dyn SqlBackend) -> Result<Vec<JsonValue>> {
    let rows = backend.query(
        "SELECT schema_name FROM information_schema.schemata \
         WHERE schema_name LIKE 'branch%' ORDER BY schema_name",
        &[],
    )?;

    let mut branches = Vec::new();
    for row in rows {
        let Some(branch_id) = row
            .get("schema_name")
            .and_then(|v| v.as_str())
            .and_then(|s| s.strip_prefix("branch_"))
        else {
            continue;
        };
        let schema_name = format!("branch_{}", branch_id);

        let counts = backend.query(
            "SELECT table_type, COUNT(*) AS cnt FROM information_schema.tables \
             WHERE table_schema = $1 GROUP BY table_type",
            &[schema_name.as_str().into()],
        )?;
        let mut tables = 0;
        let mut views = 0;
        for c in &counts {
            let cnt = c.get("cnt").and_then(|v| v.as_i64()).unwrap_or(0);
            match c.get("table_type").and_then(|v| v.as_str()) {
                Some("VIEW") => views += cnt,
                _ => tables += cnt,
            }
        }

        branches.push(json!({
            "branch_id": branch_id,
            "schema_name": schema_name,
            "materialized_tables": tables,
            "views": views,
            "status": "active",
        }));
    }
    Ok(branches)
}

// ============================================
// Catalog usage stats
// ============================================

/// Information-schema rendition of the usage report, for substrates
/// without a native table-statistics function.
pub fn get_usage_stats(backend: &dyn SqlBackend) -> Result<Vec<JsonValue>> {
    let tables = backend.query(
        "SELECT table_schema, table_name FROM information_schema.tables \
         WHERE table_type = 'BASE TABLE' ORDER BY table_schema, table_name",
        &[],
    )?;

    let mut stats = Vec::new();
    for row in tables {
        let schema = str_field(&row, "table_schema").to_string();
        let table = str_field(&row, "table_name").to_string();
        if schema.starts_with('_') || schema == "information_schema" || schema == "pg_catalog" {
            continue;
        }

        let count_rows = backend.query(
            &format!(
                "SELECT COUNT(*) AS c FROM {}.{}",
                quote_ident(&schema),
                quote_ident(&table)
            ),
            &[],
        )?;
        let estimated_rows = count_rows
            .first()
            .and_then(|r| r.get("c"))
            .and_then(|v| v.as_i64())
            .unwrap_or(0);

        let col_rows = backend.query(
            "SELECT COUNT(*) AS c FROM information_schema.columns \
             WHERE table_schema = $1 AND table_name = $2",
            &[schema.as_str().into(), table.as_str().into()],
        )?;
        let column_count = col_rows
            .first()
            .and_then(|r| r.get("c"))
            .and_then(|v| v.as_i64())
            .unwrap_or(0);

        stats.push(json!({
            "schema_name": schema,
            "table_name": table,
            "estimated_rows": estimated_rows,
            "column_count": column_count,
        }));
    }
    Ok(stats)
}

#[cfg(test)]
mod tests {
    //! The local engine satisfies `SqlBackend`, so the fallback path can
    //! be exercised against it and compared with the typed helpers.

    use super::*;
    use crate::engine::LocalEngine;

    fn engine() -> LocalEngine {
        LocalEngine::open_in_memory().unwrap()
    }

    #[test]
    fn memory_round_trip_matches_typed_path() {
        let engine = engine();

        let id = store_memory(&engine, "a1", "User prefers dark mode", "preference", None, 0.8)
            .unwrap();
        let raw = search_memory(&engine, "a1", "dark", 5, None, None).unwrap();
        assert_eq!(raw.len(), 1);
        assert_eq!(str_field(&raw[0], "memory_id"), id);

        let typed = engine.search_memory("a1", "dark", 5, None, None).unwrap();
        let typed_json = serde_json::to_value(&typed[0]).unwrap();
        assert_eq!(JsonValue::Object(raw[0].clone()), typed_json);

        assert!(delete_memory(&engine, &id).unwrap());
        assert!(!delete_memory(&engine, &id).unwrap());
    }

    #[test]
    fn state_upsert_matches_typed_path() {
        let engine = engine();
        set_state(&engine, "a1", "k", &serde_json::json!({"x": 1})).unwrap();
        set_state(&engine, "a1", "k", &serde_json::json!({"x": 2})).unwrap();

        assert_eq!(
            get_state(&engine, "a1", "k").unwrap(),
            engine.get_state("a1", "k").unwrap()
        );
        assert_eq!(
            get_state(&engine, "a1", "k").unwrap(),
            Some(serde_json::json!({"x": 2}))
        );
    }

    #[test]
    fn ledger_appends_interleave_with_typed_path() {
        let engine = engine();

        // Steps appended through either path extend the same chain.
        engine
            .log_reasoning_step("a1", "s1", StepType::Observation, "hello", None, 0.5)
            .unwrap();
        log_reasoning_step(&engine, "a1", "s1", StepType::Decision, "act", None, 0.5).unwrap();
        engine
            .log_reasoning_step("a1", "s1", StepType::Reflection, "done", None, 0.5)
            .unwrap();

        let typed = engine.replay_session("s1", true).unwrap();
        assert_eq!(typed.chain_valid, Some(true));
        assert_eq!(typed.step_count, 3);

        let raw = replay_session(&engine, "s1", true).unwrap();
        assert_eq!(raw["chain_valid"], JsonValue::Bool(true));
        assert_eq!(raw["step_count"], JsonValue::from(3));
        assert_eq!(serde_json::to_value(&typed).unwrap(), raw);

        let sessions = list_sessions(&engine, Some("a1"), 10, None).unwrap();
        assert_eq!(sessions.len(), 1);
        assert_eq!(sessions[0]["step_count"], JsonValue::from(3));
    }

    #[test]
    fn trigger_lifecycle_matches_typed_path() {
        let engine = engine();
        let id = register_trigger(
            &engine,
            "pii",
            "personal data exposure",
            0.5,
            "flag_for_review",
            None,
        )
        .unwrap();

        let result = test_trigger(&engine, &id, "Contains personal exposure details")
            .unwrap()
            .unwrap();
        assert_eq!(result["matched"], JsonValue::Bool(true));
        assert_eq!(result["score"], JsonValue::from(0.6667));

        let typed = engine
            .test_trigger(&id, "Contains personal exposure details")
            .unwrap()
            .unwrap();
        assert_eq!(serde_json::to_value(&typed).unwrap(), result);

        assert!(test_trigger(&engine, "missing", "x").unwrap().is_none());

        assert!(delete_trigger(&engine, &id).unwrap());
        let inactive = list_triggers(&engine, Some("inactive")).unwrap();
        assert_eq!(inactive.len(), 1);
        assert!(list_triggers(&engine, Some("active")).unwrap().is_empty());
    }

    #[test]
    fn branch_flow_matches_typed_semantics() {
        let engine = engine();
        engine
            .execute("CREATE TABLE t (id INTEGER)", &[])
            .and_then(|_| engine.execute("INSERT INTO t VALUES (1), (2)", &[]))
            .unwrap();

        let info = branch_create(&engine, None, None, 3600).unwrap();
        let branch_id = info["branch_id"].as_str().unwrap().to_string();
        assert_eq!(info["table_count"], JsonValue::from(1));

        branch_query(
            &engine,
            &branch_id,
            "CREATE TABLE t AS SELECT * FROM main.t; INSERT INTO t VALUES (3); SELECT 1 AS ok",
        )
        .unwrap();

        let rows = branch_query(&engine, &branch_id, "SELECT count(*) AS c FROM t").unwrap();
        assert_eq!(rows[0]["c"], JsonValue::from(3));

        let listed = branch_list(&engine).unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0]["materialized_tables"], JsonValue::from(1));

        let merge = branch_merge(&engine, &branch_id, MergeStrategy::BranchWins).unwrap();
        assert_eq!(merge["merged"], JsonValue::from(1));

        let rows = engine.query("SELECT count(*) AS c FROM main.t", &[]).unwrap();
        assert_eq!(rows[0]["c"], JsonValue::from(3));

        assert!(!branch_discard(&engine, &branch_id).unwrap());
    }

    #[test]
    fn usage_stats_cover_user_tables_only() {
        let engine = engine();
        engine.execute("CREATE TABLE t (a INTEGER, b VARCHAR)", &[]).unwrap();
        engine.execute("INSERT INTO t VALUES (1, 'x')", &[]).unwrap();
        // Internal schemas must not appear.
        engine.store_memory("a1", "note", "fact", None, 0.5).unwrap();

        let stats = get_usage_stats(&engine).unwrap();
        assert_eq!(stats.len(), 1);
        assert_eq!(stats[0]["table_name"], JsonValue::from("t"));
        assert_eq!(stats[0]["estimated_rows"], JsonValue::from(1));
        assert_eq!(stats[0]["column_count"], JsonValue::from(2));
    }
}
