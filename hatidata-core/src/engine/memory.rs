//! Memory store: durable agent notes and versioned key-value state

use super::schema::SchemaKind;
use super::LocalEngine;
use crate::backend::SqlParam;
use crate::error::{Error, Result};
use crate::types::{utc_now_iso, AgentMemory};
use duckdb::{params, OptionalExt, Row};
use serde_json::Value as JsonValue;
use uuid::Uuid;

const MEMORY_COLUMNS: &str = "memory_id, agent_id, content, memory_type, importance, \
                              metadata, created_at, last_accessed_at";

impl LocalEngine {
    /// Store a memory and return its ID.
    ///
    /// `importance` is stored as given; clamping to [0, 1] is the
    /// caller's contract.
    pub fn store_memory(
        &self,
        agent_id: &str,
        content: &str,
        memory_type: &str,
        metadata: Option<&JsonValue>,
        importance: f64,
    ) -> Result<String> {
        if agent_id.is_empty() {
            return Err(Error::BadArgument("agent_id must not be empty".into()));
        }
        self.ensure_schema(SchemaKind::Memory)?;

        let memory_id = Uuid::new_v4().simple().to_string();
        let meta_json = metadata.map(|m| m.to_string());
        let now = utc_now_iso();

        let conn = self.conn();
        conn.execute(
            "INSERT INTO _memory.agent_memories \
             (memory_id, agent_id, content, memory_type, importance, metadata, \
              created_at, last_accessed_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8)",
            params![memory_id, agent_id, content, memory_type, importance, meta_json, now, now],
        )?;

        tracing::debug!(memory_id = %memory_id, agent_id, memory_type, "Stored memory");
        Ok(memory_id)
    }

    /// Search memories by lexical match.
    ///
    /// Query tokens shorter than three characters are discarded; the
    /// remaining tokens form an ILIKE disjunction. A query with no usable
    /// tokens applies no text filter at all.
    pub fn search_memory(
        &self,
        agent_id: &str,
        query: &str,
        top_k: i64,
        memory_type: Option<&str>,
        min_importance: Option<f64>,
    ) -> Result<Vec<AgentMemory>> {
        self.ensure_schema(SchemaKind::Memory)?;

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

        let conn = self.conn();
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(duckdb::params_from_iter(params.iter()), row_to_memory)?;
        rows.collect::<duckdb::Result<Vec<_>>>().map_err(Error::from)
    }

    /// Delete a memory by ID. Returns true iff a row existed.
    pub fn delete_memory(&self, memory_id: &str) -> Result<bool> {
        self.ensure_schema(SchemaKind::Memory)?;

        let conn = self.conn();
        let existing: i64 = conn.query_row(
            "SELECT COUNT(*) FROM _memory.agent_memories WHERE memory_id = $1",
            params![memory_id],
            |r| r.get(0),
        )?;
        if existing == 0 {
            return Ok(false);
        }

        conn.execute(
            "DELETE FROM _memory.agent_memories WHERE memory_id = $1",
            params![memory_id],
        )?;
        Ok(true)
    }

    /// Get an agent state value by key.
    ///
    /// Returns the JSON-decoded value, the raw string when the stored
    /// value is not valid JSON, or None when the key is absent.
    pub fn get_state(&self, agent_id: &str, key: &str) -> Result<Option<JsonValue>> {
        self.ensure_schema(SchemaKind::Memory)?;

        let conn = self.conn();
        let raw: Option<String> = conn
            .query_row(
                "SELECT value FROM _memory.agent_state WHERE agent_id = $1 AND key = $2",
                params![agent_id, key],
                |r| r.get(0),
            )
            .optional()?;

        Ok(raw.map(|s| serde_json::from_str(&s).unwrap_or(JsonValue::String(s.to_string()))))
    }

    /// Set an agent state value (upsert).
    ///
    /// The version starts at 1 and strictly increases on every
    /// successful set of the same key.
    pub fn set_state(&self, agent_id: &str, key: &str, value: &JsonValue) -> Result<()> {
        self.ensure_schema(SchemaKind::Memory)?;

        let json_val = value.to_string();
        let now = utc_now_iso();

        let conn = self.conn();
        conn.execute(
            "INSERT INTO _memory.agent_state (agent_id, key, value, version, updated_at) \
             VALUES ($1, $2, $3, 1, $4) \
             ON CONFLICT (agent_id, key) DO UPDATE SET \
                 value = EXCLUDED.value, \
                 version = version + 1, \
                 updated_at = EXCLUDED.updated_at",
            params![agent_id, key, json_val, now],
        )?;
        Ok(())
    }
}

/// Tokens worth matching: whitespace-separated, longer than two chars.
pub(crate) fn search_tokens(query: &str) -> Vec<String> {
    query
        .split_whitespace()
        .filter(|w| w.len() > 2)
        .map(|w| w.to_string())
        .collect()
}

fn row_to_memory(row: &Row<'_>) -> duckdb::Result<AgentMemory> {
    Ok(AgentMemory {
        memory_id: row.get(0)?,
        agent_id: row.get(1)?,
        content: row.get(2)?,
        memory_type: row.get(3)?,
        importance: row.get(4)?,
        metadata: row.get(5)?,
        created_at: row.get(6)?,
        last_accessed_at: row.get(7)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn engine() -> LocalEngine {
        LocalEngine::open_in_memory().unwrap()
    }

    #[test]
    fn store_then_search_finds_by_substring_token() {
        let engine = engine();
        let id = engine
            .store_memory("a1", "User prefers dark mode", "preference", None, 0.8)
            .unwrap();

        let hits = engine.search_memory("a1", "dark", 5, None, None).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].memory_id, id);
        assert_eq!(hits[0].content, "User prefers dark mode");
        assert_eq!(hits[0].memory_type, "preference");
    }

    #[test]
    fn search_is_scoped_to_agent() {
        let engine = engine();
        engine
            .store_memory("a1", "likes rust", "fact", None, 0.5)
            .unwrap();
        engine
            .store_memory("a2", "likes rust", "fact", None, 0.5)
            .unwrap();

        let hits = engine.search_memory("a1", "rust", 10, None, None).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].agent_id, "a1");
    }

    #[test]
    fn short_tokens_apply_no_text_filter() {
        let engine = engine();
        engine.store_memory("a1", "alpha", "fact", None, 0.4).unwrap();
        engine.store_memory("a1", "beta", "fact", None, 0.6).unwrap();

        // Every token has length <= 2, so all memories for the agent match.
        let hits = engine.search_memory("a1", "a b cd", 10, None, None).unwrap();
        assert_eq!(hits.len(), 2);
        // Ordered by importance descending.
        assert_eq!(hits[0].content, "beta");
    }

    #[test]
    fn filters_by_type_and_importance() {
        let engine = engine();
        engine
            .store_memory("a1", "remember the milk", "instruction", None, 0.9)
            .unwrap();
        engine
            .store_memory("a1", "remember the eggs", "fact", None, 0.2)
            .unwrap();

        let hits = engine
            .search_memory("a1", "remember", 10, Some("instruction"), None)
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].memory_type, "instruction");

        let hits = engine
            .search_memory("a1", "remember", 10, None, Some(0.5))
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert!(hits[0].importance >= 0.5);
    }

    #[test]
    fn delete_memory_reports_existence() {
        let engine = engine();
        let id = engine.store_memory("a1", "ephemeral", "fact", None, 0.5).unwrap();

        assert!(engine.delete_memory(&id).unwrap());
        assert!(!engine.delete_memory(&id).unwrap());
        assert!(engine.search_memory("a1", "ephemeral", 5, None, None).unwrap().is_empty());
    }

    #[test]
    fn empty_agent_id_is_rejected() {
        let engine = engine();
        let err = engine.store_memory("", "x", "fact", None, 0.5).unwrap_err();
        assert!(matches!(err, Error::BadArgument(_)));
    }

    #[test]
    fn state_round_trips_and_versions() {
        let engine = engine();

        assert!(engine.get_state("a1", "k").unwrap().is_none());

        engine.set_state("a1", "k", &json!({"x": 1})).unwrap();
        assert_eq!(engine.get_state("a1", "k").unwrap(), Some(json!({"x": 1})));

        engine.set_state("a1", "k", &json!({"x": 2})).unwrap();
        assert_eq!(engine.get_state("a1", "k").unwrap(), Some(json!({"x": 2})));

        let version: i64 = {
            let conn = engine.conn();
            conn.query_row(
                "SELECT version FROM _memory.agent_state WHERE agent_id = 'a1' AND key = 'k'",
                [],
                |r| r.get(0),
            )
            .unwrap()
        };
        assert_eq!(version, 2);
    }

    #[test]
    fn non_json_state_value_comes_back_as_raw_string() {
        let engine = engine();
        engine.set_state("a1", "k", &json!("plain")).unwrap();

        // Corrupt the stored value so it is no longer valid JSON.
        {
            let conn = engine.conn();
            conn.execute(
                "UPDATE _memory.agent_state SET value = 'not json' \
                 WHERE agent_id = 'a1' AND key = 'k'",
                [],
            )
            .unwrap();
        }

        assert_eq!(
            engine.get_state("a1", "k").unwrap(),
            Some(JsonValue::String("not json".into()))
        );
    }

    #[test]
    fn tokenizer_drops_short_words() {
        assert_eq!(search_tokens("a an the cat"), vec!["the", "cat"]);
        assert!(search_tokens("a b c").is_empty());
        assert!(search_tokens("").is_empty());
    }
}
