//! Internal schema bootstrap
//!
//! Each component's schema is created lazily on first touch. The DDL is
//! `IF NOT EXISTS` throughout, so repeated bootstrap is a no-op; the
//! per-process guard in [`super::LocalEngine`] only skips redundant
//! round-trips. The table shapes below are a stable on-disk contract.

/// Schema holding agent memories and keyed state
pub const MEMORY_SCHEMA: &str = "_memory";
/// Schema holding the chain-of-thought ledger
pub const COT_SCHEMA: &str = "_cot";
/// Schema holding the trigger registry
pub const TRIGGER_SCHEMA: &str = "_triggers";

/// Prefix for copy-on-write branch schemas
pub const BRANCH_SCHEMA_PREFIX: &str = "branch_";

/// Internal component schemas, in bootstrap order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SchemaKind {
    Memory,
    Cot,
    Triggers,
}

impl SchemaKind {
    pub fn name(&self) -> &'static str {
        match self {
            SchemaKind::Memory => MEMORY_SCHEMA,
            SchemaKind::Cot => COT_SCHEMA,
            SchemaKind::Triggers => TRIGGER_SCHEMA,
        }
    }

    /// DDL statements that bring this schema to its current shape
    pub fn ddl(&self) -> &'static [&'static str] {
        match self {
            SchemaKind::Memory => MEMORY_DDL,
            SchemaKind::Cot => COT_DDL,
            SchemaKind::Triggers => TRIGGER_DDL,
        }
    }
}

/// Memory schema: durable notes plus versioned key-value state.
///
/// Timestamps are engine-assigned ISO-8601 strings passed as parameters,
/// never database defaults, so local and remote backends store identical
/// values.
pub const MEMORY_DDL: &[&str] = &[
    "CREATE SCHEMA IF NOT EXISTS _memory",
    r#"
    CREATE TABLE IF NOT EXISTS _memory.agent_memories (
        memory_id        VARCHAR PRIMARY KEY,
        agent_id         VARCHAR NOT NULL,
        content          TEXT NOT NULL,
        memory_type      VARCHAR NOT NULL DEFAULT 'fact',
        importance       DOUBLE NOT NULL DEFAULT 0.5,
        metadata         VARCHAR,
        created_at       VARCHAR NOT NULL,
        last_accessed_at VARCHAR NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS _memory.agent_state (
        agent_id   VARCHAR NOT NULL,
        key        VARCHAR NOT NULL,
        value      VARCHAR NOT NULL,
        version    BIGINT NOT NULL DEFAULT 1,
        updated_at VARCHAR NOT NULL,
        PRIMARY KEY (agent_id, key)
    )
    "#,
];

/// Chain-of-thought schema: the append-only hash-chained ledger.
pub const COT_DDL: &[&str] = &[
    "CREATE SCHEMA IF NOT EXISTS _cot",
    r#"
    CREATE TABLE IF NOT EXISTS _cot.agent_traces (
        trace_id    VARCHAR PRIMARY KEY,
        session_id  VARCHAR NOT NULL,
        agent_id    VARCHAR NOT NULL,
        step_number INTEGER NOT NULL,
        step_type   VARCHAR NOT NULL DEFAULT 'observation',
        content     TEXT NOT NULL,
        importance  DOUBLE NOT NULL DEFAULT 0.5,
        metadata    VARCHAR,
        prev_hash   VARCHAR NOT NULL DEFAULT '',
        hash        VARCHAR NOT NULL,
        created_at  VARCHAR NOT NULL
    )
    "#,
];

/// Trigger schema: registry of concept-matching rules.
pub const TRIGGER_DDL: &[&str] = &[
    "CREATE SCHEMA IF NOT EXISTS _triggers",
    r#"
    CREATE TABLE IF NOT EXISTS _triggers.trigger_registry (
        trigger_id    VARCHAR PRIMARY KEY,
        name          VARCHAR NOT NULL,
        concept       VARCHAR NOT NULL,
        threshold     DOUBLE NOT NULL DEFAULT 0.7,
        action_type   VARCHAR NOT NULL DEFAULT 'flag_for_review',
        action_config VARCHAR NOT NULL DEFAULT '{}',
        enabled       BOOLEAN NOT NULL DEFAULT TRUE,
        cooldown_ms   BIGINT NOT NULL DEFAULT 60000,
        fire_count    BIGINT NOT NULL DEFAULT 0,
        last_fired_at VARCHAR,
        created_at    VARCHAR NOT NULL,
        updated_at    VARCHAR NOT NULL
    )
    "#,
];

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::LocalEngine;

    #[test]
    fn bootstrap_is_idempotent() {
        let engine = LocalEngine::open_in_memory().unwrap();

        for _ in 0..3 {
            engine.ensure_schema(SchemaKind::Memory).unwrap();
            engine.ensure_schema(SchemaKind::Cot).unwrap();
            engine.ensure_schema(SchemaKind::Triggers).unwrap();
        }

        let tables = [
            ("_memory", "agent_memories"),
            ("_memory", "agent_state"),
            ("_cot", "agent_traces"),
            ("_triggers", "trigger_registry"),
        ];
        for (schema, table) in tables {
            let rows = crate::backend::SqlBackend::query(
                &engine,
                "SELECT table_name FROM information_schema.tables \
                 WHERE table_schema = $1 AND table_name = $2",
                &[schema.into(), table.into()],
            )
            .unwrap();
            assert_eq!(rows.len(), 1, "table {}.{} should exist", schema, table);
        }
    }
}
