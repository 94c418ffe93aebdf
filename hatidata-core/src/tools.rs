//! Tool catalog: the stable wire contract of the dispatcher
//!
//! Tool names, argument names, required/optional status, and defaults are
//! part of the contract; changing any of them is a breaking change for
//! every connected host.

use serde::Serialize;
use serde_json::{json, Value as JsonValue};

/// One tool definition as advertised by `tools/list`.
#[derive(Debug, Clone, Serialize)]
pub struct ToolDef {
    pub name: &'static str,
    pub description: &'static str,
    #[serde(rename = "inputSchema")]
    pub input_schema: JsonValue,
}

/// The full 23-tool catalog.
pub fn catalog() -> Vec<ToolDef> {
    vec![
        // ── SQL surface ─────────────────────────────────────────────
        ToolDef {
            name: "query",
            description: "Execute a SQL query against the warehouse and return rows as JSON.",
            input_schema: json!({
                "type": "object",
                "properties": {
                    "sql": {"type": "string", "description": "The SQL statement to execute"},
                },
                "required": ["sql"],
            }),
        },
        ToolDef {
            name: "read_query",
            description: "Execute a read-only SQL query. The statement is wrapped in a \
                          SELECT subquery, so mutations are rejected by the engine.",
            input_schema: json!({
                "type": "object",
                "properties": {
                    "sql": {"type": "string", "description": "The SELECT statement to execute"},
                },
                "required": ["sql"],
            }),
        },
        ToolDef {
            name: "list_schemas",
            description: "List all schemas in the database.",
            input_schema: json!({"type": "object", "properties": {}}),
        },
        ToolDef {
            name: "list_tables",
            description: "List tables. Without a schema filter, internal schemas are omitted.",
            input_schema: json!({
                "type": "object",
                "properties": {
                    "schema": {"type": "string", "description": "Restrict to one schema"},
                },
            }),
        },
        ToolDef {
            name: "describe_table",
            description: "Get the columns of a table in ordinal order, with data type and \
                          nullability.",
            input_schema: json!({
                "type": "object",
                "properties": {
                    "table_name": {"type": "string", "description": "Name of the table"},
                },
                "required": ["table_name"],
            }),
        },
        ToolDef {
            name: "get_usage_stats",
            description: "Per-table row count and size estimate for user tables.",
            input_schema: json!({"type": "object", "properties": {}}),
        },
        // ── Agent memory ────────────────────────────────────────────
        ToolDef {
            name: "store_memory",
            description: "Store a persistent memory for an agent. Returns the memory ID.",
            input_schema: json!({
                "type": "object",
                "properties": {
                    "agent_id": {"type": "string", "description": "Owning agent (defaults to the server's agent)"},
                    "content": {"type": "string", "description": "Memory content"},
                    "memory_type": {"type": "string", "default": "fact",
                                    "description": "Kind tag: fact, observation, instruction, preference, episode, ..."},
                    "metadata": {"type": "object", "description": "Optional JSON metadata"},
                    "importance": {"type": "number", "default": 0.5, "minimum": 0.0, "maximum": 1.0},
                },
                "required": ["content"],
            }),
        },
        ToolDef {
            name: "search_memory",
            description: "Search an agent's memories by lexical match, ordered by importance.",
            input_schema: json!({
                "type": "object",
                "properties": {
                    "agent_id": {"type": "string"},
                    "query": {"type": "string", "description": "Search text; tokens shorter than 3 characters are ignored"},
                    "top_k": {"type": "integer", "default": 10},
                    "memory_type": {"type": "string", "description": "Restrict to one kind"},
                    "min_importance": {"type": "number", "description": "Lower bound on importance"},
                },
                "required": ["query"],
            }),
        },
        ToolDef {
            name: "delete_memory",
            description: "Delete a memory by ID. Reports whether it existed.",
            input_schema: json!({
                "type": "object",
                "properties": {
                    "memory_id": {"type": "string"},
                },
                "required": ["memory_id"],
            }),
        },
        ToolDef {
            name: "get_state",
            description: "Get a keyed state value for an agent.",
            input_schema: json!({
                "type": "object",
                "properties": {
                    "agent_id": {"type": "string"},
                    "key": {"type": "string"},
                },
                "required": ["key"],
            }),
        },
        ToolDef {
            name: "set_state",
            description: "Set a keyed state value for an agent (upsert with version bump).",
            input_schema: json!({
                "type": "object",
                "properties": {
                    "agent_id": {"type": "string"},
                    "key": {"type": "string"},
                    "value": {"description": "Any JSON value"},
                },
                "required": ["key", "value"],
            }),
        },
        // ── Chain-of-thought ledger ─────────────────────────────────
        ToolDef {
            name: "log_reasoning_step",
            description: "Append a reasoning step to a session's tamper-evident hash chain.",
            input_schema: json!({
                "type": "object",
                "properties": {
                    "agent_id": {"type": "string"},
                    "session_id": {"type": "string"},
                    "step_type": {"type": "string",
                                  "enum": ["observation", "hypothesis", "analysis", "decision",
                                           "action", "reflection", "planning", "evaluation",
                                           "retrieval", "synthesis", "delegation", "error"]},
                    "content": {"type": "string"},
                    "metadata": {"type": "object"},
                    "importance": {"type": "number", "default": 0.5},
                },
                "required": ["session_id", "step_type", "content"],
            }),
        },
        ToolDef {
            name: "replay_session",
            description: "Replay a session's reasoning steps in order, optionally verifying \
                          the hash chain.",
            input_schema: json!({
                "type": "object",
                "properties": {
                    "session_id": {"type": "string"},
                    "verify_chain": {"type": "boolean", "default": false},
                },
                "required": ["session_id"],
            }),
        },
        ToolDef {
            name: "list_sessions",
            description: "List reasoning sessions with step counts, newest first.",
            input_schema: json!({
                "type": "object",
                "properties": {
                    "agent_id": {"type": "string", "description": "Restrict to one agent"},
                    "limit": {"type": "integer", "default": 50},
                    "since": {"type": "string", "description": "ISO timestamp lower bound"},
                },
            }),
        },
        // ── Semantic triggers ───────────────────────────────────────
        ToolDef {
            name: "register_trigger",
            description: "Register a concept-matching trigger. Returns the trigger ID.",
            input_schema: json!({
                "type": "object",
                "properties": {
                    "name": {"type": "string"},
                    "concept": {"type": "string", "description": "Concept phrase to match against content"},
                    "threshold": {"type": "number", "default": 0.7, "minimum": 0.0, "maximum": 1.0},
                    "action_type": {"type": "string", "default": "flag_for_review",
                                    "enum": ["flag_for_review", "webhook", "agent_notify", "write_event"]},
                    "action_config": {"type": "object"},
                },
                "required": ["name", "concept"],
            }),
        },
        ToolDef {
            name: "list_triggers",
            description: "List registered triggers, newest first.",
            input_schema: json!({
                "type": "object",
                "properties": {
                    "status": {"type": "string", "description": "active or inactive; anything else lists all"},
                },
            }),
        },
        ToolDef {
            name: "delete_trigger",
            description: "Disable a trigger (soft delete). Reports whether it existed.",
            input_schema: json!({
                "type": "object",
                "properties": {
                    "trigger_id": {"type": "string"},
                },
                "required": ["trigger_id"],
            }),
        },
        ToolDef {
            name: "test_trigger",
            description: "Evaluate a trigger's concept against sample content without firing it.",
            input_schema: json!({
                "type": "object",
                "properties": {
                    "trigger_id": {"type": "string"},
                    "content": {"type": "string"},
                },
                "required": ["trigger_id", "content"],
            }),
        },
        // ── Data branches ───────────────────────────────────────────
        ToolDef {
            name: "branch_create",
            description: "Create a copy-on-write branch of the main schema. ttl_seconds is \
                          informational; the engine does not schedule expiry.",
            input_schema: json!({
                "type": "object",
                "properties": {
                    "name": {"type": "string"},
                    "description": {"type": "string"},
                    "ttl_seconds": {"type": "integer", "default": 3600},
                },
            }),
        },
        ToolDef {
            name: "branch_query",
            description: "Execute SQL inside a branch; branch tables shadow main.",
            input_schema: json!({
                "type": "object",
                "properties": {
                    "branch_id": {"type": "string"},
                    "sql": {"type": "string"},
                },
                "required": ["branch_id", "sql"],
            }),
        },
        ToolDef {
            name: "branch_merge",
            description: "Merge a branch's materialized tables back into main and drop the \
                          branch.",
            input_schema: json!({
                "type": "object",
                "properties": {
                    "branch_id": {"type": "string"},
                    "strategy": {"type": "string", "default": "branch_wins",
                                 "enum": ["branch_wins", "main_wins"]},
                },
                "required": ["branch_id"],
            }),
        },
        ToolDef {
            name: "branch_discard",
            description: "Drop a branch without merging. Reports whether it existed.",
            input_schema: json!({
                "type": "object",
                "properties": {
                    "branch_id": {"type": "string"},
                },
                "required": ["branch_id"],
            }),
        },
        ToolDef {
            name: "branch_list",
            description: "List branches with materialized-table and view counts.",
            input_schema: json!({
                "type": "object",
                "properties": {
                    "status": {"type": "string"},
                },
            }),
        },
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn catalog_has_23_unique_tools() {
        let tools = catalog();
        assert_eq!(tools.len(), 23);

        let names: HashSet<&str> = tools.iter().map(|t| t.name).collect();
        assert_eq!(names.len(), 23);
    }

    #[test]
    fn every_tool_serializes_with_input_schema() {
        for tool in catalog() {
            let v = serde_json::to_value(&tool).unwrap();
            assert!(v["inputSchema"]["type"] == "object", "tool {}", tool.name);
            assert!(!v["name"].as_str().unwrap().is_empty());
            assert!(!v["description"].as_str().unwrap().is_empty());
        }
    }

    #[test]
    fn required_fields_are_declared() {
        let tools = catalog();
        let find = |name: &str| tools.iter().find(|t| t.name == name).unwrap();

        assert_eq!(
            find("query").input_schema["required"],
            serde_json::json!(["sql"])
        );
        assert_eq!(
            find("log_reasoning_step").input_schema["required"],
            serde_json::json!(["session_id", "step_type", "content"])
        );
        assert_eq!(
            find("branch_merge").input_schema["required"],
            serde_json::json!(["branch_id"])
        );
    }
}
