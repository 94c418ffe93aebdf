//! End-to-end engine scenarios across components.

use hatidata_core::backend::{Backend, SqlBackend};
use hatidata_core::dispatcher::Dispatcher;
use hatidata_core::engine::LocalEngine;
use hatidata_core::types::{MergeStrategy, StepType};
use serde_json::{json, Value};

fn engine() -> LocalEngine {
    LocalEngine::open_in_memory().unwrap()
}

#[test]
fn memory_round_trip() {
    let engine = engine();
    let id = engine
        .store_memory("a1", "User prefers dark mode", "preference", Some(&json!({})), 0.8)
        .unwrap();

    let hits = engine.search_memory("a1", "dark", 5, None, None).unwrap();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].memory_id, id);
    assert_eq!(hits[0].content, "User prefers dark mode");
}

#[test]
fn state_upsert_bumps_version() {
    let engine = engine();
    engine.set_state("a1", "k", &json!({"x": 1})).unwrap();
    engine.set_state("a1", "k", &json!({"x": 2})).unwrap();

    assert_eq!(engine.get_state("a1", "k").unwrap(), Some(json!({"x": 2})));

    let rows = engine
        .query(
            "SELECT version FROM _memory.agent_state WHERE agent_id = $1 AND key = $2",
            &["a1".into(), "k".into()],
        )
        .unwrap();
    assert_eq!(rows[0]["version"], Value::from(2));
}

#[test]
fn cot_chain_detects_tampering() {
    let engine = engine();
    engine
        .log_reasoning_step("a1", "S", StepType::Observation, "hello", None, 0.5)
        .unwrap();
    engine
        .log_reasoning_step("a1", "S", StepType::Decision, "act", None, 0.5)
        .unwrap();
    engine
        .log_reasoning_step("a1", "S", StepType::Reflection, "done", None, 0.5)
        .unwrap();

    assert_eq!(engine.replay_session("S", true).unwrap().chain_valid, Some(true));

    // Overwrite step 1's content directly in storage.
    engine
        .execute(
            "UPDATE _cot.agent_traces SET content = 'act!' \
             WHERE session_id = 'S' AND step_number = 1",
            &[],
        )
        .unwrap();

    assert_eq!(engine.replay_session("S", true).unwrap().chain_valid, Some(false));
}

#[test]
fn trigger_scoring_uses_exact_token_arithmetic() {
    let engine = engine();
    let id = engine
        .register_trigger(
            "pii",
            "personal data exposure",
            0.5,
            hatidata_core::types::ActionType::FlagForReview,
            Some(&json!({})),
        )
        .unwrap();

    // Tokens: personal, data, exposure. Two of three match.
    let partial = engine
        .test_trigger(&id, "Contains personal exposure details")
        .unwrap()
        .unwrap();
    assert!(partial.matched);
    assert_eq!(partial.score, 0.6667);

    // All three match.
    let full = engine
        .test_trigger(&id, "personal data exposure found")
        .unwrap()
        .unwrap();
    assert_eq!(full.score, 1.0);
}

#[test]
fn branch_merge_scenario() {
    let engine = engine();
    engine.execute("CREATE TABLE t (id INTEGER)", &[]).unwrap();
    engine.execute("INSERT INTO t VALUES (1), (2)", &[]).unwrap();

    let info = engine.branch_create(None, None, 3600).unwrap();

    engine
        .branch_query(
            &info.branch_id,
            "CREATE TABLE t AS SELECT * FROM main.t; INSERT INTO t VALUES (3);",
        )
        .unwrap();

    let in_branch = engine
        .branch_query(&info.branch_id, "SELECT count(*) AS c FROM t")
        .unwrap();
    assert_eq!(in_branch[0]["c"], Value::from(3));

    let in_main = engine.query("SELECT count(*) AS c FROM main.t", &[]).unwrap();
    assert_eq!(in_main[0]["c"], Value::from(2));

    engine
        .branch_merge(&info.branch_id, MergeStrategy::BranchWins)
        .unwrap();

    let after = engine.query("SELECT count(*) AS c FROM main.t", &[]).unwrap();
    assert_eq!(after[0]["c"], Value::from(3));

    let schemas = engine
        .query(
            "SELECT schema_name FROM information_schema.schemata WHERE schema_name = $1",
            &[info.schema_name.as_str().into()],
        )
        .unwrap();
    assert!(schemas.is_empty());
}

#[test]
fn branch_create_then_discard_restores_the_catalog() {
    let engine = engine();
    engine.execute("CREATE TABLE t (id INTEGER)", &[]).unwrap();

    let before = engine
        .query("SELECT schema_name FROM information_schema.schemata ORDER BY schema_name", &[])
        .unwrap();

    let info = engine.branch_create(None, None, 3600).unwrap();
    assert!(engine.branch_discard(&info.branch_id).unwrap());

    let after = engine
        .query("SELECT schema_name FROM information_schema.schemata ORDER BY schema_name", &[])
        .unwrap();
    assert_eq!(before, after);
}

#[test]
fn read_only_guard_rejects_mutations() {
    let engine = engine();
    engine.execute("CREATE TABLE t (id INTEGER)", &[]).unwrap();

    let dispatcher = Dispatcher::new(Backend::Local(engine), "mcp-agent");
    let result = dispatcher.call("read_query", &json!({"sql": "DROP TABLE t"}));
    assert!(result.is_error);

    let check = dispatcher.call("query", &json!({"sql": "SELECT count(*) AS c FROM t"}));
    assert!(!check.is_error);
}

#[test]
fn state_survives_reopen_on_disk() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("local.duckdb");

    {
        let engine = LocalEngine::open(&path).unwrap();
        engine.store_memory("a1", "persisted fact", "fact", None, 0.9).unwrap();
        engine
            .log_reasoning_step("a1", "S", StepType::Observation, "first", None, 0.5)
            .unwrap();
    }

    let engine = LocalEngine::open(&path).unwrap();
    let hits = engine.search_memory("a1", "persisted", 5, None, None).unwrap();
    assert_eq!(hits.len(), 1);

    // The chain continues across processes: predecessor comes from disk.
    engine
        .log_reasoning_step("a1", "S", StepType::Decision, "second", None, 0.5)
        .unwrap();
    let replay = engine.replay_session("S", true).unwrap();
    assert_eq!(replay.step_count, 2);
    assert_eq!(replay.chain_valid, Some(true));
    assert_eq!(replay.steps[1].step_number, 1);
}

#[test]
fn full_agent_session_through_the_dispatcher() {
    let dispatcher = Dispatcher::new(Backend::Local(engine()), "agent-007");

    let text = |r: &hatidata_core::ToolResult| -> Value {
        serde_json::from_str(&r.content[0].text).unwrap()
    };

    // An agent records an observation, stores what it learned, and sets
    // checkpoint state; everything is retrievable afterwards.
    let r = dispatcher.call(
        "log_reasoning_step",
        &json!({"session_id": "job-1", "step_type": "observation",
                "content": "metrics dashboard shows latency spike"}),
    );
    assert!(!r.is_error);

    let r = dispatcher.call(
        "store_memory",
        &json!({"content": "latency spikes correlate with cache flushes",
                "memory_type": "observation", "importance": 0.9}),
    );
    assert!(!r.is_error);

    dispatcher.call(
        "set_state",
        &json!({"key": "job-1/progress", "value": {"phase": "diagnosed"}}),
    );

    let sessions = text(&dispatcher.call("list_sessions", &json!({"agent_id": "agent-007"})));
    assert_eq!(sessions.as_array().unwrap().len(), 1);
    assert_eq!(sessions[0]["agent_id"], "agent-007");

    let found = text(&dispatcher.call("search_memory", &json!({"query": "latency"})));
    assert_eq!(found.as_array().unwrap().len(), 1);

    let state = text(&dispatcher.call("get_state", &json!({"key": "job-1/progress"})));
    assert_eq!(state["value"]["phase"], "diagnosed");
}
