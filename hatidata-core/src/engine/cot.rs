//! Chain-of-thought ledger: hash-chained, append-only reasoning traces
//!
//! The substrate cannot enforce the chain; every write to
//! `_cot.agent_traces` must go through [`LocalEngine::log_reasoning_step`].

use super::schema::SchemaKind;
use super::LocalEngine;
use crate::backend::SqlParam;
use crate::error::{Error, Result};
use crate::types::{utc_now_iso, ReasoningTrace, ReplayResult, SessionSummary, StepType};
use duckdb::{params, OptionalExt, Row};
use serde_json::Value as JsonValue;
use sha2::{Digest, Sha256};
use uuid::Uuid;

const TRACE_COLUMNS: &str = "trace_id, session_id, agent_id, step_number, step_type, \
                             content, importance, metadata, prev_hash, hash, created_at";

/// Hash of one chain link: SHA-256 over the raw UTF-8 concatenation
/// `prev_hash || session_id || step_type || content`, hex-encoded.
pub fn chain_hash(prev_hash: &str, session_id: &str, step_type: &str, content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(prev_hash.as_bytes());
    hasher.update(session_id.as_bytes());
    hasher.update(step_type.as_bytes());
    hasher.update(content.as_bytes());
    hex::encode(hasher.finalize())
}

/// Walk replayed steps and check both chain invariants: each step's
/// `prev_hash` links to its predecessor, and each `hash` recomputes.
pub fn verify_chain(steps: &[ReasoningTrace]) -> bool {
    for (i, step) in steps.iter().enumerate() {
        let expected_prev = if i > 0 { steps[i - 1].hash.as_str() } else { "" };
        if step.prev_hash != expected_prev {
            return false;
        }
        let expected = chain_hash(&step.prev_hash, &step.session_id, &step.step_type, &step.content);
        if step.hash != expected {
            return false;
        }
    }
    true
}

impl LocalEngine {
    /// Append a reasoning step to a session's hash chain.
    ///
    /// Predecessor read and insert run in one transaction while the
    /// connection lock is held, so in-process appends to the same session
    /// serialize and step numbers stay dense.
    pub fn log_reasoning_step(
        &self,
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
        self.ensure_schema(SchemaKind::Cot)?;

        let trace_id = Uuid::new_v4().simple().to_string();
        let meta_json = metadata.map(|m| m.to_string());
        let now = utc_now_iso();

        let mut conn = self.conn();
        let tx = conn.transaction()?;

        let predecessor: Option<(String, i64)> = tx
            .query_row(
                "SELECT hash, step_number FROM _cot.agent_traces \
                 WHERE session_id = $1 ORDER BY step_number DESC LIMIT 1",
                params![session_id],
                |r| Ok((r.get(0)?, r.get(1)?)),
            )
            .optional()?;

        let (prev_hash, step_number) = match predecessor {
            Some((hash, number)) => (hash, number + 1),
            None => (String::new(), 0),
        };
        let hash = chain_hash(&prev_hash, session_id, step_type.as_str(), content);

        tx.execute(
            "INSERT INTO _cot.agent_traces \
             (trace_id, session_id, agent_id, step_number, step_type, content, \
              importance, metadata, prev_hash, hash, created_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)",
            params![
                trace_id,
                session_id,
                agent_id,
                step_number,
                step_type.as_str(),
                content,
                importance,
                meta_json,
                prev_hash,
                hash,
                now
            ],
        )?;
        tx.commit()?;

        tracing::debug!(
            session_id,
            step_number,
            step_type = step_type.as_str(),
            "Logged reasoning step"
        );
        Ok(trace_id)
    }

    /// Replay all traces of a session in step order.
    ///
    /// A broken chain is a data result (`chain_valid = false`), never an
    /// error; `chain_valid` is absent when verification was not requested.
    pub fn replay_session(&self, session_id: &str, verify: bool) -> Result<ReplayResult> {
        self.ensure_schema(SchemaKind::Cot)?;

        let steps = {
            let conn = self.conn();
            let mut stmt = conn.prepare(&format!(
                "SELECT {} FROM _cot.agent_traces \
                 WHERE session_id = $1 ORDER BY step_number ASC",
                TRACE_COLUMNS
            ))?;
            let rows = stmt.query_map(params![session_id], row_to_trace)?;
            rows.collect::<duckdb::Result<Vec<_>>>()?
        };

        let chain_valid = match (verify, steps.is_empty()) {
            (false, _) | (true, true) => None,
            (true, false) => Some(verify_chain(&steps)),
        };

        Ok(ReplayResult {
            session_id: session_id.to_string(),
            step_count: steps.len(),
            steps,
            chain_valid,
        })
    }

    /// List distinct sessions with aggregate metadata, newest first.
    pub fn list_sessions(
        &self,
        agent_id: Option<&str>,
        limit: i64,
        since: Option<&str>,
    ) -> Result<Vec<SessionSummary>> {
        self.ensure_schema(SchemaKind::Cot)?;

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

        let sql = format!(
            "SELECT session_id, agent_id, MIN(created_at) AS started_at, \
             MAX(created_at) AS last_step_at, COUNT(*) AS step_count \
             FROM _cot.agent_traces {}\
             GROUP BY session_id, agent_id \
             ORDER BY started_at DESC LIMIT {}",
            where_clause,
            limit.max(0)
        );

        let conn = self.conn();
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(duckdb::params_from_iter(params.iter()), |row| {
            Ok(SessionSummary {
                session_id: row.get(0)?,
                agent_id: row.get(1)?,
                started_at: row.get(2)?,
                last_step_at: row.get(3)?,
                step_count: row.get(4)?,
            })
        })?;
        rows.collect::<duckdb::Result<Vec<_>>>().map_err(Error::from)
    }
}

fn row_to_trace(row: &Row<'_>) -> duckdb::Result<ReasoningTrace> {
    Ok(ReasoningTrace {
        trace_id: row.get(0)?,
        session_id: row.get(1)?,
        agent_id: row.get(2)?,
        step_number: row.get(3)?,
        step_type: row.get(4)?,
        content: row.get(5)?,
        importance: row.get(6)?,
        metadata: row.get(7)?,
        prev_hash: row.get(8)?,
        hash: row.get(9)?,
        created_at: row.get(10)?,
    })
}
