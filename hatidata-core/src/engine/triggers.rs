//! Trigger registry: concept-matching rules with a soft-delete lifecycle

use super::schema::SchemaKind;
use super::LocalEngine;
use crate::error::{Error, Result};
use crate::types::{utc_now_iso, ActionType, Trigger, TriggerMatch};
use duckdb::{params, OptionalExt, Row};
use serde_json::Value as JsonValue;
use uuid::Uuid;

const TRIGGER_COLUMNS: &str = "trigger_id, name, concept, threshold, action_type, \
                               action_config, enabled, cooldown_ms, fire_count, \
                               last_fired_at, created_at, updated_at";

/// Fraction of the concept's significant tokens found in the content.
///
/// Tokens are lowercased whitespace words longer than two characters,
/// matched as substrings of the lowercased content. A concept with no
/// significant tokens scores 0.
pub fn concept_score(concept: &str, content: &str) -> f64 {
    let content_lower = content.to_lowercase();
    let words: Vec<String> = concept
        .to_lowercase()
        .split_whitespace()
        .filter(|w| w.len() > 2)
        .map(|w| w.to_string())
        .collect();
    let matched = words.iter().filter(|w| content_lower.contains(w.as_str())).count();
    matched as f64 / words.len().max(1) as f64
}

/// Round a score to four decimal places for presentation.
pub fn round_score(score: f64) -> f64 {
    (score * 10_000.0).round() / 10_000.0
}

impl LocalEngine {
    /// Register a concept-matching rule and return its ID.
    pub fn register_trigger(
        &self,
        name: &str,
        concept: &str,
        threshold: f64,
        action_type: ActionType,
        action_config: Option<&JsonValue>,
    ) -> Result<String> {
        self.ensure_schema(SchemaKind::Triggers)?;

        let trigger_id = Uuid::new_v4().simple().to_string();
        let config_json = action_config
            .map(|c| c.to_string())
            .unwrap_or_else(|| "{}".to_string());
        let now = utc_now_iso();

        let conn = self.conn();
        conn.execute(
            "INSERT INTO _triggers.trigger_registry \
             (trigger_id, name, concept, threshold, action_type, action_config, \
              created_at, updated_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8)",
            params![
                trigger_id,
                name,
                concept,
                threshold,
                action_type.as_str(),
                config_json,
                now,
                now
            ],
        )?;

        tracing::debug!(trigger_id = %trigger_id, name, "Registered trigger");
        Ok(trigger_id)
    }

    /// List triggers, newest first.
    ///
    /// `status = "active"` keeps enabled triggers, `"inactive"` disabled
    /// ones; any other value applies no filter.
    pub fn list_triggers(&self, status: Option<&str>) -> Result<Vec<Trigger>> {
        self.ensure_schema(SchemaKind::Triggers)?;

        let where_clause = match status {
            Some("active") => "WHERE enabled = TRUE ",
            Some("inactive") => "WHERE enabled = FALSE ",
            _ => "",
        };
        let sql = format!(
            "SELECT {} FROM _triggers.trigger_registry {}ORDER BY created_at DESC",
            TRIGGER_COLUMNS, where_clause
        );

        let conn = self.conn();
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map([], row_to_trigger)?;
        rows.collect::<duckdb::Result<Vec<_>>>().map_err(Error::from)
    }

    /// Soft-delete a trigger. Returns true iff a matching row was found.
    ///
    /// The row is never hard-removed; it flips to disabled and keeps its
    /// history.
    pub fn delete_trigger(&self, trigger_id: &str) -> Result<bool> {
        self.ensure_schema(SchemaKind::Triggers)?;

        let conn = self.conn();
        let exists: Option<String> = conn
            .query_row(
                "SELECT trigger_id FROM _triggers.trigger_registry WHERE trigger_id = $1",
                params![trigger_id],
                |r| r.get(0),
            )
            .optional()?;
        if exists.is_none() {
            return Ok(false);
        }

        conn.execute(
            "UPDATE _triggers.trigger_registry \
             SET enabled = FALSE, updated_at = $1 WHERE trigger_id = $2",
            params![utc_now_iso(), trigger_id],
        )?;
        Ok(true)
    }

    /// Evaluate a trigger's concept against content.
    ///
    /// Returns None when the trigger does not exist; absence is a data
    /// result for this operation, not an error.
    pub fn test_trigger(&self, trigger_id: &str, content: &str) -> Result<Option<TriggerMatch>> {
        self.ensure_schema(SchemaKind::Triggers)?;

        let trigger = {
            let conn = self.conn();
            conn.query_row(
                &format!(
                    "SELECT {} FROM _triggers.trigger_registry WHERE trigger_id = $1",
                    TRIGGER_COLUMNS
                ),
                params![trigger_id],
                row_to_trigger,
            )
            .optional()?
        };

        let Some(trigger) = trigger else {
            return Ok(None);
        };

        let score = concept_score(&trigger.concept, content);
        Ok(Some(TriggerMatch {
            matched: score >= trigger.threshold,
            score: round_score(score),
            threshold: trigger.threshold,
            trigger_name: trigger.name,
            concept: trigger.concept,
        }))
    }
}

fn row_to_trigger(row: &Row<'_>) -> duckdb::Result<Trigger> {
    Ok(Trigger {
        trigger_id: row.get(0)?,
        name: row.get(1)?,
        concept: row.get(2)?,
        threshold: row.get(3)?,
        action_type: row.get(4)?,
        action_config: row.get(5)?,
        enabled: row.get(6)?,
        cooldown_ms: row.get(7)?,
        fire_count: row.get(8)?,
        last_fired_at: row.get(9)?,
        created_at: row.get(10)?,
        updated_at: row.get(11)?,
    })
}
