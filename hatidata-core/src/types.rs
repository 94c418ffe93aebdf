//! Core domain types for the agent-state engine
//!
//! These types mirror the persisted table shapes exactly: serde field names
//! equal column names, and timestamps stay in their stored ISO-8601 string
//! form, so a typed row serializes to the same JSON a raw catalog query
//! would produce.

use chrono::Utc;
use serde::{Deserialize, Serialize};

/// Format used for every engine-assigned timestamp.
const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%SZ";

/// Current UTC time in the engine's ISO-8601 storage format.
pub fn utc_now_iso() -> String {
    Utc::now().format(TIMESTAMP_FORMAT).to_string()
}

// ============================================
// Reasoning steps
// ============================================

/// Kind of reasoning step recorded in the chain-of-thought ledger
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepType {
    Observation,
    Hypothesis,
    Analysis,
    Decision,
    Action,
    Reflection,
    Planning,
    Evaluation,
    Retrieval,
    Synthesis,
    Delegation,
    Error,
}

impl StepType {
    /// Identifier used in database storage and hash input
    pub fn as_str(&self) -> &'static str {
        match self {
            StepType::Observation => "observation",
            StepType::Hypothesis => "hypothesis",
            StepType::Analysis => "analysis",
            StepType::Decision => "decision",
            StepType::Action => "action",
            StepType::Reflection => "reflection",
            StepType::Planning => "planning",
            StepType::Evaluation => "evaluation",
            StepType::Retrieval => "retrieval",
            StepType::Synthesis => "synthesis",
            StepType::Delegation => "delegation",
            StepType::Error => "error",
        }
    }
}

impl std::str::FromStr for StepType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "observation" => Ok(StepType::Observation),
            "hypothesis" => Ok(StepType::Hypothesis),
            "analysis" => Ok(StepType::Analysis),
            "decision" => Ok(StepType::Decision),
            "action" => Ok(StepType::Action),
            "reflection" => Ok(StepType::Reflection),
            "planning" => Ok(StepType::Planning),
            "evaluation" => Ok(StepType::Evaluation),
            "retrieval" => Ok(StepType::Retrieval),
            "synthesis" => Ok(StepType::Synthesis),
            "delegation" => Ok(StepType::Delegation),
            "error" => Ok(StepType::Error),
            _ => Err(format!("unknown step type: {}", s)),
        }
    }
}

impl std::fmt::Display for StepType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ============================================
// Triggers
// ============================================

/// Action performed when a trigger fires
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionType {
    FlagForReview,
    Webhook,
    AgentNotify,
    WriteEvent,
}

impl ActionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActionType::FlagForReview => "flag_for_review",
            ActionType::Webhook => "webhook",
            ActionType::AgentNotify => "agent_notify",
            ActionType::WriteEvent => "write_event",
        }
    }
}

impl std::str::FromStr for ActionType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "flag_for_review" => Ok(ActionType::FlagForReview),
            "webhook" => Ok(ActionType::Webhook),
            "agent_notify" => Ok(ActionType::AgentNotify),
            "write_event" => Ok(ActionType::WriteEvent),
            _ => Err(format!("unknown action type: {}", s)),
        }
    }
}

impl std::fmt::Display for ActionType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ============================================
// Branch merge
// ============================================

/// How a branch merge resolves conflicts with main
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MergeStrategy {
    BranchWins,
    MainWins,
}

impl MergeStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            MergeStrategy::BranchWins => "branch_wins",
            MergeStrategy::MainWins => "main_wins",
        }
    }
}

impl std::str::FromStr for MergeStrategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "branch_wins" => Ok(MergeStrategy::BranchWins),
            "main_wins" => Ok(MergeStrategy::MainWins),
            _ => Err(format!("unknown merge strategy: {}", s)),
        }
    }
}

// ============================================
// Row types
// ============================================

/// A durable note owned by an agent
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentMemory {
    pub memory_id: String,
    pub agent_id: String,
    pub content: String,
    /// Open-ended kind tag (fact, observation, preference, ...)
    pub memory_type: String,
    pub importance: f64,
    /// JSON-encoded map, stored verbatim
    pub metadata: Option<String>,
    pub created_at: String,
    pub last_accessed_at: String,
}

/// One step in a hash-chained reasoning session
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReasoningTrace {
    pub trace_id: String,
    pub session_id: String,
    pub agent_id: String,
    pub step_number: i64,
    pub step_type: String,
    pub content: String,
    pub importance: f64,
    pub metadata: Option<String>,
    /// Hex SHA-256 of the predecessor, empty for step 0
    pub prev_hash: String,
    pub hash: String,
    pub created_at: String,
}

/// A registered concept-matching rule
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Trigger {
    pub trigger_id: String,
    pub name: String,
    pub concept: String,
    pub threshold: f64,
    pub action_type: String,
    pub action_config: String,
    pub enabled: bool,
    pub cooldown_ms: i64,
    pub fire_count: i64,
    pub last_fired_at: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

// ============================================
// Result shapes
// ============================================

/// Result of replaying a reasoning session
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplayResult {
    pub session_id: String,
    pub steps: Vec<ReasoningTrace>,
    pub step_count: usize,
    /// Present only when chain verification was requested
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chain_valid: Option<bool>,
}

/// Aggregated view of one reasoning session
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionSummary {
    pub session_id: String,
    pub agent_id: String,
    pub started_at: String,
    pub last_step_at: String,
    pub step_count: i64,
}

/// Outcome of evaluating a trigger against a piece of content
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TriggerMatch {
    pub matched: bool,
    pub score: f64,
    pub threshold: f64,
    pub trigger_name: String,
    pub concept: String,
}

/// Metadata returned by branch creation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BranchInfo {
    pub branch_id: String,
    pub schema_name: String,
    pub name: String,
    pub description: String,
    pub table_count: usize,
    /// Informational only; expiry is the host's responsibility
    pub ttl_seconds: i64,
    pub created_at: String,
}

/// One entry in a branch listing
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BranchStatus {
    pub branch_id: String,
    pub schema_name: String,
    /// Base tables in the branch schema (copy-on-write materializations)
    pub materialized_tables: i64,
    /// Views still passing through to main
    pub views: i64,
    pub status: String,
}

/// Outcome of merging a branch back into main
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MergeResult {
    pub branch_id: String,
    pub strategy: String,
    pub merged: usize,
    pub status: String,
}
