//! Persisted row types and query parameter types for the audit trail.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use tarsy_core::error::AuditError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Pending,
    Processing,
    Completed,
    Partial,
    Failed,
}

impl SessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Partial => "partial",
            Self::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Result<Self, AuditError> {
        match s {
            "pending" => Ok(Self::Pending),
            "processing" => Ok(Self::Processing),
            "completed" => Ok(Self::Completed),
            "partial" => Ok(Self::Partial),
            "failed" => Ok(Self::Failed),
            other => Err(AuditError::Database(format!(
                "unknown session status '{other}'"
            ))),
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Partial | Self::Failed)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageStatus {
    Pending,
    Active,
    Completed,
    Failed,
}

impl StageStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Active => "active",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Result<Self, AuditError> {
        match s {
            "pending" => Ok(Self::Pending),
            "active" => Ok(Self::Active),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            other => Err(AuditError::Database(format!(
                "unknown stage status '{other}'"
            ))),
        }
    }
}

/// One alert processing session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlertSession {
    pub session_id: String,
    pub alert_id: String,
    pub alert_type: String,
    /// Empty when chain resolution failed before a chain was known.
    pub chain_id: String,
    /// Snapshot of the chain definition as resolved at submit time.
    pub chain_definition: Option<Value>,
    pub alert_data: Value,
    pub status: SessionStatus,
    pub current_stage_index: Option<i64>,
    pub current_stage_id: Option<String>,
    pub started_at_us: i64,
    pub completed_at_us: Option<i64>,
    pub final_analysis: Option<String>,
    pub error_message: Option<String>,
}

impl AlertSession {
    pub fn new(
        session_id: impl Into<String>,
        alert_id: impl Into<String>,
        alert_type: impl Into<String>,
        chain_id: impl Into<String>,
        chain_definition: Option<Value>,
        alert_data: Value,
        started_at_us: i64,
    ) -> Self {
        Self {
            session_id: session_id.into(),
            alert_id: alert_id.into(),
            alert_type: alert_type.into(),
            chain_id: chain_id.into(),
            chain_definition,
            alert_data,
            status: SessionStatus::Pending,
            current_stage_index: None,
            current_stage_id: None,
            started_at_us,
            completed_at_us: None,
            final_analysis: None,
            error_message: None,
        }
    }
}

/// One stage execution within a session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageExecution {
    pub execution_id: String,
    pub session_id: String,
    pub stage_id: String,
    pub stage_index: i64,
    pub agent_id: String,
    pub status: StageStatus,
    pub started_at_us: i64,
    pub completed_at_us: Option<i64>,
    pub duration_ms: Option<i64>,
    pub stage_output: Option<Value>,
    pub error_message: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmInteractionRecord {
    pub id: i64,
    pub session_id: String,
    pub stage_execution_id: Option<String>,
    pub ts_us: i64,
    pub model: String,
    pub messages: Value,
    pub response: Option<String>,
    pub token_usage: Option<Value>,
    pub duration_ms: i64,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct McpInteractionRecord {
    pub id: i64,
    pub session_id: String,
    pub stage_execution_id: Option<String>,
    pub ts_us: i64,
    pub server_id: String,
    pub tool_name: String,
    pub arguments: Value,
    pub result: Option<Value>,
    pub duration_ms: i64,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LifecycleRecord {
    pub id: i64,
    pub session_id: String,
    pub stage_execution_id: Option<String>,
    pub ts_us: i64,
    pub kind: String,
    pub detail: Option<String>,
}

/// Filter for session listing. All conditions are conjunctive.
#[derive(Debug, Clone, Default)]
pub struct SessionFilter {
    pub status: Option<SessionStatus>,
    pub alert_type: Option<String>,
    pub chain_id: Option<String>,
    /// Inclusive `started_at_us` range.
    pub started_between: Option<(i64, i64)>,
}

/// One page of sessions, newest first.
#[derive(Debug, Clone, Serialize)]
pub struct SessionPage {
    pub sessions: Vec<AlertSession>,
    pub page: u32,
    pub size: u32,
    pub total: i64,
}

/// One timeline entry: an interaction or a lifecycle transition.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum TimelineEntry {
    Llm(LlmInteractionRecord),
    Mcp(McpInteractionRecord),
    Lifecycle(LifecycleRecord),
}

impl TimelineEntry {
    pub fn ts_us(&self) -> i64 {
        match self {
            Self::Llm(r) => r.ts_us,
            Self::Mcp(r) => r.ts_us,
            Self::Lifecycle(r) => r.ts_us,
        }
    }

    pub fn insertion_id(&self) -> i64 {
        match self {
            Self::Llm(r) => r.id,
            Self::Mcp(r) => r.id,
            Self::Lifecycle(r) => r.id,
        }
    }
}

/// A session with its stages and the chronologically merged interaction
/// timeline.
#[derive(Debug, Clone, Serialize)]
pub struct SessionTimeline {
    pub session: AlertSession,
    pub stages: Vec<StageExecution>,
    pub entries: Vec<TimelineEntry>,
}
