//! The three event classes carried by the hook bus.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use tarsy_core::alert::TokenUsage;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "event")]
pub enum InteractionEvent {
    Llm(LlmInteractionEvent),
    Mcp(McpInteractionEvent),
    Lifecycle(SessionLifecycleEvent),
}

impl InteractionEvent {
    pub fn session_id(&self) -> &str {
        match self {
            Self::Llm(e) => &e.session_id,
            Self::Mcp(e) => &e.session_id,
            Self::Lifecycle(e) => &e.session_id,
        }
    }

    pub fn ts_us(&self) -> i64 {
        match self {
            Self::Llm(e) => e.ts_us,
            Self::Mcp(e) => e.ts_us,
            Self::Lifecycle(e) => e.ts_us,
        }
    }
}

/// One LLM round-trip: the full request messages and either the response
/// text or the error.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmInteractionEvent {
    pub session_id: String,
    pub stage_execution_id: Option<String>,
    pub ts_us: i64,
    pub model: String,
    pub messages: Value,
    pub response: Option<String>,
    pub token_usage: Option<TokenUsage>,
    pub duration_ms: i64,
    pub error: Option<String>,
}

/// One MCP tool invocation with its structured result or error.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct McpInteractionEvent {
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

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleEventKind {
    SessionStarted,
    StageStarted,
    StageCompleted,
    StageFailed,
    RunbookFetchFailed,
    SessionFinalized,
}

impl LifecycleEventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::SessionStarted => "session_started",
            Self::StageStarted => "stage_started",
            Self::StageCompleted => "stage_completed",
            Self::StageFailed => "stage_failed",
            Self::RunbookFetchFailed => "runbook_fetch_failed",
            Self::SessionFinalized => "session_finalized",
        }
    }
}

/// A state-machine transition worth keeping in the audit trail.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionLifecycleEvent {
    pub session_id: String,
    pub stage_execution_id: Option<String>,
    pub ts_us: i64,
    pub kind: LifecycleEventKind,
    pub detail: Option<String>,
}
