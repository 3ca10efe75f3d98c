use crate::chain::IterationStrategy;

#[derive(Debug, thiserror::Error)]
pub enum TarsyError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("LLM error: {0}")]
    Llm(#[from] LlmError),

    #[error("tool error: {0}")]
    Tool(#[from] ToolError),

    #[error("processing error: {0}")]
    Processing(#[from] ProcessingError),

    #[error("audit store error: {0}")]
    Audit(#[from] AuditError),
}

impl TarsyError {
    /// Whether the pipeline may continue past this error. Non-recoverable
    /// errors terminate the stage (or the whole session for orchestrator
    /// errors); recoverable ones are absorbed where they occur.
    pub fn recoverable(&self) -> bool {
        match self {
            Self::Config(_) => false,
            Self::Llm(_) => true,
            Self::Tool(_) => true,
            Self::Processing(e) => e.recoverable(),
            Self::Audit(_) => false,
        }
    }
}

/// Startup-time configuration failures. The process refuses to start on any
/// of these.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("duplicate chain id '{chain_id}' across configuration sources")]
    DuplicateChainId { chain_id: String },

    #[error("alert type '{alert_type}' is claimed by both chain '{first}' and chain '{second}'")]
    AlertTypeConflict {
        alert_type: String,
        first: String,
        second: String,
    },

    #[error("duplicate agent id '{agent_id}' across configuration sources")]
    DuplicateAgentId { agent_id: String },

    #[error("stage '{stage}' of chain '{chain_id}' references unknown agent '{agent_id}'")]
    UnknownStageAgent {
        chain_id: String,
        stage: String,
        agent_id: String,
    },

    #[error("agent '{agent_id}' references MCP server '{server_id}' which is {reason}")]
    BadMcpServerReference {
        agent_id: String,
        server_id: String,
        reason: String,
    },

    #[error("{0}")]
    Invalid(String),
}

#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    #[error("provider error: {0}")]
    Provider(String),

    #[error("provider returned an empty completion")]
    EmptyCompletion,

    #[error("LLM call timed out after {seconds}s")]
    Timeout { seconds: u64 },
}

#[derive(Debug, thiserror::Error)]
pub enum ToolError {
    #[error("tool '{tool}' is not available on server '{server}' (available: {available:?})")]
    ToolNotAvailable {
        server: String,
        tool: String,
        available: Vec<String>,
    },

    #[error("MCP server '{server_id}' is not configured")]
    ServerNotFound { server_id: String },

    #[error("MCP server '{server_id}' is disabled")]
    ServerDisabled { server_id: String },

    #[error("tool '{tool}' on server '{server_id}' failed: {message}")]
    CallFailed {
        server_id: String,
        tool: String,
        message: String,
    },

    #[error("MCP call timed out after {seconds}s")]
    Timeout { seconds: u64 },
}

/// Errors raised while driving an alert through its chain.
#[derive(Debug, thiserror::Error)]
pub enum ProcessingError {
    #[error("unknown alert type '{alert_type}'; known types: {known}")]
    UnknownAlertType { alert_type: String, known: String },

    #[error("alert with key '{key}' is already being processed")]
    DuplicateAlert { key: String },

    #[error("runbook fetch failed for {url}: {reason}")]
    RunbookFetch { url: String, reason: String },

    #[error("iteration budget exhausted after {iterations} iterations ({strategy})")]
    IterationBudgetExhausted {
        iterations: u32,
        strategy: IterationStrategy,
    },

    #[error("unparseable response after {attempts} correction attempts")]
    UnparseableResponse { attempts: u32 },

    #[error("stage agent error: {0}")]
    StageAgent(String),

    #[error("cancelled")]
    Cancelled,
}

impl ProcessingError {
    pub fn recoverable(&self) -> bool {
        matches!(self, Self::RunbookFetch { .. })
    }
}

#[derive(Debug, thiserror::Error)]
pub enum AuditError {
    #[error("database error: {0}")]
    Database(String),

    #[error("database schema version {found} is newer than supported version {supported}")]
    UnknownSchemaVersion { found: i64, supported: i64 },

    #[error("invalid terminal state: {0}")]
    InvalidTerminalState(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recoverability_follows_the_taxonomy() {
        let unknown = TarsyError::Processing(ProcessingError::UnknownAlertType {
            alert_type: "mars".into(),
            known: "aws, kubernetes".into(),
        });
        assert!(!unknown.recoverable());

        let runbook = TarsyError::Processing(ProcessingError::RunbookFetch {
            url: "https://example.com/rb.md".into(),
            reason: "404".into(),
        });
        assert!(runbook.recoverable());

        let timeout = TarsyError::Llm(LlmError::Timeout { seconds: 60 });
        assert!(timeout.recoverable());

        let tool = TarsyError::Tool(ToolError::ToolNotAvailable {
            server: "k8s".into(),
            tool: "list_pods".into(),
            available: vec!["get_pod".into()],
        });
        assert!(tool.recoverable());

        let budget = TarsyError::Processing(ProcessingError::IterationBudgetExhausted {
            iterations: 10,
            strategy: IterationStrategy::React,
        });
        assert!(!budget.recoverable());

        let cancelled = TarsyError::Processing(ProcessingError::Cancelled);
        assert!(!cancelled.recoverable());
    }

    #[test]
    fn unknown_alert_type_lists_known_types() {
        let err = ProcessingError::UnknownAlertType {
            alert_type: "mars".into(),
            known: "NamespaceTerminating, kubernetes".into(),
        };
        let rendered = err.to_string();
        assert!(rendered.contains("mars"));
        assert!(rendered.contains("NamespaceTerminating, kubernetes"));
    }
}
