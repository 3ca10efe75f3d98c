//! Task-local session scope.
//!
//! The orchestrator installs a scope for the whole alert task and re-scopes
//! per stage, so every emission site (LLM wrapper, MCP pool, lifecycle
//! transitions) picks up the correct session/stage ids and a per-session
//! monotonic timestamp without threading them through every signature.

use std::sync::Arc;

use tarsy_core::timestamp::{now_us, SessionClock};

tokio::task_local! {
    static SESSION_SCOPE: SessionScope;
}

#[derive(Clone)]
pub struct SessionScope {
    pub session_id: String,
    /// Set if and only if a stage is currently active.
    pub stage_execution_id: Option<String>,
    pub clock: Arc<SessionClock>,
}

impl SessionScope {
    pub fn for_session(session_id: impl Into<String>, clock: Arc<SessionClock>) -> Self {
        Self {
            session_id: session_id.into(),
            stage_execution_id: None,
            clock,
        }
    }

    /// Narrow this scope to one active stage.
    pub fn for_stage(&self, stage_execution_id: impl Into<String>) -> Self {
        Self {
            session_id: self.session_id.clone(),
            stage_execution_id: Some(stage_execution_id.into()),
            clock: self.clock.clone(),
        }
    }
}

/// Run a future with the given scope installed.
pub async fn with_scope<F>(scope: SessionScope, fut: F) -> F::Output
where
    F: std::future::Future,
{
    SESSION_SCOPE.scope(scope, fut).await
}

/// The scope of the current task, if one is installed.
pub fn current_scope() -> Option<SessionScope> {
    SESSION_SCOPE.try_with(|scope| scope.clone()).ok()
}

/// A timestamp from the session clock of the current scope; outside any
/// scope, plain wall-clock microseconds.
pub fn scoped_now_us() -> i64 {
    match current_scope() {
        Some(scope) => scope.clock.now_us(),
        None => now_us(),
    }
}
