//! LLM completion seam and its hook-instrumented wrapper.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use tarsy_core::error::LlmError;
use tarsy_hooks::{current_scope, scoped_now_us, HookBus, LlmInteractionEvent};

/// Per-request budget for LLM completions.
pub const LLM_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageRole {
    System,
    User,
    Assistant,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmMessage {
    pub role: MessageRole,
    pub content: String,
}

impl LlmMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::Assistant,
            content: content.into(),
        }
    }
}

/// Unified completion surface across providers. Provider adapters live
/// outside the pipeline; scripted implementations back the tests.
#[async_trait]
pub trait LlmClient: Send + Sync {
    fn model_name(&self) -> &str;

    async fn complete(&self, messages: &[LlmMessage]) -> Result<String, LlmError>;
}

/// Wraps an [`LlmClient`] with the per-request deadline and hook-bus
/// instrumentation. Every round-trip emits exactly one
/// `LlmInteractionEvent`, success or failure.
#[derive(Clone)]
pub struct InstrumentedLlm {
    inner: Arc<dyn LlmClient>,
    bus: HookBus,
}

impl InstrumentedLlm {
    pub fn new(inner: Arc<dyn LlmClient>, bus: HookBus) -> Self {
        Self { inner, bus }
    }

    pub fn model_name(&self) -> &str {
        self.inner.model_name()
    }

    pub async fn complete(&self, messages: &[LlmMessage]) -> Result<String, LlmError> {
        let ts_us = scoped_now_us();
        let started = Instant::now();

        let outcome = match tokio::time::timeout(LLM_TIMEOUT, self.inner.complete(messages)).await
        {
            Ok(result) => result,
            Err(_) => Err(LlmError::Timeout {
                seconds: LLM_TIMEOUT.as_secs(),
            }),
        };
        let outcome = outcome.and_then(|text| {
            if text.trim().is_empty() {
                Err(LlmError::EmptyCompletion)
            } else {
                Ok(text)
            }
        });

        let scope = current_scope();
        self.bus.publish_llm(LlmInteractionEvent {
            session_id: scope
                .as_ref()
                .map(|s| s.session_id.clone())
                .unwrap_or_default(),
            stage_execution_id: scope.and_then(|s| s.stage_execution_id),
            ts_us,
            model: self.inner.model_name().to_string(),
            messages: serde_json::to_value(messages).unwrap_or_default(),
            response: outcome.as_ref().ok().cloned(),
            token_usage: None,
            duration_ms: started.elapsed().as_millis() as i64,
            error: outcome.as_ref().err().map(|e| e.to_string()),
        });

        outcome
    }
}

/// Scripted client for tests: returns a fixed sequence of completions or
/// errors, then fails when exhausted.
pub struct ScriptedLlm {
    model: String,
    responses: std::sync::Mutex<std::collections::VecDeque<Result<String, LlmError>>>,
}

impl ScriptedLlm {
    pub fn new(responses: Vec<Result<String, LlmError>>) -> Self {
        Self {
            model: "scripted-model".into(),
            responses: std::sync::Mutex::new(responses.into()),
        }
    }

    pub fn with_responses(responses: Vec<&str>) -> Self {
        Self::new(responses.into_iter().map(|r| Ok(r.to_string())).collect())
    }
}

#[async_trait]
impl LlmClient for ScriptedLlm {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn complete(&self, _messages: &[LlmMessage]) -> Result<String, LlmError> {
        self.responses
            .lock()
            .expect("script lock")
            .pop_front()
            .unwrap_or_else(|| Err(LlmError::Provider("script exhausted".into())))
    }
}
