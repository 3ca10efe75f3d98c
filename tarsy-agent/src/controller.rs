//! Iteration controllers: bounded cooperative loops driving one stage to
//! completion.
//!
//! All strategies share the same skeleton: call the LLM, parse the response
//! according to the strategy, execute at most one tool call per iteration,
//! feed the observation back, and stop on a final answer (or `DONE`), an
//! exhausted parse-retry budget, or an exhausted iteration budget. LLM and
//! MCP errors never escape the loop; they cost an iteration and the loop
//! continues.

use std::collections::HashMap;
use std::sync::Arc;

use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, warn};

use tarsy_core::alert::McpToolCallRecord;
use tarsy_core::chain::IterationStrategy;
use tarsy_core::error::{ProcessingError, TarsyError, ToolError};
use tarsy_core::mcp::McpBroker;

use crate::llm::{InstrumentedLlm, LlmMessage};
use crate::prompt::{self, StageContext};
use crate::react::{self, ReactAction};

/// Iteration budget per stage.
pub const MAX_ITERATIONS: u32 = 10;

/// Soft retries allowed for unparseable responses before the stage fails.
pub const MAX_PARSE_RETRIES: u32 = 2;

/// What a controller hands back to the runtime on success.
#[derive(Debug, Default)]
pub struct ControllerOutcome {
    pub analysis: Option<String>,
    pub mcp_results: HashMap<String, Vec<McpToolCallRecord>>,
}

/// Drives one stage to completion under the chosen strategy.
pub struct IterationEngine {
    llm: InstrumentedLlm,
    mcp: Arc<dyn McpBroker>,
    max_iterations: u32,
}

/// One JSON action exchanged by the `regular` strategy.
#[derive(Debug, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
enum RegularAction {
    CallTool {
        server: String,
        tool: String,
        #[serde(default)]
        arguments: Value,
    },
    FinalAnalysis {
        analysis: String,
    },
}

impl IterationEngine {
    pub fn new(llm: InstrumentedLlm, mcp: Arc<dyn McpBroker>) -> Self {
        Self {
            llm,
            mcp,
            max_iterations: MAX_ITERATIONS,
        }
    }

    pub fn with_max_iterations(mut self, max_iterations: u32) -> Self {
        self.max_iterations = max_iterations;
        self
    }

    pub async fn run(
        &self,
        strategy: IterationStrategy,
        ctx: &StageContext<'_>,
    ) -> Result<ControllerOutcome, TarsyError> {
        match strategy {
            IterationStrategy::Regular => self.run_regular(ctx).await,
            IterationStrategy::React
            | IterationStrategy::ReactTools
            | IterationStrategy::ReactToolsPartial => self.run_react(strategy, ctx).await,
            IterationStrategy::ReactFinalAnalysis => self.run_final_analysis(ctx).await,
        }
    }

    async fn run_react(
        &self,
        strategy: IterationStrategy,
        ctx: &StageContext<'_>,
    ) -> Result<ControllerOutcome, TarsyError> {
        let system = prompt::system_message(ctx);
        let mut transcript: Vec<String> = Vec::new();
        let mut mcp_results: HashMap<String, Vec<McpToolCallRecord>> = HashMap::new();
        let mut parse_retries = 0u32;

        for iteration in 1..=self.max_iterations {
            let messages = vec![
                LlmMessage::system(system.clone()),
                LlmMessage::user(prompt::react_stage_prompt(strategy, ctx, &transcript)),
            ];
            let response = match self.llm.complete(&messages).await {
                Ok(text) => text,
                Err(err) => {
                    warn!(iteration, error = %err, "LLM call failed; costs an iteration");
                    continue;
                }
            };

            match react::parse_react_response(&response) {
                ReactAction::ToolCall {
                    thought,
                    server,
                    tool,
                    arguments,
                } => {
                    parse_retries = 0;
                    if let Some(thought) = thought {
                        transcript.push(format!("Thought: {thought}"));
                    }
                    transcript.push(format!("Action: {server}.{tool}"));
                    transcript.push(format!("Action Input: {arguments}"));
                    let observation = self
                        .execute_tool_call(ctx, &server, &tool, arguments, &mut mcp_results)
                        .await;
                    transcript.push(format!("Observation: {observation}"));
                }
                ReactAction::FinalAnswer(text) => {
                    debug!(iteration, strategy = %strategy, "stage reached a final answer");
                    let analysis = strategy.produces_analysis().then_some(text);
                    return Ok(ControllerOutcome {
                        analysis,
                        mcp_results,
                    });
                }
                ReactAction::Done if strategy == IterationStrategy::ReactTools => {
                    debug!(iteration, "data collection stage finished");
                    return Ok(ControllerOutcome {
                        analysis: None,
                        mcp_results,
                    });
                }
                ReactAction::Done => {
                    // DONE outside a data-collection stage: treat as a
                    // malformed termination and ask for a final answer.
                    parse_retries += 1;
                    if parse_retries > MAX_PARSE_RETRIES {
                        return Err(ProcessingError::UnparseableResponse {
                            attempts: parse_retries,
                        }
                        .into());
                    }
                    transcript.push(
                        "Observation: this stage requires a 'Final Answer:' with your analysis, \
                         not DONE. Continue."
                            .into(),
                    );
                }
                ReactAction::Unparseable { reason } => {
                    parse_retries += 1;
                    if parse_retries > MAX_PARSE_RETRIES {
                        return Err(ProcessingError::UnparseableResponse {
                            attempts: parse_retries,
                        }
                        .into());
                    }
                    warn!(iteration, %reason, "unparseable response; sending correction hint");
                    transcript.push(format!(
                        "Observation: your previous response could not be parsed ({reason}). \
                         Use the required format: Thought/Action/Action Input lines to call a \
                         tool{}.",
                        if strategy == IterationStrategy::ReactTools {
                            ", or a single DONE line when finished"
                        } else {
                            ", or a 'Final Answer:' line when finished"
                        }
                    ));
                }
            }
        }

        Err(ProcessingError::IterationBudgetExhausted {
            iterations: self.max_iterations,
            strategy,
        }
        .into())
    }

    async fn run_regular(&self, ctx: &StageContext<'_>) -> Result<ControllerOutcome, TarsyError> {
        let system = prompt::system_message(ctx);
        let mut transcript: Vec<String> = Vec::new();
        let mut mcp_results: HashMap<String, Vec<McpToolCallRecord>> = HashMap::new();
        let mut parse_retries = 0u32;

        for iteration in 1..=self.max_iterations {
            let messages = vec![
                LlmMessage::system(system.clone()),
                LlmMessage::user(prompt::regular_stage_prompt(ctx, &transcript)),
            ];
            let response = match self.llm.complete(&messages).await {
                Ok(text) => text,
                Err(err) => {
                    warn!(iteration, error = %err, "LLM call failed; costs an iteration");
                    continue;
                }
            };

            match parse_regular_action(&response) {
                Ok(RegularAction::CallTool {
                    server,
                    tool,
                    arguments,
                }) => {
                    parse_retries = 0;
                    let rendered_args = arguments.to_string();
                    let observation = self
                        .execute_tool_call(ctx, &server, &tool, arguments, &mut mcp_results)
                        .await;
                    transcript.push(format!("{server}.{tool}({rendered_args}) -> {observation}"));
                }
                Ok(RegularAction::FinalAnalysis { analysis }) => {
                    return Ok(ControllerOutcome {
                        analysis: Some(analysis),
                        mcp_results,
                    });
                }
                Err(reason) => {
                    parse_retries += 1;
                    if parse_retries > MAX_PARSE_RETRIES {
                        return Err(ProcessingError::UnparseableResponse {
                            attempts: parse_retries,
                        }
                        .into());
                    }
                    transcript.push(format!(
                        "error: your previous response could not be parsed ({reason}); respond \
                         with a single JSON action object"
                    ));
                }
            }
        }

        Err(ProcessingError::IterationBudgetExhausted {
            iterations: self.max_iterations,
            strategy: IterationStrategy::Regular,
        }
        .into())
    }

    async fn run_final_analysis(
        &self,
        ctx: &StageContext<'_>,
    ) -> Result<ControllerOutcome, TarsyError> {
        let messages = vec![
            LlmMessage::system(prompt::system_message(ctx)),
            LlmMessage::user(prompt::final_analysis_prompt(ctx)),
        ];

        for iteration in 1..=self.max_iterations {
            match self.llm.complete(&messages).await {
                Ok(text) => {
                    return Ok(ControllerOutcome {
                        analysis: Some(react::extract_analysis_text(&text)),
                        mcp_results: HashMap::new(),
                    });
                }
                Err(err) => {
                    warn!(iteration, error = %err, "LLM call failed; costs an iteration");
                }
            }
        }

        Err(ProcessingError::IterationBudgetExhausted {
            iterations: self.max_iterations,
            strategy: IterationStrategy::ReactFinalAnalysis,
        }
        .into())
    }

    /// Validate against the catalog, execute, and render the observation
    /// fed back to the LLM. Successful calls are recorded into the stage's
    /// `mcp_results`; failures only produce observations (the audit trail
    /// has the full record).
    async fn execute_tool_call(
        &self,
        ctx: &StageContext<'_>,
        server: &str,
        tool: &str,
        arguments: Value,
        mcp_results: &mut HashMap<String, Vec<McpToolCallRecord>>,
    ) -> String {
        if !ctx.catalog.contains(server, tool) {
            let err = ToolError::ToolNotAvailable {
                server: server.to_string(),
                tool: tool.to_string(),
                available: ctx.catalog.tool_names_for(server),
            };
            warn!(server, tool, "requested tool is not in the agent's catalog");
            return serde_json::json!({
                "error": "tool_not_available",
                "server": server,
                "tool": tool,
                "available": ctx.catalog.tool_names_for(server),
                "message": err.to_string(),
            })
            .to_string();
        }

        match self.mcp.call_tool(server, tool, arguments.clone()).await {
            Ok(result) => {
                mcp_results
                    .entry(server.to_string())
                    .or_default()
                    .push(McpToolCallRecord {
                        tool_name: tool.to_string(),
                        arguments,
                        result: result.clone(),
                    });
                result.to_string()
            }
            Err(err) => serde_json::json!({
                "error": "tool_call_failed",
                "server": server,
                "tool": tool,
                "message": err.to_string(),
            })
            .to_string(),
        }
    }
}

/// The regular strategy exchanges one JSON object per turn; tolerate fenced
/// or prefixed output by extracting the outermost object.
fn parse_regular_action(text: &str) -> Result<RegularAction, String> {
    let start = text.find('{').ok_or("no JSON object found")?;
    let end = text.rfind('}').ok_or("no JSON object found")?;
    if end < start {
        return Err("no JSON object found".into());
    }
    serde_json::from_str::<RegularAction>(&text[start..=end]).map_err(|e| e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::Mutex;

    use tarsy_core::alert::AlertProcessingData;
    use tarsy_core::error::LlmError;
    use tarsy_core::mcp::McpToolDefinition;
    use tarsy_hooks::HookBus;

    use crate::catalog::{CatalogEntry, ToolCatalog};
    use crate::llm::ScriptedLlm;

    struct ScriptedBroker {
        result: Value,
        calls: Mutex<Vec<(String, String, Value)>>,
    }

    impl ScriptedBroker {
        fn new(result: Value) -> Self {
            Self {
                result,
                calls: Mutex::new(Vec::new()),
            }
        }

        fn call_count(&self) -> usize {
            self.calls.lock().expect("calls lock").len()
        }
    }

    #[async_trait]
    impl McpBroker for ScriptedBroker {
        async fn list_tools(&self, _server_id: &str) -> Result<Vec<McpToolDefinition>, ToolError> {
            Ok(vec![])
        }

        async fn call_tool(
            &self,
            server_id: &str,
            tool_name: &str,
            arguments: Value,
        ) -> Result<Value, ToolError> {
            self.calls.lock().expect("calls lock").push((
                server_id.to_string(),
                tool_name.to_string(),
                arguments,
            ));
            Ok(self.result.clone())
        }
    }

    fn catalog() -> ToolCatalog {
        ToolCatalog::new(vec![CatalogEntry {
            server_id: "k8s".into(),
            tool: McpToolDefinition {
                name: "list_pods".into(),
                description: "List pods".into(),
                input_schema: json!({"type": "object"}),
            },
        }])
    }

    fn processing() -> AlertProcessingData {
        AlertProcessingData::new(
            "kubernetes",
            [("namespace".to_string(), json!("foo"))].into_iter().collect(),
        )
    }

    fn engine(responses: Vec<Result<String, LlmError>>, broker: Arc<ScriptedBroker>) -> IterationEngine {
        let llm = InstrumentedLlm::new(Arc::new(ScriptedLlm::new(responses)), HookBus::start(vec![]));
        IterationEngine::new(llm, broker)
    }

    fn ok(text: &str) -> Result<String, LlmError> {
        Ok(text.to_string())
    }

    #[tokio::test]
    async fn react_final_answer_on_first_iteration() {
        let broker = Arc::new(ScriptedBroker::new(json!(null)));
        let engine = engine(vec![ok("Final Answer: ok")], broker.clone());
        let processing = processing();
        let catalog = catalog();
        let ctx = StageContext {
            processing: &processing,
            catalog: &catalog,
            custom_instructions: None,
            server_instructions: &[],
        };

        let outcome = engine.run(IterationStrategy::React, &ctx).await.expect("run");
        assert_eq!(outcome.analysis.as_deref(), Some("ok"));
        assert_eq!(broker.call_count(), 0);
    }

    #[tokio::test]
    async fn react_tool_call_then_final_answer_records_the_call() {
        let broker = Arc::new(ScriptedBroker::new(json!(["p1", "p2"])));
        let engine = engine(
            vec![
                ok("Thought: look at pods\nAction: k8s.list_pods\nAction Input: {\"namespace\": \"foo\"}"),
                ok("Final Answer: two pods are stuck"),
            ],
            broker.clone(),
        );
        let processing = processing();
        let catalog = catalog();
        let ctx = StageContext {
            processing: &processing,
            catalog: &catalog,
            custom_instructions: None,
            server_instructions: &[],
        };

        let outcome = engine.run(IterationStrategy::React, &ctx).await.expect("run");
        assert_eq!(outcome.analysis.as_deref(), Some("two pods are stuck"));
        assert_eq!(broker.call_count(), 1);
        assert_eq!(outcome.mcp_results["k8s"].len(), 1);
        assert_eq!(outcome.mcp_results["k8s"][0].tool_name, "list_pods");
        assert_eq!(outcome.mcp_results["k8s"][0].result, json!(["p1", "p2"]));
    }

    #[tokio::test]
    async fn react_tools_terminates_with_done_and_no_analysis() {
        let broker = Arc::new(ScriptedBroker::new(json!(["p1"])));
        let engine = engine(
            vec![
                ok("Action: k8s.list_pods\nAction Input: {}"),
                ok("Thought: that is everything\nDONE"),
            ],
            broker.clone(),
        );
        let processing = processing();
        let catalog = catalog();
        let ctx = StageContext {
            processing: &processing,
            catalog: &catalog,
            custom_instructions: None,
            server_instructions: &[],
        };

        let outcome = engine
            .run(IterationStrategy::ReactTools, &ctx)
            .await
            .expect("run");
        assert!(outcome.analysis.is_none());
        assert_eq!(outcome.mcp_results["k8s"].len(), 1);
    }

    #[tokio::test]
    async fn react_tools_final_answer_still_yields_no_analysis() {
        let broker = Arc::new(ScriptedBroker::new(json!(null)));
        let engine = engine(vec![ok("Final Answer: here is an analysis anyway")], broker);
        let processing = processing();
        let catalog = catalog();
        let ctx = StageContext {
            processing: &processing,
            catalog: &catalog,
            custom_instructions: None,
            server_instructions: &[],
        };

        let outcome = engine
            .run(IterationStrategy::ReactTools, &ctx)
            .await
            .expect("run");
        assert!(outcome.analysis.is_none());
    }

    #[tokio::test]
    async fn unknown_tool_surfaces_as_observation_and_loop_continues() {
        let broker = Arc::new(ScriptedBroker::new(json!(null)));
        let engine = engine(
            vec![
                ok("Action: k8s.delete_everything\nAction Input: {}"),
                ok("Final Answer: recovered"),
            ],
            broker.clone(),
        );
        let processing = processing();
        let catalog = catalog();
        let ctx = StageContext {
            processing: &processing,
            catalog: &catalog,
            custom_instructions: None,
            server_instructions: &[],
        };

        let outcome = engine.run(IterationStrategy::React, &ctx).await.expect("run");
        assert_eq!(outcome.analysis.as_deref(), Some("recovered"));
        // The invalid call never reached the broker and was not recorded.
        assert_eq!(broker.call_count(), 0);
        assert!(outcome.mcp_results.is_empty());
    }

    #[tokio::test]
    async fn unparseable_responses_get_two_soft_retries() {
        let broker = Arc::new(ScriptedBroker::new(json!(null)));
        let engine = engine(
            vec![
                ok("I will now investigate."),
                ok("Still thinking out loud."),
                ok("Final Answer: fixed after hints"),
            ],
            broker,
        );
        let processing = processing();
        let catalog = catalog();
        let ctx = StageContext {
            processing: &processing,
            catalog: &catalog,
            custom_instructions: None,
            server_instructions: &[],
        };

        let outcome = engine.run(IterationStrategy::React, &ctx).await.expect("run");
        assert_eq!(outcome.analysis.as_deref(), Some("fixed after hints"));
    }

    #[tokio::test]
    async fn third_unparseable_response_fails_the_stage() {
        let broker = Arc::new(ScriptedBroker::new(json!(null)));
        let engine = engine(
            vec![ok("prose"), ok("more prose"), ok("even more prose")],
            broker,
        );
        let processing = processing();
        let catalog = catalog();
        let ctx = StageContext {
            processing: &processing,
            catalog: &catalog,
            custom_instructions: None,
            server_instructions: &[],
        };

        let err = engine
            .run(IterationStrategy::React, &ctx)
            .await
            .expect_err("must fail");
        assert!(matches!(
            err,
            TarsyError::Processing(ProcessingError::UnparseableResponse { .. })
        ));
    }

    #[tokio::test]
    async fn iteration_budget_exhaustion() {
        let broker = Arc::new(ScriptedBroker::new(json!(["p1"])));
        let responses = (0..5)
            .map(|_| ok("Action: k8s.list_pods\nAction Input: {}"))
            .collect();
        let engine = engine(responses, broker).with_max_iterations(3);
        let processing = processing();
        let catalog = catalog();
        let ctx = StageContext {
            processing: &processing,
            catalog: &catalog,
            custom_instructions: None,
            server_instructions: &[],
        };

        let err = engine
            .run(IterationStrategy::React, &ctx)
            .await
            .expect_err("must exhaust");
        assert!(matches!(
            err,
            TarsyError::Processing(ProcessingError::IterationBudgetExhausted {
                iterations: 3,
                ..
            })
        ));
    }

    #[tokio::test]
    async fn llm_errors_cost_iterations_but_do_not_fail_the_loop() {
        let broker = Arc::new(ScriptedBroker::new(json!(null)));
        let engine = engine(
            vec![
                Err(LlmError::Timeout { seconds: 60 }),
                Err(LlmError::Provider("flaky".into())),
                ok("Final Answer: eventually"),
            ],
            broker,
        );
        let processing = processing();
        let catalog = catalog();
        let ctx = StageContext {
            processing: &processing,
            catalog: &catalog,
            custom_instructions: None,
            server_instructions: &[],
        };

        let outcome = engine.run(IterationStrategy::React, &ctx).await.expect("run");
        assert_eq!(outcome.analysis.as_deref(), Some("eventually"));
    }

    #[tokio::test]
    async fn final_analysis_needs_no_tools_and_strips_the_marker() {
        let broker = Arc::new(ScriptedBroker::new(json!(null)));
        let engine = engine(vec![ok("Final Answer: diagnosis")], broker.clone());
        let processing = processing();
        let catalog = ToolCatalog::empty();
        let ctx = StageContext {
            processing: &processing,
            catalog: &catalog,
            custom_instructions: None,
            server_instructions: &[],
        };

        let outcome = engine
            .run(IterationStrategy::ReactFinalAnalysis, &ctx)
            .await
            .expect("run");
        assert_eq!(outcome.analysis.as_deref(), Some("diagnosis"));
        assert_eq!(broker.call_count(), 0);
    }

    #[tokio::test]
    async fn regular_strategy_exchanges_json_actions() {
        let broker = Arc::new(ScriptedBroker::new(json!({"pods": ["p1"]})));
        let engine = engine(
            vec![
                ok(r#"{"action": "call_tool", "server": "k8s", "tool": "list_pods", "arguments": {"namespace": "foo"}}"#),
                ok(r#"{"action": "final_analysis", "analysis": "one pod left"}"#),
            ],
            broker.clone(),
        );
        let processing = processing();
        let catalog = catalog();
        let ctx = StageContext {
            processing: &processing,
            catalog: &catalog,
            custom_instructions: None,
            server_instructions: &[],
        };

        let outcome = engine
            .run(IterationStrategy::Regular, &ctx)
            .await
            .expect("run");
        assert_eq!(outcome.analysis.as_deref(), Some("one pod left"));
        assert_eq!(broker.call_count(), 1);
        assert_eq!(outcome.mcp_results["k8s"].len(), 1);
    }

    #[tokio::test]
    async fn regular_strategy_tolerates_fenced_json() {
        let broker = Arc::new(ScriptedBroker::new(json!(null)));
        let engine = engine(
            vec![ok("```json\n{\"action\": \"final_analysis\", \"analysis\": \"done\"}\n```")],
            broker,
        );
        let processing = processing();
        let catalog = catalog();
        let ctx = StageContext {
            processing: &processing,
            catalog: &catalog,
            custom_instructions: None,
            server_instructions: &[],
        };

        let outcome = engine
            .run(IterationStrategy::Regular, &ctx)
            .await
            .expect("run");
        assert_eq!(outcome.analysis.as_deref(), Some("done"));
    }
}
