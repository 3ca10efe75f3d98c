//! The agent runtime: one instance per alert session.
//!
//! Resolves the effective strategy, gathers the tool catalog (cached per
//! session), hands control to the iteration engine, and packages the outcome
//! as a `StageResult`. Errors inside the agent are returned as
//! `status = error` results; they never propagate across the stage boundary.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use tokio::sync::Mutex;
use tracing::info;

use tarsy_core::agent::AgentDefinition;
use tarsy_core::alert::{AlertProcessingData, StageResult};
use tarsy_core::chain::IterationStrategy;
use tarsy_core::error::ToolError;
use tarsy_core::mcp::{McpBroker, McpToolDefinition};
use tarsy_hooks::{scoped_now_us, HookBus};

use crate::catalog::{CatalogEntry, ToolCatalog};
use crate::controller::IterationEngine;
use crate::llm::{InstrumentedLlm, LlmClient};
use crate::prompt::StageContext;

pub struct AgentRuntime {
    engine: IterationEngine,
    mcp: Arc<dyn McpBroker>,
    /// Operational instructions per server id, for prompt assembly.
    server_instructions: HashMap<String, String>,
    /// `list_tools` results cached for the lifetime of this runtime (one
    /// alert session).
    catalogs: Mutex<HashMap<String, Arc<Vec<McpToolDefinition>>>>,
}

impl AgentRuntime {
    pub fn new(
        llm_client: Arc<dyn LlmClient>,
        mcp: Arc<dyn McpBroker>,
        bus: HookBus,
        server_instructions: HashMap<String, String>,
    ) -> Self {
        let llm = InstrumentedLlm::new(llm_client, bus);
        Self {
            engine: IterationEngine::new(llm, mcp.clone()),
            mcp,
            server_instructions,
            catalogs: Mutex::new(HashMap::new()),
        }
    }

    /// Tighten the iteration budget (tests).
    pub fn with_max_iterations(mut self, max_iterations: u32) -> Self {
        self.engine = self.engine.with_max_iterations(max_iterations);
        self
    }

    /// Run one stage to completion. Whatever happens inside comes back as a
    /// `StageResult`; session/stage ids are carried by the task-local scope
    /// for event attribution and passed here for logging only.
    pub async fn process_alert(
        &self,
        agent: &AgentDefinition,
        processing: &AlertProcessingData,
        session_id: &str,
        stage_execution_id: &str,
        stage_strategy: Option<IterationStrategy>,
    ) -> StageResult {
        let strategy = agent.resolve_strategy(stage_strategy);
        let ts_us = scoped_now_us();
        let started = Instant::now();

        info!(
            session_id,
            stage_execution_id,
            agent_id = agent.agent_id(),
            strategy = %strategy,
            "agent processing stage"
        );

        let catalog = if strategy.allows_tools() {
            match self.load_catalog(agent).await {
                Ok(catalog) => catalog,
                Err(err) => {
                    return StageResult::failure(
                        format!("tool discovery failed: {err}"),
                        strategy,
                        ts_us,
                        started.elapsed().as_millis() as i64,
                    );
                }
            }
        } else {
            ToolCatalog::empty()
        };

        let server_instructions: Vec<(String, String)> = agent
            .mcp_server_ids()
            .iter()
            .filter_map(|id| {
                self.server_instructions
                    .get(id)
                    .map(|text| (id.clone(), text.clone()))
            })
            .collect();

        let ctx = StageContext {
            processing,
            catalog: &catalog,
            custom_instructions: agent.custom_instructions(),
            server_instructions: &server_instructions,
        };

        match self.engine.run(strategy, &ctx).await {
            Ok(outcome) => StageResult::success(
                outcome.analysis,
                outcome.mcp_results,
                strategy,
                ts_us,
                started.elapsed().as_millis() as i64,
            ),
            Err(err) => StageResult::failure(
                err.to_string(),
                strategy,
                ts_us,
                started.elapsed().as_millis() as i64,
            ),
        }
    }

    async fn load_catalog(&self, agent: &AgentDefinition) -> Result<ToolCatalog, ToolError> {
        let mut entries = Vec::new();
        for server_id in agent.mcp_server_ids() {
            let tools = {
                let cached = self.catalogs.lock().await.get(&server_id).cloned();
                match cached {
                    Some(tools) => tools,
                    None => {
                        let tools = Arc::new(self.mcp.list_tools(&server_id).await?);
                        self.catalogs
                            .lock()
                            .await
                            .insert(server_id.clone(), tools.clone());
                        tools
                    }
                }
            };
            entries.extend(tools.iter().cloned().map(|tool| CatalogEntry {
                server_id: server_id.clone(),
                tool,
            }));
        }
        Ok(ToolCatalog::new(entries))
    }
}
