//! The alert service: the per-alert state machine.
//!
//! Submit -> resolve chain -> fetch runbook once -> run stages sequentially
//! with accumulating context -> finalize. A failed stage never
//! short-circuits the chain; later analytical stages still run against
//! whatever was collected. Cancellation fails the current stage with
//! "cancelled" and finalizes the session as failed without creating later
//! stages.

use std::collections::HashSet;
use std::sync::Arc;

use serde::Serialize;
use serde_json::Value;
use tokio::sync::{watch, Mutex, Semaphore};
use tracing::{error, info, warn};
use uuid::Uuid;

use tarsy_agent::llm::LlmClient;
use tarsy_agent::runtime::AgentRuntime;
use tarsy_audit::model::{
    AlertSession, SessionFilter, SessionPage, SessionStatus, SessionTimeline, StageExecution,
    StageStatus,
};
use tarsy_audit::AuditStore;
use tarsy_core::alert::{AlertKey, AlertProcessingData, StageResult};
use tarsy_core::error::{ProcessingError, TarsyError};
use tarsy_core::mcp::McpBroker;
use tarsy_core::timestamp::SessionClock;
use tarsy_hooks::{with_scope, HookBus, LifecycleEventKind, SessionLifecycleEvent, SessionScope};
use tarsy_mcp::McpServerRegistry;

use crate::progress::{ProgressBroadcaster, ProgressUpdate};
use crate::registry::{AgentRegistry, ChainRegistry};
use crate::runbook::RunbookFetcher;

/// An accepted alert, as handed over by the submission edge.
#[derive(Debug, Clone)]
pub struct AlertSubmission {
    pub alert_type: String,
    pub alert_data: serde_json::Map<String, Value>,
    pub runbook: Option<String>,
    pub alert_id: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SubmissionAck {
    pub alert_id: String,
    pub session_id: String,
    pub status: &'static str,
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    pub audit_store_ok: bool,
    pub chains_loaded: usize,
    pub agents_loaded: usize,
    pub mcp_servers_loaded: usize,
}

struct ServiceInner {
    chains: Arc<ChainRegistry>,
    agents: Arc<AgentRegistry>,
    mcp_registry: Arc<McpServerRegistry>,
    mcp: Arc<dyn McpBroker>,
    llm: Arc<dyn LlmClient>,
    runbooks: Arc<dyn RunbookFetcher>,
    store: AuditStore,
    bus: HookBus,
    progress: ProgressBroadcaster,
    semaphore: Arc<Semaphore>,
    in_flight: Mutex<HashSet<String>>,
}

#[derive(Clone)]
pub struct AlertService {
    inner: Arc<ServiceInner>,
}

impl AlertService {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        chains: Arc<ChainRegistry>,
        agents: Arc<AgentRegistry>,
        mcp_registry: Arc<McpServerRegistry>,
        mcp: Arc<dyn McpBroker>,
        llm: Arc<dyn LlmClient>,
        runbooks: Arc<dyn RunbookFetcher>,
        store: AuditStore,
        bus: HookBus,
        max_concurrent_alerts: usize,
    ) -> Self {
        Self {
            inner: Arc::new(ServiceInner {
                chains,
                agents,
                mcp_registry,
                mcp,
                llm,
                runbooks,
                store,
                bus,
                progress: ProgressBroadcaster::new(),
                semaphore: Arc::new(Semaphore::new(max_concurrent_alerts)),
                in_flight: Mutex::new(HashSet::new()),
            }),
        }
    }

    pub fn progress(&self) -> &ProgressBroadcaster {
        &self.inner.progress
    }

    /// Accept an alert and spawn its processing task. Returns immediately;
    /// progress is observable on the progress stream and in the audit
    /// store. Concurrency beyond the configured cap queues in submission
    /// order.
    pub async fn submit(
        &self,
        submission: AlertSubmission,
        cancel: watch::Receiver<bool>,
    ) -> Result<SubmissionAck, TarsyError> {
        let mut processing =
            AlertProcessingData::new(submission.alert_type, submission.alert_data);
        processing.runbook_url = submission.runbook;

        let key = AlertKey::from_alert(&processing).to_string();
        {
            let mut in_flight = self.inner.in_flight.lock().await;
            if !in_flight.insert(key.clone()) {
                return Err(ProcessingError::DuplicateAlert { key }.into());
            }
        }

        let alert_id = submission
            .alert_id
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        let session_id = Uuid::new_v4().to_string();
        info!(
            alert_id,
            session_id,
            alert_type = %processing.alert_type,
            "alert accepted"
        );

        let inner = self.inner.clone();
        let task_alert_id = alert_id.clone();
        let task_session_id = session_id.clone();
        tokio::spawn(async move {
            let Ok(_permit) = inner.semaphore.clone().acquire_owned().await else {
                return;
            };
            let clock = Arc::new(SessionClock::new());
            let scope = SessionScope::for_session(&task_session_id, clock.clone());
            with_scope(
                scope,
                run_session(
                    inner.clone(),
                    task_alert_id,
                    task_session_id,
                    processing,
                    cancel,
                    clock,
                ),
            )
            .await;
            inner.in_flight.lock().await.remove(&key);
        });

        Ok(SubmissionAck {
            alert_id,
            session_id,
            status: "accepted",
        })
    }

    pub async fn health(&self) -> HealthReport {
        HealthReport {
            audit_store_ok: self.inner.store.health_check().await,
            chains_loaded: self.inner.chains.len(),
            agents_loaded: self.inner.agents.len(),
            mcp_servers_loaded: self.inner.mcp_registry.len(),
        }
    }

    pub async fn list_sessions(
        &self,
        filter: &SessionFilter,
        page: u32,
        size: u32,
    ) -> Result<SessionPage, TarsyError> {
        Ok(self.inner.store.list_sessions(filter, page, size).await?)
    }

    pub async fn session_timeline(
        &self,
        session_id: &str,
    ) -> Result<Option<SessionTimeline>, TarsyError> {
        Ok(self.inner.store.get_session_with_timeline(session_id).await?)
    }
}

impl ServiceInner {
    fn lifecycle(
        &self,
        session_id: &str,
        stage_execution_id: Option<&str>,
        clock: &SessionClock,
        kind: LifecycleEventKind,
        detail: Option<String>,
    ) {
        self.bus.publish_lifecycle(SessionLifecycleEvent {
            session_id: session_id.to_string(),
            stage_execution_id: stage_execution_id.map(str::to_string),
            ts_us: clock.now_us(),
            kind,
            detail,
        });
    }

    fn publish_progress(
        &self,
        session_id: &str,
        chain_id: &str,
        current_stage: Option<&str>,
        total_stages: usize,
        completed_stages: usize,
        status: &str,
    ) {
        self.progress.publish(ProgressUpdate {
            session_id: session_id.to_string(),
            chain_id: chain_id.to_string(),
            current_stage: current_stage.map(str::to_string),
            total_stages,
            completed_stages,
            status: status.to_string(),
        });
    }
}

/// Resolves until the cancel flag is raised; pends forever if the sender is
/// gone (cancellation can no longer arrive).
async fn cancelled_signal(cancel: &mut watch::Receiver<bool>) {
    loop {
        if *cancel.borrow() {
            return;
        }
        if cancel.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

async fn run_session(
    inner: Arc<ServiceInner>,
    alert_id: String,
    session_id: String,
    mut processing: AlertProcessingData,
    mut cancel: watch::Receiver<bool>,
    clock: Arc<SessionClock>,
) {
    let started_at_us = clock.now_us();
    let alert_data_value = Value::Object(processing.alert_data.clone());

    // Resolve the chain. An unknown alert type fails the session before any
    // stage exists; the error names the known types.
    let chain = match inner.chains.get_chain_for_alert_type(&processing.alert_type) {
        Ok(chain) => chain,
        Err(err) => {
            warn!(session_id, alert_type = %processing.alert_type, error = %err, "chain resolution failed");
            let session = AlertSession::new(
                &session_id,
                &alert_id,
                &processing.alert_type,
                "",
                None,
                alert_data_value,
                started_at_us,
            );
            if let Err(db_err) = inner.store.create_session(&session).await {
                error!(session_id, error = %db_err, "failed to create audit session");
                return;
            }
            inner.lifecycle(
                &session_id,
                None,
                &clock,
                LifecycleEventKind::SessionFinalized,
                Some(err.to_string()),
            );
            inner.bus.flush().await;
            if let Err(db_err) = inner
                .store
                .finalize_session(
                    &session_id,
                    SessionStatus::Failed,
                    clock.now_us(),
                    None,
                    Some(&err.to_string()),
                )
                .await
            {
                error!(session_id, error = %db_err, "failed to finalize session");
            }
            inner.publish_progress(&session_id, "", None, 0, 0, "failed");
            return;
        }
    };

    processing.chain_id = Some(chain.chain_id.clone());
    let session = AlertSession::new(
        &session_id,
        &alert_id,
        &processing.alert_type,
        &chain.chain_id,
        serde_json::to_value(chain.as_ref()).ok(),
        alert_data_value,
        started_at_us,
    );
    if let Err(db_err) = inner.store.create_session(&session).await {
        error!(session_id, error = %db_err, "failed to create audit session");
        return;
    }
    inner.lifecycle(
        &session_id,
        None,
        &clock,
        LifecycleEventKind::SessionStarted,
        Some(chain.chain_id.clone()),
    );

    // Fetch the runbook once. Network failure is non-fatal: continue with
    // an empty runbook and record the failure in the timeline.
    processing.runbook_content = Some(String::new());
    if let Some(url) = processing.get_runbook_url().map(str::to_string) {
        match inner.runbooks.fetch(&url).await {
            Ok(content) => processing.runbook_content = Some(content),
            Err(err) => {
                warn!(session_id, url, error = %err, "runbook fetch failed; continuing without it");
                inner.lifecycle(
                    &session_id,
                    None,
                    &clock,
                    LifecycleEventKind::RunbookFetchFailed,
                    Some(err.to_string()),
                );
            }
        }
    }

    // One runtime per session: the tool catalog cache lives here.
    let runtime = AgentRuntime::new(
        inner.llm.clone(),
        inner.mcp.clone(),
        inner.bus.clone(),
        inner.mcp_registry.instruction_map(),
    );

    let total_stages = chain.stages.len();
    let mut cancelled = false;

    for (index, stage) in chain.stages.iter().enumerate() {
        if *cancel.borrow() {
            cancelled = true;
            break;
        }

        let execution_id = Uuid::new_v4().to_string();
        processing.current_stage_name = Some(stage.name.clone());
        let stage_started_us = clock.now_us();
        let row = StageExecution {
            execution_id: execution_id.clone(),
            session_id: session_id.clone(),
            stage_id: stage.name.clone(),
            stage_index: index as i64,
            agent_id: stage.agent_id.clone(),
            status: StageStatus::Active,
            started_at_us: stage_started_us,
            completed_at_us: None,
            duration_ms: None,
            stage_output: None,
            error_message: None,
        };
        if let Err(db_err) = inner.store.create_stage_execution(&row).await {
            error!(session_id, stage = %stage.name, error = %db_err, "failed to create stage execution");
        }
        if let Err(db_err) = inner
            .store
            .update_session_current_stage(&session_id, index as i64, &execution_id)
            .await
        {
            error!(session_id, error = %db_err, "failed to update current stage");
        }
        inner.lifecycle(
            &session_id,
            Some(&execution_id),
            &clock,
            LifecycleEventKind::StageStarted,
            Some(stage.name.clone()),
        );
        inner.publish_progress(
            &session_id,
            &chain.chain_id,
            Some(&stage.name),
            total_stages,
            processing.stage_outputs().len(),
            "processing",
        );

        // Whatever the agent returns, success or error, is the stage's
        // terminal state; errors never propagate past this point.
        let result = match inner.agents.get(&stage.agent_id) {
            Some(agent) => {
                let stage_scope = SessionScope {
                    session_id: session_id.clone(),
                    stage_execution_id: Some(execution_id.clone()),
                    clock: clock.clone(),
                };
                let outcome = with_scope(stage_scope, async {
                    tokio::select! {
                        result = runtime.process_alert(
                            &agent,
                            &processing,
                            &session_id,
                            &execution_id,
                            stage.iteration_strategy,
                        ) => Some(result),
                        _ = cancelled_signal(&mut cancel) => None,
                    }
                })
                .await;
                match outcome {
                    Some(result) => result,
                    None => {
                        cancelled = true;
                        let strategy = agent.resolve_strategy(stage.iteration_strategy);
                        StageResult::failure(
                            "cancelled",
                            strategy,
                            clock.now_us(),
                            (clock.now_us() - stage_started_us) / 1000,
                        )
                    }
                }
            }
            // Registry validation makes this unreachable; fail the stage
            // cleanly if it ever happens.
            None => StageResult::failure(
                format!("agent '{}' is not registered", stage.agent_id),
                stage.iteration_strategy.unwrap_or_default(),
                clock.now_us(),
                0,
            ),
        };

        let completed_at_us = clock.now_us();
        let duration_ms = (completed_at_us - stage_started_us) / 1000;
        if result.is_success() {
            let output = serde_json::to_value(&result).unwrap_or(Value::Null);
            if let Err(db_err) = inner
                .store
                .finalize_stage_execution(
                    &execution_id,
                    StageStatus::Completed,
                    completed_at_us,
                    duration_ms,
                    Some(&output),
                    None,
                )
                .await
            {
                error!(session_id, stage = %stage.name, error = %db_err, "failed to finalize stage");
            }
            inner.lifecycle(
                &session_id,
                Some(&execution_id),
                &clock,
                LifecycleEventKind::StageCompleted,
                Some(stage.name.clone()),
            );
        } else {
            let message = result
                .error
                .clone()
                .unwrap_or_else(|| "unknown stage error".to_string());
            if let Err(db_err) = inner
                .store
                .finalize_stage_execution(
                    &execution_id,
                    StageStatus::Failed,
                    completed_at_us,
                    duration_ms,
                    None,
                    Some(&message),
                )
                .await
            {
                error!(session_id, stage = %stage.name, error = %db_err, "failed to finalize stage");
            }
            inner.lifecycle(
                &session_id,
                Some(&execution_id),
                &clock,
                LifecycleEventKind::StageFailed,
                Some(message),
            );
        }

        processing.record_stage_output(stage.name.clone(), result);
        inner.publish_progress(
            &session_id,
            &chain.chain_id,
            Some(&stage.name),
            total_stages,
            processing.stage_outputs().len(),
            "processing",
        );

        if cancelled {
            break;
        }
    }

    // Finalize: completed if every stage succeeded, partial if some did,
    // failed otherwise (and always failed on cancellation).
    let executed = processing.stage_outputs().len();
    let succeeded = processing
        .stage_outputs()
        .iter()
        .filter(|(_, r)| r.is_success())
        .count();
    let failed = executed - succeeded;
    let status = if cancelled {
        SessionStatus::Failed
    } else if failed == 0 {
        SessionStatus::Completed
    } else if succeeded > 0 {
        SessionStatus::Partial
    } else {
        SessionStatus::Failed
    };

    let final_analysis = processing
        .latest_analysis()
        .map(str::to_string)
        .unwrap_or_else(|| {
            format!(
                "Chain '{}' finished without an analysis: {executed} of {total_stages} stages \
                 ran, {succeeded} succeeded, {failed} failed.",
                chain.chain_id
            )
        });
    let error_message = if cancelled {
        Some("cancelled".to_string())
    } else if status == SessionStatus::Failed {
        Some(format!("all {executed} stages failed"))
    } else {
        None
    };

    inner.lifecycle(
        &session_id,
        None,
        &clock,
        LifecycleEventKind::SessionFinalized,
        Some(status.as_str().to_string()),
    );
    // Interactions must land in the store before the terminal write.
    inner.bus.flush().await;
    if let Err(db_err) = inner
        .store
        .finalize_session(
            &session_id,
            status,
            clock.now_us(),
            Some(&final_analysis),
            error_message.as_deref(),
        )
        .await
    {
        error!(session_id, error = %db_err, "failed to finalize session");
    }
    inner.publish_progress(
        &session_id,
        &chain.chain_id,
        None,
        total_stages,
        executed,
        status.as_str(),
    );
    info!(
        session_id,
        status = status.as_str(),
        succeeded,
        failed,
        "session finalized"
    );
}
