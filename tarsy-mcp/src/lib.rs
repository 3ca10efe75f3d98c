//! MCP server registry and the instrumented client pool.
//!
//! The pool owns one lazily-initialized connection per `server_id`, shared
//! across alerts, with per-call mutual exclusion as required by the
//! underlying transport. Every `call_tool` carries a deadline and emits an
//! `McpInteractionEvent` on the hook bus, success or failure.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info};

use tarsy_core::error::ToolError;
use tarsy_core::mcp::{McpBroker, McpServerConfig, McpToolDefinition};
use tarsy_hooks::{current_scope, scoped_now_us, HookBus, McpInteractionEvent};

/// Per-call budget for MCP operations.
pub const MCP_CALL_TIMEOUT: Duration = Duration::from_secs(30);

/// One live MCP server connection. The transport implementation is supplied
/// by the embedding process; scripted implementations back the tests.
#[async_trait]
pub trait McpClient: Send + Sync {
    async fn list_tools(&self) -> Result<Vec<McpToolDefinition>, ToolError>;

    async fn call_tool(
        &self,
        name: &str,
        arguments: serde_json::Value,
    ) -> Result<serde_json::Value, ToolError>;
}

/// Creates connections for configured servers on first use.
#[async_trait]
pub trait McpConnector: Send + Sync {
    async fn connect(&self, config: &McpServerConfig) -> Result<Arc<dyn McpClient>, ToolError>;
}

/// Read-only map of server id to configuration. Disabled servers are
/// registered but invisible to lookups.
pub struct McpServerRegistry {
    servers: HashMap<String, McpServerConfig>,
}

impl McpServerRegistry {
    pub fn new(configs: Vec<McpServerConfig>) -> Self {
        let servers = configs
            .into_iter()
            .map(|config| (config.server_id.clone(), config))
            .collect();
        Self { servers }
    }

    /// Look up an enabled server.
    pub fn get(&self, server_id: &str) -> Result<&McpServerConfig, ToolError> {
        let config = self
            .servers
            .get(server_id)
            .ok_or_else(|| ToolError::ServerNotFound {
                server_id: server_id.to_string(),
            })?;
        if !config.enabled {
            return Err(ToolError::ServerDisabled {
                server_id: server_id.to_string(),
            });
        }
        Ok(config)
    }

    /// Whether the id names an enabled server.
    pub fn is_enabled(&self, server_id: &str) -> bool {
        self.servers.get(server_id).is_some_and(|c| c.enabled)
    }

    /// Whether the id is registered at all, enabled or not.
    pub fn contains(&self, server_id: &str) -> bool {
        self.servers.contains_key(server_id)
    }

    pub fn len(&self) -> usize {
        self.servers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.servers.is_empty()
    }

    /// Operational instructions of every configured server, keyed by id.
    pub fn instruction_map(&self) -> HashMap<String, String> {
        self.servers
            .iter()
            .filter_map(|(id, config)| {
                config
                    .instructions
                    .as_ref()
                    .map(|text| (id.clone(), text.clone()))
            })
            .collect()
    }

    /// Operational instructions of the named servers, for prompt assembly.
    pub fn instructions_for(&self, server_ids: &[String]) -> Vec<(String, String)> {
        server_ids
            .iter()
            .filter_map(|id| {
                self.servers
                    .get(id)
                    .and_then(|c| c.instructions.as_ref())
                    .map(|text| (id.clone(), text.clone()))
            })
            .collect()
    }
}

struct PoolEntry {
    client: Arc<dyn McpClient>,
    /// Serializes calls on one connection.
    call_lock: Arc<Mutex<()>>,
}

/// Lazily-connecting MCP client pool, instrumented with the hook bus.
pub struct McpClientPool {
    registry: Arc<McpServerRegistry>,
    connector: Arc<dyn McpConnector>,
    bus: HookBus,
    entries: RwLock<HashMap<String, PoolEntry>>,
}

impl McpClientPool {
    pub fn new(
        registry: Arc<McpServerRegistry>,
        connector: Arc<dyn McpConnector>,
        bus: HookBus,
    ) -> Self {
        Self {
            registry,
            connector,
            bus,
            entries: RwLock::new(HashMap::new()),
        }
    }

    async fn entry_for(&self, server_id: &str) -> Result<(Arc<dyn McpClient>, Arc<Mutex<()>>), ToolError> {
        {
            let entries = self.entries.read().await;
            if let Some(entry) = entries.get(server_id) {
                return Ok((entry.client.clone(), entry.call_lock.clone()));
            }
        }

        let config = self.registry.get(server_id)?.clone();
        let mut entries = self.entries.write().await;
        // Another task may have connected while we waited for the write lock.
        if let Some(entry) = entries.get(server_id) {
            return Ok((entry.client.clone(), entry.call_lock.clone()));
        }
        let client = self.connector.connect(&config).await?;
        info!(server_id, "MCP connection established");
        let call_lock = Arc::new(Mutex::new(()));
        entries.insert(
            server_id.to_string(),
            PoolEntry {
                client: client.clone(),
                call_lock: call_lock.clone(),
            },
        );
        Ok((client, call_lock))
    }

    fn emit_event(
        &self,
        server_id: &str,
        tool_name: &str,
        arguments: &serde_json::Value,
        ts_us: i64,
        started: Instant,
        outcome: &Result<serde_json::Value, ToolError>,
    ) {
        let scope = current_scope();
        self.bus.publish_mcp(McpInteractionEvent {
            session_id: scope
                .as_ref()
                .map(|s| s.session_id.clone())
                .unwrap_or_default(),
            stage_execution_id: scope.and_then(|s| s.stage_execution_id),
            ts_us,
            server_id: server_id.to_string(),
            tool_name: tool_name.to_string(),
            arguments: arguments.clone(),
            result: outcome.as_ref().ok().cloned(),
            duration_ms: started.elapsed().as_millis() as i64,
            error: outcome.as_ref().err().map(|e| e.to_string()),
        });
    }
}

#[async_trait]
impl McpBroker for McpClientPool {
    async fn list_tools(&self, server_id: &str) -> Result<Vec<McpToolDefinition>, ToolError> {
        let (client, call_lock) = self.entry_for(server_id).await?;
        let _guard = call_lock.lock().await;
        let tools = tokio::time::timeout(MCP_CALL_TIMEOUT, client.list_tools())
            .await
            .map_err(|_| ToolError::Timeout {
                seconds: MCP_CALL_TIMEOUT.as_secs(),
            })??;
        debug!(server_id, tool_count = tools.len(), "listed MCP tools");
        Ok(tools)
    }

    async fn call_tool(
        &self,
        server_id: &str,
        tool_name: &str,
        arguments: serde_json::Value,
    ) -> Result<serde_json::Value, ToolError> {
        let ts_us = scoped_now_us();
        let started = Instant::now();

        let outcome = match self.entry_for(server_id).await {
            Ok((client, call_lock)) => {
                let _guard = call_lock.lock().await;
                match tokio::time::timeout(
                    MCP_CALL_TIMEOUT,
                    client.call_tool(tool_name, arguments.clone()),
                )
                .await
                {
                    Ok(result) => result,
                    Err(_) => Err(ToolError::Timeout {
                        seconds: MCP_CALL_TIMEOUT.as_secs(),
                    }),
                }
            }
            Err(err) => Err(err),
        };

        self.emit_event(server_id, tool_name, &arguments, ts_us, started, &outcome);
        outcome
    }
}
