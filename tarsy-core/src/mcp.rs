//! MCP server configuration and the typed tool surface the pipeline calls
//! through. The wire transport itself lives behind [`McpBroker`]; this crate
//! only defines the seam.

use std::collections::HashMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::ToolError;

/// Connection parameters for one MCP server. Child-process servers carry a
/// command line; remote servers carry a URL.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub struct ConnectionParams {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub env: HashMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

/// Immutable-after-load configuration for one MCP server.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct McpServerConfig {
    pub server_id: String,
    pub server_type: String,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    pub connection_params: ConnectionParams,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instructions: Option<String>,
}

fn default_enabled() -> bool {
    true
}

/// One tool as advertised by an MCP server's `list_tools`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct McpToolDefinition {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub input_schema: serde_json::Value,
}

/// Typed MCP surface the agent runtime talks to. Implemented by the client
/// pool in `tarsy-mcp`; scripted implementations back the tests.
#[async_trait]
pub trait McpBroker: Send + Sync {
    /// List the tools advertised by one server.
    async fn list_tools(&self, server_id: &str) -> Result<Vec<McpToolDefinition>, ToolError>;

    /// Invoke one tool with structured arguments.
    async fn call_tool(
        &self,
        server_id: &str,
        tool_name: &str,
        arguments: serde_json::Value,
    ) -> Result<serde_json::Value, ToolError>;
}
