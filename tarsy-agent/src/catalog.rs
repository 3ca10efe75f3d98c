//! The tool catalog an agent sees for one stage: the union of `list_tools`
//! across its assigned MCP servers.

use tarsy_core::mcp::McpToolDefinition;

#[derive(Debug, Clone)]
pub struct CatalogEntry {
    pub server_id: String,
    pub tool: McpToolDefinition,
}

#[derive(Debug, Clone, Default)]
pub struct ToolCatalog {
    entries: Vec<CatalogEntry>,
}

impl ToolCatalog {
    pub fn new(entries: Vec<CatalogEntry>) -> Self {
        Self { entries }
    }

    pub fn empty() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, server_id: &str, tool_name: &str) -> bool {
        self.entries
            .iter()
            .any(|e| e.server_id == server_id && e.tool.name == tool_name)
    }

    /// Tool names on one server, for `ToolNotAvailable` observations.
    pub fn tool_names_for(&self, server_id: &str) -> Vec<String> {
        self.entries
            .iter()
            .filter(|e| e.server_id == server_id)
            .map(|e| e.tool.name.clone())
            .collect()
    }

    /// Render the catalog for the prompt, one `server.tool` per line.
    pub fn render(&self) -> String {
        let mut out = String::new();
        for entry in &self.entries {
            out.push_str("- ");
            out.push_str(&entry.server_id);
            out.push('.');
            out.push_str(&entry.tool.name);
            if !entry.tool.description.is_empty() {
                out.push_str(": ");
                out.push_str(&entry.tool.description);
            }
            out.push('\n');
        }
        out
    }
}
