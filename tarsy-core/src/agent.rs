//! Agent definitions: a configured bundle of MCP servers, instructions, and
//! a default iteration strategy. Agents own no alert-type knowledge.

use serde::{Deserialize, Serialize};

use crate::chain::IterationStrategy;

pub type AgentId = String;

/// A user-configured agent loaded from the chains file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    pub agent_id: AgentId,
    pub mcp_server_ids: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub custom_instructions: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_strategy: Option<IterationStrategy>,
}

/// Agents compiled into the binary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BuiltInAgentKind {
    Kubernetes,
}

impl BuiltInAgentKind {
    pub fn agent_id(&self) -> &'static str {
        match self {
            Self::Kubernetes => "KubernetesAgent",
        }
    }

    pub fn mcp_server_ids(&self) -> &'static [&'static str] {
        match self {
            Self::Kubernetes => &["kubernetes-server"],
        }
    }

    pub fn custom_instructions(&self) -> &'static str {
        match self {
            Self::Kubernetes => {
                "You are investigating a Kubernetes operational alert. \
                 Correlate resource state, events, and finalizers before \
                 concluding. Prefer namespaced queries and never suggest \
                 destructive remediation without citing the evidence for it."
            }
        }
    }

    pub fn default_strategy(&self) -> IterationStrategy {
        match self {
            Self::Kubernetes => IterationStrategy::React,
        }
    }
}

/// An agent as the runtime sees it: either compiled in or user-configured.
/// Both variants expose the same capability set, so the runtime never
/// branches on provenance.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentDefinition {
    BuiltIn(BuiltInAgentKind),
    Configured(AgentConfig),
}

impl AgentDefinition {
    pub fn agent_id(&self) -> &str {
        match self {
            Self::BuiltIn(kind) => kind.agent_id(),
            Self::Configured(config) => &config.agent_id,
        }
    }

    pub fn mcp_server_ids(&self) -> Vec<String> {
        match self {
            Self::BuiltIn(kind) => kind
                .mcp_server_ids()
                .iter()
                .map(|s| s.to_string())
                .collect(),
            Self::Configured(config) => config.mcp_server_ids.clone(),
        }
    }

    pub fn custom_instructions(&self) -> Option<&str> {
        match self {
            Self::BuiltIn(kind) => Some(kind.custom_instructions()),
            Self::Configured(config) => config.custom_instructions.as_deref(),
        }
    }

    pub fn default_strategy(&self) -> Option<IterationStrategy> {
        match self {
            Self::BuiltIn(kind) => Some(kind.default_strategy()),
            Self::Configured(config) => config.default_strategy,
        }
    }

    /// Effective strategy for a stage: stage override, then agent default,
    /// then ReAct.
    pub fn resolve_strategy(&self, stage_override: Option<IterationStrategy>) -> IterationStrategy {
        stage_override
            .or_else(|| self.default_strategy())
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn configured(default: Option<IterationStrategy>) -> AgentDefinition {
        AgentDefinition::Configured(AgentConfig {
            agent_id: "security-agent".into(),
            mcp_server_ids: vec!["security-server".into()],
            custom_instructions: None,
            default_strategy: default,
        })
    }

    #[test]
    fn strategy_resolution_order() {
        let agent = configured(Some(IterationStrategy::ReactTools));

        // Stage override wins.
        assert_eq!(
            agent.resolve_strategy(Some(IterationStrategy::ReactFinalAnalysis)),
            IterationStrategy::ReactFinalAnalysis
        );
        // Agent default next.
        assert_eq!(
            agent.resolve_strategy(None),
            IterationStrategy::ReactTools
        );
        // ReAct as the last resort.
        assert_eq!(
            configured(None).resolve_strategy(None),
            IterationStrategy::React
        );
    }

    #[test]
    fn both_variants_expose_the_same_capability_set() {
        let builtin = AgentDefinition::BuiltIn(BuiltInAgentKind::Kubernetes);
        assert_eq!(builtin.agent_id(), "KubernetesAgent");
        assert_eq!(builtin.mcp_server_ids(), vec!["kubernetes-server"]);
        assert!(builtin.custom_instructions().is_some());
        assert_eq!(
            builtin.default_strategy(),
            Some(IterationStrategy::React)
        );

        let configured = configured(None);
        assert_eq!(configured.agent_id(), "security-agent");
        assert_eq!(configured.mcp_server_ids(), vec!["security-server"]);
    }
}
