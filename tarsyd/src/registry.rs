//! Built-in definitions and the agent/chain registries.
//!
//! This module is the single source of truth for everything compiled into
//! the binary: the Kubernetes agent, its MCP server, and the chain mapping
//! kubernetes alert types onto it. User-supplied definitions from the chains
//! file are merged in at construction with strict uniqueness checks.

use std::collections::HashMap;
use std::sync::Arc;

use tarsy_core::agent::{AgentConfig, AgentDefinition, BuiltInAgentKind};
use tarsy_core::chain::{ChainDefinition, ChainPolicy, ChainStage};
use tarsy_core::error::{ConfigError, ProcessingError};
use tarsy_core::mcp::{ConnectionParams, McpServerConfig};
use tarsy_mcp::McpServerRegistry;

pub fn builtin_mcp_servers() -> Vec<McpServerConfig> {
    vec![McpServerConfig {
        server_id: "kubernetes-server".into(),
        server_type: "kubernetes".into(),
        enabled: true,
        connection_params: ConnectionParams {
            command: Some("npx".into()),
            args: vec!["-y".into(), "kubernetes-mcp-server@latest".into()],
            env: HashMap::new(),
            url: None,
        },
        instructions: Some(
            "For Kubernetes operations:\n\
             - Be careful with cluster-scoped resource listings in large clusters\n\
             - Always prefer namespaced queries when possible\n\
             - Use kubectl explain for resource schema information\n\
             - Check resource quotas before creating new resources"
                .into(),
        ),
    }]
}

pub fn builtin_agents() -> Vec<AgentDefinition> {
    vec![AgentDefinition::BuiltIn(BuiltInAgentKind::Kubernetes)]
}

pub fn builtin_chains() -> Vec<ChainDefinition> {
    vec![ChainDefinition {
        chain_id: "kubernetes-agent-chain".into(),
        alert_types: vec!["kubernetes".into(), "NamespaceTerminating".into()],
        stages: vec![ChainStage {
            name: "analysis".into(),
            agent_id: "KubernetesAgent".into(),
            iteration_strategy: None,
        }],
        description: Some("Single-stage analysis of Kubernetes alerts".into()),
        policy: ChainPolicy::default(),
    }]
}

/// Read-only map of agent id to definition.
#[derive(Debug)]
pub struct AgentRegistry {
    agents: HashMap<String, Arc<AgentDefinition>>,
}

impl AgentRegistry {
    /// Merge built-in and configured agents; duplicate ids are a
    /// configuration error, never a silent override.
    pub fn build(
        builtin: Vec<AgentDefinition>,
        configured: Vec<AgentConfig>,
    ) -> Result<Self, ConfigError> {
        let mut agents: HashMap<String, Arc<AgentDefinition>> = HashMap::new();
        for agent in builtin
            .into_iter()
            .chain(configured.into_iter().map(AgentDefinition::Configured))
        {
            let id = agent.agent_id().to_string();
            if agents.insert(id.clone(), Arc::new(agent)).is_some() {
                return Err(ConfigError::DuplicateAgentId { agent_id: id });
            }
        }
        Ok(Self { agents })
    }

    pub fn get(&self, agent_id: &str) -> Option<Arc<AgentDefinition>> {
        self.agents.get(agent_id).cloned()
    }

    pub fn contains(&self, agent_id: &str) -> bool {
        self.agents.contains_key(agent_id)
    }

    pub fn len(&self) -> usize {
        self.agents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.agents.is_empty()
    }
}

/// Maps alert types to chains. Immutable after construction.
#[derive(Debug)]
pub struct ChainRegistry {
    chains: HashMap<String, Arc<ChainDefinition>>,
    by_alert_type: HashMap<String, String>,
}

impl ChainRegistry {
    /// Assemble from built-in and user-supplied chains with strict checks:
    /// no duplicate chain ids, no alert type claimed twice, every stage
    /// agent resolvable, every referenced MCP server present and enabled.
    pub fn build(
        builtin: Vec<ChainDefinition>,
        user: Vec<ChainDefinition>,
        agents: &AgentRegistry,
        mcp_servers: &McpServerRegistry,
    ) -> Result<Self, ConfigError> {
        let mut chains: HashMap<String, Arc<ChainDefinition>> = HashMap::new();
        let mut by_alert_type: HashMap<String, String> = HashMap::new();

        for chain in builtin.into_iter().chain(user) {
            chain.validate()?;

            if chains.contains_key(&chain.chain_id) {
                return Err(ConfigError::DuplicateChainId {
                    chain_id: chain.chain_id.clone(),
                });
            }

            for stage in &chain.stages {
                let Some(agent) = agents.get(&stage.agent_id) else {
                    return Err(ConfigError::UnknownStageAgent {
                        chain_id: chain.chain_id.clone(),
                        stage: stage.name.clone(),
                        agent_id: stage.agent_id.clone(),
                    });
                };
                for server_id in agent.mcp_server_ids() {
                    if !mcp_servers.contains(&server_id) {
                        return Err(ConfigError::BadMcpServerReference {
                            agent_id: stage.agent_id.clone(),
                            server_id,
                            reason: "not configured".into(),
                        });
                    }
                    if !mcp_servers.is_enabled(&server_id) {
                        return Err(ConfigError::BadMcpServerReference {
                            agent_id: stage.agent_id.clone(),
                            server_id,
                            reason: "disabled".into(),
                        });
                    }
                }
            }

            for alert_type in &chain.alert_types {
                if let Some(existing) = by_alert_type.get(alert_type) {
                    return Err(ConfigError::AlertTypeConflict {
                        alert_type: alert_type.clone(),
                        first: existing.clone(),
                        second: chain.chain_id.clone(),
                    });
                }
                by_alert_type.insert(alert_type.clone(), chain.chain_id.clone());
            }

            chains.insert(chain.chain_id.clone(), Arc::new(chain));
        }

        Ok(Self {
            chains,
            by_alert_type,
        })
    }

    /// Resolve the chain handling an alert type. The error lists known
    /// types sorted lexicographically.
    pub fn get_chain_for_alert_type(
        &self,
        alert_type: &str,
    ) -> Result<Arc<ChainDefinition>, ProcessingError> {
        self.by_alert_type
            .get(alert_type)
            .and_then(|chain_id| self.chains.get(chain_id))
            .cloned()
            .ok_or_else(|| ProcessingError::UnknownAlertType {
                alert_type: alert_type.to_string(),
                known: self.alert_types().join(", "),
            })
    }

    /// All registered alert types, sorted lexicographically.
    pub fn alert_types(&self) -> Vec<String> {
        let mut types: Vec<String> = self.by_alert_type.keys().cloned().collect();
        types.sort();
        types
    }

    pub fn len(&self) -> usize {
        self.chains.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chains.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tarsy_core::chain::IterationStrategy;

    fn user_chain(chain_id: &str, alert_type: &str, agent_id: &str) -> ChainDefinition {
        ChainDefinition {
            chain_id: chain_id.into(),
            alert_types: vec![alert_type.into()],
            stages: vec![ChainStage {
                name: "analysis".into(),
                agent_id: agent_id.into(),
                iteration_strategy: Some(IterationStrategy::React),
            }],
            description: None,
            policy: ChainPolicy::default(),
        }
    }

    fn user_agent(agent_id: &str, server_id: &str) -> AgentConfig {
        AgentConfig {
            agent_id: agent_id.into(),
            mcp_server_ids: vec![server_id.into()],
            custom_instructions: None,
            default_strategy: None,
        }
    }

    fn server(id: &str, enabled: bool) -> McpServerConfig {
        McpServerConfig {
            server_id: id.into(),
            server_type: "custom".into(),
            enabled,
            connection_params: ConnectionParams::default(),
            instructions: None,
        }
    }

    fn full_registry() -> (AgentRegistry, McpServerRegistry) {
        let agents = AgentRegistry::build(
            builtin_agents(),
            vec![user_agent("security-agent", "security-server")],
        )
        .expect("agents");
        let mut servers = builtin_mcp_servers();
        servers.push(server("security-server", true));
        (agents, McpServerRegistry::new(servers))
    }

    #[test]
    fn builtin_chain_resolves_kubernetes_alert_types() {
        let (agents, servers) = full_registry();
        let registry =
            ChainRegistry::build(builtin_chains(), vec![], &agents, &servers).expect("build");

        for alert_type in ["kubernetes", "NamespaceTerminating"] {
            let chain = registry
                .get_chain_for_alert_type(alert_type)
                .expect("resolve");
            assert_eq!(chain.chain_id, "kubernetes-agent-chain");
        }
    }

    #[test]
    fn unknown_alert_type_lists_known_types_sorted() {
        let (agents, servers) = full_registry();
        let registry = ChainRegistry::build(
            builtin_chains(),
            vec![user_chain("security-chain", "security-breach", "security-agent")],
            &agents,
            &servers,
        )
        .expect("build");

        let err = registry
            .get_chain_for_alert_type("mars")
            .expect_err("unknown type");
        match err {
            ProcessingError::UnknownAlertType { known, .. } => {
                assert_eq!(known, "NamespaceTerminating, kubernetes, security-breach");
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn duplicate_chain_id_across_sources_is_rejected() {
        let (agents, servers) = full_registry();
        let err = ChainRegistry::build(
            builtin_chains(),
            vec![user_chain(
                "kubernetes-agent-chain",
                "another-type",
                "security-agent",
            )],
            &agents,
            &servers,
        )
        .expect_err("duplicate id");
        assert!(matches!(err, ConfigError::DuplicateChainId { .. }));
    }

    #[test]
    fn alert_type_claimed_twice_is_rejected() {
        let (agents, servers) = full_registry();
        let err = ChainRegistry::build(
            builtin_chains(),
            vec![user_chain("second-chain", "kubernetes", "security-agent")],
            &agents,
            &servers,
        )
        .expect_err("conflict");
        match err {
            ConfigError::AlertTypeConflict {
                alert_type,
                first,
                second,
            } => {
                assert_eq!(alert_type, "kubernetes");
                assert_eq!(first, "kubernetes-agent-chain");
                assert_eq!(second, "second-chain");
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn unknown_stage_agent_is_rejected() {
        let (agents, servers) = full_registry();
        let err = ChainRegistry::build(
            builtin_chains(),
            vec![user_chain("ghost-chain", "ghost", "GhostAgent")],
            &agents,
            &servers,
        )
        .expect_err("unknown agent");
        assert!(matches!(err, ConfigError::UnknownStageAgent { .. }));
    }

    #[test]
    fn disabled_mcp_server_reference_is_rejected() {
        let agents = AgentRegistry::build(
            builtin_agents(),
            vec![user_agent("security-agent", "security-server")],
        )
        .expect("agents");
        let mut servers = builtin_mcp_servers();
        servers.push(server("security-server", false));
        let servers = McpServerRegistry::new(servers);

        let err = ChainRegistry::build(
            builtin_chains(),
            vec![user_chain("security-chain", "security-breach", "security-agent")],
            &agents,
            &servers,
        )
        .expect_err("disabled server");
        match err {
            ConfigError::BadMcpServerReference { reason, .. } => assert_eq!(reason, "disabled"),
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn duplicate_agent_id_is_rejected() {
        let err = AgentRegistry::build(
            builtin_agents(),
            vec![user_agent("KubernetesAgent", "kubernetes-server")],
        )
        .expect_err("duplicate agent");
        assert!(matches!(err, ConfigError::DuplicateAgentId { .. }));
    }
}
