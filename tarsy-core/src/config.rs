//! Runtime settings and the user chains file.
//!
//! Settings come from the environment (the daemon reads them in
//! `tarsyd::config`); the chains file is YAML with top-level `mcp_servers`,
//! `agents`, and `agent_chains` keys. Unknown keys are rejected everywhere.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::agent::AgentConfig;
use crate::chain::{ChainDefinition, ChainPolicy, ChainStage, IterationStrategy};
use crate::error::ConfigError;
use crate::mcp::{ConnectionParams, McpServerConfig};

/// One LLM provider credential + model selection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmProviderSettings {
    pub api_key: String,
    pub model: String,
}

/// Environment-derived settings for the daemon.
#[derive(Debug, Clone)]
pub struct Settings {
    pub llm_providers: HashMap<String, LlmProviderSettings>,
    pub default_llm_provider: String,
    /// Credential for the runbook source (GitHub raw content).
    pub github_token: Option<String>,
    pub max_concurrent_alerts: usize,
    pub history_db_url: String,
    pub history_retention_days: u32,
    pub cors_origins: Vec<String>,
    /// Optional path to the user chains YAML file.
    pub chains_config_path: Option<std::path::PathBuf>,
}

impl Settings {
    /// At least one provider credential is required and the default provider
    /// must be one of them.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.llm_providers.is_empty() {
            return Err(ConfigError::Invalid(
                "no LLM provider credentials configured; at least one is required".into(),
            ));
        }
        if !self.llm_providers.contains_key(&self.default_llm_provider) {
            return Err(ConfigError::Invalid(format!(
                "default_llm_provider '{}' has no configured credential",
                self.default_llm_provider
            )));
        }
        if self.max_concurrent_alerts == 0 {
            return Err(ConfigError::Invalid(
                "max_concurrent_alerts must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

/// Top-level shape of the user chains file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ChainsFile {
    #[serde(default)]
    pub mcp_servers: HashMap<String, McpServerFileEntry>,
    #[serde(default)]
    pub agents: HashMap<String, AgentFileEntry>,
    #[serde(default)]
    pub agent_chains: HashMap<String, ChainFileEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct McpServerFileEntry {
    pub server_type: String,
    #[serde(default = "default_true")]
    pub enabled: bool,
    pub connection_params: ConnectionParams,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instructions: Option<String>,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AgentFileEntry {
    pub mcp_servers: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub custom_instructions: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iteration_strategy: Option<IterationStrategy>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ChainFileEntry {
    pub alert_types: Vec<String>,
    pub stages: Vec<StageFileEntry>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StageFileEntry {
    pub name: String,
    pub agent: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iteration_strategy: Option<IterationStrategy>,
}

impl ChainsFile {
    pub fn to_mcp_server_configs(&self) -> Vec<McpServerConfig> {
        self.mcp_servers
            .iter()
            .map(|(id, entry)| McpServerConfig {
                server_id: id.clone(),
                server_type: entry.server_type.clone(),
                enabled: entry.enabled,
                connection_params: entry.connection_params.clone(),
                instructions: entry.instructions.clone(),
            })
            .collect()
    }

    pub fn to_agent_configs(&self) -> Vec<AgentConfig> {
        self.agents
            .iter()
            .map(|(id, entry)| AgentConfig {
                agent_id: id.clone(),
                mcp_server_ids: entry.mcp_servers.clone(),
                custom_instructions: entry.custom_instructions.clone(),
                default_strategy: entry.iteration_strategy,
            })
            .collect()
    }

    pub fn to_chain_definitions(&self) -> Vec<ChainDefinition> {
        self.agent_chains
            .iter()
            .map(|(id, entry)| ChainDefinition {
                chain_id: id.clone(),
                alert_types: entry.alert_types.clone(),
                stages: entry
                    .stages
                    .iter()
                    .map(|stage| ChainStage {
                        name: stage.name.clone(),
                        agent_id: stage.agent.clone(),
                        iteration_strategy: stage.iteration_strategy,
                    })
                    .collect(),
                description: entry.description.clone(),
                policy: ChainPolicy::default(),
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings_with_provider() -> Settings {
        let mut providers = HashMap::new();
        providers.insert(
            "openai".to_string(),
            LlmProviderSettings {
                api_key: "sk-test".into(),
                model: "gpt-4.1".into(),
            },
        );
        Settings {
            llm_providers: providers,
            default_llm_provider: "openai".into(),
            github_token: None,
            max_concurrent_alerts: 5,
            history_db_url: "sqlite::memory:".into(),
            history_retention_days: 90,
            cors_origins: vec![],
            chains_config_path: None,
        }
    }

    #[test]
    fn settings_require_at_least_one_provider() {
        let mut settings = settings_with_provider();
        assert!(settings.validate().is_ok());

        settings.llm_providers.clear();
        assert!(settings.validate().is_err());
    }

    #[test]
    fn settings_require_default_provider_credential() {
        let mut settings = settings_with_provider();
        settings.default_llm_provider = "anthropic".into();
        assert!(settings.validate().is_err());
    }

    #[test]
    fn chains_file_converts_into_definitions() {
        let yaml = r#"
mcp_servers:
  security-server:
    server_type: security
    connection_params:
      command: npx
      args: ["-y", "security-mcp-server"]
agents:
  security-agent:
    mcp_servers: ["security-server"]
    custom_instructions: "Focus on RBAC."
agent_chains:
  security-chain:
    alert_types: ["security-breach"]
    stages:
      - name: collect
        agent: security-agent
        iteration_strategy: react-tools
      - name: analyze
        agent: security-agent
        iteration_strategy: react-final-analysis
"#;
        let file: ChainsFile = serde_yaml::from_str(yaml).expect("parse");
        let servers = file.to_mcp_server_configs();
        assert_eq!(servers.len(), 1);
        assert!(servers[0].enabled);

        let agents = file.to_agent_configs();
        assert_eq!(agents[0].agent_id, "security-agent");

        let chains = file.to_chain_definitions();
        assert_eq!(chains.len(), 1);
        assert_eq!(chains[0].stages.len(), 2);
        assert_eq!(
            chains[0].stages[1].iteration_strategy,
            Some(IterationStrategy::ReactFinalAnalysis)
        );
        chains[0].validate().expect("valid chain");
    }

    #[test]
    fn chains_file_rejects_unknown_keys() {
        let yaml = r#"
agent_chains:
  security-chain:
    alert_types: ["security-breach"]
    stages:
      - name: collect
        agent: security-agent
    retry_policy: aggressive
"#;
        assert!(serde_yaml::from_str::<ChainsFile>(yaml).is_err());

        let top_level = "unknown_section: {}\n";
        assert!(serde_yaml::from_str::<ChainsFile>(top_level).is_err());
    }
}
