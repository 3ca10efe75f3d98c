//! Chain and stage definitions: the ordered workflow an alert type maps to.

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Loop discipline an agent uses within a stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum IterationStrategy {
    /// Plain tool iteration: single JSON action per turn, no reasoning
    /// scaffolding.
    #[serde(rename = "regular")]
    Regular,

    /// Standard ReAct Thought/Action/Observation cycles ending in a final
    /// answer.
    #[default]
    #[serde(rename = "react")]
    React,

    /// ReAct data collection only; terminates with `DONE`, produces no
    /// analysis.
    #[serde(rename = "react-tools")]
    ReactTools,

    /// ReAct with tools plus a stage-scoped partial analysis of its own
    /// collected data.
    #[serde(rename = "react-tools-partial")]
    ReactToolsPartial,

    /// Tool-free synthesis over all accumulated data from prior stages.
    #[serde(rename = "react-final-analysis")]
    ReactFinalAnalysis,
}

impl IterationStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Regular => "regular",
            Self::React => "react",
            Self::ReactTools => "react-tools",
            Self::ReactToolsPartial => "react-tools-partial",
            Self::ReactFinalAnalysis => "react-final-analysis",
        }
    }

    /// Whether this strategy may call MCP tools.
    pub fn allows_tools(&self) -> bool {
        !matches!(self, Self::ReactFinalAnalysis)
    }

    /// Whether a successful stage carries an `analysis` field.
    pub fn produces_analysis(&self) -> bool {
        !matches!(self, Self::ReactTools)
    }
}

impl std::fmt::Display for IterationStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One position in a chain, bound to an agent and an optional strategy
/// override.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChainStage {
    pub name: String,
    pub agent_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iteration_strategy: Option<IterationStrategy>,
}

/// What happens to the rest of the chain when a stage fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ChainPolicy {
    /// A failed stage never short-circuits: later analytical stages still
    /// run against whatever was collected.
    #[default]
    ContinueOnFailure,
}

/// Ordered list of stages handling one or more alert types. Immutable once
/// registered.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChainDefinition {
    pub chain_id: String,
    pub alert_types: Vec<String>,
    pub stages: Vec<ChainStage>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub policy: ChainPolicy,
}

impl ChainDefinition {
    /// Structural validation: at least one alert type, at least one stage,
    /// stage names unique within the chain.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.alert_types.is_empty() {
            return Err(ConfigError::Invalid(format!(
                "chain '{}' declares no alert types",
                self.chain_id
            )));
        }
        if self.stages.is_empty() {
            return Err(ConfigError::Invalid(format!(
                "chain '{}' declares no stages",
                self.chain_id
            )));
        }
        let mut seen = std::collections::HashSet::new();
        for stage in &self.stages {
            if !seen.insert(stage.name.as_str()) {
                return Err(ConfigError::Invalid(format!(
                    "chain '{}' has duplicate stage name '{}'",
                    self.chain_id, stage.name
                )));
            }
        }
        Ok(())
    }
}
