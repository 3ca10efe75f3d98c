//! Environment settings and the user chains file.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use tracing::info;

use tarsy_core::config::{ChainsFile, LlmProviderSettings, Settings};
use tarsy_core::error::ConfigError;

const PROVIDER_VARS: &[(&str, &str, &str, &str)] = &[
    ("openai", "OPENAI_API_KEY", "OPENAI_MODEL", "gpt-4.1"),
    (
        "anthropic",
        "ANTHROPIC_API_KEY",
        "ANTHROPIC_MODEL",
        "claude-sonnet-4-5",
    ),
    ("google", "GOOGLE_API_KEY", "GOOGLE_MODEL", "gemini-2.5-pro"),
];

/// Read settings from the process environment. The process refuses to start
/// on any configuration error.
pub fn settings_from_env() -> Result<Settings, ConfigError> {
    settings_from_vars(|name| std::env::var(name).ok())
}

/// Settings from an arbitrary variable source, so the parsing is testable
/// without touching the process environment.
pub fn settings_from_vars(var: impl Fn(&str) -> Option<String>) -> Result<Settings, ConfigError> {
    let mut llm_providers = HashMap::new();
    for &(provider, key_var, model_var, default_model) in PROVIDER_VARS {
        if let Some(api_key) = var(key_var) {
            llm_providers.insert(
                provider.to_string(),
                LlmProviderSettings {
                    api_key,
                    model: var(model_var).unwrap_or_else(|| default_model.to_string()),
                },
            );
        }
    }

    let default_llm_provider =
        var("DEFAULT_LLM_PROVIDER").unwrap_or_else(|| "openai".to_string());

    let max_concurrent_alerts = match var("MAX_CONCURRENT_ALERTS") {
        Some(raw) => raw.parse::<usize>().map_err(|_| {
            ConfigError::Invalid(format!("MAX_CONCURRENT_ALERTS '{raw}' is not a number"))
        })?,
        None => 5,
    };

    let history_retention_days = match var("HISTORY_RETENTION_DAYS") {
        Some(raw) => raw.parse::<u32>().map_err(|_| {
            ConfigError::Invalid(format!("HISTORY_RETENTION_DAYS '{raw}' is not a number"))
        })?,
        None => 90,
    };

    let cors_origins = var("CORS_ORIGINS")
        .map(|raw| {
            raw.split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect()
        })
        .unwrap_or_default();

    let settings = Settings {
        llm_providers,
        default_llm_provider,
        github_token: var("GITHUB_TOKEN"),
        max_concurrent_alerts,
        history_db_url: var("HISTORY_DATABASE_URL")
            .unwrap_or_else(|| "data/tarsy_history.db".to_string()),
        history_retention_days,
        cors_origins,
        chains_config_path: var("AGENT_CONFIG_PATH").map(PathBuf::from),
    };
    settings.validate()?;
    Ok(settings)
}

/// Parse the user chains YAML file. Unknown keys anywhere in the file are
/// rejected.
pub fn load_chains_file(path: &Path) -> Result<ChainsFile, ConfigError> {
    let content = std::fs::read_to_string(path).map_err(|err| {
        ConfigError::Invalid(format!("reading chains file {}: {err}", path.display()))
    })?;
    let file: ChainsFile = serde_yaml::from_str(&content).map_err(|err| {
        ConfigError::Invalid(format!("parsing chains file {}: {err}", path.display()))
    })?;
    info!(
        path = %path.display(),
        mcp_servers = file.mcp_servers.len(),
        agents = file.agents.len(),
        chains = file.agent_chains.len(),
        "loaded chains file"
    );
    Ok(file)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vars<'a>(pairs: &'a [(&'a str, &'a str)]) -> impl Fn(&str) -> Option<String> + 'a {
        move |name| {
            pairs
                .iter()
                .find(|(k, _)| *k == name)
                .map(|(_, v)| v.to_string())
        }
    }

    #[test]
    fn minimal_environment_with_one_provider() {
        let settings =
            settings_from_vars(vars(&[("OPENAI_API_KEY", "sk-test")])).expect("settings");
        assert_eq!(settings.llm_providers.len(), 1);
        assert_eq!(settings.default_llm_provider, "openai");
        assert_eq!(settings.max_concurrent_alerts, 5);
        assert_eq!(settings.history_retention_days, 90);
    }

    #[test]
    fn no_provider_credentials_refuses_to_start() {
        assert!(settings_from_vars(vars(&[])).is_err());
    }

    #[test]
    fn default_provider_must_have_a_credential() {
        let err = settings_from_vars(vars(&[
            ("OPENAI_API_KEY", "sk-test"),
            ("DEFAULT_LLM_PROVIDER", "anthropic"),
        ]))
        .expect_err("missing credential");
        assert!(err.to_string().contains("anthropic"));
    }

    #[test]
    fn numeric_settings_are_validated() {
        let err = settings_from_vars(vars(&[
            ("OPENAI_API_KEY", "sk-test"),
            ("MAX_CONCURRENT_ALERTS", "lots"),
        ]))
        .expect_err("bad number");
        assert!(err.to_string().contains("MAX_CONCURRENT_ALERTS"));
    }

    #[test]
    fn cors_origins_are_split_and_trimmed() {
        let settings = settings_from_vars(vars(&[
            ("OPENAI_API_KEY", "sk-test"),
            ("CORS_ORIGINS", "https://a.example, https://b.example"),
        ]))
        .expect("settings");
        assert_eq!(
            settings.cors_origins,
            vec!["https://a.example", "https://b.example"]
        );
    }
}
