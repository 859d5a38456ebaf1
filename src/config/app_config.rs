use std::path::Path;

use serde::Deserialize;

use crate::domain::WorkflowDefinition;
use crate::infrastructure::agent::DEFAULT_BASE_URL;
use crate::infrastructure::workflow::EngineConfig;

/// Application configuration
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub logging: LoggingConfig,
    pub engine: EngineConfig,
    pub agents: Vec<AgentConfig>,
    pub workflows: Vec<WorkflowDefinition>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

#[derive(Debug, Clone, Deserialize, Default, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::default(),
        }
    }
}

/// A chat agent reachable from workflow steps by `id`
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct AgentConfig {
    pub id: u32,
    pub name: String,
    pub model: String,
    pub base_url: String,
    /// Environment variable holding the API key; no auth header when unset
    pub api_key_env: Option<String>,
    pub system_prompt: Option<String>,
    pub timeout_secs: u64,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            id: 0,
            name: String::new(),
            model: String::new(),
            base_url: DEFAULT_BASE_URL.to_string(),
            api_key_env: None,
            system_prompt: None,
            timeout_secs: 120,
        }
    }
}

impl AppConfig {
    /// Layer `config/default`, `config/local`, an optional explicit file, then `APP__*` env vars
    pub fn load(path: Option<&Path>) -> Result<Self, config::ConfigError> {
        let mut builder = config::Config::builder()
            .add_source(config::File::with_name("config/default").required(false))
            .add_source(config::File::with_name("config/local").required(false));

        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path).required(true));
        }

        let config = builder
            .add_source(
                config::Environment::with_prefix("APP")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        config.try_deserialize()
    }

    pub fn workflow(&self, reference: &str) -> Option<&WorkflowDefinition> {
        self.workflows.iter().find(|w| w.matches(reference))
    }
}
