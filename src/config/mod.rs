mod app_config;

pub use app_config::{AgentConfig, AppConfig, LogFormat, LoggingConfig};
