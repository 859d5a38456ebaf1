//! Agent implementations

mod chat_agent;
pub mod http_client;

pub use chat_agent::{agents_from_config, ChatAgent, DEFAULT_BASE_URL};
pub use http_client::{HttpClient, HttpClientTrait};
