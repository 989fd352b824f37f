use std::sync::Arc;

use chat_pipeline::Chatbot;
use common::utils::config::AppConfig;

/// Shared state for the API routes. The chatbot is optional so the server
/// can expose health before (or despite failed) engine initialization.
#[derive(Clone)]
pub struct ApiState {
    pub chatbot: Option<Arc<Chatbot>>,
    pub config: AppConfig,
    pub init_error: Option<String>,
}

impl ApiState {
    pub fn new(config: AppConfig, chatbot: Option<Arc<Chatbot>>) -> Self {
        Self {
            chatbot,
            config,
            init_error: None,
        }
    }

    pub fn with_init_error(config: AppConfig, error: String) -> Self {
        Self {
            chatbot: None,
            config,
            init_error: Some(error),
        }
    }
}
