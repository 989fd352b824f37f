mod client;

pub use client::{ChatMessage, ChatRole, CompletionOptions, LlmClient, TokenUsage};

use std::sync::Arc;

use async_openai::config::OpenAIConfig;

use crate::{
    error::AppError,
    utils::config::{AppConfig, Provider},
};

/// Pipeline roles that issue LLM calls. Each role can be pinned to its own
/// provider and model so mixed-provider setups work.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LlmRole {
    Generator,
    Reranker,
    IntentClassifier,
    Reformulator,
}

impl LlmRole {
    /// Default sampling temperature per role. Reformulation runs warmer so
    /// rewrites do not collapse into echoing the input.
    pub const fn default_temperature(self) -> f32 {
        match self {
            Self::Generator | Self::Reranker | Self::IntentClassifier => 0.1,
            Self::Reformulator => 0.3,
        }
    }
}

/// Per-request model overrides accepted on the chat endpoint.
#[derive(Debug, Clone, Default)]
pub struct ModelOverrides {
    pub provider: Option<Provider>,
    pub llm_model: Option<String>,
    pub reranker_model: Option<String>,
    pub intent_model: Option<String>,
}

/// Routes each pipeline role to a configured provider client and model.
pub struct LlmRouter {
    fast: Arc<async_openai::Client<OpenAIConfig>>,
    openai: Arc<async_openai::Client<OpenAIConfig>>,
    config: AppConfig,
}

impl LlmRouter {
    pub fn new(config: &AppConfig) -> Result<Self, AppError> {
        config.validate()?;

        let fast = Arc::new(async_openai::Client::with_config(
            OpenAIConfig::new()
                .with_api_key(config.groq_api_key.clone().unwrap_or_default())
                .with_api_base(&config.groq_base_url),
        ));
        let openai = Arc::new(async_openai::Client::with_config(
            OpenAIConfig::new()
                .with_api_key(config.openai_api_key.clone().unwrap_or_default())
                .with_api_base(&config.openai_base_url),
        ));

        Ok(Self {
            fast,
            openai,
            config: config.clone(),
        })
    }

    fn provider_client(&self, provider: Provider) -> Arc<async_openai::Client<OpenAIConfig>> {
        match provider {
            Provider::Fast => Arc::clone(&self.fast),
            Provider::OpenAiCompatible => Arc::clone(&self.openai),
        }
    }

    /// Build the client for a role, honoring per-request overrides.
    pub fn for_role(&self, role: LlmRole, overrides: &ModelOverrides) -> LlmClient {
        let configured_provider = match role {
            LlmRole::Generator => self.config.llm_provider,
            LlmRole::Reranker => self.config.reranker_provider,
            LlmRole::IntentClassifier => self.config.intent_classifier_provider,
            LlmRole::Reformulator => self.config.reformulator_provider,
        };
        let provider = overrides.provider.unwrap_or(configured_provider);

        let configured_model = match role {
            LlmRole::Generator => &self.config.llm_model,
            LlmRole::Reranker => &self.config.reranker_model,
            LlmRole::IntentClassifier => &self.config.intent_model,
            LlmRole::Reformulator => &self.config.reformulator_model,
        };
        let override_model = match role {
            LlmRole::Generator => overrides.llm_model.as_ref(),
            LlmRole::Reranker => overrides.reranker_model.as_ref(),
            LlmRole::IntentClassifier => overrides.intent_model.as_ref(),
            LlmRole::Reformulator => None,
        };
        let model = override_model.unwrap_or(configured_model).clone();

        LlmClient::new(
            self.provider_client(provider),
            provider,
            model,
            role.default_temperature(),
        )
    }

    /// Embedding requests always go through the OpenAI-compatible endpoint;
    /// the fast provider does not serve the embedding model family.
    pub fn embedding_client(&self) -> Arc<async_openai::Client<OpenAIConfig>> {
        Arc::clone(&self.openai)
    }
}
