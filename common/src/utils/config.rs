use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;

use crate::error::AppError;

/// LLM provider backing a pipeline role. Both speak the OpenAI wire
/// protocol; they differ in base URL and credentials.
#[derive(Clone, Copy, Deserialize, Debug, PartialEq, Eq)]
pub enum Provider {
    #[serde(rename = "fast")]
    Fast,
    #[serde(rename = "openai-compatible")]
    OpenAiCompatible,
}

impl Provider {
    pub fn parse(value: &str) -> Result<Self, AppError> {
        match value {
            "fast" => Ok(Self::Fast),
            "openai-compatible" => Ok(Self::OpenAiCompatible),
            other => Err(AppError::InvalidArgument(format!(
                "unknown provider `{other}`, expected `fast` or `openai-compatible`"
            ))),
        }
    }
}

impl std::fmt::Display for Provider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Fast => write!(f, "fast"),
            Self::OpenAiCompatible => write!(f, "openai-compatible"),
        }
    }
}

/// Retrieval strategy selecting how candidate chunks are gathered.
#[derive(Clone, Copy, Deserialize, Debug, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum RetrievalMode {
    Dense,
    Hybrid,
    Managed,
}

impl RetrievalMode {
    pub fn parse(value: &str) -> Result<Self, AppError> {
        match value {
            "dense" => Ok(Self::Dense),
            "hybrid" => Ok(Self::Hybrid),
            "managed" => Ok(Self::Managed),
            other => Err(AppError::InvalidArgument(format!(
                "unknown retrieval mode `{other}`, expected `dense`, `hybrid` or `managed`"
            ))),
        }
    }
}

impl std::fmt::Display for RetrievalMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Dense => write!(f, "dense"),
            Self::Hybrid => write!(f, "hybrid"),
            Self::Managed => write!(f, "managed"),
        }
    }
}

#[derive(Clone, Deserialize, Debug)]
pub struct AppConfig {
    pub qdrant_api_url: String,
    #[serde(default)]
    pub qdrant_api_key: Option<String>,
    #[serde(default = "default_collection")]
    pub qdrant_collection: String,

    #[serde(default)]
    pub openai_api_key: Option<String>,
    #[serde(default = "default_openai_base_url")]
    pub openai_base_url: String,
    #[serde(default)]
    pub groq_api_key: Option<String>,
    #[serde(default = "default_groq_base_url")]
    pub groq_base_url: String,

    #[serde(default = "default_provider")]
    pub llm_provider: Provider,
    #[serde(default = "default_provider")]
    pub reranker_provider: Provider,
    #[serde(default = "default_provider")]
    pub intent_classifier_provider: Provider,
    #[serde(default = "default_provider")]
    pub reformulator_provider: Provider,

    #[serde(default = "default_llm_model")]
    pub llm_model: String,
    #[serde(default = "default_llm_model")]
    pub reranker_model: String,
    #[serde(default = "default_intent_model")]
    pub intent_model: String,
    #[serde(default = "default_intent_model")]
    pub reformulator_model: String,

    #[serde(default = "default_embedding_model")]
    pub embedding_model: String,
    #[serde(default = "default_embedding_dimensions")]
    pub embedding_dimensions: u32,

    #[serde(default = "default_retrieval_mode")]
    pub retrieval_mode: RetrievalMode,
    #[serde(default)]
    pub conversational_mode: bool,

    #[serde(default = "default_retrieval_top_k")]
    pub retrieval_top_k: usize,
    #[serde(default = "default_rerank_top_k")]
    pub rerank_top_k: usize,
    #[serde(default = "default_min_similarity")]
    pub min_similarity: f32,

    #[serde(default = "default_web_fallback_min_chunks")]
    pub web_fallback_min_chunks: usize,
    #[serde(default = "default_web_fallback_min_score")]
    pub web_fallback_min_score: f32,
    #[serde(default = "default_web_search_top_k")]
    pub web_search_top_k: usize,
    #[serde(default)]
    pub web_search_api_url: Option<String>,
    #[serde(default)]
    pub web_search_api_key: Option<String>,
    #[serde(default)]
    pub managed_search_api_url: Option<String>,

    #[serde(default = "default_session_timeout_minutes")]
    pub session_timeout_minutes: u64,
    #[serde(default = "default_max_history_turns")]
    pub max_history_turns: usize,
    #[serde(default = "default_parallel_workers")]
    pub parallel_workers: usize,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,

    #[serde(default)]
    pub cors_origins: Option<String>,
    #[serde(default = "default_frontend_url")]
    pub frontend_url: String,
    #[serde(default = "default_deployment_domain_suffix")]
    pub deployment_domain_suffix: String,

    #[serde(default = "default_http_port")]
    pub http_port: u16,
}

fn default_collection() -> String {
    "childcare_chunks".to_string()
}

fn default_openai_base_url() -> String {
    "https://api.openai.com/v1".to_string()
}

fn default_groq_base_url() -> String {
    "https://api.groq.com/openai/v1".to_string()
}

const fn default_provider() -> Provider {
    Provider::Fast
}

fn default_llm_model() -> String {
    "llama-3.3-70b-versatile".to_string()
}

fn default_intent_model() -> String {
    "llama-3.1-8b-instant".to_string()
}

fn default_embedding_model() -> String {
    "text-embedding-3-small".to_string()
}

const fn default_embedding_dimensions() -> u32 {
    1536
}

const fn default_retrieval_mode() -> RetrievalMode {
    RetrievalMode::Hybrid
}

const fn default_retrieval_top_k() -> usize {
    10
}

const fn default_rerank_top_k() -> usize {
    5
}

const fn default_min_similarity() -> f32 {
    0.3
}

const fn default_web_fallback_min_chunks() -> usize {
    3
}

const fn default_web_fallback_min_score() -> f32 {
    0.7
}

const fn default_web_search_top_k() -> usize {
    5
}

const fn default_session_timeout_minutes() -> u64 {
    30
}

const fn default_max_history_turns() -> usize {
    5
}

const fn default_parallel_workers() -> usize {
    5
}

const fn default_request_timeout_secs() -> u64 {
    60
}

fn default_frontend_url() -> String {
    "http://localhost:3000".to_string()
}

fn default_deployment_domain_suffix() -> String {
    ".vercel.app".to_string()
}

const fn default_http_port() -> u16 {
    8000
}

impl AppConfig {
    /// Reject invalid provider/credential combinations before anything is
    /// wired up. Every configured role must have a key for its provider.
    pub fn validate(&self) -> Result<(), AppError> {
        let roles = [
            ("llm_provider", self.llm_provider),
            ("reranker_provider", self.reranker_provider),
            ("intent_classifier_provider", self.intent_classifier_provider),
            ("reformulator_provider", self.reformulator_provider),
        ];

        for (role, provider) in roles {
            let key = match provider {
                Provider::Fast => &self.groq_api_key,
                Provider::OpenAiCompatible => &self.openai_api_key,
            };
            if key.as_deref().map_or(true, str::is_empty) {
                return Err(AppError::InvalidArgument(format!(
                    "{role} is set to `{provider}` but no API key is configured for it"
                )));
            }
        }

        if self.retrieval_mode == RetrievalMode::Managed && self.managed_search_api_url.is_none() {
            return Err(AppError::InvalidArgument(
                "retrieval_mode is `managed` but managed_search_api_url is not set".to_string(),
            ));
        }

        if self.retrieval_top_k == 0 || self.rerank_top_k == 0 {
            return Err(AppError::InvalidArgument(
                "retrieval_top_k and rerank_top_k must be greater than zero".to_string(),
            ));
        }

        Ok(())
    }

    /// Comma-separated CORS origins plus the frontend URL.
    pub fn allowed_origins(&self) -> Vec<String> {
        let mut origins: Vec<String> = self
            .cors_origins
            .as_deref()
            .unwrap_or_default()
            .split(',')
            .map(str::trim)
            .filter(|origin| !origin.is_empty())
            .map(str::to_string)
            .collect();
        if !origins.contains(&self.frontend_url) {
            origins.push(self.frontend_url.clone());
        }
        origins
    }
}

pub fn get_config() -> Result<AppConfig, ConfigError> {
    let config = Config::builder()
        .add_source(File::with_name("config").required(false))
        .add_source(Environment::default())
        .build()?;

    config.try_deserialize()
}
