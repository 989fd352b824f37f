use async_openai::error::OpenAIError;
use thiserror::Error;
use tokio::task::JoinError;

// Core internal errors
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),
    #[error("Upstream unavailable: {0}")]
    UpstreamUnavailable(String),
    #[error("Provider parse error: {0}")]
    ProviderParse(String),
    #[error("Deadline exceeded: {0}")]
    DeadlineExceeded(String),
    #[error("Config mismatch: {0}")]
    ConfigMismatch(String),
    #[error("Store error: {0}")]
    Store(String),
    #[error("OpenAI error: {0}")]
    OpenAI(#[from] OpenAIError),
    #[error("Task join error: {0}")]
    Join(#[from] JoinError),
    #[error("IoError: {0}")]
    Io(#[from] std::io::Error),
    #[error("Reqwest error: {0}")]
    Reqwest(#[from] reqwest::Error),
    #[error("Anyhow error: {0}")]
    Anyhow(#[from] anyhow::Error),
    #[error("Internal service error: {0}")]
    InternalError(String),
}

impl AppError {
    /// True when the error came from a transient upstream failure whose
    /// retries have already been exhausted by the issuing client.
    pub const fn is_upstream(&self) -> bool {
        matches!(
            self,
            Self::UpstreamUnavailable(_) | Self::Store(_) | Self::Reqwest(_) | Self::OpenAI(_)
        )
    }
}
