use std::{sync::Arc, time::Duration};

use async_openai::{
    config::OpenAIConfig,
    error::OpenAIError,
    types::{
        ChatCompletionRequestAssistantMessage, ChatCompletionRequestAssistantMessageContent,
        ChatCompletionRequestMessage, ChatCompletionRequestSystemMessage,
        ChatCompletionRequestUserMessage, CreateChatCompletionRequestArgs, ResponseFormat,
        ResponseFormatJsonSchema,
    },
};
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{debug, warn};

use crate::{error::AppError, utils::config::Provider};

/// Hard per-call ceiling; covers the initial attempt and all retries.
const CALL_TIMEOUT: Duration = Duration::from_secs(30);
const MAX_RETRIES: u32 = 3;

/// Role of a single chat message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChatRole {
    System,
    User,
    Assistant,
}

/// Provider-neutral chat message.
#[derive(Debug, Clone)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::Assistant,
            content: content.into(),
        }
    }
}

/// Options for a single completion call.
#[derive(Debug, Clone)]
pub struct CompletionOptions {
    pub temperature: f32,
    pub max_tokens: Option<u32>,
}

impl Default for CompletionOptions {
    fn default() -> Self {
        Self {
            temperature: 0.1,
            max_tokens: None,
        }
    }
}

/// Token accounting returned alongside each completion.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokenUsage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
}

enum RetryClass {
    RateLimited,
    ServerError,
    Fatal,
}

/// A chat-completion client bound to one provider endpoint and model.
pub struct LlmClient {
    client: Arc<async_openai::Client<OpenAIConfig>>,
    provider: Provider,
    model: String,
    temperature: f32,
}

impl LlmClient {
    pub fn new(
        client: Arc<async_openai::Client<OpenAIConfig>>,
        provider: Provider,
        model: String,
        temperature: f32,
    ) -> Self {
        Self {
            client,
            provider,
            model,
            temperature,
        }
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    /// Free-text completion with the role's default temperature.
    pub async fn complete(
        &self,
        messages: &[ChatMessage],
    ) -> Result<(String, TokenUsage), AppError> {
        self.complete_with_options(
            messages,
            &CompletionOptions {
                temperature: self.temperature,
                max_tokens: None,
            },
        )
        .await
    }

    pub async fn complete_with_options(
        &self,
        messages: &[ChatMessage],
        options: &CompletionOptions,
    ) -> Result<(String, TokenUsage), AppError> {
        let call = self.complete_inner(messages, options, None);
        tokio::time::timeout(CALL_TIMEOUT, call)
            .await
            .map_err(|_| {
                AppError::UpstreamUnavailable(format!(
                    "LLM call to {} timed out after {}s",
                    self.model,
                    CALL_TIMEOUT.as_secs()
                ))
            })?
    }

    /// JSON-mode completion: requests structured output, parses into `T`, and
    /// retries exactly once with a schema reminder if the reply does not
    /// parse. A second failure surfaces as a parse error.
    pub async fn complete_json<T: DeserializeOwned>(
        &self,
        messages: &[ChatMessage],
        schema_name: &str,
        schema: Value,
    ) -> Result<(T, TokenUsage), AppError> {
        let options = CompletionOptions {
            temperature: self.temperature,
            max_tokens: None,
        };

        let call = async {
            let (text, usage) = self
                .complete_inner(messages, &options, Some((schema_name, schema.clone())))
                .await?;

            match parse_json_reply::<T>(&text) {
                Ok(value) => Ok((value, usage)),
                Err(parse_err) => {
                    warn!(
                        model = %self.model,
                        error = %parse_err,
                        "LLM reply failed JSON validation; retrying with schema reminder"
                    );
                    let mut reminded = messages.to_vec();
                    reminded.push(ChatMessage::assistant(text));
                    reminded.push(ChatMessage::user(format!(
                        "Your previous reply was not valid JSON for the expected schema. \
                         Respond again with ONLY a JSON object matching this schema, no prose:\n{schema}"
                    )));
                    let (retry_text, retry_usage) = self
                        .complete_inner(&reminded, &options, Some((schema_name, schema.clone())))
                        .await?;
                    let value = parse_json_reply::<T>(&retry_text)?;
                    Ok((value, retry_usage))
                }
            }
        };

        tokio::time::timeout(CALL_TIMEOUT, call).await.map_err(|_| {
            AppError::UpstreamUnavailable(format!(
                "LLM call to {} timed out after {}s",
                self.model,
                CALL_TIMEOUT.as_secs()
            ))
        })?
    }

    async fn complete_inner(
        &self,
        messages: &[ChatMessage],
        options: &CompletionOptions,
        json_schema: Option<(&str, Value)>,
    ) -> Result<(String, TokenUsage), AppError> {
        let request_messages: Vec<ChatCompletionRequestMessage> =
            messages.iter().map(to_request_message).collect();

        let mut builder = CreateChatCompletionRequestArgs::default();
        builder
            .model(&self.model)
            .messages(request_messages)
            .temperature(options.temperature);
        if let Some(max_tokens) = options.max_tokens {
            builder.max_completion_tokens(max_tokens);
        }
        if let Some((name, schema)) = json_schema {
            builder.response_format(self.response_format(name, schema));
        }
        let request = builder.build()?;

        let mut attempt: u32 = 0;
        loop {
            match self.client.chat().create(request.clone()).await {
                Ok(response) => {
                    let usage = response
                        .usage
                        .as_ref()
                        .map(|usage| TokenUsage {
                            prompt_tokens: usage.prompt_tokens,
                            completion_tokens: usage.completion_tokens,
                        })
                        .unwrap_or_default();
                    let text = response
                        .choices
                        .into_iter()
                        .next()
                        .and_then(|choice| choice.message.content)
                        .ok_or_else(|| {
                            AppError::ProviderParse("No content found in LLM response".into())
                        })?;
                    return Ok((text, usage));
                }
                Err(err) => {
                    let class = classify_openai_error(&err);
                    let delay = match class {
                        RetryClass::RateLimited => Duration::from_secs(2 << attempt),
                        RetryClass::ServerError => Duration::from_secs(1 << attempt),
                        RetryClass::Fatal => return Err(err.into()),
                    };
                    if attempt >= MAX_RETRIES {
                        return Err(AppError::UpstreamUnavailable(format!(
                            "LLM call to {} failed after {} retries: {err}",
                            self.model, MAX_RETRIES
                        )));
                    }
                    debug!(
                        model = %self.model,
                        attempt,
                        delay_secs = delay.as_secs(),
                        error = %err,
                        "Retrying LLM call"
                    );
                    tokio::time::sleep(delay).await;
                    attempt = attempt.saturating_add(1);
                }
            }
        }
    }

    /// The OpenAI-compatible provider supports strict structured output; the
    /// fast provider only honors plain JSON-object mode, so the schema is
    /// enforced by post-validation there.
    fn response_format(&self, name: &str, schema: Value) -> ResponseFormat {
        match self.provider {
            Provider::OpenAiCompatible => ResponseFormat::JsonSchema {
                json_schema: ResponseFormatJsonSchema {
                    description: None,
                    name: name.into(),
                    schema: Some(schema),
                    strict: Some(true),
                },
            },
            Provider::Fast => ResponseFormat::JsonObject,
        }
    }
}

fn to_request_message(message: &ChatMessage) -> ChatCompletionRequestMessage {
    match message.role {
        ChatRole::System => {
            ChatCompletionRequestSystemMessage::from(message.content.clone()).into()
        }
        ChatRole::User => ChatCompletionRequestUserMessage::from(message.content.clone()).into(),
        ChatRole::Assistant => {
            #[allow(deprecated)]
            ChatCompletionRequestMessage::Assistant(ChatCompletionRequestAssistantMessage {
                content: Some(ChatCompletionRequestAssistantMessageContent::Text(
                    message.content.clone(),
                )),
                name: None,
                tool_calls: None,
                refusal: None,
                audio: None,
                function_call: None,
            })
        }
    }
}

/// Some providers wrap JSON replies in markdown fences; strip before parsing.
fn parse_json_reply<T: DeserializeOwned>(text: &str) -> Result<T, AppError> {
    let trimmed = text.trim();
    let body = trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
        .map_or(trimmed, |inner| inner.trim_end_matches("```"));

    serde_json::from_str::<T>(body.trim())
        .map_err(|e| AppError::ProviderParse(format!("Failed to parse LLM JSON reply: {e}")))
}

fn classify_openai_error(err: &OpenAIError) -> RetryClass {
    match err {
        OpenAIError::Reqwest(inner) => {
            if let Some(status) = inner.status() {
                if status.as_u16() == 429 {
                    RetryClass::RateLimited
                } else if status.is_server_error() {
                    RetryClass::ServerError
                } else {
                    RetryClass::Fatal
                }
            } else if inner.is_timeout() || inner.is_connect() {
                RetryClass::ServerError
            } else {
                RetryClass::Fatal
            }
        }
        OpenAIError::ApiError(api) => {
            let kind = api.r#type.as_deref().unwrap_or_default();
            let message = api.message.to_ascii_lowercase();
            if kind.contains("rate_limit") || message.contains("rate limit") {
                RetryClass::RateLimited
            } else if kind.contains("server_error") {
                RetryClass::ServerError
            } else {
                RetryClass::Fatal
            }
        }
        _ => RetryClass::Fatal,
    }
}
