use std::time::Instant;

use axum::{extract::State, Json};
use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;

use chat_pipeline::{ChatRequest, CitedSource, ResponseType};
use common::{
    llm::ModelOverrides,
    utils::config::{Provider, RetrievalMode},
};

use crate::{api_state::ApiState, error::ApiError};

#[derive(Debug, Deserialize)]
pub struct ChatQueryRequest {
    pub question: String,
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default)]
    pub retrieval_mode: Option<String>,
    #[serde(default)]
    pub models: Option<ModelSelection>,
    #[serde(default)]
    pub debug: bool,
}

#[derive(Debug, Deserialize)]
pub struct ModelSelection {
    #[serde(default)]
    pub provider: Option<String>,
    #[serde(default)]
    pub llm_model: Option<String>,
    #[serde(default)]
    pub reranker_model: Option<String>,
    #[serde(default)]
    pub intent_model: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct SourceEntry {
    pub doc: usize,
    pub filename: String,
    pub page: String,
    pub url: String,
}

impl From<CitedSource> for SourceEntry {
    fn from(source: CitedSource) -> Self {
        Self {
            doc: source.doc_number,
            filename: source.filename,
            page: source.page,
            url: source.source_url,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ChatQueryResponse {
    pub answer: String,
    pub sources: Vec<SourceEntry>,
    pub response_type: ResponseType,
    pub processing_time: f64,
    pub session_id: String,
    pub timestamp: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reformulated_query: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub turn_count: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub debug_info: Option<serde_json::Value>,
}

pub async fn chat(
    State(state): State<ApiState>,
    Json(request): Json<ChatQueryRequest>,
) -> Result<Json<ChatQueryResponse>, ApiError> {
    let chatbot = state.chatbot.as_ref().ok_or_else(|| {
        ApiError::UpstreamUnavailable("chatbot is not initialized".to_string())
    })?;

    if request.question.trim().is_empty() {
        return Err(ApiError::InvalidArgument(
            "question must be non-empty".to_string(),
        ));
    }

    let retrieval_mode = request
        .retrieval_mode
        .as_deref()
        .map(RetrievalMode::parse)
        .transpose()
        .map_err(ApiError::from)?;

    let overrides = match request.models {
        Some(models) => ModelOverrides {
            provider: models
                .provider
                .as_deref()
                .map(Provider::parse)
                .transpose()
                .map_err(ApiError::from)?,
            llm_model: models.llm_model,
            reranker_model: models.reranker_model,
            intent_model: models.intent_model,
        },
        None => ModelOverrides::default(),
    };

    let started = Instant::now();
    let outcome = chatbot
        .ask(ChatRequest {
            question: request.question,
            session_id: request.session_id,
            retrieval_mode,
            overrides,
            debug: request.debug,
        })
        .await
        .map_err(ApiError::from)?;
    let processing_time = started.elapsed().as_secs_f64();

    info!(
        response_type = %outcome.response_type,
        sources = outcome.sources.len(),
        processing_time,
        "Chat request served"
    );

    let debug_info = if request.debug {
        serde_json::to_value(&outcome.debug_info).ok()
    } else {
        None
    };

    Ok(Json(ChatQueryResponse {
        answer: outcome.answer,
        sources: outcome.sources.into_iter().map(SourceEntry::from).collect(),
        response_type: outcome.response_type,
        processing_time,
        session_id: outcome.session_id,
        timestamp: Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true),
        reformulated_query: outcome.reformulated_query,
        turn_count: outcome.turn_count,
        debug_info,
    }))
}
