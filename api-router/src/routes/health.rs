use axum::{extract::State, Json};
use chrono::{SecondsFormat, Utc};
use serde::Serialize;

use crate::api_state::ApiState;

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub chatbot_initialized: bool,
    pub timestamp: String,
    pub error: Option<String>,
}

pub async fn health(State(state): State<ApiState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        chatbot_initialized: state.chatbot.is_some(),
        timestamp: Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true),
        error: state.init_error.clone(),
    })
}
