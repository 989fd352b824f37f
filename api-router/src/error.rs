use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use common::error::AppError;
use serde::Serialize;
use thiserror::Error;

#[derive(Error, Debug, Clone)]
pub enum ApiError {
    #[error("{0}")]
    InvalidArgument(String),

    #[error("{0}")]
    UpstreamUnavailable(String),

    #[error("{0}")]
    DeadlineExceeded(String),

    #[error("{0}")]
    ProviderError(String),

    #[error("{0}")]
    ConfigMismatch(String),

    #[error("Internal server error")]
    InternalError(String),
}

impl ApiError {
    const fn code(&self) -> &'static str {
        match self {
            Self::InvalidArgument(_) => "invalid_argument",
            Self::UpstreamUnavailable(_) => "upstream_unavailable",
            Self::DeadlineExceeded(_) => "deadline_exceeded",
            Self::ProviderError(_) => "provider_error",
            Self::ConfigMismatch(_) => "config_mismatch",
            Self::InternalError(_) => "internal_error",
        }
    }

    const fn status(&self) -> StatusCode {
        match self {
            Self::InvalidArgument(_) => StatusCode::BAD_REQUEST,
            Self::UpstreamUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            Self::DeadlineExceeded(_) => StatusCode::GATEWAY_TIMEOUT,
            Self::ProviderError(_) => StatusCode::BAD_GATEWAY,
            Self::ConfigMismatch(_) => StatusCode::CONFLICT,
            Self::InternalError(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<AppError> for ApiError {
    fn from(err: AppError) -> Self {
        match err {
            AppError::InvalidArgument(msg) => Self::InvalidArgument(msg),
            AppError::UpstreamUnavailable(msg) | AppError::Store(msg) => {
                Self::UpstreamUnavailable(msg)
            }
            AppError::DeadlineExceeded(msg) => Self::DeadlineExceeded(msg),
            // Only parse errors with no node-level fallback reach this layer.
            AppError::ProviderParse(msg) => Self::ProviderError(msg),
            AppError::ConfigMismatch(msg) => Self::ConfigMismatch(msg),
            other => {
                tracing::error!("Internal error: {:?}", other);
                Self::InternalError("Internal server error".to_string())
            }
        }
    }
}

#[derive(Serialize, Debug)]
struct ErrorResponse {
    error: String,
    message: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = ErrorResponse {
            error: self.code().to_string(),
            message: self.to_string(),
        };
        (self.status(), Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fmt::Debug;

    fn assert_status_code<T: IntoResponse + Debug>(response: T, expected_status: StatusCode) {
        let response = response.into_response();
        assert_eq!(response.status(), expected_status);
    }

    #[test]
    fn test_app_error_to_api_error_conversion() {
        let invalid = AppError::InvalidArgument("empty question".to_string());
        assert!(matches!(
            ApiError::from(invalid),
            ApiError::InvalidArgument(msg) if msg == "empty question"
        ));

        let deadline = AppError::DeadlineExceeded("60s elapsed".to_string());
        assert!(matches!(
            ApiError::from(deadline),
            ApiError::DeadlineExceeded(_)
        ));

        let store = AppError::Store("qdrant 503".to_string());
        assert!(matches!(
            ApiError::from(store),
            ApiError::UpstreamUnavailable(_)
        ));

        let io = AppError::Io(std::io::Error::other("io error"));
        assert!(matches!(ApiError::from(io), ApiError::InternalError(_)));
    }

    #[test]
    fn test_api_error_response_status_codes() {
        assert_status_code(
            ApiError::InvalidArgument("bad".into()),
            StatusCode::BAD_REQUEST,
        );
        assert_status_code(
            ApiError::UpstreamUnavailable("down".into()),
            StatusCode::SERVICE_UNAVAILABLE,
        );
        assert_status_code(
            ApiError::DeadlineExceeded("late".into()),
            StatusCode::GATEWAY_TIMEOUT,
        );
        assert_status_code(
            ApiError::ProviderError("bad json".into()),
            StatusCode::BAD_GATEWAY,
        );
        assert_status_code(
            ApiError::ConfigMismatch("citation mode".into()),
            StatusCode::CONFLICT,
        );
        assert_status_code(
            ApiError::InternalError("oops".into()),
            StatusCode::INTERNAL_SERVER_ERROR,
        );
    }

    #[test]
    fn test_internal_error_sanitization() {
        // Internal details must not leak into the response message.
        let api_error = ApiError::InternalError("db password incorrect".to_string());
        assert_eq!(api_error.to_string(), "Internal server error");
        assert_status_code(api_error, StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn test_error_codes_are_stable() {
        assert_eq!(ApiError::InvalidArgument(String::new()).code(), "invalid_argument");
        assert_eq!(
            ApiError::DeadlineExceeded(String::new()).code(),
            "deadline_exceeded"
        );
        assert_eq!(
            ApiError::UpstreamUnavailable(String::new()).code(),
            "upstream_unavailable"
        );
        assert_eq!(ApiError::ProviderError(String::new()).code(), "provider_error");
    }
}
