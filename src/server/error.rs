//! Error responses
//!
//! Every `EngineError` becomes one status code and a JSON body of the form
//! `{"error": {"message", "type", "field"?}}`. Bodies refused before JSON
//! parsing (too large, wrong content type) keep the status axum gives them.

use axum::{
    extract::rejection::JsonRejection,
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;

use crate::error::EngineError;

/// Seconds a rejected client is told to wait before retrying
const RETRY_AFTER_SECS: u64 = 1;

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: ErrorDetail,
}

#[derive(Debug, Serialize)]
pub struct ErrorDetail {
    pub message: String,
    pub r#type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub field: Option<String>,
}

/// Error wrapper returned by handlers
#[derive(Debug)]
pub enum ApiError {
    /// A pipeline failure, mapped by variant
    Engine(EngineError),
    /// The body was refused before it could be read as JSON
    Body { status: StatusCode, message: String },
}

impl From<EngineError> for ApiError {
    fn from(e: EngineError) -> Self {
        ApiError::Engine(e)
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        let status = rejection.status();
        let message = rejection.body_text();
        match rejection {
            JsonRejection::JsonSyntaxError(_) | JsonRejection::JsonDataError(_) => {
                ApiError::Engine(EngineError::invalid("body", message))
            }
            // Oversized body (413), wrong content type (415), and the like
            _ => ApiError::Body { status, message },
        }
    }
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        let err = match self {
            ApiError::Engine(err) => err,
            ApiError::Body { status, .. } => return *status,
        };
        match err {
            EngineError::NotLoaded | EngineError::ShuttingDown => StatusCode::SERVICE_UNAVAILABLE,
            EngineError::InvalidParameter { .. } => StatusCode::BAD_REQUEST,
            EngineError::Busy { .. } => StatusCode::TOO_MANY_REQUESTS,
            EngineError::Generation(_) | EngineError::Load(_) => StatusCode::INTERNAL_SERVER_ERROR,
            EngineError::Timeout { .. } => StatusCode::GATEWAY_TIMEOUT,
        }
    }

    fn kind(&self) -> &'static str {
        match self {
            ApiError::Body { .. } => "invalid_request",
            ApiError::Engine(EngineError::NotLoaded) => "engine_not_loaded",
            ApiError::Engine(EngineError::InvalidParameter { .. }) => "invalid_parameter",
            ApiError::Engine(EngineError::Busy { .. }) => "engine_busy",
            ApiError::Engine(EngineError::Generation(_)) => "generation_error",
            ApiError::Engine(EngineError::Load(_)) => "engine_load_error",
            ApiError::Engine(EngineError::ShuttingDown) => "shutting_down",
            ApiError::Engine(EngineError::Timeout { .. }) => "timeout",
        }
    }

    fn detail(&self) -> ErrorDetail {
        let (message, field) = match self {
            ApiError::Body { message, .. } => (message.clone(), Some("body".to_string())),
            // Engine internals stay in the logs.
            ApiError::Engine(EngineError::Generation(_)) => {
                ("internal error during generation".to_string(), None)
            }
            ApiError::Engine(EngineError::Load(_)) => ("engine failed to load".to_string(), None),
            ApiError::Engine(EngineError::InvalidParameter { field, reason }) => {
                (format!("{}: {}", field, reason), Some(field.clone()))
            }
            ApiError::Engine(other) => (other.to_string(), None),
        };
        ErrorDetail {
            message,
            r#type: self.kind().to_string(),
            field,
        }
    }

    fn is_retryable(&self) -> bool {
        matches!(self, ApiError::Engine(err) if err.is_retryable())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = Json(ErrorResponse {
            error: self.detail(),
        });

        let mut response = (status, body).into_response();
        if self.is_retryable() {
            response
                .headers_mut()
                .insert(header::RETRY_AFTER, HeaderValue::from(RETRY_AFTER_SECS));
        }
        response
    }
}
