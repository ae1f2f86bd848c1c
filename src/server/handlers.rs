//! HTTP request handlers

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::{rejection::JsonRejection, Json, State},
    http::StatusCode,
    response::IntoResponse,
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use uuid::Uuid;

use super::error::ApiError;
use crate::engine::{
    Completion, EngineHandle, LengthCap, RawGenerationRequest, SingleFlightExecutor, Validator,
};
use crate::error::EngineError;
use crate::lifecycle::{Lifecycle, LifecycleState};

/// Shared application state
pub struct AppState {
    pub engine: Arc<EngineHandle>,
    pub executor: Arc<SingleFlightExecutor>,
    pub validator: Validator,
    pub lifecycle: Arc<Lifecycle>,
    /// How long a caller waits for its result; `None` waits indefinitely
    pub request_timeout: Option<Duration>,
}

impl AppState {
    pub fn new(
        engine: Arc<EngineHandle>,
        executor: Arc<SingleFlightExecutor>,
        validator: Validator,
        lifecycle: Arc<Lifecycle>,
    ) -> Self {
        Self {
            engine,
            executor,
            validator,
            lifecycle,
            request_timeout: None,
        }
    }

    pub fn with_request_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Refuse generation unless the service is `Ready`
    fn admission_check(&self) -> Result<(), EngineError> {
        match self.lifecycle.current() {
            LifecycleState::Ready => Ok(()),
            LifecycleState::NotStarted | LifecycleState::Loading => Err(EngineError::NotLoaded),
            LifecycleState::Draining | LifecycleState::Stopped => {
                if self.engine.is_loaded() {
                    Err(EngineError::ShuttingDown)
                } else {
                    Err(EngineError::NotLoaded)
                }
            }
        }
    }
}

/// Health check endpoint.
///
/// Reads only the write-once engine state, the lifecycle watch, and
/// executor counters, so it answers while a generation is running.
pub async fn health(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let engine = state.engine.describe();
    let lifecycle = state.lifecycle.current();
    let stats = state.executor.stats();

    let status = match (engine.loaded, lifecycle) {
        (true, LifecycleState::Ready) => "healthy",
        (_, LifecycleState::Draining | LifecycleState::Stopped) if engine.loaded => "shutting_down",
        _ => "model_not_loaded",
    };

    let response = HealthResponse {
        status: status.to_string(),
        model_loaded: engine.loaded,
        device: engine.device,
        accelerator_available: engine.accelerator_available,
        accelerator_memory_gb: engine.accelerator_memory_gb,
        model: engine.model,
        lifecycle,
        queued_jobs: stats.queued,
        busy: stats.busy,
    };
    (StatusCode::OK, Json(response))
}

/// Text generation endpoint.
///
/// Readiness is checked before the body, so a caller hitting a loading or
/// draining service gets 503 whatever it sent.
pub async fn generate(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<Value>, JsonRejection>,
) -> Result<Json<GenerateResponse>, ApiError> {
    state.admission_check()?;

    let Json(body) = payload?;
    let raw = RawGenerationRequest::from_json(body)?;
    let request = state.validator.validate(raw)?;

    let id = request.id();
    let cap = request.length_cap();

    let completion = state.executor.submit(request, state.request_timeout).await?;

    Ok(Json(GenerateResponse::new(
        id,
        state.engine.model_id(),
        cap,
        completion,
    )))
}

/// Static service description
pub async fn root(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let endpoints = BTreeMap::from([
        ("generate", "POST /generate - Generate text from a prompt"),
        ("health", "GET /health - Health and engine status"),
        ("root", "GET / - This description"),
    ]);

    Json(RootResponse {
        message: "Single-flight text generation API".to_string(),
        service: env!("CARGO_PKG_NAME"),
        version: env!("CARGO_PKG_VERSION"),
        model: state.engine.model_id().to_string(),
        status: state.lifecycle.current(),
        endpoints,
    })
}

// Response types

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub model_loaded: bool,
    pub device: String,
    pub accelerator_available: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub accelerator_memory_gb: Option<f64>,
    pub model: String,
    pub lifecycle: LifecycleState,
    pub queued_jobs: usize,
    pub busy: bool,
}

#[derive(Debug, Serialize)]
pub struct GenerateResponse {
    pub id: String,
    pub model: String,
    pub generated_text: String,
    pub prompt_tokens: usize,
    pub generated_tokens: usize,
    pub total_tokens: usize,
    pub prompt_truncated: bool,
    #[serde(flatten)]
    pub length: LengthCap,
    pub queued_ms: u64,
    pub compute_ms: u64,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
}

impl GenerateResponse {
    pub fn new(id: Uuid, model: &str, length: LengthCap, completion: Completion) -> Self {
        let Completion { result, timing } = completion;
        Self {
            id: format!("gen-{}", id),
            model: model.to_string(),
            generated_text: result.generated_text,
            prompt_tokens: result.prompt_tokens,
            generated_tokens: result.generated_tokens,
            total_tokens: result.total_tokens,
            prompt_truncated: result.prompt_truncated,
            length,
            queued_ms: timing.queued.as_millis() as u64,
            compute_ms: timing.compute.as_millis() as u64,
            started_at: timing.started_at,
            completed_at: timing.completed_at,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct RootResponse {
    pub message: String,
    pub service: &'static str,
    pub version: &'static str,
    pub model: String,
    pub status: LifecycleState,
    pub endpoints: BTreeMap<&'static str, &'static str>,
}
