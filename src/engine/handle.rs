//! Engine handle
//!
//! Owns the loaded backend and the write-once `EngineState`. Status reads
//! never touch the backend lock, so they stay fast while a generation runs.

use std::sync::{Mutex, OnceLock, PoisonError};

use serde::Serialize;

use crate::error::{EngineError, Result};

use super::backend::{BackendLoader, InferenceBackend};
use super::request::{GenerationRequest, GenerationResult};

/// Snapshot of the engine's load state and device
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EngineState {
    pub loaded: bool,
    pub model: String,
    pub device: String,
    pub accelerator_available: bool,
    pub accelerator_memory_gb: Option<f64>,
}

impl EngineState {
    fn unloaded(model: &str) -> Self {
        Self {
            loaded: false,
            model: model.to_string(),
            device: "unknown".to_string(),
            accelerator_available: false,
            accelerator_memory_gb: None,
        }
    }
}

/// Process-wide handle to the inference engine
pub struct EngineHandle {
    model_id: String,
    max_prompt_tokens: usize,
    backend: Mutex<Option<Box<dyn InferenceBackend>>>,
    state: OnceLock<EngineState>,
}

impl EngineHandle {
    /// Create an unloaded handle
    pub fn new(model_id: impl Into<String>, max_prompt_tokens: usize) -> Self {
        Self {
            model_id: model_id.into(),
            max_prompt_tokens,
            backend: Mutex::new(None),
            state: OnceLock::new(),
        }
    }

    pub fn model_id(&self) -> &str {
        &self.model_id
    }

    /// Load the engine through `loader`. Blocking; may take minutes.
    ///
    /// Succeeds at most once per handle.
    pub fn load(&self, loader: &dyn BackendLoader) -> Result<()> {
        if self.is_loaded() {
            return Err(EngineError::Load("engine is already loaded".to_string()));
        }

        tracing::info!("Loading model: {}", loader.model_id());
        let start = std::time::Instant::now();

        let backend = loader.load().map_err(|e| match e {
            EngineError::Load(msg) => EngineError::Load(msg),
            other => EngineError::Load(other.to_string()),
        })?;
        let device = backend.device();

        *self.backend.lock().unwrap_or_else(PoisonError::into_inner) = Some(backend);

        let state = EngineState {
            loaded: true,
            model: self.model_id.clone(),
            device: device.descriptor,
            accelerator_available: device.accelerator_available,
            accelerator_memory_gb: device.accelerator_memory_gb,
        };
        self.state
            .set(state)
            .map_err(|_| EngineError::Load("engine state was set concurrently".to_string()))?;

        tracing::info!("Model loaded in {:?}", start.elapsed());
        Ok(())
    }

    pub fn is_loaded(&self) -> bool {
        self.state.get().is_some()
    }

    /// Current state; never blocks on a running generation
    pub fn describe(&self) -> EngineState {
        self.state
            .get()
            .cloned()
            .unwrap_or_else(|| EngineState::unloaded(&self.model_id))
    }

    /// Run one generation. Blocking and not reentrant; see the executor.
    pub fn generate(&self, request: &GenerationRequest) -> Result<GenerationResult> {
        if !self.is_loaded() {
            return Err(EngineError::NotLoaded);
        }

        // A panic during a previous call leaves the lock poisoned; the
        // backend itself is still usable for the next request.
        let mut guard = self.backend.lock().unwrap_or_else(PoisonError::into_inner);
        let backend = guard.as_mut().ok_or(EngineError::NotLoaded)?;

        let mut prompt_tokens = backend.tokenize(request.prompt())?;
        if prompt_tokens.is_empty() {
            return Err(EngineError::invalid(
                "prompt",
                "prompt produced no tokens",
            ));
        }

        let prompt_truncated = prompt_tokens.len() > self.max_prompt_tokens;
        if prompt_truncated {
            tracing::debug!(
                "Truncating prompt from {} to {} tokens",
                prompt_tokens.len(),
                self.max_prompt_tokens
            );
            prompt_tokens.truncate(self.max_prompt_tokens);
        }

        let mut generated = backend.generate(
            &prompt_tokens,
            request.sampling(),
            request.max_new_tokens(),
        )?;
        // The backend contract says at most max_new_tokens; enforce it here
        // so the reported counts can never exceed what was asked for.
        generated.truncate(request.max_new_tokens());

        let text = backend.detokenize(&generated)?;

        Ok(GenerationResult::new(
            text.trim().to_string(),
            prompt_tokens.len(),
            generated.len(),
            prompt_truncated,
        ))
    }
}
