//! Inference backend interface
//!
//! The model itself (weights, tokenizer, numerics) sits behind these two
//! traits. The rest of the crate only ever talks to a backend through
//! [`EngineHandle`](super::EngineHandle).

use serde::Serialize;

use crate::error::Result;

use super::request::SamplingParams;

/// Where a loaded backend runs
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DeviceInfo {
    /// Device descriptor, e.g. "cpu" or "cuda:0"
    pub descriptor: String,
    /// Whether an accelerator is usable by this build
    pub accelerator_available: bool,
    /// Accelerator memory in GiB, when the backend can report it
    pub accelerator_memory_gb: Option<f64>,
}

impl DeviceInfo {
    pub fn cpu() -> Self {
        Self {
            descriptor: "cpu".to_string(),
            accelerator_available: false,
            accelerator_memory_gb: None,
        }
    }
}

/// A loaded causal language model.
///
/// Implementations are not reentrant: `generate` takes `&mut self` and is
/// only ever called from the executor's worker thread.
pub trait InferenceBackend: Send {
    /// Encode text to token IDs
    fn tokenize(&self, text: &str) -> Result<Vec<u32>>;

    /// Generate up to `max_new_tokens` tokens continuing `prompt`.
    ///
    /// The returned tokens exclude the prompt and any end-of-sequence token.
    fn generate(
        &mut self,
        prompt: &[u32],
        params: &SamplingParams,
        max_new_tokens: usize,
    ) -> Result<Vec<u32>>;

    /// Decode token IDs to text
    fn detokenize(&self, tokens: &[u32]) -> Result<String>;

    /// Device the model is resident on
    fn device(&self) -> DeviceInfo;
}

/// Produces a backend for a model identifier. Called once at startup.
pub trait BackendLoader: Send + Sync {
    /// Identifier reported in health and root responses
    fn model_id(&self) -> &str;

    /// Load weights and tokenizer. Errors are fatal for the service.
    fn load(&self) -> Result<Box<dyn InferenceBackend>>;
}
