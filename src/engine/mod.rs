//! Inference pipeline
//!
//! - `Validator`: bounds-checks raw requests into `GenerationRequest`s
//! - `SingleFlightExecutor`: runs one job at a time on a dedicated worker
//! - `EngineHandle`: owns the loaded backend and its state
//! - `InferenceBackend` / `BackendLoader`: the model, behind a trait

mod backend;
mod executor;
mod handle;
mod locate;
mod request;
mod sampling;
mod validate;

#[cfg(feature = "boostr")]
mod gguf;

#[cfg(test)]
pub(crate) mod mock;

use std::sync::Arc;

pub use backend::{BackendLoader, DeviceInfo, InferenceBackend};
pub use executor::{Completion, DrainOutcome, ExecutorStats, JobTiming, SingleFlightExecutor};
#[cfg(feature = "boostr")]
pub use gguf::{GgufBackend, GgufLoader};
pub use handle::{EngineHandle, EngineState};
pub use locate::{find_local, resolve_model_path};
pub use request::{
    GenerationRequest, GenerationResult, LengthCap, RawGenerationRequest, SamplingParams,
};
pub use sampling::sample_next;
pub use validate::Validator;

use crate::config::EngineConfig;

/// Loader for the backend compiled into this build
pub fn default_loader(config: &EngineConfig) -> Arc<dyn BackendLoader> {
    #[cfg(feature = "boostr")]
    {
        Arc::new(GgufLoader::new(config.clone()))
    }
    #[cfg(not(feature = "boostr"))]
    {
        Arc::new(NoBackend {
            model: config.model.clone(),
        })
    }
}

/// Stand-in for builds without an inference backend; always fails to load.
#[cfg(not(feature = "boostr"))]
struct NoBackend {
    model: String,
}

#[cfg(not(feature = "boostr"))]
impl BackendLoader for NoBackend {
    fn model_id(&self) -> &str {
        &self.model
    }

    fn load(&self) -> crate::error::Result<Box<dyn InferenceBackend>> {
        Err(crate::error::EngineError::Load(
            "built without an inference backend; enable the `boostr` feature".to_string(),
        ))
    }
}
