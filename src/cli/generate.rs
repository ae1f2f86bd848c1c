//! One-shot generation command

use std::sync::Arc;

use anyhow::{Context, Result};

use crate::config::ServiceConfig;
use crate::engine::{
    default_loader, EngineHandle, RawGenerationRequest, SingleFlightExecutor, Validator,
};
use crate::lifecycle::Lifecycle;
use crate::server::GenerateResponse;

/// Run a single prompt through validator, executor and engine, then print
/// the response body the server would have returned.
pub async fn generate(config: ServiceConfig, raw: RawGenerationRequest) -> Result<()> {
    config.validate()?;

    let validator = Validator::new(config.generation.clone());
    // Reject bad parameters before paying for a model load.
    let request = validator.validate(raw)?;

    let engine = Arc::new(EngineHandle::new(
        config.engine.model.clone(),
        config.generation.max_prompt_tokens,
    ));
    let lifecycle = Lifecycle::new();
    lifecycle
        .load_engine(Arc::clone(&engine), default_loader(&config.engine))
        .await?;

    let executor = SingleFlightExecutor::start(Arc::clone(&engine), &config.executor)
        .context("failed to spawn generation worker")?;

    let id = request.id();
    let length = request.length_cap();
    let completion = executor.submit(request, None).await?;
    lifecycle.drain(&executor, config.executor.drain_timeout()).await;

    let response = GenerateResponse::new(id, engine.model_id(), length, completion);
    println!("{}", serde_json::to_string_pretty(&response)?);

    Ok(())
}
