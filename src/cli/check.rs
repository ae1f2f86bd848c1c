//! Engine check command

use std::sync::Arc;

use anyhow::Result;

use crate::config::ServiceConfig;
use crate::engine::{default_loader, EngineHandle};
use crate::lifecycle::Lifecycle;

/// Load the engine, print its state as JSON, and exit
pub async fn check(config: ServiceConfig) -> Result<()> {
    config.validate()?;

    let engine = Arc::new(EngineHandle::new(
        config.engine.model.clone(),
        config.generation.max_prompt_tokens,
    ));

    let start = std::time::Instant::now();
    Lifecycle::new()
        .load_engine(Arc::clone(&engine), default_loader(&config.engine))
        .await?;
    tracing::info!("Engine loaded in {:.2?}", start.elapsed());

    println!("{}", serde_json::to_string_pretty(&engine.describe())?);
    Ok(())
}
