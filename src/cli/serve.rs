//! HTTP server command

use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::sync::Notify;
use tokio::task::JoinHandle;

use crate::config::ServiceConfig;
use crate::engine::{default_loader, DrainOutcome, EngineHandle, SingleFlightExecutor, Validator};
use crate::lifecycle::Lifecycle;
use crate::server::{self, AppState};

/// Start the inference server.
///
/// The listener is bound before the model loads so `/health` answers
/// during `Loading`. A load failure stops the server and returns an error.
pub async fn serve(config: ServiceConfig) -> Result<()> {
    config.validate()?;

    let engine = Arc::new(EngineHandle::new(
        config.engine.model.clone(),
        config.generation.max_prompt_tokens,
    ));
    let executor = Arc::new(
        SingleFlightExecutor::start(Arc::clone(&engine), &config.executor)
            .context("failed to spawn generation worker")?,
    );
    let lifecycle = Arc::new(Lifecycle::new());

    let state = AppState::new(
        Arc::clone(&engine),
        Arc::clone(&executor),
        Validator::new(config.generation.clone()),
        Arc::clone(&lifecycle),
    )
    .with_request_timeout(config.server.request_timeout());
    let app = server::router(Arc::new(state), &config.server);

    let listener = server::bind(&config.server).await?;
    let stop = Arc::new(Notify::new());
    let mut server_task: JoinHandle<Result<()>> = tokio::spawn({
        let stop = Arc::clone(&stop);
        server::serve(listener, app, async move { stop.notified().await })
    });

    let loader = default_loader(&config.engine);
    let mut server_exit = None;

    let outcome: Result<()> = tokio::select! {
        loaded = lifecycle.load_engine(Arc::clone(&engine), loader) => match loaded {
            Ok(()) => {
                tracing::info!("Model {} ready", engine.model_id());
                tokio::select! {
                    _ = server::shutdown_signal() => Ok(()),
                    exit = &mut server_task => {
                        server_exit = Some(exit);
                        Ok(())
                    }
                }
            }
            Err(e) => Err(anyhow::Error::new(e).context("engine failed to load")),
        },
        _ = server::shutdown_signal() => {
            tracing::info!("Shutdown requested before the model finished loading");
            Ok(())
        }
    };

    if lifecycle.drain(&executor, config.executor.drain_timeout()).await == DrainOutcome::TimedOut
    {
        tracing::warn!("Stopping with a generation still in progress");
    }

    stop.notify_one();
    let exit = match server_exit {
        Some(exit) => exit,
        None => server_task.await,
    };
    exit.context("server task panicked")??;

    tracing::info!("Server stopped");
    outcome
}
