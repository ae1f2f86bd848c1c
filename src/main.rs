use anyhow::Result;
use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use sluice::cli::{Cli, Commands};
use sluice::engine::RawGenerationRequest;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "sluice=info,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Serve {
            engine,
            port,
            host,
            queue_capacity,
        } => {
            let mut config = engine.load_config()?;
            if let Some(port) = port {
                config.server.port = port;
            }
            if let Some(host) = host {
                config.server.host = host;
            }
            if let Some(capacity) = queue_capacity {
                config.executor.queue_capacity = capacity;
            }
            sluice::cli::serve(config).await?;
        }
        Commands::Generate {
            engine,
            prompt,
            max_new_tokens,
            temperature,
            top_p,
            greedy,
        } => {
            let config = engine.load_config()?;
            let raw = RawGenerationRequest {
                prompt: Some(prompt),
                max_new_tokens,
                temperature,
                top_p,
                do_sample: greedy.then_some(false),
            };
            sluice::cli::generate(config, raw).await?;
        }
        Commands::Check { engine } => {
            sluice::cli::check(engine.load_config()?).await?;
        }
    }

    Ok(())
}
