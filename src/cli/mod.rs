//! CLI commands

mod check;
mod generate;
mod serve;

pub use check::check;
pub use generate::generate;
pub use serve::serve;

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};

use crate::config::{DeviceConfig, ServiceConfig};

/// Sluice - single-flight text generation server
#[derive(Parser)]
#[command(name = "sluice")]
#[command(version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Load the model and serve the HTTP API
    Serve {
        #[command(flatten)]
        engine: EngineArgs,

        /// Port to listen on
        #[arg(long)]
        port: Option<u16>,

        /// Host to bind to
        #[arg(long)]
        host: Option<String>,

        /// Jobs allowed to wait behind the running one
        #[arg(long)]
        queue_capacity: Option<usize>,
    },

    /// Run one prompt through the pipeline and print the result as JSON
    Generate {
        #[command(flatten)]
        engine: EngineArgs,

        /// Prompt text
        #[arg(long, short)]
        prompt: String,

        /// Maximum new tokens (subject to the server cap)
        #[arg(long)]
        max_new_tokens: Option<i64>,

        /// Sampling temperature
        #[arg(long)]
        temperature: Option<f32>,

        /// Top-p nucleus sampling
        #[arg(long)]
        top_p: Option<f32>,

        /// Decode greedily instead of sampling
        #[arg(long)]
        greedy: bool,
    },

    /// Load the model, print the engine state, and exit
    Check {
        #[command(flatten)]
        engine: EngineArgs,
    },
}

/// Options shared by every command that loads the engine
#[derive(Args, Debug, Clone, Default)]
pub struct EngineArgs {
    /// Config file (.yaml, .yml or .json)
    #[arg(long, short)]
    pub config: Option<PathBuf>,

    /// Model name, path, or Hugging Face repo id
    #[arg(long, short)]
    pub model: Option<String>,

    /// File to fetch when --model is a Hugging Face repo id
    #[arg(long)]
    pub hf_file: Option<String>,

    /// Directory searched for model names
    #[arg(long)]
    pub model_dir: Option<PathBuf>,

    /// Device: cpu or cuda:<id>
    #[arg(long)]
    pub device: Option<String>,
}

impl EngineArgs {
    /// Read the config file (or defaults) and apply command-line overrides
    pub fn load_config(&self) -> Result<ServiceConfig> {
        let mut config = match &self.config {
            Some(path) => ServiceConfig::from_path(path)
                .with_context(|| format!("failed to read config {}", path.display()))?,
            None => ServiceConfig::default(),
        };

        if let Some(model) = &self.model {
            config.engine.model = model.clone();
        }
        if let Some(file) = &self.hf_file {
            config.engine.hf_file = Some(file.clone());
        }
        if let Some(dir) = &self.model_dir {
            config.engine.model_dir = dir.clone();
        }
        if let Some(device) = &self.device {
            config.engine.device = DeviceConfig::Simple(device.clone());
        }

        Ok(config)
    }
}
