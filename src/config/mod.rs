//! Configuration system for sluice
//!
//! `ServiceConfig` groups everything the server needs: which engine to
//! load, how to bound generation, how to admit work, and where to listen.

mod engine;
mod executor;
mod generation;
mod server;

pub use engine::{DeviceConfig, EngineConfig};
pub use executor::ExecutorConfig;
pub use generation::GenerationLimits;
pub use server::ServerConfig;

use std::path::Path;

use anyhow::{anyhow, bail, Result};
use serde::{Deserialize, Serialize};

/// Service configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ServiceConfig {
    /// Model and device selection
    #[serde(default)]
    pub engine: EngineConfig,

    /// Parameter bounds and server-side caps
    #[serde(default)]
    pub generation: GenerationLimits,

    /// Admission queue settings
    #[serde(default)]
    pub executor: ExecutorConfig,

    /// HTTP settings
    #[serde(default)]
    pub server: ServerConfig,
}

impl ServiceConfig {
    /// Load configuration from a YAML file
    pub fn from_yaml<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())?;
        let config: Self = serde_yaml::from_str(&content)?;
        Ok(config)
    }

    /// Load configuration from a JSON file
    pub fn from_json<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())?;
        let config: Self = serde_json::from_str(&content)?;
        Ok(config)
    }

    /// Load configuration, picking the parser from the file extension
    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        match path.extension().and_then(|e| e.to_str()) {
            Some("yaml") | Some("yml") => Self::from_yaml(path),
            Some("json") => Self::from_json(path),
            other => Err(anyhow!(
                "unsupported config format {:?} for {}",
                other.unwrap_or(""),
                path.display()
            )),
        }
    }

    /// Reject settings the pipeline cannot honour.
    pub fn validate(&self) -> Result<()> {
        let g = &self.generation;

        if g.max_new_tokens_bound == 0 {
            bail!("generation.max_new_tokens_bound must be at least 1");
        }
        if g.max_new_tokens_cap == 0 {
            bail!("generation.max_new_tokens_cap must be at least 1");
        }
        if g.default_max_new_tokens == 0 || g.default_max_new_tokens > g.max_new_tokens_bound {
            bail!(
                "generation.default_max_new_tokens must be within [1, {}]",
                g.max_new_tokens_bound
            );
        }
        if !(g.temperature_min > 0.0 && g.temperature_min <= g.temperature_max) {
            bail!("generation temperature bounds are inconsistent");
        }
        if !(g.temperature_min..=g.temperature_max).contains(&g.default_temperature) {
            bail!("generation.default_temperature is outside its bounds");
        }
        if !(g.top_p_min > 0.0 && g.top_p_min <= g.top_p_max && g.top_p_max <= 1.0) {
            bail!("generation top_p bounds are inconsistent");
        }
        if !(g.top_p_min..=g.top_p_max).contains(&g.default_top_p) {
            bail!("generation.default_top_p is outside its bounds");
        }
        if g.repetition_penalty <= 0.0 {
            bail!("generation.repetition_penalty must be positive");
        }
        if g.max_prompt_tokens == 0 {
            bail!("generation.max_prompt_tokens must be at least 1");
        }
        if self.executor.queue_capacity == 0 {
            bail!("executor.queue_capacity must be at least 1");
        }

        Ok(())
    }
}
