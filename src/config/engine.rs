//! Engine configuration settings

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Device configuration for inference
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum DeviceConfig {
    /// Simple device string (e.g., "cuda:0", "cpu")
    Simple(String),
    /// Detailed device configuration
    Detailed {
        /// Device type: "cuda", "cpu"
        device_type: String,
        /// Device ID (for multi-GPU)
        #[serde(default)]
        device_id: usize,
    },
}

impl Default for DeviceConfig {
    fn default() -> Self {
        DeviceConfig::Simple("cpu".to_string())
    }
}

impl DeviceConfig {
    /// Get device type ("cuda" or "cpu")
    pub fn device_type(&self) -> &str {
        match self {
            DeviceConfig::Simple(s) => {
                if s.starts_with("cuda") {
                    "cuda"
                } else {
                    "cpu"
                }
            }
            DeviceConfig::Detailed { device_type, .. } => device_type,
        }
    }

    /// Get device ID (for multi-GPU)
    pub fn device_id(&self) -> usize {
        match self {
            DeviceConfig::Simple(s) => s
                .strip_prefix("cuda:")
                .and_then(|id| id.parse().ok())
                .unwrap_or(0),
            DeviceConfig::Detailed { device_id, .. } => *device_id,
        }
    }

    /// Check if using CUDA
    pub fn is_cuda(&self) -> bool {
        self.device_type() == "cuda"
    }

    /// Canonical descriptor, e.g. "cuda:1" or "cpu"
    pub fn descriptor(&self) -> String {
        if self.is_cuda() {
            format!("cuda:{}", self.device_id())
        } else {
            "cpu".to_string()
        }
    }
}

/// Which model to load and where to run it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Model identifier: a path, a name under `model_dir`, or a
    /// Hugging Face repo id (`owner/name`, requires `hf_file`)
    #[serde(default)]
    pub model: String,

    /// Directory searched for named models
    #[serde(default = "default_model_dir")]
    pub model_dir: PathBuf,

    /// File to fetch when `model` is a Hugging Face repo id
    #[serde(default)]
    pub hf_file: Option<String>,

    /// Device configuration
    #[serde(default)]
    pub device: DeviceConfig,

    /// Initial KV cache capacity in tokens
    #[serde(default = "default_num_ctx")]
    pub num_ctx: usize,
}

fn default_model_dir() -> PathBuf {
    std::env::var("SLUICE_MODEL_DIR")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("./models"))
}

fn default_num_ctx() -> usize {
    2048
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            model: String::new(),
            model_dir: default_model_dir(),
            hf_file: None,
            device: DeviceConfig::default(),
            num_ctx: default_num_ctx(),
        }
    }
}
