//! HTTP listener and request handling settings

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Where the API listens and how it treats incoming requests.
///
/// Every field can be left out of a config file.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,

    /// Seconds a `/generate` caller waits for its result before getting 504.
    /// The job itself is not cancelled. `0` waits indefinitely.
    pub request_timeout_secs: u64,

    /// Permissive CORS (any origin, method, header)
    pub cors_enabled: bool,

    /// Per-request `tower_http` trace spans
    pub request_logging: bool,

    /// Request bodies above this many bytes are refused with 413
    pub max_body_size: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8000,
            request_timeout_secs: 300,
            cors_enabled: true,
            request_logging: true,
            max_body_size: 1 << 20,
        }
    }
}

impl ServerConfig {
    /// `host:port` for binding
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn request_timeout(&self) -> Option<Duration> {
        (self.request_timeout_secs > 0).then(|| Duration::from_secs(self.request_timeout_secs))
    }
}
