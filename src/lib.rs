//! Sluice - a single-flight text generation server
//!
//! One language model, one worker thread, many HTTP callers. Generation
//! requests are validated, queued on a bounded FIFO, and executed strictly
//! one at a time; health checks read state directly and never wait behind
//! a running generation.
//!
//! # Architecture
//!
//! - **engine**: validator, single-flight executor, engine handle, and the
//!   GGUF backend (boostr)
//! - **lifecycle**: `NotStarted -> Loading -> Ready -> Draining -> Stopped`
//! - **server**: axum routes for `/`, `/health`, `/generate`
//! - **cli**: `serve`, `generate`, `check`
//!
//! # Example
//!
//! ```bash
//! # Start server
//! sluice serve --model deepseek-coder-1.3b --port 8000
//!
//! # One-shot generation
//! sluice generate --model deepseek-coder-1.3b --prompt "Write a function"
//! ```

pub mod cli;
pub mod config;
pub mod engine;
pub mod error;
pub mod lifecycle;
pub mod server;

// Re-export key types
pub use config::{ServerConfig, ServiceConfig};
pub use engine::{EngineHandle, SingleFlightExecutor, Validator};
pub use error::EngineError;
pub use lifecycle::{Lifecycle, LifecycleState};
