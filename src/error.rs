//! Error types for the inference pipeline.

use std::time::Duration;

use thiserror::Error;

/// Failures surfaced by the validator, executor, and engine handle.
///
/// Every variant maps to exactly one HTTP status in the server layer, so
/// the variant chosen here decides what the caller sees.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum EngineError {
    /// The engine has not finished loading (or never will).
    #[error("engine not loaded")]
    NotLoaded,

    /// A client-supplied value is malformed or out of bounds.
    #[error("invalid parameter '{field}': {reason}")]
    InvalidParameter { field: String, reason: String },

    /// The admission queue is full.
    #[error("engine busy: {capacity} jobs already queued")]
    Busy { capacity: usize },

    /// The engine failed while computing a result.
    #[error("generation failed: {0}")]
    Generation(String),

    /// The engine could not be loaded at startup.
    #[error("engine load failed: {0}")]
    Load(String),

    /// The executor is draining or stopped and admits no new work.
    #[error("service is shutting down")]
    ShuttingDown,

    /// The caller stopped waiting; the job may still run to completion.
    #[error("timed out after {waited:?} waiting for generation")]
    Timeout { waited: Duration },
}

impl EngineError {
    pub fn invalid(field: impl Into<String>, reason: impl Into<String>) -> Self {
        EngineError::InvalidParameter {
            field: field.into(),
            reason: reason.into(),
        }
    }

    /// Whether a client may retry the same request later.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            EngineError::NotLoaded | EngineError::Busy { .. } | EngineError::Timeout { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, EngineError>;
