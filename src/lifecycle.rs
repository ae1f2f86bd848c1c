//! Service lifecycle
//!
//! ```text
//! NotStarted -> Loading -> Ready -> Draining -> Stopped
//!                  |                    ^
//!                  +--(load failed)-----+--> Stopped
//! ```
//!
//! Generation is admitted only in `Ready`. State is published through a
//! `watch` channel so readers never block and tests can await transitions.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use thiserror::Error;
use tokio::sync::watch;

use crate::engine::{BackendLoader, DrainOutcome, EngineHandle, SingleFlightExecutor};
use crate::error::EngineError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleState {
    NotStarted,
    Loading,
    Ready,
    Draining,
    Stopped,
}

impl LifecycleState {
    pub fn as_str(&self) -> &'static str {
        match self {
            LifecycleState::NotStarted => "not_started",
            LifecycleState::Loading => "loading",
            LifecycleState::Ready => "ready",
            LifecycleState::Draining => "draining",
            LifecycleState::Stopped => "stopped",
        }
    }

    fn can_move_to(self, next: LifecycleState) -> bool {
        use LifecycleState::*;
        matches!(
            (self, next),
            (NotStarted, Loading)
                | (NotStarted, Stopped)
                | (Loading, Ready)
                | (Loading, Draining)
                | (Loading, Stopped)
                | (Ready, Draining)
                | (Draining, Stopped)
        )
    }
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("invalid lifecycle transition {from} -> {to}")]
pub struct TransitionError {
    pub from: LifecycleState,
    pub to: LifecycleState,
}

/// Lifecycle state machine
pub struct Lifecycle {
    state: watch::Sender<LifecycleState>,
}

impl Default for Lifecycle {
    fn default() -> Self {
        Self::new()
    }
}

impl Lifecycle {
    pub fn new() -> Self {
        let (state, _) = watch::channel(LifecycleState::NotStarted);
        Self { state }
    }

    pub fn current(&self) -> LifecycleState {
        *self.state.borrow()
    }

    pub fn is_ready(&self) -> bool {
        self.current() == LifecycleState::Ready
    }

    /// Receiver that observes every later transition
    pub fn subscribe(&self) -> watch::Receiver<LifecycleState> {
        self.state.subscribe()
    }

    /// Move to `next`, returning the previous state
    pub fn transition(&self, next: LifecycleState) -> Result<LifecycleState, TransitionError> {
        let mut from = next;
        let moved = self.state.send_if_modified(|current| {
            from = *current;
            if current.can_move_to(next) {
                *current = next;
                true
            } else {
                false
            }
        });

        if moved {
            tracing::info!("Lifecycle: {} -> {}", from, next);
            Ok(from)
        } else {
            Err(TransitionError { from, to: next })
        }
    }

    /// `NotStarted -> Loading -> Ready`, or `-> Stopped` if loading fails.
    ///
    /// The load itself runs on a blocking thread.
    pub async fn load_engine(
        &self,
        engine: Arc<EngineHandle>,
        loader: Arc<dyn BackendLoader>,
    ) -> Result<(), EngineError> {
        self.transition(LifecycleState::Loading)
            .map_err(|e| EngineError::Load(e.to_string()))?;

        let loaded = tokio::task::spawn_blocking(move || engine.load(loader.as_ref()))
            .await
            .unwrap_or_else(|e| Err(EngineError::Load(format!("loader panicked: {}", e))));

        match loaded {
            Ok(()) => match self.transition(LifecycleState::Ready) {
                Ok(_) => Ok(()),
                // Shutdown was requested while loading.
                Err(_) => Err(EngineError::ShuttingDown),
            },
            Err(e) => {
                tracing::error!("Engine failed to load: {}", e);
                let _ = self.transition(LifecycleState::Stopped);
                Err(e)
            }
        }
    }

    /// `-> Draining -> Stopped`, waiting up to `timeout` for the in-flight job.
    pub async fn drain(&self, executor: &SingleFlightExecutor, timeout: Duration) -> DrainOutcome {
        if let Err(e) = self.transition(LifecycleState::Draining) {
            tracing::debug!("Not entering drain: {}", e);
        }

        let outcome = executor.shutdown(timeout).await;

        if self.current() != LifecycleState::Stopped {
            if let Err(e) = self.transition(LifecycleState::Stopped) {
                tracing::warn!("{}", e);
            }
        }
        outcome
    }
}
