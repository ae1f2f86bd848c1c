//! Scripted backend for unit tests.
//!
//! Tokens are prompt bytes. A prompt containing `[fail]` returns a
//! generation error and one containing `[panic]` panics mid-call.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::error::{EngineError, Result};

use super::backend::{BackendLoader, DeviceInfo, InferenceBackend};
use super::request::SamplingParams;

/// Shared counters observed by tests
#[derive(Clone, Default)]
pub struct CallLog {
    active: Arc<AtomicUsize>,
    max_active: Arc<AtomicUsize>,
    calls: Arc<Mutex<Vec<String>>>,
}

impl CallLog {
    pub fn max_active(&self) -> usize {
        self.max_active.load(Ordering::SeqCst)
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

struct ActiveGuard<'a>(&'a AtomicUsize);

impl Drop for ActiveGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

#[derive(Clone, Default)]
pub struct MockBackend {
    delay: Duration,
    overshoot: usize,
    call_log: CallLog,
}

impl MockBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Return this many tokens beyond what was asked for
    pub fn overshoot(mut self, extra: usize) -> Self {
        self.overshoot = extra;
        self
    }

    pub fn call_log(&self) -> CallLog {
        self.call_log.clone()
    }
}

impl InferenceBackend for MockBackend {
    fn tokenize(&self, text: &str) -> Result<Vec<u32>> {
        Ok(text.bytes().map(u32::from).collect())
    }

    fn generate(
        &mut self,
        prompt: &[u32],
        _params: &SamplingParams,
        max_new_tokens: usize,
    ) -> Result<Vec<u32>> {
        let now = self.call_log.active.fetch_add(1, Ordering::SeqCst) + 1;
        let _active = ActiveGuard(&self.call_log.active);
        self.call_log.max_active.fetch_max(now, Ordering::SeqCst);

        let text = self.detokenize(prompt)?;
        self.call_log.calls.lock().unwrap().push(text.clone());

        std::thread::sleep(self.delay);

        if text.contains("[panic]") {
            panic!("mock backend panicked");
        }
        if text.contains("[fail]") {
            return Err(EngineError::Generation("mock failure".to_string()));
        }

        Ok((0..max_new_tokens + self.overshoot)
            .map(|i| u32::from(b'a') + (i % 26) as u32)
            .collect())
    }

    fn detokenize(&self, tokens: &[u32]) -> Result<String> {
        let bytes: Vec<u8> = tokens.iter().map(|&t| t as u8).collect();
        String::from_utf8(bytes).map_err(|e| EngineError::Generation(e.to_string()))
    }

    fn device(&self) -> DeviceInfo {
        DeviceInfo::cpu()
    }
}

pub struct MockLoader {
    backend: Option<MockBackend>,
    error: Option<String>,
}

impl MockLoader {
    pub fn new(backend: MockBackend) -> Self {
        Self {
            backend: Some(backend),
            error: None,
        }
    }

    pub fn failing(reason: &str) -> Self {
        Self {
            backend: None,
            error: Some(reason.to_string()),
        }
    }
}

impl BackendLoader for MockLoader {
    fn model_id(&self) -> &str {
        "mock"
    }

    fn load(&self) -> Result<Box<dyn InferenceBackend>> {
        match (&self.backend, &self.error) {
            (Some(backend), _) => Ok(Box::new(backend.clone())),
            (None, Some(reason)) => Err(EngineError::Load(reason.clone())),
            (None, None) => Err(EngineError::Load("no backend".to_string())),
        }
    }
}
