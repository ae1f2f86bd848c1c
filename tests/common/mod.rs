#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::body::Body;
use axum::http::{Request, Response};
use axum::Router;
use http_body_util::BodyExt;
use serde_json::Value;
use tower::ServiceExt;

use sluice::config::{ExecutorConfig, GenerationLimits, ServerConfig};
use sluice::engine::{
    BackendLoader, DeviceInfo, EngineHandle, InferenceBackend, SamplingParams,
    SingleFlightExecutor, Validator,
};
use sluice::error::{EngineError, Result};
use sluice::lifecycle::Lifecycle;
use sluice::server::{self, AppState};

/// What the scripted backend saw
#[derive(Clone, Default)]
pub struct Trace {
    active: Arc<AtomicUsize>,
    peak: Arc<AtomicUsize>,
    prompts: Arc<Mutex<Vec<String>>>,
}

impl Trace {
    /// Highest number of overlapping `generate` calls
    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    /// Prompts in the order the backend ran them
    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().unwrap().clone()
    }
}

/// Byte-level backend that sleeps to simulate compute.
///
/// `[fail]` in the prompt yields a generation error, `[panic]` panics.
#[derive(Clone, Default)]
pub struct ScriptedBackend {
    delay: Duration,
    trace: Trace,
}

impl ScriptedBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn slow(delay: Duration) -> Self {
        Self {
            delay,
            ..Self::default()
        }
    }

    pub fn trace(&self) -> Trace {
        self.trace.clone()
    }
}

impl InferenceBackend for ScriptedBackend {
    fn tokenize(&self, text: &str) -> Result<Vec<u32>> {
        Ok(text.bytes().map(u32::from).collect())
    }

    fn generate(
        &mut self,
        prompt: &[u32],
        _params: &SamplingParams,
        max_new_tokens: usize,
    ) -> Result<Vec<u32>> {
        let running = self.trace.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.trace.peak.fetch_max(running, Ordering::SeqCst);

        let text: String = prompt.iter().map(|&t| t as u8 as char).collect();
        self.trace.prompts.lock().unwrap().push(text.clone());
        std::thread::sleep(self.delay);
        self.trace.active.fetch_sub(1, Ordering::SeqCst);

        if text.contains("[panic]") {
            panic!("scripted panic");
        }
        if text.contains("[fail]") {
            return Err(EngineError::Generation(
                "device lost at 0xdeadbeef".to_string(),
            ));
        }

        // " xyz xyz ..." so trimming has something to strip
        Ok(" xyz"
            .bytes()
            .cycle()
            .take(max_new_tokens)
            .map(u32::from)
            .collect())
    }

    fn detokenize(&self, tokens: &[u32]) -> Result<String> {
        Ok(tokens.iter().map(|&t| t as u8 as char).collect())
    }

    fn device(&self) -> DeviceInfo {
        DeviceInfo::cpu()
    }
}

/// Loader that can be held in `load` until the test releases it
pub struct ScriptedLoader {
    backend: ScriptedBackend,
    gate: Option<Mutex<mpsc::Receiver<()>>>,
    fail: bool,
}

impl ScriptedLoader {
    pub fn new(backend: ScriptedBackend) -> Self {
        Self {
            backend,
            gate: None,
            fail: false,
        }
    }

    pub fn failing() -> Self {
        Self {
            backend: ScriptedBackend::new(),
            gate: None,
            fail: true,
        }
    }

    /// Block `load` until the returned sender fires
    pub fn gated(backend: ScriptedBackend) -> (Self, mpsc::Sender<()>) {
        let (tx, rx) = mpsc::channel();
        let loader = Self {
            backend,
            gate: Some(Mutex::new(rx)),
            fail: false,
        };
        (loader, tx)
    }
}

impl BackendLoader for ScriptedLoader {
    fn model_id(&self) -> &str {
        "scripted"
    }

    fn load(&self) -> Result<Box<dyn InferenceBackend>> {
        if let Some(gate) = &self.gate {
            let _ = gate.lock().unwrap().recv();
        }
        if self.fail {
            return Err(EngineError::Load("weights not found".to_string()));
        }
        Ok(Box::new(self.backend.clone()))
    }
}

/// Router plus handles on everything behind it
pub struct Harness {
    pub app: Router,
    pub engine: Arc<EngineHandle>,
    pub executor: Arc<SingleFlightExecutor>,
    pub lifecycle: Arc<Lifecycle>,
}

impl Harness {
    /// Wire up an unloaded service
    pub fn new(queue_capacity: usize, request_timeout: Option<Duration>) -> Self {
        let engine = Arc::new(EngineHandle::new("scripted", 512));
        let executor = Arc::new(
            SingleFlightExecutor::start(
                Arc::clone(&engine),
                &ExecutorConfig {
                    queue_capacity,
                    ..Default::default()
                },
            )
            .unwrap(),
        );
        let lifecycle = Arc::new(Lifecycle::new());
        let state = AppState::new(
            Arc::clone(&engine),
            Arc::clone(&executor),
            Validator::new(GenerationLimits::default()),
            Arc::clone(&lifecycle),
        )
        .with_request_timeout(request_timeout);
        let app = server::router(Arc::new(state), &ServerConfig::default());

        Self {
            app,
            engine,
            executor,
            lifecycle,
        }
    }

    /// A `Ready` service over `backend`
    pub async fn ready(backend: ScriptedBackend) -> Self {
        Self::ready_with(backend, 16, None).await
    }

    pub async fn ready_with(
        backend: ScriptedBackend,
        queue_capacity: usize,
        request_timeout: Option<Duration>,
    ) -> Self {
        let harness = Self::new(queue_capacity, request_timeout);
        harness
            .lifecycle
            .load_engine(
                Arc::clone(&harness.engine),
                Arc::new(ScriptedLoader::new(backend)),
            )
            .await
            .unwrap();
        harness
    }

    pub async fn get(&self, uri: &str) -> (u16, Value) {
        let req = Request::builder().uri(uri).body(Body::empty()).unwrap();
        read(self.app.clone().oneshot(req).await.unwrap()).await
    }

    pub async fn post(&self, uri: &str, body: Value) -> (u16, Value) {
        let resp = self.post_raw(uri, body).await;
        read(resp).await
    }

    pub async fn post_raw(&self, uri: &str, body: Value) -> Response<Body> {
        self.app
            .clone()
            .oneshot(json_request(uri, &serde_json::to_string(&body).unwrap()))
            .await
            .unwrap()
    }

    /// Poll until the executor reports a job in the slot
    pub async fn wait_until_busy(&self) {
        for _ in 0..200 {
            if self.executor.stats().busy {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("executor never became busy");
    }
}

pub fn json_request(uri: &str, body: &str) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

pub async fn read(resp: Response<Body>) -> (u16, Value) {
    let status = resp.status().as_u16();
    let body = resp.into_body().collect().await.unwrap().to_bytes();
    let json = serde_json::from_slice(&body).unwrap_or(Value::Null);
    (status, json)
}
