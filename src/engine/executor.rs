//! Single-flight executor
//!
//! One dedicated OS thread owns every call into the engine. Async callers
//! push a job (request + reply channel) onto a bounded FIFO queue and await
//! only their own reply, so the runtime threads stay free for health checks
//! and new connections while a generation is running.
//!
//! ```text
//!  handler ──try_send──> [ bounded queue ] ──blocking_recv──> worker thread
//!     ^                                                          │
//!     └──────────────────── oneshot reply ───────────────────────┘
//! ```
//!
//! The queue holds jobs waiting behind the one in the slot. A full queue
//! rejects immediately with `EngineBusy`.

use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::sync::oneshot;

use crate::config::ExecutorConfig;
use crate::error::{EngineError, Result};

use super::handle::EngineHandle;
use super::request::{GenerationRequest, GenerationResult};

/// Where a job spent its time
#[derive(Debug, Clone, Serialize)]
pub struct JobTiming {
    /// Time between admission and dispatch
    pub queued: Duration,
    /// Time inside the engine
    pub compute: Duration,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
}

/// A finished job as delivered to its caller
#[derive(Debug, Clone)]
pub struct Completion {
    pub result: GenerationResult,
    pub timing: JobTiming,
}

/// Point-in-time executor counters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ExecutorStats {
    /// Jobs admitted but not yet dispatched
    pub queued: usize,
    /// Whether a job currently occupies the slot
    pub busy: bool,
    /// Jobs that ran to completion (success or failure)
    pub completed: u64,
    pub capacity: usize,
}

/// Result of shutting the executor down
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DrainOutcome {
    /// The worker finished its in-flight job and exited
    Completed,
    /// The drain timeout elapsed with a job still in the slot
    TimedOut,
}

struct Job {
    request: GenerationRequest,
    reply: oneshot::Sender<Result<Completion>>,
    admitted_at: Instant,
}

#[derive(Default)]
struct Counters {
    queued: AtomicUsize,
    busy: AtomicBool,
    completed: AtomicU64,
}

/// Serializes all generation work onto one worker thread
pub struct SingleFlightExecutor {
    engine: Arc<EngineHandle>,
    sender: Mutex<Option<mpsc::Sender<Job>>>,
    capacity: usize,
    draining: Arc<AtomicBool>,
    counters: Arc<Counters>,
    exited: Mutex<Option<oneshot::Receiver<()>>>,
    worker: Mutex<Option<thread::JoinHandle<()>>>,
}

impl SingleFlightExecutor {
    /// Spawn the worker thread
    pub fn start(engine: Arc<EngineHandle>, config: &ExecutorConfig) -> std::io::Result<Self> {
        let capacity = config.queue_capacity.max(1);
        let (tx, rx) = mpsc::channel::<Job>(capacity);
        let (exited_tx, exited_rx) = oneshot::channel();
        let draining = Arc::new(AtomicBool::new(false));
        let counters = Arc::new(Counters::default());

        let worker = {
            let engine = Arc::clone(&engine);
            let draining = Arc::clone(&draining);
            let counters = Arc::clone(&counters);
            thread::Builder::new()
                .name("generation-worker".into())
                .spawn(move || {
                    worker_loop(&engine, rx, &draining, &counters);
                    let _ = exited_tx.send(());
                })?
        };

        tracing::debug!("Executor started with queue capacity {}", capacity);

        Ok(Self {
            engine,
            sender: Mutex::new(Some(tx)),
            capacity,
            draining,
            counters,
            exited: Mutex::new(Some(exited_rx)),
            worker: Mutex::new(Some(worker)),
        })
    }

    /// Admit a job and wait for its result.
    ///
    /// With `timeout` set the caller stops waiting after that long; a job
    /// already in the slot still runs to completion and its result is
    /// dropped.
    pub async fn submit(
        &self,
        request: GenerationRequest,
        timeout: Option<Duration>,
    ) -> Result<Completion> {
        let reply = self.admit(request)?;

        let wait = async {
            reply.await.unwrap_or_else(|_| {
                Err(EngineError::Generation(
                    "worker stopped before replying".to_string(),
                ))
            })
        };

        match timeout {
            Some(limit) => match tokio::time::timeout(limit, wait).await {
                Ok(outcome) => outcome,
                Err(_) => {
                    tracing::warn!("Caller gave up after {:?}", limit);
                    Err(EngineError::Timeout { waited: limit })
                }
            },
            None => wait.await,
        }
    }

    /// Enqueue without waiting; the returned receiver yields the result.
    fn admit(&self, request: GenerationRequest) -> Result<oneshot::Receiver<Result<Completion>>> {
        if self.draining.load(Ordering::Acquire) {
            return Err(EngineError::ShuttingDown);
        }
        if !self.engine.is_loaded() {
            return Err(EngineError::NotLoaded);
        }

        let id = request.id();
        let (reply_tx, reply_rx) = oneshot::channel();
        let job = Job {
            request,
            reply: reply_tx,
            admitted_at: Instant::now(),
        };

        let guard = self.sender.lock().unwrap_or_else(PoisonError::into_inner);
        let sender = guard.as_ref().ok_or(EngineError::ShuttingDown)?;

        // Count before sending so the worker's decrement can never run first.
        self.counters.queued.fetch_add(1, Ordering::SeqCst);
        match sender.try_send(job) {
            Ok(()) => {
                tracing::debug!(request_id = %id, "Job admitted");
                Ok(reply_rx)
            }
            Err(TrySendError::Full(_)) => {
                self.counters.queued.fetch_sub(1, Ordering::SeqCst);
                tracing::warn!(request_id = %id, "Queue full, rejecting job");
                Err(EngineError::Busy {
                    capacity: self.capacity,
                })
            }
            Err(TrySendError::Closed(_)) => {
                self.counters.queued.fetch_sub(1, Ordering::SeqCst);
                Err(EngineError::ShuttingDown)
            }
        }
    }

    pub fn stats(&self) -> ExecutorStats {
        ExecutorStats {
            queued: self.counters.queued.load(Ordering::SeqCst),
            busy: self.counters.busy.load(Ordering::SeqCst),
            completed: self.counters.completed.load(Ordering::SeqCst),
            capacity: self.capacity,
        }
    }

    pub fn is_draining(&self) -> bool {
        self.draining.load(Ordering::Acquire)
    }

    /// Stop admitting, fail queued jobs with `ShuttingDown`, and wait up to
    /// `timeout` for the job in the slot.
    pub async fn shutdown(&self, timeout: Duration) -> DrainOutcome {
        self.close();

        let exited = self
            .exited
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        let Some(exited) = exited else {
            return DrainOutcome::Completed;
        };

        match tokio::time::timeout(timeout, exited).await {
            Ok(_) => {
                let worker = self
                    .worker
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .take();
                if let Some(worker) = worker {
                    let _ = tokio::task::spawn_blocking(move || worker.join()).await;
                }
                tracing::info!("Executor drained");
                DrainOutcome::Completed
            }
            Err(_) => {
                tracing::warn!(
                    "Drain timed out after {:?} with a generation still running",
                    timeout
                );
                DrainOutcome::TimedOut
            }
        }
    }

    fn close(&self) {
        self.draining.store(true, Ordering::Release);
        // Dropping the last sender ends the worker loop once the queue is empty.
        self.sender
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
    }
}

impl Drop for SingleFlightExecutor {
    fn drop(&mut self) {
        self.close();
    }
}

fn worker_loop(
    engine: &EngineHandle,
    mut rx: mpsc::Receiver<Job>,
    draining: &AtomicBool,
    counters: &Counters,
) {
    while let Some(job) = rx.blocking_recv() {
        counters.queued.fetch_sub(1, Ordering::SeqCst);
        let id = job.request.id();

        if draining.load(Ordering::Acquire) {
            let _ = job.reply.send(Err(EngineError::ShuttingDown));
            continue;
        }
        if job.reply.is_closed() {
            tracing::debug!(request_id = %id, "Caller left before dispatch, skipping");
            continue;
        }

        let queued = job.admitted_at.elapsed();
        let started_at = Utc::now();
        let start = Instant::now();
        counters.busy.store(true, Ordering::SeqCst);

        tracing::debug!(
            request_id = %id,
            max_new_tokens = job.request.max_new_tokens(),
            "Dispatching job after {:?} in queue",
            queued
        );

        let outcome = panic::catch_unwind(AssertUnwindSafe(|| engine.generate(&job.request)))
            .unwrap_or_else(|payload| Err(EngineError::Generation(panic_message(&*payload))));

        let compute = start.elapsed();
        counters.busy.store(false, Ordering::SeqCst);
        counters.completed.fetch_add(1, Ordering::SeqCst);

        let outcome = match outcome {
            Ok(result) => {
                tracing::debug!(
                    request_id = %id,
                    generated_tokens = result.generated_tokens,
                    "Job completed in {:?}",
                    compute
                );
                Ok(Completion {
                    result,
                    timing: JobTiming {
                        queued,
                        compute,
                        started_at,
                        completed_at: Utc::now(),
                    },
                })
            }
            Err(e) => {
                tracing::error!(request_id = %id, "Generation failed: {}", e);
                Err(e)
            }
        };

        if job.reply.send(outcome).is_err() {
            tracing::debug!(request_id = %id, "Caller left during generation, result discarded");
        }
    }

    tracing::debug!("Generation worker exiting");
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        format!("engine panicked: {}", s)
    } else if let Some(s) = payload.downcast_ref::<String>() {
        format!("engine panicked: {}", s)
    } else {
        "engine panicked".to_string()
    }
}
