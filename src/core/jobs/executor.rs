//! Batch Executor
//!
//! The single active component: drains the queue one job at a time,
//! resolves the engine for each claimed job, forwards progress back into
//! the queue, and decides what runs next. One conversion runs at any
//! instant, because simultaneous native invocations or tool spawns would compete
//! for the same decode/encode resources.
//!
//! `start`/`stop` only request transitions and return immediately; the
//! work happens on a spawned task.

use std::sync::{Arc, Mutex};

use serde::Serialize;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::{JobKind, JobQueue};
use crate::core::ai::AiRuntime;
use crate::core::engines::{EngineError, EngineRegistry};
use crate::core::{CoreError, JobId};

// =============================================================================
// States and outcomes
// =============================================================================

/// Executor lifecycle state
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum ExecutorState {
    /// No batch running
    Idle,
    /// Draining the queue
    Running,
    /// Stop requested; the in-flight job is winding down
    StopRequested,
}

/// Result of a `start()` request
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StartOutcome {
    /// A drain task was spawned
    Started,
    /// A batch is already running; nothing changed
    AlreadyRunning,
    /// No waiting job in the queue; nothing to do
    QueueEmpty,
}

/// Progress and lifecycle notifications for the observing layer
#[derive(Clone, Debug, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ExecutorEvent {
    JobStarted { job_id: JobId, kind: JobKind },
    JobProgress { job_id: JobId, percent: u8 },
    JobFinished { job_id: JobId },
    JobFailed { job_id: JobId, error: String },
    JobCancelled { job_id: JobId },
    /// Queue fully drained; executor is idle again
    BatchComplete,
    /// Stop honored; executor is idle without draining further
    Stopped,
}

// =============================================================================
// Executor
// =============================================================================

/// Sequential batch executor over a shared queue and engine registry.
pub struct Executor {
    queue: Arc<JobQueue>,
    registry: Arc<EngineRegistry>,
    ai: Arc<dyn AiRuntime>,
    state: Arc<Mutex<ExecutorState>>,
    current_cancel: Arc<Mutex<Option<CancellationToken>>>,
    event_tx: mpsc::UnboundedSender<ExecutorEvent>,
    event_rx: Mutex<Option<mpsc::UnboundedReceiver<ExecutorEvent>>>,
}

impl Executor {
    /// Creates an idle executor.
    pub fn new(
        queue: Arc<JobQueue>,
        registry: Arc<EngineRegistry>,
        ai: Arc<dyn AiRuntime>,
    ) -> Self {
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        Self {
            queue,
            registry,
            ai,
            state: Arc::new(Mutex::new(ExecutorState::Idle)),
            current_cancel: Arc::new(Mutex::new(None)),
            event_tx,
            event_rx: Mutex::new(Some(event_rx)),
        }
    }

    /// Current lifecycle state
    pub fn state(&self) -> ExecutorState {
        *self.state.lock().unwrap()
    }

    /// Takes the event receiver (can only be taken once).
    pub fn take_event_receiver(&self) -> Option<mpsc::UnboundedReceiver<ExecutorEvent>> {
        self.event_rx.lock().unwrap().take()
    }

    /// Requests a batch run.
    ///
    /// Returns immediately; jobs execute on a spawned task. A re-entrant
    /// call while running is a no-op reported as [`StartOutcome::AlreadyRunning`],
    /// distinguished from an empty queue.
    pub fn start(&self) -> StartOutcome {
        let mut state = self.state.lock().unwrap();
        if *state != ExecutorState::Idle {
            return StartOutcome::AlreadyRunning;
        }
        if !self.queue.has_waiting() {
            return StartOutcome::QueueEmpty;
        }
        *state = ExecutorState::Running;
        drop(state);

        // Engine selection is read-only for the duration of the batch.
        self.registry.lock_selection();

        tracing::info!("Batch started");
        tokio::spawn(drain(
            Arc::clone(&self.queue),
            Arc::clone(&self.registry),
            Arc::clone(&self.ai),
            Arc::clone(&self.state),
            Arc::clone(&self.current_cancel),
            self.event_tx.clone(),
        ));
        StartOutcome::Started
    }

    /// Requests a stop.
    ///
    /// Idempotent: the first call signals the in-flight job's cancellation
    /// token; repeated calls have no further effect. Returns whether a
    /// running batch was newly signalled.
    pub fn stop(&self) -> bool {
        let mut state = self.state.lock().unwrap();
        if *state != ExecutorState::Running {
            return false;
        }
        *state = ExecutorState::StopRequested;
        drop(state);

        if let Some(cancel) = self.current_cancel.lock().unwrap().as_ref() {
            cancel.cancel();
        }
        tracing::info!("Batch stop requested");
        true
    }
}

// =============================================================================
// Drain loop
// =============================================================================

fn stop_requested(state: &Mutex<ExecutorState>) -> bool {
    *state.lock().unwrap() == ExecutorState::StopRequested
}

/// Sequential claim → gate → resolve → run loop.
///
/// Per-job errors are absorbed at the job boundary: a failed job never
/// aborts the batch, only a stop request does.
async fn drain(
    queue: Arc<JobQueue>,
    registry: Arc<EngineRegistry>,
    ai: Arc<dyn AiRuntime>,
    state: Arc<Mutex<ExecutorState>>,
    current_cancel: Arc<Mutex<Option<CancellationToken>>>,
    event_tx: mpsc::UnboundedSender<ExecutorEvent>,
) {
    let drained = loop {
        if stop_requested(&state) {
            break false;
        }
        let Some(job) = queue.claim_next_waiting() else {
            break true;
        };

        let _ = event_tx.send(ExecutorEvent::JobStarted {
            job_id: job.id.clone(),
            kind: job.kind,
        });
        tracing::info!(job_id = %job.id, kind = %job.kind, input = %job.input.display(), "Processing job");

        // Upscale jobs are gated on the isolated runtime before any engine
        // is involved.
        if job.kind == JobKind::Upscale && !ai.is_ready() {
            let error = CoreError::EnvironmentNotReady.to_string();
            queue.mark_failed(&job.id, &error);
            let _ = event_tx.send(ExecutorEvent::JobFailed {
                job_id: job.id.clone(),
                error,
            });
            continue;
        }

        let engine = match registry.resolve(job.kind) {
            Ok(engine) => engine,
            Err(err) => {
                let error = err.to_string();
                queue.mark_failed(&job.id, &error);
                let _ = event_tx.send(ExecutorEvent::JobFailed {
                    job_id: job.id.clone(),
                    error,
                });
                continue;
            }
        };

        let cancel = CancellationToken::new();
        *current_cancel.lock().unwrap() = Some(cancel.clone());
        // A stop may have raced in between claim and token registration.
        if stop_requested(&state) {
            cancel.cancel();
        }

        let (progress_tx, mut progress_rx) = mpsc::channel::<u8>(32);
        let forwarder = {
            let queue = Arc::clone(&queue);
            let event_tx = event_tx.clone();
            let job_id = job.id.clone();
            tokio::spawn(async move {
                while let Some(percent) = progress_rx.recv().await {
                    queue.set_progress(&job_id, percent);
                    let _ = event_tx.send(ExecutorEvent::JobProgress {
                        job_id: job_id.clone(),
                        percent,
                    });
                }
            })
        };

        let result = engine.run(&job, progress_tx, cancel.clone()).await;
        let _ = forwarder.await;
        *current_cancel.lock().unwrap() = None;

        match result {
            Ok(()) => {
                queue.mark_finished(&job.id);
                let _ = event_tx.send(ExecutorEvent::JobFinished {
                    job_id: job.id.clone(),
                });
                tracing::info!(job_id = %job.id, "Job finished");
            }
            Err(EngineError::Cancelled) => {
                queue.mark_cancelled(&job.id);
                let _ = event_tx.send(ExecutorEvent::JobCancelled {
                    job_id: job.id.clone(),
                });
                tracing::info!(job_id = %job.id, "Job cancelled");
            }
            Err(err) => {
                let error = err.to_string();
                queue.mark_failed(&job.id, &error);
                let _ = event_tx.send(ExecutorEvent::JobFailed {
                    job_id: job.id.clone(),
                    error: error.clone(),
                });
                tracing::error!(job_id = %job.id, error = %error, "Job failed");
            }
        }
    };

    *state.lock().unwrap() = ExecutorState::Idle;
    registry.unlock_selection();
    if drained {
        tracing::info!("Batch complete");
        let _ = event_tx.send(ExecutorEvent::BatchComplete);
    } else {
        tracing::info!("Batch stopped");
        let _ = event_tx.send(ExecutorEvent::Stopped);
    }
}
