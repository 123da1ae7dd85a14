//! Sandbox runner: compiles guest source and executes it in a fresh,
//! isolated context under a wall-clock deadline.
//!
//! Each run moves `Idle -> Compiling -> Executing -> terminal`, where the
//! terminal state is exactly one of completed, failed, timed out or
//! cancelled. At most one execution context is alive at a time: a new run
//! cancels the previous one and waits for its context to exit before it
//! compiles anything.

mod context;
pub mod protocol;
mod vm;

use std::fmt;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use tokio::sync::{mpsc, oneshot, watch};

use crate::kernel::compiler::{CompileFailure, CompilePipeline, CompileResult};
pub use protocol::LogLevel;
use protocol::{ContextMessage, HostMessage};
pub use vm::format_number;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunnerConfig {
    pub deadline: Duration,
    pub max_output_bytes: usize,
    pub max_call_depth: usize,
    pub max_string_bytes: usize,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            deadline: Duration::from_secs(3),
            max_output_bytes: 1024 * 1024,
            max_call_depth: 256,
            max_string_bytes: 64 * 1024 * 1024,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Idle,
    Compiling,
    Executing,
    Completed,
    Failed,
    TimedOut,
    Cancelled,
}

impl RunState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            RunState::Completed | RunState::Failed | RunState::TimedOut | RunState::Cancelled
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunStatus {
    /// 0 before the first run.
    pub run_id: u64,
    pub state: RunState,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunFailure {
    Compile(CompileFailure),
    RuntimeFault(String),
}

impl fmt::Display for RunFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunFailure::Compile(reason) => write!(f, "compile error: {reason}"),
            RunFailure::RuntimeFault(message) => write!(f, "runtime error: {message}"),
        }
    }
}

impl std::error::Error for RunFailure {}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    Completed,
    Failed(RunFailure),
    TimedOut,
    Cancelled,
}

impl RunOutcome {
    pub fn state(&self) -> RunState {
        match self {
            RunOutcome::Completed => RunState::Completed,
            RunOutcome::Failed(_) => RunState::Failed,
            RunOutcome::TimedOut => RunState::TimedOut,
            RunOutcome::Cancelled => RunState::Cancelled,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogEvent {
    pub level: LogLevel,
    pub message: String,
}

#[derive(Debug, Clone)]
pub struct RunReport {
    pub run_id: u64,
    pub outcome: RunOutcome,
    /// Console events in the order the context emitted them.
    pub logs: Vec<LogEvent>,
    /// Formatted value of a top-level `return`.
    pub value: Option<String>,
    /// When the run entered `Executing`; `None` if it never did.
    pub started_executing: Option<Instant>,
    pub finished: Instant,
}

struct ActiveRun {
    run_id: u64,
    cancel: watch::Sender<bool>,
    finished: oneshot::Receiver<()>,
}

/// How long a finished run waits for its context thread before leaving the
/// thread to exit in the background.
const TEARDOWN_GRACE: Duration = Duration::from_millis(50);

pub struct SandboxRunner {
    compiler: Arc<CompilePipeline>,
    config: RunnerConfig,
    status: watch::Sender<RunStatus>,
    active: Arc<Mutex<Option<ActiveRun>>>,
    // serializes "cancel the previous run, compile, start executing"
    gate: tokio::sync::Mutex<()>,
    next_run: AtomicU64,
    live: Arc<AtomicUsize>,
}

impl SandboxRunner {
    pub fn new(compiler: Arc<CompilePipeline>, config: RunnerConfig) -> Self {
        let (status, _) = watch::channel(RunStatus {
            run_id: 0,
            state: RunState::Idle,
        });
        Self {
            compiler,
            config,
            status,
            active: Arc::new(Mutex::new(None)),
            gate: tokio::sync::Mutex::new(()),
            next_run: AtomicU64::new(0),
            live: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn config(&self) -> RunnerConfig {
        self.config
    }

    pub fn compiler(&self) -> &Arc<CompilePipeline> {
        &self.compiler
    }

    pub fn status(&self) -> RunStatus {
        *self.status.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<RunStatus> {
        self.status.subscribe()
    }

    /// Number of execution contexts whose threads are still running.
    pub fn live_contexts(&self) -> usize {
        self.live.load(Ordering::SeqCst)
    }

    /// Cancels the executing run, if any. Returns whether one was signalled.
    pub fn cancel(&self) -> bool {
        match self.lock_active().as_ref() {
            Some(active) => {
                tracing::info!(run_id = active.run_id, "run cancel requested");
                active.cancel.send_replace(true);
                true
            }
            None => false,
        }
    }

    pub async fn run(&self, source: &str) -> RunReport {
        self.run_with_sink(source, None).await
    }

    /// Like [`run`](Self::run), also forwarding each console event to `sink`
    /// as soon as it arrives.
    pub async fn run_with_sink(
        &self,
        source: &str,
        sink: Option<mpsc::UnboundedSender<LogEvent>>,
    ) -> RunReport {
        let run_id = self.next_run.fetch_add(1, Ordering::SeqCst) + 1;
        let (cancel_tx, cancel_rx) = watch::channel(false);
        let (finished_tx, finished_rx) = oneshot::channel();
        let (handle, output, started) = {
            let _gate = self.gate.lock().await;
            self.supersede(run_id).await;
            self.publish(run_id, RunState::Compiling);

            self.compiler.initialize().await;
            let output = match self.compiler.compile(source) {
                CompileResult::Success { output } => output,
                CompileResult::Failure { reason } => {
                    tracing::info!(run_id, reason = %reason, "run failed to compile");
                    return self.finish(
                        run_id,
                        RunOutcome::Failed(RunFailure::Compile(reason)),
                        Vec::new(),
                        None,
                        None,
                    );
                }
            };

            *self.lock_active() = Some(ActiveRun {
                run_id,
                cancel: cancel_tx,
                finished: finished_rx,
            });
            let started = Instant::now();
            self.publish(run_id, RunState::Executing);

            let limits = vm::Limits {
                max_call_depth: self.config.max_call_depth,
                max_output_bytes: self.config.max_output_bytes,
                max_string_bytes: self.config.max_string_bytes,
            };
            match context::spawn(limits, self.live.clone()) {
                Ok(handle) => (handle, output, started),
                Err(e) => {
                    tracing::error!(run_id, error = %e, "spawn execution context failed");
                    clear_active(&self.active, run_id);
                    return self.finish(
                        run_id,
                        RunOutcome::Failed(RunFailure::RuntimeFault(format!(
                            "could not start execution context: {e}"
                        ))),
                        Vec::new(),
                        None,
                        Some(started),
                    );
                }
            }
        };

        let (outcome, logs, value, exited) = self
            .supervise(run_id, handle, output, cancel_rx, sink)
            .await;

        let lingering = match exited {
            Some(mut exited) => {
                let stopped = tokio::time::timeout(TEARDOWN_GRACE, &mut exited)
                    .await
                    .is_ok();
                (!stopped).then_some(exited)
            }
            None => None,
        };
        let report = self.finish(run_id, outcome, logs, value, Some(started));
        match lingering {
            None => {
                let _ = finished_tx.send(());
                clear_active(&self.active, run_id);
            }
            Some(exited) => {
                // the next run still waits on `finished` before it starts
                tracing::warn!(run_id, "execution context is still stopping");
                let active = self.active.clone();
                tokio::spawn(async move {
                    let _ = exited.await;
                    let _ = finished_tx.send(());
                    clear_active(&active, run_id);
                });
            }
        }
        report
    }

    /// Cancels the executing run, if any, and waits until its context has
    /// exited.
    async fn supersede(&self, run_id: u64) {
        let previous = self.lock_active().take();
        if let Some(previous) = previous {
            tracing::info!(
                run_id,
                previous = previous.run_id,
                "superseding executing run"
            );
            previous.cancel.send_replace(true);
            let _ = previous.finished.await;
        }
    }

    async fn supervise(
        &self,
        run_id: u64,
        mut handle: context::ContextHandle,
        script: String,
        mut cancel_rx: watch::Receiver<bool>,
        sink: Option<mpsc::UnboundedSender<LogEvent>>,
    ) -> (
        RunOutcome,
        Vec<LogEvent>,
        Option<String>,
        Option<oneshot::Receiver<()>>,
    ) {
        let mut logs = Vec::new();
        let mut value = None;

        let outcome = if handle.post(&HostMessage::Exec { payload: script }) {
            let deadline = tokio::time::sleep(self.config.deadline);
            tokio::pin!(deadline);
            loop {
                tokio::select! {
                    biased;
                    Ok(_) = cancel_rx.wait_for(|cancelled| *cancelled) => {
                        break RunOutcome::Cancelled;
                    }
                    _ = &mut deadline => break RunOutcome::TimedOut,
                    message = handle.recv() => match message {
                        Some(ContextMessage::Log { level, message }) => {
                            let event = LogEvent { level, message };
                            if let Some(sink) = &sink {
                                let _ = sink.send(event.clone());
                            }
                            logs.push(event);
                        }
                        Some(ContextMessage::Done { value: returned }) => {
                            value = returned;
                            break RunOutcome::Completed;
                        }
                        Some(ContextMessage::Error { message }) => {
                            break RunOutcome::Failed(RunFailure::RuntimeFault(message));
                        }
                        None => {
                            break RunOutcome::Failed(RunFailure::RuntimeFault(
                                "execution context exited unexpectedly".to_string(),
                            ));
                        }
                    },
                }
            }
        } else {
            RunOutcome::Failed(RunFailure::RuntimeFault(
                "execution context rejected the script".to_string(),
            ))
        };

        let exited = handle.teardown();
        match &outcome {
            RunOutcome::TimedOut => tracing::warn!(
                run_id,
                deadline_ms = self.config.deadline.as_millis() as u64,
                "run timed out"
            ),
            RunOutcome::Cancelled => tracing::warn!(run_id, "run cancelled"),
            _ => {}
        }
        (outcome, logs, value, exited)
    }

    fn finish(
        &self,
        run_id: u64,
        outcome: RunOutcome,
        logs: Vec<LogEvent>,
        value: Option<String>,
        started_executing: Option<Instant>,
    ) -> RunReport {
        let state = outcome.state();
        self.publish(run_id, state);
        tracing::info!(run_id, ?state, logs = logs.len(), "run finished");
        RunReport {
            run_id,
            outcome,
            logs,
            value,
            started_executing,
            finished: Instant::now(),
        }
    }

    fn publish(&self, run_id: u64, state: RunState) {
        tracing::debug!(run_id, ?state, "run state");
        self.status.send_replace(RunStatus { run_id, state });
    }

    fn lock_active(&self) -> MutexGuard<'_, Option<ActiveRun>> {
        lock(&self.active)
    }
}

fn lock(active: &Mutex<Option<ActiveRun>>) -> MutexGuard<'_, Option<ActiveRun>> {
    active.lock().unwrap_or_else(PoisonError::into_inner)
}

fn clear_active(active: &Mutex<Option<ActiveRun>>, run_id: u64) {
    let mut active = lock(active);
    if active.as_ref().is_some_and(|a| a.run_id == run_id) {
        *active = None;
    }
}

#[cfg(test)]
#[path = "../../../tests/unit/kernel/sandbox/runner.rs"]
mod tests;
