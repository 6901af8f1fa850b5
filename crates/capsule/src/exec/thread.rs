//! Thread-backed isolation primitive.
//!
//! Each context is a dedicated OS thread running the evaluator. Forcible
//! termination needs no cooperation from the sandboxed code: the evaluator
//! polls an [`Interrupt`] flag at every statement, so `kill` stops even
//! code that never yields. The terminal-state transition happens through
//! the shared [`ContextProbe`] *before* the signal send, which is what
//! guarantees a killed context never emits a signal afterwards.

use std::any::Any;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::sync::mpsc;
use std::thread;

use serde_json::Value;
use tokio::sync::oneshot;
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::lang::{EvalError, Evaluator, Interrupt, ScriptEvaluator};

use super::isolate::{ContextProbe, ContextState, IsolateSpawner, IsolatedContext};
use super::protocol::{ContextSignal, ExecutionRequest};

/// Spawner for [`ThreadIsolate`] contexts.
pub struct ThreadSpawner {
    evaluator: Arc<dyn Evaluator>,
}

impl ThreadSpawner {
    /// Spawner using the default script evaluator.
    pub fn new() -> Self {
        Self::with_evaluator(Arc::new(ScriptEvaluator))
    }

    /// Spawner using a custom evaluator.
    pub fn with_evaluator(evaluator: Arc<dyn Evaluator>) -> Self {
        Self { evaluator }
    }
}

impl Default for ThreadSpawner {
    fn default() -> Self {
        Self::new()
    }
}

impl IsolateSpawner for ThreadSpawner {
    fn spawn(&self) -> Result<Box<dyn IsolatedContext>> {
        Ok(Box::new(ThreadIsolate::spawn(self.evaluator.clone())?))
    }
}

/// Handle to one evaluation thread.
pub struct ThreadIsolate {
    id: Uuid,
    /// Dropped on kill to unblock a thread still waiting for its request.
    request_tx: Option<mpsc::Sender<ExecutionRequest>>,
    signal_rx: Option<oneshot::Receiver<ContextSignal>>,
    interrupt: Interrupt,
    probe: ContextProbe,
    killed: bool,
}

impl ThreadIsolate {
    /// Spawn the evaluation thread for one request.
    pub fn spawn(evaluator: Arc<dyn Evaluator>) -> Result<Self> {
        let id = Uuid::new_v4();
        let (request_tx, request_rx) = mpsc::channel::<ExecutionRequest>();
        let (signal_tx, signal_rx) = oneshot::channel();
        let interrupt = Interrupt::new();
        let probe = ContextProbe::new();

        let thread_interrupt = interrupt.clone();
        let thread_probe = probe.clone();
        thread::Builder::new()
            .name(format!("capsule-context-{id}"))
            .spawn(move || {
                run_context(
                    evaluator,
                    request_rx,
                    signal_tx,
                    thread_interrupt,
                    thread_probe,
                )
            })
            .map_err(|e| Error::Context(format!("failed to spawn context thread: {e}")))?;

        tracing::debug!(context = %id, "spawned isolated context");

        Ok(Self {
            id,
            request_tx: Some(request_tx),
            signal_rx: Some(signal_rx),
            interrupt,
            probe,
            killed: false,
        })
    }

    /// Context identifier, used in thread names and log events.
    pub fn id(&self) -> Uuid {
        self.id
    }
}

impl IsolatedContext for ThreadIsolate {
    fn send(&mut self, request: ExecutionRequest) -> Result<()> {
        let tx = self
            .request_tx
            .as_ref()
            .ok_or_else(|| Error::Context("context has been killed".to_string()))?;
        tx.send(request).map_err(|_| {
            Error::Context("context thread exited before accepting the request".to_string())
        })
    }

    fn take_signal(&mut self) -> Option<oneshot::Receiver<ContextSignal>> {
        self.signal_rx.take()
    }

    fn kill(&mut self) {
        if self.killed {
            return;
        }
        self.killed = true;

        self.interrupt.trip();
        self.request_tx = None;

        let interrupted = self
            .probe
            .transition(ContextState::Created, ContextState::Killed)
            || self
                .probe
                .transition(ContextState::Running, ContextState::Killed);
        if interrupted {
            tracing::debug!(context = %self.id, "killed isolated context");
        }
    }

    fn probe(&self) -> ContextProbe {
        self.probe.clone()
    }
}

impl Drop for ThreadIsolate {
    fn drop(&mut self) {
        self.kill();
    }
}

/// Body of the evaluation thread.
///
/// Emits at most one signal. The send only happens after winning the
/// compare-and-swap into a terminal state, so a context whose probe reads
/// `Killed` has provably not signaled.
fn run_context(
    evaluator: Arc<dyn Evaluator>,
    request_rx: mpsc::Receiver<ExecutionRequest>,
    signal_tx: oneshot::Sender<ContextSignal>,
    interrupt: Interrupt,
    probe: ContextProbe,
) {
    // A dropped sender means the context was killed while still idle.
    let Ok(request) = request_rx.recv() else {
        return;
    };

    if !probe.transition(ContextState::Created, ContextState::Running) {
        return; // killed before the request arrived
    }

    let outcome = catch_unwind(AssertUnwindSafe(|| {
        evaluate(&*evaluator, &request, &interrupt)
    }));

    let signal = match outcome {
        Ok(Ok(value)) => ContextSignal::Completed(value),
        Ok(Err(EvalError::Interrupted)) => return, // killed mid-evaluation
        Ok(Err(err)) => ContextSignal::Failed(err.to_string()),
        Err(panic) => {
            let message = panic_message(panic.as_ref());
            tracing::warn!(%message, "evaluation panicked");
            ContextSignal::Failed(format!("evaluation panicked: {message}"))
        }
    };

    let terminal = match &signal {
        ContextSignal::Completed(_) => ContextState::Completed,
        ContextSignal::Failed(_) => ContextState::Failed,
    };
    if probe.transition(ContextState::Running, terminal) {
        // The receiver may already be gone if the dispatcher resolved
        // another way; that is fine, the outcome is settled.
        let _ = signal_tx.send(signal);
    }
}

fn evaluate(
    evaluator: &dyn Evaluator,
    request: &ExecutionRequest,
    interrupt: &Interrupt,
) -> std::result::Result<Value, EvalError> {
    let program = evaluator
        .compile(&request.code)
        .map_err(|e| EvalError::Fault(e.to_string()))?;
    program.call(&request.inputs, interrupt)
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::time::Duration;

    fn spawn_isolate() -> ThreadIsolate {
        ThreadIsolate::spawn(Arc::new(ScriptEvaluator)).unwrap()
    }

    fn request(code: &str, inputs: Vec<Value>) -> ExecutionRequest {
        ExecutionRequest {
            code: code.to_string(),
            inputs,
        }
    }

    #[tokio::test]
    async fn test_completes_with_value() {
        let mut isolate = spawn_isolate();
        isolate
            .send(request("fn double(x) { return x * 2; }", vec![json!(21)]))
            .unwrap();
        let rx = isolate.take_signal().unwrap();

        match rx.await.unwrap() {
            ContextSignal::Completed(value) => assert_eq!(value, json!(42)),
            other => panic!("wrong signal: {other:?}"),
        }
        assert_eq!(isolate.probe().state(), ContextState::Completed);
    }

    #[tokio::test]
    async fn test_thrown_error_fails() {
        let mut isolate = spawn_isolate();
        isolate
            .send(request("fn f() { throw \"boom\"; }", vec![]))
            .unwrap();
        let rx = isolate.take_signal().unwrap();

        match rx.await.unwrap() {
            ContextSignal::Failed(message) => assert_eq!(message, "boom"),
            other => panic!("wrong signal: {other:?}"),
        }
        assert_eq!(isolate.probe().state(), ContextState::Failed);
    }

    #[tokio::test]
    async fn test_compile_error_fails_without_crashing() {
        let mut isolate = spawn_isolate();
        isolate.send(request("fn broken( {", vec![])).unwrap();
        let rx = isolate.take_signal().unwrap();

        match rx.await.unwrap() {
            ContextSignal::Failed(message) => assert!(message.contains("syntax error")),
            other => panic!("wrong signal: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_killed_context_never_signals() {
        let mut isolate = spawn_isolate();
        isolate
            .send(request("fn spin() { while true { } }", vec![]))
            .unwrap();
        let rx = isolate.take_signal().unwrap();

        // Let the loop actually start before killing.
        tokio::time::sleep(Duration::from_millis(20)).await;
        isolate.kill();

        // The sender is dropped without a signal ever being emitted.
        assert!(rx.await.is_err());
        assert_eq!(isolate.probe().state(), ContextState::Killed);
    }

    #[tokio::test]
    async fn test_kill_is_idempotent() {
        let mut isolate = spawn_isolate();
        let probe = isolate.probe();

        isolate.kill();
        isolate.kill();

        assert_eq!(probe.state(), ContextState::Killed);
        assert!(isolate.send(request("fn f() { return 1; }", vec![])).is_err());
    }

    #[tokio::test]
    async fn test_kill_after_natural_finish_is_noop() {
        let mut isolate = spawn_isolate();
        isolate
            .send(request("fn f() { return 1; }", vec![]))
            .unwrap();
        let rx = isolate.take_signal().unwrap();
        rx.await.unwrap();

        isolate.kill();
        assert_eq!(isolate.probe().state(), ContextState::Completed);
    }

    #[tokio::test]
    async fn test_signal_taken_once() {
        let mut isolate = spawn_isolate();
        assert!(isolate.take_signal().is_some());
        assert!(isolate.take_signal().is_none());
    }
}
