//! Dispatch of execution requests to isolated contexts.

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;

use crate::error::{Error, Result};

use super::isolate::{IsolateSpawner, IsolatedContext};
use super::protocol::{ContextSignal, ExecutionRequest};
use super::thread::ThreadSpawner;

/// Default deadline for one execution request.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_millis(2000);

/// Options for a single execute call.
#[derive(Debug, Clone, Copy)]
pub struct ExecuteOptions {
    /// Wall-clock deadline. Must be positive; the context is forcibly
    /// killed when it elapses.
    pub timeout: Duration,
}

impl Default for ExecuteOptions {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_TIMEOUT,
        }
    }
}

/// Public entry point for sandboxed code execution.
///
/// Each call spawns one fresh isolated context, races the context's
/// terminal signal against the deadline, and unconditionally tears the
/// context down before resolving. Exactly one outcome is produced per
/// call; concurrent calls are fully independent.
pub struct Dispatcher {
    spawner: Arc<dyn IsolateSpawner>,
}

impl Dispatcher {
    /// Dispatcher backed by thread contexts and the default script
    /// evaluator.
    pub fn new() -> Self {
        Self::with_spawner(Arc::new(ThreadSpawner::new()))
    }

    /// Dispatcher using a custom isolation primitive.
    pub fn with_spawner(spawner: Arc<dyn IsolateSpawner>) -> Self {
        Self { spawner }
    }

    /// Execute `code` with the default 2-second deadline.
    pub async fn execute(&self, code: &str, inputs: Vec<Value>) -> Result<Value> {
        self.execute_with(code, inputs, ExecuteOptions::default())
            .await
    }

    /// Execute `code`, applying `inputs` positionally to its entry point.
    ///
    /// Resolves with exactly one of: the returned value, a runtime error
    /// (compile failure or thrown error), a timeout, or a context error
    /// when the isolate could not be created or died without reporting.
    /// The context is terminated by the time this returns, on every path;
    /// no retry is attempted.
    pub async fn execute_with(
        &self,
        code: &str,
        inputs: Vec<Value>,
        options: ExecuteOptions,
    ) -> Result<Value> {
        // A spawn failure resolves immediately, without arming the timer.
        let mut context = self.spawner.spawn()?;

        let request = ExecutionRequest {
            code: code.to_string(),
            inputs,
        };
        if let Err(err) = context.send(request) {
            context.kill();
            return Err(err);
        }

        let Some(signal_rx) = context.take_signal() else {
            context.kill();
            return Err(Error::Context(
                "context signal channel already taken".to_string(),
            ));
        };

        // First-settle-wins race. Neither branch has priority; if the
        // signal and the deadline are ready simultaneously, either may
        // win. The losing future is dropped, which cancels it.
        let outcome = tokio::select! {
            signal = signal_rx => match signal {
                Ok(ContextSignal::Completed(value)) => Ok(value),
                Ok(ContextSignal::Failed(message)) => Err(Error::Runtime(message)),
                Err(_) => Err(Error::Context(
                    "context exited without reporting a result".to_string(),
                )),
            },
            _ = tokio::time::sleep(options.timeout) => Err(Error::Timeout),
        };

        // Idempotent: a no-op when the context already finished naturally.
        context.kill();

        match &outcome {
            Ok(_) => tracing::debug!("execution completed"),
            Err(err) => tracing::debug!(error = %err, "execution failed"),
        }
        outcome
    }
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::time::Instant;

    struct FailingSpawner;

    impl IsolateSpawner for FailingSpawner {
        fn spawn(&self) -> Result<Box<dyn IsolatedContext>> {
            Err(Error::Context("isolation backend unavailable".to_string()))
        }
    }

    #[test]
    fn test_default_timeout_is_two_seconds() {
        assert_eq!(ExecuteOptions::default().timeout, Duration::from_millis(2000));
    }

    #[tokio::test]
    async fn test_spawn_failure_resolves_immediately() {
        let dispatcher = Dispatcher::with_spawner(Arc::new(FailingSpawner));
        let start = Instant::now();

        let err = dispatcher
            .execute("fn f() { return 1; }", vec![])
            .await
            .unwrap_err();

        assert!(matches!(err, Error::Context(_)));
        // Resolved without waiting on the 2s default deadline.
        assert!(start.elapsed() < Duration::from_millis(500));
    }

    #[tokio::test]
    async fn test_execute_returns_value() {
        let dispatcher = Dispatcher::new();
        let value = dispatcher
            .execute("fn double(x) { return x * 2; }", vec![json!(21)])
            .await
            .unwrap();
        assert_eq!(value, json!(42));
    }
}
