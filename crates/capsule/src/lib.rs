//! Sandboxed code execution in per-request isolated contexts.
//!
//! This crate provides:
//! - A [`Dispatcher`] that takes a snippet of source text plus positional
//!   input values, runs it in a fresh isolated context under a hard
//!   wall-clock deadline, and resolves with the result or a well-defined
//!   error
//! - The narrow [`IsolatedContext`] / [`IsolateSpawner`] seam, with a
//!   thread-backed default primitive that is forcibly killable at any
//!   point, including mid-evaluation
//! - A pluggable [`Evaluator`] capability, with a small script language
//!   as the default implementation
//!
//! The context is torn down on every exit path; exactly one outcome is
//! produced per request.
//!
//! ```
//! use capsule::Dispatcher;
//! use serde_json::json;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> capsule::Result<()> {
//! let dispatcher = Dispatcher::new();
//! let value = dispatcher
//!     .execute("fn double(x) { return x * 2; }", vec![json!(21)])
//!     .await?;
//! assert_eq!(value, json!(42));
//! # Ok(())
//! # }
//! ```

pub mod error;
pub mod exec;
pub mod lang;

pub use error::{Error, Result};
pub use exec::{
    ContextProbe, ContextSignal, ContextState, DEFAULT_TIMEOUT, Dispatcher, ExecuteOptions,
    ExecutionRequest, IsolateSpawner, IsolatedContext, ThreadIsolate, ThreadSpawner,
};
pub use lang::{CompileError, EvalError, Evaluator, Interrupt, Program, ScriptEvaluator};
