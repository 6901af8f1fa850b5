//! Dispatching one execution request to an isolated context.
//!
//! The [`dispatcher::Dispatcher`] is the public entry point. It spawns a
//! fresh [`isolate::IsolatedContext`] per request, races the context's
//! terminal signal against a wall-clock deadline, and tears the context
//! down on every exit path.

pub mod dispatcher;
pub mod isolate;
pub mod protocol;
pub mod thread;

pub use dispatcher::{DEFAULT_TIMEOUT, Dispatcher, ExecuteOptions};
pub use isolate::{ContextProbe, ContextState, IsolateSpawner, IsolatedContext};
pub use protocol::{ContextSignal, ExecutionRequest};
pub use thread::{ThreadIsolate, ThreadSpawner};
