//! Message types exchanged between the dispatcher and an isolated context.
//!
//! One request goes out, exactly one terminal signal comes back. The types
//! are serde-serializable so an isolation primitive that crosses a process
//! boundary can frame them on a wire; the in-process thread isolate passes
//! them over channels directly.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One code-execution request. Immutable once submitted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionRequest {
    /// Source text defining at least one function. The last top-level
    /// function declaration is the entry point.
    pub code: String,

    /// Values applied positionally to the entry point.
    pub inputs: Vec<Value>,
}

/// Terminal signal reported by an isolated context.
///
/// A context emits exactly one of these per request, never both, never
/// none — unless it is killed first, in which case it emits nothing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ContextSignal {
    /// The entry point returned a value.
    Completed(Value),

    /// The code failed to compile or threw during invocation.
    Failed(String),
}
