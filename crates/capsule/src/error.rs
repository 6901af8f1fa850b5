//! Error types for capsule.

use thiserror::Error;

/// Result type for capsule operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors surfaced by the execution service.
///
/// Every dispatched request resolves with exactly one outcome: a value, or
/// one of these. `Timeout` is distinct from `Runtime` so callers can tell
/// "ran and failed" from "never finished".
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Error {
    /// The isolated context could not be created, or it died before
    /// reporting a result.
    #[error("context error: {0}")]
    Context(String),

    /// The submitted code failed to compile or threw during invocation.
    #[error("runtime error: {0}")]
    Runtime(String),

    /// No terminal signal arrived within the deadline. The context has
    /// been forcibly killed.
    #[error("execution timed out")]
    Timeout,
}
