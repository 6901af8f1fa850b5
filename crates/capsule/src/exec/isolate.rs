//! The narrow seam between the dispatcher and an isolation primitive.
//!
//! An isolated context is an independently scheduled unit of work with no
//! shared mutable state with its caller beyond a one-shot signal channel.
//! The trait is deliberately small (`send`, `take_signal`, `kill`, `probe`)
//! so the isolation primitive can be swapped: a dedicated thread (the
//! default, see [`super::thread`]), an OS process speaking the same
//! protocol over a pipe, or anything else that is externally killable.

use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};

use tokio::sync::oneshot;

use crate::error::Result;

use super::protocol::{ContextSignal, ExecutionRequest};

/// Lifecycle states of an isolated context.
///
/// `Created` and `Running` are the only non-terminal states. The three
/// terminal states are mutually exclusive; `Killed` can be entered from
/// either non-terminal state at any time via [`IsolatedContext::kill`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ContextState {
    Created = 0,
    Running = 1,
    Completed = 2,
    Failed = 3,
    Killed = 4,
}

impl ContextState {
    fn from_u8(raw: u8) -> Self {
        match raw {
            0 => ContextState::Created,
            1 => ContextState::Running,
            2 => ContextState::Completed,
            3 => ContextState::Failed,
            _ => ContextState::Killed,
        }
    }

    /// Whether the context has finished, for whatever reason.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            ContextState::Completed | ContextState::Failed | ContextState::Killed
        )
    }
}

/// Thread-safe view of one context's state machine.
///
/// Cloneable and cheap; callers use it to verify that no context outlives
/// its outcome. Transitions go through compare-and-swap, so exactly one
/// terminal state wins even when a natural finish races a kill.
#[derive(Clone)]
pub struct ContextProbe {
    state: Arc<AtomicU8>,
}

impl ContextProbe {
    pub(crate) fn new() -> Self {
        Self {
            state: Arc::new(AtomicU8::new(ContextState::Created as u8)),
        }
    }

    /// Current lifecycle state.
    pub fn state(&self) -> ContextState {
        ContextState::from_u8(self.state.load(Ordering::SeqCst))
    }

    /// Whether the context has reached a terminal state.
    pub fn is_terminated(&self) -> bool {
        self.state().is_terminal()
    }

    /// Move from `from` to `to`, failing if the state changed meanwhile.
    /// Terminal states are never left, since no transition starts there.
    pub(crate) fn transition(&self, from: ContextState, to: ContextState) -> bool {
        self.state
            .compare_exchange(from as u8, to as u8, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }
}

/// An independently scheduled unit of work running one execution request.
pub trait IsolatedContext: Send {
    /// Deliver the request. Each context accepts exactly one.
    fn send(&mut self, request: ExecutionRequest) -> Result<()>;

    /// Take the one-shot receiver for the terminal signal.
    ///
    /// Returns `None` once taken. A receiver that resolves with an error
    /// means the context died without reporting a result.
    fn take_signal(&mut self) -> Option<oneshot::Receiver<ContextSignal>>;

    /// Forcibly terminate the context.
    ///
    /// Callable at any point in the context's lifetime, including
    /// mid-evaluation. Idempotent, and a no-op when the context already
    /// finished naturally. A killed context never emits a signal
    /// afterwards.
    fn kill(&mut self);

    /// Probe reporting the context's lifecycle state.
    fn probe(&self) -> ContextProbe;
}

/// Factory choosing the isolation primitive a dispatcher spawns.
///
/// Contexts are created fresh per request and never pooled or reused;
/// per-request exclusivity is what makes concurrent executions
/// independent without locks.
pub trait IsolateSpawner: Send + Sync {
    /// Create one fresh context in its `Created` state.
    fn spawn(&self) -> Result<Box<dyn IsolatedContext>>;
}
