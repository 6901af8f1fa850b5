//! Evaluator capability for sandboxed source text.
//!
//! Isolated contexts do not bake in a language. They depend on the narrow
//! [`Evaluator`] trait: compile source text into a callable, invoke it with
//! positional inputs, observe a value or a thrown error. [`ScriptEvaluator`]
//! is the default implementation, a small script language with a lexer,
//! recursive-descent parser and tree-walking interpreter over JSON values.
//!
//! Evaluation must be interruptible: the interpreter polls an [`Interrupt`]
//! flag at every statement and loop iteration, so a context can be killed
//! mid-invocation without any cooperation from the sandboxed code.

mod ast;
mod interp;
mod lexer;
mod parser;

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use serde_json::Value;
use thiserror::Error;

/// Shared flag used to stop an evaluation from another thread.
///
/// Cloneable; all clones see a trip. A tripped flag is permanent for the
/// lifetime of the evaluation it belongs to.
#[derive(Clone, Default)]
pub struct Interrupt {
    tripped: Arc<AtomicBool>,
}

impl Interrupt {
    /// Create a new, untripped interrupt flag.
    pub fn new() -> Self {
        Self::default()
    }

    /// Request that the evaluation stop at its next poll point.
    pub fn trip(&self) {
        self.tripped.store(true, Ordering::Relaxed);
    }

    /// Check whether a stop has been requested.
    pub fn is_tripped(&self) -> bool {
        self.tripped.load(Ordering::Relaxed)
    }
}

/// Source text failed to compile into a program.
#[derive(Debug, Clone, Error)]
#[error("{0}")]
pub struct CompileError(pub String);

/// A compiled program failed while running.
#[derive(Debug, Clone, Error)]
pub enum EvalError {
    /// The program threw a value; the message is the thrown value's text.
    #[error("{0}")]
    Thrown(String),

    /// A runtime fault: type error, unknown name, depth limit, and so on.
    #[error("{0}")]
    Fault(String),

    /// The evaluation was stopped via its [`Interrupt`] flag.
    #[error("evaluation interrupted")]
    Interrupted,
}

/// A language implementation an isolated context can evaluate code with.
pub trait Evaluator: Send + Sync {
    /// Compile source text into a callable program.
    ///
    /// The text must define at least one function; the last top-level
    /// function declaration is the program's entry point.
    fn compile(&self, code: &str) -> Result<Box<dyn Program>, CompileError>;
}

/// A compiled program ready to be invoked with positional inputs.
pub trait Program: Send + std::fmt::Debug {
    /// Invoke the entry point, applying `inputs` positionally.
    ///
    /// Implementations must poll `interrupt` often enough that a tripped
    /// flag stops even code that never yields.
    fn call(&self, inputs: &[Value], interrupt: &Interrupt) -> Result<Value, EvalError>;
}

/// Default evaluator for the capsule script language.
#[derive(Debug, Clone, Copy, Default)]
pub struct ScriptEvaluator;

impl Evaluator for ScriptEvaluator {
    fn compile(&self, code: &str) -> Result<Box<dyn Program>, CompileError> {
        let script = parser::parse(code).map_err(|e| CompileError(e.to_string()))?;
        if script.functions.is_empty() {
            return Err(CompileError("script defines no function".to_string()));
        }
        Ok(Box::new(CompiledScript { script }))
    }
}

#[derive(Debug)]
struct CompiledScript {
    script: ast::Script,
}

impl Program for CompiledScript {
    fn call(&self, inputs: &[Value], interrupt: &Interrupt) -> Result<Value, EvalError> {
        interp::run(&self.script, inputs, interrupt)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_interrupt_clone_shares_state() {
        let interrupt = Interrupt::new();
        let clone = interrupt.clone();

        assert!(!interrupt.is_tripped());
        clone.trip();
        assert!(interrupt.is_tripped());
    }

    #[test]
    fn test_compile_and_call() {
        let program = ScriptEvaluator
            .compile("fn double(x) { return x * 2; }")
            .unwrap();
        let value = program.call(&[json!(21)], &Interrupt::new()).unwrap();
        assert_eq!(value, json!(42));
    }

    #[test]
    fn test_compile_rejects_empty_script() {
        let err = ScriptEvaluator.compile("").unwrap_err();
        assert!(err.to_string().contains("no function"));
    }

    #[test]
    fn test_compile_rejects_bad_syntax() {
        let err = ScriptEvaluator.compile("fn broken( {").unwrap_err();
        assert!(err.to_string().contains("syntax error"));
    }

    #[test]
    fn test_last_function_is_entry_point() {
        let code = "\
fn helper(x) { return x + 1; }
fn entry(x) { return helper(x) * 10; }";
        let program = ScriptEvaluator.compile(code).unwrap();
        let value = program.call(&[json!(3)], &Interrupt::new()).unwrap();
        assert_eq!(value, json!(40));
    }
}
