//! Tree-walking interpreter for the capsule script language.
//!
//! Values are JSON values. Numbers are f64 internally and normalized back
//! to integers when exact, so `21 * 2` comes out as `42`, not `42.0`.
//!
//! The interrupt flag is polled at every statement and every loop
//! iteration; a tripped flag aborts with [`EvalError::Interrupted`] without
//! emitting a value.

use std::collections::HashMap;

use serde_json::{Number, Value};

use super::ast::{BinaryOp, Expr, Function, Script, Stmt, UnaryOp};
use super::{EvalError, Interrupt};

/// Cap on user-function call depth, so runaway recursion fails with a
/// fault instead of exhausting the thread's stack.
const MAX_CALL_DEPTH: usize = 64;

type Env = HashMap<String, Value>;

/// Run a script's entry point with the given positional inputs.
///
/// Missing arguments are filled with `null`, extra ones ignored.
pub fn run(script: &Script, inputs: &[Value], interrupt: &Interrupt) -> Result<Value, EvalError> {
    let Some(entry) = script.functions.last() else {
        return Err(EvalError::Fault("script defines no function".to_string()));
    };
    let interp = Interp { script, interrupt };
    interp.call_function(entry, inputs, 0)
}

/// Result of executing a statement block.
enum Flow {
    Normal,
    Return(Value),
}

struct Interp<'a> {
    script: &'a Script,
    interrupt: &'a Interrupt,
}

impl Interp<'_> {
    fn call_function(
        &self,
        function: &Function,
        args: &[Value],
        depth: usize,
    ) -> Result<Value, EvalError> {
        if depth > MAX_CALL_DEPTH {
            return Err(EvalError::Fault(format!(
                "call depth limit of {MAX_CALL_DEPTH} exceeded in `{}`",
                function.name
            )));
        }

        let mut env: Env = function
            .params
            .iter()
            .enumerate()
            .map(|(i, param)| (param.clone(), args.get(i).cloned().unwrap_or(Value::Null)))
            .collect();

        match self.exec_block(&function.body, &mut env, depth)? {
            Flow::Return(value) => Ok(value),
            Flow::Normal => Ok(Value::Null),
        }
    }

    fn exec_block(&self, stmts: &[Stmt], env: &mut Env, depth: usize) -> Result<Flow, EvalError> {
        for stmt in stmts {
            if self.interrupt.is_tripped() {
                return Err(EvalError::Interrupted);
            }
            match stmt {
                Stmt::Let { name, value } => {
                    let value = self.eval(value, env, depth)?;
                    env.insert(name.clone(), value);
                }
                Stmt::Assign { target, value } => {
                    if !env.contains_key(target) {
                        return Err(EvalError::Fault(format!(
                            "assignment to undeclared variable `{target}`"
                        )));
                    }
                    let value = self.eval(value, env, depth)?;
                    env.insert(target.clone(), value);
                }
                Stmt::If {
                    cond,
                    then_body,
                    else_body,
                } => {
                    let branch = if self.eval_bool(cond, env, depth)? {
                        then_body
                    } else {
                        else_body
                    };
                    if let Flow::Return(value) = self.exec_block(branch, env, depth)? {
                        return Ok(Flow::Return(value));
                    }
                }
                Stmt::While { cond, body } => {
                    while self.eval_bool(cond, env, depth)? {
                        if self.interrupt.is_tripped() {
                            return Err(EvalError::Interrupted);
                        }
                        if let Flow::Return(value) = self.exec_block(body, env, depth)? {
                            return Ok(Flow::Return(value));
                        }
                    }
                }
                Stmt::Return { value } => {
                    let value = match value {
                        Some(expr) => self.eval(expr, env, depth)?,
                        None => Value::Null,
                    };
                    return Ok(Flow::Return(value));
                }
                Stmt::Throw { value } => {
                    let value = self.eval(value, env, depth)?;
                    return Err(EvalError::Thrown(thrown_message(&value)));
                }
                Stmt::Expr(expr) => {
                    self.eval(expr, env, depth)?;
                }
            }
        }
        Ok(Flow::Normal)
    }

    fn eval(&self, expr: &Expr, env: &Env, depth: usize) -> Result<Value, EvalError> {
        match expr {
            Expr::Number(n) => num(*n),
            Expr::Str(s) => Ok(Value::String(s.clone())),
            Expr::Bool(b) => Ok(Value::Bool(*b)),
            Expr::Null => Ok(Value::Null),
            Expr::Array(items) => {
                let values = items
                    .iter()
                    .map(|item| self.eval(item, env, depth))
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(Value::Array(values))
            }
            Expr::Var(name) => env.get(name).cloned().ok_or_else(|| {
                EvalError::Fault(format!("undeclared variable `{name}`"))
            }),
            Expr::Unary { op, expr } => {
                let value = self.eval(expr, env, depth)?;
                match op {
                    UnaryOp::Neg => num(-number_of(&value, "-")?),
                    UnaryOp::Not => match value {
                        Value::Bool(b) => Ok(Value::Bool(!b)),
                        other => Err(EvalError::Fault(format!(
                            "operand of `!` must be a boolean, got {}",
                            type_name(&other)
                        ))),
                    },
                }
            }
            Expr::Binary { op, lhs, rhs } => self.eval_binary(*op, lhs, rhs, env, depth),
            Expr::Call { callee, args } => {
                let args = args
                    .iter()
                    .map(|arg| self.eval(arg, env, depth))
                    .collect::<Result<Vec<_>, _>>()?;
                self.call(callee, &args, depth)
            }
            Expr::Index { target, index } => {
                let target = self.eval(target, env, depth)?;
                let index = self.eval(index, env, depth)?;
                eval_index(&target, &index)
            }
        }
    }

    fn eval_binary(
        &self,
        op: BinaryOp,
        lhs: &Expr,
        rhs: &Expr,
        env: &Env,
        depth: usize,
    ) -> Result<Value, EvalError> {
        // Logical operators short-circuit; everything else is strict.
        if matches!(op, BinaryOp::And | BinaryOp::Or) {
            let lhs = self.eval_bool(lhs, env, depth)?;
            return match (op, lhs) {
                (BinaryOp::And, false) => Ok(Value::Bool(false)),
                (BinaryOp::Or, true) => Ok(Value::Bool(true)),
                _ => Ok(Value::Bool(self.eval_bool(rhs, env, depth)?)),
            };
        }

        let lhs = self.eval(lhs, env, depth)?;
        let rhs = self.eval(rhs, env, depth)?;

        match op {
            BinaryOp::Eq => Ok(Value::Bool(lhs == rhs)),
            BinaryOp::NotEq => Ok(Value::Bool(lhs != rhs)),
            BinaryOp::Add => match (&lhs, &rhs) {
                (Value::String(a), Value::String(b)) => {
                    Ok(Value::String(format!("{a}{b}")))
                }
                _ => num(number_of(&lhs, "+")? + number_of(&rhs, "+")?),
            },
            BinaryOp::Sub => num(number_of(&lhs, "-")? - number_of(&rhs, "-")?),
            BinaryOp::Mul => num(number_of(&lhs, "*")? * number_of(&rhs, "*")?),
            BinaryOp::Div => {
                let divisor = number_of(&rhs, "/")?;
                if divisor == 0.0 {
                    return Err(EvalError::Fault("division by zero".to_string()));
                }
                num(number_of(&lhs, "/")? / divisor)
            }
            BinaryOp::Rem => {
                let divisor = number_of(&rhs, "%")?;
                if divisor == 0.0 {
                    return Err(EvalError::Fault("division by zero".to_string()));
                }
                num(number_of(&lhs, "%")? % divisor)
            }
            BinaryOp::Lt | BinaryOp::LtEq | BinaryOp::Gt | BinaryOp::GtEq => {
                compare(op, &lhs, &rhs)
            }
            BinaryOp::And | BinaryOp::Or => unreachable!("handled above"),
        }
    }

    fn call(&self, callee: &str, args: &[Value], depth: usize) -> Result<Value, EvalError> {
        match callee {
            "len" => builtin_len(args),
            "push" => builtin_push(args),
            "contains" => builtin_contains(args),
            _ => {
                // Later declarations shadow earlier ones of the same name.
                let function = self
                    .script
                    .functions
                    .iter()
                    .rev()
                    .find(|f| f.name == callee)
                    .ok_or_else(|| {
                        EvalError::Fault(format!("unknown function `{callee}`"))
                    })?;
                self.call_function(function, args, depth + 1)
            }
        }
    }

    fn eval_bool(&self, expr: &Expr, env: &Env, depth: usize) -> Result<bool, EvalError> {
        match self.eval(expr, env, depth)? {
            Value::Bool(b) => Ok(b),
            other => Err(EvalError::Fault(format!(
                "condition must be a boolean, got {}",
                type_name(&other)
            ))),
        }
    }
}

/// Normalize an f64 into a JSON number, preferring integers when exact.
fn num(x: f64) -> Result<Value, EvalError> {
    if !x.is_finite() {
        return Err(EvalError::Fault("arithmetic overflow".to_string()));
    }
    if x.fract() == 0.0 && (i64::MIN as f64..=i64::MAX as f64).contains(&x) {
        return Ok(Value::Number(Number::from(x as i64)));
    }
    Number::from_f64(x)
        .map(Value::Number)
        .ok_or_else(|| EvalError::Fault("arithmetic overflow".to_string()))
}

fn number_of(value: &Value, op: &str) -> Result<f64, EvalError> {
    value.as_f64().ok_or_else(|| {
        EvalError::Fault(format!(
            "operand of `{op}` must be a number, got {}",
            type_name(value)
        ))
    })
}

fn compare(op: BinaryOp, lhs: &Value, rhs: &Value) -> Result<Value, EvalError> {
    let ordering = match (lhs, rhs) {
        (Value::String(a), Value::String(b)) => a.cmp(b),
        _ => {
            let a = number_of(lhs, op.symbol())?;
            let b = number_of(rhs, op.symbol())?;
            a.partial_cmp(&b).ok_or_else(|| {
                EvalError::Fault(format!("operands of `{}` are unordered", op.symbol()))
            })?
        }
    };
    let result = match op {
        BinaryOp::Lt => ordering.is_lt(),
        BinaryOp::LtEq => ordering.is_le(),
        BinaryOp::Gt => ordering.is_gt(),
        BinaryOp::GtEq => ordering.is_ge(),
        _ => unreachable!("compare only handles ordering operators"),
    };
    Ok(Value::Bool(result))
}

fn eval_index(target: &Value, index: &Value) -> Result<Value, EvalError> {
    match target {
        Value::Array(items) => {
            let i = index_of(index, items.len())?;
            Ok(items[i].clone())
        }
        Value::String(s) => {
            let chars: Vec<char> = s.chars().collect();
            let i = index_of(index, chars.len())?;
            Ok(Value::String(chars[i].to_string()))
        }
        Value::Object(map) => {
            let Value::String(key) = index else {
                return Err(EvalError::Fault(format!(
                    "object key must be a string, got {}",
                    type_name(index)
                )));
            };
            map.get(key).cloned().ok_or_else(|| {
                EvalError::Fault(format!("unknown object key `{key}`"))
            })
        }
        other => Err(EvalError::Fault(format!(
            "cannot index into {}",
            type_name(other)
        ))),
    }
}

fn index_of(index: &Value, len: usize) -> Result<usize, EvalError> {
    let raw = index.as_f64().ok_or_else(|| {
        EvalError::Fault(format!(
            "index must be a number, got {}",
            type_name(index)
        ))
    })?;
    if raw.fract() != 0.0 || raw < 0.0 {
        return Err(EvalError::Fault(format!("invalid index {raw}")));
    }
    let i = raw as usize;
    if i >= len {
        return Err(EvalError::Fault(format!(
            "index {i} out of bounds (length {len})"
        )));
    }
    Ok(i)
}

fn builtin_len(args: &[Value]) -> Result<Value, EvalError> {
    match args {
        [Value::String(s)] => Ok(Value::Number(Number::from(s.chars().count()))),
        [Value::Array(items)] => Ok(Value::Number(Number::from(items.len()))),
        [other] => Err(EvalError::Fault(format!(
            "len() expects a string or array, got {}",
            type_name(other)
        ))),
        _ => Err(EvalError::Fault(format!(
            "len() expects 1 argument, got {}",
            args.len()
        ))),
    }
}

fn builtin_push(args: &[Value]) -> Result<Value, EvalError> {
    match args {
        [Value::Array(items), value] => {
            let mut items = items.clone();
            items.push(value.clone());
            Ok(Value::Array(items))
        }
        [other, _] => Err(EvalError::Fault(format!(
            "push() expects an array, got {}",
            type_name(other)
        ))),
        _ => Err(EvalError::Fault(format!(
            "push() expects 2 arguments, got {}",
            args.len()
        ))),
    }
}

fn builtin_contains(args: &[Value]) -> Result<Value, EvalError> {
    match args {
        [Value::Array(items), value] => Ok(Value::Bool(items.contains(value))),
        [Value::String(s), Value::String(needle)] => Ok(Value::Bool(s.contains(needle))),
        [other, _] => Err(EvalError::Fault(format!(
            "contains() expects a string or array, got {}",
            type_name(other)
        ))),
        _ => Err(EvalError::Fault(format!(
            "contains() expects 2 arguments, got {}",
            args.len()
        ))),
    }
}

fn thrown_message(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

#[cfg(test)]
mod tests {
    use super::super::parser::parse;
    use super::*;
    use serde_json::json;

    fn eval(code: &str, inputs: &[Value]) -> Result<Value, EvalError> {
        let script = parse(code).unwrap();
        run(&script, inputs, &Interrupt::new())
    }

    #[test]
    fn test_arithmetic_normalizes_integers() {
        let value = eval("fn f(x) { return x * 2; }", &[json!(21)]).unwrap();
        assert_eq!(value, json!(42));
        assert!(value.is_i64());
    }

    #[test]
    fn test_fractional_results_stay_fractional() {
        let value = eval("fn f() { return 7 / 2; }", &[]).unwrap();
        assert_eq!(value, json!(3.5));
    }

    #[test]
    fn test_string_concatenation() {
        let value = eval(
            "fn f(a, b) { return a + \", \" + b; }",
            &[json!("hello"), json!("world")],
        )
        .unwrap();
        assert_eq!(value, json!("hello, world"));
    }

    #[test]
    fn test_throw_surfaces_message() {
        let err = eval("fn f() { throw \"boom\"; }", &[]).unwrap_err();
        assert!(matches!(err, EvalError::Thrown(ref m) if m == "boom"));
    }

    #[test]
    fn test_throw_non_string_uses_json_text() {
        let err = eval("fn f() { throw [1, 2]; }", &[]).unwrap_err();
        assert!(matches!(err, EvalError::Thrown(ref m) if m == "[1,2]"));
    }

    #[test]
    fn test_missing_arguments_are_null() {
        let value = eval("fn f(a, b) { return b == null; }", &[json!(1)]).unwrap();
        assert_eq!(value, json!(true));
    }

    #[test]
    fn test_function_without_return_yields_null() {
        let value = eval("fn f() { let x = 1; }", &[]).unwrap();
        assert_eq!(value, Value::Null);
    }

    #[test]
    fn test_while_loop_and_assignment() {
        let code = "fn sum(n) {
            let total = 0;
            let i = 1;
            while i <= n {
                total = total + i;
                i = i + 1;
            }
            return total;
        }";
        assert_eq!(eval(code, &[json!(10)]).unwrap(), json!(55));
    }

    #[test]
    fn test_helper_function_call() {
        let code = "fn square(x) { return x * x; }
            fn f(x) { return square(x) + 1; }";
        assert_eq!(eval(code, &[json!(4)]).unwrap(), json!(17));
    }

    #[test]
    fn test_tokenizer_style_script() {
        // Shape of the worker demo snippet: scan a string, collect matches.
        let code = "fn is_token(c) { return contains([\"(\", \")\", \".\"], c); }
            fn tokenize(input) {
                let current = 0;
                let tokens = [];
                while current < len(input) {
                    let c = input[current];
                    if is_token(c) {
                        tokens = push(tokens, c);
                    }
                    current = current + 1;
                }
                return tokens;
            }";
        assert_eq!(
            eval(code, &[json!("a(b).c")]).unwrap(),
            json!(["(", ")", "."])
        );
    }

    #[test]
    fn test_object_indexing() {
        let value = eval(
            "fn f(o) { return o[\"answer\"]; }",
            &[json!({ "answer": 42 })],
        )
        .unwrap();
        assert_eq!(value, json!(42));
    }

    #[test]
    fn test_undeclared_variable_is_fault() {
        let err = eval("fn f() { return nope; }", &[]).unwrap_err();
        assert!(matches!(err, EvalError::Fault(ref m) if m.contains("undeclared")));
    }

    #[test]
    fn test_division_by_zero_is_fault() {
        let err = eval("fn f() { return 1 / 0; }", &[]).unwrap_err();
        assert!(matches!(err, EvalError::Fault(ref m) if m.contains("division by zero")));
    }

    #[test]
    fn test_index_out_of_bounds_is_fault() {
        let err = eval("fn f(xs) { return xs[5]; }", &[json!([1, 2])]).unwrap_err();
        assert!(matches!(err, EvalError::Fault(ref m) if m.contains("out of bounds")));
    }

    #[test]
    fn test_non_boolean_condition_is_fault() {
        let err = eval("fn f() { if 1 { return 2; } }", &[]).unwrap_err();
        assert!(matches!(err, EvalError::Fault(ref m) if m.contains("boolean")));
    }

    #[test]
    fn test_call_depth_limit() {
        let err = eval("fn f(n) { return f(n + 1); }", &[json!(0)]).unwrap_err();
        assert!(matches!(err, EvalError::Fault(ref m) if m.contains("call depth")));
    }

    #[test]
    fn test_tripped_interrupt_stops_infinite_loop() {
        let script = parse("fn spin() { while true { } }").unwrap();
        let interrupt = Interrupt::new();
        interrupt.trip();
        let err = run(&script, &[], &interrupt).unwrap_err();
        assert!(matches!(err, EvalError::Interrupted));
    }

    #[test]
    fn test_short_circuit_skips_rhs() {
        // The right-hand side would fault if evaluated.
        let value = eval("fn f() { return false && (1 / 0 == 0); }", &[]).unwrap();
        assert_eq!(value, json!(false));
    }
}
