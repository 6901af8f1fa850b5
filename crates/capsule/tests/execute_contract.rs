//! Integration tests for the execute contract.
//!
//! Covers the outcome taxonomy (value, runtime error, timeout, context
//! error), the timeout boundary, and independence of concurrent calls.

use std::time::{Duration, Instant};

use capsule::{Dispatcher, Error, ExecuteOptions};
use serde_json::json;

#[tokio::test]
async fn test_returning_value_resolves_success() {
    let dispatcher = Dispatcher::new();

    let value = dispatcher
        .execute("fn double(x) { return x * 2; }", vec![json!(21)])
        .await
        .unwrap();

    assert_eq!(value, json!(42));
}

#[tokio::test]
async fn test_thrown_error_resolves_runtime_error() {
    let dispatcher = Dispatcher::new();

    let err = dispatcher
        .execute("fn f() { throw \"boom\"; }", vec![])
        .await
        .unwrap_err();

    assert_eq!(err, Error::Runtime("boom".to_string()));
}

#[tokio::test]
async fn test_infinite_loop_resolves_timeout() {
    let dispatcher = Dispatcher::new();
    let options = ExecuteOptions {
        timeout: Duration::from_millis(50),
    };
    let start = Instant::now();

    let err = dispatcher
        .execute_with("fn spin() { while true { } }", vec![], options)
        .await
        .unwrap_err();

    let elapsed = start.elapsed();
    assert_eq!(err, Error::Timeout);
    assert!(
        elapsed >= Duration::from_millis(50),
        "timed out early after {elapsed:?}"
    );
    assert!(
        elapsed < Duration::from_secs(1),
        "timeout took too long: {elapsed:?}"
    );
}

#[tokio::test]
async fn test_invalid_source_resolves_runtime_error() {
    let dispatcher = Dispatcher::new();

    let err = dispatcher
        .execute("this is not a function at all", vec![])
        .await
        .unwrap_err();

    match err {
        Error::Runtime(message) => assert!(
            message.contains("syntax error"),
            "unexpected message: {message}"
        ),
        other => panic!("expected a runtime error, got {other:?}"),
    }
}

#[tokio::test]
async fn test_multi_function_script_uses_last_as_entry() {
    let dispatcher = Dispatcher::new();
    let code = "\
fn is_token(c) { return contains([\"(\", \")\", \".\"], c); }
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

    let value = dispatcher
        .execute(code, vec![json!("foo(bar).baz")])
        .await
        .unwrap();

    assert_eq!(value, json!(["(", ")", "."]));
}

#[tokio::test]
async fn test_inputs_apply_positionally() {
    let dispatcher = Dispatcher::new();

    let value = dispatcher
        .execute(
            "fn f(a, b, c) { return a + b * c; }",
            vec![json!(1), json!(2), json!(3)],
        )
        .await
        .unwrap();

    assert_eq!(value, json!(7));
}

#[tokio::test]
async fn test_concurrent_calls_are_independent() {
    let dispatcher = Dispatcher::new();

    let fast = dispatcher.execute("fn f(x) { return x + 1; }", vec![json!(1)]);
    let failing = dispatcher.execute("fn f() { throw \"boom\"; }", vec![]);
    let slow = dispatcher.execute_with(
        "fn spin() { while true { } }",
        vec![],
        ExecuteOptions {
            timeout: Duration::from_millis(50),
        },
    );

    let (fast, failing, slow) = tokio::join!(fast, failing, slow);

    assert_eq!(fast.unwrap(), json!(2));
    assert_eq!(failing.unwrap_err(), Error::Runtime("boom".to_string()));
    assert_eq!(slow.unwrap_err(), Error::Timeout);
}

#[tokio::test]
async fn test_short_deadline_does_not_cut_off_fast_code() {
    let dispatcher = Dispatcher::new();
    let options = ExecuteOptions {
        timeout: Duration::from_millis(500),
    };

    let value = dispatcher
        .execute_with("fn f() { return \"quick\"; }", vec![], options)
        .await
        .unwrap();

    assert_eq!(value, json!("quick"));
}

#[tokio::test]
async fn test_sequential_calls_get_fresh_contexts() {
    let dispatcher = Dispatcher::new();

    // State set in one call must not leak into the next.
    let first = dispatcher
        .execute("fn f() { let secret = 99; return 1; }", vec![])
        .await
        .unwrap();
    assert_eq!(first, json!(1));

    let err = dispatcher
        .execute("fn f() { return secret; }", vec![])
        .await
        .unwrap_err();
    match err {
        Error::Runtime(message) => assert!(message.contains("undeclared")),
        other => panic!("expected a runtime error, got {other:?}"),
    }
}
