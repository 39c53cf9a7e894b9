//! Whole-executor scenarios mirroring the concrete examples worked through in
//! the design docs: retries-then-succeeds, non-transient short-circuit,
//! exhaustion with a fallback default, an overall deadline firing mid-sleep,
//! and SQLSTATE-driven classification.
//!
//! These exercise [`dbretry_core::execute`] end to end rather than any single
//! module in isolation, the way `repository_comprehensive.rs` exercises the
//! repository layer against a real in-memory database.

use std::fmt;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dbretry_core::{
    classify::{dbapi_classifier, DbErrorHints},
    execute, AttemptFailure, ExecuteOptions, ExecutorError, NullScope, RetryPolicy,
};

#[derive(Debug)]
struct OpError(String);

impl fmt::Display for OpError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
impl std::error::Error for OpError {}

fn classify_via_dbapi(f: &AttemptFailure<OpError>) -> bool {
    match f.as_body() {
        Some(e) => dbapi_classifier(e, &DbErrorHints::default()),
        None => true,
    }
}

#[tokio::test]
async fn retries_twice_then_succeeds_with_three_attempts_and_two_sleeps() {
    let calls = Arc::new(AtomicU32::new(0));
    let calls2 = calls.clone();
    let op = move || {
        let calls = calls2.clone();
        async move {
            let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
            if n <= 2 {
                Err(OpError("deadlock detected".into()))
            } else {
                Ok(42)
            }
        }
    };

    let options = ExecuteOptions::new()
        .classifier(classify_via_dbapi)
        .policy(RetryPolicy::new(
            3,
            Duration::from_millis(10),
            Duration::from_millis(20),
            0.0,
        ));

    let result = execute(op, options, &NullScope).await.unwrap();
    assert_eq!(result, 42);
    assert_eq!(calls.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn non_transient_failure_stops_after_one_attempt_and_returns_fallback() {
    let calls = Arc::new(AtomicU32::new(0));
    let calls2 = calls.clone();
    let op = move || {
        let calls = calls2.clone();
        async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Err::<i32, _>(OpError("syntax error at or near SELECT".into()))
        }
    };

    let options = ExecuteOptions::new()
        .classifier(classify_via_dbapi)
        .return_default(-1);

    let result = execute(op, options, &NullScope).await.unwrap();
    assert_eq!(result, -1);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn exhaustion_with_raises_false_returns_default_after_all_attempts() {
    let calls = Arc::new(AtomicU32::new(0));
    let calls2 = calls.clone();
    let op = move || {
        let calls = calls2.clone();
        async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Err::<bool, _>(OpError("always fails".into()))
        }
    };

    let options = ExecuteOptions::new()
        .classifier(|_f: &AttemptFailure<OpError>| true)
        .policy(RetryPolicy::new(
            2,
            Duration::from_millis(1),
            Duration::from_millis(1),
            0.0,
        ))
        .return_default(false);

    let result = execute(op, options, &NullScope).await.unwrap();
    assert!(!result);
    assert_eq!(calls.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn exhaustion_with_raises_true_surfaces_the_last_failure() {
    let op = || async { Err::<i32, _>(OpError("final failure".into())) };

    let options = ExecuteOptions::new()
        .classifier(|_f: &AttemptFailure<OpError>| true)
        .policy(RetryPolicy::new(
            1,
            Duration::from_millis(1),
            Duration::from_millis(1),
            0.0,
        ));

    let result = execute(op, options, &NullScope).await;
    match result {
        Err(ExecutorError::Body(e)) => assert_eq!(e.to_string(), "final failure"),
        other => panic!("expected Body(final failure), got {other:?}"),
    }
}

#[tokio::test]
async fn overall_timeout_fires_while_op_sleeps_past_the_deadline() {
    let op = || async {
        tokio::time::sleep(Duration::from_millis(200)).await;
        Ok::<i32, OpError>(1)
    };

    let options: ExecuteOptions<i32, OpError> =
        ExecuteOptions::new().overall_timeout(Duration::from_millis(50));

    let result = execute(op, options, &NullScope).await;
    assert!(matches!(result, Err(ExecutorError::DeadlineExceeded(_))));
}

#[tokio::test]
async fn sqlstate_deadlock_is_transient_but_syntax_error_is_not() {
    let deadlock_hints = DbErrorHints {
        sqlstate: Some("40P01"),
        ..Default::default()
    };
    assert!(dbapi_classifier(&OpError("deadlock".into()), &deadlock_hints));

    let syntax_hints = DbErrorHints {
        sqlstate: Some("42601"),
        ..Default::default()
    };
    assert!(!dbapi_classifier(&OpError("syntax error".into()), &syntax_hints));
}

#[tokio::test]
async fn overall_timeout_mid_attempt_rolls_back_the_open_scope() {
    use async_trait::async_trait;
    use dbretry_core::scopes::command::{CommandConnection, CommandScope};
    use dbretry_core::Dialect;

    struct FakeConn {
        transcript: Arc<std::sync::Mutex<Vec<String>>>,
    }

    #[async_trait]
    impl CommandConnection for FakeConn {
        type Error = OpError;

        async fn execute(&mut self, sql: &str) -> Result<(), OpError> {
            self.transcript.lock().unwrap().push(sql.to_string());
            Ok(())
        }
    }

    let transcript = Arc::new(std::sync::Mutex::new(Vec::new()));
    let scope = CommandScope::new(
        FakeConn {
            transcript: transcript.clone(),
        },
        Dialect::Postgres,
    );

    // The scope opens (BEGIN + SAVEPOINT) and then the body hangs well past
    // the overall deadline; the open guard must still be rolled back before
    // the deadline error surfaces, not silently dropped.
    let op = || async {
        tokio::time::sleep(Duration::from_millis(200)).await;
        Ok::<i32, OpError>(1)
    };

    let options: ExecuteOptions<i32, OpError> =
        ExecuteOptions::new().overall_timeout(Duration::from_millis(30));

    let result = execute(op, options, &scope).await;
    assert!(matches!(result, Err(ExecutorError::DeadlineExceeded(_))));

    let log = transcript.lock().unwrap();
    assert!(log.contains(&"BEGIN".to_string()));
    assert!(log.iter().any(|s| s.starts_with("SAVEPOINT")));
    assert!(log.contains(&"ROLLBACK".to_string()));
}

#[tokio::test]
async fn failure_outside_retry_on_never_retries_even_with_budget_remaining() {
    let calls = Arc::new(AtomicU32::new(0));
    let calls2 = calls.clone();
    let op = move || {
        let calls = calls2.clone();
        async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Err::<i32, _>(OpError("not our problem".into()))
        }
    };

    let options = ExecuteOptions::new()
        .retry_on(|_f: &AttemptFailure<OpError>| false)
        .policy(RetryPolicy::new(
            5,
            Duration::from_millis(1),
            Duration::from_millis(1),
            0.0,
        ));

    let result = execute(op, options, &NullScope).await;
    assert!(result.is_err());
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}
