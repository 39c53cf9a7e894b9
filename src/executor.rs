//! The core retry orchestrator: composes [`crate::policy::RetryPolicy`],
//! a classifier, an attempt scope, a pre-attempt hook, and an overall
//! deadline into one `execute` call.
//!
//! Mirrors the reference `execute()` loop attempt for attempt: open scope,
//! run the pre-attempt hook, run the operation, close the scope, and on
//! failure decide whether to sleep and retry or terminate.
//!
//! Unlike the Python reference, dropping a Rust future does not run its
//! body to a cancellation point the way `asyncio.CancelledError` does: a
//! bare `tokio::time::timeout` around the whole retry loop would drop an
//! in-flight attempt's scope guard without ever issuing its rollback. To
//! keep the deadline cooperative (spec.md §5, §9), the overall deadline is
//! instead raced against each individual suspension point — scope open,
//! the hook-plus-body, and the backoff sleep — while the scope guard stays
//! owned by [`run_one_attempt`] itself, so a deadline that fires mid-attempt
//! can still await [`suppressed_rollback`] before the timeout error
//! surfaces.

use std::future::Future;
use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, warn};

use crate::error::{AttemptFailure, ExecutorError};
use crate::hook::PreAttemptHook;
use crate::policy::RetryPolicy;
use crate::scope::AttemptScopeAsync;

/// What `execute` does once its retry loop reaches a terminal failure (the
/// classifier said non-transient, `retry_on` excluded the failure, or the
/// retry budget was exhausted).
///
/// Modeled as an enum rather than a `raises: bool` plus a `default: Option<T>`
/// pair so a caller cannot express the nonsensical "don't raise, and I have
/// no default" combination.
pub enum TerminalPolicy<T> {
    /// Propagate the terminal failure as an [`ExecutorError`].
    Raise,
    /// Swallow the terminal failure and return this value instead.
    ReturnDefault(T),
}

impl<T> Default for TerminalPolicy<T> {
    fn default() -> Self {
        TerminalPolicy::Raise
    }
}

/// All the knobs `execute` accepts beyond the operation itself.
///
/// `'a` bounds the lifetime of any borrowed closures (`retry_on`,
/// `classifier`, `pre_attempt`); build one fresh per `execute` call, or
/// reuse one across calls if every closure is `'static`.
pub struct ExecuteOptions<'a, T, E>
where
    E: std::error::Error + Send + Sync + 'static,
{
    /// Which attempt failures are even eligible for classification. A
    /// failure this predicate rejects propagates immediately, without the
    /// classifier ever being consulted. `None` means every failure is
    /// eligible, matching the reference default of "all failures".
    pub retry_on: Option<Box<dyn Fn(&AttemptFailure<E>) -> bool + Send + Sync + 'a>>,
    /// Decides whether an eligible failure is transient. `None` means every
    /// eligible failure is treated as transient.
    pub classifier: Option<Box<dyn Fn(&AttemptFailure<E>) -> bool + Send + Sync + 'a>>,
    pub on_terminal_failure: TerminalPolicy<T>,
    pub policy: RetryPolicy,
    pub pre_attempt: Option<&'a PreAttemptHook<E>>,
    pub read_only: bool,
    /// Absolute deadline for the whole `execute` call, covering every
    /// attempt and every backoff sleep.
    pub overall_timeout: Option<Duration>,
    /// Label used only in log lines; purely diagnostic.
    pub operation_name: &'a str,
}

impl<'a, T, E> Default for ExecuteOptions<'a, T, E>
where
    E: std::error::Error + Send + Sync + 'static,
{
    fn default() -> Self {
        Self {
            retry_on: None,
            classifier: None,
            on_terminal_failure: TerminalPolicy::Raise,
            policy: RetryPolicy::default(),
            pre_attempt: None,
            read_only: false,
            overall_timeout: None,
            operation_name: "operation",
        }
    }
}

impl<'a, T, E> ExecuteOptions<'a, T, E>
where
    E: std::error::Error + Send + Sync + 'static,
{
    pub fn new() -> Self {
        Self::default()
    }

    pub fn retry_on(mut self, f: impl Fn(&AttemptFailure<E>) -> bool + Send + Sync + 'a) -> Self {
        self.retry_on = Some(Box::new(f));
        self
    }

    pub fn classifier(mut self, f: impl Fn(&AttemptFailure<E>) -> bool + Send + Sync + 'a) -> Self {
        self.classifier = Some(Box::new(f));
        self
    }

    pub fn return_default(mut self, value: T) -> Self {
        self.on_terminal_failure = TerminalPolicy::ReturnDefault(value);
        self
    }

    pub fn policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn pre_attempt(mut self, hook: &'a PreAttemptHook<E>) -> Self {
        self.pre_attempt = Some(hook);
        self
    }

    pub fn read_only(mut self, read_only: bool) -> Self {
        self.read_only = read_only;
        self
    }

    pub fn overall_timeout(mut self, timeout: Duration) -> Self {
        self.overall_timeout = Some(timeout);
        self
    }

    pub fn operation_name(mut self, name: &'a str) -> Self {
        self.operation_name = name;
        self
    }
}

/// One attempt's outcome, from [`run_one_attempt`]'s point of view.
///
/// Kept distinct from a plain `AttemptFailure<E>` because a deadline that
/// fires mid-attempt never reaches `retry_on`/the classifier (spec.md
/// §4.5's `d = ⊥` tie-break applies the same way to an explicit deadline),
/// and because by the time this value exists, [`run_one_attempt`] has
/// already awaited the attempt's rollback — there is no scope guard left
/// for the retry loop to clean up.
enum AttemptResult<E>
where
    E: std::error::Error + Send + Sync + 'static,
{
    Failure(AttemptFailure<E>),
    DeadlineExceeded,
}

/// Run `op` to completion, retrying through `scope` and `options` per the
/// attempt-scope and backoff protocols.
///
/// `op` is called fresh on every attempt (it must be idempotent at the
/// retry granularity the caller intends — the executor has no way to know
/// whether a given operation is safe to repeat).
pub async fn execute<T, E, Op, Fut, S>(
    op: Op,
    options: ExecuteOptions<'_, T, E>,
    scope: &S,
) -> Result<T, ExecutorError<E>>
where
    Op: Fn() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::error::Error + Send + Sync + 'static,
    S: AttemptScopeAsync,
{
    let timeout = options.overall_timeout;
    let deadline = timeout.map(|d| Instant::now() + d);
    run_retry_loop(op, options, scope, deadline, timeout).await
}

async fn run_retry_loop<T, E, Op, Fut, S>(
    op: Op,
    options: ExecuteOptions<'_, T, E>,
    scope: &S,
    deadline: Option<Instant>,
    timeout: Option<Duration>,
) -> Result<T, ExecutorError<E>>
where
    Op: Fn() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::error::Error + Send + Sync + 'static,
    S: AttemptScopeAsync,
{
    let name = options.operation_name;
    let total_attempts = options.policy.max_retries + 1;
    let mut schedule = options.policy.backoff().map(Some).chain(std::iter::once(None));
    let mut attempt_number: u32 = 0;

    loop {
        attempt_number += 1;
        let delay = schedule.next().expect("sentinel guarantees one item per attempt");

        match run_one_attempt(&op, &options, scope, deadline).await {
            Ok(value) => {
                if attempt_number > 1 {
                    debug!(
                        operation = name,
                        attempt = attempt_number,
                        total_attempts,
                        "attempt succeeded after retrying"
                    );
                }
                return Ok(value);
            }
            Err(AttemptResult::DeadlineExceeded) => {
                warn!(
                    operation = name,
                    attempt = attempt_number,
                    "overall deadline exceeded while attempt was in flight; scope rolled back"
                );
                return Err(ExecutorError::DeadlineExceeded(
                    timeout.expect("deadline is only Some when overall_timeout was set"),
                ));
            }
            Err(AttemptResult::Failure(failure)) => {
                let eligible = options
                    .retry_on
                    .as_deref()
                    .map(|f| f(&failure))
                    .unwrap_or(true);

                if !eligible {
                    debug!(
                        operation = name,
                        attempt = attempt_number,
                        "failure outside retry_on, propagating without classification"
                    );
                    return Err(failure.into_executor_error());
                }

                let transient = options
                    .classifier
                    .as_deref()
                    .map(|f| f(&failure))
                    .unwrap_or(true);

                if !transient || delay.is_none() {
                    warn!(
                        operation = name,
                        attempt = attempt_number,
                        total_attempts,
                        transient,
                        exhausted = delay.is_none(),
                        error = %failure,
                        "attempt failed terminally"
                    );
                    return match options.on_terminal_failure {
                        TerminalPolicy::Raise => Err(failure.into_executor_error()),
                        TerminalPolicy::ReturnDefault(default) => Ok(default),
                    };
                }

                let delay = delay.expect("checked above: delay.is_none() would have returned");
                warn!(
                    operation = name,
                    attempt = attempt_number,
                    total_attempts,
                    delay = ?delay,
                    error = %failure,
                    "transient failure, retrying after backoff"
                );

                match deadline {
                    Some(dl) => {
                        tokio::select! {
                            _ = tokio::time::sleep(delay) => {}
                            _ = tokio::time::sleep_until(dl) => {
                                warn!(
                                    operation = name,
                                    attempt = attempt_number,
                                    "overall deadline exceeded during backoff sleep"
                                );
                                return Err(ExecutorError::DeadlineExceeded(
                                    timeout.expect("deadline is only Some when overall_timeout was set"),
                                ));
                            }
                        }
                    }
                    None => tokio::time::sleep(delay).await,
                }
            }
        }
    }
}

/// Run one attempt: open the scope, run the pre-attempt hook and the body,
/// then close the scope. When `deadline` is set, every suspension point
/// (scope open; hook-plus-body) is raced against it, but the scope guard
/// itself is never moved into the raced future — only `op`'s future and a
/// sleep are raced — so whichever side wins, this function still holds the
/// guard and can award it a proper `commit`/`rollback` before returning.
async fn run_one_attempt<T, E, Op, Fut, S>(
    op: &Op,
    options: &ExecuteOptions<'_, T, E>,
    scope: &S,
    deadline: Option<Instant>,
) -> Result<T, AttemptResult<E>>
where
    Op: Fn() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::error::Error + Send + Sync + 'static,
    S: AttemptScopeAsync,
{
    let guard = match deadline {
        Some(dl) => {
            tokio::select! {
                opened = scope.open(options.read_only) => {
                    opened.map_err(|e| AttemptResult::Failure(AttemptFailure::from(e)))?
                }
                _ = tokio::time::sleep_until(dl) => {
                    return Err(AttemptResult::DeadlineExceeded);
                }
            }
        }
        None => scope
            .open(options.read_only)
            .await
            .map_err(|e| AttemptResult::Failure(AttemptFailure::from(e)))?,
    };

    let body = async {
        if let Some(hook) = options.pre_attempt {
            hook().await?;
        }
        op().await
    };

    enum BodyRace<T, E> {
        Done(Result<T, E>),
        DeadlineExceeded,
    }

    let raced = match deadline {
        Some(dl) => {
            tokio::select! {
                r = body => BodyRace::Done(r),
                _ = tokio::time::sleep_until(dl) => BodyRace::DeadlineExceeded,
            }
        }
        None => BodyRace::Done(body.await),
    };

    match raced {
        BodyRace::Done(Ok(value)) => {
            scope
                .commit(guard)
                .await
                .map_err(|e| AttemptResult::Failure(AttemptFailure::from(e)))?;
            Ok(value)
        }
        BodyRace::Done(Err(e)) => {
            suppressed_rollback(scope, guard).await;
            Err(AttemptResult::Failure(AttemptFailure::Body(e)))
        }
        BodyRace::DeadlineExceeded => {
            suppressed_rollback(scope, guard).await;
            Err(AttemptResult::DeadlineExceeded)
        }
    }
}

/// Roll back and swallow any rollback failure, per the cleanup-suppression
/// discipline: the failure that caused this attempt to fail is always what
/// surfaces, never a secondary failure from tearing the scope down.
async fn suppressed_rollback<S: AttemptScopeAsync>(scope: &S, guard: S::Guard) {
    if let Err(e) = scope.rollback(guard).await {
        warn!(error = %e, "attempt scope rollback failed; original failure still propagates");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classify::{classify_by_message, DbErrorHints};
    use crate::scope::NullScope;
    use std::fmt;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    #[derive(Debug)]
    struct TestErr(String);
    impl fmt::Display for TestErr {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            write!(f, "{}", self.0)
        }
    }
    impl std::error::Error for TestErr {}

    fn always_transient<E>(_f: &AttemptFailure<E>) -> bool
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        true
    }

    #[tokio::test]
    async fn retries_then_succeeds() {
        let calls = Arc::new(AtomicU32::new(0));
        let calls2 = calls.clone();
        let op = move || {
            let calls = calls2.clone();
            async move {
                let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
                if n < 3 {
                    Err(TestErr("transient".into()))
                } else {
                    Ok(42)
                }
            }
        };

        let options = ExecuteOptions::new()
            .classifier(always_transient)
            .policy(RetryPolicy::new(
                3,
                Duration::from_millis(1),
                Duration::from_millis(2),
                0.0,
            ));

        let result = execute(op, options, &NullScope).await.unwrap();
        assert_eq!(result, 42);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn non_transient_stops_immediately() {
        let calls = Arc::new(AtomicU32::new(0));
        let calls2 = calls.clone();
        let op = move || {
            let calls = calls2.clone();
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err::<i32, _>(TestErr("boom".into()))
            }
        };

        let options = ExecuteOptions::new()
            .classifier(|_f: &AttemptFailure<TestErr>| false)
            .return_default(-1);

        let result = execute(op, options, &NullScope).await.unwrap();
        assert_eq!(result, -1);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn exhaustion_with_return_default() {
        let calls = Arc::new(AtomicU32::new(0));
        let calls2 = calls.clone();
        let op = move || {
            let calls = calls2.clone();
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err::<i32, _>(TestErr("always".into()))
            }
        };

        let options = ExecuteOptions::new()
            .classifier(always_transient)
            .policy(RetryPolicy::new(
                2,
                Duration::from_millis(1),
                Duration::from_millis(1),
                0.0,
            ))
            .return_default(0);

        let result = execute(op, options, &NullScope).await.unwrap();
        assert_eq!(result, 0);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn out_of_retry_set_never_consults_classifier() {
        let classifier_calls = Arc::new(AtomicU32::new(0));
        let classifier_calls2 = classifier_calls.clone();

        let op = || async { Err::<i32, _>(TestErr("out of set".into())) };

        let options = ExecuteOptions::new()
            .retry_on(|_f: &AttemptFailure<TestErr>| false)
            .classifier(move |_f: &AttemptFailure<TestErr>| {
                classifier_calls2.fetch_add(1, Ordering::SeqCst);
                true
            });

        let result = execute(op, options, &NullScope).await;
        assert!(result.is_err());
        assert_eq!(classifier_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn overall_timeout_propagates_as_deadline_exceeded() {
        let op = || async {
            tokio::time::sleep(Duration::from_millis(200)).await;
            Ok::<i32, TestErr>(1)
        };

        let options: ExecuteOptions<i32, TestErr> = ExecuteOptions::new()
            .overall_timeout(Duration::from_millis(20));

        let result = execute(op, options, &NullScope).await;
        assert!(matches!(result, Err(ExecutorError::DeadlineExceeded(_))));
    }

    #[tokio::test]
    async fn pre_attempt_hook_runs_before_every_attempt() {
        use crate::hook::pre_attempt;

        let hook_calls = Arc::new(AtomicU32::new(0));
        let hook_calls2 = hook_calls.clone();
        let hook = pre_attempt(move || {
            let hook_calls = hook_calls2.clone();
            async move {
                hook_calls.fetch_add(1, Ordering::SeqCst);
                Ok::<(), TestErr>(())
            }
        });

        let op_calls = Arc::new(AtomicU32::new(0));
        let op_calls2 = op_calls.clone();
        let op = move || {
            let op_calls = op_calls2.clone();
            async move {
                let n = op_calls.fetch_add(1, Ordering::SeqCst) + 1;
                if n < 3 {
                    Err(TestErr("transient".into()))
                } else {
                    Ok(())
                }
            }
        };

        let options = ExecuteOptions::new()
            .classifier(always_transient)
            .policy(RetryPolicy::new(
                3,
                Duration::from_millis(1),
                Duration::from_millis(1),
                0.0,
            ))
            .pre_attempt(&hook);

        execute(op, options, &NullScope).await.unwrap();
        assert_eq!(hook_calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn classifier_uses_sqlstate_hint_for_real_world_mapping() {
        let op = || async {
            Err::<i32, _>(TestErr("serialization failure".into()))
        };
        let options = ExecuteOptions::new()
            .classifier(|f: &AttemptFailure<TestErr>| match f.as_body() {
                Some(e) => {
                    let hints = DbErrorHints {
                        sqlstate: Some("40P01"),
                        ..Default::default()
                    };
                    crate::classify::dbapi_classifier(e, &hints)
                }
                None => true,
            })
            .policy(RetryPolicy::new(
                1,
                Duration::from_millis(1),
                Duration::from_millis(1),
                0.0,
            ));

        let result = execute(op, options, &NullScope).await;
        assert!(result.is_err());

        let syntax_err_is_non_transient = !classify_by_message(&TestErr("syntax error".into()));
        assert!(syntax_err_is_non_transient);
    }
}
