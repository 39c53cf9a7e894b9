//! The pre-attempt hook: an effect run immediately before each attempt body,
//! inside the attempt scope if one is present.
//!
//! The reference use is setting per-attempt timeouts (`SET LOCAL
//! lock_timeout`, `SET SESSION MAX_EXECUTION_TIME`, ...) so a slow attempt
//! gets cut off well before the overall deadline would otherwise fire, and
//! so tightening timeouts on a retry doesn't require a new connection.

use std::future::Future;
use std::pin::Pin;

/// A boxed, once-per-attempt async effect.
///
/// `execute` calls this immediately before the operation body on every
/// attempt, including the first. A failure here is treated exactly like an
/// operation-body failure: it goes through `retry_on`/the classifier like
/// any other error from the attempt.
pub type PreAttemptHook<E> =
    Box<dyn Fn() -> Pin<Box<dyn Future<Output = Result<(), E>> + Send>> + Send + Sync>;

/// Build a [`PreAttemptHook`] from an async closure, without writing the
/// boxed-future boilerplate at the call site.
pub fn pre_attempt<F, Fut, E>(f: F) -> PreAttemptHook<E>
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), E>> + Send + 'static,
{
    Box::new(move || Box::pin(f()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    #[tokio::test]
    async fn hook_runs_and_can_fail() {
        let calls = Arc::new(AtomicU32::new(0));
        let calls2 = calls.clone();
        let hook: PreAttemptHook<&'static str> = pre_attempt(move || {
            let calls = calls2.clone();
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        });

        (hook)().await.unwrap();
        (hook)().await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }
}
