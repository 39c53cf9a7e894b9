//! Error types for the retry executor and its attempt scopes.
//!
//! Mirrors the hierarchical, `thiserror`-based error style used throughout
//! this crate's teacher: a leaf error for one layer (`ScopeError`), composed
//! into the top-level error the executor actually surfaces (`ExecutorError`).

use std::time::Duration;
use thiserror::Error;

/// Failure opening, committing, or rolling back an [`crate::scope::AttemptScope`]
/// or [`crate::scope::AttemptScopeAsync`].
///
/// Cleanup failures (a `RELEASE SAVEPOINT`/`ROLLBACK TO SAVEPOINT` that itself
/// errors during an error-path exit) are swallowed by scope implementations
/// per the suppression discipline in the attempt-scope protocol and never
/// reach this type; only a failure that could not be recovered from (e.g. the
/// initial `BEGIN`, or a commit on the success path) is reported here.
#[derive(Debug, Error)]
pub enum ScopeError {
    /// The scope failed to open (e.g. `BEGIN` or equivalent failed).
    #[error("failed to open attempt scope: {0}")]
    Open(String),

    /// The scope failed to commit after a successful body.
    #[error("failed to commit attempt scope: {0}")]
    Commit(String),

    /// The outer rollback itself failed after a body failure. Per spec this
    /// must never mask the original body failure; executors that observe
    /// this variant log it and still propagate the original failure.
    #[error("failed to roll back attempt scope: {0}")]
    Rollback(String),
}

/// The terminal error surfaced by [`crate::executor::execute`].
///
/// The executor never rewrites or wraps an error it doesn't have to: a body
/// failure is reported as `Body(E)` unchanged, preserving whatever
/// `std::error::Error` source chain the caller's type carries.
#[derive(Debug, Error)]
pub enum ExecutorError<E>
where
    E: std::error::Error + Send + Sync + 'static,
{
    /// The user operation (or pre-attempt hook) failed and no further retry
    /// was attempted, either because the classifier said the failure was not
    /// transient, because the failure's kind was outside `retry_on`, or
    /// because the retry budget was exhausted.
    #[error(transparent)]
    Body(E),

    /// An attempt scope could not be opened or closed, and the failure
    /// terminated the retry loop (it was classified non-transient or the
    /// budget was exhausted).
    #[error("attempt scope failed: {0}")]
    Scope(#[from] ScopeError),

    /// The overall deadline elapsed while an attempt was in flight or
    /// between attempts, and the timeout itself was eligible for
    /// classification but resolved as terminal.
    #[error("overall deadline of {0:?} exceeded")]
    DeadlineExceeded(Duration),
}

impl<E> ExecutorError<E>
where
    E: std::error::Error + Send + Sync + 'static,
{
    /// Returns the body error, if this is a [`ExecutorError::Body`] variant.
    pub fn as_body(&self) -> Option<&E> {
        match self {
            ExecutorError::Body(e) => Some(e),
            _ => None,
        }
    }

    pub fn is_deadline_exceeded(&self) -> bool {
        matches!(self, ExecutorError::DeadlineExceeded(_))
    }
}

/// The unified view one attempt's failure presents to `retry_on` and
/// `classifier`: either the operation body failed, or the attempt scope
/// itself failed to open/commit/roll back. Both are attempt failures
/// eligible for classification per the attempt-scope protocol.
#[derive(Debug, Error)]
pub enum AttemptFailure<E>
where
    E: std::error::Error + Send + Sync + 'static,
{
    #[error(transparent)]
    Body(E),
    #[error(transparent)]
    Scope(#[from] ScopeError),
}

impl<E> AttemptFailure<E>
where
    E: std::error::Error + Send + Sync + 'static,
{
    pub fn into_executor_error(self) -> ExecutorError<E> {
        match self {
            AttemptFailure::Body(e) => ExecutorError::Body(e),
            AttemptFailure::Scope(e) => ExecutorError::Scope(e),
        }
    }

    pub fn as_body(&self) -> Option<&E> {
        match self {
            AttemptFailure::Body(e) => Some(e),
            AttemptFailure::Scope(_) => None,
        }
    }
}
