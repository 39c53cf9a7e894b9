//! The attempt-scope protocol: an optional transactional boundary drawn
//! around one attempt of a retried operation.
//!
//! An executor that receives a scope calls it once per attempt and always
//! tears it down before returning, whichever way the attempt body ended:
//!
//! ```text
//! idle --open--> opened --commit--> committed --+
//!                   |                            |
//!                   +--rollback--> rolled_back ---+--> idle
//! ```
//!
//! Committed and rolled-back scopes are both terminal for that attempt; the
//! next attempt (if any) opens a brand new scope value.
//!
//! Rust has no implicit coroutine-vs-function dispatch the way the Python
//! original used `asyncio.iscoroutinefunction(op)` to choose between a sync
//! and an async scope at call time: here `execute` is always `async fn`, so
//! the sync/async duality lives only in the *scope* implementation. A scope
//! that wraps blocking I/O implements [`AttemptScope`]; one that wraps
//! `async` I/O implements [`AttemptScopeAsync`]. Bridging a sync scope into
//! an async executor is an explicit choice ([`BlockingScope`]), never a
//! silent fallback.

use async_trait::async_trait;

use crate::error::ScopeError;

/// A transactional boundary around one synchronous attempt.
///
/// Implementations open their guard in [`open`](AttemptScope::open) and the
/// caller must end every opened guard with exactly one of
/// [`commit`](AttemptScope::commit) or [`rollback`](AttemptScope::rollback).
pub trait AttemptScope {
    type Guard;

    /// Begin the scope for one attempt. `read_only` is a best-effort hint;
    /// implementations that can't honor it (e.g. no per-transaction
    /// read-only mode) are free to ignore it.
    fn open(&self, read_only: bool) -> Result<Self::Guard, ScopeError>;

    /// Close the scope after the attempt body succeeded.
    fn commit(&self, guard: Self::Guard) -> Result<(), ScopeError>;

    /// Close the scope after the attempt body failed. Implementations
    /// should make a best effort to leave the underlying connection usable
    /// for the next attempt even if the rollback itself partially fails;
    /// see the module-level note on cleanup-failure suppression.
    fn rollback(&self, guard: Self::Guard) -> Result<(), ScopeError>;
}

/// The async counterpart of [`AttemptScope`], for scopes backed by
/// asynchronous I/O (an async database driver, an async ORM session, ...).
#[async_trait]
pub trait AttemptScopeAsync {
    type Guard: Send;

    async fn open(&self, read_only: bool) -> Result<Self::Guard, ScopeError>;
    async fn commit(&self, guard: Self::Guard) -> Result<(), ScopeError>;
    async fn rollback(&self, guard: Self::Guard) -> Result<(), ScopeError>;
}

/// A scope that does nothing: `execute` with no scope at all behaves as if
/// it were given this one. Exposed directly in case a caller wants to be
/// explicit, or needs a scope value to satisfy a generic bound.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullScope;

impl AttemptScope for NullScope {
    type Guard = ();

    fn open(&self, _read_only: bool) -> Result<(), ScopeError> {
        Ok(())
    }
    fn commit(&self, _guard: ()) -> Result<(), ScopeError> {
        Ok(())
    }
    fn rollback(&self, _guard: ()) -> Result<(), ScopeError> {
        Ok(())
    }
}

#[async_trait]
impl AttemptScopeAsync for NullScope {
    type Guard = ();

    async fn open(&self, _read_only: bool) -> Result<(), ScopeError> {
        Ok(())
    }
    async fn commit(&self, _guard: ()) -> Result<(), ScopeError> {
        Ok(())
    }
    async fn rollback(&self, _guard: ()) -> Result<(), ScopeError> {
        Ok(())
    }
}

/// Adapts a synchronous [`AttemptScope`] into [`AttemptScopeAsync`] by
/// running each call on a blocking-safe thread via
/// [`tokio::task::block_in_place`].
///
/// This is the explicit opt-in for plugging a blocking scope into an async
/// `execute` call. It requires a multi-threaded Tokio runtime (the same
/// requirement `block_in_place` itself has) and must never be reached for
/// implicitly — a caller with a sync scope and an async executor chooses
/// this wrapper themselves, rather than the executor silently picking sync
/// or async behavior based on the shape of the operation closure.
pub struct BlockingScope<S>(pub S);

impl<S> BlockingScope<S> {
    pub fn new(scope: S) -> Self {
        Self(scope)
    }
}

#[async_trait]
impl<S> AttemptScopeAsync for BlockingScope<S>
where
    S: AttemptScope + Sync,
    S::Guard: Send,
{
    type Guard = S::Guard;

    async fn open(&self, read_only: bool) -> Result<Self::Guard, ScopeError> {
        tokio::task::block_in_place(|| self.0.open(read_only))
    }

    async fn commit(&self, guard: Self::Guard) -> Result<(), ScopeError> {
        tokio::task::block_in_place(|| self.0.commit(guard))
    }

    async fn rollback(&self, guard: Self::Guard) -> Result<(), ScopeError> {
        tokio::task::block_in_place(|| self.0.rollback(guard))
    }
}
