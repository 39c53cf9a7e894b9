//! Nested-transaction attempt scope, for drivers that already expose scoped
//! transaction/savepoint objects instead of requiring raw SQL text.
//!
//! Grounded in the simpler of the two reference adapters for this shape: an
//! outer transaction held for the whole attempt, with a nested transaction
//! opened inside it standing in for the savepoint. Success releases the
//! inner scope and commits the outer one; failure rolls back both.

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::error::ScopeError;
use crate::scope::AttemptScopeAsync;

/// A connection that tracks its own transaction nesting depth: each `begin`
/// either opens the outer transaction or, if one is already open, a nested
/// transaction (a savepoint) within it. `commit`/`rollback` close the
/// innermost open level.
#[async_trait]
pub trait NestedTransactional: Send {
    type Error: std::error::Error + Send + Sync + 'static;

    async fn begin(&mut self) -> Result<(), Self::Error>;
    async fn commit(&mut self) -> Result<(), Self::Error>;
    async fn rollback(&mut self) -> Result<(), Self::Error>;
    async fn set_read_only(&mut self) -> Result<(), Self::Error>;
}

/// Marker guard: the two open transaction levels live on the connection
/// itself, so the scope only needs to remember that both are open.
pub struct NestedGuard;

pub struct NestedScope<C: NestedTransactional> {
    conn: Mutex<C>,
}

impl<C: NestedTransactional> NestedScope<C> {
    pub fn new(conn: C) -> Self {
        Self {
            conn: Mutex::new(conn),
        }
    }
}

#[async_trait]
impl<C: NestedTransactional + Send> AttemptScopeAsync for NestedScope<C> {
    type Guard = NestedGuard;

    async fn open(&self, read_only: bool) -> Result<NestedGuard, ScopeError> {
        let mut conn = self.conn.lock().await;

        conn.begin()
            .await
            .map_err(|e| ScopeError::Open(e.to_string()))?;

        if read_only {
            let _ = conn.set_read_only().await;
        }

        if let Err(e) = conn.begin().await {
            // Couldn't open the nested level; unwind the outer one before
            // reporting failure so the connection isn't left mid-transaction.
            let _ = conn.rollback().await;
            return Err(ScopeError::Open(e.to_string()));
        }

        Ok(NestedGuard)
    }

    async fn commit(&self, _guard: NestedGuard) -> Result<(), ScopeError> {
        let mut conn = self.conn.lock().await;
        conn.commit()
            .await
            .map_err(|e| ScopeError::Commit(e.to_string()))?;
        conn.commit()
            .await
            .map_err(|e| ScopeError::Commit(e.to_string()))
    }

    async fn rollback(&self, _guard: NestedGuard) -> Result<(), ScopeError> {
        let mut conn = self.conn.lock().await;
        // Best-effort at both levels: the body failure that triggered this
        // rollback must surface regardless of cleanup outcome.
        let _ = conn.rollback().await;
        let _ = conn.rollback().await;
        Ok(())
    }
}
