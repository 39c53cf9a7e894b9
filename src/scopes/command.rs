//! Command-based attempt scope: issues plain SQL text (`BEGIN`, `SAVEPOINT`,
//! ...) over a connection abstraction, for drivers with no richer
//! transaction API of their own.

use async_trait::async_trait;
use rand::distr::Alphanumeric;
use rand::Rng;
use tokio::sync::Mutex;

use crate::error::ScopeError;
use crate::scope::AttemptScopeAsync;
use crate::scopes::Dialect;

/// A connection that can run a SQL statement and report success/failure,
/// with no return value expected. `CommandScope` issues only
/// transaction-control statements (`BEGIN`, `SAVEPOINT ...`, `COMMIT`, ...)
/// through this trait; the operation body runs entirely outside it.
#[async_trait]
pub trait CommandConnection: Send {
    type Error: std::error::Error + Send + Sync + 'static;

    async fn execute(&mut self, sql: &str) -> Result<(), Self::Error>;
}

fn savepoint_name() -> String {
    // Alphanumeric can yield uppercase letters; filter down to the
    // lowercase-alnum alphabet the reference adapter uses before taking 8 —
    // safe over an infinite sample stream.
    let suffix: String = rand::rng()
        .sample_iter(&Alphanumeric)
        .map(char::from)
        .filter(|c| c.is_ascii_lowercase() || c.is_ascii_digit())
        .take(8)
        .collect();
    format!("dbop_{suffix}")
}

/// State carried from [`AttemptScopeAsync::open`] to the matching
/// `commit`/`rollback` call: the savepoint name, if one was opened.
pub struct CommandGuard {
    savepoint: Option<String>,
}

/// Reference command-based scope: `BEGIN` (+ optional `SET TRANSACTION READ
/// ONLY`) then an optional `SAVEPOINT`, committing with `RELEASE SAVEPOINT`
/// + `COMMIT` on success, or `ROLLBACK TO SAVEPOINT` + `ROLLBACK` on
/// failure. Savepoint cleanup statements are best-effort: their failure
/// never prevents the surrounding `COMMIT`/`ROLLBACK` from being attempted.
pub struct CommandScope<C: CommandConnection> {
    conn: Mutex<C>,
    dialect: Dialect,
    supports_savepoint: bool,
}

impl<C: CommandConnection> CommandScope<C> {
    pub fn new(conn: C, dialect: Dialect) -> Self {
        Self {
            conn: Mutex::new(conn),
            dialect,
            supports_savepoint: true,
        }
    }

    /// Disable `SAVEPOINT` usage, e.g. for a driver/connection pool known
    /// not to support it. The scope then commits/rolls back the whole
    /// transaction directly.
    pub fn without_savepoint(mut self) -> Self {
        self.supports_savepoint = false;
        self
    }
}

#[async_trait]
impl<C: CommandConnection + Send> AttemptScopeAsync for CommandScope<C> {
    type Guard = CommandGuard;

    async fn open(&self, read_only: bool) -> Result<CommandGuard, ScopeError> {
        let mut conn = self.conn.lock().await;

        conn.execute("BEGIN")
            .await
            .map_err(|e| ScopeError::Open(e.to_string()))?;

        if read_only {
            let stmt = match self.dialect {
                Dialect::Postgres | Dialect::MySql => Some("SET TRANSACTION READ ONLY"),
                Dialect::Sqlite | Dialect::Other => None,
            };
            if let Some(stmt) = stmt {
                // Best-effort: an unsupported READ ONLY toggle should not
                // abort an otherwise healthy attempt.
                let _ = conn.execute(stmt).await;
            }
        }

        let savepoint = if self.supports_savepoint {
            let name = savepoint_name();
            match conn.execute(&format!("SAVEPOINT {name}")).await {
                Ok(()) => Some(name),
                Err(_) => None,
            }
        } else {
            None
        };

        Ok(CommandGuard { savepoint })
    }

    async fn commit(&self, guard: CommandGuard) -> Result<(), ScopeError> {
        let mut conn = self.conn.lock().await;

        if let Some(sp) = &guard.savepoint {
            let _ = conn.execute(&format!("RELEASE SAVEPOINT {sp}")).await;
        }

        conn.execute("COMMIT")
            .await
            .map_err(|e| ScopeError::Commit(e.to_string()))
    }

    async fn rollback(&self, guard: CommandGuard) -> Result<(), ScopeError> {
        let mut conn = self.conn.lock().await;

        if let Some(sp) = &guard.savepoint {
            let _ = conn.execute(&format!("ROLLBACK TO SAVEPOINT {sp}")).await;
        }

        // The outer ROLLBACK is itself best-effort: a body failure must
        // surface regardless of whether the connection could be cleanly
        // returned to its pre-attempt state.
        let _ = conn.execute("ROLLBACK").await;
        Ok(())
    }
}
