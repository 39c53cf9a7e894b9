//! Reference [`crate::scope`] implementations: a command/DB-API-style scope
//! using `BEGIN`/`SAVEPOINT`/`COMMIT` text, and a nested-transaction scope
//! for drivers that already expose scoped transaction objects.

pub mod command;
pub mod nested;

pub use crate::classify::Dialect;

/// Per-dialect SQL for the best-effort per-attempt timeouts a
/// [`crate::hook::PreAttemptHook`] typically applies. Unsupported
/// combinations (e.g. SQLite statement timeout) yield no statement at all
/// rather than one the driver would reject.
///
/// Values are seconds; callers that already hold a `Duration` should round
/// or truncate to whole seconds before calling this (matching the
/// reference adapters, which only ever dealt in whole-second timeouts).
pub fn timeout_statement(dialect: Dialect, lock_timeout_s: Option<u64>, stmt_timeout_s: Option<u64>) -> Vec<String> {
    let mut statements = Vec::new();
    match dialect {
        Dialect::Postgres => {
            if let Some(lock) = lock_timeout_s {
                statements.push(format!("SET LOCAL lock_timeout = '{lock}s'"));
            }
            if let Some(stmt) = stmt_timeout_s {
                statements.push(format!("SET LOCAL statement_timeout = '{stmt}s'"));
            }
        }
        Dialect::MySql => {
            if let Some(lock) = lock_timeout_s {
                statements.push(format!("SET SESSION innodb_lock_wait_timeout = {lock}"));
            }
            if let Some(stmt) = stmt_timeout_s {
                statements.push(format!("SET SESSION MAX_EXECUTION_TIME = {}", stmt * 1000));
            }
        }
        Dialect::Sqlite => {
            if let Some(lock) = lock_timeout_s {
                statements.push(format!("PRAGMA busy_timeout = {}", lock * 1000));
            }
            // SQLite has no per-statement timeout analogue.
        }
        Dialect::Other => {}
    }
    statements
}
