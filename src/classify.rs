//! Reference transient-error classifier.
//!
//! `execute` takes any `classifier: Fn(&E) -> bool` the caller supplies; this
//! module ships one reasonable default grounded in common DB-API drivers
//! (PostgreSQL, MySQL/MariaDB, SQLite) so callers that don't have a better
//! one of their own can start here.
//!
//! Rust has no `getattr`-style reflection, so where the reference classifier
//! probed an exception's driver-specific attributes (`pgcode`, `.orig.args`,
//! `type(exc).__name__`, ...), this one asks the caller's adapter to fill in
//! a [`DbErrorHints`] instead. A classifier that only has a message string to
//! go on can pass `DbErrorHints::default()` and still catch every
//! message-only branch below.

/// Driver family an [`crate::scope`] timeout statement or classifier hint is
/// being produced for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Dialect {
    Postgres,
    MySql,
    Sqlite,
    Other,
}

/// Driver-specific detail an adapter can surface about one error, so the
/// reference classifier can match on it without reflection.
///
/// Every field is optional: leave it `None` when the adapter doesn't have
/// that detail, and the branches that depend on it simply never fire.
#[derive(Debug, Clone, Copy, Default)]
pub struct DbErrorHints<'a> {
    /// PostgreSQL SQLSTATE code (`pgcode`/`sqlstate`), e.g. `"40001"`.
    pub sqlstate: Option<&'a str>,
    /// MySQL/MariaDB driver errno, e.g. `1213` for deadlock.
    pub mysql_errno: Option<i64>,
    /// Name of the error's own "kind" (DB-API-style class name such as
    /// `OperationalError`, `InterfaceError`, `TimeoutError`), used only by
    /// the generic fallback branch alongside a matching message token.
    pub kind_name: Option<&'a str>,
    /// Same, but for the error wrapped inside this one (the reference
    /// classifier's `.orig` probe), if the adapter distinguishes the two.
    pub source_kind_name: Option<&'a str>,
}

const PG_TRANSIENT_SQLSTATES: [&str; 3] = ["40P01", "55P03", "40001"];
const MYSQL_TRANSIENT_ERRNOS: [i64; 5] = [1213, 1205, 3572, 2006, 2013];
const GENERIC_TRANSIENT_KINDS: [&str; 3] = ["OperationalError", "InterfaceError", "TimeoutError"];
const GENERIC_TRANSIENT_TOKENS: [&str; 6] = [
    "timeout",
    "deadlock",
    "lock wait",
    "gone away",
    "lost connection",
    "connection reset",
];

/// Default transient-error classifier.
///
/// `err` supplies the message (via its `Display`/`to_string`); `hints`
/// supplies whatever driver-specific detail the caller's adapter can
/// extract. Matching is case-insensitive substring matching throughout, to
/// stay robust to minor message wording differences across driver versions.
pub fn dbapi_classifier<E: std::error::Error + ?Sized>(err: &E, hints: &DbErrorHints<'_>) -> bool {
    let msg = err.to_string().to_lowercase();

    // ---- PostgreSQL ----
    if let Some(code) = hints.sqlstate {
        if PG_TRANSIENT_SQLSTATES.contains(&code) {
            return true;
        }
    }
    if msg.contains("canceling statement due to statement timeout") {
        return true;
    }
    if msg.contains("deadlock detected") || msg.contains("canceling statement due to lock timeout") {
        return true;
    }

    // ---- MySQL / MariaDB ----
    if let Some(errno) = hints.mysql_errno {
        if MYSQL_TRANSIENT_ERRNOS.contains(&errno) {
            return true;
        }
    }
    if msg.contains("nowait is set") || msg.contains("deadlock") || msg.contains("lock wait timeout") {
        return true;
    }

    // ---- SQLite ----
    if msg.contains("database is locked") {
        return true;
    }

    // ---- Generic op/timeout-ish ----
    let kind_matches = [hints.kind_name, hints.source_kind_name]
        .into_iter()
        .flatten()
        .any(|name| GENERIC_TRANSIENT_KINDS.contains(&name));
    if kind_matches && GENERIC_TRANSIENT_TOKENS.iter().any(|t| msg.contains(t)) {
        return true;
    }

    false
}

/// Classify using only the error's message, with no driver-specific hints.
///
/// Convenience for callers that don't have an adapter producing
/// [`DbErrorHints`] yet; equivalent to `dbapi_classifier(err, &DbErrorHints::default())`.
pub fn classify_by_message<E: std::error::Error + ?Sized>(err: &E) -> bool {
    dbapi_classifier(err, &DbErrorHints::default())
}
