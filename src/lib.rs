//! Database-agnostic retry executor.
//!
//! Wraps an arbitrary caller-supplied operation (typically a database
//! interaction) with a bounded retry loop driven by exponential backoff and
//! jitter ([`policy`]), a pluggable transient-error classifier ([`classify`]),
//! a pluggable attempt scope that wraps every attempt in a fresh transaction
//! or savepoint ([`scope`], [`scopes`]), a pre-attempt hook for per-attempt
//! timeouts ([`hook`]), and an overall deadline that caps total wall time
//! ([`executor`]). An optional telemetry-enriched variant ([`telemetry`])
//! layers spans and metrics around the same semantics without changing them.
//!
//! The executor itself never talks to a database: it only knows the
//! [`scope::AttemptScope`]/[`scope::AttemptScopeAsync`] protocol. Concrete
//! drivers plug in through [`scopes::command::CommandScope`] (raw SQL text)
//! or [`scopes::nested::NestedScope`] (driver-native nested transactions).

pub mod classify;
pub mod config;
pub mod error;
pub mod executor;
pub mod hook;
pub mod policy;
pub mod scope;
pub mod scopes;

#[cfg(feature = "telemetry")]
pub mod telemetry;

pub use classify::{classify_by_message, dbapi_classifier, DbErrorHints, Dialect};
pub use error::{AttemptFailure, ExecutorError, ScopeError};
pub use executor::{execute, ExecuteOptions, TerminalPolicy};
pub use hook::{pre_attempt, PreAttemptHook};
pub use policy::{Backoff, RetryPolicy};
pub use scope::{AttemptScope, AttemptScopeAsync, BlockingScope, NullScope};

#[cfg(feature = "telemetry")]
pub use telemetry::{execute_traced_optional, TraceOptions};
