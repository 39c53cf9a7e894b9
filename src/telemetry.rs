//! Optional OpenTelemetry instrumentation layered over [`crate::executor::execute`].
//!
//! `execute_traced_optional` has the same call/return contract as `execute`
//! plus span/attribute knobs. When tracing is disabled — by an explicit
//! flag, or by the `DBOP_OTEL_ENABLED` environment variable being unset
//! when no flag is given — it is a pass-through to `execute` with no
//! tracing or metrics overhead. This module only compiles at all behind the
//! `telemetry` feature, so a consumer who never enables that feature never
//! even links the OpenTelemetry crates; bootstrapping an actual OTLP
//! exporter pipeline is left to the host application, exactly as
//! `OTEL_EXPORTER_OTLP_ENDPOINT` is consumed by an external collaborator
//! rather than by this crate.

use std::future::Future;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Instant;

use opentelemetry::metrics::{Counter, Histogram, MeterProvider};
use opentelemetry::trace::{Span, SpanKind, Status, Tracer};
use opentelemetry::{global, KeyValue};

use crate::error::ExecutorError;
use crate::executor::{execute, ExecuteOptions};
use crate::scope::AttemptScopeAsync;

const METER_NAME: &str = "dbretry_core";
const TRACER_NAME: &str = "dbretry_core";

fn env_flag(name: &str) -> bool {
    std::env::var(name)
        .map(|v| matches!(v.to_lowercase().as_str(), "1" | "true" | "yes" | "on"))
        .unwrap_or(false)
}

fn otel_enabled(explicit: Option<bool>) -> bool {
    explicit.unwrap_or_else(|| env_flag("DBOP_OTEL_ENABLED"))
}

fn metrics_enabled(explicit: Option<bool>) -> bool {
    explicit.unwrap_or_else(|| env_flag("DBOP_OTEL_METRICS_ENABLED"))
}

/// `service.version` resource attribute, sourced from `DBOP_SERVICE_VERSION`.
/// The exporter/provider bootstrap itself is an external collaborator (see
/// module docs); this crate only tags the spans and metrics it emits with
/// whatever version the host process set.
fn service_version_attr() -> Option<KeyValue> {
    std::env::var("DBOP_SERVICE_VERSION")
        .ok()
        .map(|v| KeyValue::new("service.version", v))
}

struct Instruments {
    operations_total: Counter<u64>,
    attempts_total: Counter<u64>,
    operation_duration_seconds: Histogram<f64>,
}

static INSTRUMENTS: OnceLock<Instruments> = OnceLock::new();

fn instruments() -> &'static Instruments {
    INSTRUMENTS.get_or_init(|| {
        let meter = global::meter(METER_NAME);
        Instruments {
            operations_total: meter
                .u64_counter("dbop_operations_total")
                .with_description("Total number of dbretry operations.")
                .build(),
            attempts_total: meter
                .u64_counter("dbop_attempts_total")
                .with_description("Total number of dbretry attempts, including retries.")
                .build(),
            operation_duration_seconds: meter
                .f64_histogram("dbop_operation_duration_seconds")
                .with_description("Latency of dbretry operations.")
                .with_unit("s")
                .build(),
        }
    })
}

/// Span/attribute/metric knobs for [`execute_traced_optional`].
pub struct TraceOptions {
    pub span_name: String,
    pub db_system: Option<String>,
    pub db_user: Option<String>,
    pub db_name: Option<String>,
    pub db_statement: Option<String>,
    pub extra_attributes: Vec<KeyValue>,
    /// `None` defers to `DBOP_OTEL_ENABLED`.
    pub enabled: Option<bool>,
    /// `None` defers to `DBOP_OTEL_METRICS_ENABLED`.
    pub metrics_enabled: Option<bool>,
}

impl Default for TraceOptions {
    fn default() -> Self {
        Self {
            span_name: "dbop.operation".to_string(),
            db_system: None,
            db_user: None,
            db_name: None,
            db_statement: None,
            extra_attributes: Vec::new(),
            enabled: None,
            metrics_enabled: None,
        }
    }
}

impl TraceOptions {
    fn base_attributes(&self, policy: &crate::policy::RetryPolicy, read_only: bool) -> Vec<KeyValue> {
        let mut attrs = vec![
            KeyValue::new("dbop.max_retries", policy.max_retries as i64),
            KeyValue::new("dbop.initial_delay_ms", policy.initial_delay.as_millis() as i64),
            KeyValue::new("dbop.max_delay_ms", policy.max_delay.as_millis() as i64),
            KeyValue::new("dbop.jitter", policy.jitter),
            KeyValue::new("dbop.read_only", read_only),
        ];
        if let Some(v) = &self.db_system {
            attrs.push(KeyValue::new("db.system", v.clone()));
        }
        if let Some(v) = &self.db_user {
            attrs.push(KeyValue::new("db.user", v.clone()));
        }
        if let Some(v) = &self.db_name {
            attrs.push(KeyValue::new("db.name", v.clone()));
        }
        if let Some(v) = &self.db_statement {
            attrs.push(KeyValue::new("db.statement", v.clone()));
        }
        attrs.extend(self.extra_attributes.iter().cloned());
        if let Some(version) = service_version_attr() {
            attrs.push(version);
        }
        attrs
    }

    /// Operation-level metric tags: db system/name/user, `dbop.read_only`,
    /// and `dbop.outcome` — used only by `dbop_operations_total` and
    /// `dbop_operation_duration_seconds`, per spec.md §4.6 ("tagged by ...
    /// `dbop.outcome` (operation-level only)").
    fn metric_attributes(&self, read_only: bool, outcome: &'static str) -> Vec<KeyValue> {
        let mut attrs = self.attempt_metric_attributes(read_only);
        attrs.push(KeyValue::new("dbop.outcome", outcome));
        attrs
    }

    /// Attempt-level metric tags: db system/name/user and `dbop.read_only`
    /// only, no `dbop.outcome` — `dbop_attempts_total` counts attempts as
    /// they start, before any outcome is known.
    fn attempt_metric_attributes(&self, read_only: bool) -> Vec<KeyValue> {
        vec![
            KeyValue::new("db.system", self.db_system.clone().unwrap_or_else(|| "unknown".into())),
            KeyValue::new("db.name", self.db_name.clone().unwrap_or_else(|| "unknown".into())),
            KeyValue::new("db.user", self.db_user.clone().unwrap_or_else(|| "unknown".into())),
            KeyValue::new("dbop.read_only", read_only),
        ]
    }
}

/// Same contract as [`execute`], plus tracing/metrics. See the module docs
/// for the pass-through rule when tracing is disabled.
pub async fn execute_traced_optional<T, E, Op, Fut, S>(
    op: Op,
    options: ExecuteOptions<'_, T, E>,
    scope: &S,
    trace: TraceOptions,
) -> Result<T, ExecutorError<E>>
where
    Op: Fn() -> Fut + Send + Sync,
    Fut: Future<Output = Result<T, E>> + Send,
    E: std::error::Error + Send + Sync + 'static,
    S: AttemptScopeAsync,
{
    if !otel_enabled(trace.enabled) {
        return execute(op, options, scope).await;
    }

    let read_only = options.read_only;
    let tracer = global::tracer(TRACER_NAME);
    let base_attrs = trace.base_attributes(&options.policy, read_only);

    let mut root = tracer
        .span_builder(trace.span_name.clone())
        .with_kind(SpanKind::Client)
        .start(&tracer);
    for attr in &base_attrs {
        root.set_attribute(attr.clone());
    }

    let metrics_active = metrics_enabled(trace.metrics_enabled);
    let attempt_number = Arc::new(AtomicU32::new(0));
    let attempt_attrs = trace.attempt_metric_attributes(read_only);

    // Wrap `op` so each invocation opens/closes its own child span and
    // counts as one attempt, the way the reference implementation wraps the
    // attempt-scope body (which, there, encloses the operation call too).
    let span_name = format!("{}.attempt", trace.span_name);
    let wrapped_op = move || {
        let attempt_number = attempt_number.clone();
        let base_attrs = base_attrs.clone();
        let attempt_attrs = attempt_attrs.clone();
        let tracer = tracer.clone();
        let span_name = span_name.clone();
        let fut = op();
        async move {
            let n = attempt_number.fetch_add(1, Ordering::SeqCst) + 1;
            if metrics_active {
                instruments().attempts_total.add(1, &attempt_attrs);
            }

            let mut span = tracer
                .span_builder(span_name)
                .with_kind(SpanKind::Client)
                .start(&tracer);
            for attr in &base_attrs {
                span.set_attribute(attr.clone());
            }
            span.set_attribute(KeyValue::new("dbop.attempt.number", n as i64));

            match fut.await {
                Ok(value) => {
                    span.set_attribute(KeyValue::new("dbop.attempt.outcome", "success"));
                    span.end();
                    Ok(value)
                }
                Err(err) => {
                    span.record_error(&err);
                    span.set_attribute(KeyValue::new("dbop.attempt.outcome", "error"));
                    span.set_status(Status::error(err.to_string()));
                    span.end();
                    Err(err)
                }
            }
        }
    };

    let start = Instant::now();
    let result = execute(wrapped_op, options, scope).await;

    let outcome = if result.is_ok() { "success" } else { "error" };
    root.set_attribute(KeyValue::new("dbop.outcome", outcome));
    if let Err(err) = &result {
        root.set_status(Status::error(err.to_string()));
    }

    if metrics_active {
        let duration = start.elapsed().as_secs_f64();
        let attrs = trace.metric_attributes(read_only, outcome);
        instruments().operations_total.add(1, &attrs);
        instruments().operation_duration_seconds.record(duration, &attrs);
    }

    root.end();
    result
}
