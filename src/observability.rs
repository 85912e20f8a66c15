// Centralized Observability Infrastructure
// Structured logging, lightweight metrics, and trace contexts for the persistence layer.

use anyhow::Result;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};
use uuid::Uuid;

use crate::error::StoreError;

// Global atomic counters for metrics
static OPERATION_COUNTER: AtomicU64 = AtomicU64::new(0);
static ERROR_COUNTER: AtomicU64 = AtomicU64::new(0);
static RETRY_COUNTER: AtomicU64 = AtomicU64::new(0);
static CONFLICT_COUNTER: AtomicU64 = AtomicU64::new(0);
static CACHE_HIT_COUNTER: AtomicU64 = AtomicU64::new(0);
static CACHE_MISS_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Initialize the logging and tracing infrastructure
/// This should be called once at application startup
pub fn init_logging() -> Result<()> {
    init_logging_with_level(false, false)
}

/// Initialize logging with configurable verbosity
pub fn init_logging_with_level(verbose: bool, quiet: bool) -> Result<()> {
    init_logging_for_level("info", verbose, quiet)
}

/// Initialize logging with the crate's level taken from configuration (e.g. `logging.level`)
///
/// `verbose` and `quiet` override the configured level.
pub fn init_logging_for_level(level: &str, verbose: bool, quiet: bool) -> Result<()> {
    let filter_level = if quiet {
        EnvFilter::new("error")
    } else if verbose {
        EnvFilter::new("handinhand_store=debug,info")
    } else {
        EnvFilter::try_new(format!("handinhand_store={level},warn"))
            .unwrap_or_else(|_| EnvFilter::new("handinhand_store=info,warn"))
    };

    // Quiet always wins over RUST_LOG
    let env_filter = if quiet {
        EnvFilter::new("error")
    } else if std::env::var("RUST_LOG").is_ok() {
        EnvFilter::try_from_default_env().unwrap_or(filter_level)
    } else {
        filter_level
    };

    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_target(!quiet)
        .with_thread_ids(!quiet)
        .with_line_number(!quiet)
        .with_file(!quiet)
        .with_ansi(true)
        .with_writer(std::io::stderr);

    match tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .try_init()
    {
        Ok(()) => {
            if !quiet {
                info!("handinhand-store observability initialized");
            }
            Ok(())
        }
        // Already initialized, which is fine in test environments
        Err(_) => Ok(()),
    }
}

/// Storage operations as they appear in structured logs
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum StoreOperation {
    Find { id: String },
    Upsert { id: String },
    Update { id: String },
    Delete { id: String },
    Insert { id: String },
}

impl StoreOperation {
    pub fn id(&self) -> &str {
        match self {
            StoreOperation::Find { id }
            | StoreOperation::Upsert { id }
            | StoreOperation::Update { id }
            | StoreOperation::Delete { id }
            | StoreOperation::Insert { id } => id,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            StoreOperation::Find { .. } => "find",
            StoreOperation::Upsert { .. } => "upsert",
            StoreOperation::Update { .. } => "update",
            StoreOperation::Delete { .. } => "delete",
            StoreOperation::Insert { .. } => "insert",
        }
    }
}

/// Metric types for performance monitoring
#[derive(Debug, Clone)]
pub enum MetricType {
    Counter {
        name: &'static str,
        value: u64,
    },
    Histogram {
        name: &'static str,
        value: f64,
        unit: &'static str,
    },
    Timer {
        name: &'static str,
        duration: Duration,
    },
}

/// Operation context for tracing through the system
#[derive(Debug, Clone)]
pub struct OperationContext {
    pub trace_id: Uuid,
    pub span_id: Uuid,
    pub operation: String,
    pub start_time: Instant,
    pub attributes: Vec<(String, String)>,
}

impl OperationContext {
    pub fn new(operation: impl Into<String>) -> Self {
        Self {
            trace_id: Uuid::new_v4(),
            span_id: Uuid::new_v4(),
            operation: operation.into(),
            start_time: Instant::now(),
            attributes: Vec::new(),
        }
    }

    /// Context sharing an existing trace id, e.g. the one owned by a traced wrapper
    pub fn with_trace(trace_id: Uuid, operation: impl Into<String>) -> Self {
        Self {
            trace_id,
            ..Self::new(operation)
        }
    }

    pub fn add_attribute(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.attributes.push((key.into(), value.into()));
    }

    pub fn elapsed(&self) -> Duration {
        self.start_time.elapsed()
    }
}

/// Log the start of an operation
pub fn log_operation_start(ctx: &OperationContext, op: &StoreOperation) {
    info!(
        trace_id = %ctx.trace_id,
        span_id = %ctx.span_id,
        operation = %ctx.operation,
        entity_id = %op.id(),
        "Starting {} for entity: {}", op.name(), op.id()
    );
}

/// Log the outcome of an operation with full context
pub fn log_operation(
    ctx: &OperationContext,
    op: &StoreOperation,
    result: std::result::Result<(), &StoreError>,
) {
    let elapsed = ctx.elapsed();
    let attrs = ctx
        .attributes
        .iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>()
        .join(", ");

    match result {
        Ok(()) => {
            info!(
                trace_id = %ctx.trace_id,
                span_id = %ctx.span_id,
                operation = %ctx.operation,
                entity_id = %op.id(),
                elapsed_ms = elapsed.as_millis(),
                attributes = %attrs,
                "{} succeeded for {}", op.name(), op.id()
            );
            OPERATION_COUNTER.fetch_add(1, Ordering::Relaxed);
        }
        // A miss is an expected answer, not a fault
        Err(e @ StoreError::NotFound { .. }) => {
            warn!(
                trace_id = %ctx.trace_id,
                span_id = %ctx.span_id,
                operation = %ctx.operation,
                entity_id = %op.id(),
                elapsed_ms = elapsed.as_millis(),
                error_kind = e.kind(),
                "{} found nothing for {}", op.name(), op.id()
            );
            OPERATION_COUNTER.fetch_add(1, Ordering::Relaxed);
        }
        Err(e) => {
            error!(
                trace_id = %ctx.trace_id,
                span_id = %ctx.span_id,
                operation = %ctx.operation,
                entity_id = %op.id(),
                elapsed_ms = elapsed.as_millis(),
                attributes = %attrs,
                error_kind = e.kind(),
                error = %e,
                "{} failed for {}: {}", op.name(), op.id(), e
            );
            OPERATION_COUNTER.fetch_add(1, Ordering::Relaxed);
            ERROR_COUNTER.fetch_add(1, Ordering::Relaxed);
        }
    }
}

/// Count a read-through cache lookup
pub fn record_cache_lookup(hit: bool) {
    if hit {
        CACHE_HIT_COUNTER.fetch_add(1, Ordering::Relaxed);
    } else {
        CACHE_MISS_COUNTER.fetch_add(1, Ordering::Relaxed);
    }
}

/// Count a retry attempt
pub fn record_retry() {
    RETRY_COUNTER.fetch_add(1, Ordering::Relaxed);
}

/// Count a failed optimistic write
pub fn record_conflict() {
    CONFLICT_COUNTER.fetch_add(1, Ordering::Relaxed);
}

/// Record a metric
pub fn record_metric(metric: MetricType) {
    match metric {
        MetricType::Counter { name, value } => {
            debug!("metric.counter {} = {}", name, value);
        }
        MetricType::Histogram { name, value, unit } => {
            debug!("metric.histogram {} = {} {}", name, value, unit);
        }
        MetricType::Timer { name, duration } => {
            debug!("metric.timer {} = {:?}", name, duration);
        }
    }
}

/// Execute a future with a trace context
pub async fn with_trace_id<F, T>(operation: &str, f: F) -> Result<T>
where
    F: std::future::Future<Output = Result<T>>,
{
    let ctx = OperationContext::new(operation);

    info!(
        trace_id = %ctx.trace_id,
        span_id = %ctx.span_id,
        "Starting operation: {}", operation
    );

    let result = f.await;
    let elapsed = ctx.elapsed();

    match &result {
        Ok(_) => {
            info!(
                trace_id = %ctx.trace_id,
                span_id = %ctx.span_id,
                elapsed_ms = elapsed.as_millis(),
                "Operation completed successfully: {}", operation
            );
            record_metric(MetricType::Timer {
                name: "operation.duration",
                duration: elapsed,
            });
        }
        Err(e) => {
            error!(
                trace_id = %ctx.trace_id,
                span_id = %ctx.span_id,
                elapsed_ms = elapsed.as_millis(),
                error = %e,
                "Operation failed: {}", operation
            );
            record_metric(MetricType::Counter {
                name: "operation.errors",
                value: 1,
            });
        }
    }

    result
}

/// Get current metrics snapshot
pub fn get_metrics() -> serde_json::Value {
    serde_json::json!({
        "operations": {
            "total": OPERATION_COUNTER.load(Ordering::Relaxed),
            "errors": ERROR_COUNTER.load(Ordering::Relaxed),
            "retries": RETRY_COUNTER.load(Ordering::Relaxed),
            "conflicts": CONFLICT_COUNTER.load(Ordering::Relaxed),
        },
        "cache": {
            "hits": CACHE_HIT_COUNTER.load(Ordering::Relaxed),
            "misses": CACHE_MISS_COUNTER.load(Ordering::Relaxed),
        },
        "timestamp": Utc::now().to_rfc3339(),
    })
}
