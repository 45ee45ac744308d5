/*!
Observability for the checkpoint engine.

- Structured JSON logging through `tracing-subscriber`
- Prometheus metrics for saves and loads (feature `metrics`)
*/

#[cfg(feature = "metrics")]
use prometheus::{Counter, Encoder, Histogram, HistogramOpts, Registry, TextEncoder};
#[cfg(feature = "metrics")]
use std::sync::OnceLock;
#[cfg(feature = "metrics")]
use std::time::Instant;
use tracing::subscriber::set_global_default;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::{EnvFilter, Registry as TracingRegistry};

use crate::{CheckpointError, Result};

/// Global metrics instance
#[cfg(feature = "metrics")]
static METRICS: OnceLock<CheckpointMetrics> = OnceLock::new();

/// Metrics for checkpoint operations
#[cfg(feature = "metrics")]
#[derive(Debug)]
pub struct CheckpointMetrics {
    pub saves_total: Counter,
    pub loads_total: Counter,
    pub failures_total: Counter,
    pub save_latency_seconds: Histogram,
    pub load_latency_seconds: Histogram,
    pub snapshot_size_bytes: Histogram,

    registry: Registry,
}

#[cfg(feature = "metrics")]
fn metric_error(name: &str, e: prometheus::Error) -> CheckpointError {
    CheckpointError::validation(format!("Failed to create metric {name}: {e}"))
}

#[cfg(feature = "metrics")]
impl CheckpointMetrics {
    fn new() -> Result<Self> {
        let registry = Registry::new();

        let saves_total = Counter::new("checkpoint_saves_total", "Checkpoints committed")
            .map_err(|e| metric_error("checkpoint_saves_total", e))?;
        let loads_total = Counter::new("checkpoint_loads_total", "Checkpoints loaded")
            .map_err(|e| metric_error("checkpoint_loads_total", e))?;
        let failures_total =
            Counter::new("checkpoint_failures_total", "Failed checkpoint saves and loads")
                .map_err(|e| metric_error("checkpoint_failures_total", e))?;
        let save_latency_seconds = Histogram::with_opts(HistogramOpts::new(
            "checkpoint_save_latency_seconds",
            "Duration of checkpoint saves in seconds",
        ))
        .map_err(|e| metric_error("checkpoint_save_latency_seconds", e))?;
        let load_latency_seconds = Histogram::with_opts(HistogramOpts::new(
            "checkpoint_load_latency_seconds",
            "Duration of checkpoint loads in seconds",
        ))
        .map_err(|e| metric_error("checkpoint_load_latency_seconds", e))?;
        let snapshot_size_bytes = Histogram::with_opts(
            HistogramOpts::new(
                "checkpoint_snapshot_size_bytes",
                "Compressed size of committed checkpoints",
            )
            .buckets(prometheus::exponential_buckets(1024.0, 4.0, 10).map_err(|e| {
                metric_error("checkpoint_snapshot_size_bytes", e)
            })?),
        )
        .map_err(|e| metric_error("checkpoint_snapshot_size_bytes", e))?;

        let register_error =
            |e: prometheus::Error| CheckpointError::validation(format!("Failed to register metric: {e}"));
        registry.register(Box::new(saves_total.clone())).map_err(register_error)?;
        registry.register(Box::new(loads_total.clone())).map_err(register_error)?;
        registry.register(Box::new(failures_total.clone())).map_err(register_error)?;
        registry
            .register(Box::new(save_latency_seconds.clone()))
            .map_err(register_error)?;
        registry
            .register(Box::new(load_latency_seconds.clone()))
            .map_err(register_error)?;
        registry
            .register(Box::new(snapshot_size_bytes.clone()))
            .map_err(register_error)?;

        Ok(Self {
            saves_total,
            loads_total,
            failures_total,
            save_latency_seconds,
            load_latency_seconds,
            snapshot_size_bytes,
            registry,
        })
    }

    /// Get or initialize the global metrics instance
    ///
    /// Returns `None` if the metrics could not be registered; recording is then
    /// silently skipped.
    pub fn global() -> Option<&'static CheckpointMetrics> {
        if let Some(metrics) = METRICS.get() {
            return Some(metrics);
        }
        match Self::new() {
            Ok(metrics) => Some(METRICS.get_or_init(|| metrics)),
            Err(e) => {
                tracing::warn!(error = %e, "Checkpoint metrics disabled");
                None
            }
        }
    }

    pub fn record_snapshot_size(&self, size_bytes: usize) {
        self.snapshot_size_bytes.observe(size_bytes as f64);
    }

    /// Gather metrics in Prometheus text format
    pub fn gather_metrics(&self) -> Result<String> {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();

        encoder
            .encode(&metric_families, &mut buffer)
            .map_err(|e| CheckpointError::validation(format!("Failed to encode metrics: {e}")))?;

        String::from_utf8(buffer).map_err(|e| {
            CheckpointError::validation(format!("Failed to convert metrics to string: {e}"))
        })
    }
}

/// Operation being timed
#[cfg(feature = "metrics")]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Save,
    Load,
}

/// Times one save or load and records its outcome
#[cfg(feature = "metrics")]
pub struct MetricsTimer {
    start: Instant,
    operation: Operation,
}

#[cfg(feature = "metrics")]
impl MetricsTimer {
    pub fn start(operation: Operation) -> Self {
        Self {
            start: Instant::now(),
            operation,
        }
    }

    /// Record latency and count the operation as successful
    pub fn finish(self) {
        let Some(metrics) = CheckpointMetrics::global() else {
            return;
        };
        let elapsed = self.start.elapsed().as_secs_f64();
        match self.operation {
            Operation::Save => {
                metrics.saves_total.inc();
                metrics.save_latency_seconds.observe(elapsed);
            }
            Operation::Load => {
                metrics.loads_total.inc();
                metrics.load_latency_seconds.observe(elapsed);
            }
        }
    }

    /// Record latency and count a failure
    pub fn finish_with_error(self) {
        let Some(metrics) = CheckpointMetrics::global() else {
            return;
        };
        let elapsed = self.start.elapsed().as_secs_f64();
        match self.operation {
            Operation::Save => metrics.save_latency_seconds.observe(elapsed),
            Operation::Load => metrics.load_latency_seconds.observe(elapsed),
        }
        metrics.failures_total.inc();
    }
}

/// Initialize the global tracing subscriber
///
/// Log level comes from `RUST_LOG`, defaulting to `checkpoint_core=info`.
/// With `json` set, events are written as one JSON object per line.
pub fn init_observability(json: bool) -> Result<()> {
    #[cfg(feature = "metrics")]
    CheckpointMetrics::global();

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("checkpoint_core=info"));

    let result = if json {
        let fmt_layer = tracing_subscriber::fmt::layer()
            .json()
            .with_target(false)
            .with_current_span(false);
        set_global_default(TracingRegistry::default().with(filter).with(fmt_layer))
    } else {
        let fmt_layer = tracing_subscriber::fmt::layer().with_target(false);
        set_global_default(TracingRegistry::default().with(filter).with(fmt_layer))
    };
    result.map_err(|e| {
        CheckpointError::validation(format!("Failed to set global tracing subscriber: {e}"))
    })?;

    tracing::info!("Checkpoint observability initialized");
    Ok(())
}

/// JSON logging with the default filter
pub fn init_default_observability() -> Result<()> {
    init_observability(true)
}

#[cfg(all(test, feature = "metrics"))]
mod tests {
    use super::*;

    #[test]
    fn test_timers_record_counts() {
        let metrics = CheckpointMetrics::global().unwrap();
        let saves = metrics.saves_total.get();
        let failures = metrics.failures_total.get();

        MetricsTimer::start(Operation::Save).finish();
        MetricsTimer::start(Operation::Load).finish_with_error();

        assert!(metrics.saves_total.get() >= saves + 1.0);
        assert!(metrics.failures_total.get() >= failures + 1.0);
    }

    #[test]
    fn test_metrics_gathering() {
        let metrics = CheckpointMetrics::global().unwrap();
        metrics.record_snapshot_size(4096);

        let text = metrics.gather_metrics().unwrap();
        assert!(text.contains("checkpoint_saves_total"));
        assert!(text.contains("checkpoint_snapshot_size_bytes"));
    }
}
