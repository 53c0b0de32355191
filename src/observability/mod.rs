//! Observability: tracing setup, log redaction and cycle metrics.

mod logging;
mod metrics;

pub use logging::{init_tracing, redact, truncate_for_log, LogConfig};
pub use metrics::{
    CycleMetrics, CycleOutcome, DefaultMetricsCollector, MetricsCollector, NoopMetricsCollector,
};

use std::time::{Duration, Instant};

/// Measures one generation cycle.
#[derive(Debug)]
pub struct CycleTimer {
    start: Instant,
    operation: &'static str,
}

impl CycleTimer {
    /// Starts timing `operation`.
    pub fn start(operation: &'static str) -> Self {
        Self {
            start: Instant::now(),
            operation,
        }
    }

    /// Returns the elapsed time.
    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }

    /// Returns the operation name.
    pub fn operation(&self) -> &'static str {
        self.operation
    }
}
