//! Metrics collection for generation cycles.

use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::RwLock;
use std::time::Duration;

/// How a generation cycle ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleOutcome {
    /// Parsed and persisted (or, for raw text, fully streamed).
    Completed,
    /// Ended with an error event of the given kind.
    Failed(&'static str),
    /// The consumer went away before a terminal event.
    Abandoned,
}

/// Metrics collector interface.
pub trait MetricsCollector: Send + Sync {
    /// Records the end of a cycle.
    fn record_cycle(&self, operation: &str, outcome: CycleOutcome, duration: Duration);

    /// Records one partial emission.
    fn record_partial(&self);

    /// Records a model event tag this service does not handle.
    fn record_unknown_event(&self, tag: &str);

    /// Gets current metrics.
    fn snapshot(&self) -> CycleMetrics;

    /// Resets all metrics.
    fn reset(&self);
}

/// Cycle metrics snapshot.
#[derive(Debug, Clone, Default, Serialize, PartialEq)]
pub struct CycleMetrics {
    /// Cycles started and ended.
    pub total_cycles: u64,
    /// Cycles that completed.
    pub completed_cycles: u64,
    /// Cycles that ended in an error event.
    pub failed_cycles: u64,
    /// Cycles dropped by the consumer.
    pub abandoned_cycles: u64,
    /// Partial emissions forwarded to clients.
    pub partial_emissions: u64,
    /// Total cycle latency in milliseconds.
    pub total_latency_ms: u64,
    /// Cycles per operation.
    pub operations: HashMap<String, u64>,
    /// Error counts by kind.
    pub errors: HashMap<String, u64>,
    /// Unknown model event tags.
    pub unknown_events: HashMap<String, u64>,
}

impl CycleMetrics {
    /// Calculates average latency in milliseconds.
    pub fn average_latency_ms(&self) -> f64 {
        if self.total_cycles == 0 {
            0.0
        } else {
            self.total_latency_ms as f64 / self.total_cycles as f64
        }
    }
}

/// Default metrics collector implementation.
#[derive(Debug, Default)]
pub struct DefaultMetricsCollector {
    total_cycles: AtomicU64,
    completed_cycles: AtomicU64,
    failed_cycles: AtomicU64,
    abandoned_cycles: AtomicU64,
    partial_emissions: AtomicU64,
    total_latency_ms: AtomicU64,
    operations: RwLock<HashMap<String, u64>>,
    errors: RwLock<HashMap<String, u64>>,
    unknown_events: RwLock<HashMap<String, u64>>,
}

impl DefaultMetricsCollector {
    /// Creates a new metrics collector.
    pub fn new() -> Self {
        Self::default()
    }
}

fn bump(map: &RwLock<HashMap<String, u64>>, key: &str) {
    if let Ok(mut map) = map.write() {
        *map.entry(key.to_string()).or_insert(0) += 1;
    }
}

fn read(map: &RwLock<HashMap<String, u64>>) -> HashMap<String, u64> {
    map.read().map(|m| m.clone()).unwrap_or_default()
}

fn clear(map: &RwLock<HashMap<String, u64>>) {
    if let Ok(mut map) = map.write() {
        map.clear();
    }
}

impl MetricsCollector for DefaultMetricsCollector {
    fn record_cycle(&self, operation: &str, outcome: CycleOutcome, duration: Duration) {
        self.total_cycles.fetch_add(1, Ordering::Relaxed);
        self.total_latency_ms
            .fetch_add(duration.as_millis() as u64, Ordering::Relaxed);
        bump(&self.operations, operation);

        match outcome {
            CycleOutcome::Completed => {
                self.completed_cycles.fetch_add(1, Ordering::Relaxed);
            }
            CycleOutcome::Failed(kind) => {
                self.failed_cycles.fetch_add(1, Ordering::Relaxed);
                bump(&self.errors, kind);
            }
            CycleOutcome::Abandoned => {
                self.abandoned_cycles.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    fn record_partial(&self) {
        self.partial_emissions.fetch_add(1, Ordering::Relaxed);
    }

    fn record_unknown_event(&self, tag: &str) {
        bump(&self.unknown_events, tag);
    }

    fn snapshot(&self) -> CycleMetrics {
        CycleMetrics {
            total_cycles: self.total_cycles.load(Ordering::Relaxed),
            completed_cycles: self.completed_cycles.load(Ordering::Relaxed),
            failed_cycles: self.failed_cycles.load(Ordering::Relaxed),
            abandoned_cycles: self.abandoned_cycles.load(Ordering::Relaxed),
            partial_emissions: self.partial_emissions.load(Ordering::Relaxed),
            total_latency_ms: self.total_latency_ms.load(Ordering::Relaxed),
            operations: read(&self.operations),
            errors: read(&self.errors),
            unknown_events: read(&self.unknown_events),
        }
    }

    fn reset(&self) {
        self.total_cycles.store(0, Ordering::Relaxed);
        self.completed_cycles.store(0, Ordering::Relaxed);
        self.failed_cycles.store(0, Ordering::Relaxed);
        self.abandoned_cycles.store(0, Ordering::Relaxed);
        self.partial_emissions.store(0, Ordering::Relaxed);
        self.total_latency_ms.store(0, Ordering::Relaxed);
        clear(&self.operations);
        clear(&self.errors);
        clear(&self.unknown_events);
    }
}

/// Collector that discards everything.
#[derive(Debug, Default)]
pub struct NoopMetricsCollector;

impl MetricsCollector for NoopMetricsCollector {
    fn record_cycle(&self, _operation: &str, _outcome: CycleOutcome, _duration: Duration) {}
    fn record_partial(&self) {}
    fn record_unknown_event(&self, _tag: &str) {}
    fn snapshot(&self) -> CycleMetrics {
        CycleMetrics::default()
    }
    fn reset(&self) {}
}
