//! Per-endpoint resilience metrics
//!
//! Lightweight counters for observability without external dependencies:
//! request counts, retries, breaker trips, rate-limit hits, and a latency
//! window with percentiles. Snapshots are embedded in run summaries.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::RwLock;
use std::time::{Duration, Instant};

/// Performance metrics collector for one endpoint
pub struct Metrics {
    name: String,
    successes: AtomicU64,
    failures: AtomicU64,
    retries: AtomicU64,
    circuit_trips: AtomicU64,
    rate_limit_hits: AtomicU64,
    /// Latency samples for percentile calculation (recent window, micros)
    latencies: RwLock<Vec<u64>>,
    max_samples: usize,
    start_time: Instant,
}

impl Metrics {
    const DEFAULT_MAX_SAMPLES: usize = 1000;

    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            successes: AtomicU64::new(0),
            failures: AtomicU64::new(0),
            retries: AtomicU64::new(0),
            circuit_trips: AtomicU64::new(0),
            rate_limit_hits: AtomicU64::new(0),
            latencies: RwLock::new(Vec::with_capacity(Self::DEFAULT_MAX_SAMPLES)),
            max_samples: Self::DEFAULT_MAX_SAMPLES,
            start_time: Instant::now(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn record_success(&self, latency: Duration) {
        self.successes.fetch_add(1, Ordering::Relaxed);
        self.record_latency(latency);
    }

    pub fn record_failure(&self, latency: Duration) {
        self.failures.fetch_add(1, Ordering::Relaxed);
        self.record_latency(latency);
    }

    pub fn record_retry(&self) {
        self.retries.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_circuit_trip(&self) {
        self.circuit_trips.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_rate_limit_hit(&self) {
        self.rate_limit_hits.fetch_add(1, Ordering::Relaxed);
    }

    fn record_latency(&self, latency: Duration) {
        let micros = latency.as_micros() as u64;
        let mut samples = self.latencies.write().unwrap_or_else(|e| e.into_inner());
        if samples.len() >= self.max_samples {
            // Drop the oldest half to keep a recent window without
            // per-sample shifting
            let keep = self.max_samples / 2;
            let len = samples.len();
            samples.drain(..len - keep);
        }
        samples.push(micros);
    }

    /// Point-in-time snapshot of all counters.
    pub fn snapshot(&self) -> MetricsSnapshot {
        let samples = self.latencies.read().unwrap_or_else(|e| e.into_inner());
        let mut sorted = samples.clone();
        sorted.sort_unstable();

        MetricsSnapshot {
            name: self.name.clone(),
            total_requests: self.successes.load(Ordering::Relaxed)
                + self.failures.load(Ordering::Relaxed),
            successes: self.successes.load(Ordering::Relaxed),
            failures: self.failures.load(Ordering::Relaxed),
            retries: self.retries.load(Ordering::Relaxed),
            circuit_trips: self.circuit_trips.load(Ordering::Relaxed),
            rate_limit_hits: self.rate_limit_hits.load(Ordering::Relaxed),
            latency: LatencyStats::from_sorted_micros(&sorted),
            uptime: self.start_time.elapsed(),
        }
    }
}

/// Immutable snapshot of a metrics collector
#[derive(Debug, Clone, PartialEq)]
pub struct MetricsSnapshot {
    pub name: String,
    pub total_requests: u64,
    pub successes: u64,
    pub failures: u64,
    pub retries: u64,
    pub circuit_trips: u64,
    pub rate_limit_hits: u64,
    pub latency: LatencyStats,
    pub uptime: Duration,
}

impl MetricsSnapshot {
    pub fn success_rate(&self) -> f64 {
        if self.total_requests == 0 {
            return 1.0;
        }
        self.successes as f64 / self.total_requests as f64
    }
}

/// Latency percentiles from the sample window
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct LatencyStats {
    pub p50: Duration,
    pub p95: Duration,
    pub p99: Duration,
    pub max: Duration,
}

impl LatencyStats {
    fn from_sorted_micros(sorted: &[u64]) -> Self {
        if sorted.is_empty() {
            return Self::default();
        }
        let pick = |p: f64| {
            let idx = ((sorted.len() as f64 - 1.0) * p).round() as usize;
            Duration::from_micros(sorted[idx])
        };
        Self {
            p50: pick(0.50),
            p95: pick(0.95),
            p99: pick(0.99),
            max: Duration::from_micros(*sorted.last().unwrap_or(&0)),
        }
    }
}
