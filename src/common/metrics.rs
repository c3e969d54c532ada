//! Metrics collection
//!
//! Prometheus-compatible counters, gauges and latency histograms shared by the
//! coordinator and the gateway.

use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::fmt::Write;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Histogram bucket boundaries for latency measurements (in milliseconds)
const LATENCY_BUCKETS: [f64; 11] = [
    1.0, 5.0, 10.0, 25.0, 50.0, 100.0, 250.0, 500.0, 1000.0, 2500.0, 5000.0,
];

/// A simple histogram implementation for latency tracking
#[derive(Debug)]
pub struct Histogram {
    buckets: Vec<AtomicU64>,
    boundaries: Vec<f64>,
    sum_micros: AtomicU64,
    count: AtomicU64,
}

impl Histogram {
    pub fn new() -> Self {
        Self::with_buckets(&LATENCY_BUCKETS)
    }

    pub fn with_buckets(boundaries: &[f64]) -> Self {
        Self {
            buckets: (0..=boundaries.len()).map(|_| AtomicU64::new(0)).collect(),
            boundaries: boundaries.to_vec(),
            sum_micros: AtomicU64::new(0),
            count: AtomicU64::new(0),
        }
    }

    /// Record a value in the histogram
    pub fn observe(&self, value: f64) {
        let bucket_idx = self
            .boundaries
            .iter()
            .position(|&boundary| value <= boundary)
            .unwrap_or(self.boundaries.len());

        self.buckets[bucket_idx].fetch_add(1, Ordering::Relaxed);
        self.sum_micros
            .fetch_add((value * 1000.0) as u64, Ordering::Relaxed);
        self.count.fetch_add(1, Ordering::Relaxed);
    }

    /// Cumulative bucket counts, ending with `+Inf`
    pub fn get_buckets(&self) -> Vec<(f64, u64)> {
        let mut cumulative = 0u64;
        let mut result = Vec::with_capacity(self.boundaries.len() + 1);

        for (i, &boundary) in self.boundaries.iter().enumerate() {
            cumulative += self.buckets[i].load(Ordering::Relaxed);
            result.push((boundary, cumulative));
        }

        cumulative += self.buckets[self.boundaries.len()].load(Ordering::Relaxed);
        result.push((f64::INFINITY, cumulative));

        result
    }

    pub fn sum(&self) -> f64 {
        self.sum_micros.load(Ordering::Relaxed) as f64 / 1000.0
    }

    pub fn count(&self) -> u64 {
        self.count.load(Ordering::Relaxed)
    }
}

impl Default for Histogram {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Default)]
pub struct Counter {
    value: AtomicU64,
}

impl Counter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn inc(&self) {
        self.value.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add(&self, n: u64) {
        self.value.fetch_add(n, Ordering::Relaxed);
    }

    pub fn get(&self) -> u64 {
        self.value.load(Ordering::Relaxed)
    }
}

#[derive(Debug, Default)]
pub struct Gauge {
    value: AtomicU64,
}

impl Gauge {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, v: u64) {
        self.value.store(v, Ordering::Relaxed);
    }

    pub fn get(&self) -> u64 {
        self.value.load(Ordering::Relaxed)
    }
}

/// Per-route request metrics
#[derive(Debug, Default)]
pub struct EndpointMetrics {
    pub requests_total: Counter,
    pub requests_error: Counter,
    pub latency: Histogram,
}

/// Global metrics registry
#[derive(Debug)]
pub struct MetricsRegistry {
    endpoints: Mutex<BTreeMap<String, Arc<EndpointMetrics>>>,

    // Coordinator
    pub heartbeats_recorded: Counter,
    pub cycles_run: Counter,
    pub cycles_skipped: Counter,
    pub nodemaps_published: Counter,
    pub bootstrap_failures: Counter,
    pub nodemap_version: Gauge,

    // Gateway
    pub replica_failures: Counter,
    pub replicas_exhausted: Counter,
    pub refresh_failures: Counter,
    pub bytes_read: Counter,
    pub bytes_written: Counter,

    start_time: Instant,
}

impl MetricsRegistry {
    pub fn new() -> Self {
        Self {
            endpoints: Mutex::new(BTreeMap::new()),
            heartbeats_recorded: Counter::new(),
            cycles_run: Counter::new(),
            cycles_skipped: Counter::new(),
            nodemaps_published: Counter::new(),
            bootstrap_failures: Counter::new(),
            nodemap_version: Gauge::new(),
            replica_failures: Counter::new(),
            replicas_exhausted: Counter::new(),
            refresh_failures: Counter::new(),
            bytes_read: Counter::new(),
            bytes_written: Counter::new(),
            start_time: Instant::now(),
        }
    }

    /// Get or create metrics for a route
    pub fn endpoint(&self, route: &str) -> Arc<EndpointMetrics> {
        self.endpoints
            .lock()
            .entry(route.to_string())
            .or_default()
            .clone()
    }

    pub fn record_request(&self, route: &str, duration: Duration, success: bool) {
        let endpoint = self.endpoint(route);
        endpoint.requests_total.inc();
        endpoint.latency.observe(duration.as_secs_f64() * 1000.0);
        if !success {
            endpoint.requests_error.inc();
        }
    }

    pub fn uptime_seconds(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }

    /// Generate Prometheus-compatible metrics output
    pub fn to_prometheus(&self) -> String {
        let mut out = String::new();

        let counters = [
            (
                "slicemap_heartbeats_recorded_total",
                "Heartbeats accepted",
                &self.heartbeats_recorded,
            ),
            (
                "slicemap_cycles_run_total",
                "Recomputation cycles that held the lock",
                &self.cycles_run,
            ),
            (
                "slicemap_cycles_skipped_total",
                "Recomputation cycles skipped because the lock was held elsewhere",
                &self.cycles_skipped,
            ),
            (
                "slicemap_nodemaps_published_total",
                "Nodemap versions published",
                &self.nodemaps_published,
            ),
            (
                "slicemap_bootstrap_failures_total",
                "Failed group bootstrap calls",
                &self.bootstrap_failures,
            ),
            (
                "slicemap_replica_failures_total",
                "Replica requests that failed and fell through",
                &self.replica_failures,
            ),
            (
                "slicemap_replicas_exhausted_total",
                "Requests where every replica failed",
                &self.replicas_exhausted,
            ),
            (
                "slicemap_refresh_failures_total",
                "Failed nodemap refreshes",
                &self.refresh_failures,
            ),
            (
                "slicemap_bytes_read_total",
                "Bytes returned to clients",
                &self.bytes_read,
            ),
            (
                "slicemap_bytes_written_total",
                "Bytes accepted from clients",
                &self.bytes_written,
            ),
        ];
        for (name, help, counter) in counters {
            let _ = writeln!(out, "# HELP {} {}", name, help);
            let _ = writeln!(out, "# TYPE {} counter", name);
            let _ = writeln!(out, "{} {}", name, counter.get());
        }

        out.push_str("# HELP slicemap_nodemap_version Latest nodemap version seen\n");
        out.push_str("# TYPE slicemap_nodemap_version gauge\n");
        let _ = writeln!(out, "slicemap_nodemap_version {}", self.nodemap_version.get());

        out.push_str("# HELP slicemap_uptime_seconds Process uptime in seconds\n");
        out.push_str("# TYPE slicemap_uptime_seconds gauge\n");
        let _ = writeln!(out, "slicemap_uptime_seconds {}", self.uptime_seconds());

        let endpoints = self.endpoints.lock();

        out.push_str("# HELP slicemap_endpoint_requests_total Requests per route\n");
        out.push_str("# TYPE slicemap_endpoint_requests_total counter\n");
        for (route, m) in endpoints.iter() {
            let _ = writeln!(
                out,
                "slicemap_endpoint_requests_total{{route=\"{}\"}} {}",
                route,
                m.requests_total.get()
            );
        }

        out.push_str("# HELP slicemap_endpoint_errors_total Errors per route\n");
        out.push_str("# TYPE slicemap_endpoint_errors_total counter\n");
        for (route, m) in endpoints.iter() {
            let _ = writeln!(
                out,
                "slicemap_endpoint_errors_total{{route=\"{}\"}} {}",
                route,
                m.requests_error.get()
            );
        }

        out.push_str("# HELP slicemap_request_duration_ms Request duration in milliseconds\n");
        out.push_str("# TYPE slicemap_request_duration_ms histogram\n");
        for (route, m) in endpoints.iter() {
            for (le, count) in m.latency.get_buckets() {
                let le = if le.is_infinite() {
                    "+Inf".to_string()
                } else {
                    le.to_string()
                };
                let _ = writeln!(
                    out,
                    "slicemap_request_duration_ms_bucket{{route=\"{}\",le=\"{}\"}} {}",
                    route, le, count
                );
            }
            let _ = writeln!(
                out,
                "slicemap_request_duration_ms_sum{{route=\"{}\"}} {}",
                route,
                m.latency.sum()
            );
            let _ = writeln!(
                out,
                "slicemap_request_duration_ms_count{{route=\"{}\"}} {}",
                route,
                m.latency.count()
            );
        }

        out
    }
}

impl Default for MetricsRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Global metrics instance
pub static METRICS: once_cell::sync::Lazy<MetricsRegistry> =
    once_cell::sync::Lazy::new(MetricsRegistry::new);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_histogram() {
        let hist = Histogram::new();
        hist.observe(5.0);
        hist.observe(50.0);
        hist.observe(50_000.0);

        assert_eq!(hist.count(), 3);
        let buckets = hist.get_buckets();
        assert_eq!(buckets.last().unwrap().1, 3);
        // 5.0 and 50.0 fall at or below the 50ms boundary
        assert_eq!(buckets[4], (50.0, 2));
    }

    #[test]
    fn test_counter_and_gauge() {
        let counter = Counter::new();
        counter.inc();
        counter.add(5);
        assert_eq!(counter.get(), 6);

        let gauge = Gauge::new();
        gauge.set(10);
        assert_eq!(gauge.get(), 10);
    }

    #[test]
    fn test_registry_prometheus_output() {
        let registry = MetricsRegistry::new();
        registry.record_request("/id/:id", Duration::from_millis(12), true);
        registry.record_request("/id/:id", Duration::from_millis(40), false);
        registry.nodemaps_published.inc();

        let endpoint = registry.endpoint("/id/:id");
        assert_eq!(endpoint.requests_total.get(), 2);
        assert_eq!(endpoint.requests_error.get(), 1);

        let text = registry.to_prometheus();
        assert!(text.contains("slicemap_nodemaps_published_total 1"));
        assert!(text.contains("slicemap_endpoint_requests_total{route=\"/id/:id\"} 2"));
        assert!(text.contains("le=\"+Inf\""));
        assert!(text.contains(
            "# HELP slicemap_cycles_skipped_total Recomputation cycles skipped because \
             the lock was held elsewhere"
        ));
    }
}
