//! In-process metrics with Prometheus text exposition.

use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::fmt::Write;
use std::sync::atomic::{AtomicU64, Ordering};

/// Upper bounds (ms) of the latency histogram buckets; `+Inf` is implicit.
pub const LATENCY_BUCKETS_MS: [f64; 6] = [10.0, 50.0, 100.0, 250.0, 500.0, 1000.0];

/// Where the aggregator and health monitor push their measurements.
pub trait MetricsSink: Send + Sync {
    fn observe_latency(&self, operation: &str, latency_ms: f64);
    fn record_divergence(&self, divergence: u64);
    fn record_region_state(&self, region: &str, online: bool);
    fn record_like(&self, region: &str);
}

/// Discards everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopMetrics;

impl MetricsSink for NoopMetrics {
    fn observe_latency(&self, _operation: &str, _latency_ms: f64) {}
    fn record_divergence(&self, _divergence: u64) {}
    fn record_region_state(&self, _region: &str, _online: bool) {}
    fn record_like(&self, _region: &str) {}
}

#[derive(Debug, Default, Clone)]
struct Histogram {
    /// Non-cumulative; the last slot is `+Inf`
    buckets: [u64; LATENCY_BUCKETS_MS.len() + 1],
    sum_ms: f64,
    count: u64,
}

impl Histogram {
    fn observe(&mut self, value_ms: f64) {
        let slot = LATENCY_BUCKETS_MS
            .iter()
            .position(|bound| value_ms <= *bound)
            .unwrap_or(LATENCY_BUCKETS_MS.len());
        self.buckets[slot] += 1;
        self.sum_ms += value_ms;
        self.count += 1;
    }
}

/// Latency histogram per operation, divergence gauge, per-region online
/// gauge and per-region like counter.
#[derive(Debug, Default)]
pub struct AggregatorMetrics {
    latency: Mutex<BTreeMap<String, Histogram>>,
    divergence: AtomicU64,
    region_online: Mutex<BTreeMap<String, bool>>,
    likes_total: Mutex<BTreeMap<String, u64>>,
}

impl AggregatorMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn divergence(&self) -> u64 {
        self.divergence.load(Ordering::Relaxed)
    }

    pub fn region_online(&self, region: &str) -> Option<bool> {
        self.region_online.lock().get(region).copied()
    }

    pub fn likes_total(&self, region: &str) -> u64 {
        self.likes_total.lock().get(region).copied().unwrap_or(0)
    }

    pub fn latency_count(&self, operation: &str) -> u64 {
        self.latency.lock().get(operation).map_or(0, |h| h.count)
    }

    pub fn render_prometheus(&self) -> String {
        let mut out = String::new();

        out.push_str("# HELP stats_latency_ms Latency of aggregation and health operations\n");
        out.push_str("# TYPE stats_latency_ms histogram\n");
        for (operation, histogram) in self.latency.lock().iter() {
            let mut cumulative = 0;
            for (bound, hits) in LATENCY_BUCKETS_MS.iter().zip(histogram.buckets.iter()) {
                cumulative += hits;
                let _ = writeln!(
                    out,
                    "stats_latency_ms_bucket{{operation=\"{}\",le=\"{}\"}} {}",
                    operation, bound, cumulative
                );
            }
            let _ = writeln!(
                out,
                "stats_latency_ms_bucket{{operation=\"{}\",le=\"+Inf\"}} {}",
                operation, histogram.count
            );
            let _ = writeln!(
                out,
                "stats_latency_ms_sum{{operation=\"{}\"}} {}",
                operation, histogram.sum_ms
            );
            let _ = writeln!(
                out,
                "stats_latency_ms_count{{operation=\"{}\"}} {}",
                operation, histogram.count
            );
        }

        out.push_str("# HELP crdt_divergence Spread between highest and lowest regional counter\n");
        out.push_str("# TYPE crdt_divergence gauge\n");
        let _ = writeln!(out, "crdt_divergence {}", self.divergence());

        out.push_str("# HELP region_online Whether the region answered the last call\n");
        out.push_str("# TYPE region_online gauge\n");
        for (region, online) in self.region_online.lock().iter() {
            let _ = writeln!(out, "region_online{{region=\"{}\"}} {}", region, u8::from(*online));
        }

        out.push_str("# HELP likes_total Likes recorded by this process\n");
        out.push_str("# TYPE likes_total counter\n");
        for (region, likes) in self.likes_total.lock().iter() {
            let _ = writeln!(out, "likes_total{{region=\"{}\"}} {}", region, likes);
        }

        out
    }
}

impl MetricsSink for AggregatorMetrics {
    fn observe_latency(&self, operation: &str, latency_ms: f64) {
        let mut latency = self.latency.lock();
        match latency.get_mut(operation) {
            Some(histogram) => histogram.observe(latency_ms),
            None => {
                let mut histogram = Histogram::default();
                histogram.observe(latency_ms);
                latency.insert(operation.to_string(), histogram);
            }
        }
    }

    fn record_divergence(&self, divergence: u64) {
        self.divergence.store(divergence, Ordering::Relaxed);
    }

    fn record_region_state(&self, region: &str, online: bool) {
        self.region_online.lock().insert(region.to_string(), online);
    }

    fn record_like(&self, region: &str) {
        *self.likes_total.lock().entry(region.to_string()).or_insert(0) += 1;
    }
}
