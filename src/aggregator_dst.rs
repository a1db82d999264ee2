//! Deterministic Simulation Testing for aggregation and health checks
//!
//! Shadow-state harness over a set of `SimulatedCounterStore` regions:
//! - Seeded generation of likes, outages, stalls and read operations
//! - Every aggregate and health report checked against the shadow state
//! - Seed-based reproducibility for debugging

use crate::aggregator::Aggregator;
use crate::client::RegionClient;
use crate::config::ConfigError;
use crate::fanout::JOIN_GRACE;
use crate::health::HealthMonitor;
use crate::region::{OfflineCause, RegionIdentity, RegionState};
use crate::store::{InMemoryCounterStore, SimulatedCounterStore, SimulatedStoreConfig};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

/// Configuration for aggregation DST
#[derive(Debug, Clone)]
pub struct AggregationDSTConfig {
    /// Random seed for reproducibility
    pub seed: u64,
    pub num_regions: usize,
    /// Fault injection applied to every region store
    pub store: SimulatedStoreConfig,
    pub per_call_timeout: Duration,
    pub enable_uniques: bool,
    /// Probability of flipping a region's forced outage
    pub outage_prob: f64,
    /// Probability of flipping a region's forced stall
    pub stall_prob: f64,
    /// Distinct visitors per region
    pub num_visitors: usize,
}

impl Default for AggregationDSTConfig {
    fn default() -> Self {
        AggregationDSTConfig {
            seed: 0,
            num_regions: 3,
            store: SimulatedStoreConfig::no_faults(),
            per_call_timeout: Duration::from_millis(100),
            enable_uniques: true,
            outage_prob: 0.05,
            stall_prob: 0.05,
            num_visitors: 50,
        }
    }
}

impl AggregationDSTConfig {
    pub fn new(seed: u64) -> Self {
        AggregationDSTConfig {
            seed,
            ..Default::default()
        }
    }

    /// Random store faults on top of forced outages
    pub fn chaotic(seed: u64) -> Self {
        AggregationDSTConfig {
            seed,
            store: SimulatedStoreConfig::high_chaos(),
            ..Default::default()
        }
    }

    /// Unique estimation switched off
    pub fn counters_only(seed: u64) -> Self {
        AggregationDSTConfig {
            seed,
            enable_uniques: false,
            ..Default::default()
        }
    }

    /// Many regions, frequent outages
    pub fn wide(seed: u64) -> Self {
        AggregationDSTConfig {
            seed,
            num_regions: 8,
            outage_prob: 0.15,
            stall_prob: 0.1,
            store: SimulatedStoreConfig {
                latency_range_ms: (0, 20),
                ..SimulatedStoreConfig::no_faults()
            },
            ..Default::default()
        }
    }

    fn fault_free(&self) -> bool {
        let store = &self.store;
        store.counter_fail_prob == 0.0
            && store.unique_fail_prob == 0.0
            && store.ping_fail_prob == 0.0
            && store.stall_prob == 0.0
    }
}

/// Operation type for logging
#[derive(Debug, Clone)]
pub enum AggregationOp {
    RecordLike { region: usize, visitor: usize },
    ToggleOutage { region: usize },
    ToggleStall { region: usize },
    Aggregate,
    CheckHealth,
}

/// Result of an aggregation DST run
#[derive(Debug, Clone)]
pub struct AggregationDSTResult {
    pub seed: u64,
    pub total_operations: u64,
    pub likes: u64,
    pub aggregates: u64,
    pub health_checks: u64,
    pub offline_observed: u64,
    pub invariant_violations: Vec<String>,
    pub last_op: Option<AggregationOp>,
}

impl AggregationDSTResult {
    pub fn new(seed: u64) -> Self {
        AggregationDSTResult {
            seed,
            total_operations: 0,
            likes: 0,
            aggregates: 0,
            health_checks: 0,
            offline_observed: 0,
            invariant_violations: Vec::new(),
            last_op: None,
        }
    }

    pub fn is_success(&self) -> bool {
        self.invariant_violations.is_empty()
    }

    pub fn summary(&self) -> String {
        format!(
            "Seed {}: {} ops (likes:{}, aggregates:{}, health:{}, offline seen:{}), {} violations",
            self.seed,
            self.total_operations,
            self.likes,
            self.aggregates,
            self.health_checks,
            self.offline_observed,
            self.invariant_violations.len()
        )
    }
}

#[derive(Debug, Default)]
struct ShadowRegion {
    likes: u64,
    visitors: HashSet<usize>,
    outage: bool,
    stalled: bool,
}

/// DST harness for `Aggregator` and `HealthMonitor`
pub struct AggregationDSTHarness {
    config: AggregationDSTConfig,
    rng: ChaCha8Rng,
    stores: Vec<Arc<SimulatedCounterStore>>,
    aggregator: Aggregator,
    monitor: HealthMonitor,
    shadow: Vec<ShadowRegion>,
    result: AggregationDSTResult,
}

impl AggregationDSTHarness {
    pub fn new(config: AggregationDSTConfig) -> Result<Self, ConfigError> {
        let mut stores = Vec::with_capacity(config.num_regions);
        let mut clients = Vec::with_capacity(config.num_regions);

        for i in 0..config.num_regions {
            let key = format!("region-{}", i);
            let store_seed = config.seed.wrapping_mul(1000).wrapping_add(i as u64);
            let store = Arc::new(
                SimulatedCounterStore::new(
                    Arc::new(InMemoryCounterStore::new()),
                    store_seed,
                    config.store.clone(),
                )
                .with_endpoint(format!("sim-{}", key)),
            );
            let region = RegionIdentity::new(key.as_str(), key.to_uppercase(), format!("sim-{}", key));
            clients.push(
                RegionClient::new(region, store.clone()).with_uniques(config.enable_uniques),
            );
            stores.push(store);
        }

        Ok(AggregationDSTHarness {
            rng: ChaCha8Rng::seed_from_u64(config.seed),
            aggregator: Aggregator::new(clients.clone())?,
            monitor: HealthMonitor::new(clients)?,
            shadow: (0..config.num_regions).map(|_| ShadowRegion::default()).collect(),
            result: AggregationDSTResult::new(config.seed),
            stores,
            config,
        })
    }

    pub fn with_seed(seed: u64) -> Result<Self, ConfigError> {
        Self::new(AggregationDSTConfig::new(seed))
    }

    fn next_op(&mut self) -> AggregationOp {
        let region = self.rng.gen_range(0..self.config.num_regions);
        let roll: f64 = self.rng.gen();

        let outage_threshold = self.config.outage_prob;
        let stall_threshold = outage_threshold + self.config.stall_prob;

        if roll < outage_threshold {
            AggregationOp::ToggleOutage { region }
        } else if roll < stall_threshold {
            AggregationOp::ToggleStall { region }
        } else if roll < stall_threshold + 0.15 {
            AggregationOp::Aggregate
        } else if roll < stall_threshold + 0.2 {
            AggregationOp::CheckHealth
        } else {
            let visitor = self.rng.gen_range(0..self.config.num_visitors.max(1));
            AggregationOp::RecordLike { region, visitor }
        }
    }

    async fn run_single_op(&mut self) {
        let op = self.next_op();
        self.result.last_op = Some(op.clone());

        match op {
            AggregationOp::RecordLike { region, visitor } => self.record_like(region, visitor).await,
            AggregationOp::ToggleOutage { region } => {
                let shadow = &mut self.shadow[region];
                shadow.outage = !shadow.outage;
                shadow.stalled = false;
                self.stores[region].set_stalled(false);
                self.stores[region].set_offline(shadow.outage);
            }
            AggregationOp::ToggleStall { region } => {
                let shadow = &mut self.shadow[region];
                shadow.stalled = !shadow.stalled;
                shadow.outage = false;
                self.stores[region].set_offline(false);
                self.stores[region].set_stalled(shadow.stalled);
            }
            AggregationOp::Aggregate => self.aggregate().await,
            AggregationOp::CheckHealth => self.check_health().await,
        }

        self.result.total_operations += 1;
    }

    async fn record_like(&mut self, region: usize, visitor: usize) {
        use crate::store::CounterStore;

        let visitor_id = format!("visitor-{}", visitor);
        let written = self.stores[region].increment().await;
        let added = self.stores[region].add_visitor(&visitor_id).await;

        let (expected_likes, new_visitor) = {
            let shadow = &mut self.shadow[region];
            shadow.likes += 1;
            (shadow.likes, shadow.visitors.insert(visitor))
        };
        self.result.likes += 1;

        match written {
            Ok(likes) if likes == expected_likes => {}
            Ok(likes) => self.violation(format!(
                "Region {} increment returned {}, expected {}",
                region, likes, expected_likes
            )),
            Err(e) => self.violation(format!("Region {} increment failed: {}", region, e)),
        }
        if let Ok(true) = added {
            if !new_visitor {
                self.violation(format!(
                    "Region {} estimator changed on repeated visitor {}",
                    region, visitor
                ));
            }
        }
    }

    async fn aggregate(&mut self) {
        let started = Instant::now();
        let result = self.aggregator.aggregate(self.config.per_call_timeout).await;
        let elapsed = started.elapsed();
        self.result.aggregates += 1;
        self.result.offline_observed += result.offline_count() as u64;

        let bound = self.config.per_call_timeout + JOIN_GRACE + Duration::from_millis(25);
        if elapsed > bound {
            self.violation(format!("Aggregate took {:?}, bound {:?}", elapsed, bound));
        }
        if result.snapshots().len() != self.config.num_regions {
            self.violation(format!(
                "Aggregate reported {} regions, expected {}",
                result.snapshots().len(),
                self.config.num_regions
            ));
        }

        let mut online_values = Vec::new();
        for (i, shadow) in self.shadow.iter().enumerate() {
            let key = format!("region-{}", i);
            let Some(snapshot) = result.snapshot(&key) else {
                self.result
                    .invariant_violations
                    .push(format!("Region {} missing from aggregate", key));
                continue;
            };

            let mut problems = Vec::new();
            match snapshot.state() {
                RegionState::Online => {
                    if shadow.outage || shadow.stalled {
                        problems.push(format!("{} online while forced down", key));
                    }
                    if snapshot.counter_value() != Some(shadow.likes) {
                        problems.push(format!(
                            "{} counter {:?}, expected {}",
                            key,
                            snapshot.counter_value(),
                            shadow.likes
                        ));
                    }
                    match (self.config.enable_uniques, snapshot.unique_estimate()) {
                        (true, Some(estimate)) => {
                            let exact = shadow.visitors.len() as u64;
                            let tolerance = 2 + exact * 3 / 100;
                            if estimate.abs_diff(exact) > tolerance {
                                problems.push(format!(
                                    "{} unique estimate {} too far from {}",
                                    key, estimate, exact
                                ));
                            }
                        }
                        (false, None) => {}
                        (enabled, estimate) => problems.push(format!(
                            "{} uniques enabled={} but estimate {:?}",
                            key, enabled, estimate
                        )),
                    }
                    if let Some(value) = snapshot.counter_value() {
                        online_values.push(value);
                    }
                }
                RegionState::Offline(cause) => {
                    if snapshot.reading().is_some() || snapshot.latency_ms().is_some() {
                        problems.push(format!("{} offline but carries readings", key));
                    }
                    if shadow.outage && cause != OfflineCause::ConnectionFailure {
                        problems.push(format!("{} refused but cause {:?}", key, cause));
                    }
                    if shadow.stalled && cause != OfflineCause::Timeout {
                        problems.push(format!("{} stalled but cause {:?}", key, cause));
                    }
                    if !shadow.outage && !shadow.stalled && self.config.fault_free() {
                        problems.push(format!("{} offline without any fault", key));
                    }
                }
            }
            self.result.invariant_violations.extend(problems);
        }

        let expected = if online_values.len() >= 2 {
            let max = online_values.iter().max().copied().unwrap_or_default();
            let min = online_values.iter().min().copied().unwrap_or_default();
            Some(max - min)
        } else {
            None
        };
        if result.divergence() != expected {
            self.violation(format!(
                "Divergence {:?}, expected {:?}",
                result.divergence(),
                expected
            ));
        }

        // Nothing changed in between, so a second read must agree
        if self.config.fault_free() {
            let again = self.aggregator.aggregate(self.config.per_call_timeout).await;
            let readings = |r: &crate::aggregator::AggregateResult| {
                r.snapshots()
                    .values()
                    .map(|s| s.reading())
                    .collect::<Vec<_>>()
            };
            if readings(&again) != readings(&result) || again.divergence() != result.divergence() {
                self.violation("Back-to-back aggregates disagree".to_string());
            }
        }
    }

    async fn check_health(&mut self) {
        let report = self.monitor.check_health(self.config.per_call_timeout).await;
        self.result.health_checks += 1;

        let mut problems = Vec::new();
        let mut all_connected = true;
        let mut any_connected = false;
        for (i, shadow) in self.shadow.iter().enumerate() {
            let key = format!("region-{}", i);
            let Some(region) = report.region(&key) else {
                problems.push(format!("{} missing from health report", key));
                continue;
            };
            all_connected &= region.connected;
            any_connected |= region.connected;

            if (shadow.outage || shadow.stalled) && region.connected {
                problems.push(format!("{} reported connected while forced down", key));
            }
            if region.connected != region.latency_ms.is_some() {
                problems.push(format!("{} latency present iff connected violated", key));
            }
            if !region.connected && !shadow.outage && !shadow.stalled && self.config.fault_free() {
                problems.push(format!("{} disconnected without any fault", key));
            }
        }

        if report.is_ready() != all_connected {
            problems.push(format!(
                "Overall {:?} but all_connected={}",
                report.overall(),
                all_connected
            ));
        }
        if report.average_latency_ms().is_some() != any_connected {
            problems.push("Average latency present iff any region connected violated".to_string());
        }
        self.result.invariant_violations.extend(problems);
    }

    fn violation(&mut self, message: String) {
        self.result.invariant_violations.push(format!(
            "Op #{}: {:?} - {}",
            self.result.total_operations, self.result.last_op, message
        ));
    }

    pub async fn run(&mut self, operations: usize) {
        for _ in 0..operations {
            self.run_single_op().await;
            if !self.result.invariant_violations.is_empty() {
                break;
            }
        }
    }

    pub fn result(&self) -> &AggregationDSTResult {
        &self.result
    }
}

/// Run a batch of DST tests
pub async fn run_aggregation_batch(
    start_seed: u64,
    num_seeds: usize,
    ops_per_seed: usize,
    config_fn: fn(u64) -> AggregationDSTConfig,
) -> Vec<AggregationDSTResult> {
    let mut results = Vec::with_capacity(num_seeds);
    for i in 0..num_seeds {
        let seed = start_seed + i as u64;
        match AggregationDSTHarness::new(config_fn(seed)) {
            Ok(mut harness) => {
                harness.run(ops_per_seed).await;
                results.push(harness.result().clone());
            }
            Err(e) => {
                let mut result = AggregationDSTResult::new(seed);
                result.invariant_violations.push(format!("Harness setup failed: {}", e));
                results.push(result);
            }
        }
    }
    results
}

/// Summarize batch results
pub fn summarize_aggregation_batch(results: &[AggregationDSTResult]) -> String {
    let total = results.len();
    let passed = results.iter().filter(|r| r.is_success()).count();
    let failed = total - passed;
    let total_ops: u64 = results.iter().map(|r| r.total_operations).sum();
    let offline: u64 = results.iter().map(|r| r.offline_observed).sum();

    let mut summary = format!(
        "Aggregation DST Summary\n\
         =======================\n\
         Seeds: {} total, {} passed, {} failed\n\
         Total operations: {}\n\
         Offline snapshots observed: {}\n",
        total, passed, failed, total_ops, offline
    );

    if failed > 0 {
        summary.push_str("\nFailed seeds:\n");
        for result in results.iter().filter(|r| !r.is_success()) {
            summary.push_str(&format!("  Seed {}: {}\n", result.seed, result.summary()));
            for violation in &result.invariant_violations {
                summary.push_str(&format!("    - {}\n", violation));
            }
        }
    }

    summary
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_aggregation_dst_single_seed() {
        let mut harness = AggregationDSTHarness::with_seed(12345).unwrap();
        harness.run(200).await;
        let result = harness.result();
        println!("{}", result.summary());
        assert!(result.is_success(), "Seed 12345 failed: {:?}", result.invariant_violations);
    }

    #[tokio::test(start_paused = true)]
    async fn test_aggregation_dst_counters_only() {
        let mut harness = AggregationDSTHarness::new(AggregationDSTConfig::counters_only(42)).unwrap();
        harness.run(200).await;
        let result = harness.result();
        println!("{}", result.summary());
        assert!(result.is_success(), "{:?}", result.invariant_violations);
    }

    #[tokio::test(start_paused = true)]
    async fn test_same_seed_same_result() {
        let mut first = AggregationDSTHarness::with_seed(7).unwrap();
        let mut second = AggregationDSTHarness::with_seed(7).unwrap();
        first.run(150).await;
        second.run(150).await;
        assert_eq!(first.result().summary(), second.result().summary());
    }
}
