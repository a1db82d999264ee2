//! Aggregation Deterministic Simulation Tests
//!
//! Seeded sweeps of the aggregation harness: every aggregate and health
//! report is checked against shadow per-region state while regions are
//! forced offline, stalled past the deadline and faulted at random.

use likes_aggregator::aggregator_dst::{
    run_aggregation_batch, summarize_aggregation_batch, AggregationDSTConfig,
};

// =============================================================================
// Standard Configuration Tests - 50 Seeds
// =============================================================================

#[tokio::test(start_paused = true)]
async fn test_aggregation_dst_50_seeds_standard() {
    let results = run_aggregation_batch(0, 50, 200, AggregationDSTConfig::new).await;
    let summary = summarize_aggregation_batch(&results);
    println!("{}", summary);

    let passed = results.iter().filter(|r| r.is_success()).count();
    assert_eq!(passed, 50, "All 50 seeds should pass with standard config");
}

#[tokio::test(start_paused = true)]
async fn test_aggregation_dst_50_seeds_counters_only() {
    let results = run_aggregation_batch(1000, 50, 200, AggregationDSTConfig::counters_only).await;
    let summary = summarize_aggregation_batch(&results);
    println!("{}", summary);

    let passed = results.iter().filter(|r| r.is_success()).count();
    assert_eq!(passed, 50, "All 50 seeds should pass without unique estimation");
}

#[tokio::test(start_paused = true)]
async fn test_aggregation_dst_50_seeds_wide() {
    let results = run_aggregation_batch(2000, 50, 200, AggregationDSTConfig::wide).await;
    let summary = summarize_aggregation_batch(&results);
    println!("{}", summary);

    let passed = results.iter().filter(|r| r.is_success()).count();
    assert_eq!(passed, 50, "All 50 seeds should pass with eight regions");
}

// =============================================================================
// Chaos Tests
// =============================================================================

#[tokio::test(start_paused = true)]
async fn test_aggregation_dst_50_seeds_chaotic() {
    let results = run_aggregation_batch(3000, 50, 200, AggregationDSTConfig::chaotic).await;
    let summary = summarize_aggregation_batch(&results);
    println!("{}", summary);

    let passed = results.iter().filter(|r| r.is_success()).count();
    assert_eq!(passed, 50, "All 50 seeds should pass under random store faults");

    let offline: u64 = results.iter().map(|r| r.offline_observed).sum();
    assert!(offline > 0, "Chaos config should produce offline regions");
}

#[tokio::test(start_paused = true)]
async fn test_aggregation_dst_stress_500_ops() {
    let results = run_aggregation_batch(9000, 10, 500, AggregationDSTConfig::chaotic).await;
    let summary = summarize_aggregation_batch(&results);
    println!("{}", summary);

    for result in &results {
        assert!(
            result.is_success(),
            "Seed {} failed: {:?}",
            result.seed,
            result.invariant_violations
        );
    }
}
