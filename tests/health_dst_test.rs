//! Aggregator and health monitor scenarios over simulated regions.
//!
//! Fixed-seed scenarios with three regions (br, eu, usa): partial outages,
//! stalls past the deadline, and the metrics each call records.

use likes_aggregator::observability::AggregatorMetrics;
use likes_aggregator::store::{InMemoryCounterStore, SimulatedCounterStore, SimulatedStoreConfig};
use likes_aggregator::{
    Aggregator, HealthMonitor, HealthStatus, OfflineCause, RegionClient, RegionIdentity,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

const TIMEOUT: Duration = Duration::from_millis(100);

struct Cluster {
    stores: Vec<Arc<SimulatedCounterStore>>,
    clients: Vec<RegionClient>,
}

fn cluster(likes: [u64; 3], latencies_ms: [u64; 3]) -> Cluster {
    let regions = [("br", "Brasil"), ("eu", "Europa"), ("usa", "EUA")];
    let mut stores = Vec::new();
    let mut clients = Vec::new();

    for (i, ((key, name), count)) in regions.iter().zip(likes).enumerate() {
        let store = Arc::new(
            SimulatedCounterStore::new(
                Arc::new(InMemoryCounterStore::with_count(count)),
                i as u64,
                SimulatedStoreConfig::fixed_latency(Duration::from_millis(latencies_ms[i])),
            )
            .with_endpoint(format!("redis-{}:6379", key)),
        );
        let identity = RegionIdentity::new(*key, *name, format!("redis-{}:6379", key));
        clients.push(RegionClient::new(identity, store.clone()));
        stores.push(store);
    }

    Cluster { stores, clients }
}

#[tokio::test(start_paused = true)]
async fn test_all_online_divergence() {
    let cluster = cluster([42, 42, 44], [1, 2, 3]);
    let aggregator = Aggregator::new(cluster.clients).unwrap();

    let result = aggregator.aggregate(TIMEOUT).await;
    assert_eq!(result.online_count(), 3);
    assert_eq!(result.divergence(), Some(2));
    assert_eq!(result.snapshot("usa").unwrap().counter_value(), Some(44));
}

#[tokio::test(start_paused = true)]
async fn test_one_region_offline() {
    let cluster = cluster([10, 99, 10], [1, 1, 1]);
    cluster.stores[1].set_offline(true);
    let aggregator = Aggregator::new(cluster.clients).unwrap();

    let result = aggregator.aggregate(TIMEOUT).await;
    assert_eq!(result.divergence(), Some(0));

    let eu = result.snapshot("eu").unwrap();
    assert!(!eu.is_online());
    assert_eq!(eu.counter_value(), None);
    assert_eq!(eu.unique_estimate(), None);
    assert_eq!(
        eu.state().offline_cause(),
        Some(OfflineCause::ConnectionFailure)
    );
}

#[tokio::test(start_paused = true)]
async fn test_all_offline() {
    let cluster = cluster([1, 2, 3], [1, 1, 1]);
    for store in &cluster.stores {
        store.set_offline(true);
    }
    let aggregator = Aggregator::new(cluster.clients).unwrap();

    let result = aggregator.aggregate(TIMEOUT).await;
    assert_eq!(result.snapshots().len(), 3);
    assert_eq!(result.offline_count(), 3);
    assert_eq!(result.divergence(), None);
}

#[tokio::test(start_paused = true)]
async fn test_stalled_region_bounded_by_deadline() {
    let cluster = cluster([5, 5, 5], [1, 1, 1]);
    cluster.stores[2].set_stalled(true);
    let aggregator = Aggregator::new(cluster.clients).unwrap();

    let started = Instant::now();
    let result = aggregator.aggregate(TIMEOUT).await;
    assert!(started.elapsed() <= TIMEOUT + Duration::from_millis(60));

    assert_eq!(result.online_count(), 2);
    assert_eq!(
        result.snapshot("usa").unwrap().state().offline_cause(),
        Some(OfflineCause::Timeout)
    );
    assert_eq!(result.divergence(), Some(0));
}

#[tokio::test(start_paused = true)]
async fn test_back_to_back_aggregates_agree() {
    let cluster = cluster([7, 9, 8], [3, 1, 2]);
    cluster.stores[0].set_offline(true);
    let aggregator = Aggregator::new(cluster.clients).unwrap();

    let first = aggregator.aggregate(TIMEOUT).await;
    let second = aggregator.aggregate(TIMEOUT).await;

    let readings = |r: &likes_aggregator::AggregateResult| {
        r.snapshots()
            .values()
            .map(|s| s.reading())
            .collect::<Vec<_>>()
    };
    assert_eq!(readings(&first), readings(&second));
    assert_eq!(first.divergence(), second.divergence());
}

#[tokio::test(start_paused = true)]
async fn test_health_degraded_with_one_region_down() {
    let cluster = cluster([0, 0, 0], [5, 1, 7]);
    cluster.stores[1].set_offline(true);
    let monitor = HealthMonitor::new(cluster.clients).unwrap();

    let report = monitor.check_health(TIMEOUT).await;
    assert_eq!(report.overall(), HealthStatus::Degraded);
    assert_eq!(report.http_status(), 503);
    assert!(!report.region("eu").unwrap().connected);
    assert!(report.region("br").unwrap().connected);

    // Paused clock: br answers in 5ms, usa in 7ms
    let average = report.average_latency_ms().unwrap();
    assert!((average - 6.0).abs() <= 1.0, "average latency {}", average);
    assert_eq!(report.region("eu").unwrap().latency_ms, None);
}

#[tokio::test(start_paused = true)]
async fn test_repeated_region_key_rejected() {
    let mut cluster = cluster([10, 50, 10], [1, 1, 1]);
    let repeated = cluster.clients[0].clone();
    cluster.clients.push(repeated);

    assert!(Aggregator::new(cluster.clients.clone()).is_err());
    assert!(HealthMonitor::new(cluster.clients).is_err());
}

#[tokio::test(start_paused = true)]
async fn test_health_stalled_region_disconnected() {
    let cluster = cluster([0, 0, 0], [1, 1, 1]);
    cluster.stores[0].set_stalled(true);
    let monitor = HealthMonitor::new(cluster.clients).unwrap();

    let started = Instant::now();
    let report = monitor.check_health(TIMEOUT).await;
    assert!(started.elapsed() <= TIMEOUT + Duration::from_millis(60));
    assert!(!report.is_ready());
    assert_eq!(report.region("br").unwrap().latency_ms, None);
}

#[tokio::test(start_paused = true)]
async fn test_health_ok() {
    let cluster = cluster([0, 0, 0], [1, 1, 1]);
    let monitor = HealthMonitor::new(cluster.clients).unwrap();

    let report = monitor.check_health(TIMEOUT).await;
    assert!(report.is_ready());
    assert_eq!(report.http_status(), 200);
    assert_eq!(report.per_region().len(), 3);
}

#[tokio::test(start_paused = true)]
async fn test_metrics_recorded() {
    let cluster = cluster([3, 1, 2], [1, 1, 1]);
    cluster.stores[2].set_offline(true);
    let metrics = Arc::new(AggregatorMetrics::new());
    let aggregator = Aggregator::new(cluster.clients.clone())
        .unwrap()
        .with_metrics(metrics.clone());
    let monitor = HealthMonitor::new(cluster.clients)
        .unwrap()
        .with_metrics(metrics.clone());

    aggregator.aggregate(TIMEOUT).await;
    monitor.check_health(TIMEOUT).await;

    assert_eq!(metrics.divergence(), 2);
    assert_eq!(metrics.region_online("br"), Some(true));
    assert_eq!(metrics.region_online("usa"), Some(false));
    assert_eq!(metrics.latency_count("stats"), 1);
    assert_eq!(metrics.latency_count("health"), 1);
}
