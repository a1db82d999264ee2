//! Cross-region active-client listings over simulated regions.
//!
//! Three regions (br, eu, usa), each with its own activity table behind a
//! `SimulatedActivitySource`: all online, one refused, one stalled past the
//! deadline.

use likes_aggregator::aggregator::now_ms;
use likes_aggregator::observability::AggregatorMetrics;
use likes_aggregator::{
    ActivityAggregator, ActivitySource, ActivityTracker, OfflineCause, RegionIdentity,
    SimulatedActivitySource,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

const TIMEOUT: Duration = Duration::from_millis(100);

struct Cluster {
    sources: Vec<Arc<SimulatedActivitySource>>,
    aggregator: ActivityAggregator,
}

fn cluster(clients_per_region: [usize; 3]) -> Cluster {
    let regions = [("br", "Brasil"), ("eu", "Europa"), ("usa", "EUA")];
    let now = now_ms();
    let mut sources = Vec::new();
    let mut entries: Vec<(RegionIdentity, Arc<dyn ActivitySource>)> = Vec::new();

    for (i, ((key, name), clients)) in regions.iter().zip(clients_per_region).enumerate() {
        let tracker = Arc::new(ActivityTracker::default());
        for n in 0..clients {
            // Client n likes n + 1 times
            for _ in 0..=n {
                tracker.record(&format!("::ffff:10.{}.0.{}", i, n), "test", now).unwrap();
            }
        }
        let source = Arc::new(
            SimulatedActivitySource::new(tracker, i as u64).with_latency(Duration::from_millis(2)),
        );
        let identity = RegionIdentity::new(*key, *name, format!("api-{}:3000", key));
        let dyn_source: Arc<dyn ActivitySource> = source.clone();
        entries.push((identity, dyn_source));
        sources.push(source);
    }

    Cluster {
        sources,
        aggregator: ActivityAggregator::new(entries).unwrap(),
    }
}

#[tokio::test(start_paused = true)]
async fn test_all_regions_listed() {
    let cluster = cluster([3, 1, 2]);

    let listings = cluster.aggregator.aggregate_activity(TIMEOUT).await;
    assert_eq!(listings.len(), 3);

    let br = &listings["br"];
    assert!(!br.offline);
    assert_eq!(br.region, "Brasil");
    assert_eq!(br.total_active_ips, 3);
    assert_eq!(br.ips[0].ip, "10.0.0.2");
    assert_eq!(br.ips[0].likes, 3);
    assert_eq!(listings["eu"].total_active_ips, 1);
    assert_eq!(listings["usa"].total_active_ips, 2);
}

#[tokio::test(start_paused = true)]
async fn test_offline_region_has_empty_listing() {
    let cluster = cluster([2, 2, 2]);
    cluster.sources[1].set_offline(true);

    let listings = cluster.aggregator.aggregate_activity(TIMEOUT).await;
    let eu = &listings["eu"];
    assert!(eu.offline);
    assert_eq!(eu.region, "Europa");
    assert_eq!(eu.total_active_ips, 0);
    assert!(eu.ips.is_empty());
    assert_eq!(eu.offline_cause, Some(OfflineCause::ConnectionFailure));

    assert_eq!(listings["br"].total_active_ips, 2);

    let json = serde_json::to_value(&listings).unwrap();
    assert_eq!(json["eu"]["offline"], true);
    assert_eq!(json["eu"]["totalActiveIps"], 0);
    assert!(json["br"].get("offline").is_none());
}

#[tokio::test(start_paused = true)]
async fn test_stalled_region_bounded_by_deadline() {
    let cluster = cluster([1, 1, 1]);
    cluster.sources[2].set_stalled(true);

    let started = Instant::now();
    let listings = cluster.aggregator.aggregate_activity(TIMEOUT).await;
    assert!(started.elapsed() <= TIMEOUT + Duration::from_millis(60));

    let usa = &listings["usa"];
    assert!(usa.offline);
    assert_eq!(usa.offline_cause, Some(OfflineCause::Timeout));
    assert_eq!(listings.values().filter(|l| !l.offline).count(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_latency_recorded() {
    let metrics = Arc::new(AggregatorMetrics::new());
    let cluster = cluster([1, 0, 0]);
    let aggregator = cluster.aggregator.with_metrics(metrics.clone());

    aggregator.aggregate_activity(TIMEOUT).await;
    assert_eq!(metrics.latency_count("active_clients"), 1);
}

#[test]
fn test_repeated_region_key_rejected() {
    let tracker: Arc<dyn ActivitySource> = Arc::new(ActivityTracker::default());
    let region = RegionIdentity::new("br", "Brasil", "api-br:3000");

    let result = ActivityAggregator::new(vec![
        (region.clone(), tracker.clone()),
        (region, tracker),
    ]);
    assert!(result.is_err());
}
