//! Regional aggregation
//!
//! Queries every region concurrently, keeps every region in the result
//! (Offline ones included) and measures replica skew as the spread between
//! the highest and lowest Online counter. Stores are never reconciled here;
//! divergence is a point-in-time measurement, not a merge.

use crate::client::RegionClient;
use crate::config::ConfigError;
use crate::fanout::{distinct_regions, fan_out};
use crate::observability::{MetricsSink, NoopMetrics};
use crate::region::{OfflineCause, RegionIdentity, RegionSnapshot};
use serde::ser::{Serialize, Serializer};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};
use tracing::{debug, info};

/// Merged view over all regions for one aggregation call.
#[derive(Debug, Clone, PartialEq)]
pub struct AggregateResult {
    snapshots: BTreeMap<String, RegionSnapshot>,
    divergence: Option<u64>,
    computed_at_ms: u64,
}

impl AggregateResult {
    pub fn from_snapshots(
        snapshots: impl IntoIterator<Item = RegionSnapshot>,
        computed_at_ms: u64,
    ) -> Self {
        let mut queried = 0usize;
        let snapshots: BTreeMap<String, RegionSnapshot> = snapshots
            .into_iter()
            .inspect(|_| queried += 1)
            .map(|s| (s.key().to_string(), s))
            .collect();
        debug_assert_eq!(
            snapshots.len(),
            queried,
            "Invariant violated: two snapshots share a region key"
        );
        let divergence = divergence(snapshots.values());

        let result = AggregateResult {
            snapshots,
            divergence,
            computed_at_ms,
        };
        result.verify_invariants();
        result
    }

    #[cfg(debug_assertions)]
    pub fn verify_invariants(&self) {
        debug_assert_eq!(
            self.divergence.is_some(),
            self.online_count() >= 2,
            "Invariant violated: divergence presence must match online count {}",
            self.online_count()
        );
        for (key, snapshot) in &self.snapshots {
            debug_assert_eq!(key, snapshot.key());
            snapshot.verify_invariants();
        }
    }

    #[cfg(not(debug_assertions))]
    #[inline(always)]
    pub fn verify_invariants(&self) {}

    pub fn snapshots(&self) -> &BTreeMap<String, RegionSnapshot> {
        &self.snapshots
    }

    pub fn snapshot(&self, key: &str) -> Option<&RegionSnapshot> {
        self.snapshots.get(key)
    }

    pub fn divergence(&self) -> Option<u64> {
        self.divergence
    }

    pub fn computed_at_ms(&self) -> u64 {
        self.computed_at_ms
    }

    pub fn online_count(&self) -> usize {
        self.snapshots.values().filter(|s| s.is_online()).count()
    }

    pub fn offline_count(&self) -> usize {
        self.snapshots.len() - self.online_count()
    }

    /// Presentation form: `{"<key>": {"likes": n|"Offline", "uniques": n|"Offline"|"N/A"}}`
    pub fn stats_view(&self) -> BTreeMap<String, RegionStats> {
        self.snapshots
            .iter()
            .map(|(key, snapshot)| (key.clone(), RegionStats::from(snapshot)))
            .collect()
    }
}

/// Spread between the highest and lowest Online counter.
///
/// `None` with fewer than two Online regions. Order independent.
pub fn divergence<'a>(snapshots: impl IntoIterator<Item = &'a RegionSnapshot>) -> Option<u64> {
    let (count, min, max) = snapshots
        .into_iter()
        .filter_map(RegionSnapshot::counter_value)
        .fold((0usize, u64::MAX, 0u64), |(count, min, max), value| {
            (count + 1, min.min(value), max.max(value))
        });

    if count < 2 {
        None
    } else {
        Some(max - min)
    }
}

/// One cell of the stats view.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatValue {
    Count(u64),
    Offline,
    /// Unique estimation switched off for this deployment
    Disabled,
}

impl Serialize for StatValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            StatValue::Count(n) => serializer.serialize_u64(*n),
            StatValue::Offline => serializer.serialize_str("Offline"),
            StatValue::Disabled => serializer.serialize_str("N/A"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub struct RegionStats {
    pub likes: StatValue,
    pub uniques: StatValue,
}

impl From<&RegionSnapshot> for RegionStats {
    fn from(snapshot: &RegionSnapshot) -> Self {
        match snapshot.reading() {
            Some((likes, uniques)) => RegionStats {
                likes: StatValue::Count(likes),
                uniques: uniques.map_or(StatValue::Disabled, StatValue::Count),
            },
            None => RegionStats {
                likes: StatValue::Offline,
                uniques: StatValue::Offline,
            },
        }
    }
}

/// Coordinator over a fixed region set.
pub struct Aggregator {
    clients: Vec<Arc<RegionClient>>,
    metrics: Arc<dyn MetricsSink>,
}

impl Aggregator {
    /// Fails if two clients share a region key.
    pub fn new(clients: Vec<RegionClient>) -> Result<Self, ConfigError> {
        Ok(Aggregator {
            clients: distinct_regions(clients, |c| c.region().key())?,
            metrics: Arc::new(NoopMetrics),
        })
    }

    pub fn with_metrics(mut self, metrics: Arc<dyn MetricsSink>) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn regions(&self) -> impl Iterator<Item = &RegionIdentity> {
        self.clients.iter().map(|c| c.region())
    }

    /// Query every region concurrently and merge the outcomes.
    ///
    /// Never fails and never waits much past `per_call_timeout`; a region
    /// that has not answered by then is Offline. All regions Offline is a
    /// valid result.
    pub async fn aggregate(&self, per_call_timeout: Duration) -> AggregateResult {
        let started = Instant::now();

        let fan = fan_out(&self.clients, per_call_timeout, move |client| async move {
            client.fetch_snapshot(per_call_timeout).await
        })
        .await;

        let missing_cause = if fan.deadline_hit {
            OfflineCause::Timeout
        } else {
            OfflineCause::Aborted
        };
        let snapshots = self
            .clients
            .iter()
            .zip(fan.results)
            .map(|(client, snapshot)| {
                snapshot.unwrap_or_else(|| RegionSnapshot::offline(client.region().clone(), missing_cause))
            });

        let result = AggregateResult::from_snapshots(snapshots, now_ms());
        debug_assert_eq!(
            result.snapshots().len(),
            self.clients.len(),
            "Invariant violated: every queried region must appear in the result"
        );
        self.report(&result, started.elapsed());
        result
    }

    fn report(&self, result: &AggregateResult, elapsed: Duration) {
        let latency_ms = elapsed.as_secs_f64() * 1000.0;

        if result.offline_count() > 0 {
            info!(
                "Stats: {} online, {} offline",
                result.online_count(),
                result.offline_count()
            );
        }
        debug!("Stats operation took {:.1}ms", latency_ms);

        self.metrics.observe_latency("stats", latency_ms);
        for (key, snapshot) in result.snapshots() {
            self.metrics.record_region_state(key, snapshot.is_online());
        }
        if let Some(divergence) = result.divergence() {
            self.metrics.record_divergence(divergence);
            info!("Counter divergence across regions: {}", divergence);
        }
    }
}

/// Wall-clock milliseconds since the Unix epoch.
pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    fn online(key: &str, likes: u64) -> RegionSnapshot {
        RegionSnapshot::online(RegionIdentity::new(key, key, key), likes, Some(0), 1.0)
    }

    fn offline(key: &str) -> RegionSnapshot {
        RegionSnapshot::offline(RegionIdentity::new(key, key, key), OfflineCause::Timeout)
    }

    #[test]
    fn test_divergence_spread() {
        let snapshots = [online("br", 42), online("eu", 42), online("usa", 44)];
        assert_eq!(divergence(&snapshots), Some(2));
    }

    #[test]
    fn test_divergence_requires_two_online() {
        assert_eq!(divergence(&[online("br", 5), offline("eu")]), None);
        assert_eq!(divergence(&[] as &[RegionSnapshot]), None);
        assert_eq!(divergence(&[online("br", 5), online("eu", 5)]), Some(0));
    }

    #[test]
    fn test_divergence_order_independent() {
        let forward = [online("a", 1), online("b", 9), offline("c"), online("d", 4)];
        let mut reversed = forward.clone();
        reversed.reverse();
        assert_eq!(divergence(&forward), divergence(&reversed));
    }

    fn client(key: &str, likes: u64) -> RegionClient {
        let store = Arc::new(crate::store::InMemoryCounterStore::with_count(likes));
        RegionClient::new(RegionIdentity::new(key, key, key), store)
    }

    #[test]
    fn test_duplicate_region_key_rejected() {
        let err = Aggregator::new(vec![client("br", 10), client("br", 50), client("eu", 10)])
            .err()
            .unwrap();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[tokio::test]
    async fn test_every_region_reported() {
        let aggregator =
            Aggregator::new(vec![client("br", 10), client("usa", 50), client("eu", 10)]).unwrap();
        let result = aggregator.aggregate(Duration::from_millis(100)).await;
        assert_eq!(result.snapshots().len(), 3);
        assert_eq!(result.divergence(), Some(40));
    }

    #[test]
    #[cfg(debug_assertions)]
    #[should_panic(expected = "share a region key")]
    fn test_from_snapshots_rejects_shared_key() {
        AggregateResult::from_snapshots(vec![online("br", 1), online("br", 9)], 0);
    }

    #[test]
    fn test_stats_view_serialization() {
        let uniques_off = RegionSnapshot::online(RegionIdentity::new("usa", "EUA", "x"), 3, None, 1.0);
        let result = AggregateResult::from_snapshots(
            vec![online("br", 10), offline("eu"), uniques_off],
            0,
        );

        let json = serde_json::to_value(result.stats_view()).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "br": {"likes": 10, "uniques": 0},
                "eu": {"likes": "Offline", "uniques": "Offline"},
                "usa": {"likes": 3, "uniques": "N/A"},
            })
        );
        assert_eq!(result.divergence(), Some(7));
    }
}
