//! Cross-region view of active clients.
//!
//! Every region exposes its activity listing through an `ActivitySource`.
//! Listings are fetched with the same fan-out as aggregation: each read is
//! bounded by the per-call timeout and a region that fails or misses the
//! deadline is reported offline with an empty listing.

use crate::activity::{ActiveClient, ActivityTracker};
use crate::aggregator::now_ms;
use crate::config::ConfigError;
use crate::error::StoreError;
use crate::fanout::{distinct_regions, fan_out};
use crate::observability::{MetricsSink, NoopMetrics};
use crate::region::{OfflineCause, RegionIdentity};
use crate::store::StoreFuture;
use parking_lot::Mutex;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::Serialize;
use std::collections::BTreeMap;
use std::io::{Error as IoError, ErrorKind};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

const STALL_DURATION: Duration = Duration::from_secs(3600);

/// Read side of one region's activity table.
pub trait ActivitySource: Send + Sync + 'static {
    /// Clients active right now, most likes first
    fn active_clients(&self) -> StoreFuture<'_, Vec<ActiveClient>>;

    fn endpoint(&self) -> &str;
}

impl ActivitySource for ActivityTracker {
    fn active_clients(&self) -> StoreFuture<'_, Vec<ActiveClient>> {
        Box::pin(async move { Ok(self.active(now_ms())) })
    }

    fn endpoint(&self) -> &str {
        "in-process"
    }
}

/// Activity source double: fixed latency, seeded failures, and offline
/// and stall switches.
pub struct SimulatedActivitySource {
    tracker: Arc<ActivityTracker>,
    endpoint: String,
    latency: Duration,
    fail_prob: f64,
    rng: Mutex<ChaCha8Rng>,
    offline: AtomicBool,
    stalled: AtomicBool,
}

impl SimulatedActivitySource {
    pub fn new(tracker: Arc<ActivityTracker>, seed: u64) -> Self {
        SimulatedActivitySource {
            tracker,
            endpoint: format!("simulated-activity:{}", seed),
            latency: Duration::ZERO,
            fail_prob: 0.0,
            rng: Mutex::new(ChaCha8Rng::seed_from_u64(seed)),
            offline: AtomicBool::new(false),
            stalled: AtomicBool::new(false),
        }
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Probability of a listing read failing
    pub fn with_fail_prob(mut self, fail_prob: f64) -> Self {
        self.fail_prob = fail_prob.clamp(0.0, 1.0);
        self
    }

    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::Release);
    }

    pub fn set_stalled(&self, stalled: bool) {
        self.stalled.store(stalled, Ordering::Release);
    }

    pub fn tracker(&self) -> &Arc<ActivityTracker> {
        &self.tracker
    }
}

impl ActivitySource for SimulatedActivitySource {
    fn active_clients(&self) -> StoreFuture<'_, Vec<ActiveClient>> {
        Box::pin(async move {
            if self.offline.load(Ordering::Acquire) {
                return Err(StoreError::Connection(IoError::new(
                    ErrorKind::ConnectionRefused,
                    "simulated activity source offline",
                )));
            }
            if self.stalled.load(Ordering::Acquire) {
                tokio::time::sleep(STALL_DURATION).await;
            }

            let fail = self.rng.lock().gen_bool(self.fail_prob);
            if !self.latency.is_zero() {
                tokio::time::sleep(self.latency).await;
            }
            if fail {
                return Err(StoreError::Connection(IoError::new(
                    ErrorKind::ConnectionReset,
                    "simulated activity read failure",
                )));
            }
            Ok(self.tracker.active(now_ms()))
        })
    }

    fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

/// One region's entry in the cross-region listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RegionActivity {
    /// Display name of the region
    pub region: String,
    pub total_active_ips: usize,
    pub ips: Vec<ActiveClient>,
    #[serde(skip_serializing_if = "is_false")]
    pub offline: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub offline_cause: Option<OfflineCause>,
}

impl RegionActivity {
    pub fn online(region: &RegionIdentity, ips: Vec<ActiveClient>) -> Self {
        RegionActivity {
            region: region.display_name().to_string(),
            total_active_ips: ips.len(),
            ips,
            offline: false,
            offline_cause: None,
        }
    }

    pub fn offline(region: &RegionIdentity, cause: OfflineCause) -> Self {
        RegionActivity {
            region: region.display_name().to_string(),
            total_active_ips: 0,
            ips: Vec::new(),
            offline: true,
            offline_cause: Some(cause),
        }
    }
}

fn is_false(value: &bool) -> bool {
    !*value
}

struct ActivityEndpoint {
    region: RegionIdentity,
    source: Arc<dyn ActivitySource>,
}

impl ActivityEndpoint {
    async fn fetch(&self, deadline: Duration) -> RegionActivity {
        let outcome = match tokio::time::timeout(deadline, self.source.active_clients()).await {
            Ok(listing) => listing,
            Err(_) => Err(StoreError::Timeout {
                operation: "active-clients",
                elapsed_ms: deadline.as_millis() as u64,
            }),
        };

        match outcome {
            Ok(ips) => RegionActivity::online(&self.region, ips),
            Err(e) => {
                let cause = e.cause();
                warn!(
                    region = self.region.key(),
                    endpoint = self.source.endpoint(),
                    ?cause,
                    "Activity listing unavailable: {}", e
                );
                RegionActivity::offline(&self.region, cause)
            }
        }
    }
}

/// Merges every region's active-clients listing.
pub struct ActivityAggregator {
    endpoints: Vec<Arc<ActivityEndpoint>>,
    metrics: Arc<dyn MetricsSink>,
}

impl ActivityAggregator {
    /// Fails if two sources share a region key.
    pub fn new(
        sources: Vec<(RegionIdentity, Arc<dyn ActivitySource>)>,
    ) -> Result<Self, ConfigError> {
        let endpoints: Vec<ActivityEndpoint> = sources
            .into_iter()
            .map(|(region, source)| ActivityEndpoint { region, source })
            .collect();
        Ok(ActivityAggregator {
            endpoints: distinct_regions(endpoints, |e| e.region.key())?,
            metrics: Arc::new(NoopMetrics),
        })
    }

    pub fn with_metrics(mut self, metrics: Arc<dyn MetricsSink>) -> Self {
        self.metrics = metrics;
        self
    }

    /// Fetch every region's listing concurrently, keyed by region key.
    ///
    /// Never fails; every configured region appears in the result.
    pub async fn aggregate_activity(
        &self,
        per_call_timeout: Duration,
    ) -> BTreeMap<String, RegionActivity> {
        let started = Instant::now();

        let fan = fan_out(&self.endpoints, per_call_timeout, move |endpoint| async move {
            endpoint.fetch(per_call_timeout).await
        })
        .await;

        let missing_cause = if fan.deadline_hit {
            OfflineCause::Timeout
        } else {
            OfflineCause::Aborted
        };
        let listings: BTreeMap<String, RegionActivity> = self
            .endpoints
            .iter()
            .zip(fan.results)
            .map(|(endpoint, listing)| {
                let listing = listing
                    .unwrap_or_else(|| RegionActivity::offline(&endpoint.region, missing_cause));
                (endpoint.region.key().to_string(), listing)
            })
            .collect();
        debug_assert_eq!(listings.len(), self.endpoints.len());

        let elapsed_ms = started.elapsed().as_secs_f64() * 1000.0;
        self.metrics.observe_latency("active_clients", elapsed_ms);
        debug!(
            "Active clients: {} regions, {} offline, {:.1}ms",
            listings.len(),
            listings.values().filter(|l| l.offline).count(),
            elapsed_ms
        );
        listings
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn region(key: &str) -> RegionIdentity {
        RegionIdentity::new(key, key.to_uppercase(), format!("api-{}:3000", key))
    }

    #[test]
    fn test_offline_listing_serialization() {
        let json = serde_json::to_value(RegionActivity::offline(&region("eu"), OfflineCause::Timeout))
            .unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "region": "EU",
                "totalActiveIps": 0,
                "ips": [],
                "offline": true,
                "offlineCause": "timeout",
            })
        );

        let json = serde_json::to_value(RegionActivity::online(&region("br"), Vec::new())).unwrap();
        assert!(json.get("offline").is_none());
    }

    #[tokio::test]
    async fn test_tracker_is_a_source() {
        let tracker = ActivityTracker::default();
        tracker.record("::ffff:10.0.0.1", "ua", now_ms()).unwrap();

        let listing = tracker.active_clients().await.unwrap();
        assert_eq!(listing.len(), 1);
        assert_eq!(listing[0].ip, "10.0.0.1");
    }

    #[tokio::test(start_paused = true)]
    async fn test_seeded_failures() {
        let source = SimulatedActivitySource::new(Arc::new(ActivityTracker::default()), 1)
            .with_fail_prob(1.0);
        assert!(source.active_clients().await.is_err());
    }
}
