use crate::config::AggregatorConfig;
use crate::error::{StoreError, StoreResult};
use crate::health::LatencyProbe;
use crate::region::{RegionIdentity, RegionSnapshot};
use crate::store::{CounterStore, RedisCounterStore, StoreFuture};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, warn};

/// Bounded-timeout accessor for one region's counter store.
///
/// Never fails: every connectivity failure, protocol error or deadline
/// overrun becomes an Offline snapshot (or a disconnected probe).
#[derive(Clone)]
pub struct RegionClient {
    region: RegionIdentity,
    store: Arc<dyn CounterStore>,
    uniques_enabled: bool,
}

impl RegionClient {
    pub fn new(region: RegionIdentity, store: Arc<dyn CounterStore>) -> Self {
        RegionClient {
            region,
            store,
            uniques_enabled: true,
        }
    }

    /// When disabled the unique-estimate read is skipped entirely.
    pub fn with_uniques(mut self, enabled: bool) -> Self {
        self.uniques_enabled = enabled;
        self
    }

    pub fn region(&self) -> &RegionIdentity {
        &self.region
    }

    pub fn uniques_enabled(&self) -> bool {
        self.uniques_enabled
    }

    /// Read counter and unique estimate as one logical unit.
    ///
    /// Both reads run concurrently, each bounded by `deadline`. If either
    /// one fails the whole region is Offline; a partial read is discarded.
    pub async fn fetch_snapshot(&self, deadline: Duration) -> RegionSnapshot {
        let started = Instant::now();

        let reading = if self.uniques_enabled {
            let (likes, uniques) = tokio::join!(
                bounded(deadline, "counter", self.store.counter()),
                bounded(deadline, "unique-estimate", self.store.unique_estimate()),
            );
            match (likes, uniques) {
                (Ok(likes), Ok(uniques)) => Ok((likes, Some(uniques))),
                (Ok(_), Err(e)) | (Err(e), Ok(_)) => {
                    debug!(
                        region = self.region.key(),
                        "Discarding partial read: {}", e
                    );
                    Err(e)
                }
                (Err(e), Err(_)) => Err(e),
            }
        } else {
            bounded(deadline, "counter", self.store.counter())
                .await
                .map(|likes| (likes, None))
        };

        match reading {
            Ok((likes, uniques)) => {
                RegionSnapshot::online(self.region.clone(), likes, uniques, elapsed_ms(started))
            }
            Err(e) => {
                let cause = e.cause();
                warn!(
                    region = self.region.key(),
                    endpoint = self.store.endpoint(),
                    ?cause,
                    "Region offline: {}", e
                );
                RegionSnapshot::offline(self.region.clone(), cause)
            }
        }
    }

    /// Single PING round trip, timed.
    ///
    /// The connection is set up first and not counted; setup and PING
    /// share `deadline`.
    pub async fn fetch_latency(&self, deadline: Duration) -> LatencyProbe {
        let started = Instant::now();
        let outcome = match bounded(deadline, "connect", self.store.connect()).await {
            Ok(()) => {
                let pinged = Instant::now();
                let remaining = deadline.saturating_sub(started.elapsed());
                bounded(remaining, "ping", self.store.ping())
                    .await
                    .map(|()| elapsed_ms(pinged))
            }
            Err(e) => Err(e),
        };
        match outcome {
            Ok(latency_ms) => LatencyProbe::connected(latency_ms),
            Err(e) => {
                warn!(
                    region = self.region.key(),
                    endpoint = self.store.endpoint(),
                    cause = ?e.cause(),
                    "Health probe failed: {}", e
                );
                LatencyProbe::disconnected()
            }
        }
    }
}

impl std::fmt::Debug for RegionClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegionClient")
            .field("region", &self.region)
            .field("endpoint", &self.store.endpoint())
            .field("uniques_enabled", &self.uniques_enabled)
            .finish()
    }
}

/// One client per configured region, each backed by its own Redis pool.
pub fn redis_clients(config: &AggregatorConfig) -> Vec<RegionClient> {
    config
        .regions
        .iter()
        .map(|region| {
            let store = RedisCounterStore::new(region.endpoint.clone(), config.store_keys())
                .with_pool_size(config.pool_size)
                .with_connect_timeout(config.connect_timeout())
                .with_idle_timeout(config.idle_timeout());
            RegionClient::new(region.identity(), Arc::new(store)).with_uniques(config.enable_uniques)
        })
        .collect()
}

async fn bounded<T>(
    deadline: Duration,
    operation: &'static str,
    future: StoreFuture<'_, T>,
) -> StoreResult<T> {
    match tokio::time::timeout(deadline, future).await {
        Ok(result) => result,
        Err(_) => Err(StoreError::Timeout {
            operation,
            elapsed_ms: deadline.as_millis() as u64,
        }),
    }
}

fn elapsed_ms(started: Instant) -> f64 {
    started.elapsed().as_secs_f64() * 1000.0
}
