//! Cross-region likes aggregation.
//!
//! Each region keeps its own like counter and unique-visitor estimator. The
//! aggregator reads every region concurrently under a shared deadline and
//! reports per-region snapshots together with the counter divergence; the
//! health monitor probes each region's store with a PING. Active-client
//! listings are merged across regions with the same fan-out.

pub mod activity;
pub mod aggregator;
pub mod aggregator_dst;
pub mod client;
pub mod cluster_activity;
pub mod config;
pub mod error;
mod fanout;
pub mod health;
pub mod likes;
pub mod observability;
pub mod redis;
pub mod region;
pub mod store;

pub use activity::{ActiveClient, ActivityConfig, ActivityTracker, RateLimit};
pub use aggregator::{divergence, AggregateResult, Aggregator, RegionStats, StatValue};
pub use aggregator_dst::{
    run_aggregation_batch, summarize_aggregation_batch, AggregationDSTConfig,
    AggregationDSTHarness, AggregationDSTResult,
};
pub use client::{redis_clients, RegionClient};
pub use cluster_activity::{
    ActivityAggregator, ActivitySource, RegionActivity, SimulatedActivitySource,
};
pub use config::{AggregatorConfig, ConfigError, RegionConfig, RegionStoreConfig};
pub use error::{LikeError, RateLimited, StoreError, StoreResult};
pub use health::{HealthMonitor, HealthReport, HealthStatus, LatencyProbe, RegionHealth};
pub use likes::{LikeReceipt, LikeRecorder};
pub use region::{OfflineCause, RegionIdentity, RegionSnapshot, RegionState};
pub use store::{
    CounterStore, InMemoryCounterStore, RedisCounterStore, SimulatedCounterStore,
    SimulatedStoreConfig, StoreKeys,
};
