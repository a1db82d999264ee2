//! Write path of a region: recording one like into the local store.

use crate::activity::ActivityTracker;
use crate::aggregator::now_ms;
use crate::error::LikeError;
use crate::observability::{MetricsSink, NoopMetrics};
use crate::region::RegionIdentity;
use crate::store::CounterStore;
use serde::Serialize;
use std::sync::Arc;
use tracing::info;

/// What the store looked like right after a like was recorded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LikeReceipt {
    pub likes: u64,
    /// `None` when unique estimation is disabled
    pub uniques: Option<u64>,
    pub new_unique: bool,
}

pub struct LikeRecorder {
    region: RegionIdentity,
    store: Arc<dyn CounterStore>,
    activity: Arc<ActivityTracker>,
    metrics: Arc<dyn MetricsSink>,
    uniques_enabled: bool,
}

impl LikeRecorder {
    pub fn new(
        region: RegionIdentity,
        store: Arc<dyn CounterStore>,
        activity: Arc<ActivityTracker>,
    ) -> Self {
        LikeRecorder {
            region,
            store,
            activity,
            metrics: Arc::new(NoopMetrics),
            uniques_enabled: true,
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<dyn MetricsSink>) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn with_uniques(mut self, enabled: bool) -> Self {
        self.uniques_enabled = enabled;
        self
    }

    pub fn activity(&self) -> &Arc<ActivityTracker> {
        &self.activity
    }

    /// Count one like in this region's store.
    ///
    /// Activity is recorded before touching the store, so a failed write
    /// still shows the client as active. A rate-limited like never reaches
    /// the store.
    pub async fn record_like(
        &self,
        client_ip: &str,
        user_agent: &str,
        visitor_id: &str,
    ) -> Result<LikeReceipt, LikeError> {
        self.activity.record(client_ip, user_agent, now_ms())?;

        let likes = self.store.increment().await?;
        self.metrics.record_like(self.region.key());

        let (uniques, new_unique) = if self.uniques_enabled {
            let added = self.store.add_visitor(visitor_id).await?;
            let estimate = self.store.unique_estimate().await?;
            if added {
                info!(
                    region = self.region.key(),
                    "New unique visitor, estimate now {}", estimate
                );
            }
            (Some(estimate), added)
        } else {
            (None, false)
        };

        info!(
            region = self.region.key(),
            client = client_ip,
            "Like recorded, total {}", likes
        );

        Ok(LikeReceipt {
            likes,
            uniques,
            new_unique,
        })
    }
}
