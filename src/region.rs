//! Region identities and per-region snapshots
//!
//! A `RegionSnapshot` is the only thing a region client hands back. It can
//! only be built through `online` / `offline`, so an Offline snapshot never
//! carries a counter or unique estimate.

use serde::{Deserialize, Serialize};

/// Immutable identity of one region; the region set is fixed at startup.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RegionIdentity {
    key: String,
    display_name: String,
    endpoint: String,
}

impl RegionIdentity {
    pub fn new(
        key: impl Into<String>,
        display_name: impl Into<String>,
        endpoint: impl Into<String>,
    ) -> Self {
        RegionIdentity {
            key: key.into(),
            display_name: display_name.into(),
            endpoint: endpoint.into(),
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn display_name(&self) -> &str {
        &self.display_name
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

/// Why a region was reported Offline. Kept for logs; the merge only looks
/// at Online vs Offline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OfflineCause {
    /// A read exceeded its deadline
    Timeout,
    /// Store unreachable or connection dropped
    ConnectionFailure,
    /// Store replied with something unusable
    Protocol,
    /// The region's task ended without reporting
    Aborted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "state", content = "cause")]
pub enum RegionState {
    Online,
    Offline(OfflineCause),
}

impl RegionState {
    pub fn is_online(&self) -> bool {
        matches!(self, RegionState::Online)
    }

    pub fn offline_cause(&self) -> Option<OfflineCause> {
        match self {
            RegionState::Online => None,
            RegionState::Offline(cause) => Some(*cause),
        }
    }
}

/// Point-in-time view of one region's store.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RegionSnapshot {
    region: RegionIdentity,
    state: RegionState,
    counter_value: Option<u64>,
    unique_estimate: Option<u64>,
    latency_ms: Option<f64>,
}

impl RegionSnapshot {
    /// `unique_estimate` is `None` only when the unique read is disabled.
    pub fn online(
        region: RegionIdentity,
        counter_value: u64,
        unique_estimate: Option<u64>,
        latency_ms: f64,
    ) -> Self {
        let snapshot = RegionSnapshot {
            region,
            state: RegionState::Online,
            counter_value: Some(counter_value),
            unique_estimate,
            latency_ms: Some(latency_ms.max(0.0)),
        };
        snapshot.verify_invariants();
        snapshot
    }

    pub fn offline(region: RegionIdentity, cause: OfflineCause) -> Self {
        let snapshot = RegionSnapshot {
            region,
            state: RegionState::Offline(cause),
            counter_value: None,
            unique_estimate: None,
            latency_ms: None,
        };
        snapshot.verify_invariants();
        snapshot
    }

    #[cfg(debug_assertions)]
    pub fn verify_invariants(&self) {
        match self.state {
            RegionState::Online => debug_assert!(
                self.counter_value.is_some(),
                "Invariant violated: online region '{}' without counter",
                self.region.key
            ),
            RegionState::Offline(_) => debug_assert!(
                self.counter_value.is_none()
                    && self.unique_estimate.is_none()
                    && self.latency_ms.is_none(),
                "Invariant violated: offline region '{}' carries readings",
                self.region.key
            ),
        }
    }

    #[cfg(not(debug_assertions))]
    #[inline(always)]
    pub fn verify_invariants(&self) {}

    pub fn region(&self) -> &RegionIdentity {
        &self.region
    }

    pub fn key(&self) -> &str {
        self.region.key()
    }

    pub fn state(&self) -> RegionState {
        self.state
    }

    pub fn is_online(&self) -> bool {
        self.state.is_online()
    }

    pub fn counter_value(&self) -> Option<u64> {
        self.counter_value
    }

    pub fn unique_estimate(&self) -> Option<u64> {
        self.unique_estimate
    }

    pub fn latency_ms(&self) -> Option<f64> {
        self.latency_ms
    }

    /// The values read from the store, ignoring timing.
    pub fn reading(&self) -> Option<(u64, Option<u64>)> {
        self.counter_value.map(|c| (c, self.unique_estimate))
    }
}
