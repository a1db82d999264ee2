//! Regional Counter Store abstraction
//!
//! Each region owns exactly one store: a single authoritative like counter
//! plus an approximate unique-visitor estimator. Only the owning region
//! writes to it; aggregation only reads.
//!
//! Implementations:
//! - `InMemoryCounterStore`: process-local store, also backs `RegionStoreServer`
//! - `RedisCounterStore`: RESP over TCP with pooled connections
//! - `SimulatedCounterStore`: deterministic fault injection for tests

mod hyperloglog;
mod memory;
mod redis;
mod simulated;

pub use hyperloglog::HyperLogLog;
pub use memory::InMemoryCounterStore;
pub use redis::{RedisCounterStore, DEFAULT_IDLE_TIMEOUT};
pub use simulated::{SimulatedCounterStore, SimulatedStoreConfig, SimulatedStoreStats};

use crate::error::StoreResult;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::pin::Pin;

pub type StoreFuture<'a, T> = Pin<Box<dyn Future<Output = StoreResult<T>> + Send + 'a>>;

/// Narrow read/write interface into one region's store.
pub trait CounterStore: Send + Sync + 'static {
    /// Current like counter (a never-written counter reads as 0)
    fn counter(&self) -> StoreFuture<'_, u64>;

    /// Approximate number of distinct visitors
    fn unique_estimate(&self) -> StoreFuture<'_, u64>;

    /// Trivial round trip used for liveness checks
    fn ping(&self) -> StoreFuture<'_, ()>;

    /// Increment the counter, returning the new value
    fn increment(&self) -> StoreFuture<'_, u64>;

    /// Add a visitor to the estimator; true if the estimate changed
    fn add_visitor<'a>(&'a self, visitor_id: &'a str) -> StoreFuture<'a, bool>;

    /// Open whatever transport the next call needs, so timing a call does
    /// not include connection setup. Stores without a transport do nothing.
    fn connect(&self) -> StoreFuture<'_, ()> {
        Box::pin(async { Ok(()) })
    }

    /// Human readable location of the store, for logs
    fn endpoint(&self) -> &str;
}

/// Keys under which a region keeps its counter and estimator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreKeys {
    pub counter: String,
    pub uniques: String,
}

impl Default for StoreKeys {
    fn default() -> Self {
        StoreKeys {
            counter: "post:1:likes".to_string(),
            uniques: "post:1:uniques".to_string(),
        }
    }
}
