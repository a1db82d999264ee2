//! Simulated Counter Store with Fault Injection
//!
//! Wraps an `InMemoryCounterStore` and injects failures, latency and stalls
//! from a seeded ChaCha RNG, so a failing aggregation run can be replayed
//! from its seed. Reads and pings are faulted; writes pass straight through.

use super::{CounterStore, InMemoryCounterStore, StoreFuture};
use crate::error::StoreError;
use parking_lot::Mutex;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use std::io::{Error as IoError, ErrorKind};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Long enough that only a caller-side timeout can end it
const STALL_DURATION: Duration = Duration::from_secs(3600);

/// Configuration for simulated fault injection
#[derive(Debug, Clone)]
pub struct SimulatedStoreConfig {
    /// Probability of a counter read failing
    pub counter_fail_prob: f64,
    /// Probability of a unique-estimate read failing
    pub unique_fail_prob: f64,
    /// Probability of a ping failing
    pub ping_fail_prob: f64,
    /// Probability of any faulted operation stalling indefinitely
    pub stall_prob: f64,
    /// Simulated latency range in milliseconds (min, max)
    pub latency_range_ms: (u64, u64),
}

impl Default for SimulatedStoreConfig {
    fn default() -> Self {
        SimulatedStoreConfig {
            counter_fail_prob: 0.01,  // 1%
            unique_fail_prob: 0.01,   // 1%
            ping_fail_prob: 0.01,     // 1%
            stall_prob: 0.005,        // 0.5%
            latency_range_ms: (0, 5),
        }
    }
}

impl SimulatedStoreConfig {
    /// High chaos configuration for stress testing
    pub fn high_chaos() -> Self {
        SimulatedStoreConfig {
            counter_fail_prob: 0.2,
            unique_fail_prob: 0.2,
            ping_fail_prob: 0.2,
            stall_prob: 0.1,
            latency_range_ms: (0, 20),
        }
    }

    /// No faults - for baseline testing
    pub fn no_faults() -> Self {
        SimulatedStoreConfig {
            counter_fail_prob: 0.0,
            unique_fail_prob: 0.0,
            ping_fail_prob: 0.0,
            stall_prob: 0.0,
            latency_range_ms: (0, 0),
        }
    }

    /// No faults, every operation takes exactly `latency`
    pub fn fixed_latency(latency: Duration) -> Self {
        let ms = latency.as_millis() as u64;
        SimulatedStoreConfig {
            latency_range_ms: (ms, ms),
            ..Self::no_faults()
        }
    }
}

/// Statistics for fault injection
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SimulatedStoreStats {
    pub counter_reads: u64,
    pub unique_reads: u64,
    pub pings: u64,
    pub injected_failures: u64,
    pub stalls: u64,
}

#[derive(Debug, Clone, Copy)]
enum Operation {
    Counter,
    Unique,
    Ping,
}

#[derive(Debug)]
enum Injection {
    Refuse,
    Stall,
    Fail(Duration),
    Proceed(Duration),
}

struct SimulatedStoreInner {
    rng: ChaCha8Rng,
    stats: SimulatedStoreStats,
}

/// Regional store double with deterministic, seed-driven faults
pub struct SimulatedCounterStore {
    inner: Arc<InMemoryCounterStore>,
    config: SimulatedStoreConfig,
    endpoint: String,
    state: Mutex<SimulatedStoreInner>,
    offline: AtomicBool,
    stalled: AtomicBool,
}

impl SimulatedCounterStore {
    pub fn new(inner: Arc<InMemoryCounterStore>, seed: u64, config: SimulatedStoreConfig) -> Self {
        SimulatedCounterStore {
            inner,
            config,
            endpoint: format!("simulated:{}", seed),
            state: Mutex::new(SimulatedStoreInner {
                rng: ChaCha8Rng::seed_from_u64(seed),
                stats: SimulatedStoreStats::default(),
            }),
            offline: AtomicBool::new(false),
            stalled: AtomicBool::new(false),
        }
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    /// Refuse every read and ping as if the store were unreachable
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::Release);
    }

    /// Make every read and ping hang until the caller gives up
    pub fn set_stalled(&self, stalled: bool) {
        self.stalled.store(stalled, Ordering::Release);
    }

    pub fn inner(&self) -> &Arc<InMemoryCounterStore> {
        &self.inner
    }

    pub fn stats(&self) -> SimulatedStoreStats {
        self.state.lock().stats.clone()
    }

    fn decide(&self, op: Operation) -> Injection {
        let mut state = self.state.lock();
        match op {
            Operation::Counter => state.stats.counter_reads += 1,
            Operation::Unique => state.stats.unique_reads += 1,
            Operation::Ping => state.stats.pings += 1,
        }

        if self.offline.load(Ordering::Acquire) {
            state.stats.injected_failures += 1;
            return Injection::Refuse;
        }

        let stall = self.stalled.load(Ordering::Acquire)
            || state.rng.gen_bool(self.config.stall_prob.clamp(0.0, 1.0));
        if stall {
            state.stats.stalls += 1;
            return Injection::Stall;
        }

        let (min, max) = self.config.latency_range_ms;
        let latency = if max > min {
            Duration::from_millis(state.rng.gen_range(min..=max))
        } else {
            Duration::from_millis(min)
        };

        let fail_prob = match op {
            Operation::Counter => self.config.counter_fail_prob,
            Operation::Unique => self.config.unique_fail_prob,
            Operation::Ping => self.config.ping_fail_prob,
        };
        if state.rng.gen_bool(fail_prob.clamp(0.0, 1.0)) {
            state.stats.injected_failures += 1;
            Injection::Fail(latency)
        } else {
            Injection::Proceed(latency)
        }
    }

    async fn apply(&self, op: Operation) -> Result<(), StoreError> {
        // Decide synchronously so the lock is never held across an await
        let injection = self.decide(op);
        match injection {
            Injection::Refuse => Err(StoreError::Connection(IoError::new(
                ErrorKind::ConnectionRefused,
                "simulated store offline",
            ))),
            Injection::Stall => {
                tokio::time::sleep(STALL_DURATION).await;
                Err(StoreError::Connection(IoError::new(
                    ErrorKind::TimedOut,
                    "simulated stall",
                )))
            }
            Injection::Fail(latency) => {
                sleep_for(latency).await;
                Err(StoreError::Connection(IoError::new(
                    ErrorKind::ConnectionReset,
                    format!("simulated {:?} failure", op),
                )))
            }
            Injection::Proceed(latency) => {
                sleep_for(latency).await;
                Ok(())
            }
        }
    }
}

async fn sleep_for(latency: Duration) {
    if !latency.is_zero() {
        tokio::time::sleep(latency).await;
    }
}

impl std::fmt::Debug for SimulatedCounterStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SimulatedCounterStore")
            .field("endpoint", &self.endpoint)
            .field("config", &self.config)
            .field("offline", &self.offline.load(Ordering::Relaxed))
            .field("stalled", &self.stalled.load(Ordering::Relaxed))
            .finish()
    }
}

impl CounterStore for SimulatedCounterStore {
    fn counter(&self) -> StoreFuture<'_, u64> {
        Box::pin(async move {
            self.apply(Operation::Counter).await?;
            Ok(self.inner.value())
        })
    }

    fn unique_estimate(&self) -> StoreFuture<'_, u64> {
        Box::pin(async move {
            self.apply(Operation::Unique).await?;
            Ok(self.inner.unique_count())
        })
    }

    fn ping(&self) -> StoreFuture<'_, ()> {
        Box::pin(async move { self.apply(Operation::Ping).await })
    }

    fn increment(&self) -> StoreFuture<'_, u64> {
        Box::pin(async move { Ok(self.inner.incr()) })
    }

    fn add_visitor<'a>(&'a self, visitor_id: &'a str) -> StoreFuture<'a, bool> {
        Box::pin(async move { Ok(self.inner.add_unique(visitor_id)) })
    }

    fn endpoint(&self) -> &str {
        &self.endpoint
    }
}
