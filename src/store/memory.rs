use super::{CounterStore, HyperLogLog, StoreFuture};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

/// Process-local regional store.
#[derive(Debug, Default)]
pub struct InMemoryCounterStore {
    likes: AtomicU64,
    uniques: Mutex<HyperLogLog>,
}

impl InMemoryCounterStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store whose counter starts at `likes`.
    pub fn with_count(likes: u64) -> Self {
        InMemoryCounterStore {
            likes: AtomicU64::new(likes),
            uniques: Mutex::new(HyperLogLog::new()),
        }
    }

    pub fn value(&self) -> u64 {
        self.likes.load(Ordering::Acquire)
    }

    pub fn incr(&self) -> u64 {
        self.likes.fetch_add(1, Ordering::AcqRel) + 1
    }

    pub fn add_unique(&self, visitor_id: &str) -> bool {
        self.uniques.lock().add(visitor_id.as_bytes())
    }

    pub fn unique_count(&self) -> u64 {
        self.uniques.lock().count()
    }
}

impl CounterStore for InMemoryCounterStore {
    fn counter(&self) -> StoreFuture<'_, u64> {
        Box::pin(async move { Ok(self.value()) })
    }

    fn unique_estimate(&self) -> StoreFuture<'_, u64> {
        Box::pin(async move { Ok(self.unique_count()) })
    }

    fn ping(&self) -> StoreFuture<'_, ()> {
        Box::pin(async move { Ok(()) })
    }

    fn increment(&self) -> StoreFuture<'_, u64> {
        Box::pin(async move { Ok(self.incr()) })
    }

    fn add_visitor<'a>(&'a self, visitor_id: &'a str) -> StoreFuture<'a, bool> {
        Box::pin(async move { Ok(self.add_unique(visitor_id)) })
    }

    fn endpoint(&self) -> &str {
        "memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_increment_and_read() {
        let store = InMemoryCounterStore::with_count(41);
        assert_eq!(store.increment().await.unwrap(), 42);
        assert_eq!(store.counter().await.unwrap(), 42);
    }

    #[tokio::test]
    async fn test_unique_visitors() {
        let store = InMemoryCounterStore::new();
        assert!(store.add_visitor("a").await.unwrap());
        assert!(!store.add_visitor("a").await.unwrap());
        assert!(store.add_visitor("b").await.unwrap());
        assert_eq!(store.unique_estimate().await.unwrap(), 2);
    }
}
