//! Per-client like activity for one region.
//!
//! Owned by whoever serves likes and passed in explicitly; there is no
//! process-wide table. Entries expire after the activity window and the
//! table is bounded, evicting the least recently seen client when full.
//! Each client may also be held to a fixed-window rate limit.

use crate::error::RateLimited;
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::HashMap;
use std::time::Duration;
use tracing::debug;

pub const ACTIVITY_WINDOW_DEFAULT: Duration = Duration::from_secs(5 * 60);
pub const CLIENTS_MAX_DEFAULT: usize = 10_000;
pub const RATE_LIMIT_LIKES_DEFAULT: u64 = 20;
pub const RATE_LIMIT_WINDOW_DEFAULT: Duration = Duration::from_secs(60);

const IPV4_MAPPED_PREFIX: &str = "::ffff:";

/// At most `max_likes` per client in each `window`, counted from the
/// client's first like in that window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimit {
    pub max_likes: u64,
    pub window: Duration,
}

impl Default for RateLimit {
    fn default() -> Self {
        RateLimit {
            max_likes: RATE_LIMIT_LIKES_DEFAULT,
            window: RATE_LIMIT_WINDOW_DEFAULT,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ActivityConfig {
    pub window: Duration,
    pub clients_max: usize,
    /// `None` disables rate limiting
    pub rate_limit: Option<RateLimit>,
}

impl Default for ActivityConfig {
    fn default() -> Self {
        ActivityConfig {
            window: ACTIVITY_WINDOW_DEFAULT,
            clients_max: CLIENTS_MAX_DEFAULT,
            rate_limit: Some(RateLimit::default()),
        }
    }
}

#[derive(Debug, Clone)]
struct ClientActivity {
    likes: u64,
    last_seen_ms: u64,
    user_agent: String,
    window_started_ms: u64,
    window_likes: u64,
}

/// One row of the active-clients listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ActiveClient {
    pub ip: String,
    pub likes: u64,
    pub last_seen_ms: u64,
    pub user_agent: String,
}

#[derive(Debug)]
pub struct ActivityTracker {
    config: ActivityConfig,
    clients: Mutex<HashMap<String, ClientActivity>>,
}

impl ActivityTracker {
    pub fn new(config: ActivityConfig) -> Self {
        debug_assert!(config.clients_max > 0, "clients_max must be positive");
        ActivityTracker {
            config,
            clients: Mutex::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> ActivityConfig {
        self.config
    }

    /// Count one like from `client_ip`; returns that client's running total.
    ///
    /// A like over the rate limit is rejected and leaves the entry as it was.
    pub fn record(
        &self,
        client_ip: &str,
        user_agent: &str,
        now_ms: u64,
    ) -> Result<u64, RateLimited> {
        let mut clients = self.clients.lock();

        if let (Some(limit), Some(entry)) = (self.config.rate_limit, clients.get_mut(client_ip)) {
            let window_ms = limit.window.as_millis() as u64;
            if now_ms.saturating_sub(entry.window_started_ms) >= window_ms {
                entry.window_started_ms = now_ms;
                entry.window_likes = 0;
            }
            if entry.window_likes >= limit.max_likes {
                let retry_after_ms = (entry.window_started_ms + window_ms).saturating_sub(now_ms);
                debug!(client = client_ip, "Rate limited, retry in {}ms", retry_after_ms);
                return Err(RateLimited {
                    max_likes: limit.max_likes,
                    retry_after_ms,
                });
            }
        }

        if !clients.contains_key(client_ip) && clients.len() >= self.config.clients_max {
            Self::evict_oldest(&mut clients);
        }

        let entry = clients
            .entry(client_ip.to_string())
            .or_insert_with(|| ClientActivity {
                likes: 0,
                last_seen_ms: now_ms,
                user_agent: String::new(),
                window_started_ms: now_ms,
                window_likes: 0,
            });
        entry.likes += 1;
        entry.window_likes += 1;
        entry.last_seen_ms = entry.last_seen_ms.max(now_ms);
        entry.user_agent.clear();
        entry.user_agent.push_str(user_agent);
        Ok(entry.likes)
    }

    /// Clients seen within the window, most likes first.
    pub fn active(&self, now_ms: u64) -> Vec<ActiveClient> {
        let window_ms = self.window_ms();
        let clients = self.clients.lock();

        let mut active: Vec<ActiveClient> = clients
            .iter()
            .filter(|(_, activity)| now_ms.saturating_sub(activity.last_seen_ms) < window_ms)
            .map(|(ip, activity)| ActiveClient {
                ip: ip.strip_prefix(IPV4_MAPPED_PREFIX).unwrap_or(ip).to_string(),
                likes: activity.likes,
                last_seen_ms: activity.last_seen_ms,
                user_agent: activity.user_agent.clone(),
            })
            .collect();

        // Ties broken by address so the listing is stable
        active.sort_by(|a, b| b.likes.cmp(&a.likes).then_with(|| a.ip.cmp(&b.ip)));
        active
    }

    /// Drop entries outside the window; returns how many were removed.
    pub fn evict_stale(&self, now_ms: u64) -> usize {
        let window_ms = self.window_ms();
        let mut clients = self.clients.lock();
        let before = clients.len();
        clients.retain(|_, activity| now_ms.saturating_sub(activity.last_seen_ms) < window_ms);
        let evicted = before - clients.len();
        if evicted > 0 {
            debug!("Evicted {} stale clients", evicted);
        }
        evicted
    }

    pub fn len(&self) -> usize {
        self.clients.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.clients.lock().is_empty()
    }

    fn window_ms(&self) -> u64 {
        self.config.window.as_millis() as u64
    }

    fn evict_oldest(clients: &mut HashMap<String, ClientActivity>) {
        let oldest = clients
            .iter()
            .min_by_key(|(_, activity)| activity.last_seen_ms)
            .map(|(ip, _)| ip.clone());
        if let Some(ip) = oldest {
            clients.remove(&ip);
        }
    }
}

impl Default for ActivityTracker {
    fn default() -> Self {
        Self::new(ActivityConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINUTE_MS: u64 = 60_000;

    #[test]
    fn test_active_sorted_by_likes() {
        let tracker = ActivityTracker::default();
        tracker.record("10.0.0.1", "curl", 0).unwrap();
        tracker.record("10.0.0.2", "firefox", 0).unwrap();
        tracker.record("10.0.0.2", "firefox", 1).unwrap();
        assert_eq!(tracker.record("10.0.0.2", "chrome", 2).unwrap(), 3);

        let active = tracker.active(3);
        assert_eq!(active.len(), 2);
        assert_eq!(active[0].ip, "10.0.0.2");
        assert_eq!(active[0].likes, 3);
        assert_eq!(active[0].user_agent, "chrome");
        assert_eq!(active[1].likes, 1);
    }

    #[test]
    fn test_ipv4_mapped_prefix_stripped() {
        let tracker = ActivityTracker::default();
        tracker.record("::ffff:192.168.1.5", "ua", 0).unwrap();
        assert_eq!(tracker.active(0)[0].ip, "192.168.1.5");
    }

    #[test]
    fn test_window_excludes_and_evicts() {
        let tracker = ActivityTracker::default();
        tracker.record("old", "ua", 0).unwrap();
        tracker.record("new", "ua", 4 * MINUTE_MS).unwrap();

        let active = tracker.active(5 * MINUTE_MS);
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].ip, "new");

        assert_eq!(tracker.evict_stale(5 * MINUTE_MS), 1);
        assert_eq!(tracker.len(), 1);
    }

    #[test]
    fn test_rate_limit_per_client_window() {
        let tracker = ActivityTracker::default();
        for n in 0..RATE_LIMIT_LIKES_DEFAULT {
            tracker.record("10.0.0.9", "ua", n).unwrap();
        }

        let err = tracker.record("10.0.0.9", "ua", 30_000).unwrap_err();
        assert_eq!(err.max_likes, 20);
        assert_eq!(err.retry_after_ms, 30_000);
        assert_eq!(tracker.active(30_000)[0].likes, 20);

        // Other clients are unaffected
        assert_eq!(tracker.record("10.0.0.10", "ua", 30_000).unwrap(), 1);

        // A new window opens a minute after the first like
        assert_eq!(tracker.record("10.0.0.9", "ua", MINUTE_MS).unwrap(), 21);
    }

    #[test]
    fn test_rate_limit_disabled() {
        let tracker = ActivityTracker::new(ActivityConfig {
            rate_limit: None,
            ..ActivityConfig::default()
        });
        for n in 0..100 {
            tracker.record("10.0.0.1", "ua", n).unwrap();
        }
        assert_eq!(tracker.active(100)[0].likes, 100);
    }

    #[test]
    fn test_capacity_evicts_least_recently_seen() {
        let tracker = ActivityTracker::new(ActivityConfig {
            clients_max: 2,
            ..ActivityConfig::default()
        });
        tracker.record("a", "ua", 10).unwrap();
        tracker.record("b", "ua", 20).unwrap();
        tracker.record("a", "ua", 30).unwrap();
        tracker.record("c", "ua", 40).unwrap();

        let ips: Vec<String> = tracker.active(40).into_iter().map(|c| c.ip).collect();
        assert_eq!(tracker.len(), 2);
        assert!(ips.contains(&"a".to_string()));
        assert!(ips.contains(&"c".to_string()));
    }
}
