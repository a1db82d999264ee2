//! Health monitoring
//!
//! Same fan-out as aggregation, but each region answers a PING instead of
//! its counters. Unlike aggregation this is all-or-nothing: one disconnected
//! region degrades the whole report.

use crate::aggregator::now_ms;
use crate::client::RegionClient;
use crate::config::ConfigError;
use crate::fanout::{distinct_regions, fan_out};
use crate::observability::{MetricsSink, NoopMetrics};
use crate::region::RegionIdentity;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{info, warn};

/// Outcome of one liveness round trip.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LatencyProbe {
    connected: bool,
    latency_ms: Option<f64>,
}

impl LatencyProbe {
    pub fn connected(latency_ms: f64) -> Self {
        LatencyProbe {
            connected: true,
            latency_ms: Some(latency_ms.max(0.0)),
        }
    }

    pub fn disconnected() -> Self {
        LatencyProbe {
            connected: false,
            latency_ms: None,
        }
    }

    pub fn is_connected(&self) -> bool {
        self.connected
    }

    pub fn latency_ms(&self) -> Option<f64> {
        self.latency_ms
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Ok,
    Degraded,
}

impl HealthStatus {
    /// Status code a presentation layer should answer with
    pub fn http_status(&self) -> u16 {
        match self {
            HealthStatus::Ok => 200,
            HealthStatus::Degraded => 503,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RegionHealth {
    pub name: String,
    pub host: String,
    pub connected: bool,
    #[serde(rename = "latency")]
    pub latency_ms: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthReport {
    #[serde(rename = "status")]
    overall: HealthStatus,
    #[serde(rename = "timestamp")]
    timestamp_ms: u64,
    #[serde(rename = "regions")]
    per_region: BTreeMap<String, RegionHealth>,
    #[serde(rename = "averageLatency")]
    average_latency_ms: Option<f64>,
}

impl HealthReport {
    pub fn from_probes(
        probes: impl IntoIterator<Item = (RegionIdentity, LatencyProbe)>,
        timestamp_ms: u64,
    ) -> Self {
        let mut per_region = BTreeMap::new();
        let mut latencies = Vec::new();
        let mut all_connected = true;

        for (region, probe) in probes {
            match probe.latency_ms() {
                Some(latency) if probe.is_connected() => latencies.push(latency),
                _ => all_connected = false,
            }
            per_region.insert(
                region.key().to_string(),
                RegionHealth {
                    name: region.display_name().to_string(),
                    host: region.endpoint().to_string(),
                    connected: probe.is_connected(),
                    latency_ms: probe.latency_ms(),
                },
            );
        }

        let average_latency_ms = if latencies.is_empty() {
            None
        } else {
            Some(latencies.iter().sum::<f64>() / latencies.len() as f64)
        };

        HealthReport {
            overall: if all_connected {
                HealthStatus::Ok
            } else {
                HealthStatus::Degraded
            },
            timestamp_ms,
            per_region,
            average_latency_ms,
        }
    }

    pub fn overall(&self) -> HealthStatus {
        self.overall
    }

    /// Readiness: every region answered.
    pub fn is_ready(&self) -> bool {
        self.overall == HealthStatus::Ok
    }

    pub fn http_status(&self) -> u16 {
        self.overall.http_status()
    }

    pub fn per_region(&self) -> &BTreeMap<String, RegionHealth> {
        &self.per_region
    }

    pub fn region(&self, key: &str) -> Option<&RegionHealth> {
        self.per_region.get(key)
    }

    pub fn average_latency_ms(&self) -> Option<f64> {
        self.average_latency_ms
    }

    pub fn timestamp_ms(&self) -> u64 {
        self.timestamp_ms
    }
}

pub struct HealthMonitor {
    clients: Vec<Arc<RegionClient>>,
    metrics: Arc<dyn MetricsSink>,
}

impl HealthMonitor {
    /// Fails if two clients share a region key.
    pub fn new(clients: Vec<RegionClient>) -> Result<Self, ConfigError> {
        Ok(HealthMonitor {
            clients: distinct_regions(clients, |c| c.region().key())?,
            metrics: Arc::new(NoopMetrics),
        })
    }

    pub fn with_metrics(mut self, metrics: Arc<dyn MetricsSink>) -> Self {
        self.metrics = metrics;
        self
    }

    pub async fn check_health(&self, per_call_timeout: Duration) -> HealthReport {
        let started = Instant::now();

        let fan = fan_out(&self.clients, per_call_timeout, move |client| async move {
            client.fetch_latency(per_call_timeout).await
        })
        .await;

        let probes = self
            .clients
            .iter()
            .zip(fan.results)
            .map(|(client, probe)| {
                (
                    client.region().clone(),
                    probe.unwrap_or_else(LatencyProbe::disconnected),
                )
            });
        let report = HealthReport::from_probes(probes, now_ms());

        self.metrics
            .observe_latency("health", started.elapsed().as_secs_f64() * 1000.0);
        for (key, region) in report.per_region() {
            self.metrics.record_region_state(key, region.connected);
        }

        match report.overall() {
            HealthStatus::Ok => info!(
                "Health ok, average latency {:.1}ms",
                report.average_latency_ms().unwrap_or_default()
            ),
            HealthStatus::Degraded => {
                let down: Vec<&str> = report
                    .per_region()
                    .iter()
                    .filter(|(_, r)| !r.connected)
                    .map(|(k, _)| k.as_str())
                    .collect();
                warn!("Health degraded, disconnected regions: {:?}", down);
            }
        }

        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn region(key: &str) -> RegionIdentity {
        RegionIdentity::new(key, key.to_uppercase(), format!("redis-{}:6379", key))
    }

    #[test]
    fn test_degraded_when_any_region_disconnected() {
        let report = HealthReport::from_probes(
            vec![
                (region("br"), LatencyProbe::connected(5.0)),
                (region("eu"), LatencyProbe::disconnected()),
                (region("usa"), LatencyProbe::connected(7.0)),
            ],
            0,
        );
        assert_eq!(report.overall(), HealthStatus::Degraded);
        assert_eq!(report.http_status(), 503);
        assert_eq!(report.average_latency_ms(), Some(6.0));
        assert!(!report.region("eu").unwrap().connected);
    }

    #[test]
    fn test_ok_when_all_connected() {
        let report = HealthReport::from_probes(
            vec![
                (region("br"), LatencyProbe::connected(1.0)),
                (region("eu"), LatencyProbe::connected(3.0)),
            ],
            0,
        );
        assert!(report.is_ready());
        assert_eq!(report.http_status(), 200);
        assert_eq!(report.average_latency_ms(), Some(2.0));
    }

    #[test]
    fn test_no_average_when_nothing_connected() {
        let report = HealthReport::from_probes(vec![(region("br"), LatencyProbe::disconnected())], 0);
        assert_eq!(report.average_latency_ms(), None);
        assert_eq!(report.overall(), HealthStatus::Degraded);
    }

    #[test]
    fn test_monitor_rejects_duplicate_key() {
        let store = Arc::new(crate::store::InMemoryCounterStore::new());
        let clients = vec![
            RegionClient::new(region("eu"), store.clone()),
            RegionClient::new(region("eu"), store),
        ];
        assert!(matches!(
            HealthMonitor::new(clients),
            Err(ConfigError::Invalid(_))
        ));
    }

    #[test]
    fn test_report_serialization() {
        let report = HealthReport::from_probes(vec![(region("br"), LatencyProbe::connected(4.0))], 17);
        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["status"], "ok");
        assert_eq!(json["timestamp"], 17);
        assert_eq!(json["regions"]["br"]["name"], "BR");
        assert_eq!(json["regions"]["br"]["latency"], 4.0);
        assert_eq!(json["averageLatency"], 4.0);
    }
}
