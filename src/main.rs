//! likes-aggregator
//!
//! | Command | Description |
//! |---------|-------------|
//! | stats | One aggregation over all regions, printed as JSON (default) |
//! | health | One health check; exits 1 when degraded |
//! | watch | Aggregate every `poll_interval_ms` until Ctrl+C |
//! | demo | In-process run over three simulated regions, active clients included |
//!
//! Configuration is read by `AggregatorConfig::from_env`.

use likes_aggregator::aggregator::now_ms;
use likes_aggregator::observability::{init_tracing, AggregatorMetrics};
use likes_aggregator::store::{InMemoryCounterStore, SimulatedCounterStore, SimulatedStoreConfig};
use likes_aggregator::{
    redis_clients, ActivityAggregator, ActivitySource, ActivityTracker, AggregateResult,
    Aggregator, AggregatorConfig, HealthMonitor, LikeRecorder, RegionClient, RegionIdentity,
    SimulatedActivitySource,
};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_tracing();

    let command = std::env::args().nth(1).unwrap_or_else(|| "stats".to_string());
    match command.as_str() {
        "stats" => stats().await,
        "health" => health().await,
        "watch" => watch().await,
        "demo" => demo().await,
        other => {
            eprintln!("Unknown command '{}'", other);
            eprintln!("Usage: likes-aggregator [stats|health|watch|demo]");
            std::process::exit(2);
        }
    }
}

async fn stats() -> Result<(), Box<dyn std::error::Error>> {
    let config = AggregatorConfig::from_env()?;
    let aggregator = Aggregator::new(redis_clients(&config))?;

    let result = aggregator.aggregate(config.per_call_timeout()).await;
    print_result(&result)?;
    Ok(())
}

async fn health() -> Result<(), Box<dyn std::error::Error>> {
    let config = AggregatorConfig::from_env()?;
    let monitor = HealthMonitor::new(redis_clients(&config))?;

    let report = monitor.check_health(config.per_call_timeout()).await;
    println!("{}", serde_json::to_string_pretty(&report)?);

    if !report.is_ready() {
        std::process::exit(1);
    }
    Ok(())
}

async fn watch() -> Result<(), Box<dyn std::error::Error>> {
    let config = AggregatorConfig::from_env()?;
    let metrics = Arc::new(AggregatorMetrics::new());
    let aggregator = Aggregator::new(redis_clients(&config))?.with_metrics(metrics.clone());

    let mut interval = tokio::time::interval(config.poll_interval());
    info!(
        "Polling {} regions every {}ms",
        config.regions.len(),
        config.poll_interval_ms
    );

    loop {
        tokio::select! {
            _ = interval.tick() => {
                let result = aggregator.aggregate(config.per_call_timeout()).await;
                if let Err(e) = print_result(&result) {
                    error!("Failed to render stats: {}", e);
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Shutting down");
                break;
            }
        }
    }

    print!("{}", metrics.render_prometheus());
    Ok(())
}

async fn demo() -> Result<(), Box<dyn std::error::Error>> {
    println!("=== Regional Likes Aggregation Demo ===\n");

    let timeout = Duration::from_millis(200);
    let regions = [("br", "Brasil"), ("eu", "Europa"), ("usa", "EUA")];

    let mut stores = Vec::new();
    let mut clients = Vec::new();
    for (seed, (key, name)) in regions.iter().enumerate() {
        let inner = Arc::new(InMemoryCounterStore::new());
        let store = Arc::new(
            SimulatedCounterStore::new(
                inner,
                seed as u64,
                SimulatedStoreConfig::fixed_latency(Duration::from_millis(2 + seed as u64)),
            )
            .with_endpoint(store_endpoint(key)),
        );
        let identity = RegionIdentity::new(*key, *name, store_endpoint(key));
        clients.push(RegionClient::new(identity, store.clone()));
        stores.push(store);
    }

    let metrics = Arc::new(AggregatorMetrics::new());
    let aggregator = Aggregator::new(clients.clone())?.with_metrics(metrics.clone());
    let monitor = HealthMonitor::new(clients.clone())?.with_metrics(metrics.clone());

    println!("--- Scenario 1: Likes recorded in every region ---");
    let trackers: Vec<Arc<ActivityTracker>> =
        regions.iter().map(|_| Arc::new(ActivityTracker::default())).collect();
    let likes_per_region = [42u64, 42, 44];
    for (((client, store), tracker), likes) in
        clients.iter().zip(&stores).zip(&trackers).zip(likes_per_region)
    {
        let recorder = LikeRecorder::new(client.region().clone(), store.clone(), tracker.clone())
            .with_metrics(metrics.clone());
        for n in 0..likes {
            let visitor = format!("{}-visitor-{}", client.region().key(), n % 10);
            recorder
                .record_like(&format!("::ffff:10.0.0.{}", n % 10), "demo", &visitor)
                .await?;
        }
    }
    let result = aggregator.aggregate(timeout).await;
    print_result(&result)?;
    println!("  ✓ Divergence {:?} (expected Some(2))\n", result.divergence());

    println!("--- Scenario 2: One region unreachable ---");
    stores[1].set_offline(true);
    let result = aggregator.aggregate(timeout).await;
    print_result(&result)?;
    println!(
        "  ✓ {} online, {} offline\n",
        result.online_count(),
        result.offline_count()
    );

    println!("--- Scenario 3: One region stalled past the deadline ---");
    stores[1].set_offline(false);
    stores[2].set_stalled(true);
    let started = std::time::Instant::now();
    let result = aggregator.aggregate(timeout).await;
    print_result(&result)?;
    println!(
        "  ✓ Returned after {:?} with {} offline\n",
        started.elapsed(),
        result.offline_count()
    );

    println!("--- Scenario 4: Health check ---");
    let report = monitor.check_health(timeout).await;
    println!("{}", serde_json::to_string_pretty(&report)?);
    println!("  ✓ Status {:?}, HTTP {}\n", report.overall(), report.http_status());

    println!("--- Scenario 5: Active clients across regions ---");
    let sources: Vec<(RegionIdentity, Arc<dyn ActivitySource>)> = clients
        .iter()
        .zip(&trackers)
        .enumerate()
        .map(|(seed, (client, tracker))| {
            let source = SimulatedActivitySource::new(tracker.clone(), seed as u64)
                .with_latency(Duration::from_millis(1));
            if seed == 2 {
                source.set_stalled(true);
            }
            let source: Arc<dyn ActivitySource> = Arc::new(source);
            (client.region().clone(), source)
        })
        .collect();
    let activity = ActivityAggregator::new(sources)?.with_metrics(metrics.clone());
    let listings = activity.aggregate_activity(timeout).await;
    println!("{}", serde_json::to_string_pretty(&listings)?);
    let top = trackers[0].active(now_ms());
    if let Some(client) = top.first() {
        println!("  ✓ Top client in {}: {} with {} likes\n", regions[0].1, client.ip, client.likes);
    }

    println!("\n--- Metrics ---");
    print!("{}", metrics.render_prometheus());

    println!("\n=== Demo completed ===");
    Ok(())
}

fn print_result(result: &AggregateResult) -> Result<(), serde_json::Error> {
    let body = serde_json::json!({
        "stats": result.stats_view(),
        "divergence": result.divergence(),
    });
    println!("{}", serde_json::to_string_pretty(&body)?);
    Ok(())
}

fn store_endpoint(key: &str) -> String {
    format!("simulated-{}", key)
}
