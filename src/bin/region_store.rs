//! Region store
//!
//! Serves one region's like counter and unique estimator over RESP, so a
//! region can run without an external Redis.
//!
//! | Variable | Default | Description |
//! |----------|---------|-------------|
//! | REGION_STORE_ADDR | 0.0.0.0:6379 | Listen address |
//! | REGION_NAME | local | Region name, for logs |
//! | COUNTER_KEY | post:1:likes | Counter key |
//! | UNIQUES_KEY | post:1:uniques | Estimator key |

#[cfg(not(target_env = "msvc"))]
use tikv_jemallocator::Jemalloc;

#[cfg(not(target_env = "msvc"))]
#[global_allocator]
static GLOBAL: Jemalloc = Jemalloc;

use likes_aggregator::observability::init_tracing;
use likes_aggregator::redis::RegionStoreServer;
use likes_aggregator::{InMemoryCounterStore, RegionStoreConfig};
use std::sync::Arc;
use tokio::signal;
use tracing::info;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_tracing();

    let config = RegionStoreConfig::from_env();
    let store = Arc::new(InMemoryCounterStore::new());
    let server = RegionStoreServer::bind(&config.listen_addr, store.clone(), config.keys.clone()).await?;

    info!(
        region = config.region_name.as_str(),
        "Region store serving '{}' and '{}' on {}",
        config.keys.counter,
        config.keys.uniques,
        server.local_addr()?
    );

    tokio::select! {
        _ = server.run() => {}
        _ = signal::ctrl_c() => {
            info!(
                region = config.region_name.as_str(),
                "Shutting down with {} likes, ~{} uniques",
                store.value(),
                store.unique_count()
            );
        }
    }

    Ok(())
}
