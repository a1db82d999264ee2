//! Fan-out/fan-in over the region set.
//!
//! One task per region inside a `JoinSet`. The set is joined under a group
//! deadline and dropped on return, which aborts anything still running, so
//! no region task outlives the call that spawned it.

use crate::config::ConfigError;
use std::collections::HashSet;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use tokio::time::Instant;
use tracing::error;

/// Scheduling slack on top of the per-call timeout before stragglers are
/// abandoned.
pub(crate) const JOIN_GRACE: Duration = Duration::from_millis(50);

pub(crate) struct FanOut<T> {
    /// Indexed like the target slice; `None` if the task never reported
    pub results: Vec<Option<T>>,
    /// The group deadline elapsed before every task reported
    pub deadline_hit: bool,
}

/// Wrap each target in an `Arc`, rejecting a region key that appears twice.
///
/// Results are keyed by region, so a repeated key would let one region
/// overwrite another.
pub(crate) fn distinct_regions<C, K>(targets: Vec<C>, key: K) -> Result<Vec<Arc<C>>, ConfigError>
where
    K: Fn(&C) -> &str,
{
    let mut seen = HashSet::new();
    for target in &targets {
        if !seen.insert(key(target).to_string()) {
            return Err(ConfigError::Invalid(format!(
                "duplicate region key '{}'",
                key(target)
            )));
        }
    }
    Ok(targets.into_iter().map(Arc::new).collect())
}

pub(crate) async fn fan_out<C, T, F, Fut>(
    targets: &[Arc<C>],
    per_call_timeout: Duration,
    call: F,
) -> FanOut<T>
where
    C: Send + Sync + 'static,
    T: Send + 'static,
    F: Fn(Arc<C>) -> Fut,
    Fut: Future<Output = T> + Send + 'static,
{
    let deadline = Instant::now() + per_call_timeout + JOIN_GRACE;

    let mut group = JoinSet::new();
    for (index, target) in targets.iter().enumerate() {
        let task = call(Arc::clone(target));
        group.spawn(async move { (index, task.await) });
    }

    let mut results: Vec<Option<T>> = targets.iter().map(|_| None).collect();
    let mut deadline_hit = false;

    loop {
        match tokio::time::timeout_at(deadline, group.join_next()).await {
            Ok(Some(Ok((index, value)))) => results[index] = Some(value),
            Ok(Some(Err(e))) => error!("Region task failed: {}", e),
            Ok(None) => break,
            Err(_) => {
                deadline_hit = true;
                break;
            }
        }
    }

    // Dropping the set aborts stragglers; make it explicit
    group.abort_all();

    FanOut {
        results,
        deadline_hit,
    }
}
