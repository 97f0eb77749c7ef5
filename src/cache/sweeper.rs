//! Background task that actively expires cache entries.

use super::ttl::TtlCache;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Spawn a task that calls [`TtlCache::sweep`] every `interval` until
/// `cancel` fires.
///
/// The first sweep happens one full interval after spawning.
pub fn spawn_sweeper<V>(
    cache: Arc<TtlCache<V>>,
    interval: Duration,
    cancel: CancellationToken,
) -> JoinHandle<()>
where
    V: Clone + Send + 'static,
{
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + interval, interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    let removed = cache.sweep();
                    if removed > 0 {
                        debug!(removed, remaining = cache.len(), "Cache sweep");
                    }
                }
            }
        }

        info!("Cache sweeper stopped");
    })
}
