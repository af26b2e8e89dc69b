use std::sync::{Arc, Weak};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};

use super::AgentCache;

/// Background task running [`AgentCache::sweep`] every sweep interval.
///
/// The task holds only a weak reference and exits on its own once the cache
/// is dropped. Dropping the handle signals the task to stop.
pub struct Sweeper {
    shutdown_tx: watch::Sender<bool>,
    handle: Option<JoinHandle<()>>,
}

impl Sweeper {
    /// Spawn the sweep loop onto the current tokio runtime. The first sweep
    /// runs immediately.
    pub fn spawn(cache: &Arc<AgentCache>) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handle = tokio::spawn(run(Arc::downgrade(cache), shutdown_rx));
        Self {
            shutdown_tx,
            handle: Some(handle),
        }
    }

    pub fn is_running(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }

    /// Stop the loop and wait for it to exit.
    pub async fn shutdown(mut self) {
        let _ = self.shutdown_tx.send(true);
        if let Some(handle) = self.handle.take() {
            if let Err(e) = handle.await {
                log::error!("agent cache sweeper ended abnormally: {}", e);
            }
        }
    }
}

impl Drop for Sweeper {
    fn drop(&mut self) {
        let _ = self.shutdown_tx.send(true);
    }
}

async fn run(cache: Weak<AgentCache>, mut shutdown_rx: watch::Receiver<bool>) {
    let period = match cache.upgrade() {
        Some(cache) => cache.config().sweep_interval,
        None => return,
    };
    let mut ticker = interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    log::info!("agent cache sweeper started, interval {:?}", period);

    loop {
        tokio::select! {
            _ = shutdown_rx.changed() => break,
            _ = ticker.tick() => {
                let Some(cache) = cache.upgrade() else {
                    break;
                };
                let report = cache.sweep();
                log::debug!(
                    "sweep: {} evicted, {} busy, {} stale, {} live",
                    report.evicted.len(),
                    report.skipped_busy.len(),
                    report.stale,
                    cache.len()
                );
            }
        }
    }

    log::info!("agent cache sweeper stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agents::EchoAgent;
    use crate::clock::ManualClock;
    use crate::config::CacheConfig;
    use crate::registry::AgentTypeRegistry;
    use crate::storage::InMemoryGateway;
    use crate::types::AgentRecord;
    use serde_json::json;
    use std::time::Duration;

    fn cache_with(clock: Arc<ManualClock>) -> Arc<AgentCache> {
        let registry = Arc::new(AgentTypeRegistry::new());
        registry.register(EchoAgent::TYPE_NAME, EchoAgent);
        let store = Arc::new(InMemoryGateway::new());
        store.insert(
            AgentRecord::new(1)
                .with_conversation(1)
                .with_config(EchoAgent::TYPE_NAME, json!({"name": "e"})),
        );
        let config = CacheConfig {
            sweep_interval: Duration::from_millis(10),
            ..CacheConfig::default()
        };
        Arc::new(AgentCache::with_clock(registry, store, config, clock))
    }

    #[tokio::test]
    async fn test_sweeper_evicts_in_background() {
        let clock = Arc::new(ManualClock::default());
        let cache = cache_with(clock.clone());
        cache.get_or_load(1).await.unwrap();

        let sweeper = Sweeper::spawn(&cache);
        clock.advance(chrono::Duration::hours(2));

        for _ in 0..200 {
            if !cache.contains(1) {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert!(!cache.contains(1));

        sweeper.shutdown().await;
    }

    #[tokio::test]
    async fn test_sweeper_shutdown_stops_task() {
        let cache = cache_with(Arc::new(ManualClock::default()));
        let sweeper = Sweeper::spawn(&cache);
        assert!(sweeper.is_running());
        sweeper.shutdown().await;
    }

    #[tokio::test]
    async fn test_sweeper_exits_when_cache_dropped() {
        let cache = cache_with(Arc::new(ManualClock::default()));
        let sweeper = Sweeper::spawn(&cache);
        drop(cache);

        for _ in 0..200 {
            if !sweeper.is_running() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert!(!sweeper.is_running());
    }
}
