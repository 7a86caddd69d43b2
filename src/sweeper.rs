//! Periodic full cache sweep
//!
//! Bounds how stale a cached object can get: every `interval` the whole
//! cache is cleared, regardless of capacity pressure. The first sweep fires
//! one full interval after start.
//!
//! The sweeper owns its task. `shutdown` stops it and waits for it; dropping
//! the sweeper without calling `shutdown` aborts the task, so an early
//! return during service startup cannot leak it.

use crate::cache::BoundedCache;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, info};

pub struct CacheSweeper {
    shutdown_tx: broadcast::Sender<()>,
    handle: Option<JoinHandle<()>>,
}

impl CacheSweeper {
    /// Start sweeping `cache` every `interval`. Must be called inside a
    /// Tokio runtime.
    pub fn start(cache: Arc<BoundedCache>, interval: Duration) -> Self {
        let (shutdown_tx, mut shutdown_rx) = broadcast::channel::<()>(1);

        let handle = tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + interval, interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let cleared = cache.clear_all();
                        info!(cleared, "Cache cleared");
                    }
                    _ = shutdown_rx.recv() => {
                        debug!("Cache sweeper shutting down");
                        break;
                    }
                }
            }
        });

        debug!(interval_secs = interval.as_secs_f64(), "Cache sweeper started");

        Self {
            shutdown_tx,
            handle: Some(handle),
        }
    }

    /// Stop the sweep task and wait for it to exit
    pub async fn shutdown(&mut self) {
        if let Some(handle) = self.handle.take() {
            let _ = self.shutdown_tx.send(());
            let _ = handle.await;
        }
    }
}

impl Drop for CacheSweeper {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
            debug!("Cache sweeper dropped, task aborted");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    #[tokio::test]
    async fn test_sweep_clears_cache() {
        let cache = Arc::new(BoundedCache::new(5));
        cache.put("a", Bytes::from_static(b"1"));

        let mut sweeper = CacheSweeper::start(cache.clone(), Duration::from_millis(50));
        assert!(cache.contains("a"));

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(!cache.contains("a"));
        assert!(cache.stats().sweep_count >= 1);

        sweeper.shutdown().await;
        assert!(sweeper.handle.is_none());
    }

    #[tokio::test]
    async fn test_no_sweep_after_shutdown() {
        let cache = Arc::new(BoundedCache::new(5));
        let mut sweeper = CacheSweeper::start(cache.clone(), Duration::from_millis(30));
        sweeper.shutdown().await;

        cache.put("a", Bytes::from_static(b"1"));
        tokio::time::sleep(Duration::from_millis(120)).await;
        assert!(cache.contains("a"));
        assert_eq!(cache.stats().sweep_count, 0);
    }

    #[tokio::test]
    async fn test_drop_aborts_task() {
        let cache = Arc::new(BoundedCache::new(5));
        {
            let _sweeper = CacheSweeper::start(cache.clone(), Duration::from_millis(30));
        }

        cache.put("a", Bytes::from_static(b"1"));
        tokio::time::sleep(Duration::from_millis(120)).await;
        assert!(cache.contains("a"));
    }
}
