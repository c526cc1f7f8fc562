//! Background flush loop for deferred (late-commit) mode.
//!
//! The loop wakes on a cache notification or on a periodic nudge when work
//! is pending, waits out a short debounce so bursts of commits share one
//! batch, then flushes. Failures are logged and retried on the next wake-up.

use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::cache::CiphertextCache;
use crate::flush::Flusher;
use crate::shutdown::ShutdownController;

pub struct FlushScheduler {
    cache: Arc<CiphertextCache>,
    flusher: Arc<Flusher>,
    debounce: Duration,
    nudge_interval: Duration,
}

impl FlushScheduler {
    pub fn new(
        cache: Arc<CiphertextCache>,
        flusher: Arc<Flusher>,
        debounce: Duration,
        nudge_interval: Duration,
    ) -> Self {
        Self {
            cache,
            flusher,
            debounce,
            nudge_interval,
        }
    }

    /// Spawn the loop on the current runtime. It exits when `shutdown` fires.
    pub fn spawn(self, shutdown: &ShutdownController) -> JoinHandle<()> {
        let mut shutdown_rx = shutdown.subscribe();
        tokio::spawn(async move {
            let mut nudge = tokio::time::interval(self.nudge_interval);
            nudge.set_missed_tick_behavior(MissedTickBehavior::Delay);
            info!(
                debounce_ms = self.debounce.as_millis() as u64,
                nudge_ms = self.nudge_interval.as_millis() as u64,
                "flush scheduler started"
            );

            loop {
                tokio::select! {
                    biased;
                    _ = shutdown_rx.recv() => {
                        info!("flush scheduler shutting down");
                        break;
                    }
                    _ = self.cache.work_available() => {}
                    _ = nudge.tick() => {
                        if !self.cache.has_pending().await {
                            continue;
                        }
                        debug!("nudge found pending work");
                    }
                }

                tokio::select! {
                    biased;
                    _ = shutdown_rx.recv() => {
                        info!("flush scheduler shutting down");
                        break;
                    }
                    _ = tokio::time::sleep(self.debounce) => {}
                }

                // Commits that landed during the debounce are in this batch.
                self.cache.take_work_signal().await;

                match self.flusher.process_pending().await {
                    Ok(outcome) => {
                        if outcome.computations > 0 {
                            debug!(
                                computations = outcome.computations,
                                results = outcome.results,
                                "background flush done"
                            );
                        }
                        if !outcome.unsatisfied.is_empty() {
                            warn!(
                                held_back = outcome.unsatisfied.len(),
                                "pending computations wait for missing operands"
                            );
                        }
                    }
                    Err(e) => {
                        warn!(error = %e, "background flush failed, will retry");
                    }
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::GcPolicy;
    use crate::metrics::CoprocMetrics;
    use veil_nullables::{NullChainStorage, NullExecutor};
    use veil_types::{Address, Computation, FheOperation, Handle, Operand};

    fn setup(
        executor: Arc<NullExecutor>,
        nudge: Duration,
    ) -> (Arc<CiphertextCache>, FlushScheduler) {
        let metrics = Arc::new(CoprocMetrics::new());
        let cache = Arc::new(CiphertextCache::new(
            Address::from_low_u64(0x70),
            GcPolicy::default(),
            metrics.clone(),
        ));
        let flusher = Arc::new(Flusher::new(
            cache.clone(),
            executor,
            Duration::from_secs(1),
            metrics,
        ));
        let scheduler =
            FlushScheduler::new(cache.clone(), flusher, Duration::from_millis(10), nudge);
        (cache, scheduler)
    }

    fn work(seed: u8) -> Computation {
        let mut c = Computation::new(
            FheOperation::Not,
            Handle::new([seed; 32]),
            vec![Operand::Ciphertext {
                handle: Handle::new([seed.wrapping_add(1); 32]),
                ciphertext: Some(vec![1]),
            }],
        );
        c.target_block = 3;
        c
    }

    async fn wait_until_drained(cache: &CiphertextCache) {
        for _ in 0..200 {
            if !cache.has_pending().await {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("pending work was never flushed");
    }

    #[tokio::test]
    async fn notification_triggers_flush() {
        let executor = Arc::new(NullExecutor::new());
        let (cache, scheduler) = setup(executor.clone(), Duration::from_secs(3600));
        let shutdown = ShutdownController::new();
        let task = scheduler.spawn(&shutdown);

        cache
            .enqueue_batch(vec![work(1), work(3)], &NullChainStorage::new())
            .await
            .unwrap();
        cache.notify_work_available();
        wait_until_drained(&cache).await;
        assert_eq!(executor.call_count(), 1);

        shutdown.shutdown();
        task.await.unwrap();
    }

    #[tokio::test]
    async fn nudge_retries_after_failure() {
        let executor = Arc::new(NullExecutor::new());
        executor.fail_next_transport();
        let (cache, scheduler) = setup(executor.clone(), Duration::from_millis(20));
        let shutdown = ShutdownController::new();
        let task = scheduler.spawn(&shutdown);

        cache
            .enqueue_batch(vec![work(1)], &NullChainStorage::new())
            .await
            .unwrap();
        cache.notify_work_available();
        wait_until_drained(&cache).await;
        assert!(executor.call_count() >= 2);

        shutdown.shutdown();
        task.await.unwrap();
    }

    #[tokio::test]
    async fn burst_leaves_no_stored_wakeup() {
        let executor = Arc::new(NullExecutor::new());
        let (cache, scheduler) = setup(executor.clone(), Duration::from_secs(3600));
        let shutdown = ShutdownController::new();
        let task = scheduler.spawn(&shutdown);

        for seed in [1, 3, 5] {
            cache
                .enqueue_batch(vec![work(seed)], &NullChainStorage::new())
                .await
                .unwrap();
            cache.notify_work_available();
        }
        wait_until_drained(&cache).await;

        assert_eq!(executor.call_count(), 1);
        assert!(!cache.take_work_signal().await);

        shutdown.shutdown();
        task.await.unwrap();
    }

    #[tokio::test]
    async fn stops_on_shutdown() {
        let (_cache, scheduler) = setup(Arc::new(NullExecutor::new()), Duration::from_secs(1));
        let shutdown = ShutdownController::new();
        let task = scheduler.spawn(&shutdown);
        shutdown.shutdown();
        tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .expect("scheduler did not stop")
            .unwrap();
    }
}
