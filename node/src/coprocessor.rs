//! The coprocessor service object shared by every transaction.
//!
//! A [`Coprocessor`] is constructed once per process, optionally seeded via
//! [`Coprocessor::preload_ciphertexts`], and cloned into whatever needs it.
//! Transactions open a [`Session`] on it; in deferred mode a background
//! [`FlushScheduler`] drains the cache.

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use veil_executor::{ComputeBackend, HttpExecutorClient};
use veil_store::{put_bytes, queue, ChainStorage};
use veil_types::{Address, BlockNumber, Computation, Handle};
use veil_utils::OrderedSet;

use crate::cache::{CiphertextCache, GcPolicy};
use crate::config::CoprocConfig;
use crate::flush::{FlushOutcome, Flusher, Unsatisfied};
use crate::metrics::CoprocMetrics;
use crate::scheduler::FlushScheduler;
use crate::session::Session;
use crate::shutdown::ShutdownController;
use crate::CoprocError;

/// What a session commit did.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CommitSummary {
    /// Computations handed to the cache.
    pub enqueued: usize,
    /// Computations written to the late-commit queue.
    pub queued_on_chain: usize,
    /// Queue entries cleared for the committing block.
    pub cleared_on_chain: u64,
    /// Ciphertexts copied into chain storage.
    pub persisted: usize,
    /// Cache blocks evicted by GC.
    pub evicted_blocks: usize,
    /// Synchronous flush result (zero in deferred mode).
    pub flushed: FlushOutcome,
}

#[derive(Clone)]
pub struct Coprocessor {
    inner: Arc<Inner>,
}

struct Inner {
    config: CoprocConfig,
    contract_address: Address,
    acl_contract_address: Address,
    cache: Arc<CiphertextCache>,
    flusher: Arc<Flusher>,
    metrics: Arc<CoprocMetrics>,
}

impl Coprocessor {
    /// Build a coprocessor talking to `backend`. Fails on invalid config.
    pub fn new(config: CoprocConfig, backend: Arc<dyn ComputeBackend>) -> Result<Self, CoprocError> {
        config.validate()?;
        let (Some(contract_address), Some(acl_contract_address)) =
            (config.contract_address, config.acl_contract_address)
        else {
            return Err(CoprocError::Config("contract addresses missing".into()));
        };

        let metrics = Arc::new(CoprocMetrics::new());
        let cache = Arc::new(CiphertextCache::new(
            config.storage_address,
            GcPolicy {
                window_blocks: config.gc_window_blocks,
                min_interval: config.gc_min_interval(),
            },
            metrics.clone(),
        ));
        let flusher = Arc::new(Flusher::new(
            cache.clone(),
            backend,
            config.rpc_timeout(),
            metrics.clone(),
        ));

        info!(
            executor_url = %config.executor_url,
            contract = %contract_address,
            acl_contract = %acl_contract_address,
            storage = %config.storage_address,
            commit_block_offset = config.commit_block_offset,
            "coprocessor initialised"
        );

        Ok(Self {
            inner: Arc::new(Inner {
                config,
                contract_address,
                acl_contract_address,
                cache,
                flusher,
                metrics,
            }),
        })
    }

    /// Build a coprocessor with an HTTP client for `config.executor_url`.
    pub fn with_http_executor(config: CoprocConfig) -> Result<Self, CoprocError> {
        let client = HttpExecutorClient::new(&config.executor_url, config.rpc_timeout());
        Self::new(config, Arc::new(client))
    }

    pub fn create_session(&self, block_number: BlockNumber) -> Session {
        Session::new(self.clone(), block_number)
    }

    pub fn config(&self) -> &CoprocConfig {
        &self.inner.config
    }

    pub fn contract_address(&self) -> Address {
        self.inner.contract_address
    }

    pub fn acl_contract_address(&self) -> Address {
        self.inner.acl_contract_address
    }

    pub fn commit_block_offset(&self) -> u8 {
        self.inner.config.commit_block_offset
    }

    pub fn cache(&self) -> &Arc<CiphertextCache> {
        &self.inner.cache
    }

    pub fn metrics(&self) -> &CoprocMetrics {
        &self.inner.metrics
    }

    /// Flush all pending computations now.
    pub async fn process_pending(&self) -> Result<FlushOutcome, CoprocError> {
        self.inner.flusher.process_pending().await
    }

    /// Reload late-commit queue entries persisted for the blocks from
    /// `start` on and flush them if any were found.
    pub async fn preload_ciphertexts<S>(
        &self,
        start: BlockNumber,
        storage: &S,
    ) -> Result<usize, CoprocError>
    where
        S: ChainStorage + ?Sized,
    {
        let loaded = self
            .inner
            .cache
            .preload(start, self.inner.config.preload_horizon, storage)
            .await?;
        info!(block = start, computations = loaded, "preload ciphertexts");
        if loaded > 0 {
            self.process_pending().await?;
        }
        Ok(loaded)
    }

    /// Start the background flush loop. Synchronous mode flushes inline at
    /// commit and has no loop.
    pub fn spawn_scheduler(&self, shutdown: &ShutdownController) -> Option<JoinHandle<()>> {
        let config = &self.inner.config;
        if !config.is_deferred() {
            return None;
        }
        let scheduler = FlushScheduler::new(
            self.inner.cache.clone(),
            self.inner.flusher.clone(),
            config.flush_debounce(),
            config.nudge_interval(),
        );
        Some(scheduler.spawn(shutdown))
    }

    pub(crate) async fn commit_computations<S>(
        &self,
        block: BlockNumber,
        computations: Vec<Computation>,
        storage_handles: &OrderedSet<Handle>,
        storage: &mut S,
    ) -> Result<CommitSummary, CoprocError>
    where
        S: ChainStorage + ?Sized,
    {
        let storage_address = self.inner.config.storage_address;
        let deferred = self.inner.config.is_deferred();
        let mut summary = CommitSummary::default();

        if deferred {
            let mut by_block: BTreeMap<BlockNumber, Vec<&Computation>> = BTreeMap::new();
            for computation in &computations {
                by_block
                    .entry(computation.target_block)
                    .or_default()
                    .push(computation);
            }
            for (target, bucket) in by_block {
                let first = queue::append_entries(storage, &storage_address, target, bucket.iter().copied())?;
                debug!(
                    target_block = target,
                    first_index = first,
                    count = bucket.len(),
                    "persisted computations to late-commit queue"
                );
                summary.queued_on_chain += bucket.len();
            }
        }

        let own: HashSet<(BlockNumber, Handle)> = computations
            .iter()
            .map(|c| (c.target_block, c.output_handle))
            .collect();
        summary.enqueued = self.inner.cache.enqueue_batch(computations, &*storage).await?;

        if deferred {
            self.inner.cache.notify_work_available();
            summary.cleared_on_chain = queue::clear_block(storage, &storage_address, block);
            if summary.cleared_on_chain > 0 {
                debug!(block, entries = summary.cleared_on_chain, "cleared late-commit queue");
            }
        } else {
            let outcome = self.process_pending().await?;
            let failed: Vec<Unsatisfied> = outcome
                .unsatisfied
                .iter()
                .filter(|u| own.contains(&(u.block, u.output)))
                .copied()
                .collect();
            if let Some(first) = failed.first() {
                let entries: Vec<_> = failed.iter().map(|u| (u.block, u.output)).collect();
                let discarded = self.inner.cache.discard(&entries).await;
                warn!(block, discarded, "dropping unsatisfiable computations of failed commit");
                return Err((*first).into());
            }
            summary.flushed = outcome;
        }

        let ciphertexts = self
            .inner
            .cache
            .collect_for_persist(block, &storage_handles.to_vec())
            .await?;
        for (handle, bytes) in &ciphertexts {
            debug!(block, handle = %handle.short(), ciphertext_len = bytes.len(), "persist ciphertext");
            put_bytes(storage, &storage_address, &handle.as_word(), bytes);
        }
        summary.persisted = ciphertexts.len();

        summary.evicted_blocks = self.inner.cache.run_gc(block).await;
        Ok(summary)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use veil_nullables::{NullChainStorage, NullExecutor};
    use veil_types::{CiphertextType, FheOperation, Operand};

    pub(crate) fn handle(seed: u8) -> Handle {
        let mut bytes = [seed; 32];
        bytes[Handle::TYPE_BYTE] = CiphertextType::Uint32.code();
        Handle::new(bytes)
    }

    pub(crate) fn config(offset: u8) -> CoprocConfig {
        CoprocConfig {
            executor_url: "localhost:50051".into(),
            contract_address: Some(Address::from_low_u64(0x5d)),
            acl_contract_address: Some(Address::from_low_u64(0x5e)),
            commit_block_offset: offset,
            ..Default::default()
        }
    }

    pub(crate) fn coprocessor(offset: u8) -> Coprocessor {
        Coprocessor::new(config(offset), Arc::new(NullExecutor::new())).unwrap()
    }

    #[test]
    fn invalid_config_is_rejected() {
        let mut bad = config(0);
        bad.contract_address = None;
        assert!(Coprocessor::new(bad, Arc::new(NullExecutor::new())).is_err());
    }

    #[test]
    fn synchronous_mode_has_no_scheduler() {
        let shutdown = ShutdownController::new();
        assert!(coprocessor(0).spawn_scheduler(&shutdown).is_none());
    }

    #[tokio::test]
    async fn deferred_commit_writes_queue_and_skips_flush() {
        let executor = Arc::new(NullExecutor::new());
        let app = Coprocessor::new(config(2), executor.clone()).unwrap();
        let mut storage = NullChainStorage::new();

        let mut session = app.create_session(10);
        session.insert_computation(Computation::new(
            FheOperation::Neg,
            handle(1),
            vec![Operand::ciphertext(handle(2))],
        ));
        let summary = session.commit(&mut storage).await.unwrap();

        assert_eq!(summary.queued_on_chain, 1);
        assert_eq!(summary.enqueued, 1);
        assert_eq!(executor.call_count(), 0);
        assert_eq!(
            queue::entry_count(&storage, &app.config().storage_address, 12),
            1
        );
    }
}
