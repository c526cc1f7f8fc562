//! Ciphertext cache: pending work per target block and materialized results.
//!
//! One [`RwLock`] guards both maps and the GC bookkeeping. Chain storage
//! reads for operand hydration happen under the lock; executor round trips
//! never do (see [`crate::flush`]).
//!
//! Materialized results live in a [`MaterializedArena`] keyed by block
//! height. The arena's eviction frontier is `high_water_mark - window`:
//! blocks strictly below it are dropped on the next sweep, so a reorg of up
//! to `window` blocks still finds its results.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{Notify, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::{debug, info};

use veil_store::{queue, read_bytes, ChainStorage};
use veil_types::{Address, BlockNumber, Computation, Handle, Operand};

use crate::metrics::CoprocMetrics;
use crate::CoprocError;

/// Computations due at one block, deduplicated by output handle.
#[derive(Debug, Default)]
pub struct PendingQueue {
    entries: Vec<Computation>,
    enqueued: HashSet<Handle>,
}

impl PendingQueue {
    /// Append unless a computation for the same output handle is queued.
    pub fn push(&mut self, computation: Computation) -> bool {
        if !self.enqueued.insert(computation.output_handle) {
            return false;
        }
        self.entries.push(computation);
        true
    }

    pub fn entries(&self) -> &[Computation] {
        &self.entries
    }

    pub fn contains(&self, handle: &Handle) -> bool {
        self.enqueued.contains(handle)
    }

    /// Drop every entry whose output handle is in `handles`.
    pub fn remove_all(&mut self, handles: &HashSet<Handle>) {
        self.entries.retain(|c| !handles.contains(&c.output_handle));
        self.enqueued.retain(|h| !handles.contains(h));
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Result ciphertexts keyed by block height, with a GC frontier.
#[derive(Debug, Default)]
pub struct MaterializedArena {
    blocks: BTreeMap<BlockNumber, HashMap<Handle, Vec<u8>>>,
    high_water_mark: BlockNumber,
    last_sweep: Option<Instant>,
}

impl MaterializedArena {
    pub fn insert(&mut self, block: BlockNumber, handle: Handle, ciphertext: Vec<u8>) {
        self.blocks.entry(block).or_default().insert(handle, ciphertext);
    }

    pub fn block(&self, block: BlockNumber) -> Option<&HashMap<Handle, Vec<u8>>> {
        self.blocks.get(&block)
    }

    /// The most recent result for `handle` across all retained blocks.
    pub fn find(&self, handle: &Handle) -> Option<&[u8]> {
        self.blocks
            .values()
            .rev()
            .find_map(|results| results.get(handle))
            .map(Vec::as_slice)
    }

    pub fn high_water_mark(&self) -> BlockNumber {
        self.high_water_mark
    }

    pub fn block_count(&self) -> usize {
        self.blocks.len()
    }

    pub fn contains_block(&self, block: BlockNumber) -> bool {
        self.blocks.contains_key(&block)
    }

    /// Record `flushed` as flushed and evict blocks that fell out of the
    /// retention window. Returns the number of evicted blocks.
    ///
    /// A block only counts as flushed once it holds results. Sweeps run
    /// once the high-water mark reaches `window` and at most once per
    /// `min_interval`.
    pub fn sweep(
        &mut self,
        flushed: BlockNumber,
        window: u64,
        min_interval: Duration,
        now: Instant,
    ) -> usize {
        if self.blocks.get(&flushed).is_some_and(|results| !results.is_empty()) {
            self.high_water_mark = self.high_water_mark.max(flushed);
        }

        if self.high_water_mark == 0 || self.high_water_mark < window {
            return 0;
        }
        if let Some(last) = self.last_sweep {
            if now.saturating_duration_since(last) < min_interval {
                return 0;
            }
        }

        let frontier = self.high_water_mark - window;
        let retained = self.blocks.split_off(&frontier);
        let evicted = std::mem::replace(&mut self.blocks, retained).len();
        self.last_sweep = Some(now);
        evicted
    }
}

/// Lock-protected cache contents.
#[derive(Debug, Default)]
pub struct CacheState {
    pub pending: BTreeMap<BlockNumber, PendingQueue>,
    pub materialized: MaterializedArena,
}

impl CacheState {
    pub fn pending_len(&self) -> usize {
        self.pending.values().map(PendingQueue::len).sum()
    }
}

/// GC tuning.
#[derive(Clone, Copy, Debug)]
pub struct GcPolicy {
    pub window_blocks: u64,
    pub min_interval: Duration,
}

impl Default for GcPolicy {
    fn default() -> Self {
        Self {
            window_blocks: 100,
            min_interval: Duration::from_secs(10),
        }
    }
}

pub struct CiphertextCache {
    state: RwLock<CacheState>,
    work_available: Notify,
    /// Contract whose storage holds persisted ciphertexts and the queue.
    storage_address: Address,
    gc: GcPolicy,
    metrics: Arc<CoprocMetrics>,
}

impl CiphertextCache {
    pub fn new(storage_address: Address, gc: GcPolicy, metrics: Arc<CoprocMetrics>) -> Self {
        Self {
            state: RwLock::new(CacheState::default()),
            work_available: Notify::new(),
            storage_address,
            gc,
            metrics,
        }
    }

    pub async fn read(&self) -> RwLockReadGuard<'_, CacheState> {
        self.state.read().await
    }

    pub async fn write(&self) -> RwLockWriteGuard<'_, CacheState> {
        self.state.write().await
    }

    /// Queue computations under their target blocks, skipping output handles
    /// already pending for that block. Handle operands without ciphertext
    /// bytes are hydrated from chain storage. Returns how many were queued.
    pub async fn enqueue_batch<S>(
        &self,
        computations: Vec<Computation>,
        storage: &S,
    ) -> Result<usize, CoprocError>
    where
        S: ChainStorage + ?Sized,
    {
        let mut buckets: BTreeMap<BlockNumber, Vec<Computation>> = BTreeMap::new();
        for computation in computations {
            buckets
                .entry(computation.target_block)
                .or_default()
                .push(computation);
        }

        let mut state = self.state.write().await;
        let mut added = 0;
        for (block, bucket) in buckets {
            added += self.enqueue_block(&mut state, block, bucket, storage)?;
        }
        self.update_gauges(&state);
        Ok(added)
    }

    fn enqueue_block<S>(
        &self,
        state: &mut CacheState,
        block: BlockNumber,
        computations: Vec<Computation>,
        storage: &S,
    ) -> Result<usize, CoprocError>
    where
        S: ChainStorage + ?Sized,
    {
        let queue = state.pending.entry(block).or_default();
        let mut added = 0;
        for mut computation in computations {
            if queue.contains(&computation.output_handle) {
                continue;
            }
            self.hydrate(&mut computation, storage)?;
            debug!(
                block,
                handle = %computation.output_handle.short(),
                queue_len = queue.len() + 1,
                "add computation to cache"
            );
            queue.push(computation);
            added += 1;
        }
        if queue.is_empty() {
            state.pending.remove(&block);
        }
        self.metrics.computations_enqueued.inc_by(added as u64);
        Ok(added)
    }

    fn hydrate<S>(&self, computation: &mut Computation, storage: &S) -> Result<(), CoprocError>
    where
        S: ChainStorage + ?Sized,
    {
        for operand in &mut computation.operands {
            if let Operand::Ciphertext {
                handle,
                ciphertext: ciphertext @ None,
            } = operand
            {
                let bytes = read_bytes(storage, &self.storage_address, &handle.as_word())?;
                debug!(
                    handle = %computation.output_handle.short(),
                    operand = %handle.short(),
                    ciphertext_len = bytes.len(),
                    "hydrate operand"
                );
                if !bytes.is_empty() {
                    *ciphertext = Some(bytes);
                }
            }
        }
        Ok(())
    }

    /// Repopulate pending work from the late-commit queue entries persisted
    /// for `[start, start + horizon)`. Returns how many entries were found.
    pub async fn preload<S>(
        &self,
        start: BlockNumber,
        horizon: u64,
        storage: &S,
    ) -> Result<usize, CoprocError>
    where
        S: ChainStorage + ?Sized,
    {
        let started = Instant::now();
        let mut state = self.state.write().await;
        let mut found = 0;
        for block in start..start.saturating_add(horizon) {
            let computations = queue::read_block(storage, &self.storage_address, block)?;
            if computations.is_empty() {
                continue;
            }
            found += computations.len();
            self.enqueue_block(&mut state, block, computations, storage)?;
        }
        self.update_gauges(&state);
        info!(
            start,
            horizon,
            computations = found,
            duration_ms = started.elapsed().as_millis() as u64,
            "preload done"
        );
        Ok(found)
    }

    /// Wake the flush scheduler. Repeated calls before it wakes coalesce
    /// into one wake-up.
    pub fn notify_work_available(&self) {
        self.work_available.notify_one();
    }

    /// Resolves after the next (or an already stored) wake-up.
    pub async fn work_available(&self) {
        self.work_available.notified().await;
    }

    /// Consume a stored wake-up, if any, without waiting. Returns whether
    /// one was pending.
    pub async fn take_work_signal(&self) -> bool {
        tokio::time::timeout(Duration::ZERO, self.work_available.notified())
            .await
            .is_ok()
    }

    pub async fn has_pending(&self) -> bool {
        !self.state.read().await.pending.is_empty()
    }

    pub async fn pending_len(&self) -> usize {
        self.state.read().await.pending_len()
    }

    /// Remove the given `(block, output handle)` entries from the pending
    /// queues. Returns how many were removed.
    pub async fn discard(&self, entries: &[(BlockNumber, Handle)]) -> usize {
        let mut by_block: BTreeMap<BlockNumber, HashSet<Handle>> = BTreeMap::new();
        for (block, handle) in entries {
            by_block.entry(*block).or_default().insert(*handle);
        }

        let mut state = self.state.write().await;
        let mut removed = 0;
        for (block, handles) in by_block {
            if let Some(queue) = state.pending.get_mut(&block) {
                let before = queue.len();
                queue.remove_all(&handles);
                removed += before - queue.len();
                if queue.is_empty() {
                    state.pending.remove(&block);
                }
            }
        }
        self.update_gauges(&state);
        removed
    }

    /// Materialized result for `handle` at `block`.
    pub async fn materialized(&self, block: BlockNumber, handle: &Handle) -> Option<Vec<u8>> {
        self.state
            .read()
            .await
            .materialized
            .block(block)
            .and_then(|results| results.get(handle))
            .cloned()
    }

    /// Copy the ciphertexts of `handles` materialized at `block` out of the
    /// cache, in order. An absent block yields nothing; a handle missing
    /// from a present block is an error.
    pub async fn collect_for_persist(
        &self,
        block: BlockNumber,
        handles: &[Handle],
    ) -> Result<Vec<(Handle, Vec<u8>)>, CoprocError> {
        let state = self.state.read().await;
        let Some(results) = state.materialized.block(block) else {
            return Ok(Vec::new());
        };
        handles
            .iter()
            .map(|handle| {
                results
                    .get(handle)
                    .map(|bytes| (*handle, bytes.clone()))
                    .ok_or(CoprocError::MissingCiphertext(*handle))
            })
            .collect()
    }

    /// Run one GC step for `flushed` with the configured policy.
    pub async fn run_gc(&self, flushed: BlockNumber) -> usize {
        self.run_gc_at(flushed, Instant::now()).await
    }

    pub async fn run_gc_at(&self, flushed: BlockNumber, now: Instant) -> usize {
        let mut state = self.state.write().await;
        let evicted =
            state
                .materialized
                .sweep(flushed, self.gc.window_blocks, self.gc.min_interval, now);
        if evicted > 0 {
            info!(
                evicted,
                high_water_mark = state.materialized.high_water_mark(),
                "removed ciphertexts from cache"
            );
            self.metrics.gc_evicted_blocks.inc_by(evicted as u64);
        }
        self.update_gauges(&state);
        evicted
    }

    pub(crate) fn update_gauges(&self, state: &CacheState) {
        self.metrics
            .pending_computations
            .set(state.pending_len() as i64);
        self.metrics
            .materialized_blocks
            .set(state.materialized.block_count() as i64);
    }
}
