//! Draining pending computations through the compute service.
//!
//! A flush snapshots every pending entry across all blocks into one
//! request while holding the cache lock, releases the lock for the round
//! trip, then stores results and removes exactly the `(block, handle)`
//! entries it sent. Flushes are serialized, so two never send the same
//! entries.
//!
//! Entries whose operands cannot be resolved, and entries depending on
//! them, are held back and reported in [`FlushOutcome::unsatisfied`]; the
//! rest of the batch still goes out.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use veil_executor::{
    ComputeBackend, CompressedCiphertext, ExecutorError, SyncComputation, SyncComputeRequest,
    SyncInput,
};
use veil_types::{BlockNumber, Computation, Handle, Operand};

use crate::cache::{CacheState, CiphertextCache};
use crate::metrics::CoprocMetrics;
use crate::CoprocError;

/// A pending entry left out of a batch because one of its operands has no
/// ciphertext, no producer earlier in the batch and no cached result.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Unsatisfied {
    pub block: BlockNumber,
    pub output: Handle,
    pub operand: Handle,
}

impl From<Unsatisfied> for CoprocError {
    fn from(u: Unsatisfied) -> Self {
        CoprocError::UnsatisfiedDependence {
            operand: u.operand,
            output: u.output,
        }
    }
}

/// What one flush did.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct FlushOutcome {
    /// Computations sent to the compute service.
    pub computations: usize,
    /// Result ciphertexts stored into the cache.
    pub results: usize,
    /// Entries held back and still pending.
    pub unsatisfied: Vec<Unsatisfied>,
}

/// A request plus the bookkeeping needed to route its results.
#[derive(Debug, Default)]
pub struct PreparedBatch {
    pub request: SyncComputeRequest,
    /// Output handle → every block it is due at within this batch.
    pub origin: HashMap<Handle, Vec<BlockNumber>>,
    /// Exactly the entries carried by `request`, per block.
    pub sent: BTreeMap<BlockNumber, HashSet<Handle>>,
    pub unsatisfied: Vec<Unsatisfied>,
}

impl PreparedBatch {
    /// Build a batch from all pending entries: blocks ascending, insertion
    /// order within a block.
    ///
    /// Handle operands are resolved in order: hydrated bytes are attached,
    /// handles produced earlier in the batch are sent without bytes, and
    /// previously materialized results are attached from the cache. An
    /// entry with an unresolvable operand is left out, which in turn leaves
    /// out everything consuming its output.
    pub fn from_state(state: &CacheState) -> Self {
        let mut batch = Self::default();
        let mut attached = HashSet::new();

        for (block, queue) in &state.pending {
            for computation in queue.entries() {
                let (inputs, blobs) = match batch.resolve(state, computation) {
                    Ok(resolved) => resolved,
                    Err(operand) => {
                        warn!(
                            block,
                            operand = %operand.short(),
                            output = %computation.output_handle.short(),
                            "unsatisfied dependence, holding computation back"
                        );
                        batch.unsatisfied.push(Unsatisfied {
                            block: *block,
                            output: computation.output_handle,
                            operand,
                        });
                        continue;
                    }
                };

                for (handle, bytes) in blobs {
                    if attached.insert(handle) {
                        batch.request.compressed_ciphertexts.push(CompressedCiphertext {
                            handle,
                            serialization: bytes.to_vec(),
                        });
                    }
                }
                batch
                    .origin
                    .entry(computation.output_handle)
                    .or_default()
                    .push(*block);
                batch
                    .sent
                    .entry(*block)
                    .or_default()
                    .insert(computation.output_handle);
                batch.request.computations.push(SyncComputation {
                    operation: computation.operation,
                    inputs,
                    result_handles: vec![computation.output_handle],
                });
            }
        }

        batch
    }

    /// Inputs for `computation` plus the ciphertexts they need attached, or
    /// the first operand that cannot be resolved.
    fn resolve<'s>(
        &self,
        state: &'s CacheState,
        computation: &'s Computation,
    ) -> Result<(Vec<SyncInput>, Vec<(Handle, &'s [u8])>), Handle> {
        let mut inputs = Vec::with_capacity(computation.operands.len());
        let mut blobs = Vec::new();
        for operand in &computation.operands {
            match operand {
                Operand::Scalar(bytes) => inputs.push(SyncInput::Scalar(bytes.clone())),
                Operand::Ciphertext { handle, .. } => {
                    if let Some(bytes) = operand.hydrated() {
                        blobs.push((*handle, bytes));
                    } else if !self.origin.contains_key(handle) {
                        let bytes = state.materialized.find(handle).ok_or(*handle)?;
                        blobs.push((*handle, bytes));
                    }
                    inputs.push(SyncInput::Handle(*handle));
                }
            }
        }
        Ok((inputs, blobs))
    }

    pub fn is_empty(&self) -> bool {
        self.request.computations.is_empty()
    }

    pub fn len(&self) -> usize {
        self.request.computations.len()
    }
}

/// Drives one flush at a time against a [`ComputeBackend`].
pub struct Flusher {
    cache: Arc<CiphertextCache>,
    backend: Arc<dyn ComputeBackend>,
    rpc_timeout: Duration,
    metrics: Arc<CoprocMetrics>,
    in_flight: Mutex<()>,
}

impl Flusher {
    pub fn new(
        cache: Arc<CiphertextCache>,
        backend: Arc<dyn ComputeBackend>,
        rpc_timeout: Duration,
        metrics: Arc<CoprocMetrics>,
    ) -> Self {
        Self {
            cache,
            backend,
            rpc_timeout,
            metrics,
            in_flight: Mutex::new(()),
        }
    }

    /// Send every satisfiable pending computation to the compute service
    /// and store the results. On any failure the pending entries stay
    /// queued.
    pub async fn process_pending(&self) -> Result<FlushOutcome, CoprocError> {
        let _flush = self.in_flight.lock().await;

        let batch = {
            let state = self.cache.read().await;
            PreparedBatch::from_state(&state)
        };
        let PreparedBatch {
            request,
            origin,
            sent,
            unsatisfied,
        } = batch;
        if request.computations.is_empty() {
            return Ok(FlushOutcome {
                unsatisfied,
                ..Default::default()
            });
        }

        let computations = request.computations.len();
        debug!(
            computations,
            ciphertexts = request.compressed_ciphertexts.len(),
            held_back = unsatisfied.len(),
            "sending batch to executor"
        );

        let started = Instant::now();
        let result = self.round_trip(request).await;
        self.metrics
            .flush_latency_ms
            .observe(started.elapsed().as_secs_f64() * 1000.0);

        let results = match result {
            Ok(results) => results,
            Err(e) => {
                self.metrics.flush_failures.inc();
                return Err(e.into());
            }
        };

        let results = self.store_results(&origin, &sent, results).await?;
        self.metrics.flushes.inc();
        info!(
            computations,
            results,
            held_back = unsatisfied.len(),
            "executor batch done"
        );
        Ok(FlushOutcome {
            computations,
            results,
            unsatisfied,
        })
    }

    async fn round_trip(
        &self,
        request: SyncComputeRequest,
    ) -> Result<Vec<CompressedCiphertext>, ExecutorError> {
        let response = tokio::time::timeout(self.rpc_timeout, self.backend.sync_compute(request))
            .await
            .map_err(|_| {
                ExecutorError::Timeout(format!("no response within {:?}", self.rpc_timeout))
            })??;
        response.into_results()
    }

    async fn store_results(
        &self,
        origin: &HashMap<Handle, Vec<BlockNumber>>,
        sent: &BTreeMap<BlockNumber, HashSet<Handle>>,
        results: Vec<CompressedCiphertext>,
    ) -> Result<usize, CoprocError> {
        let mut routed = Vec::with_capacity(results.len());
        for result in results {
            let Some(blocks) = origin.get(&result.handle) else {
                error!(
                    handle = %result.handle,
                    "executor returned a handle that was not requested"
                );
                self.metrics.flush_failures.inc();
                return Err(CoprocError::UnknownResultHandle(result.handle));
            };
            routed.push((blocks, result));
        }
        let returned: HashSet<Handle> = routed.iter().map(|(_, r)| r.handle).collect();
        if returned.len() != origin.len() {
            warn!(
                requested = origin.len(),
                returned = returned.len(),
                "executor returned fewer results than requested"
            );
        }

        let mut state = self.cache.write().await;
        let stored = routed.len();
        for (blocks, result) in routed {
            for block in blocks {
                debug!(
                    block,
                    handle = %result.handle.short(),
                    ciphertext_len = result.serialization.len(),
                    "materialized ciphertext"
                );
                state
                    .materialized
                    .insert(*block, result.handle, result.serialization.clone());
            }
        }

        for (block, handles) in sent {
            if let Some(queue) = state.pending.get_mut(block) {
                queue.remove_all(handles);
                if queue.is_empty() {
                    state.pending.remove(block);
                }
            }
        }
        self.metrics.results_materialized.inc_by(stored as u64);
        self.cache.update_gauges(&state);
        Ok(stored)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::GcPolicy;
    use veil_executor::{ResultCiphertexts, SyncComputeError, SyncComputeResponse};
    use veil_nullables::{NullChainStorage, NullExecutor};
    use veil_types::{Address, CiphertextType, Computation, FheOperation};

    fn handle(seed: u8) -> Handle {
        let mut bytes = [seed; 32];
        bytes[Handle::TYPE_BYTE] = CiphertextType::Uint16.code();
        Handle::new(bytes)
    }

    fn setup(executor: Arc<NullExecutor>, timeout: Duration) -> (Arc<CiphertextCache>, Flusher) {
        let metrics = Arc::new(CoprocMetrics::new());
        let cache = Arc::new(CiphertextCache::new(
            Address::from_low_u64(0x70),
            GcPolicy::default(),
            metrics.clone(),
        ));
        let flusher = Flusher::new(cache.clone(), executor, timeout, metrics);
        (cache, flusher)
    }

    fn hydrated_add(out: u8, lhs: u8, rhs: u8, block: BlockNumber) -> Computation {
        let mut c = Computation::new(
            FheOperation::Add,
            handle(out),
            vec![
                Operand::Ciphertext {
                    handle: handle(lhs),
                    ciphertext: Some(vec![lhs]),
                },
                Operand::scalar(vec![rhs]),
            ],
        );
        c.target_block = block;
        c
    }

    fn chained(out: u8, input: u8, block: BlockNumber) -> Computation {
        let mut c = Computation::new(
            FheOperation::Not,
            handle(out),
            vec![Operand::ciphertext(handle(input))],
        );
        c.target_block = block;
        c
    }

    #[tokio::test]
    async fn empty_cache_skips_the_executor() {
        let executor = Arc::new(NullExecutor::new());
        let (_cache, flusher) = setup(executor.clone(), Duration::from_secs(1));
        assert_eq!(flusher.process_pending().await.unwrap(), FlushOutcome::default());
        assert_eq!(executor.call_count(), 0);
    }

    #[tokio::test]
    async fn batch_order_and_intra_batch_dependencies() {
        let executor = Arc::new(NullExecutor::new());
        let (cache, flusher) = setup(executor.clone(), Duration::from_secs(1));
        let storage = NullChainStorage::new();
        cache
            .enqueue_batch(
                vec![chained(3, 1, 9), hydrated_add(1, 7, 2, 4), chained(4, 3, 9)],
                &storage,
            )
            .await
            .unwrap();

        let outcome = flusher.process_pending().await.unwrap();
        assert_eq!(
            outcome,
            FlushOutcome {
                computations: 3,
                results: 3,
                unsatisfied: Vec::new(),
            }
        );

        let request = &executor.requests()[0];
        let outputs: Vec<Handle> = request
            .computations
            .iter()
            .map(|c| c.result_handles[0])
            .collect();
        assert_eq!(outputs, vec![handle(1), handle(3), handle(4)]);
        // Only the hydrated input travels; intra-batch results do not.
        assert_eq!(request.compressed_ciphertexts.len(), 1);
        assert_eq!(request.compressed_ciphertexts[0].handle, handle(7));
        assert_eq!(
            request.computations[0].inputs[1],
            SyncInput::Scalar(vec![2])
        );

        assert_eq!(
            cache.materialized(9, &handle(4)).await,
            Some(NullExecutor::ciphertext_for(&handle(4)))
        );
        assert!(!cache.has_pending().await);
    }

    #[tokio::test]
    async fn materialized_results_resolve_later_dependencies() {
        let executor = Arc::new(NullExecutor::new());
        let (cache, flusher) = setup(executor.clone(), Duration::from_secs(1));
        cache.write().await.materialized.insert(2, handle(5), vec![0x55]);
        cache
            .enqueue_batch(vec![chained(6, 5, 3)], &NullChainStorage::new())
            .await
            .unwrap();

        flusher.process_pending().await.unwrap();
        let request = &executor.requests()[0];
        assert_eq!(request.compressed_ciphertexts[0].serialization, vec![0x55]);
    }

    #[tokio::test]
    async fn unsatisfiable_entries_are_held_back() {
        let executor = Arc::new(NullExecutor::new());
        let (cache, flusher) = setup(executor.clone(), Duration::from_secs(1));
        cache
            .enqueue_batch(
                vec![chained(6, 5, 3), chained(8, 6, 3), hydrated_add(1, 7, 2, 4)],
                &NullChainStorage::new(),
            )
            .await
            .unwrap();

        let outcome = flusher.process_pending().await.unwrap();
        assert_eq!(outcome.computations, 1);
        assert_eq!(
            outcome.unsatisfied,
            vec![
                Unsatisfied { block: 3, output: handle(6), operand: handle(5) },
                Unsatisfied { block: 3, output: handle(8), operand: handle(6) },
            ]
        );

        let request = &executor.requests()[0];
        assert_eq!(request.computations.len(), 1);
        assert_eq!(request.computations[0].result_handles, vec![handle(1)]);
        assert!(cache.materialized(4, &handle(1)).await.is_some());
        assert_eq!(cache.pending_len().await, 2);
    }

    #[tokio::test]
    async fn only_unsatisfiable_entries_skip_the_executor() {
        let executor = Arc::new(NullExecutor::new());
        let (cache, flusher) = setup(executor.clone(), Duration::from_secs(1));
        cache
            .enqueue_batch(vec![chained(6, 5, 3)], &NullChainStorage::new())
            .await
            .unwrap();

        let outcome = flusher.process_pending().await.unwrap();
        assert_eq!(outcome.computations, 0);
        assert_eq!(outcome.unsatisfied.len(), 1);
        assert!(matches!(
            CoprocError::from(outcome.unsatisfied[0]),
            CoprocError::UnsatisfiedDependence { operand, .. } if operand == handle(5)
        ));
        assert_eq!(executor.call_count(), 0);
        assert_eq!(cache.pending_len().await, 1);
    }

    #[tokio::test]
    async fn same_output_in_two_blocks_materializes_in_both() {
        let executor = Arc::new(NullExecutor::new());
        let (cache, flusher) = setup(executor.clone(), Duration::from_secs(1));
        cache
            .enqueue_batch(
                vec![hydrated_add(1, 7, 2, 5), hydrated_add(1, 7, 2, 6)],
                &NullChainStorage::new(),
            )
            .await
            .unwrap();

        let outcome = flusher.process_pending().await.unwrap();
        assert_eq!(outcome.computations, 2);
        assert!(!cache.has_pending().await);
        let expected = Some(NullExecutor::ciphertext_for(&handle(1)));
        assert_eq!(cache.materialized(5, &handle(1)).await, expected);
        assert_eq!(cache.materialized(6, &handle(1)).await, expected);

        assert_eq!(flusher.process_pending().await.unwrap(), FlushOutcome::default());
        assert_eq!(executor.call_count(), 1);
    }

    #[tokio::test]
    async fn entries_enqueued_during_a_round_trip_survive() {
        let executor = Arc::new(NullExecutor::new());
        executor.set_delay(Some(Duration::from_millis(100)));
        let (cache, flusher) = setup(executor.clone(), Duration::from_secs(1));
        let flusher = Arc::new(flusher);
        cache
            .enqueue_batch(
                vec![hydrated_add(1, 7, 2, 4), hydrated_add(3, 7, 2, 9)],
                &NullChainStorage::new(),
            )
            .await
            .unwrap();

        let in_flight = tokio::spawn({
            let flusher = flusher.clone();
            async move { flusher.process_pending().await }
        });
        tokio::time::sleep(Duration::from_millis(30)).await;
        cache
            .enqueue_batch(
                vec![hydrated_add(2, 7, 2, 4), hydrated_add(1, 7, 2, 9)],
                &NullChainStorage::new(),
            )
            .await
            .unwrap();

        let outcome = in_flight.await.unwrap().unwrap();
        assert_eq!(outcome.computations, 2);
        {
            let state = cache.read().await;
            assert_eq!(state.pending_len(), 2);
            assert!(state.pending[&4].contains(&handle(2)));
            assert!(state.pending[&9].contains(&handle(1)));
        }

        executor.set_delay(None);
        assert_eq!(flusher.process_pending().await.unwrap().computations, 2);
        assert!(!cache.has_pending().await);
    }

    #[tokio::test]
    async fn remote_errors_leave_work_pending() {
        let executor = Arc::new(NullExecutor::new());
        executor.fail_next_remote(SyncComputeError::ComputationFailed);
        let (cache, flusher) = setup(executor.clone(), Duration::from_secs(1));
        cache
            .enqueue_batch(vec![hydrated_add(1, 7, 2, 4)], &NullChainStorage::new())
            .await
            .unwrap();

        let err = flusher.process_pending().await.unwrap_err();
        assert!(matches!(
            err,
            CoprocError::Executor(ExecutorError::Remote(SyncComputeError::ComputationFailed))
        ));
        assert_eq!(cache.pending_len().await, 1);
        assert_eq!(flusher.process_pending().await.unwrap().results, 1);
    }

    #[tokio::test]
    async fn slow_executor_times_out() {
        let executor = Arc::new(NullExecutor::new());
        executor.set_delay(Some(Duration::from_millis(200)));
        let (cache, flusher) = setup(executor.clone(), Duration::from_millis(20));
        cache
            .enqueue_batch(vec![hydrated_add(1, 7, 2, 4)], &NullChainStorage::new())
            .await
            .unwrap();

        let err = flusher.process_pending().await.unwrap_err();
        assert!(matches!(err, CoprocError::Executor(ExecutorError::Timeout(_))));
        assert_eq!(cache.pending_len().await, 1);
    }

    #[tokio::test]
    async fn unmapped_result_handle_is_a_hard_error() {
        let executor = Arc::new(NullExecutor::new());
        executor.reply_next(SyncComputeResponse::ResultCiphertexts(ResultCiphertexts {
            ciphertexts: vec![CompressedCiphertext {
                handle: handle(99),
                serialization: vec![1],
            }],
        }));
        let (cache, flusher) = setup(executor, Duration::from_secs(1));
        cache
            .enqueue_batch(vec![hydrated_add(1, 7, 2, 4)], &NullChainStorage::new())
            .await
            .unwrap();

        let err = flusher.process_pending().await.unwrap_err();
        assert!(err.is_invariant_violation());
        assert_eq!(cache.pending_len().await, 1);
    }
}
