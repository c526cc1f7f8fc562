//! Per-transaction computation store.
//!
//! A [`Session`] collects the FHE computations one host transaction issues,
//! tags them with the call-frame segment they were issued in, and hands the
//! survivors to the coprocessor when the transaction commits. Sessions are
//! owned by a single transaction and never shared.

use std::collections::HashSet;
use tracing::{debug, error, info, warn};

use veil_store::ChainStorage;
use veil_types::{Address, BlockNumber, Computation, ExtraData, Handle, SegmentId};
use veil_utils::OrderedSet;

use crate::coprocessor::{CommitSummary, Coprocessor};
use crate::dispatch;
use crate::CoprocError;

pub struct Session {
    app: Coprocessor,
    block_number: BlockNumber,
    /// Accepted computations in insertion order.
    inserts: Vec<Computation>,
    /// Output handles of `inserts`.
    inserted: HashSet<Handle>,
    invalidated: HashSet<SegmentId>,
    segment_count: u64,
    /// Handles whose ciphertexts must be persisted to chain storage.
    storage_handles: OrderedSet<Handle>,
}

impl Session {
    pub(crate) fn new(app: Coprocessor, block_number: BlockNumber) -> Self {
        Self {
            app,
            block_number,
            inserts: Vec::new(),
            inserted: HashSet::new(),
            invalidated: HashSet::new(),
            segment_count: 0,
            storage_handles: OrderedSet::new(),
        }
    }

    pub fn block_number(&self) -> BlockNumber {
        self.block_number
    }

    pub fn contract_address(&self) -> Address {
        self.app.contract_address()
    }

    pub fn acl_contract_address(&self) -> Address {
        self.app.acl_contract_address()
    }

    /// Computations accepted so far, including ones in invalidated segments.
    pub fn computations(&self) -> &[Computation] {
        &self.inserts
    }

    /// Decode an intercepted library call and insert the computation it
    /// describes.
    pub fn add_computation(
        &mut self,
        input: &[u8],
        extra: &ExtraData,
        output: &[u8],
    ) -> Result<(), CoprocError> {
        let computation = dispatch::decode_call(input, extra, output).map_err(|e| {
            warn!(block = self.block_number, error = %e, "computation not inserted");
            e
        })?;
        debug!(
            operation = %computation.operation,
            handle = %computation.output_handle.short(),
            calldata_len = input.len(),
            ?extra,
            "call decoded"
        );
        self.insert_computation(computation);
        Ok(())
    }

    /// Insert a decoded computation. The first computation for an output
    /// handle wins; later ones are logged and dropped. Returns whether the
    /// computation was accepted.
    pub fn insert_computation(&mut self, mut computation: Computation) -> bool {
        if !self.inserted.insert(computation.output_handle) {
            warn!(
                handle = %computation.output_handle.short(),
                operation = %computation.operation,
                "duplicate output handle in session, keeping first computation"
            );
            return false;
        }

        computation.segment = SegmentId::new(self.segment_count);
        computation.target_block = self.block_number + u64::from(self.app.commit_block_offset());
        debug!(
            handle = %computation.output_handle.short(),
            segment = %computation.segment,
            target_block = computation.target_block,
            inserts = self.inserts.len() + 1,
            "insert computation"
        );
        self.inserts.push(computation);
        self.app.metrics().computations_inserted.inc();
        true
    }

    /// Record a handle whose ciphertext the transaction persisted and which
    /// must be copied into chain storage at commit.
    pub fn add_storage_handle(&mut self, handle: Handle) {
        if self.storage_handles.insert(handle) {
            debug!(block = self.block_number, handle = %handle.short(), "add storage handle");
        }
    }

    /// Open a new call-frame segment.
    pub fn next_segment(&mut self) -> SegmentId {
        self.segment_count += 1;
        SegmentId::new(self.segment_count)
    }

    /// Drop the work of every segment from `id` up to the current one and
    /// open a fresh segment for the caller to continue in.
    pub fn invalidate_since_segment(&mut self, id: SegmentId) -> SegmentId {
        for segment in id.value()..=self.segment_count {
            self.invalidated.insert(SegmentId::new(segment));
        }
        debug!(from = %id, to = self.segment_count, "invalidated segments");
        self.next_segment()
    }

    /// Hand the surviving computations to the coprocessor and reset the
    /// session for reuse.
    pub async fn commit<S>(&mut self, storage: &mut S) -> Result<CommitSummary, CoprocError>
    where
        S: ChainStorage + ?Sized,
    {
        let total = self.inserts.len();
        let invalidated = std::mem::take(&mut self.invalidated);
        let survivors: Vec<Computation> = std::mem::take(&mut self.inserts)
            .into_iter()
            .filter(|c| !invalidated.contains(&c.segment))
            .collect();
        let storage_handles = std::mem::take(&mut self.storage_handles);
        self.inserted.clear();
        self.segment_count = 0;

        info!(
            block = self.block_number,
            computations = survivors.len(),
            dropped = total - survivors.len(),
            storage_handles = storage_handles.len(),
            "commit session"
        );

        self.app
            .commit_computations(self.block_number, survivors, &storage_handles, storage)
            .await
            .map_err(|e| {
                if e.is_invariant_violation() {
                    error!(block = self.block_number, error = %e, "commit hit an internal inconsistency");
                } else {
                    warn!(block = self.block_number, error = %e, "commit failed");
                }
                e
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coprocessor::tests::{coprocessor, handle};
    use veil_types::{FheOperation, Operand};

    fn not(out: u8) -> Computation {
        Computation::new(
            FheOperation::Not,
            handle(out),
            vec![Operand::ciphertext(handle(200))],
        )
    }

    #[test]
    fn segments_are_pre_incremented() {
        let mut session = coprocessor(0).create_session(10);
        assert_eq!(session.next_segment(), SegmentId::new(1));
        assert_eq!(session.next_segment(), SegmentId::new(2));
        assert_eq!(session.invalidate_since_segment(SegmentId::new(2)), SegmentId::new(3));
    }

    #[test]
    fn insert_stamps_segment_and_target_block() {
        let mut session = coprocessor(5).create_session(10);
        assert!(session.insert_computation(not(1)));
        session.next_segment();
        assert!(session.insert_computation(not(2)));

        let inserted = session.computations();
        assert_eq!(inserted[0].segment, SegmentId::new(0));
        assert_eq!(inserted[1].segment, SegmentId::new(1));
        assert!(inserted.iter().all(|c| c.target_block == 15));
    }

    #[test]
    fn first_write_wins() {
        let mut session = coprocessor(0).create_session(1);
        let first = not(1);
        let mut second = not(1);
        second.operation = FheOperation::Neg;

        assert!(session.insert_computation(first));
        assert!(!session.insert_computation(second));
        assert_eq!(session.computations().len(), 1);
        assert_eq!(session.computations()[0].operation, FheOperation::Not);
    }

    #[test]
    fn storage_handles_collapse_duplicates() {
        let mut session = coprocessor(0).create_session(1);
        session.add_storage_handle(handle(1));
        session.add_storage_handle(handle(2));
        session.add_storage_handle(handle(1));
        assert_eq!(session.storage_handles.to_vec(), vec![handle(1), handle(2)]);
    }

    #[test]
    fn addresses_come_from_config() {
        let session = coprocessor(0).create_session(1);
        assert_eq!(session.contract_address(), Address::from_low_u64(0x5d));
        assert_eq!(session.acl_contract_address(), Address::from_low_u64(0x5e));
    }

    #[test]
    fn malformed_calls_are_rejected() {
        let mut session = coprocessor(0).create_session(1);
        assert!(matches!(
            session.add_computation(&[0xff], &ExtraData::default(), &[0u8; 32]),
            Err(CoprocError::InputTooShort(1))
        ));
        assert!(session.computations().is_empty());
    }
}
