//! Deferred FHE work items.

use std::fmt;

use crate::{CiphertextType, FheOperation, Handle};

/// Chain block height.
pub type BlockNumber = u64;

/// Scope marker grouping the computations of one call frame.
///
/// Segment ids increase monotonically within a session; the first id handed
/// out is 1. Computations inserted before any segment was opened carry 0.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SegmentId(u64);

impl SegmentId {
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    pub fn value(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for SegmentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Host-provided context for an intercepted call.
#[derive(Clone, Copy, Default, PartialEq, Eq)]
pub struct ExtraData {
    /// Seed for random-number operations.
    pub fhe_rand_seed: [u8; 32],
}

impl fmt::Debug for ExtraData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "ExtraData {{ fhe_rand_seed: {}.. }}",
            hex::encode(&self.fhe_rand_seed[..4])
        )
    }
}

/// One input to a computation.
#[derive(Clone, PartialEq, Eq)]
pub enum Operand {
    /// An encrypted value referenced by handle. `ciphertext` is filled in
    /// from chain storage when the computation is enqueued into the cache.
    Ciphertext {
        handle: Handle,
        ciphertext: Option<Vec<u8>>,
    },
    /// A plaintext literal passed through to the compute service as-is.
    Scalar(Vec<u8>),
}

impl Operand {
    pub fn ciphertext(handle: Handle) -> Self {
        Operand::Ciphertext {
            handle,
            ciphertext: None,
        }
    }

    pub fn scalar(bytes: impl Into<Vec<u8>>) -> Self {
        Operand::Scalar(bytes.into())
    }

    pub fn is_scalar(&self) -> bool {
        matches!(self, Operand::Scalar(_))
    }

    pub fn handle(&self) -> Option<&Handle> {
        match self {
            Operand::Ciphertext { handle, .. } => Some(handle),
            Operand::Scalar(_) => None,
        }
    }

    /// Ciphertext type of a handle operand, taken from the handle itself.
    pub fn ct_type(&self) -> Option<CiphertextType> {
        self.handle().and_then(Handle::ct_type)
    }

    /// Hydrated ciphertext bytes, when present and non-empty.
    pub fn hydrated(&self) -> Option<&[u8]> {
        match self {
            Operand::Ciphertext {
                ciphertext: Some(bytes),
                ..
            } if !bytes.is_empty() => Some(bytes),
            _ => None,
        }
    }
}

impl fmt::Debug for Operand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operand::Ciphertext { handle, ciphertext } => write!(
                f,
                "Ciphertext({}, ct_len={})",
                handle.short(),
                ciphertext.as_ref().map_or(0, Vec::len)
            ),
            Operand::Scalar(bytes) => write!(f, "Scalar({})", hex::encode(bytes)),
        }
    }
}

/// One unit of deferred work: `output_handle = operation(operands)`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Computation {
    /// Segment the computation was inserted under. Stamped by the session.
    pub segment: SegmentId,
    pub operation: FheOperation,
    pub output_handle: Handle,
    pub operands: Vec<Operand>,
    /// Block at which the result must be materialized. Stamped by the session.
    pub target_block: BlockNumber,
}

impl Computation {
    pub fn new(operation: FheOperation, output_handle: Handle, operands: Vec<Operand>) -> Self {
        Self {
            segment: SegmentId::default(),
            operation,
            output_handle,
            operands,
            target_block: 0,
        }
    }

    pub fn has_scalar(&self) -> bool {
        self.operands.iter().any(Operand::is_scalar)
    }
}
