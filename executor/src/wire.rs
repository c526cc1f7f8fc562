//! JSON wire contract of the compute service's `sync_compute` call.
//!
//! Byte fields travel as lowercase hex strings. Sum types are externally
//! tagged, e.g. `{"handle": "…"}` or `{"error": "UNKNOWN_HANDLE"}`.

use serde::{Deserialize, Serialize};
use std::fmt;

use veil_types::{FheOperation, Handle};

use crate::ExecutorError;

/// One batch of computations, in execution order.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncComputeRequest {
    pub computations: Vec<SyncComputation>,
    #[serde(default)]
    pub compact_ciphertext_lists: Vec<CompactCiphertextList>,
    /// Ciphertexts for input handles the service cannot resolve itself.
    #[serde(default)]
    pub compressed_ciphertexts: Vec<CompressedCiphertext>,
}

#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CompactCiphertextList(#[serde(with = "hex::serde")] pub Vec<u8>);

impl fmt::Debug for CompactCiphertextList {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CompactCiphertextList(len={})", self.0.len())
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncComputation {
    pub operation: FheOperation,
    pub inputs: Vec<SyncInput>,
    pub result_handles: Vec<Handle>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncInput {
    Handle(Handle),
    Scalar(#[serde(with = "hex::serde")] Vec<u8>),
}

#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompressedCiphertext {
    pub handle: Handle,
    #[serde(with = "hex::serde")]
    pub serialization: Vec<u8>,
}

impl fmt::Debug for CompressedCiphertext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompressedCiphertext")
            .field("handle", &self.handle)
            .field("len", &self.serialization.len())
            .finish()
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResultCiphertexts {
    pub ciphertexts: Vec<CompressedCiphertext>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncComputeResponse {
    Error(SyncComputeError),
    ResultCiphertexts(ResultCiphertexts),
}

impl SyncComputeResponse {
    /// The result list, or the service's error code as an [`ExecutorError`].
    pub fn into_results(self) -> Result<Vec<CompressedCiphertext>, ExecutorError> {
        match self {
            SyncComputeResponse::ResultCiphertexts(results) => Ok(results.ciphertexts),
            SyncComputeResponse::Error(code) => Err(ExecutorError::Remote(code)),
        }
    }
}

/// Failure codes returned by the compute service.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, thiserror::Error)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[repr(i32)]
pub enum SyncComputeError {
    #[error("bad input list")]
    BadInputList = 0,
    #[error("bad input ciphertext")]
    BadInputCiphertext = 1,
    #[error("invalid operation")]
    InvalidOperation = 2,
    #[error("unsupported operation")]
    UnsupportedOperation = 3,
    #[error("bad inputs")]
    BadInputs = 4,
    #[error("unknown handle")]
    UnknownHandle = 5,
    #[error("computation failed")]
    ComputationFailed = 6,
    #[error("bad result handles")]
    BadResultHandles = 7,
    #[error("unsatisfied dependence")]
    UnsatisfiedDependence = 8,
}

impl SyncComputeError {
    pub fn code(self) -> i32 {
        self as i32
    }
}
