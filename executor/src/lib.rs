//! Remote FHE compute service: request/response wire types and the HTTP
//! client that carries them.
//!
//! The rest of the workspace talks to the service through the
//! [`ComputeBackend`] trait so tests can swap in an in-memory executor.

pub mod client;
pub mod error;
pub mod wire;

pub use client::{ComputeBackend, HttpExecutorClient};
pub use error::ExecutorError;
pub use wire::{
    CompactCiphertextList, CompressedCiphertext, ResultCiphertexts, SyncComputation, SyncComputeError,
    SyncComputeRequest, SyncComputeResponse, SyncInput,
};
