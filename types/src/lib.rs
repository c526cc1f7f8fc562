//! Fundamental types for the Veil FHE coprocessor.
//!
//! This crate defines the types shared across every other crate in the workspace:
//! storage words, ciphertext handles, contract addresses, FHE operation codes,
//! ciphertext type tags, and the deferred `Computation` work item.

pub mod address;
pub mod ciphertext;
pub mod computation;
pub mod error;
pub mod operation;
pub mod word;

pub use address::Address;
pub use ciphertext::CiphertextType;
pub use computation::{BlockNumber, Computation, ExtraData, Operand, SegmentId};
pub use error::TypeError;
pub use operation::{FheOperation, OperationShape};
pub use word::{Handle, Word};
