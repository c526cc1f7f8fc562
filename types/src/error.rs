//! Top-level error type for parsing the shared types.

use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TypeError {
    #[error("unknown FHE operation code: {0}")]
    UnknownOperation(u8),

    #[error("unknown ciphertext type tag: {0}")]
    UnknownCiphertextType(u8),

    #[error("invalid contract address: {0}")]
    InvalidAddress(String),
}
