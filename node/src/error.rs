use thiserror::Error;

use veil_types::Handle;

#[derive(Debug, Error)]
pub enum CoprocError {
    #[error("input data must be at least 4 bytes for a selector, got {0}")]
    InputTooShort(usize),

    #[error("output slot must be at least 32 bytes, got {0}")]
    OutputTooShort(usize),

    #[error("selector {0:#010x} not recognized")]
    UnknownSelector(u32),

    #[error("malformed call data: {0}")]
    MalformedCallData(String),

    #[error("invalid ciphertext type {0}")]
    InvalidCiphertextType(u8),

    #[error("executor error: {0}")]
    Executor(#[from] veil_executor::ExecutorError),

    #[error("store error: {0}")]
    Store(#[from] veil_store::StoreError),

    #[error("executor returned a result for {0}, which was not in the batch")]
    UnknownResultHandle(Handle),

    #[error("ciphertext {0} not found in cache")]
    MissingCiphertext(Handle),

    #[error("operand {operand} of {output} has no ciphertext, batch producer or cached result")]
    UnsatisfiedDependence { operand: Handle, output: Handle },

    #[error("config error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl CoprocError {
    /// Whether the failure reflects a broken internal invariant rather than
    /// bad input or an external outage.
    pub fn is_invariant_violation(&self) -> bool {
        matches!(
            self,
            CoprocError::UnknownResultHandle(_) | CoprocError::MissingCiphertext(_)
        )
    }
}
