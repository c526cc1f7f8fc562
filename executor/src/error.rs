use thiserror::Error;

use crate::wire::SyncComputeError;

#[derive(Debug, Error)]
pub enum ExecutorError {
    #[error("executor transport error: {0}")]
    Transport(String),

    #[error("executor request timed out: {0}")]
    Timeout(String),

    #[error("executor rejected batch: {0}")]
    Remote(SyncComputeError),

    #[error("invalid executor response: {0}")]
    InvalidResponse(String),
}

impl ExecutorError {
    /// Whether redelivering the same batch could succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, ExecutorError::Transport(_) | ExecutorError::Timeout(_))
    }
}
