use thiserror::Error;

use veil_types::BlockNumber;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum StoreError {
    #[error("unknown operation code {0} in queue entry")]
    UnknownOperation(u8),

    #[error("undecodable queue entry at block {block} slot {index}: {reason}")]
    UndecodableEntry {
        block: BlockNumber,
        index: u64,
        reason: String,
    },

    #[error("computation has {0} operands, at most 3 fit in a queue entry")]
    TooManyOperands(usize),

    #[error("scalar operand of {0} bytes exceeds the 256-byte overflow region")]
    ScalarTooWide(usize),

    #[error("computation needs the overflow region for more than one operand")]
    OverflowConflict,

    #[error("byte array length {0} exceeds the supported maximum")]
    ByteArrayTooLong(u64),
}
