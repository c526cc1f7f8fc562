//! Chain storage contract and the fixed-slot encodings built on top of it.
//!
//! The host chain only offers 32-byte addressable slots. This crate maps the
//! coprocessor's variable-length data onto them:
//! - [`bytes`]: length-prefixed byte arrays (durable ciphertext blobs)
//! - [`queue`]: the per-block late-commit queue of pending computations
//!
//! Everything is expressed in terms of the [`ChainStorage`] trait; the rest of
//! the codebase never touches slots directly.

pub mod bytes;
pub mod error;
pub mod queue;
pub mod slot;
pub mod storage;

pub use bytes::{put_bytes, read_bytes};
pub use error::StoreError;
pub use queue::{
    append_entries, clear_block, entry_count, read_block, read_entry, write_entry, EntryLayout,
    EntryMetadata,
};
pub use storage::ChainStorage;
