//! The host chain's key-value storage primitive.

use veil_types::{Address, Word};

/// Per-contract slot storage provided by the host chain's execution engine.
///
/// Unset slots read as [`Word::ZERO`]; writing zero clears a slot.
pub trait ChainStorage: Send {
    fn get_state(&self, contract: &Address, slot: &Word) -> Word;

    fn set_state(&mut self, contract: &Address, slot: &Word, value: Word);
}
