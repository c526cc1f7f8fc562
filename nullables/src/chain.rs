//! Nullable chain storage: a slot map in memory.

use std::collections::HashMap;

use veil_store::ChainStorage;
use veil_types::{Address, Word};

/// In-memory per-contract slot storage.
///
/// Zero writes remove the slot, so [`NullChainStorage::len`] counts exactly
/// the non-zero slots, like a real state trie.
#[derive(Clone, Debug, Default)]
pub struct NullChainStorage {
    slots: HashMap<(Address, Word), Word>,
}

impl NullChainStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of non-zero slots across all contracts.
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Number of non-zero slots owned by `contract`.
    pub fn len_for(&self, contract: &Address) -> usize {
        self.slots.keys().filter(|(c, _)| c == contract).count()
    }
}

impl ChainStorage for NullChainStorage {
    fn get_state(&self, contract: &Address, slot: &Word) -> Word {
        self.slots
            .get(&(*contract, *slot))
            .copied()
            .unwrap_or_default()
    }

    fn set_state(&mut self, contract: &Address, slot: &Word, value: Word) {
        if value.is_zero() {
            self.slots.remove(&(*contract, *slot));
        } else {
            self.slots.insert((*contract, *slot), value);
        }
    }
}
