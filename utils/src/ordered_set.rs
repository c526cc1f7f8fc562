//! Insertion-ordered deduplicating collection.

use std::collections::HashSet;
use std::hash::Hash;

/// A set that remembers the order in which items were first inserted.
///
/// Duplicate insertions are no-ops; iteration yields items in first-insertion
/// order. Used to track storage-bound ciphertext handles so their ciphertexts
/// are persisted in the order the contract stored them.
#[derive(Clone, Debug)]
pub struct OrderedSet<T> {
    items: HashSet<T>,
    order: Vec<T>,
}

impl<T: Eq + Hash + Clone> OrderedSet<T> {
    pub fn new() -> Self {
        Self {
            items: HashSet::new(),
            order: Vec::new(),
        }
    }

    /// Insert an item. Returns `true` if it was not already present.
    pub fn insert(&mut self, item: T) -> bool {
        if self.items.contains(&item) {
            return false;
        }
        self.items.insert(item.clone());
        self.order.push(item);
        true
    }

    pub fn contains(&self, item: &T) -> bool {
        self.items.contains(item)
    }

    /// Items in insertion order.
    pub fn iter(&self) -> std::slice::Iter<'_, T> {
        self.order.iter()
    }

    /// Copy of the items in insertion order.
    pub fn to_vec(&self) -> Vec<T> {
        self.order.clone()
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn clear(&mut self) {
        self.items.clear();
        self.order.clear();
    }
}

impl<T: Eq + Hash + Clone> Default for OrderedSet<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<'a, T: Eq + Hash + Clone> IntoIterator for &'a OrderedSet<T> {
    type Item = &'a T;
    type IntoIter = std::slice::Iter<'a, T>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}
