//! Shared utilities for the Veil FHE coprocessor.

pub mod ordered_set;

pub use ordered_set::OrderedSet;
