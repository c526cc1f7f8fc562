//! Nullable infrastructure for deterministic testing.
//!
//! The coprocessor's two external dependencies, host chain storage and the
//! remote compute service, sit behind traits. This crate provides
//! test-friendly implementations that:
//! - Return deterministic values
//! - Can be controlled programmatically
//! - Never touch the network
//!
//! Usage: swap real implementations for nullables in tests.

pub mod chain;
pub mod executor;

pub use chain::NullChainStorage;
pub use executor::NullExecutor;
