//! Veil FHE coprocessor: session tracking, ciphertext cache and executor
//! flushing.
//!
//! The coprocessor sits beside a chain's execution layer:
//! - Intercepted library calls are decoded into computations
//!   ([`dispatch`]) and recorded on a per-transaction [`Session`]
//! - Committed sessions land in the [`CiphertextCache`] and, in deferred
//!   mode, in the on-chain late-commit queue
//! - Pending work is batched to the remote compute service ([`Flusher`]),
//!   inline at commit or from the background [`FlushScheduler`]
//! - Materialized results are persisted to chain storage and swept once
//!   they fall out of the reorg window

pub mod cache;
pub mod config;
pub mod coprocessor;
pub mod dispatch;
pub mod error;
pub mod flush;
pub mod logging;
pub mod metrics;
pub mod scheduler;
pub mod session;
pub mod shutdown;

pub use cache::{CacheState, CiphertextCache, GcPolicy, MaterializedArena, PendingQueue};
pub use config::CoprocConfig;
pub use coprocessor::{CommitSummary, Coprocessor};
pub use dispatch::decode_call;
pub use error::CoprocError;
pub use flush::{FlushOutcome, Flusher, PreparedBatch, Unsatisfied};
pub use logging::{init_logging, LogFormat};
pub use metrics::CoprocMetrics;
pub use scheduler::FlushScheduler;
pub use session::Session;
pub use shutdown::ShutdownController;
