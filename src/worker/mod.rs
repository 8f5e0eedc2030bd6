//! Worker machinery: the poll loop, the handler pool and backoff.
//!
//! Core components:
//! - `poller`: one coordinating task per client that fetches and locks
//! - `dispatcher`: bounded pool that runs handlers
//! - `backoff`: wait strategies between empty cycles

pub mod backoff;
pub mod dispatcher;
pub mod poller;

pub use backoff::{BackoffStrategy, ExponentialBackoff};
pub use dispatcher::TaskDispatcher;
pub use poller::{CycleOutcome, Poller, PollerSettings};
