//! s3db-queue - The Queue Runtime (spec §4.7)
//!
//! A queue is a `Resource` specialization with a `byState` partition:
//! `enqueue` inserts `state = pending`, workers `claim_batch` against
//! that partition with a write-then-re-read race check, `drain_once`
//! runs a handler per claimed message and routes success/failure to
//! `completed`/back to `pending` with backoff/`failed`, and a separate
//! `reap` sweeps expired leases back to `pending`.

pub mod config;
pub mod handler;
pub mod queue;

pub use config::QueueConfig;
pub use handler::{FnHandler, QueueHandler};
pub use queue::{DrainStats, Queue, QueueStats, COMPLETED, FAILED, PENDING, PROCESSING};
