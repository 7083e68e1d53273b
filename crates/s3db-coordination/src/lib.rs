//! s3db-coordination - The Coordination Service (spec §4.6)
//!
//! One leader per namespace across N processes, elected without
//! conditional writes by re-reading a just-written lease object; worker
//! heartbeats and staleness sweeping layered on the same blob.

pub mod lease;
pub mod service;
pub mod worker;

pub use lease::{AcquireOutcome, Lease, WorkerHeartbeat};
pub use service::{CoordinationService, Metrics};
