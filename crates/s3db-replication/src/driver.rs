//! Replication drivers (spec §4.9 "`driver ∈ {s3db, queue, warehouse,
//! relational, custom}`"). Only `ResourceDriver` (the `s3db` case,
//! mirroring into another in-process resource) ships built in; the
//! others are left to whatever plugin implements [`ReplicationDriver`].

use crate::entry::ReplicationOp;
use async_trait::async_trait;
use s3db_common::Error;
use s3db_resource::Resource;
use serde_json::Value;
use std::sync::Arc;

/// One replication queue entry, decoded and ready for a driver to apply.
#[derive(Clone, Debug)]
pub struct ReplicationEntry {
    pub op: ReplicationOp,
    pub resource: String,
    pub record_id: String,
    pub payload: Value,
}

/// Implemented by whatever mirrors a mutation to an external sink.
#[async_trait]
pub trait ReplicationDriver: Send + Sync {
    async fn apply(&self, entry: &ReplicationEntry) -> Result<(), Error>;
}

/// Mirrors into another `Resource` in the same process (spec's `s3db`
/// driver): the only target a pure core can reach without an external
/// plugin.
pub struct ResourceDriver {
    target: Arc<Resource>,
}

impl ResourceDriver {
    #[must_use]
    pub fn new(target: Arc<Resource>) -> Self {
        Self { target }
    }
}

#[async_trait]
impl ReplicationDriver for ResourceDriver {
    async fn apply(&self, entry: &ReplicationEntry) -> Result<(), Error> {
        match entry.op {
            ReplicationOp::Insert | ReplicationOp::Update => {
                self.target.upsert(&entry.record_id, entry.payload.clone()).await?;
            }
            ReplicationOp::Delete => {
                if self.target.exists(&entry.record_id).await? {
                    self.target.delete(&entry.record_id).await?;
                }
            }
        }
        Ok(())
    }
}
