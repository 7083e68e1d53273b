//! Replication queue entry shape (spec §2 "Replication Queue Entry —
//! per replicator target: `{op, resource, recordId, payload, attempts,
//! nextAttemptAt, status}`").

use s3db_catalog::{PartitionDef, PartitionFieldType};
use s3db_schema::{AttributeDef, AttributeType, Validators};
use std::collections::BTreeMap;

pub const QUEUED: &str = "queued";
pub const APPLIED: &str = "applied";
pub const DEAD: &str = "dead";

#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReplicationOp {
    Insert,
    Update,
    Delete,
}

impl ReplicationOp {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Insert => "insert",
            Self::Update => "update",
            Self::Delete => "delete",
        }
    }
}

pub(crate) fn entry_attributes() -> Vec<AttributeDef> {
    vec![
        AttributeDef::new("op", AttributeType::String).required().with_validators(Validators {
            allowed_values: Some(vec!["insert".to_string(), "update".to_string(), "delete".to_string()]),
            ..Validators::default()
        }),
        AttributeDef::new("resource", AttributeType::String).required(),
        AttributeDef::new("recordId", AttributeType::String).required(),
        // `payload` is stored pre-serialized: see s3db-queue's own
        // `payload` attribute for why an arbitrary nested object can't be
        // a declared `object` attribute here.
        AttributeDef::new("payload", AttributeType::String).required(),
        AttributeDef::new("status", AttributeType::String).required().with_validators(Validators {
            allowed_values: Some(vec![QUEUED.to_string(), APPLIED.to_string(), DEAD.to_string()]),
            ..Validators::default()
        }),
        AttributeDef::new("attempts", AttributeType::Number).with_default(serde_json::json!(0)),
        AttributeDef::new("enqueuedAt", AttributeType::Date).required(),
        AttributeDef::new("nextAttemptAt", AttributeType::Date),
        AttributeDef::new("lastError", AttributeType::String),
    ]
}

pub(crate) fn entry_partitions() -> BTreeMap<&'static str, PartitionDef> {
    let mut defs = BTreeMap::new();
    let mut by_status = BTreeMap::new();
    by_status.insert("status".to_string(), PartitionFieldType::String);
    defs.insert("byStatus", PartitionDef { fields: by_status });

    let mut by_resource = BTreeMap::new();
    by_resource.insert("resource".to_string(), PartitionFieldType::String);
    defs.insert("byResource", PartitionDef { fields: by_resource });
    defs
}
