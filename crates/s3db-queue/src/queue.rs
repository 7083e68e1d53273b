//! A queue: a [`Resource`] specialization with a `byState` partition and
//! a claim/drain/reap cycle (spec §4.7).

use crate::config::QueueConfig;
use crate::handler::QueueHandler;
use chrono::{DateTime, Utc};
use s3db_catalog::{Catalog, PartitionDef, PartitionFieldType};
use s3db_codec::Behavior;
use s3db_common::config::{CodecConfig, ResourceDefaults};
use s3db_common::{Error, EventBus};
use s3db_resource::{IdGeneratorConfig, Resource};
use s3db_schema::{AttributeDef, AttributeType, Validators};
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::sync::Arc;

pub const PENDING: &str = "pending";
pub const PROCESSING: &str = "processing";
pub const COMPLETED: &str = "completed";
pub const FAILED: &str = "failed";

/// Per-state counts (`queueStats()`, spec §4.7).
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, serde::Serialize)]
pub struct QueueStats {
    pub pending: usize,
    pub processing: usize,
    pub completed: usize,
    pub failed: usize,
}

/// Outcome of one [`Queue::drain_once`] call.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DrainStats {
    pub completed: usize,
    pub retried: usize,
    pub dead_lettered: usize,
}

/// A visibility-timeout work queue layered on a single underlying
/// [`Resource`] (spec §4.7 "A queue is a resource specialization").
pub struct Queue {
    resource: Arc<Resource>,
    config: QueueConfig,
}

impl Queue {
    /// Open (creating if absent) the resource backing this queue and
    /// ensure its `byState` partition is declared.
    pub async fn open(
        name: &str,
        blob: Arc<dyn s3db_blob::BlobClient>,
        catalog: Arc<Catalog>,
        events: Arc<EventBus>,
        codec: &CodecConfig,
        defaults: &ResourceDefaults,
        id_gen_config: IdGeneratorConfig,
        config: QueueConfig,
    ) -> Result<Arc<Self>, Error> {
        let resource = Resource::open(name, queue_attributes(), blob, catalog, events, codec, defaults, Behavior::UserManaged, id_gen_config).await?;

        let mut fields = BTreeMap::new();
        fields.insert("state".to_string(), PartitionFieldType::String);
        resource.set_partition("byState", PartitionDef { fields }).await?;

        Ok(Arc::new(Self { resource, config }))
    }

    #[must_use]
    pub fn resource(&self) -> &Arc<Resource> {
        &self.resource
    }

    /// `enqueue(payload)`: insert a record with `state = pending`. The
    /// payload is carried as a JSON string rather than a declared
    /// `object` attribute — flattening recurses through nested objects
    /// before validation ever sees them, so an arbitrary caller payload
    /// would lose every field but its top level if stored as one.
    pub async fn enqueue(&self, payload: Value) -> Result<Value, Error> {
        let now = Utc::now();
        // Optional fields (`leasedBy`, `leaseExpiresAt`, ...) are left out
        // entirely rather than set to JSON null: every declared attribute
        // here is typed, and a present-but-null value fails that type
        // check even when the attribute isn't required.
        let record = json!({
            "payload": serde_json::to_string(&payload).map_err(|e| Error::internal(e.to_string()))?,
            "state": PENDING,
            "attempts": 0,
            "enqueuedAt": now.to_rfc3339(),
        });
        self.resource.insert(record).await
    }

    /// Steps 1-2 of spec §4.7's algorithm: list up to `batchSize` pending
    /// ids ordered by enqueue time, then attempt to claim each one,
    /// dropping any this worker lost the race for.
    pub async fn claim_batch(&self, worker_id: &str) -> Result<Vec<Value>, Error> {
        let mut candidates = self
            .resource
            .list_partition("byState", &[("state".to_string(), PENDING.to_string())], None)
            .await?;
        candidates.sort_by(|a, b| enqueued_at(a).cmp(&enqueued_at(b)));

        let now = Utc::now();
        let mut claimed = Vec::new();
        for candidate in candidates {
            if claimed.len() >= self.config.batch_size {
                break;
            }
            if !ready_for_claim(&candidate, now) {
                continue;
            }
            let Some(id) = candidate.get("id").and_then(Value::as_str).map(str::to_string) else { continue };
            if let Some(record) = self.try_claim(&id, worker_id, now).await? {
                claimed.push(record);
            }
        }
        Ok(claimed)
    }

    /// Write `state=processing, leasedBy, leaseExpiresAt`, then
    /// immediately re-read; if another worker's write landed after ours,
    /// `leasedBy` will no longer be `worker_id` and we skip it (spec
    /// §4.7 step 2).
    async fn try_claim(&self, id: &str, worker_id: &str, now: DateTime<Utc>) -> Result<Option<Value>, Error> {
        let lease_expires = now + chrono::Duration::from_std(self.config.visibility_timeout).unwrap_or(chrono::Duration::seconds(30));
        self.resource
            .update(id, json!({"state": PROCESSING, "leasedBy": worker_id, "leaseExpiresAt": lease_expires.to_rfc3339()}))
            .await?;

        let confirmed = self.resource.get_or_throw(id).await?;
        if confirmed.get("leasedBy").and_then(Value::as_str) == Some(worker_id) {
            Ok(Some(confirmed))
        } else {
            Ok(None)
        }
    }

    /// One full cycle: claim a batch, invoke `handler` per message, and
    /// transition each to `completed`/back to `pending` with a backoff/
    /// or `failed` (spec §4.7 step 3).
    pub async fn drain_once(&self, worker_id: &str, handler: &dyn QueueHandler) -> Result<DrainStats, Error> {
        let claimed = self.claim_batch(worker_id).await?;
        let mut stats = DrainStats::default();
        for record in claimed {
            let Some(id) = record.get("id").and_then(Value::as_str).map(str::to_string) else { continue };
            let payload = record
                .get("payload")
                .and_then(Value::as_str)
                .map(|s| serde_json::from_str(s).unwrap_or(Value::Null))
                .unwrap_or(Value::Null);
            match handler.handle(payload).await {
                Ok(()) => {
                    self.resource.update(&id, json!({"state": COMPLETED})).await?;
                    stats.completed += 1;
                }
                Err(e) => {
                    let attempts = record.get("attempts").and_then(Value::as_f64).unwrap_or(0.0) as u64 + 1;
                    if attempts < u64::from(self.config.max_attempts) {
                        let next_attempt = Utc::now() + self.config.backoff_for_attempt(attempts as u32);
                        self.resource
                            .update(
                                &id,
                                json!({
                                    "state": PENDING,
                                    "attempts": attempts,
                                    "lastError": e.to_string(),
                                    "nextAttemptAt": next_attempt.to_rfc3339(),
                                }),
                            )
                            .await?;
                        stats.retried += 1;
                    } else {
                        self.resource.update(&id, json!({"state": FAILED, "attempts": attempts, "lastError": e.to_string()})).await?;
                        stats.dead_lettered += 1;
                    }
                }
            }
        }
        Ok(stats)
    }

    /// Transition every `processing` record whose lease has expired back
    /// to `pending` (spec §4.7 step 4). Idempotent: a record already
    /// reclaimed by another reaper pass is simply skipped.
    pub async fn reap(&self, now: DateTime<Utc>) -> Result<usize, Error> {
        let processing = self
            .resource
            .list_partition("byState", &[("state".to_string(), PROCESSING.to_string())], None)
            .await?;

        let mut swept = 0;
        for record in processing {
            let Some(expires) = record.get("leaseExpiresAt").and_then(Value::as_str) else { continue };
            let Ok(expires) = DateTime::parse_from_rfc3339(expires) else { continue };
            if expires.with_timezone(&Utc) > now {
                continue;
            }
            let Some(id) = record.get("id").and_then(Value::as_str).map(str::to_string) else { continue };
            self.resource.update(&id, json!({"state": PENDING})).await?;
            swept += 1;
        }
        Ok(swept)
    }

    /// `queueStats()`: per-state counts via partition lists.
    pub async fn queue_stats(&self) -> Result<QueueStats, Error> {
        let count = |state: &'static str| {
            let resource = Arc::clone(&self.resource);
            async move { resource.list_partition("byState", &[("state".to_string(), state.to_string())], None).await.map(|v| v.len()) }
        };
        Ok(QueueStats {
            pending: count(PENDING).await?,
            processing: count(PROCESSING).await?,
            completed: count(COMPLETED).await?,
            failed: count(FAILED).await?,
        })
    }
}

fn ready_for_claim(record: &Value, now: DateTime<Utc>) -> bool {
    match record.get("nextAttemptAt").and_then(Value::as_str) {
        Some(next) => DateTime::parse_from_rfc3339(next).map(|t| t.with_timezone(&Utc) <= now).unwrap_or(true),
        None => true,
    }
}

fn enqueued_at(record: &Value) -> String {
    record.get("enqueuedAt").and_then(Value::as_str).unwrap_or_default().to_string()
}

fn queue_attributes() -> Vec<AttributeDef> {
    vec![
        AttributeDef::new("payload", AttributeType::String).required(),
        AttributeDef::new("state", AttributeType::String).required().with_validators(Validators {
            allowed_values: Some(vec![PENDING.to_string(), PROCESSING.to_string(), COMPLETED.to_string(), FAILED.to_string()]),
            ..Validators::default()
        }),
        AttributeDef::new("attempts", AttributeType::Number).with_default(json!(0)),
        AttributeDef::new("enqueuedAt", AttributeType::Date).required(),
        AttributeDef::new("leasedBy", AttributeType::String),
        AttributeDef::new("leaseExpiresAt", AttributeType::Date),
        AttributeDef::new("nextAttemptAt", AttributeType::Date),
        AttributeDef::new("lastError", AttributeType::String),
    ]
}
