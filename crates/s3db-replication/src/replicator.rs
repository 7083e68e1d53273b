//! The per-target replicator (spec §4.9).

use crate::config::ReplicationConfig;
use crate::driver::{ReplicationDriver, ReplicationEntry};
use crate::entry::{entry_attributes, entry_partitions, ReplicationOp, APPLIED, DEAD, QUEUED};
use crate::filter::ResourcesFilter;
use chrono::{DateTime, Utc};
use s3db_catalog::Catalog;
use s3db_codec::Behavior;
use s3db_common::config::{CodecConfig, ResourceDefaults};
use s3db_common::{Error, Event, EventBus};
use s3db_resource::{IdGeneratorConfig, Resource};
use serde_json::{json, Value};
use std::sync::Arc;

/// Outcome of one [`Replicator::drain`] call.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DrainStats {
    pub applied: usize,
    pub retried: usize,
    pub dead_lettered: usize,
}

/// `{driver, resourcesFilter, config}` fanning one source database's
/// mutations out to one target (spec §4.9).
pub struct Replicator {
    target_id: String,
    driver: Arc<dyn ReplicationDriver>,
    filter: ResourcesFilter,
    log: Arc<Resource>,
    config: ReplicationConfig,
    events: Arc<EventBus>,
}

impl Replicator {
    #[allow(clippy::too_many_arguments)]
    pub async fn open(
        target_id: &str,
        driver: Arc<dyn ReplicationDriver>,
        filter: ResourcesFilter,
        blob: Arc<dyn s3db_blob::BlobClient>,
        catalog: Arc<Catalog>,
        events: Arc<EventBus>,
        codec: &CodecConfig,
        defaults: &ResourceDefaults,
        id_gen_config: IdGeneratorConfig,
        config: ReplicationConfig,
    ) -> Result<Arc<Self>, Error> {
        let log_name = format!("replication_{target_id}");
        let log = Resource::open(&log_name, entry_attributes(), blob, catalog, Arc::clone(&events), codec, defaults, Behavior::UserManaged, id_gen_config).await?;
        for (name, def) in entry_partitions() {
            log.set_partition(name, def).await?;
        }

        Ok(Arc::new(Self { target_id: target_id.to_string(), driver, filter, log, config, events }))
    }

    /// Handle one bus event: filter by `resourcesFilter`, then append a
    /// `ReplicationQueueEntry` for a match (spec §4.9 steps 1-2).
    pub async fn handle_event(&self, event: &Event) -> Result<(), Error> {
        let (op, resource, id, payload) = match event {
            Event::Inserted { resource, id, record } => (ReplicationOp::Insert, resource, id, record.clone()),
            Event::Updated { resource, id, record, .. } => (ReplicationOp::Update, resource, id, record.clone()),
            Event::Deleted { resource, id, previous } => (ReplicationOp::Delete, resource, id, previous.clone().unwrap_or_else(|| json!({"id": id}))),
            _ => return Ok(()),
        };
        if !self.filter.matches(resource) {
            return Ok(());
        }
        self.enqueue(op, resource, id, payload).await?;
        Ok(())
    }

    /// Append one entry directly, bypassing the event bus (used by
    /// [`Self::sync_all_data`] for its synthetic inserts).
    pub async fn enqueue(&self, op: ReplicationOp, resource: &str, record_id: &str, payload: Value) -> Result<Value, Error> {
        let entry = self
            .log
            .insert(json!({
                "op": op.as_str(),
                "resource": resource,
                "recordId": record_id,
                "payload": serde_json::to_string(&payload).map_err(|e| Error::internal(e.to_string()))?,
                "status": QUEUED,
                "attempts": 0,
                "enqueuedAt": Utc::now().to_rfc3339(),
            }))
            .await?;
        self.events.publish(Event::ReplicatorQueued { target: self.target_id.clone(), resource: resource.to_string(), id: record_id.to_string() });
        Ok(entry)
    }

    /// Drain up to `batchSize` ready entries against the driver, retrying
    /// with backoff up to `maxAttempts` before dead-lettering (spec §4.9
    /// step 3).
    pub async fn drain(&self) -> Result<DrainStats, Error> {
        let mut candidates = self.log.list_partition("byStatus", &[("status".to_string(), QUEUED.to_string())], None).await?;
        candidates.sort_by(|a, b| enqueued_at(a).cmp(&enqueued_at(b)));

        let now = Utc::now();
        let mut stats = DrainStats::default();
        for record in candidates.into_iter().take(self.config.batch_size) {
            if !ready_for_retry(&record, now) {
                continue;
            }
            let Some(id) = record.get("id").and_then(Value::as_str).map(str::to_string) else { continue };
            let Some(resource) = record.get("resource").and_then(Value::as_str).map(str::to_string) else { continue };
            let Some(record_id) = record.get("recordId").and_then(Value::as_str).map(str::to_string) else { continue };
            let Some(op) = decode_op(&record) else { continue };
            let payload: Value = record
                .get("payload")
                .and_then(Value::as_str)
                .map(|s| serde_json::from_str(s).unwrap_or(Value::Null))
                .unwrap_or(Value::Null);

            let entry = ReplicationEntry { op, resource: resource.clone(), record_id: record_id.clone(), payload };
            match self.driver.apply(&entry).await {
                Ok(()) => {
                    self.log.update(&id, json!({"status": APPLIED})).await?;
                    self.events.publish(Event::ReplicatorSuccess { target: self.target_id.clone(), resource, id: record_id });
                    stats.applied += 1;
                }
                Err(e) => {
                    let attempts = record.get("attempts").and_then(Value::as_f64).unwrap_or(0.0) as u64 + 1;
                    if attempts < u64::from(self.config.max_attempts) {
                        let next_attempt = Utc::now() + self.config.backoff_for_attempt(attempts as u32);
                        self.log
                            .update(&id, json!({"attempts": attempts, "nextAttemptAt": next_attempt.to_rfc3339(), "lastError": e.to_string()}))
                            .await?;
                        stats.retried += 1;
                    } else {
                        self.log.update(&id, json!({"status": DEAD, "attempts": attempts, "lastError": e.to_string()})).await?;
                        self.events.publish(Event::ReplicatorFailed { target: self.target_id.clone(), resource: resource.clone(), id: record_id.clone(), error: e.to_string() });
                        stats.dead_lettered += 1;
                    }
                }
            }
        }
        Ok(stats)
    }

    /// `syncAllData(targetId)`: enumerate `source` and enqueue a
    /// synthetic `insert` per record for a bulk catch-up (spec §4.9 step
    /// 4).
    pub async fn sync_all_data(&self, source: &Resource) -> Result<usize, Error> {
        let records = source.list(None, 0).await?;
        let mut enqueued = 0;
        for record in records {
            let Some(id) = record.get("id").and_then(Value::as_str).map(str::to_string) else { continue };
            self.enqueue(ReplicationOp::Insert, source.name(), &id, record).await?;
            enqueued += 1;
        }
        Ok(enqueued)
    }

    #[must_use]
    pub fn log(&self) -> &Arc<Resource> {
        &self.log
    }
}

fn decode_op(record: &Value) -> Option<ReplicationOp> {
    match record.get("op").and_then(Value::as_str)? {
        "insert" => Some(ReplicationOp::Insert),
        "update" => Some(ReplicationOp::Update),
        "delete" => Some(ReplicationOp::Delete),
        _ => None,
    }
}

fn ready_for_retry(record: &Value, now: DateTime<Utc>) -> bool {
    match record.get("nextAttemptAt").and_then(Value::as_str) {
        Some(next) => DateTime::parse_from_rfc3339(next).map(|t| t.with_timezone(&Utc) <= now).unwrap_or(true),
        None => true,
    }
}

fn enqueued_at(record: &Value) -> String {
    record.get("enqueuedAt").and_then(Value::as_str).unwrap_or_default().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use s3db_blob::MemoryBlobClient;
    use s3db_schema::{AttributeDef, AttributeType};

    async fn open_target(blob: Arc<dyn s3db_blob::BlobClient>, catalog: Arc<Catalog>, events: Arc<EventBus>) -> Arc<Resource> {
        Resource::open(
            "users_mirror",
            vec![AttributeDef::new("name", AttributeType::String)],
            blob,
            catalog,
            events,
            &CodecConfig::default(),
            &ResourceDefaults::default(),
            Behavior::UserManaged,
            IdGeneratorConfig::default(),
        )
        .await
        .unwrap()
    }

    #[tokio::test]
    async fn enqueue_then_drain_applies_to_target() {
        let blob: Arc<dyn s3db_blob::BlobClient> = Arc::new(MemoryBlobClient::new());
        let events = Arc::new(EventBus::default());
        let catalog = Arc::new(Catalog::connect(Arc::clone(&blob), Arc::clone(&events)).await.unwrap());
        let target = open_target(Arc::clone(&blob), Arc::clone(&catalog), Arc::clone(&events)).await;
        let driver: Arc<dyn ReplicationDriver> = Arc::new(crate::driver::ResourceDriver::new(Arc::clone(&target)));

        let replicator = Replicator::open(
            "mirror-1",
            driver,
            ResourcesFilter::all(),
            blob,
            catalog,
            events,
            &CodecConfig::default(),
            &ResourceDefaults::default(),
            IdGeneratorConfig::default(),
            ReplicationConfig::default(),
        )
        .await
        .unwrap();

        replicator.enqueue(ReplicationOp::Insert, "users", "u1", json!({"id": "u1", "name": "ada"})).await.unwrap();
        let stats = replicator.drain().await.unwrap();
        assert_eq!(stats.applied, 1);

        let mirrored = target.get_or_throw("u1").await.unwrap();
        assert_eq!(mirrored["name"], json!("ada"));
    }

    #[tokio::test]
    async fn failing_driver_retries_then_dead_letters() {
        struct AlwaysFails;
        #[async_trait::async_trait]
        impl ReplicationDriver for AlwaysFails {
            async fn apply(&self, _entry: &ReplicationEntry) -> Result<(), Error> {
                Err(Error::internal("sink unreachable"))
            }
        }

        let blob: Arc<dyn s3db_blob::BlobClient> = Arc::new(MemoryBlobClient::new());
        let events = Arc::new(EventBus::default());
        let catalog = Arc::new(Catalog::connect(Arc::clone(&blob), Arc::clone(&events)).await.unwrap());

        let mut config = ReplicationConfig::default();
        config.max_attempts = 1;
        let replicator = Replicator::open(
            "mirror-2",
            Arc::new(AlwaysFails),
            ResourcesFilter::all(),
            blob,
            catalog,
            events,
            &CodecConfig::default(),
            &ResourceDefaults::default(),
            IdGeneratorConfig::default(),
            config,
        )
        .await
        .unwrap();

        replicator.enqueue(ReplicationOp::Insert, "users", "u1", json!({"id": "u1"})).await.unwrap();
        let stats = replicator.drain().await.unwrap();
        assert_eq!(stats.dead_lettered, 1);
    }

    #[tokio::test]
    async fn resources_filter_excludes_non_matching() {
        let filter = ResourcesFilter::only(["users"]);
        assert!(filter.matches("users"));
        assert!(!filter.matches("orders"));
    }

    #[tokio::test]
    async fn sync_all_data_enqueues_and_drains_every_source_record() {
        let blob: Arc<dyn s3db_blob::BlobClient> = Arc::new(MemoryBlobClient::new());
        let events = Arc::new(EventBus::default());
        let catalog = Arc::new(Catalog::connect(Arc::clone(&blob), Arc::clone(&events)).await.unwrap());

        let source = Resource::open(
            "users",
            vec![AttributeDef::new("name", AttributeType::String)],
            Arc::clone(&blob),
            Arc::clone(&catalog),
            Arc::clone(&events),
            &CodecConfig::default(),
            &ResourceDefaults::default(),
            Behavior::UserManaged,
            IdGeneratorConfig::default(),
        )
        .await
        .unwrap();
        source.upsert("u1", json!({"name": "ada"})).await.unwrap();
        source.upsert("u2", json!({"name": "grace"})).await.unwrap();

        let target = open_target(Arc::clone(&blob), Arc::clone(&catalog), Arc::clone(&events)).await;
        let driver: Arc<dyn ReplicationDriver> = Arc::new(crate::driver::ResourceDriver::new(Arc::clone(&target)));
        let replicator = Replicator::open(
            "mirror-3",
            driver,
            ResourcesFilter::all(),
            blob,
            catalog,
            events,
            &CodecConfig::default(),
            &ResourceDefaults::default(),
            IdGeneratorConfig::default(),
            ReplicationConfig::default(),
        )
        .await
        .unwrap();

        let enqueued = replicator.sync_all_data(&source).await.unwrap();
        assert_eq!(enqueued, 2);

        let stats = replicator.drain().await.unwrap();
        assert_eq!(stats.applied, 2);

        let applied = replicator.log().list(None, 0).await.unwrap();
        assert!(applied.iter().all(|e| e["status"] == json!(APPLIED)));
        assert!(target.get_or_null("u1").await.unwrap().is_some());
        assert!(target.get_or_null("u2").await.unwrap().is_some());
    }
}
