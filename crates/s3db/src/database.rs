//! `Database`: the top-level handle tying every other crate together
//! (spec §1 "a document database layered on any S3-compatible object
//! store").

use dashmap::DashMap;
use s3db_blob::BlobClient;
use s3db_catalog::Catalog;
use s3db_codec::Behavior;
use s3db_common::config::Config;
use s3db_common::{ConnectionString, Error, Event, EventBus, Namespace};
use s3db_coordination::CoordinationService;
use s3db_counter::{ConsolidationMode, CounterEngine};
use s3db_queue::{Queue, QueueConfig};
use s3db_replication::{ReplicationConfig, ReplicationDriver, Replicator, ResourcesFilter};
use s3db_resource::{IdGeneratorConfig, Resource};
use s3db_schema::AttributeDef;
use std::sync::Arc;

/// One connected database: a blob client, its self-healing catalog, the
/// shared event bus, a per-namespace coordination service, and every
/// `Resource`/`Queue`/`CounterEngine`/`Replicator` opened against them.
pub struct Database {
    blob: Arc<dyn BlobClient>,
    catalog: Arc<Catalog>,
    events: Arc<EventBus>,
    coordination: Arc<CoordinationService>,
    config: Config,
    resources: DashMap<String, Arc<Resource>>,
}

impl Database {
    /// Connect to `s3://...` or `memory://...` (spec §6), run the
    /// catalog's self-healing pipeline, and stand up the namespace's
    /// coordination service.
    pub async fn connect(uri: &str, mut config: Config) -> Result<Arc<Self>, Error> {
        config.coordination.validate().map_err(Error::configuration)?;

        let conn = ConnectionString::parse(uri)?;
        let blob_config = conn.apply(config.blob.clone());
        let blob = s3db_blob::connect(&conn, blob_config).await.map_err(|e| Error::internal(e.to_string()))?;

        let (bucket, prefix) = match &conn {
            ConnectionString::S3 { bucket, prefix, .. } | ConnectionString::Memory { bucket, prefix } => (bucket.clone(), prefix.clone()),
        };
        config.codec = config.codec.with_database_salt(&bucket, &prefix);

        let events = Arc::new(EventBus::default());
        let catalog = Arc::new(Catalog::connect(Arc::clone(&blob), Arc::clone(&events)).await?);

        let namespace = Namespace(format!("{bucket}/{prefix}"));
        let coordination = CoordinationService::new(Arc::clone(&blob), Arc::clone(&events), namespace, config.coordination.clone());

        events.publish(Event::Connected { bucket, prefix });

        Ok(Arc::new(Self { blob, catalog, events, coordination, config, resources: DashMap::new() }))
    }

    #[must_use]
    pub fn events(&self) -> &Arc<EventBus> {
        &self.events
    }

    #[must_use]
    pub fn catalog(&self) -> &Arc<Catalog> {
        &self.catalog
    }

    #[must_use]
    pub fn coordination(&self) -> &Arc<CoordinationService> {
        &self.coordination
    }

    #[must_use]
    pub fn blob(&self) -> &Arc<dyn BlobClient> {
        &self.blob
    }

    /// Open (or return the cached handle to) a resource. A second call
    /// with the same name returns the same `Arc`, regardless of the
    /// attributes passed — only the first open declares the schema.
    pub async fn resource(&self, name: &str, attributes: Vec<AttributeDef>, behavior: Behavior, id_gen_config: IdGeneratorConfig) -> Result<Arc<Resource>, Error> {
        if let Some(existing) = self.resources.get(name) {
            return Ok(Arc::clone(&existing));
        }
        let resource = Resource::open(
            name,
            attributes,
            Arc::clone(&self.blob),
            Arc::clone(&self.catalog),
            Arc::clone(&self.events),
            &self.config.codec,
            &self.config.resource,
            behavior,
            id_gen_config,
        )
        .await?;
        self.resources.insert(name.to_string(), Arc::clone(&resource));
        self.events.publish(Event::ResourceCreated { resource: name.to_string() });
        Ok(resource)
    }

    /// Open a queue layered on a resource of the same name (spec §4.7).
    pub async fn queue(&self, name: &str, config: QueueConfig) -> Result<Arc<Queue>, Error> {
        Queue::open(name, Arc::clone(&self.blob), Arc::clone(&self.catalog), Arc::clone(&self.events), &self.config.codec, &self.config.resource, IdGeneratorConfig::default(), config).await
    }

    /// Attach a counter engine to `field` on an already-open resource
    /// (spec §4.8).
    pub async fn counter(&self, parent: Arc<Resource>, field: &str, mode: ConsolidationMode, with_analytics: bool) -> Result<Arc<CounterEngine>, Error> {
        CounterEngine::attach(
            parent,
            field,
            Arc::clone(&self.blob),
            Arc::clone(&self.catalog),
            Arc::clone(&self.events),
            &self.config.codec,
            &self.config.resource,
            IdGeneratorConfig::default(),
            mode,
            with_analytics,
        )
        .await
    }

    /// Open a replicator for one target (spec §4.9).
    pub async fn replicator(&self, target_id: &str, driver: Arc<dyn ReplicationDriver>, filter: ResourcesFilter, config: ReplicationConfig) -> Result<Arc<Replicator>, Error> {
        Replicator::open(
            target_id,
            driver,
            filter,
            Arc::clone(&self.blob),
            Arc::clone(&self.catalog),
            Arc::clone(&self.events),
            &self.config.codec,
            &self.config.resource,
            IdGeneratorConfig::default(),
            config,
        )
        .await
    }

    /// Start the coordination service's periodic tick task.
    #[must_use]
    pub fn spawn_coordination(&self) -> tokio::task::JoinHandle<()> {
        self.coordination.spawn()
    }

    pub fn disconnect(&self) {
        self.coordination.stop();
        self.events.publish(Event::Disconnected);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use s3db_queue::QueueConfig;
    use s3db_resource::IdGeneratorConfig;
    use s3db_schema::AttributeType;
    use serde_json::json;

    #[tokio::test]
    async fn connect_over_memory_emits_connected_and_heals_a_blank_manifest() {
        let db = Database::connect("memory://acme/app", Config::default()).await.unwrap();
        let mut rx = db.events().subscribe();
        assert_eq!(db.catalog().manifest().resources.len(), 0);
        db.disconnect();
        let event = rx.recv().await.unwrap();
        assert!(matches!(event, Event::Disconnected));
    }

    #[tokio::test]
    async fn resource_is_cached_across_repeated_opens() {
        let db = Database::connect("memory://acme/app", Config::default()).await.unwrap();
        let attrs = vec![AttributeDef::new("name", AttributeType::String).required()];
        let first = db.resource("users", attrs.clone(), Behavior::UserManaged, IdGeneratorConfig::default()).await.unwrap();
        let second = db.resource("users", attrs, Behavior::UserManaged, IdGeneratorConfig::default()).await.unwrap();
        assert!(Arc::ptr_eq(&first, &second));
    }

    #[tokio::test]
    async fn end_to_end_resource_queue_counter_and_replication() {
        let db = Database::connect("memory://acme/app", Config::default()).await.unwrap();

        // Resource: insert then get.
        let users = db
            .resource(
                "users",
                vec![AttributeDef::new("name", AttributeType::String).required(), AttributeDef::new("clicks", AttributeType::Number).with_default(json!(0))],
                Behavior::UserManaged,
                IdGeneratorConfig::default(),
            )
            .await
            .unwrap();
        let inserted = users.insert(json!({"name": "Ada"})).await.unwrap();
        let id = inserted["id"].as_str().unwrap().to_string();
        assert_eq!(users.get_or_throw(&id).await.unwrap()["name"], json!("Ada"));

        // Queue: enqueue, claim, complete.
        let queue = db.queue("jobs", QueueConfig::default()).await.unwrap();
        queue.enqueue(json!({"userId": id})).await.unwrap();
        let claimed = queue.claim_batch("worker-1").await.unwrap();
        assert_eq!(claimed.len(), 1);
        let stats = queue.queue_stats().await.unwrap();
        assert_eq!(stats.processing, 1);

        // Counter: five adds, one sub, synchronously consolidated.
        let counter = db.counter(Arc::clone(&users), "clicks", ConsolidationMode::Sync, false).await.unwrap();
        for _ in 0..5 {
            counter.add(&id, 1.0).await.unwrap();
        }
        counter.sub(&id, 2.0).await.unwrap();
        assert_eq!(users.get_or_throw(&id).await.unwrap()["clicks"].as_f64(), Some(3.0));

        // Replication: mirror into a second resource via the s3db driver.
        let mirror = db
            .resource("users_mirror", vec![AttributeDef::new("name", AttributeType::String)], Behavior::UserManaged, IdGeneratorConfig::default())
            .await
            .unwrap();
        let driver: Arc<dyn ReplicationDriver> = Arc::new(s3db_replication::ResourceDriver::new(Arc::clone(&mirror)));
        let replicator = db.replicator("mirror-1", driver, ResourcesFilter::all(), ReplicationConfig::default()).await.unwrap();
        let synced = replicator.sync_all_data(&users).await.unwrap();
        assert_eq!(synced, 1);
        let drain = replicator.drain().await.unwrap();
        assert_eq!(drain.applied, 1);
        assert_eq!(mirror.get_or_throw(&id).await.unwrap()["name"], json!("Ada"));
    }
}
