//! The Resource (spec §4.3): the public CRUD/query surface wiring
//! together id generation, the codec stack, partition maintenance, and
//! the hook/middleware pipelines.

use crate::id::{IdGenerator, IdGeneratorConfig};
use crate::middleware::{CoreOp, MiddlewareChain};
use crate::partition;
use crate::query;
use crate::hooks::HookPipeline;
use bytes::Bytes;
use futures::future::BoxFuture;
use parking_lot::RwLock;
use s3db_blob::{BlobClient, BlobErrorKind};
use s3db_catalog::{Catalog, HookPoint, ManifestSchemaVersion, PartitionDef};
use s3db_codec::{self, reserved, Behavior, EncodedRecord};
use s3db_common::config::{CodecConfig, ResourceDefaults};
use s3db_common::error::ValidationIssue;
use s3db_common::{Error, Event, EventBus, ResourceName};
use s3db_schema::{AttributeDef, AttributeType, SchemaVersion};
use serde_json::{json, Value};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tracing::warn;

/// One open resource: a live handle over a manifest entry, bound to a
/// blob client, schema version, partition set and hook/middleware
/// pipelines.
pub struct Resource {
    name: ResourceName,
    blob: Arc<dyn BlobClient>,
    catalog: Arc<Catalog>,
    events: Arc<EventBus>,
    id_gen: Arc<IdGenerator>,
    behavior: Behavior,
    passphrase: Option<String>,
    salt: Vec<u8>,
    compression_enabled: bool,
    compression_min_savings: usize,
    metadata_cap_bytes: usize,
    schema: RwLock<SchemaVersion>,
    partitions: RwLock<BTreeMap<String, PartitionDef>>,
    async_partitions: bool,
    persist_hooks: bool,
    pub hooks: HookPipeline,
    pub middleware: MiddlewareChain,
}

/// Per-record validation result (spec §4.3 "Validation without persistence").
pub struct Validated {
    pub valid: bool,
    pub errors: Vec<ValidationIssue>,
    pub data: Value,
}

impl Resource {
    /// Open (idempotently creating if absent) a resource against an
    /// already-connected catalog, reconstructing its current schema
    /// version and partition/hook state from the manifest.
    pub async fn open(
        name: &str,
        attributes: Vec<AttributeDef>,
        blob: Arc<dyn BlobClient>,
        catalog: Arc<Catalog>,
        events: Arc<EventBus>,
        codec: &CodecConfig,
        defaults: &ResourceDefaults,
        behavior: Behavior,
        id_gen_config: IdGeneratorConfig,
    ) -> Result<Arc<Self>, Error> {
        let resource_name = ResourceName::new(name).map_err(|e| Error::validation(vec![ValidationIssue { path: "name".into(), message: e.to_string() }]))?;

        if codec.passphrase.is_none() && attributes.iter().any(|a| a.attr_type == AttributeType::Secret) {
            return Err(Error::configuration(format!(
                "resource {name:?} declares a secret-typed attribute but no codec passphrase is configured"
            )));
        }

        let hash = s3db_schema::content_hash(&attributes);
        let initial_version = ManifestSchemaVersion { hash, attributes, partitions: BTreeMap::new(), hooks: BTreeMap::new() };
        let manifest_entry = catalog.create_resource(name, initial_version, &behavior.to_string()).await?;

        let current = manifest_entry
            .versions
            .get(&manifest_entry.current_version)
            .cloned()
            .ok_or_else(|| Error::internal(format!("resource {name:?} has no entry for its own currentVersion")))?;
        let schema = SchemaVersion::new(manifest_entry.current_version.clone(), current.attributes.clone());

        let hooks = if defaults.persist_hooks { HookPipeline::from_manifest(&current.hooks) } else { HookPipeline::default() };
        let id_gen = Arc::new(IdGenerator::new(id_gen_config, Arc::clone(&blob), name));

        Ok(Arc::new(Self {
            name: resource_name,
            blob,
            catalog,
            events,
            id_gen,
            behavior,
            passphrase: codec.passphrase.clone(),
            salt: codec.salt_bytes(),
            compression_enabled: codec.compression_enabled,
            compression_min_savings: codec.compression_min_savings,
            metadata_cap_bytes: codec.metadata_cap_bytes,
            schema: RwLock::new(schema),
            partitions: RwLock::new(current.partitions),
            async_partitions: defaults.async_partitions,
            persist_hooks: defaults.persist_hooks,
            hooks,
            middleware: MiddlewareChain::default(),
        }))
    }

    #[must_use]
    pub fn name(&self) -> &str {
        self.name.as_str()
    }

    fn data_key(&self, id: &str) -> String {
        s3db_common::keys::data(self.name.as_str(), id)
    }

    fn schema_version_for(&self, version_id: &str) -> Result<SchemaVersion, Error> {
        if self.schema.read().id.0 == version_id {
            return Ok(self.schema.read().clone());
        }
        let resource = self
            .catalog
            .get_resource(self.name.as_str())
            .ok_or_else(|| Error::internal(format!("resource {:?} missing from catalog", self.name.as_str())))?;
        let manifest_version = resource.versions.get(version_id).ok_or_else(|| {
            Error::ManifestCorrupted(format!("schema version {version_id:?} referenced by a record is missing from the manifest"))
        })?;
        Ok(SchemaVersion::new(version_id, manifest_version.attributes.clone()))
    }

    fn encode_record(&self, value: &Value) -> Result<EncodedRecord, Error> {
        let version = self.schema.read().clone();
        s3db_codec::encode(
            &version,
            self.behavior,
            self.passphrase.as_deref(),
            &self.salt,
            self.compression_enabled,
            self.compression_min_savings,
            self.metadata_cap_bytes,
            value,
        )
    }

    fn decode_record(&self, id: &str, encoded: &EncodedRecord) -> Result<Value, Error> {
        let expanded = s3db_codec::expand_metadata(&encoded.metadata)?;
        let version_id = expanded.get(reserved::VERSION).cloned().unwrap_or_else(|| self.schema.read().id.0.clone());
        let version = self.schema_version_for(&version_id)?;
        let decoded = s3db_codec::decode(&version, self.passphrase.as_deref(), &self.salt, encoded)?;
        let mut value = decoded.value;
        if let Value::Object(map) = &mut value {
            map.insert("id".to_string(), json!(id));
            if !decoded.decryption_failed.is_empty() {
                map.insert("_decryptionFailed".to_string(), json!(decoded.decryption_failed));
            }
        }
        Ok(value)
    }

    async fn fetch_encoded(&self, id: &str) -> Result<Option<EncodedRecord>, Error> {
        match self.blob.get_object(&self.data_key(id)).await {
            Ok(out) => Ok(Some(EncodedRecord {
                metadata: out.metadata.into_iter().collect(),
                body: if out.body.is_empty() { None } else { Some(out.body.to_vec()) },
            })),
            Err(e) if e.kind == BlobErrorKind::NoSuchKey => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn put_encoded(&self, id: &str, encoded: &EncodedRecord) -> Result<(), Error> {
        let body = encoded.body.clone().map(Bytes::from).unwrap_or_default();
        let metadata: HashMap<String, String> = encoded.metadata.clone().into_iter().collect();
        self.blob.put_object(&self.data_key(id), body, metadata, Some("application/json")).await?;
        Ok(())
    }

    /// Recompute partition membership for `id` against its previous
    /// stored metadata (if any) and the metadata it is about to be
    /// written with, as a PUT/DELETE delta (spec §4.3 "Partition
    /// maintenance"). Skips the HEAD entirely when the resource defines
    /// no partitions.
    async fn partition_delta_for_write(&self, id: &str, new_metadata: &BTreeMap<String, String>) -> Result<partition::Delta, Error> {
        let partitions = self.partitions.read().clone();
        if partitions.is_empty() {
            return Ok(partition::Delta::default());
        }

        let old_keys = match self.blob.head_object(&self.data_key(id)).await {
            Ok(head) => {
                let metadata: BTreeMap<String, String> = head.metadata.into_iter().collect();
                let expanded = s3db_codec::expand_metadata(&metadata)?;
                let version = match expanded.get(reserved::VERSION) {
                    Some(id) => self.schema_version_for(id)?,
                    None => self.schema.read().clone(),
                };
                partition::index_keys(self.name.as_str(), &version, &partitions, &expanded, id)
            }
            Err(e) if e.kind == BlobErrorKind::NoSuchKey => BTreeMap::new(),
            Err(e) => return Err(e.into()),
        };

        let new_expanded = s3db_codec::expand_metadata(new_metadata)?;
        let new_version = self.schema.read().clone();
        let new_keys = partition::index_keys(self.name.as_str(), &new_version, &partitions, &new_expanded, id);
        Ok(partition::diff(&old_keys, &new_keys))
    }

    /// Apply a partition delta. Awaited inline unless `asyncPartitions`
    /// is set, in which case it is handed to a detached task and the
    /// write returns once the task has been scheduled (spec §4.3).
    async fn apply_partition_delta(&self, delta: partition::Delta) -> Result<(), Error> {
        if delta.puts.is_empty() && delta.deletes.is_empty() {
            return Ok(());
        }
        if self.async_partitions {
            let blob = Arc::clone(&self.blob);
            tokio::spawn(async move {
                for key in delta.puts {
                    if let Err(e) = blob.put_object(&key, Bytes::new(), HashMap::new(), None).await {
                        warn!(key, error = %e, "async partition-index PUT failed");
                    }
                }
                for key in delta.deletes {
                    if let Err(e) = blob.delete_object(&key).await {
                        warn!(key, error = %e, "async partition-index DELETE failed");
                    }
                }
            });
            Ok(())
        } else {
            for key in &delta.puts {
                self.blob.put_object(key, Bytes::new(), HashMap::new(), None).await?;
            }
            for key in &delta.deletes {
                self.blob.delete_object(key).await?;
            }
            Ok(())
        }
    }

    // ---- validation without persistence --------------------------------

    /// `validate(data, {throwOnError})` (spec §4.3). Runs the codec's
    /// validate phase only; nothing is written.
    pub fn validate(&self, data: &Value, throw_on_error: bool) -> Result<Validated, Error> {
        let version = self.schema.read().clone();
        let flattened = s3db_codec::flatten(data);
        match s3db_schema::validate(&version, flattened) {
            Ok(validated) => Ok(Validated { valid: true, errors: Vec::new(), data: s3db_codec::unflatten(&validated) }),
            Err(issues) => {
                if throw_on_error {
                    return Err(Error::validation(issues));
                }
                Ok(Validated { valid: false, errors: issues, data: data.clone() })
            }
        }
    }

    // ---- single-record writes -------------------------------------------

    /// `insert(data)`.
    pub async fn insert(self: &Arc<Self>, data: Value) -> Result<Value, Error> {
        let this = Arc::clone(self);
        let core: CoreOp = Arc::new(move |args: Value| {
            let this = Arc::clone(&this);
            Box::pin(async move { this.insert_core(args).await }) as BoxFuture<'static, Result<Value, Error>>
        });
        self.middleware.run("insert", self.name.as_str(), data, core).await
    }

    async fn insert_core(self: Arc<Self>, payload: Value) -> Result<Value, Error> {
        let (payload, before_errors) = self.hooks.run(HookPoint::BeforeInsert, payload, true).await;
        if let Some(err) = before_errors.into_iter().next() {
            return Err(err);
        }

        let id = match payload.get("id").and_then(Value::as_str) {
            Some(id) => id.to_string(),
            None => self.id_gen.next_id().await?,
        };

        let mut record = payload;
        if let Value::Object(map) = &mut record {
            map.insert("id".to_string(), json!(id));
        }

        let encoded = self.encode_record(&record)?;
        self.put_encoded(&id, &encoded).await?;

        let delta = self.partition_delta_for_write(&id, &encoded.metadata).await?;
        self.apply_partition_delta(delta).await?;

        self.events.publish(Event::Inserted { resource: self.name.as_str().to_string(), id: id.clone(), record: record.clone() });

        let (result, after_errors) = self.hooks.run(HookPoint::AfterInsert, record, false).await;
        for err in after_errors {
            self.events.publish(Event::HookError { point: "afterInsert".to_string(), resource: self.name.as_str().to_string(), error: err.to_string() });
        }
        Ok(result)
    }

    /// `insertMany(records)`: sequential inserts, short-circuiting on the
    /// first failure (spec makes no atomicity promise across records).
    pub async fn insert_many(self: &Arc<Self>, records: Vec<Value>) -> Result<Vec<Value>, Error> {
        let mut out = Vec::with_capacity(records.len());
        for record in records {
            out.push(self.insert(record).await?);
        }
        Ok(out)
    }

    /// `get(id)` / `getOrThrow(id)`: `NotFound` if the record is absent.
    pub async fn get_or_throw(&self, id: &str) -> Result<Value, Error> {
        self.get_or_null(id).await?.ok_or_else(|| Error::not_found(format!("{}/{id}", self.name.as_str())))
    }

    pub async fn get(&self, id: &str) -> Result<Value, Error> {
        self.get_or_throw(id).await
    }

    /// `getOrNull(id)`.
    pub async fn get_or_null(&self, id: &str) -> Result<Option<Value>, Error> {
        match self.fetch_encoded(id).await? {
            Some(encoded) => Ok(Some(self.decode_record(id, &encoded)?)),
            None => Ok(None),
        }
    }

    /// `exists(id)`.
    pub async fn exists(&self, id: &str) -> Result<bool, Error> {
        match self.blob.head_object(&self.data_key(id)).await {
            Ok(_) => Ok(true),
            Err(e) if e.kind == BlobErrorKind::NoSuchKey => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    /// `update(id, changes)`: a flattened-path deep merge of `changes`
    /// onto the existing record, then re-encoded and re-validated.
    pub async fn update(self: &Arc<Self>, id: &str, changes: Value) -> Result<Value, Error> {
        self.merge_write("update", HookPoint::BeforeUpdate, HookPoint::AfterUpdate, id, changes).await
    }

    /// `patch(id, changes)`: same merge semantics as `update` (spec
    /// doesn't draw a sharper line between the two); kept as a distinct
    /// entry point so callers and middleware can address them by name.
    pub async fn patch(self: &Arc<Self>, id: &str, changes: Value) -> Result<Value, Error> {
        self.merge_write("patch", HookPoint::BeforeUpdate, HookPoint::AfterUpdate, id, changes).await
    }

    async fn merge_write(
        self: &Arc<Self>,
        operation: &'static str,
        before: HookPoint,
        after: HookPoint,
        id: &str,
        changes: Value,
    ) -> Result<Value, Error> {
        let this = Arc::clone(self);
        let id = id.to_string();
        let core: CoreOp = Arc::new(move |args: Value| {
            let this = Arc::clone(&this);
            let id = id.clone();
            Box::pin(async move { this.merge_write_core(before, after, &id, args).await }) as BoxFuture<'static, Result<Value, Error>>
        });
        self.middleware.run(operation, self.name.as_str(), changes, core).await
    }

    async fn merge_write_core(self: Arc<Self>, before: HookPoint, after: HookPoint, id: &str, changes: Value) -> Result<Value, Error> {
        let existing = self.get_or_throw(id).await?;
        let merged = merge_deep(existing.clone(), changes);

        let (payload, before_errors) = self.hooks.run(before, merged, true).await;
        if let Some(err) = before_errors.into_iter().next() {
            return Err(err);
        }

        let encoded = self.encode_record(&payload)?;
        self.put_encoded(id, &encoded).await?;

        let delta = self.partition_delta_for_write(id, &encoded.metadata).await?;
        self.apply_partition_delta(delta).await?;

        self.events.publish(Event::Updated {
            resource: self.name.as_str().to_string(),
            id: id.to_string(),
            record: payload.clone(),
            previous: Some(existing),
        });

        let (result, after_errors) = self.hooks.run(after, payload, false).await;
        for err in after_errors {
            self.events.publish(Event::HookError { point: after.as_str().to_string(), resource: self.name.as_str().to_string(), error: err.to_string() });
        }
        Ok(result)
    }

    /// `replace(id, data)`: the stored record is replaced verbatim, with
    /// no merge against what was there before.
    pub async fn replace(self: &Arc<Self>, id: &str, data: Value) -> Result<Value, Error> {
        let this = Arc::clone(self);
        let id = id.to_string();
        let core: CoreOp = Arc::new(move |args: Value| {
            let this = Arc::clone(&this);
            let id = id.clone();
            Box::pin(async move { this.replace_core(&id, args).await }) as BoxFuture<'static, Result<Value, Error>>
        });
        self.middleware.run("replace", self.name.as_str(), data, core).await
    }

    async fn replace_core(self: Arc<Self>, id: &str, data: Value) -> Result<Value, Error> {
        let previous = self.get_or_null(id).await?;

        let (payload, before_errors) = self.hooks.run(HookPoint::BeforeUpdate, data, true).await;
        if let Some(err) = before_errors.into_iter().next() {
            return Err(err);
        }

        let mut record = payload;
        if let Value::Object(map) = &mut record {
            map.insert("id".to_string(), json!(id));
        }

        let encoded = self.encode_record(&record)?;
        self.put_encoded(id, &encoded).await?;

        let delta = self.partition_delta_for_write(id, &encoded.metadata).await?;
        self.apply_partition_delta(delta).await?;

        self.events.publish(Event::Updated {
            resource: self.name.as_str().to_string(),
            id: id.to_string(),
            record: record.clone(),
            previous,
        });

        let (result, after_errors) = self.hooks.run(HookPoint::AfterUpdate, record, false).await;
        for err in after_errors {
            self.events.publish(Event::HookError { point: "afterUpdate".to_string(), resource: self.name.as_str().to_string(), error: err.to_string() });
        }
        Ok(result)
    }

    /// `upsert(id, data)`: `update` if the record exists, otherwise
    /// `insert` with `id` fixed to the caller's choice.
    pub async fn upsert(self: &Arc<Self>, id: &str, data: Value) -> Result<Value, Error> {
        if self.exists(id).await? {
            self.update(id, data).await
        } else {
            let mut record = data;
            if let Value::Object(map) = &mut record {
                map.insert("id".to_string(), json!(id));
            }
            self.insert(record).await
        }
    }

    /// `delete(id)`.
    pub async fn delete(self: &Arc<Self>, id: &str) -> Result<(), Error> {
        let this = Arc::clone(self);
        let id = id.to_string();
        let core: CoreOp = Arc::new(move |args: Value| {
            let this = Arc::clone(&this);
            let id = id.clone();
            Box::pin(async move {
                this.delete_core(&id).await?;
                Ok(args)
            }) as BoxFuture<'static, Result<Value, Error>>
        });
        self.middleware.run("delete", self.name.as_str(), json!({"id": id}), core).await?;
        Ok(())
    }

    async fn delete_core(self: Arc<Self>, id: &str) -> Result<(), Error> {
        let previous = self.get_or_null(id).await?;
        let hook_payload = previous.clone().unwrap_or_else(|| json!({"id": id}));

        let (payload, before_errors) = self.hooks.run(HookPoint::BeforeDelete, hook_payload, true).await;
        if let Some(err) = before_errors.into_iter().next() {
            return Err(err);
        }

        let delta = self.partition_delta_for_write(id, &BTreeMap::new()).await?;
        self.blob.delete_object(&self.data_key(id)).await?;
        self.apply_partition_delta(delta).await?;

        self.events.publish(Event::Deleted { resource: self.name.as_str().to_string(), id: id.to_string(), previous });

        let (_, after_errors) = self.hooks.run(HookPoint::AfterDelete, payload, false).await;
        for err in after_errors {
            self.events.publish(Event::HookError { point: "afterDelete".to_string(), resource: self.name.as_str().to_string(), error: err.to_string() });
        }
        Ok(())
    }

    /// `deleteMany(ids)`: sequential, short-circuiting on the first
    /// failure.
    pub async fn delete_many(self: &Arc<Self>, ids: &[String]) -> Result<(), Error> {
        for id in ids {
            self.delete(id).await?;
        }
        Ok(())
    }

    // ---- query & list ----------------------------------------------------

    pub async fn list(&self, limit: Option<usize>, offset: usize) -> Result<Vec<Value>, Error> {
        let ids = query::list_ids(&self.blob, self.name.as_str(), limit, offset).await?;
        self.load_many(&ids).await
    }

    pub async fn list_ids(&self, limit: Option<usize>, offset: usize) -> Result<Vec<String>, Error> {
        query::list_ids(&self.blob, self.name.as_str(), limit, offset).await
    }

    pub async fn page(&self, offset: usize, size: usize, skip_count: bool) -> Result<(Vec<Value>, Option<usize>), Error> {
        let page = query::page(&self.blob, self.name.as_str(), offset, size, skip_count).await?;
        let records = self.load_many(&page.ids).await?;
        Ok((records, page.total))
    }

    pub async fn count(&self) -> Result<usize, Error> {
        let ids = query::list_ids(&self.blob, self.name.as_str(), None, 0).await?;
        Ok(query::count_ids(&ids))
    }

    pub async fn list_partition(&self, partition: &str, coords: &[(String, String)], limit: Option<usize>) -> Result<Vec<Value>, Error> {
        let ids = query::list_partition(&self.blob, self.name.as_str(), partition, coords, limit).await?;
        self.load_many(&ids).await
    }

    /// `query(filter, opts)`: a linear in-process scan, optionally
    /// scoped to a partition, with `beforeQuery`/`afterQuery` hooks
    /// wrapping the scan (spec §4.3, §4.5).
    pub async fn query(
        self: &Arc<Self>,
        filter: impl Fn(&Value) -> bool + Send + Sync + 'static,
        limit: Option<usize>,
        offset: usize,
        partition_scope: Option<(&str, &[(String, String)])>,
    ) -> Result<Vec<Value>, Error> {
        let (_, before_errors) = self.hooks.run(HookPoint::BeforeQuery, Value::Null, true).await;
        if let Some(err) = before_errors.into_iter().next() {
            return Err(err);
        }

        let ids = match partition_scope {
            Some((partition, coords)) => query::list_partition(&self.blob, self.name.as_str(), partition, coords, None).await?,
            None => query::list_ids(&self.blob, self.name.as_str(), None, 0).await?,
        };

        let mut matches = Vec::new();
        for id in &ids {
            if let Some(record) = self.get_or_null(id).await? {
                if filter(&record) {
                    matches.push(record);
                }
            }
        }

        let start = offset.min(matches.len());
        let end = match limit {
            Some(limit) => (start + limit).min(matches.len()),
            None => matches.len(),
        };
        let page = matches[start..end].to_vec();

        let (_, after_errors) = self.hooks.run(HookPoint::AfterQuery, Value::Null, false).await;
        for err in after_errors {
            self.events.publish(Event::HookError { point: "afterQuery".to_string(), resource: self.name.as_str().to_string(), error: err.to_string() });
        }

        Ok(page)
    }

    async fn load_many(&self, ids: &[String]) -> Result<Vec<Value>, Error> {
        let mut out = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(record) = self.get_or_null(id).await? {
                out.push(record);
            }
        }
        Ok(out)
    }

    // ---- partitions --------------------------------------------------

    /// `findOrphanedPartitions()` (spec §4.3 "Partitions from fields").
    #[must_use]
    pub fn find_orphaned_partitions(&self) -> BTreeMap<String, Vec<String>> {
        let version = self.schema.read().clone();
        let partitions = self.partitions.read().clone();
        partition::find_orphaned(&version, &partitions)
    }

    /// `removeOrphanedPartitions({dryRun})`: drops orphaned partition
    /// *definitions*; the index objects themselves are left for a
    /// background reaper to sweep (spec §4.3).
    pub async fn remove_orphaned_partitions(self: &Arc<Self>, dry_run: bool) -> Result<Vec<String>, Error> {
        let orphaned: Vec<String> = self.find_orphaned_partitions().into_keys().collect();
        if orphaned.is_empty() || dry_run {
            return Ok(orphaned);
        }

        {
            let mut partitions = self.partitions.write();
            for name in &orphaned {
                partitions.remove(name);
            }
        }
        self.catalog.set_partitions(self.name.as_str(), self.partitions.read().clone()).await?;
        self.events.publish(Event::OrphanedPartitionsRemoved { resource: self.name.as_str().to_string(), partitions: orphaned.clone() });
        Ok(orphaned)
    }

    /// Add (or replace) a partition definition.
    pub async fn set_partition(self: &Arc<Self>, name: &str, def: PartitionDef) -> Result<(), Error> {
        {
            let mut partitions = self.partitions.write();
            partitions.insert(name.to_string(), def);
        }
        self.catalog.set_partitions(self.name.as_str(), self.partitions.read().clone()).await
    }

    // ---- hooks & middleware --------------------------------------------

    /// `addHook(point, name, config)`. Persists the definition when
    /// `persistHooks=true`.
    pub async fn add_hook(self: &Arc<Self>, point: HookPoint, name: &str, config: Value) -> Result<(), Error> {
        self.hooks.add_hook(point, name, config)?;
        if self.persist_hooks {
            self.catalog.set_hooks(self.name.as_str(), point.as_str(), self.hooks.definitions(point)).await?;
        }
        Ok(())
    }

    /// `useMiddleware(operation, middleware)`.
    pub fn use_middleware(&self, operation: impl Into<String>, mw: Arc<dyn crate::middleware::Middleware>) {
        self.middleware.use_middleware(operation, mw);
    }
}

/// Deep-merge `changes` onto `base` at the JSON-object level; any
/// non-object value (including arrays) in `changes` replaces `base`'s
/// value at that path outright.
fn merge_deep(mut base: Value, changes: Value) -> Value {
    match (&mut base, changes) {
        (Value::Object(base_map), Value::Object(changes_map)) => {
            for (key, value) in changes_map {
                let merged = match base_map.remove(&key) {
                    Some(existing) => merge_deep(existing, value),
                    None => value,
                };
                base_map.insert(key, merged);
            }
            base
        }
        (_, changes) => changes,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use s3db_blob::MemoryBlobClient;
    use s3db_catalog::PartitionFieldType;
    use s3db_schema::AttributeType;

    async fn users_resource(persist_hooks: bool, async_partitions: bool) -> Arc<Resource> {
        let blob: Arc<dyn BlobClient> = Arc::new(MemoryBlobClient::new());
        let events = Arc::new(EventBus::default());
        let catalog = Arc::new(Catalog::connect(Arc::clone(&blob), Arc::clone(&events)).await.unwrap());
        let attrs = vec![
            AttributeDef::new("name", AttributeType::String).required(),
            AttributeDef::new("region", AttributeType::String),
        ];
        let codec = CodecConfig::default();
        let defaults = ResourceDefaults { async_partitions, persist_hooks };
        Resource::open("users", attrs, blob, catalog, events, &codec, &defaults, Behavior::EnforceLimits, IdGeneratorConfig::FixedRandom { length: 8 })
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn insert_then_get_roundtrips() {
        let resource = users_resource(false, false).await;
        let inserted = resource.insert(json!({"name": "Ada"})).await.unwrap();
        let id = inserted["id"].as_str().unwrap().to_string();
        let fetched = resource.get_or_throw(&id).await.unwrap();
        assert_eq!(fetched["name"], json!("Ada"));
    }

    #[tokio::test]
    async fn get_or_null_returns_none_for_missing_id() {
        let resource = users_resource(false, false).await;
        assert_eq!(resource.get_or_null("missing").await.unwrap(), None);
    }

    #[tokio::test]
    async fn get_or_throw_raises_not_found() {
        let resource = users_resource(false, false).await;
        let err = resource.get_or_throw("missing").await.unwrap_err();
        assert_eq!(err.kind(), s3db_common::error::ErrorKind::NotFound);
    }

    #[tokio::test]
    async fn update_merges_onto_existing_record() {
        let resource = users_resource(false, false).await;
        let inserted = resource.insert(json!({"name": "Ada", "region": "us"})).await.unwrap();
        let id = inserted["id"].as_str().unwrap().to_string();
        let updated = resource.update(&id, json!({"region": "eu"})).await.unwrap();
        assert_eq!(updated["name"], json!("Ada"));
        assert_eq!(updated["region"], json!("eu"));
    }

    #[tokio::test]
    async fn delete_removes_the_record() {
        let resource = users_resource(false, false).await;
        let inserted = resource.insert(json!({"name": "Ada"})).await.unwrap();
        let id = inserted["id"].as_str().unwrap().to_string();
        resource.delete(&id).await.unwrap();
        assert_eq!(resource.get_or_null(&id).await.unwrap(), None);
    }

    #[tokio::test]
    async fn upsert_inserts_when_absent_and_updates_when_present() {
        let resource = users_resource(false, false).await;
        let created = resource.upsert("fixed-id", json!({"name": "Ada"})).await.unwrap();
        assert_eq!(created["id"], json!("fixed-id"));
        let updated = resource.upsert("fixed-id", json!({"name": "Grace"})).await.unwrap();
        assert_eq!(updated["name"], json!("Grace"));
    }

    #[tokio::test]
    async fn partition_index_entries_track_field_moves() {
        let resource = users_resource(false, false).await;
        resource
            .set_partition("byRegion", PartitionDef { fields: BTreeMap::from([("region".to_string(), PartitionFieldType::String)]) })
            .await
            .unwrap();

        let inserted = resource.insert(json!({"name": "Ada", "region": "us"})).await.unwrap();
        let id = inserted["id"].as_str().unwrap().to_string();
        let us_before = resource.list_partition("byRegion", &[("region".to_string(), "us".to_string())], None).await.unwrap();
        assert_eq!(us_before.len(), 1);

        resource.update(&id, json!({"region": "eu"})).await.unwrap();
        let us_after = resource.list_partition("byRegion", &[("region".to_string(), "us".to_string())], None).await.unwrap();
        let eu_after = resource.list_partition("byRegion", &[("region".to_string(), "eu".to_string())], None).await.unwrap();
        assert!(us_after.is_empty());
        assert_eq!(eu_after.len(), 1);
    }

    #[tokio::test]
    async fn find_orphaned_partitions_flags_dropped_fields() {
        let resource = users_resource(false, false).await;
        resource
            .set_partition("byGhost", PartitionDef { fields: BTreeMap::from([("ghost".to_string(), PartitionFieldType::String)]) })
            .await
            .unwrap();
        let orphaned = resource.find_orphaned_partitions();
        assert!(orphaned.contains_key("byGhost"));

        let removed = resource.remove_orphaned_partitions(false).await.unwrap();
        assert_eq!(removed, vec!["byGhost".to_string()]);
        assert!(resource.find_orphaned_partitions().is_empty());
    }

    #[tokio::test]
    async fn query_filters_in_process_over_the_full_scan() {
        let resource = users_resource(false, false).await;
        resource.insert(json!({"name": "Ada", "region": "us"})).await.unwrap();
        resource.insert(json!({"name": "Grace", "region": "eu"})).await.unwrap();

        let matches = resource.query(|record| record["region"] == json!("us"), None, 0, None).await.unwrap();
        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0]["name"], json!("Ada"));
    }

    #[tokio::test]
    async fn validate_reports_missing_required_fields_without_persisting() {
        let resource = users_resource(false, false).await;
        let result = resource.validate(&json!({"region": "us"}), false).unwrap();
        assert!(!result.valid);
        assert!(!result.errors.is_empty());
        assert_eq!(resource.count().await.unwrap(), 0);
    }
}
