//! The Metadata Catalog (spec §4.4): load/heal/save the `s3db.json`
//! manifest and expose the typed mutations `s3db-resource` needs.

use crate::heal;
use crate::manifest::{HookDef, Manifest, ManifestSchemaVersion, PartitionDef, ResourceManifest};
use bytes::Bytes;
use parking_lot::Mutex;
use s3db_blob::{BlobClient, BlobErrorKind};
use s3db_common::{Error, Event, EventBus};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tracing::{info, warn};

/// The Metadata Catalog: a single-writer-per-process view of
/// `s3db.json`, gated by a process-local mutex (spec §5 "Shared-resource
/// policy" — cross-process races are last-write-wins, detected by
/// `lastUpdated` moving backwards).
pub struct Catalog {
    blob: Arc<dyn BlobClient>,
    manifest: Mutex<Manifest>,
    events: Arc<EventBus>,
}

impl Catalog {
    /// Load `s3db.json`, running the healing pipeline if it exists and
    /// parses imperfectly (or not at all), and write back the healed
    /// form. Absent entirely, a blank manifest is created (spec §4.4
    /// "At connect").
    pub async fn connect(blob: Arc<dyn BlobClient>, events: Arc<EventBus>) -> Result<Self, Error> {
        let key = s3db_common::keys::manifest();
        let manifest = match blob.get_object(&key).await {
            Ok(out) => {
                let raw = String::from_utf8_lossy(&out.body).into_owned();
                Self::heal_and_log(&blob, &events, &raw).await?
            }
            Err(e) if e.kind == BlobErrorKind::NoSuchKey => Manifest::default(),
            Err(e) => return Err(e.into()),
        };

        let catalog = Self { blob, manifest: Mutex::new(manifest), events };
        catalog.save().await?;
        Ok(catalog)
    }

    async fn heal_and_log(blob: &Arc<dyn BlobClient>, events: &Arc<EventBus>, raw: &str) -> Result<Manifest, Error> {
        let outcome = heal::heal(raw);

        if let Some(corrupt) = &outcome.corrupted_backup {
            let backup_key = s3db_common::keys::manifest_backup(&chrono::Utc::now().to_rfc3339());
            warn!(backup_key, "manifest unrecoverable; backing up corrupt body before replacing it");
            blob.put_object(&backup_key, Bytes::from(corrupt.clone().into_bytes()), HashMap::new(), Some("application/json"))
                .await?;
        }

        if !outcome.healing_log.is_empty() {
            let healing_log: Vec<String> = outcome.healing_log.iter().map(|e| format!("{}: {}", e.step, e.detail)).collect();
            info!(steps = healing_log.len(), "manifest healed at connect");
            events.publish(Event::MetadataHealed { healing_log });
        }

        Ok(outcome.manifest)
    }

    /// Rewrite `s3db.json` from the in-memory manifest.
    pub async fn save(&self) -> Result<(), Error> {
        let body = {
            let manifest = self.manifest.lock();
            serde_json::to_vec(&*manifest).map_err(|e| Error::internal(e.to_string()))?
        };
        self.blob
            .put_object(&s3db_common::keys::manifest(), Bytes::from(body), HashMap::new(), Some("application/json"))
            .await?;
        Ok(())
    }

    /// A snapshot of the current manifest.
    #[must_use]
    pub fn manifest(&self) -> Manifest {
        self.manifest.lock().clone()
    }

    #[must_use]
    pub fn get_resource(&self, name: &str) -> Option<ResourceManifest> {
        self.manifest.lock().resources.get(name).cloned()
    }

    /// `createResource` (spec §3): idempotent upsert. If the resource
    /// already exists, it is returned unchanged; otherwise it is created
    /// with `initial_version` as both `v1` and `currentVersion`.
    pub async fn create_resource(
        &self,
        name: &str,
        initial_version: ManifestSchemaVersion,
        behavior: &str,
    ) -> Result<ResourceManifest, Error> {
        let entry = {
            let mut manifest = self.manifest.lock();
            if let Some(existing) = manifest.resources.get(name) {
                existing.clone()
            } else {
                let mut versions = BTreeMap::new();
                versions.insert("v1".to_string(), initial_version);
                let entry = ResourceManifest { current_version: "v1".to_string(), versions, behavior: behavior.to_string() };
                manifest.upsert_resource(name, entry.clone());
                entry
            }
        };
        self.save().await?;
        Ok(entry)
    }

    /// Append a new schema version and make it current (spec §3 "schema
    /// edits append a new version, never mutate history").
    pub async fn add_schema_version(&self, name: &str, version_id: &str, version: ManifestSchemaVersion) -> Result<(), Error> {
        {
            let mut manifest = self.manifest.lock();
            let entry = manifest
                .resources
                .get_mut(name)
                .ok_or_else(|| Error::not_found(format!("resource {name:?}")))?;
            entry.versions.insert(version_id.to_string(), version);
            entry.current_version = version_id.to_string();
        }
        self.save().await
    }

    /// Update the current version's partition definitions in place.
    /// Partitions are not part of the attribute content hash (spec
    /// invariant 4 only binds `attributes`), so this does not create a
    /// new schema version.
    pub async fn set_partitions(&self, name: &str, partitions: BTreeMap<String, PartitionDef>) -> Result<(), Error> {
        {
            let mut manifest = self.manifest.lock();
            let entry = manifest
                .resources
                .get_mut(name)
                .ok_or_else(|| Error::not_found(format!("resource {name:?}")))?;
            let current = entry.current_version.clone();
            let version = entry
                .versions
                .get_mut(&current)
                .ok_or_else(|| Error::internal(format!("resource {name:?} currentVersion {current:?} missing")))?;
            version.partitions = partitions;
        }
        self.save().await
    }

    /// Replace the hook definitions for one hook point on the current
    /// version, when `persistHooks=true` (spec §4.3).
    pub async fn set_hooks(&self, name: &str, point: &str, hooks: Vec<HookDef>) -> Result<(), Error> {
        {
            let mut manifest = self.manifest.lock();
            let entry = manifest
                .resources
                .get_mut(name)
                .ok_or_else(|| Error::not_found(format!("resource {name:?}")))?;
            let current = entry.current_version.clone();
            let version = entry
                .versions
                .get_mut(&current)
                .ok_or_else(|| Error::internal(format!("resource {name:?} currentVersion {current:?} missing")))?;
            version.hooks.insert(point.to_string(), hooks);
        }
        self.save().await
    }

    /// Remove a resource's manifest entry (spec §3 lifecycle "delete
    /// removes data prefix + manifest entry"; the data/partition sweep
    /// itself is the caller's job, this only drops the catalog entry).
    pub async fn remove_resource(&self, name: &str) -> Result<(), Error> {
        {
            let mut manifest = self.manifest.lock();
            manifest.remove_resource(name);
        }
        self.save().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manifest::PartitionFieldType;
    use s3db_blob::MemoryBlobClient;

    fn version(hash: &str) -> ManifestSchemaVersion {
        ManifestSchemaVersion { hash: hash.to_string(), attributes: vec![], ..Default::default() }
    }

    #[tokio::test]
    async fn connect_with_no_manifest_creates_a_blank_one() {
        let blob: Arc<dyn BlobClient> = Arc::new(MemoryBlobClient::new());
        let events = Arc::new(EventBus::default());
        let catalog = Catalog::connect(blob.clone(), events).await.unwrap();
        assert!(catalog.manifest().resources.is_empty());
        // saved back so a second connect round-trips cleanly
        let raw = blob.get_object(&s3db_common::keys::manifest()).await.unwrap();
        assert!(!raw.body.is_empty());
    }

    #[tokio::test]
    async fn create_resource_is_idempotent() {
        let blob: Arc<dyn BlobClient> = Arc::new(MemoryBlobClient::new());
        let events = Arc::new(EventBus::default());
        let catalog = Catalog::connect(blob, events).await.unwrap();

        let first = catalog.create_resource("users", version("h1"), "body-overflow").await.unwrap();
        let second = catalog.create_resource("users", version("h2"), "user-managed").await.unwrap();
        assert_eq!(first, second);
        assert_eq!(catalog.manifest().resources["users"].behavior, "body-overflow");
    }

    #[tokio::test]
    async fn add_schema_version_preserves_history() {
        let blob: Arc<dyn BlobClient> = Arc::new(MemoryBlobClient::new());
        let events = Arc::new(EventBus::default());
        let catalog = Catalog::connect(blob, events).await.unwrap();
        catalog.create_resource("users", version("h1"), "user-managed").await.unwrap();
        catalog.add_schema_version("users", "v2", version("h2")).await.unwrap();

        let resource = catalog.get_resource("users").unwrap();
        assert_eq!(resource.current_version, "v2");
        assert!(resource.versions.contains_key("v1"));
        assert!(resource.versions.contains_key("v2"));
    }

    #[tokio::test]
    async fn set_partitions_does_not_touch_attribute_hash() {
        let blob: Arc<dyn BlobClient> = Arc::new(MemoryBlobClient::new());
        let events = Arc::new(EventBus::default());
        let catalog = Catalog::connect(blob, events).await.unwrap();
        catalog.create_resource("users", version("h1"), "user-managed").await.unwrap();

        let mut partitions = BTreeMap::new();
        partitions.insert(
            "byRegion".to_string(),
            PartitionDef { fields: BTreeMap::from([("region".to_string(), PartitionFieldType::String)]) },
        );
        catalog.set_partitions("users", partitions.clone()).await.unwrap();

        let resource = catalog.get_resource("users").unwrap();
        let current = resource.versions[&resource.current_version].clone();
        assert_eq!(current.hash, "h1");
        assert_eq!(current.partitions, partitions);
    }

    #[tokio::test]
    async fn reconnect_after_corruption_heals_and_emits_event() {
        let blob: Arc<dyn BlobClient> = Arc::new(MemoryBlobClient::new());
        blob.put_object(
            &s3db_common::keys::manifest(),
            Bytes::from_static(br#"{"version":"1","resources":{"u":{"currentVersion":"v9","versions":{"v1":{"hash":"h","attributes":[]}}}}}"#),
            HashMap::new(),
            Some("application/json"),
        )
        .await
        .unwrap();

        let events = Arc::new(EventBus::default());
        let mut rx = events.subscribe();
        let catalog = Catalog::connect(blob, events).await.unwrap();
        assert_eq!(catalog.get_resource("u").unwrap().current_version, "v1");

        let event = rx.recv().await.unwrap();
        assert!(matches!(event, Event::MetadataHealed { .. }));
    }
}
