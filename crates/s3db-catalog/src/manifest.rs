//! The `s3db.json` manifest model (spec §3 "Metadata Manifest", §6).

use s3db_schema::AttributeDef;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// The top-level manifest schema version string (spec §6: `version:"1"`).
pub const MANIFEST_VERSION: &str = "1";

/// The root catalog object, `s3db.json` (spec §3).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Manifest {
    pub version: String,
    #[serde(rename = "s3dbVersion")]
    pub s3db_version: String,
    #[serde(rename = "lastUpdated")]
    pub last_updated: String,
    pub resources: BTreeMap<String, ResourceManifest>,
}

impl Default for Manifest {
    fn default() -> Self {
        Self {
            version: MANIFEST_VERSION.to_string(),
            s3db_version: env!("CARGO_PKG_VERSION").to_string(),
            last_updated: chrono::Utc::now().to_rfc3339(),
            resources: BTreeMap::new(),
        }
    }
}

/// One resource's manifest entry: its current schema version pointer
/// plus every version it has ever had (spec §3 "schema edits append a
/// new version, never mutate history").
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ResourceManifest {
    #[serde(rename = "currentVersion")]
    pub current_version: String,
    pub versions: BTreeMap<String, ManifestSchemaVersion>,
    /// Record behavior: `user-managed | body-overflow | truncate-data | enforce-limits`.
    #[serde(default = "default_behavior")]
    pub behavior: String,
}

fn default_behavior() -> String {
    "user-managed".to_string()
}

/// One immutable schema version as persisted in the manifest.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ManifestSchemaVersion {
    pub hash: String,
    pub attributes: Vec<AttributeDef>,
    #[serde(default)]
    pub partitions: BTreeMap<String, PartitionDef>,
    #[serde(default)]
    pub hooks: BTreeMap<String, Vec<HookDef>>,
}

/// A partition definition: `{fields: {<field>: <type>}}` (spec §4.3
/// "Partitions from fields").
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct PartitionDef {
    pub fields: BTreeMap<String, PartitionFieldType>,
}

/// The coercion rule used for one partition field's value (spec §4.3:
/// "ISO for dates, canonical numeric form for numbers, raw for strings").
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PartitionFieldType {
    String,
    Number,
    Date,
}

/// A hook *definition* — a name and configuration, never a closure,
/// resolved against a process-level registry on reconnect (spec §4.3
/// "Middleware & hooks", §9 "Cyclic object graphs in configuration").
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct HookDef {
    pub name: String,
    #[serde(default)]
    pub config: serde_json::Value,
}

/// The well-defined hook points (spec §4.3).
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum HookPoint {
    BeforeInsert,
    AfterInsert,
    BeforeUpdate,
    AfterUpdate,
    BeforeDelete,
    AfterDelete,
    BeforeQuery,
    AfterQuery,
}

impl HookPoint {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::BeforeInsert => "beforeInsert",
            Self::AfterInsert => "afterInsert",
            Self::BeforeUpdate => "beforeUpdate",
            Self::AfterUpdate => "afterUpdate",
            Self::BeforeDelete => "beforeDelete",
            Self::AfterDelete => "afterDelete",
            Self::BeforeQuery => "beforeQuery",
            Self::AfterQuery => "afterQuery",
        }
    }

    #[must_use]
    pub fn all() -> [Self; 8] {
        [
            Self::BeforeInsert,
            Self::AfterInsert,
            Self::BeforeUpdate,
            Self::AfterUpdate,
            Self::BeforeDelete,
            Self::AfterDelete,
            Self::BeforeQuery,
            Self::AfterQuery,
        ]
    }
}

impl std::str::FromStr for HookPoint {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::all()
            .into_iter()
            .find(|p| p.as_str() == s)
            .ok_or_else(|| format!("unknown hook point {s:?}"))
    }
}

impl std::fmt::Display for HookPoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Manifest {
    /// Insert or replace a resource's manifest entry in place
    /// (`createResource` upserts, spec §3 lifecycle).
    pub fn upsert_resource(&mut self, name: impl Into<String>, resource: ResourceManifest) {
        self.resources.insert(name.into(), resource);
        self.touch();
    }

    pub fn remove_resource(&mut self, name: &str) -> Option<ResourceManifest> {
        let removed = self.resources.remove(name);
        self.touch();
        removed
    }

    fn touch(&mut self) {
        self.last_updated = chrono::Utc::now().to_rfc3339();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hook_point_roundtrips_through_str() {
        for point in HookPoint::all() {
            let parsed: HookPoint = point.as_str().parse().unwrap();
            assert_eq!(parsed, point);
        }
    }

    #[test]
    fn manifest_default_is_empty_but_valid() {
        let manifest = Manifest::default();
        assert_eq!(manifest.version, MANIFEST_VERSION);
        assert!(manifest.resources.is_empty());
    }

    #[test]
    fn manifest_roundtrips_through_json() {
        let mut manifest = Manifest::default();
        let mut resource = ResourceManifest { current_version: "v1".to_string(), ..Default::default() };
        resource.versions.insert(
            "v1".to_string(),
            ManifestSchemaVersion { hash: "h".to_string(), attributes: vec![], ..Default::default() },
        );
        manifest.upsert_resource("users", resource);
        let json = serde_json::to_string(&manifest).unwrap();
        let back: Manifest = serde_json::from_str(&json).unwrap();
        assert_eq!(back, manifest);
    }
}
