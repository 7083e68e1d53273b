//! Partition maintenance (spec §4.3 "Partition maintenance", "Partitions
//! from fields").
//!
//! A partition index entry's key already encodes a record's partition
//! coordinates in canonical string form; that canonical form is exactly
//! the codec's per-type stringification (ISO dates, numeric `to_string`,
//! raw strings) already sitting in the encoded metadata's tokens, so
//! coordinates are read directly off `EncodedRecord::metadata` rather
//! than re-deriving them from a decoded JSON value.

use s3db_catalog::PartitionDef;
use s3db_schema::SchemaVersion;
use std::collections::BTreeMap;

/// One partition's coordinates for a single record, in the partition
/// definition's declared field order.
pub type Coords = Vec<(String, String)>;

/// The full key for every partition a record currently belongs to,
/// keyed by partition name. A partition is absent from the map when one
/// of its fields has no value in `metadata` (the record doesn't
/// participate in that partition, not an error).
#[must_use]
pub fn index_keys(
    resource: &str,
    version: &SchemaVersion,
    partitions: &BTreeMap<String, PartitionDef>,
    metadata: &BTreeMap<String, String>,
    id: &str,
) -> BTreeMap<String, String> {
    let mut out = BTreeMap::new();
    for (name, def) in partitions {
        if let Some(coords) = coords_for(version, def, metadata) {
            out.insert(name.clone(), s3db_common::keys::partition_entry(resource, name, &coords, id));
        }
    }
    out
}

fn coords_for(version: &SchemaVersion, def: &PartitionDef, metadata: &BTreeMap<String, String>) -> Option<Coords> {
    let mut coords = Coords::with_capacity(def.fields.len());
    for field in def.fields.keys() {
        let token = version.token_for(field)?;
        let value = metadata.get(token)?;
        coords.push((field.clone(), value.clone()));
    }
    Some(coords)
}

/// The delta between a record's previous and new partition-index keys:
/// entries to PUT (new or moved) and entries to DELETE (removed or
/// moved away from).
#[derive(Debug, Default, PartialEq, Eq)]
pub struct Delta {
    pub puts: Vec<String>,
    pub deletes: Vec<String>,
}

#[must_use]
pub fn diff(previous: &BTreeMap<String, String>, next: &BTreeMap<String, String>) -> Delta {
    let mut delta = Delta::default();
    for (name, key) in next {
        if previous.get(name) != Some(key) {
            delta.puts.push(key.clone());
        }
    }
    for (name, key) in previous {
        if next.get(name) != Some(key) {
            delta.deletes.push(key.clone());
        }
    }
    delta
}

/// A partition is orphaned when any field it references is no longer
/// present in the current schema version (spec §4.3 "A partition is
/// orphaned when...").
#[must_use]
pub fn find_orphaned(version: &SchemaVersion, partitions: &BTreeMap<String, PartitionDef>) -> BTreeMap<String, Vec<String>> {
    let mut orphaned = BTreeMap::new();
    for (name, def) in partitions {
        let missing: Vec<String> = def.fields.keys().filter(|f| version.attribute(f).is_none()).cloned().collect();
        if !missing.is_empty() {
            orphaned.insert(name.clone(), missing);
        }
    }
    orphaned
}

#[cfg(test)]
mod tests {
    use super::*;
    use s3db_catalog::PartitionFieldType;
    use s3db_schema::{AttributeDef, AttributeType};

    fn version() -> SchemaVersion {
        SchemaVersion::new(
            "v1",
            vec![AttributeDef::new("region", AttributeType::String), AttributeDef::new("name", AttributeType::String)],
        )
    }

    fn by_region() -> BTreeMap<String, PartitionDef> {
        let mut partitions = BTreeMap::new();
        partitions.insert(
            "byRegion".to_string(),
            PartitionDef { fields: BTreeMap::from([("region".to_string(), PartitionFieldType::String)]) },
        );
        partitions
    }

    #[test]
    fn index_keys_skips_partitions_missing_a_field_value() {
        let version = version();
        let partitions = by_region();
        let metadata = BTreeMap::new(); // no region token present
        let keys = index_keys("users", &version, &partitions, &metadata, "u1");
        assert!(keys.is_empty());
    }

    #[test]
    fn index_keys_builds_full_key_when_present() {
        let version = version();
        let partitions = by_region();
        let token = version.token_for("region").unwrap().to_string();
        let metadata = BTreeMap::from([(token, "us".to_string())]);
        let keys = index_keys("users", &version, &partitions, &metadata, "u1");
        assert_eq!(keys.get("byRegion").unwrap(), "part/users/byRegion/region=us/id=u1");
    }

    #[test]
    fn diff_detects_moves_adds_and_removes() {
        let mut previous = BTreeMap::new();
        previous.insert("byRegion".to_string(), "part/users/byRegion/region=us/id=u1".to_string());
        previous.insert("byTier".to_string(), "part/users/byTier/tier=gold/id=u1".to_string());

        let mut next = BTreeMap::new();
        next.insert("byRegion".to_string(), "part/users/byRegion/region=eu/id=u1".to_string());

        let delta = diff(&previous, &next);
        assert_eq!(delta.puts, vec!["part/users/byRegion/region=eu/id=u1".to_string()]);
        let mut deletes = delta.deletes.clone();
        deletes.sort();
        assert_eq!(
            deletes,
            vec!["part/users/byRegion/region=us/id=u1".to_string(), "part/users/byTier/tier=gold/id=u1".to_string()]
        );
    }

    #[test]
    fn find_orphaned_flags_missing_schema_fields() {
        let version = SchemaVersion::new("v1", vec![AttributeDef::new("name", AttributeType::String)]);
        let partitions = by_region();
        let orphaned = find_orphaned(&version, &partitions);
        assert_eq!(orphaned.get("byRegion").unwrap(), &vec!["region".to_string()]);
    }

    #[test]
    fn find_orphaned_is_empty_when_fields_present() {
        let version = version();
        let partitions = by_region();
        assert!(find_orphaned(&version, &partitions).is_empty());
    }
}
