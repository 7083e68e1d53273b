//! Schema versions: immutable, content-hash identified attribute sets
//! with a deterministic path→token map (spec §3, §4.2 item 1).

use crate::attribute::AttributeDef;
use s3db_common::SchemaVersionId;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;

/// An immutable schema version: its attribute set, a stable content
/// hash, and the path→token map emitted at creation time to keep
/// per-record S3 metadata within the 2 KB budget (spec §3).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SchemaVersion {
    pub id: SchemaVersionId,
    pub hash: String,
    pub attributes: Vec<AttributeDef>,
    /// path -> compact token, e.g. `"address.city" -> "c"`.
    pub tokens: HashMap<String, String>,
}

impl SchemaVersion {
    /// Build a new schema version from an ordered attribute list,
    /// computing its content hash and path→token map.
    #[must_use]
    pub fn new(id: impl Into<String>, attributes: Vec<AttributeDef>) -> Self {
        let hash = content_hash(&attributes);
        let tokens = attributes
            .iter()
            .enumerate()
            .map(|(i, attr)| (attr.path.clone(), index_to_token(i)))
            .collect();
        Self { id: SchemaVersionId(id.into()), hash, attributes, tokens }
    }

    #[must_use]
    pub fn attribute(&self, path: &str) -> Option<&AttributeDef> {
        self.attributes.iter().find(|a| a.path == path)
    }

    #[must_use]
    pub fn token_for(&self, path: &str) -> Option<&str> {
        self.tokens.get(path).map(String::as_str)
    }

    #[must_use]
    pub fn path_for_token(&self, token: &str) -> Option<&str> {
        self.tokens.iter().find(|(_, t)| t.as_str() == token).map(|(p, _)| p.as_str())
    }

    /// Non-required attributes ordered front-to-back by drop priority for
    /// `truncate-data` (spec §9 Open Question (a)): lowest priority,
    /// then declaration order, drops first.
    #[must_use]
    pub fn truncation_order(&self) -> Vec<&AttributeDef> {
        let mut candidates: Vec<(usize, &AttributeDef)> =
            self.attributes.iter().enumerate().filter(|(_, a)| !a.required).collect();
        candidates.sort_by_key(|(i, a)| (a.priority, *i));
        candidates.into_iter().map(|(_, a)| a).collect()
    }
}

/// A pure function of an attribute set's definitions (spec invariant 4:
/// "two manifests with equal hash describe the same wire format").
#[must_use]
pub fn content_hash(attributes: &[AttributeDef]) -> String {
    let canonical = serde_json::to_vec(attributes).expect("attribute defs always serialize");
    let digest = Sha256::digest(&canonical);
    hex::encode(digest)
}

/// Map a zero-based index to a short lowercase-letter token: `0 -> "a"`,
/// `25 -> "z"`, `26 -> "aa"`, matching a base-26 bijective numeration so
/// tokens stay 1-2 bytes for any schema under a few hundred attributes.
#[must_use]
pub fn index_to_token(mut index: usize) -> String {
    let mut chars = Vec::new();
    loop {
        let rem = index % 26;
        chars.push((b'a' + rem as u8) as char);
        if index < 26 {
            break;
        }
        index = index / 26 - 1;
    }
    chars.iter().rev().collect()
}

/// The history of schema versions for one resource: the current version
/// plus every past version, never mutated in place (spec §3 lifecycle).
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct SchemaHistory {
    pub current_version: String,
    pub versions: HashMap<String, SchemaVersion>,
}

impl SchemaHistory {
    #[must_use]
    pub fn new(initial: SchemaVersion) -> Self {
        let current_version = initial.id.0.clone();
        let mut versions = HashMap::new();
        versions.insert(current_version.clone(), initial);
        Self { current_version, versions }
    }

    #[must_use]
    pub fn current(&self) -> Option<&SchemaVersion> {
        self.versions.get(&self.current_version)
    }

    /// Append a new version and make it current. Never mutates or
    /// removes a prior version (spec §3 "schema edits append a new
    /// version, never mutate history").
    pub fn add_version(&mut self, version: SchemaVersion) {
        self.current_version = version.id.0.clone();
        self.versions.insert(version.id.0.clone(), version);
    }

    #[must_use]
    pub fn get(&self, id: &str) -> Option<&SchemaVersion> {
        self.versions.get(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attribute::AttributeType;

    #[test]
    fn hash_is_pure_function_of_attributes() {
        let attrs = vec![AttributeDef::new("name", AttributeType::String).required()];
        let a = SchemaVersion::new("v1", attrs.clone());
        let b = SchemaVersion::new("v1", attrs);
        assert_eq!(a.hash, b.hash);
    }

    #[test]
    fn hash_changes_with_attributes() {
        let v1 = SchemaVersion::new("v1", vec![AttributeDef::new("name", AttributeType::String)]);
        let v2 = SchemaVersion::new(
            "v2",
            vec![AttributeDef::new("name", AttributeType::String), AttributeDef::new("age", AttributeType::Number)],
        );
        assert_ne!(v1.hash, v2.hash);
    }

    #[test]
    fn tokens_are_stable_and_reversible() {
        let version = SchemaVersion::new(
            "v1",
            vec![AttributeDef::new("name", AttributeType::String), AttributeDef::new("address.city", AttributeType::String)],
        );
        let token = version.token_for("address.city").unwrap().to_string();
        assert_eq!(version.path_for_token(&token), Some("address.city"));
    }

    #[test]
    fn token_sequence_rolls_over_past_z() {
        assert_eq!(index_to_token(0), "a");
        assert_eq!(index_to_token(25), "z");
        assert_eq!(index_to_token(26), "aa");
        assert_eq!(index_to_token(27), "ab");
    }

    #[test]
    fn truncation_order_respects_priority_then_declaration() {
        let attrs = vec![
            AttributeDef::new("name", AttributeType::String).required(),
            AttributeDef::new("bio", AttributeType::String).with_priority(1),
            AttributeDef::new("nickname", AttributeType::String).with_priority(0),
        ];
        let version = SchemaVersion::new("v1", attrs);
        let order: Vec<&str> = version.truncation_order().iter().map(|a| a.path.as_str()).collect();
        assert_eq!(order, vec!["nickname", "bio"]);
    }

    #[test]
    fn history_appends_without_mutating_past_versions() {
        let v1 = SchemaVersion::new("v1", vec![AttributeDef::new("name", AttributeType::String)]);
        let mut history = SchemaHistory::new(v1.clone());
        let v2 = SchemaVersion::new(
            "v2",
            vec![AttributeDef::new("name", AttributeType::String), AttributeDef::new("age", AttributeType::Number)],
        );
        history.add_version(v2);
        assert_eq!(history.current_version, "v2");
        assert_eq!(history.get("v1").unwrap(), &v1);
    }
}
