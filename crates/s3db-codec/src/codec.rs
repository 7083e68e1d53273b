//! The Codec Stack (spec §4.2): flatten -> validate -> encrypt secrets ->
//! stringify into metadata tokens -> size-budget decision -> optional
//! compression, and its inverse.

use crate::compress;
use crate::crypto;
use crate::flatten::{flatten, unflatten};
use s3db_common::error::{Error, ValidationIssue};
use s3db_schema::{validate, AttributeType, SchemaVersion};
use serde_json::Value;
use std::collections::BTreeMap;

/// Reserved metadata keys, chosen so they never collide with a base-26
/// attribute token (spec §6 "S3 Metadata Keys").
pub mod reserved {
    pub const VERSION: &str = "_v";
    pub const HASH: &str = "_h";
    pub const OVERFLOW: &str = "_overflow";
    pub const TIMESTAMP: &str = "_ts";
    pub const TRUNCATED: &str = "_truncated";
    pub const COMPRESSED_BLOB: &str = "_z";
    pub const COMPRESSED_FLAG: &str = "_c";
}

/// How a record that overflows the metadata cap is handled (spec §4.2
/// step 5, §9 Open Question (a) chooses the truncation order within
/// `truncate-data`).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Behavior {
    /// Caller asserts the record always fits; overflow is a hard error.
    UserManaged,
    /// Same failure mode as `UserManaged`, named for operators who opt in
    /// explicitly rather than inheriting the default.
    EnforceLimits,
    /// Drop low-priority fields (spec's `truncation_order`) until the
    /// record fits, marking `_truncated`.
    TruncateData,
    /// Move non-required fields into the object body as JSON, keeping
    /// only required fields and reserved keys in metadata.
    BodyOverflow,
}

impl std::fmt::Display for Behavior {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::UserManaged => "user-managed",
            Self::EnforceLimits => "enforce-limits",
            Self::TruncateData => "truncate-data",
            Self::BodyOverflow => "body-overflow",
        };
        f.write_str(s)
    }
}

/// The wire form of one record: the S3 object's user-metadata map, plus
/// an optional body used by `body-overflow` (and by the compressed path,
/// which never needs a body of its own).
#[derive(Clone, Debug, Default, PartialEq)]
pub struct EncodedRecord {
    pub metadata: BTreeMap<String, String>,
    pub body: Option<Vec<u8>>,
}

impl EncodedRecord {
    /// Sum of key + value byte lengths, the quantity the 2 KB cap
    /// (spec §3) is measured against.
    #[must_use]
    pub fn metadata_size(&self) -> usize {
        self.metadata.iter().map(|(k, v)| k.len() + v.len()).sum()
    }
}

/// The decoded form of a record: the reconstructed JSON value plus the
/// paths of any secret fields that failed to decrypt (spec §4.2 item 6,
/// §7 `DecryptionFailed`) — decode never aborts for a single bad field.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct DecodedRecord {
    pub value: Value,
    pub decryption_failed: Vec<String>,
}

/// Encode a record against a schema version, applying `behavior` if the
/// encoded form exceeds `metadata_cap_bytes`. `salt` is the database's
/// HKDF salt (spec §4.2 item 3) used to key any `secret` field — it must
/// be stable for the database's lifetime, not derived from the schema
/// version, or every schema edit would silently rotate every secret
/// field's key.
#[allow(clippy::too_many_arguments)]
pub fn encode(
    version: &SchemaVersion,
    behavior: Behavior,
    passphrase: Option<&str>,
    salt: &[u8],
    compression_enabled: bool,
    compression_min_savings: usize,
    metadata_cap_bytes: usize,
    record: &Value,
) -> Result<EncodedRecord, Error> {
    let flat = flatten(record);
    let validated = validate(version, flat).map_err(Error::Validation)?;

    let mut entries: BTreeMap<String, String> = BTreeMap::new();
    for (path, value) in &validated {
        let Some(attr) = version.attribute(path) else { continue };
        let token = version.token_for(path).expect("validated field has a token").to_string();
        let stringified = if attr.attr_type == AttributeType::Secret {
            let plaintext = value.as_str().ok_or_else(|| {
                Error::Validation(vec![ValidationIssue { path: path.clone(), message: "secret fields must be strings".into() }])
            })?;
            let passphrase = passphrase.ok_or_else(|| {
                Error::Configuration(format!("schema has a secret field {path:?} but no codec passphrase is configured"))
            })?;
            crypto::encrypt_field(passphrase, salt, &token, plaintext)
                .map_err(|e| Error::Internal(e.to_string()))?
        } else {
            stringify_value(attr.attr_type, value)
        };
        entries.insert(token, stringified);
    }

    entries.insert(reserved::VERSION.to_string(), version.id.0.clone());
    entries.insert(reserved::HASH.to_string(), version.hash.clone());
    entries.insert(reserved::TIMESTAMP.to_string(), chrono::Utc::now().to_rfc3339());

    let mut encoded = EncodedRecord { metadata: entries, body: None };

    if encoded.metadata_size() > metadata_cap_bytes {
        encoded = apply_overflow_behavior(version, behavior, encoded, metadata_cap_bytes)?;
    }

    if compression_enabled {
        encoded = maybe_compress(encoded, compression_min_savings)?;
    }

    Ok(encoded)
}

fn apply_overflow_behavior(
    version: &SchemaVersion,
    behavior: Behavior,
    mut encoded: EncodedRecord,
    cap: usize,
) -> Result<EncodedRecord, Error> {
    match behavior {
        Behavior::UserManaged | Behavior::EnforceLimits => Err(Error::FieldOverflow {
            behavior: behavior.to_string(),
            detail: format!("{} bytes exceeds the {cap} byte cap", encoded.metadata_size()),
        }),
        Behavior::TruncateData => {
            for attr in version.truncation_order() {
                if encoded.metadata_size() <= cap {
                    break;
                }
                if let Some(token) = version.token_for(&attr.path) {
                    encoded.metadata.remove(token);
                }
            }
            if encoded.metadata_size() > cap {
                return Err(Error::FieldOverflow {
                    behavior: behavior.to_string(),
                    detail: format!("{} bytes still exceeds the {cap} byte cap after dropping every droppable field", encoded.metadata_size()),
                });
            }
            encoded.metadata.insert(reserved::TRUNCATED.to_string(), "1".to_string());
            Ok(encoded)
        }
        Behavior::BodyOverflow => {
            let mut body = serde_json::Map::new();
            for attr in version.truncation_order() {
                let Some(token) = version.token_for(&attr.path) else { continue };
                if let Some(value) = encoded.metadata.remove(token) {
                    body.insert(token.to_string(), Value::String(value));
                }
            }
            if encoded.metadata_size() > cap {
                return Err(Error::FieldOverflow {
                    behavior: behavior.to_string(),
                    detail: format!("required fields alone ({} bytes) exceed the {cap} byte cap", encoded.metadata_size()),
                });
            }
            encoded.metadata.insert(reserved::OVERFLOW.to_string(), "1".to_string());
            encoded.body = Some(serde_json::to_vec(&Value::Object(body)).expect("body map always serializes"));
            Ok(encoded)
        }
    }
}

fn maybe_compress(mut encoded: EncodedRecord, min_savings: usize) -> Result<EncodedRecord, Error> {
    let raw = serde_json::to_vec(&encoded.metadata).expect("string map always serializes");
    let compressed = compress::compress(&raw).map_err(|e| Error::Internal(e.to_string()))?;
    if !compress::worth_compressing(&raw, &compressed, min_savings) {
        return Ok(encoded);
    }

    let mut kept = BTreeMap::new();
    for key in [reserved::VERSION, reserved::HASH, reserved::TIMESTAMP, reserved::TRUNCATED, reserved::OVERFLOW] {
        if let Some(value) = encoded.metadata.remove(key) {
            kept.insert(key.to_string(), value);
        }
    }
    kept.insert(reserved::COMPRESSED_FLAG.to_string(), "1".to_string());
    kept.insert(reserved::COMPRESSED_BLOB.to_string(), base64::Engine::encode(&base64::engine::general_purpose::STANDARD, compressed));
    encoded.metadata = kept;
    Ok(encoded)
}

/// Reverse the compression step only, leaving every other reserved key
/// and every field token untouched. Callers that only need a record's
/// raw token values (partition-key recomputation) can use this instead
/// of the full [`decode`], since it never touches secrets.
pub fn expand_metadata(metadata: &BTreeMap<String, String>) -> Result<BTreeMap<String, String>, Error> {
    let mut metadata = metadata.clone();
    if metadata.get(reserved::COMPRESSED_FLAG).map(String::as_str) == Some("1") {
        let blob = metadata.remove(reserved::COMPRESSED_BLOB).ok_or_else(|| Error::ManifestCorrupted("_c flag set without a _z blob".into()))?;
        let raw = base64::Engine::decode(&base64::engine::general_purpose::STANDARD, blob).map_err(|e| Error::ManifestCorrupted(e.to_string()))?;
        let decompressed = compress::decompress(&raw).map_err(|e| Error::ManifestCorrupted(e.to_string()))?;
        let restored: BTreeMap<String, String> =
            serde_json::from_slice(&decompressed).map_err(|e| Error::ManifestCorrupted(e.to_string()))?;
        metadata.remove(reserved::COMPRESSED_FLAG);
        for (k, v) in restored {
            metadata.insert(k, v);
        }
    }
    Ok(metadata)
}

/// Reverse of [`encode`]. Never fails on a single field going wrong — a
/// bad secret field is tagged in `decryption_failed` and left `null`.
/// `salt` must be the same database-scoped HKDF salt `encode` was
/// called with, not the record's schema version hash.
pub fn decode(version: &SchemaVersion, passphrase: Option<&str>, salt: &[u8], encoded: &EncodedRecord) -> Result<DecodedRecord, Error> {
    let mut metadata = expand_metadata(&encoded.metadata)?;

    let overflowed = metadata.remove(reserved::OVERFLOW).as_deref() == Some("1");
    metadata.remove(reserved::VERSION);
    metadata.remove(reserved::HASH);
    metadata.remove(reserved::TIMESTAMP);
    metadata.remove(reserved::TRUNCATED);

    let mut fields: BTreeMap<String, Value> = BTreeMap::new();
    let mut decryption_failed = Vec::new();

    for (token, raw_value) in &metadata {
        let Some(path) = version.path_for_token(token) else { continue };
        let Some(attr) = version.attribute(path) else { continue };
        decode_one(attr, token, raw_value, passphrase, salt, &mut fields, &mut decryption_failed)?;
    }

    if overflowed {
        if let Some(body) = &encoded.body {
            let body_map: BTreeMap<String, Value> = serde_json::from_slice(body).map_err(|e| Error::ManifestCorrupted(e.to_string()))?;
            for (token, raw) in body_map {
                let Some(path) = version.path_for_token(&token) else { continue };
                let Some(attr) = version.attribute(path) else { continue };
                let Some(raw_str) = raw.as_str() else { continue };
                decode_one(attr, &token, raw_str, passphrase, salt, &mut fields, &mut decryption_failed)?;
            }
        }
    }

    Ok(DecodedRecord { value: unflatten(&fields), decryption_failed })
}

fn decode_one(
    attr: &s3db_schema::AttributeDef,
    token: &str,
    raw_value: &str,
    passphrase: Option<&str>,
    salt: &[u8],
    fields: &mut BTreeMap<String, Value>,
    decryption_failed: &mut Vec<String>,
) -> Result<(), Error> {
    if attr.attr_type == AttributeType::Secret {
        let Some(passphrase) = passphrase else {
            decryption_failed.push(attr.path.clone());
            fields.insert(attr.path.clone(), Value::Null);
            return Ok(());
        };
        match crypto::decrypt_field(passphrase, salt, token, raw_value) {
            Ok(plaintext) => {
                fields.insert(attr.path.clone(), Value::String(plaintext));
            }
            Err(_) => {
                decryption_failed.push(attr.path.clone());
                fields.insert(attr.path.clone(), Value::Null);
            }
        }
    } else {
        fields.insert(attr.path.clone(), parse_value(attr.attr_type, raw_value));
    }
    Ok(())
}

fn stringify_value(attr_type: AttributeType, value: &Value) -> String {
    match attr_type {
        AttributeType::String | AttributeType::Url | AttributeType::Email | AttributeType::Date => {
            value.as_str().unwrap_or_default().to_string()
        }
        AttributeType::Number => value.as_f64().map(|n| n.to_string()).unwrap_or_default(),
        AttributeType::Boolean => value.as_bool().unwrap_or_default().to_string(),
        AttributeType::Object | AttributeType::Array => serde_json::to_string(value).unwrap_or_default(),
        AttributeType::Secret => unreachable!("secret fields are encrypted, not stringified"),
    }
}

fn parse_value(attr_type: AttributeType, raw: &str) -> Value {
    match attr_type {
        AttributeType::String | AttributeType::Url | AttributeType::Email | AttributeType::Date => Value::String(raw.to_string()),
        AttributeType::Number => raw.parse::<f64>().ok().and_then(serde_json::Number::from_f64).map(Value::Number).unwrap_or(Value::Null),
        AttributeType::Boolean => Value::Bool(raw == "true"),
        AttributeType::Object | AttributeType::Array => serde_json::from_str(raw).unwrap_or(Value::Null),
        AttributeType::Secret => Value::String(raw.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use s3db_schema::{AttributeDef, Validators};
    use serde_json::json;

    fn version() -> SchemaVersion {
        SchemaVersion::new(
            "v1",
            vec![
                AttributeDef::new("name", AttributeType::String).required(),
                AttributeDef::new("age", AttributeType::Number),
                AttributeDef::new("ssn", AttributeType::Secret),
                AttributeDef::new("bio", AttributeType::String).with_priority(0).with_validators(Validators::default()),
            ],
        )
    }

    #[test]
    fn encode_decode_roundtrips_plain_fields() {
        let v = version();
        let record = json!({"name": "Ada", "age": 36});
        let encoded = encode(&v, Behavior::EnforceLimits, None, b"test-salt", false, 64, 2048, &record).unwrap();
        let decoded = decode(&v, None, b"test-salt", &encoded).unwrap();
        assert_eq!(decoded.value["name"], json!("Ada"));
        assert_eq!(decoded.value["age"], json!(36.0));
        assert!(decoded.decryption_failed.is_empty());
    }

    #[test]
    fn secret_fields_roundtrip_with_passphrase() {
        let v = version();
        let record = json!({"name": "Ada", "ssn": "123-45-6789"});
        let encoded = encode(&v, Behavior::EnforceLimits, Some("hunter2"), b"test-salt", false, 64, 2048, &record).unwrap();
        let decoded = decode(&v, Some("hunter2"), b"test-salt", &encoded).unwrap();
        assert_eq!(decoded.value["ssn"], json!("123-45-6789"));
    }

    #[test]
    fn secret_field_without_passphrase_is_tagged_not_fatal() {
        let v = version();
        let record = json!({"name": "Ada", "ssn": "123-45-6789"});
        let encoded = encode(&v, Behavior::EnforceLimits, Some("hunter2"), b"test-salt", false, 64, 2048, &record).unwrap();
        let decoded = decode(&v, None, b"test-salt", &encoded).unwrap();
        assert_eq!(decoded.value["ssn"], Value::Null);
        assert_eq!(decoded.decryption_failed, vec!["ssn".to_string()]);
    }

    #[test]
    fn enforce_limits_fails_closed_on_overflow() {
        let v = version();
        let record = json!({"name": "x".repeat(5000)});
        let result = encode(&v, Behavior::EnforceLimits, None, b"test-salt", false, 64, 2048, &record);
        assert!(matches!(result, Err(Error::FieldOverflow { .. })));
    }

    #[test]
    fn truncate_data_drops_low_priority_fields_until_it_fits() {
        let v = version();
        let record = json!({"name": "Ada", "bio": "x".repeat(5000)});
        let encoded = encode(&v, Behavior::TruncateData, None, b"test-salt", false, 64, 2048, &record).unwrap();
        assert!(encoded.metadata_size() <= 2048);
        assert_eq!(encoded.metadata.get(reserved::TRUNCATED).map(String::as_str), Some("1"));
        let decoded = decode(&v, None, b"test-salt", &encoded).unwrap();
        assert_eq!(decoded.value["name"], json!("Ada"));
        assert!(decoded.value.get("bio").is_none());
    }

    #[test]
    fn body_overflow_moves_fields_to_body_and_roundtrips() {
        let v = version();
        let record = json!({"name": "Ada", "bio": "x".repeat(5000)});
        let encoded = encode(&v, Behavior::BodyOverflow, None, b"test-salt", false, 64, 2048, &record).unwrap();
        assert!(encoded.body.is_some());
        assert_eq!(encoded.metadata.get(reserved::OVERFLOW).map(String::as_str), Some("1"));
        let decoded = decode(&v, None, b"test-salt", &encoded).unwrap();
        assert_eq!(decoded.value["name"], json!("Ada"));
        assert_eq!(decoded.value["bio"], json!("x".repeat(5000)));
    }

    #[test]
    fn compression_is_applied_and_reversed_when_it_saves_bytes() {
        let v = version();
        let record = json!({"name": "Ada".repeat(50)});
        let encoded = encode(&v, Behavior::EnforceLimits, None, b"test-salt", true, 4, 2048, &record).unwrap();
        assert_eq!(encoded.metadata.get(reserved::COMPRESSED_FLAG).map(String::as_str), Some("1"));
        let decoded = decode(&v, None, b"test-salt", &encoded).unwrap();
        assert_eq!(decoded.value["name"], json!("Ada".repeat(50)));
    }

    proptest! {
        #[test]
        fn encode_decode_roundtrips_arbitrary_name_and_age(name in "[a-zA-Z0-9 ]{0,40}", age in 0u32..130) {
            let v = version();
            let record = json!({"name": name, "age": age});
            let encoded = encode(&v, Behavior::EnforceLimits, None, b"test-salt", false, 64, 4096, &record).unwrap();
            let decoded = decode(&v, None, b"test-salt", &encoded).unwrap();
            prop_assert_eq!(&decoded.value["name"], &json!(name));
            prop_assert_eq!(&decoded.value["age"], &json!(f64::from(age)));
        }
    }
}
