//! Configuration types for s3db.
//!
//! Mirrors the donor's nested, per-section `Default`-impl config tree.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Root configuration for a `Database` connection.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Config {
    pub blob: BlobConfig,
    pub codec: CodecConfig,
    pub coordination: CoordinationConfig,
    pub resource: ResourceDefaults,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            blob: BlobConfig::default(),
            codec: CodecConfig::default(),
            coordination: CoordinationConfig::default(),
            resource: ResourceDefaults::default(),
        }
    }
}

/// Blob Client configuration (spec §4.1).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BlobConfig {
    /// S3-compatible endpoint URL; `None` selects the AWS default for the
    /// configured region.
    pub endpoint: Option<String>,
    pub region: String,
    pub bucket: String,
    /// Key prefix every object in this database is nested under.
    pub prefix: String,
    pub access_key: Option<String>,
    pub secret_key: Option<String>,
    /// Max in-flight HTTP requests (`P` in spec §4.1).
    pub parallelism: usize,
    pub retry: RetryConfig,
}

impl Default for BlobConfig {
    fn default() -> Self {
        Self {
            endpoint: None,
            region: "us-east-1".to_string(),
            bucket: String::new(),
            prefix: String::new(),
            access_key: None,
            secret_key: None,
            parallelism: 10,
            retry: RetryConfig::default(),
        }
    }
}

/// Exponential backoff parameters (spec §4.1: base 100ms, factor 2, ±25% jitter).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RetryConfig {
    pub max_attempts: u32,
    #[serde(with = "duration_millis")]
    pub base_delay: Duration,
    pub factor: f64,
    pub jitter_fraction: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(100),
            factor: 2.0,
            jitter_fraction: 0.25,
        }
    }
}

mod duration_millis {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        (d.as_millis() as u64).serialize(s)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(d)?))
    }
}

/// Codec Stack configuration (spec §4.2).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CodecConfig {
    pub compression_enabled: bool,
    /// Minimum bytes a compressed blob must save over raw to be kept
    /// compressed (spec §4.2 step 4).
    pub compression_min_savings: usize,
    /// Target metadata cap in bytes (spec §3: "target 2 KB").
    pub metadata_cap_bytes: usize,
    /// Symmetric-encryption passphrase for `secret`-typed attributes.
    /// Never read from the environment (spec §6) — must be set in config.
    pub passphrase: Option<String>,
    /// HKDF salt for deriving per-field encryption keys, scoped to one
    /// database (spec §4.2 item 3: "derived via HKDF over a
    /// per-database salt"). `None` until `Database::connect` fills in a
    /// default derived from the connection's bucket and key prefix —
    /// the schema's own content hash must never stand in for this,
    /// since a schema edit would then rotate every secret field's key.
    pub salt: Option<String>,
}

impl Default for CodecConfig {
    fn default() -> Self {
        Self {
            compression_enabled: false,
            compression_min_savings: 64,
            metadata_cap_bytes: 2048,
            passphrase: None,
            salt: None,
        }
    }
}

impl CodecConfig {
    /// The HKDF salt bytes to key field-encryption with: the configured
    /// override if set, otherwise an empty salt (HKDF accepts an empty
    /// salt per RFC 5869, it just loses the per-database binding that
    /// `Database::connect` otherwise fills in via
    /// [`Self::with_database_salt`]).
    #[must_use]
    pub fn salt_bytes(&self) -> Vec<u8> {
        self.salt.as_deref().unwrap_or("").as_bytes().to_vec()
    }

    /// Fill in a default per-database salt from `bucket`/`prefix` if one
    /// isn't already configured. Called once at connect time so every
    /// resource, queue, counter and replicator opened against the same
    /// database derives secret-field keys from the same salt, and two
    /// databases with different bucket/prefix never collide even when
    /// they share a passphrase.
    #[must_use]
    pub fn with_database_salt(mut self, bucket: &str, prefix: &str) -> Self {
        if self.salt.is_none() {
            self.salt = Some(format!("s3db:{bucket}/{prefix}"));
        }
        self
    }
}

/// Coordination Service configuration (spec §4.6).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CoordinationConfig {
    #[serde(with = "duration_millis")]
    pub heartbeat_interval: Duration,
    pub heartbeat_jitter: f64,
    #[serde(with = "duration_millis")]
    pub lease_timeout: Duration,
    #[serde(with = "duration_millis")]
    pub worker_timeout: Duration,
}

impl Default for CoordinationConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval: Duration::from_secs(5),
            heartbeat_jitter: 0.1,
            lease_timeout: Duration::from_secs(15),
            worker_timeout: Duration::from_secs(20),
        }
    }
}

impl CoordinationConfig {
    /// Validate the invariant spec §4.6 calls out: lease timeout must be
    /// at least 2x the heartbeat interval.
    pub fn validate(&self) -> Result<(), String> {
        if self.lease_timeout < self.heartbeat_interval * 2 {
            return Err(format!(
                "lease_timeout ({:?}) must be >= 2x heartbeat_interval ({:?})",
                self.lease_timeout, self.heartbeat_interval
            ));
        }
        Ok(())
    }
}

/// Default behavior for newly created resources (spec §4.3).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ResourceDefaults {
    pub async_partitions: bool,
    pub persist_hooks: bool,
}

impl Default for ResourceDefaults {
    fn default() -> Self {
        Self {
            async_partitions: false,
            persist_hooks: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lease_timeout_invariant() {
        let mut cfg = CoordinationConfig::default();
        assert!(cfg.validate().is_ok());
        cfg.lease_timeout = Duration::from_secs(1);
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn config_roundtrips_through_json() {
        let cfg = Config::default();
        let json = serde_json::to_string(&cfg).unwrap();
        let back: Config = serde_json::from_str(&json).unwrap();
        assert_eq!(back.blob.parallelism, cfg.blob.parallelism);
    }

    #[test]
    fn database_salt_defaults_are_scoped_per_bucket_and_prefix() {
        let a = CodecConfig::default().with_database_salt("acme", "app");
        let b = CodecConfig::default().with_database_salt("acme", "other-app");
        assert_ne!(a.salt_bytes(), b.salt_bytes());
    }

    #[test]
    fn explicit_salt_is_not_overridden_by_database_defaults() {
        let cfg = CodecConfig { salt: Some("fixed".to_string()), ..CodecConfig::default() }.with_database_salt("acme", "app");
        assert_eq!(cfg.salt_bytes(), b"fixed".to_vec());
    }
}
