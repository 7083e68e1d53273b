//! Queue Runtime configuration (spec §4.7).

use s3db_common::config::RetryConfig;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Per-queue tuning. `retry` governs the pending/backoff delay applied
/// after a failed attempt, reusing the same shape as the Blob Client's
/// retry policy since both are "wait longer after each failure".
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct QueueConfig {
    /// How long a claimed message stays invisible to other workers
    /// before the reaper considers it abandoned.
    #[serde(with = "duration_millis")]
    pub visibility_timeout: Duration,
    /// Attempts allowed before a message is dead-lettered (`state =
    /// failed`).
    pub max_attempts: u32,
    /// Messages claimed per `claim_batch` call.
    pub batch_size: usize,
    pub retry: RetryConfig,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            visibility_timeout: Duration::from_secs(30),
            max_attempts: 5,
            batch_size: 10,
            retry: RetryConfig::default(),
        }
    }
}

impl QueueConfig {
    /// The pending-retry delay after `attempt` failed attempts (1-indexed),
    /// mirroring the Blob Client's exponential-backoff-with-jitter shape
    /// (spec §4.1) so a failing handler doesn't hammer itself immediately.
    #[must_use]
    pub fn backoff_for_attempt(&self, attempt: u32) -> chrono::Duration {
        let base = self.retry.base_delay.as_secs_f64();
        let delay = base * self.retry.factor.powi(attempt.saturating_sub(1) as i32);
        chrono::Duration::milliseconds((delay * 1000.0) as i64)
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
