//! Replicator tuning (spec §4.9 "with retries (exp. backoff, cap
//! `maxAttempts`)").

use s3db_common::config::RetryConfig;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ReplicationConfig {
    pub max_attempts: u32,
    pub batch_size: usize,
    pub retry: RetryConfig,
}

impl Default for ReplicationConfig {
    fn default() -> Self {
        Self { max_attempts: 8, batch_size: 25, retry: RetryConfig::default() }
    }
}

impl ReplicationConfig {
    #[must_use]
    pub fn backoff_for_attempt(&self, attempt: u32) -> chrono::Duration {
        let base = self.retry.base_delay.as_secs_f64();
        let delay = base * self.retry.factor.powi(attempt.saturating_sub(1) as i32);
        chrono::Duration::milliseconds((delay * 1000.0) as i64)
    }
}
