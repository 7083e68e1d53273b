//! Lease and worker-heartbeat bodies, and the re-read-after-write
//! acquisition protocol (spec §4.6, §9 "Coordination without CAS").
//!
//! S3 has no portable conditional PUT, so mutual exclusion is achieved
//! by writing a candidate lease and re-reading it: whichever writer's
//! value survives the read is the one everyone downstream agrees on.
//! The same idiom is used by `s3db_resource::id::IdGenerator::allocate`
//! for incremental id counters.

use bytes::Bytes;
use chrono::{DateTime, Utc};
use s3db_blob::{BlobClient, BlobErrorKind};
use s3db_common::Error;
use std::collections::HashMap;
use std::sync::Arc;

/// `coord/<ns>/lease` body.
#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Lease {
    pub leader_id: String,
    pub epoch: u64,
    pub acquired_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

/// `coord/<ns>/workers/<workerId>` body.
#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct WorkerHeartbeat {
    pub worker_id: String,
    pub last_seen: DateTime<Utc>,
}

/// Reads the current lease, or `None` if one has never been written.
pub async fn read_lease(blob: &Arc<dyn BlobClient>, key: &str) -> Result<Option<Lease>, Error> {
    match blob.get_object(key).await {
        Ok(out) => {
            let lease: Lease = serde_json::from_slice(&out.body)
                .map_err(|e| Error::ManifestCorrupted(format!("lease body at {key}: {e}")))?;
            Ok(Some(lease))
        }
        Err(e) if e.kind == BlobErrorKind::NoSuchKey => Ok(None),
        Err(e) => Err(e.into()),
    }
}

async fn write_lease(blob: &Arc<dyn BlobClient>, key: &str, lease: &Lease) -> Result<(), Error> {
    let body = serde_json::to_vec(lease).expect("lease body always serializes");
    blob.put_object(key, Bytes::from(body), HashMap::new(), Some("application/json")).await?;
    Ok(())
}

/// Outcome of one acquisition/renewal attempt.
#[derive(Debug, PartialEq, Eq)]
pub enum AcquireOutcome {
    /// `self_id` now holds the lease at this epoch.
    Acquired(Lease),
    /// Another process's write won the race; `self_id` concedes.
    Conceded(Lease),
}

/// Attempt to become leader, or renew if already leader.
///
/// Writes a candidate lease, then re-reads it. If the re-read still
/// shows `self_id` at the epoch just written, the acquisition stuck;
/// otherwise a concurrent writer raced ahead and `self_id` concedes to
/// whatever it now sees (which may itself be stale — the caller will
/// simply try again next tick).
pub async fn acquire_or_renew(
    blob: &Arc<dyn BlobClient>,
    key: &str,
    self_id: &str,
    prior: Option<&Lease>,
    lease_timeout: chrono::Duration,
    now: DateTime<Utc>,
) -> Result<AcquireOutcome, Error> {
    let next_epoch = match prior {
        Some(lease) if lease.leader_id == self_id => lease.epoch,
        Some(lease) => lease.epoch + 1,
        None => 1,
    };
    let candidate = Lease {
        leader_id: self_id.to_string(),
        epoch: next_epoch,
        acquired_at: prior.filter(|l| l.leader_id == self_id).map_or(now, |l| l.acquired_at),
        expires_at: now + lease_timeout,
    };
    write_lease(blob, key, &candidate).await?;

    let observed = read_lease(blob, key).await?.ok_or_else(|| {
        Error::internal("lease disappeared immediately after being written")
    })?;
    if observed.leader_id == self_id && observed.epoch == candidate.epoch {
        Ok(AcquireOutcome::Acquired(observed))
    } else {
        Ok(AcquireOutcome::Conceded(observed))
    }
}

/// Whether a lease is still valid at `now`.
#[must_use]
pub fn is_expired(lease: &Lease, now: DateTime<Utc>) -> bool {
    now > lease.expires_at
}

#[cfg(test)]
mod tests {
    use super::*;
    use s3db_blob::MemoryBlobClient;

    fn now() -> DateTime<Utc> {
        Utc::now()
    }

    #[tokio::test]
    async fn first_process_acquires_epoch_one() {
        let blob: Arc<dyn BlobClient> = Arc::new(MemoryBlobClient::new());
        let outcome = acquire_or_renew(&blob, "coord/ns/lease", "p1", None, chrono::Duration::seconds(15), now())
            .await
            .unwrap();
        match outcome {
            AcquireOutcome::Acquired(lease) => {
                assert_eq!(lease.leader_id, "p1");
                assert_eq!(lease.epoch, 1);
            }
            AcquireOutcome::Conceded(_) => panic!("expected acquisition"),
        }
    }

    #[tokio::test]
    async fn renewal_keeps_the_same_epoch() {
        let blob: Arc<dyn BlobClient> = Arc::new(MemoryBlobClient::new());
        let first = acquire_or_renew(&blob, "coord/ns/lease", "p1", None, chrono::Duration::seconds(15), now())
            .await
            .unwrap();
        let prior = match first {
            AcquireOutcome::Acquired(lease) => lease,
            AcquireOutcome::Conceded(_) => unreachable!(),
        };
        let second =
            acquire_or_renew(&blob, "coord/ns/lease", "p1", Some(&prior), chrono::Duration::seconds(15), now())
                .await
                .unwrap();
        match second {
            AcquireOutcome::Acquired(lease) => assert_eq!(lease.epoch, 1),
            AcquireOutcome::Conceded(_) => panic!("expected renewal to succeed"),
        }
    }

    #[tokio::test]
    async fn a_new_claimant_bumps_the_epoch_after_expiry() {
        let blob: Arc<dyn BlobClient> = Arc::new(MemoryBlobClient::new());
        let first = acquire_or_renew(&blob, "coord/ns/lease", "p1", None, chrono::Duration::seconds(15), now())
            .await
            .unwrap();
        let prior = match first {
            AcquireOutcome::Acquired(lease) => lease,
            AcquireOutcome::Conceded(_) => unreachable!(),
        };
        let second = acquire_or_renew(
            &blob,
            "coord/ns/lease",
            "p2",
            Some(&prior),
            chrono::Duration::seconds(15),
            now(),
        )
        .await
        .unwrap();
        match second {
            AcquireOutcome::Acquired(lease) => {
                assert_eq!(lease.leader_id, "p2");
                assert_eq!(lease.epoch, 2);
            }
            AcquireOutcome::Conceded(_) => panic!("expected p2 to win the uncontested race"),
        }
    }

    #[test]
    fn expiry_is_strictly_after_expires_at() {
        let lease = Lease { leader_id: "p1".into(), epoch: 1, acquired_at: now(), expires_at: now() };
        assert!(!is_expired(&lease, lease.expires_at));
        assert!(is_expired(&lease, lease.expires_at + chrono::Duration::milliseconds(1)));
    }
}
