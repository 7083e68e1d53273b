//! Worker heartbeats and staleness sweeping (spec §4.6).

use crate::lease::WorkerHeartbeat;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use s3db_blob::{BlobClient, ListOptions};
use s3db_common::Error;
use std::collections::HashMap;
use std::sync::Arc;

/// Write (or refresh) this process's own heartbeat object.
pub async fn write_heartbeat(blob: &Arc<dyn BlobClient>, key: &str, worker_id: &str, now: DateTime<Utc>) -> Result<(), Error> {
    let body = serde_json::to_vec(&WorkerHeartbeat { worker_id: worker_id.to_string(), last_seen: now })
        .expect("heartbeat body always serializes");
    blob.put_object(key, Bytes::from(body), HashMap::new(), Some("application/json")).await?;
    Ok(())
}

/// List every worker heartbeat currently recorded under a namespace.
pub async fn list_heartbeats(blob: &Arc<dyn BlobClient>, workers_prefix: &str) -> Result<Vec<(String, WorkerHeartbeat)>, Error> {
    let mut out = Vec::new();
    let mut token = None;
    loop {
        let page = blob
            .list_objects(workers_prefix, ListOptions { max_keys: Some(1000), continuation_token: token, delimiter: None })
            .await?;
        for key in page.keys {
            match blob.get_object(&key).await {
                Ok(obj) => {
                    if let Ok(hb) = serde_json::from_slice::<WorkerHeartbeat>(&obj.body) {
                        out.push((key, hb));
                    }
                }
                Err(e) if e.kind == s3db_blob::BlobErrorKind::NoSuchKey => {}
                Err(e) => return Err(e.into()),
            }
        }
        token = page.next_token;
        if token.is_none() {
            break;
        }
    }
    Ok(out)
}

/// Workers whose heartbeat is older than `worker_timeout`, as `(key, heartbeat)` pairs.
#[must_use]
pub fn find_stale<'a>(
    heartbeats: &'a [(String, WorkerHeartbeat)],
    worker_timeout: chrono::Duration,
    now: DateTime<Utc>,
) -> Vec<&'a str> {
    heartbeats
        .iter()
        .filter(|(_, hb)| now - hb.last_seen > worker_timeout)
        .map(|(key, _)| key.as_str())
        .collect()
}

/// Delete every stale worker's heartbeat object. Only the current leader
/// should call this (spec §4.6: "their heartbeat objects are swept by
/// the leader").
pub async fn sweep_stale(blob: &Arc<dyn BlobClient>, stale_keys: &[&str]) -> Result<usize, Error> {
    let mut swept = 0;
    for key in stale_keys {
        match blob.delete_object(key).await {
            Ok(()) => swept += 1,
            Err(e) if e.kind == s3db_blob::BlobErrorKind::NoSuchKey => {}
            Err(e) => return Err(e.into()),
        }
    }
    Ok(swept)
}

#[cfg(test)]
mod tests {
    use super::*;
    use s3db_blob::MemoryBlobClient;

    #[tokio::test]
    async fn heartbeat_roundtrips_through_list() {
        let blob: Arc<dyn BlobClient> = Arc::new(MemoryBlobClient::new());
        let now = Utc::now();
        write_heartbeat(&blob, "coord/ns/workers/w1", "w1", now).await.unwrap();
        write_heartbeat(&blob, "coord/ns/workers/w2", "w2", now).await.unwrap();
        let all = list_heartbeats(&blob, "coord/ns/workers/").await.unwrap();
        assert_eq!(all.len(), 2);
    }

    #[tokio::test]
    async fn stale_workers_are_found_and_swept() {
        let blob: Arc<dyn BlobClient> = Arc::new(MemoryBlobClient::new());
        let now = Utc::now();
        let stale_at = now - chrono::Duration::seconds(60);
        write_heartbeat(&blob, "coord/ns/workers/dead", "dead", stale_at).await.unwrap();
        write_heartbeat(&blob, "coord/ns/workers/alive", "alive", now).await.unwrap();

        let all = list_heartbeats(&blob, "coord/ns/workers/").await.unwrap();
        let stale = find_stale(&all, chrono::Duration::seconds(20), now);
        assert_eq!(stale, vec!["coord/ns/workers/dead"]);

        let swept = sweep_stale(&blob, &stale).await.unwrap();
        assert_eq!(swept, 1);
        let remaining = list_heartbeats(&blob, "coord/ns/workers/").await.unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].1.worker_id, "alive");
    }
}
