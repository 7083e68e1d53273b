//! Query & list (spec §4.3 "Query & list").
//!
//! `list`/`page`/`count` enumerate the data prefix; `listPartition` uses a
//! partition-index prefix directly so it costs O(matching rows) LIST
//! calls instead of a full scan. `query` layers a linear in-process
//! filter on top of either source.

use s3db_blob::{BlobClient, ListOptions};
use s3db_common::Error;
use std::sync::Arc;

/// Page through `prefix` via continuation tokens, collecting every key.
/// Used for enumeration-heavy operations (`list`, `count`, `query`),
/// which accept O(n) LIST calls in exchange for simplicity.
pub async fn list_all_keys(blob: &Arc<dyn BlobClient>, prefix: &str) -> Result<Vec<String>, Error> {
    let mut keys = Vec::new();
    let mut token = None;
    loop {
        let out = blob
            .list_objects(prefix, ListOptions { max_keys: Some(1000), continuation_token: token, delimiter: None })
            .await?;
        keys.extend(out.keys);
        token = out.next_token;
        if token.is_none() {
            break;
        }
    }
    Ok(keys)
}

/// `data/<resource>/<id>` -> `<id>`.
#[must_use]
pub fn id_from_data_key<'a>(key: &'a str, prefix: &str) -> Option<&'a str> {
    key.strip_prefix(prefix)
}

/// `.../id=<id>` -> `<id>`.
#[must_use]
pub fn id_from_partition_key(key: &str) -> Option<&str> {
    key.rsplit('/').next().and_then(|segment| segment.strip_prefix("id="))
}

/// `list`/`listIds`: every id under the data prefix, paginated by
/// `offset`/`limit` after a full key enumeration.
pub async fn list_ids(blob: &Arc<dyn BlobClient>, resource: &str, limit: Option<usize>, offset: usize) -> Result<Vec<String>, Error> {
    let prefix = s3db_common::keys::data_prefix(resource);
    let mut keys = list_all_keys(blob, &prefix).await?;
    keys.sort();
    let ids: Vec<String> = keys.iter().filter_map(|k| id_from_data_key(k, &prefix)).map(str::to_string).collect();
    Ok(page_slice(&ids, offset, limit))
}

/// `listPartition({partition, partitionValues, limit})`: ids under a
/// (possibly partial) partition-coordinate prefix.
pub async fn list_partition(
    blob: &Arc<dyn BlobClient>,
    resource: &str,
    partition: &str,
    coords: &[(String, String)],
    limit: Option<usize>,
) -> Result<Vec<String>, Error> {
    let prefix = s3db_common::keys::partition_values_prefix(resource, partition, coords);
    let mut keys = list_all_keys(blob, &prefix).await?;
    keys.sort();
    let ids: Vec<String> = keys.iter().filter_map(|k| id_from_partition_key(k)).map(str::to_string).collect();
    Ok(page_slice(&ids, 0, limit))
}

/// `count()`, optionally scoped to ids already gathered by a partition
/// list — the caller decides whether to count the full resource or one
/// partition by choosing which id source to pass in.
#[must_use]
pub fn count_ids(ids: &[String]) -> usize {
    ids.len()
}

/// `page({offset, size, skipCount})`: a page of ids plus, unless
/// `skip_count` is set, the total id count across the whole resource.
pub struct Page {
    pub ids: Vec<String>,
    pub total: Option<usize>,
}

pub async fn page(
    blob: &Arc<dyn BlobClient>,
    resource: &str,
    offset: usize,
    size: usize,
    skip_count: bool,
) -> Result<Page, Error> {
    let prefix = s3db_common::keys::data_prefix(resource);
    let mut keys = list_all_keys(blob, &prefix).await?;
    keys.sort();
    let ids: Vec<String> = keys.iter().filter_map(|k| id_from_data_key(k, &prefix)).map(str::to_string).collect();
    let total = if skip_count { None } else { Some(ids.len()) };
    Ok(Page { ids: page_slice(&ids, offset, Some(size)), total })
}

fn page_slice(ids: &[String], offset: usize, limit: Option<usize>) -> Vec<String> {
    let start = offset.min(ids.len());
    let end = match limit {
        Some(limit) => (start + limit).min(ids.len()),
        None => ids.len(),
    };
    ids[start..end].to_vec()
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use s3db_blob::MemoryBlobClient;
    use std::collections::HashMap;

    async fn seeded(resource: &str, ids: &[&str]) -> Arc<dyn BlobClient> {
        let blob: Arc<dyn BlobClient> = Arc::new(MemoryBlobClient::new());
        for id in ids {
            blob.put_object(&s3db_common::keys::data(resource, id), Bytes::new(), HashMap::new(), None).await.unwrap();
        }
        blob
    }

    #[tokio::test]
    async fn list_ids_respects_offset_and_limit() {
        let blob = seeded("users", &["a", "b", "c", "d"]).await;
        let ids = list_ids(&blob, "users", Some(2), 1).await.unwrap();
        assert_eq!(ids, vec!["b".to_string(), "c".to_string()]);
    }

    #[tokio::test]
    async fn page_reports_total_unless_skipped() {
        let blob = seeded("users", &["a", "b", "c"]).await;
        let page1 = page(&blob, "users", 0, 2, false).await.unwrap();
        assert_eq!(page1.ids, vec!["a".to_string(), "b".to_string()]);
        assert_eq!(page1.total, Some(3));

        let page2 = page(&blob, "users", 0, 2, true).await.unwrap();
        assert_eq!(page2.total, None);
    }

    #[tokio::test]
    async fn list_partition_reads_ids_from_index_keys() {
        let blob: Arc<dyn BlobClient> = Arc::new(MemoryBlobClient::new());
        blob.put_object(
            &s3db_common::keys::partition_entry("users", "byRegion", &[("region".to_string(), "us".to_string())], "u1"),
            Bytes::new(),
            HashMap::new(),
            None,
        )
        .await
        .unwrap();
        blob.put_object(
            &s3db_common::keys::partition_entry("users", "byRegion", &[("region".to_string(), "eu".to_string())], "u2"),
            Bytes::new(),
            HashMap::new(),
            None,
        )
        .await
        .unwrap();

        let ids = list_partition(&blob, "users", "byRegion", &[("region".to_string(), "us".to_string())], None).await.unwrap();
        assert_eq!(ids, vec!["u1".to_string()]);
    }

    #[test]
    fn id_from_partition_key_strips_id_segment() {
        assert_eq!(id_from_partition_key("part/users/byRegion/region=us/id=u1"), Some("u1"));
    }
}
