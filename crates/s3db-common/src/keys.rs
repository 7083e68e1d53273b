//! S3 object key layout (spec §6 "Object layout under the prefix").
//!
//! These builders produce keys relative to a database's key prefix; the
//! prefix itself is applied by the [`crate::Config`]'s blob configuration
//! and the `BlobClient` implementation, never re-applied here.

/// `s3db.json`
#[must_use]
pub fn manifest() -> String {
    "s3db.json".to_string()
}

/// `s3db.json.corrupted.<iso>.backup`
#[must_use]
pub fn manifest_backup(iso_timestamp: &str) -> String {
    format!("s3db.json.corrupted.{iso_timestamp}.backup")
}

/// `data/<resource>/<id>`
#[must_use]
pub fn data(resource: &str, id: &str) -> String {
    format!("data/{resource}/{id}")
}

/// `data/<resource>/` — list prefix for a resource's data.
#[must_use]
pub fn data_prefix(resource: &str) -> String {
    format!("data/{resource}/")
}

/// `part/<resource>/<partName>/<k=v>/.../id=<id>`. `coords` must already be
/// in the partition definition's declared field order.
#[must_use]
pub fn partition_entry(resource: &str, partition: &str, coords: &[(String, String)], id: &str) -> String {
    let mut key = format!("part/{resource}/{partition}/");
    for (field, value) in coords {
        key.push_str(&format!("{field}={}/", encode_partition_value(value)));
    }
    key.push_str(&format!("id={id}"));
    key
}

/// `part/<resource>/<partName>/` — the full partition's list prefix.
#[must_use]
pub fn partition_prefix(resource: &str, partition: &str) -> String {
    format!("part/{resource}/{partition}/")
}

/// `part/<resource>/<partName>/<k=v>/.../` — prefix for a (possibly
/// partial) set of partition coordinates, for `listPartition`.
#[must_use]
pub fn partition_values_prefix(resource: &str, partition: &str, coords: &[(String, String)]) -> String {
    let mut key = partition_prefix(resource, partition);
    for (field, value) in coords {
        key.push_str(&format!("{field}={}/", encode_partition_value(value)));
    }
    key
}

/// Partition coordinate values must not contain `/` (they are key
/// segments); replace any that sneak in via a URL-safe escape instead of
/// failing the write outright.
#[must_use]
pub fn encode_partition_value(value: &str) -> String {
    value.replace('/', "%2F")
}

/// `coord/<ns>/lease`
#[must_use]
pub fn coord_lease(namespace: &str) -> String {
    format!("coord/{namespace}/lease")
}

/// `coord/<ns>/workers/<workerId>`
#[must_use]
pub fn coord_worker(namespace: &str, worker_id: &str) -> String {
    format!("coord/{namespace}/workers/{worker_id}")
}

/// `coord/<ns>/workers/` — list prefix for all worker heartbeats.
#[must_use]
pub fn coord_workers_prefix(namespace: &str) -> String {
    format!("coord/{namespace}/workers/")
}

/// `<resource>_transactions_<field>/data/<tid>`
#[must_use]
pub fn transaction(resource: &str, field: &str, tid: &str) -> String {
    format!("{resource}_transactions_{field}/data/{tid}")
}

/// `<resource>_analytics_<field>/data/<day>/<id>`
#[must_use]
pub fn analytics(resource: &str, field: &str, day: &str, id: &str) -> String {
    format!("{resource}_analytics_{field}/data/{day}/{id}")
}

/// `<resource>_analytics_<field>/data/<day>/` — list prefix for one day's cohort.
#[must_use]
pub fn analytics_day_prefix(resource: &str, field: &str, day: &str) -> String {
    format!("{resource}_analytics_{field}/data/{day}/")
}

/// `replication/<targetId>/data/<entryId>`
#[must_use]
pub fn replication_entry(target_id: &str, entry_id: &str) -> String {
    format!("replication/{target_id}/data/{entry_id}")
}

/// `replication/<targetId>/data/` — list prefix for draining one target's log.
#[must_use]
pub fn replication_prefix(target_id: &str) -> String {
    format!("replication/{target_id}/data/")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partition_entry_orders_coords_as_given() {
        let key = partition_entry("users", "byRegion", &[("region".to_string(), "us".to_string())], "u1");
        assert_eq!(key, "part/users/byRegion/region=us/id=u1");
    }

    #[test]
    fn partition_value_slash_is_escaped() {
        assert_eq!(encode_partition_value("a/b"), "a%2Fb");
    }

    #[test]
    fn sibling_resource_keys() {
        assert_eq!(transaction("users", "clicks", "t1"), "users_transactions_clicks/data/t1");
        assert_eq!(analytics("users", "clicks", "2026-07-28", "u1"), "users_analytics_clicks/data/2026-07-28/u1");
    }
}
