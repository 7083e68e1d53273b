//! The per-field counter engine (spec §4.8).

use crate::config::ConsolidationMode;
use crate::transaction::{analytics_attributes, analytics_partitions, transaction_attributes, transaction_partitions, TransactionOp};
use chrono::{DateTime, NaiveDate, Utc};
use s3db_catalog::Catalog;
use s3db_codec::Behavior;
use s3db_common::config::{CodecConfig, ResourceDefaults};
use s3db_common::{Error, EventBus, ResourceName};
use s3db_resource::{IdGeneratorConfig, Resource};
use serde_json::{json, Value};
use std::sync::Arc;

/// One day's analytics cohort for a record (`getLastNDays`/`getTopRecords`).
#[derive(Clone, Debug, PartialEq, serde::Serialize)]
pub struct DailyCohort {
    pub day: String,
    pub sum: f64,
    pub count: u64,
}

/// A record's all-time aggregated sum (`getTopRecords`).
#[derive(Clone, Debug, PartialEq, serde::Serialize)]
pub struct TopRecord {
    pub record_id: String,
    pub sum: f64,
}

/// Wraps a parent [`Resource`] with a per-field transaction log and
/// optional analytics rollup (spec §4.8).
pub struct CounterEngine {
    parent: Arc<Resource>,
    field: String,
    transactions: Arc<Resource>,
    analytics: Option<Arc<Resource>>,
    mode: ConsolidationMode,
}

impl CounterEngine {
    /// Attach a counter engine to `field` on an already-open `parent`
    /// resource, creating the `<parent>_transactions_<field>` sibling
    /// (and, if `with_analytics`, `<parent>_analytics_<field>`) resources.
    #[allow(clippy::too_many_arguments)]
    pub async fn attach(
        parent: Arc<Resource>,
        field: &str,
        blob: Arc<dyn s3db_blob::BlobClient>,
        catalog: Arc<Catalog>,
        events: Arc<EventBus>,
        codec: &CodecConfig,
        defaults: &ResourceDefaults,
        id_gen_config: IdGeneratorConfig,
        mode: ConsolidationMode,
        with_analytics: bool,
    ) -> Result<Arc<Self>, Error> {
        let parent_name = ResourceName::new(parent.name()).map_err(|e| Error::configuration(e.to_string()))?;

        let txn_name = parent_name.transactions_sibling(field);
        let transactions = Resource::open(
            txn_name.as_str(),
            transaction_attributes(),
            Arc::clone(&blob),
            Arc::clone(&catalog),
            Arc::clone(&events),
            codec,
            defaults,
            Behavior::UserManaged,
            id_gen_config.clone(),
        )
        .await?;
        for (name, def) in transaction_partitions() {
            transactions.set_partition(name, def).await?;
        }

        let analytics = if with_analytics {
            let an_name = parent_name.analytics_sibling(field);
            let analytics = Resource::open(
                an_name.as_str(),
                analytics_attributes(),
                blob,
                catalog,
                events,
                codec,
                defaults,
                Behavior::UserManaged,
                id_gen_config,
            )
            .await?;
            for (name, def) in analytics_partitions() {
                analytics.set_partition(name, def).await?;
            }
            Some(analytics)
        } else {
            None
        };

        Ok(Arc::new(Self { parent, field: field.to_string(), transactions, analytics, mode }))
    }

    async fn record_transaction(&self, id: &str, op: TransactionOp, value: f64) -> Result<Value, Error> {
        let now = Utc::now();
        let record = self
            .transactions
            .insert(json!({
                "originalId": id,
                "field": self.field,
                "op": op.as_str(),
                "value": value,
                "timestamp": now.to_rfc3339(),
                "day": now.format("%Y-%m-%d").to_string(),
            }))
            .await?;
        if self.mode == ConsolidationMode::Sync {
            self.consolidate_one(id).await?;
        }
        Ok(record)
    }

    pub async fn add(&self, id: &str, delta: f64) -> Result<Value, Error> {
        self.record_transaction(id, TransactionOp::Add, delta).await
    }

    pub async fn sub(&self, id: &str, delta: f64) -> Result<Value, Error> {
        self.record_transaction(id, TransactionOp::Sub, delta).await
    }

    pub async fn set(&self, id: &str, value: f64) -> Result<Value, Error> {
        self.record_transaction(id, TransactionOp::Set, value).await
    }

    /// Consolidate every unapplied transaction for one record: fold them
    /// into the field in timestamp order, write the record once, bump
    /// the analytics cohort, then mark every folded transaction applied
    /// (spec §4.8: "always mark applied *after* the record write
    /// succeeds").
    pub async fn consolidate_one(&self, id: &str) -> Result<usize, Error> {
        let mut pending: Vec<Value> = self
            .transactions
            .list_partition("byOriginal", &[("originalId".to_string(), id.to_string())], None)
            .await?
            .into_iter()
            .filter(|t| !t.get("applied").and_then(Value::as_bool).unwrap_or(false))
            .collect();
        if pending.is_empty() {
            return Ok(0);
        }
        pending.sort_by(|a, b| {
            let ta = a.get("timestamp").and_then(Value::as_str).unwrap_or_default();
            let tb = b.get("timestamp").and_then(Value::as_str).unwrap_or_default();
            ta.cmp(tb).then_with(|| {
                let ia = a.get("id").and_then(Value::as_str).unwrap_or_default();
                let ib = b.get("id").and_then(Value::as_str).unwrap_or_default();
                ia.cmp(ib)
            })
        });

        let record = self.parent.get_or_throw(id).await?;
        let mut current = record.get(&self.field).and_then(Value::as_f64).unwrap_or(0.0);

        let mut by_day: std::collections::BTreeMap<String, (f64, u64)> = std::collections::BTreeMap::new();
        let mut applied_ids = Vec::with_capacity(pending.len());
        for txn in &pending {
            let Some(txn_id) = txn.get("id").and_then(Value::as_str).map(str::to_string) else { continue };
            let op = match txn.get("op").and_then(Value::as_str) {
                Some("add") => TransactionOp::Add,
                Some("sub") => TransactionOp::Sub,
                Some("set") => TransactionOp::Set,
                _ => continue,
            };
            let value = txn.get("value").and_then(Value::as_f64).unwrap_or(0.0);
            let next = op.apply(current, value);
            let delta = next - current;
            current = next;

            let day = txn.get("day").and_then(Value::as_str).unwrap_or_default().to_string();
            let entry = by_day.entry(day).or_insert((0.0, 0));
            entry.0 += delta;
            entry.1 += 1;
            applied_ids.push(txn_id);
        }

        self.parent.update(id, json!({ self.field.clone(): current })).await?;

        if let Some(analytics) = &self.analytics {
            for (day, (sum_delta, count_delta)) in by_day {
                bump_cohort(analytics, &day, id, sum_delta, count_delta).await?;
            }
        }

        for txn_id in &applied_ids {
            self.transactions.update(txn_id, json!({"applied": true})).await?;
        }

        Ok(applied_ids.len())
    }

    /// Consolidate every record with at least one unapplied transaction.
    pub async fn consolidate_all(&self) -> Result<usize, Error> {
        let outstanding = self.transactions.list(None, 0).await?;
        let mut seen = std::collections::BTreeSet::new();
        let mut total = 0;
        for txn in outstanding {
            if txn.get("applied").and_then(Value::as_bool).unwrap_or(false) {
                continue;
            }
            let Some(original_id) = txn.get("originalId").and_then(Value::as_str).map(str::to_string) else { continue };
            if !seen.insert(original_id.clone()) {
                continue;
            }
            total += self.consolidate_one(&original_id).await?;
        }
        Ok(total)
    }

    /// `getLastNDays(field, N, {fillGaps})`: the cohort range ending
    /// today, zero-filled when `fill_gaps` and a day has no rollup.
    pub async fn get_last_n_days(&self, record_id: &str, n: u32, fill_gaps: bool) -> Result<Vec<DailyCohort>, Error> {
        let Some(analytics) = &self.analytics else {
            return Err(Error::configuration("counter has no analytics sibling attached"));
        };
        let rows = analytics.list_partition("byRecord", &[("recordId".to_string(), record_id.to_string())], None).await?;
        let mut by_day: std::collections::HashMap<String, DailyCohort> = std::collections::HashMap::new();
        for row in rows {
            let Some(day) = row.get("day").and_then(Value::as_str).map(str::to_string) else { continue };
            let sum = row.get("sum").and_then(Value::as_f64).unwrap_or(0.0);
            let count = row.get("count").and_then(Value::as_f64).unwrap_or(0.0) as u64;
            by_day.insert(day.clone(), DailyCohort { day, sum, count });
        }

        let today = Utc::now().date_naive();
        let mut series = Vec::with_capacity(n as usize);
        for offset in (0..n).rev() {
            let day = today - chrono::Duration::days(i64::from(offset));
            let key = day.format("%Y-%m-%d").to_string();
            match by_day.remove(&key) {
                Some(cohort) => series.push(cohort),
                None if fill_gaps => series.push(DailyCohort { day: key, sum: 0.0, count: 0 }),
                None => {}
            }
        }
        Ok(series)
    }

    /// `getTopRecords(resource, field, {limit})`: records ranked by their
    /// all-time analytics sum, descending.
    pub async fn get_top_records(&self, limit: usize) -> Result<Vec<TopRecord>, Error> {
        let Some(analytics) = &self.analytics else {
            return Err(Error::configuration("counter has no analytics sibling attached"));
        };
        let rows = analytics.list(None, 0).await?;
        let mut totals: std::collections::HashMap<String, f64> = std::collections::HashMap::new();
        for row in rows {
            let Some(record_id) = row.get("recordId").and_then(Value::as_str) else { continue };
            let sum = row.get("sum").and_then(Value::as_f64).unwrap_or(0.0);
            *totals.entry(record_id.to_string()).or_insert(0.0) += sum;
        }
        let mut ranked: Vec<TopRecord> = totals.into_iter().map(|(record_id, sum)| TopRecord { record_id, sum }).collect();
        ranked.sort_by(|a, b| b.sum.partial_cmp(&a.sum).unwrap_or(std::cmp::Ordering::Equal));
        ranked.truncate(limit);
        Ok(ranked)
    }
}

async fn bump_cohort(analytics: &Arc<Resource>, day: &str, record_id: &str, sum_delta: f64, count_delta: u64) -> Result<(), Error> {
    let cohort_id = format!("{day}:{record_id}");
    match analytics.get_or_null(&cohort_id).await? {
        Some(existing) => {
            let sum = existing.get("sum").and_then(Value::as_f64).unwrap_or(0.0) + sum_delta;
            let count = existing.get("count").and_then(Value::as_f64).unwrap_or(0.0) as u64 + count_delta;
            analytics.update(&cohort_id, json!({"sum": sum, "count": count})).await?;
        }
        None => {
            analytics
                .upsert(
                    &cohort_id,
                    json!({
                        "recordId": record_id,
                        "day": day,
                        "sum": sum_delta,
                        "count": count_delta,
                    }),
                )
                .await?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use s3db_blob::MemoryBlobClient;
    use s3db_schema::{AttributeDef, AttributeType};

    async fn open_parent(blob: Arc<dyn s3db_blob::BlobClient>, catalog: Arc<Catalog>, events: Arc<EventBus>) -> Arc<Resource> {
        Resource::open(
            "users",
            vec![AttributeDef::new("clicks", AttributeType::Number).with_default(json!(0))],
            blob,
            catalog,
            events,
            &CodecConfig::default(),
            &ResourceDefaults::default(),
            Behavior::UserManaged,
            IdGeneratorConfig::default(),
        )
        .await
        .unwrap()
    }

    #[tokio::test]
    async fn sync_consolidation_applies_immediately() {
        let blob: Arc<dyn s3db_blob::BlobClient> = Arc::new(MemoryBlobClient::new());
        let events = Arc::new(EventBus::default());
        let catalog = Arc::new(Catalog::connect(Arc::clone(&blob), Arc::clone(&events)).await.unwrap());
        let parent = open_parent(Arc::clone(&blob), Arc::clone(&catalog), Arc::clone(&events)).await;
        parent.upsert("u1", json!({"clicks": 0})).await.unwrap();

        let engine = CounterEngine::attach(
            Arc::clone(&parent),
            "clicks",
            blob,
            catalog,
            events,
            &CodecConfig::default(),
            &ResourceDefaults::default(),
            IdGeneratorConfig::default(),
            ConsolidationMode::Sync,
            true,
        )
        .await
        .unwrap();

        for _ in 0..5 {
            engine.add("u1", 1.0).await.unwrap();
        }
        engine.sub("u1", 2.0).await.unwrap();

        let record = parent.get_or_throw("u1").await.unwrap();
        assert_eq!(record["clicks"].as_f64(), Some(3.0));

        let txns = engine.transactions.list(None, 0).await.unwrap();
        assert_eq!(txns.len(), 6);
        assert!(txns.iter().all(|t| t["applied"] == json!(true)));
    }

    #[tokio::test]
    async fn async_consolidation_batches_until_consolidate_all() {
        let blob: Arc<dyn s3db_blob::BlobClient> = Arc::new(MemoryBlobClient::new());
        let events = Arc::new(EventBus::default());
        let catalog = Arc::new(Catalog::connect(Arc::clone(&blob), Arc::clone(&events)).await.unwrap());
        let parent = open_parent(Arc::clone(&blob), Arc::clone(&catalog), Arc::clone(&events)).await;
        parent.upsert("u1", json!({"clicks": 0})).await.unwrap();

        let engine = CounterEngine::attach(
            Arc::clone(&parent),
            "clicks",
            blob,
            catalog,
            events,
            &CodecConfig::default(),
            &ResourceDefaults::default(),
            IdGeneratorConfig::default(),
            ConsolidationMode::Async,
            false,
        )
        .await
        .unwrap();

        engine.add("u1", 4.0).await.unwrap();
        engine.add("u1", 1.0).await.unwrap();
        assert_eq!(parent.get_or_throw("u1").await.unwrap()["clicks"].as_f64(), Some(0.0));

        let applied = engine.consolidate_all().await.unwrap();
        assert_eq!(applied, 2);
        assert_eq!(parent.get_or_throw("u1").await.unwrap()["clicks"].as_f64(), Some(5.0));

        // Replaying consolidation must not double-apply.
        let replay = engine.consolidate_all().await.unwrap();
        assert_eq!(replay, 0);
        assert_eq!(parent.get_or_throw("u1").await.unwrap()["clicks"].as_f64(), Some(5.0));
    }
}
