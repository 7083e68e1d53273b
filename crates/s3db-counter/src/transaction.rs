//! Transaction log record shape (spec §4.8 "a transaction
//! `{originalId, field, op, value, timestamp, applied:false}`").

use s3db_catalog::{PartitionDef, PartitionFieldType};
use s3db_schema::{AttributeDef, AttributeType};
use std::collections::BTreeMap;

/// How a transaction's `value` combines with the record's current field.
#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransactionOp {
    Add,
    Sub,
    Set,
}

impl TransactionOp {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Add => "add",
            Self::Sub => "sub",
            Self::Set => "set",
        }
    }

    /// Fold this transaction's value into a running total.
    #[must_use]
    pub fn apply(self, current: f64, value: f64) -> f64 {
        match self {
            Self::Add => current + value,
            Self::Sub => current - value,
            Self::Set => value,
        }
    }
}

pub(crate) fn transaction_attributes() -> Vec<AttributeDef> {
    vec![
        AttributeDef::new("originalId", AttributeType::String).required(),
        AttributeDef::new("field", AttributeType::String).required(),
        AttributeDef::new("op", AttributeType::String).required().with_validators(s3db_schema::Validators {
            allowed_values: Some(vec!["add".to_string(), "sub".to_string(), "set".to_string()]),
            ..Default::default()
        }),
        AttributeDef::new("value", AttributeType::Number).required(),
        AttributeDef::new("timestamp", AttributeType::Date).required(),
        AttributeDef::new("day", AttributeType::String).required(),
        AttributeDef::new("applied", AttributeType::Boolean).with_default(serde_json::json!(false)),
    ]
}

pub(crate) fn transaction_partitions() -> BTreeMap<&'static str, PartitionDef> {
    let mut defs = BTreeMap::new();
    let mut by_original = BTreeMap::new();
    by_original.insert("originalId".to_string(), PartitionFieldType::String);
    defs.insert("byOriginal", PartitionDef { fields: by_original });

    let mut by_day = BTreeMap::new();
    by_day.insert("day".to_string(), PartitionFieldType::String);
    defs.insert("byDay", PartitionDef { fields: by_day });
    defs
}

pub(crate) fn analytics_attributes() -> Vec<AttributeDef> {
    vec![
        AttributeDef::new("recordId", AttributeType::String).required(),
        AttributeDef::new("day", AttributeType::String).required(),
        AttributeDef::new("sum", AttributeType::Number).with_default(serde_json::json!(0)),
        AttributeDef::new("count", AttributeType::Number).with_default(serde_json::json!(0)),
    ]
}

pub(crate) fn analytics_partitions() -> BTreeMap<&'static str, PartitionDef> {
    let mut defs = BTreeMap::new();
    let mut by_day = BTreeMap::new();
    by_day.insert("day".to_string(), PartitionFieldType::String);
    defs.insert("byDay", PartitionDef { fields: by_day });

    let mut by_record = BTreeMap::new();
    by_record.insert("recordId".to_string(), PartitionFieldType::String);
    defs.insert("byRecord", PartitionDef { fields: by_record });
    defs
}
