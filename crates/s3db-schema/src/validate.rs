//! Per-attribute validation (spec §4.2 item 2).

use crate::attribute::{AttributeDef, AttributeType};
use crate::version::SchemaVersion;
use s3db_common::error::ValidationIssue;
use std::collections::BTreeMap;

/// Validate and fill defaults into a flattened (dotted-path) field map.
/// Returns the map with defaults applied on success, or every issue found
/// (not just the first) on failure — callers decide whether to surface
/// `ValidationError` or swallow it via `{throwOnError: false}` (spec §4.3).
pub fn validate(
    version: &SchemaVersion,
    mut fields: BTreeMap<String, serde_json::Value>,
) -> Result<BTreeMap<String, serde_json::Value>, Vec<ValidationIssue>> {
    let mut issues = Vec::new();

    for attr in &version.attributes {
        match fields.get(&attr.path) {
            None => {
                if let Some(default) = &attr.default {
                    fields.insert(attr.path.clone(), default.clone());
                } else if attr.required {
                    issues.push(ValidationIssue { path: attr.path.clone(), message: "required field is missing".into() });
                }
            }
            Some(value) => {
                if let Err(msg) = check_type(attr.attr_type, value) {
                    issues.push(ValidationIssue { path: attr.path.clone(), message: msg });
                    continue;
                }
                check_validators(attr, value, &mut issues);
            }
        }
    }

    if issues.is_empty() {
        Ok(fields)
    } else {
        Err(issues)
    }
}

fn check_type(attr_type: AttributeType, value: &serde_json::Value) -> Result<(), String> {
    use serde_json::Value;
    let ok = match attr_type {
        AttributeType::String | AttributeType::Secret => value.is_string(),
        AttributeType::Number => value.is_number(),
        AttributeType::Boolean => value.is_boolean(),
        AttributeType::Object => value.is_object(),
        AttributeType::Array => value.is_array(),
        AttributeType::Date => value.is_string() && value.as_str().is_some_and(|s| chrono::DateTime::parse_from_rfc3339(s).is_ok()),
        AttributeType::Url => value.is_string() && value.as_str().is_some_and(is_plausible_url),
        AttributeType::Email => value.is_string() && value.as_str().is_some_and(is_plausible_email),
    };
    if ok {
        Ok(())
    } else {
        Err(format!("expected {attr_type:?}, got {}", describe(value)))
    }
}

fn describe(value: &serde_json::Value) -> &'static str {
    match value {
        serde_json::Value::Null => "null",
        serde_json::Value::Bool(_) => "boolean",
        serde_json::Value::Number(_) => "number",
        serde_json::Value::String(_) => "string",
        serde_json::Value::Array(_) => "array",
        serde_json::Value::Object(_) => "object",
    }
}

fn is_plausible_url(s: &str) -> bool {
    s.contains("://") && !s.starts_with("://")
}

fn is_plausible_email(s: &str) -> bool {
    let Some((local, domain)) = s.split_once('@') else { return false };
    !local.is_empty() && domain.contains('.') && !domain.starts_with('.') && !domain.ends_with('.')
}

fn check_validators(attr: &AttributeDef, value: &serde_json::Value, issues: &mut Vec<ValidationIssue>) {
    let v = &attr.validators;
    if let Some(n) = value.as_f64() {
        if let Some(min) = v.min {
            if n < min {
                issues.push(ValidationIssue { path: attr.path.clone(), message: format!("{n} is below minimum {min}") });
            }
        }
        if let Some(max) = v.max {
            if n > max {
                issues.push(ValidationIssue { path: attr.path.clone(), message: format!("{n} is above maximum {max}") });
            }
        }
    }
    if let Some(s) = value.as_str() {
        if let Some(min_len) = v.min_length {
            if s.len() < min_len {
                issues.push(ValidationIssue {
                    path: attr.path.clone(),
                    message: format!("length {} is below minimum length {min_len}", s.len()),
                });
            }
        }
        if let Some(pattern) = &v.pattern {
            if !glob_like_match(pattern, s) {
                issues.push(ValidationIssue { path: attr.path.clone(), message: format!("{s:?} does not match pattern {pattern:?}") });
            }
        }
        if let Some(allowed) = &v.allowed_values {
            if !allowed.iter().any(|a| a == s) {
                issues.push(ValidationIssue { path: attr.path.clone(), message: format!("{s:?} is not one of {allowed:?}") });
            }
        }
    }
}

/// A minimal `*`-wildcard matcher, used instead of pulling in a full
/// regex engine for the handful of simple shape checks this validator
/// needs (e.g. `"INV-*"`).
fn glob_like_match(pattern: &str, input: &str) -> bool {
    match pattern.split_once('*') {
        None => pattern == input,
        Some((prefix, suffix)) => input.starts_with(prefix) && input.ends_with(suffix) && input.len() >= prefix.len() + suffix.len(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attribute::Validators;
    use crate::version::SchemaVersion;
    use proptest::prelude::*;
    use serde_json::json;

    fn version() -> SchemaVersion {
        SchemaVersion::new(
            "v1",
            vec![
                AttributeDef::new("name", AttributeType::String).required(),
                AttributeDef::new("age", AttributeType::Number).with_validators(Validators { min: Some(0.0), max: Some(150.0), ..Default::default() }),
                AttributeDef::new("role", AttributeType::String).with_default(json!("member")),
            ],
        )
    }

    #[test]
    fn missing_required_field_fails() {
        let fields = BTreeMap::new();
        let result = validate(&version(), fields);
        assert!(result.is_err());
    }

    #[test]
    fn default_is_applied() {
        let mut fields = BTreeMap::new();
        fields.insert("name".to_string(), json!("Ada"));
        let result = validate(&version(), fields).unwrap();
        assert_eq!(result.get("role"), Some(&json!("member")));
    }

    #[test]
    fn out_of_range_number_fails() {
        let mut fields = BTreeMap::new();
        fields.insert("name".to_string(), json!("Ada"));
        fields.insert("age".to_string(), json!(200));
        let result = validate(&version(), fields);
        assert!(result.is_err());
    }

    #[test]
    fn wrong_type_fails() {
        let mut fields = BTreeMap::new();
        fields.insert("name".to_string(), json!(42));
        let result = validate(&version(), fields);
        assert!(result.is_err());
    }

    proptest! {
        #[test]
        fn any_in_range_age_validates_and_passes_through(age in 0.0..150.0) {
            let mut fields = BTreeMap::new();
            fields.insert("name".to_string(), json!("Ada"));
            fields.insert("age".to_string(), json!(age));
            let result = validate(&version(), fields).unwrap();
            prop_assert_eq!(result.get("age"), Some(&json!(age)));
        }

        #[test]
        fn age_outside_range_always_fails(age in prop_oneof![-1000.0..-0.001, 150.001..1000.0]) {
            let mut fields = BTreeMap::new();
            fields.insert("name".to_string(), json!("Ada"));
            fields.insert("age".to_string(), json!(age));
            prop_assert!(validate(&version(), fields).is_err());
        }
    }
}
