//! Attribute definitions (spec §4.2 item 2, §3 "Schema Version").

use serde::{Deserialize, Serialize};

/// The attribute type vocabulary from spec §4.2.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AttributeType {
    String,
    Number,
    Boolean,
    Date,
    /// Encrypted at rest with AES-GCM (spec §4.2 item 3).
    Secret,
    Url,
    Email,
    Object,
    Array,
}

/// Per-field validation rules (spec §4.2 item 2: "min/max/pattern/enum/minlength").
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Validators {
    pub min: Option<f64>,
    pub max: Option<f64>,
    pub pattern: Option<String>,
    #[serde(rename = "enum", skip_serializing_if = "Option::is_none")]
    pub allowed_values: Option<Vec<String>>,
    pub min_length: Option<usize>,
}

/// One attribute's declaration within a schema version.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AttributeDef {
    /// Dotted path, e.g. `"address.city"`.
    pub path: String,
    #[serde(rename = "type")]
    pub attr_type: AttributeType,
    pub required: bool,
    pub default: Option<serde_json::Value>,
    #[serde(default)]
    pub validators: Validators,
    /// Drop priority used by the `truncate-data` behavior (spec §9 Open
    /// Question (a)): lower values are dropped first. Ties broken by
    /// declaration order.
    #[serde(default)]
    pub priority: u32,
}

impl AttributeDef {
    pub fn new(path: impl Into<String>, attr_type: AttributeType) -> Self {
        Self {
            path: path.into(),
            attr_type,
            required: false,
            default: None,
            validators: Validators::default(),
            priority: 0,
        }
    }

    #[must_use]
    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    #[must_use]
    pub fn with_default(mut self, value: serde_json::Value) -> Self {
        self.default = Some(value);
        self
    }

    #[must_use]
    pub fn with_priority(mut self, priority: u32) -> Self {
        self.priority = priority;
        self
    }

    #[must_use]
    pub fn with_validators(mut self, validators: Validators) -> Self {
        self.validators = validators;
        self
    }
}
