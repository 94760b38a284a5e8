//! Recursive schema descriptors.
//!
//! A [`Schema`] serializes to (a subset of) JSON Schema, so the same value
//! describes tool parameters to the model, documents node inputs/outputs and
//! validates candidate pipelines.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Schema {
    Object {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        description: Option<String>,
        #[serde(default)]
        properties: BTreeMap<String, Schema>,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        required: Vec<String>,
        /// Schema for keys not listed in `properties`; `None` allows anything.
        #[serde(
            default,
            rename = "additionalProperties",
            skip_serializing_if = "Option::is_none"
        )]
        additional: Option<Box<Schema>>,
    },
    Array {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        description: Option<String>,
        items: Box<Schema>,
    },
    String {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        description: Option<String>,
        #[serde(default, rename = "enum", skip_serializing_if = "Option::is_none")]
        allowed: Option<Vec<String>>,
    },
    Number {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        description: Option<String>,
    },
    Integer {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        description: Option<String>,
    },
    Boolean {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        description: Option<String>,
    },
    Null,
    /// Accepts any value. Serialized with an explicit `"type": "any"` tag so
    /// it round-trips; model-facing parameter schemas avoid it.
    Any {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        description: Option<String>,
    },
}

impl Schema {
    pub fn object() -> Self {
        Schema::Object {
            description: None,
            properties: BTreeMap::new(),
            required: Vec::new(),
            additional: None,
        }
    }

    pub fn string() -> Self {
        Schema::String {
            description: None,
            allowed: None,
        }
    }

    pub fn one_of(values: &[&str]) -> Self {
        Schema::String {
            description: None,
            allowed: Some(values.iter().map(|v| v.to_string()).collect()),
        }
    }

    pub fn number() -> Self {
        Schema::Number { description: None }
    }

    pub fn integer() -> Self {
        Schema::Integer { description: None }
    }

    pub fn boolean() -> Self {
        Schema::Boolean { description: None }
    }

    pub fn any() -> Self {
        Schema::Any { description: None }
    }

    pub fn array(items: Schema) -> Self {
        Schema::Array {
            description: None,
            items: Box::new(items),
        }
    }

    /// Map with uniform values.
    pub fn map_of(values: Schema) -> Self {
        Schema::Object {
            description: None,
            properties: BTreeMap::new(),
            required: Vec::new(),
            additional: Some(Box::new(values)),
        }
    }

    /// Add a property to an object schema. No-op on other variants.
    pub fn property(mut self, name: &str, schema: Schema, is_required: bool) -> Self {
        if let Schema::Object {
            properties,
            required,
            ..
        } = &mut self
        {
            properties.insert(name.to_string(), schema);
            if is_required {
                required.push(name.to_string());
            }
        }
        self
    }

    pub fn describe(mut self, text: &str) -> Self {
        match &mut self {
            Schema::Object { description, .. }
            | Schema::Array { description, .. }
            | Schema::String { description, .. }
            | Schema::Number { description }
            | Schema::Integer { description }
            | Schema::Boolean { description }
            | Schema::Any { description } => *description = Some(text.to_string()),
            Schema::Null => {}
        }
        self
    }

    /// JSON form of this schema.
    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }

    /// Validate `value`, returning every violation as `"<path>: <problem>"`.
    pub fn validate(&self, value: &Value) -> Vec<String> {
        let mut errors = Vec::new();
        self.check(value, "", &mut errors);
        errors
    }

    fn check(&self, value: &Value, path: &str, errors: &mut Vec<String>) {
        let here = if path.is_empty() { "/" } else { path };
        match self {
            Schema::Any { .. } => {}
            Schema::Null => {
                if !value.is_null() {
                    errors.push(format!("{}: expected null, got {}", here, kind(value)));
                }
            }
            Schema::Boolean { .. } => {
                if !value.is_boolean() {
                    errors.push(format!("{}: expected boolean, got {}", here, kind(value)));
                }
            }
            Schema::Number { .. } => {
                if !value.is_number() {
                    errors.push(format!("{}: expected number, got {}", here, kind(value)));
                }
            }
            Schema::Integer { .. } => {
                if !(value.is_i64() || value.is_u64()) {
                    errors.push(format!("{}: expected integer, got {}", here, kind(value)));
                }
            }
            Schema::String { allowed, .. } => match value.as_str() {
                None => errors.push(format!("{}: expected string, got {}", here, kind(value))),
                Some(s) => {
                    if let Some(allowed) = allowed {
                        if !allowed.iter().any(|a| a == s) {
                            errors.push(format!(
                                "{}: '{}' is not one of [{}]",
                                here,
                                s,
                                allowed.join(", ")
                            ));
                        }
                    }
                }
            },
            Schema::Array { items, .. } => match value.as_array() {
                None => errors.push(format!("{}: expected array, got {}", here, kind(value))),
                Some(values) => {
                    for (i, item) in values.iter().enumerate() {
                        items.check(item, &format!("{}/{}", path, i), errors);
                    }
                }
            },
            Schema::Object {
                properties,
                required,
                additional,
                ..
            } => {
                let Some(map) = value.as_object() else {
                    errors.push(format!("{}: expected object, got {}", here, kind(value)));
                    return;
                };
                for name in required {
                    if !map.contains_key(name) {
                        errors.push(format!("{}: missing required property '{}'", here, name));
                    }
                }
                for (key, item) in map {
                    let child = format!("{}/{}", path, key);
                    match (properties.get(key), additional) {
                        (Some(schema), _) => schema.check(item, &child, errors),
                        (None, Some(schema)) => schema.check(item, &child, errors),
                        (None, None) => {}
                    }
                }
            }
        }
    }
}

fn kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
