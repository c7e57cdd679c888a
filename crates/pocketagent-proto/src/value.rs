//! Dynamic JSON value wrapper for payload fields with no fixed schema.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A JSON value whose shape is decided by the server at runtime (tool call
/// inputs, progress payloads). Integer and floating-point literals are kept
/// lossless; typed accessors pull out the common shapes and
/// [`DynamicValue::display_string`] falls back to canonical JSON when a
/// human-readable rendering is needed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DynamicValue(Value);

impl DynamicValue {
    #[must_use]
    pub fn new(value: Value) -> Self {
        Self(value)
    }

    #[must_use]
    pub fn null() -> Self {
        Self(Value::Null)
    }

    #[must_use]
    pub fn as_json(&self) -> &Value {
        &self.0
    }

    #[must_use]
    pub fn string_value(&self) -> Option<&str> {
        self.0.as_str()
    }

    /// Integer view. A float with zero fractional part is still an integer on
    /// the wire as far as callers care, so `2.0` resolves to `2`.
    #[must_use]
    pub fn int_value(&self) -> Option<i64> {
        if let Some(n) = self.0.as_i64() {
            return Some(n);
        }
        match self.0.as_f64() {
            Some(f) if f.fract() == 0.0 && f >= i64::MIN as f64 && f <= i64::MAX as f64 => {
                Some(f as i64)
            }
            _ => None,
        }
    }

    #[must_use]
    pub fn double_value(&self) -> Option<f64> {
        self.0.as_f64()
    }

    #[must_use]
    pub fn bool_value(&self) -> Option<bool> {
        self.0.as_bool()
    }

    #[must_use]
    pub fn array_value(&self) -> Option<Vec<DynamicValue>> {
        self.0
            .as_array()
            .map(|items| items.iter().cloned().map(DynamicValue).collect())
    }

    #[must_use]
    pub fn dict_value(&self) -> Option<Vec<(String, DynamicValue)>> {
        self.0.as_object().map(|map| {
            map.iter()
                .map(|(key, value)| (key.clone(), DynamicValue(value.clone())))
                .collect()
        })
    }

    /// Field lookup on object values.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<DynamicValue> {
        self.0.get(key).cloned().map(DynamicValue)
    }

    #[must_use]
    pub fn is_null(&self) -> bool {
        self.0.is_null()
    }

    /// Generic string rendering: strings come back as-is, everything else as
    /// its canonical JSON serialization. Used e.g. to render a permission
    /// request's command argument for display.
    #[must_use]
    pub fn display_string(&self) -> String {
        match &self.0 {
            Value::String(s) => s.clone(),
            other => serde_json::to_string(other).unwrap_or_else(|_| String::from("null")),
        }
    }
}

impl From<Value> for DynamicValue {
    fn from(value: Value) -> Self {
        Self(value)
    }
}

impl From<DynamicValue> for Value {
    fn from(value: DynamicValue) -> Self {
        value.0
    }
}
