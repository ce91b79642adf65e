use std::collections::HashMap;

use itertools::Itertools;
use log::warn;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::key::Key;

/// Attributes supplied alongside a key for an evaluation.
pub type Attributes = HashMap<String, AttributeValue>;

/// An attribute value represents possible values that can be supplied as evaluation attributes.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
#[serde(untagged)]
pub enum AttributeValue {
    /// Stores a string value.
    String(String),
    /// Stores an array of attribute values.
    Array(Vec<AttributeValue>),
    /// Stores a number.
    Number(f64),
    /// Stores a boolean.
    Bool(bool),
    /// Stores a map of attribute values.
    Object(HashMap<String, AttributeValue>),
    /// Stores a null value.
    Null,
}

impl From<&str> for AttributeValue {
    fn from(s: &str) -> AttributeValue {
        AttributeValue::String(s.to_owned())
    }
}

impl From<String> for AttributeValue {
    fn from(s: String) -> AttributeValue {
        AttributeValue::String(s)
    }
}

impl From<bool> for AttributeValue {
    fn from(b: bool) -> AttributeValue {
        AttributeValue::Bool(b)
    }
}

impl From<i64> for AttributeValue {
    fn from(i: i64) -> Self {
        AttributeValue::Number(i as f64)
    }
}

impl From<f64> for AttributeValue {
    fn from(f: f64) -> Self {
        AttributeValue::Number(f)
    }
}

impl<T> From<Vec<T>> for AttributeValue
where
    AttributeValue: From<T>,
{
    fn from(v: Vec<T>) -> AttributeValue {
        v.into_iter().collect()
    }
}

impl<T> FromIterator<T> for AttributeValue
where
    AttributeValue: From<T>,
{
    fn from_iter<I: IntoIterator<Item = T>>(iter: I) -> Self {
        AttributeValue::Array(iter.into_iter().map(AttributeValue::from).collect())
    }
}

impl From<&Value> for AttributeValue {
    fn from(v: &Value) -> Self {
        match v {
            Value::Null => AttributeValue::Null,
            Value::Bool(b) => AttributeValue::Bool(*b),
            Value::Number(n) => match n.as_f64() {
                Some(float) => AttributeValue::Number(float),
                None => {
                    warn!("could not interpret '{:?}' as f64", n);
                    AttributeValue::String(n.to_string())
                }
            },
            Value::String(str) => AttributeValue::String(str.clone()),
            Value::Array(arr) => {
                AttributeValue::Array(arr.iter().map(AttributeValue::from).collect())
            }
            Value::Object(obj) => {
                AttributeValue::Object(obj.iter().map(|(k, v)| (k.into(), v.into())).collect())
            }
        }
    }
}

impl AttributeValue {
    /// Returns None unless self is a String. It will not convert.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            AttributeValue::String(s) => Some(s),
            _ => None,
        }
    }

    /// Coerce into a finite number. Numeric strings are parsed; anything else, including
    /// empty strings, NaN and infinities, yields None.
    pub fn to_number(&self) -> Option<f64> {
        let number = match self {
            AttributeValue::Number(f) => *f,
            AttributeValue::String(s) => s.trim().parse::<f64>().ok()?,
            _ => return None,
        };
        number.is_finite().then_some(number)
    }

    /// Coerce into a non-empty string.
    ///
    /// An object shaped like a [Key] yields its `matchingKey`; other objects and null yield None.
    /// Arrays render as their comma-joined elements. Empty results yield None.
    pub fn to_non_empty_string(&self) -> Option<String> {
        let s = match self {
            AttributeValue::Object(_) => return self.matching_key().map(String::from),
            AttributeValue::Null => return None,
            value => value.render(),
        };
        (!s.is_empty()).then_some(s)
    }

    /// The key an object shaped like `{"matchingKey": ..., "bucketingKey": ...}` stands for.
    pub fn to_key(&self) -> Option<Key> {
        let AttributeValue::Object(fields) = self else {
            return None;
        };
        let matching_key = self.matching_key()?;
        Some(
            match fields.get("bucketingKey").and_then(AttributeValue::as_str) {
                Some(bucketing_key) if !bucketing_key.is_empty() => {
                    Key::with_bucketing_key(matching_key, bucketing_key)
                }
                _ => Key::new(matching_key),
            },
        )
    }

    fn matching_key(&self) -> Option<&str> {
        match self {
            AttributeValue::Object(fields) => fields
                .get("matchingKey")
                .and_then(AttributeValue::as_str)
                .filter(|key| !key.is_empty()),
            _ => None,
        }
    }

    /// Interpret the value as a set of strings: every element is stringified and duplicates are
    /// dropped, keeping first occurrences. Non-arrays and empty arrays yield None.
    pub fn to_string_set(&self) -> Option<Vec<String>> {
        match self {
            AttributeValue::Array(values) if !values.is_empty() => Some(
                values
                    .iter()
                    .map(AttributeValue::render)
                    .unique()
                    .collect(),
            ),
            _ => None,
        }
    }

    /// Accepts booleans and the case-insensitive strings "true" and "false".
    pub fn to_bool(&self) -> Option<bool> {
        match self {
            AttributeValue::Bool(b) => Some(*b),
            AttributeValue::String(s) if s.eq_ignore_ascii_case("true") => Some(true),
            AttributeValue::String(s) if s.eq_ignore_ascii_case("false") => Some(false),
            _ => None,
        }
    }

    // The string form shared with the other SDKs: nulls inside arrays render empty, nested
    // objects have no useful form.
    fn render(&self) -> String {
        match self {
            AttributeValue::String(s) => s.clone(),
            AttributeValue::Number(f) => number_to_string(*f),
            AttributeValue::Bool(b) => b.to_string(),
            AttributeValue::Null => "null".to_string(),
            AttributeValue::Array(values) => values
                .iter()
                .map(|value| match value {
                    AttributeValue::Null => String::new(),
                    value => value.render(),
                })
                .join(","),
            AttributeValue::Object(_) => "[object Object]".to_string(),
        }
    }
}

// Shortest round-trip digits, switching to exponent notation outside [1e-6, 1e21) the way the
// other SDKs print numbers.
fn number_to_string(f: f64) -> String {
    if f == 0.0 {
        return "0".to_string();
    }
    if f.is_nan() {
        return "NaN".to_string();
    }
    if f.is_infinite() {
        return if f > 0.0 { "Infinity" } else { "-Infinity" }.to_string();
    }
    let magnitude = f.abs();
    if !(1e-6..1e21).contains(&magnitude) {
        let formatted = format!("{:e}", f);
        return match formatted.split_once('e') {
            Some((mantissa, exponent)) if !exponent.starts_with('-') => {
                format!("{}e+{}", mantissa, exponent)
            }
            _ => formatted,
        };
    }
    f.to_string()
}
