use log::{debug, warn};

use crate::attribute_value::{AttributeValue, Attributes};
use crate::key::Key;
use crate::matcher::{DataType, MatcherDto, MatcherType};
use crate::util::{truncate_to_day, truncate_to_minute};

/// A runtime value coerced into the type a matcher expects.
#[derive(Clone, Debug, PartialEq)]
pub enum SanitizedValue {
    Number(f64),
    String(String),
    Set(Vec<String>),
    Boolean(bool),
    /// Passed through for matchers that evaluate other definitions for the same key.
    Key(Key),
}

/// Extract the value a matcher compares against and coerce it to the matcher's data type.
///
/// None means the matcher cannot evaluate: the attribute is missing, or its value does not fit
/// the data type. Callers treat that as a non-match before applying negation.
pub fn sanitize(
    key: &Key,
    matcher: &MatcherDto,
    attributes: Option<&Attributes>,
) -> Option<SanitizedValue> {
    let sanitized = match &matcher.attribute {
        None => sanitize_key(key, matcher.data_type),
        Some(attribute) => {
            let value = attribute_value(attribute, attributes)?;
            sanitize_attribute(value, matcher.data_type)
        }
    };

    let sanitized = match (sanitized, matcher.data_type) {
        (Some(SanitizedValue::Number(millis)), DataType::Datetime) => {
            Some(SanitizedValue::Number(truncate_datetime(matcher.matcher_type, millis)))
        }
        (sanitized, _) => sanitized,
    };

    debug!(
        "[sanitize] {} matcher attribute {:?} sanitized to {:?}",
        matcher.matcher_type, matcher.attribute, sanitized
    );
    sanitized
}

fn attribute_value<'a>(
    attribute: &str,
    attributes: Option<&'a Attributes>,
) -> Option<&'a AttributeValue> {
    let Some(attributes) = attributes else {
        warn!(
            "defined attribute [{}], no attributes received",
            attribute
        );
        return None;
    };
    let value = attributes.get(attribute);
    if value.is_none() {
        warn!("value for attribute [{}] not found", attribute);
    }
    value
}

fn sanitize_key(key: &Key, data_type: DataType) -> Option<SanitizedValue> {
    match data_type {
        DataType::NotSpecified => Some(SanitizedValue::Key(key.clone())),
        _ => sanitize_attribute(&AttributeValue::from(key.matching_key()), data_type),
    }
}

fn sanitize_attribute(value: &AttributeValue, data_type: DataType) -> Option<SanitizedValue> {
    match data_type {
        DataType::Number | DataType::Datetime => value.to_number().map(SanitizedValue::Number),
        DataType::String => value.to_non_empty_string().map(SanitizedValue::String),
        DataType::Set => value.to_string_set().map(SanitizedValue::Set),
        DataType::Boolean => value.to_bool().map(SanitizedValue::Boolean),
        // an attribute standing in for the key of a dependent evaluation
        DataType::NotSpecified => value
            .to_key()
            .or_else(|| value.to_non_empty_string().map(Key::new))
            .map(SanitizedValue::Key),
    }
}

// Runtime timestamps get the same truncation as the matcher's static value.
fn truncate_datetime(matcher_type: MatcherType, millis: f64) -> f64 {
    match matcher_type {
        MatcherType::EqualTo => truncate_to_day(millis),
        MatcherType::GreaterThanOrEqualTo
        | MatcherType::LessThanOrEqualTo
        | MatcherType::Between => truncate_to_minute(millis),
        _ => millis,
    }
}
