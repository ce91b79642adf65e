use std::str::FromStr;

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};
use thiserror::Error;

use crate::util::{truncate_to_day, truncate_to_minute};

/// A matcher as it appears in a condition's matcher group on the wire.
///
/// Exactly one of the `*_matcher_data` fields is expected to be populated, depending on
/// `matcher_type`. [MatcherDto::try_from] normalizes this shape.
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MatcherDefinition {
    pub matcher_type: String,
    #[serde(default)]
    pub negate: bool,
    pub key_selector: Option<KeySelector>,
    pub user_defined_segment_matcher_data: Option<SegmentMatcherData>,
    pub user_defined_large_segment_matcher_data: Option<LargeSegmentMatcherData>,
    pub whitelist_matcher_data: Option<WhitelistMatcherData>,
    pub unary_numeric_matcher_data: Option<UnaryNumericMatcherData>,
    pub between_matcher_data: Option<BetweenMatcherData>,
    pub dependency_matcher_data: Option<DependencyMatcherData>,
    pub boolean_matcher_data: Option<bool>,
    pub string_matcher_data: Option<String>,
    pub between_string_matcher_data: Option<BetweenStringMatcherData>,
}

#[derive(Clone, Debug, Default, Deserialize, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct KeySelector {
    pub traffic_type: Option<String>,
    pub attribute: Option<String>,
}

#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SegmentMatcherData {
    pub segment_name: String,
}

#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LargeSegmentMatcherData {
    pub large_segment_name: String,
}

#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct WhitelistMatcherData {
    #[serde(default)]
    pub whitelist: Vec<String>,
}

/// Whether a numeric payload is a plain number or a UNIX epoch millisecond timestamp.
#[derive(Clone, Copy, Debug, Default, Deserialize, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NumericDataType {
    Datetime,
    #[default]
    #[serde(other)]
    Number,
}

#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UnaryNumericMatcherData {
    #[serde(default)]
    pub data_type: NumericDataType,
    pub value: f64,
}

#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BetweenMatcherData {
    #[serde(default)]
    pub data_type: NumericDataType,
    pub start: f64,
    pub end: f64,
}

#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct DependencyMatcherData {
    pub split: String,
    #[serde(default)]
    pub treatments: Vec<String>,
}

#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct BetweenStringMatcherData {
    pub start: String,
    pub end: String,
}

/// The kinds of matcher this engine understands. The discriminants are the stable numeric codes
/// shared with persisted flag definitions.
#[derive(Clone, Copy, Debug, Display, EnumString, Eq, Hash, PartialEq)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
#[repr(u8)]
pub enum MatcherType {
    AllKeys = 1,
    InSegment = 2,
    Whitelist = 3,
    EqualTo = 4,
    GreaterThanOrEqualTo = 5,
    LessThanOrEqualTo = 6,
    Between = 7,
    EqualToSet = 8,
    ContainsAnyOfSet = 9,
    ContainsAllOfSet = 10,
    PartOfSet = 11,
    EndsWith = 12,
    StartsWith = 13,
    ContainsString = 14,
    InSplitTreatment = 15,
    EqualToBoolean = 16,
    MatchesString = 17,
    EqualToSemver = 18,
    GreaterThanOrEqualToSemver = 19,
    LessThanOrEqualToSemver = 20,
    BetweenSemver = 21,
    InListSemver = 22,
    InLargeSegment = 23,
    InRuleBasedSegment = 24,
}

impl MatcherType {
    pub fn code(self) -> u8 {
        self as u8
    }
}

/// The type a runtime value is coerced into before a matcher sees it.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum DataType {
    Boolean,
    String,
    Number,
    Set,
    Datetime,
    NotSpecified,
}

/// The static, type-specific configuration of a normalized matcher.
#[derive(Clone, Debug, PartialEq)]
pub enum MatcherValue {
    None,
    SegmentName(String),
    Whitelist(Vec<String>),
    Number(f64),
    Between { start: f64, end: f64 },
    Boolean(bool),
    String(String),
    Dependency { split: String, treatments: Vec<String> },
    BetweenStrings { start: String, end: String },
}

/// A matcher normalized from its wire shape.
///
/// `attribute == None` means the matcher compares against the evaluation key itself.
#[derive(Clone, Debug, PartialEq)]
pub struct MatcherDto {
    pub matcher_type: MatcherType,
    pub value: MatcherValue,
    pub attribute: Option<String>,
    pub negate: bool,
    pub data_type: DataType,
}

#[derive(Clone, Debug, Error, PartialEq)]
pub enum TransformError {
    #[error("unknown matcher type `{0}`")]
    UnknownMatcherType(String),
    #[error("{matcher_type} matcher is missing `{field}`")]
    MissingData {
        matcher_type: MatcherType,
        field: &'static str,
    },
}

impl TryFrom<&MatcherDefinition> for MatcherDto {
    type Error = TransformError;

    fn try_from(definition: &MatcherDefinition) -> Result<Self, Self::Error> {
        let matcher_type = MatcherType::from_str(&definition.matcher_type)
            .map_err(|_| TransformError::UnknownMatcherType(definition.matcher_type.clone()))?;
        let missing = |field| TransformError::MissingData {
            matcher_type,
            field,
        };

        let segment_name = || {
            definition
                .user_defined_segment_matcher_data
                .as_ref()
                .map(|data| MatcherValue::SegmentName(data.segment_name.clone()))
                .ok_or_else(|| missing("userDefinedSegmentMatcherData"))
        };
        let whitelist = || {
            definition
                .whitelist_matcher_data
                .as_ref()
                .map(|data| MatcherValue::Whitelist(data.whitelist.clone()))
                .ok_or_else(|| missing("whitelistMatcherData"))
        };
        let unary_numeric = || {
            definition
                .unary_numeric_matcher_data
                .as_ref()
                .ok_or_else(|| missing("unaryNumericMatcherData"))
        };
        let string = || {
            definition
                .string_matcher_data
                .as_ref()
                .map(|s| MatcherValue::String(s.clone()))
                .ok_or_else(|| missing("stringMatcherData"))
        };

        let (value, data_type) = match matcher_type {
            MatcherType::AllKeys => (MatcherValue::None, DataType::String),
            MatcherType::InSegment => (segment_name()?, DataType::String),
            MatcherType::InLargeSegment => {
                let data = definition
                    .user_defined_large_segment_matcher_data
                    .as_ref()
                    .ok_or_else(|| missing("userDefinedLargeSegmentMatcherData"))?;
                (
                    MatcherValue::SegmentName(data.large_segment_name.clone()),
                    DataType::String,
                )
            }
            MatcherType::InRuleBasedSegment => (segment_name()?, DataType::NotSpecified),
            // equality compares days, ordering compares minutes
            MatcherType::EqualTo => {
                let data = unary_numeric()?;
                match data.data_type {
                    NumericDataType::Datetime => (
                        MatcherValue::Number(truncate_to_day(data.value)),
                        DataType::Datetime,
                    ),
                    NumericDataType::Number => (MatcherValue::Number(data.value), DataType::Number),
                }
            }
            MatcherType::GreaterThanOrEqualTo | MatcherType::LessThanOrEqualTo => {
                let data = unary_numeric()?;
                match data.data_type {
                    NumericDataType::Datetime => (
                        MatcherValue::Number(truncate_to_minute(data.value)),
                        DataType::Datetime,
                    ),
                    NumericDataType::Number => (MatcherValue::Number(data.value), DataType::Number),
                }
            }
            MatcherType::Between => {
                let data = definition
                    .between_matcher_data
                    .as_ref()
                    .ok_or_else(|| missing("betweenMatcherData"))?;
                match data.data_type {
                    NumericDataType::Datetime => (
                        MatcherValue::Between {
                            start: truncate_to_minute(data.start),
                            end: truncate_to_minute(data.end),
                        },
                        DataType::Datetime,
                    ),
                    NumericDataType::Number => (
                        MatcherValue::Between {
                            start: data.start,
                            end: data.end,
                        },
                        DataType::Number,
                    ),
                }
            }
            MatcherType::EqualToSet
            | MatcherType::ContainsAnyOfSet
            | MatcherType::ContainsAllOfSet
            | MatcherType::PartOfSet => (whitelist()?, DataType::Set),
            MatcherType::Whitelist
            | MatcherType::StartsWith
            | MatcherType::EndsWith
            | MatcherType::ContainsString
            | MatcherType::InListSemver => (whitelist()?, DataType::String),
            MatcherType::InSplitTreatment => {
                let data = definition
                    .dependency_matcher_data
                    .as_ref()
                    .ok_or_else(|| missing("dependencyMatcherData"))?;
                (
                    MatcherValue::Dependency {
                        split: data.split.clone(),
                        treatments: data.treatments.clone(),
                    },
                    DataType::NotSpecified,
                )
            }
            MatcherType::EqualToBoolean => {
                let value = definition
                    .boolean_matcher_data
                    .ok_or_else(|| missing("booleanMatcherData"))?;
                (MatcherValue::Boolean(value), DataType::Boolean)
            }
            MatcherType::MatchesString
            | MatcherType::EqualToSemver
            | MatcherType::GreaterThanOrEqualToSemver
            | MatcherType::LessThanOrEqualToSemver => (string()?, DataType::String),
            MatcherType::BetweenSemver => {
                let data = definition
                    .between_string_matcher_data
                    .as_ref()
                    .ok_or_else(|| missing("betweenStringMatcherData"))?;
                (
                    MatcherValue::BetweenStrings {
                        start: data.start.clone(),
                        end: data.end.clone(),
                    },
                    DataType::String,
                )
            }
        };

        Ok(MatcherDto {
            matcher_type,
            value,
            attribute: definition
                .key_selector
                .as_ref()
                .and_then(|selector| selector.attribute.clone()),
            negate: definition.negate,
            data_type,
        })
    }
}
