use std::collections::HashSet;

use log::debug;
use regex::Regex;
use thiserror::Error;

use crate::eval::EvaluationContext;
use crate::matcher::{MatcherDto, MatcherType, MatcherValue};
use crate::maybe_async::MaybeAsync;
use crate::rule_based_segment;
use crate::sanitize::SanitizedValue;
use crate::semver::{Semver, SemverError};
use crate::store::StorageError;

/// Reasons a normalized matcher cannot be turned into a [Matcher].
#[derive(Clone, Debug, Error, PartialEq)]
pub enum MatcherError {
    #[error("invalid regular expression: {0}")]
    InvalidRegex(#[from] regex::Error),
    #[error(transparent)]
    InvalidSemver(#[from] SemverError),
    #[error("IN_LIST_SEMVER matcher requires at least one version")]
    EmptySemverList,
    #[error("{0} matcher received a value of the wrong shape")]
    UnexpectedValue(MatcherType),
}

/// Failures while a matcher is being evaluated. These never abort an evaluation: the matcher
/// is treated as not matching.
#[derive(Clone, Debug, Error, PartialEq)]
pub enum EvaluationError {
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error("rule-based segment {0} depends on itself")]
    RuleBasedSegmentCycle(String),
}

/// A compiled predicate. Each variant holds only the static configuration its comparison needs.
#[derive(Clone, Debug)]
pub enum Matcher {
    AllKeys,
    InSegment(String),
    InLargeSegment(String),
    InRuleBasedSegment(String),
    Whitelist(HashSet<String>),
    EqualTo(f64),
    GreaterThanOrEqualTo(f64),
    LessThanOrEqualTo(f64),
    Between { start: f64, end: f64 },
    EqualToSet(HashSet<String>),
    ContainsAnyOfSet(HashSet<String>),
    ContainsAllOfSet(HashSet<String>),
    PartOfSet(HashSet<String>),
    StartsWith(Vec<String>),
    EndsWith(Vec<String>),
    ContainsString(Vec<String>),
    InSplitTreatment { split: String, treatments: Vec<String> },
    EqualToBoolean(bool),
    MatchesString(Regex),
    EqualToSemver(Semver),
    GreaterThanOrEqualToSemver(Semver),
    LessThanOrEqualToSemver(Semver),
    BetweenSemver { start: Semver, end: Semver },
    InListSemver(HashSet<String>),
}

impl Matcher {
    pub fn build(dto: &MatcherDto) -> Result<Matcher, MatcherError> {
        let unexpected = || MatcherError::UnexpectedValue(dto.matcher_type);

        let matcher = match (dto.matcher_type, &dto.value) {
            (MatcherType::AllKeys, _) => Matcher::AllKeys,
            (MatcherType::InSegment, MatcherValue::SegmentName(name)) => {
                Matcher::InSegment(name.clone())
            }
            (MatcherType::InLargeSegment, MatcherValue::SegmentName(name)) => {
                Matcher::InLargeSegment(name.clone())
            }
            (MatcherType::InRuleBasedSegment, MatcherValue::SegmentName(name)) => {
                Matcher::InRuleBasedSegment(name.clone())
            }
            (MatcherType::Whitelist, MatcherValue::Whitelist(values)) => {
                Matcher::Whitelist(values.iter().cloned().collect())
            }
            (MatcherType::EqualTo, MatcherValue::Number(n)) => Matcher::EqualTo(*n),
            (MatcherType::GreaterThanOrEqualTo, MatcherValue::Number(n)) => {
                Matcher::GreaterThanOrEqualTo(*n)
            }
            (MatcherType::LessThanOrEqualTo, MatcherValue::Number(n)) => {
                Matcher::LessThanOrEqualTo(*n)
            }
            (MatcherType::Between, MatcherValue::Between { start, end }) => Matcher::Between {
                start: *start,
                end: *end,
            },
            (MatcherType::EqualToSet, MatcherValue::Whitelist(values)) => {
                Matcher::EqualToSet(values.iter().cloned().collect())
            }
            (MatcherType::ContainsAnyOfSet, MatcherValue::Whitelist(values)) => {
                Matcher::ContainsAnyOfSet(values.iter().cloned().collect())
            }
            (MatcherType::ContainsAllOfSet, MatcherValue::Whitelist(values)) => {
                Matcher::ContainsAllOfSet(values.iter().cloned().collect())
            }
            (MatcherType::PartOfSet, MatcherValue::Whitelist(values)) => {
                Matcher::PartOfSet(values.iter().cloned().collect())
            }
            (MatcherType::StartsWith, MatcherValue::Whitelist(values)) => {
                Matcher::StartsWith(values.clone())
            }
            (MatcherType::EndsWith, MatcherValue::Whitelist(values)) => {
                Matcher::EndsWith(values.clone())
            }
            (MatcherType::ContainsString, MatcherValue::Whitelist(values)) => {
                Matcher::ContainsString(values.clone())
            }
            (MatcherType::InSplitTreatment, MatcherValue::Dependency { split, treatments }) => {
                Matcher::InSplitTreatment {
                    split: split.clone(),
                    treatments: treatments.clone(),
                }
            }
            (MatcherType::EqualToBoolean, MatcherValue::Boolean(b)) => Matcher::EqualToBoolean(*b),
            (MatcherType::MatchesString, MatcherValue::String(pattern)) => {
                Matcher::MatchesString(Regex::new(pattern)?)
            }
            (MatcherType::EqualToSemver, MatcherValue::String(version)) => {
                Matcher::EqualToSemver(Semver::parse(version)?)
            }
            (MatcherType::GreaterThanOrEqualToSemver, MatcherValue::String(version)) => {
                Matcher::GreaterThanOrEqualToSemver(Semver::parse(version)?)
            }
            (MatcherType::LessThanOrEqualToSemver, MatcherValue::String(version)) => {
                Matcher::LessThanOrEqualToSemver(Semver::parse(version)?)
            }
            (MatcherType::BetweenSemver, MatcherValue::BetweenStrings { start, end }) => {
                Matcher::BetweenSemver {
                    start: Semver::parse(start)?,
                    end: Semver::parse(end)?,
                }
            }
            (MatcherType::InListSemver, MatcherValue::Whitelist(versions)) => {
                Matcher::in_list_semver(versions)?
            }
            _ => return Err(unexpected()),
        };

        Ok(matcher)
    }

    /// Fails when `versions` is empty or any entry is not a valid version.
    pub fn in_list_semver(versions: &[String]) -> Result<Matcher, MatcherError> {
        if versions.is_empty() {
            return Err(MatcherError::EmptySemverList);
        }
        let canonical = versions
            .iter()
            .map(|version| Semver::parse(version).map(|semver| semver.version().to_string()))
            .collect::<Result<HashSet<_>, _>>()?;
        Ok(Matcher::InListSemver(canonical))
    }

    /// Evaluate the predicate against an already sanitized value.
    ///
    /// A value of the wrong shape for this matcher never matches. Storage lookups and dependent
    /// evaluations may leave the result pending; the returned future does not borrow `self`.
    pub fn matches<'a>(
        &self,
        value: SanitizedValue,
        context: &EvaluationContext<'a>,
    ) -> MaybeAsync<'a, Result<bool, EvaluationError>> {
        use SanitizedValue as V;

        let matched = match (self, value) {
            (Matcher::AllKeys, _) => true,

            // storage lookups
            (Matcher::InSegment(name), V::String(key)) => {
                return context
                    .storage()
                    .is_in_segment(name, &key)
                    .map(|result| result.map_err(EvaluationError::from));
            }
            (Matcher::InLargeSegment(name), V::String(key)) => {
                return context
                    .storage()
                    .is_in_large_segment(name, &key)
                    .map(|result| result.map_err(EvaluationError::from));
            }
            (Matcher::InRuleBasedSegment(name), V::Key(key)) => {
                return rule_based_segment::is_member(name, &context.with_key(key));
            }
            (Matcher::InSplitTreatment { split, treatments }, V::Key(key)) => {
                return in_split_treatment(split, treatments.clone(), context.with_key(key));
            }

            (Matcher::Whitelist(values), V::String(s)) => values.contains(&s),

            // numeric ops
            (Matcher::EqualTo(n), V::Number(v)) => v == *n,
            (Matcher::GreaterThanOrEqualTo(n), V::Number(v)) => v >= *n,
            (Matcher::LessThanOrEqualTo(n), V::Number(v)) => v <= *n,
            (Matcher::Between { start, end }, V::Number(v)) => *start <= v && v <= *end,

            // set ops
            (Matcher::EqualToSet(rule), V::Set(values)) => {
                values.len() == rule.len() && values.iter().all(|v| rule.contains(v))
            }
            (Matcher::ContainsAnyOfSet(rule), V::Set(values)) => {
                values.iter().any(|v| rule.contains(v))
            }
            (Matcher::ContainsAllOfSet(rule), V::Set(values)) => {
                values.len() >= rule.len() && rule.iter().all(|r| values.contains(r))
            }
            (Matcher::PartOfSet(rule), V::Set(values)) => values.iter().all(|v| rule.contains(v)),

            // string ops
            (Matcher::StartsWith(prefixes), V::String(s)) => string_op(prefixes, |p| s.starts_with(p)),
            (Matcher::EndsWith(suffixes), V::String(s)) => string_op(suffixes, |p| s.ends_with(p)),
            (Matcher::ContainsString(needles), V::String(s)) => string_op(needles, |p| s.contains(p)),
            (Matcher::MatchesString(regex), V::String(s)) => regex.is_match(&s),

            (Matcher::EqualToBoolean(expected), V::Boolean(b)) => b == *expected,

            // semver ops
            (Matcher::EqualToSemver(target), V::String(s)) => semver_op(&s, |v| v == *target),
            (Matcher::GreaterThanOrEqualToSemver(target), V::String(s)) => {
                semver_op(&s, |v| v >= *target)
            }
            (Matcher::LessThanOrEqualToSemver(target), V::String(s)) => {
                semver_op(&s, |v| v <= *target)
            }
            (Matcher::BetweenSemver { start, end }, V::String(s)) => {
                semver_op(&s, |v| *start <= v && v <= *end)
            }
            (Matcher::InListSemver(versions), V::String(s)) => {
                semver_op(&s, |v| versions.contains(v.version()))
            }

            (matcher, value) => {
                debug!("value {:?} cannot be compared by {:?}", value, matcher);
                false
            }
        };

        MaybeAsync::Ready(Ok(matched))
    }
}

fn string_op<F: Fn(&str) -> bool>(rule_values: &[String], f: F) -> bool {
    rule_values.iter().any(|r| f(r.as_str()))
}

fn semver_op<F: Fn(Semver) -> bool>(value: &str, f: F) -> bool {
    match Semver::parse(value) {
        Ok(version) => f(version),
        Err(e) => {
            debug!("{}", e);
            false
        }
    }
}

fn in_split_treatment<'a>(
    split: &str,
    treatments: Vec<String>,
    context: EvaluationContext<'a>,
) -> MaybeAsync<'a, Result<bool, EvaluationError>> {
    let split_name = split.to_string();
    context
        .split_evaluator()
        .evaluate_split(context.clone(), split)
        .map(move |evaluation| {
            let matched = treatments
                .iter()
                .any(|treatment| Some(treatment) == evaluation.treatment.as_ref());
            debug!(
                "[dependencyMatcher] parent split \"{}\" evaluated to \"{}\" with label \"{}\", matches {}",
                split_name,
                evaluation.treatment(),
                evaluation.label,
                matched
            );
            Ok(matched)
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::key::Key;
    use crate::matcher::{DataType, MatcherDefinition};
    use crate::test_common::{AsyncStorage, FailingStorage, TestStorage};
    use futures::executor::block_on;
    use serde_json::json;
    use spectral::prelude::*;
    use test_case::test_case;

    fn matcher(definition: serde_json::Value) -> Matcher {
        let definition: MatcherDefinition =
            serde_json::from_value(definition).expect("should parse");
        let dto = MatcherDto::try_from(&definition).expect("should transform");
        Matcher::build(&dto).expect("should build")
    }

    fn eval(matcher: &Matcher, value: SanitizedValue) -> bool {
        let storage = TestStorage::new();
        let key = Key::from("alice");
        let context = EvaluationContext::new(&key, &storage);
        matcher
            .matches(value, &context)
            .ready()
            .expect("should be synchronous")
            .expect("should not fail")
    }

    fn string(s: &str) -> SanitizedValue {
        SanitizedValue::String(s.to_string())
    }

    fn set(values: &[&str]) -> SanitizedValue {
        SanitizedValue::Set(values.iter().map(|v| v.to_string()).collect())
    }

    #[test]
    fn all_keys_matches_anything() {
        let m = matcher(json!({"matcherType": "ALL_KEYS"}));
        assert!(eval(&m, string("alice")));
        assert!(eval(&m, SanitizedValue::Number(1.0)));
    }

    #[test]
    fn whitelist() {
        let m = matcher(
            json!({"matcherType": "WHITELIST", "whitelistMatcherData": {"whitelist": ["alice", "bob"]}}),
        );
        assert!(eval(&m, string("alice")));
        assert!(!eval(&m, string("carol")));
        assert!(!eval(&m, set(&["alice"])));
    }

    #[test_case(9.0, false)]
    #[test_case(10.0, true)]
    #[test_case(15.0, true)]
    #[test_case(20.0, true)]
    #[test_case(21.0, false)]
    fn between(value: f64, expected: bool) {
        let m = matcher(json!({
            "matcherType": "BETWEEN",
            "betweenMatcherData": {"dataType": "NUMBER", "start": 10, "end": 20}
        }));
        asserting(&format!("{} between 10 and 20", value))
            .that(&eval(&m, SanitizedValue::Number(value)))
            .is_equal_to(expected);
    }

    #[test]
    fn between_rejects_non_numbers() {
        let m = Matcher::Between {
            start: 10.0,
            end: 20.0,
        };
        assert!(!eval(&m, string("15")));
        assert!(!eval(&m, SanitizedValue::Boolean(true)));
    }

    #[test]
    fn numeric_comparisons() {
        assert!(eval(&Matcher::EqualTo(5.0), SanitizedValue::Number(5.0)));
        assert!(!eval(&Matcher::EqualTo(5.0), SanitizedValue::Number(5.5)));
        assert!(eval(&Matcher::GreaterThanOrEqualTo(5.0), SanitizedValue::Number(5.0)));
        assert!(!eval(&Matcher::GreaterThanOrEqualTo(5.0), SanitizedValue::Number(4.0)));
        assert!(eval(&Matcher::LessThanOrEqualTo(5.0), SanitizedValue::Number(-4.0)));
        assert!(!eval(&Matcher::LessThanOrEqualTo(5.0), SanitizedValue::Number(6.0)));
    }

    #[test]
    fn set_operations() {
        let rule = json!({"whitelist": ["a", "b", "c"]});
        let equal = matcher(json!({"matcherType": "EQUAL_TO_SET", "whitelistMatcherData": rule}));
        let any = matcher(json!({"matcherType": "CONTAINS_ANY_OF_SET", "whitelistMatcherData": rule}));
        let all = matcher(json!({"matcherType": "CONTAINS_ALL_OF_SET", "whitelistMatcherData": rule}));
        let part = matcher(json!({"matcherType": "PART_OF_SET", "whitelistMatcherData": rule}));

        assert!(eval(&equal, set(&["c", "b", "a"])));
        assert!(!eval(&equal, set(&["a", "b"])));
        assert!(!eval(&equal, set(&["a", "b", "c", "d"])));

        assert!(eval(&any, set(&["z", "b"])));
        assert!(!eval(&any, set(&["x", "y"])));

        assert!(eval(&all, set(&["a", "b", "c", "d"])));
        assert!(!eval(&all, set(&["a", "b"])));

        assert!(eval(&part, set(&["a", "c"])));
        assert!(!eval(&part, set(&["a", "d"])));

        for m in [&equal, &any, &all, &part] {
            assert!(!eval(m, string("a")));
        }
    }

    #[test]
    fn string_operations() {
        let rule = json!({"whitelist": ["foo", "bar"]});
        let starts = matcher(json!({"matcherType": "STARTS_WITH", "whitelistMatcherData": rule}));
        let ends = matcher(json!({"matcherType": "ENDS_WITH", "whitelistMatcherData": rule}));
        let contains = matcher(json!({"matcherType": "CONTAINS_STRING", "whitelistMatcherData": rule}));

        assert!(eval(&starts, string("barbecue")));
        assert!(!eval(&starts, string("a foo")));
        assert!(eval(&ends, string("a foo")));
        assert!(!eval(&ends, string("food")));
        assert!(eval(&contains, string("a barn")));
        assert!(!eval(&contains, string("baz")));
    }

    #[test]
    fn matches_string() {
        let m = matcher(json!({"matcherType": "MATCHES_STRING", "stringMatcherData": "^[a-z]+@example\\.com$"}));
        assert!(eval(&m, string("alice@example.com")));
        assert!(!eval(&m, string("alice@example.org")));
    }

    #[test]
    fn invalid_regex_fails_to_build() {
        let definition: MatcherDefinition = serde_json::from_value(
            json!({"matcherType": "MATCHES_STRING", "stringMatcherData": "(unclosed"}),
        )
        .unwrap();
        let dto = MatcherDto::try_from(&definition).unwrap();
        assert!(matches!(Matcher::build(&dto), Err(MatcherError::InvalidRegex(_))));
    }

    #[test]
    fn equal_to_boolean() {
        let m = matcher(json!({"matcherType": "EQUAL_TO_BOOLEAN", "booleanMatcherData": true}));
        assert!(eval(&m, SanitizedValue::Boolean(true)));
        assert!(!eval(&m, SanitizedValue::Boolean(false)));
        assert!(!eval(&m, string("true")));
    }

    #[test]
    fn semver_comparisons() {
        let equal = matcher(json!({"matcherType": "EQUAL_TO_SEMVER", "stringMatcherData": "1.2.3"}));
        assert!(eval(&equal, string("1.2.3")));
        assert!(eval(&equal, string("1.2.3+build.5")));
        assert!(!eval(&equal, string("1.2.3-rc.1")));
        assert!(!eval(&equal, string("not a version")));

        let gte = matcher(json!({"matcherType": "GREATER_THAN_OR_EQUAL_TO_SEMVER", "stringMatcherData": "1.2.3"}));
        assert!(eval(&gte, string("1.10.0")));
        assert!(!eval(&gte, string("1.2.3-rc.1")));

        let lte = matcher(json!({"matcherType": "LESS_THAN_OR_EQUAL_TO_SEMVER", "stringMatcherData": "1.2.3"}));
        assert!(eval(&lte, string("1.2.3-rc.1")));
        assert!(!eval(&lte, string("1.2.4")));

        let between = matcher(json!({
            "matcherType": "BETWEEN_SEMVER",
            "betweenStringMatcherData": {"start": "1.0.0", "end": "2.0.0"}
        }));
        assert!(eval(&between, string("1.0.0")));
        assert!(eval(&between, string("1.99.0")));
        assert!(!eval(&between, string("2.0.1")));
    }

    #[test]
    fn in_list_semver_matches_canonical_versions() {
        let m = Matcher::in_list_semver(&["01.2.3".to_string(), "2.0.0-rc.01".to_string()])
            .expect("valid versions");
        assert!(eval(&m, string("1.2.3")));
        assert!(eval(&m, string("2.0.0-rc.1")));
        assert!(!eval(&m, string("2.0.0")));
    }

    #[test]
    fn in_list_semver_construction_errors() {
        assert_that!(Matcher::in_list_semver(&[]).map(|_| ()))
            .is_err_containing(MatcherError::EmptySemverList);
        assert!(matches!(
            Matcher::in_list_semver(&["1.0.0".to_string(), "invalid".to_string()]),
            Err(MatcherError::InvalidSemver(_))
        ));
    }

    #[test]
    fn mismatched_value_fails_to_build() {
        let dto = MatcherDto {
            matcher_type: MatcherType::EqualTo,
            value: MatcherValue::String("5".into()),
            attribute: None,
            negate: false,
            data_type: DataType::Number,
        };
        assert_that!(Matcher::build(&dto).map(|_| ()))
            .is_err_containing(MatcherError::UnexpectedValue(MatcherType::EqualTo));
    }

    #[test]
    fn segment_membership() {
        let storage = TestStorage::new().with_segment("employees", &["alice"]);
        let key = Key::from("alice");
        let context = EvaluationContext::new(&key, &storage);
        let m = Matcher::InSegment("employees".into());

        assert_that!(m.matches(string("alice"), &context).ready()).contains_value(Ok(true));
        assert_that!(m.matches(string("bob"), &context).ready()).contains_value(Ok(false));
    }

    #[test]
    fn large_segment_membership() {
        let storage = TestStorage::new().with_large_segment("everyone", &["bob"]);
        let key = Key::from("bob");
        let context = EvaluationContext::new(&key, &storage);
        let m = Matcher::InLargeSegment("everyone".into());

        assert_that!(m.matches(string("bob"), &context).ready()).contains_value(Ok(true));
        assert_that!(m.matches(string("alice"), &context).ready()).contains_value(Ok(false));
    }

    #[test]
    fn segment_membership_with_async_storage() {
        let storage = AsyncStorage::new(TestStorage::new().with_segment("employees", &["alice"]));
        let key = Key::from("alice");
        let context = EvaluationContext::new(&key, &storage);
        let result = Matcher::InSegment("employees".into()).matches(string("alice"), &context);

        assert!(!result.is_ready());
        assert_that!(block_on(result.into_future())).is_ok_containing(true);
    }

    #[test]
    fn storage_errors_are_reported() {
        let storage = FailingStorage;
        let key = Key::from("alice");
        let context = EvaluationContext::new(&key, &storage);
        let result = Matcher::InSegment("employees".into())
            .matches(string("alice"), &context)
            .ready()
            .expect("should be synchronous");

        assert!(matches!(result, Err(EvaluationError::Storage(_))));
    }

    #[test]
    fn dependency_on_another_split() {
        let storage = TestStorage::new().with_split(json!({
            "name": "parent",
            "seed": 1,
            "defaultTreatment": "off",
            "conditions": [{
                "conditionType": "WHITELIST",
                "matcherGroup": {"combiner": "AND", "matchers": [{
                    "matcherType": "WHITELIST",
                    "whitelistMatcherData": {"whitelist": ["alice"]}
                }]},
                "partitions": [{"treatment": "on", "size": 100}],
                "label": "whitelisted"
            }]
        }));
        let key = Key::from("bob");
        let context = EvaluationContext::new(&key, &storage);
        let m = Matcher::InSplitTreatment {
            split: "parent".into(),
            treatments: vec!["on".into()],
        };

        assert_that!(m.matches(SanitizedValue::Key(Key::from("alice")), &context).ready())
            .contains_value(Ok(true));
        assert_that!(m.matches(SanitizedValue::Key(Key::from("bob")), &context).ready())
            .contains_value(Ok(false));

        let missing = Matcher::InSplitTreatment {
            split: "missing".into(),
            treatments: vec!["control".into()],
        };
        // a missing split evaluates to control
        assert_that!(missing.matches(SanitizedValue::Key(Key::from("bob")), &context).ready())
            .contains_value(Ok(true));
    }
}
