use std::sync::Arc;

use log::{debug, error, warn};

use crate::eval::{labels, Evaluation, EvaluationContext, SplitEvaluator};
use crate::maybe_async::MaybeAsync;
use crate::parser::{CompileError, Rules};
use crate::split::Split;

/// A split compiled for evaluation.
///
/// The engine applies the split-level rules around the compiled conditions: the kill switch,
/// prerequisites, and the default treatment when no condition decides.
#[derive(Clone, Debug)]
pub struct Engine {
    split: Arc<Split>,
    rules: Arc<Rules>,
}

impl Engine {
    /// Compile `split`. Unsupported matchers do not fail; the split then always evaluates to
    /// [crate::CONTROL]. Malformed partitions are an error.
    pub fn parse(split: Split) -> Result<Engine, CompileError> {
        let rules = Rules::compile(&split.conditions)?;
        Ok(Engine {
            split: Arc::new(split),
            rules: Arc::new(rules),
        })
    }

    pub fn split(&self) -> &Split {
        &self.split
    }

    /// Evaluate the split for the key in `context`. The returned result does not borrow the
    /// engine.
    pub fn evaluate<'a>(&self, context: &EvaluationContext<'a>) -> MaybeAsync<'a, Evaluation> {
        let split = self.split.clone();

        let Some(context) = context.enter_split(&split.name) else {
            return MaybeAsync::Ready(
                Evaluation::control(labels::EXCEPTION).with_change_number(split.change_number),
            );
        };

        if split.killed {
            debug!("split {} is killed", split.name);
            return MaybeAsync::Ready(split.default_evaluation(labels::SPLIT_KILLED));
        }

        let rules = self.rules.clone();
        prerequisites_met(split.clone(), 0, context.clone()).and_then(move |met| {
            if !met {
                return MaybeAsync::Ready(split.default_evaluation(labels::PREREQUISITES_NOT_MET));
            }
            rules
                .evaluate(&context, &split.allocation())
                .map(move |decision| decide(&split, decision))
        })
    }
}

fn decide(split: &Split, decision: Option<Evaluation>) -> Evaluation {
    match decision {
        None => split.default_evaluation(labels::NO_CONDITION_MATCH),
        // not in split
        Some(Evaluation {
            treatment: None,
            label,
            ..
        }) => split.default_evaluation(label),
        Some(Evaluation {
            treatment: Some(treatment),
            label,
            ..
        }) => split.evaluation(&treatment, label),
    }
}

// Prerequisites are checked in order; the first one that is not met stops the check.
fn prerequisites_met<'a>(
    split: Arc<Split>,
    index: usize,
    context: EvaluationContext<'a>,
) -> MaybeAsync<'a, bool> {
    let Some(prerequisite) = split.prerequisites.get(index) else {
        return MaybeAsync::Ready(true);
    };
    let name = prerequisite.n.clone();
    let accepted = prerequisite.ts.clone();

    context
        .split_evaluator()
        .evaluate_split(context.clone(), &name)
        .and_then(move |evaluation| {
            if accepted.iter().any(|t| t == evaluation.treatment()) {
                prerequisites_met(split, index + 1, context)
            } else {
                debug!(
                    "prerequisite {} of split {} evaluated to {}, not met",
                    name,
                    split.name,
                    evaluation.treatment()
                );
                MaybeAsync::Ready(false)
            }
        })
}

/// Evaluate the split named `split_name`, read from the context's storage.
///
/// A missing split evaluates to [crate::CONTROL] with label [labels::SPLIT_NOT_FOUND]; a storage
/// failure or a malformed split to [crate::CONTROL] with label [labels::EXCEPTION].
pub fn evaluate_feature<'a>(
    context: &EvaluationContext<'a>,
    split_name: &str,
) -> MaybeAsync<'a, Evaluation> {
    let context = context.clone();
    let name = split_name.to_string();

    context
        .storage()
        .split(split_name)
        .and_then(move |split| match split {
            Ok(Some(split)) => {
                let change_number = split.change_number;
                match Engine::parse(split) {
                    Ok(engine) => engine.evaluate(&context),
                    Err(e) => {
                        error!("split {} cannot be evaluated: {}", name, e);
                        MaybeAsync::Ready(
                            Evaluation::control(labels::EXCEPTION)
                                .with_change_number(change_number),
                        )
                    }
                }
            }
            Ok(None) => {
                warn!("split {} not found", name);
                MaybeAsync::Ready(Evaluation::control(labels::SPLIT_NOT_FOUND))
            }
            Err(e) => {
                error!("failed to read split {}: {}", name, e);
                MaybeAsync::Ready(Evaluation::control(labels::EXCEPTION))
            }
        })
}

/// The [SplitEvaluator] used when the caller does not provide one: splits are read from the
/// context's storage and evaluated with [evaluate_feature].
#[derive(Clone, Copy, Debug, Default)]
pub struct DefaultSplitEvaluator;

impl SplitEvaluator for DefaultSplitEvaluator {
    fn evaluate_split<'a>(
        &'a self,
        context: EvaluationContext<'a>,
        split_name: &str,
    ) -> MaybeAsync<'a, Evaluation> {
        evaluate_feature(&context, split_name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attribute_value::{AttributeValue, Attributes};
    use crate::eval::CONTROL;
    use crate::key::Key;
    use crate::store::Storage;
    use crate::test_common::{AsyncStorage, FailingStorage, TestStorage};
    use futures::executor::block_on;
    use maplit::hashmap;
    use serde_json::json;
    use spectral::prelude::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn evaluate_sync(storage: &dyn Storage, key: &str, split_name: &str) -> Evaluation {
        let key = Key::from(key);
        let context = EvaluationContext::new(&key, storage);
        evaluate_feature(&context, split_name)
            .ready()
            .expect("should be synchronous")
    }

    fn storage() -> TestStorage {
        TestStorage::new()
            .with_split(json!({
                "name": "whitelisted",
                "changeNumber": 10,
                "defaultTreatment": "off",
                "configurations": {"on": "{\"size\":10}"},
                "conditions": [{
                    "conditionType": "WHITELIST",
                    "matcherGroup": {"combiner": "AND", "matchers": [{
                        "matcherType": "WHITELIST",
                        "whitelistMatcherData": {"whitelist": ["alice"]}
                    }]},
                    "partitions": [{"treatment": "on", "size": 100}],
                    "label": "whitelisted"
                }]
            }))
            .with_split(json!({
                "name": "killed",
                "changeNumber": 11,
                "killed": true,
                "defaultTreatment": "off",
                "conditions": [{
                    "matcherGroup": {"combiner": "AND", "matchers": [{"matcherType": "ALL_KEYS"}]},
                    "partitions": [{"treatment": "on", "size": 100}]
                }]
            }))
            .with_split(json!({
                "name": "nobody",
                "changeNumber": 12,
                "trafficAllocation": 0,
                "defaultTreatment": "off",
                "configurations": {"off": "{}"},
                "conditions": [{
                    "matcherGroup": {"combiner": "AND", "matchers": [{"matcherType": "ALL_KEYS"}]},
                    "partitions": [{"treatment": "on", "size": 100}],
                    "label": "default rule"
                }]
            }))
            .with_split(json!({
                "name": "gated",
                "changeNumber": 13,
                "defaultTreatment": "off",
                "prerequisites": [{"n": "whitelisted", "ts": ["on"]}],
                "conditions": [{
                    "matcherGroup": {"combiner": "AND", "matchers": [{"matcherType": "ALL_KEYS"}]},
                    "partitions": [{"treatment": "on", "size": 100}],
                    "label": "default rule"
                }]
            }))
            .with_split(json!({
                "name": "geofenced",
                "changeNumber": 14,
                "defaultTreatment": "off",
                "conditions": [{
                    "matcherGroup": {"combiner": "AND", "matchers": [{"matcherType": "IN_GEOFENCE"}]},
                    "partitions": [{"treatment": "on", "size": 100}]
                }]
            }))
            .with_split(json!({
                "name": "malformed",
                "changeNumber": 15,
                "conditions": [{
                    "matcherGroup": {"combiner": "AND", "matchers": [{"matcherType": "ALL_KEYS"}]},
                    "partitions": [{"treatment": "on", "size": 10}]
                }]
            }))
    }

    #[test]
    fn condition_match_and_default_rule() {
        let storage = storage();
        assert_that!(evaluate_sync(&storage, "alice", "whitelisted")).is_equal_to(Evaluation {
            treatment: Some("on".into()),
            label: "whitelisted".into(),
            change_number: Some(10),
            config: Some("{\"size\":10}".into()),
        });
        assert_that!(evaluate_sync(&storage, "bob", "whitelisted")).is_equal_to(Evaluation {
            treatment: Some("off".into()),
            label: labels::NO_CONDITION_MATCH.into(),
            change_number: Some(10),
            config: None,
        });
    }

    #[test]
    fn killed_split_returns_default_treatment() {
        let evaluation = evaluate_sync(&storage(), "alice", "killed");
        assert_that!(evaluation.treatment()).is_equal_to("off");
        assert_that!(evaluation.label.as_str()).is_equal_to(labels::SPLIT_KILLED);
        assert_that!(evaluation.change_number).contains_value(11);
    }

    #[test]
    fn not_in_split_returns_default_treatment() {
        let evaluation = evaluate_sync(&storage(), "alice", "nobody");
        assert_that!(evaluation).is_equal_to(Evaluation {
            treatment: Some("off".into()),
            label: labels::NOT_IN_SPLIT.into(),
            change_number: Some(12),
            config: Some("{}".into()),
        });
    }

    #[test]
    fn prerequisites() {
        let storage = storage();
        let met = evaluate_sync(&storage, "alice", "gated");
        assert_that!(met.treatment()).is_equal_to("on");
        assert_that!(met.label.as_str()).is_equal_to("default rule");

        let not_met = evaluate_sync(&storage, "bob", "gated");
        assert_that!(not_met.treatment()).is_equal_to("off");
        assert_that!(not_met.label.as_str()).is_equal_to(labels::PREREQUISITES_NOT_MET);
    }

    #[test]
    fn missing_prerequisite_is_not_met() {
        let storage = TestStorage::new().with_split(json!({
            "name": "orphan",
            "defaultTreatment": "off",
            "prerequisites": [{"n": "missing", "ts": ["on"]}],
            "conditions": []
        }));
        let evaluation = evaluate_sync(&storage, "alice", "orphan");
        assert_that!(evaluation.label.as_str()).is_equal_to(labels::PREREQUISITES_NOT_MET);
    }

    #[test]
    fn unsupported_and_malformed_splits() {
        let storage = storage();
        let unsupported = evaluate_sync(&storage, "alice", "geofenced");
        assert_that!(unsupported.treatment()).is_equal_to(CONTROL);
        assert_that!(unsupported.label.as_str()).is_equal_to(labels::UNSUPPORTED_MATCHER_TYPE);
        assert_that!(unsupported.change_number).contains_value(14);

        let malformed = evaluate_sync(&storage, "alice", "malformed");
        assert_that!(malformed).is_equal_to(
            Evaluation::control(labels::EXCEPTION).with_change_number(15),
        );
    }

    #[test]
    fn missing_split_and_storage_failure() {
        assert_that!(evaluate_sync(&storage(), "alice", "missing"))
            .is_equal_to(Evaluation::control(labels::SPLIT_NOT_FOUND));
        assert_that!(evaluate_sync(&FailingStorage, "alice", "whitelisted"))
            .is_equal_to(Evaluation::control(labels::EXCEPTION));
    }

    #[test]
    fn engine_can_be_used_directly() {
        let split = serde_json::from_value(json!({
            "name": "direct",
            "seed": 5,
            "defaultTreatment": "off",
            "conditions": [{
                "matcherGroup": {"combiner": "AND", "matchers": [{
                    "keySelector": {"attribute": "beta"},
                    "matcherType": "EQUAL_TO_BOOLEAN",
                    "booleanMatcherData": true
                }]},
                "partitions": [{"treatment": "on", "size": 100}],
                "label": "beta testers"
            }]
        }))
        .unwrap();
        let engine = Engine::parse(split).unwrap();
        let storage = TestStorage::new();
        let key = Key::from("alice");
        let attributes: Attributes = hashmap! {"beta".to_string() => AttributeValue::from("TRUE")};
        let context = EvaluationContext::new(&key, &storage).with_attributes(Some(&attributes));

        let evaluation = engine.evaluate(&context).ready().unwrap();
        assert_that!(evaluation.treatment()).is_equal_to("on");
        assert_that!(evaluation.label.as_str()).is_equal_to("beta testers");
    }

    #[test]
    fn dependency_cycles_evaluate_to_control() {
        let storage = TestStorage::new()
            .with_split(json!({
                "name": "chicken",
                "defaultTreatment": "off",
                "conditions": [{
                    "matcherGroup": {"combiner": "AND", "matchers": [{
                        "matcherType": "IN_SPLIT_TREATMENT",
                        "dependencyMatcherData": {"split": "egg", "treatments": ["on"]}
                    }]},
                    "partitions": [{"treatment": "on", "size": 100}],
                    "label": "depends on egg"
                }]
            }))
            .with_split(json!({
                "name": "egg",
                "defaultTreatment": "off",
                "conditions": [{
                    "matcherGroup": {"combiner": "AND", "matchers": [{
                        "matcherType": "IN_SPLIT_TREATMENT",
                        "dependencyMatcherData": {"split": "chicken", "treatments": ["on"]}
                    }]},
                    "partitions": [{"treatment": "on", "size": 100}],
                    "label": "depends on chicken"
                }]
            }));

        // chicken -> egg -> chicken is cut off with control, so egg does not match
        let evaluation = evaluate_sync(&storage, "alice", "chicken");
        assert_that!(evaluation.treatment()).is_equal_to("off");
        assert_that!(evaluation.label.as_str()).is_equal_to(labels::NO_CONDITION_MATCH);
    }

    #[test]
    fn async_storage_evaluates_the_same() {
        let storage = AsyncStorage::new(storage());
        for (key, split) in [
            ("alice", "whitelisted"),
            ("bob", "whitelisted"),
            ("alice", "gated"),
            ("bob", "gated"),
            ("alice", "killed"),
            ("alice", "missing"),
        ] {
            let key_value = Key::from(key);
            let context = EvaluationContext::new(&key_value, &storage);
            let result = evaluate_feature(&context, split);
            assert!(!result.is_ready());
            asserting(&format!("{} for {}", split, key))
                .that(&block_on(result.into_future()))
                .is_equal_to(evaluate_sync(storage.inner(), key, split));
        }
    }

    struct CountingSplitEvaluator {
        calls: AtomicUsize,
    }

    impl SplitEvaluator for CountingSplitEvaluator {
        fn evaluate_split<'a>(
            &'a self,
            _context: EvaluationContext<'a>,
            split_name: &str,
        ) -> MaybeAsync<'a, Evaluation> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            MaybeAsync::Ready(Evaluation::new(
                if split_name == "whitelisted" { "on" } else { "off" },
                "stubbed",
            ))
        }
    }

    #[test]
    fn custom_split_evaluator_is_used_for_prerequisites() {
        let storage = storage();
        let split_evaluator = CountingSplitEvaluator {
            calls: AtomicUsize::new(0),
        };
        let key = Key::from("bob");
        let context = EvaluationContext::new(&key, &storage)
            .with_split_evaluator(Some(&split_evaluator));

        let evaluation = evaluate_feature(&context, "gated").ready().unwrap();
        assert_that!(evaluation.treatment()).is_equal_to("on");
        assert_that!(split_evaluator.calls.load(Ordering::SeqCst)).is_equal_to(1);
    }
}
