use log::{debug, error};
use serde::{Deserialize, Serialize};

use crate::combiners::and_combiner;
use crate::eval::{labels, Evaluation, EvaluationContext};
use crate::matcher::{MatcherDefinition, MatcherDto};
use crate::matchers::Matcher;
use crate::maybe_async::MaybeAsync;
use crate::murmur3;
use crate::parser::{Allocation, CompileError};
use crate::sanitize::sanitize;
use crate::treatments::Treatments;

/// One targeting rule of a split: a matcher group and the partitions assigned on a match.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    #[serde(default)]
    pub condition_type: ConditionType,
    pub matcher_group: MatcherGroupDefinition,
    #[serde(default)]
    pub partitions: Vec<Partition>,
    #[serde(default)]
    pub label: String,
}

/// WHITELIST conditions bypass traffic allocation; ROLLOUT conditions are subject to it.
#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConditionType {
    #[default]
    Rollout,
    Whitelist,
}

#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct MatcherGroupDefinition {
    #[serde(default)]
    pub combiner: Combiner,
    #[serde(default)]
    pub matchers: Vec<MatcherDefinition>,
}

#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Combiner {
    #[default]
    And,
}

/// A treatment and the percentage of buckets, 0 to 100, assigned to it.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct Partition {
    pub treatment: String,
    pub size: u32,
}

/// A compiled matcher group: every matcher must hold for the group to match.
#[derive(Clone, Debug)]
pub struct MatcherGroup {
    expressions: Vec<(MatcherDto, Matcher)>,
}

impl MatcherGroup {
    pub fn compile(definition: &MatcherGroupDefinition) -> Result<Self, CompileError> {
        let expressions = definition
            .matchers
            .iter()
            .map(|definition| {
                let dto = MatcherDto::try_from(definition)?;
                let matcher = Matcher::build(&dto)?;
                Ok((dto, matcher))
            })
            .collect::<Result<Vec<_>, CompileError>>()?;
        Ok(MatcherGroup { expressions })
    }

    pub fn matches<'a>(&self, context: &EvaluationContext<'a>) -> MaybeAsync<'a, bool> {
        let results = self
            .expressions
            .iter()
            .map(|(dto, matcher)| evaluate_expression(dto, matcher, context))
            .collect();
        and_combiner(results)
    }
}

// sanitize, match, then negate: a value that cannot be sanitized counts as a non-match, and so
// does a matcher that fails.
fn evaluate_expression<'a>(
    dto: &MatcherDto,
    matcher: &Matcher,
    context: &EvaluationContext<'a>,
) -> MaybeAsync<'a, bool> {
    let matcher_type = dto.matcher_type;
    let negate = dto.negate;

    let result = match sanitize(context.key(), dto, context.attributes()) {
        Some(value) => matcher.matches(value, context),
        None => MaybeAsync::Ready(Ok(false)),
    };

    result.map(move |result| {
        let matched = result.unwrap_or_else(|e| {
            error!(
                "{} matcher failed and is treated as not matching: {}",
                matcher_type, e
            );
            false
        });
        debug!(
            "[{}] evaluated to {}, negate {}",
            matcher_type, matched, negate
        );
        matched ^ negate
    })
}

/// A compiled condition: its matcher group, partition table and label.
#[derive(Clone, Debug)]
pub struct ConditionEvaluator {
    condition_type: ConditionType,
    matcher_group: MatcherGroup,
    treatments: Treatments,
    label: String,
}

impl ConditionEvaluator {
    pub fn compile(condition: &Condition) -> Result<Self, CompileError> {
        Ok(ConditionEvaluator {
            condition_type: condition.condition_type,
            matcher_group: MatcherGroup::compile(&condition.matcher_group)?,
            treatments: Treatments::parse(&condition.partitions)?,
            label: condition.label.clone(),
        })
    }

    /// None when the matcher group does not match. A key outside the traffic allocation of a
    /// rollout condition gets [Evaluation::not_in_split] without any matcher running.
    pub fn evaluate<'a>(
        &self,
        context: &EvaluationContext<'a>,
        allocation: &Allocation,
    ) -> MaybeAsync<'a, Option<Evaluation>> {
        let bucketing_key = context.key().bucketing_key();

        if self.condition_type == ConditionType::Rollout && !allocation.allocates(bucketing_key) {
            debug!("key {} is not in split", bucketing_key);
            return MaybeAsync::Ready(Some(Evaluation::not_in_split()));
        }

        let bucket = murmur3::bucket(bucketing_key, allocation.seed);
        let evaluation = match self.treatments.get_treatment_for(bucket) {
            Ok(treatment) => Evaluation::new(treatment, self.label.as_str()),
            Err(e) => {
                error!("{}", e);
                Evaluation::control(labels::EXCEPTION)
            }
        };

        self.matcher_group
            .matches(context)
            .map(move |matched| matched.then_some(evaluation))
    }
}
