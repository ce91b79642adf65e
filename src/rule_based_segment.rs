use log::{debug, error, warn};
use serde::{Deserialize, Serialize};

use crate::combiners::if_else_if_combiner;
use crate::condition::{Condition, MatcherGroup};
use crate::eval::EvaluationContext;
use crate::matchers::EvaluationError;
use crate::maybe_async::MaybeAsync;

/// A segment whose membership is computed from its own conditions rather than a key list.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RuleBasedSegment {
    pub name: String,
    #[serde(default)]
    pub traffic_type_name: Option<String>,
    #[serde(default)]
    pub change_number: i64,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub excluded: Excluded,
    #[serde(default)]
    pub conditions: Vec<Condition>,
}

/// Keys and segments that are never members, whatever the conditions say.
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Serialize)]
pub struct Excluded {
    #[serde(default)]
    pub keys: Vec<String>,
    #[serde(default)]
    pub segments: Vec<ExcludedSegment>,
}

#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct ExcludedSegment {
    #[serde(rename = "type")]
    pub segment_type: ExcludedSegmentType,
    pub name: String,
}

#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ExcludedSegmentType {
    Standard,
    RuleBased,
    Large,
}

impl RuleBasedSegment {
    pub fn excludes_key(&self, matching_key: &str) -> bool {
        self.excluded.keys.iter().any(|key| key == matching_key)
    }

    /// Whether the key in `context` belongs to this segment: it is not excluded, and the matcher
    /// group of at least one condition matches. Partitions play no part.
    pub fn contains<'a>(
        &self,
        context: &EvaluationContext<'a>,
    ) -> MaybeAsync<'a, Result<bool, EvaluationError>> {
        if self.excludes_key(context.key().matching_key()) {
            debug!(
                "key {} is excluded from rule-based segment {}",
                context.key().matching_key(),
                self.name
            );
            return MaybeAsync::Ready(Ok(false));
        }

        let groups = match self
            .conditions
            .iter()
            .map(|condition| MatcherGroup::compile(&condition.matcher_group))
            .collect::<Result<Vec<_>, _>>()
        {
            Ok(groups) => groups,
            Err(e) => {
                error!("rule-based segment {} cannot be evaluated: {}", self.name, e);
                return MaybeAsync::Ready(Ok(false));
            }
        };

        let context = context.clone();
        in_excluded_segment(self.excluded.segments.clone().into_iter(), context.clone()).and_then(
            move |excluded| match excluded {
                Ok(false) => any_group_matches(&groups, &context).map(Ok),
                Ok(true) => MaybeAsync::Ready(Ok(false)),
                Err(e) => MaybeAsync::Ready(Err(e)),
            },
        )
    }
}

/// Membership of the key in `context` in the rule-based segment `segment_name`, read from the
/// context's storage. A missing segment has no members.
pub(crate) fn is_member<'a>(
    segment_name: &str,
    context: &EvaluationContext<'a>,
) -> MaybeAsync<'a, Result<bool, EvaluationError>> {
    let Some(context) = context.enter_rule_based_segment(segment_name) else {
        return MaybeAsync::Ready(Err(EvaluationError::RuleBasedSegmentCycle(
            segment_name.to_string(),
        )));
    };
    let name = segment_name.to_string();

    context
        .storage()
        .rule_based_segment(segment_name)
        .and_then(move |segment| match segment {
            Ok(Some(segment)) => segment.contains(&context),
            Ok(None) => {
                warn!("rule-based segment {} not found", name);
                MaybeAsync::Ready(Ok(false))
            }
            Err(e) => MaybeAsync::Ready(Err(e.into())),
        })
}

// Excluded segments are checked in order, stopping at the first that contains the key.
fn in_excluded_segment<'a>(
    mut segments: std::vec::IntoIter<ExcludedSegment>,
    context: EvaluationContext<'a>,
) -> MaybeAsync<'a, Result<bool, EvaluationError>> {
    let Some(segment) = segments.next() else {
        return MaybeAsync::Ready(Ok(false));
    };

    let matching_key = context.key().matching_key();
    let storage = context.storage();
    let membership = match segment.segment_type {
        ExcludedSegmentType::Standard => storage
            .is_in_segment(&segment.name, matching_key)
            .map(|result| result.map_err(EvaluationError::from)),
        ExcludedSegmentType::Large => storage
            .is_in_large_segment(&segment.name, matching_key)
            .map(|result| result.map_err(EvaluationError::from)),
        ExcludedSegmentType::RuleBased => is_member(&segment.name, &context),
    };

    membership.and_then(move |member| match member {
        Ok(false) => in_excluded_segment(segments, context),
        other => MaybeAsync::Ready(other),
    })
}

fn any_group_matches<'a>(groups: &[MatcherGroup], context: &EvaluationContext<'a>) -> MaybeAsync<'a, bool> {
    if_else_if_combiner(
        groups
            .iter()
            .map(|group| group.matches(context).map(|matched| matched.then_some(()))),
    )
    .map(|found| found.is_some())
}
