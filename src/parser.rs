use std::sync::Arc;

use log::error;
use thiserror::Error;

use crate::attribute_value::Attributes;
use crate::combiners::if_else_if_combiner;
use crate::condition::{Condition, ConditionEvaluator};
use crate::eval::{labels, Evaluation, EvaluationContext, SplitEvaluator};
use crate::key::Key;
use crate::matcher::TransformError;
use crate::matchers::MatcherError;
use crate::maybe_async::MaybeAsync;
use crate::murmur3;
use crate::store::Storage;
use crate::treatments::TreatmentsError;

/// Reasons a condition list cannot be compiled.
#[derive(Clone, Debug, Error, PartialEq)]
pub enum CompileError {
    #[error("unsupported matcher: {0}")]
    UnsupportedMatcher(#[from] TransformError),
    #[error("matcher could not be built: {0}")]
    InvalidMatcher(#[from] MatcherError),
    #[error("malformed partitions: {0}")]
    InvalidPartitions(#[from] TreatmentsError),
}

impl CompileError {
    /// Whether the rules use something this engine cannot evaluate, as opposed to being
    /// malformed.
    pub fn is_unsupported(&self) -> bool {
        !matches!(self, CompileError::InvalidPartitions(_))
    }
}

/// The seeds and traffic allocation of the split whose conditions are evaluated.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Allocation {
    pub seed: i32,
    pub traffic_allocation: Option<u32>,
    pub traffic_allocation_seed: Option<i32>,
}

impl Allocation {
    pub fn new(seed: i32) -> Self {
        Allocation {
            seed,
            traffic_allocation: None,
            traffic_allocation_seed: None,
        }
    }

    pub fn with_traffic_allocation(
        mut self,
        traffic_allocation: u32,
        traffic_allocation_seed: i32,
    ) -> Self {
        self.traffic_allocation = Some(traffic_allocation);
        self.traffic_allocation_seed = Some(traffic_allocation_seed);
        self
    }

    /// Whether a key with this bucketing key is inside the traffic allocation.
    pub fn allocates(&self, bucketing_key: &str) -> bool {
        let traffic_allocation = self.traffic_allocation.unwrap_or(100);
        if traffic_allocation >= 100 {
            return true;
        }
        let seed = self.traffic_allocation_seed.unwrap_or(0);
        murmur3::bucket(bucketing_key, seed) <= traffic_allocation
    }
}

/// An ordered list of compiled conditions; the first one to decide wins.
#[derive(Clone, Debug)]
pub struct CompiledRules {
    conditions: Vec<ConditionEvaluator>,
}

/// Compile every condition, failing on the first one that cannot be compiled.
pub fn compile(conditions: &[Condition]) -> Result<CompiledRules, CompileError> {
    let conditions = conditions
        .iter()
        .map(ConditionEvaluator::compile)
        .collect::<Result<Vec<_>, _>>()?;
    Ok(CompiledRules { conditions })
}

impl CompiledRules {
    /// None when no condition decides. Conditions after the deciding one are not evaluated.
    pub fn evaluate<'a>(
        &self,
        context: &EvaluationContext<'a>,
        allocation: &Allocation,
    ) -> MaybeAsync<'a, Option<Evaluation>> {
        if_else_if_combiner(
            self.conditions
                .iter()
                .map(|condition| condition.evaluate(context, allocation)),
        )
    }
}

/// Compiled rules, or the fail-safe used when any matcher in them is not supported.
#[derive(Clone, Debug)]
pub(crate) enum Rules {
    Compiled(CompiledRules),
    Unsupported,
}

impl Rules {
    pub(crate) fn compile(conditions: &[Condition]) -> Result<Rules, CompileError> {
        match compile(conditions) {
            Ok(rules) => Ok(Rules::Compiled(rules)),
            Err(e) if e.is_unsupported() => {
                error!("{}; every evaluation will return {}", e, crate::eval::CONTROL);
                Ok(Rules::Unsupported)
            }
            Err(e) => Err(e),
        }
    }

    pub(crate) fn evaluate<'a>(
        &self,
        context: &EvaluationContext<'a>,
        allocation: &Allocation,
    ) -> MaybeAsync<'a, Option<Evaluation>> {
        match self {
            Rules::Compiled(rules) => rules.evaluate(context, allocation),
            Rules::Unsupported => MaybeAsync::Ready(Some(Evaluation::control(
                labels::UNSUPPORTED_MATCHER_TYPE,
            ))),
        }
    }
}

/// A condition list compiled once, ready to be evaluated for many keys.
#[derive(Clone)]
pub struct Evaluator {
    rules: Rules,
    storage: Arc<dyn Storage>,
}

/// Compile `conditions` into an [Evaluator] reading segments and splits from `storage`.
///
/// A matcher that is unknown or cannot be built makes every evaluation return
/// [crate::CONTROL] with label [labels::UNSUPPORTED_MATCHER_TYPE]. Malformed partitions are
/// returned as an error.
pub fn parse(conditions: &[Condition], storage: Arc<dyn Storage>) -> Result<Evaluator, CompileError> {
    Ok(Evaluator {
        rules: Rules::compile(conditions)?,
        storage,
    })
}

impl Evaluator {
    /// Evaluate the conditions for `key`. None means no condition decided and the caller should
    /// apply its default treatment.
    pub fn evaluate<'a>(
        &'a self,
        key: &'a Key,
        allocation: &Allocation,
        attributes: Option<&'a Attributes>,
        split_evaluator: Option<&'a dyn SplitEvaluator>,
    ) -> MaybeAsync<'a, Option<Evaluation>> {
        let context = EvaluationContext::new(key, self.storage.as_ref())
            .with_attributes(attributes)
            .with_split_evaluator(split_evaluator);
        self.rules.evaluate(&context, allocation)
    }

    pub fn is_supported(&self) -> bool {
        matches!(self.rules, Rules::Compiled(_))
    }
}
