use std::borrow::Cow;
use std::collections::HashSet;
use std::fmt;

use log::warn;
use serde::Serialize;

use crate::attribute_value::Attributes;
use crate::engine::DefaultSplitEvaluator;
use crate::key::Key;
use crate::maybe_async::MaybeAsync;
use crate::store::Storage;

/// The treatment returned whenever a split cannot be evaluated normally.
pub const CONTROL: &str = "control";

/// Labels explaining how an [Evaluation] was reached.
pub mod labels {
    pub const NOT_IN_SPLIT: &str = "not in split";
    pub const UNSUPPORTED_MATCHER_TYPE: &str = "targeting rule type unsupported by sdk";
    pub const SPLIT_KILLED: &str = "killed";
    pub const NO_CONDITION_MATCH: &str = "default rule";
    pub const SPLIT_NOT_FOUND: &str = "definition not found";
    pub const EXCEPTION: &str = "exception";
    pub const PREREQUISITES_NOT_MET: &str = "prerequisites not met";
}

/// The result of evaluating one split for one key.
///
/// A `treatment` of None together with a label means the key was not allocated to the condition
/// that produced it; callers substitute the split's default treatment.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Evaluation {
    pub treatment: Option<String>,
    pub label: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub change_number: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub config: Option<String>,
}

impl Evaluation {
    pub fn new(treatment: impl Into<String>, label: impl Into<String>) -> Self {
        Evaluation {
            treatment: Some(treatment.into()),
            label: label.into(),
            change_number: None,
            config: None,
        }
    }

    /// A decision that the key falls outside the traffic allocation.
    pub fn not_in_split() -> Self {
        Evaluation {
            treatment: None,
            label: labels::NOT_IN_SPLIT.to_string(),
            change_number: None,
            config: None,
        }
    }

    pub fn control(label: impl Into<String>) -> Self {
        Evaluation::new(CONTROL, label)
    }

    pub fn with_change_number(mut self, change_number: i64) -> Self {
        self.change_number = Some(change_number);
        self
    }

    pub fn treatment(&self) -> &str {
        self.treatment.as_deref().unwrap_or(CONTROL)
    }
}

/// Callback used by dependency matchers and prerequisites to evaluate another split for the same
/// evaluation context.
pub trait SplitEvaluator: Send + Sync {
    fn evaluate_split<'a>(
        &'a self,
        context: EvaluationContext<'a>,
        split_name: &str,
    ) -> MaybeAsync<'a, Evaluation>;
}

const PREALLOCATED_SPLIT_CHAIN_SIZE: usize = 8;
const PREALLOCATED_SEGMENT_CHAIN_SIZE: usize = 8;

/// The splits and rule-based segments currently being evaluated, outermost first. Used to stop
/// definitions that depend on themselves.
#[derive(Clone, Debug)]
pub(crate) struct EvaluationStack {
    pub(crate) split_chain: HashSet<String>,
    pub(crate) segment_chain: HashSet<String>,
}

impl EvaluationStack {
    fn new() -> Self {
        Self {
            split_chain: HashSet::with_capacity(PREALLOCATED_SPLIT_CHAIN_SIZE),
            segment_chain: HashSet::with_capacity(PREALLOCATED_SEGMENT_CHAIN_SIZE),
        }
    }
}

impl Default for EvaluationStack {
    fn default() -> Self {
        Self::new()
    }
}

/// Everything an evaluation needs besides the compiled rules: the key, its attributes, the
/// storage to query, and the callback for dependent splits.
///
/// Contexts are cheap to clone and are moved into pending futures, so nothing evaluated
/// asynchronously borrows the compiled rules that started it.
#[derive(Clone)]
pub struct EvaluationContext<'a> {
    key: Cow<'a, Key>,
    attributes: Option<&'a Attributes>,
    storage: &'a dyn Storage,
    split_evaluator: Option<&'a dyn SplitEvaluator>,
    stack: EvaluationStack,
}

static DEFAULT_SPLIT_EVALUATOR: DefaultSplitEvaluator = DefaultSplitEvaluator;

impl fmt::Debug for EvaluationContext<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EvaluationContext")
            .field("key", &self.key)
            .field("attributes", &self.attributes)
            .field("stack", &self.stack)
            .finish_non_exhaustive()
    }
}

impl<'a> EvaluationContext<'a> {
    pub fn new(key: &'a Key, storage: &'a dyn Storage) -> Self {
        EvaluationContext {
            key: Cow::Borrowed(key),
            attributes: None,
            storage,
            split_evaluator: None,
            stack: EvaluationStack::default(),
        }
    }

    pub fn with_attributes(mut self, attributes: Option<&'a Attributes>) -> Self {
        self.attributes = attributes;
        self
    }

    /// Use `split_evaluator` for dependent splits instead of [DefaultSplitEvaluator].
    pub fn with_split_evaluator(mut self, split_evaluator: Option<&'a dyn SplitEvaluator>) -> Self {
        self.split_evaluator = split_evaluator;
        self
    }

    /// The same context evaluated for a different key.
    pub fn with_key(&self, key: Key) -> Self {
        EvaluationContext {
            key: Cow::Owned(key),
            ..self.clone()
        }
    }

    pub fn key(&self) -> &Key {
        &self.key
    }

    pub fn attributes(&self) -> Option<&'a Attributes> {
        self.attributes
    }

    pub fn storage(&self) -> &'a dyn Storage {
        self.storage
    }

    pub fn split_evaluator(&self) -> &'a dyn SplitEvaluator {
        self.split_evaluator.unwrap_or(&DEFAULT_SPLIT_EVALUATOR)
    }

    /// A child context for evaluating `split_name`, or None if that split is already being
    /// evaluated further up the stack.
    pub(crate) fn enter_split(&self, split_name: &str) -> Option<Self> {
        if self.stack.split_chain.contains(split_name) {
            warn!(
                "dependency on split {} caused a circular reference; this is probably a temporary condition due to an incomplete update",
                split_name
            );
            return None;
        }
        let mut child = self.clone();
        child.stack.split_chain.insert(split_name.to_string());
        Some(child)
    }

    /// A child context for evaluating the rule-based segment `segment_name`, or None if that
    /// segment is already being evaluated further up the stack.
    pub(crate) fn enter_rule_based_segment(&self, segment_name: &str) -> Option<Self> {
        if self.stack.segment_chain.contains(segment_name) {
            warn!(
                "rule-based segment {} caused a circular reference; this is probably a temporary condition due to an incomplete update",
                segment_name
            );
            return None;
        }
        let mut child = self.clone();
        child.stack.segment_chain.insert(segment_name.to_string());
        Some(child)
    }
}
