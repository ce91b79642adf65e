#![cfg(test)]

use std::collections::{HashMap, HashSet};

use crate::maybe_async::MaybeAsync;
use crate::rule_based_segment::RuleBasedSegment;
use crate::split::Split;
use crate::store::{Storage, StorageError};

/// In-memory storage that answers every query synchronously.
#[derive(Clone, Default)]
pub struct TestStorage {
    splits: HashMap<String, Split>,
    segments: HashMap<String, HashSet<String>>,
    large_segments: HashMap<String, HashSet<String>>,
    rule_based_segments: HashMap<String, RuleBasedSegment>,
}

impl TestStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_split(mut self, split: serde_json::Value) -> Self {
        let split: Split = serde_json::from_value(split).unwrap();
        self.splits.insert(split.name.clone(), split);
        self
    }

    pub fn with_segment(mut self, name: &str, keys: &[&str]) -> Self {
        self.segments
            .insert(name.to_string(), keys.iter().map(|k| k.to_string()).collect());
        self
    }

    pub fn with_large_segment(mut self, name: &str, keys: &[&str]) -> Self {
        self.large_segments
            .insert(name.to_string(), keys.iter().map(|k| k.to_string()).collect());
        self
    }

    pub fn with_rule_based_segment(mut self, segment: serde_json::Value) -> Self {
        let segment: RuleBasedSegment = serde_json::from_value(segment).unwrap();
        self.rule_based_segments
            .insert(segment.name.clone(), segment);
        self
    }
}

fn is_member(segments: &HashMap<String, HashSet<String>>, name: &str, key: &str) -> bool {
    segments
        .get(name)
        .map(|keys| keys.contains(key))
        .unwrap_or(false)
}

impl Storage for TestStorage {
    fn split(&self, split_name: &str) -> MaybeAsync<'_, Result<Option<Split>, StorageError>> {
        MaybeAsync::Ready(Ok(self.splits.get(split_name).cloned()))
    }

    fn is_in_segment(
        &self,
        segment_name: &str,
        key: &str,
    ) -> MaybeAsync<'_, Result<bool, StorageError>> {
        MaybeAsync::Ready(Ok(is_member(&self.segments, segment_name, key)))
    }

    fn is_in_large_segment(
        &self,
        segment_name: &str,
        key: &str,
    ) -> MaybeAsync<'_, Result<bool, StorageError>> {
        MaybeAsync::Ready(Ok(is_member(&self.large_segments, segment_name, key)))
    }

    fn rule_based_segment(
        &self,
        segment_name: &str,
    ) -> MaybeAsync<'_, Result<Option<RuleBasedSegment>, StorageError>> {
        MaybeAsync::Ready(Ok(self.rule_based_segments.get(segment_name).cloned()))
    }
}

/// Wraps a [TestStorage] so that every answer is pending.
pub struct AsyncStorage {
    inner: TestStorage,
}

impl AsyncStorage {
    pub fn new(inner: TestStorage) -> Self {
        AsyncStorage { inner }
    }

    pub fn inner(&self) -> &TestStorage {
        &self.inner
    }
}

fn defer<'a, T: Send + 'a>(result: MaybeAsync<'a, T>) -> MaybeAsync<'a, T> {
    MaybeAsync::Pending(result.into_future())
}

impl Storage for AsyncStorage {
    fn split(&self, split_name: &str) -> MaybeAsync<'_, Result<Option<Split>, StorageError>> {
        defer(self.inner.split(split_name))
    }

    fn is_in_segment(
        &self,
        segment_name: &str,
        key: &str,
    ) -> MaybeAsync<'_, Result<bool, StorageError>> {
        defer(self.inner.is_in_segment(segment_name, key))
    }

    fn is_in_large_segment(
        &self,
        segment_name: &str,
        key: &str,
    ) -> MaybeAsync<'_, Result<bool, StorageError>> {
        defer(self.inner.is_in_large_segment(segment_name, key))
    }

    fn rule_based_segment(
        &self,
        segment_name: &str,
    ) -> MaybeAsync<'_, Result<Option<RuleBasedSegment>, StorageError>> {
        defer(self.inner.rule_based_segment(segment_name))
    }
}

/// Storage whose every query fails.
pub struct FailingStorage;

fn unavailable<'a, T>() -> MaybeAsync<'a, Result<T, StorageError>> {
    MaybeAsync::Ready(Err(StorageError::Backend("unavailable".to_string())))
}

impl Storage for FailingStorage {
    fn split(&self, _split_name: &str) -> MaybeAsync<'_, Result<Option<Split>, StorageError>> {
        unavailable()
    }

    fn is_in_segment(
        &self,
        _segment_name: &str,
        _key: &str,
    ) -> MaybeAsync<'_, Result<bool, StorageError>> {
        unavailable()
    }

    fn is_in_large_segment(
        &self,
        _segment_name: &str,
        _key: &str,
    ) -> MaybeAsync<'_, Result<bool, StorageError>> {
        unavailable()
    }

    fn rule_based_segment(
        &self,
        _segment_name: &str,
    ) -> MaybeAsync<'_, Result<Option<RuleBasedSegment>, StorageError>> {
        unavailable()
    }
}
