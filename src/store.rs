use thiserror::Error;

use crate::maybe_async::MaybeAsync;
use crate::rule_based_segment::RuleBasedSegment;
use crate::split::Split;

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum StorageError {
    #[error("storage backend failed: {0}")]
    Backend(String),
}

/// Storage is the read-only view of flag and segment data that evaluation depends on.
///
/// Implementations may answer synchronously ([MaybeAsync::Ready]) or asynchronously
/// ([MaybeAsync::Pending]); evaluation only becomes asynchronous when some answer it needs is
/// pending. Returned futures may borrow the storage but not the arguments, so implementations
/// that answer asynchronously must copy the names and keys they need.
pub trait Storage: Send + Sync {
    /// Retrieve the split with name `split_name`.
    fn split(&self, split_name: &str) -> MaybeAsync<'_, Result<Option<Split>, StorageError>>;

    /// Whether `key` is a member of the segment `segment_name`.
    fn is_in_segment(
        &self,
        segment_name: &str,
        key: &str,
    ) -> MaybeAsync<'_, Result<bool, StorageError>>;

    /// Whether `key` is a member of the large segment `segment_name`. Storages without large
    /// segment support report no members.
    fn is_in_large_segment(
        &self,
        _segment_name: &str,
        _key: &str,
    ) -> MaybeAsync<'_, Result<bool, StorageError>> {
        MaybeAsync::Ready(Ok(false))
    }

    /// Retrieve the rule-based segment with name `segment_name`.
    fn rule_based_segment(
        &self,
        segment_name: &str,
    ) -> MaybeAsync<'_, Result<Option<RuleBasedSegment>, StorageError>>;
}
