use serde::{Deserialize, Serialize};

/// The key an evaluation is performed for.
///
/// The matching key is what targeting rules compare against; the bucketing key, when present,
/// replaces it for every percentage-based decision so that several matching keys can share the
/// same buckets.
#[derive(Clone, Debug, Deserialize, Eq, Hash, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Key {
    matching_key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    bucketing_key: Option<String>,
}

impl Key {
    pub fn new(matching_key: impl Into<String>) -> Self {
        Key {
            matching_key: matching_key.into(),
            bucketing_key: None,
        }
    }

    pub fn with_bucketing_key(
        matching_key: impl Into<String>,
        bucketing_key: impl Into<String>,
    ) -> Self {
        Key {
            matching_key: matching_key.into(),
            bucketing_key: Some(bucketing_key.into()),
        }
    }

    pub fn matching_key(&self) -> &str {
        &self.matching_key
    }

    /// The key used for bucketing: the explicit bucketing key if set, the matching key otherwise.
    pub fn bucketing_key(&self) -> &str {
        self.bucketing_key.as_deref().unwrap_or(&self.matching_key)
    }
}

impl From<&str> for Key {
    fn from(matching_key: &str) -> Self {
        Key::new(matching_key)
    }
}

impl From<String> for Key {
    fn from(matching_key: String) -> Self {
        Key::new(matching_key)
    }
}
