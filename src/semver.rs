use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use lazy_static::lazy_static;
use regex::Regex;
use thiserror::Error;

lazy_static! {
    static ref NUMERIC_IDENTIFIER_REGEX: Regex = Regex::new(r"^[0-9]+$").unwrap();
}

const METADATA_DELIMITER: char = '+';
const PRE_RELEASE_DELIMITER: char = '-';
const VALUE_DELIMITER: char = '.';

/// Reasons a version string cannot be parsed into a [Semver].
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum SemverError {
    #[error("unable to convert to semver, empty build metadata: {0}")]
    EmptyMetadata(String),
    #[error("unable to convert to semver, empty pre-release identifier: {0}")]
    EmptyPreRelease(String),
    #[error("unable to convert to semver, expected major.minor.patch: {0}")]
    InvalidVersionCore(String),
}

/// A semantic version, parsed from `major.minor.patch[-pre.release][+build.metadata]`.
///
/// Numeric identifiers are canonicalized by stripping leading zeros, and are kept as strings so
/// arbitrarily large components compare correctly. Ordering ignores build metadata; equality
/// follows ordering, while [Semver::version] is the canonical string including metadata.
#[derive(Clone, Debug)]
pub struct Semver {
    major: String,
    minor: String,
    patch: String,
    pre_release: Vec<String>,
    is_stable: bool,
    version: String,
}

impl Semver {
    pub fn parse(version: &str) -> Result<Semver, SemverError> {
        let (without_metadata, metadata) = match version.split_once(METADATA_DELIMITER) {
            Some((_, "")) => return Err(SemverError::EmptyMetadata(version.to_string())),
            Some((v, metadata)) => (v, Some(metadata)),
            None => (version, None),
        };

        let (core, pre_release) = match without_metadata.split_once(PRE_RELEASE_DELIMITER) {
            Some((core, pre_release)) => {
                let identifiers = pre_release
                    .split(VALUE_DELIMITER)
                    .map(|identifier| {
                        if identifier.is_empty() {
                            Err(SemverError::EmptyPreRelease(version.to_string()))
                        } else if is_numeric_identifier(identifier) {
                            Ok(sanitize_numeric_identifier(identifier))
                        } else {
                            Ok(identifier.to_string())
                        }
                    })
                    .collect::<Result<Vec<_>, _>>()?;
                (core, identifiers)
            }
            None => (without_metadata, Vec::new()),
        };

        let parts = core
            .split(VALUE_DELIMITER)
            .map(|part| {
                if is_numeric_identifier(part) {
                    Ok(sanitize_numeric_identifier(part))
                } else {
                    Err(SemverError::InvalidVersionCore(version.to_string()))
                }
            })
            .collect::<Result<Vec<_>, _>>()?;

        let [major, minor, patch]: [String; 3] = parts
            .try_into()
            .map_err(|_| SemverError::InvalidVersionCore(version.to_string()))?;

        let mut canonical = format!("{}.{}.{}", major, minor, patch);
        if !pre_release.is_empty() {
            canonical.push(PRE_RELEASE_DELIMITER);
            canonical.push_str(&pre_release.join("."));
        }
        if let Some(metadata) = metadata {
            canonical.push(METADATA_DELIMITER);
            canonical.push_str(metadata);
        }

        Ok(Semver {
            major,
            minor,
            patch,
            is_stable: pre_release.is_empty(),
            pre_release,
            version: canonical,
        })
    }

    /// The canonical form of this version, including build metadata.
    pub fn version(&self) -> &str {
        &self.version
    }

    /// True when the version has no pre-release identifiers.
    pub fn is_stable(&self) -> bool {
        self.is_stable
    }

    pub fn compare(&self, other: &Semver) -> Ordering {
        if self.version == other.version {
            return Ordering::Equal;
        }

        compare_identifiers(&self.major, &other.major)
            .then_with(|| compare_identifiers(&self.minor, &other.minor))
            .then_with(|| compare_identifiers(&self.patch, &other.patch))
            // any pre-release sorts before the stable release
            .then_with(|| self.is_stable.cmp(&other.is_stable))
            .then_with(|| {
                self.pre_release
                    .iter()
                    .zip(&other.pre_release)
                    .map(|(a, b)| compare_identifiers(a, b))
                    .find(|ordering| ordering.is_ne())
                    .unwrap_or(Ordering::Equal)
            })
            .then_with(|| self.pre_release.len().cmp(&other.pre_release.len()))
    }
}

impl FromStr for Semver {
    type Err = SemverError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Semver::parse(s)
    }
}

impl fmt::Display for Semver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.version)
    }
}

impl PartialEq for Semver {
    fn eq(&self, other: &Self) -> bool {
        self.compare(other).is_eq()
    }
}

impl Eq for Semver {}

impl PartialOrd for Semver {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Semver {
    fn cmp(&self, other: &Self) -> Ordering {
        self.compare(other)
    }
}

fn is_numeric_identifier(value: &str) -> bool {
    NUMERIC_IDENTIFIER_REGEX.is_match(value)
}

fn sanitize_numeric_identifier(value: &str) -> String {
    let trimmed = value.trim_start_matches('0');
    if trimmed.is_empty() {
        "0".to_string()
    } else {
        trimmed.to_string()
    }
}

// Numeric identifiers compare by value (length, then digits, on canonical strings); everything
// else compares by ASCII order.
fn compare_identifiers(a: &str, b: &str) -> Ordering {
    if is_numeric_identifier(a) && is_numeric_identifier(b) {
        a.len().cmp(&b.len()).then_with(|| a.cmp(b))
    } else {
        a.cmp(b)
    }
}
