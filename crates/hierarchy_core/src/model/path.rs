//! Materialized hierarchy path value.
//!
//! # Responsibility
//! - Encode one account's ancestry as `/`-delimited ancestor ids.
//! - Answer level, ancestor and descendant questions without touching storage.
//!
//! # Invariants
//! - Every path starts and ends with `/`; the root path is exactly `/`.
//! - Equality, ordering and hashing follow the ordinal string encoding, so a
//!   sort by path always places a parent before its descendants.

use serde::{Deserialize, Serialize};
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::str::FromStr;

/// Segment delimiter used by the path encoding.
pub const PATH_DELIMITER: char = '/';

/// Errors raised while constructing or rewriting paths.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PathError {
    /// Raw value is empty or whitespace only.
    Empty,
    /// Raw value does not start and end with `/`.
    MissingDelimiters(String),
    /// Prefix substitution was requested with a prefix the path does not carry.
    NotPrefixed { path: String, prefix: String },
}

impl Display for PathError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Empty => write!(f, "hierarchy path must not be empty"),
            Self::MissingDelimiters(raw) => {
                write!(f, "hierarchy path must start and end with '/': `{raw}`")
            }
            Self::NotPrefixed { path, prefix } => {
                write!(f, "hierarchy path `{path}` does not start with `{prefix}`")
            }
        }
    }
}

impl Error for PathError {}

/// Immutable materialized path, e.g. `/`, `/1/`, `/1/7/`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct HierarchyPath(String);

impl HierarchyPath {
    /// Parses a raw path string.
    ///
    /// # Errors
    /// - `PathError::Empty` for blank input.
    /// - `PathError::MissingDelimiters` unless `raw` starts and ends with `/`.
    pub fn new(raw: impl Into<String>) -> Result<Self, PathError> {
        let raw = raw.into();
        if raw.trim().is_empty() {
            return Err(PathError::Empty);
        }
        if !raw.starts_with(PATH_DELIMITER) || !raw.ends_with(PATH_DELIMITER) {
            return Err(PathError::MissingDelimiters(raw));
        }
        Ok(Self(raw))
    }

    /// Canonical root path `/`.
    pub fn root() -> Self {
        Self(PATH_DELIMITER.to_string())
    }

    /// Builds `parent_path + child_id + "/"`.
    pub fn build_child_path(parent_path: &HierarchyPath, child_id: i64) -> Self {
        Self(format!("{}{child_id}{PATH_DELIMITER}", parent_path.0))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_root(&self) -> bool {
        self.0.len() == 1
    }

    /// Number of `/` characters minus one. Root is level 0.
    pub fn level(&self) -> usize {
        self.0.matches(PATH_DELIMITER).count() - 1
    }

    /// Iterates ancestor-id segments from the top of the tree down.
    ///
    /// Yields exactly `level()` items; the root yields none.
    pub fn segments(&self) -> impl Iterator<Item = &str> {
        let inner = if self.is_root() {
            None
        } else {
            Some(&self.0[1..self.0.len() - 1])
        };
        inner.into_iter().flat_map(|value| value.split(PATH_DELIMITER))
    }

    /// True iff this path starts with `ancestor` and differs from it.
    pub fn is_descendant_of(&self, ancestor: &HierarchyPath) -> bool {
        self.0.starts_with(ancestor.as_str()) && self.0 != ancestor.0
    }

    /// True iff this path equals `ancestor` or descends from it.
    pub fn is_within(&self, ancestor: &HierarchyPath) -> bool {
        self.0.starts_with(ancestor.as_str())
    }

    /// Drops the last `n` segments, falling back to root when too few remain.
    pub fn ancestor_at(&self, n: usize) -> Self {
        let segments = self.segments().collect::<Vec<_>>();
        if segments.len() <= n {
            return Self::root();
        }
        let kept = &segments[..segments.len() - n];
        Self(format!("/{}/", kept.join("/")))
    }

    /// Replaces the `old_prefix` head of this path with `new_prefix`,
    /// preserving the suffix unchanged.
    ///
    /// # Errors
    /// - `PathError::NotPrefixed` when this path does not start with `old_prefix`.
    pub fn rebase(
        &self,
        old_prefix: &HierarchyPath,
        new_prefix: &HierarchyPath,
    ) -> Result<Self, PathError> {
        let suffix = self
            .0
            .strip_prefix(old_prefix.as_str())
            .ok_or_else(|| PathError::NotPrefixed {
                path: self.0.clone(),
                prefix: old_prefix.0.clone(),
            })?;
        Ok(Self(format!("{}{suffix}", new_prefix.0)))
    }
}

impl Display for HierarchyPath {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for HierarchyPath {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl FromStr for HierarchyPath {
    type Err = PathError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl TryFrom<String> for HierarchyPath {
    type Error = PathError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<HierarchyPath> for String {
    fn from(value: HierarchyPath) -> Self {
        value.0
    }
}
