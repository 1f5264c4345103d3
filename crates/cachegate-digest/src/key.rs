//! Completion cache keys
//!
//! Layout: `<namespace>/<owner>/<repo>/<digest>/<entry>`, with the marker
//! object stored one level below at `<key>/complete`.
//!
//! No component may contain a path separator, so distinct
//! `(owner, repo, digest, entry)` tuples can never join to the same key.

use serde::Serialize;
use std::fmt;
use std::str::FromStr;

use crate::engine::Digest;

/// Default top-level namespace for completion keys
pub const DEFAULT_NAMESPACE: &str = "digest";

/// Object name of the completion marker below a key
pub const MARKER_NAME: &str = "complete";

/// Key component validation errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum KeyError {
    #[error("Invalid {field} '{value}': {reason}")]
    InvalidComponent {
        field: &'static str,
        value: String,
        reason: &'static str,
    },
}

fn validate_component(field: &'static str, value: &str) -> Result<(), KeyError> {
    let reason = if value.is_empty() {
        Some("must not be empty")
    } else if value == "." || value == ".." {
        Some("must not be a relative path segment")
    } else if value.contains('/') || value.contains('\\') {
        Some("must not contain a path separator")
    } else if value.chars().any(char::is_control) {
        Some("must not contain control characters")
    } else {
        None
    };

    match reason {
        Some(reason) => Err(KeyError::InvalidComponent {
            field,
            value: value.to_string(),
            reason,
        }),
        None => Ok(()),
    }
}

/// Label of one build configuration or test shard.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct Entry(String);

impl Entry {
    pub fn new(label: impl Into<String>) -> Result<Self, KeyError> {
        let label = label.into();
        validate_component("entry", &label)?;
        Ok(Self(label))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl FromStr for Entry {
    type Err = KeyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Entry::new(s)
    }
}

impl fmt::Display for Entry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A fully qualified completion cache key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct CacheKey(String);

impl CacheKey {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Object key of the zero-byte completion marker.
    pub fn marker_key(&self) -> String {
        format!("{}/{}", self.0, MARKER_NAME)
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Repository-scoped key derivation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeySpace {
    namespace: String,
    owner: String,
    repo: String,
}

impl KeySpace {
    /// Create a key space for `owner/repo` under the default namespace.
    pub fn new(owner: &str, repo: &str) -> Result<Self, KeyError> {
        validate_component("repository owner", owner)?;
        validate_component("repository name", repo)?;
        Ok(Self {
            namespace: DEFAULT_NAMESPACE.to_string(),
            owner: owner.to_string(),
            repo: repo.to_string(),
        })
    }

    /// Use a different top-level namespace.
    pub fn with_namespace(mut self, namespace: &str) -> Result<Self, KeyError> {
        validate_component("namespace", namespace)?;
        self.namespace = namespace.to_string();
        Ok(self)
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn owner(&self) -> &str {
        &self.owner
    }

    pub fn repo(&self) -> &str {
        &self.repo
    }

    /// Derive the key for a digest and entry. Pure; performs no I/O.
    pub fn key_for(&self, digest: &Digest, entry: &Entry) -> CacheKey {
        CacheKey(format!(
            "{}/{}/{}/{}/{}",
            self.namespace, self.owner, self.repo, digest, entry
        ))
    }
}

/// One-shot key derivation under the default namespace.
pub fn key_from(
    digest: &Digest,
    entry: &str,
    repo_owner: &str,
    repo_name: &str,
) -> Result<CacheKey, KeyError> {
    let entry = Entry::new(entry)?;
    Ok(KeySpace::new(repo_owner, repo_name)?.key_for(digest, &entry))
}
