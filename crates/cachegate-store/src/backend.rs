//! Object-store adapter seam.

use serde::{Deserialize, Serialize};

use crate::StoreError;

/// Diagnostic target checked when a read is answered with 403.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "target", rename_all = "lowercase")]
pub enum ProbeTarget {
    /// An object key in the same bucket, fetched with signed credentials
    Key(String),
    /// A fixed URL, fetched without credentials
    Url(String),
}

impl std::fmt::Display for ProbeTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProbeTarget::Key(key) => write!(f, "key:{}", key),
            ProbeTarget::Url(url) => write!(f, "url:{}", url),
        }
    }
}

/// Minimal object-store operations needed for completion markers.
///
/// Implementations return `Ok(())` for success and a classified
/// [`StoreError`] otherwise; they never report a missing object as success.
pub trait ObjectStore {
    /// Check that an object exists.
    fn head(&self, key: &str) -> Result<(), StoreError>;

    /// Write a zero-byte object, replacing any existing one.
    fn put_empty(&self, key: &str) -> Result<(), StoreError>;

    /// Delete an object. Deleting a missing object is not an error.
    fn delete(&self, key: &str) -> Result<(), StoreError>;

    /// Fetch a diagnostic target.
    fn probe(&self, target: &ProbeTarget) -> Result<(), StoreError>;
}
