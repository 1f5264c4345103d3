//! Source-tree digests and completion cache keys
//!
//! Computes deterministic SHA-256 digests over curated file sets of a
//! native-code project and derives the hierarchical keys under which build
//! and test completion markers are stored.
//!
//! Nothing in this crate performs network I/O.

pub mod engine;
pub mod error;
pub mod key;
pub mod matcher;
pub mod patterns;

pub use engine::{Digest, DigestEngine, DigestReport, FileDigest};
pub use error::DigestError;
pub use key::{key_from, CacheKey, Entry, KeyError, KeySpace, DEFAULT_NAMESPACE, MARKER_NAME};
pub use matcher::{FileMatcher, MatchedFiles};
pub use patterns::{DigestOptions, DigestType, PatternProfile, PatternSet};
