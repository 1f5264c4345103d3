//! Errors for digest computation.

use std::io;
use std::path::PathBuf;

/// Errors raised while selecting files or hashing them.
#[derive(Debug, thiserror::Error)]
pub enum DigestError {
    /// An include pattern matched nothing in the source tree. This almost
    /// always means a directory moved and the pattern profile is stale.
    #[error("No files matched include pattern: {pattern}")]
    NoMatch { pattern: String },

    #[error("Unsupported digest type: {0} (expected build, test or single-client-test)")]
    UnsupportedDigestType(String),

    #[error("Invalid digest '{0}': expected 64 lowercase hex characters")]
    InvalidDigest(String),

    #[error("IO error: {0}")]
    IoError(#[from] io::Error),

    #[error("Walk error: {0}")]
    WalkError(#[from] walkdir::Error),

    #[error("Glob pattern error: {0}")]
    GlobError(#[from] globset::Error),

    #[error("Path is not within source root: {0}")]
    PathNotInRoot(PathBuf),

    #[error("Path is not valid UTF-8: {}", .0.display())]
    NonUtf8Path(PathBuf),
}
