//! Digest engine
//!
//! Computes one SHA-256 digest over the files selected by a pattern set.
//! Each selected file is hashed on its own, then the sorted list of
//! `(file hash, relative path)` pairs is hashed again. The result depends only
//! on paths and bytes; mtimes, permissions and walk order play no part.

use serde::{Deserialize, Serialize};
use sha2::{Digest as _, Sha256};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::matcher::FileMatcher;
use crate::patterns::{DigestOptions, PatternProfile, PatternSet};
use crate::DigestError;

/// A hex-encoded SHA-256 content digest.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Digest(String);

impl Digest {
    /// Length of a hex-encoded SHA-256 digest
    pub const HEX_LEN: usize = 64;

    /// Validate and wrap an existing hex digest.
    pub fn from_hex(hex: &str) -> Result<Self, DigestError> {
        let valid = hex.len() == Self::HEX_LEN
            && hex.bytes().all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b));
        if !valid {
            return Err(DigestError::InvalidDigest(hex.to_string()));
        }
        Ok(Self(hex.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// First 12 characters, for log lines.
    pub fn short(&self) -> &str {
        &self.0[..12]
    }
}

impl fmt::Display for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Hash of one file that took part in a digest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileDigest {
    pub path: String,
    pub size: u64,
    pub sha256: String,
}

/// A digest together with the files it covers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DigestReport {
    pub digest: Digest,
    pub files: Vec<FileDigest>,
}

/// Computes digests over a source tree.
#[derive(Debug, Clone)]
pub struct DigestEngine {
    root: PathBuf,
    profile: PatternProfile,
}

impl DigestEngine {
    /// Create an engine for `root` with the default pattern profile.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            profile: PatternProfile::default(),
        }
    }

    /// Replace the pattern profile.
    pub fn with_profile(mut self, profile: PatternProfile) -> Self {
        self.profile = profile;
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn profile(&self) -> &PatternProfile {
        &self.profile
    }

    /// Pattern set used for the given options.
    pub fn pattern_set(&self, options: DigestOptions) -> PatternSet {
        PatternSet::build(&self.profile, options)
    }

    /// Compute the digest for the given options.
    pub fn compute(&self, options: DigestOptions) -> Result<Digest, DigestError> {
        Ok(self.compute_report(options)?.digest)
    }

    /// Compute the digest and keep the per-file hashes.
    ///
    /// Fails with [`DigestError::NoMatch`] when any include pattern selects
    /// nothing, so a moved directory cannot silently shrink the file set.
    pub fn compute_report(&self, options: DigestOptions) -> Result<DigestReport, DigestError> {
        let patterns = self.pattern_set(options);
        let matcher = FileMatcher::parse(&patterns.to_pattern_text())?;
        let matched = matcher.collect(&self.root)?;

        if let Some(pattern) = matched.unmatched_includes.into_iter().next() {
            return Err(DigestError::NoMatch { pattern });
        }

        let mut combined = Sha256::new();
        let mut files = Vec::with_capacity(matched.files.len());

        // Paths cannot contain NUL, so it terminates each record unambiguously.
        for rel_path in matched.files {
            let contents = fs::read(self.root.join(&rel_path))?;
            let sha256 = hex::encode(Sha256::digest(&contents));

            combined.update(sha256.as_bytes());
            combined.update(b"  ");
            combined.update(rel_path.as_bytes());
            combined.update(b"\0");

            files.push(FileDigest {
                path: rel_path,
                size: contents.len() as u64,
                sha256,
            });
        }

        let digest = Digest(hex::encode(combined.finalize()));
        debug!(files = files.len(), root = %self.root.display(), "hashed source tree");
        info!(
            digest = %digest.short(),
            include_tests = options.include_tests,
            include_single_client = options.include_single_client,
            "computed digest"
        );

        Ok(DigestReport { digest, files })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn profile() -> PatternProfile {
        PatternProfile {
            base_includes: vec!["src/**/*.cpp".to_string()],
            base_excludes: vec!["src/gen/**".to_string()],
            test_includes: vec!["tests/**".to_string()],
            test_excludes: vec!["src/**/test_*.cpp".to_string()],
            single_client_excludes: vec!["src/legacy/**".to_string()],
        }
    }

    fn tree() -> TempDir {
        let dir = TempDir::new().unwrap();
        fs::create_dir_all(dir.path().join("src/gen")).unwrap();
        fs::create_dir_all(dir.path().join("src/legacy")).unwrap();
        fs::create_dir_all(dir.path().join("tests")).unwrap();
        fs::write(dir.path().join("src/core.cpp"), "int core();").unwrap();
        fs::write(dir.path().join("src/test_core.cpp"), "test").unwrap();
        fs::write(dir.path().join("src/gen/out.cpp"), "generated").unwrap();
        fs::write(dir.path().join("src/legacy/old.cpp"), "old").unwrap();
        fs::write(dir.path().join("tests/run.sh"), "#!/bin/sh").unwrap();
        dir
    }

    fn engine(dir: &TempDir) -> DigestEngine {
        DigestEngine::new(dir.path()).with_profile(profile())
    }

    #[test]
    fn test_digest_is_hex_sha256() {
        let dir = tree();
        let digest = engine(&dir).compute(DigestOptions::default()).unwrap();

        assert_eq!(digest.as_str().len(), Digest::HEX_LEN);
        assert!(Digest::from_hex(digest.as_str()).is_ok());
    }

    #[test]
    fn test_report_lists_selected_files_only() {
        let dir = tree();
        let report = engine(&dir).compute_report(DigestOptions::default()).unwrap();
        let paths: Vec<_> = report.files.iter().map(|f| f.path.as_str()).collect();

        assert_eq!(paths, vec!["src/core.cpp"]);
    }

    #[test]
    fn test_options_change_file_set() {
        let dir = tree();
        let report = engine(&dir)
            .compute_report(DigestOptions {
                include_tests: true,
                include_single_client: true,
            })
            .unwrap();
        let paths: Vec<_> = report.files.iter().map(|f| f.path.as_str()).collect();

        assert_eq!(
            paths,
            vec!["src/core.cpp", "src/legacy/old.cpp", "src/test_core.cpp", "tests/run.sh"]
        );
    }

    #[test]
    fn test_no_match_is_error() {
        let dir = tree();
        fs::remove_dir_all(dir.path().join("tests")).unwrap();

        let err = engine(&dir)
            .compute(DigestOptions {
                include_tests: true,
                include_single_client: false,
            })
            .unwrap_err();

        assert!(matches!(err, DigestError::NoMatch { ref pattern } if pattern == "tests/**"));
    }

    #[test]
    fn test_from_hex_rejects_bad_input() {
        assert!(Digest::from_hex("abc").is_err());
        assert!(Digest::from_hex(&"G".repeat(64)).is_err());
        assert!(Digest::from_hex(&"A".repeat(64)).is_err());
        assert!(Digest::from_hex(&"a".repeat(64)).is_ok());
    }
}
