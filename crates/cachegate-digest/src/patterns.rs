//! Digest types and the file-pattern families they select.
//!
//! Every digest is computed over the same base families (native sources,
//! public headers, build configuration, Python API). The digest type decides
//! whether test files and the legacy single-client subtree take part.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::DigestError;

/// Native sources, public headers, build configuration and the Python API.
const BASE_INCLUDES: &[&str] = &[
    "csrc/**/*.{c,cc,cpp,cu,cuh,h,hpp}",
    "include/**/*.{h,hpp,cuh}",
    "CMakeLists.txt",
    "cmake/**/*.cmake",
    "setup.py",
    "pyproject.toml",
    "python/**/*.{py,pyi}",
    "single_client/**/*.{py,cpp,h}",
];

/// Generated and packaged artifacts that must never influence a digest.
const BASE_EXCLUDES: &[&str] = &[
    "**/build/**",
    "**/*.egg-info/**",
    "**/__pycache__/**",
    "dist/**",
    "python/**/_generated/**",
];

/// Documentation and CI test drivers, only relevant once tests run.
const TEST_INCLUDES: &[&str] = &["docs/**/*.{md,rst}", ".ci/test/**/*.{sh,py}"];

const TEST_EXCLUDES: &[&str] = &["python/*/tests/**", "single_client/tests/**"];

const SINGLE_CLIENT_EXCLUDES: &[&str] = &["single_client/**"];

/// Which flavour of digest to compute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DigestType {
    /// Sources needed to build; never includes tests
    Build,
    /// Build inputs plus tests and test drivers
    Test,
    /// Test inputs plus the legacy single-client subtree
    SingleClientTest,
}

impl DigestType {
    pub const ALL: [DigestType; 3] = [
        DigestType::Build,
        DigestType::Test,
        DigestType::SingleClientTest,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            DigestType::Build => "build",
            DigestType::Test => "test",
            DigestType::SingleClientTest => "single-client-test",
        }
    }

    /// Pattern selection switches for this type.
    pub fn options(&self) -> DigestOptions {
        match self {
            DigestType::Build => DigestOptions {
                include_tests: false,
                include_single_client: false,
            },
            DigestType::Test => DigestOptions {
                include_tests: true,
                include_single_client: false,
            },
            DigestType::SingleClientTest => DigestOptions {
                include_tests: true,
                include_single_client: true,
            },
        }
    }
}

impl fmt::Display for DigestType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DigestType {
    type Err = DigestError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "build" => Ok(DigestType::Build),
            "test" => Ok(DigestType::Test),
            "single-client-test" => Ok(DigestType::SingleClientTest),
            _ => Err(DigestError::UnsupportedDigestType(s.to_string())),
        }
    }
}

/// Switches that select pattern families.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DigestOptions {
    pub include_tests: bool,
    pub include_single_client: bool,
}

/// Configurable pattern families, all anchored at the source root.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PatternProfile {
    pub base_includes: Vec<String>,
    pub base_excludes: Vec<String>,
    pub test_includes: Vec<String>,
    pub test_excludes: Vec<String>,
    pub single_client_excludes: Vec<String>,
}

impl Default for PatternProfile {
    fn default() -> Self {
        fn owned(patterns: &[&str]) -> Vec<String> {
            patterns.iter().map(|p| p.to_string()).collect()
        }

        Self {
            base_includes: owned(BASE_INCLUDES),
            base_excludes: owned(BASE_EXCLUDES),
            test_includes: owned(TEST_INCLUDES),
            test_excludes: owned(TEST_EXCLUDES),
            single_client_excludes: owned(SINGLE_CLIENT_EXCLUDES),
        }
    }
}

/// Concrete include and exclude lists for one digest computation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PatternSet {
    pub includes: Vec<String>,
    pub excludes: Vec<String>,
}

impl PatternSet {
    /// Select pattern families from a profile.
    ///
    /// Excluding the single-client subtree wins over any test inclusion for
    /// files inside it, because exclusions always beat inclusions.
    pub fn build(profile: &PatternProfile, options: DigestOptions) -> Self {
        let mut includes = profile.base_includes.clone();
        let mut excludes = profile.base_excludes.clone();

        if options.include_tests {
            includes.extend(profile.test_includes.iter().cloned());
        } else {
            excludes.extend(profile.test_excludes.iter().cloned());
        }

        if !options.include_single_client {
            excludes.extend(profile.single_client_excludes.iter().cloned());
        }

        Self { includes, excludes }
    }

    /// Render as newline-joined glob text, exclusions prefixed with `!`.
    pub fn to_pattern_text(&self) -> String {
        self.includes
            .iter()
            .cloned()
            .chain(self.excludes.iter().map(|p| format!("!{}", p)))
            .collect::<Vec<_>>()
            .join("\n")
    }
}
