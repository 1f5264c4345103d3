//! Glob matching over a source tree
//!
//! Accepts newline-joined pattern text where `!`-prefixed lines are
//! exclusions. `*` and `?` never cross a `/`; `**` spans directories.

use globset::{GlobBuilder, GlobSet, GlobSetBuilder};
use std::path::Path;
use walkdir::WalkDir;

use crate::DigestError;

/// Directories never descended into, regardless of patterns.
const PRUNED_DIRS: &[&str] = &[".git"];

/// Compiled include and exclude patterns.
#[derive(Debug)]
pub struct FileMatcher {
    include_patterns: Vec<String>,
    includes: GlobSet,
    excludes: GlobSet,
}

/// Files selected by a [`FileMatcher`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MatchedFiles {
    /// `/`-separated paths relative to the root, sorted bytewise
    pub files: Vec<String>,
    /// Include patterns that matched no file before exclusions were applied
    pub unmatched_includes: Vec<String>,
}

impl FileMatcher {
    /// Parse newline-joined pattern text.
    ///
    /// Blank lines and `#` comments are ignored.
    pub fn parse(text: &str) -> Result<Self, DigestError> {
        let mut includes = Vec::new();
        let mut excludes = Vec::new();

        for line in text.lines().map(str::trim) {
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            match line.strip_prefix('!') {
                Some(negated) => excludes.push(negated.trim().to_string()),
                None => includes.push(line.to_string()),
            }
        }

        Self::new(&includes, &excludes)
    }

    /// Compile explicit include and exclude lists.
    pub fn new(includes: &[String], excludes: &[String]) -> Result<Self, DigestError> {
        Ok(Self {
            include_patterns: includes.to_vec(),
            includes: compile(includes)?,
            excludes: compile(excludes)?,
        })
    }

    pub fn include_patterns(&self) -> &[String] {
        &self.include_patterns
    }

    /// Check a single relative path against the compiled patterns.
    pub fn is_selected(&self, rel_path: &str) -> bool {
        self.includes.is_match(rel_path) && !self.excludes.is_match(rel_path)
    }

    /// Walk `root` and collect every regular file that matches an include
    /// pattern and no exclude pattern.
    pub fn collect(&self, root: &Path) -> Result<MatchedFiles, DigestError> {
        let mut hits = vec![0usize; self.include_patterns.len()];
        let mut files = Vec::new();

        let walker = WalkDir::new(root)
            .follow_links(false)
            .sort_by(|a, b| a.file_name().cmp(b.file_name()))
            .into_iter()
            .filter_entry(|e| {
                !(e.file_type().is_dir()
                    && PRUNED_DIRS.iter().any(|d| e.file_name() == *d))
            });

        for entry in walker {
            let entry = entry?;
            if !entry.file_type().is_file() {
                continue;
            }

            let rel_path = entry
                .path()
                .strip_prefix(root)
                .map_err(|_| DigestError::PathNotInRoot(entry.path().to_path_buf()))?;
            let rel = to_slash_path(rel_path)?;

            let matched = self.includes.matches(&rel);
            if matched.is_empty() {
                continue;
            }
            for idx in &matched {
                hits[*idx] += 1;
            }

            if !self.excludes.is_match(&rel) {
                files.push(rel);
            }
        }

        files.sort();

        let unmatched_includes = self
            .include_patterns
            .iter()
            .zip(&hits)
            .filter(|(_, count)| **count == 0)
            .map(|(pattern, _)| pattern.clone())
            .collect();

        Ok(MatchedFiles {
            files,
            unmatched_includes,
        })
    }
}

fn compile(patterns: &[String]) -> Result<GlobSet, DigestError> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        builder.add(GlobBuilder::new(pattern).literal_separator(true).build()?);
    }
    Ok(builder.build()?)
}

/// Manifest paths must be exact, so names that are not UTF-8 are rejected
/// rather than lossily converted.
fn to_slash_path(path: &Path) -> Result<String, DigestError> {
    let parts = path
        .components()
        .map(|c| c.as_os_str().to_str())
        .collect::<Option<Vec<_>>>()
        .ok_or_else(|| DigestError::NonUtf8Path(path.to_path_buf()))?;
    Ok(parts.join("/"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn write(root: &Path, rel: &str, contents: &str) {
        let path = root.join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, contents).unwrap();
    }

    #[test]
    fn test_parse_splits_negations() {
        let matcher = FileMatcher::parse("src/**\n# comment\n\n!src/gen/**\n").unwrap();

        assert_eq!(matcher.include_patterns(), &["src/**".to_string()]);
        assert!(matcher.is_selected("src/lib.cpp"));
        assert!(!matcher.is_selected("src/gen/out.cpp"));
    }

    #[test]
    fn test_star_does_not_cross_directories() {
        let matcher = FileMatcher::parse("*.txt").unwrap();

        assert!(matcher.is_selected("notes.txt"));
        assert!(!matcher.is_selected("docs/notes.txt"));
    }

    #[test]
    fn test_double_star_matches_zero_directories() {
        let matcher = FileMatcher::parse("**/build/**").unwrap();

        assert!(matcher.is_selected("build/out.o"));
        assert!(matcher.is_selected("python/pkg/build/lib.so"));
    }

    #[test]
    fn test_alternation() {
        let matcher = FileMatcher::parse("csrc/**/*.{cpp,h}").unwrap();

        assert!(matcher.is_selected("csrc/ops/add.cpp"));
        assert!(matcher.is_selected("csrc/add.h"));
        assert!(!matcher.is_selected("csrc/add.py"));
    }

    #[test]
    fn test_collect_sorted_and_filtered() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "src/b.cpp", "b");
        write(dir.path(), "src/a.cpp", "a");
        write(dir.path(), "src/gen/x.cpp", "x");
        write(dir.path(), "README.md", "readme");

        let matcher = FileMatcher::parse("src/**/*.cpp\n!src/gen/**").unwrap();
        let matched = matcher.collect(dir.path()).unwrap();

        assert_eq!(matched.files, vec!["src/a.cpp", "src/b.cpp"]);
        assert!(matched.unmatched_includes.is_empty());
    }

    #[test]
    fn test_unmatched_include_reported() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "src/a.cpp", "a");

        let matcher = FileMatcher::parse("src/**/*.cpp\ninclude/**/*.h").unwrap();
        let matched = matcher.collect(dir.path()).unwrap();

        assert_eq!(matched.unmatched_includes, vec!["include/**/*.h".to_string()]);
    }

    #[test]
    fn test_fully_excluded_include_still_counts_as_matched() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "legacy/a.py", "a");
        write(dir.path(), "src/a.cpp", "a");

        let matcher = FileMatcher::parse("src/**\nlegacy/**\n!legacy/**").unwrap();
        let matched = matcher.collect(dir.path()).unwrap();

        assert!(matched.unmatched_includes.is_empty());
        assert_eq!(matched.files, vec!["src/a.cpp"]);
    }

    #[test]
    fn test_git_directory_pruned() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), ".git/config", "cfg");
        write(dir.path(), "a.txt", "a");

        let matcher = FileMatcher::parse("**").unwrap();
        let matched = matcher.collect(dir.path()).unwrap();

        assert_eq!(matched.files, vec!["a.txt"]);
    }

    #[cfg(unix)]
    #[test]
    fn test_non_utf8_file_name_rejected() {
        use std::ffi::OsStr;
        use std::os::unix::ffi::OsStrExt;

        let dir = TempDir::new().unwrap();
        write(dir.path(), "src/a.cpp", "a");
        fs::write(dir.path().join("src").join(OsStr::from_bytes(b"b\xff.cpp")), "b").unwrap();

        let matcher = FileMatcher::parse("src/**").unwrap();
        let err = matcher.collect(dir.path()).unwrap_err();

        assert!(matches!(err, DigestError::NonUtf8Path(ref p) if p.starts_with("src")), "{:?}", err);
    }
}
