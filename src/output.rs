//! Pipeline step outputs
//!
//! Values are appended to the file named by `$GITHUB_OUTPUT` as
//! `name=value` lines, or printed to stdout when the variable is unset.
//! Structured values are serialized as canonical JSON (RFC 8785) so the
//! same matrix always produces the same bytes.

use serde::Serialize;
use std::fs::OpenOptions;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

/// Output file variable set by the pipeline runner
pub const OUTPUT_ENV: &str = "GITHUB_OUTPUT";

#[derive(Debug, thiserror::Error)]
pub enum OutputError {
    #[error("IO error writing output: {0}")]
    Io(#[from] io::Error),

    #[error("JCS serialization failed: {0}")]
    Jcs(String),

    #[error("Invalid output name '{0}'")]
    InvalidName(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum OutputTarget {
    File(PathBuf),
    Stdout,
}

/// Writer for step outputs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputWriter {
    target: OutputTarget,
}

/// Serialize to canonical JSON.
pub fn canonical_json<T: Serialize>(value: &T) -> Result<String, OutputError> {
    let bytes = serde_json_canonicalizer::to_vec(value).map_err(|e| OutputError::Jcs(e.to_string()))?;
    String::from_utf8(bytes).map_err(|e| OutputError::Jcs(e.to_string()))
}

/// Append one output to `w`, using a heredoc block for multi-line values.
pub fn write_output<W: Write>(w: &mut W, name: &str, value: &str) -> Result<(), OutputError> {
    if name.is_empty() || name.contains(['=', '\n', '\r', '<']) {
        return Err(OutputError::InvalidName(name.to_string()));
    }

    if value.contains('\n') {
        let delimiter = format!("cachegate_{}", ulid::Ulid::new());
        writeln!(w, "{}<<{}", name, delimiter)?;
        writeln!(w, "{}", value)?;
        writeln!(w, "{}", delimiter)?;
    } else {
        writeln!(w, "{}={}", name, value)?;
    }
    Ok(())
}

impl OutputWriter {
    /// Use `$GITHUB_OUTPUT` when set, stdout otherwise.
    pub fn from_env() -> Self {
        match std::env::var_os(OUTPUT_ENV).filter(|v| !v.is_empty()) {
            Some(path) => Self::file(PathBuf::from(path)),
            None => Self::stdout(),
        }
    }

    pub fn file(path: impl Into<PathBuf>) -> Self {
        Self {
            target: OutputTarget::File(path.into()),
        }
    }

    pub fn stdout() -> Self {
        Self {
            target: OutputTarget::Stdout,
        }
    }

    /// Output file, if writing to one.
    pub fn path(&self) -> Option<&Path> {
        match &self.target {
            OutputTarget::File(path) => Some(path),
            OutputTarget::Stdout => None,
        }
    }

    pub fn set(&self, name: &str, value: &str) -> Result<(), OutputError> {
        match &self.target {
            OutputTarget::File(path) => {
                let mut file = OpenOptions::new().create(true).append(true).open(path)?;
                write_output(&mut file, name, value)
            }
            OutputTarget::Stdout => write_output(&mut io::stdout().lock(), name, value),
        }
    }

    /// Set an output to the canonical JSON of `value`.
    pub fn set_json<T: Serialize>(&self, name: &str, value: &T) -> Result<(), OutputError> {
        self.set(name, &canonical_json(value)?)
    }
}
