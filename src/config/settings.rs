//! Typed view of the merged configuration

use std::time::Duration;

use cachegate_digest::{KeySpace, PatternProfile, DEFAULT_NAMESPACE};
use cachegate_store::{ForbiddenFallback, RetryPolicy, S3Config};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::ConfigError;
use crate::matrix::MatrixPolicy;

/// Upper bound for `store.max_retries`
pub const MAX_RETRIES_LIMIT: u32 = 100;

/// Upper bound for `store.timeout_seconds`
pub const MAX_TIMEOUT_SECONDS: u64 = 300;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub repository: RepositorySettings,
    pub store: StoreSettings,
    pub patterns: PatternProfile,
    pub matrix: MatrixPolicy,
}

/// Repository whose markers are read and written.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RepositorySettings {
    pub owner: Option<String>,
    pub name: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    #[default]
    S3,
    Memory,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreSettings {
    pub backend: StoreBackend,
    pub endpoint: String,
    pub bucket: Option<String>,
    pub region: String,
    pub namespace: String,
    pub max_retries: u32,
    pub timeout_seconds: u64,
    /// What a 403 on a marker read means. Defaults to `surface`, which fails
    /// the lookup; a bucket that answers 403 for missing objects needs a
    /// `probe` strategy with a target (a key or URL known to be absent) so
    /// such reads are treated as cache misses.
    pub forbidden_fallback: ForbiddenFallback,
}

impl Default for StoreSettings {
    fn default() -> Self {
        Self {
            backend: StoreBackend::S3,
            endpoint: "https://s3.amazonaws.com".to_string(),
            bucket: None,
            region: "us-east-1".to_string(),
            namespace: DEFAULT_NAMESPACE.to_string(),
            max_retries: RetryPolicy::default().max_retries,
            timeout_seconds: 30,
            forbidden_fallback: ForbiddenFallback::Surface,
        }
    }
}

impl Settings {
    /// Deserialize and validate a merged config value.
    pub fn from_value(value: &Value) -> Result<Self, ConfigError> {
        let settings: Settings = serde_json::from_value(value.clone())
            .map_err(|e| ConfigError::ParseError(format!("Invalid configuration: {}", e)))?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.store.max_retries > MAX_RETRIES_LIMIT {
            return Err(ConfigError::ValidationError(format!(
                "store.max_retries must be <= {}",
                MAX_RETRIES_LIMIT
            )));
        }

        if self.store.timeout_seconds == 0 || self.store.timeout_seconds > MAX_TIMEOUT_SECONDS {
            return Err(ConfigError::ValidationError(format!(
                "store.timeout_seconds must be in (0, {}]",
                MAX_TIMEOUT_SECONDS
            )));
        }

        if self.store.endpoint.trim().is_empty() {
            return Err(ConfigError::ValidationError(
                "store.endpoint must not be empty".to_string(),
            ));
        }

        if self.patterns.base_includes.is_empty() {
            return Err(ConfigError::ValidationError(
                "patterns.base_includes must not be empty".to_string(),
            ));
        }

        if self.matrix.cached_runner.trim().is_empty() {
            return Err(ConfigError::ValidationError(
                "matrix.cached_runner must not be empty".to_string(),
            ));
        }

        Ok(())
    }

    /// Key space for the configured repository.
    ///
    /// Only store operations need a repository, so this is checked lazily.
    pub fn key_space(&self) -> Result<KeySpace, ConfigError> {
        let owner = self.repository.owner.as_deref().unwrap_or_default();
        let name = self.repository.name.as_deref().unwrap_or_default();
        if owner.is_empty() || name.is_empty() {
            return Err(ConfigError::ValidationError(
                "repository.owner and repository.name are required (set GITHUB_REPOSITORY)"
                    .to_string(),
            ));
        }

        KeySpace::new(owner, name)
            .and_then(|space| space.with_namespace(&self.store.namespace))
            .map_err(|e| ConfigError::ValidationError(e.to_string()))
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.store.max_retries,
            ..RetryPolicy::default()
        }
    }

    /// S3 client settings. Requires a bucket.
    pub fn s3_config(&self) -> Result<S3Config, ConfigError> {
        let bucket = self
            .store
            .bucket
            .clone()
            .filter(|b| !b.trim().is_empty())
            .ok_or_else(|| {
                ConfigError::ValidationError(
                    "store.bucket is required for the s3 backend (set CACHEGATE_BUCKET)".to_string(),
                )
            })?;

        Ok(S3Config {
            endpoint: self.store.endpoint.clone(),
            bucket,
            region: self.store.region.clone(),
            timeout: Duration::from_secs(self.store.timeout_seconds),
            retry: self.retry_policy(),
        })
    }
}
