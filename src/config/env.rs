//! Environment layer
//!
//! Maps CI environment variables onto config paths. The lookup function is
//! injected so tests never touch the process environment.

use serde_json::{Map, Value};

use super::ConfigError;

/// Build the environment layer. Returns `None` when no variable is set.
pub fn env_overrides<F>(lookup: F) -> Result<Option<Value>, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let get = |name: &str| lookup(name).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

    let mut repository = Map::new();
    let mut store = Map::new();

    if let Some(slug) = get("GITHUB_REPOSITORY") {
        let (owner, name) = slug.split_once('/').ok_or_else(|| {
            ConfigError::ValidationError(format!(
                "GITHUB_REPOSITORY must be <owner>/<name>, got '{}'",
                slug
            ))
        })?;
        repository.insert("owner".to_string(), Value::String(owner.to_string()));
        repository.insert("name".to_string(), Value::String(name.to_string()));
    }

    if let Some(bucket) = get("CACHEGATE_BUCKET") {
        store.insert("bucket".to_string(), Value::String(bucket));
    }
    if let Some(endpoint) = get("CACHEGATE_ENDPOINT") {
        store.insert("endpoint".to_string(), Value::String(endpoint));
    }
    if let Some(region) = get("CACHEGATE_REGION").or_else(|| get("AWS_REGION")) {
        store.insert("region".to_string(), Value::String(region));
    }
    if let Some(namespace) = get("CACHEGATE_NAMESPACE") {
        store.insert("namespace".to_string(), Value::String(namespace));
    }
    if let Some(retries) = get("CACHEGATE_MAX_RETRIES") {
        let retries: u64 = retries.parse().map_err(|_| {
            ConfigError::ParseError(format!(
                "CACHEGATE_MAX_RETRIES must be a non-negative integer, got '{}'",
                retries
            ))
        })?;
        store.insert("max_retries".to_string(), Value::from(retries));
    }

    let mut layer = Map::new();
    if !repository.is_empty() {
        layer.insert("repository".to_string(), Value::Object(repository));
    }
    if !store.is_empty() {
        layer.insert("store".to_string(), Value::Object(store));
    }

    Ok(if layer.is_empty() {
        None
    } else {
        Some(Value::Object(layer))
    })
}

/// Environment layer from the process environment.
pub fn process_env_overrides() -> Result<Option<Value>, ConfigError> {
    env_overrides(|name| std::env::var(name).ok())
}
