//! Built-in defaults (layer 1)

use cachegate_digest::{PatternProfile, DEFAULT_NAMESPACE};
use cachegate_store::ForbiddenFallback;
use serde::{Deserialize, Serialize};

use crate::matrix::MatrixPolicy;

/// Built-in default configuration values
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuiltinDefaults {
    /// Store backend (default: "s3")
    pub store_backend: String,

    /// Object store endpoint (default: AWS S3)
    pub store_endpoint: String,

    /// Signing region (default: "us-east-1")
    pub store_region: String,

    /// Key namespace (default: "digest")
    pub store_namespace: String,

    /// Transport retries for transient faults (default: 20)
    pub store_max_retries: u32,

    /// Per-request timeout in seconds (default: 30)
    pub store_timeout_seconds: u64,

    /// Handling of 403 on marker reads (default: surface)
    pub forbidden_fallback: ForbiddenFallback,

    pub patterns: PatternProfile,

    pub matrix: MatrixPolicy,
}

impl Default for BuiltinDefaults {
    fn default() -> Self {
        Self {
            store_backend: "s3".to_string(),
            store_endpoint: "https://s3.amazonaws.com".to_string(),
            store_region: "us-east-1".to_string(),
            store_namespace: DEFAULT_NAMESPACE.to_string(),
            store_max_retries: 20,
            store_timeout_seconds: 30,
            forbidden_fallback: ForbiddenFallback::Surface,
            patterns: PatternProfile::default(),
            matrix: MatrixPolicy::default(),
        }
    }
}

impl BuiltinDefaults {
    /// Convert to JSON Value for merging
    pub fn to_value(&self) -> serde_json::Value {
        serde_json::json!({
            "repository": {},
            "store": {
                "backend": self.store_backend,
                "endpoint": self.store_endpoint,
                "region": self.store_region,
                "namespace": self.store_namespace,
                "max_retries": self.store_max_retries,
                "timeout_seconds": self.store_timeout_seconds,
                "forbidden_fallback": self.forbidden_fallback,
            },
            "patterns": self.patterns,
            "matrix": self.matrix,
        })
    }
}
