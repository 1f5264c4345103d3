//! Store error taxonomy.
//!
//! Raw HTTP statuses and transport failures are classified here, once, so
//! callers match on variants instead of inspecting status codes.

/// Tagged object-store failure.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    /// The object does not exist. Callers usually treat this as absence.
    #[error("Object not found: {key}")]
    NotFound { key: String },

    /// The store refused access. Some bucket policies answer 403 for
    /// missing objects, so this is ambiguous on reads.
    #[error("Access forbidden: {key}")]
    Forbidden { key: String },

    /// Network fault, timeout, throttling or server-side error.
    #[error("Transient store error for {key}: {message}")]
    Transient { key: String, message: String },

    #[error("Store error for {key} (status {status:?}): {message}")]
    Other {
        key: String,
        status: Option<u16>,
        message: String,
    },

    #[error("Store configuration error: {0}")]
    Config(String),
}

impl StoreError {
    /// Classify a non-success HTTP status.
    pub fn from_status(key: &str, status: u16) -> Self {
        let key = key.to_string();
        match status {
            404 => StoreError::NotFound { key },
            403 => StoreError::Forbidden { key },
            408 | 429 | 500..=599 => StoreError::Transient {
                key,
                message: format!("HTTP {}", status),
            },
            _ => StoreError::Other {
                key,
                status: Some(status),
                message: format!("unexpected HTTP status {}", status),
            },
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound { .. })
    }

    pub fn is_forbidden(&self) -> bool {
        matches!(self, StoreError::Forbidden { .. })
    }

    /// Whether the transport retry policy applies.
    pub fn is_transient(&self) -> bool {
        matches!(self, StoreError::Transient { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_classification() {
        assert!(StoreError::from_status("k", 404).is_not_found());
        assert!(StoreError::from_status("k", 403).is_forbidden());
        for status in [408, 429, 500, 502, 503] {
            assert!(StoreError::from_status("k", status).is_transient(), "{}", status);
        }
        assert!(matches!(
            StoreError::from_status("k", 400),
            StoreError::Other { status: Some(400), .. }
        ));
    }

    #[test]
    fn test_display_includes_key() {
        let err = StoreError::from_status("digest/a/b/c/complete", 403);
        assert_eq!(err.to_string(), "Access forbidden: digest/a/b/c/complete");
    }
}
