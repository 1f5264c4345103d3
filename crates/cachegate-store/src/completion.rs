//! Completion marker semantics
//!
//! A key is complete when the zero-byte object `<key>/complete` exists.
//! Markers are written by an explicit completion step and removed only by
//! explicit invalidation.

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use cachegate_digest::CacheKey;

use crate::backend::{ObjectStore, ProbeTarget};
use crate::StoreError;

/// What to do when a marker read is answered with 403.
///
/// Some bucket policies deny reads of missing objects instead of returning
/// 404. A probe of a known target tells the two cases apart: if the probe
/// itself is NotFound, the 403 meant "absent"; if the probe succeeds, the
/// 403 is a real permission failure.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "strategy", content = "target", rename_all = "kebab-case")]
pub enum ForbiddenFallback {
    /// Propagate the Forbidden error
    #[default]
    Surface,
    /// Probe a diagnostic target and decide from its outcome
    Probe(ProbeTarget),
}

/// Outcome of a best-effort marker removal.
#[derive(Debug, Default)]
pub struct RemovalReport {
    pub removed: Vec<CacheKey>,
    pub failed: Vec<(CacheKey, StoreError)>,
}

impl RemovalReport {
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Completion markers on top of an object store.
pub struct CompletionStore<'a, S: ObjectStore + ?Sized> {
    store: &'a S,
    fallback: ForbiddenFallback,
}

impl<'a, S: ObjectStore + ?Sized> CompletionStore<'a, S> {
    pub fn new(store: &'a S) -> Self {
        Self {
            store,
            fallback: ForbiddenFallback::default(),
        }
    }

    pub fn with_fallback(mut self, fallback: ForbiddenFallback) -> Self {
        self.fallback = fallback;
        self
    }

    pub fn fallback(&self) -> &ForbiddenFallback {
        &self.fallback
    }

    /// Write a marker for every key, in order.
    ///
    /// Stops at the first failure. Markers already written stay in place;
    /// rewriting an existing marker is harmless.
    pub fn mark_complete(&self, keys: &[CacheKey]) -> Result<(), StoreError> {
        for key in keys {
            let marker = key.marker_key();
            self.store.put_empty(&marker)?;
            info!(key = %key, "marked complete");
        }
        Ok(())
    }

    /// Return the first key, in priority order, whose marker exists.
    pub fn check_complete(&self, keys: &[CacheKey]) -> Result<Option<CacheKey>, StoreError> {
        for key in keys {
            if self.is_complete(key)? {
                return Ok(Some(key.clone()));
            }
        }
        Ok(None)
    }

    /// Whether one key's marker exists.
    pub fn is_complete(&self, key: &CacheKey) -> Result<bool, StoreError> {
        let marker = key.marker_key();
        match self.store.head(&marker) {
            Ok(()) => {
                debug!(key = %key, "marker present");
                Ok(true)
            }
            Err(StoreError::NotFound { .. }) => {
                debug!(key = %key, "marker absent");
                Ok(false)
            }
            Err(err @ StoreError::Forbidden { .. }) => self.resolve_forbidden(key, err),
            Err(err) => Err(err),
        }
    }

    fn resolve_forbidden(&self, key: &CacheKey, original: StoreError) -> Result<bool, StoreError> {
        let target = match &self.fallback {
            ForbiddenFallback::Surface => return Err(original),
            ForbiddenFallback::Probe(target) => target,
        };

        match self.store.probe(target) {
            Err(StoreError::NotFound { .. }) => {
                debug!(key = %key, probe = %target, "403 on missing object, treating as absent");
                Ok(false)
            }
            Err(probe_err) => Err(probe_err),
            Ok(()) => Err(original),
        }
    }

    /// Delete every key's marker, continuing past failures.
    pub fn remove_complete(&self, keys: &[CacheKey]) -> RemovalReport {
        let mut report = RemovalReport::default();
        for key in keys {
            match self.store.delete(&key.marker_key()) {
                Ok(()) | Err(StoreError::NotFound { .. }) => {
                    info!(key = %key, "removed completion marker");
                    report.removed.push(key.clone());
                }
                Err(err) => {
                    warn!(key = %key, error = %err, "failed to remove completion marker");
                    report.failed.push((key.clone(), err));
                }
            }
        }
        report
    }
}
