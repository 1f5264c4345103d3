//! In-process object store
//!
//! Holds marker keys in memory and supports per-operation failure injection
//! so error paths can be exercised without a bucket.

use std::collections::{BTreeSet, HashMap};
use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::backend::{ObjectStore, ProbeTarget};
use crate::StoreError;

/// Store operation, used to key injected failures and the call log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    Head,
    Put,
    Delete,
    Probe,
}

/// One recorded call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreCall {
    pub op: Operation,
    pub target: String,
}

#[derive(Debug, Clone)]
struct InjectedFailure {
    error: StoreError,
    /// Remaining failures (None = always fail)
    remaining: Option<u32>,
}

#[derive(Debug, Default)]
struct MemoryState {
    objects: BTreeSet<String>,
    failures: HashMap<(Operation, String), InjectedFailure>,
    probe_responses: HashMap<ProbeTarget, Result<(), StoreError>>,
    calls: Vec<StoreCall>,
}

/// Object store backed by a set of keys.
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: Mutex<MemoryState>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Seed an object.
    pub fn insert(&self, key: &str) {
        self.lock().objects.insert(key.to_string());
    }

    pub fn contains(&self, key: &str) -> bool {
        self.lock().objects.contains(key)
    }

    /// All stored keys, sorted.
    pub fn objects(&self) -> Vec<String> {
        self.lock().objects.iter().cloned().collect()
    }

    /// Fail `op` on `key` with `error`. `times == None` fails forever.
    pub fn inject_failure(&self, op: Operation, key: &str, error: StoreError, times: Option<u32>) {
        self.lock().failures.insert(
            (op, key.to_string()),
            InjectedFailure {
                error,
                remaining: times,
            },
        );
    }

    pub fn clear_failures(&self) {
        self.lock().failures.clear();
    }

    /// Fix the outcome of probing `target`.
    pub fn set_probe_response(&self, target: ProbeTarget, response: Result<(), StoreError>) {
        self.lock().probe_responses.insert(target, response);
    }

    /// Calls made so far, in order.
    pub fn calls(&self) -> Vec<StoreCall> {
        self.lock().calls.clone()
    }

    /// Record the call and return an injected failure if one applies.
    fn begin(state: &mut MemoryState, op: Operation, target: &str) -> Result<(), StoreError> {
        state.calls.push(StoreCall {
            op,
            target: target.to_string(),
        });

        let slot = (op, target.to_string());
        let outcome = match state.failures.get_mut(&slot) {
            None => return Ok(()),
            Some(failure) => match failure.remaining {
                Some(0) => None,
                Some(n) => {
                    failure.remaining = Some(n - 1);
                    Some(failure.error.clone())
                }
                None => Some(failure.error.clone()),
            },
        };
        match outcome {
            Some(error) => Err(error),
            None => {
                state.failures.remove(&slot);
                Ok(())
            }
        }
    }
}

impl ObjectStore for MemoryStore {
    fn head(&self, key: &str) -> Result<(), StoreError> {
        let mut state = self.lock();
        Self::begin(&mut state, Operation::Head, key)?;
        if state.objects.contains(key) {
            Ok(())
        } else {
            Err(StoreError::NotFound { key: key.to_string() })
        }
    }

    fn put_empty(&self, key: &str) -> Result<(), StoreError> {
        let mut state = self.lock();
        Self::begin(&mut state, Operation::Put, key)?;
        state.objects.insert(key.to_string());
        Ok(())
    }

    fn delete(&self, key: &str) -> Result<(), StoreError> {
        let mut state = self.lock();
        Self::begin(&mut state, Operation::Delete, key)?;
        state.objects.remove(key);
        Ok(())
    }

    fn probe(&self, target: &ProbeTarget) -> Result<(), StoreError> {
        let mut state = self.lock();
        Self::begin(&mut state, Operation::Probe, &target.to_string())?;
        if let Some(response) = state.probe_responses.get(target) {
            return response.clone();
        }
        match target {
            ProbeTarget::Key(key) if state.objects.contains(key) => Ok(()),
            ProbeTarget::Key(key) => Err(StoreError::NotFound { key: key.clone() }),
            ProbeTarget::Url(url) => Err(StoreError::NotFound { key: url.clone() }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_put_head_delete() {
        let store = MemoryStore::new();

        assert!(store.head("a/complete").unwrap_err().is_not_found());
        store.put_empty("a/complete").unwrap();
        store.head("a/complete").unwrap();
        store.delete("a/complete").unwrap();
        store.delete("a/complete").unwrap();
        assert!(!store.contains("a/complete"));
    }

    #[test]
    fn test_injected_failure_with_count() {
        let store = MemoryStore::new();
        store.insert("k");
        store.inject_failure(
            Operation::Head,
            "k",
            StoreError::Transient {
                key: "k".to_string(),
                message: "HTTP 503".to_string(),
            },
            Some(2),
        );

        assert!(store.head("k").unwrap_err().is_transient());
        assert!(store.head("k").unwrap_err().is_transient());
        store.head("k").unwrap();
    }

    #[test]
    fn test_injected_failure_is_per_key() {
        let store = MemoryStore::new();
        store.inject_failure(
            Operation::Put,
            "bad",
            StoreError::Forbidden { key: "bad".to_string() },
            None,
        );

        assert!(store.put_empty("bad").unwrap_err().is_forbidden());
        store.put_empty("good").unwrap();
        assert_eq!(store.objects(), vec!["good".to_string()]);

        store.clear_failures();
        store.put_empty("bad").unwrap();
    }

    #[test]
    fn test_probe_defaults_and_overrides() {
        let store = MemoryStore::new();
        store.insert("canary");

        store.probe(&ProbeTarget::Key("canary".to_string())).unwrap();
        assert!(store
            .probe(&ProbeTarget::Key("missing".to_string()))
            .unwrap_err()
            .is_not_found());
        assert!(store
            .probe(&ProbeTarget::Url("https://probe".to_string()))
            .unwrap_err()
            .is_not_found());

        store.set_probe_response(ProbeTarget::Url("https://probe".to_string()), Ok(()));
        store.probe(&ProbeTarget::Url("https://probe".to_string())).unwrap();
    }

    #[test]
    fn test_calls_are_recorded() {
        let store = MemoryStore::new();
        let _ = store.head("x");
        store.put_empty("y").unwrap();

        let calls = store.calls();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0].op, Operation::Head);
        assert_eq!(calls[1].target, "y");
    }
}
