//! Cache query layer
//!
//! Joins the digest engine, key space and completion store: derive the keys
//! for an entry and digest type, then ask the store whether any is complete.

use std::collections::BTreeMap;

use cachegate_digest::{CacheKey, Digest, DigestEngine, DigestError, DigestType, Entry, KeyError, KeySpace};
use cachegate_store::{CompletionStore, ObjectStore, RemovalReport, StoreError};
use serde::Serialize;
use tracing::info;

/// Cache query errors
#[derive(Debug, thiserror::Error)]
pub enum QueryError {
    #[error(transparent)]
    Digest(#[from] DigestError),

    #[error(transparent)]
    Key(#[from] KeyError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Digests computed during one run, at most one per type.
#[derive(Debug, Default)]
pub struct DigestCache {
    digests: BTreeMap<DigestType, Digest>,
}

impl DigestCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, digest_type: DigestType) -> Option<&Digest> {
        self.digests.get(&digest_type)
    }

    /// Return the cached digest, computing it on first use.
    pub fn get_or_compute<F>(&mut self, digest_type: DigestType, compute: F) -> Result<Digest, DigestError>
    where
        F: FnOnce() -> Result<Digest, DigestError>,
    {
        if let Some(digest) = self.digests.get(&digest_type) {
            return Ok(digest.clone());
        }
        let digest = compute()?;
        self.digests.insert(digest_type, digest.clone());
        Ok(digest)
    }

    pub fn len(&self) -> usize {
        self.digests.len()
    }

    pub fn is_empty(&self) -> bool {
        self.digests.is_empty()
    }
}

/// Outcome of a cache lookup for one entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct QueryResult {
    pub entry: Entry,
    pub digest_type: DigestType,
    /// Candidate keys in priority order; never empty
    pub keys: Vec<CacheKey>,
    pub cache_hit: bool,
    /// The key whose marker was found
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hit_key: Option<CacheKey>,
    pub build_digest: Digest,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub test_digest: Option<Digest>,
}

/// Keys derived for an entry, before any store access.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DerivedKeys {
    pub entry: Entry,
    pub digest_type: DigestType,
    pub keys: Vec<CacheKey>,
    pub build_digest: Digest,
    pub test_digest: Option<Digest>,
}

/// Cache lookups for one run.
pub struct CacheQuery<'a, S: ObjectStore + ?Sized> {
    engine: DigestEngine,
    key_space: KeySpace,
    completion: CompletionStore<'a, S>,
    cache: DigestCache,
}

impl<'a, S: ObjectStore + ?Sized> CacheQuery<'a, S> {
    pub fn new(engine: DigestEngine, key_space: KeySpace, completion: CompletionStore<'a, S>) -> Self {
        Self {
            engine,
            key_space,
            completion,
            cache: DigestCache::new(),
        }
    }

    pub fn key_space(&self) -> &KeySpace {
        &self.key_space
    }

    pub fn cache(&self) -> &DigestCache {
        &self.cache
    }

    /// Digest of the given type, memoized for the life of this query.
    pub fn digest(&mut self, digest_type: DigestType) -> Result<Digest, DigestError> {
        let engine = &self.engine;
        self.cache
            .get_or_compute(digest_type, || engine.compute(digest_type.options()))
    }

    /// Derive the candidate keys for an entry.
    ///
    /// The build digest is always computed; test types key on their own
    /// digest.
    pub fn derive_keys(&mut self, entry: &str, digest_type: DigestType) -> Result<DerivedKeys, QueryError> {
        let entry = Entry::new(entry)?;
        let build_digest = self.digest(DigestType::Build)?;

        let (keys, test_digest) = match digest_type {
            DigestType::Build => (vec![self.key_space.key_for(&build_digest, &entry)], None),
            DigestType::Test | DigestType::SingleClientTest => {
                let test_digest = self.digest(digest_type)?;
                (vec![self.key_space.key_for(&test_digest, &entry)], Some(test_digest))
            }
        };

        Ok(DerivedKeys {
            entry,
            digest_type,
            keys,
            build_digest,
            test_digest,
        })
    }

    /// Look up whether `entry` already completed for `digest_type`.
    pub fn query(&mut self, entry: &str, digest_type: DigestType) -> Result<QueryResult, QueryError> {
        let derived = self.derive_keys(entry, digest_type)?;
        let hit_key = self.completion.check_complete(&derived.keys)?;

        info!(
            entry = %derived.entry,
            digest_type = %digest_type,
            cache_hit = hit_key.is_some(),
            "cache query"
        );

        Ok(QueryResult {
            entry: derived.entry,
            digest_type,
            keys: derived.keys,
            cache_hit: hit_key.is_some(),
            hit_key,
            build_digest: derived.build_digest,
            test_digest: derived.test_digest,
        })
    }

    /// [`query`](Self::query) with the digest type given by name.
    pub fn query_named(&mut self, entry: &str, digest_type: &str) -> Result<QueryResult, QueryError> {
        let digest_type: DigestType = digest_type.parse()?;
        self.query(entry, digest_type)
    }

    /// Mark `entry` complete for `digest_type`. Returns the keys written.
    pub fn complete(&mut self, entry: &str, digest_type: DigestType) -> Result<Vec<CacheKey>, QueryError> {
        let derived = self.derive_keys(entry, digest_type)?;
        self.completion.mark_complete(&derived.keys)?;
        Ok(derived.keys)
    }

    /// Remove the markers for `entry`, best effort.
    pub fn invalidate(&mut self, entry: &str, digest_type: DigestType) -> Result<RemovalReport, QueryError> {
        let derived = self.derive_keys(entry, digest_type)?;
        Ok(self.completion.remove_complete(&derived.keys))
    }
}
