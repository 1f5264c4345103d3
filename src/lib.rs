//! cachegate - content-addressed build/test completion cache for CI
//!
//! Computes digests of curated source-tree file sets, uses them as keys for
//! completion markers in an object store, and emits job matrices with the
//! cache decision and runner selection already made.
//!
//! Digesting and key derivation live in `cachegate-digest`; the object store
//! and marker semantics live in `cachegate-store`. This crate adds layered
//! configuration, the cache query layer and matrix generation.

pub mod config;
pub mod matrix;
pub mod output;
pub mod query;

pub use cachegate_digest::{
    CacheKey, Digest, DigestEngine, DigestError, DigestType, Entry, KeySpace, PatternProfile,
};
pub use cachegate_store::{
    CompletionStore, ForbiddenFallback, MemoryStore, ObjectStore, ProbeTarget, S3Store, StoreError,
};
pub use config::{ConfigError, EffectiveConfig, Settings};
pub use matrix::{
    generate_build_matrix, generate_test_matrix, Matrix, MatrixEntry, MatrixError, MatrixPolicy, RunsOn,
    TestMatrixRequest,
};
pub use output::{OutputError, OutputWriter};
pub use query::{CacheQuery, DigestCache, QueryError, QueryResult};
