//! Completion marker store
//!
//! Records "this unit of work already completed" as zero-byte marker objects
//! in an S3-compatible object store.
//!
//! - [`ObjectStore`] is the adapter seam; every failure is tagged once as a
//!   [`StoreError`] at that boundary.
//! - [`S3Store`] talks HTTPS with SigV4 presigned requests and retries
//!   transient faults.
//! - [`MemoryStore`] is an in-process store with failure injection.
//! - [`CompletionStore`] implements the marker semantics on top of either.

pub mod backend;
pub mod completion;
pub mod error;
pub mod memory;
pub mod presign;
pub mod s3;

pub use backend::{ObjectStore, ProbeTarget};
pub use completion::{CompletionStore, ForbiddenFallback, RemovalReport};
pub use error::StoreError;
pub use memory::{MemoryStore, Operation, StoreCall};
pub use presign::{HttpMethod, PresignError, PresignedUrlBuilder};
pub use s3::{Credentials, RetryPolicy, S3Config, S3Store};
