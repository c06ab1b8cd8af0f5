//! # File Storage Module
//!
//! Object storage on a local filesystem behind presigned URLs. Uploaded
//! objects are create-once and expire after a retention window unless
//! retained.

pub mod adapter;
pub mod errors;
pub mod gc;
pub mod lifecycle;
pub mod local;
pub mod metadata;
pub mod path_guard;
pub mod retry;
pub mod signed_url;

mod persist;

pub use adapter::{AdapterContext, AdapterSettings, LocalSignedAdapter, StorageAdapter, UploadUrl};
pub use errors::{StorageError, StorageResult};
pub use gc::{GarbageCollector, SweepReport};
pub use lifecycle::{DeletionCandidate, DeletionTracker};
pub use local::LocalBackend;
pub use metadata::{FileMetadataStore, InMemoryMetadataStore, MetadataStore, ObjectMetadata};
pub use path_guard::resolve_key;
pub use retry::RetryPolicy;
pub use signed_url::{SignedQuery, SignedUrl, UrlSigner};
