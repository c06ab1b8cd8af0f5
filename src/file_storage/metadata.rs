//! # Metadata Storage
//!
//! One record per stored object. Both implementations are point-lookup
//! key-value maps; the file-backed one survives restarts and is scoped to a
//! single adapter namespace.

use std::collections::HashMap;
use std::path::Path;
use std::sync::RwLock;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use super::errors::{StorageError, StorageResult};
use super::persist::JsonMapFile;

/// Metadata recorded when an upload completes
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectMetadata {
    pub key: String,
    pub content_type: String,
    pub created_at: DateTime<Utc>,
    pub size: u64,
}

impl ObjectMetadata {
    pub fn new(key: &str, content_type: &str, created_at: DateTime<Utc>, size: u64) -> Self {
        Self {
            key: key.to_string(),
            content_type: content_type.to_string(),
            created_at,
            size,
        }
    }

    /// Entity tag: quoted hex SHA-256 of the JSON form of this record
    pub fn etag(&self) -> String {
        let encoded = serde_json::to_vec(self).unwrap_or_default();
        let digest = Sha256::digest(&encoded);
        format!("\"{}\"", hex::encode(digest))
    }

    /// `created_at` as an HTTP-date (RFC 7231 IMF-fixdate)
    pub fn last_modified(&self) -> String {
        self.created_at
            .format("%a, %d %b %Y %H:%M:%S GMT")
            .to_string()
    }
}

/// Trait for metadata storage operations
pub trait MetadataStore: Send + Sync + std::fmt::Debug {
    /// Get the record for a key
    fn get(&self, key: &str) -> StorageResult<Option<ObjectMetadata>>;

    /// Insert or replace the record for `metadata.key`
    fn put(&self, metadata: &ObjectMetadata) -> StorageResult<()>;

    /// Remove the record for a key. Removing an absent key is not an error.
    fn delete(&self, key: &str) -> StorageResult<()>;
}

/// In-memory metadata store for testing
#[derive(Debug, Default)]
pub struct InMemoryMetadataStore {
    objects: RwLock<HashMap<String, ObjectMetadata>>,
}

impl InMemoryMetadataStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl MetadataStore for InMemoryMetadataStore {
    fn get(&self, key: &str) -> StorageResult<Option<ObjectMetadata>> {
        let objects = self
            .objects
            .read()
            .map_err(|_| StorageError::Internal("Lock poisoned".to_string()))?;
        Ok(objects.get(key).cloned())
    }

    fn put(&self, metadata: &ObjectMetadata) -> StorageResult<()> {
        let mut objects = self
            .objects
            .write()
            .map_err(|_| StorageError::Internal("Lock poisoned".to_string()))?;
        objects.insert(metadata.key.clone(), metadata.clone());
        Ok(())
    }

    fn delete(&self, key: &str) -> StorageResult<()> {
        let mut objects = self
            .objects
            .write()
            .map_err(|_| StorageError::Internal("Lock poisoned".to_string()))?;
        objects.remove(key);
        Ok(())
    }
}

/// JSON file-backed metadata store
#[derive(Debug)]
pub struct FileMetadataStore {
    file: JsonMapFile,
    objects: RwLock<HashMap<String, ObjectMetadata>>,
}

impl FileMetadataStore {
    /// Open the store at `path`, loading any records already persisted there
    pub fn open(path: impl AsRef<Path>) -> StorageResult<Self> {
        let file = JsonMapFile::new(path);
        let objects = file.load()?;
        Ok(Self {
            file,
            objects: RwLock::new(objects),
        })
    }

    pub fn path(&self) -> &Path {
        self.file.path()
    }

    /// Apply `change` to a copy of the map, persist it, then publish it.
    /// A failed write leaves the in-memory view untouched.
    fn mutate(&self, change: impl FnOnce(&mut HashMap<String, ObjectMetadata>)) -> StorageResult<()> {
        let mut objects = self
            .objects
            .write()
            .map_err(|_| StorageError::Internal("Lock poisoned".to_string()))?;
        let mut next = objects.clone();
        change(&mut next);
        self.file.save(&next)?;
        *objects = next;
        Ok(())
    }
}

impl MetadataStore for FileMetadataStore {
    fn get(&self, key: &str) -> StorageResult<Option<ObjectMetadata>> {
        let objects = self
            .objects
            .read()
            .map_err(|_| StorageError::Internal("Lock poisoned".to_string()))?;
        Ok(objects.get(key).cloned())
    }

    fn put(&self, metadata: &ObjectMetadata) -> StorageResult<()> {
        self.mutate(|objects| {
            objects.insert(metadata.key.clone(), metadata.clone());
        })
    }

    fn delete(&self, key: &str) -> StorageResult<()> {
        if self.get(key)?.is_none() {
            return Ok(());
        }
        self.mutate(|objects| {
            objects.remove(key);
        })
    }
}
