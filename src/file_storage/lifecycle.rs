//! # Deletion Candidates
//!
//! Every uploaded object starts out as a deletion candidate keyed by its
//! creation time. Retaining an object removes the entry; the garbage
//! collector reclaims entries older than the retention window.

use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, RwLock};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::errors::{StorageError, StorageResult};
use super::metadata::MetadataStore;
use super::persist::JsonMapFile;

/// An object pending expiry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeletionCandidate {
    pub key: String,
    pub created_at: DateTime<Utc>,
}

/// Persistent key -> creation time map of deletion candidates
#[derive(Debug)]
pub struct DeletionTracker {
    file: Option<JsonMapFile>,
    candidates: RwLock<HashMap<String, DateTime<Utc>>>,
    metadata: Arc<dyn MetadataStore>,
}

impl DeletionTracker {
    /// Open a durable tracker at `path`
    pub fn open(path: impl AsRef<Path>, metadata: Arc<dyn MetadataStore>) -> StorageResult<Self> {
        let file = JsonMapFile::new(path);
        let candidates = file.load()?;
        Ok(Self {
            file: Some(file),
            candidates: RwLock::new(candidates),
            metadata,
        })
    }

    /// A tracker that never touches disk
    pub fn in_memory(metadata: Arc<dyn MetadataStore>) -> Self {
        Self {
            file: None,
            candidates: RwLock::new(HashMap::new()),
            metadata,
        }
    }

    /// Make `key` a deletion candidate.
    ///
    /// No-op when it already is one. Fails with `MetadataMissing` when the
    /// object has no metadata record.
    pub fn mark_for_deletion(&self, key: &str) -> StorageResult<()> {
        if self.is_candidate(key)? {
            return Ok(());
        }

        let metadata = self
            .metadata
            .get(key)?
            .ok_or_else(|| StorageError::MetadataMissing(key.to_string()))?;

        self.mutate(|candidates| {
            candidates.entry(key.to_string()).or_insert(metadata.created_at);
        })
    }

    /// Stop tracking `key` so no sweep reclaims it. Absence is not an error.
    pub fn mark_for_retention(&self, key: &str) -> StorageResult<()> {
        self.remove(key)
    }

    /// Drop the entry for `key`, if any
    pub fn remove(&self, key: &str) -> StorageResult<()> {
        if !self.is_candidate(key)? {
            return Ok(());
        }
        self.mutate(|candidates| {
            candidates.remove(key);
        })
    }

    pub fn is_candidate(&self, key: &str) -> StorageResult<bool> {
        let candidates = self
            .candidates
            .read()
            .map_err(|_| StorageError::Internal("Lock poisoned".to_string()))?;
        Ok(candidates.contains_key(key))
    }

    /// Snapshot of every candidate, in no particular order
    pub fn list_candidates(&self) -> StorageResult<Vec<DeletionCandidate>> {
        let candidates = self
            .candidates
            .read()
            .map_err(|_| StorageError::Internal("Lock poisoned".to_string()))?;
        Ok(candidates
            .iter()
            .map(|(key, created_at)| DeletionCandidate {
                key: key.clone(),
                created_at: *created_at,
            })
            .collect())
    }

    fn mutate(&self, change: impl FnOnce(&mut HashMap<String, DateTime<Utc>>)) -> StorageResult<()> {
        let mut candidates = self
            .candidates
            .write()
            .map_err(|_| StorageError::Internal("Lock poisoned".to_string()))?;
        let mut next = candidates.clone();
        change(&mut next);
        if let Some(file) = &self.file {
            file.save(&next)?;
        }
        *candidates = next;
        Ok(())
    }
}
