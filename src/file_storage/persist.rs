//! JSON file persistence shared by the metadata store and deletion tracker.
//!
//! The whole map is rewritten on every mutation: serialized to a sibling temp
//! file, fsynced, then renamed over the previous version so a crash leaves
//! either the old or the new map on disk, never a torn one.

use std::collections::HashMap;
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

use serde::{de::DeserializeOwned, Serialize};
use uuid::Uuid;

use super::errors::{StorageError, StorageResult};

#[derive(Debug, Clone)]
pub(crate) struct JsonMapFile {
    path: PathBuf,
}

impl JsonMapFile {
    pub(crate) fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    pub(crate) fn path(&self) -> &Path {
        &self.path
    }

    pub(crate) fn load<V: DeserializeOwned>(&self) -> StorageResult<HashMap<String, V>> {
        if !self.path.exists() {
            return Ok(HashMap::new());
        }

        let content = fs::read_to_string(&self.path)
            .map_err(|e| StorageError::io(&format!("reading {}", self.path.display()), e))?;

        if content.trim().is_empty() {
            return Ok(HashMap::new());
        }

        serde_json::from_str(&content).map_err(|e| {
            StorageError::Internal(format!("parsing {}: {}", self.path.display(), e))
        })
    }

    pub(crate) fn save<V: Serialize>(&self, map: &HashMap<String, V>) -> StorageResult<()> {
        let content = serde_json::to_vec_pretty(map)
            .map_err(|e| StorageError::Internal(format!("serializing store: {}", e)))?;

        let parent = self
            .path
            .parent()
            .ok_or_else(|| StorageError::Internal(format!("{} has no parent", self.path.display())))?;
        fs::create_dir_all(parent)
            .map_err(|e| StorageError::io(&format!("creating {}", parent.display()), e))?;

        let file_name = self
            .path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "store.json".to_string());
        let tmp = parent.join(format!(".{}.{}.tmp", file_name, Uuid::new_v4()));

        let written = (|| {
            let mut file = File::create(&tmp)?;
            file.write_all(&content)?;
            file.sync_all()?;
            fs::rename(&tmp, &self.path)
        })();

        if let Err(e) = written {
            let _ = fs::remove_file(&tmp);
            return Err(StorageError::io(&format!("writing {}", self.path.display()), e));
        }

        // Persist the rename itself; not supported on every platform.
        if let Ok(dir) = File::open(parent) {
            let _ = dir.sync_all();
        }

        Ok(())
    }
}
