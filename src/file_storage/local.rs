//! # Local Filesystem Backend
//!
//! Byte-level operations on already-resolved paths. Callers pass paths that
//! came out of [`resolve_key`](super::path_guard::resolve_key).

use std::fmt::Display;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use bytes::Bytes;
use futures_util::{Stream, StreamExt};
use tokio::fs::{self, File, OpenOptions};
use tokio::io::AsyncWriteExt;

use super::errors::{StorageError, StorageResult};

/// Local filesystem storage backend rooted at one directory
#[derive(Debug, Clone)]
pub struct LocalBackend {
    root: PathBuf,
}

impl LocalBackend {
    /// Create a new local backend
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Create the file at `path`, failing with `ObjectAlreadyExists` if it is
    /// already there. The existence check and the creation are one syscall.
    pub async fn create_new(&self, path: &Path, key: &str) -> StorageResult<File> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| StorageError::io("creating parent directories", e))?;
        }

        OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(path)
            .await
            .map_err(|e| match e.kind() {
                ErrorKind::AlreadyExists => StorageError::ObjectAlreadyExists(key.to_string()),
                _ => StorageError::io("creating object file", e),
            })
    }

    /// Copy `body` into `file` chunk by chunk and fsync. Returns bytes written.
    pub async fn write_stream<S, E>(&self, file: &mut File, mut body: S) -> StorageResult<u64>
    where
        S: Stream<Item = Result<Bytes, E>> + Unpin,
        E: Display,
    {
        let mut written = 0u64;
        while let Some(chunk) = body.next().await {
            let chunk = chunk.map_err(|e| StorageError::IoError(format!("reading body: {}", e)))?;
            file.write_all(&chunk)
                .await
                .map_err(|e| StorageError::io("writing object file", e))?;
            written += chunk.len() as u64;
        }

        file.flush()
            .await
            .map_err(|e| StorageError::io("flushing object file", e))?;
        file.sync_all()
            .await
            .map_err(|e| StorageError::io("syncing object file", e))?;

        Ok(written)
    }

    /// Open a stored file for reading; `None` when it does not exist
    pub async fn open(&self, path: &Path) -> StorageResult<Option<File>> {
        match File::open(path).await {
            Ok(file) => {
                let is_file = file
                    .metadata()
                    .await
                    .map_err(|e| StorageError::io("reading object file metadata", e))?
                    .is_file();
                Ok(is_file.then_some(file))
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(StorageError::io("opening object file", e)),
        }
    }

    /// Delete a file. A missing file counts as deleted. Empty parent
    /// directories are pruned up to (not including) the root.
    pub async fn remove(&self, path: &Path) -> StorageResult<()> {
        match fs::remove_file(path).await {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => return Err(StorageError::io("removing object file", e)),
        }

        let mut dir = path.parent();
        while let Some(current) = dir {
            if current == self.root || !current.starts_with(&self.root) {
                break;
            }
            // fails on non-empty directories, which ends the walk
            if fs::remove_dir(current).await.is_err() {
                break;
            }
            dir = current.parent();
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::stream;
    use tempfile::TempDir;

    fn chunks(parts: &[&'static [u8]]) -> impl Stream<Item = Result<Bytes, std::io::Error>> + Unpin {
        stream::iter(parts.iter().map(|p| Ok(Bytes::from_static(p))).collect::<Vec<_>>())
    }

    #[tokio::test]
    async fn test_write_read() {
        let temp = TempDir::new().unwrap();
        let backend = LocalBackend::new(temp.path().to_path_buf());
        let path = temp.path().join("a/b/c/file.txt");

        let mut file = backend.create_new(&path, "a/b/c/file.txt").await.unwrap();
        let size = backend
            .write_stream(&mut file, chunks(&[b"hello ", b"world"]))
            .await
            .unwrap();

        assert_eq!(size, 11);
        assert_eq!(std::fs::read(&path).unwrap(), b"hello world");
        assert!(backend.open(&path).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_create_new_is_exclusive() {
        let temp = TempDir::new().unwrap();
        let backend = LocalBackend::new(temp.path().to_path_buf());
        let path = temp.path().join("once.txt");

        backend.create_new(&path, "once.txt").await.unwrap();
        let second = backend.create_new(&path, "once.txt").await;
        assert!(matches!(second, Err(StorageError::ObjectAlreadyExists(_))));
    }

    #[tokio::test]
    async fn test_body_error_surfaces() {
        let temp = TempDir::new().unwrap();
        let backend = LocalBackend::new(temp.path().to_path_buf());
        let path = temp.path().join("broken.bin");
        let mut file = backend.create_new(&path, "broken.bin").await.unwrap();

        let body = stream::iter(vec![
            Ok(Bytes::from_static(b"part")),
            Err(std::io::Error::new(ErrorKind::ConnectionReset, "client went away")),
        ]);
        let result = backend.write_stream(&mut file, body).await;
        assert!(matches!(result, Err(StorageError::IoError(_))));
    }

    #[tokio::test]
    async fn test_remove_missing_is_ok_and_prunes_dirs() {
        let temp = TempDir::new().unwrap();
        let backend = LocalBackend::new(temp.path().to_path_buf());
        let path = temp.path().join("x/y/z.txt");

        let mut file = backend.create_new(&path, "x/y/z.txt").await.unwrap();
        backend.write_stream(&mut file, chunks(&[b"z"])).await.unwrap();
        drop(file);

        backend.remove(&path).await.unwrap();
        backend.remove(&path).await.unwrap();
        assert!(!temp.path().join("x").exists());
        assert!(temp.path().exists());
    }

    #[tokio::test]
    async fn test_open_missing_and_directory() {
        let temp = TempDir::new().unwrap();
        let backend = LocalBackend::new(temp.path().to_path_buf());
        std::fs::create_dir_all(temp.path().join("dir")).unwrap();

        assert!(backend.open(&temp.path().join("nope")).await.unwrap().is_none());
        assert!(backend.open(&temp.path().join("dir")).await.unwrap().is_none());
    }
}
