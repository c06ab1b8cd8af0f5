//! # Storage Adapters
//!
//! [`StorageAdapter`] is the capability interface upstream callers use to
//! hand out URLs and manage object lifecycles. [`LocalSignedAdapter`] is the
//! local-disk variant; it also implements the object operations the HTTP
//! handlers drive.
//!
//! Layout under the configured storage directory, per adapter namespace `ns`:
//!
//! ```text
//! <storage_dir>/<ns>/...                        object bytes
//! <storage_dir>/.meta/<ns>/metadata.json        metadata store
//! <storage_dir>/.meta/<ns>/deletion_candidates.json
//! ```

use std::collections::{BTreeMap, HashSet};
use std::fmt::{Debug, Display};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use bytes::Bytes;
use chrono::{DateTime, Duration, Utc};
use futures_util::Stream;
use serde::Serialize;
use tokio::fs::File;
use tracing::{debug, error, info};
use url::Url;

use super::errors::{StorageError, StorageResult};
use super::lifecycle::DeletionTracker;
use super::local::LocalBackend;
use super::metadata::{FileMetadataStore, MetadataStore, ObjectMetadata};
use super::path_guard::resolve_key;
use super::retry::RetryPolicy;
use super::signed_url::{url_for_path, Payload, SignedQuery, SignedUrl, UrlSigner};
use crate::clock::Clock;

/// Signed payload field carrying the upload content type
pub const CONTENT_TYPE_PARAM: &str = "contentType";

/// Directory under the storage dir holding per-namespace stores
pub const META_DIR: &str = ".meta";

/// Result of [`StorageAdapter::issue_upload_url`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UploadUrl {
    pub upload_url: String,
    /// Headers the client must send with the PUT
    pub extra_params: BTreeMap<String, String>,
}

/// Capability interface implemented by every storage backend
pub trait StorageAdapter: Send + Sync + Debug {
    /// URL authorizing one PUT of `key` with `content_type`, valid for `ttl`
    fn issue_upload_url(&self, key: &str, content_type: &str, ttl: Duration)
        -> StorageResult<UploadUrl>;

    /// URL for reading `key`; signed unless the adapter is public
    fn issue_download_url(&self, key: &str, ttl: Duration) -> StorageResult<String>;

    /// Let the next sweep past the retention window reclaim `key`
    fn mark_for_deletion(&self, key: &str) -> StorageResult<()>;

    /// Keep `key` forever
    fn mark_for_retention(&self, key: &str) -> StorageResult<()>;

    fn is_publicly_accessible(&self) -> bool;
}

/// Registry of URL prefixes and namespaces claimed by adapters.
///
/// Shared by every adapter of one server and passed in at construction.
#[derive(Debug, Default)]
pub struct AdapterContext {
    claimed: Mutex<HashSet<String>>,
}

impl AdapterContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim all `names` at once, or none of them.
    pub fn claim(&self, names: &[String]) -> StorageResult<()> {
        let mut claimed = self
            .claimed
            .lock()
            .map_err(|_| StorageError::Internal("Lock poisoned".to_string()))?;

        if let Some(taken) = names.iter().find(|n| claimed.contains(*n)) {
            return Err(StorageError::ConfigError(format!(
                "{} is already claimed by another adapter",
                taken
            )));
        }

        let mut unique = HashSet::new();
        if let Some(dup) = names.iter().find(|n| !unique.insert(n.as_str())) {
            return Err(StorageError::ConfigError(format!("{} is claimed twice", dup)));
        }

        claimed.extend(names.iter().cloned());
        Ok(())
    }
}

/// Settings for one local adapter instance
#[derive(Debug, Clone)]
pub struct AdapterSettings {
    /// URL prefix of the signed routes, e.g. `/uploads`
    pub base_path: String,
    /// Externally visible server URL used to build issued URLs
    pub public_url: Url,
    pub storage_dir: PathBuf,
    pub secret: Vec<u8>,
    /// Serve objects unsigned from `public_base_path`
    pub public: bool,
    pub public_base_path: Option<String>,
}

impl AdapterSettings {
    pub fn new(base_path: &str, public_url: Url, storage_dir: impl AsRef<Path>, secret: &[u8]) -> Self {
        Self {
            base_path: base_path.to_string(),
            public_url,
            storage_dir: storage_dir.as_ref().to_path_buf(),
            secret: secret.to_vec(),
            public: false,
            public_base_path: None,
        }
    }

    /// Public mount path; defaults to `/public<base_path>`
    pub fn effective_public_base_path(&self) -> String {
        self.public_base_path
            .clone()
            .unwrap_or_else(|| format!("/public{}", self.base_path))
    }
}

/// Local-disk adapter issuing HMAC-signed URLs
#[derive(Debug)]
pub struct LocalSignedAdapter {
    base_path: String,
    public_url: Url,
    public_base_path: Option<String>,
    backend: LocalBackend,
    signer: UrlSigner,
    metadata: Arc<dyn MetadataStore>,
    tracker: Arc<DeletionTracker>,
    clock: Arc<dyn Clock>,
    retry: RetryPolicy,
}

impl LocalSignedAdapter {
    /// Validate settings, prepare the namespace directories, open the stores
    /// and claim the adapter's prefixes in `ctx`.
    pub fn open(
        ctx: &AdapterContext,
        settings: AdapterSettings,
        clock: Arc<dyn Clock>,
    ) -> StorageResult<Self> {
        if settings.secret.is_empty() {
            return Err(StorageError::ConfigError("signing secret is empty".to_string()));
        }
        validate_mount_path(&settings.base_path)?;
        let public_base_path = if settings.public {
            let path = settings.effective_public_base_path();
            validate_mount_path(&path)?;
            Some(path)
        } else {
            None
        };

        let namespace = namespace_for(&settings.base_path);
        let root = settings.storage_dir.join(&namespace);
        ensure_writable_dir(&root)?;
        let meta_dir = settings.storage_dir.join(META_DIR).join(&namespace);
        ensure_writable_dir(&meta_dir)?;

        let metadata: Arc<dyn MetadataStore> =
            Arc::new(FileMetadataStore::open(meta_dir.join("metadata.json"))?);
        let tracker = Arc::new(DeletionTracker::open(
            meta_dir.join("deletion_candidates.json"),
            metadata.clone(),
        )?);

        let mut claims = vec![settings.base_path.clone(), format!("ns:{}", namespace)];
        claims.extend(public_base_path.iter().cloned());
        ctx.claim(&claims)?;

        info!(
            base_path = %settings.base_path,
            root = %root.display(),
            public = settings.public,
            "storage adapter ready"
        );

        Ok(Self {
            base_path: settings.base_path,
            public_url: settings.public_url,
            public_base_path,
            backend: LocalBackend::new(root),
            signer: UrlSigner::new(&settings.secret, clock.clone()),
            metadata,
            tracker,
            clock,
            retry: RetryPolicy::default(),
        })
    }

    /// Replace the retry policy used for store writes and reclamation
    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn base_path(&self) -> &str {
        &self.base_path
    }

    pub fn root(&self) -> &Path {
        self.backend.root()
    }

    /// Mount path and directory for unsigned static serving, if public
    pub fn public_mount(&self) -> Option<(&str, &Path)> {
        self.public_base_path
            .as_deref()
            .map(|path| (path, self.backend.root()))
    }

    pub fn metadata(&self) -> &Arc<dyn MetadataStore> {
        &self.metadata
    }

    pub fn tracker(&self) -> &Arc<DeletionTracker> {
        &self.tracker
    }

    /// The URL path a signature for `key` covers
    pub fn signed_path(&self, key: &str) -> String {
        format!("{}/{}", self.base_path, key)
    }

    /// Store an uploaded object.
    ///
    /// Checks, in order: content-type header present, key inside the root,
    /// signature valid and unexpired, header matches the signed content type,
    /// object not yet present. The body is streamed to disk; metadata and the
    /// deletion candidate entry are recorded afterwards.
    pub async fn upload<S, E>(
        &self,
        key: &str,
        content_type: Option<&str>,
        query: &SignedQuery,
        body: S,
    ) -> StorageResult<ObjectMetadata>
    where
        S: Stream<Item = Result<Bytes, E>> + Unpin,
        E: Display,
    {
        let content_type = content_type.ok_or(StorageError::MissingContentType)?;
        let path = resolve_key(self.root(), key)?;

        let signed_type = query.content_type.clone().unwrap_or_default();
        let mut payload = Payload::new();
        payload.insert(CONTENT_TYPE_PARAM.to_string(), signed_type.clone());
        self.verify(key, query, payload)?;

        if content_type != signed_type {
            return Err(StorageError::ContentTypeMismatch {
                signed: signed_type,
                actual: content_type.to_string(),
            });
        }

        let mut file = self.backend.create_new(&path, key).await?;
        let size = match self.backend.write_stream(&mut file, body).await {
            Ok(size) => size,
            Err(err) => {
                drop(file);
                self.discard(&path, key).await;
                return Err(err);
            }
        };
        drop(file);

        let metadata = ObjectMetadata::new(key, content_type, self.clock.now(), size);
        if let Err(err) = self.record(&metadata).await {
            error!(key, error = %err, "failed to record uploaded object, rolling back");
            let store = self.metadata.clone();
            let owned = key.to_string();
            if let Err(rollback) = on_blocking_pool(move || store.delete(&owned)).await {
                error!(key, error = %rollback, "failed to remove metadata of rolled back upload");
            }
            self.discard(&path, key).await;
            return Err(err);
        }

        info!(key, size, content_type, "object uploaded");
        Ok(metadata)
    }

    /// Authorize a read of `key` and open it.
    ///
    /// A missing file or a missing metadata record both read as not found.
    pub async fn open_object(
        &self,
        key: &str,
        query: &SignedQuery,
    ) -> StorageResult<(ObjectMetadata, File)> {
        let path = resolve_key(self.root(), key)?;
        self.verify(key, query, Payload::new())?;

        let file = self
            .backend
            .open(&path)
            .await?
            .ok_or_else(|| StorageError::ObjectNotFound(key.to_string()))?;
        let metadata = self
            .metadata
            .get(key)?
            .ok_or_else(|| StorageError::ObjectNotFound(key.to_string()))?;

        Ok((metadata, file))
    }

    /// Delete the file, the metadata record and the candidate entry, in that
    /// order. Every step tolerates an already-missing target, so a partially
    /// reclaimed key is finished off by the next call.
    pub async fn reclaim(&self, key: &str) -> StorageResult<()> {
        match resolve_key(self.root(), key) {
            Ok(path) => {
                self.retry
                    .run("remove object file", || self.backend.remove(&path))
                    .await?
            }
            // nothing on disk can live under an unsafe key
            Err(_) => debug!(key, "skipping file removal for unsafe key"),
        }

        self.retry
            .run("delete metadata", || {
                let store = self.metadata.clone();
                let key = key.to_string();
                on_blocking_pool(move || store.delete(&key))
            })
            .await?;
        self.retry
            .run("remove deletion candidate", || {
                let tracker = self.tracker.clone();
                let key = key.to_string();
                on_blocking_pool(move || tracker.remove(&key))
            })
            .await
    }

    /// Whether a candidate created at `created_at` is past `retention` now
    pub fn is_expired(&self, created_at: DateTime<Utc>, retention: Duration) -> bool {
        self.clock.now() - created_at > retention
    }

    fn verify(&self, key: &str, query: &SignedQuery, payload: Payload) -> StorageResult<()> {
        let token = SignedUrl::from_request(
            &self.signed_path(key),
            query.expires.as_deref(),
            query.signature.as_deref(),
            payload,
        )?;
        self.signer.verify(&token)
    }

    async fn record(&self, metadata: &ObjectMetadata) -> StorageResult<()> {
        self.retry
            .run("put metadata", || {
                let store = self.metadata.clone();
                let metadata = metadata.clone();
                on_blocking_pool(move || store.put(&metadata))
            })
            .await?;
        self.retry
            .run("mark for deletion", || {
                let tracker = self.tracker.clone();
                let key = metadata.key.clone();
                on_blocking_pool(move || tracker.mark_for_deletion(&key))
            })
            .await
    }

    async fn discard(&self, path: &Path, key: &str) {
        if let Err(err) = self.backend.remove(path).await {
            error!(key, error = %err, "failed to remove partial upload");
        }
    }
}

impl StorageAdapter for LocalSignedAdapter {
    fn issue_upload_url(
        &self,
        key: &str,
        content_type: &str,
        ttl: Duration,
    ) -> StorageResult<UploadUrl> {
        resolve_key(self.root(), key)?;

        let mut payload = Payload::new();
        payload.insert(CONTENT_TYPE_PARAM.to_string(), content_type.to_string());
        let url = self
            .signer
            .presign(&self.public_url, &self.signed_path(key), ttl, payload)?;

        let mut extra_params = BTreeMap::new();
        extra_params.insert("Content-Type".to_string(), content_type.to_string());

        Ok(UploadUrl {
            upload_url: url.to_string(),
            extra_params,
        })
    }

    fn issue_download_url(&self, key: &str, ttl: Duration) -> StorageResult<String> {
        resolve_key(self.root(), key)?;

        if let Some(public_base) = &self.public_base_path {
            let url = url_for_path(&self.public_url, &format!("{}/{}", public_base, key))?;
            return Ok(url.to_string());
        }

        let url = self
            .signer
            .presign(&self.public_url, &self.signed_path(key), ttl, Payload::new())?;
        Ok(url.to_string())
    }

    fn mark_for_deletion(&self, key: &str) -> StorageResult<()> {
        self.tracker.mark_for_deletion(key)
    }

    fn mark_for_retention(&self, key: &str) -> StorageResult<()> {
        self.tracker.mark_for_retention(key)
    }

    fn is_publicly_accessible(&self) -> bool {
        self.public_base_path.is_some()
    }
}

/// A mount path is `/`-prefixed, not `/` itself, without a trailing slash or
/// empty, dot or hidden segments.
fn validate_mount_path(path: &str) -> StorageResult<()> {
    let invalid = || StorageError::ConfigError(format!("invalid mount path: {:?}", path));

    let rest = path.strip_prefix('/').ok_or_else(invalid)?;
    if rest.is_empty() {
        return Err(invalid());
    }
    for segment in rest.split('/') {
        if segment.is_empty() || segment.starts_with('.') {
            return Err(invalid());
        }
    }
    Ok(())
}

/// Run a store mutation on the blocking pool. The stores rewrite and fsync
/// their file on every change.
async fn on_blocking_pool<T, F>(op: F) -> StorageResult<T>
where
    F: FnOnce() -> StorageResult<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(op)
        .await
        .map_err(|e| StorageError::Internal(format!("store task failed: {}", e)))?
}

fn namespace_for(base_path: &str) -> String {
    base_path.trim_matches('/').replace('/', "_")
}

/// Create `dir` if needed and prove it is writable
fn ensure_writable_dir(dir: &Path) -> StorageResult<()> {
    let unusable =
        |e: std::io::Error| StorageError::ConfigError(format!("{} is not usable: {}", dir.display(), e));

    std::fs::create_dir_all(dir).map_err(unusable)?;
    let probe = dir.join(format!(".probe-{}", uuid::Uuid::new_v4()));
    std::fs::write(&probe, b"").map_err(unusable)?;
    std::fs::remove_file(&probe).map_err(unusable)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use futures_util::stream;
    use tempfile::TempDir;

    fn adapter(temp: &TempDir, ctx: &AdapterContext, base: &str) -> StorageResult<LocalSignedAdapter> {
        let settings = AdapterSettings::new(
            base,
            Url::parse("http://localhost:8080").unwrap(),
            temp.path(),
            b"secret",
        );
        LocalSignedAdapter::open(ctx, settings, Arc::new(ManualClock::new(Utc::now())))
    }

    fn body(data: &'static [u8]) -> impl Stream<Item = Result<Bytes, std::io::Error>> + Unpin {
        stream::iter(vec![Ok(Bytes::from_static(data))])
    }

    fn query_of(url: &str) -> SignedQuery {
        let url = Url::parse(url).unwrap();
        let mut query = SignedQuery::default();
        for (k, v) in url.query_pairs() {
            match k.as_ref() {
                "contentType" => query.content_type = Some(v.into_owned()),
                "expires" => query.expires = Some(v.into_owned()),
                "signature" => query.signature = Some(v.into_owned()),
                _ => {}
            }
        }
        query
    }

    #[test]
    fn test_duplicate_base_path_rejected() {
        let temp = TempDir::new().unwrap();
        let ctx = AdapterContext::new();
        adapter(&temp, &ctx, "/uploads").unwrap();

        let second = adapter(&temp, &ctx, "/uploads");
        assert!(matches!(second, Err(StorageError::ConfigError(_))));
    }

    #[test]
    fn test_separate_contexts_do_not_interfere() {
        let temp_a = TempDir::new().unwrap();
        let temp_b = TempDir::new().unwrap();
        adapter(&temp_a, &AdapterContext::new(), "/uploads").unwrap();
        adapter(&temp_b, &AdapterContext::new(), "/uploads").unwrap();
    }

    #[test]
    fn test_colliding_namespaces_rejected() {
        let temp = TempDir::new().unwrap();
        let ctx = AdapterContext::new();
        adapter(&temp, &ctx, "/a/b").unwrap();
        assert!(adapter(&temp, &ctx, "/a_b").is_err());
    }

    #[test]
    fn test_invalid_mount_paths() {
        for path in ["", "/", "uploads", "/uploads/", "/.meta", "/a//b"] {
            assert!(validate_mount_path(path).is_err(), "{:?}", path);
        }
        assert!(validate_mount_path("/files/v1").is_ok());
    }

    #[test]
    fn test_empty_secret_rejected() {
        let temp = TempDir::new().unwrap();
        let settings = AdapterSettings::new(
            "/uploads",
            Url::parse("http://localhost").unwrap(),
            temp.path(),
            b"",
        );
        let result = LocalSignedAdapter::open(
            &AdapterContext::new(),
            settings,
            Arc::new(ManualClock::new(Utc::now())),
        );
        assert!(matches!(result, Err(StorageError::ConfigError(_))));
    }

    #[test]
    fn test_issue_upload_url() {
        let temp = TempDir::new().unwrap();
        let adapter = adapter(&temp, &AdapterContext::new(), "/uploads").unwrap();

        let issued = adapter
            .issue_upload_url("a/b.png", "image/png", Duration::seconds(60))
            .unwrap();
        assert!(issued.upload_url.starts_with("http://localhost:8080/uploads/a/b.png?"));
        assert_eq!(issued.extra_params.get("Content-Type").unwrap(), "image/png");

        assert!(adapter
            .issue_upload_url("../../etc/passwd", "image/png", Duration::seconds(60))
            .is_err());
    }

    #[tokio::test]
    async fn test_upload_then_open() {
        let temp = TempDir::new().unwrap();
        let adapter = adapter(&temp, &AdapterContext::new(), "/uploads").unwrap();

        let issued = adapter
            .issue_upload_url("a/b.png", "image/png", Duration::seconds(60))
            .unwrap();
        let meta = adapter
            .upload("a/b.png", Some("image/png"), &query_of(&issued.upload_url), body(b"png!"))
            .await
            .unwrap();
        assert_eq!(meta.size, 4);
        assert!(adapter.tracker().is_candidate("a/b.png").unwrap());

        let download = adapter.issue_download_url("a/b.png", Duration::seconds(60)).unwrap();
        let (found, _file) = adapter.open_object("a/b.png", &query_of(&download)).await.unwrap();
        assert_eq!(found, meta);
    }

    #[tokio::test]
    async fn test_download_url_cannot_upload() {
        let temp = TempDir::new().unwrap();
        let adapter = adapter(&temp, &AdapterContext::new(), "/uploads").unwrap();

        let download = adapter.issue_download_url("k.txt", Duration::seconds(60)).unwrap();
        let mut query = query_of(&download);
        query.content_type = Some("text/plain".to_string());

        let result = adapter
            .upload("k.txt", Some("text/plain"), &query, body(b"x"))
            .await;
        assert!(matches!(result, Err(StorageError::InvalidSignature)));
        assert!(!adapter.root().join("k.txt").exists());
    }

    #[tokio::test]
    async fn test_reclaim_is_idempotent() {
        let temp = TempDir::new().unwrap();
        let adapter = adapter(&temp, &AdapterContext::new(), "/uploads").unwrap();
        let issued = adapter
            .issue_upload_url("x.txt", "text/plain", Duration::seconds(60))
            .unwrap();
        adapter
            .upload("x.txt", Some("text/plain"), &query_of(&issued.upload_url), body(b"x"))
            .await
            .unwrap();

        adapter.reclaim("x.txt").await.unwrap();
        adapter.reclaim("x.txt").await.unwrap();

        assert!(!adapter.root().join("x.txt").exists());
        assert!(adapter.metadata().get("x.txt").unwrap().is_none());
        assert!(!adapter.tracker().is_candidate("x.txt").unwrap());
    }

    #[tokio::test]
    async fn test_failed_metadata_write_rolls_back_upload() {
        let temp = TempDir::new().unwrap();
        let adapter = adapter(&temp, &AdapterContext::new(), "/uploads")
            .unwrap()
            .with_retry_policy(RetryPolicy::none());

        // a directory in place of the store file makes every save fail
        let store_file = temp.path().join(META_DIR).join("uploads").join("metadata.json");
        let _ = std::fs::remove_file(&store_file);
        std::fs::create_dir_all(store_file.join("occupied")).unwrap();

        let issued = adapter
            .issue_upload_url("doc.txt", "text/plain", Duration::seconds(60))
            .unwrap();
        let err = adapter
            .upload("doc.txt", Some("text/plain"), &query_of(&issued.upload_url), body(b"data"))
            .await
            .unwrap_err();

        assert_eq!(err.status_code(), 500);
        assert!(!adapter.root().join("doc.txt").exists());
        assert!(adapter.metadata().get("doc.txt").unwrap().is_none());
        assert!(!adapter.tracker().is_candidate("doc.txt").unwrap());
    }

    #[test]
    fn test_non_canonical_keys_get_no_urls() {
        let temp = TempDir::new().unwrap();
        let adapter = adapter(&temp, &AdapterContext::new(), "/uploads").unwrap();

        for key in ["a/./b.txt", "a//c.txt", "a/"] {
            assert!(matches!(
                adapter.issue_upload_url(key, "text/plain", Duration::seconds(60)),
                Err(StorageError::InvalidPath(_))
            ));
            assert!(adapter.issue_download_url(key, Duration::seconds(60)).is_err());
        }
    }

    #[test]
    fn test_overflowing_ttl_is_an_error() {
        let temp = TempDir::new().unwrap();
        let adapter = adapter(&temp, &AdapterContext::new(), "/uploads").unwrap();

        assert!(matches!(
            adapter.issue_upload_url("k.txt", "text/plain", Duration::MAX),
            Err(StorageError::InvalidTtl(_))
        ));
        assert!(matches!(
            adapter.issue_download_url("k.txt", Duration::MAX),
            Err(StorageError::InvalidTtl(_))
        ));
    }

    #[test]
    fn test_public_download_url_is_unsigned() {
        let temp = TempDir::new().unwrap();
        let mut settings = AdapterSettings::new(
            "/uploads",
            Url::parse("http://localhost:8080").unwrap(),
            temp.path(),
            b"secret",
        );
        settings.public = true;
        let adapter = LocalSignedAdapter::open(
            &AdapterContext::new(),
            settings,
            Arc::new(ManualClock::new(Utc::now())),
        )
        .unwrap();

        assert!(adapter.is_publicly_accessible());
        let url = adapter.issue_download_url("a/b.png", Duration::seconds(60)).unwrap();
        assert_eq!(url, "http://localhost:8080/public/uploads/a/b.png");
        assert_eq!(adapter.public_mount().unwrap().0, "/public/uploads");
    }
}
