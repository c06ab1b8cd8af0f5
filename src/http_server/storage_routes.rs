//! Storage HTTP Routes
//!
//! Signed object endpoints for one adapter, nested under its base path:
//!
//! - `PUT  /{key}?contentType=&expires=&signature=` - create-once upload
//! - `GET  /{key}?expires=&signature=` - download
//! - `HEAD /{key}?expires=&signature=` - headers only

use std::sync::Arc;

use axum::{
    body::Body,
    extract::{Path, Query, State},
    http::{header, HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    routing::put,
    Json, Router,
};
use serde::Serialize;
use tokio_util::io::ReaderStream;
use tracing::{debug, warn};

use crate::file_storage::{LocalSignedAdapter, ObjectMetadata, SignedQuery, StorageError};

#[derive(Debug, Serialize)]
pub struct UploadResponse {
    pub key: String,
    pub size: u64,
    pub content_type: String,
}

/// Create storage routes for one adapter
pub fn storage_routes(adapter: Arc<LocalSignedAdapter>) -> Router {
    Router::new()
        .route(
            "/*key",
            put(upload_handler).get(download_handler).head(head_handler),
        )
        .with_state(adapter)
}

async fn upload_handler(
    State(adapter): State<Arc<LocalSignedAdapter>>,
    Path(key): Path<String>,
    Query(query): Query<SignedQuery>,
    headers: HeaderMap,
    body: Body,
) -> Result<Json<UploadResponse>, StorageError> {
    let content_type = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok());

    let metadata = adapter
        .upload(&key, content_type, &query, body.into_data_stream())
        .await
        .map_err(|e| rejected("PUT", &key, e))?;

    Ok(Json(UploadResponse {
        key: metadata.key,
        size: metadata.size,
        content_type: metadata.content_type,
    }))
}

async fn download_handler(
    State(adapter): State<Arc<LocalSignedAdapter>>,
    Path(key): Path<String>,
    Query(query): Query<SignedQuery>,
) -> Result<Response, StorageError> {
    let (metadata, file) = adapter
        .open_object(&key, &query)
        .await
        .map_err(|e| rejected("GET", &key, e))?;

    let body = Body::from_stream(ReaderStream::new(file));
    Ok((StatusCode::OK, object_headers(&metadata), body).into_response())
}

async fn head_handler(
    State(adapter): State<Arc<LocalSignedAdapter>>,
    Path(key): Path<String>,
    Query(query): Query<SignedQuery>,
) -> Result<Response, StorageError> {
    let (metadata, _file) = adapter
        .open_object(&key, &query)
        .await
        .map_err(|e| rejected("HEAD", &key, e))?;

    Ok((StatusCode::OK, object_headers(&metadata)).into_response())
}

fn object_headers(metadata: &ObjectMetadata) -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_str(&metadata.content_type)
            .unwrap_or_else(|_| HeaderValue::from_static("application/octet-stream")),
    );
    headers.insert(header::CONTENT_LENGTH, HeaderValue::from(metadata.size));
    if let Ok(value) = HeaderValue::from_str(&metadata.last_modified()) {
        headers.insert(header::LAST_MODIFIED, value);
    }
    if let Ok(value) = HeaderValue::from_str(&metadata.etag()) {
        headers.insert(header::ETAG, value);
    }
    headers
}

fn rejected(method: &str, key: &str, err: StorageError) -> StorageError {
    if err.status_code() >= 500 {
        warn!(method, key, error = %err, "storage request failed");
    } else {
        debug!(method, key, status = err.status_code(), error = %err, "storage request rejected");
    }
    err
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, Utc};

    #[test]
    fn test_object_headers() {
        let created = DateTime::<Utc>::from_timestamp(1_700_000_000, 0).unwrap();
        let metadata = ObjectMetadata::new("a/b.png", "image/png", created, 42);
        let headers = object_headers(&metadata);

        assert_eq!(headers[header::CONTENT_TYPE], "image/png");
        assert_eq!(headers[header::CONTENT_LENGTH], "42");
        assert_eq!(headers[header::LAST_MODIFIED], "Tue, 14 Nov 2023 22:13:20 GMT");
        assert_eq!(headers[header::ETAG], metadata.etag().as_str());
    }

    #[test]
    fn test_unrepresentable_content_type_falls_back() {
        let metadata = ObjectMetadata::new("k", "bad\nvalue", Utc::now(), 1);
        let headers = object_headers(&metadata);
        assert_eq!(headers[header::CONTENT_TYPE], "application/octet-stream");
    }
}
