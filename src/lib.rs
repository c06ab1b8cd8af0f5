//! presigned-fs - presigned-URL object storage on a local filesystem
//!
//! Callers obtain time-limited signed URLs to upload and download blobs.
//! Uploads are create-once, and every new object is reclaimed by the garbage
//! collector after the retention window unless it is explicitly retained.

pub mod cli;
pub mod clock;
pub mod config;
pub mod file_storage;
pub mod http_server;
pub mod observability;
