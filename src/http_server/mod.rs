//! # HTTP Server Module
//!
//! axum server exposing the signed object endpoints of each adapter.
//!
//! # Endpoints
//!
//! - `/health` - Health check
//! - `{base_path}/*key` - Signed PUT/GET/HEAD per adapter
//! - `{public_base_path}/*key` - Unsigned static reads for public adapters

pub mod config;
pub mod observability_routes;
pub mod server;
pub mod storage_routes;

pub use config::HttpServerConfig;
pub use server::{HttpServer, RouteTable};
pub use storage_routes::storage_routes;
