//! # HTTP Server
//!
//! Mounts every adapter's signed routes (and public static mounts) through an
//! explicit, ordered [`RouteTable`], and runs the garbage collector next to
//! the listener.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use axum::Router;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

use super::config::HttpServerConfig;
use super::observability_routes::health_routes;
use super::storage_routes::storage_routes;
use crate::clock::Clock;
use crate::config::Config;
use crate::file_storage::{
    AdapterContext, GarbageCollector, LocalSignedAdapter, StorageError, StorageResult,
};

enum Mount {
    Root(Router),
    Nested(String, Router),
    Static(String, PathBuf),
}

/// Routes in the order they are registered with the router.
///
/// Prefixes are unique; pushing a prefix twice is an error.
#[derive(Default)]
pub struct RouteTable {
    mounts: Vec<Mount>,
}

impl RouteTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Routes matched at the root (e.g. `/health`)
    pub fn push_root(&mut self, router: Router) {
        self.mounts.push(Mount::Root(router));
    }

    pub fn push_nested(&mut self, prefix: &str, router: Router) -> StorageResult<()> {
        self.ensure_free(prefix)?;
        self.mounts.push(Mount::Nested(prefix.to_string(), router));
        Ok(())
    }

    /// Unsigned static file serving of `dir` under `prefix`
    pub fn push_static(&mut self, prefix: &str, dir: PathBuf) -> StorageResult<()> {
        self.ensure_free(prefix)?;
        self.mounts.push(Mount::Static(prefix.to_string(), dir));
        Ok(())
    }

    /// Mounted prefixes in registration order
    pub fn prefixes(&self) -> Vec<&str> {
        self.mounts
            .iter()
            .filter_map(|mount| match mount {
                Mount::Root(_) => None,
                Mount::Nested(prefix, _) | Mount::Static(prefix, _) => Some(prefix.as_str()),
            })
            .collect()
    }

    pub fn into_router(self) -> Router {
        self.mounts
            .into_iter()
            .fold(Router::new(), |router, mount| match mount {
                Mount::Root(routes) => router.merge(routes),
                Mount::Nested(prefix, routes) => router.nest(&prefix, routes),
                Mount::Static(prefix, dir) => router.nest_service(&prefix, ServeDir::new(dir)),
            })
    }

    fn ensure_free(&self, prefix: &str) -> StorageResult<()> {
        if self.prefixes().contains(&prefix) {
            return Err(StorageError::ConfigError(format!(
                "route prefix {} is mounted twice",
                prefix
            )));
        }
        Ok(())
    }
}

/// HTTP server hosting one or more storage adapters
pub struct HttpServer {
    config: HttpServerConfig,
    adapters: Vec<Arc<LocalSignedAdapter>>,
    gc: GarbageCollector,
    router: Router,
}

impl HttpServer {
    /// Open every configured adapter and build the router.
    ///
    /// Fails before anything is served if an adapter cannot be opened.
    pub fn from_config(config: &Config, clock: Arc<dyn Clock>) -> StorageResult<Self> {
        config.validate()?;

        let ctx = AdapterContext::new();
        let mut adapters = Vec::new();
        for settings in config.adapter_settings()? {
            adapters.push(Arc::new(LocalSignedAdapter::open(&ctx, settings, clock.clone())?));
        }

        let router = Self::build_router(&config.http, &adapters)?;
        let gc = GarbageCollector::new(adapters.clone(), config.gc.retention()?, config.gc.interval());

        Ok(Self {
            config: config.http.clone(),
            adapters,
            gc,
            router,
        })
    }

    /// Build the combined router with all endpoints
    pub fn build_router(
        config: &HttpServerConfig,
        adapters: &[Arc<LocalSignedAdapter>],
    ) -> StorageResult<Router> {
        let mut table = RouteTable::new();
        table.push_root(health_routes());
        for adapter in adapters {
            table.push_nested(adapter.base_path(), storage_routes(adapter.clone()))?;
        }
        for adapter in adapters {
            if let Some((prefix, dir)) = adapter.public_mount() {
                table.push_static(prefix, dir.to_path_buf())?;
            }
        }

        let cors = if config.cors_origins.is_empty() {
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any)
        } else {
            let origins: Vec<_> = config
                .cors_origins
                .iter()
                .filter_map(|s| s.parse().ok())
                .collect();

            CorsLayer::new()
                .allow_origin(AllowOrigin::list(origins))
                .allow_methods(Any)
                .allow_headers(Any)
        };

        Ok(table
            .into_router()
            .layer(TraceLayer::new_for_http())
            .layer(cors))
    }

    /// Get the socket address
    pub fn socket_addr(&self) -> String {
        self.config.socket_addr()
    }

    pub fn adapters(&self) -> &[Arc<LocalSignedAdapter>] {
        &self.adapters
    }

    /// Get the router (for testing)
    pub fn router(self) -> Router {
        self.router
    }

    /// Serve until ctrl-c, with the garbage collector running alongside
    pub async fn start(self) -> StorageResult<()> {
        let addr: SocketAddr = self.socket_addr().parse().map_err(|e| {
            StorageError::ConfigError(format!("Invalid socket address {}: {}", self.socket_addr(), e))
        })?;

        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| StorageError::ConfigError(format!("cannot bind {}: {}", addr, e)))?;

        let (shutdown_tx, shutdown_rx) = watch::channel(());
        let gc_task = tokio::spawn(self.gc.run(shutdown_rx));

        for adapter in &self.adapters {
            info!(base_path = adapter.base_path(), root = %adapter.root().display(), "mounted adapter");
        }
        info!(%addr, "listening");

        let served = axum::serve(listener, self.router)
            .with_graceful_shutdown(shutdown_signal())
            .await;

        let _ = shutdown_tx.send(());
        if let Err(e) = gc_task.await {
            error!(error = %e, "garbage collector task failed");
        }

        served.map_err(|e| StorageError::io("serving HTTP", e))
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "cannot listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("shutdown requested");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::SystemClock;
    use crate::config::AdapterConfig;
    use tempfile::TempDir;

    fn config(temp: &TempDir) -> Config {
        Config::new(temp.path(), "secret")
    }

    #[test]
    fn test_server_creation() {
        let temp = TempDir::new().unwrap();
        let server = HttpServer::from_config(&config(&temp), Arc::new(SystemClock)).unwrap();
        assert_eq!(server.socket_addr(), "0.0.0.0:8080");
        assert_eq!(server.adapters().len(), 1);
    }

    #[test]
    fn test_duplicate_adapter_is_fatal() {
        let temp = TempDir::new().unwrap();
        let mut config = config(&temp);
        config.adapters.push(config.adapters[0].clone());

        let result = HttpServer::from_config(&config, Arc::new(SystemClock));
        assert!(matches!(result, Err(StorageError::ConfigError(_))));
    }

    #[test]
    fn test_oversized_retention_is_a_config_error() {
        let temp = TempDir::new().unwrap();
        let mut config = config(&temp);
        config.gc.retention_secs = u64::MAX / 2;

        let result = HttpServer::from_config(&config, Arc::new(SystemClock));
        assert!(matches!(result, Err(StorageError::ConfigError(_))));
    }

    #[test]
    fn test_route_table_keeps_order() {
        let mut table = RouteTable::new();
        table.push_root(health_routes());
        table.push_nested("/b", Router::new()).unwrap();
        table.push_nested("/a", Router::new()).unwrap();
        table.push_static("/public/a", PathBuf::from("/tmp")).unwrap();

        assert_eq!(table.prefixes(), vec!["/b", "/a", "/public/a"]);
        assert!(table.push_static("/a", PathBuf::from("/tmp")).is_err());
    }

    #[test]
    fn test_public_adapter_router_builds() {
        let temp = TempDir::new().unwrap();
        let mut config = config(&temp);
        config.adapters.push(AdapterConfig {
            base_path: "/avatars".to_string(),
            public: true,
            public_base_path: None,
        });

        let server = HttpServer::from_config(&config, Arc::new(SystemClock)).unwrap();
        let _router = server.router();
    }
}
