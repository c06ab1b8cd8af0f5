//! CLI command implementations

use std::fs;
use std::io::{self, Write};
use std::path::Path;
use std::sync::Arc;

use chrono::Duration;
use rand::RngCore;
use serde::Serialize;

use super::args::Command;
use super::errors::{CliError, CliResult};
use crate::clock::SystemClock;
use crate::config::{bounded_seconds, Config};
use crate::file_storage::{AdapterContext, GarbageCollector, LocalSignedAdapter, StorageAdapter};
use crate::http_server::HttpServer;
use crate::observability::init_logging;

/// Dispatch a parsed command
pub fn run_command(command: Command) -> CliResult<()> {
    match command {
        Command::Init {
            config,
            storage_dir,
        } => init(&config, &storage_dir),
        Command::Serve { config } => serve(&config),
        Command::SignUpload {
            config,
            adapter,
            key,
            content_type,
            ttl,
        } => sign_upload(&config, adapter.as_deref(), &key, &content_type, ttl),
        Command::SignDownload {
            config,
            adapter,
            key,
            ttl,
        } => sign_download(&config, adapter.as_deref(), &key, ttl),
        Command::Sweep { config } => sweep(&config),
    }
}

/// Write a new configuration with a random secret and create the storage dir
pub fn init(config_path: &Path, storage_dir: &Path) -> CliResult<()> {
    if config_path.exists() {
        return Err(CliError::already_initialized(config_path));
    }

    let mut secret = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut secret);

    fs::create_dir_all(storage_dir).map_err(|e| {
        CliError::config_error(format!("cannot create {}: {}", storage_dir.display(), e))
    })?;

    let config = Config::new(storage_dir, hex::encode(secret));
    config.save(config_path)?;

    println!("Wrote {}", config_path.display());
    Ok(())
}

/// Validate the configuration, then serve until interrupted
pub fn serve(config_path: &Path) -> CliResult<()> {
    let config = Config::load(config_path)?;
    init_logging(config.json_logs);

    // Adapters open (and the root is checked) before the runtime starts serving
    let server = HttpServer::from_config(&config, Arc::new(SystemClock))?;

    let runtime = tokio::runtime::Runtime::new()?;
    runtime.block_on(server.start())?;
    Ok(())
}

pub fn sign_upload(
    config_path: &Path,
    adapter: Option<&str>,
    key: &str,
    content_type: &str,
    ttl: Option<u64>,
) -> CliResult<()> {
    let config = Config::load(config_path)?;
    let adapter = open_adapter(&config, adapter)?;
    let issued = adapter.issue_upload_url(key, content_type, ttl_or_default(&config, ttl)?)?;
    write_json(&issued)
}

pub fn sign_download(
    config_path: &Path,
    adapter: Option<&str>,
    key: &str,
    ttl: Option<u64>,
) -> CliResult<()> {
    let config = Config::load(config_path)?;
    let adapter = open_adapter(&config, adapter)?;
    let url = adapter.issue_download_url(key, ttl_or_default(&config, ttl)?)?;
    println!("{}", url);
    Ok(())
}

/// One garbage collection pass over every configured adapter
pub fn sweep(config_path: &Path) -> CliResult<()> {
    let config = Config::load(config_path)?;
    init_logging(config.json_logs);

    let ctx = AdapterContext::new();
    let mut adapters = Vec::new();
    for settings in config.adapter_settings()? {
        adapters.push(Arc::new(LocalSignedAdapter::open(
            &ctx,
            settings,
            Arc::new(SystemClock),
        )?));
    }

    let gc = GarbageCollector::new(adapters, config.gc.retention()?, config.gc.interval());
    let runtime = tokio::runtime::Runtime::new()?;
    let report = runtime.block_on(gc.sweep_once());
    write_json(&report)
}

fn open_adapter(config: &Config, base_path: Option<&str>) -> CliResult<Box<dyn StorageAdapter>> {
    let settings = config.adapter_settings()?;
    let chosen = match base_path {
        Some(path) => settings
            .into_iter()
            .find(|s| s.base_path == path)
            .ok_or_else(|| CliError::config_error(format!("no adapter mounted at {}", path)))?,
        None => settings
            .into_iter()
            .next()
            .ok_or_else(|| CliError::config_error("no adapters configured"))?,
    };

    let adapter = LocalSignedAdapter::open(&AdapterContext::new(), chosen, Arc::new(SystemClock))?;
    Ok(Box::new(adapter))
}

fn ttl_or_default(config: &Config, ttl: Option<u64>) -> CliResult<Duration> {
    let ttl = match ttl {
        Some(secs) => bounded_seconds("--ttl", secs)?,
        None => config.default_url_ttl()?,
    };
    Ok(ttl)
}

fn write_json<T: Serialize>(value: &T) -> CliResult<()> {
    let stdout = io::stdout();
    let mut out = stdout.lock();
    serde_json::to_writer_pretty(&mut out, value)?;
    writeln!(out)?;
    Ok(())
}
