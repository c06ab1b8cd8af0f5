//! CLI argument definitions using clap
//!
//! Commands:
//! - presigned-fs init --config <path>
//! - presigned-fs serve --config <path>
//! - presigned-fs sign-upload --config <path> <key> --content-type <mime>
//! - presigned-fs sign-download --config <path> <key>
//! - presigned-fs sweep --config <path>

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Presigned-URL object storage on a local filesystem
#[derive(Parser, Debug)]
#[command(name = "presigned-fs")]
#[command(version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Write a configuration file with a fresh secret and create the storage directory
    Init {
        /// Path to configuration file
        #[arg(long, default_value = "./presigned-fs.json")]
        config: PathBuf,

        /// Storage directory to record in the new configuration
        #[arg(long, default_value = "./data")]
        storage_dir: PathBuf,
    },

    /// Serve the signed endpoints and run the garbage collector
    Serve {
        /// Path to configuration file
        #[arg(long, default_value = "./presigned-fs.json")]
        config: PathBuf,
    },

    /// Print a presigned upload URL
    SignUpload {
        /// Path to configuration file
        #[arg(long, default_value = "./presigned-fs.json")]
        config: PathBuf,

        /// Adapter base path (defaults to the first configured adapter)
        #[arg(long)]
        adapter: Option<String>,

        /// Object key
        key: String,

        /// Content type the upload must carry
        #[arg(long)]
        content_type: String,

        /// Validity in seconds (defaults to default_url_ttl_secs)
        #[arg(long)]
        ttl: Option<u64>,
    },

    /// Print a download URL (presigned unless the adapter is public)
    SignDownload {
        /// Path to configuration file
        #[arg(long, default_value = "./presigned-fs.json")]
        config: PathBuf,

        /// Adapter base path (defaults to the first configured adapter)
        #[arg(long)]
        adapter: Option<String>,

        /// Object key
        key: String,

        /// Validity in seconds (defaults to default_url_ttl_secs)
        #[arg(long)]
        ttl: Option<u64>,
    },

    /// Run a single garbage collection sweep and print the report.
    ///
    /// The stores are owned by one process at a time; stop the server first.
    Sweep {
        /// Path to configuration file
        #[arg(long, default_value = "./presigned-fs.json")]
        config: PathBuf,
    },
}

impl Cli {
    /// Parse command line arguments
    pub fn parse_args() -> Self {
        Cli::parse()
    }
}
