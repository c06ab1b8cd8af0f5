//! CLI-specific error types
//!
//! Every CLI error ends the process with a non-zero exit code.

use std::fmt;
use std::io;

use crate::file_storage::StorageError;

/// CLI error codes
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CliErrorCode {
    /// Configuration file error
    ConfigError,
    /// I/O error (stdout, runtime)
    IoError,
    /// Config file already present
    AlreadyInitialized,
    /// Storage operation failed
    StorageFailed,
}

impl CliErrorCode {
    /// Get the error code string
    pub fn code(&self) -> &'static str {
        match self {
            Self::ConfigError => "PFS_CLI_CONFIG_ERROR",
            Self::IoError => "PFS_CLI_IO_ERROR",
            Self::AlreadyInitialized => "PFS_CLI_ALREADY_INITIALIZED",
            Self::StorageFailed => "PFS_CLI_STORAGE_FAILED",
        }
    }
}

/// CLI error
#[derive(Debug)]
pub struct CliError {
    code: CliErrorCode,
    message: String,
}

impl CliError {
    /// Create a new CLI error
    pub fn new(code: CliErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    /// Config error
    pub fn config_error(msg: impl Into<String>) -> Self {
        Self::new(CliErrorCode::ConfigError, msg)
    }

    /// I/O error
    pub fn io_error(msg: impl Into<String>) -> Self {
        Self::new(CliErrorCode::IoError, msg)
    }

    /// Already initialized
    pub fn already_initialized(path: &std::path::Path) -> Self {
        Self::new(
            CliErrorCode::AlreadyInitialized,
            format!("{} already exists", path.display()),
        )
    }

    /// Get the error code
    pub fn code(&self) -> &CliErrorCode {
        &self.code
    }

    /// Get the error message
    pub fn message(&self) -> &str {
        &self.message
    }
}

impl fmt::Display for CliError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code.code(), self.message)
    }
}

impl std::error::Error for CliError {}

impl From<io::Error> for CliError {
    fn from(e: io::Error) -> Self {
        Self::io_error(e.to_string())
    }
}

impl From<serde_json::Error> for CliError {
    fn from(e: serde_json::Error) -> Self {
        Self::io_error(format!("JSON error: {}", e))
    }
}

impl From<StorageError> for CliError {
    fn from(e: StorageError) -> Self {
        match e {
            StorageError::ConfigError(msg) => Self::config_error(msg),
            other => Self::new(CliErrorCode::StorageFailed, other.to_string()),
        }
    }
}

/// CLI result type
pub type CliResult<T> = Result<T, CliError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_storage_config_error_maps_to_config_code() {
        let err: CliError = StorageError::ConfigError("secret must not be empty".into()).into();
        assert_eq!(err.code(), &CliErrorCode::ConfigError);
        assert_eq!(err.message(), "secret must not be empty");
        assert!(err.to_string().starts_with("PFS_CLI_CONFIG_ERROR"));
    }

    #[test]
    fn test_other_storage_errors_map_to_storage_failed() {
        let err: CliError = StorageError::MetadataMissing("k".into()).into();
        assert_eq!(err.code(), &CliErrorCode::StorageFailed);
    }
}
