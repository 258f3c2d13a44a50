use std::path::PathBuf;
use thiserror::Error;
use uuid::Uuid;

/// Errors raised at the registry and configuration boundary.
///
/// Storage backends never surface these through their public contract; they
/// degrade to sentinel values instead (see [`crate::storage::StorageBackend`]).
#[derive(Debug, Error)]
pub enum Error {
    /// Logger definition rejected before it was persisted
    #[error("Invalid logger configuration: {0}")]
    InvalidConfig(String),

    /// No logger with this identifier
    #[error("Logger not found: {0}")]
    LoggerNotFound(Uuid),

    /// The permanently installed logger cannot be paused, edited or deleted
    #[error("System logger {0} cannot be modified")]
    SystemLogger(Uuid),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Failed to read registry file {path}: {source}")]
    RegistryRead {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to write registry file {path}: {source}")]
    RegistryWrite {
        path: PathBuf,
        source: std::io::Error,
    },

    /// The registry file parsed but describes an impossible set of loggers
    #[error("Invalid registry file: {0}")]
    InvalidRegistry(String),

    #[error("Failed to parse registry file: {0}")]
    RegistryParse(#[from] toml::de::Error),

    #[error("Failed to serialize registry: {0}")]
    RegistrySerialize(#[from] toml::ser::Error),
}

/// Errors produced inside storage backends.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Invalid bucket name: {0}")]
    InvalidBucketName(String),

    /// A schema migration step failed; the previous table is still in place
    #[error("Schema migration of {bucket} failed during {step}: {source}")]
    Migration {
        bucket: String,
        step: &'static str,
        source: sqlx::Error,
    },

    #[error("Bucket {bucket} has schema version {version}, which cannot be migrated")]
    UnsupportedSchema { bucket: String, version: u32 },

    #[error("Storage medium unavailable: {0}")]
    Unavailable(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
