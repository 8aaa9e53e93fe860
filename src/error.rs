//! Error types for s3-transfer
//!
//! This module provides the error handling for the library, including:
//! - Domain-specific error types (Transfer, Gateway, Database)
//! - The transient/permanent split the executor's retry loop relies on
//! - Context information (task ID, operation, current state)

use thiserror::Error;

/// Result type alias for s3-transfer operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for s3-transfer
///
/// This is the primary error type used throughout the library. Each variant
/// includes contextual information to help diagnose issues.
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error with context about which setting is invalid
    #[error("configuration error: {message}")]
    Config {
        /// Human-readable error message describing the configuration issue
        message: String,
        /// The configuration key that caused the error (e.g., "chunk_size")
        key: Option<String>,
    },

    /// Database operation failed
    #[error("database error: {0}")]
    Database(#[from] DatabaseError),

    /// SQLx database error
    #[error("database error: {0}")]
    Sqlx(#[from] sqlx::Error),

    /// Transfer-level error (task state machine, lookup, path collisions)
    #[error("transfer error: {0}")]
    Transfer(#[from] TransferError),

    /// Object-store gateway error
    #[error("gateway error: {0}")]
    Gateway(#[from] GatewayError),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Insufficient disk space for a download
    #[error("insufficient disk space: need {required} bytes, have {available} bytes")]
    InsufficientSpace {
        /// Number of bytes required for the transfer
        required: u64,
        /// Number of bytes currently available on disk
        available: u64,
    },

    /// Failed to check disk space
    #[error("failed to check disk space: {0}")]
    DiskSpaceCheckFailed(String),

    /// Shutdown in progress - not accepting new transfers
    #[error("shutdown in progress: not accepting new transfers")]
    ShuttingDown,

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Other error
    #[error("{0}")]
    Other(String),
}

/// Database-related errors
#[derive(Debug, Error)]
pub enum DatabaseError {
    /// Failed to connect to database
    #[error("failed to connect to database: {0}")]
    ConnectionFailed(String),

    /// Failed to run migrations
    #[error("failed to run migrations: {0}")]
    MigrationFailed(String),

    /// Query failed
    #[error("query failed: {0}")]
    QueryFailed(String),

    /// Record not found
    #[error("record not found: {0}")]
    NotFound(String),
}

/// Transfer-level errors (task lookup and state machine conflicts)
#[derive(Debug, Error)]
pub enum TransferError {
    /// Task not found in the store
    #[error("task {id} not found")]
    NotFound {
        /// The task ID that was not found
        id: i64,
    },

    /// Cannot perform operation in current state
    #[error("cannot {operation} task {id} in state {current_state}")]
    InvalidState {
        /// The task ID that is in an invalid state for the operation
        id: i64,
        /// The operation that was attempted (e.g., "resume", "delete")
        operation: String,
        /// The current state that prevents the operation
        current_state: String,
    },

    /// Another active task already targets the same local path
    #[error("local path {path} is already claimed by active task {existing_id}")]
    PathCollision {
        /// The colliding local path
        path: String,
        /// The active task that owns the path
        existing_id: i64,
    },

    /// Source file for an upload does not exist or is not readable
    #[error("source file not accessible: {path}: {reason}")]
    SourceNotAccessible {
        /// Path that could not be read
        path: String,
        /// Why the path was rejected
        reason: String,
    },

    /// Chunk size below the store's minimum part size
    #[error("chunk size {chunk_size} is below the minimum of {minimum} bytes")]
    InvalidChunkSize {
        /// The rejected chunk size
        chunk_size: u64,
        /// The smallest allowed chunk size
        minimum: u64,
    },

    /// File would need more multipart parts than the store allows
    #[error("file requires {required} parts but the store allows at most {maximum}")]
    TooManyParts {
        /// Parts the plan would need
        required: u64,
        /// The store's part count ceiling
        maximum: u64,
    },
}

/// Object-store gateway errors, classified at the gateway boundary
///
/// The classification drives the executor's retry policy: only `Transient`
/// is retried; everything else terminates the current attempt immediately.
#[derive(Debug, Error)]
pub enum GatewayError {
    /// Network/timeout class failure; safe to retry
    #[error("transient gateway error: {0}")]
    Transient(String),

    /// Authorization failure; never retried
    #[error("authorization failed: {0}")]
    Auth(String),

    /// Bucket, object, or multipart session missing on the store
    #[error("not found on store: {0}")]
    NotFound(String),

    /// The part list sent to complete-upload does not match what the store
    /// holds durably
    #[error("part list does not match durably stored parts: {0}")]
    IncompleteParts(String),

    /// Part numbers sent to complete-upload are non-contiguous
    #[error("part numbers are not contiguous: {0}")]
    InvalidPartOrder(String),

    /// The store returned a malformed response (missing etag, bad part
    /// number); surfaced instead of silently coerced
    #[error("malformed store response: {0}")]
    Protocol(String),

    /// Any other store-side failure
    #[error("gateway error: {0}")]
    Other(String),
}

impl GatewayError {
    /// Whether completing the upload failed because the store's view of the
    /// part list disagrees with ours. The executor re-lists parts once and
    /// retries before declaring failure.
    pub fn is_part_mismatch(&self) -> bool {
        matches!(
            self,
            GatewayError::IncompleteParts(_) | GatewayError::InvalidPartOrder(_)
        )
    }
}
