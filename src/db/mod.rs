//! Database layer for s3-transfer
//!
//! Handles SQLite persistence for transfer tasks and runtime state.
//!
//! ## Submodules
//!
//! Methods on [`Database`] are organized by domain:
//! - [`migrations`]: Database lifecycle, schema migrations
//! - [`tasks`]: Transfer task CRUD
//! - [`state`]: Runtime state (shutdown tracking, interrupted-task recovery)

use crate::types::{Status, TaskId, TaskType, TransferTask};
use sqlx::{FromRow, sqlite::SqlitePool};
use std::path::PathBuf;

mod migrations;
mod state;
mod tasks;

/// New transfer task to be inserted into the database
#[derive(Debug, Clone)]
pub struct NewTask {
    /// Transfer direction (0=upload, 1=download)
    pub task_type: i32,
    /// Bucket name
    pub bucket_name: String,
    /// Object key
    pub object_key: String,
    /// Local file path (source for uploads, destination for downloads)
    pub local_path: String,
    /// Display file name
    pub file_name: String,
    /// Total size in bytes, if known at creation time
    pub file_size: Option<i64>,
    /// Chunk size fixed for the lifetime of this task
    pub chunk_size: i64,
    /// Initial status (0=pending)
    pub status: i32,
}

/// Transfer task record from database
#[derive(Debug, Clone, FromRow)]
pub struct TaskRow {
    /// Unique database ID
    pub id: i64,
    /// Transfer direction (0=upload, 1=download)
    pub task_type: i32,
    /// Bucket name
    pub bucket_name: String,
    /// Object key
    pub object_key: String,
    /// Local file path
    pub local_path: String,
    /// Display file name
    pub file_name: String,
    /// Total size in bytes, if known
    pub file_size: Option<i64>,
    /// Bytes transferred so far
    pub transferred_bytes: i64,
    /// Chunk size fixed at task creation
    pub chunk_size: i64,
    /// Multipart upload session ID, once the store has issued one
    pub upload_id: Option<String>,
    /// Current status code
    pub status: i32,
    /// Error message if the task failed
    pub error_message: Option<String>,
    /// Unix timestamp when the task was created
    pub created_at: i64,
    /// Unix timestamp of the last status or progress change
    pub updated_at: i64,
}

impl From<TaskRow> for TransferTask {
    fn from(row: TaskRow) -> Self {
        use chrono::{TimeZone, Utc};

        TransferTask {
            id: TaskId(row.id),
            task_type: TaskType::from_i32(row.task_type),
            bucket_name: row.bucket_name,
            object_key: row.object_key,
            local_path: PathBuf::from(row.local_path),
            file_name: row.file_name,
            file_size: row.file_size.map(|s| s.max(0) as u64),
            transferred_bytes: row.transferred_bytes.max(0) as u64,
            status: Status::from_i32(row.status),
            error_message: row.error_message,
            created_at: Utc
                .timestamp_opt(row.created_at, 0)
                .single()
                .unwrap_or_else(Utc::now),
            updated_at: Utc
                .timestamp_opt(row.updated_at, 0)
                .single()
                .unwrap_or_else(Utc::now),
        }
    }
}

/// Database handle for s3-transfer
pub struct Database {
    pool: SqlitePool,
}
