//! Core types for s3-transfer

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Unique identifier for a transfer task
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(pub i64);

impl TaskId {
    /// Create a new TaskId
    pub fn new(id: i64) -> Self {
        Self(id)
    }

    /// Get the inner i64 value
    pub fn get(&self) -> i64 {
        self.0
    }
}

impl From<i64> for TaskId {
    fn from(id: i64) -> Self {
        Self(id)
    }
}

impl From<TaskId> for i64 {
    fn from(id: TaskId) -> Self {
        id.0
    }
}

impl PartialEq<i64> for TaskId {
    fn eq(&self, other: &i64) -> bool {
        self.0 == *other
    }
}

impl PartialEq<TaskId> for i64 {
    fn eq(&self, other: &TaskId) -> bool {
        *self == other.0
    }
}

impl std::fmt::Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for TaskId {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(s.parse()?))
    }
}

// Implement sqlx Type, Encode, and Decode for database operations
impl sqlx::Type<sqlx::Sqlite> for TaskId {
    fn type_info() -> sqlx::sqlite::SqliteTypeInfo {
        <i64 as sqlx::Type<sqlx::Sqlite>>::type_info()
    }

    fn compatible(ty: &sqlx::sqlite::SqliteTypeInfo) -> bool {
        <i64 as sqlx::Type<sqlx::Sqlite>>::compatible(ty)
    }
}

impl<'q> sqlx::Encode<'q, sqlx::Sqlite> for TaskId {
    fn encode_by_ref(
        &self,
        buf: &mut Vec<sqlx::sqlite::SqliteArgumentValue<'q>>,
    ) -> Result<sqlx::encode::IsNull, Box<dyn std::error::Error + Send + Sync>> {
        sqlx::Encode::<sqlx::Sqlite>::encode_by_ref(&self.0, buf)
    }
}

impl<'r> sqlx::Decode<'r, sqlx::Sqlite> for TaskId {
    fn decode(value: sqlx::sqlite::SqliteValueRef<'r>) -> Result<Self, sqlx::error::BoxDynError> {
        let id = <i64 as sqlx::Decode<sqlx::Sqlite>>::decode(value)?;
        Ok(Self(id))
    }
}

/// Transfer direction
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskType {
    /// Local file to object store
    Upload,
    /// Object store to local file
    Download,
}

impl TaskType {
    /// Convert integer type code to TaskType enum
    pub fn from_i32(value: i32) -> Self {
        match value {
            0 => TaskType::Upload,
            _ => TaskType::Download,
        }
    }

    /// Convert TaskType enum to integer type code
    pub fn to_i32(&self) -> i32 {
        match self {
            TaskType::Upload => 0,
            TaskType::Download => 1,
        }
    }
}

/// Transfer task status
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    /// Waiting for an executor slot
    Pending,
    /// Actively transferring bytes
    Running,
    /// Paused by user (or reclassified after a restart)
    Paused,
    /// Successfully completed
    Completed,
    /// Failed with error
    Failed,
    /// Cancelled by user
    Cancelled,
}

impl Status {
    /// Convert integer status code to Status enum
    pub fn from_i32(status: i32) -> Self {
        match status {
            0 => Status::Pending,
            1 => Status::Running,
            2 => Status::Paused,
            3 => Status::Completed,
            4 => Status::Failed,
            5 => Status::Cancelled,
            _ => Status::Failed, // Default to Failed for unknown status
        }
    }

    /// Convert Status enum to integer status code
    pub fn to_i32(&self) -> i32 {
        match self {
            Status::Pending => 0,
            Status::Running => 1,
            Status::Paused => 2,
            Status::Completed => 3,
            Status::Failed => 4,
            Status::Cancelled => 5,
        }
    }

    /// Whether no further progress transition is possible from this status
    ///
    /// Terminal tasks can only be deleted; pause and cancel commands
    /// targeting them are no-ops.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Status::Completed | Status::Failed | Status::Cancelled)
    }
}

/// Outcome of a control command (pause/cancel) that may hit a terminal task
///
/// Commands on tasks that are already completed, failed, or cancelled are
/// deliberately not errors: the caller asked for a state the task can no
/// longer leave, so the engine reports a no-op instead.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CommandOutcome {
    /// The command took effect (or was already satisfied)
    Applied,
    /// The task is in a terminal state; nothing was changed
    NoopTerminal,
}

/// Descriptor for an object committed to the store
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectDescriptor {
    /// Bucket the object lives in
    pub bucket: String,
    /// Object key
    pub key: String,
    /// ETag of the completed object, when the store reported one
    pub etag: Option<String>,
}

/// Event emitted during a transfer lifecycle
///
/// Events are broadcast to all subscribers. Delivery is at-least-once and
/// ordered per task; consumers should de-duplicate progress updates by the
/// monotonically increasing byte count.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    /// Task created and queued
    Queued {
        /// Task ID
        id: TaskId,
        /// File name being transferred
        file_name: String,
    },

    /// Byte-count progress update
    Progress {
        /// Task ID
        id: TaskId,
        /// Bytes transferred so far
        bytes_transferred: u64,
        /// Total size in bytes, when known
        #[serde(skip_serializing_if = "Option::is_none")]
        total_bytes: Option<u64>,
    },

    /// Upload committed to the store
    UploadComplete {
        /// Task ID
        id: TaskId,
        /// Descriptor of the committed object
        descriptor: ObjectDescriptor,
    },

    /// Download written and renamed to its final path
    DownloadComplete {
        /// Task ID
        id: TaskId,
        /// Final local path
        path: PathBuf,
    },

    /// Transfer failed
    TaskFailed {
        /// Task ID
        id: TaskId,
        /// Error message
        error: String,
    },

    /// Transfer cancelled by user
    Cancelled {
        /// Task ID
        id: TaskId,
    },

    /// Task record deleted
    Removed {
        /// Task ID
        id: TaskId,
    },

    /// Graceful shutdown initiated
    Shutdown,
}

impl Event {
    /// Task this event belongs to, if any (Shutdown is global)
    pub fn task_id(&self) -> Option<TaskId> {
        match self {
            Event::Queued { id, .. }
            | Event::Progress { id, .. }
            | Event::UploadComplete { id, .. }
            | Event::DownloadComplete { id, .. }
            | Event::TaskFailed { id, .. }
            | Event::Cancelled { id }
            | Event::Removed { id } => Some(*id),
            Event::Shutdown => None,
        }
    }
}

/// Snapshot of a transfer task
///
/// This is the public, read-only view handed out by `list_tasks()`. The
/// authoritative record lives in the task store and is mutated only by the
/// executor that owns the task while it runs.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TransferTask {
    /// Unique task identifier
    pub id: TaskId,

    /// Transfer direction
    pub task_type: TaskType,

    /// Bucket name
    pub bucket_name: String,

    /// Object key
    pub object_key: String,

    /// Local file path (source for uploads, destination for downloads)
    pub local_path: PathBuf,

    /// Display file name
    pub file_name: String,

    /// Total size in bytes (None when the store did not report a size)
    pub file_size: Option<u64>,

    /// Bytes transferred so far (monotonically non-decreasing while running)
    pub transferred_bytes: u64,

    /// Current status
    pub status: Status,

    /// Error message, set only when status is Failed
    pub error_message: Option<String>,

    /// When the task was created
    pub created_at: DateTime<Utc>,

    /// Refreshed on every status or byte-count change
    pub updated_at: DateTime<Utc>,
}
