//! Configuration types for s3-transfer

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Transfer behavior configuration (chunking, concurrency, buffering)
///
/// Groups settings related to how bytes are moved. Used as a nested
/// sub-config within [`Config`].
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TransferConfig {
    /// Multipart chunk size in bytes (default: 5 MiB, the S3 minimum part size)
    ///
    /// Applied to tasks at creation time; the chunk size is persisted on the
    /// task record and never changes for the lifetime of an upload session,
    /// so updating this setting does not re-plan in-flight uploads.
    #[serde(default = "default_chunk_size")]
    pub chunk_size: u64,

    /// Maximum concurrently running transfer tasks (default: 3)
    ///
    /// Tasks beyond the ceiling stay Pending until a slot frees.
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent_transfers: usize,

    /// Copy increment for downloads, in bytes (default: 1 MiB)
    ///
    /// Pause and cancel signals are observed between increments, and one
    /// progress event is emitted per increment.
    #[serde(default = "default_copy_buffer_size")]
    pub copy_buffer_size: usize,

    /// Suffix appended to the final path while a download is in flight
    /// (default: ".s3tpart")
    ///
    /// The transient file is atomically renamed onto the final path on
    /// success and removed on cancel.
    #[serde(default = "default_transient_suffix")]
    pub transient_suffix: String,

    /// Check available disk space before starting a download of known size
    /// (default: true)
    #[serde(default = "default_true")]
    pub check_disk_space: bool,
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
            max_concurrent_transfers: default_max_concurrent(),
            copy_buffer_size: default_copy_buffer_size(),
            transient_suffix: default_transient_suffix(),
            check_disk_space: true,
        }
    }
}

/// Retry behavior for transient gateway failures
///
/// Retries happen entirely inside the executor's protocol loop; the
/// supervisor never retries on the caller's behalf.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Maximum number of retry attempts (default: 5)
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Initial delay before first retry (default: 1 second)
    #[serde(default = "default_initial_delay", with = "duration_serde")]
    pub initial_delay: Duration,

    /// Maximum delay between retries (default: 60 seconds)
    #[serde(default = "default_max_delay", with = "duration_serde")]
    pub max_delay: Duration,

    /// Multiplier for exponential backoff (default: 2.0)
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,

    /// Add random jitter to delays (default: true)
    #[serde(default = "default_true")]
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
            backoff_multiplier: 2.0,
            jitter: true,
        }
    }
}

/// Data storage and state management
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PersistenceConfig {
    /// Database path (default: "./s3-transfer.db")
    #[serde(default = "default_database_path")]
    pub database_path: PathBuf,
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            database_path: default_database_path(),
        }
    }
}

/// Main configuration for the transfer engine
///
/// Passed to [`TransferEngine::new`](crate::TransferEngine::new) at
/// construction. There is no hidden process-wide state: runtime-updatable
/// settings are exposed as explicit update methods on the engine that return
/// the previous value.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Config {
    /// Transfer behavior settings (chunking, concurrency, buffering)
    #[serde(flatten)]
    pub transfer: TransferConfig,

    /// Retry behavior for transient gateway failures
    #[serde(default)]
    pub retry: RetryConfig,

    /// Data storage and state management
    #[serde(default)]
    pub persistence: PersistenceConfig,
}

fn default_chunk_size() -> u64 {
    5 * 1024 * 1024
}

fn default_max_concurrent() -> usize {
    3
}

fn default_copy_buffer_size() -> usize {
    1024 * 1024
}

fn default_transient_suffix() -> String {
    ".s3tpart".to_string()
}

fn default_database_path() -> PathBuf {
    PathBuf::from("./s3-transfer.db")
}

fn default_max_attempts() -> u32 {
    5
}

fn default_initial_delay() -> Duration {
    Duration::from_secs(1)
}

fn default_max_delay() -> Duration {
    Duration::from_secs(60)
}

fn default_backoff_multiplier() -> f64 {
    2.0
}

fn default_true() -> bool {
    true
}

/// Serialize Duration as seconds for config files
mod duration_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_secs())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(secs))
    }
}
