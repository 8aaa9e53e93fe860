//! Object-store gateway abstraction
//!
//! The engine never talks to a concrete store directly; it goes through the
//! [`ObjectStoreGateway`] trait. The production implementation wraps the AWS
//! S3 SDK ([`S3Gateway`]), and tests substitute in-memory fakes.

use crate::error::Result;
use async_trait::async_trait;
use std::path::Path;

mod s3;

pub use s3::S3Gateway;

/// One durably stored part of a multipart upload session
///
/// Mirrors what the store reports from a part listing. The `etag` is opaque
/// receipt data; the engine never inspects it, only hands it back verbatim
/// at completion time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartRecord {
    /// 1-based part number within the upload session
    pub part_number: i32,
    /// Opaque receipt returned by the store when the part was uploaded
    pub etag: String,
    /// Size of the stored part in bytes
    pub size: u64,
}

/// Metadata for a remote object, from a head request
#[derive(Debug, Clone)]
pub struct ObjectInfo {
    /// Object size in bytes
    pub content_length: u64,
    /// Entity tag if the store reported one
    pub etag: Option<String>,
}

/// A byte stream for downloading an object, possibly starting mid-object
pub struct ObjectStream {
    /// Async reader over the object bytes from the requested offset onward
    pub reader: Box<dyn tokio::io::AsyncRead + Send + Unpin>,
    /// Total object size when the store reports it; `None` for stores that
    /// stream without a length header
    pub total_size: Option<u64>,
}

impl std::fmt::Debug for ObjectStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObjectStream")
            .field("total_size", &self.total_size)
            .finish_non_exhaustive()
    }
}

/// Interface to an S3-compatible object store
///
/// All methods classify failures into
/// [`GatewayError`](crate::error::GatewayError) variants; the retry policy in
/// the executor acts on that classification and never inspects raw store
/// errors.
#[async_trait]
pub trait ObjectStoreGateway: Send + Sync {
    /// Begin a new multipart upload session, or return an existing open
    /// session for the same bucket/key when the store still holds one
    ///
    /// Returns the upload session ID. When `known_upload_id` is given, the
    /// gateway verifies that session is still open before reusing it and
    /// starts a fresh one if the store no longer knows it.
    async fn start_or_resume_upload(
        &self,
        bucket: &str,
        key: &str,
        known_upload_id: Option<&str>,
    ) -> Result<String>;

    /// List the parts the store holds durably for an upload session
    ///
    /// Returned records are ordered by part number. An unknown upload ID is a
    /// [`GatewayError::NotFound`](crate::error::GatewayError::NotFound).
    async fn list_parts(&self, bucket: &str, key: &str, upload_id: &str)
    -> Result<Vec<PartRecord>>;

    /// Upload one part, reading `len` bytes from `source` at `offset`
    ///
    /// Returns the part receipt. Re-uploading a part number the store already
    /// holds replaces the earlier copy.
    async fn upload_part(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
        part_number: i32,
        source: &Path,
        offset: u64,
        len: u64,
    ) -> Result<PartRecord>;

    /// Complete a multipart upload from the given part receipts
    ///
    /// Parts must be sorted by part number. Returns the final object etag if
    /// the store reported one.
    async fn complete_upload(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
        parts: &[PartRecord],
    ) -> Result<Option<String>>;

    /// Abort a multipart upload session, discarding its stored parts
    ///
    /// Aborting a session the store no longer knows is treated as success.
    async fn abort_upload(&self, bucket: &str, key: &str, upload_id: &str) -> Result<()>;

    /// Fetch object metadata without downloading the body
    async fn head_object(&self, bucket: &str, key: &str) -> Result<ObjectInfo>;

    /// Open a byte stream over an object starting at `offset`
    ///
    /// Callers must only pass a non-zero offset when
    /// [`supports_range_resume`](Self::supports_range_resume) is true.
    async fn get_object_stream(&self, bucket: &str, key: &str, offset: u64)
    -> Result<ObjectStream>;

    /// Whether this store honors ranged object reads
    ///
    /// When false, interrupted downloads restart from byte zero rather than
    /// resuming mid-object.
    fn supports_range_resume(&self) -> bool;
}
