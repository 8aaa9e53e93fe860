//! Chunk planning for multipart transfers
//!
//! Derives a deterministic list of fixed-size parts from a file size and
//! chunk size, and reconciles that plan against parts already registered
//! with the object store when resuming an interrupted upload.

use crate::error::{Error, Result, TransferError};
use crate::gateway::PartRecord;

/// Smallest chunk size the planner accepts, matching the S3 minimum
/// part size for all parts except the last.
pub const MIN_CHUNK_SIZE: u64 = 5 * 1024 * 1024;

/// S3 caps multipart uploads at 10,000 parts.
pub const MAX_PARTS: u64 = 10_000;

/// One planned part of a multipart upload
///
/// Part numbers are 1-based and assigned in ascending byte order, so a
/// part's payload is always `bytes[offset..offset + len]` of the source file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlannedPart {
    /// 1-based part number
    pub part_number: i32,
    /// Byte offset of this part within the source file
    pub offset: u64,
    /// Length of this part in bytes
    pub len: u64,
}

/// Result of reconciling a plan against already-uploaded parts
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResumePlan {
    /// Remote parts that match the plan exactly and can be reused as-is
    pub reusable: Vec<PartRecord>,
    /// Planned parts that still need to be uploaded (or re-uploaded)
    pub remaining: Vec<PlannedPart>,
    /// Total bytes covered by reusable parts, credited to progress up front
    pub reused_bytes: u64,
}

/// Compute the part list for a file of `file_size` bytes with the given chunk size
///
/// Every part except the last has exactly `chunk_size` bytes; the last part
/// holds the remainder and may be smaller. A zero-byte file produces an
/// empty plan (the caller uploads a single empty part instead).
///
/// # Errors
///
/// Returns [`TransferError::InvalidChunkSize`] if `chunk_size` is below
/// [`MIN_CHUNK_SIZE`], and [`TransferError::TooManyParts`] if the file
/// would need more than [`MAX_PARTS`] parts.
pub fn plan(file_size: u64, chunk_size: u64) -> Result<Vec<PlannedPart>> {
    if chunk_size < MIN_CHUNK_SIZE {
        return Err(Error::Transfer(TransferError::InvalidChunkSize {
            chunk_size,
            minimum: MIN_CHUNK_SIZE,
        }));
    }

    if file_size == 0 {
        return Ok(Vec::new());
    }

    let part_count = file_size.div_ceil(chunk_size);
    if part_count > MAX_PARTS {
        return Err(Error::Transfer(TransferError::TooManyParts {
            required: part_count,
            maximum: MAX_PARTS,
        }));
    }

    let mut parts = Vec::with_capacity(part_count as usize);
    let mut offset = 0u64;
    let mut part_number = 1i32;

    while offset < file_size {
        let len = chunk_size.min(file_size - offset);
        parts.push(PlannedPart {
            part_number,
            offset,
            len,
        });
        offset += len;
        part_number += 1;
    }

    Ok(parts)
}

/// Reconcile a plan against parts the store already holds for this upload session
///
/// A remote part is reusable only when a planned part with the same part
/// number exists AND the sizes match exactly. A size mismatch means the
/// earlier attempt ran with different parameters or was truncated, so that
/// part is scheduled for re-upload rather than trusted. Remote parts with
/// numbers outside the plan are ignored; completion sends only the parts
/// the plan knows about.
pub fn split_resumable(planned: &[PlannedPart], uploaded: &[PartRecord]) -> ResumePlan {
    let mut reusable = Vec::new();
    let mut remaining = Vec::new();
    let mut reused_bytes = 0u64;

    for part in planned {
        match uploaded
            .iter()
            .find(|r| r.part_number == part.part_number && r.size == part.len)
        {
            Some(record) => {
                reused_bytes += record.size;
                reusable.push(record.clone());
            }
            None => remaining.push(*part),
        }
    }

    ResumePlan {
        reusable,
        remaining,
        reused_bytes,
    }
}
