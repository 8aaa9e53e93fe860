//! Multipart upload execution with resume support.

use std::path::Path;

use tracing::{debug, info, warn};

use crate::db::TaskRow;
use crate::error::{Error, Result, TransferError};
use crate::gateway::PartRecord;
use crate::planner::{self, PlannedPart};
use crate::retry::with_retry;
use crate::types::ObjectDescriptor;

use super::context::ExecutorContext;
use super::{Completion, Outcome};

/// Run an upload task to an outcome
///
/// Resume is driven entirely by what the store holds: the part listing is
/// compared against the chunk plan, parts that match by number and size are
/// credited without re-reading them, and everything else is uploaded. Local
/// progress counters are display data only.
pub(crate) async fn run_upload(ctx: &ExecutorContext, row: &TaskRow) -> Result<Outcome> {
    let source = Path::new(&row.local_path);
    let metadata = tokio::fs::metadata(source).await.map_err(|e| {
        Error::Transfer(TransferError::SourceNotAccessible {
            path: row.local_path.clone(),
            reason: e.to_string(),
        })
    })?;

    let file_size = metadata.len();
    if row.file_size != Some(file_size as i64) {
        // Source changed while the task was paused; replan against reality
        ctx.engine.db.set_file_size(ctx.id, file_size).await?;
    }

    let planned = planner::plan(file_size, row.chunk_size as u64)?;

    let gateway = ctx.gateway();
    let upload_id = with_retry(ctx.retry(), || {
        gateway.start_or_resume_upload(&row.bucket_name, &row.object_key, row.upload_id.as_deref())
    })
    .await?;
    ctx.engine
        .db
        .set_upload_id(ctx.id, Some(&upload_id))
        .await?;

    // Empty objects still need one (empty) part to complete the session
    if planned.is_empty() {
        return finish_empty_upload(ctx, row, &upload_id, source).await;
    }

    let uploaded = with_retry(ctx.retry(), || {
        gateway.list_parts(&row.bucket_name, &row.object_key, &upload_id)
    })
    .await?;

    let resume = planner::split_resumable(&planned, &uploaded);
    if !resume.reusable.is_empty() {
        info!(
            task_id = ctx.id.0,
            reused_parts = resume.reusable.len(),
            reused_bytes = resume.reused_bytes,
            "Resuming upload from stored parts"
        );
    }

    let mut transferred = resume.reused_bytes;
    ctx.record_progress(transferred, Some(file_size)).await?;

    let mut parts: Vec<PartRecord> = resume.reusable;

    for part in &resume.remaining {
        if let Some(outcome) = ctx.check_control() {
            debug!(
                task_id = ctx.id.0,
                part_number = part.part_number,
                "Upload stopping at part boundary"
            );
            return Ok(outcome);
        }

        let record = with_retry(ctx.retry(), || {
            gateway.upload_part(
                &row.bucket_name,
                &row.object_key,
                &upload_id,
                part.part_number,
                source,
                part.offset,
                part.len,
            )
        })
        .await?;

        transferred += part.len;
        parts.push(record);
        ctx.record_progress(transferred, Some(file_size)).await?;
    }

    parts.sort_by_key(|p| p.part_number);

    let etag = complete_with_reconcile(ctx, row, &upload_id, parts, &planned).await?;

    // Session is consumed; a retry after this point must start fresh
    ctx.engine.db.set_upload_id(ctx.id, None).await?;

    info!(
        task_id = ctx.id.0,
        bucket = %row.bucket_name,
        key = %row.object_key,
        file_size,
        "Upload complete"
    );

    Ok(Outcome::Completed(Completion::Upload(ObjectDescriptor {
        bucket: row.bucket_name.clone(),
        key: row.object_key.clone(),
        etag,
    })))
}

/// Complete the session, reconciling once against the store's part listing
/// if it rejects our receipts
///
/// A part-mismatch rejection means our local receipt list disagrees with what
/// the store holds, typically after a crash between upload and persistence.
/// The store's listing is authoritative, so retry completion from it.
async fn complete_with_reconcile(
    ctx: &ExecutorContext,
    row: &TaskRow,
    upload_id: &str,
    parts: Vec<PartRecord>,
    planned: &[PlannedPart],
) -> Result<Option<String>> {
    let gateway = ctx.gateway();

    let first_attempt = with_retry(ctx.retry(), || {
        gateway.complete_upload(&row.bucket_name, &row.object_key, upload_id, &parts)
    })
    .await;

    let err = match first_attempt {
        Ok(etag) => return Ok(etag),
        Err(Error::Gateway(g)) if g.is_part_mismatch() => Error::Gateway(g),
        Err(e) => return Err(e),
    };

    warn!(
        task_id = ctx.id.0,
        error = %err,
        "Store rejected completion parts, reconciling against part listing"
    );

    let remote = with_retry(ctx.retry(), || {
        gateway.list_parts(&row.bucket_name, &row.object_key, upload_id)
    })
    .await?;

    // Only complete from the listing if it actually covers the plan;
    // otherwise the original mismatch error stands
    let resume = planner::split_resumable(planned, &remote);
    if !resume.remaining.is_empty() {
        return Err(err);
    }

    let mut reconciled = resume.reusable;
    reconciled.sort_by_key(|p| p.part_number);

    with_retry(ctx.retry(), || {
        gateway.complete_upload(&row.bucket_name, &row.object_key, upload_id, &reconciled)
    })
    .await
}

/// Commit a zero-byte object through its multipart session
async fn finish_empty_upload(
    ctx: &ExecutorContext,
    row: &TaskRow,
    upload_id: &str,
    source: &Path,
) -> Result<Outcome> {
    let gateway = ctx.gateway();

    let record = with_retry(ctx.retry(), || {
        gateway.upload_part(
            &row.bucket_name,
            &row.object_key,
            upload_id,
            1,
            source,
            0,
            0,
        )
    })
    .await?;

    let etag = with_retry(ctx.retry(), || {
        gateway.complete_upload(
            &row.bucket_name,
            &row.object_key,
            upload_id,
            std::slice::from_ref(&record),
        )
    })
    .await?;

    ctx.engine.db.set_upload_id(ctx.id, None).await?;
    ctx.record_progress(0, Some(0)).await?;

    info!(
        task_id = ctx.id.0,
        bucket = %row.bucket_name,
        key = %row.object_key,
        "Empty upload complete"
    );

    Ok(Outcome::Completed(Completion::Upload(ObjectDescriptor {
        bucket: row.bucket_name.clone(),
        key: row.object_key.clone(),
        etag,
    })))
}
