//! Download execution with transient-file staging and ranged resume.

use std::path::{Path, PathBuf};

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tracing::{debug, info, warn};

use crate::db::TaskRow;
use crate::error::{Error, GatewayError, Result};
use crate::retry::with_retry;
use crate::utils;

use super::context::ExecutorContext;
use super::{Completion, Outcome};

/// Run a download task to an outcome
///
/// Bytes land in a transient sibling of the final path and are renamed into
/// place only after the full object has been written, so a crash never leaves
/// a truncated file under the final name. The transient file's on-disk length
/// is the resume offset; the database byte counter is display data only.
pub(crate) async fn run_download(ctx: &ExecutorContext, row: &TaskRow) -> Result<Outcome> {
    let final_path = PathBuf::from(&row.local_path);
    let transient_path = PathBuf::from(format!(
        "{}{}",
        row.local_path, ctx.engine.config.transfer.transient_suffix
    ));

    let gateway = ctx.gateway();

    let info = with_retry(ctx.retry(), || {
        gateway.head_object(&row.bucket_name, &row.object_key)
    })
    .await?;
    let total = info.content_length;
    ctx.engine.db.set_file_size(ctx.id, total).await?;

    if let Some(parent) = final_path.parent() {
        if !parent.as_os_str().is_empty() {
            tokio::fs::create_dir_all(parent).await?;
        }
    }

    let offset = resume_offset(ctx, &transient_path, total).await?;

    if offset >= total && total > 0 {
        // Transient already holds the whole object, likely from a run that
        // died between the last write and the rename
        return promote(ctx, row, &transient_path, &final_path, total).await;
    }

    check_disk_space(ctx, &final_path, total - offset)?;

    let mut file = if offset > 0 {
        tokio::fs::OpenOptions::new()
            .append(true)
            .open(&transient_path)
            .await?
    } else {
        tokio::fs::File::create(&transient_path).await?
    };

    if offset > 0 {
        info!(
            task_id = ctx.id.0,
            offset, total, "Resuming download from transient file"
        );
    }

    let stream = with_retry(ctx.retry(), || {
        gateway.get_object_stream(&row.bucket_name, &row.object_key, offset)
    })
    .await?;
    let mut reader = stream.reader;

    let mut transferred = offset;
    ctx.record_progress(transferred, Some(total)).await?;

    let mut buffer = vec![0u8; ctx.engine.config.transfer.copy_buffer_size];
    loop {
        if let Some(outcome) = ctx.check_control() {
            debug!(task_id = ctx.id.0, transferred, "Download stopping at increment boundary");
            file.flush().await?;
            return Ok(outcome);
        }

        let n = reader.read(&mut buffer).await?;
        if n == 0 {
            break;
        }

        file.write_all(&buffer[..n]).await?;
        transferred += n as u64;
        ctx.record_progress(transferred, Some(total)).await?;
    }

    file.flush().await?;
    file.sync_all().await?;
    drop(file);

    if transferred != total {
        return Err(Error::Gateway(GatewayError::Protocol(format!(
            "stream ended after {transferred} of {total} bytes"
        ))));
    }

    promote(ctx, row, &transient_path, &final_path, total).await
}

/// Determine where to resume from, based on the transient file on disk
async fn resume_offset(ctx: &ExecutorContext, transient: &Path, total: u64) -> Result<u64> {
    let existing = match tokio::fs::metadata(transient).await {
        Ok(meta) => meta.len(),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => 0,
        Err(e) => return Err(e.into()),
    };

    if existing == 0 {
        return Ok(0);
    }

    if !ctx.gateway().supports_range_resume() {
        debug!(
            task_id = ctx.id.0,
            "Store does not honor ranged reads, restarting from byte zero"
        );
        return Ok(0);
    }

    if existing > total {
        // Object shrank on the remote side since the partial was written
        warn!(
            task_id = ctx.id.0,
            existing, total, "Transient file longer than remote object, restarting"
        );
        return Ok(0);
    }

    Ok(existing)
}

/// Fail fast when the destination volume cannot hold the remaining bytes
fn check_disk_space(ctx: &ExecutorContext, final_path: &Path, required: u64) -> Result<()> {
    if !ctx.engine.config.transfer.check_disk_space {
        return Ok(());
    }

    let dir = final_path.parent().unwrap_or_else(|| Path::new("."));
    let available = utils::get_available_space(dir)
        .map_err(|e| Error::DiskSpaceCheckFailed(e.to_string()))?;

    if available < required {
        return Err(Error::InsufficientSpace {
            required,
            available,
        });
    }

    Ok(())
}

/// Atomically move the transient file to its final name
async fn promote(
    ctx: &ExecutorContext,
    row: &TaskRow,
    transient: &Path,
    final_path: &Path,
    total: u64,
) -> Result<Outcome> {
    tokio::fs::rename(transient, final_path).await?;
    ctx.record_progress(total, Some(total)).await?;

    info!(
        task_id = ctx.id.0,
        bucket = %row.bucket_name,
        key = %row.object_key,
        path = %final_path.display(),
        total,
        "Download complete"
    );

    Ok(Outcome::Completed(Completion::Download(
        final_path.to_path_buf(),
    )))
}
