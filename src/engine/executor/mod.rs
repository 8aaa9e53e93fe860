//! Transfer execution.
//!
//! One executor runs per active task, spawned by the queue processor with a
//! concurrency permit held for its lifetime. The executor owns the byte
//! movement and every status write while the task is active; the one
//! exception is cancel, whose cleanup, terminal status, and event belong to
//! the cancel command that signaled it.

mod context;
mod download;
mod upload;

use std::path::PathBuf;

use tracing::{debug, error, warn};

use crate::types::{Event, ObjectDescriptor, Status, TaskId, TaskType};

use super::{ActiveTransfer, TransferEngine};
use context::ExecutorContext;

/// How a transfer run ended
pub(crate) enum Outcome {
    /// All bytes moved and committed
    Completed(Completion),
    /// Stopped at a boundary with resume state intact
    Paused,
    /// Stopped at a boundary; cleanup was handled by the cancel command
    Cancelled,
}

/// Completion payload per transfer direction
pub(crate) enum Completion {
    /// Object committed to the store
    Upload(ObjectDescriptor),
    /// File renamed to its final local path
    Download(PathBuf),
}

/// Run a single transfer task to an outcome and record it
pub(crate) async fn run_transfer_task(engine: TransferEngine, id: TaskId, active: ActiveTransfer) {
    let row = match engine.db.get_task(id).await {
        Ok(Some(row)) => row,
        Ok(None) => {
            warn!(task_id = id.0, "Queued task no longer exists, skipping");
            deregister(&engine, id).await;
            return;
        }
        Err(e) => {
            error!(task_id = id.0, error = %e, "Failed to load task for execution");
            deregister(&engine, id).await;
            return;
        }
    };

    // The task may have been paused or cancelled between dispatch and now
    if Status::from_i32(row.status) != Status::Pending {
        deregister(&engine, id).await;
        return;
    }

    if let Err(e) = engine.db.update_status(id, Status::Running.to_i32()).await {
        error!(task_id = id.0, error = %e, "Failed to mark task running");
        deregister(&engine, id).await;
        return;
    }

    let cancelled = active.cancel_token.clone();
    let ctx = ExecutorContext {
        engine: engine.clone(),
        id,
        pause_token: active.pause_token,
        cancel_token: active.cancel_token,
    };

    let result = match TaskType::from_i32(row.task_type) {
        TaskType::Upload => upload::run_upload(&ctx, &row).await,
        TaskType::Download => download::run_download(&ctx, &row).await,
    };

    match result {
        Ok(Outcome::Completed(completion)) => {
            if let Err(e) = engine.db.update_status(id, Status::Completed.to_i32()).await {
                error!(task_id = id.0, error = %e, "Failed to mark task completed");
            }
            match completion {
                Completion::Upload(descriptor) => {
                    engine.emit_event(Event::UploadComplete { id, descriptor });
                }
                Completion::Download(path) => {
                    engine.emit_event(Event::DownloadComplete { id, path });
                }
            }
        }
        Ok(Outcome::Paused) => {
            // Deregister before the status write: once the row reads paused
            // no executor still holds this task, so a resume that sees the
            // paused status can never race a draining executor
            deregister(&engine, id).await;
            if let Err(e) = engine.db.update_status(id, Status::Paused.to_i32()).await {
                error!(task_id = id.0, error = %e, "Failed to mark task paused");
            }
        }
        Ok(Outcome::Cancelled) => {
            // Status, session abort, and the event were handled by cancel_task
        }
        Err(e) if cancelled.is_cancelled() => {
            // The cancel command aborted the session out from under an
            // in-flight call; the resulting error is a consequence of the
            // cancel, which already wrote the terminal status
            debug!(task_id = id.0, error = %e, "In-flight call failed after cancel");
        }
        Err(e) => {
            error!(task_id = id.0, error = %e, "Transfer failed");
            let message = e.to_string();
            if let Err(db_err) = engine.db.set_error(id, &message).await {
                error!(task_id = id.0, error = %db_err, "Failed to record task error");
            }
            if let Err(db_err) = engine.db.update_status(id, Status::Failed.to_i32()).await {
                error!(task_id = id.0, error = %db_err, "Failed to mark task failed");
            }
            engine.emit_event(Event::TaskFailed { id, error: message });
        }
    }

    deregister(&engine, id).await;
}

/// Remove the task's control tokens from the active map
async fn deregister(engine: &TransferEngine, id: TaskId) {
    engine
        .queue_state
        .active_transfers
        .lock()
        .await
        .remove(&id);
}
