//! Task lifecycle control operations.
//!
//! Creating, pausing, resuming, cancelling, and deleting transfer tasks.
//! Pause and cancel return a [`CommandOutcome`] rather than an error when the
//! task is already terminal, since the caller's end state is already reached.

use std::path::Path;
use std::sync::atomic::Ordering;

use tracing::{info, warn};

use crate::db::NewTask;
use crate::error::{Error, Result, TransferError};
use crate::planner;
use crate::types::{CommandOutcome, Event, Status, TaskId, TaskType, TransferTask};

use super::TransferEngine;

impl TransferEngine {
    /// Create an upload task and queue it for execution
    ///
    /// The source file must exist and be a regular file, and no other active
    /// (pending, running, or paused) task may claim the same local path. The
    /// chunk size currently configured on the engine is fixed into the task
    /// at creation time.
    pub async fn start_upload(
        &self,
        bucket: &str,
        key: &str,
        local_path: impl AsRef<Path>,
    ) -> Result<TaskId> {
        if !self.queue_state.accepting_new.load(Ordering::SeqCst) {
            return Err(Error::ShuttingDown);
        }

        let local_path = local_path.as_ref();
        let path_str = local_path.to_string_lossy().to_string();

        let metadata = tokio::fs::metadata(local_path).await.map_err(|e| {
            Error::Transfer(TransferError::SourceNotAccessible {
                path: path_str.clone(),
                reason: e.to_string(),
            })
        })?;
        if !metadata.is_file() {
            return Err(Error::Transfer(TransferError::SourceNotAccessible {
                path: path_str,
                reason: "not a regular file".to_string(),
            }));
        }

        self.check_path_collision(&path_str, TaskType::Upload).await?;

        let file_size = metadata.len();
        let chunk_size = self.current_chunk_size();
        // Validates both the chunk size floor and the part-count ceiling
        planner::plan(file_size, chunk_size)?;

        let file_name = local_path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| path_str.clone());

        let id = self
            .db
            .insert_task(&NewTask {
                task_type: TaskType::Upload.to_i32(),
                bucket_name: bucket.to_string(),
                object_key: key.to_string(),
                local_path: path_str,
                file_name: file_name.clone(),
                file_size: Some(file_size as i64),
                chunk_size: chunk_size as i64,
                status: Status::Pending.to_i32(),
            })
            .await?;

        info!(
            task_id = id.0,
            bucket, key, file_size, "Upload task created"
        );
        self.emit_event(Event::Queued { id, file_name });
        self.enqueue(id).await;

        Ok(id)
    }

    /// Create a download task and queue it for execution
    ///
    /// The object's size is not known until the executor asks the store, so
    /// the task starts with no total size. The destination path is subject to
    /// the same collision rule as uploads.
    pub async fn start_download(
        &self,
        bucket: &str,
        key: &str,
        local_path: impl AsRef<Path>,
    ) -> Result<TaskId> {
        if !self.queue_state.accepting_new.load(Ordering::SeqCst) {
            return Err(Error::ShuttingDown);
        }

        let local_path = local_path.as_ref();
        let path_str = local_path.to_string_lossy().to_string();

        self.check_path_collision(&path_str, TaskType::Download).await?;

        let file_name = key
            .rsplit('/')
            .next()
            .filter(|s| !s.is_empty())
            .unwrap_or(key)
            .to_string();

        let id = self
            .db
            .insert_task(&NewTask {
                task_type: TaskType::Download.to_i32(),
                bucket_name: bucket.to_string(),
                object_key: key.to_string(),
                local_path: path_str,
                file_name: file_name.clone(),
                file_size: None,
                chunk_size: self.current_chunk_size() as i64,
                status: Status::Pending.to_i32(),
            })
            .await?;

        info!(task_id = id.0, bucket, key, "Download task created");
        self.emit_event(Event::Queued { id, file_name });
        self.enqueue(id).await;

        Ok(id)
    }

    /// Get a single task by ID
    pub async fn get_task(&self, id: TaskId) -> Result<TransferTask> {
        let row = self
            .db
            .get_task(id)
            .await?
            .ok_or(Error::Transfer(TransferError::NotFound { id: id.0 }))?;
        Ok(row.into())
    }

    /// List all tasks in creation order
    pub async fn list_tasks(&self) -> Result<Vec<TransferTask>> {
        let rows = self.db.list_tasks().await?;
        Ok(rows.into_iter().map(Into::into).collect())
    }

    /// Pause a task
    ///
    /// A running task stops at its next part or copy-increment boundary and
    /// keeps its upload session and partial local data for a later resume;
    /// its status reads `Running` until the executor reaches that boundary
    /// and records the pause. A pending task leaves the queue immediately.
    /// Pausing an already-paused task is a no-op success; pausing a terminal
    /// task returns [`CommandOutcome::NoopTerminal`].
    pub async fn pause_task(&self, id: TaskId) -> Result<CommandOutcome> {
        let row = self
            .db
            .get_task(id)
            .await?
            .ok_or(Error::Transfer(TransferError::NotFound { id: id.0 }))?;

        match Status::from_i32(row.status) {
            status if status.is_terminal() => Ok(CommandOutcome::NoopTerminal),
            Status::Paused => Ok(CommandOutcome::Applied),
            Status::Pending => {
                self.remove_from_queue(id).await;
                self.db.update_status(id, Status::Paused.to_i32()).await?;
                info!(task_id = id.0, "Paused pending task");
                Ok(CommandOutcome::Applied)
            }
            _ => {
                // Running: signal the executor. The executor owns the row
                // while it is active and writes the paused status itself when
                // it stops; a crash before the boundary is reclassified to
                // paused at the next startup
                if let Some(active) = self.queue_state.active_transfers.lock().await.get(&id) {
                    active.pause_token.cancel();
                }
                info!(task_id = id.0, "Pause signaled to running task");
                Ok(CommandOutcome::Applied)
            }
        }
    }

    /// Resume a paused task
    ///
    /// Only paused tasks can be resumed. A freshly paused task whose executor
    /// is still draining an in-flight call reads `Running` and is rejected
    /// until the executor stops. The task re-enters the queue and waits for
    /// an executor slot like any other pending task.
    pub async fn resume_task(&self, id: TaskId) -> Result<()> {
        let row = self
            .db
            .get_task(id)
            .await?
            .ok_or(Error::Transfer(TransferError::NotFound { id: id.0 }))?;

        let status = Status::from_i32(row.status);
        if status != Status::Paused {
            return Err(Error::Transfer(TransferError::InvalidState {
                id: id.0,
                operation: "resume".to_string(),
                current_state: format!("{status:?}"),
            }));
        }

        self.db.clear_error(id).await?;
        self.db.update_status(id, Status::Pending.to_i32()).await?;
        self.enqueue(id).await;
        info!(task_id = id.0, "Resumed task");

        Ok(())
    }

    /// Cancel a task
    ///
    /// Aborts the task's multipart upload session (for uploads) and removes
    /// its transient download file (for downloads). Cancelling a terminal
    /// task returns [`CommandOutcome::NoopTerminal`] without touching
    /// anything.
    pub async fn cancel_task(&self, id: TaskId) -> Result<CommandOutcome> {
        let row = self
            .db
            .get_task(id)
            .await?
            .ok_or(Error::Transfer(TransferError::NotFound { id: id.0 }))?;

        match Status::from_i32(row.status) {
            status if status.is_terminal() => return Ok(CommandOutcome::NoopTerminal),
            Status::Pending => {
                self.remove_from_queue(id).await;
            }
            Status::Running => {
                // Signal the executor; it stops silently at the next boundary
                // while cleanup and the terminal status are handled here
                if let Some(active) = self.queue_state.active_transfers.lock().await.remove(&id) {
                    active.cancel_token.cancel();
                }
            }
            _ => {}
        }

        // Remote session abort is best-effort: a dead session on the store
        // expires on its own and must not block the local cancel
        if let Some(upload_id) = &row.upload_id {
            if let Err(e) = self
                .gateway
                .abort_upload(&row.bucket_name, &row.object_key, upload_id)
                .await
            {
                warn!(
                    task_id = id.0,
                    error = %e,
                    "Failed to abort upload session during cancel"
                );
            }
            self.db.set_upload_id(id, None).await?;
        }

        if TaskType::from_i32(row.task_type) == TaskType::Download {
            let transient = format!("{}{}", row.local_path, self.config.transfer.transient_suffix);
            if let Err(e) = tokio::fs::remove_file(&transient).await {
                if e.kind() != std::io::ErrorKind::NotFound {
                    warn!(
                        task_id = id.0,
                        path = %transient,
                        error = %e,
                        "Failed to remove transient file during cancel"
                    );
                }
            }
        }

        self.db.update_status(id, Status::Cancelled.to_i32()).await?;
        self.emit_event(Event::Cancelled { id });
        info!(task_id = id.0, "Cancelled task");

        Ok(CommandOutcome::Applied)
    }

    /// Cancel all non-terminal tasks
    ///
    /// Returns the number of tasks actually cancelled.
    pub async fn cancel_all_tasks(&self) -> Result<usize> {
        let tasks = self.db.list_tasks().await?;
        let mut cancelled = 0;

        for row in tasks {
            if Status::from_i32(row.status).is_terminal() {
                continue;
            }
            if self.cancel_task(TaskId(row.id)).await? == CommandOutcome::Applied {
                cancelled += 1;
            }
        }

        info!(count = cancelled, "Cancelled all active tasks");
        Ok(cancelled)
    }

    /// Delete a task record
    ///
    /// Only terminal (completed, failed, or cancelled) tasks may be deleted.
    /// Active tasks must be cancelled first.
    pub async fn delete_task(&self, id: TaskId) -> Result<()> {
        let row = self
            .db
            .get_task(id)
            .await?
            .ok_or(Error::Transfer(TransferError::NotFound { id: id.0 }))?;

        let status = Status::from_i32(row.status);
        if !status.is_terminal() {
            return Err(Error::Transfer(TransferError::InvalidState {
                id: id.0,
                operation: "delete".to_string(),
                current_state: format!("{status:?}"),
            }));
        }

        self.db.delete_task(id).await?;
        self.emit_event(Event::Removed { id });
        info!(task_id = id.0, "Deleted task");

        Ok(())
    }

    /// Delete all completed task records
    ///
    /// Returns the number of records removed.
    pub async fn delete_completed_tasks(&self) -> Result<usize> {
        let completed = self
            .db
            .list_tasks_by_status(Status::Completed.to_i32())
            .await?;
        let count = self.db.delete_completed_tasks().await?;

        for row in completed {
            self.emit_event(Event::Removed { id: TaskId(row.id) });
        }

        info!(count, "Deleted completed tasks");
        Ok(count as usize)
    }

    /// Reject a path already claimed by an active task of the same direction
    async fn check_path_collision(&self, path: &str, task_type: TaskType) -> Result<()> {
        if let Some(existing) = self
            .db
            .find_active_task_by_path(path, task_type.to_i32())
            .await?
        {
            return Err(Error::Transfer(TransferError::PathCollision {
                path: path.to_string(),
                existing_id: existing.id,
            }));
        }
        Ok(())
    }

    /// Push a task onto the back of the FIFO queue
    pub(crate) async fn enqueue(&self, id: TaskId) {
        self.queue_state.queue.lock().await.push_back(id);
    }

    /// Remove a task from the queue if it is still waiting
    async fn remove_from_queue(&self, id: TaskId) {
        self.queue_state.queue.lock().await.retain(|&queued| queued != id);
    }
}
