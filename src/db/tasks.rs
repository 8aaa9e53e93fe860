//! Transfer task CRUD operations.

use crate::error::DatabaseError;
use crate::types::{Status, TaskId};
use crate::{Error, Result};

use super::{Database, NewTask, TaskRow};

/// Column list shared by every SELECT over the tasks table
const TASK_COLUMNS: &str = r#"
    id, task_type, bucket_name, object_key, local_path, file_name,
    file_size, transferred_bytes, chunk_size, upload_id, status,
    error_message, created_at, updated_at
"#;

impl Database {
    /// Insert a new task record
    pub async fn insert_task(&self, task: &NewTask) -> Result<TaskId> {
        let now = chrono::Utc::now().timestamp();

        let result = sqlx::query(
            r#"
            INSERT INTO tasks (
                task_type, bucket_name, object_key, local_path, file_name,
                file_size, transferred_bytes, chunk_size, status,
                created_at, updated_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(task.task_type)
        .bind(&task.bucket_name)
        .bind(&task.object_key)
        .bind(&task.local_path)
        .bind(&task.file_name)
        .bind(task.file_size)
        .bind(0i64) // transferred_bytes
        .bind(task.chunk_size)
        .bind(task.status)
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to insert task: {}",
                e
            )))
        })?;

        Ok(TaskId(result.last_insert_rowid()))
    }

    /// Get a task by ID
    pub async fn get_task(&self, id: TaskId) -> Result<Option<TaskRow>> {
        let row = sqlx::query_as::<_, TaskRow>(&format!(
            "SELECT {TASK_COLUMNS} FROM tasks WHERE id = ?"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to get task: {}",
                e
            )))
        })?;

        Ok(row)
    }

    /// List all tasks in creation order
    pub async fn list_tasks(&self) -> Result<Vec<TaskRow>> {
        let rows = sqlx::query_as::<_, TaskRow>(&format!(
            "SELECT {TASK_COLUMNS} FROM tasks ORDER BY created_at ASC, id ASC"
        ))
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to list tasks: {}",
                e
            )))
        })?;

        Ok(rows)
    }

    /// List tasks with a specific status, oldest first
    pub async fn list_tasks_by_status(&self, status: i32) -> Result<Vec<TaskRow>> {
        let rows = sqlx::query_as::<_, TaskRow>(&format!(
            "SELECT {TASK_COLUMNS} FROM tasks WHERE status = ? ORDER BY created_at ASC, id ASC"
        ))
        .bind(status)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to list tasks by status: {}",
                e
            )))
        })?;

        Ok(rows)
    }

    /// Find a non-terminal task of the given direction claiming the path
    ///
    /// Used to reject path collisions at task creation time.
    pub async fn find_active_task_by_path(
        &self,
        local_path: &str,
        task_type: i32,
    ) -> Result<Option<TaskRow>> {
        let active = [
            Status::Pending.to_i32(),
            Status::Running.to_i32(),
            Status::Paused.to_i32(),
        ];
        let rows = sqlx::query_as::<_, TaskRow>(&format!(
            "SELECT {TASK_COLUMNS} FROM tasks \
             WHERE local_path = ? AND task_type = ? AND status IN (?, ?, ?) LIMIT 1"
        ))
        .bind(local_path)
        .bind(task_type)
        .bind(active[0])
        .bind(active[1])
        .bind(active[2])
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to find task by path: {}",
                e
            )))
        })?;

        Ok(rows)
    }

    /// Update task status
    pub async fn update_status(&self, id: TaskId, status: i32) -> Result<()> {
        let now = chrono::Utc::now().timestamp();
        sqlx::query("UPDATE tasks SET status = ?, updated_at = ? WHERE id = ?")
            .bind(status)
            .bind(now)
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(|e| {
                Error::Database(DatabaseError::QueryFailed(format!(
                    "Failed to update status: {}",
                    e
                )))
            })?;

        Ok(())
    }

    /// Update transferred byte count
    pub async fn update_progress(&self, id: TaskId, transferred_bytes: u64) -> Result<()> {
        let now = chrono::Utc::now().timestamp();
        sqlx::query("UPDATE tasks SET transferred_bytes = ?, updated_at = ? WHERE id = ?")
            .bind(transferred_bytes as i64)
            .bind(now)
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(|e| {
                Error::Database(DatabaseError::QueryFailed(format!(
                    "Failed to update progress: {}",
                    e
                )))
            })?;

        Ok(())
    }

    /// Set the file size once it becomes known (download head response)
    pub async fn set_file_size(&self, id: TaskId, file_size: u64) -> Result<()> {
        let now = chrono::Utc::now().timestamp();
        sqlx::query("UPDATE tasks SET file_size = ?, updated_at = ? WHERE id = ?")
            .bind(file_size as i64)
            .bind(now)
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(|e| {
                Error::Database(DatabaseError::QueryFailed(format!(
                    "Failed to set file size: {}",
                    e
                )))
            })?;

        Ok(())
    }

    /// Persist the multipart upload session ID for an upload task
    ///
    /// Pass `None` to clear the session after completion or abort.
    pub async fn set_upload_id(&self, id: TaskId, upload_id: Option<&str>) -> Result<()> {
        let now = chrono::Utc::now().timestamp();
        sqlx::query("UPDATE tasks SET upload_id = ?, updated_at = ? WHERE id = ?")
            .bind(upload_id)
            .bind(now)
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(|e| {
                Error::Database(DatabaseError::QueryFailed(format!(
                    "Failed to set upload ID: {}",
                    e
                )))
            })?;

        Ok(())
    }

    /// Set task error message
    pub async fn set_error(&self, id: TaskId, error: &str) -> Result<()> {
        let now = chrono::Utc::now().timestamp();
        sqlx::query("UPDATE tasks SET error_message = ?, updated_at = ? WHERE id = ?")
            .bind(error)
            .bind(now)
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(|e| {
                Error::Database(DatabaseError::QueryFailed(format!(
                    "Failed to set error: {}",
                    e
                )))
            })?;

        Ok(())
    }

    /// Clear a stale error message when a task is retried
    pub async fn clear_error(&self, id: TaskId) -> Result<()> {
        let now = chrono::Utc::now().timestamp();
        sqlx::query("UPDATE tasks SET error_message = NULL, updated_at = ? WHERE id = ?")
            .bind(now)
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(|e| {
                Error::Database(DatabaseError::QueryFailed(format!(
                    "Failed to clear error: {}",
                    e
                )))
            })?;

        Ok(())
    }

    /// Delete a task
    pub async fn delete_task(&self, id: TaskId) -> Result<()> {
        sqlx::query("DELETE FROM tasks WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(|e| {
                Error::Database(DatabaseError::QueryFailed(format!(
                    "Failed to delete task: {}",
                    e
                )))
            })?;

        Ok(())
    }

    /// Delete all completed tasks, returning how many rows were removed
    pub async fn delete_completed_tasks(&self) -> Result<u64> {
        let result = sqlx::query("DELETE FROM tasks WHERE status = ?")
            .bind(Status::Completed.to_i32())
            .execute(&self.pool)
            .await
            .map_err(|e| {
                Error::Database(DatabaseError::QueryFailed(format!(
                    "Failed to delete completed tasks: {}",
                    e
                )))
            })?;

        Ok(result.rows_affected())
    }
}
