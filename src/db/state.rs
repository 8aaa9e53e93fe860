//! Runtime state tracking: shutdown detection and interrupted-task recovery.

use crate::error::DatabaseError;
use crate::types::Status;
use crate::{Error, Result};

use super::Database;

impl Database {
    /// Check if the last shutdown was unclean
    ///
    /// Returns true if the previous session did not call set_clean_shutdown(),
    /// indicating a crash or forced termination.
    ///
    /// This method is called on startup to determine if state recovery is needed.
    pub async fn was_unclean_shutdown(&self) -> Result<bool> {
        let value: Option<String> = sqlx::query_scalar(
            r#"
            SELECT value FROM runtime_state WHERE key = 'clean_shutdown'
            "#,
        )
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to check shutdown state: {}",
                e
            )))
        })?;

        // If the value is missing or "false", it was an unclean shutdown
        Ok(value.is_none_or(|v| v != "true"))
    }

    /// Mark that the engine has started cleanly
    ///
    /// Called during TransferEngine::new() to indicate the engine is running.
    /// If shutdown() is not called before the next startup,
    /// was_unclean_shutdown() will return true.
    pub async fn set_clean_start(&self) -> Result<()> {
        let now = chrono::Utc::now().timestamp();
        sqlx::query(
            r#"
            INSERT INTO runtime_state (key, value, updated_at)
            VALUES ('clean_shutdown', 'false', ?)
            ON CONFLICT(key) DO UPDATE SET value = 'false', updated_at = ?
            "#,
        )
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to set clean start: {}",
                e
            )))
        })?;

        Ok(())
    }

    /// Mark that the engine is shutting down cleanly
    ///
    /// Called during TransferEngine::shutdown() to indicate a graceful
    /// shutdown. If this is not called before the process exits, the next
    /// startup will detect an unclean shutdown.
    pub async fn set_clean_shutdown(&self) -> Result<()> {
        let now = chrono::Utc::now().timestamp();
        sqlx::query(
            r#"
            INSERT INTO runtime_state (key, value, updated_at)
            VALUES ('clean_shutdown', 'true', ?)
            ON CONFLICT(key) DO UPDATE SET value = 'true', updated_at = ?
            "#,
        )
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to set clean shutdown: {}",
                e
            )))
        })?;

        Ok(())
    }

    /// Reclassify tasks left Running by a previous process as Paused
    ///
    /// A Running status in a freshly opened store can only mean the previous
    /// process died mid-transfer; the bytes it recorded stay in place so a
    /// later resume can reconcile against the remote side. Returns the number
    /// of tasks reclassified.
    pub async fn recover_interrupted_tasks(&self) -> Result<u64> {
        let now = chrono::Utc::now().timestamp();
        let result = sqlx::query("UPDATE tasks SET status = ?, updated_at = ? WHERE status = ?")
            .bind(Status::Paused.to_i32())
            .bind(now)
            .bind(Status::Running.to_i32())
            .execute(&self.pool)
            .await
            .map_err(|e| {
                Error::Database(DatabaseError::QueryFailed(format!(
                    "Failed to recover interrupted tasks: {}",
                    e
                )))
            })?;

        let recovered = result.rows_affected();
        if recovered > 0 {
            tracing::info!(
                count = recovered,
                "Reclassified interrupted running tasks as paused"
            );
        }

        Ok(recovered)
    }
}
