//! Engine startup recovery and graceful shutdown.

use std::sync::atomic::Ordering;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::error::Result;
use crate::types::{Event, Status, TaskId};

use super::TransferEngine;

/// Maximum time to wait for active transfers to reach a pause boundary
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);

/// Poll interval while waiting for active transfers to drain
const SHUTDOWN_POLL_INTERVAL: Duration = Duration::from_millis(100);

impl TransferEngine {
    /// Reload pending tasks from the previous session into the queue
    ///
    /// Called once during engine construction, after interrupted-task
    /// recovery has already reclassified orphaned Running rows as Paused.
    /// Paused tasks stay out of the queue until explicitly resumed.
    pub(crate) async fn restore_queue(&self) -> Result<()> {
        let pending = self
            .db
            .list_tasks_by_status(Status::Pending.to_i32())
            .await?;

        if pending.is_empty() {
            return Ok(());
        }

        let mut queue = self.queue_state.queue.lock().await;
        for row in &pending {
            queue.push_back(TaskId(row.id));
        }
        drop(queue);

        info!(count = pending.len(), "Restored pending tasks into queue");
        Ok(())
    }

    /// Gracefully shut down the transfer engine
    ///
    /// Stops accepting new tasks, signals every active transfer to pause at
    /// its next boundary, and waits up to 30 seconds for them to drain.
    /// Whatever is still running after the timeout is persisted as paused so
    /// the next session can resume it.
    pub async fn shutdown(&self) -> Result<()> {
        info!("Starting graceful shutdown");

        // Step 1: Stop accepting new tasks
        self.queue_state.accepting_new.store(false, Ordering::SeqCst);

        // Step 2: Signal all active transfers to pause
        {
            let active = self.queue_state.active_transfers.lock().await;
            for (id, transfer) in active.iter() {
                debug!(task_id = id.0, "Signaling transfer to pause for shutdown");
                transfer.pause_token.cancel();
            }
        }

        // Step 3: Wait for executors to reach a boundary and deregister
        self.wait_for_active_transfers().await;

        // Step 4: Persist anything still marked Running as Paused
        let interrupted = self.db.recover_interrupted_tasks().await?;
        if interrupted > 0 {
            warn!(
                count = interrupted,
                "Transfers did not stop within the shutdown timeout; persisted as paused"
            );
        }

        // Step 5: Record the clean shutdown so the next start skips recovery logging
        self.db.set_clean_shutdown().await?;

        self.emit_event(Event::Shutdown);
        info!("Graceful shutdown complete");

        Ok(())
    }

    /// Poll until the active-transfer map drains or the timeout elapses
    async fn wait_for_active_transfers(&self) {
        let deadline = tokio::time::Instant::now() + SHUTDOWN_TIMEOUT;

        loop {
            let remaining = self.queue_state.active_transfers.lock().await.len();
            if remaining == 0 {
                return;
            }
            if tokio::time::Instant::now() >= deadline {
                warn!(remaining, "Shutdown timeout reached with transfers still active");
                return;
            }
            debug!(remaining, "Waiting for active transfers to pause");
            tokio::time::sleep(SHUTDOWN_POLL_INTERVAL).await;
        }
    }
}
