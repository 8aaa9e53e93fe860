//! Queue processing loop that dispatches tasks to executors.

use std::sync::atomic::Ordering;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::types::TaskId;

use super::{ActiveTransfer, TransferEngine, executor};

/// Interval between queue polls when the queue is empty
const QUEUE_POLL_INTERVAL: Duration = Duration::from_millis(100);

impl TransferEngine {
    /// Start the background queue processor
    ///
    /// Spawns a task that polls the queue every 100ms, takes the oldest
    /// pending task, and hands it to an executor once a concurrency permit is
    /// available. Must be called once after construction; without it, queued
    /// tasks never run.
    pub fn start_queue_processor(&self) {
        let engine = self.clone();

        tokio::spawn(async move {
            info!("Queue processor started");

            loop {
                // Shutdown flips this flag before draining; anything still
                // queued stays pending in the database for the next start
                if !engine.queue_state.accepting_new.load(Ordering::SeqCst) {
                    break;
                }

                let next = engine.queue_state.queue.lock().await.pop_front();

                let Some(id) = next else {
                    tokio::time::sleep(QUEUE_POLL_INTERVAL).await;
                    continue;
                };

                // Blocks until a slot frees up; queue order is preserved
                // because nothing else pops while we hold the ID
                let permit = match engine
                    .queue_state
                    .concurrent_limit
                    .clone()
                    .acquire_owned()
                    .await
                {
                    Ok(permit) => permit,
                    Err(_) => {
                        // Semaphore closed: engine is going away, put the
                        // task back so it persists as pending
                        engine.enqueue(id).await;
                        break;
                    }
                };

                // Shutdown may have started while we waited for the permit;
                // a task dispatched now would miss the pause signal
                if !engine.queue_state.accepting_new.load(Ordering::SeqCst) {
                    engine.enqueue(id).await;
                    break;
                }

                engine.spawn_executor(id, permit).await;
            }

            info!("Queue processor stopped");
        });
    }

    /// Register control tokens for a task and spawn its executor
    async fn spawn_executor(&self, id: TaskId, permit: tokio::sync::OwnedSemaphorePermit) {
        let active = ActiveTransfer {
            pause_token: CancellationToken::new(),
            cancel_token: CancellationToken::new(),
        };

        self.queue_state
            .active_transfers
            .lock()
            .await
            .insert(id, active.clone());

        debug!(task_id = id.0, "Dispatching task to executor");

        let engine = self.clone();
        tokio::spawn(async move {
            // Hold the permit for the lifetime of the transfer
            let _permit = permit;
            executor::run_transfer_task(engine, id, active).await;
        });
    }
}
