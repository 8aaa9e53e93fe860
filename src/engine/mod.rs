//! Core transfer engine implementation split into focused submodules.
//!
//! The `TransferEngine` struct and its methods are organized by domain:
//! - [`control`] - Task lifecycle control (create/pause/resume/cancel/delete)
//! - [`events`] - Per-task event subscriptions
//! - [`lifecycle`] - Startup recovery and shutdown coordination
//! - [`queue_processor`] - Queue processing and executor spawning
//! - [`executor`] - Core upload/download execution

mod control;
mod events;
mod executor;
mod lifecycle;
mod queue_processor;

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
pub(crate) mod test_helpers;
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests;

pub use events::TaskEvents;

use crate::config::Config;
use crate::db::Database;
use crate::error::{Error, Result, TransferError};
use crate::gateway::ObjectStoreGateway;
use crate::planner::MIN_CHUNK_SIZE;
use crate::types::TaskId;

/// Queue and transfer state management
#[derive(Clone)]
pub(crate) struct QueueState {
    /// FIFO queue of pending task IDs
    pub(crate) queue: std::sync::Arc<tokio::sync::Mutex<std::collections::VecDeque<TaskId>>>,
    /// Semaphore to limit concurrent transfers (respects max_concurrent_transfers config)
    pub(crate) concurrent_limit: std::sync::Arc<tokio::sync::Semaphore>,
    /// Map of active transfers to their control tokens (for pause/cancel operations)
    pub(crate) active_transfers:
        std::sync::Arc<tokio::sync::Mutex<std::collections::HashMap<TaskId, ActiveTransfer>>>,
    /// Flag to indicate whether new tasks are accepted (set to false during shutdown)
    pub(crate) accepting_new: std::sync::Arc<std::sync::atomic::AtomicBool>,
}

/// Control tokens for one running transfer
///
/// Pause and cancel are separate signals because they demand different
/// cleanup: pause preserves the upload session and partial local data for a
/// later resume, while cancel discards both. The executor checks them at
/// part/increment boundaries.
#[derive(Clone)]
pub(crate) struct ActiveTransfer {
    /// Signaled to stop at the next boundary and keep resume state
    pub(crate) pause_token: tokio_util::sync::CancellationToken,
    /// Signaled to stop at the next boundary and discard the attempt
    pub(crate) cancel_token: tokio_util::sync::CancellationToken,
}

/// Runtime-mutable settings (separate from static config)
#[derive(Clone)]
pub(crate) struct RuntimeSettings {
    /// Chunk size applied to newly created tasks
    pub(crate) chunk_size: std::sync::Arc<std::sync::atomic::AtomicU64>,
}

/// Main transfer engine instance (cloneable - all fields are Arc-wrapped)
#[derive(Clone)]
pub struct TransferEngine {
    /// Database instance for persistence (wrapped in Arc for sharing across tasks)
    /// Public for integration tests to query task status
    pub db: std::sync::Arc<Database>,
    /// Event broadcast channel sender (multiple subscribers supported)
    pub(crate) event_tx: tokio::sync::broadcast::Sender<crate::types::Event>,
    /// Configuration (wrapped in Arc for sharing across tasks)
    pub(crate) config: std::sync::Arc<Config>,
    /// Object-store gateway (trait object so tests can substitute fakes)
    pub(crate) gateway: std::sync::Arc<dyn ObjectStoreGateway>,
    /// Queue and transfer state management
    pub(crate) queue_state: QueueState,
    /// Runtime-mutable settings
    pub(crate) runtime: RuntimeSettings,
}

impl TransferEngine {
    /// Create a new TransferEngine instance
    ///
    /// This initializes all core components:
    /// - Opens/creates the SQLite database and runs migrations
    /// - Reclassifies tasks left Running by a dead process as Paused
    /// - Sets up the event broadcast channel
    /// - Reloads pending tasks into the queue
    ///
    /// Call [`start_queue_processor`](Self::start_queue_processor) afterwards
    /// to begin executing queued tasks.
    pub async fn new(
        config: Config,
        gateway: std::sync::Arc<dyn ObjectStoreGateway>,
    ) -> Result<Self> {
        if config.transfer.chunk_size < MIN_CHUNK_SIZE {
            return Err(Error::Transfer(TransferError::InvalidChunkSize {
                chunk_size: config.transfer.chunk_size,
                minimum: MIN_CHUNK_SIZE,
            }));
        }

        // Initialize database
        let db = Database::new(&config.persistence.database_path).await?;

        // A Running status in a freshly opened store means the previous
        // process died mid-transfer
        db.recover_interrupted_tasks().await?;

        // Mark that we're starting up (for unclean shutdown detection)
        db.set_clean_start().await?;

        // Create broadcast channel with buffer size of 1000 events
        // This allows multiple subscribers to receive all events independently
        let (event_tx, _rx) = tokio::sync::broadcast::channel(1000);

        // Create FIFO queue (empty initially, reloaded from database below)
        let queue = std::sync::Arc::new(tokio::sync::Mutex::new(
            std::collections::VecDeque::new(),
        ));

        // Create semaphore for concurrent transfer limiting
        let concurrent_limit = std::sync::Arc::new(tokio::sync::Semaphore::new(
            config.transfer.max_concurrent_transfers,
        ));

        // Create active transfers tracking map
        let active_transfers =
            std::sync::Arc::new(tokio::sync::Mutex::new(std::collections::HashMap::new()));

        let queue_state = QueueState {
            queue,
            concurrent_limit,
            active_transfers,
            accepting_new: std::sync::Arc::new(std::sync::atomic::AtomicBool::new(true)),
        };

        let runtime = RuntimeSettings {
            chunk_size: std::sync::Arc::new(std::sync::atomic::AtomicU64::new(
                config.transfer.chunk_size,
            )),
        };

        let engine = Self {
            db: std::sync::Arc::new(db),
            event_tx,
            config: std::sync::Arc::new(config),
            gateway,
            queue_state,
            runtime,
        };

        // Reload pending tasks from the previous session into the queue
        engine.restore_queue().await?;

        Ok(engine)
    }

    /// Subscribe to transfer events
    ///
    /// Multiple subscribers are supported. Each subscriber receives all events independently.
    /// Events are buffered, but if a subscriber falls behind by more than 1000 events,
    /// it will receive a `RecvError::Lagged` error.
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use s3_transfer::{TransferEngine, Config};
    /// # use std::sync::Arc;
    /// # use s3_transfer::gateway::ObjectStoreGateway;
    ///
    /// # async fn example(gateway: Arc<dyn ObjectStoreGateway>) -> Result<(), Box<dyn std::error::Error>> {
    /// let engine = TransferEngine::new(Config::default(), gateway).await?;
    ///
    /// let mut events = engine.subscribe();
    /// tokio::spawn(async move {
    ///     while let Ok(event) = events.recv().await {
    ///         tracing::info!(?event, "transfer event");
    ///     }
    /// });
    /// # Ok(())
    /// # }
    /// ```
    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<crate::types::Event> {
        self.event_tx.subscribe()
    }

    /// Subscribe to events for one task only
    ///
    /// The returned receiver yields events whose task ID matches `id`, plus
    /// global events such as [`Event::Shutdown`](crate::types::Event::Shutdown).
    pub fn subscribe_task(&self, id: TaskId) -> TaskEvents {
        TaskEvents::new(id, self.event_tx.subscribe())
    }

    /// Get the current configuration
    ///
    /// The configuration is wrapped in an Arc, so this is a cheap clone.
    /// Note that [`update_chunk_size`](Self::update_chunk_size) changes take
    /// effect outside this snapshot.
    pub fn get_config(&self) -> std::sync::Arc<Config> {
        std::sync::Arc::clone(&self.config)
    }

    /// Update the chunk size applied to newly created tasks
    ///
    /// In-flight and paused tasks keep the chunk size they were planned with;
    /// only tasks created after this call see the new value. Returns the
    /// previous setting.
    pub fn update_chunk_size(&self, chunk_size: u64) -> Result<u64> {
        if chunk_size < MIN_CHUNK_SIZE {
            return Err(Error::Transfer(TransferError::InvalidChunkSize {
                chunk_size,
                minimum: MIN_CHUNK_SIZE,
            }));
        }

        let previous = self
            .runtime
            .chunk_size
            .swap(chunk_size, std::sync::atomic::Ordering::SeqCst);
        tracing::info!(previous, chunk_size, "Updated chunk size for new tasks");
        Ok(previous)
    }

    /// Chunk size that will be applied to the next created task
    pub fn current_chunk_size(&self) -> u64 {
        self.runtime
            .chunk_size
            .load(std::sync::atomic::Ordering::SeqCst)
    }

    /// Emit an event to all subscribers
    ///
    /// If there are no active subscribers, the event is silently dropped (ok() converts Err to None).
    /// This allows transfers to continue even if no one is listening to events.
    pub(crate) fn emit_event(&self, event: crate::types::Event) {
        // send() returns Err if there are no receivers, which is fine - we just drop the event
        self.event_tx.send(event).ok();
    }
}
