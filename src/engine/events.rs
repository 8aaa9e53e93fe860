//! Per-task event subscription.

use tokio::sync::broadcast;

use crate::types::{Event, TaskId};

/// Event receiver filtered to a single task
///
/// Wraps a broadcast receiver and skips events belonging to other tasks.
/// Global events (currently only [`Event::Shutdown`]) pass the filter so a
/// waiter does not hang across engine shutdown.
#[derive(Debug)]
pub struct TaskEvents {
    id: TaskId,
    rx: broadcast::Receiver<Event>,
}

impl TaskEvents {
    pub(crate) fn new(id: TaskId, rx: broadcast::Receiver<Event>) -> Self {
        Self { id, rx }
    }

    /// The task this receiver is filtered to
    pub fn task_id(&self) -> TaskId {
        self.id
    }

    /// Receive the next event for this task
    ///
    /// Returns `Err(RecvError::Closed)` when the engine is dropped, or
    /// `Err(RecvError::Lagged)` if this subscriber fell more than 1000 events
    /// behind the broadcast channel.
    pub async fn recv(&mut self) -> Result<Event, broadcast::error::RecvError> {
        loop {
            let event = self.rx.recv().await?;
            match event.task_id() {
                Some(id) if id == self.id => return Ok(event),
                // Global events are delivered to every task subscriber
                None => return Ok(event),
                Some(_) => continue,
            }
        }
    }
}
