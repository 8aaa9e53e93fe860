//! Shared state handed to a running executor.

use tokio_util::sync::CancellationToken;

use crate::config::RetryConfig;
use crate::error::Result;
use crate::types::{Event, TaskId};

use super::Outcome;
use crate::engine::TransferEngine;

/// Everything a transfer run needs: persistence, gateway, events, and the
/// control tokens registered for this task.
pub(crate) struct ExecutorContext {
    pub(crate) engine: TransferEngine,
    pub(crate) id: TaskId,
    pub(crate) pause_token: CancellationToken,
    pub(crate) cancel_token: CancellationToken,
}

impl ExecutorContext {
    pub(crate) fn gateway(&self) -> &dyn crate::gateway::ObjectStoreGateway {
        self.engine.gateway.as_ref()
    }

    pub(crate) fn retry(&self) -> &RetryConfig {
        &self.engine.config.retry
    }

    /// Check the control tokens at a part or increment boundary
    ///
    /// Cancel wins over pause when both are signaled.
    pub(crate) fn check_control(&self) -> Option<Outcome> {
        if self.cancel_token.is_cancelled() {
            return Some(Outcome::Cancelled);
        }
        if self.pause_token.is_cancelled() {
            return Some(Outcome::Paused);
        }
        None
    }

    /// Persist byte progress and broadcast it
    pub(crate) async fn record_progress(
        &self,
        bytes_transferred: u64,
        total_bytes: Option<u64>,
    ) -> Result<()> {
        self.engine.db.update_progress(self.id, bytes_transferred).await?;
        self.engine.emit_event(Event::Progress {
            id: self.id,
            bytes_transferred,
            total_bytes,
        });
        Ok(())
    }
}
