//! # s3-transfer
//!
//! Resumable multipart transfer engine for S3-compatible object stores.
//!
//! ## Design Philosophy
//!
//! s3-transfer is designed to be:
//! - **Resumable** - Interrupted transfers pick up from durably stored parts,
//!   across pauses, failures, and process restarts
//! - **Library-first** - No CLI or UI, purely a Rust crate for embedding
//! - **Event-driven** - Consumers subscribe to events, no polling required
//! - **Store-agnostic** - The engine talks to a gateway trait; the bundled
//!   implementation wraps the AWS S3 SDK
//!
//! ## Quick Start
//!
//! ```no_run
//! use s3_transfer::{Config, S3Gateway, TransferEngine};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let aws_config = aws_config::load_from_env().await;
//!     let gateway = Arc::new(S3Gateway::new(aws_sdk_s3::Client::new(&aws_config)));
//!
//!     let engine = TransferEngine::new(Config::default(), gateway).await?;
//!     engine.start_queue_processor();
//!
//!     // Subscribe to events
//!     let mut events = engine.subscribe();
//!     tokio::spawn(async move {
//!         while let Ok(event) = events.recv().await {
//!             println!("Event: {:?}", event);
//!         }
//!     });
//!
//!     let id = engine
//!         .start_upload("my-bucket", "backups/archive.tar", "/data/archive.tar")
//!         .await?;
//!     println!("queued task {id}");
//!
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]

/// Configuration types
pub mod config;
/// Database persistence layer
pub mod db;
/// Core transfer engine (decomposed into focused submodules)
pub mod engine;
/// Error types
pub mod error;
/// Object-store gateway trait and the S3 implementation
pub mod gateway;
/// Chunk planning and resume reconciliation
pub mod planner;
/// Retry logic with exponential backoff
pub mod retry;
/// Core types and events
pub mod types;
/// Utility functions
pub mod utils;

// Re-export commonly used types
pub use config::{Config, PersistenceConfig, RetryConfig, TransferConfig};
pub use db::Database;
pub use engine::{TaskEvents, TransferEngine};
pub use error::{DatabaseError, Error, GatewayError, Result, TransferError};
pub use gateway::{ObjectInfo, ObjectStoreGateway, ObjectStream, PartRecord, S3Gateway};
pub use planner::{PlannedPart, ResumePlan};
pub use types::{
    CommandOutcome, Event, ObjectDescriptor, Status, TaskId, TaskType, TransferTask,
};

/// Helper function to run the engine with graceful signal handling.
///
/// Waits for a termination signal and then calls the engine's `shutdown()` method.
///
/// - **Unix:** listens for SIGTERM and SIGINT, with fallbacks if signal registration fails.
/// - **Windows/other:** listens for Ctrl+C via `tokio::signal::ctrl_c()`.
///
/// # Example
///
/// ```no_run
/// use s3_transfer::{Config, S3Gateway, TransferEngine, run_with_shutdown};
/// use std::sync::Arc;
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let aws_config = aws_config::load_from_env().await;
///     let gateway = Arc::new(S3Gateway::new(aws_sdk_s3::Client::new(&aws_config)));
///
///     let engine = TransferEngine::new(Config::default(), gateway).await?;
///     engine.start_queue_processor();
///
///     // Run with automatic signal handling
///     run_with_shutdown(engine).await?;
///
///     Ok(())
/// }
/// ```
pub async fn run_with_shutdown(engine: TransferEngine) -> Result<()> {
    wait_for_signal().await;
    engine.shutdown().await
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{SignalKind, signal};

    // Set up signal handlers - these may fail in restricted environments (containers, tests)
    let sigterm_result = signal(SignalKind::terminate());
    let sigint_result = signal(SignalKind::interrupt());

    match (sigterm_result, sigint_result) {
        (Ok(mut sigterm), Ok(mut sigint)) => {
            tokio::select! {
                _ = sigterm.recv() => {
                    tracing::info!("Received SIGTERM signal");
                }
                _ = sigint.recv() => {
                    tracing::info!("Received SIGINT signal (Ctrl+C)");
                }
            }
        }
        (Err(e), _) => {
            tracing::warn!(error = %e, "Could not register SIGTERM handler, waiting for SIGINT only");
            if let Ok(mut sigint) = signal(SignalKind::interrupt()) {
                sigint.recv().await;
                tracing::info!("Received SIGINT signal (Ctrl+C)");
            } else {
                tracing::error!("Could not register any signal handlers, using ctrl_c fallback");
                tokio::signal::ctrl_c().await.ok();
            }
        }
        (_, Err(e)) => {
            tracing::warn!(error = %e, "Could not register SIGINT handler, waiting for SIGTERM only");
            if let Ok(mut sigterm) = signal(SignalKind::terminate()) {
                sigterm.recv().await;
                tracing::info!("Received SIGTERM signal");
            } else {
                tracing::error!("Could not register any signal handlers, using ctrl_c fallback");
                tokio::signal::ctrl_c().await.ok();
            }
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => {
            tracing::info!("Received Ctrl+C signal");
        }
        Err(e) => {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C signal");
        }
    }
}
