//! Error types for the stage core.
//!
//! Queue operations distinguish cancellation from closure so callers can treat the first as a
//! cooperative shutdown and the second as a wiring bug. Stage errors are the fatal ones that
//! abort a pipeline run.

use thiserror::Error;

/// Outcome of a blocking queue operation that did not complete normally.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueError {
    /// The cancellation token fired while the operation was blocked.
    #[error("operation cancelled")]
    Cancelled,

    /// The queue no longer accepts items.
    #[error("queue is closed")]
    Closed,
}

/// Errors that are fatal to a stage (and therefore to the pipeline run).
#[derive(Error, Debug, Clone)]
pub enum StageError {
    /// A worker could not be created or failed its per-worker initialisation.
    #[error("stage '{stage}': worker {worker} failed to start: {reason}")]
    Startup {
        stage: String,
        worker: usize,
        reason: String,
    },

    /// A handler tried to enqueue into a stage that had already completed.
    #[error("stage '{stage}': handler enqueued into a closed queue: {reason}")]
    QueueClosed { stage: String, reason: String },

    /// Preconditions can be registered once per stage.
    #[error("stage '{stage}': completion precondition already registered")]
    PreconditionAlreadySet { stage: String },

    /// A worker thread died outside of item handling.
    #[error("stage '{stage}': worker {worker} panicked")]
    WorkerPanicked { stage: String, worker: usize },
}
