//! Pipeline coordination core: bounded queues, per-stage completion detection, worker pools
//! and the chain that links stage lifecycles.

pub mod chain;
pub mod error;
pub mod orchestrator;
pub mod queue;
pub mod signal;
pub mod state;

pub use chain::{Pipeline, upstream_completed};
pub use error::{QueueError, StageError};
pub use orchestrator::{StageHandler, StageOrchestrator, StageReport};
pub use queue::BoundedWorkQueue;
pub use signal::{CancelToken, Latch};
pub use state::{CompletionCheck, Precondition, StageSnapshot, StageState};
