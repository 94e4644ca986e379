//! Pipeline components: shared context, the three stage handlers and the run loop.

pub mod context;
pub mod error_handler;
pub mod metadata;
pub mod orchestrator;
pub mod upload;
pub mod walk;

pub use context::PipelineContext;
pub use error_handler::check_for_initial_error_or_skipped_paths;
pub use metadata::{ProcessHandler, file_meta};
pub use orchestrator::{PipelineParts, build_pipeline, run_pipeline};
pub use upload::{Manifest, UploadHandler};
pub use walk::TraverseHandler;
