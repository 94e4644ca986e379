//! pipewalk: a bounded, multi-stage worker pipeline over directory trees.
//!
//! Stages ([`stage`]) are generic: a bounded queue, a worker pool and decentralized completion
//! detection chained so each stage closes only after its upstream has. The [`pipeline`] module
//! wires three of them into traverse → process → upload.

pub mod engine;
pub mod pipeline;
pub mod stage;
pub mod types;
pub mod utils;

/// Re-export types for API
pub use types::*;

pub use stage::{CancelToken, StageReport};

use log::debug;

/// Result alias used by public pipewalk API
pub use anyhow::Error;
pub type Result<T> = std::result::Result<T, Error>;

/// Single entry point: validate `opts`, then run the pipeline until every stage completes or
/// `cancel` fires.
///
/// A cancelled run is not an error: the report comes back with `cancelled` set. Fatal stage
/// errors (a worker that failed to start, an enqueue into a closed stage) and strict-mode
/// failures are returned as errors.
///
/// ```ignore
/// let opts = pipewalk::Opts { roots: vec!["/data".into()], ..Default::default() };
/// let report = pipewalk::run_with_opts(&opts, &pipewalk::CancelToken::new())?;
/// println!("{} files uploaded", report.stage(pipewalk::StageKind::Upload).unwrap().committed);
/// ```
pub fn run_with_opts(opts: &Opts, cancel: &CancelToken) -> Result<PipelineReport> {
    opts.validate()?;
    debug!(
        "{} CONFIG:{:#?}",
        env!("CARGO_PKG_NAME").to_uppercase(),
        opts
    );
    pipeline::run_pipeline(opts, cancel)
}
