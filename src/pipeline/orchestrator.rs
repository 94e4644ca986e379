use anyhow::{Context, Result};
use log::{debug, info};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use crate::engine::progress::ProgressMonitor;
use crate::engine::tools::canonicalize_root;
use crate::stage::{CancelToken, Pipeline, StageHandler, StageOrchestrator, StageState};
use crate::{Opts, PipelineReport, StageKind, WorkItem};

use super::context::PipelineContext;
use super::error_handler::check_for_initial_error_or_skipped_paths;
use super::metadata::ProcessHandler;
use super::upload::{Manifest, UploadHandler};
use super::walk::TraverseHandler;

/// The traverse → process → upload pipeline plus the shared pieces the caller needs after the run.
pub struct PipelineParts {
    pub pipeline: Pipeline<WorkItem>,
    pub ctx: Arc<PipelineContext>,
    pub manifest: Option<Arc<Manifest>>,
}

/// Wire the three stages together. Nothing runs until [`Pipeline::run`].
pub fn build_pipeline(opts: &Opts) -> Result<PipelineParts> {
    let state = |kind: StageKind| {
        let stage = opts.stage(kind);
        Arc::new(StageState::<WorkItem>::new(
            kind.name(),
            stage.queue_capacity,
            opts.grace,
        ))
    };
    let traverse = state(StageKind::Traverse);
    let process = state(StageKind::Process);
    let upload = state(StageKind::Upload);

    let ctx = Arc::new(PipelineContext::from_opts(opts));
    let manifest = opts.manifest.as_ref().map(|p| Arc::new(Manifest::new(p)));

    let handlers: [(Arc<StageState<WorkItem>>, Arc<dyn StageHandler<WorkItem>>); 3] = [
        (
            Arc::clone(&traverse),
            Arc::new(TraverseHandler::new(
                Arc::clone(&traverse),
                Arc::clone(&process),
                Arc::clone(&ctx),
            )),
        ),
        (
            Arc::clone(&process),
            Arc::new(ProcessHandler::new(
                Arc::clone(&upload),
                opts.with_hash,
                opts.follow_links,
                opts.process.latency,
            )),
        ),
        (
            Arc::clone(&upload),
            Arc::new(UploadHandler::new(opts.upload.latency, manifest.clone())),
        ),
    ];

    let stages = StageKind::ALL
        .iter()
        .zip(handlers)
        .map(|(kind, (state, handler))| {
            let stage = opts.stage(*kind);
            StageOrchestrator::new(state, handler, stage.max_workers, stage.take_timeout)
        })
        .collect();

    Ok(PipelineParts {
        pipeline: Pipeline::new(stages)?,
        ctx,
        manifest,
    })
}

/// Canonicalize roots and drop duplicates, keeping the first occurrence.
fn resolve_roots(opts: &Opts) -> Result<Vec<PathBuf>> {
    let mut roots: Vec<PathBuf> = Vec::with_capacity(opts.roots.len());
    for root in &opts.roots {
        let root = canonicalize_root(root)?;
        if !roots.contains(&root) {
            roots.push(root);
        }
    }
    Ok(roots)
}

/// Seed the roots, run every stage to completion (or cancellation) and check the outcome.
pub fn run_pipeline(opts: &Opts, cancel: &CancelToken) -> Result<PipelineReport> {
    let start = Instant::now();
    let roots = resolve_roots(opts)?;
    let parts = build_pipeline(opts)?;

    if opts.follow_links {
        for root in &roots {
            parts.ctx.first_visit(root);
        }
    }
    let seeded = parts
        .pipeline
        .seed(roots.into_iter().map(WorkItem::directory), cancel)?;
    debug!("seeded {seeded} roots");

    let monitor = if opts.progress {
        let monitor =
            ProgressMonitor::spawn(parts.pipeline.states(), opts.monitor_interval, cancel)
                .context("start progress monitor")?;
        Some(monitor)
    } else {
        None
    };

    let result = parts.pipeline.run(cancel);

    if let Some(monitor) = monitor {
        monitor.finish();
    }
    if let Some(manifest) = &parts.manifest {
        manifest.flush()?;
        debug!("manifest written to {}", manifest.path().display());
    }

    let stages = result?;
    let report = PipelineReport {
        stages,
        skipped: parts.ctx.skipped_count(),
        cancelled: cancel.is_cancelled(),
        elapsed: start.elapsed(),
    };
    if report.cancelled {
        info!("pipeline cancelled after {:?}", report.elapsed);
        return Ok(report);
    }
    check_for_initial_error_or_skipped_paths(opts, &parts.ctx, &report)?;
    Ok(report)
}
