use anyhow::Result;

use crate::{Opts, PipelineReport};

use super::context::PipelineContext;

/// Check the finished run: in strict mode any failed item or skipped path fails it; otherwise
/// skipped paths are only reported. Call after every stage has exited.
pub fn check_for_initial_error_or_skipped_paths(
    opts: &Opts,
    ctx: &PipelineContext,
    report: &PipelineReport,
) -> Result<()> {
    let skipped = ctx.skipped_paths();
    if opts.strict {
        if let Some((path, reason)) = skipped.first() {
            anyhow::bail!(
                "{}: {} ({} paths skipped in total)",
                path.display(),
                reason,
                skipped.len()
            );
        }
        let failed = report.failed();
        if failed > 0 {
            anyhow::bail!("{failed} items failed");
        }
        return Ok(());
    }
    if !skipped.is_empty() {
        log::warn!(
            "Skipped {} paths due to permission errors or access issues",
            skipped.len()
        );
        if opts.verbose {
            for (p, reason) in &skipped {
                eprintln!("  skipped: {} ({})", p.display(), reason);
            }
        }
    }
    Ok(())
}
