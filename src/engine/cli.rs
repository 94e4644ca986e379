//! CLI command handler: layer defaults, config file and flags, then run the pipeline.

use anyhow::{Context, Result};
use log::{info, warn};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::engine::arg_parser::Cli;
use crate::stage::CancelToken;
use crate::utils::pipewalk_toml::{apply_file_to_opts, load_pipewalk_toml};
use crate::utils::setup_logging;
use crate::{Opts, PipelineReport, StageKind, run_with_opts};

/// Overwrite opts field from CLI when present.
macro_rules! apply_cli_opt {
    ($cli:expr, $opts:expr, $field:ident => $opts_field:ident) => {
        if let Some(v) = $cli.$field {
            $opts.$opts_field = v;
        }
    };
}

/// Apply CLI overrides on top of `opts` (defaults, possibly already layered with the file).
pub fn apply_cli_to_opts(cli: &Cli, opts: &mut Opts) {
    if !cli.roots.is_empty() {
        opts.roots = cli.roots.clone();
    }
    if !cli.exclude.is_empty() {
        opts.exclude = cli.exclude.clone();
    }
    if let Some(manifest) = &cli.manifest {
        opts.manifest = Some(manifest.clone());
    }
    apply_cli_opt!(cli, opts, follow_links => follow_links);
    apply_cli_opt!(cli, opts, hash => with_hash);
    apply_cli_opt!(cli, opts, progress => progress);
    apply_cli_opt!(cli, opts, verbose => verbose);
    apply_cli_opt!(cli, opts, strict => strict);
    if let Some(ms) = cli.grace_ms {
        opts.grace = Duration::from_millis(ms);
    }

    let workers = [
        (StageKind::Traverse, cli.traverse_workers),
        (StageKind::Process, cli.process_workers),
        (StageKind::Upload, cli.upload_workers),
    ];
    for (kind, n) in workers {
        if let Some(n) = n {
            opts.stage_mut(kind).max_workers = n;
        }
    }
    for kind in StageKind::ALL {
        let stage = opts.stage_mut(kind);
        if let Some(cap) = cli.queue_capacity {
            stage.queue_capacity = cap;
        }
        if let Some(ms) = cli.take_timeout_ms {
            stage.take_timeout = Duration::from_millis(ms);
        }
    }
}

/// Defaults, then the config file, then CLI flags. Roots fall back to the current directory.
pub fn setup_opts(cli: &Cli, cwd: &Path) -> Opts {
    let mut opts = Opts::default();
    if let Some(file) = load_pipewalk_toml(cli.config.as_deref(), cwd) {
        apply_file_to_opts(&file, &mut opts);
    }
    apply_cli_to_opts(cli, &mut opts);
    if opts.roots.is_empty() {
        opts.roots.push(PathBuf::from("."));
    }
    opts
}

fn log_summary(report: &PipelineReport) {
    for stage in &report.stages {
        info!(
            "{:>8}: {} taken, {} committed, {} failed",
            stage.stage, stage.taken, stage.committed, stage.failed
        );
    }
    if report.skipped > 0 {
        warn!("{} paths skipped", report.skipped);
    }
    info!("Finished in {:.2?}", report.elapsed);
}

/// Run the pipeline from CLI arguments. Ctrl+C cancels the run; a cancelled run is an error.
pub fn handle_run(cli: &Cli) -> Result<()> {
    setup_logging(cli.verbose.unwrap_or(false));
    let cwd = std::env::current_dir().context("current directory")?;
    let opts = setup_opts(cli, &cwd);
    // The config file may turn on verbose.
    setup_logging(opts.verbose);

    let cancel = CancelToken::new();
    let handler_token = cancel.clone();
    ctrlc::set_handler(move || {
        warn!("Interrupt received, stopping stages...");
        handler_token.cancel();
    })
    .context("install Ctrl+C handler")?;

    let report = run_with_opts(&opts, &cancel)?;
    log_summary(&report);
    if report.cancelled {
        anyhow::bail!("cancelled by user");
    }
    Ok(())
}
