//! Load `.pipewalk.toml`. The CLI layers it between defaults and flags; lib callers build
//! [`Opts`] directly.

use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::types::{Opts, StageKind, StageOpts};
use crate::utils::config::PackagePaths;

#[derive(Debug, Default, Deserialize)]
pub struct PipewalkToml {
    #[serde(default)]
    pipeline: PipelineSection,
    #[serde(default)]
    traverse: StageSection,
    #[serde(default)]
    process: StageSection,
    #[serde(default)]
    upload: StageSection,
}

#[derive(Debug, Default, Deserialize)]
struct PipelineSection {
    roots: Option<Vec<String>>,
    grace_ms: Option<u64>,
    monitor_interval_ms: Option<u64>,
    exclude: Option<Vec<String>>,
    follow_links: Option<bool>,
    hash: Option<bool>,
    manifest: Option<String>,
    progress: Option<bool>,
    verbose: Option<bool>,
    strict: Option<bool>,
}

#[derive(Debug, Default, Deserialize)]
struct StageSection {
    max_workers: Option<usize>,
    queue_capacity: Option<usize>,
    take_timeout_ms: Option<u64>,
    latency_ms: Option<u64>,
}

impl PipewalkToml {
    fn stage(&self, kind: StageKind) -> &StageSection {
        match kind {
            StageKind::Traverse => &self.traverse,
            StageKind::Process => &self.process,
            StageKind::Upload => &self.upload,
        }
    }
}

/// Parse config text. Errors are reported by the caller.
pub fn parse_pipewalk_toml(s: &str) -> Result<PipewalkToml, toml::de::Error> {
    toml::from_str(s)
}

/// Load the config file: `explicit` if given, else `.pipewalk.toml` in `dir` if present.
/// Missing, unreadable or malformed files yield `None` (malformed ones with a warning).
pub fn load_pipewalk_toml(explicit: Option<&Path>, dir: &Path) -> Option<PipewalkToml> {
    let path = match explicit {
        Some(p) => p.to_path_buf(),
        None => dir.join(PackagePaths::get().config_filename()),
    };
    let s = match std::fs::read_to_string(&path) {
        Ok(s) => s,
        Err(e) => {
            if explicit.is_some() {
                log::warn!("{}: {}", path.display(), e);
            }
            return None;
        }
    };
    parse_pipewalk_toml(&s)
        .map_err(|e| log::warn!("{}: {}", path.display(), e))
        .ok()
}

/// Overwrite opts field from file when present.
macro_rules! apply_file_opt {
    ($section:expr, $opts:expr, $field:ident => $opts_field:ident) => {
        if let Some(v) = $section.$field.clone() {
            $opts.$opts_field = v;
        }
    };
    ($section:expr, $opts:expr, $field:ident => $opts_field:ident, $map:expr) => {
        if let Some(v) = $section.$field.clone() {
            $opts.$opts_field = $map(v);
        }
    };
}

fn apply_stage(section: &StageSection, stage: &mut StageOpts) {
    apply_file_opt!(section, stage, max_workers => max_workers);
    apply_file_opt!(section, stage, queue_capacity => queue_capacity);
    apply_file_opt!(section, stage, take_timeout_ms => take_timeout, Duration::from_millis);
    apply_file_opt!(section, stage, latency_ms => latency, Duration::from_millis);
}

/// Apply file config to opts (only fields present in the file). Call before applying CLI.
pub fn apply_file_to_opts(file: &PipewalkToml, opts: &mut Opts) {
    let p = &file.pipeline;
    if let Some(roots) = &p.roots {
        opts.roots = roots.iter().map(PathBuf::from).collect();
    }
    apply_file_opt!(p, opts, grace_ms => grace, Duration::from_millis);
    apply_file_opt!(p, opts, monitor_interval_ms => monitor_interval, Duration::from_millis);
    apply_file_opt!(p, opts, exclude => exclude);
    apply_file_opt!(p, opts, follow_links => follow_links);
    apply_file_opt!(p, opts, hash => with_hash);
    apply_file_opt!(p, opts, manifest => manifest, |m: String| Some(PathBuf::from(m)));
    apply_file_opt!(p, opts, progress => progress);
    apply_file_opt!(p, opts, verbose => verbose);
    apply_file_opt!(p, opts, strict => strict);

    for kind in StageKind::ALL {
        apply_stage(file.stage(kind), opts.stage_mut(kind));
    }
}
