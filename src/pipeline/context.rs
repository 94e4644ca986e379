//! Shared context for the stage handlers: filters, link policy and skip bookkeeping.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use crate::Opts;
use crate::engine::tools::should_include_in_walk;

/// Built once per run in `run_pipeline` and shared (via `Arc`) by every traverse worker.
pub struct PipelineContext {
    pub exclude: Vec<String>,
    pub follow_links: bool,
    pub strict: bool,
    /// Absolute manifest path; never reported as a file even when it lives under a root.
    pub manifest: Option<PathBuf>,
    skipped_paths: Mutex<Vec<(PathBuf, String)>>,
    visited: Mutex<HashSet<PathBuf>>,
}

impl PipelineContext {
    pub fn from_opts(opts: &Opts) -> Self {
        Self {
            exclude: opts.exclude.clone(),
            follow_links: opts.follow_links,
            strict: opts.strict,
            manifest: opts.manifest.as_deref().map(absolute_manifest_path),
            skipped_paths: Mutex::new(Vec::new()),
            visited: Mutex::new(HashSet::new()),
        }
    }

    pub fn should_include(&self, path: &Path) -> bool {
        if self.manifest.as_deref() == Some(path) {
            return false;
        }
        should_include_in_walk(path, &self.exclude)
    }

    /// Remember a path that could not be read. The run carries on; strict mode fails it at the end.
    pub fn record_skip(&self, path: PathBuf, reason: String) {
        log::debug!("skipping {}: {}", path.display(), reason);
        self.skipped_paths
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((path, reason));
    }

    pub fn skipped_paths(&self) -> Vec<(PathBuf, String)> {
        self.skipped_paths
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn skipped_count(&self) -> usize {
        self.skipped_paths
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// True the first time a canonical directory is seen. Guards against symlink cycles when
    /// following links.
    pub fn first_visit(&self, dir: &Path) -> bool {
        let key = dir.canonicalize().unwrap_or_else(|_| dir.to_path_buf());
        self.visited
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key)
    }
}

fn absolute_manifest_path(path: &Path) -> PathBuf {
    let parent = path.parent().filter(|p| !p.as_os_str().is_empty());
    let parent = match parent {
        Some(p) => p.canonicalize().ok(),
        None => std::env::current_dir().ok().and_then(|d| d.canonicalize().ok()),
    };
    match (parent, path.file_name()) {
        (Some(dir), Some(name)) => dir.join(name),
        _ => std::path::absolute(path).unwrap_or_else(|_| path.to_path_buf()),
    }
}
