//! Public and internal types for the pipewalk API and pipeline.

use anyhow::{Result, bail};
use std::path::PathBuf;
use std::time::Duration;

use crate::stage::StageReport;
use crate::utils::config::{StageDefaults, WorkerThreadLimits};

/// Directory or file. Directories go back into the traverse stage; files move on to processing.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ItemKind {
    Directory,
    File,
}

/// Metadata attached by the process stage.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FileMeta {
    /// Modification time in nanoseconds since epoch.
    pub mtime_ns: i64,
    pub size: u64,
    /// Blake3 hash (32 bytes), or `None` if hashing is off.
    pub hash: Option<[u8; 32]>,
}

/// One unit of work moving through the pipeline.
///
/// Items are never mutated in place; stages that derive data build a new item
/// (see [`WorkItem::with_meta`]).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WorkItem {
    pub path: PathBuf,
    pub kind: ItemKind,
    pub meta: Option<FileMeta>,
}

impl WorkItem {
    pub fn directory(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            kind: ItemKind::Directory,
            meta: None,
        }
    }

    pub fn file(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            kind: ItemKind::File,
            meta: None,
        }
    }

    pub fn is_dir(&self) -> bool {
        self.kind == ItemKind::Directory
    }

    pub fn with_meta(self, meta: FileMeta) -> Self {
        Self {
            meta: Some(meta),
            ..self
        }
    }
}

/// The three pipeline stages, in data-flow order.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StageKind {
    Traverse,
    Process,
    Upload,
}

impl StageKind {
    pub const ALL: [StageKind; 3] = [StageKind::Traverse, StageKind::Process, StageKind::Upload];

    pub fn name(&self) -> &'static str {
        match self {
            StageKind::Traverse => "traverse",
            StageKind::Process => "process",
            StageKind::Upload => "upload",
        }
    }
}

/// Per-stage tuning. Fixed for the lifetime of a run.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StageOpts {
    pub max_workers: usize,
    pub queue_capacity: usize,
    pub take_timeout: Duration,
    /// Simulated per-item latency (process/upload work stand-in). Zero disables it.
    pub latency: Duration,
}

impl StageOpts {
    /// Defaults for `kind`, with worker counts derived from the available threads.
    pub fn defaults_for(kind: StageKind, limits: &WorkerThreadLimits) -> Self {
        Self {
            max_workers: limits.workers_for(kind),
            queue_capacity: StageDefaults::QUEUE_CAPACITY,
            take_timeout: Duration::from_millis(StageDefaults::TAKE_TIMEOUT_MS),
            latency: Duration::ZERO,
        }
    }
}

/// Full options (CLI, config file and lib).
#[derive(Clone, Debug)]
pub struct Opts {
    /// Directories to seed the traverse stage with.
    pub roots: Vec<PathBuf>,
    pub traverse: StageOpts,
    pub process: StageOpts,
    pub upload: StageOpts,
    /// Wait before confirming a stage looks finished.
    pub grace: Duration,
    /// Progress bar refresh interval.
    pub monitor_interval: Duration,
    /// Follow symbolic links while traversing.
    pub follow_links: bool,
    /// Exclude patterns (glob syntax).
    pub exclude: Vec<String>,
    /// Compute blake3 hash for files in the process stage.
    pub with_hash: bool,
    /// Append one JSON line per uploaded item to this file.
    pub manifest: Option<PathBuf>,
    /// Show per-stage progress bars.
    pub progress: bool,
    pub verbose: bool,
    /// Strict mode: fail the run if any item failed or any path was skipped.
    pub strict: bool,
}

impl Default for Opts {
    fn default() -> Self {
        let limits = WorkerThreadLimits::current();
        Self {
            roots: Vec::new(),
            traverse: StageOpts::defaults_for(StageKind::Traverse, &limits),
            process: StageOpts::defaults_for(StageKind::Process, &limits),
            upload: StageOpts::defaults_for(StageKind::Upload, &limits),
            grace: Duration::from_millis(StageDefaults::GRACE_MS),
            monitor_interval: Duration::from_millis(StageDefaults::MONITOR_INTERVAL_MS),
            follow_links: false,
            exclude: Vec::new(),
            with_hash: false,
            manifest: None,
            progress: false,
            verbose: false,
            strict: false,
        }
    }
}

impl Opts {
    pub fn stage(&self, kind: StageKind) -> &StageOpts {
        match kind {
            StageKind::Traverse => &self.traverse,
            StageKind::Process => &self.process,
            StageKind::Upload => &self.upload,
        }
    }

    pub fn stage_mut(&mut self, kind: StageKind) -> &mut StageOpts {
        match kind {
            StageKind::Traverse => &mut self.traverse,
            StageKind::Process => &mut self.process,
            StageKind::Upload => &mut self.upload,
        }
    }

    /// Reject configurations the pipeline cannot run with. Called before anything starts.
    pub fn validate(&self) -> Result<()> {
        if self.roots.is_empty() {
            bail!("no roots to traverse");
        }
        for kind in StageKind::ALL {
            let stage = self.stage(kind);
            let name = kind.name();
            if stage.max_workers == 0 {
                bail!("{name}: max_workers must be greater than 0");
            }
            if stage.queue_capacity == 0 {
                bail!("{name}: queue_capacity must be greater than 0");
            }
            if stage.take_timeout.is_zero() {
                bail!("{name}: take_timeout_ms must be greater than 0");
            }
        }
        if self.roots.len() > self.traverse.queue_capacity {
            bail!(
                "{} roots do not fit the traverse queue (capacity {})",
                self.roots.len(),
                self.traverse.queue_capacity
            );
        }
        for root in &self.roots {
            if !root.is_dir() {
                bail!("root is not a directory: {}", root.display());
            }
        }
        Ok(())
    }
}

/// Outcome of a full run.
#[derive(Clone, Debug)]
pub struct PipelineReport {
    /// One report per stage, in data-flow order.
    pub stages: Vec<StageReport>,
    /// Paths that could not be read during traversal.
    pub skipped: usize,
    pub cancelled: bool,
    pub elapsed: Duration,
}

impl PipelineReport {
    pub fn stage(&self, kind: StageKind) -> Option<&StageReport> {
        self.stages.iter().find(|s| s.stage == kind.name())
    }

    /// Items whose handler failed, across all stages.
    pub fn failed(&self) -> u64 {
        self.stages.iter().map(|s| s.failed).sum()
    }

    pub fn completed(&self) -> bool {
        !self.stages.is_empty() && self.stages.iter().all(|s| s.completed)
    }
}
