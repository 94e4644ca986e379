//! Application configuration constants.
//! Tuning and thresholds in one place.

use std::sync::OnceLock;

use crate::types::StageKind;
use crate::utils::fd_limit::cap_by_fd_limit;

// ---- Package / paths (from CARGO_PKG_NAME, cached) ----

/// Package-derived paths: built once from `CARGO_PKG_NAME`, then cached.
pub struct PackagePaths {
    config_filename: String,
}

static PACKAGE_PATHS: OnceLock<PackagePaths> = OnceLock::new();

impl PackagePaths {
    pub fn get() -> &'static PackagePaths {
        PACKAGE_PATHS.get_or_init(|| {
            let pkg = env!("CARGO_PKG_NAME");
            PackagePaths {
                config_filename: format!(".{pkg}.toml"),
            }
        })
    }

    /// Config file looked up in the working directory when `--config` is not given.
    pub fn config_filename(&self) -> &str {
        &self.config_filename
    }
}

// ---- Worker threads ----

/// Default worker counts per stage.
/// Use [`WorkerThreadLimits::current()`] to fill `all_threads` from rayon; the rest are const.
#[derive(Clone, Copy, Debug)]
pub struct WorkerThreadLimits {
    /// Available threads (from rayon); set by [`WorkerThreadLimits::current()`].
    pub all_threads: usize,
    /// Traversal holds directory handles open; keep it modest.
    pub traverse_max: usize,
    /// Upload is latency-bound; a handful of workers is enough.
    pub upload_max: usize,
    pub floor: usize,
}

impl Default for WorkerThreadLimits {
    fn default() -> Self {
        Self {
            all_threads: 0, // use current() to set from rayon
            traverse_max: Self::TRAVERSE_MAX_THREADS,
            upload_max: Self::UPLOAD_MAX_THREADS,
            floor: Self::FLOOR_THREADS,
        }
    }
}

impl WorkerThreadLimits {
    pub const TRAVERSE_MAX_THREADS: usize = 8;
    pub const UPLOAD_MAX_THREADS: usize = 4;
    pub const FLOOR_THREADS: usize = 2;

    pub fn current() -> Self {
        Self {
            all_threads: rayon::current_num_threads(),
            ..Self::default()
        }
    }

    /// Default worker count for `kind`. Traverse is additionally capped by the FD limit.
    pub fn workers_for(&self, kind: StageKind) -> usize {
        let all = self.all_threads.max(self.floor);
        match kind {
            StageKind::Traverse => cap_by_fd_limit(all.min(self.traverse_max)),
            StageKind::Process => all,
            StageKind::Upload => all.min(self.upload_max),
        }
    }
}

// ---- Stage defaults ----

pub struct StageDefaults;

impl StageDefaults {
    pub const QUEUE_CAPACITY: usize = 1000;
    pub const TAKE_TIMEOUT_MS: u64 = 100;
    /// Quiescence must hold this long before a stage is declared complete.
    pub const GRACE_MS: u64 = 500;
    pub const MONITOR_INTERVAL_MS: u64 = 100;
}

// ---- Hashing ----

/// Hashing I/O thresholds and buffer sizes.
pub struct HashingConsts;

impl HashingConsts {
    /// File size above which hashing uses memory-mapped I/O (bytes). 100 MB.
    pub const HASH_MMAP_THRESHOLD: u64 = 100 * 1024 * 1024;
    /// Chunk size for reading files below mmap threshold (bytes). 1 MB.
    pub const HASH_READ_CHUNK_SIZE: usize = 1024 * 1024;
}
