use anyhow::{Context, Result};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use crate::engine::hashing::hash_file;
use crate::engine::tools::mtime_ns;
use crate::stage::{CancelToken, QueueError, StageHandler, StageState};
use crate::{FileMeta, WorkItem};

/// Process stage: stat the file, optionally hash it, then hand it to the upload stage.
pub struct ProcessHandler {
    upload: Arc<StageState<WorkItem>>,
    with_hash: bool,
    follow_links: bool,
    latency: Duration,
}

impl ProcessHandler {
    pub fn new(
        upload: Arc<StageState<WorkItem>>,
        with_hash: bool,
        follow_links: bool,
        latency: Duration,
    ) -> Self {
        Self {
            upload,
            with_hash,
            follow_links,
            latency,
        }
    }
}

impl StageHandler<WorkItem> for ProcessHandler {
    fn handle(&self, item: WorkItem, cancel: &CancelToken) -> Result<()> {
        let meta = file_meta(&item.path, self.with_hash, self.follow_links)?;
        if !self.latency.is_zero() && !cancel.sleep(self.latency) {
            return Err(QueueError::Cancelled.into());
        }
        self.upload.add(item.with_meta(meta), cancel)?;
        Ok(())
    }
}

/// Metadata (and hash when requested) for one path. Symlinks are stat'ed through only when
/// following links; otherwise the link itself is described and never hashed.
pub fn file_meta(path: &Path, with_hash: bool, follow_links: bool) -> Result<FileMeta> {
    let meta = if follow_links {
        std::fs::metadata(path)
    } else {
        std::fs::symlink_metadata(path)
    }
    .with_context(|| format!("stat {}", path.display()))?;
    let size = meta.len();
    let hash = if with_hash && meta.is_file() {
        Some(hash_file(path, size)?)
    } else {
        None
    };
    Ok(FileMeta {
        mtime_ns: mtime_ns(&meta),
        size,
        hash,
    })
}
