//! Traverse stage: list one directory per item, feed subdirectories back into the traverse queue
//! and files into the process queue.

use anyhow::{Context, Result};
use std::fs::{self, DirEntry};
use std::path::PathBuf;
use std::sync::Arc;

use crate::WorkItem;
use crate::stage::{CancelToken, QueueError, StageHandler, StageState};

use super::context::PipelineContext;

/// Where one directory entry goes next.
enum Discovered {
    Directory(PathBuf),
    File(PathBuf),
    Ignored,
}

pub struct TraverseHandler {
    traverse: Arc<StageState<WorkItem>>,
    process: Arc<StageState<WorkItem>>,
    ctx: Arc<PipelineContext>,
}

impl TraverseHandler {
    pub fn new(
        traverse: Arc<StageState<WorkItem>>,
        process: Arc<StageState<WorkItem>>,
        ctx: Arc<PipelineContext>,
    ) -> Self {
        Self {
            traverse,
            process,
            ctx,
        }
    }

    fn classify(&self, entry: &DirEntry) -> Discovered {
        let path = entry.path();
        if !self.ctx.should_include(&path) {
            return Discovered::Ignored;
        }
        let file_type = match entry.file_type() {
            Ok(t) => t,
            Err(e) => {
                self.ctx.record_skip(path, e.to_string());
                return Discovered::Ignored;
            }
        };

        if file_type.is_symlink() {
            if !self.ctx.follow_links {
                return Discovered::File(path);
            }
            // Resolve the target; a dangling link is a skip, not a failure.
            return match fs::metadata(&path) {
                Ok(meta) if meta.is_dir() => self.directory(path),
                Ok(_) => Discovered::File(path),
                Err(e) => {
                    self.ctx.record_skip(path, format!("broken link: {e}"));
                    Discovered::Ignored
                }
            };
        }

        if file_type.is_dir() {
            self.directory(path)
        } else {
            Discovered::File(path)
        }
    }

    fn directory(&self, path: PathBuf) -> Discovered {
        if self.ctx.follow_links && !self.ctx.first_visit(&path) {
            log::debug!("already visited {}, not descending", path.display());
            return Discovered::Ignored;
        }
        Discovered::Directory(path)
    }
}

impl StageHandler<WorkItem> for TraverseHandler {
    fn handle(&self, item: WorkItem, cancel: &CancelToken) -> Result<()> {
        if !item.is_dir() {
            // Seeded with a file: nothing to list, pass it straight on.
            self.process.add(item, cancel)?;
            return Ok(());
        }

        let entries = match fs::read_dir(&item.path) {
            Ok(entries) => entries,
            Err(e) => {
                self.ctx.record_skip(item.path.clone(), e.to_string());
                return Err(e).with_context(|| format!("read_dir {}", item.path.display()));
            }
        };

        for entry in entries {
            if cancel.is_cancelled() {
                return Err(QueueError::Cancelled.into());
            }
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    self.ctx.record_skip(item.path.clone(), e.to_string());
                    continue;
                }
            };
            match self.classify(&entry) {
                Discovered::Directory(path) => {
                    self.traverse.add(WorkItem::directory(path), cancel)?
                }
                Discovered::File(path) => self.process.add(WorkItem::file(path), cancel)?,
                Discovered::Ignored => {}
            }
        }
        Ok(())
    }
}
