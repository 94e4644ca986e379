//! Upload stage: the pipeline's sink. Each item optionally becomes one JSON line in a manifest.

use anyhow::{Context, Result, anyhow};
use serde::Serialize;
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use crate::WorkItem;
use crate::engine::hashing::hash_to_hex;
use crate::stage::{CancelToken, QueueError, StageHandler};

/// One manifest line.
#[derive(Serialize)]
struct ManifestRecord<'a> {
    path: &'a Path,
    size: Option<u64>,
    mtime_ns: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    hash: Option<String>,
}

impl<'a> From<&'a WorkItem> for ManifestRecord<'a> {
    fn from(item: &'a WorkItem) -> Self {
        let meta = item.meta.as_ref();
        Self {
            path: &item.path,
            size: meta.map(|m| m.size),
            mtime_ns: meta.map(|m| m.mtime_ns),
            hash: meta.and_then(|m| m.hash.as_ref()).map(hash_to_hex),
        }
    }
}

/// JSON-lines file shared by all upload workers. Created (truncated) by the first worker to start.
pub struct Manifest {
    path: PathBuf,
    writer: Mutex<Option<BufWriter<File>>>,
}

impl Manifest {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            writer: Mutex::new(None),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Open the file if no worker has yet. Safe to call from every worker.
    pub fn open(&self) -> Result<()> {
        let mut writer = self.writer.lock().unwrap_or_else(PoisonError::into_inner);
        if writer.is_none() {
            let file = OpenOptions::new()
                .create(true)
                .write(true)
                .truncate(true)
                .open(&self.path)
                .with_context(|| format!("open manifest {}", self.path.display()))?;
            *writer = Some(BufWriter::new(file));
        }
        Ok(())
    }

    pub fn write(&self, item: &WorkItem) -> Result<()> {
        let line = serde_json::to_string(&ManifestRecord::from(item))?;
        let mut writer = self.writer.lock().unwrap_or_else(PoisonError::into_inner);
        let writer = writer
            .as_mut()
            .ok_or_else(|| anyhow!("manifest {} is not open", self.path.display()))?;
        writeln!(writer, "{line}")
            .with_context(|| format!("write manifest {}", self.path.display()))
    }

    pub fn flush(&self) -> Result<()> {
        let mut writer = self.writer.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(writer) = writer.as_mut() {
            writer
                .flush()
                .with_context(|| format!("flush manifest {}", self.path.display()))?;
        }
        Ok(())
    }
}

pub struct UploadHandler {
    latency: Duration,
    manifest: Option<Arc<Manifest>>,
}

impl UploadHandler {
    pub fn new(latency: Duration, manifest: Option<Arc<Manifest>>) -> Self {
        Self { latency, manifest }
    }
}

impl StageHandler<WorkItem> for UploadHandler {
    fn init_worker(&self, _worker: usize) -> Result<()> {
        match &self.manifest {
            Some(manifest) => manifest.open(),
            None => Ok(()),
        }
    }

    fn handle(&self, item: WorkItem, cancel: &CancelToken) -> Result<()> {
        if !self.latency.is_zero() && !cancel.sleep(self.latency) {
            return Err(QueueError::Cancelled.into());
        }
        if let Some(manifest) = &self.manifest {
            manifest.write(&item)?;
        }
        log::trace!("uploaded {}", item.path.display());
        Ok(())
    }
}
