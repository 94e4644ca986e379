//! Worker pool for one stage: take → handle → commit until the stage completes or the run is
//! cancelled.

use crossbeam_channel::{Sender, bounded};
use log::{debug, error, info};
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use super::error::{QueueError, StageError};
use super::signal::{CancelToken, Latch};
use super::state::{CompletionCheck, StageState};

/// Per-item business logic for a stage.
///
/// A handler may enqueue derived items into its own stage and/or downstream stages. Failures are
/// returned, never thrown past the worker loop: the item is still committed and the worker
/// carries on.
pub trait StageHandler<T>: Send + Sync {
    fn handle(&self, item: T, cancel: &CancelToken) -> anyhow::Result<()>;

    /// Runs once on each worker thread before it starts taking items. An error here is fatal
    /// to the stage.
    fn init_worker(&self, _worker: usize) -> anyhow::Result<()> {
        Ok(())
    }
}

/// Totals for one stage after its workers have exited.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageReport {
    pub stage: String,
    pub taken: u64,
    pub committed: u64,
    pub failed: u64,
    pub completed: bool,
}

/// Runs a stage's worker pool to exhaustion.
pub struct StageOrchestrator<T> {
    state: Arc<StageState<T>>,
    handler: Arc<dyn StageHandler<T>>,
    workers: usize,
    take_timeout: Duration,
}

/// State shared by the workers of one stage run.
struct WorkerShared<T> {
    state: Arc<StageState<T>>,
    handler: Arc<dyn StageHandler<T>>,
    take_timeout: Duration,
    cancel: CancelToken,
    halt: Latch,
    failed: AtomicU64,
    fatal: Mutex<Option<StageError>>,
}

impl<T> WorkerShared<T> {
    fn should_stop(&self) -> bool {
        self.state.is_completed() || self.cancel.is_cancelled() || self.halt.is_set()
    }

    /// Record a fatal error (first one wins) and stop the run. Cancelling wakes any sibling
    /// worker blocked in `add` or `take`; the halt latch alone cannot.
    fn abort(&self, err: StageError) {
        self.fatal
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get_or_insert(err);
        self.halt.fire();
        self.cancel.cancel();
    }

    fn on_failure(&self, worker: usize, err: anyhow::Error) {
        let stage = self.state.name();
        match err.downcast_ref::<QueueError>() {
            Some(QueueError::Cancelled) => {
                debug!("{stage}[{worker}]: item abandoned on cancellation");
            }
            Some(QueueError::Closed) => {
                error!("{stage}[{worker}]: enqueue into a closed stage: {err:#}");
                self.abort(StageError::QueueClosed {
                    stage: stage.to_string(),
                    reason: format!("{err:#}"),
                });
            }
            None => {
                self.failed.fetch_add(1, Ordering::Relaxed);
                error!("{stage}[{worker}]: unable to handle item, continuing: {err:#}");
            }
        }
    }
}

impl<T: Send + 'static> StageOrchestrator<T> {
    pub fn new(
        state: Arc<StageState<T>>,
        handler: Arc<dyn StageHandler<T>>,
        workers: usize,
        take_timeout: Duration,
    ) -> Self {
        Self {
            state,
            handler,
            workers: workers.max(1),
            take_timeout,
        }
    }

    pub fn state(&self) -> &Arc<StageState<T>> {
        &self.state
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    /// Start the pool and block until every worker has exited.
    ///
    /// Returns the stage totals, or the first fatal error: a worker that failed to start, a
    /// handler that enqueued into a closed stage, or a worker thread that panicked. A failed
    /// start or a closed-queue enqueue also cancels `cancel` so blocked workers can be joined.
    pub fn run(&self, cancel: &CancelToken) -> Result<StageReport, StageError> {
        let name = self.state.name().to_string();
        debug!("{name}: starting {} workers", self.workers());

        let shared = Arc::new(WorkerShared {
            state: Arc::clone(&self.state),
            handler: Arc::clone(&self.handler),
            take_timeout: self.take_timeout,
            cancel: cancel.clone(),
            halt: Latch::new(),
            failed: AtomicU64::new(0),
            fatal: Mutex::new(None),
        });

        let (ready_tx, ready_rx) = bounded::<(usize, anyhow::Result<()>)>(self.workers);
        let mut handles = Vec::with_capacity(self.workers);
        let mut startup_error = None;
        for id in 0..self.workers {
            let worker_shared = Arc::clone(&shared);
            let ready = ready_tx.clone();
            let spawned = thread::Builder::new()
                .name(format!("{name}-{id}"))
                .spawn(move || worker_loop(id, worker_shared, ready));
            match spawned {
                Ok(handle) => handles.push((id, handle)),
                Err(e) => {
                    startup_error = Some(StageError::Startup {
                        stage: name.clone(),
                        worker: id,
                        reason: e.to_string(),
                    });
                    break;
                }
            }
        }
        drop(ready_tx);

        // Every spawned worker reports its init result exactly once before taking items.
        if startup_error.is_none() {
            for _ in 0..handles.len() {
                match ready_rx.recv() {
                    Ok((_, Ok(()))) => {}
                    Ok((worker, Err(e))) => {
                        startup_error = Some(StageError::Startup {
                            stage: name.clone(),
                            worker,
                            reason: format!("{e:#}"),
                        });
                        break;
                    }
                    // A worker died before reporting; its panic surfaces on join.
                    Err(_) => break,
                }
            }
        }

        if let Some(err) = startup_error {
            error!("{err}");
            shared.halt.fire();
            shared.cancel.cancel();
            let _ = join_workers(&name, handles);
            return Err(err);
        }
        debug!("{name}: {} workers running", handles.len());

        let coordinator = {
            let shared = Arc::clone(&shared);
            thread::Builder::new()
                .name(format!("{name}-coordinator"))
                .spawn(move || coordinate(&shared))
        };
        let coordinator = match coordinator {
            Ok(handle) => handle,
            Err(e) => {
                let err = StageError::Startup {
                    stage: name.clone(),
                    worker: self.workers,
                    reason: format!("coordinator: {e}"),
                };
                error!("{err}");
                shared.halt.fire();
                shared.cancel.cancel();
                let _ = join_workers(&name, handles);
                return Err(err);
            }
        };

        let panicked = join_workers(&name, handles);
        shared.halt.fire();
        let _ = coordinator.join();

        if let Some(err) = shared
            .fatal
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            return Err(err);
        }
        if let Some(err) = panicked {
            return Err(err);
        }

        let report = StageReport {
            stage: name,
            taken: self.state.total_taken(),
            committed: self.state.total_committed(),
            failed: shared.failed.load(Ordering::Relaxed),
            completed: self.state.is_completed(),
        };
        if report.completed {
            info!(
                "{}: completed. {} items committed ({} failed)",
                report.stage, report.committed, report.failed
            );
        } else {
            info!(
                "{}: stopped before completion. {} items committed, {} left queued",
                report.stage,
                report.committed,
                self.state.len()
            );
        }
        Ok(report)
    }
}

fn worker_loop<T>(
    id: usize,
    shared: Arc<WorkerShared<T>>,
    ready: Sender<(usize, anyhow::Result<()>)>,
) {
    let init = shared.handler.init_worker(id);
    let started = init.is_ok();
    let _ = ready.send((id, init));
    drop(ready);
    if !started {
        return;
    }

    let stage = shared.state.name();
    debug!("{stage}[{id}]: worker started");
    while !shared.should_stop() {
        let item = match shared.state.take(shared.take_timeout, &shared.cancel) {
            Ok(Some(item)) => item,
            // Idle: timed out, or closed and drained. `should_stop` decides.
            Ok(None) => continue,
            Err(QueueError::Cancelled | QueueError::Closed) => break,
        };

        let handler = &shared.handler;
        let cancel = &shared.cancel;
        let result = panic::catch_unwind(AssertUnwindSafe(|| handler.handle(item, cancel)))
            .unwrap_or_else(|_| Err(anyhow::anyhow!("handler panicked")));
        shared.state.commit();

        if let Err(err) = result {
            shared.on_failure(id, err);
        }
    }
    debug!("{stage}[{id}]: worker exiting");
}

/// Re-runs the completion check while the stage sits idle. A downstream stage may drain before
/// its upstream completes; with no further commits it would otherwise never re-check.
fn coordinate<T>(shared: &WorkerShared<T>) {
    let stage = shared.state.name();
    while !shared.should_stop() {
        if shared.state.await_completion_timeout(shared.take_timeout) {
            break;
        }
        if shared.state.is_quiescent()
            && shared.state.check_completion() == CompletionCheck::Blocked
        {
            debug!("{stage}: idle, waiting on upstream");
        }
    }
}

fn join_workers(stage: &str, handles: Vec<(usize, JoinHandle<()>)>) -> Option<StageError> {
    let mut first = None;
    for (worker, handle) in handles {
        if handle.join().is_err() {
            error!("{stage}[{worker}]: worker thread panicked");
            first.get_or_insert(StageError::WorkerPanicked {
                stage: stage.to_string(),
                worker,
            });
        }
    }
    first
}
