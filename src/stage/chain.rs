//! Chains stage orchestrators into a pipeline. Stage N+1 is gated on stage N's completion, so a
//! downstream stage never closes while its upstream could still feed it.

use crossbeam_channel::unbounded;
use log::{debug, error};
use std::sync::Arc;
use std::thread;

use super::error::StageError;
use super::orchestrator::{StageOrchestrator, StageReport};
use super::signal::CancelToken;
use super::state::StageState;

/// Precondition for a stage fed by `upstream`: true once `upstream` has completed.
pub fn upstream_completed<T: Send + 'static>(
    upstream: &Arc<StageState<T>>,
) -> impl Fn() -> bool + Send + Sync + 'static {
    let upstream = Arc::clone(upstream);
    move || upstream.is_completed()
}

/// Ordered stages sharing one item type. Stage 0 has no upstream and completes purely from its
/// own quiescence.
pub struct Pipeline<T> {
    stages: Vec<StageOrchestrator<T>>,
}

impl<T: Send + 'static> Pipeline<T> {
    /// Link `stages` in order. Must be called before any of them runs.
    pub fn new(stages: Vec<StageOrchestrator<T>>) -> Result<Self, StageError> {
        for pair in stages.windows(2) {
            pair[1]
                .state()
                .register_precondition(upstream_completed(pair[0].state()))?;
        }
        Ok(Self { stages })
    }

    pub fn stages(&self) -> &[StageOrchestrator<T>] {
        &self.stages
    }

    pub fn states(&self) -> Vec<Arc<StageState<T>>> {
        self.stages().iter().map(|s| Arc::clone(s.state())).collect()
    }

    /// Pre-load the first stage's queue. Nothing consumes it yet, so more items than the queue
    /// holds would block forever; that is rejected up front.
    pub fn seed<I>(&self, items: I, cancel: &CancelToken) -> Result<usize, StageError>
    where
        I: IntoIterator<Item = T>,
    {
        let Some(first) = self.stages.first() else {
            return Ok(0);
        };
        let state = first.state();
        let items: Vec<T> = items.into_iter().collect();
        let free = state.capacity() - state.len();
        if items.len() > free {
            return Err(StageError::Startup {
                stage: state.name().to_string(),
                worker: 0,
                reason: format!(
                    "{} seed items exceed the free queue capacity of {}",
                    items.len(),
                    free
                ),
            });
        }
        let count = items.len();
        for item in items {
            state.add(item, cancel).map_err(|e| StageError::Startup {
                stage: state.name().to_string(),
                worker: 0,
                reason: format!("seeding: {e}"),
            })?;
        }
        debug!("{}: seeded with {count} items", state.name());
        Ok(count)
    }

    /// Run every stage concurrently and return once all of them have exited.
    ///
    /// The first fatal stage error cancels `cancel`, so the remaining stages wind down, and is
    /// returned after they have.
    pub fn run(&self, cancel: &CancelToken) -> Result<Vec<StageReport>, StageError> {
        let (done_tx, done_rx) = unbounded();
        let mut reports: Vec<Option<StageReport>> = vec![None; self.stages.len()];
        let mut fatal: Option<StageError> = None;

        thread::scope(|scope| {
            for (idx, stage) in self.stages.iter().enumerate() {
                let stage_tx = done_tx.clone();
                let spawned = thread::Builder::new()
                    .name(format!("{}-pool", stage.state().name()))
                    .spawn_scoped(scope, move || {
                        let _ = stage_tx.send((idx, stage.run(cancel)));
                    });
                if let Err(e) = spawned {
                    let _ = done_tx.send((
                        idx,
                        Err(StageError::Startup {
                            stage: stage.state().name().to_string(),
                            worker: 0,
                            reason: format!("pool thread: {e}"),
                        }),
                    ));
                }
            }
            drop(done_tx);

            for (idx, result) in done_rx.iter() {
                match result {
                    Ok(report) => reports[idx] = Some(report),
                    Err(err) => {
                        if fatal.is_none() {
                            error!("pipeline aborted: {err}");
                            cancel.cancel();
                            fatal = Some(err);
                        }
                    }
                }
            }
        });

        match fatal {
            Some(err) => Err(err),
            None => Ok(reports.into_iter().flatten().collect()),
        }
    }
}
