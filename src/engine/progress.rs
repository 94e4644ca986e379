//! Per-stage progress bars, refreshed from stage snapshots on a dedicated thread.

use kdam::{Animation, Bar, BarExt};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::stage::{CancelToken, Latch, StageSnapshot, StageState};

/// Create a counter for one stage (unknown total: shows the count without a percentage).
pub fn create_counter(desc: &str, position: u16) -> Bar {
    kdam::tqdm!(
        total = 0,
        desc = desc.to_string(),
        animation = Animation::Classic,
        position = position,
        unit = " items"
    )
}

fn postfix(snapshot: &StageSnapshot) -> String {
    let status = if snapshot.completed {
        "completed".to_string()
    } else {
        format!("{} workers", snapshot.active_workers)
    };
    format!("queue: {}/{}, {}", snapshot.len, snapshot.capacity, status)
}

/// One bar per stage plus the last committed count drawn on it.
struct StageBar {
    bar: Bar,
    drawn: u64,
}

impl StageBar {
    fn redraw(&mut self, snapshot: &StageSnapshot) {
        let delta = snapshot.total_committed.saturating_sub(self.drawn);
        self.drawn = snapshot.total_committed;
        self.bar.postfix = postfix(snapshot);
        if delta > 0 {
            let _ = self.bar.update(delta as usize);
        } else {
            let _ = self.bar.refresh();
        }
    }
}

/// Polls every stage until all have completed, the run is cancelled or [`finish`](Self::finish)
/// is called.
pub struct ProgressMonitor {
    handle: Option<JoinHandle<()>>,
    stop: Latch,
}

impl ProgressMonitor {
    pub fn spawn<T: Send + 'static>(
        states: Vec<Arc<StageState<T>>>,
        interval: Duration,
        cancel: &CancelToken,
    ) -> std::io::Result<Self> {
        let stop = Latch::new();
        let thread_stop = stop.clone();
        let cancel = cancel.clone();
        let handle = thread::Builder::new()
            .name("monitor".to_string())
            .spawn(move || monitor_loop(&states, interval, &thread_stop, &cancel))?;
        Ok(Self {
            handle: Some(handle),
            stop,
        })
    }

    /// Draw the final state and wait for the monitor thread.
    pub fn finish(mut self) {
        self.stop.fire();
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for ProgressMonitor {
    fn drop(&mut self) {
        self.stop.fire();
    }
}

fn monitor_loop<T>(
    states: &[Arc<StageState<T>>],
    interval: Duration,
    stop: &Latch,
    cancel: &CancelToken,
) {
    let mut bars: Vec<StageBar> = states
        .iter()
        .enumerate()
        .map(|(i, s)| StageBar {
            bar: create_counter(s.name(), i as u16),
            drawn: 0,
        })
        .collect();

    loop {
        let snapshots: Vec<StageSnapshot> = states.iter().map(|s| s.snapshot()).collect();
        for (bar, snapshot) in bars.iter_mut().zip(&snapshots) {
            bar.redraw(snapshot);
        }
        if snapshots.iter().all(|s| s.completed) || cancel.is_cancelled() {
            break;
        }
        if stop.wait_timeout(interval) {
            // Final redraw so the bars show the totals.
            for (bar, state) in bars.iter_mut().zip(states) {
                bar.redraw(&state.snapshot());
            }
            break;
        }
    }
    // Move the cursor below the stacked bars.
    eprint!("{}", "\n".repeat(bars.len()));
}
