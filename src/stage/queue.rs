//! Bounded FIFO work queue with blocking, cancellable add/take.
//!
//! This is the only backpressure mechanism in the pipeline: a full queue blocks its producers,
//! which in turn stalls the upstream workers feeding it.

use crossbeam_channel::{Receiver, Select, Sender, bounded};
use std::time::Duration;

use super::error::QueueError;
use super::signal::{CancelToken, Latch};

/// Thread-safe bounded FIFO. Share it behind an `Arc`; all methods take `&self`.
pub struct BoundedWorkQueue<T> {
    tx: Sender<T>,
    rx: Receiver<T>,
    capacity: usize,
    closed: Latch,
}

impl<T> BoundedWorkQueue<T> {
    /// Create a queue holding at most `capacity` items. A zero capacity is raised to 1; a
    /// zero-capacity channel would be a rendezvous, not a queue.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let (tx, rx) = bounded(capacity);
        Self {
            tx,
            rx,
            capacity,
            closed: Latch::new(),
        }
    }

    /// Enqueue `item`, blocking while the queue is full.
    ///
    /// Fails with [`QueueError::Closed`] once the queue is closed and with
    /// [`QueueError::Cancelled`] if `cancel` fires while blocked. The item is dropped in both cases.
    pub fn add(&self, item: T, cancel: &CancelToken) -> Result<(), QueueError> {
        if cancel.is_cancelled() {
            return Err(QueueError::Cancelled);
        }
        if self.closed.is_set() {
            return Err(QueueError::Closed);
        }

        let mut sel = Select::new();
        let send_op = sel.send(&self.tx);
        let closed_op = sel.recv(self.closed.receiver());
        match sel.select_with_cancel(cancel) {
            Selected::Op(oper) if oper.index() == send_op => {
                oper.send(&self.tx, item).map_err(|_| QueueError::Closed)
            }
            Selected::Op(oper) => {
                debug_assert_eq!(oper.index(), closed_op);
                let _ = oper.recv(self.closed.receiver());
                Err(QueueError::Closed)
            }
            Selected::Cancelled => Err(QueueError::Cancelled),
            Selected::TimedOut => unreachable!("add waits without a timeout"),
        }
    }

    /// Wait up to `timeout` for an item.
    ///
    /// Returns `Ok(None)` on timeout, and immediately once the queue is closed and drained.
    /// Items queued before [`close`](Self::close) are still handed out.
    pub fn try_take(
        &self,
        timeout: Duration,
        cancel: &CancelToken,
    ) -> Result<Option<T>, QueueError> {
        if cancel.is_cancelled() {
            return Err(QueueError::Cancelled);
        }
        if let Ok(item) = self.rx.try_recv() {
            return Ok(Some(item));
        }
        if self.closed.is_set() {
            return Ok(None);
        }

        let mut sel = Select::new();
        let recv_op = sel.recv(&self.rx);
        let closed_op = sel.recv(self.closed.receiver());
        match sel.select_timeout_with_cancel(timeout, cancel) {
            Selected::Op(oper) if oper.index() == recv_op => Ok(oper.recv(&self.rx).ok()),
            Selected::Op(oper) => {
                debug_assert_eq!(oper.index(), closed_op);
                let _ = oper.recv(self.closed.receiver());
                Ok(self.rx.try_recv().ok())
            }
            Selected::Cancelled => Err(QueueError::Cancelled),
            Selected::TimedOut => Ok(None),
        }
    }

    /// Stop accepting items. Idempotent; queued items stay available to `try_take`.
    /// Returns true for the call that actually closed the queue.
    pub fn close(&self) -> bool {
        self.closed.fire()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.is_set()
    }

    pub fn len(&self) -> usize {
        self.rx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

/// Result of a select that also watches a cancellation token.
enum Selected<'a> {
    Op(crossbeam_channel::SelectedOperation<'a>),
    Cancelled,
    TimedOut,
}

/// Adds the cancellation arm to a `Select` so every blocking queue call wakes on cancel.
trait SelectCancelExt<'a> {
    fn select_with_cancel(self, cancel: &'a CancelToken) -> Selected<'a>;
    fn select_timeout_with_cancel(
        self,
        timeout: Duration,
        cancel: &'a CancelToken,
    ) -> Selected<'a>;
}

impl<'a> SelectCancelExt<'a> for Select<'a> {
    fn select_with_cancel(mut self, cancel: &'a CancelToken) -> Selected<'a> {
        let cancel_op = self.recv(cancel.receiver());
        let oper = self.select();
        resolve(oper, cancel_op, cancel)
    }

    fn select_timeout_with_cancel(
        mut self,
        timeout: Duration,
        cancel: &'a CancelToken,
    ) -> Selected<'a> {
        let cancel_op = self.recv(cancel.receiver());
        match self.select_timeout(timeout) {
            Ok(oper) => resolve(oper, cancel_op, cancel),
            Err(_) => Selected::TimedOut,
        }
    }
}

fn resolve<'a>(
    oper: crossbeam_channel::SelectedOperation<'a>,
    cancel_op: usize,
    cancel: &'a CancelToken,
) -> Selected<'a> {
    if oper.index() == cancel_op {
        let _ = oper.recv(cancel.receiver());
        Selected::Cancelled
    } else {
        Selected::Op(oper)
    }
}
