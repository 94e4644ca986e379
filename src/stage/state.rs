//! Per-stage state: the queue, in-flight/committed counters and completion detection.

use log::{debug, warn};
use std::sync::OnceLock;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::thread;
use std::time::Duration;

use super::error::{QueueError, StageError};
use super::queue::BoundedWorkQueue;
use super::signal::{CancelToken, Latch};

/// Extra gate on stage completion, typically "the upstream stage has completed".
pub type Precondition = Box<dyn Fn() -> bool + Send + Sync>;

/// What a completion check concluded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompletionCheck {
    /// Items are queued or a worker holds one.
    Busy,
    /// Another check for this stage is already running.
    InProgress,
    /// Quiescence did not survive the grace window.
    Raced,
    /// Quiescent, but the precondition does not hold yet.
    Blocked,
    /// This check closed the queue and fired the completion signal.
    Completed,
    AlreadyCompleted,
    /// `commit` was called without a matching `take`; counters were left untouched.
    Unmatched,
}

/// Point-in-time view of a stage for progress reporting.
#[derive(Debug, Clone)]
pub struct StageSnapshot {
    pub name: String,
    pub len: usize,
    pub capacity: usize,
    pub active_workers: usize,
    pub total_taken: u64,
    pub total_committed: u64,
    pub completed: bool,
}

/// Queue plus the bookkeeping needed to decide, without a central coordinator, when a stage has
/// no more work coming.
///
/// Every successful [`take`](Self::take) must be paired with exactly one
/// [`commit`](Self::commit), whether or not the item was handled successfully.
pub struct StageState<T> {
    name: String,
    queue: BoundedWorkQueue<T>,
    active_workers: AtomicUsize,
    total_taken: AtomicU64,
    total_committed: AtomicU64,
    precondition: OnceLock<Precondition>,
    completion: Latch,
    checking: AtomicBool,
    grace: Duration,
}

impl<T> StageState<T> {
    pub fn new(name: impl Into<String>, capacity: usize, grace: Duration) -> Self {
        Self {
            name: name.into(),
            queue: BoundedWorkQueue::new(capacity),
            active_workers: AtomicUsize::new(0),
            total_taken: AtomicU64::new(0),
            total_committed: AtomicU64::new(0),
            precondition: OnceLock::new(),
            completion: Latch::new(),
            checking: AtomicBool::new(false),
            grace,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Enqueue an item into this stage (blocks while the queue is full).
    pub fn add(&self, item: T, cancel: &CancelToken) -> Result<(), QueueError> {
        self.queue.add(item, cancel)
    }

    /// Dequeue an item; on success the caller owns it until [`commit`](Self::commit).
    pub fn take(
        &self,
        timeout: Duration,
        cancel: &CancelToken,
    ) -> Result<Option<T>, QueueError> {
        let item = self.queue.try_take(timeout, cancel)?;
        if item.is_some() {
            self.active_workers.fetch_add(1, Ordering::SeqCst);
            self.total_taken.fetch_add(1, Ordering::SeqCst);
        }
        Ok(item)
    }

    /// Mark the item from the last `take` as handled, then run the completion check.
    pub fn commit(&self) -> CompletionCheck {
        let released = self
            .active_workers
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
        if released.is_err() {
            warn!("{}: commit without a matching take; ignored", self.name);
            return CompletionCheck::Unmatched;
        }
        self.total_committed.fetch_add(1, Ordering::SeqCst);

        let outcome = self.check_completion();
        if outcome == CompletionCheck::Blocked {
            warn!(
                "{}: queue is empty and workers are idle, but the completion precondition does not hold yet",
                self.name
            );
        }
        outcome
    }

    /// Run the completion-detection algorithm:
    ///
    /// 1. bail out unless no worker holds an item and the queue is empty;
    /// 2. wait out the grace window (a worker may have dequeued but not yet counted itself);
    /// 3. re-check quiescence, and that no take happened meanwhile;
    /// 4. evaluate the precondition, if any;
    /// 5. close the queue and fire the completion signal, once.
    ///
    /// Only one check runs at a time per stage; concurrent callers get
    /// [`CompletionCheck::InProgress`].
    pub fn check_completion(&self) -> CompletionCheck {
        if self.is_completed() {
            return CompletionCheck::AlreadyCompleted;
        }
        if !self.is_quiescent() {
            return CompletionCheck::Busy;
        }
        if self
            .checking
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return CompletionCheck::InProgress;
        }
        let outcome = self.confirm_completion();
        self.checking.store(false, Ordering::Release);
        outcome
    }

    fn confirm_completion(&self) -> CompletionCheck {
        let generation = self.total_taken.load(Ordering::SeqCst);
        thread::sleep(self.grace);

        if !self.is_quiescent() || self.total_taken.load(Ordering::SeqCst) != generation {
            debug!("{}: quiescence did not hold through the grace window", self.name);
            return CompletionCheck::Raced;
        }
        if let Some(precondition) = self.precondition.get()
            && !precondition()
        {
            return CompletionCheck::Blocked;
        }

        self.queue.close();
        if self.completion.fire() {
            debug!(
                "{}: completed after {} items",
                self.name,
                self.total_committed()
            );
            CompletionCheck::Completed
        } else {
            CompletionCheck::AlreadyCompleted
        }
    }

    /// Gate completion on `precondition`. Settable once, before workers start.
    pub fn register_precondition<F>(&self, precondition: F) -> Result<(), StageError>
    where
        F: Fn() -> bool + Send + Sync + 'static,
    {
        self.precondition
            .set(Box::new(precondition))
            .map_err(|_| StageError::PreconditionAlreadySet {
                stage: self.name.clone(),
            })
    }

    pub fn is_completed(&self) -> bool {
        self.completion.is_set()
    }

    /// Block until the completion signal fires.
    pub fn await_completion(&self) {
        self.completion.wait();
    }

    /// Block up to `timeout`; true if the stage has completed.
    pub fn await_completion_timeout(&self, timeout: Duration) -> bool {
        self.completion.wait_timeout(timeout)
    }

    /// No worker holds an item and the queue is empty.
    pub fn is_quiescent(&self) -> bool {
        self.active_workers.load(Ordering::SeqCst) == 0 && self.queue.is_empty()
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.queue.capacity()
    }

    pub fn active_workers(&self) -> usize {
        self.active_workers.load(Ordering::SeqCst)
    }

    pub fn total_taken(&self) -> u64 {
        self.total_taken.load(Ordering::SeqCst)
    }

    pub fn total_committed(&self) -> u64 {
        self.total_committed.load(Ordering::SeqCst)
    }

    pub fn snapshot(&self) -> StageSnapshot {
        StageSnapshot {
            name: self.name.clone(),
            len: self.len(),
            capacity: self.capacity(),
            active_workers: self.active_workers(),
            total_taken: self.total_taken(),
            total_committed: self.total_committed(),
            completed: self.is_completed(),
        }
    }
}
