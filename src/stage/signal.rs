//! One-shot signals shared between workers: [`Latch`] and the [`CancelToken`] built on it.
//!
//! Firing a latch drops its only sender, so every receiver observes a disconnect. That makes a
//! latch usable as an arm of a `crossbeam_channel::Select`, which is how queue operations wake
//! up on cancellation or closure.

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, bounded};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

struct LatchInner {
    fired: AtomicBool,
    tx: Mutex<Option<Sender<()>>>,
    rx: Receiver<()>,
}

/// A signal that fires at most once. Clones share the same state.
#[derive(Clone)]
pub struct Latch {
    inner: Arc<LatchInner>,
}

impl Default for Latch {
    fn default() -> Self {
        Self::new()
    }
}

impl Latch {
    pub fn new() -> Self {
        let (tx, rx) = bounded(0);
        Self {
            inner: Arc::new(LatchInner {
                fired: AtomicBool::new(false),
                tx: Mutex::new(Some(tx)),
                rx,
            }),
        }
    }

    /// Fire the latch. Returns true only for the call that actually fired it.
    pub fn fire(&self) -> bool {
        let mut guard = self
            .inner
            .tx
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let Some(tx) = guard.take() else {
            return false;
        };
        // Flag first: a waiter woken by the disconnect must already see `is_set() == true`.
        self.inner.fired.store(true, Ordering::SeqCst);
        drop(tx);
        true
    }

    pub fn is_set(&self) -> bool {
        self.inner.fired.load(Ordering::SeqCst)
    }

    /// Block until the latch fires.
    pub fn wait(&self) {
        // Nothing is ever sent; recv only returns once the sender is dropped.
        let _ = self.inner.rx.recv();
    }

    /// Block up to `timeout`. Returns true if the latch has fired.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        match self.inner.rx.recv_timeout(timeout) {
            Err(RecvTimeoutError::Disconnected) => true,
            _ => self.is_set(),
        }
    }

    /// Receiver that disconnects when the latch fires. For use in `Select`.
    pub fn receiver(&self) -> &Receiver<()> {
        &self.inner.rx
    }
}

/// Cooperative cancellation for one pipeline run.
///
/// Passed explicitly to every blocking queue call and every handler invocation; nothing reads a
/// global flag.
#[derive(Clone, Default)]
pub struct CancelToken {
    latch: Latch,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation. Idempotent.
    pub fn cancel(&self) {
        if self.latch.fire() {
            log::debug!("cancellation requested");
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.latch.is_set()
    }

    /// Sleep for `duration` unless cancelled first. Returns false when cut short by cancellation.
    pub fn sleep(&self, duration: Duration) -> bool {
        if duration.is_zero() {
            return !self.is_cancelled();
        }
        !self.latch.wait_timeout(duration)
    }

    /// Block until cancelled or `timeout` elapses. Returns true if cancelled.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        self.latch.wait_timeout(timeout)
    }

    pub fn receiver(&self) -> &Receiver<()> {
        self.latch.receiver()
    }
}
